use std::sync::Mutex;

use mcpanel_core::CoreError;
use sysinfo::{Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSample {
    pub cpu: f32,
    pub memory_bytes: u64,
}

/// Samples cpu and memory usage of a running process.
pub trait ProcessProbe: Send + Sync {
    fn sample(&self, pid: u32) -> Result<ProcessSample, CoreError>;
}

pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn sample(&self, pid: u32) -> Result<ProcessSample, CoreError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| CoreError::Process("metrics probe lock poisoned".into()))?;
        let pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = system
            .process(pid)
            .ok_or_else(|| CoreError::Process(format!("process {pid} not found")))?;
        Ok(ProcessSample {
            cpu: process.cpu_usage(),
            memory_bytes: process.memory(),
        })
    }
}
