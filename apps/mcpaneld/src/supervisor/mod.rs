mod launch;
mod logs;
mod metrics;
mod monitor;
mod server;
mod state;

pub use launch::LaunchSpec;
pub use logs::LogStore;
pub use metrics::SysinfoProbe;
pub use server::ProcessSupervisor;
