use mcpanel_core::proto::{LogEvent, LogStream};
use mcpanel_utils::now_millis;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Bounded tail of server output plus a broadcast fan-out for live subscribers.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<Mutex<LogState>>,
}

struct LogState {
    lines: VecDeque<LogEvent>,
    tx: broadcast::Sender<LogEvent>,
    max_lines: usize,
}

impl LogStore {
    pub fn new(max_lines: usize) -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Mutex::new(LogState {
                lines: VecDeque::with_capacity(max_lines.min(1024)),
                tx,
                max_lines: max_lines.max(100),
            })),
        }
    }

    pub fn push(&self, stream: LogStream, line: String) {
        let mut guard = self.inner.lock().expect("log lock poisoned");
        let entry = LogEvent {
            ts: now_millis(),
            stream,
            line,
        };
        while guard.lines.len() >= guard.max_lines {
            guard.lines.pop_front();
        }
        guard.lines.push_back(entry.clone());
        let _ = guard.tx.send(entry);
    }

    pub fn tail(&self, lines: usize) -> Vec<LogEvent> {
        let guard = self.inner.lock().expect("log lock poisoned");
        let count = lines.min(guard.lines.len());
        guard
            .lines
            .iter()
            .skip(guard.lines.len() - count)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        let guard = self.inner.lock().expect("log lock poisoned");
        guard.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_is_bounded_and_ordered() {
        let store = LogStore::new(100);
        for i in 0..150 {
            store.push(LogStream::Stdout, format!("line {i}"));
        }
        let tail = store.tail(3);
        let lines: Vec<_> = tail.iter().map(|e| e.line.as_str()).collect();
        assert_eq!(lines, vec!["line 147", "line 148", "line 149"]);
        assert_eq!(store.tail(1000).len(), 100);
    }

    #[tokio::test]
    async fn subscribers_receive_new_lines() {
        let store = LogStore::new(100);
        let mut rx = store.subscribe();
        store.push(LogStream::Stderr, "boom".into());
        let event = rx.recv().await.expect("receive log event");
        assert_eq!(event.line, "boom");
        assert_eq!(event.stream, LogStream::Stderr);
    }
}
