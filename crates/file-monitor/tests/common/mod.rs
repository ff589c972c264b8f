//! Shared helpers for monitor integration tests

use crossbeam_channel::{unbounded, Receiver, Sender};
use file_monitor::FileMonitorEvent;
use std::time::{Duration, Instant};

/// Collects callback events on a channel the test thread can wait on
pub struct Collector {
    tx: Sender<FileMonitorEvent>,
    rx: Receiver<FileMonitorEvent>,
}

impl Collector {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Callback to hand to `FileMonitor::start`
    pub fn callback(&self) -> impl FnMut(FileMonitorEvent) + Send + 'static {
        let tx = self.tx.clone();
        move |event| {
            let _ = tx.send(event);
        }
    }

    /// Wait until an event satisfies `pred`, returning everything seen so far
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut pred: impl FnMut(&FileMonitorEvent) -> bool,
    ) -> Option<Vec<FileMonitorEvent>> {
        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self.rx.recv_timeout(remaining).ok()?;
            let done = pred(&event);
            seen.push(event);
            if done {
                return Some(seen);
            }
        }
    }

    /// Everything that arrives within `period`
    pub fn gather(&self, period: Duration) -> Vec<FileMonitorEvent> {
        let deadline = Instant::now() + period;
        let mut seen = Vec::new();
        while let Ok(event) = self
            .rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        {
            seen.push(event);
        }
        seen
    }

    pub fn try_recv(&self) -> Option<FileMonitorEvent> {
        self.rx.try_recv().ok()
    }
}

/// Give the backend time to arm its watches before the test touches disk
pub fn settle() {
    std::thread::sleep(Duration::from_millis(100));
}

