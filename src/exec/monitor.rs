//! Wall-clock watchdog
//!
//! One thread per run, started only when a real-time limit is set. It sleeps
//! for the deadline rounded up to whole seconds and then SIGKILLs the subject
//! if it is still alive. Cancelling drops the channel sender, which wakes the
//! thread immediately; [`TimeoutMonitor::cancel`] joins before returning.

use crate::config::types::{Result, SandboxError};
use crate::observability::run_log::RunLog;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct TimeoutMonitor {
    cancel_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<bool>>,
}

impl TimeoutMonitor {
    pub fn start(pid: Pid, deadline_ms: u64, log: RunLog) -> Result<Self> {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
        let sleep = Duration::from_secs(deadline_seconds(deadline_ms));

        let handle = thread::Builder::new()
            .name(format!("runbox-monitor-{}", pid))
            .spawn(move || watch(pid, sleep, cancel_rx, log))
            .map_err(|e| SandboxError::MonitorStart(e.to_string()))?;

        Ok(Self {
            cancel_tx: Some(cancel_tx),
            handle: Some(handle),
        })
    }

    /// Stop the watchdog and wait for its thread to exit.
    /// Returns whether it killed the subject.
    pub fn cancel(mut self) -> bool {
        self.shutdown()
    }

    fn shutdown(&mut self) -> bool {
        drop(self.cancel_tx.take());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or(false),
            None => false,
        }
    }
}

impl Drop for TimeoutMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleep granularity is whole seconds, rounded up
pub fn deadline_seconds(deadline_ms: u64) -> u64 {
    deadline_ms.div_ceil(1000)
}

fn watch(pid: Pid, sleep: Duration, cancel_rx: Receiver<()>, log: RunLog) -> bool {
    match cancel_rx.recv_timeout(sleep) {
        Err(RecvTimeoutError::Timeout) => {}
        Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
    }

    if kill(pid, None).is_err() {
        return false;
    }

    log.info(format!(
        "Process {} exceeded the real time limit, sending SIGKILL",
        pid
    ));
    match kill(pid, Signal::SIGKILL) {
        Ok(()) => true,
        Err(errno) => {
            log.warn(format!("Failed to kill process {}: {}", pid, errno));
            false
        }
    }
}
