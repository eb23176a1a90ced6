/// Run-scoped diagnostic log
///
/// One handle per sandbox run, cloned into the monitor thread and inherited
/// (copy-on-write) by the pre-exec child. Lines go to the configured log file
/// when it can be opened, otherwise to the `log` facade. Sink failures are
/// never fatal to the run.
use log::{Level, LevelFilter};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub struct RunLog {
    inner: Arc<RunLogInner>,
}

#[derive(Debug)]
struct RunLogInner {
    task_name: String,
    level: LevelFilter,
    sink: Mutex<Option<File>>,
}

impl RunLog {
    /// Create a log for `task_name`, appending to `log_file` if given
    pub fn new(task_name: &str, log_file: Option<&Path>) -> Self {
        Self::with_level(task_name, log_file, default_level())
    }

    pub fn with_level(task_name: &str, log_file: Option<&Path>, level: LevelFilter) -> Self {
        let sink = log_file.and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    log::warn!(
                        "Cannot open log file {}: {}; falling back to stderr",
                        path.display(),
                        e
                    );
                    None
                }
            }
        });

        Self {
            inner: Arc::new(RunLogInner {
                task_name: task_name.to_string(),
                level,
                sink: Mutex::new(sink),
            }),
        }
    }

    pub fn task_name(&self) -> &str {
        &self.inner.task_name
    }

    /// Whether lines currently go to a file
    pub fn has_file_sink(&self) -> bool {
        self.inner
            .sink
            .lock()
            .map(|sink| sink.is_some())
            .unwrap_or(false)
    }

    pub fn log(&self, level: Level, message: &str) {
        if level > self.inner.level {
            return;
        }

        let mut sink = match self.inner.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(file) = sink.as_mut() {
            let line = format_line(&self.inner.task_name, level, message);
            match file.write_all(line.as_bytes()) {
                Ok(()) => return,
                Err(e) => {
                    *sink = None;
                    log::warn!("Log file write failed: {}; falling back to stderr", e);
                }
            }
        }
        drop(sink);

        log::log!(level, "[{}] {}", self.inner.task_name, message);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message.as_ref());
    }

    /// Error reporting for a forked child. Never blocks: a sink lock that was
    /// held by another thread at fork time is never released in the child,
    /// so such lines go straight to fd 2 instead.
    pub fn error_after_fork(&self, message: &str) {
        let line = format_line(&self.inner.task_name, Level::Error, message);
        if let Ok(mut sink) = self.inner.sink.try_lock() {
            if let Some(file) = sink.as_mut() {
                if file.write_all(line.as_bytes()).is_ok() {
                    return;
                }
            }
        }
        let _ = nix::unistd::write(std::io::stderr(), line.as_bytes());
    }
}

fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// `[YYYY-mm-dd HH:MM:SS][task][LEVEL] message\n`
fn format_line(task_name: &str, level: Level, message: &str) -> String {
    format!(
        "[{}][{}][{}] {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        task_name,
        level_tag(level),
        message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn writes_prefixed_lines_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let log = RunLog::with_level("unit-task", Some(&path), LevelFilter::Debug);
        assert!(log.has_file_sink());

        log.info("hello");
        log.error(format!("code {}", 7));

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[unit-task][INFO] hello"));
        assert!(lines[1].ends_with("[unit-task][ERROR] code 7"));
        assert!(lines[0].starts_with('['));
    }

    #[test]
    fn filters_below_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let log = RunLog::with_level("quiet", Some(&path), LevelFilter::Warn);
        log.debug("hidden");
        log.info("hidden");
        log.warn("shown");
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("[WARNING] shown"));
    }

    #[test]
    fn appends_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        RunLog::with_level("a", Some(&path), LevelFilter::Info).info("first");
        RunLog::with_level("b", Some(&path), LevelFilter::Info).info("second");
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[a][INFO] first"));
        assert!(contents.contains("[b][INFO] second"));
    }

    #[test]
    fn unavailable_sink_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("run.log");
        let log = RunLog::new("fallback", Some(&path));
        assert!(!log.has_file_sink());
        log.error("still fine");
        assert_eq!(log.task_name(), "fallback");
    }

    #[test]
    fn child_error_does_not_wait_for_a_held_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let log = RunLog::with_level("forked", Some(&path), LevelFilter::Info);

        {
            let _held = log.inner.sink.lock().unwrap();
            log.error_after_fork("(CHILD 1) skipped while locked");
        }
        log.error_after_fork("(CHILD 2) Exec failed");

        let contents = fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("skipped while locked"));
        assert!(contents.contains("[forked][ERROR] (CHILD 2) Exec failed"));
    }

    #[test]
    fn clones_share_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let log = RunLog::with_level("shared", Some(&path), LevelFilter::Info);
        let clone = log.clone();
        std::thread::spawn(move || clone.info("from thread"))
            .join()
            .unwrap();
        log.info("from main");
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
