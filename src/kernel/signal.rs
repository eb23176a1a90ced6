use nix::sys::signal::{self, SigHandler, SigSet, Signal};
// Signal conventions shared by the parent and the pre-exec child.
// SETUP_FAILURE_SIGNAL is reserved: the child raises it when a setup step
// fails, and the subject program is never expected to raise it itself.

/// Raised by the child to report a failed setup step
pub const SETUP_FAILURE_SIGNAL: Signal = Signal::SIGUSR1;

/// Restore the default disposition of `sig`, unblock it, then raise it.
///
/// Returns only if the signal did not terminate the process.
pub fn raise_with_default_action(sig: Signal) {
    // SAFETY: installing SIG_DFL runs no user code.
    let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    let mut set = SigSet::empty();
    set.add(sig);
    let _ = set.thread_unblock();
    let _ = signal::raise(sig);
}

/// Short symbolic name (`SIGSEGV`), or the number for unknown signals
pub fn signal_name(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("signal {}", signal),
    }
}

/// Human readable description used in reports
pub fn describe(signal: i32) -> &'static str {
    match signal {
        0 => "No signal",
        libc::SIGHUP => "Hangup",
        libc::SIGINT => "Interrupt",
        libc::SIGQUIT => "Quit",
        libc::SIGILL => "Illegal instruction",
        libc::SIGTRAP => "Trace/breakpoint trap",
        libc::SIGABRT => "Aborted",
        libc::SIGBUS => "Bus error",
        libc::SIGFPE => "Floating point exception",
        libc::SIGKILL => "Killed",
        libc::SIGUSR1 => "Sandbox setup failure",
        libc::SIGSEGV => "Segmentation fault",
        libc::SIGUSR2 => "User defined signal 2",
        libc::SIGPIPE => "Broken pipe",
        libc::SIGALRM => "Alarm clock",
        libc::SIGTERM => "Terminated",
        libc::SIGXCPU => "CPU time limit exceeded",
        libc::SIGXFSZ => "File size limit exceeded",
        libc::SIGSYS => "Bad system call",
        _ => "Unknown signal",
    }
}
