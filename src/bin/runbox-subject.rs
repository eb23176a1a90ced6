//! Well-behaved and misbehaving subjects for the end-to-end tests.
//!
//! Usage: runbox-subject <mode> [arg]

use std::hint::black_box;
use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::time::{Duration, Instant};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = args.first().map(String::as_str).unwrap_or("");
    let arg = args.get(1).map(String::as_str);

    match mode {
        "exit" => ExitCode::from(arg.and_then(|a| a.parse().ok()).unwrap_or(0)),
        "spin" => spin(),
        "alloc" => alloc(arg.and_then(|a| a.parse().ok()).unwrap_or(160)),
        "recurse" => recurse_until_fault(),
        "socket" => open_socket(),
        "fork" => fork_once(),
        "env" => print_env(arg),
        "echo" => echo(),
        "sleep" => {
            std::thread::sleep(Duration::from_millis(
                arg.and_then(|a| a.parse().ok()).unwrap_or(10_000),
            ));
            ExitCode::SUCCESS
        }
        "write" => write_bytes(arg.and_then(|a| a.parse().ok()).unwrap_or(1 << 20)),
        "pwd" => {
            let cwd = std::env::current_dir().map(|p| p.display().to_string());
            println!("{}", cwd.unwrap_or_default());
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("unknown mode: {:?}", mode);
            ExitCode::from(64)
        }
    }
}

fn spin() -> ExitCode {
    let started = Instant::now();
    let mut acc: u64 = 0;
    while started.elapsed() < Duration::from_secs(60) {
        for i in 0..1_000_000u64 {
            acc = black_box(acc.wrapping_mul(31).wrapping_add(i));
        }
    }
    ExitCode::from((acc & 1) as u8)
}

/// Allocate `mib` MiB and touch every page so it counts as resident
fn alloc(mib: usize) -> ExitCode {
    let mut buffer = vec![0u8; mib << 20];
    for offset in (0..buffer.len()).step_by(4096) {
        buffer[offset] = 1;
    }
    black_box(&buffer);
    ExitCode::SUCCESS
}

fn recurse_until_fault() -> ExitCode {
    // Let the kernel deliver SIGSEGV instead of the runtime's overflow handler.
    // SAFETY: restoring default dispositions runs no handler code.
    unsafe {
        libc::signal(libc::SIGSEGV, libc::SIG_DFL);
        libc::signal(libc::SIGBUS, libc::SIG_DFL);
    }
    ExitCode::from((descend(0) & 1) as u8)
}

#[inline(never)]
#[allow(unconditional_recursion)]
fn descend(depth: u64) -> u64 {
    let frame = black_box([depth as u8; 4096]);
    descend(depth + 1).wrapping_add(u64::from(frame[0]))
}

fn open_socket() -> ExitCode {
    // SAFETY: plain syscall; the descriptor is closed if it is ever returned.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd >= 0 {
        // SAFETY: fd is a valid descriptor we own.
        unsafe { libc::close(fd) };
    }
    ExitCode::SUCCESS
}

/// Exit 0 when a child could be forked and reaped, 1 when fork failed
fn fork_once() -> ExitCode {
    // SAFETY: the child only calls the async-signal-safe _exit.
    match unsafe { libc::fork() } {
        -1 => ExitCode::from(1),
        0 => unsafe { libc::_exit(0) },
        pid => {
            let mut status = 0;
            // SAFETY: pid is our own child and status is a live local.
            unsafe { libc::waitpid(pid, &mut status, 0) };
            ExitCode::SUCCESS
        }
    }
}

fn print_env(key: Option<&str>) -> ExitCode {
    match key {
        Some(key) => println!("{}", std::env::var(key).unwrap_or_default()),
        None => {
            for (key, value) in std::env::vars() {
                println!("{}={}", key, value);
            }
        }
    }
    ExitCode::SUCCESS
}

fn echo() -> ExitCode {
    let mut input = String::new();
    if io::stdin().read_to_string(&mut input).is_err() {
        return ExitCode::from(2);
    }
    print!("out:{}", input);
    let _ = io::stdout().flush();
    eprint!("err:{}", input);
    ExitCode::SUCCESS
}

fn write_bytes(count: usize) -> ExitCode {
    let chunk = [b'x'; 4096];
    let mut stdout = io::stdout().lock();
    let mut written = 0;
    while written < count {
        let n = chunk.len().min(count - written);
        if stdout.write_all(&chunk[..n]).is_err() {
            return ExitCode::from(3);
        }
        written += n;
    }
    ExitCode::SUCCESS
}
