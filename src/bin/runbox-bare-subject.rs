//! Subject that skips the Rust runtime and talks to the kernel directly.
//!
//! Past the dynamic loader it issues only the syscalls each mode names, so
//! it can run under the restrictive policy.
//!
//! Usage: runbox-bare-subject exit <code> | write | socket

#![no_main]

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

#[no_mangle]
pub extern "C" fn main(argc: c_int, argv: *const *const c_char) -> c_int {
    // SAFETY: the C runtime hands us argc valid NUL-terminated strings.
    let arg = |i: c_int| -> &'static [u8] {
        if i < argc {
            unsafe { CStr::from_ptr(*argv.offset(i as isize)).to_bytes() }
        } else {
            b""
        }
    };

    let code = match arg(1) {
        b"exit" => parse_code(arg(2)),
        b"write" => {
            let message = b"ok\n";
            // SAFETY: message outlives the call.
            unsafe { libc::syscall(libc::SYS_write, 1, message.as_ptr(), message.len()) };
            0
        }
        b"socket" => {
            // SAFETY: plain syscall; a returned descriptor is left to exit.
            unsafe { libc::syscall(libc::SYS_socket, libc::AF_INET, libc::SOCK_STREAM, 0) };
            0
        }
        _ => 64,
    };

    // SAFETY: terminates the process; nothing runs afterwards.
    unsafe { libc::syscall(libc::SYS_exit_group, code) };
    code
}

fn parse_code(digits: &[u8]) -> c_int {
    digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0, |acc: c_int, b| acc.wrapping_mul(10).wrapping_add(c_int::from(b - b'0')))
        & 0xFF
}
