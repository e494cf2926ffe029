//! # Platform-Specific Implementations
//!
//! Process control is only implemented for Linux on x86-64, through
//! `ptrace(2)` and `waitpid(2)`:
//!
//! - See: [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//!
//! Everything that only reads the executable (binary, symbol and DWARF
//! decoding) is portable and lives outside this module.

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod linux;
