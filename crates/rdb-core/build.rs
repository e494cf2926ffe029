//! Build script for rdb-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (let-else and `is_some_and` need Rust 1.70.0+)
//! - Target support for process control
//!
//! ## Requirements
//!
//! - **Rust**: 1.70.0 or newer
//! - **Process control**: Linux on x86-64 (ptrace)
//! - **Symbol and DWARF readers**: any target

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    match rustc_version::version() {
        Ok(rustc_version) => {
            let min_rust_version = rustc_version::Version::new(1, 70, 0);
            if rustc_version < min_rust_version {
                panic!("rdb-core requires Rust {min_rust_version} or newer, found {rustc_version}");
            }
        }
        // Some build environments hide the compiler version
        Err(_) => println!("cargo:warning=could not verify Rust version"),
    }

    let os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if os != "linux" || arch != "x86_64" {
        println!(
            "cargo:warning=rdb-core process control needs linux/x86_64; building readers only for {os}/{arch}"
        );
    }
}
