//! occ — a small C11 compiler targeting x86-64 Linux.

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod args;
pub mod compiler;
pub mod error;

use std::process;

use args::Args;
use compiler::driver;

fn main() {
    let args = Args::parse();

    if let Err(err) = driver::run(&args) {
        // Source diagnostics were already printed with positions; this
        // reports the failure summary or any tool/file error.
        print_err!(&args.program, "{err:#}");
        process::exit(1);
    }
}
