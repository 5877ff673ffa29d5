//! Module for parsing command-line arguments passed to the compiler.

use std::path::{Path, PathBuf};
use std::process;

use crate::print_err;

/// Compiler command-line arguments.
#[derive(Debug)]
pub struct Args {
    /// Name of the program.
    pub program: String,
    /// Compilation phase to stop at and dump (`lex`, `parse`, `il`, or
    /// `asm`), if any.
    pub stage: Option<String>,
    /// Path to the input C file.
    pub in_path: &'static Path,
    /// Output path for the linked executable (defaults to `a.out`).
    pub out_path: PathBuf,
    /// Stop after writing the assembly file (`-S`).
    pub no_link: bool,
}

impl Args {
    /// Parses command-line arguments from `std::env::args()`, [exiting]
    /// on error.
    ///
    /// [exiting]: std::process::exit
    pub fn parse() -> Self {
        let mut args = std::env::args().peekable();
        let program = args.next().unwrap_or("occ".into());

        let mut stage = None;
        let mut out_path = PathBuf::new();
        let mut no_link = false;

        while let Some(arg) = args.peek() {
            if !arg.starts_with('-') {
                // No remaining flags to process.
                break;
            }
            // Already peeked the next argument.
            let flag_name = args.next().expect("next argument should be present");

            if let Some(flag) = FLAG_REGISTRY
                .iter()
                .find(|flag| flag.names.contains(&flag_name.as_str()))
            {
                match flag.names {
                    ["-s", "--stage"] => match args.peek().map(|s| &**s) {
                        Some("lex") | Some("parse") | Some("il") | Some("asm") => {
                            stage = args.next();
                        }
                        Some(s) => {
                            print_err!(&program, "invalid stage: '{s}'");
                            print_usage(&program);
                        }
                        None => {
                            print_err!(&program, "missing stage name after '-s'|'--stage'");
                            print_usage(&program);
                        }
                    },
                    ["-o", "--output"] => match args.next() {
                        Some(path) => out_path = PathBuf::from(&path),
                        None => {
                            print_err!(&program, "missing file name after '-o'|'--output'");
                            print_usage(&program);
                        }
                    },
                    ["-S", "--no-link"] => no_link = true,
                    _ => {
                        if let Some(run) = flag.run {
                            run(&program);
                        }
                    }
                }
            } else {
                print_err!(&program, "invalid flag '{flag_name}'");
                print_usage(&program);
            }
        }

        // The input file comes after all flags have been processed.
        let Some(file_path) = args.next() else {
            print_err!(&program, "no input file");
            print_usage(&program);
        };

        // NOTE: Leaking `file_path` to ensure the input path is available
        // for error reporting throughout the runtime.
        let in_path = Path::new(file_path.leak());

        // Indicates no output path was provided.
        if out_path.capacity() == 0 {
            out_path = PathBuf::from("a.out");
        }

        Self {
            program,
            stage,
            in_path,
            out_path,
            no_link,
        }
    }
}

struct Flag {
    names: [&'static str; 2],
    description: &'static str,
    run: Option<fn(&str) -> !>,
}

const FLAG_REGISTRY: &[Flag] = &[
    Flag {
        names: ["-s", "--stage"],
        description: "          stop after the specified phase and dump it: 'lex', 'parse', 'il', or 'asm'.",
        run: None,
    },
    Flag {
        names: ["-o", "--output"],
        description: "         specify the output executable. defaults to 'a.out'",
        run: None,
    },
    Flag {
        names: ["-S", "--no-link"],
        description: "        emit assembly only; do not assemble or link",
        run: None,
    },
    Flag {
        names: ["-h", "--help"],
        description: "           print this summary.",
        run: Some(print_usage),
    },
    Flag {
        names: ["-v", "--version"],
        description: "        show version.",
        run: Some(print_version),
    },
];

/// Prints the usage information for the program, exiting with a non-zero
/// status.
pub fn print_usage(program: &str) -> ! {
    eprintln!("\x1b[1;1musage:\x1b[0m");
    eprintln!("      {program} [options] <infile.c>");
    eprintln!("\x1b[1;1moptions:\x1b[0m");

    for flag in FLAG_REGISTRY {
        eprintln!("   {}  {}", flag.names.join(", "), flag.description);
    }

    process::exit(1);
}

fn print_version(program: &str) -> ! {
    println!(
        "\x1b[1;1m{} - {}\x1b[0m",
        program,
        env!("CARGO_PKG_VERSION")
    );
    process::exit(0);
}
