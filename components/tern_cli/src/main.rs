//! Tern runtime CLI.
//!
//! Loads a compiled `.tbc` module and executes it (or disassembles it),
//! rendering any collected diagnostics on stderr.

use clap::Parser;
use tern_cli::{Cli, CliError, Runtime};

/// Exit code for load failures, after BSD's EX_DATAERR neighborhood.
const EXIT_LOAD: i32 = 70;

fn main() {
    let cli = Cli::parse();
    let mut runtime = Runtime::new(cli.vm_options());

    if cli.disassemble {
        match runtime.disassemble_file(&cli.file) {
            Ok(listing) => print!("{}", listing),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(EXIT_LOAD);
            }
        }
        return;
    }

    match runtime.execute_file(&cli.file) {
        Ok(value) => {
            if let Some(rendered) = Runtime::render_result(&value) {
                println!("{}", rendered);
            }
        }
        Err(CliError::LoadError(msg)) => {
            eprintln!("load error: {}", msg);
            std::process::exit(EXIT_LOAD);
        }
        Err(e) => {
            if cli.json {
                eprintln!("{}", runtime.diagnostics_json());
            } else {
                let rendered = runtime.render_diagnostics();
                if rendered.is_empty() {
                    eprintln!("{}", e);
                } else {
                    eprint!("{}", rendered);
                }
            }
            std::process::exit(1);
        }
    }
}
