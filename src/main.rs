use std::fs::File;
use std::process::ExitCode;

use clap::Parser;

use mica::{Engine, MicaError};

/// mica - a minimal concatenative language, JIT-assembled at read time.
#[derive(Parser)]
#[command(name = "mica")]
#[command(about = "A minimal JIT-compiled concatenative language", long_about = None)]
struct Cli {
    /// Source files to run, in order. `-` reads standard input. With no
    /// files at all, standard input is read once.
    files: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut engine = match Engine::new() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("mica: {}", e);
            return ExitCode::FAILURE;
        }
    };
    // Safety: `engine` lives for the rest of `main`, and this process
    // drives the top-level loop on a single thread (spec.md §5).
    unsafe { engine.install() };

    let sources: Vec<String> = if cli.files.is_empty() { vec!["-".to_string()] } else { cli.files };

    for path in sources {
        if let Err(e) = run_one(&mut engine, &path) {
            eprintln!("mica: {}", e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

fn run_one(engine: &mut Engine, path: &str) -> Result<(), MicaError> {
    let input: Box<dyn std::io::Read> = if path == "-" {
        Box::new(std::io::stdin())
    } else {
        let file =
            File::open(path).map_err(|e| MicaError::Io(format!("cannot open {}: {}", path, e)))?;
        Box::new(file)
    };
    engine.reader.set_input(input);
    mica::compiler::run_top_level(engine)
}
