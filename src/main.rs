use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = songshelf_lib::CliArgs::parse();
    match songshelf_lib::run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
