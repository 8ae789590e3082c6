//! `stamp` - transactional project scaffolding engine.
//!
//! See `README.md` for user documentation and `DESIGN.md` for
//! architecture.

use anyhow::Result;
use clap::Parser;

use stamp::cli::{Cli, Command};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Command::Schema => {
            let schema = stamp::model::generate_schema();
            println!("{}", schema);
            0
        }
        Command::New(args) => stamp::engine::generate(args)?,
        Command::Undo(args) => stamp::engine::undo(args)?,
    };
    std::process::exit(exit_code);
}
