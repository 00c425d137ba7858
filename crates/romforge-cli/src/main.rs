use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Args, Command};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("romforge=info".parse()?))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Checksum { files } => commands::checksum::run(&files),
        Command::Find {
            file,
            pattern,
            all,
            start,
        } => commands::find::run(&file, &pattern, all, start),
        Command::FreeSpace {
            file,
            amount,
            fill,
            start,
            align,
        } => commands::find::run_free_space(&file, amount, fill, start, align),
        Command::Archive { action } => commands::archive::run(action),
        Command::Patch {
            target,
            ips,
            output,
        } => commands::patch::run(&target, &ips, &output),
        Command::Validate(validate) => {
            if !commands::validate::run(&validate)? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
