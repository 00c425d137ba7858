use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::commands::hex_utils::{parse_hex_byte, parse_hex_usize, parse_key_value};

#[derive(Parser)]
#[command(name = "romforge")]
#[command(version, about = "Inspect and patch console ROM components")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the CRC-32 of each file
    Checksum {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Locate a byte signature (e.g. "4A 6B ?? 00") in a file
    Find {
        file: PathBuf,
        pattern: String,
        /// List every match instead of requiring a unique one
        #[arg(long)]
        all: bool,
        /// Only search at or after this offset (hex)
        #[arg(long, value_parser = parse_hex_usize, default_value = "0")]
        start: usize,
    },
    /// Find a run of free bytes in a file
    FreeSpace {
        file: PathBuf,
        amount: usize,
        /// Fill byte that marks free space (hex)
        #[arg(long, value_parser = parse_hex_byte, default_value = "FF")]
        fill: u8,
        #[arg(long, value_parser = parse_hex_usize, default_value = "0")]
        start: usize,
        #[arg(long, default_value_t = 4)]
        align: usize,
    },
    /// List, extract or replace sub-files of a container
    Archive {
        #[command(subcommand)]
        action: ArchiveAction,
    },
    /// Apply an IPS patch to a file
    Patch {
        target: PathBuf,
        ips: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Check component checksums against a revision profile
    Validate(ValidateArgs),
}

#[derive(ClapArgs)]
pub struct LayoutArgs {
    /// Treat the file as a flat offset table with this payload alignment
    /// instead of a NARC
    #[arg(long, value_name = "ALIGN")]
    pub packed: Option<u32>,
}

#[derive(Subcommand)]
pub enum ArchiveAction {
    /// List sub-files with their sizes and checksums
    List {
        file: PathBuf,
        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Write every sub-file to a directory
    Extract {
        file: PathBuf,
        out_dir: PathBuf,
        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Replace one sub-file and write the rebuilt container
    Replace {
        file: PathBuf,
        index: usize,
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        layout: LayoutArgs,
    },
}

#[derive(ClapArgs)]
pub struct ValidateArgs {
    /// Revision profiles (JSON)
    #[arg(long)]
    pub profiles: PathBuf,
    /// Four-character game code
    #[arg(long)]
    pub code: String,
    #[arg(long, default_value_t = 0)]
    pub version: u32,
    /// Primary code binary
    #[arg(long)]
    pub arm9: PathBuf,
    /// Overlay table, needed to decompress overlays
    #[arg(long)]
    pub overlay_table: Option<PathBuf>,
    /// Overlay file as ID=PATH (repeatable)
    #[arg(long = "overlay", value_parser = parse_key_value::<u32>)]
    pub overlays: Vec<(u32, PathBuf)>,
    /// Tracked file as NAME=PATH (repeatable)
    #[arg(long = "file", value_parser = parse_key_value::<String>)]
    pub files: Vec<(String, PathBuf)>,
}
