use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Directory whose regular files are copied into the image
    #[arg(long, short)]
    pub source: PathBuf,

    /// Output image file
    #[arg(long, short)]
    pub out: PathBuf,

    /// Size of one flash area in KiB
    #[arg(long, default_value_t = 64)]
    pub area_kib: u64,

    /// Number of flash areas, one of which is kept as scratch
    #[arg(long, default_value_t = 8)]
    pub areas: u32,
}
