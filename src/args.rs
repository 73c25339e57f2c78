use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OverwriteMode {
    /// Ask once per batch when a file already exists
    Ask,
    /// Replace existing files without asking
    Always,
    /// Never replace existing files
    Never,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload files to an XNAT destination", long_about = None)]
pub struct Cli {
    /// Files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// TOML file with upload settings
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server base url
    #[arg(long)]
    pub server: Option<String>,

    /// Destination path; ##FILENAME_REPLACE## is replaced with each file name
    #[arg(long, short = 'd')]
    pub destination: Option<String>,

    /// Maximum concurrent uploads
    #[arg(long, short = 'j', value_name = "N")]
    pub max_concurrent: Option<usize>,

    /// Ask the server to extract archives
    #[arg(long)]
    pub extract: bool,

    /// Ask the server to send an email when processing completes
    #[arg(long)]
    pub send_email: bool,

    #[arg(long, value_enum, default_value_t = OverwriteMode::Ask)]
    pub overwrite: OverwriteMode,

    /// Print the final item list as JSON
    #[arg(long)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
