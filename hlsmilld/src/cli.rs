// Command-line interface for the batch engine
// Uses clap for parsing arguments

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(
    name = "hlsmilld",
    about = "Batch HLS transcoding engine - validates, transcodes, and organizes a folder of media",
    version,
    author
)]
pub struct Args {
    /// Input folder with source media
    #[arg(short, long, value_name = "DIR")]
    pub input: Option<PathBuf>,

    /// Output folder for HLS trees
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Video encoder handed to the transcoder
    #[arg(long, value_name = "NAME")]
    pub encoder: Option<String>,

    /// Encoder preset
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Encoder tune
    #[arg(long, value_name = "NAME")]
    pub tune: Option<String>,

    /// Output frame rate
    #[arg(long, value_name = "N")]
    pub fps: Option<u32>,

    /// Drop audio tracks from the output
    #[arg(long)]
    pub no_audio: bool,

    /// Number of parallel transcodes
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Rename files to their canonical form before processing
    #[arg(long, overrides_with = "no_rename")]
    pub rename: bool,

    /// Skip the renaming step
    #[arg(long)]
    pub no_rename: bool,

    /// Organize output folders into parent buckets afterwards
    #[arg(long, overrides_with = "no_organize")]
    pub organize: bool,

    /// Skip the organization step
    #[arg(long)]
    pub no_organize: bool,

    /// Path to a JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Named profile to load from the profiles directory
    #[arg(short, long, value_name = "NAME", conflicts_with = "config")]
    pub profile: Option<String>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Three-state rename override: flag set, negated, or absent
    pub fn rename_override(&self) -> Option<bool> {
        if self.no_rename {
            Some(false)
        } else if self.rename {
            Some(true)
        } else {
            None
        }
    }

    /// Three-state organize override
    pub fn organize_override(&self) -> Option<bool> {
        if self.no_organize {
            Some(false)
        } else if self.organize {
            Some(true)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_pairs_resolve() {
        let mut args = Args::default();
        assert_eq!(args.rename_override(), None);

        args.rename = true;
        assert_eq!(args.rename_override(), Some(true));

        args.no_rename = true;
        assert_eq!(args.rename_override(), Some(false));

        args.no_organize = true;
        assert_eq!(args.organize_override(), Some(false));
    }
}
