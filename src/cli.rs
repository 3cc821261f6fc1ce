use clap::{Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(long, value_parser, default_value_t = false)]
    pub verbose: bool,

    /// Write log records to this file instead of stderr
    #[clap(long, value_parser)]
    pub log: Option<PathBuf>,

    /// Configuration file; searched for in the usual places when omitted
    #[clap(long, value_parser)]
    pub config: Option<PathBuf>,

    /// Print scan counters in Prometheus text format when done
    #[clap(long, value_parser, default_value_t = false)]
    pub metrics: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find where resource keys are referenced under a source tree
    Scan {
        #[clap(default_value = ".")]
        root: PathBuf,

        /// .resx/.resw/.json files to take keys from
        #[clap(long, short = 'r', value_parser, num_args = 1.., required = true)]
        resources: Vec<PathBuf>,

        #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Only list keys without any reference
        #[clap(long, value_parser, default_value_t = false)]
        unused: bool,

        #[clap(long, value_parser, default_value_t = false)]
        no_progress: bool,
    },
    /// Show the effective match rules
    Rules {
        #[clap(long, short = 'e', value_parser)]
        extension: Option<String>,
    },
    /// Write the default configuration to ./.reftrack.toml
    Init {
        #[clap(long, value_parser, default_value_t = false)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan() {
        let cli = Cli::parse_from([
            "reftrack",
            "--verbose",
            "scan",
            "src",
            "--resources",
            "a.resx",
            "b.json",
            "--format",
            "json",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Scan {
                root,
                resources,
                format,
                unused,
                ..
            } => {
                assert_eq!(root, PathBuf::from("src"));
                assert_eq!(resources.len(), 2);
                assert_eq!(format, OutputFormat::Json);
                assert!(!unused);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_scan_requires_resources() {
        assert!(Cli::try_parse_from(["reftrack", "scan", "src"]).is_err());
    }
}
