//! Tracks where localizable resource keys are referenced in source code.
//!
//! A [`ReferenceTracker`] scans a snapshot of source files for every
//! [`ResourceEntry`] in the background and publishes the matching lines onto
//! each entry's [`CodeReferenceSlot`]. What counts as a reference is decided
//! per file extension by a [`MatchRuleSet`].
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod matcher;
pub mod metrics;
pub mod output;
pub mod progress;
pub mod resource;
pub mod rules;
pub mod source;
pub mod walker;

pub use clap::Parser;
pub use cli::{Cli, Commands, OutputFormat};
pub use config::{Config, ScanConfig};
pub use engine::{ReferenceTracker, ScanHandle, ScanOutcome, ScanSummary};
pub use error::{ReftrackError, Result};
pub use matcher::{match_line, LineMatcher, MatchOutcome};
pub use progress::ScanState;
pub use resource::{load_resources, CodeReference, CodeReferenceSlot, Resource, ResourceEntry};
pub use rules::{MatchRule, MatchRuleConfig, MatchRuleSet};
pub use source::{discover_source_files, SourceFile};
