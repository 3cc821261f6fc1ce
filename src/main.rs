use clap::Parser;
use colored::*;
use env_logger::{Builder, Env, Target};
use log::{info, warn};
use reftrack::cli::{Cli, Commands, OutputFormat};
use reftrack::config::{Config, CONFIG_FILE_NAME};
use reftrack::engine::{ReferenceTracker, ScanOutcome};
use reftrack::error::{ReftrackError, Result as ReftrackResult};
use reftrack::output::ReportFormatter;
use reftrack::progress::ProgressReporter;
use reftrack::resource::load_resources;
use reftrack::rules::normalize_extension;
use reftrack::source::discover_source_files;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> ReftrackResult<()> {
    let cli = Cli::parse();
    setup_logging(&cli)?;

    let start_time = Instant::now();
    info!("Application started with command: {:?}", cli.command);

    if let Commands::Init { force } = &cli.command {
        return init_config(*force);
    }

    let config = Config::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Scan {
            root,
            resources,
            format,
            unused,
            no_progress,
        } => {
            let options = ScanOptions {
                root,
                resources,
                format: *format,
                unused: *unused,
                show_progress: !*no_progress,
                print_metrics: cli.metrics,
            };
            run_scan(&config, &options)?;
        }
        Commands::Rules { extension } => print_rules(&config, extension.as_deref())?,
        Commands::Init { .. } => {}
    }

    info!(
        "Application finished. Total elapsed time: {:.2?}",
        start_time.elapsed()
    );
    Ok(())
}

struct ScanOptions<'a> {
    root: &'a Path,
    resources: &'a [PathBuf],
    format: OutputFormat,
    unused: bool,
    show_progress: bool,
    print_metrics: bool,
}

fn run_scan(config: &Config, options: &ScanOptions<'_>) -> ReftrackResult<()> {
    let entries = load_resources(options.resources)?;
    if entries.is_empty() {
        warn!("No resource keys found in the given resource files");
    }

    let files = discover_source_files(options.root, &config.scan);
    let rules = config.rule_set()?;
    for (id, err) in rules.check_templates() {
        warn!("Rule #{}: {}", id + 1, err);
    }
    info!(
        "Scanning {} files under {} for {} keys",
        files.len(),
        options.root.display(),
        entries.len()
    );

    let tracker = Arc::new(ReferenceTracker::new(config.scan.clone())?);
    {
        let tracker = Arc::clone(&tracker);
        if let Err(e) = ctrlc::set_handler(move || tracker.stop_find()) {
            warn!("Failed to install Ctrl-C handler: {e}");
        }
    }

    let reporter = ProgressReporter::new(options.show_progress);
    let handle = tracker.begin_find(&entries, &files, &rules);
    let outcome = loop {
        if let Some(outcome) = handle.wait_timeout(PROGRESS_POLL_INTERVAL) {
            break outcome;
        }
        reporter.update(handle.progress(), handle.state());
    };

    match &outcome {
        ScanOutcome::Completed(summary) => reporter.finish(format!(
            "{} references in {:.2}s",
            summary.references_found,
            summary.elapsed.as_secs_f64()
        )),
        ScanOutcome::Cancelled => {
            reporter.abandon("cancelled".to_string());
            eprintln!(
                "{}",
                "Scan cancelled; showing the references found so far".yellow()
            );
        }
    }

    let report = ReportFormatter::new(options.format)
        .with_unused_only(options.unused)
        .format_report(&entries, options.root)?;
    print!("{report}");

    if options.print_metrics {
        print!("{}", tracker.metrics().gather());
    }
    Ok(())
}

fn print_rules(config: &Config, extension: Option<&str>) -> ReftrackResult<()> {
    let rules = config.rule_set()?;
    let extension = match extension {
        Some(raw) => Some(normalize_extension(raw).ok_or_else(|| {
            ReftrackError::Config(format!("'{raw}' is not a file extension"))
        })?),
        None => None,
    };

    let mut shown = 0;
    for (id, rule) in rules.rules().iter().enumerate() {
        if let Some(ext) = &extension {
            if !rule.applies_to(ext) {
                continue;
            }
        }
        println!("{:>3}. {}", (id + 1).to_string().cyan(), rule);
        shown += 1;
    }
    if shown == 0 {
        println!("{}", "No match rules apply".yellow());
    }

    for (id, err) in rules.check_templates() {
        println!("{} rule #{}: {}", "warning:".yellow().bold(), id + 1, err);
    }
    Ok(())
}

fn init_config(force: bool) -> ReftrackResult<()> {
    let path = Path::new(CONFIG_FILE_NAME);
    if path.exists() && !force {
        return Err(ReftrackError::Config(format!(
            "{} already exists; use --force to overwrite it",
            path.display()
        )));
    }
    Config::default().save(path)?;
    println!("{} {}", "Wrote".green(), path.display());
    Ok(())
}

fn setup_logging(cli: &Cli) -> ReftrackResult<()> {
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));

    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} [{}] [{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.module_path().unwrap_or("unknown"),
            record.args()
        )
    });

    if let Some(log_path) = &cli.log {
        if let Some(parent_dir) = log_path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                fs::create_dir_all(parent_dir)?;
            }
        }
        let log_file = fs::File::create(log_path)?;
        builder.target(Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(Target::Stderr);
    }

    builder
        .try_init()
        .map_err(|e| ReftrackError::Other(e.to_string()))?;
    Ok(())
}
