//! VLAN range allocator command line
//!
//! One invocation, one operation against the shared pool:
//!
//! # Examples
//!
//! ```bash
//! # Reserve the lowest free interval
//! vlan-range
//!
//! # Tag it with the instance that uses it
//! vlan-range --update-uuid 6ba7b810-9dad-11d1-80b4-00c04fd430c8 --interval 100:149
//!
//! # Give it back
//! vlan-range --free --interval 100:149
//!
//! # Inspect
//! vlan-range --count --list
//! ```

use anyhow::Context;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vlanrange::error::Error;
use vlanrange::pool::retry_on_conflict;
use vlanrange::{Allocator, LogStore, PoolInitializer, Settings, SlotStatus};

/// Call without arguments to reserve an interval.
#[derive(Parser, Debug)]
#[command(name = "vlan-range")]
#[command(version = vlanrange::VERSION)]
#[command(about = "Call without arguments to reserve an interval.", long_about = None)]
#[command(after_help = "Interval format: <int>:<int>, e.g. 100:149")]
#[command(group(
    ArgGroup::new("action")
        .args(["reset", "free", "update_uuid"])
        .multiple(false)
))]
struct Cli {
    /// Free every interval and start from an empty pool
    #[arg(short, long)]
    reset: bool,

    /// Free an interval, requires --interval
    #[arg(short, long, requires = "interval")]
    free: bool,

    /// Tag an interval with an instance UUID, requires --interval
    #[arg(short = 'u', long = "update-uuid", value_name = "UUID", requires = "interval")]
    update_uuid: Option<String>,

    /// Interval to operate on
    #[arg(short, long, value_name = "LOW:HIGH", allow_hyphen_values = true)]
    interval: Option<String>,

    /// Print the number of used intervals
    #[arg(short, long)]
    count: bool,

    /// List used intervals
    #[arg(short, long)]
    list: bool,

    /// Show all intervals
    #[arg(short, long)]
    show: bool,

    /// Print --list and --show output as JSON
    #[arg(long)]
    json: bool,

    /// Configuration file (INI, TOML or JSON)
    #[arg(long, env = "VLAN_RANGE_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, env = "VLAN_RANGE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error or a directive list)
    #[arg(long, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

impl Cli {
    /// Allocation is the default when nothing else was asked for
    fn wants_allocation(&self) -> bool {
        !(self.reset
            || self.free
            || self.update_uuid.is_some()
            || self.count
            || self.list
            || self.show
            || self.interval.is_some())
    }

    fn interval(&self) -> anyhow::Result<&str> {
        self.interval
            .as_deref()
            .context("--free and --update-uuid require --interval")
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli) {
        eprintln!("failed to set up logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", report(&e));
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries command output only
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "vlan-range.log");
            Some(fmt::layer().with_writer(appender).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(filter)
        .try_init()?;

    Ok(())
}

/// Message printed on stderr for a failed invocation
fn report(e: &anyhow::Error) -> String {
    match e.downcast_ref::<Error>() {
        Some(err) if err.is_bad_interval() => "incorrect interval".to_string(),
        _ => format!("{:#}", e),
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if cli.interval.is_some() && !cli.free && cli.update_uuid.is_none() {
        anyhow::bail!("--interval is only used with --free or --update-uuid");
    }

    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    let retries = settings.store.max_retries;

    let store = LogStore::open(&settings.store)
        .with_context(|| format!("failed to open store at {}", settings.store.path.display()))?;
    let initializer = PoolInitializer::new(settings.range);
    retry_on_conflict(retries, || initializer.ensure_initialized(&store))?;

    let allocator = Allocator::new(settings.range, Box::new(store))?;
    debug!(pool = %settings.range, slots = allocator.partitioner().slot_count(), "Allocator ready");

    if cli.wants_allocation() {
        let interval = retry_on_conflict(retries, || allocator.allocate(None))?;
        println!("{}", interval);
        return Ok(());
    }

    if cli.reset {
        retry_on_conflict(retries, || allocator.reset())?;
    }

    if cli.free {
        let interval = cli.interval()?;
        retry_on_conflict(retries, || allocator.release(interval))?;
    }

    if cli.count {
        let count = retry_on_conflict(retries, || allocator.count())?;
        println!("{}", count);
    }

    if cli.list {
        let used = retry_on_conflict(retries, || allocator.list_occupied())?;
        print_statuses(&used, cli.json)?;
    }

    if cli.show {
        let all = retry_on_conflict(retries, || allocator.show())?;
        print_statuses(&all, cli.json)?;
    }

    if let Some(tag) = &cli.update_uuid {
        let interval = cli.interval()?;
        retry_on_conflict(retries, || allocator.set_tag(interval, tag))?;
    }

    Ok(())
}

fn print_statuses(statuses: &[SlotStatus], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(statuses)?);
    } else {
        for status in statuses {
            println!("{}", status);
        }
    }
    Ok(())
}
