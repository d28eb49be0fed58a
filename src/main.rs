/*!
 * Ferry CLI - Command Line Interface
 *
 * Relays objects and batches from a source directory store to a destination
 * store, using the same engine and orchestrator a remote-backed relay would.
 */

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ferry::{
    cli_progress::CliProgressRenderer,
    cli_style::{
        self, batch_items_table, batch_summary_table, multi_batch_table, object_summary_table,
        print_error, print_info, print_success, range_item_icon, range_summary_table,
        section_header, Theme,
    },
    config::{LogLevel, TransferConfig},
    core::ProgressPublisher,
    error::{TransferError, EXIT_CANCELLED, EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS},
    logging,
    relay::Relay,
    remote::{BatchLocator, Destination, LocalStore, ObjectLocator, SharedRemote},
};
use ferry_core_resilience::{CancellationRegistry, TaskId};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(version, about = "Relay objects and batches between stores under rate limits", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides the configuration file)
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Verbose output (debug logging, per-item listings)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Print the summary as JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Allow server-side direct copy of batches
    #[arg(long, global = true)]
    direct_copy: bool,

    /// Apply the elevated size ceiling
    #[arg(long, global = true)]
    elevated: bool,

    /// Directory for temporary downloads (overrides the configuration file)
    #[arg(long, value_name = "DIR", global = true)]
    download_dir: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Stores {
    /// Source store root
    #[arg(short = 's', long = "source", value_name = "DIR")]
    source: PathBuf,

    /// Destination store root
    #[arg(short = 'd', long = "dest", value_name = "DIR")]
    dest: PathBuf,

    /// Destination inside the destination store
    #[arg(long = "to", value_name = "NAME", default_value = "relayed")]
    to: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay a single object
    Object {
        #[command(flatten)]
        stores: Stores,

        /// Object locator, relative to the source root
        locator: String,
    },

    /// Relay one or more batches (subdirectories of the source root)
    Batch {
        #[command(flatten)]
        stores: Stores,

        /// Batch locators
        #[arg(required = true)]
        batches: Vec<String>,
    },

    /// Relay objects one after another
    Range {
        #[command(flatten)]
        stores: Stores,

        /// Relay every object under this prefix, in name order
        #[arg(long, conflicts_with = "locators")]
        prefix: Option<String>,

        /// Object locators, in relay order (default: every object)
        locators: Vec<String>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            let transfer = e.downcast_ref::<TransferError>();
            let hint = match transfer {
                Some(TransferError::TaskAlreadyActive(_)) => {
                    Some("wait for the running relay to finish, or cancel it")
                }
                Some(TransferError::Config(_)) => Some("check the configuration file"),
                _ => None,
            };
            print_error(&format!("{:#}", e), hint);
            transfer.map(TransferError::exit_code).unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TransferConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TransferConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if let Some(dir) = &cli.download_dir {
        config.download_dir = dir.clone();
    }
    config.verbose |= cli.verbose;
    config.size_limits.elevated |= cli.elevated;

    if let Err(e) = logging::init_logging(&config) {
        cli_style::print_warning(&format!("Failed to initialize logging: {}", e));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;

    let (code, renderer) = runtime.block_on(execute(cli, config))?;
    // The relay (and with it every progress publisher) is gone by now
    if let Some(renderer) = renderer {
        let _ = renderer.join();
    }
    Ok(code)
}

async fn execute(
    cli: Cli,
    config: TransferConfig,
) -> anyhow::Result<(i32, Option<JoinHandle<()>>)> {
    let stores = match &cli.command {
        Commands::Object { stores, .. }
        | Commands::Batch { stores, .. }
        | Commands::Range { stores, .. } => stores.clone(),
    };
    let store = LocalStore::new(&stores.source, &stores.dest).with_direct_copy(cli.direct_copy);
    let destination = Destination::new(stores.to.clone());

    let mut relay = Relay::new(Arc::new(store.clone()) as SharedRemote, config)?;
    let mut renderer = None;
    if !cli.json && !cli.no_progress {
        let (publisher, subscriber) = ProgressPublisher::new(256);
        relay = relay.with_sink(Arc::new(publisher));
        renderer = Some(CliProgressRenderer::new(subscriber, cli.verbose).spawn());
    }

    let code = match &cli.command {
        Commands::Object { locator, .. } => {
            let locator = ObjectLocator::new(locator.as_str());
            let id = TaskId::new(format!("object:{}", locator));
            watch_ctrl_c(relay.registry().clone(), id.clone());

            let summary = relay.relay_object(id, &locator, &destination).await?;
            report(&cli, &summary, || {
                println!("{}", object_summary_table(&summary));
                if summary.outcome.is_delivered() {
                    print_success(&format!("Delivered {} to {}", summary.locator, destination));
                }
            })?;
            if summary.outcome.is_delivered() {
                EXIT_SUCCESS
            } else {
                EXIT_PARTIAL
            }
        }

        Commands::Batch { batches, .. } if batches.len() == 1 => {
            let batch = BatchLocator::new(batches[0].as_str());
            let id = TaskId::new(format!("batch:{}", batch));
            watch_ctrl_c(relay.registry().clone(), id.clone());

            let summary = match relay.relay_batch(id, &batch, &destination).await {
                Ok(summary) => summary,
                // Undelivered batches still report their items
                Err(TransferError::NothingDelivered { summary }) => *summary,
                Err(e) => return Err(e.into()),
            };
            report(&cli, &summary, || {
                println!("{}", batch_summary_table(&summary));
                if let Some(items) = batch_items_table(&summary) {
                    section_header("Items not delivered");
                    println!("{}", items);
                }
                if !summary.is_success() {
                    cli_style::print_warning(&format!("No item of batch {} was delivered", batch));
                }
            })?;
            if summary.is_success() && summary.failed() == 0 {
                EXIT_SUCCESS
            } else {
                EXIT_PARTIAL
            }
        }

        Commands::Batch { batches, .. } => {
            let batches: Vec<BatchLocator> =
                batches.iter().map(|b| BatchLocator::new(b.as_str())).collect();
            let id = TaskId::new(format!("batches:{}", batches.len()));
            watch_ctrl_c(relay.registry().clone(), id.clone());

            let summary = relay.relay_batches(id, &batches, &destination).await?;
            report(&cli, &summary, || {
                println!("{}", multi_batch_table(&summary));
                if !summary.stop.is_completed() {
                    cli_style::print_warning(&format!("Stopped early: {}", summary.stop));
                }
            })?;
            if !summary.stop.is_completed() {
                EXIT_CANCELLED
            } else if summary.failed() == 0 {
                EXIT_SUCCESS
            } else {
                EXIT_PARTIAL
            }
        }

        Commands::Range {
            prefix, locators, ..
        } => {
            let locators: Vec<ObjectLocator> = if locators.is_empty() {
                store.list_objects(prefix.as_deref()).await?
            } else {
                locators.iter().map(|l| ObjectLocator::new(l.as_str())).collect()
            };
            if locators.is_empty() {
                print_info("Nothing to relay");
                return Ok((EXIT_SUCCESS, renderer));
            }

            let id = TaskId::new(format!("range:{}", stores.source.display()));
            watch_ctrl_c(relay.registry().clone(), id.clone());

            let summary = relay.relay_range(id, &locators, &destination).await?;
            report(&cli, &summary, || {
                if cli.verbose {
                    for item in &summary.items {
                        println!(
                            "{} {} {}",
                            range_item_icon(item.status),
                            item.locator,
                            Theme::muted(item.detail.as_deref().unwrap_or(""))
                        );
                    }
                }
                println!("{}", range_summary_table(&summary));
            })?;
            if !summary.stop.is_completed() {
                EXIT_CANCELLED
            } else if summary.failed() == 0 {
                EXIT_SUCCESS
            } else {
                EXIT_PARTIAL
            }
        }
    };

    drop(relay);
    Ok((code, renderer))
}

/// Turn Ctrl-C into a cooperative cancel of `id`
fn watch_ctrl_c(registry: CancellationRegistry, id: TaskId) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if registry.request_cancel(&id) {
                cli_style::print_warning("Cancelling, waiting for in-flight work to settle...");
            }
        }
    });
}

fn report<T: Serialize>(cli: &Cli, summary: &T, tables: impl FnOnce()) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        tables();
    }
    Ok(())
}
