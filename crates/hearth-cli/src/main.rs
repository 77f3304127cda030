//! Command-line interface for the Hearth plugin manager.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hearth_commands::{OutputEvent, OutputReceiver};
use hearth_core::PluginManagerConfig;
use hearth_core::config::env_vars;
use hearth_plugins::{PluginManager, PluginRecord};
use tokio::task::JoinHandle;

/// Hearth - discover, install and update bridge plugins.
#[derive(Parser, Debug)]
#[command(name = "hearth")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Config file (TOML).
    #[arg(short, long, global = true, env = env_vars::CONFIG)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List installed plugins.
    List {
        /// Rescan instead of using cached data.
        #[arg(long)]
        refresh: bool,
        /// Print JSON.
        #[arg(long)]
        json: bool,
    },
    /// List installed plugins with a newer version available.
    Outdated {
        /// Print JSON.
        #[arg(long)]
        json: bool,
    },
    /// Search the registry for plugins.
    Search {
        /// Search terms.
        #[arg(required = true)]
        query: String,
        /// Print JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show registry details for a plugin.
    Info {
        /// Plugin name.
        #[arg(required = true)]
        name: String,
    },
    /// Show published versions of a package.
    Versions {
        /// Package name.
        #[arg(required = true)]
        name: String,
    },
    /// Print the settings schema of an installed plugin.
    Schema {
        /// Plugin name.
        #[arg(required = true)]
        name: String,
    },
    /// Install a plugin.
    Install {
        /// Plugin name.
        #[arg(required = true)]
        name: String,
        /// Version or dist-tag (default: latest).
        #[arg(value_name = "VERSION")]
        target: Option<String>,
    },
    /// Uninstall a plugin.
    Uninstall {
        /// Plugin name.
        #[arg(required = true)]
        name: String,
    },
    /// Update an installed plugin.
    Update {
        /// Plugin name.
        #[arg(required = true)]
        name: String,
        /// Version or dist-tag (default: latest).
        #[arg(value_name = "VERSION")]
        target: Option<String>,
    },
    /// Update the bridge runtime itself.
    UpdateRuntime {
        /// Version or dist-tag (default: latest).
        #[arg(value_name = "VERSION")]
        target: Option<String>,
    },
    /// Show the runtime package and its version status.
    Runtime,
    /// Show the directories searched for plugins.
    Paths,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = PluginManagerConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    let manager = PluginManager::from_config(config).context("Failed to set up plugin manager")?;

    match args.command {
        Command::List { refresh, json } => {
            let records = manager.list(refresh).await;
            print_records(&records, json)
        }
        Command::Outdated { json } => {
            let records = manager.outdated().await;
            print_records(&records, json)
        }
        Command::Search { query, json } => {
            let records = manager.search(&query).await?;
            print_records(&records, json)
        }
        Command::Info { name } => {
            let record = manager.lookup_plugin(&name).await?;
            print_json(&record)
        }
        Command::Versions { name } => {
            let versions = manager.plugin_versions(&name).await?;
            print_json(&versions)
        }
        Command::Schema { name } => {
            let schema = manager.config_schema(&name).await?;
            print_json(&schema)
        }
        Command::Runtime => {
            let record = manager.runtime_package().await?;
            print_json(&record)
        }
        Command::Paths => {
            let paths = manager.search_paths().await;
            for path in paths.iter() {
                let marker = if paths.is_global(path) { "" } else { " (custom)" };
                println!("{}{}", path.display(), marker);
            }
            Ok(())
        }
        Command::Install { name, target } => {
            let (channel, receiver) = manager.channel();
            let printer = stream_output(receiver);
            let result = manager.install(&name, target.as_deref(), channel).await;
            finish_stream(printer).await;
            if let Some(record) = result? {
                eprintln!(
                    "Installed {} {}",
                    record.name,
                    record.installed_version.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Command::Uninstall { name } => {
            let (channel, receiver) = manager.channel();
            let printer = stream_output(receiver);
            let result = manager.uninstall(&name, channel).await;
            finish_stream(printer).await;
            result?;
            eprintln!("Removed {}", name);
            Ok(())
        }
        Command::Update { name, target } => {
            let (channel, receiver) = manager.channel();
            let printer = stream_output(receiver);
            let result = manager.update(&name, target.as_deref(), channel).await;
            finish_stream(printer).await;
            if let Some(record) = result? {
                eprintln!(
                    "Updated {} to {}",
                    record.name,
                    record.installed_version.as_deref().unwrap_or("?")
                );
            }
            Ok(())
        }
        Command::UpdateRuntime { target } => {
            let (channel, receiver) = manager.channel();
            let printer = stream_output(receiver);
            let result = manager.update_runtime(target.as_deref(), channel).await;
            finish_stream(printer).await;
            let record = result?;
            eprintln!(
                "Runtime {} is at {}",
                record.name,
                record.installed_version.as_deref().unwrap_or("?")
            );
            Ok(())
        }
    }
}

/// Logs go to stderr so command output on stdout stays clean.
fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose { "hearth=debug" } else { "hearth=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Copy streamed command output to stdout until the job finishes.
fn stream_output(mut receiver: OutputReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match event {
                OutputEvent::Data(text) => {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                }
                OutputEvent::Finished(_) => break,
            }
        }
    })
}

async fn finish_stream(printer: JoinHandle<()>) {
    if let Err(e) = printer.await {
        tracing::debug!(error = %e, "Output printer stopped");
    }
}

fn print_records(records: &[PluginRecord], json: bool) -> Result<()> {
    if json {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("No plugins found.");
        return Ok(());
    }

    println!("{:<40} {:<12} {:<12} NOTES", "NAME", "INSTALLED", "LATEST");
    for record in records {
        let mut notes = Vec::new();
        if record.update_available {
            notes.push("update available");
        }
        if record.is_installed() && !record.is_public_package {
            notes.push("private");
        }
        if record.is_installed() && !record.is_global_install {
            notes.push("custom");
        }
        println!(
            "{:<40} {:<12} {:<12} {}",
            record.name,
            record.installed_version.as_deref().unwrap_or("-"),
            record.latest_version.as_deref().unwrap_or("-"),
            notes.join(", ")
        );
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
