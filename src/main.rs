use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use ssh_log_collector::config::{CollectorConfig, ConfigError, ConfigStorage, DEFAULT_CONFIG_FILE};
use ssh_log_collector::progress::ProgressDisplay;
use ssh_log_collector::report::{format_bytes, render_result};
use ssh_log_collector::sftp::constants::PROGRESS_CHANNEL_CAPACITY;
use ssh_log_collector::sftp::{
    enumerate_host, SessionFactory, SftpSessionFactory, TaskRegistry, TimeRange, TransferScheduler,
};
use ssh_log_collector::ssh::HostDescriptor;
use ssh_log_collector::timeparse::{last_hours, parse_local_time};
use ssh_log_collector::DEFAULT_LOG_FILE;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Configuration file (a template is written if it does not exist)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Show debug output on the console
    #[arg(short, long)]
    verbose: bool,

    /// Append a debug log of the run to this file
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Only collect from these servers (repeatable; default: all)
    #[arg(short, long = "server")]
    servers: Vec<String>,

    /// Oldest modification time to collect, local time
    #[arg(long, conflicts_with = "last")]
    since: Option<String>,

    /// Newest modification time to collect, local time
    #[arg(long, conflicts_with = "last")]
    until: Option<String>,

    /// Only files modified in the last N hours
    #[arg(long)]
    last: Option<u32>,

    /// Download directory (overrides settings.default_download_path)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// List what would be downloaded without transferring anything
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn time_range(&self) -> anyhow::Result<TimeRange> {
        if let Some(hours) = self.last {
            return Ok(last_hours(hours, Utc::now()));
        }

        let parse = |value: &Option<String>, flag: &str| -> anyhow::Result<_> {
            value
                .as_deref()
                .map(|v| {
                    parse_local_time(v).with_context(|| format!("unrecognized time for {flag}: '{v}'"))
                })
                .transpose()
        };
        let range = TimeRange::new(parse(&self.since, "--since")?, parse(&self.until, "--until")?);

        if let (Some(start), Some(end)) = (range.start, range.end) {
            if start > end {
                bail!("--since ({start}) is after --until ({end})");
            }
        }
        Ok(range)
    }

    fn select_hosts(&self, config: &CollectorConfig) -> anyhow::Result<Vec<HostDescriptor>> {
        for name in &self.servers {
            if config.server(name).is_none() {
                bail!("unknown server '{name}'");
            }
        }
        let hosts = config.host_descriptors();
        if self.servers.is_empty() {
            return Ok(hosts);
        }
        Ok(hosts
            .into_iter()
            .filter(|h| self.servers.contains(&h.name))
            .collect())
    }
}

/// Enumerate every configured directory of every host and register the matches
async fn discover(
    factory: &dyn SessionFactory,
    config: &CollectorConfig,
    hosts: &[HostDescriptor],
    range: &TimeRange,
    registry: &TaskRegistry,
    local_base: &std::path::Path,
) -> usize {
    let mut failures = 0;
    for host in hosts {
        let specs = config.directories_for(&host.name);
        if specs.is_empty() {
            warn!("No directories configured for {}", host.name);
            continue;
        }
        for spec in specs {
            match enumerate_host(factory, host, &spec, range).await {
                Ok(files) => {
                    for file in files {
                        registry.add_task(&host.name, &file.path, local_base, &file);
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    failures += 1;
                }
            }
        }
    }
    failures
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    ssh_log_collector::init_logging(cli.verbose, Some(&cli.log_file))
        .with_context(|| format!("opening log file {}", cli.log_file.display()))?;

    let storage = ConfigStorage::with_path(&cli.config);
    let config = match storage.load().await {
        Ok(config) => config,
        Err(ConfigError::CreatedDefault(path)) => {
            println!(
                "Created default configuration file: {}\nPlease edit it and run again.",
                path.display()
            );
            return Ok(ExitCode::from(2));
        }
        Err(e) => {
            return Err(e).with_context(|| format!("loading {}", storage.path().display()));
        }
    };

    let range = cli.time_range()?;
    let hosts = cli.select_hosts(&config)?;
    let mut options = config.transfer_options();
    if let Some(output) = &cli.output {
        options.local_base = output.clone();
    }

    info!(
        "Collecting from {} servers into {}",
        hosts.len(),
        options.local_base.display()
    );
    if range.is_unbounded() {
        info!("No time filter, collecting every matching file");
    } else {
        info!("Time filter: {:?} to {:?}", range.start, range.end);
    }

    let factory: Arc<dyn SessionFactory> = Arc::new(SftpSessionFactory);
    let registry = TaskRegistry::new();
    let enumeration_failures = discover(
        factory.as_ref(),
        &config,
        &hosts,
        &range,
        &registry,
        &options.local_base,
    )
    .await;

    if registry.is_empty() {
        println!("No files matched.");
        return Ok(if enumeration_failures == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    println!(
        "Found {} files ({})",
        registry.len(),
        format_bytes(registry.total_size())
    );

    if cli.dry_run {
        for task in registry.snapshot() {
            println!(
                "  {}:{} -> {} ({})",
                task.host_name,
                task.remote_path,
                task.local_path.display(),
                format_bytes(task.size)
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let (scheduler, events) = TransferScheduler::new(factory, hosts, options)
        .with_progress_channel(PROGRESS_CHANNEL_CAPACITY);
    let display = ProgressDisplay::new(registry.len(), registry.total_size());
    let progress = tokio::spawn(display.run(events));

    let control = scheduler.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing running transfers");
            control.shutdown();
        }
    });

    let result = scheduler.execute(&registry).await;
    drop(scheduler);
    let _ = progress.await;

    println!("\n{}", render_result(&result));

    let partials = registry.leftover_partials();
    if !partials.is_empty() {
        println!(
            "{} partial downloads kept; run again to resume them.",
            partials.len()
        );
    }

    Ok(if result.success && enumeration_failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
