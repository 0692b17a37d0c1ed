use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use iotwatch_core::config::{DEFAULT_FALLBACK_URL, DEFAULT_PRIMARY_URL, DEFAULT_PUSH_URL};
use iotwatch_core::{
    load_device_list, Endpoints, HttpMonitoringApi, Intent, MonitoringApi, Notification,
    PushTransport, ReconnectPolicy, SyncClient, SyncConfig, SyncEngine, WsTransport, MAX_CAPACITY,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::report::OutputFormat;

mod report;
#[cfg(test)]
mod report_tests;
mod viewer;
#[cfg(test)]
mod viewer_tests;

#[derive(Debug, Parser)]
#[command(name = "iotwatch")]
#[command(about = "Realtime IoT device monitor (read-only)")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Monitoring service base URL (history, stats, device list).
    #[arg(long, env = "IOTWATCH_PRIMARY_URL", default_value = DEFAULT_PRIMARY_URL)]
    primary_url: Url,

    /// Device-management service base URL, used when the primary device list fails.
    #[arg(long, env = "IOTWATCH_FALLBACK_URL", default_value = DEFAULT_FALLBACK_URL)]
    fallback_url: Url,

    /// Socket.IO server base URL for live pushes.
    #[arg(long, env = "IOTWATCH_PUSH_URL", default_value = DEFAULT_PUSH_URL)]
    push_url: Url,

    #[arg(long, env = "IOTWATCH_WINDOW", default_value_t = 30)]
    window_capacity: usize,

    #[arg(long, env = "IOTWATCH_HISTORY_HOURS", default_value_t = 1)]
    history_hours: u32,

    #[arg(long, default_value_t = 1000)]
    reconnect_min_ms: u64,

    #[arg(long, default_value_t = 30000)]
    reconnect_max_ms: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    Devices {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    History {
        device_id: String,
        #[arg(long)]
        hours: Option<u32>,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Stats {
        device_id: String,
        /// Lookback in hours for the aggregates.
        #[arg(long, default_value_t = 24)]
        hours: u32,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Watch {
        #[arg(long)]
        device_id: Option<String>,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    View,
}

impl Cli {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            window_capacity: self.window_capacity.clamp(1, MAX_CAPACITY),
            history_hours: self.history_hours.max(1),
            ..SyncConfig::default()
        }
    }

    fn endpoints(&self) -> Endpoints {
        Endpoints::new(
            self.primary_url.clone(),
            self.fallback_url.clone(),
            self.push_url.clone(),
        )
    }

    fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            min_backoff: Duration::from_millis(self.reconnect_min_ms.max(1)),
            max_backoff: Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_min_ms)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let endpoints = cli.endpoints();
    let api = HttpMonitoringApi::from_endpoints(&endpoints);

    match &cli.command {
        Command::Devices { format } => {
            let devices = load_device_list(&api).await?;
            report::print_items(&devices, *format, report::device_line)?;
        }
        Command::History {
            device_id,
            hours,
            format,
        } => {
            let hours = hours.unwrap_or(cli.history_hours).max(1);
            let mut samples = api.history(device_id, hours).await?;
            samples.reverse();
            report::print_items(&samples, *format, report::sample_line)?;
        }
        Command::Stats {
            device_id,
            hours,
            format,
        } => {
            let stats = api.stats(device_id, (*hours).max(1)).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Ndjson => println!("{}", serde_json::to_string(&stats)?),
                OutputFormat::Human => {
                    for line in report::stats_lines(device_id, &stats) {
                        println!("{line}");
                    }
                }
            }
        }
        Command::Watch { device_id, format } => {
            if *format == OutputFormat::Json {
                bail!("watch streams notifications; use --format human or ndjson");
            }
            let transport = WsTransport::spawn(endpoints.push.clone(), cli.reconnect_policy());
            let mut client = SyncClient::new(SyncEngine::new(cli.sync_config()), transport, api);
            watch_loop(&mut client, device_id.as_deref(), *format).await?;
        }
        Command::View => {
            let transport = WsTransport::spawn(endpoints.push.clone(), cli.reconnect_policy());
            let mut client = SyncClient::new(SyncEngine::new(cli.sync_config()), transport, api);
            viewer::run_viewer(&mut client).await?;
        }
    }

    Ok(())
}

async fn watch_loop<T, A>(
    client: &mut SyncClient<T, A>,
    wanted: Option<&str>,
    format: OutputFormat,
) -> Result<()>
where
    T: PushTransport,
    A: MonitoringApi + 'static,
{
    let mut batch = client.start();

    loop {
        for notification in &batch {
            print_notification(client.engine(), notification, format)?;
        }

        let loaded = batch
            .iter()
            .any(|n| matches!(n, Notification::DevicesLoaded { .. }));
        if let Some(wanted) = wanted {
            let engine = client.engine();
            if loaded && engine.active_device() != Some(wanted) && engine.registry().contains(wanted) {
                info!(device_id = wanted, "switching to requested device");
                batch = client.apply(Intent::Select(wanted.to_string()));
                continue;
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            step = client.step() => match step {
                Some(next) => batch = next,
                None => break,
            }
        }
    }

    Ok(())
}

fn print_notification(engine: &SyncEngine, notification: &Notification, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json | OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(notification)?);
        }
        OutputFormat::Human => {
            if let Some(line) = report::notification_line(engine, notification) {
                println!("{line}");
            }
        }
    }
    Ok(())
}
