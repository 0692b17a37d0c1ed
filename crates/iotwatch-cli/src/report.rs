use anyhow::Result;
use clap::ValueEnum;
use iotwatch_core::{ConnectionState, Device, DeviceStats, Metric, MetricValues, Notification, Sample, SyncEngine};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

pub fn format_value(value: Option<f64>, metric: Metric) -> String {
    match value {
        Some(v) => format!("{v:.1}{}", metric.unit()),
        None => "--".to_string(),
    }
}

pub fn metrics_line(metrics: &MetricValues) -> String {
    Metric::ALL
        .iter()
        .map(|m| format!("{}={}", m.key(), format_value(metrics.get(*m), *m)))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn device_line(device: &Device) -> String {
    let seen = device
        .last_updated
        .map(|ts| ts.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "{:<16} {:<8} {:<24} {} last={}",
        device.device_id,
        device.status.to_string(),
        device.display_name(),
        metrics_line(&device.metrics),
        seen
    )
}

pub fn sample_line(sample: &Sample) -> String {
    format!("{}  {}", sample.timestamp.to_rfc3339(), metrics_line(&sample.metrics))
}

pub fn stats_lines(device_id: &str, stats: &DeviceStats) -> Vec<String> {
    let mut lines = vec![
        format!("Device:       {device_id}"),
        format!("Readings:     {}", stats.total_readings),
        format!("Avg temp:     {}", format_value(Some(stats.avg_temperature), Metric::Temperature)),
        format!("Avg humidity: {}", format_value(Some(stats.avg_humidity), Metric::Humidity)),
        format!("Avg CPU:      {}", format_value(Some(stats.avg_cpu), Metric::CpuUsage)),
    ];
    if stats.min_temperature.is_some() || stats.max_temperature.is_some() {
        lines.push(format!(
            "Temp range:   {} .. {}",
            format_value(stats.min_temperature, Metric::Temperature),
            format_value(stats.max_temperature, Metric::Temperature)
        ));
    }
    if let Some(range) = &stats.time_range {
        lines.push(format!("Window:       {range}"));
    }
    lines
}

/// Human-readable line for a notification, looked up against current engine
/// state. Returns `None` for notifications that carry nothing worth printing.
pub fn notification_line(engine: &SyncEngine, notification: &Notification) -> Option<String> {
    let line = match notification {
        Notification::Connection { state } => match state {
            ConnectionState::Connected => "connection  up".to_string(),
            ConnectionState::Disconnected => "connection  down".to_string(),
        },
        Notification::DevicesLoaded { count } => format!("devices     {count} known"),
        Notification::DeviceUpdated { device_id } => {
            let device = engine.registry().get(device_id)?;
            format!("update      {device_id} {}", metrics_line(&device.metrics))
        }
        Notification::Selected { device_id } => format!("selected    {device_id}"),
        Notification::ChartBackfilled { device_id, points } => {
            format!("history     {device_id} {points} points")
        }
        Notification::StatsUpdated { device_id } => {
            let stats = engine.stats()?;
            format!(
                "stats       {device_id} readings={} avg_temperature={}",
                stats.total_readings,
                format_value(Some(stats.avg_temperature), Metric::Temperature)
            )
        }
        Notification::Notice { notice } => {
            format!("[{}] {}", notice.level, notice.message)
        }
        Notification::ChartReset { .. } | Notification::ChartAppended { .. } => return None,
    };
    Some(line)
}

/// Prints a list as a pretty array, one compact object per line, or with
/// `human` for each item.
pub fn print_items<T: Serialize>(items: &[T], format: OutputFormat, human: impl Fn(&T) -> String) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Ndjson => {
            for item in items {
                println!("{}", serde_json::to_string(item)?);
            }
        }
        OutputFormat::Human => {
            for item in items {
                println!("{}", human(item));
            }
        }
    }
    Ok(())
}
