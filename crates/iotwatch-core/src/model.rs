use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    Humidity,
    CpuUsage,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Temperature, Metric::Humidity, Metric::CpuUsage];

    pub fn key(self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::CpuUsage => "cpu_usage",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::Temperature => "Temperature (°C)",
            Metric::Humidity => "Humidity (%)",
            Metric::CpuUsage => "CPU Usage (%)",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Humidity | Metric::CpuUsage => "%",
        }
    }
}

/// One reading per metric. Absent values stay `None` rather than defaulting to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub cpu_usage: Option<f64>,
}

impl MetricValues {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Humidity => self.humidity,
            Metric::CpuUsage => self.cpu_usage,
        }
    }

    /// Overwrites the values present in `other`, keeping the rest.
    pub fn merge(&mut self, other: &MetricValues) {
        if other.temperature.is_some() {
            self.temperature = other.temperature;
        }
        if other.humidity.is_some() {
            self.humidity = other.humidity;
        }
        if other.cpu_usage.is_some() {
            self.cpu_usage = other.cpu_usage;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl From<Option<String>> for DeviceStatus {
    fn from(raw: Option<String>) -> Self {
        match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("online") | Some("active") => DeviceStatus::Online,
            Some("offline") | Some("inactive") => DeviceStatus::Offline,
            _ => DeviceStatus::Unknown,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(flatten)]
    pub metrics: MetricValues,
    /// Time the client last observed a sample for this device.
    #[serde(default, skip_deserializing)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: Some(name.into()),
            status: DeviceStatus::Unknown,
            metrics: MetricValues::default(),
            last_updated: None,
        }
    }

    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.device_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub device_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: MetricValues,
}

impl Sample {
    pub fn new(device_id: impl Into<String>, timestamp: DateTime<Utc>, metrics: MetricValues) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            metrics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub avg_cpu: f64,
    pub total_readings: u64,
    #[serde(default)]
    pub min_temperature: Option<f64>,
    #[serde(default)]
    pub max_temperature: Option<f64>,
    #[serde(default)]
    pub time_range: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    #[default]
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// Accepts RFC 3339 as well as the naive ISO-8601 form the monitoring
/// service emits; naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}
