use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::Endpoints;
use crate::model::{Device, DeviceStats, Sample};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("http status {0}")]
    Status(u16),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

/// Which origin serves a device-list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Primary,
    Fallback,
}

#[async_trait]
pub trait MonitoringApi: Send + Sync {
    async fn devices(&self, origin: Origin) -> Result<Vec<Device>, ApiError>;
    /// Samples of the last `hours`, newest first.
    async fn history(&self, device_id: &str, hours: u32) -> Result<Vec<Sample>, ApiError>;
    /// Aggregates over the last `hours`.
    async fn stats(&self, device_id: &str, hours: u32) -> Result<DeviceStats, ApiError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    payload: T,
}

impl<T> Envelope<T> {
    fn into_payload<P>(self, what: &str, pick: impl FnOnce(T) -> Option<P>) -> Result<P, ApiError> {
        if !self.success {
            let reason = self
                .error
                .unwrap_or_else(|| format!("{what} request was not successful"));
            return Err(ApiError::Rejected(reason));
        }
        pick(self.payload).ok_or_else(|| ApiError::Decode(format!("response carries no {what}")))
    }
}

#[derive(Debug, Deserialize)]
struct DevicesPayload {
    #[serde(default)]
    devices: Option<Vec<Device>>,
}

#[derive(Debug, Deserialize)]
struct HistoryPayload {
    #[serde(default)]
    data: Option<Vec<Sample>>,
}

#[derive(Debug, Deserialize)]
struct StatsPayload {
    #[serde(default)]
    stats: Option<DeviceStats>,
}

#[derive(Debug, Clone)]
pub struct HttpMonitoringApi {
    client: Client,
    primary: Url,
    fallback: Url,
}

impl HttpMonitoringApi {
    pub fn new(primary: Url, fallback: Url) -> Self {
        Self::with_client(Client::new(), primary, fallback)
    }

    pub fn with_client(client: Client, primary: Url, fallback: Url) -> Self {
        Self {
            client,
            primary,
            fallback,
        }
    }

    pub fn from_endpoints(endpoints: &Endpoints) -> Self {
        Self::new(endpoints.primary.clone(), endpoints.fallback.clone())
    }

    fn base(&self, origin: Origin) -> &Url {
        match origin {
            Origin::Primary => &self.primary,
            Origin::Fallback => &self.fallback,
        }
    }

    async fn get_envelope<T: DeserializeOwned>(&self, url: Url) -> Result<Envelope<T>, ApiError> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ApiError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        response
            .json::<Envelope<T>>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }
}

#[async_trait]
impl MonitoringApi for HttpMonitoringApi {
    async fn devices(&self, origin: Origin) -> Result<Vec<Device>, ApiError> {
        let url = endpoint(self.base(origin), &["api", "devices"])?;
        self.get_envelope::<DevicesPayload>(url)
            .await?
            .into_payload("devices", |p| p.devices)
    }

    async fn history(&self, device_id: &str, hours: u32) -> Result<Vec<Sample>, ApiError> {
        let mut url = endpoint(&self.primary, &["api", "monitoring", "data", device_id])?;
        url.query_pairs_mut().append_pair("hours", &hours.to_string());
        self.get_envelope::<HistoryPayload>(url)
            .await?
            .into_payload("data", |p| p.data)
    }

    async fn stats(&self, device_id: &str, hours: u32) -> Result<DeviceStats, ApiError> {
        let mut url = endpoint(&self.primary, &["api", "monitoring", "stats", device_id])?;
        url.query_pairs_mut().append_pair("hours", &hours.to_string());
        self.get_envelope::<StatsPayload>(url)
            .await?
            .into_payload("stats", |p| p.stats)
    }
}

/// Appends path segments to `base`, percent-encoding each one.
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::Endpoint(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
