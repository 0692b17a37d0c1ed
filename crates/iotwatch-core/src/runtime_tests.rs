use crate::api::{ApiError, MonitoringApi, Origin};
use crate::config::SyncConfig;
use crate::engine::{Intent, Notification, SyncEngine};
use crate::model::{ConnectionState, Device, DeviceStats, MetricValues, Sample};
use crate::runtime::{load_device_list, SyncClient};
use crate::transport::{memory_pair, OutboundCommand, PushEvent, PushTransport};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 15, 9, 0, 0)
        .single()
        .expect("valid date")
        + TimeDelta::seconds(secs)
}

fn reading(device_id: &str, secs: i64, temperature: f64) -> Sample {
    Sample::new(
        device_id,
        t(secs),
        MetricValues {
            temperature: Some(temperature),
            humidity: None,
            cpu_usage: Some(3.0),
        },
    )
}

#[derive(Clone, Default)]
struct FakeApi {
    primary_down: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeApi {
    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl MonitoringApi for FakeApi {
    async fn devices(&self, origin: Origin) -> Result<Vec<Device>, ApiError> {
        self.record(format!("devices:{origin:?}"));
        if origin == Origin::Primary && self.primary_down {
            return Err(ApiError::Status(500));
        }
        Ok(vec![Device::new("d1", "Boiler room"), Device::new("d2", "Roof")])
    }

    async fn history(&self, device_id: &str, hours: u32) -> Result<Vec<Sample>, ApiError> {
        self.record(format!("history:{device_id}:{hours}"));
        Ok(vec![reading(device_id, 2, 22.0), reading(device_id, 1, 21.0)])
    }

    async fn stats(&self, device_id: &str, hours: u32) -> Result<DeviceStats, ApiError> {
        self.record(format!("stats:{device_id}:{hours}"));
        Ok(DeviceStats {
            avg_temperature: 21.5,
            avg_humidity: 0.0,
            avg_cpu: 3.0,
            total_readings: 2,
            min_temperature: Some(21.0),
            max_temperature: Some(22.0),
            time_range: Some(format!("Last {hours} hours")),
        })
    }
}

async fn drive_until<T, A>(client: &mut SyncClient<T, A>, done: impl Fn(&SyncEngine) -> bool) -> Vec<Notification>
where
    T: PushTransport,
    A: MonitoringApi + 'static,
{
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !done(client.engine()) {
            seen.extend(client.step().await.expect("client running"));
        }
    })
    .await
    .expect("condition reached in time");
    seen
}

#[tokio::test]
async fn device_list_uses_fallback_after_primary_error() {
    // Arrange
    let api = FakeApi {
        primary_down: true,
        ..FakeApi::default()
    };

    // Act
    let devices = load_device_list(&api).await.expect("fallback list");

    // Assert
    assert_eq!(devices.len(), 2);
    assert_eq!(
        *api.calls.lock().expect("calls lock"),
        vec!["devices:Primary".to_string(), "devices:Fallback".to_string()]
    );
}

#[tokio::test]
async fn startup_selects_first_device_and_backfills_its_chart() {
    // Arrange
    let (transport, mut peer) = memory_pair();
    let api = FakeApi {
        primary_down: true,
        ..FakeApi::default()
    };
    let calls = Arc::clone(&api.calls);
    let mut client = SyncClient::new(SyncEngine::new(SyncConfig::default()), transport, api);

    // Act
    client.start();
    let seen = drive_until(&mut client, |engine| {
        engine.active_device().is_some() && !engine.is_backfilling() && engine.stats().is_some()
    })
    .await;

    // Assert
    let engine = client.engine();
    assert_eq!(engine.active_device(), Some("d1"));
    assert_eq!(engine.registry().len(), 2);
    let stamps: Vec<DateTime<Utc>> = engine.buffer().snapshot().timestamps.iter().copied().collect();
    assert_eq!(stamps, vec![t(1), t(2)]);
    assert_eq!(peer.drain_sent(), vec![OutboundCommand::Subscribe("d1".to_string())]);
    assert!(seen.contains(&Notification::ChartBackfilled {
        device_id: "d1".to_string(),
        points: 2
    }));
    assert!(calls.lock().expect("calls lock").contains(&"history:d1:1".to_string()));
}

#[tokio::test]
async fn live_pushes_flow_into_the_active_chart() {
    // Arrange
    let (transport, mut peer) = memory_pair();
    let mut client = SyncClient::new(SyncEngine::new(SyncConfig::default()), transport, FakeApi::default());
    client.start();
    drive_until(&mut client, |engine| {
        engine.active_device().is_some() && !engine.is_backfilling()
    })
    .await;

    // Act
    peer.push(PushEvent::DeviceData(reading("d1", 3, 23.0))).expect("push");
    peer.push(PushEvent::DeviceData(reading("d2", 3, 9.0))).expect("push");
    drive_until(&mut client, |engine| {
        engine.registry().get("d2").and_then(|d| d.metrics.temperature).is_some()
    })
    .await;

    // Assert
    let engine = client.engine();
    assert_eq!(engine.buffer().len(), 3);
    assert_eq!(engine.buffer().newest_timestamp(), Some(t(3)));
    assert_eq!(peer.drain_sent().len(), 1);
}

#[tokio::test]
async fn switching_devices_resubscribes_and_refetches() {
    // Arrange
    let (transport, mut peer) = memory_pair();
    let api = FakeApi::default();
    let calls = Arc::clone(&api.calls);
    let mut client = SyncClient::new(SyncEngine::new(SyncConfig::default()), transport, api);
    client.start();
    drive_until(&mut client, |engine| {
        engine.active_device().is_some() && !engine.is_backfilling()
    })
    .await;
    peer.drain_sent();

    // Act
    let immediate = client.apply(Intent::Select("d2".to_string()));
    drive_until(&mut client, |engine| !engine.is_backfilling()).await;

    // Assert
    assert!(immediate.contains(&Notification::ChartReset { device_id: "d2".to_string() }));
    assert_eq!(
        peer.drain_sent(),
        vec![
            OutboundCommand::Unsubscribe("d1".to_string()),
            OutboundCommand::Subscribe("d2".to_string()),
        ]
    );
    assert_eq!(client.engine().buffer().device_id(), Some("d2"));
    assert!(calls.lock().expect("calls lock").contains(&"history:d2:1".to_string()));
}

#[tokio::test]
async fn closed_push_channel_reports_disconnect() {
    // Arrange
    let (transport, peer) = memory_pair();
    let mut client = SyncClient::new(SyncEngine::new(SyncConfig::default()), transport, FakeApi::default());
    peer.push(PushEvent::Connect).expect("push");
    client.step().await.expect("connect handled");
    assert_eq!(client.engine().connection(), ConnectionState::Connected);

    // Act
    drop(peer);
    let notifications = drive_until(&mut client, |engine| {
        engine.connection() == ConnectionState::Disconnected
    })
    .await;

    // Assert
    assert!(notifications.contains(&Notification::Connection {
        state: ConnectionState::Disconnected
    }));
}
