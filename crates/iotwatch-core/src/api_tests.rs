use crate::api::{endpoint, ApiError, HttpMonitoringApi, MonitoringApi, Origin};
use crate::runtime::load_device_list;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

/// Serves one canned response per connection, in order, and returns the
/// request lines it saw.
async fn serve(responses: Vec<(u16, &'static str)>) -> (Url, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut head = Vec::new();
            let mut chunk = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.expect("read request");
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&chunk[..n]);
            }
            let text = String::from_utf8_lossy(&head).to_string();
            seen.push(text.lines().next().unwrap_or_default().to_string());

            let response = format!(
                "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write response");
            socket.shutdown().await.expect("shutdown");
        }
        seen
    });
    let url = Url::parse(&format!("http://{addr}/")).expect("server url");
    (url, handle)
}

#[tokio::test]
async fn device_list_falls_back_when_primary_fails() {
    // Arrange
    let (primary, primary_seen) = serve(vec![(500, "{}")]).await;
    let (fallback, fallback_seen) = serve(vec![(
        200,
        r#"{"success":true,"devices":[{"device_id":"d1","name":"Lab","status":"online"}]}"#,
    )])
    .await;
    let api = HttpMonitoringApi::new(primary, fallback);

    // Act
    let devices = load_device_list(&api).await.expect("fallback devices");

    // Assert
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].display_name(), "Lab");
    assert_eq!(primary_seen.await.expect("primary"), vec!["GET /api/devices HTTP/1.1"]);
    assert_eq!(fallback_seen.await.expect("fallback"), vec!["GET /api/devices HTTP/1.1"]);
}

#[tokio::test]
async fn unsuccessful_envelope_is_rejected_with_its_reason() {
    // Arrange
    let (primary, _seen) = serve(vec![(200, r#"{"success":false,"error":"Device not found"}"#)]).await;
    let fallback = primary.clone();
    let api = HttpMonitoringApi::new(primary, fallback);

    // Act
    let err = api.stats("ghost", 24).await.expect_err("rejected");

    // Assert
    assert_eq!(err, ApiError::Rejected("Device not found".to_string()));
}

#[tokio::test]
async fn history_requests_carry_the_lookback_window() {
    // Arrange
    let (primary, seen) = serve(vec![(
        200,
        r#"{"success":true,"data":[{"device_id":"d1","timestamp":"2026-02-15T10:00:01","temperature":21.0},{"device_id":"d1","timestamp":"2026-02-15T10:00:00","temperature":20.0}]}"#,
    )])
    .await;
    let api = HttpMonitoringApi::new(primary.clone(), primary);

    // Act
    let samples = api.history("d1", 6).await.expect("history");

    // Assert
    assert_eq!(samples.len(), 2);
    assert!(samples[0].timestamp > samples[1].timestamp, "served newest first");
    assert_eq!(
        seen.await.expect("server"),
        vec!["GET /api/monitoring/data/d1?hours=6 HTTP/1.1"]
    );
}

#[tokio::test]
async fn missing_payload_is_a_decode_error() {
    // Arrange
    let (primary, _seen) = serve(vec![(200, r#"{"success":true}"#)]).await;
    let api = HttpMonitoringApi::new(primary.clone(), primary);

    // Act
    let err = api.devices(Origin::Primary).await.expect_err("no devices");

    // Assert
    assert!(matches!(err, ApiError::Decode(_)), "unexpected error: {err:?}");
}

#[test]
fn endpoint_appends_encoded_segments() {
    // Arrange
    let root = Url::parse("http://127.0.0.1:5002/").expect("url");
    let prefixed = Url::parse("http://gateway.local/iot/").expect("url");

    // Act
    let devices = endpoint(&root, &["api", "devices"]).expect("devices url");
    let stats = endpoint(&prefixed, &["api", "monitoring", "stats", "rack 4/a"]).expect("stats url");

    // Assert
    assert_eq!(devices.as_str(), "http://127.0.0.1:5002/api/devices");
    assert_eq!(stats.as_str(), "http://gateway.local/iot/api/monitoring/stats/rack%204%2Fa");
}

#[test]
fn endpoint_refuses_opaque_bases() {
    // Arrange
    let base = Url::parse("mailto:ops@example.com").expect("url");

    // Act / Assert
    assert!(matches!(endpoint(&base, &["api"]), Err(ApiError::Endpoint(_))));
}

#[tokio::test]
async fn stats_requests_carry_the_lookback_window() {
    // Arrange
    let (primary, seen) = serve(vec![(
        200,
        r#"{"success":true,"stats":{"avg_temperature":21.0,"avg_humidity":40.0,"avg_cpu":5.0,"min_temperature":19.0,"max_temperature":23.0,"total_readings":60,"time_range":"Last 6 hours"}}"#,
    )])
    .await;
    let api = HttpMonitoringApi::new(primary.clone(), primary);

    // Act
    let stats = api.stats("d1", 6).await.expect("stats");

    // Assert
    assert_eq!(stats.time_range.as_deref(), Some("Last 6 hours"));
    assert_eq!(
        seen.await.expect("server"),
        vec!["GET /api/monitoring/stats/d1?hours=6 HTTP/1.1"]
    );
}
