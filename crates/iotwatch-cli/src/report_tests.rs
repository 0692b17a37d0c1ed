use crate::report::{device_line, format_value, metrics_line, notification_line, stats_lines};
use iotwatch_core::{
    ConnectionState, Device, DeviceStats, Metric, MetricValues, Notification, SyncConfig, SyncEngine,
};

#[test]
fn values_carry_units_and_gaps_print_as_dashes() {
    // Act / Assert
    assert_eq!(format_value(Some(21.46), Metric::Temperature), "21.5°C");
    assert_eq!(format_value(Some(40.0), Metric::CpuUsage), "40.0%");
    assert_eq!(format_value(None, Metric::Humidity), "--");
}

#[test]
fn metrics_line_lists_every_metric() {
    // Arrange
    let metrics = MetricValues {
        temperature: Some(20.0),
        humidity: None,
        cpu_usage: Some(5.0),
    };

    // Act
    let line = metrics_line(&metrics);

    // Assert
    assert_eq!(line, "temperature=20.0°C humidity=-- cpu_usage=5.0%");
}

#[test]
fn device_line_uses_display_name_and_marks_unseen_devices() {
    // Arrange
    let device = Device::new("rack-4", "Rack four");

    // Act
    let line = device_line(&device);

    // Assert
    assert!(line.starts_with("rack-4"));
    assert!(line.contains("Rack four"));
    assert!(line.contains("unknown"));
    assert!(line.ends_with("last=never"));
}

#[test]
fn stats_lines_include_optional_range_only_when_present() {
    // Arrange
    let mut stats = DeviceStats {
        avg_temperature: 22.0,
        avg_humidity: 41.0,
        avg_cpu: 7.5,
        total_readings: 360,
        min_temperature: None,
        max_temperature: None,
        time_range: None,
    };

    // Act
    let short = stats_lines("d1", &stats);
    stats.min_temperature = Some(20.0);
    stats.max_temperature = Some(24.0);
    stats.time_range = Some("1 hours".to_string());
    let full = stats_lines("d1", &stats);

    // Assert
    assert_eq!(short.len(), 5);
    assert_eq!(full.len(), 7);
    assert_eq!(full[5], "Temp range:   20.0°C .. 24.0°C");
}

#[test]
fn chart_notifications_are_not_printed() {
    // Arrange
    let engine = SyncEngine::new(SyncConfig::default());

    // Act
    let reset = notification_line(
        &engine,
        &Notification::ChartReset {
            device_id: "d1".to_string(),
        },
    );
    let connection = notification_line(
        &engine,
        &Notification::Connection {
            state: ConnectionState::Disconnected,
        },
    );

    // Assert
    assert_eq!(reset, None);
    assert_eq!(connection.as_deref(), Some("connection  down"));
}
