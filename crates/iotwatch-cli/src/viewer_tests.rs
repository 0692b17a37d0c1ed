use crate::viewer::{action_for, Action, ChartView, ViewerState};
use chrono::{TimeDelta, TimeZone, Utc};
use crossterm::event::KeyCode;
use iotwatch_core::{
    Completion, Device, Effect, Intent, Metric, MetricValues, PushEvent, Sample, SyncConfig, SyncEngine,
};

fn engine_with(ids: &[&str]) -> SyncEngine {
    let mut engine = SyncEngine::new(SyncConfig::default());
    engine.dispatch(PushEvent::DevicesList(
        ids.iter().map(|id| Device::new(*id, id.to_uppercase())).collect(),
    ));
    engine.take_effects();
    engine
}

/// Single-device engine whose initial backfill has already come back empty.
fn settled(device_id: &str) -> SyncEngine {
    let mut engine = SyncEngine::new(SyncConfig::default());
    engine.dispatch(PushEvent::DevicesList(vec![Device::new(device_id, "Only")]));
    let tag = engine
        .take_effects()
        .into_iter()
        .find_map(|effect| match effect {
            Effect::FetchHistory { tag, .. } => Some(tag),
            _ => None,
        })
        .expect("history request");
    engine.complete(Completion::History {
        tag,
        result: Ok(Vec::new()),
    });
    engine.take_notifications();
    engine
}

fn live(device_id: &str, secs: i64, temperature: f64) -> Sample {
    let at = Utc
        .with_ymd_and_hms(2026, 2, 15, 8, 0, 0)
        .single()
        .expect("valid date")
        + TimeDelta::seconds(secs);
    Sample::new(
        device_id,
        at,
        MetricValues {
            temperature: Some(temperature),
            humidity: None,
            cpu_usage: None,
        },
    )
}

#[test]
fn device_rows_follow_registry_order() {
    // Arrange
    let mut engine = engine_with(&["d3", "d1", "d2"]);
    let mut state = ViewerState::new();

    // Act
    let batch = engine.take_notifications();
    state.absorb(&engine, &batch);

    // Assert
    assert_eq!(state.row_of("d3"), Some(0));
    assert_eq!(state.row_of("d2"), Some(2));
    assert_eq!(state.row_of("missing"), None);
    assert_eq!(state.device_at_cursor(), Some("d3"), "cursor starts on the auto-selected device");
}

#[test]
fn cursor_stays_within_the_list() {
    // Arrange
    let mut engine = engine_with(&["a", "b"]);
    let mut state = ViewerState::new();
    let batch = engine.take_notifications();
    state.absorb(&engine, &batch);

    // Act
    state.move_cursor(true);
    let top = state.cursor;
    state.move_cursor(false);
    state.move_cursor(false);

    // Assert
    assert_eq!(top, 0);
    assert_eq!(state.device_at_cursor(), Some("b"));
}

#[test]
fn selection_moves_the_cursor_to_the_device_row() {
    // Arrange
    let mut engine = engine_with(&["a", "b", "c"]);
    let mut state = ViewerState::new();
    let batch = engine.take_notifications();
    state.absorb(&engine, &batch);

    // Act
    engine.apply(Intent::Select("c".to_string()));
    let batch = engine.take_notifications();
    state.absorb(&engine, &batch);

    // Assert
    assert_eq!(state.cursor, 2);
    assert_eq!(state.chart.device_id.as_deref(), Some("c"));
}

#[test]
fn chart_is_rebuilt_once_per_batch() {
    // Arrange
    let mut engine = settled("d1");
    let mut state = ViewerState::new();
    let before = state.chart.rebuilds;

    // Act
    engine.dispatch(PushEvent::DeviceData(live("d1", 1, 20.0)));
    engine.dispatch(PushEvent::DeviceData(live("d1", 2, 21.0)));
    let batch = engine.take_notifications();
    state.absorb(&engine, &batch);

    // Assert
    assert_eq!(state.chart.rebuilds, before + 1);
    assert_eq!(state.chart.labels, vec!["08:00:01".to_string(), "08:00:02".to_string()]);
}

#[test]
fn paused_chart_ignores_updates_until_resumed() {
    // Arrange
    let mut engine = engine_with(&["d1"]);
    let mut state = ViewerState::new();
    let batch = engine.take_notifications();
    state.absorb(&engine, &batch);
    engine.apply(Intent::Refresh);
    engine.take_notifications();
    state.toggle_pause(&engine);
    let rebuilds = state.chart.rebuilds;

    // Act
    engine.apply(Intent::Refresh);
    let batch = engine.take_notifications();
    state.absorb(&engine, &batch);
    let while_paused = state.chart.rebuilds;
    state.toggle_pause(&engine);

    // Assert
    assert_eq!(while_paused, rebuilds);
    assert_eq!(state.chart.rebuilds, rebuilds + 1);
    assert!(!state.paused);
}

#[test]
fn chart_points_skip_missing_readings() {
    // Arrange
    let mut engine = settled("d1");
    engine.dispatch(PushEvent::DeviceData(live("d1", 1, 20.0)));
    engine.dispatch(PushEvent::DeviceData(live("d1", 2, 22.0)));
    let mut view = ChartView::default();

    // Act
    view.rebuild(engine.buffer().snapshot());

    // Assert
    let points = |metric: Metric| {
        view.series
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, points)| points.clone())
            .unwrap_or_default()
    };
    assert_eq!(points(Metric::Temperature), vec![(0.0, 20.0), (1.0, 22.0)]);
    assert!(points(Metric::Humidity).is_empty());
}

#[test]
fn key_bindings_map_to_actions() {
    // Act / Assert
    assert_eq!(action_for(KeyCode::Enter), Some(Action::Select));
    assert_eq!(action_for(KeyCode::Char('2')), Some(Action::Hours(24)));
    assert_eq!(action_for(KeyCode::Char(' ')), Some(Action::TogglePause));
    assert_eq!(action_for(KeyCode::Char('q')), Some(Action::Quit));
    assert_eq!(action_for(KeyCode::Char('x')), None);
}
