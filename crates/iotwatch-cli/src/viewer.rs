use std::collections::HashMap;
use std::io;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use iotwatch_core::{
    DeviceRegistry, DeviceStatus, Intent, Metric, MonitoringApi, NoticeLevel, Notification,
    PushTransport, SeriesSnapshot, SyncClient, SyncEngine,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, List, ListItem, ListState, Paragraph};
use ratatui::Terminal;

use crate::report::{format_value, stats_lines};

const STEP_TIMEOUT: Duration = Duration::from_millis(50);

fn metric_color(metric: Metric) -> Color {
    match metric {
        Metric::Temperature => Color::Red,
        Metric::Humidity => Color::Cyan,
        Metric::CpuUsage => Color::Yellow,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Up,
    Down,
    Select,
    Refresh,
    RefreshStats,
    ReloadDevices,
    Hours(u32),
    TogglePause,
    Quit,
}

pub(crate) fn action_for(code: KeyCode) -> Option<Action> {
    let action = match code {
        KeyCode::Up | KeyCode::Char('k') => Action::Up,
        KeyCode::Down | KeyCode::Char('j') => Action::Down,
        KeyCode::Enter => Action::Select,
        KeyCode::Char('r') => Action::Refresh,
        KeyCode::Char('s') => Action::RefreshStats,
        KeyCode::Char('d') => Action::ReloadDevices,
        KeyCode::Char('1') => Action::Hours(1),
        KeyCode::Char('6') => Action::Hours(6),
        KeyCode::Char('2') => Action::Hours(24),
        KeyCode::Char(' ') => Action::TogglePause,
        KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
        _ => return None,
    };
    Some(action)
}

/// Plot-ready copy of the sample window, rebuilt only when the chart changes.
#[derive(Debug, Default)]
pub(crate) struct ChartView {
    pub(crate) device_id: Option<String>,
    pub(crate) labels: Vec<String>,
    pub(crate) series: Vec<(Metric, Vec<(f64, f64)>)>,
    pub(crate) rebuilds: u64,
}

impl ChartView {
    pub(crate) fn rebuild(&mut self, snapshot: SeriesSnapshot<'_>) {
        self.device_id = snapshot.device_id.map(str::to_string);
        self.labels = snapshot.labels.iter().cloned().collect();
        self.series = Metric::ALL
            .iter()
            .map(|metric| {
                let points = snapshot
                    .series_for(*metric)
                    .map(|s| {
                        s.data()
                            .iter()
                            .enumerate()
                            .filter_map(|(x, y)| y.map(|y| (x as f64, y)))
                            .collect()
                    })
                    .unwrap_or_default();
                (*metric, points)
            })
            .collect();
        self.rebuilds += 1;
    }

    fn points(&self, metric: Metric) -> &[(f64, f64)] {
        self.series
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, points)| points.as_slice())
            .unwrap_or(&[])
    }
}

fn bounds(points: &[(f64, f64)]) -> [f64; 2] {
    if points.is_empty() {
        return [0.0, 1.0];
    }
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    for (_, y) in points {
        min = min.min(*y);
        max = max.max(*y);
    }
    if (max - min).abs() < f64::EPSILON {
        [min - 1.0, max + 1.0]
    } else {
        let pad = (max - min) * 0.12;
        [min - pad, max + pad]
    }
}

pub(crate) struct ViewerState {
    /// Device id to its row in the device list.
    pub(crate) rows: HashMap<String, usize>,
    pub(crate) order: Vec<String>,
    pub(crate) cursor: usize,
    pub(crate) paused: bool,
    pub(crate) chart: ChartView,
}

impl ViewerState {
    pub(crate) fn new() -> Self {
        Self {
            rows: HashMap::new(),
            order: Vec::new(),
            cursor: 0,
            paused: false,
            chart: ChartView::default(),
        }
    }

    pub(crate) fn row_of(&self, device_id: &str) -> Option<usize> {
        self.rows.get(device_id).copied()
    }

    pub(crate) fn device_at_cursor(&self) -> Option<&str> {
        self.order.get(self.cursor).map(String::as_str)
    }

    pub(crate) fn move_cursor(&mut self, up: bool) {
        if self.order.is_empty() {
            return;
        }
        self.cursor = if up {
            self.cursor.saturating_sub(1)
        } else {
            (self.cursor + 1).min(self.order.len() - 1)
        };
    }

    fn rebuild_rows(&mut self, registry: &DeviceRegistry, active: Option<&str>) {
        let keep = self.device_at_cursor().map(str::to_string);
        self.order = registry.list().iter().map(|d| d.device_id.clone()).collect();
        self.rows = self
            .order
            .iter()
            .enumerate()
            .map(|(row, id)| (id.clone(), row))
            .collect();
        self.cursor = keep
            .as_deref()
            .and_then(|id| self.row_of(id))
            .or_else(|| active.and_then(|id| self.row_of(id)))
            .unwrap_or(0);
    }

    /// Folds one batch of notifications into view state. The chart is
    /// rebuilt at most once per batch.
    pub(crate) fn absorb(&mut self, engine: &SyncEngine, notifications: &[Notification]) {
        let mut chart_dirty = false;
        for notification in notifications {
            match notification {
                Notification::DevicesLoaded { .. } => {
                    self.rebuild_rows(engine.registry(), engine.active_device());
                }
                Notification::Selected { device_id } => {
                    if let Some(row) = self.row_of(device_id) {
                        self.cursor = row;
                    }
                }
                Notification::ChartReset { .. }
                | Notification::ChartAppended { .. }
                | Notification::ChartBackfilled { .. } => chart_dirty = true,
                _ => {}
            }
        }
        if chart_dirty && !self.paused {
            self.chart.rebuild(engine.buffer().snapshot());
        }
    }

    pub(crate) fn toggle_pause(&mut self, engine: &SyncEngine) {
        self.paused = !self.paused;
        if !self.paused {
            self.chart.rebuild(engine.buffer().snapshot());
        }
    }
}

pub async fn run_viewer<T, A>(client: &mut SyncClient<T, A>) -> Result<()>
where
    T: PushTransport,
    A: MonitoringApi + 'static,
{
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = ViewerState::new();

    let run_result = async {
        let batch = client.start();
        state.absorb(client.engine(), &batch);

        'outer: loop {
            while event::poll(Duration::ZERO)? {
                let Event::Key(key) = event::read()? else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let Some(action) = action_for(key.code) else {
                    continue;
                };
                let intent = match action {
                    Action::Quit => break 'outer,
                    Action::Up | Action::Down => {
                        state.move_cursor(action == Action::Up);
                        None
                    }
                    Action::TogglePause => {
                        state.toggle_pause(client.engine());
                        None
                    }
                    Action::Select => state.device_at_cursor().map(|id| Intent::Select(id.to_string())),
                    Action::Refresh => Some(Intent::Refresh),
                    Action::RefreshStats => Some(Intent::RefreshStats),
                    Action::ReloadDevices => Some(Intent::ReloadDevices),
                    Action::Hours(hours) => Some(Intent::SetHistoryHours(hours)),
                };
                if let Some(intent) = intent {
                    let batch = client.apply(intent);
                    state.absorb(client.engine(), &batch);
                }
            }

            if let Ok(step) = tokio::time::timeout(STEP_TIMEOUT, client.step()).await {
                match step {
                    Some(batch) => state.absorb(client.engine(), &batch),
                    None => break,
                }
            }

            let engine = client.engine();
            terminal.draw(|frame| draw_ui(frame.size(), frame, engine, &state))?;
        }

        Ok::<(), anyhow::Error>(())
    }
    .await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    run_result
}

fn draw_ui(area: Rect, frame: &mut ratatui::Frame<'_>, engine: &SyncEngine, state: &ViewerState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(8)])
        .split(area);

    frame.render_widget(render_header(engine, state), rows[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[1]);

    render_devices(frame, body[0], engine, state);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(28),
            Constraint::Percentage(28),
            Constraint::Percentage(28),
            Constraint::Min(5),
        ])
        .split(body[1]);

    for (metric, area) in Metric::ALL.iter().zip(right.iter().copied()) {
        render_metric_chart(frame, area, &state.chart, *metric);
    }
    frame.render_widget(render_stats(engine), right[3]);

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[2]);
    frame.render_widget(render_activity(engine), bottom[0]);
    frame.render_widget(render_notices(engine), bottom[1]);
}

fn render_header(engine: &SyncEngine, state: &ViewerState) -> Paragraph<'static> {
    let (indicator, color) = if engine.connection().is_connected() {
        ("● connected", Color::Green)
    } else {
        ("○ disconnected", Color::Red)
    };
    let active = engine.active_device().unwrap_or("none").to_string();
    let mode = match (&state.chart.device_id, state.paused) {
        (Some(shown), true) => format!("paused on {shown}"),
        (None, true) => "paused".to_string(),
        (_, false) => "live".to_string(),
    };

    let lines = vec![Line::from(vec![
        Span::styled("IoT Monitor  ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled(indicator, Style::default().fg(color)),
        Span::raw(format!(
            "  device={active}  window={}h  chart={mode}  points={}  (q quit)",
            engine.history_hours(),
            engine.buffer().len()
        )),
    ])];

    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"))
}

fn render_devices(frame: &mut ratatui::Frame<'_>, area: Rect, engine: &SyncEngine, state: &ViewerState) {
    let active = engine.active_device();
    let items: Vec<ListItem> = state
        .order
        .iter()
        .filter_map(|id| engine.registry().get(id))
        .map(|device| {
            let dot = match device.status {
                DeviceStatus::Online => Span::styled("● ", Style::default().fg(Color::Green)),
                DeviceStatus::Offline => Span::styled("● ", Style::default().fg(Color::Red)),
                DeviceStatus::Unknown => Span::styled("● ", Style::default().fg(Color::Gray)),
            };
            let marker = if Some(device.device_id.as_str()) == active { "▶ " } else { "  " };
            let readings = Metric::ALL
                .iter()
                .map(|m| format_value(device.metrics.get(*m), *m))
                .collect::<Vec<_>>()
                .join(" ");
            let seen = device
                .last_updated
                .map(|ts| ts.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "--:--:--".to_string());
            ListItem::new(vec![
                Line::from(vec![Span::raw(marker), dot, Span::raw(device.display_name().to_string())]),
                Line::from(Span::styled(
                    format!("    {readings}  {seen}"),
                    Style::default().fg(Color::Gray),
                )),
            ])
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Devices"))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut list_state = ListState::default().with_selected(Some(state.cursor).filter(|_| !state.order.is_empty()));
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn render_metric_chart(frame: &mut ratatui::Frame<'_>, area: Rect, chart: &ChartView, metric: Metric) {
    let points = chart.points(metric);
    let x_max = chart.labels.len().saturating_sub(1).max(1) as f64;
    let y_bounds = bounds(points);

    let dataset = Dataset::default()
        .name(metric.label())
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(metric_color(metric)))
        .data(points);

    let first = chart.labels.first().cloned().unwrap_or_default();
    let middle = chart.labels.get(chart.labels.len() / 2).cloned().unwrap_or_default();
    let last = chart.labels.last().cloned().unwrap_or_default();

    let widget = Chart::new(vec![dataset])
        .block(Block::default().borders(Borders::ALL).title(metric.label()))
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, x_max])
                .labels(vec![Span::raw(first), Span::raw(middle), Span::raw(last)]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds(y_bounds)
                .labels(vec![
                    Span::raw(format!("{:.1}", y_bounds[0])),
                    Span::raw(format!("{:.1}", (y_bounds[0] + y_bounds[1]) / 2.0)),
                    Span::raw(format!("{:.1}", y_bounds[1])),
                ]),
        );

    frame.render_widget(widget, area);
}

fn render_stats(engine: &SyncEngine) -> Paragraph<'static> {
    let lines: Vec<Line> = match (engine.active_device(), engine.stats()) {
        (Some(device_id), Some(stats)) => stats_lines(device_id, stats).into_iter().map(Line::from).collect(),
        (Some(_), None) => vec![Line::from("Loading statistics...")],
        (None, _) => vec![Line::from("No device selected")],
    };
    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Statistics"))
}

fn render_activity(engine: &SyncEngine) -> Paragraph<'static> {
    let lines: Vec<Line> = engine
        .activity()
        .entries()
        .take(6)
        .map(|entry| Line::from(format!("{}  {}", entry.at.format("%H:%M:%S"), entry.message)))
        .collect();
    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Activity"))
}

fn render_notices(engine: &SyncEngine) -> Paragraph<'static> {
    let lines: Vec<Line> = engine
        .notices()
        .active(Utc::now())
        .map(|notice| {
            let color = match notice.level {
                NoticeLevel::Info => Color::Blue,
                NoticeLevel::Warning => Color::Yellow,
                NoticeLevel::Error => Color::Red,
            };
            Line::from(Span::styled(notice.message.clone(), Style::default().fg(color)))
        })
        .collect();
    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Notices"))
}
