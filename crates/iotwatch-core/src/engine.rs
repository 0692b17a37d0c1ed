//! Event-driven coordinator for registry, sample window and subscription.
//!
//! The engine never performs I/O. Push events, completed requests and user
//! intents go in; [`Effect`]s (things the runtime must do) and
//! [`Notification`]s (things the presentation should redraw) come out and are
//! drained by the caller. Push events are routed through a handler table keyed
//! by [`EventKind`].

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::activity::{ActivityLog, Notice, NoticeBoard, NoticeLevel};
use crate::api::ApiError;
use crate::buffer::TimeSeriesBuffer;
use crate::config::SyncConfig;
use crate::model::{ConnectionState, Device, DeviceStats, Sample};
use crate::registry::DeviceRegistry;
use crate::subscription::{RequestTag, SubscriptionController};
use crate::transport::{EventKind, OutboundCommand, PushEvent};

pub type PushHandler = fn(&mut SyncEngine, PushEvent);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Select(String),
    Refresh,
    SetHistoryHours(u32),
    RefreshStats,
    ReloadDevices,
}

/// A finished request, handed back to the engine.
#[derive(Debug, Clone)]
pub enum Completion {
    DeviceList(Result<Vec<Device>, ApiError>),
    History {
        tag: RequestTag,
        result: Result<Vec<Sample>, ApiError>,
    },
    Stats {
        tag: RequestTag,
        result: Result<DeviceStats, ApiError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(OutboundCommand),
    FetchDevices,
    FetchHistory { tag: RequestTag, hours: u32 },
    FetchStats { tag: RequestTag, hours: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Connection { state: ConnectionState },
    DevicesLoaded { count: usize },
    DeviceUpdated { device_id: String },
    Selected { device_id: String },
    ChartReset { device_id: String },
    ChartAppended { device_id: String },
    ChartBackfilled { device_id: String, points: usize },
    StatsUpdated { device_id: String },
    Notice { notice: Notice },
}

/// Live samples held back while the backfill for `tag` is outstanding.
#[derive(Debug)]
struct PendingBackfill {
    tag: RequestTag,
    staged: VecDeque<Sample>,
}

pub struct SyncEngine {
    config: SyncConfig,
    handlers: HashMap<EventKind, PushHandler>,
    connection: ConnectionState,
    registry: DeviceRegistry,
    buffer: TimeSeriesBuffer,
    subscription: SubscriptionController,
    pending: Option<PendingBackfill>,
    history_hours: u32,
    stats: Option<(String, DeviceStats)>,
    activity: ActivityLog,
    notices: NoticeBoard,
    discarded_responses: u64,
    effects: Vec<Effect>,
    notifications: Vec<Notification>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        let mut engine = Self {
            buffer: TimeSeriesBuffer::with_capacity(config.window_capacity),
            activity: ActivityLog::new(config.activity_capacity),
            notices: NoticeBoard::new(config.notice_ttl),
            history_hours: config.history_hours.max(1),
            config,
            handlers: HashMap::new(),
            connection: ConnectionState::Disconnected,
            registry: DeviceRegistry::new(),
            subscription: SubscriptionController::new(),
            pending: None,
            stats: None,
            discarded_responses: 0,
            effects: Vec::new(),
            notifications: Vec::new(),
        };

        engine.register(EventKind::Connect, on_connect);
        engine.register(EventKind::Disconnect, on_disconnect);
        engine.register(EventKind::ConnectError, on_connect_error);
        engine.register(EventKind::DeviceData, on_device_data);
        engine.register(EventKind::DevicesList, on_devices_list);
        engine
    }

    /// Installs `handler` for `kind`, returning the one it replaces.
    pub fn register(&mut self, kind: EventKind, handler: PushHandler) -> Option<PushHandler> {
        self.handlers.insert(kind, handler)
    }

    /// Queues the initial device-list load.
    pub fn start(&mut self) {
        self.effects.push(Effect::FetchDevices);
    }

    pub fn dispatch(&mut self, event: PushEvent) {
        let kind = event.kind();
        match self.handlers.get(&kind).copied() {
            Some(handler) => handler(self, event),
            None => debug!(event = kind.name(), "no handler registered"),
        }
    }

    pub fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::DeviceList(Ok(devices)) => self.load_devices(devices),
            Completion::DeviceList(Err(err)) => {
                warn!(error = %err, "device list unavailable from every origin");
                self.raise(NoticeLevel::Error, "Error loading devices. Please try again.");
            }
            Completion::History { tag, result } => self.apply_backfill(tag, result),
            Completion::Stats { tag, result } => self.apply_stats(tag, result),
        }
    }

    pub fn apply(&mut self, intent: Intent) {
        match intent {
            Intent::Select(device_id) => self.select_device(&device_id),
            Intent::Refresh => self.refresh(),
            Intent::SetHistoryHours(hours) => {
                self.history_hours = hours.max(1);
                info!(hours = self.history_hours, "history window changed");
                self.refresh();
            }
            Intent::RefreshStats => match self.subscription.current_tag() {
                Some(tag) => self.effects.push(Effect::FetchStats {
                    tag,
                    hours: self.history_hours,
                }),
                None => debug!("no active device, skipping stats refresh"),
            },
            Intent::ReloadDevices => self.effects.push(Effect::FetchDevices),
        }
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn buffer(&self) -> &TimeSeriesBuffer {
        &self.buffer
    }

    pub fn active_device(&self) -> Option<&str> {
        self.subscription.active()
    }

    pub fn history_hours(&self) -> u32 {
        self.history_hours
    }

    pub fn is_backfilling(&self) -> bool {
        self.pending.is_some()
    }

    /// Stats for the active device, if they have arrived.
    pub fn stats(&self) -> Option<&DeviceStats> {
        match (&self.stats, self.subscription.active()) {
            (Some((id, stats)), Some(active)) if id == active => Some(stats),
            _ => None,
        }
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn discarded_responses(&self) -> u64 {
        self.discarded_responses
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection != state {
            self.connection = state;
            let message = match state {
                ConnectionState::Connected => "Connected to monitoring service",
                ConnectionState::Disconnected => "Disconnected from monitoring service",
            };
            self.activity.record(message, Utc::now());
        }
        self.notifications.push(Notification::Connection { state });
    }

    fn raise(&mut self, level: NoticeLevel, message: impl Into<String>) {
        let notice = self.notices.raise(level, message, Utc::now());
        self.notifications.push(Notification::Notice { notice });
    }

    fn load_devices(&mut self, devices: Vec<Device>) {
        match self.registry.load_all(devices) {
            Ok(count) => {
                info!(count, "device list loaded");
                self.notifications.push(Notification::DevicesLoaded { count });
                let orphaned = self.subscription.active().filter(|id| !self.registry.contains(id));
                if let Some(gone) = orphaned {
                    warn!(device_id = gone, "active device is no longer listed");
                }
                if self.subscription.active().is_none() || orphaned.is_some() {
                    if let Some(first) = self.registry.first_id().map(str::to_string) {
                        self.select_device(&first);
                    }
                }
            }
            Err(err) => self.raise(NoticeLevel::Warning, format!("Ignoring device list: {err}")),
        }
    }

    fn select_device(&mut self, device_id: &str) {
        if !self.registry.contains(device_id) {
            warn!(device_id, "refusing to select unknown device");
            self.raise(NoticeLevel::Warning, format!("Unknown device {device_id}"));
            return;
        }

        let Some(switch) = self.subscription.select(device_id) else {
            debug!(device_id, "device already active");
            return;
        };

        if let Some(previous) = switch.unsubscribe {
            self.effects.push(Effect::Send(OutboundCommand::Unsubscribe(previous)));
        }
        self.effects
            .push(Effect::Send(OutboundCommand::Subscribe(switch.subscribe.clone())));

        info!(device_id, "active device changed");
        self.activity
            .record(format!("Selected device {device_id}"), Utc::now());
        self.notifications.push(Notification::Selected {
            device_id: switch.subscribe,
        });
        self.begin_backfill(switch.tag);
    }

    fn refresh(&mut self) {
        match self.subscription.renew() {
            Some(tag) => self.begin_backfill(tag),
            None => debug!("no active device, nothing to refresh"),
        }
    }

    fn begin_backfill(&mut self, tag: RequestTag) {
        self.buffer.rebind(tag.device_id.clone());
        self.stats = None;
        self.notifications.push(Notification::ChartReset {
            device_id: tag.device_id.clone(),
        });
        self.effects.push(Effect::FetchHistory {
            tag: tag.clone(),
            hours: self.history_hours,
        });
        self.effects.push(Effect::FetchStats {
            tag: tag.clone(),
            hours: self.history_hours,
        });
        self.pending = Some(PendingBackfill {
            tag,
            staged: VecDeque::new(),
        });
    }

    fn accept_live_sample(&mut self, sample: Sample) {
        if let Some(pending) = self.pending.as_mut() {
            pending.staged.push_back(sample);
            while pending.staged.len() > self.buffer.capacity() {
                pending.staged.pop_front();
            }
            return;
        }

        self.buffer.append(&sample);
        self.notifications.push(Notification::ChartAppended {
            device_id: sample.device_id,
        });
    }

    fn apply_backfill(&mut self, tag: RequestTag, result: Result<Vec<Sample>, ApiError>) {
        if !self.subscription.accepts(&tag) {
            self.discarded_responses += 1;
            debug!(device_id = %tag.device_id, epoch = tag.epoch, "discarding stale backfill");
            return;
        }

        let staged = match self.pending.take() {
            Some(pending) if pending.tag == tag => pending.staged,
            other => {
                self.pending = other;
                VecDeque::new()
            }
        };

        let mut points = 0;
        match result {
            Ok(newest_first) => {
                let chronological: Vec<&Sample> = newest_first
                    .iter()
                    .rev()
                    .filter(|s| s.device_id == tag.device_id)
                    .collect();
                for sample in &chronological {
                    self.buffer.append(sample);
                    points += 1;
                }

                let newest = chronological.last().map(|s| s.timestamp);
                for sample in staged {
                    let covered = newest.is_some_and(|n| sample.timestamp < n)
                        || chronological
                            .iter()
                            .any(|b| b.timestamp == sample.timestamp && b.metrics == sample.metrics);
                    if !covered {
                        self.buffer.append(&sample);
                        points += 1;
                    }
                }
                debug!(device_id = %tag.device_id, points, "backfill applied");
            }
            Err(err) => {
                warn!(device_id = %tag.device_id, error = %err, "history request failed");
                for sample in staged {
                    self.buffer.append(&sample);
                    points += 1;
                }
                self.raise(
                    NoticeLevel::Warning,
                    format!("Error loading history for {}", tag.device_id),
                );
            }
        }

        self.notifications.push(Notification::ChartBackfilled {
            device_id: tag.device_id,
            points,
        });
    }

    fn apply_stats(&mut self, tag: RequestTag, result: Result<DeviceStats, ApiError>) {
        if !self.subscription.accepts(&tag) {
            self.discarded_responses += 1;
            debug!(device_id = %tag.device_id, epoch = tag.epoch, "discarding stale stats");
            return;
        }

        match result {
            Ok(stats) => {
                self.stats = Some((tag.device_id.clone(), stats));
                self.notifications.push(Notification::StatsUpdated {
                    device_id: tag.device_id,
                });
            }
            Err(err) => {
                warn!(device_id = %tag.device_id, error = %err, "stats request failed");
                self.raise(
                    NoticeLevel::Warning,
                    format!("Error fetching stats for {}", tag.device_id),
                );
            }
        }
    }
}

fn on_connect(engine: &mut SyncEngine, _event: PushEvent) {
    engine.set_connection(ConnectionState::Connected);
    engine.effects.push(Effect::FetchDevices);
    // Subscriptions do not survive a reconnect on the server side.
    if let Some(active) = engine.subscription.active() {
        let command = OutboundCommand::Subscribe(active.to_string());
        engine.effects.push(Effect::Send(command));
    }
}

fn on_disconnect(engine: &mut SyncEngine, _event: PushEvent) {
    engine.set_connection(ConnectionState::Disconnected);
}

fn on_connect_error(engine: &mut SyncEngine, event: PushEvent) {
    if let PushEvent::ConnectError(reason) = event {
        debug!(reason = %reason, "push channel unavailable");
    }
    engine.set_connection(ConnectionState::Disconnected);
}

fn on_device_data(engine: &mut SyncEngine, event: PushEvent) {
    let PushEvent::DeviceData(sample) = event else {
        return;
    };

    let now = Utc::now();
    if engine.registry.apply_sample(&sample, now).is_some() {
        engine.activity
            .record(format!("Received data from {}", sample.device_id), now);
        engine.notifications.push(Notification::DeviceUpdated {
            device_id: sample.device_id.clone(),
        });
    }

    if engine.subscription.is_active(&sample.device_id) && engine.registry.contains(&sample.device_id) {
        engine.accept_live_sample(sample);
    }
}

fn on_devices_list(engine: &mut SyncEngine, event: PushEvent) {
    if let PushEvent::DevicesList(devices) = event {
        engine.load_devices(devices);
    }
}
