use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::{ApiError, MonitoringApi, Origin};
use crate::engine::{Completion, Effect, Intent, Notification, SyncEngine};
use crate::model::Device;
use crate::transport::{PushEvent, PushTransport};

/// Fetches the device list from the primary origin, retrying the fallback
/// origin once on any failure.
pub async fn load_device_list<A: MonitoringApi + ?Sized>(api: &A) -> Result<Vec<Device>, ApiError> {
    match api.devices(Origin::Primary).await {
        Ok(devices) => Ok(devices),
        Err(err) => {
            warn!(error = %err, "primary device list failed, trying fallback origin");
            api.devices(Origin::Fallback).await
        }
    }
}

enum Input {
    Push(Option<PushEvent>),
    Completion(Option<Completion>),
}

/// Drives a [`SyncEngine`] from a push transport and an HTTP API.
///
/// All state changes happen on the task that calls [`SyncClient::step`] or
/// [`SyncClient::apply`]. Requests run as spawned tasks that only report
/// their result back, so a response for a selection that is no longer
/// current is simply discarded when it arrives.
pub struct SyncClient<T, A> {
    engine: SyncEngine,
    transport: T,
    api: Arc<A>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    transport_open: bool,
}

impl<T, A> SyncClient<T, A>
where
    T: PushTransport,
    A: MonitoringApi + 'static,
{
    pub fn new(engine: SyncEngine, transport: T, api: A) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            transport,
            api: Arc::new(api),
            completions_tx,
            completions_rx,
            transport_open: true,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Kicks off the initial device-list load.
    pub fn start(&mut self) -> Vec<Notification> {
        self.engine.start();
        self.flush()
    }

    pub fn apply(&mut self, intent: Intent) -> Vec<Notification> {
        self.engine.apply(intent);
        self.flush()
    }

    /// Waits for the next push event or finished request and handles it.
    /// Cancel-safe: nothing changes until an input has been received.
    pub async fn step(&mut self) -> Option<Vec<Notification>> {
        let input = tokio::select! {
            event = self.transport.recv(), if self.transport_open => Input::Push(event),
            completion = self.completions_rx.recv() => Input::Completion(completion),
        };

        match input {
            Input::Push(Some(event)) => self.engine.dispatch(event),
            Input::Push(None) => {
                warn!("push channel closed for good");
                self.transport_open = false;
                self.engine.dispatch(PushEvent::Disconnect);
            }
            Input::Completion(Some(completion)) => self.engine.complete(completion),
            Input::Completion(None) => return None,
        }

        Some(self.flush())
    }

    fn flush(&mut self) -> Vec<Notification> {
        self.execute();
        self.engine.take_notifications()
    }

    fn execute(&mut self) {
        for effect in self.engine.take_effects() {
            match effect {
                Effect::Send(command) => {
                    debug!(event = command.event_name(), device_id = command.device_id(), "outbound");
                    if let Err(err) = self.transport.send(command) {
                        warn!(error = %err, "failed to queue outbound command");
                    }
                }
                Effect::FetchDevices => {
                    let api = Arc::clone(&self.api);
                    let tx = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let result = load_device_list(api.as_ref()).await;
                        let _ = tx.send(Completion::DeviceList(result));
                    });
                }
                Effect::FetchHistory { tag, hours } => {
                    let api = Arc::clone(&self.api);
                    let tx = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let result = api.history(&tag.device_id, hours).await;
                        let _ = tx.send(Completion::History { tag, result });
                    });
                }
                Effect::FetchStats { tag, hours } => {
                    let api = Arc::clone(&self.api);
                    let tx = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let result = api.stats(&tag.device_id, hours).await;
                        let _ = tx.send(Completion::Stats { tag, result });
                    });
                }
            }
        }
    }
}
