pub mod activity;
pub mod api;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod model;
pub mod registry;
pub mod runtime;
pub mod subscription;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod api_tests;
#[cfg(test)]
mod runtime_tests;
#[cfg(test)]
mod subscription_tests;

pub use activity::{ActivityEntry, ActivityLog, Notice, NoticeBoard, NoticeLevel};
pub use api::{ApiError, HttpMonitoringApi, MonitoringApi, Origin};
pub use buffer::{MetricSeries, SeriesSnapshot, TimeSeriesBuffer, DEFAULT_CAPACITY, MAX_CAPACITY};
pub use config::{Endpoints, ReconnectPolicy, SyncConfig};
pub use engine::{Completion, Effect, Intent, Notification, PushHandler, SyncEngine};
pub use model::{ConnectionState, Device, DeviceStats, DeviceStatus, Metric, MetricValues, Sample};
pub use registry::{DeviceRegistry, RegistryError};
pub use runtime::{load_device_list, SyncClient};
pub use subscription::{RequestTag, SubscriptionController, SubscriptionState, Switch};
pub use transport::{
    memory_pair, EventKind, MemoryPeer, MemoryTransport, OutboundCommand, PushEvent, PushTransport,
    TransportError, WsTransport,
};
