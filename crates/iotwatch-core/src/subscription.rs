use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Idle,
    Subscribed(String),
}

/// Identifies the selection a backfill or stats request was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RequestTag {
    pub device_id: String,
    pub epoch: u64,
}

/// A transition to a new active device, to be applied by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switch {
    pub unsubscribe: Option<String>,
    pub subscribe: String,
    pub tag: RequestTag,
}

#[derive(Debug, Default, Clone)]
pub struct SubscriptionController {
    state: SubscriptionState,
    epoch: u64,
}

impl SubscriptionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    pub fn active(&self) -> Option<&str> {
        match &self.state {
            SubscriptionState::Idle => None,
            SubscriptionState::Subscribed(id) => Some(id),
        }
    }

    pub fn is_active(&self, device_id: &str) -> bool {
        self.active() == Some(device_id)
    }

    /// Returns `None` when `device_id` is already active.
    pub fn select(&mut self, device_id: &str) -> Option<Switch> {
        if self.is_active(device_id) {
            return None;
        }

        let previous = match std::mem::replace(
            &mut self.state,
            SubscriptionState::Subscribed(device_id.to_string()),
        ) {
            SubscriptionState::Idle => None,
            SubscriptionState::Subscribed(prev) => Some(prev),
        };
        self.epoch += 1;

        Some(Switch {
            unsubscribe: previous,
            subscribe: device_id.to_string(),
            tag: self.tag_for(device_id),
        })
    }

    /// Starts a new epoch for the active device so outstanding requests go stale.
    pub fn renew(&mut self) -> Option<RequestTag> {
        let device_id = self.active()?.to_string();
        self.epoch += 1;
        Some(self.tag_for(&device_id))
    }

    pub fn current_tag(&self) -> Option<RequestTag> {
        self.active().map(|id| self.tag_for(id))
    }

    pub fn accepts(&self, tag: &RequestTag) -> bool {
        tag.epoch == self.epoch && self.is_active(&tag.device_id)
    }

    fn tag_for(&self, device_id: &str) -> RequestTag {
        RequestTag {
            device_id: device_id.to_string(),
            epoch: self.epoch,
        }
    }
}
