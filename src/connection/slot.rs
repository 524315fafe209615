use crate::message::SensorMessage;

/// Holds the most recently decoded inbound message.
///
/// A newer message overwrites an unread one. Reading clears the freshness
/// flag but keeps the message, so repeated reads return the same value.
#[derive(Debug, Clone, Default)]
pub struct InboundSlot {
    message: SensorMessage,
    fresh: bool,
}

impl InboundSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, message: SensorMessage) {
        self.message = message;
        self.fresh = true;
    }

    /// Returns a copy of the held message and marks it as read.
    pub fn take(&mut self) -> SensorMessage {
        self.fresh = false;
        self.message.clone()
    }

    pub fn peek(&self) -> &SensorMessage {
        &self.message
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }
}
