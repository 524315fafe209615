//! Node presentation and reply outboxes.
//!
//! Callbacks that run synchronously (presentation after a session opens,
//! routing of an inbound message) queue [`SensorMessage`]s into an outbox.
//! The gateway drains it asynchronously afterwards.

use heapless::Vec;

use crate::message::SensorMessage;

/// Sink for messages queued by synchronous callbacks.
pub trait MessageOutbox {
    /// Queues a message for publishing. Returns `false` when the outbox is
    /// full and the message was dropped.
    fn push(&mut self, message: SensorMessage) -> bool;
}

/// Describes the gateway node to the controller.
///
/// Called every time a session is (re)opened, before the inbound subscription
/// is established, so retained presentation messages survive broker restarts.
pub trait Presenter {
    fn present(&mut self, outbox: &mut dyn MessageOutbox);
}

/// Presenter for gateways that announce nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPresentation;

impl Presenter for NoPresentation {
    fn present(&mut self, _outbox: &mut dyn MessageOutbox) {}
}

impl<F> Presenter for F
where
    F: FnMut(&mut dyn MessageOutbox),
{
    fn present(&mut self, outbox: &mut dyn MessageOutbox) {
        self(outbox)
    }
}

/// A fixed-capacity outbox backed by a `heapless::Vec`.
pub struct BufferedOutbox<const CAPACITY: usize> {
    messages: Vec<SensorMessage, CAPACITY>,
}

impl<const CAPACITY: usize> BufferedOutbox<CAPACITY> {
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Iterates over the queued messages in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SensorMessage> + '_ {
        self.messages.iter()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

impl<const CAPACITY: usize> Default for BufferedOutbox<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize> MessageOutbox for BufferedOutbox<CAPACITY> {
    fn push(&mut self, message: SensorMessage) -> bool {
        self.messages.push(message).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Command, NODE_SENSOR_ID};

    #[test]
    fn drops_when_full() {
        let mut outbox = BufferedOutbox::<2>::new();
        for sensor in 0..3 {
            let queued = outbox.push(SensorMessage::new(0, sensor, Command::Set, 0));
            assert_eq!(queued, sensor < 2);
        }
        assert_eq!(outbox.len(), 2);
        let sensors: std::vec::Vec<u8> = outbox.iter().map(|m| m.sensor_id).collect();
        assert_eq!(sensors, [0, 1]);
        outbox.clear();
        assert!(outbox.is_empty());
    }

    #[test]
    fn closures_present() {
        let mut outbox = BufferedOutbox::<4>::new();
        let mut presenter = |out: &mut dyn MessageOutbox| {
            out.push(SensorMessage::new(0, NODE_SENSOR_ID, Command::Presentation, 18));
        };
        presenter.present(&mut outbox);
        NoPresentation.present(&mut outbox);
        assert_eq!(outbox.len(), 1);
    }
}
