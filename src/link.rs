//! # Network Link
//!
//! The interface-level connectivity underneath the MQTT session (Wi-Fi,
//! Ethernet, cellular). The gateway only issues a bring-up request and polls
//! for the result; association itself happens elsewhere.

use core::cell::Cell;

use embassy_net::Stack;

/// Interface-level connectivity as seen by the gateway.
pub trait NetworkLink {
    /// Starts bringing the interface up. Returns whether the request could be
    /// issued, not whether the link is up.
    fn bring_up(&mut self) -> bool;

    /// Whether the interface is associated and has an address.
    fn is_up(&self) -> bool;
}

/// Link backed by an `embassy-net` stack whose driver runs in its own task.
pub struct StackLink<'a> {
    stack: Stack<'a>,
}

impl<'a> StackLink<'a> {
    pub fn new(stack: Stack<'a>) -> Self {
        Self { stack }
    }
}

impl NetworkLink for StackLink<'_> {
    fn bring_up(&mut self) -> bool {
        // The Wi-Fi/Ethernet driver task associates on its own.
        true
    }

    fn is_up(&self) -> bool {
        self.stack.is_link_up() && self.stack.config_v4().is_some()
    }
}

/// Scripted link for host builds and tests.
///
/// Shared by reference, so a test can flip the link while the gateway owns a
/// `&SimulatedLink`.
#[derive(Debug, Default)]
pub struct SimulatedLink {
    up: Cell<bool>,
    up_on_request: Cell<bool>,
    refuse_requests: Cell<bool>,
    requests: Cell<u32>,
}

impl SimulatedLink {
    /// A link that stays down until [`SimulatedLink::set_up`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A link that comes up as soon as bring-up is requested.
    pub fn up_on_request() -> Self {
        let link = Self::default();
        link.up_on_request.set(true);
        link
    }

    pub fn set_up(&self, up: bool) {
        self.up.set(up);
    }

    /// Makes subsequent bring-up requests fail to issue.
    pub fn refuse_requests(&self, refuse: bool) {
        self.refuse_requests.set(refuse);
    }

    /// Number of bring-up requests seen so far.
    pub fn requests(&self) -> u32 {
        self.requests.get()
    }
}

impl NetworkLink for &SimulatedLink {
    fn bring_up(&mut self) -> bool {
        self.requests.set(self.requests.get() + 1);
        if self.refuse_requests.get() {
            return false;
        }
        if self.up_on_request.get() {
            self.up.set(true);
        }
        true
    }

    fn is_up(&self) -> bool {
        self.up.get()
    }
}
