//! An in-process [`Channel`] with no real transport underneath — the
//! workhorse for tests and the demo binary. Every lifecycle event is driven
//! explicitly by the test/caller rather than by a background task, which
//! keeps the "never call back into the engine synchronously from `connect`/
//! `close`/`send_frame`" contract (see `channel.rs`) trivially satisfiable:
//! nothing here calls back at all until the caller asks it to.

use std::cell::RefCell;
use std::rc::Rc;

use crate::channel::{Channel, ChannelId};
use crate::engine::EngineHandle;

struct LoopbackInner {
    handle: Option<EngineHandle>,
    id: Option<ChannelId>,
    sent: Vec<Vec<u8>>,
    persistent: bool,
    broadcast_enabled: bool,
}

pub struct LoopbackChannel {
    inner: RefCell<LoopbackInner>,
}

impl LoopbackChannel {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            inner: RefCell::new(LoopbackInner {
                handle: None,
                id: None,
                sent: Vec::new(),
                persistent: false,
                broadcast_enabled: false,
            }),
        })
    }

    pub fn persistent(self: &Rc<Self>) -> Rc<Self> {
        self.inner.borrow_mut().persistent = true;
        self.clone()
    }

    pub fn broadcast_enabled(self: &Rc<Self>) -> Rc<Self> {
        self.inner.borrow_mut().broadcast_enabled = true;
        self.clone()
    }

    /// Drains everything handed to [`Channel::send_frame`] so far, in order.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.inner.borrow_mut().sent)
    }

    fn handle_and_id(&self) -> Option<(EngineHandle, ChannelId)> {
        let inner = self.inner.borrow();
        Some((inner.handle.clone()?, inner.id?))
    }

    /// Simulates the transport coming up.
    pub fn open(&self) {
        if let Some((handle, id)) = self.handle_and_id() {
            handle.on_open(id);
        }
    }

    /// Simulates an inbound frame arriving over the wire.
    pub fn inject(&self, bytes: Vec<u8>) {
        if let Some((handle, id)) = self.handle_and_id() {
            handle.on_frame(id, bytes);
        }
    }

    /// Simulates the in-flight send finishing (§4.6.3: `is_busy` clears,
    /// queue flushes).
    pub fn complete_send(&self, success: bool) {
        if let Some((handle, id)) = self.handle_and_id() {
            handle.on_send_complete(id, success);
        }
    }

    /// Simulates the transport tearing down.
    pub fn simulate_closed(&self) {
        if let Some((handle, id)) = self.handle_and_id() {
            handle.on_closed(id);
        }
    }
}

impl Channel for LoopbackChannel {
    fn bind(&self, handle: EngineHandle, id: ChannelId) {
        let mut inner = self.inner.borrow_mut();
        inner.handle = Some(handle);
        inner.id = Some(id);
    }

    fn connect(&self) {
        // No real transport to dial; a test calls `open()` to signal that
        // the connection attempt succeeded, same as a real channel would
        // eventually report OPEN asynchronously.
    }

    fn close(&self) {
        // Symmetric with `connect`: a test calls `simulate_closed()`.
    }

    fn send_frame(&self, bytes: Vec<u8>) -> bool {
        self.inner.borrow_mut().sent.push(bytes);
        true
    }

    fn get_type(&self) -> &str {
        "loopback"
    }

    fn is_persistent(&self) -> bool {
        self.inner.borrow().persistent
    }

    fn is_broadcast_enabled(&self) -> bool {
        self.inner.borrow().broadcast_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::RpcEngine;

    #[test]
    fn send_frame_is_recorded_and_drained_once() {
        let channel = LoopbackChannel::new();
        let engine = RpcEngine::new(Config::default());
        engine.add_channel("peer", channel.clone());
        channel.open();
        engine.call("Echo", None, crate::engine::CallOptions { dst: "peer".into(), ..Default::default() }, None);
        assert_eq!(channel.take_sent().len(), 1);
        assert_eq!(channel.take_sent().len(), 0);
    }
}
