//! The transport capability contract (§4.2).
//!
//! A `Channel` is anything that can move frame bytes to and from a peer. The
//! engine never downcasts or otherwise asks a channel what it's made of —
//! all shared state flows one direction, through [`EngineHandle`], and the
//! channel pushes events back out through it. See the crate root docs for
//! why this trait is deliberately synchronous rather than `async_trait`.

use std::rc::Rc;

use crate::arena::Id;
use crate::engine::EngineHandle;

pub struct ChannelTag;
pub type ChannelId = Id<ChannelTag>;

pub struct ObserverTag;
pub type ObserverId = Id<ObserverTag>;

/// Implemented by every transport the engine can route frames through.
///
/// # Contract
/// Implementations must **never** call back into `EngineHandle` synchronously
/// from within [`Channel::connect`], [`Channel::close`], or
/// [`Channel::send_frame`] — events are reported out of band (a spawned
/// task, a later poll, a test harness's explicit pump). The engine holds its
/// internal state borrowed for the duration of these calls; a synchronous
/// reentrant callback would double-borrow it and panic. This is a real
/// requirement, not a style preference — see `DESIGN.md`.
pub trait Channel {
    /// Bound once, immediately after the channel is registered with the
    /// engine. Implementations should stash `(handle, id)` for later use when
    /// reporting events.
    fn bind(&self, handle: EngineHandle, id: ChannelId);

    /// Requests that the channel begin connecting (or, for already-connected
    /// channels like a freshly accepted inbound socket, simply emit `Open`).
    fn connect(&self);

    /// Requests that the channel close. The channel reports `Closed`
    /// whenever it actually tears down, which may be immediately or later.
    fn close(&self);

    /// Attempts to hand `bytes` to the transport. Returns `true` if the
    /// transport *accepted* the write (it will eventually report
    /// `SendComplete`), `false` if it could not accept it right now (e.g.
    /// already mid-write) — in which case the caller is expected to queue
    /// and retry once `SendComplete` arrives.
    fn send_frame(&self, bytes: Vec<u8>) -> bool;

    /// Short transport kind, e.g. `"ws"`, `"http"`, `"loopback"` — surfaced
    /// by the `RPC.Ping` built-in handler.
    fn get_type(&self) -> &str;

    /// Free-form diagnostic string (peer address, request path, ...).
    fn get_info(&self) -> Option<String> {
        None
    }

    /// Persistent channels (e.g. a long-lived websocket) are kept in the
    /// registry across a `Closed` event so they can reconnect and resume
    /// being addressable by the same `dst`; non-persistent channels
    /// (request/response HTTP) are torn down and forgotten on `Closed`.
    fn is_persistent(&self) -> bool {
        false
    }

    /// Broadcast calls are fanned out only to channels that opt in.
    fn is_broadcast_enabled(&self) -> bool {
        false
    }
}

pub type BoxChannel = Rc<dyn Channel>;
