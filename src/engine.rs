//! The RPC engine (§4.6): single-threaded, cooperative, reentrancy-safe.
//!
//! # Concurrency model
//! The engine is deliberately **not** built on `DashMap`/`parking_lot` the
//! way the rest of the teacher codebase reaches for concurrent collections
//! by default. §5 requires that a handler be able to synchronously call
//! `respond`, issue further `call`s, add channels, etc. — all while the
//! engine is in the middle of dispatching the frame that triggered the
//! handler in the first place. A lock would deadlock on that reentry; a
//! single-threaded `Rc<RefCell<_>>` design sidesteps the problem entirely by
//! construction, at the cost of the engine only being usable from one
//! thread/task at a time (acceptable — see SPEC_FULL.md §5, "Host
//! integration with an async runtime").
//!
//! Reentrancy is handled by never holding the `Inner` borrow while invoking a
//! user-supplied callback (handler, prehandler, observer, response
//! callback): each such callback is itself wrapped in its own
//! `Rc<RefCell<_>>`, cloned out while `Inner` is briefly borrowed, then
//! invoked after that borrow is dropped. `Channel` implementations are held
//! to a complementary contract (see `channel.rs`): they must not call back
//! into the engine synchronously from `connect`/`close`/`send_frame`, which
//! means the engine *can* safely hold its `Inner` borrow across those calls.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use crate::arena::Arena;
use crate::auth::AuthnInfo;
use crate::channel::{BoxChannel, ChannelId, ObserverId};
use crate::config::{Config, WsDefaults};
use crate::frame::Frame;
use crate::pending::{PendingRequests, ResponseCb, ResponseInfo};
use crate::queue::{OutboundQueue, SendOutcome};
use crate::registry::{ChannelRegistry, ResolveOutcome};
use crate::uri::CanonicalUri;

pub type HandlerCb = Box<dyn FnMut(RequestHandle, Option<Value>)>;

pub enum PrehandlerOutcome {
    Continue(RequestHandle, Option<Value>),
    Stop,
}

pub type PrehandlerCb = Box<dyn FnMut(RequestHandle, Option<Value>) -> PrehandlerOutcome>;

#[derive(Debug, Clone)]
pub enum ObserverEvent {
    Open { dst: String },
    Closed { dst: String },
}

pub type ObserverCb = Box<dyn FnMut(ObserverEvent)>;

pub type ChannelFactory = dyn Fn(&CanonicalUri, &WsDefaults) -> Option<BoxChannel>;

/// Per-call routing/identity overrides (§4.6).
pub struct CallOptions {
    pub dst: String,
    pub src: String,
    pub tag: String,
    pub key: String,
    pub broadcast: bool,
    /// Suppresses the queue fallback: if the frame can't be sent directly
    /// right now, fail the call instead of enqueueing it (`DESIGN.md` open
    /// question 6).
    pub no_queue: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            dst: String::new(),
            src: String::new(),
            tag: String::new(),
            key: String::new(),
            broadcast: false,
            no_queue: false,
        }
    }
}

/// An inbound request, handed to a handler. Consuming `respond`/`respond_error`
/// (rather than taking `&mut self`) makes "respond exactly once" a property
/// the type system enforces: there is no handle left to call again.
pub struct RequestHandle {
    id: i64,
    resp_src: String,
    resp_dst: String,
    tag: String,
    auth: Option<Value>,
    method: String,
    args_fmt: Option<String>,
    channel: Option<ChannelId>,
    no_response: bool,
    engine: EngineHandle,
    pub authn_info: RefCell<Option<AuthnInfo>>,
}

impl RequestHandle {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args_fmt(&self) -> Option<&str> {
        self.args_fmt.as_deref()
    }

    pub fn auth(&self) -> Option<&Value> {
        self.auth.as_ref()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn respond(self, result: Value) {
        if self.no_response {
            return;
        }
        if let Some(inner_rc) = self.engine.0.upgrade() {
            inner_rc.borrow_mut().respond(&self, Ok(result));
        }
    }

    pub fn respond_error(self, code: i64, message: impl Into<String>) {
        if self.no_response {
            return;
        }
        if let Some(inner_rc) = self.engine.0.upgrade() {
            inner_rc.borrow_mut().respond(&self, Err((code, message.into())));
        }
    }
}

/// Weak back-reference handed to every registered [`crate::channel::Channel`]
/// (§9): channels never hold a strong reference to the engine, so a dropped
/// engine doesn't keep channels alive and a channel outliving the engine
/// simply finds its callbacks become no-ops.
#[derive(Clone)]
pub struct EngineHandle(pub(crate) Weak<RefCell<Inner>>);

impl EngineHandle {
    pub fn on_open(&self, id: ChannelId) {
        let Some(inner_rc) = self.0.upgrade() else { return };
        let notify = {
            let mut inner = inner_rc.borrow_mut();
            inner.handle_open(id)
        };
        if let Some((dst, observers)) = notify {
            for obs in observers {
                (obs.borrow_mut())(ObserverEvent::Open { dst: dst.clone() });
            }
        }
    }

    pub fn on_frame(&self, id: ChannelId, bytes: Vec<u8>) {
        let Some(inner_rc) = self.0.upgrade() else { return };
        let action = {
            let mut inner = inner_rc.borrow_mut();
            inner.handle_frame_bytes(id, bytes)
        };
        dispatch_post_action(action);
    }

    pub fn on_send_complete(&self, id: ChannelId, success: bool) {
        let Some(inner_rc) = self.0.upgrade() else { return };
        let mut inner = inner_rc.borrow_mut();
        if !success {
            warn!(?id, "channel reported a failed send");
        }
        inner.handle_send_complete(id);
    }

    pub fn on_closed(&self, id: ChannelId) {
        let Some(inner_rc) = self.0.upgrade() else { return };
        let notify = {
            let mut inner = inner_rc.borrow_mut();
            inner.handle_closed(id)
        };
        if let Some((dst, observers)) = notify {
            for obs in observers {
                (obs.borrow_mut())(ObserverEvent::Closed { dst: dst.clone() });
            }
        }
    }
}

enum PostDispatch {
    None,
    InvokeResponse {
        cb: Rc<RefCell<ResponseCb>>,
        info: ResponseInfo,
    },
    InvokeHandler {
        request: RequestHandle,
        args: Option<Value>,
        handler: Rc<RefCell<HandlerCb>>,
    },
    InvokePrehandler {
        request: RequestHandle,
        args: Option<Value>,
        prehandler: Rc<RefCell<PrehandlerCb>>,
        handler: Rc<RefCell<HandlerCb>>,
    },
}

fn dispatch_post_action(action: PostDispatch) {
    match action {
        PostDispatch::None => {}
        PostDispatch::InvokeResponse { cb, info } => {
            (cb.borrow_mut())(info);
        }
        PostDispatch::InvokeHandler { request, args, handler } => {
            (handler.borrow_mut())(request, args);
        }
        PostDispatch::InvokePrehandler {
            request,
            args,
            prehandler,
            handler,
        } => match (prehandler.borrow_mut())(request, args) {
            PrehandlerOutcome::Stop => {}
            PrehandlerOutcome::Continue(request, args) => {
                (handler.borrow_mut())(request, args);
            }
        },
    }
}

struct HandlerEntry {
    method: String,
    args_fmt: Option<String>,
    callback: Rc<RefCell<HandlerCb>>,
}

pub struct Inner {
    config: Config,
    local_ids: Vec<String>,
    handlers: Vec<HandlerEntry>,
    prehandler: Option<Rc<RefCell<PrehandlerCb>>>,
    registry: ChannelRegistry,
    pending: PendingRequests,
    queue: OutboundQueue,
    observers: Arena<Rc<RefCell<ObserverCb>>, crate::channel::ObserverTag>,
    channel_factory: Option<Box<ChannelFactory>>,
    self_weak: Weak<RefCell<Inner>>,
}

impl Inner {
    fn handle(&self) -> EngineHandle {
        EngineHandle(self.self_weak.clone())
    }

    fn handle_open(&mut self, id: ChannelId) -> Option<(String, Vec<Rc<RefCell<ObserverCb>>>)> {
        let dst = {
            let entry = self.registry.get_mut(id)?;
            entry.is_open = true;
            entry.is_busy = false;
            entry.dst.clone()
        };
        self.flush_queue();
        if dst.is_empty() {
            None
        } else {
            Some((dst, self.observers.iter().map(|(_, o)| o.clone()).collect()))
        }
    }

    fn handle_send_complete(&mut self, id: ChannelId) {
        if let Some(entry) = self.registry.get_mut(id) {
            entry.is_busy = false;
        }
        self.flush_queue();
    }

    fn handle_closed(&mut self, id: ChannelId) -> Option<(String, Vec<Rc<RefCell<ObserverCb>>>)> {
        let (dst, persistent) = match self.registry.get(id) {
            Some(entry) => (entry.dst.clone(), entry.channel.is_persistent()),
            None => return None,
        };
        if persistent {
            if let Some(entry) = self.registry.get_mut(id) {
                entry.is_open = false;
                entry.is_busy = false;
            }
            if dst.is_empty() {
                None
            } else {
                Some((dst, self.observers.iter().map(|(_, o)| o.clone()).collect()))
            }
        } else {
            self.queue.purge(id);
            self.registry.remove(id);
            None
        }
    }

    fn handle_frame_bytes(&mut self, channel_id: ChannelId, bytes: Vec<u8>) -> PostDispatch {
        if !self.config.enable {
            debug!(?channel_id, "engine disabled, dropping inbound frame");
            return PostDispatch::None;
        }
        if !matches!(self.registry.get(channel_id), Some(e) if e.is_open) {
            debug!(?channel_id, "dropping frame on a channel that isn't open");
            return PostDispatch::None;
        }
        match Frame::parse(&bytes) {
            Ok(frame) => self.handle_frame(channel_id, frame),
            Err(err) => {
                warn!(?channel_id, %err, "ill-formed frame");
                self.close_if_non_persistent(channel_id);
                PostDispatch::None
            }
        }
    }

    fn close_if_non_persistent(&mut self, channel_id: ChannelId) {
        if let Some(entry) = self.registry.get(channel_id) {
            if !entry.channel.is_persistent() {
                entry.channel.close();
            }
        }
    }

    fn handle_frame(&mut self, channel_id: ChannelId, mut frame: Frame) -> PostDispatch {
        if !frame.dst.is_empty() && !self.local_ids.iter().any(|id| id == &frame.dst) {
            debug!(dst = %frame.dst, "discarding frame addressed to an unknown local id");
            return PostDispatch::None;
        }

        if let Some(entry) = self.registry.get_mut(channel_id) {
            if entry.dst.is_empty() && !frame.src.is_empty() {
                entry.dst = frame.src.clone();
            }
        }

        if frame.is_request() {
            let method = std::mem::take(&mut frame.method);
            let args = frame.args.take();
            let handler = self.handlers.iter().find(|h| h.method == method);
            let args_fmt = handler.map(|h| h.args_fmt.clone()).flatten();
            let handler_cb = handler.map(|h| h.callback.clone());

            let resp_src = if !frame.dst.is_empty() {
                frame.dst.clone()
            } else {
                self.local_ids.first().cloned().unwrap_or_default()
            };

            let request = RequestHandle {
                id: frame.id,
                resp_src,
                resp_dst: frame.src.clone(),
                tag: frame.tag.clone(),
                auth: frame.auth.clone(),
                method,
                args_fmt,
                channel: Some(channel_id),
                no_response: frame.no_response,
                engine: self.handle(),
                authn_info: RefCell::new(None),
            };

            match handler_cb {
                Some(handler) => match &self.prehandler {
                    Some(prehandler) => PostDispatch::InvokePrehandler {
                        request,
                        args,
                        prehandler: prehandler.clone(),
                        handler,
                    },
                    None => PostDispatch::InvokeHandler { request, args, handler },
                },
                None => {
                    if !request.no_response {
                        self.respond(&request, Err((404, format!("No handler for {}", request.method))));
                    }
                    PostDispatch::None
                }
            }
        } else {
            if frame.id == 0 {
                debug!("discarding response frame with id 0");
                return PostDispatch::None;
            }
            let channel_type = self
                .registry
                .get(channel_id)
                .map(|e| e.channel.get_type().to_string())
                .unwrap_or_default();
            match self.pending.take(frame.id) {
                Some(cb) => PostDispatch::InvokeResponse {
                    cb,
                    info: ResponseInfo {
                        result: frame.result,
                        error_code: frame.error_code,
                        error_msg: frame.error_msg,
                        channel_type,
                    },
                },
                None => {
                    debug!(id = frame.id, "discarding response with no pending request");
                    PostDispatch::None
                }
            }
        }
    }

    fn respond(&mut self, request: &RequestHandle, outcome: Result<Value, (i64, String)>) {
        let mut frame = Frame::default();
        frame.id = request.id;
        frame.src = request.resp_src.clone();
        frame.dst = request.resp_dst.clone();
        frame.tag = request.tag.clone();
        match outcome {
            Ok(result) => frame.result = Some(result),
            Err((code, msg)) => {
                frame.error_code = code;
                frame.error_msg = msg;
            }
        }
        let bytes = frame.serialize();
        let Some(channel_id) = request.channel else {
            return;
        };
        if !self.try_send_direct(channel_id, &bytes) {
            self.queue.enqueue(String::new(), Some(channel_id), bytes);
        }
    }

    /// Attempts to hand `bytes` straight to `channel_id`'s transport.
    /// Returns `true` if it was accepted (and marks the channel busy).
    fn try_send_direct(&mut self, channel_id: ChannelId, bytes: &[u8]) -> bool {
        let can_send = matches!(self.registry.get(channel_id), Some(e) if e.is_open && !e.is_busy);
        if !can_send {
            return false;
        }
        let channel = self.registry.get(channel_id).unwrap().channel.clone();
        let accepted = channel.send_frame(bytes.to_vec());
        if accepted {
            if let Some(entry) = self.registry.get_mut(channel_id) {
                entry.is_busy = true;
            }
        }
        accepted
    }

    fn flush_queue(&mut self) {
        let registry = &mut self.registry;
        self.queue.drain_retry(move |entry| {
            let Some(channel_id) = entry.channel_pin else {
                let Some(id) = registry.find_by_dst(&entry.dst) else {
                    return SendOutcome::Retry;
                };
                return send_via(&mut *registry, id, &entry.bytes);
            };
            send_via(&mut *registry, channel_id, &entry.bytes)
        });

        fn send_via(registry: &mut ChannelRegistry, id: ChannelId, bytes: &[u8]) -> SendOutcome {
            let can_send = matches!(registry.get(id), Some(e) if e.is_open && !e.is_busy);
            if !can_send {
                return SendOutcome::Retry;
            }
            let channel = registry.get(id).unwrap().channel.clone();
            if channel.send_frame(bytes.to_vec()) {
                if let Some(entry) = registry.get_mut(id) {
                    entry.is_busy = true;
                }
                SendOutcome::Sent
            } else {
                SendOutcome::Retry
            }
        }
    }

    /// Resolves a destination to a channel, creating an outbound channel on
    /// demand when the registry's policy calls for it (§4.3). A freshly
    /// created channel still needs the two steps [`RpcEngine::add_channel`]
    /// normally performs on a caller's behalf — binding it to this engine so
    /// it has somewhere to report events, and kicking off `connect()` — so
    /// that happens here rather than inside [`ChannelRegistry::resolve`],
    /// which has no engine handle to bind with.
    fn resolve(&mut self, dst: &str) -> ResolveOutcome {
        let outcome = self.registry.resolve(dst, &self.config.ws, self.channel_factory.as_deref());
        if let ResolveOutcome::Created { id, .. } = &outcome {
            if let Some(entry) = self.registry.get(*id) {
                let channel = entry.channel.clone();
                channel.bind(self.handle(), *id);
                channel.connect();
            }
        }
        outcome
    }

    fn call(
        &mut self,
        method: &str,
        cb: Option<ResponseCb>,
        opts: CallOptions,
        args: Option<Value>,
    ) -> bool {
        if !self.config.enable {
            return false;
        }
        let id = self.pending.next_id_random_delta();
        let mut frame = Frame::new_request(id, method);
        frame.src = if !opts.src.is_empty() {
            opts.src
        } else {
            self.local_ids.first().cloned().unwrap_or_default()
        };
        frame.dst = opts.dst.clone();
        frame.tag = opts.tag;
        frame.key = opts.key;
        frame.args = args;
        frame.no_response = cb.is_none();

        if opts.broadcast {
            let targets: Vec<ChannelId> = self
                .registry
                .ids()
                .into_iter()
                .filter(|id| matches!(self.registry.get(*id), Some(e) if e.channel.is_broadcast_enabled()))
                .collect();
            let bytes = frame.serialize();
            let mut any_sent = false;
            for id in targets {
                if self.try_send_direct(id, &bytes) {
                    any_sent = true;
                }
            }
            if any_sent {
                if let Some(cb) = cb {
                    self.pending.register(id, cb);
                }
            }
            return any_sent;
        }

        match self.resolve(&opts.dst) {
            ResolveOutcome::Existing(channel_id) => {
                let bytes = frame.serialize();
                if self.try_send_direct(channel_id, &bytes) {
                    if let Some(cb) = cb {
                        self.pending.register(id, cb);
                    }
                    true
                } else if !opts.no_queue {
                    let accepted = self.queue.enqueue(opts.dst, Some(channel_id), bytes);
                    if accepted {
                        if let Some(cb) = cb {
                            self.pending.register(id, cb);
                        }
                    }
                    accepted
                } else {
                    false
                }
            }
            ResolveOutcome::Created { id: channel_id, .. } => {
                frame.dst.clear();
                let bytes = frame.serialize();
                if self.try_send_direct(channel_id, &bytes) {
                    if let Some(cb) = cb {
                        self.pending.register(id, cb);
                    }
                    true
                } else if !opts.no_queue {
                    let accepted = self.queue.enqueue(String::new(), Some(channel_id), bytes);
                    if accepted {
                        if let Some(cb) = cb {
                            self.pending.register(id, cb);
                        }
                    }
                    accepted
                } else {
                    false
                }
            }
            ResolveOutcome::Failed => {
                if opts.no_queue {
                    return false;
                }
                let bytes = frame.serialize();
                let accepted = self.queue.enqueue(opts.dst, None, bytes);
                if accepted {
                    if let Some(cb) = cb {
                        self.pending.register(id, cb);
                    }
                }
                accepted
            }
        }
    }
}

/// Public handle to the engine. Cheap to clone (`Rc` underneath); the
/// engine's actual state lives in [`Inner`] and is only ever borrowed for the
/// duration of a single operation.
#[derive(Clone)]
pub struct RpcEngine(Rc<RefCell<Inner>>);

impl RpcEngine {
    pub fn new(config: Config) -> Self {
        let queue_capacity = config.max_queue_length;
        let inner = Rc::new(RefCell::new(Inner {
            config,
            local_ids: Vec::new(),
            handlers: Vec::new(),
            prehandler: None,
            registry: ChannelRegistry::new(),
            pending: PendingRequests::new(),
            queue: OutboundQueue::new(queue_capacity),
            observers: Arena::new(),
            channel_factory: None,
            self_weak: Weak::new(),
        }));
        inner.borrow_mut().self_weak = Rc::downgrade(&inner);
        RpcEngine(inner)
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle(Rc::downgrade(&self.0))
    }

    pub fn add_local_id(&self, id: impl Into<String>) {
        let id = id.into();
        let mut inner = self.0.borrow_mut();
        if !inner.local_ids.iter().any(|existing| existing == &id) {
            inner.local_ids.push(id);
        }
    }

    pub fn add_handler(
        &self,
        method: impl Into<String>,
        args_fmt: Option<String>,
        callback: HandlerCb,
    ) {
        self.0.borrow_mut().handlers.push(HandlerEntry {
            method: method.into(),
            args_fmt,
            callback: Rc::new(RefCell::new(callback)),
        });
    }

    pub fn list_methods(&self) -> Vec<String> {
        self.0.borrow().handlers.iter().map(|h| h.method.clone()).collect()
    }

    pub fn describe_method(&self, name: &str) -> Option<Option<String>> {
        self.0
            .borrow()
            .handlers
            .iter()
            .find(|h| h.method == name)
            .map(|h| h.args_fmt.clone())
    }

    pub fn channel_info(&self, id: ChannelId) -> Option<String> {
        self.0.borrow().registry.get(id).and_then(|e| e.channel.get_info())
    }

    pub fn set_prehandler(&self, callback: PrehandlerCb) {
        self.0.borrow_mut().prehandler = Some(Rc::new(RefCell::new(callback)));
    }

    pub fn set_channel_factory(&self, factory: Box<ChannelFactory>) {
        self.0.borrow_mut().channel_factory = Some(factory);
    }

    pub fn add_channel(&self, dst: &str, channel: BoxChannel) -> ChannelId {
        let id = self.0.borrow_mut().registry.add(dst, channel.clone());
        channel.bind(self.handle(), id);
        id
    }

    pub fn remove_channel(&self, id: ChannelId) {
        self.0.borrow_mut().registry.remove(id);
    }

    pub fn add_observer(&self, callback: ObserverCb) -> ObserverId {
        self.0.borrow_mut().observers.insert(Rc::new(RefCell::new(callback)))
    }

    pub fn remove_observer(&self, id: ObserverId) {
        self.0.borrow_mut().observers.remove(id);
    }

    pub fn connect(&self) {
        let channels = self.0.borrow().registry.snapshot_channels();
        for channel in channels {
            channel.connect();
        }
    }

    pub fn disconnect(&self) {
        let channels = self.0.borrow().registry.snapshot_channels();
        for channel in channels {
            channel.close();
        }
    }

    pub fn call(&self, method: &str, args: Option<Value>, opts: CallOptions, cb: Option<ResponseCb>) -> bool {
        self.0.borrow_mut().call(method, cb, opts, args)
    }

    pub fn pending_count(&self) -> usize {
        self.0.borrow().pending.len()
    }

    pub fn queue_len(&self) -> usize {
        self.0.borrow().queue.len()
    }

    pub fn advance_pending_clock(&self) {
        self.0.borrow_mut().pending.advance();
    }

    pub fn sweep_expired_pending(&self, max_age: u64) -> Vec<i64> {
        self.0.borrow_mut().pending.sweep_expired(max_age)
    }
}
