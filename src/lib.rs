//! Embedded-friendly, transport-agnostic, bidirectional JSON RPC multiplexer.
//!
//! The crate root owns only the module wiring; see each module's own doc
//! comment for the part of the spec it implements. `engine::RpcEngine` is
//! the thing a host actually builds and drives — everything else is
//! infrastructure it composes.
//!
//! # Layout
//! - [`frame`] — wire frame parse/serialize (§4.1)
//! - [`channel`] — the `Channel` trait every transport implements (§4.2)
//! - [`arena`] — generational slot arena backing the registry/observer lists
//! - [`registry`] — channel registry + destination resolution (§4.3)
//! - [`uri`] — canonical URI parsing/equality used by the registry (§4.3, §9)
//! - [`pending`] — outgoing request/response correlation table (§4.4)
//! - [`queue`] — bounded outbound retry queue (§4.5)
//! - [`engine`] — ties everything together: dispatch, handlers, observers (§4.6)
//! - [`handlers`] — built-in `RPC.List`/`RPC.Describe`/`RPC.Ping` (§4.7)
//! - [`auth`] — digest-auth verification helper (§4.8)
//! - [`config`] — layered configuration (§6.3)
//! - [`error`] — infra-level error type
//! - [`logging`] — `tracing` subscriber install
//! - [`channels`] — reference `Channel` implementations (loopback/ws/http)

pub mod arena;
pub mod auth;
pub mod channel;
pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod handlers;
pub mod logging;
pub mod pending;
pub mod queue;
pub mod registry;
pub mod uri;

pub use channel::{BoxChannel, Channel, ChannelId};
pub use config::Config;
pub use engine::{CallOptions, ObserverEvent, RequestHandle, RpcEngine};
pub use error::RpcMuxError;
pub use frame::Frame;
