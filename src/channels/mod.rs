//! Reference [`crate::channel::Channel`] implementations (§10.4 of
//! `SPEC_FULL.md`). None of these are required to use the engine — a host
//! can implement its own transport against the bare trait — but the engine
//! needs at least one real outbound implementation to exercise the
//! on-demand channel-creation path (§4.3), and `LoopbackChannel` is what the
//! integration tests and the demo binary drive.

pub mod http;
pub mod loopback;
pub mod ws;

use crate::config::WsDefaults;
use crate::engine::ChannelFactory;
use crate::uri::{is_outbound_scheme, CanonicalUri};

/// Builds the stock outbound factory: `ws`/`wss` destinations get a
/// [`ws::WsChannel`], `http`/`https` get a one-shot [`http::HttpChannel`].
/// Passed to [`crate::engine::RpcEngine::set_channel_factory`] by a host
/// that wants on-demand outbound channels (§4.3) without writing its own.
pub fn default_channel_factory() -> Box<ChannelFactory> {
    Box::new(|uri: &CanonicalUri, ws_defaults: &WsDefaults| {
        if !is_outbound_scheme(&uri.scheme) {
            return None;
        }
        match uri.scheme.as_str() {
            "ws" | "wss" => {
                let merged = ws_defaults.merged_with_fragment(&uri.fragment_params);
                Some(ws::WsChannel::new(uri.canonical.clone(), merged) as crate::channel::BoxChannel)
            }
            "http" | "https" => {
                Some(http::HttpChannel::new(uri.canonical.clone()) as crate::channel::BoxChannel)
            }
            _ => None,
        }
    })
}
