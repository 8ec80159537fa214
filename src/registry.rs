//! Channel registry: stores every known channel and resolves destinations to
//! a concrete channel id, creating outbound channels on demand (§4.3).

use std::rc::Rc;

use crate::arena::Arena;
use crate::channel::{BoxChannel, ChannelId, ChannelTag};
use crate::config::WsDefaults;
use crate::uri::{dst_eq, is_outbound_scheme, parse_uri, CanonicalUri};

/// The sentinel destination used both for "nobody addressed in particular"
/// on an incoming frame and for the default outbound route (§6.2, open
/// question 5 in `DESIGN.md`).
pub const DEFAULT_ROUTE: &str = "";

pub struct ChannelEntry {
    pub dst: String,
    pub channel: BoxChannel,
    pub is_open: bool,
    pub is_busy: bool,
}

pub struct ChannelRegistry {
    entries: Arena<ChannelEntry, ChannelTag>,
}

pub enum ResolveOutcome {
    Existing(ChannelId),
    /// An outbound channel was created on demand. The frame's `dst` should
    /// be cleared to `""` once this path is taken — the caller now has a
    /// dedicated point-to-point channel, so the destination is implied.
    Created { id: ChannelId, canonical_dst: String },
    Failed,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arena::new(),
        }
    }

    pub fn add(&mut self, dst: &str, channel: BoxChannel) -> ChannelId {
        self.entries.insert(ChannelEntry {
            dst: dst.to_string(),
            channel,
            is_open: false,
            is_busy: false,
        })
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut ChannelEntry> {
        self.entries.get_mut(id)
    }

    pub fn remove(&mut self, id: ChannelId) -> Option<ChannelEntry> {
        self.entries.remove(id)
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        self.entries.ids()
    }

    pub fn find_by_dst(&self, dst: &str) -> Option<ChannelId> {
        self.entries
            .iter()
            .find(|(_, entry)| dst_eq(&entry.dst, dst))
            .map(|(id, _)| id)
    }

    /// Full three-step resolution policy from §4.3/§9: exact/canonical match,
    /// then on-demand creation for a recognized outbound scheme, then the
    /// default route, else failure. `factory` is supplied by the host (the
    /// core has no concrete transport knowledge) and returns `None` if it
    /// doesn't know how to build a channel for this URI.
    pub fn resolve(
        &mut self,
        dst: &str,
        ws_defaults: &WsDefaults,
        factory: Option<&dyn Fn(&CanonicalUri, &WsDefaults) -> Option<BoxChannel>>,
    ) -> ResolveOutcome {
        if let Some(id) = self.find_by_dst(dst) {
            return ResolveOutcome::Existing(id);
        }

        if let Some(uri) = parse_uri(dst) {
            if is_outbound_scheme(&uri.scheme) {
                if let Some(factory) = factory {
                    if let Some(channel) = factory(&uri, ws_defaults) {
                        let id = self.add(&uri.canonical, channel);
                        return ResolveOutcome::Created {
                            id,
                            canonical_dst: uri.canonical,
                        };
                    }
                }
            }
        }

        match self.find_by_dst(DEFAULT_ROUTE) {
            Some(id) => ResolveOutcome::Existing(id),
            None => ResolveOutcome::Failed,
        }
    }

    pub fn snapshot_channels(&self) -> Vec<Rc<dyn crate::channel::Channel>> {
        self.entries.iter().map(|(_, e)| e.channel.clone()).collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
