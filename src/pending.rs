//! Pending-request correlation table (§4.4).

use std::collections::HashMap;
use std::rc::Rc;
use std::cell::RefCell;

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub result: Option<Value>,
    pub error_code: i64,
    pub error_msg: String,
    pub channel_type: String,
}

pub type ResponseCb = Box<dyn FnMut(ResponseInfo)>;

struct Entry {
    inserted_at: u64,
    callback: Rc<RefCell<ResponseCb>>,
}

/// Generates request ids and correlates responses back to their callback.
///
/// No background reaping: a long-silent peer leaves its pending entry around
/// forever unless the host calls [`PendingRequests::sweep_expired`] from its
/// own timer (`DESIGN.md` open question 2). The table uses a logical tick
/// counter rather than wall-clock time so the core stays usable without a
/// clock source, which matters on constrained/embedded hosts.
pub struct PendingRequests {
    entries: HashMap<i64, Entry>,
    last_id: i64,
    clock: u64,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            last_id: 0,
            clock: 0,
        }
    }

    /// Default id strategy: monotonic counter perturbed by a random positive
    /// delta, so ids are unpredictable but never collide or go non-positive.
    pub fn next_id_random_delta(&mut self) -> i64 {
        let delta = rand::Rng::gen_range(&mut rand::thread_rng(), 1..=0x7fff_ffffi64);
        self.last_id = self.last_id.wrapping_add(delta);
        if self.last_id <= 0 {
            self.last_id = delta;
        }
        self.last_id
    }

    /// Alternative, simpler strategy: strictly increasing ids. Equally
    /// correct for the table's actual requirement (process-lifetime
    /// uniqueness); not used by `RpcEngine` by default (`DESIGN.md` open
    /// question 1).
    pub fn next_id_monotonic(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    pub fn register(&mut self, id: i64, callback: ResponseCb) {
        self.entries.insert(
            id,
            Entry {
                inserted_at: self.clock,
                callback: Rc::new(RefCell::new(callback)),
            },
        );
    }

    pub fn take(&mut self, id: i64) -> Option<Rc<RefCell<ResponseCb>>> {
        self.entries.remove(&id).map(|e| e.callback)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn advance(&mut self) {
        self.clock += 1;
    }

    /// Drops (without invoking) every entry older than `max_age` ticks.
    /// Returns the ids that were dropped.
    pub fn sweep_expired(&mut self, max_age: u64) -> Vec<i64> {
        let clock = self.clock;
        let expired: Vec<i64> = self
            .entries
            .iter()
            .filter(|(_, e)| clock.saturating_sub(e.inserted_at) > max_age)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.entries.remove(id);
        }
        expired
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_nonzero_and_advance() {
        let mut pending = PendingRequests::new();
        for _ in 0..100 {
            let id = pending.next_id_random_delta();
            assert_ne!(id, 0);
        }
    }

    #[test]
    fn register_then_take_returns_same_callback_once() {
        let mut pending = PendingRequests::new();
        pending.register(1, Box::new(|_| {}));
        assert!(pending.take(1).is_some());
        assert!(pending.take(1).is_none());
    }

    #[test]
    fn sweep_expired_drops_old_entries_only() {
        let mut pending = PendingRequests::new();
        pending.register(1, Box::new(|_| {}));
        pending.advance();
        pending.advance();
        pending.register(2, Box::new(|_| {}));
        let expired = pending.sweep_expired(1);
        assert_eq!(expired, vec![1]);
        assert_eq!(pending.len(), 1);
    }
}
