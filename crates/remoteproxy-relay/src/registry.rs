//! Tunnel-matching registry (C6).
//!
//! Maps `(userId, nonce)` to the small set of clients currently waiting to
//! be paired. A waiter is removed the moment it is paired or disconnects;
//! invariant I3 holds because insertion happens only on authenticate-success
//! and removal happens on every path that leaves the `Authenticated` state.

use std::collections::HashMap;

use crate::transport::ClientId;

/// In-memory table of authenticated-but-unpaired clients.
///
/// Keyed by `(userId, nonce)`; each bucket is a small vector of `(id, token)`
/// pairs, since §3 allows up to a handful of distinct tokens waiting under
/// the same nonce before a matching peer shows up (I4 requires the *token*
/// to match too, not just userId+nonce).
#[derive(Default)]
pub struct TunnelRegistry {
    waiting: HashMap<(String, String), Vec<(ClientId, String)>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id` as a waiter for `(user_id, nonce)` presenting `token`.
    ///
    /// An empty nonce is treated as "never matches" (open question in
    /// §9) and is silently not inserted, so it can never be pulled out as
    /// a waiter by some unrelated future client.
    pub fn insert(&mut self, user_id: &str, nonce: &str, token: &str, id: ClientId) {
        if nonce.is_empty() {
            return;
        }
        self.waiting
            .entry((user_id.to_string(), nonce.to_string()))
            .or_default()
            .push((id, token.to_string()));
    }

    /// Look for a waiter under `(user_id, nonce)` presenting the same
    /// `token` as the candidate, other than the candidate itself. If found,
    /// removes and returns it (the candidate is never inserted; the caller
    /// pairs both immediately).
    pub fn find_and_remove_match(
        &mut self,
        user_id: &str,
        nonce: &str,
        token: &str,
        candidate: ClientId,
    ) -> Option<ClientId> {
        if nonce.is_empty() {
            return None;
        }
        let key = (user_id.to_string(), nonce.to_string());
        let bucket = self.waiting.get_mut(&key)?;
        let pos = bucket
            .iter()
            .position(|(id, tok)| *id != candidate && tok == token)?;
        let (matched_id, _) = bucket.remove(pos);
        if bucket.is_empty() {
            self.waiting.remove(&key);
        }
        Some(matched_id)
    }

    /// Remove `id` from the registry regardless of key, e.g. on disconnect.
    /// No-op if the client was never a waiter (already paired, or never
    /// inserted because its nonce was empty).
    pub fn remove(&mut self, user_id: &str, nonce: &str, id: ClientId) {
        let key = (user_id.to_string(), nonce.to_string());
        if let Some(bucket) = self.waiting.get_mut(&key) {
            bucket.retain(|(wid, _)| *wid != id);
            if bucket.is_empty() {
                self.waiting.remove(&key);
            }
        }
    }

    /// Total waiters currently parked, across all keys. Used for statistics.
    pub fn waiting_count(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }
}
