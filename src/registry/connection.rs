use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::handle::{ConnectionHandle, HandleAllocator};

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Live accounting state for one connection handle.
///
/// `started` is a monotonic [`Instant`] (process-internal ordering only);
/// `last_seen` is wall-clock unix seconds so it is meaningful across the
/// control surface.
#[derive(Debug)]
pub struct ConnInfo {
    pub user: String,
    pub handle: ConnectionHandle,
    pub started: Instant,
    pub started_unix: u64,
    last_seen: AtomicU64,
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
}

impl ConnInfo {
    fn new(user: String, handle: ConnectionHandle) -> Self {
        let now = unix_seconds_now();
        Self {
            user,
            handle,
            started: Instant::now(),
            started_unix: now,
            last_seen: AtomicU64::new(now),
            rx_bytes: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
        }
    }

    pub fn last_seen_unix(&self) -> u64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes.load(Ordering::Relaxed)
    }

    pub fn tx_bytes(&self) -> u64 {
        self.tx_bytes.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_seen.store(unix_seconds_now(), Ordering::Relaxed);
    }

    fn add_rx(&self, n: u64) {
        self.rx_bytes.fetch_add(n, Ordering::Relaxed);
        self.touch();
    }

    fn add_tx(&self, n: u64) {
        self.tx_bytes.fetch_add(n, Ordering::Relaxed);
        self.touch();
    }

    /// Reads and resets both counters atomically with respect to each other
    /// from the caller's point of view (each counter's own swap is atomic;
    /// no frame's bytes are double-counted or dropped across the reset).
    pub fn swap_counters(&self) -> (u64, u64) {
        (
            self.rx_bytes.swap(0, Ordering::Relaxed),
            self.tx_bytes.swap(0, Ordering::Relaxed),
        )
    }

    pub fn peek_counters(&self) -> (u64, u64) {
        (self.rx_bytes(), self.tx_bytes())
    }

    pub fn reset_counters(&self) {
        self.rx_bytes.store(0, Ordering::Relaxed);
        self.tx_bytes.store(0, Ordering::Relaxed);
    }
}

/// Owns every live [`ConnInfo`], indexed both by user identity and by handle.
#[derive(Default)]
pub struct ConnectionRegistry {
    allocator: HandleAllocator,
    by_user: RwLock<HashMap<String, HashMap<ConnectionHandle, Arc<ConnInfo>>>>,
    by_handle: RwLock<HashMap<ConnectionHandle, Arc<ConnInfo>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh handle and registers a new [`ConnInfo`] under it.
    pub fn add(&self, user: &str) -> Arc<ConnInfo> {
        let handle = self.allocator.next();
        let info = Arc::new(ConnInfo::new(user.to_string(), handle));

        let mut by_user = self.by_user.write().expect("connection registry poisoned");
        let mut by_handle = self
            .by_handle
            .write()
            .expect("connection registry poisoned");

        by_user
            .entry(user.to_string())
            .or_default()
            .insert(handle, info.clone());
        by_handle.insert(handle, info.clone());

        info
    }

    /// Removes a connection from both indexes, pruning an empty user bucket.
    pub fn remove(&self, handle: ConnectionHandle) {
        let mut by_handle = self
            .by_handle
            .write()
            .expect("connection registry poisoned");
        let Some(info) = by_handle.remove(&handle) else {
            return;
        };
        drop(by_handle);

        let mut by_user = self.by_user.write().expect("connection registry poisoned");
        if let Some(user_map) = by_user.get_mut(&info.user) {
            user_map.remove(&handle);
            if user_map.is_empty() {
                by_user.remove(&info.user);
            }
        }
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<Arc<ConnInfo>> {
        self.by_handle
            .read()
            .expect("connection registry poisoned")
            .get(&handle)
            .cloned()
    }

    pub fn touch(&self, handle: ConnectionHandle) {
        if let Some(info) = self.get(handle) {
            info.touch();
        }
    }

    pub fn add_rx(&self, handle: ConnectionHandle, n: u64) {
        if let Some(info) = self.get(handle) {
            info.add_rx(n);
        }
    }

    pub fn add_tx(&self, handle: ConnectionHandle, n: u64) {
        if let Some(info) = self.get(handle) {
            info.add_tx(n);
        }
    }

    pub fn list_by_user(&self, user: &str) -> Vec<Arc<ConnInfo>> {
        self.by_user
            .read()
            .expect("connection registry poisoned")
            .get(user)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_reachable_by_both_indexes() {
        let reg = ConnectionRegistry::new();
        let info = reg.add("alice");
        assert!(reg.get(info.handle).is_some());
        assert_eq!(reg.list_by_user("alice").len(), 1);
    }

    #[test]
    fn remove_prunes_empty_user_bucket() {
        let reg = ConnectionRegistry::new();
        let info = reg.add("alice");
        reg.remove(info.handle);
        assert!(reg.get(info.handle).is_none());
        assert!(reg.list_by_user("alice").is_empty());
    }

    #[test]
    fn remove_does_not_disturb_other_users_connections() {
        let reg = ConnectionRegistry::new();
        let a = reg.add("alice");
        let b = reg.add("bob");
        reg.remove(a.handle);
        assert!(reg.get(b.handle).is_some());
        assert_eq!(reg.list_by_user("bob").len(), 1);
    }

    #[test]
    fn accounting_bumps_counters_and_last_seen() {
        let reg = ConnectionRegistry::new();
        let info = reg.add("alice");
        reg.add_rx(info.handle, 100);
        reg.add_tx(info.handle, 50);
        assert_eq!(info.rx_bytes(), 100);
        assert_eq!(info.tx_bytes(), 50);
    }

    #[test]
    fn accounting_on_unknown_handle_is_a_silent_noop() {
        let reg = ConnectionRegistry::new();
        let info = reg.add("alice");
        reg.remove(info.handle);
        // Must not panic even though the handle is gone.
        reg.add_rx(info.handle, 10);
        reg.touch(info.handle);
    }

    #[test]
    fn swap_counters_resets_exactly_once() {
        let reg = ConnectionRegistry::new();
        let info = reg.add("alice");
        reg.add_rx(info.handle, 1000);
        let (rx, _) = info.swap_counters();
        assert_eq!(rx, 1000);
        let (rx2, _) = info.peek_counters();
        assert_eq!(rx2, 0);
    }
}
