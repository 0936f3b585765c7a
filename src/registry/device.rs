use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::KeyMode;
use crate::handle::ConnectionHandle;
use crate::registry::connection::ConnectionRegistry;

/// Composes a device key from a user identity and source address per the
/// active key mode. `device` mode yields `"{user}|{src_ip}"`; `uuid` mode
/// yields the user identity alone.
pub fn build_device_key(mode: KeyMode, user: &str, src_ip: &str) -> String {
    match mode {
        KeyMode::Device => format!("{user}|{src_ip}"),
        KeyMode::Uuid => user.to_string(),
    }
}

/// Splits a device key back into (user, src_ip) for snapshotting. Keys
/// without a `|` are treated as uuid-mode keys with an empty source address.
fn split_device_key(key: &str) -> (&str, &str) {
    match key.find('|') {
        Some(i) => (&key[..i], &key[i + 1..]),
        None => (key, ""),
    }
}

struct DeviceEntry {
    handle: ConnectionHandle,
    user: String,
    ref_count: u32,
    last_seen: Instant,
    expires: Option<Instant>,
    egress_tag: String,
}

/// A point-in-time view of one device entry for control-surface listings.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub user: String,
    pub src_ip: String,
    pub device_key: String,
    pub handle: ConnectionHandle,
    pub ref_count: u32,
    pub started_unix: u64,
    pub last_seen_unix: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Coalesces simultaneous tunnels from the same device key into one
/// reference-counted connection handle, with grace-period deferred
/// destruction and an optional cached egress tag.
#[derive(Default)]
pub struct DeviceIndex {
    entries: Mutex<HashMap<String, DeviceEntry>>,
}

impl DeviceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or joins) a device. Returns the bound connection handle.
    pub fn start(
        &self,
        device_key: &str,
        user: &str,
        connections: &ConnectionRegistry,
    ) -> ConnectionHandle {
        let mut entries = self.entries.lock().expect("device index poisoned");

        if let Some(entry) = entries.get_mut(device_key) {
            entry.ref_count += 1;
            entry.last_seen = Instant::now();
            entry.expires = None;
            return entry.handle;
        }

        let info = connections.add(user);
        let handle = info.handle;
        entries.insert(
            device_key.to_string(),
            DeviceEntry {
                handle,
                user: user.to_string(),
                ref_count: 1,
                last_seen: Instant::now(),
                expires: None,
                egress_tag: String::new(),
            },
        );
        handle
    }

    /// Ends one reference on a device. When the refcount drops to zero the
    /// entry becomes eligible for grace-period expiry; it is not destroyed
    /// here.
    pub fn end(&self, device_key: &str, grace: Duration) {
        let mut entries = self.entries.lock().expect("device index poisoned");
        let Some(entry) = entries.get_mut(device_key) else {
            return;
        };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        entry.last_seen = Instant::now();
        if entry.ref_count == 0 {
            entry.expires = Some(Instant::now() + grace);
        }
    }

    pub fn ref_count(&self, device_key: &str) -> Option<u32> {
        self.entries
            .lock()
            .expect("device index poisoned")
            .get(device_key)
            .map(|e| e.ref_count)
    }

    pub fn get_egress(&self, device_key: &str) -> Option<String> {
        let entries = self.entries.lock().expect("device index poisoned");
        let entry = entries.get(device_key)?;
        if entry.egress_tag.is_empty() {
            None
        } else {
            Some(entry.egress_tag.clone())
        }
    }

    pub fn set_egress(&self, device_key: &str, tag: &str) {
        if tag.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().expect("device index poisoned");
        if let Some(entry) = entries.get_mut(device_key) {
            entry.egress_tag = tag.to_string();
        }
    }

    pub fn clear_egress_for_user(&self, user: &str) -> u32 {
        let mut entries = self.entries.lock().expect("device index poisoned");
        let mut cleared = 0;
        for entry in entries.values_mut() {
            if entry.user == user && !entry.egress_tag.is_empty() {
                entry.egress_tag.clear();
                cleared += 1;
            }
        }
        cleared
    }

    fn snapshot_entry(
        key: &str,
        entry: &DeviceEntry,
        connections: &ConnectionRegistry,
    ) -> DeviceSnapshot {
        let (user, src_ip) = split_device_key(key);

        let (started_unix, last_seen_unix, rx, tx) = match connections.get(entry.handle) {
            Some(info) => {
                let (rx, tx) = info.peek_counters();
                (info.started_unix, info.last_seen_unix(), rx, tx)
            }
            None => (0, 0, 0, 0),
        };

        DeviceSnapshot {
            user: user.to_string(),
            src_ip: src_ip.to_string(),
            device_key: key.to_string(),
            handle: entry.handle,
            ref_count: entry.ref_count,
            started_unix,
            last_seen_unix,
            rx_bytes: rx,
            tx_bytes: tx,
        }
    }

    pub fn list_all(&self, connections: &ConnectionRegistry) -> Vec<DeviceSnapshot> {
        let entries = self.entries.lock().expect("device index poisoned");
        entries
            .iter()
            .map(|(key, entry)| Self::snapshot_entry(key, entry, connections))
            .collect()
    }

    pub fn list_by_user(&self, user: &str, connections: &ConnectionRegistry) -> Vec<DeviceSnapshot> {
        let entries = self.entries.lock().expect("device index poisoned");
        entries
            .iter()
            .filter(|(_, entry)| entry.user == user)
            .map(|(key, entry)| Self::snapshot_entry(key, entry, connections))
            .collect()
    }

    /// Collects device keys eligible for destruction (refcount 0, expiry set
    /// and elapsed) and removes their entries from the map. Returns the
    /// bound handles so the caller can destroy the rest of their state
    /// outside this lock.
    pub fn collect_expired(&self) -> Vec<ConnectionHandle> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("device index poisoned");
        let expired_keys: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.ref_count == 0 && e.expires.is_some_and(|exp| now > exp))
            .map(|(k, _)| k.clone())
            .collect();

        let mut handles = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(entry) = entries.remove(&key) {
                handles.push(entry.handle);
            }
        }
        handles
    }
}
