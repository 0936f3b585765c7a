use std::collections::HashMap;
use std::sync::RwLock;

use crate::handle::ConnectionHandle;
use crate::registry::connection::ConnectionRegistry;
use crate::registry::device::DeviceIndex;

/// A configured rate pair, in bits/sec, matching the units control-surface
/// callers pass in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimit {
    pub down_bps: u64,
    pub up_bps: u64,
}

/// Resolves the effective per-connection rate limit for a handle: a
/// connection-specific override takes precedence over the owning user's
/// default, which in turn is absent (unlimited) unless set.
#[derive(Default)]
pub struct LimitStore {
    default_per_user: RwLock<HashMap<String, RateLimit>>,
    overrides: RwLock<HashMap<ConnectionHandle, RateLimit>>,
}

impl LimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_user_default(&self, user: &str, limit: RateLimit) {
        self.default_per_user
            .write()
            .expect("limit store poisoned")
            .insert(user.to_string(), limit);
    }

    pub fn clear_user_default(&self, user: &str) {
        self.default_per_user
            .write()
            .expect("limit store poisoned")
            .remove(user);
    }

    pub fn set_conn_limit(&self, handle: ConnectionHandle, limit: RateLimit) {
        self.overrides
            .write()
            .expect("limit store poisoned")
            .insert(handle, limit);
    }

    pub fn clear_conn_limit(&self, handle: ConnectionHandle) {
        self.overrides
            .write()
            .expect("limit store poisoned")
            .remove(&handle);
    }

    pub fn get_for_conn(&self, user: &str, handle: ConnectionHandle) -> Option<RateLimit> {
        if let Some(limit) = self
            .overrides
            .read()
            .expect("limit store poisoned")
            .get(&handle)
        {
            return Some(*limit);
        }
        self.default_per_user
            .read()
            .expect("limit store poisoned")
            .get(user)
            .copied()
    }

    /// Clears every per-connection override belonging to `user`'s currently
    /// live connections. Returns the number cleared.
    pub fn clear_user_overrides(&self, user: &str, connections: &ConnectionRegistry) -> u32 {
        let mut cleared = 0;
        let mut overrides = self.overrides.write().expect("limit store poisoned");
        for info in connections.list_by_user(user) {
            if overrides.remove(&info.handle).is_some() {
                cleared += 1;
            }
        }
        cleared
    }

    /// Splits a total bits/sec budget evenly across `user`'s currently live
    /// devices and installs the result as a per-connection override on each
    /// device's bound handle. Returns the per-device share and the device
    /// count.
    pub fn set_user_total(
        &self,
        user: &str,
        total: RateLimit,
        devices: &DeviceIndex,
        connections: &ConnectionRegistry,
    ) -> (RateLimit, usize) {
        let handles: Vec<ConnectionHandle> = devices
            .list_by_user(user, connections)
            .into_iter()
            .map(|snapshot| snapshot.handle)
            .collect();
        let n = handles.len();
        if n == 0 {
            return (RateLimit::default(), 0);
        }

        let per_device = RateLimit {
            down_bps: total.down_bps / n as u64,
            up_bps: total.up_bps / n as u64,
        };

        let mut overrides = self.overrides.write().expect("limit store poisoned");
        for handle in handles {
            overrides.insert(handle, per_device);
        }

        (per_device, n)
    }
}
