//! Administrative operations, modeled as plain async methods on [`Shaper`]
//! returning typed DTOs. Wiring these onto any particular RPC transport is
//! left to the embedder.

use serde::Serialize;

use crate::config::KeyMode;
use crate::error::ShaperError;
use crate::shaping::limits::RateLimit;
use crate::Shaper;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserStats {
    pub user: String,
    pub device_count: u32,
    pub rx_bytes_total: u64,
    pub tx_bytes_total: u64,
    pub started_unix_min: u64,
    pub last_seen_unix_max: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub user: String,
    pub src_ip: String,
    pub device_key: String,
    pub handle: u64,
    pub ref_count: u32,
    pub started_unix: u64,
    pub last_seen_unix: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub handle: u64,
    pub started_unix: u64,
    pub last_seen_unix: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TotalLimitSplit {
    pub device_count: u32,
    pub per_device_down_bps: u64,
    pub per_device_up_bps: u64,
}

impl Shaper {
    /// Clears the cached egress tag for every live device belonging to
    /// `user`. Returns how many were cleared.
    pub async fn clear_user_egress_cache(&self, user: &str) -> Result<u32, ShaperError> {
        if user.is_empty() {
            return Err(ShaperError::InvalidArgument("user is empty".to_string()));
        }
        Ok(self.devices.clear_egress_for_user(user))
    }

    pub async fn set_grace_seconds(&self, seconds: u64) {
        self.set_grace(std::time::Duration::from_secs(seconds));
    }

    pub async fn get_grace_seconds(&self) -> u64 {
        self.grace().as_secs()
    }

    pub async fn set_key_mode_str(&self, mode: &str) -> Result<(), ShaperError> {
        self.set_key_mode(KeyMode::parse(mode)?);
        Ok(())
    }

    pub async fn get_key_mode_str(&self) -> &'static str {
        self.key_mode().as_str()
    }

    /// Aggregates accounting across every live device for `user`. A user
    /// with no live devices yields all-zero fields, not an error.
    pub async fn get_user_stats(&self, user: &str) -> Result<UserStats, ShaperError> {
        if user.is_empty() {
            return Err(ShaperError::InvalidArgument("user is empty".to_string()));
        }

        let devices = self.devices.list_by_user(user, &self.connections);
        if devices.is_empty() {
            return Ok(UserStats {
                user: user.to_string(),
                device_count: 0,
                rx_bytes_total: 0,
                tx_bytes_total: 0,
                started_unix_min: 0,
                last_seen_unix_max: 0,
            });
        }

        let mut rx_total = 0u64;
        let mut tx_total = 0u64;
        let mut started_min = u64::MAX;
        let mut last_seen_max = 0u64;
        for d in &devices {
            rx_total += d.rx_bytes;
            tx_total += d.tx_bytes;
            started_min = started_min.min(d.started_unix);
            last_seen_max = last_seen_max.max(d.last_seen_unix);
        }

        Ok(UserStats {
            user: user.to_string(),
            device_count: devices.len() as u32,
            rx_bytes_total: rx_total,
            tx_bytes_total: tx_total,
            started_unix_min: started_min,
            last_seen_unix_max: last_seen_max,
        })
    }

    fn device_info_with_counters(
        d: &crate::registry::device::DeviceSnapshot,
        rx: u64,
        tx: u64,
    ) -> DeviceInfo {
        DeviceInfo {
            user: d.user.clone(),
            src_ip: d.src_ip.clone(),
            device_key: d.device_key.clone(),
            handle: d.handle.get(),
            ref_count: d.ref_count,
            started_unix: d.started_unix,
            last_seen_unix: d.last_seen_unix,
            rx_bytes: rx,
            tx_bytes: tx,
        }
    }

    /// Snapshots every live device, atomically reading and resetting each
    /// one's byte counters.
    pub async fn get_active_devices_snapshot(&self) -> Vec<DeviceInfo> {
        let devices = self.devices.list_all(&self.connections);
        devices
            .iter()
            .map(|d| {
                let (rx, tx) = match self.connections.get(d.handle) {
                    Some(info) => info.swap_counters(),
                    None => (d.rx_bytes, d.tx_bytes),
                };
                Self::device_info_with_counters(d, rx, tx)
            })
            .collect()
    }

    /// Same as [`Shaper::get_active_devices_snapshot`] but never resets the
    /// counters it reads.
    pub async fn peek_active_devices_snapshot(&self) -> Vec<DeviceInfo> {
        let devices = self.devices.list_all(&self.connections);
        devices
            .iter()
            .map(|d| {
                let (rx, tx) = match self.connections.get(d.handle) {
                    Some(info) => info.peek_counters(),
                    None => (d.rx_bytes, d.tx_bytes),
                };
                Self::device_info_with_counters(d, rx, tx)
            })
            .collect()
    }

    /// Splits `down_bps`/`up_bps` evenly across `user`'s currently live
    /// devices and installs the result as each device's per-connection
    /// override.
    pub async fn set_user_total_limit(
        &self,
        user: &str,
        down_bps: u64,
        up_bps: u64,
    ) -> Result<TotalLimitSplit, ShaperError> {
        if user.is_empty() {
            return Err(ShaperError::InvalidArgument("user is empty".to_string()));
        }
        let (per_device, n) = self.limits.set_user_total(
            user,
            RateLimit { down_bps, up_bps },
            &self.devices,
            &self.connections,
        );
        Ok(TotalLimitSplit {
            device_count: n as u32,
            per_device_down_bps: per_device.down_bps,
            per_device_up_bps: per_device.up_bps,
        })
    }

    pub async fn list_user_connections(&self, user: &str) -> Vec<ConnectionInfo> {
        self.connections
            .list_by_user(user)
            .into_iter()
            .map(|info| ConnectionInfo {
                handle: info.handle.get(),
                started_unix: info.started_unix,
                last_seen_unix: info.last_seen_unix(),
                rx_bytes: info.rx_bytes(),
                tx_bytes: info.tx_bytes(),
            })
            .collect()
    }

    pub async fn clear_user_default_per_conn_limit(&self, user: &str) -> Result<(), ShaperError> {
        if user.is_empty() {
            return Err(ShaperError::InvalidArgument("user is empty".to_string()));
        }
        self.limits.clear_user_default(user);
        Ok(())
    }

    pub async fn set_user_default_per_conn_limit(
        &self,
        user: &str,
        down_bps: u64,
        up_bps: u64,
    ) -> Result<(), ShaperError> {
        if user.is_empty() {
            return Err(ShaperError::InvalidArgument("user is empty".to_string()));
        }
        self.limits
            .set_user_default(user, RateLimit { down_bps, up_bps });
        Ok(())
    }

    pub async fn clear_user_conn_override_limits(&self, user: &str) -> Result<u32, ShaperError> {
        if user.is_empty() {
            return Err(ShaperError::InvalidArgument("user is empty".to_string()));
        }
        Ok(self.limits.clear_user_overrides(user, &self.connections))
    }

    pub async fn set_connection_limit(
        &self,
        handle: u64,
        down_bps: u64,
        up_bps: u64,
    ) -> Result<(), ShaperError> {
        let handle = crate::handle::ConnectionHandle::from_raw(handle)
            .ok_or_else(|| ShaperError::InvalidArgument("handle is 0".to_string()))?;
        self.limits
            .set_conn_limit(handle, RateLimit { down_bps, up_bps });
        Ok(())
    }

    pub async fn clear_connection_limit(&self, handle: u64) -> Result<(), ShaperError> {
        let handle = crate::handle::ConnectionHandle::from_raw(handle)
            .ok_or_else(|| ShaperError::InvalidArgument("handle is 0".to_string()))?;
        self.limits.clear_conn_limit(handle);
        Ok(())
    }

    /// Zeroes rx/tx on every live `ConnInfo` belonging to `user`, without
    /// touching refcount, expiry, or egress. Distinct from the snapshot
    /// calls' per-read reset: this is an explicit administrative
    /// "zero the meter" operation.
    pub async fn reset_traffic_for_user(&self, user: &str) -> Result<u32, ShaperError> {
        if user.is_empty() {
            return Err(ShaperError::InvalidArgument("user is empty".to_string()));
        }
        let mut count = 0u32;
        for info in self.connections.list_by_user(user) {
            info.reset_counters();
            count += 1;
        }
        Ok(count)
    }

    /// Same as [`Shaper::reset_traffic_for_user`], but for every live
    /// device in the process.
    pub async fn reset_traffic_for_all_devices(&self) -> u32 {
        let mut count = 0u32;
        for d in self.devices.list_all(&self.connections) {
            if let Some(info) = self.connections.get(d.handle) {
                info.reset_counters();
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn user_stats_for_unknown_user_is_all_zero() {
        let shaper = Shaper::for_test();
        let stats = shaper.get_user_stats("ghost").await.unwrap();
        assert_eq!(stats.device_count, 0);
        assert_eq!(stats.rx_bytes_total, 0);
    }

    #[tokio::test]
    async fn user_stats_rejects_empty_user() {
        let shaper = Shaper::for_test();
        assert!(shaper.get_user_stats("").await.is_err());
    }

    #[tokio::test]
    async fn user_stats_aggregates_across_devices() {
        let shaper = Shaper::for_test();
        let key_a = shaper.build_device_key("u", "1.1.1.1");
        let key_b = shaper.build_device_key("u", "2.2.2.2");
        let ha = shaper.devices.start(&key_a, "u", &shaper.connections);
        let hb = shaper.devices.start(&key_b, "u", &shaper.connections);
        shaper.connections.add_rx(ha, 100);
        shaper.connections.add_rx(hb, 50);

        let stats = shaper.get_user_stats("u").await.unwrap();
        assert_eq!(stats.device_count, 2);
        assert_eq!(stats.rx_bytes_total, 150);
    }

    #[tokio::test]
    async fn snapshot_read_and_reset_then_peek_sees_zero() {
        let shaper = Shaper::for_test();
        let key = shaper.build_device_key("u", "1.1.1.1");
        let handle = shaper.devices.start(&key, "u", &shaper.connections);
        shaper.connections.add_rx(handle, 1000);

        let snap = shaper.get_active_devices_snapshot().await;
        assert_eq!(snap[0].rx_bytes, 1000);

        let peek = shaper.peek_active_devices_snapshot().await;
        assert_eq!(peek[0].rx_bytes, 0);
    }

    #[tokio::test]
    async fn total_limit_split_over_zero_devices_leaves_state_unchanged() {
        let shaper = Shaper::for_test();
        let split = shaper.set_user_total_limit("ghost", 8_000_000, 2_000_000).await.unwrap();
        assert_eq!(split.device_count, 0);
        assert_eq!(split.per_device_down_bps, 0);
    }

    #[tokio::test]
    async fn total_limit_split_over_four_devices_matches_scenario() {
        let shaper = Shaper::for_test();
        for i in 0..4 {
            let key = shaper.build_device_key("u", &format!("10.0.0.{i}"));
            shaper.devices.start(&key, "u", &shaper.connections);
        }
        let split = shaper
            .set_user_total_limit("u", 8_000_000, 2_000_000)
            .await
            .unwrap();
        assert_eq!(split.device_count, 4);
        assert_eq!(split.per_device_down_bps, 2_000_000);
        assert_eq!(split.per_device_up_bps, 500_000);
    }

    #[tokio::test]
    async fn clear_user_conn_override_limits_falls_back_to_default() {
        let shaper = Shaper::for_test();
        let info = shaper.connections.add("u");
        shaper
            .set_user_default_per_conn_limit("u", 1_000, 500)
            .await
            .unwrap();
        shaper
            .set_connection_limit(info.handle.get(), 9_000, 9_000)
            .await
            .unwrap();

        let cleared = shaper.clear_user_conn_override_limits("u").await.unwrap();
        assert_eq!(cleared, 1);

        let resolved = shaper.limits.get_for_conn("u", info.handle).unwrap();
        assert_eq!(resolved.down_bps, 1_000);
    }

    #[tokio::test]
    async fn set_connection_limit_rejects_zero_handle() {
        let shaper = Shaper::for_test();
        assert!(shaper.set_connection_limit(0, 1, 1).await.is_err());
    }

    #[tokio::test]
    async fn reset_traffic_for_user_zeroes_without_touching_refcount() {
        let shaper = Shaper::for_test();
        let key = shaper.build_device_key("u", "1.1.1.1");
        let handle = shaper.devices.start(&key, "u", &shaper.connections);
        shaper.connections.add_rx(handle, 500);
        shaper.connections.add_tx(handle, 300);

        let reset = shaper.reset_traffic_for_user("u").await.unwrap();
        assert_eq!(reset, 1);

        let info = shaper.connections.get(handle).unwrap();
        assert_eq!(info.rx_bytes(), 0);
        assert_eq!(shaper.devices.ref_count(&key), Some(1));
    }

    #[tokio::test]
    async fn reset_traffic_for_all_devices_covers_multiple_users() {
        let shaper = Shaper::for_test();
        let ka = shaper.build_device_key("alice", "1.1.1.1");
        let kb = shaper.build_device_key("bob", "2.2.2.2");
        let ha = shaper.devices.start(&ka, "alice", &shaper.connections);
        let hb = shaper.devices.start(&kb, "bob", &shaper.connections);
        shaper.connections.add_rx(ha, 10);
        shaper.connections.add_rx(hb, 20);

        let count = shaper.reset_traffic_for_all_devices().await;
        assert_eq!(count, 2);
        assert_eq!(shaper.connections.get(ha).unwrap().rx_bytes(), 0);
        assert_eq!(shaper.connections.get(hb).unwrap().rx_bytes(), 0);
    }

    #[tokio::test]
    async fn clear_user_egress_cache_rejects_empty_user() {
        let shaper = Shaper::for_test();
        assert!(shaper.clear_user_egress_cache("").await.is_err());
    }
}
