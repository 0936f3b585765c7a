use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::handle::ConnectionHandle;
use crate::shaping::bucket::TokenBucket;

/// Converts a configured rate in bits/sec to the bytes/sec unit
/// [`TokenBucket`] operates in.
fn bps_to_bytes_per_sec(bps: u64) -> f64 {
    bps as f64 / 8.0
}

/// Owns the up/down [`TokenBucket`] pair for every connection handle that
/// currently has a limit configured.
#[derive(Default)]
pub struct BucketRegistry {
    up: Mutex<HashMap<ConnectionHandle, Arc<TokenBucket>>>,
    down: Mutex<HashMap<ConnectionHandle, Arc<TokenBucket>>>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the up/down bucket pair for `handle`, creating them at the
    /// given rates (bits/sec) on first use, or re-rating existing buckets
    /// to match.
    pub fn get_or_create(
        &self,
        handle: ConnectionHandle,
        up_bps: u64,
        down_bps: u64,
    ) -> (Arc<TokenBucket>, Arc<TokenBucket>) {
        let up = {
            let mut up_map = self.up.lock().expect("bucket registry poisoned");
            match up_map.get(&handle) {
                Some(bucket) => {
                    bucket.set_rate(bps_to_bytes_per_sec(up_bps));
                    bucket.clone()
                }
                None => {
                    let bucket = Arc::new(TokenBucket::new(bps_to_bytes_per_sec(up_bps)));
                    up_map.insert(handle, bucket.clone());
                    bucket
                }
            }
        };

        let down = {
            let mut down_map = self.down.lock().expect("bucket registry poisoned");
            match down_map.get(&handle) {
                Some(bucket) => {
                    bucket.set_rate(bps_to_bytes_per_sec(down_bps));
                    bucket.clone()
                }
                None => {
                    let bucket = Arc::new(TokenBucket::new(bps_to_bytes_per_sec(down_bps)));
                    down_map.insert(handle, bucket.clone());
                    bucket
                }
            }
        };

        (up, down)
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<(Arc<TokenBucket>, Arc<TokenBucket>)> {
        let up = self
            .up
            .lock()
            .expect("bucket registry poisoned")
            .get(&handle)
            .cloned()?;
        let down = self
            .down
            .lock()
            .expect("bucket registry poisoned")
            .get(&handle)
            .cloned()?;
        Some((up, down))
    }

    pub fn remove(&self, handle: ConnectionHandle) {
        self.up
            .lock()
            .expect("bucket registry poisoned")
            .remove(&handle);
        self.down
            .lock()
            .expect("bucket registry poisoned")
            .remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleAllocator;

    fn some_handle() -> ConnectionHandle {
        HandleAllocator::new().next()
    }

    #[test]
    fn get_or_create_is_idempotent_for_the_same_handle() {
        let registry = BucketRegistry::new();
        let h = some_handle();
        let (up1, down1) = registry.get_or_create(h, 8_000_000, 16_000_000);
        let (up2, down2) = registry.get_or_create(h, 8_000_000, 16_000_000);
        assert!(Arc::ptr_eq(&up1, &up2));
        assert!(Arc::ptr_eq(&down1, &down2));
    }

    #[test]
    fn distinct_handles_get_distinct_buckets() {
        let registry = BucketRegistry::new();
        let (up1, _) = registry.get_or_create(some_handle(), 1_000, 1_000);
        let (up2, _) = registry.get_or_create(some_handle(), 1_000, 1_000);
        assert!(!Arc::ptr_eq(&up1, &up2));
    }

    #[test]
    fn remove_drops_both_directions() {
        let registry = BucketRegistry::new();
        let h = some_handle();
        registry.get_or_create(h, 1_000, 1_000);
        registry.remove(h);
        assert!(registry.get(h).is_none());
    }

    #[test]
    fn get_on_unknown_handle_is_none() {
        let registry = BucketRegistry::new();
        assert!(registry.get(some_handle()).is_none());
    }
}
