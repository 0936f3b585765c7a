use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::Shaper;

const GC_INTERVAL: Duration = Duration::from_secs(1);

/// Destroys every piece of per-connection state for `handle`: its bucket
/// pair, its limit override, and its `ConnInfo`. Called outside the device
/// index's lock, per the two-phase collect-then-destroy discipline.
fn destroy_connection(shaper: &Shaper, handle: crate::handle::ConnectionHandle) {
    shaper.buckets.remove(handle);
    shaper.limits.clear_conn_limit(handle);
    shaper.connections.remove(handle);
}

/// Runs the background sweep loop once per tick for the lifetime of the
/// returned task. Collecting expired device entries and destroying their
/// state are two separate phases so the destroy phase never runs while the
/// device index's mutex is held.
pub async fn run(shaper: Arc<Shaper>) {
    let mut ticker = tokio::time::interval(GC_INTERVAL);
    loop {
        ticker.tick().await;
        let expired = shaper.devices.collect_expired();
        for handle in expired {
            destroy_connection(&shaper, handle);
            debug!(?handle, "gc destroyed expired device");
        }
    }
}
