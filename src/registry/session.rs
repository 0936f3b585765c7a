use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::handle::ConnectionHandle;
use crate::Shaper;

struct SessionEntry {
    device_key: String,
    handle: ConnectionHandle,
}

/// Binds an inbound session identifier to one connection handle for the
/// session's lifetime, deduplicating repeated lookups within that session
/// and scheduling device-index cleanup when the session ends.
#[derive(Default)]
pub struct SessionBinding {
    sessions: Mutex<HashMap<u64, SessionEntry>>,
}

impl SessionBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves (or creates) the connection handle for a session.
    ///
    /// Returns `None` without touching any state if `user` is empty or
    /// `session_id` is zero — the caller should proceed unshaped.
    ///
    /// On first use for a given `session_id`, spawns a single cleanup task
    /// that calls `DeviceIndex::end` and forgets the session entry once
    /// `cancelled` resolves.
    pub fn ensure_conn(
        &self,
        shaper: &Arc<Shaper>,
        user: &str,
        src_ip: &str,
        session_id: u64,
        cancelled: impl Future<Output = ()> + Send + 'static,
    ) -> Option<ConnectionHandle> {
        if user.is_empty() || session_id == 0 {
            return None;
        }

        let mut sessions = self.sessions.lock().expect("session binding poisoned");
        if let Some(entry) = sessions.get(&session_id) {
            return Some(entry.handle);
        }

        let device_key = shaper.build_device_key(user, src_ip);
        let handle = shaper.devices.start(&device_key, user, &shaper.connections);
        sessions.insert(
            session_id,
            SessionEntry {
                device_key: device_key.clone(),
                handle,
            },
        );
        drop(sessions);

        let shaper = shaper.clone();
        tokio::spawn(async move {
            cancelled.await;
            let grace = shaper.grace();
            shaper.devices.end(&device_key, grace);
            shaper
                .sessions
                .sessions
                .lock()
                .expect("session binding poisoned")
                .remove(&session_id);
            debug!(session_id, device_key, "session cleanup fired");
        });

        Some(handle)
    }
}
