//! Per-user, per-device traffic-shaping and accounting core for a proxy
//! data path.
//!
//! [`Shaper`] is the single facade embedding code talks to: it owns the
//! connection registry, device index, token-bucket registry, limit store,
//! session binding, egress chooser facade, and the process-wide grace/key
//! mode settings. Wiring it into an actual proxy's inbound/outbound pipeline
//! (framing, wire transport for the control surface, cancellation) is left
//! to the embedder.

pub mod config;
pub mod control;
pub mod egress;
pub mod error;
pub mod gc;
pub mod handle;
pub mod registry;
pub mod shaping;
pub mod stream;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub use config::{KeyMode, ShaperSettings};
pub use error::{Result, ShaperError};
pub use handle::ConnectionHandle;

use egress::EgressFacade;
use registry::connection::ConnectionRegistry;
use registry::device::{build_device_key, DeviceIndex};
use registry::session::SessionBinding;
use shaping::bucket_registry::BucketRegistry;
use shaping::limits::LimitStore;

fn key_mode_to_tag(mode: KeyMode) -> u8 {
    match mode {
        KeyMode::Uuid => 0,
        KeyMode::Device => 1,
    }
}

fn tag_to_key_mode(tag: u8) -> KeyMode {
    match tag {
        1 => KeyMode::Device,
        _ => KeyMode::Uuid,
    }
}

/// The traffic-shaping and accounting core.
///
/// All fields below are deliberately `pub(crate)` or `pub` facades over
/// plain synchronous locks; see the crate's concurrency notes for why no
/// critical section here ever spans an `.await`.
pub struct Shaper {
    pub connections: ConnectionRegistry,
    pub devices: DeviceIndex,
    pub buckets: BucketRegistry,
    pub limits: LimitStore,
    pub sessions: SessionBinding,
    pub egress: EgressFacade,
    grace_secs: AtomicU64,
    key_mode: AtomicU8,
}

static GLOBAL: OnceLock<Arc<Shaper>> = OnceLock::new();

impl Shaper {
    /// Creates a fresh, independent instance with the given startup
    /// settings. Tests (and multi-tenant embedders) should prefer this over
    /// [`global`] so state from one instance never leaks into another.
    pub fn with_settings(settings: ShaperSettings) -> Arc<Self> {
        Arc::new(Self {
            connections: ConnectionRegistry::new(),
            devices: DeviceIndex::new(),
            buckets: BucketRegistry::new(),
            limits: LimitStore::new(),
            sessions: SessionBinding::new(),
            egress: EgressFacade::new(),
            grace_secs: AtomicU64::new(settings.grace.as_secs()),
            key_mode: AtomicU8::new(key_mode_to_tag(settings.key_mode)),
        })
    }

    /// Creates a fresh instance with default settings. A thin convenience
    /// wrapper used pervasively by this crate's own unit tests.
    pub fn for_test() -> Arc<Self> {
        Self::with_settings(ShaperSettings::default())
    }

    /// The process-wide singleton, lazily constructed from the environment
    /// on first access.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| {
                let settings = ShaperSettings::from_env().unwrap_or_default();
                Self::with_settings(settings)
            })
            .clone()
    }

    pub fn build_device_key(&self, user: &str, src_ip: &str) -> String {
        build_device_key(self.key_mode(), user, src_ip)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs.load(Ordering::Relaxed))
    }

    pub fn set_grace(&self, grace: Duration) {
        self.grace_secs.store(grace.as_secs(), Ordering::Relaxed);
    }

    pub fn key_mode(&self) -> KeyMode {
        tag_to_key_mode(self.key_mode.load(Ordering::Relaxed))
    }

    pub fn set_key_mode(&self, mode: KeyMode) {
        self.key_mode.store(key_mode_to_tag(mode), Ordering::Relaxed);
    }

    /// Spawns the background GC sweep for this instance. The returned
    /// handle keeps running for the lifetime of the process unless the
    /// caller explicitly aborts it.
    pub fn spawn_gc(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(gc::run(self.clone()))
    }
}
