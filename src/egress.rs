use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::ShaperError;
use crate::registry::device::DeviceIndex;

/// Selects the outbound egress tag a user's traffic should be routed
/// through. Implementations are supplied by the embedding proxy; this
/// crate never decides routing policy itself.
#[async_trait]
pub trait OutboundChooser: Send + Sync {
    /// Chooses a tag for `user`, or `None` to defer to the embedder's own
    /// default routing.
    async fn choose(&self, user: &str) -> Result<Option<String>, ShaperError>;
}

/// The chooser installed when the embedder never configures one: always
/// defers to default routing.
pub struct DefaultChooser;

#[async_trait]
impl OutboundChooser for DefaultChooser {
    async fn choose(&self, _user: &str) -> Result<Option<String>, ShaperError> {
        Ok(None)
    }
}

/// Caches the per-device egress decision made by an [`OutboundChooser`] so
/// repeated lookups for the same device avoid re-invoking the embedder's
/// chooser.
pub struct EgressFacade {
    chooser: RwLock<Arc<dyn OutboundChooser>>,
}

impl Default for EgressFacade {
    fn default() -> Self {
        Self {
            chooser: RwLock::new(Arc::new(DefaultChooser)),
        }
    }
}

impl EgressFacade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_chooser(&self, chooser: Arc<dyn OutboundChooser>) {
        *self.chooser.write().expect("egress facade poisoned") = chooser;
    }

    fn current_chooser(&self) -> Arc<dyn OutboundChooser> {
        self.chooser.read().expect("egress facade poisoned").clone()
    }

    /// Resolves the egress tag for `device_key`, consulting (and populating)
    /// the device index's cache before falling back to the configured
    /// chooser.
    pub async fn choose_for_device(
        &self,
        devices: &DeviceIndex,
        user: &str,
        device_key: &str,
    ) -> Result<Option<String>, ShaperError> {
        if let Some(tag) = devices.get_egress(device_key) {
            return Ok(Some(tag));
        }

        let chooser = self.current_chooser();
        let tag = chooser.choose(user).await?;
        if let Some(tag) = &tag {
            devices.set_egress(device_key, tag);
        }
        Ok(tag)
    }
}
