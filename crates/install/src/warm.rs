use store::{Namespace, Store, WORKER_NAMESPACE};

use crate::error::InstallError;

pub const WARM_KEY: &str = "snapshot";

/// Records that a worker finished first-time setup, so the next start can
/// skip straight to loading the cached image.
#[derive(Debug, Clone)]
pub struct WarmMarker {
    namespace: Namespace,
}

impl WarmMarker {
    pub fn new(store: &Store) -> Self {
        Self {
            namespace: store.namespace(WORKER_NAMESPACE),
        }
    }

    pub fn is_warm(&self) -> Result<bool, InstallError> {
        Ok(self.namespace.get_flag(WARM_KEY)?)
    }

    pub fn mark_warm(&self) -> Result<(), InstallError> {
        self.namespace.put_flag(WARM_KEY, true)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<bool, InstallError> {
        Ok(self.namespace.delete(WARM_KEY)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_flag_lifecycle() {
        let store = Store::in_memory().unwrap();
        let marker = WarmMarker::new(&store);
        assert!(!marker.is_warm().unwrap());
        marker.mark_warm().unwrap();
        marker.mark_warm().unwrap();
        assert!(WarmMarker::new(&store).is_warm().unwrap());
        assert!(marker.clear().unwrap());
        assert!(!marker.is_warm().unwrap());
    }
}
