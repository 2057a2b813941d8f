use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheap reachability check consulted before any backend call.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Reachability flag the platform layer flips on network changes.
#[derive(Debug, Clone)]
pub struct NetworkFlag {
    online: Arc<AtomicBool>,
}

impl NetworkFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for NetworkFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for NetworkFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
