//! Tool list cache

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::CatalogEntry;

/// Storage for the discovered tool list.
///
/// Injectable so hosts can share one cache between catalogs or back it with
/// something longer-lived than process memory.
pub trait ToolCache: Send + Sync {
    fn get(&self) -> Option<Arc<Vec<CatalogEntry>>>;
    fn set(&self, entries: Arc<Vec<CatalogEntry>>);
    fn invalidate(&self);
}

/// In-process cache with an optional time-to-live
#[derive(Default)]
pub struct MemoryToolCache {
    slot: Mutex<Option<(Instant, Arc<Vec<CatalogEntry>>)>>,
    ttl: Option<Duration>,
}

impl MemoryToolCache {
    /// Cache that holds entries until invalidated
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache whose entries expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl: Some(ttl),
        }
    }
}

impl ToolCache for MemoryToolCache {
    fn get(&self) -> Option<Arc<Vec<CatalogEntry>>> {
        let slot = self.slot.lock().ok()?;
        let (stored_at, entries) = slot.as_ref()?;
        match self.ttl {
            Some(ttl) if stored_at.elapsed() >= ttl => None,
            _ => Some(Arc::clone(entries)),
        }
    }

    fn set(&self, entries: Arc<Vec<CatalogEntry>>) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some((Instant::now(), entries));
        }
    }

    fn invalidate(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}
