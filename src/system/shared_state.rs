//! State shared between tracking and the background mapping worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::map::Map;

/// Everything both threads touch, behind the appropriate synchronization.
///
/// Tracking takes short read/write locks per frame; the mapping worker runs
/// global bundle adjustment on a copy-on-read snapshot and applies the
/// result in a single write-locked swap, so tracking never observes a
/// partially updated map.
pub struct SharedState {
    /// The map. Tracking writes keyframes/points, the worker writes refined
    /// poses/points.
    pub map: RwLock<Map>,

    /// Raised by tracking when a keyframe is inserted so an in-flight global
    /// bundle adjustment yields early.
    pub abort_ba: AtomicBool,

    /// Ask the mapping worker to exit.
    pub shutdown: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            map: RwLock::new(Map::new()),
            abort_ba: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn request_abort_ba(&self) {
        self.abort_ba.store(true, Ordering::SeqCst);
    }

    pub fn clear_abort_ba(&self) {
        self.abort_ba.store(false, Ordering::SeqCst);
    }

    pub fn should_abort_ba(&self) -> bool {
        self.abort_ba.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
