//! Cooperative cancellation.
//!
//! The host application owns the decision to abort; this crate only asks.
//! Every bounded wait in the pipeline calls [`Cancellation::is_cancelled`]
//! once per poll tick.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Predicate = dyn Fn() -> bool + Send + Sync;

/// A cloneable handle to a "should this work stop?" predicate.
#[derive(Clone)]
pub struct Cancellation {
    predicate: Arc<Predicate>,
}

impl Cancellation {
    /// A handle that never fires.
    pub fn never() -> Self {
        Self::from_fn(|| false)
    }

    /// Wrap an arbitrary predicate supplied by the host.
    pub fn from_fn<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Observe a shared flag.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self::from_fn(move || flag.load(Ordering::SeqCst))
    }

    /// Fires when either `self` or `other` fires.
    pub fn any(&self, other: &Cancellation) -> Self {
        let a = Arc::clone(&self.predicate);
        let b = Arc::clone(&other.predicate);
        Self::from_fn(move || a() || b())
    }

    pub fn is_cancelled(&self) -> bool {
        (self.predicate)()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// An owned trigger that hands out [`Cancellation`] handles.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// A handle observing this flag.
    pub fn handle(&self) -> Cancellation {
        Cancellation::from_flag(Arc::clone(&self.flag))
    }
}
