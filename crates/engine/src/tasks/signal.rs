//! Operation context threaded through every layer of a running job:
//! a progress sink bound to the registry and an observe-only abort signal.

use crate::error::{TaskError, TaskResult};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Read-only view of a task's cancellation controller.
///
/// Strategies and scanners receive this, never the token itself, so only
/// the owner (the registry or the search cache) can trip it.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A signal that is never tripped.
    pub fn never() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the owner trips the signal.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }

    /// `Err(TaskError::Aborted)` once tripped.
    pub fn check(&self) -> TaskResult<()> {
        if self.is_aborted() {
            Err(TaskError::Aborted)
        } else {
            Ok(())
        }
    }
}

type ProgressFn = dyn Fn(u8) + Send + Sync;

/// Maps a strategy's local 0..=100 onto the task's `[floor, 99]` band.
///
/// Only increases are forwarded. 100 is reserved for the orchestrator,
/// which pushes it once the strategy has actually returned.
#[derive(Clone)]
pub struct ProgressSink {
    report: Arc<ProgressFn>,
    floor: u8,
    last: Arc<AtomicU8>,
}

impl ProgressSink {
    pub fn new(floor: u8, report: impl Fn(u8) + Send + Sync + 'static) -> Self {
        let floor = floor.min(99);
        Self {
            report: Arc::new(report),
            floor,
            last: Arc::new(AtomicU8::new(floor)),
        }
    }

    pub fn noop() -> Self {
        Self::new(0, |_| {})
    }

    pub fn report(&self, local: u8) {
        let local = u32::from(local.min(100));
        let span = u32::from(99 - self.floor);
        let scaled = self.floor + (local * span / 100) as u8;
        let prev = self.last.fetch_max(scaled, Ordering::AcqRel);
        if scaled > prev {
            (self.report)(scaled);
        }
    }

    /// Last value forwarded (or the floor).
    pub fn current(&self) -> u8 {
        self.last.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("floor", &self.floor)
            .field("last", &self.current())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OperationContext {
    pub progress: ProgressSink,
    pub abort: AbortSignal,
}

impl OperationContext {
    pub fn new(progress: ProgressSink, abort: AbortSignal) -> Self {
        Self { progress, abort }
    }

    /// Context that reports nowhere and is never aborted.
    pub fn detached() -> Self {
        Self::new(ProgressSink::noop(), AbortSignal::never())
    }
}
