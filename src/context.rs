// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `MaintenanceContext` — the process-wide `ErrorCnt`/progress sink
//! threaded through the pipeline (spec §9 "Global state"), shared
//! across concurrently-running host tasks the way the teacher's
//! `RecordingManager` shares its index and reader counters with
//! concurrently-running camera workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::error;

use crate::error::MaintError;
use crate::progress::ProgressSink;

/// Accumulates errors without aborting the pass that produced them
/// (spec §7 policy: "accumulate, never abort mid-host or mid-shard").
#[derive(Default)]
pub struct ErrorCounter {
    count: AtomicU64,
}

impl ErrorCounter {
    pub fn record(&self, where_: &str, err: &MaintError) {
        error!(target: "poolcnt", %where_, error = %err, "maintenance error");
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Shared context handed to every component. Cheap to clone — it is an
/// `Arc` bundle, so cloning for each host task is just a refcount bump.
#[derive(Clone)]
pub struct MaintenanceContext {
    pub errors: Arc<ErrorCounter>,
    pub progress: Arc<dyn ProgressSink>,
}

impl MaintenanceContext {
    pub fn new(progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            errors: Arc::new(ErrorCounter::default()),
            progress,
        }
    }

    pub fn record_error(&self, where_: &str, err: &MaintError) {
        self.errors.record(where_, err);
    }

    pub fn error_count(&self) -> u64 {
        self.errors.count()
    }
}
