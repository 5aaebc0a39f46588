// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `ProgressSink` — the progress protocol named in spec §6: literal
//! `xferPids`/`__bpc_progress_state__`/`__bpc_progress_fileCnt__`
//! lines, or a captured record for tests.
//!
//! Generalized from the teacher's `tracing`-at-phase-boundaries style
//! (`main.rs`'s `info!` calls) into an injectable sink, per spec §9
//! ("Progress emission is a sink interface taking a label and an
//! optional `(i,n)` pair; tests replace it with a capture").

use parking_lot::Mutex;

pub trait ProgressSink: Send + Sync {
    fn start(&self, pid: u32);
    fn state(&self, label: &str);
    fn file_count(&self, i: u64, n: u64);
    fn finish(&self);
}

/// Writes the literal wire-protocol lines to stdout.
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn start(&self, pid: u32) {
        println!("xferPids {pid}");
    }

    fn state(&self, label: &str) {
        println!("__bpc_progress_state__ {label}");
    }

    fn file_count(&self, i: u64, n: u64) {
        println!("__bpc_progress_fileCnt__ {i}/{n}");
    }

    fn finish(&self) {
        println!("xferPids");
    }
}

/// Suppresses all progress output (`-p`).
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn start(&self, _pid: u32) {}
    fn state(&self, _label: &str) {}
    fn file_count(&self, _i: u64, _n: u64) {}
    fn finish(&self) {}
}

/// A single recorded progress event, in the order it was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Start(u32),
    State(String),
    FileCount(u64, u64),
    Finish,
}

/// Captures emitted events for assertions in tests.
#[derive(Default)]
pub struct CapturingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CapturingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }
}

impl ProgressSink for CapturingProgressSink {
    fn start(&self, pid: u32) {
        self.events.lock().push(ProgressEvent::Start(pid));
    }

    fn state(&self, label: &str) {
        self.events.lock().push(ProgressEvent::State(label.to_string()));
    }

    fn file_count(&self, i: u64, n: u64) {
        self.events.lock().push(ProgressEvent::FileCount(i, n));
    }

    fn finish(&self) {
        self.events.lock().push(ProgressEvent::Finish);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capturing_sink_records_events_in_order() {
        let sink = CapturingProgressSink::new();
        sink.start(42);
        sink.state("hosts");
        sink.file_count(1, 10);
        sink.finish();
        assert_eq!(
            sink.events(),
            vec![
                ProgressEvent::Start(42),
                ProgressEvent::State("hosts".to_string()),
                ProgressEvent::FileCount(1, 10),
                ProgressEvent::Finish,
            ]
        );
    }
}
