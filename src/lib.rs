// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

pub mod backup_walker;
pub mod config;
pub mod context;
pub mod count_map;
pub mod delta_log;
pub mod digest;
pub mod error;
pub mod host_reconciler;
pub mod lock;
pub mod pool_aggregator;
pub mod pool_cleaner;
pub mod progress;
pub mod stats;
