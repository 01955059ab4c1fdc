//! Run Monitoring Module
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: block enter/leave timing for the run report

pub mod timeline;

pub use timeline::{BlockDuration, EventType, ExecutionTimeline, TimelineEvent};
