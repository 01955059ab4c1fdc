//! Workflow Execution Module
//!
//! Interprets block sequences in response to host events.
//!
//! # Architecture
//!
//! - [`engine`]: [`Execution`], the cursor-driven sequence interpreter
//! - [`block`]: the block variants and their enter/event/leave behavior
//! - [`parallel`]: parallel-OR fan-out over child executions
//! - [`factory`]: materializing templates into blocks
//! - [`timer`]: reminder and countdown collaborators, pause bookkeeping
//! - [`snapshot`]: serializable view of a running execution

pub mod block;
pub mod engine;
pub mod factory;
pub mod parallel;
pub mod snapshot;
pub mod timer;

pub use block::{Block, BlockKind, BlockType, Event, LeaveHook};
pub use engine::Execution;
pub use factory::{BlockFactory, DefaultBlockFactory};
pub use parallel::{ParallelOr, Thread};
pub use snapshot::{BlockSnapshot, ExecutionSnapshot, NextPreview, ThreadSnapshot};
pub use timer::{CountdownService, ExecutionContext, PauseRequests, PauseToken, TimerId, TimerService};
