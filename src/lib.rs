//! FlowRunner - Guided Workflow Interpreter
//!
//! Runs step-by-step workflows that a person works through one block at a
//! time: tasks to confirm, yes/no questions that pick a branch, counted and
//! conditional loops, "do any N of these" parallel groups, and timed waits.
//! The engine is event driven; the host delivers user input and countdown
//! progress, and the engine keeps reminder timers balanced along the way.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`workflow`]: Workflow definitions, YAML loading and validation
//! - [`execution`]: The block interpreter and its collaborator traits
//! - [`host`]: In-memory timer/countdown services and the console commands
//! - [`monitoring`]: Execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use flowrunner::execution::{DefaultBlockFactory, ExecutionContext};
//! use flowrunner::host::{ManualCountdown, ManualTimerService};
//! use flowrunner::load_workflow;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a workflow from YAML
//!     let workflow = load_workflow("morning.yaml")?;
//!
//!     let factory = DefaultBlockFactory;
//!     let mut timers = ManualTimerService::new();
//!     let mut countdown = ManualCountdown::new();
//!     let mut ctx = ExecutionContext::new(&mut timers, &mut countdown, &factory);
//!
//!     // Build and start a run, then feed it user input
//!     let mut execution = workflow.build(&factory);
//!     execution.start(&mut ctx)?;
//!     execution.done(&mut ctx)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod host;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use error::{EngineError, ServiceError, WorkflowError};
pub use execution::{Block, BlockType, Event, Execution, ExecutionContext};
pub use workflow::model::{BlockTemplate, WorkflowDefinition};
pub use workflow::parser::{load_workflow, parse_workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";
