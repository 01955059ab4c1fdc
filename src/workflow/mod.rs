//! Workflow Definition Module
//!
//! Provides the data structures the workflow builder produces, and loading,
//! saving and validating them.
//!
//! # Structure
//!
//! - [`model`]: Template tree (WorkflowDefinition, BlockTemplate) and units
//! - [`parser`]: YAML parsing, loading and execution building
//! - [`validator`]: Structural checks

pub mod model;
pub mod parser;
pub mod validator;

pub use model::{
    build_blocks, BlockTemplate, LoopKind, TemplateKind, TimeUnit, TimerConfig, WorkflowDefinition,
};
pub use parser::{build_execution_from_source, load_workflow, parse_workflow, parse_workflow_str, save_workflow, to_yaml};
pub use validator::{validate_workflow, ValidationError};
