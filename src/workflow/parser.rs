//! Workflow Parser
//!
//! Loads workflow definitions from YAML and turns them into executions. The
//! builder contract is lenient: [`parse_workflow`] and
//! [`build_execution_from_source`] log the reason and return `None` when a
//! definition cannot be used, and the host simply does not start.

use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use crate::error::WorkflowError;
use crate::execution::{BlockFactory, Execution};

use super::model::WorkflowDefinition;
use super::validator::validate_workflow;

/// Parses and validates a YAML workflow definition.
pub fn parse_workflow_str(source: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let workflow: WorkflowDefinition = serde_yaml::from_str(source)?;
    debug!(
        "Parsed workflow '{}' with {} top-level blocks",
        workflow.description,
        workflow.len()
    );
    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Builder entry point: the definition, or `None` if it is unusable.
pub fn parse_workflow(source: &str) -> Option<WorkflowDefinition> {
    match parse_workflow_str(source) {
        Ok(workflow) => Some(workflow),
        Err(e) => {
            warn!("No workflow built: {}", e);
            None
        }
    }
}

/// Loads a workflow from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use flowrunner::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("morning.yaml")?;
///     println!("Loaded {} blocks", workflow.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowDefinition, WorkflowError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let source = fs::read_to_string(path).map_err(|source| WorkflowError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("YAML content loaded ({} bytes)", source.len());

    parse_workflow_str(&source)
}

pub fn to_yaml(workflow: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml::to_string(workflow).map_err(WorkflowError::Serialize)
}

/// Writes a definition back to disk as YAML.
pub fn save_workflow(workflow: &WorkflowDefinition, path: impl AsRef<Path>) -> Result<(), WorkflowError> {
    let path = path.as_ref();
    let yaml = to_yaml(workflow)?;
    fs::write(path, yaml).map_err(|source| WorkflowError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Saved workflow '{}' to {}", workflow.description, path.display());
    Ok(())
}

/// Parses `source` and builds a ready-to-start root execution.
pub fn build_execution_from_source(source: &str, factory: &dyn BlockFactory) -> Option<Execution> {
    parse_workflow(source).map(|workflow| workflow.build(factory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{BlockType, DefaultBlockFactory};
    use crate::workflow::{BlockTemplate, TimeUnit, TimerConfig};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MORNING: &str = r#"
description: Morning routine
timer: { interval: 10, unit: m }
blocks:
  - type: task
    text: Get up
    id: 1
  - type: repeat_times
    times: 3
    body:
      - type: task
        text: Deep breath
  - type: repeat_condition
    condition: Still sleepy?
    kind: while
    body:
      - type: task
        text: Splash water
  - type: timer_sleep
    value: 2
    unit: minutes
    text: Wait for the kettle
    disable_notification: true
  - type: parallel_or
    text: Breakfast
    choose: 1
    branches:
      - - type: task
          text: Toast
      - - type: task
          text: Cereal
"#;

    #[test]
    fn test_parse_full_workflow() {
        let workflow = parse_workflow_str(MORNING).unwrap();
        assert_eq!(workflow.description, "Morning routine");
        assert_eq!(workflow.timer, Some(TimerConfig::new(10, TimeUnit::Minutes)));
        assert_eq!(workflow.len(), 5);
    }

    #[test]
    fn test_parse_invalid_yaml_returns_none() {
        assert!(parse_workflow("blocks: [ {type: teleport} ]").is_none());
        assert!(parse_workflow("description: [1, 2]").is_none());
    }

    #[test]
    fn test_parse_rejects_duplicate_ids() {
        let source = r#"
description: dup
blocks:
  - { type: task, text: a, id: 1 }
  - { type: task, text: b, id: 1 }
"#;
        assert!(matches!(parse_workflow_str(source), Err(WorkflowError::Invalid(_))));
    }

    #[test]
    fn test_build_execution_from_source() {
        let execution = build_execution_from_source(MORNING, &DefaultBlockFactory).unwrap();
        assert_eq!(execution.description(), Some("Morning routine"));
        let types: Vec<BlockType> = execution.blocks().iter().map(|b| b.block_type()).collect();
        assert_eq!(
            types,
            vec![
                BlockType::Simple,
                BlockType::Repeat,
                BlockType::Conditional,
                BlockType::Timer,
                BlockType::Parallel,
            ]
        );
    }

    #[test]
    fn test_load_workflow_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MORNING.as_bytes()).unwrap();

        let workflow = load_workflow(file.path()).unwrap();
        assert_eq!(workflow.len(), 5);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_workflow("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, WorkflowError::Io { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.yaml");
        let workflow = WorkflowDefinition::new("Saved").with_block(
            BlockTemplate::if_condition("Ready?", vec![BlockTemplate::task("Go")], vec![]).with_id(9),
        );

        save_workflow(&workflow, &path).unwrap();
        assert_eq!(load_workflow(&path).unwrap(), workflow);
    }
}
