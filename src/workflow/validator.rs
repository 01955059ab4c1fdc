//! Workflow Validation
//!
//! Structural checks run on a definition before it is built:
//! - block ids are unique across the whole tree
//! - reminder intervals are positive
//!
//! Shapes that are odd but still executable are only logged.

use std::collections::HashSet;
use std::fmt;

use log::{debug, info, warn};

use super::model::{BlockTemplate, TemplateKind, TimerConfig, WorkflowDefinition};

/// Reminders shorter than this are accepted but flagged.
pub const MIN_REMINDER_SECONDS: i64 = 4;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    DuplicateBlockId(u32),
    InvalidTimerInterval { block: String, interval: i64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateBlockId(id) => write!(f, "Duplicate block ID: {}", id),
            Self::InvalidTimerInterval { block, interval } => {
                write!(f, "Reminder of '{}' must have a positive interval, got {}", block, interval)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

fn check_timer(owner: &str, timer: Option<TimerConfig>) -> Result<(), ValidationError> {
    let Some(timer) = timer else {
        return Ok(());
    };
    if timer.interval <= 0 {
        return Err(ValidationError::InvalidTimerInterval {
            block: owner.to_string(),
            interval: timer.interval,
        });
    }
    if timer.seconds() < MIN_REMINDER_SECONDS {
        warn!(
            "Reminder of '{}' fires every {} s, below the {} s floor",
            owner,
            timer.seconds(),
            MIN_REMINDER_SECONDS
        );
    }
    Ok(())
}

/// Logs suspicious shapes of a single template.
fn inspect_template(template: &BlockTemplate) {
    match &template.kind {
        TemplateKind::ParallelOr { text, choose, branches } => {
            if *choose > branches.len() {
                warn!(
                    "Parallel block '{}' chooses {} of only {} branches; it ends when all are done",
                    text,
                    choose,
                    branches.len()
                );
            }
            if *choose == 0 {
                warn!("Parallel block '{}' chooses 0 branches; it ends when all are done", text);
            }
        }
        TemplateKind::RepeatTimes { times, .. } if *times < 0 => {
            warn!("Repeat count {} is negative; the body never runs", times);
        }
        TemplateKind::TimerSleep { value, .. } if *value <= 0 => {
            debug!("Sleep of {} is skipped at runtime", value);
        }
        _ => {}
    }

    if template.label().trim().is_empty() && !matches!(template.kind, TemplateKind::RepeatTimes { .. }) {
        warn!("Block with empty text (id {:?})", template.id);
    }
}

/// Validates the entire workflow tree.
///
/// Performs the following checks:
/// 1. No two blocks share an id
/// 2. Every reminder interval is positive
pub fn validate_workflow(workflow: &WorkflowDefinition) -> Result<(), ValidationError> {
    info!("Validating workflow '{}'", workflow.description);
    check_timer(&workflow.description, workflow.timer)?;

    let mut templates = Vec::new();
    workflow.walk(&mut |t| templates.push(t));

    let mut seen_ids = HashSet::new();
    for template in &templates {
        if let Some(id) = template.id {
            if !seen_ids.insert(id) {
                return Err(ValidationError::DuplicateBlockId(id));
            }
        }
        check_timer(&template.label(), template.timer)?;
        inspect_template(template);
    }

    debug!("Validated {} blocks", templates.len());
    Ok(())
}
