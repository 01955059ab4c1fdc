//! Workflow Data Model
//!
//! Serializable block templates produced by the workflow builder. A template is
//! inert data: the execution engine materializes it into a live
//! [`Block`](crate::execution::Block) through a
//! [`BlockFactory`](crate::execution::BlockFactory), lazily, at the moment a
//! branch or loop body is actually taken.
//!
//! # Example YAML Format
//!
//! ```yaml
//! description: Make tea
//! timer: { interval: 5, unit: m }
//! blocks:
//!   - type: task
//!     text: Boil water
//!     image: 9f86d081884c7d65
//!   - type: if
//!     condition: Do you take sugar?
//!     then:
//!       - type: task
//!         text: Add one spoon of sugar
//!   - type: timer_sleep
//!     value: 3
//!     unit: m
//!     text: Let it steep
//!     disable_notification: true
//!   - type: parallel_or
//!     text: Tidy up (any one)
//!     choose: 1
//!     branches:
//!       - - type: task
//!           text: Rinse the pot
//!       - - type: task
//!           text: Wipe the counter
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::execution::{Block, BlockFactory, Execution};

/// Seconds in a minute.
pub const SECONDS_PER_MINUTE: i64 = 60;

/// Seconds in an hour.
pub const SECONDS_PER_HOUR: i64 = 3600;

/// Time base for reminder intervals and sleep durations.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    #[serde(rename = "s", alias = "seconds")]
    Seconds,
    #[serde(rename = "m", alias = "minutes")]
    Minutes,
    #[serde(rename = "h", alias = "hours")]
    Hours,
}

impl TimeUnit {
    /// Number of seconds in one unit.
    pub fn seconds_per_unit(self) -> i64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => SECONDS_PER_MINUTE,
            TimeUnit::Hours => SECONDS_PER_HOUR,
        }
    }

    /// Converts `value` expressed in this unit to seconds.
    pub fn to_seconds(self, value: i64) -> i64 {
        value.saturating_mul(self.seconds_per_unit())
    }

    /// Short symbol used in workflow files and display text.
    pub fn symbol(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A recurring reminder: fire every `interval` `unit`s while the owner is active.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub interval: i64,
    pub unit: TimeUnit,
}

impl TimerConfig {
    pub fn new(interval: i64, unit: TimeUnit) -> Self {
        Self { interval, unit }
    }

    /// Interval length in seconds.
    pub fn seconds(&self) -> i64 {
        self.unit.to_seconds(self.interval)
    }
}

/// Whether a conditional loop continues on "yes" (`while`) or on "no" (`until`).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoopKind {
    While,
    Until,
}

impl LoopKind {
    /// Returns true if the answer means "run the body again".
    pub fn continues_on(self, answer_yes: bool) -> bool {
        match self {
            LoopKind::While => answer_yes,
            LoopKind::Until => !answer_yes,
        }
    }
}

/// Variant-specific part of a [`BlockTemplate`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateKind {
    Task {
        text: String,
    },
    If {
        condition: String,
        #[serde(rename = "then", default)]
        then_branch: Vec<BlockTemplate>,
        #[serde(rename = "else", default)]
        else_branch: Vec<BlockTemplate>,
    },
    RepeatTimes {
        times: i64,
        #[serde(default)]
        body: Vec<BlockTemplate>,
    },
    RepeatCondition {
        condition: String,
        kind: LoopKind,
        #[serde(default)]
        body: Vec<BlockTemplate>,
    },
    ParallelOr {
        #[serde(default)]
        text: String,
        choose: usize,
        #[serde(default)]
        branches: Vec<Vec<BlockTemplate>>,
    },
    TimerSleep {
        value: i64,
        unit: TimeUnit,
        #[serde(default)]
        text: String,
        #[serde(default)]
        disable_notification: bool,
    },
}

/// Lazily-instantiated block constructor.
///
/// Carries the variant data plus the metadata every block shares: an optional
/// numeric id, an optional image hash and an optional recurring reminder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BlockTemplate {
    #[serde(flatten)]
    pub kind: TemplateKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,

    /// Content hash of the image shown with the block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerConfig>,
}

impl BlockTemplate {
    fn from_kind(kind: TemplateKind) -> Self {
        Self {
            kind,
            id: None,
            image: None,
            timer: None,
        }
    }

    /// A plain task the user confirms with "done".
    ///
    /// # Example
    ///
    /// ```
    /// use flowrunner::workflow::{BlockTemplate, TimeUnit, TimerConfig};
    ///
    /// let task = BlockTemplate::task("Brush teeth")
    ///     .with_id(7)
    ///     .with_timer(TimerConfig::new(2, TimeUnit::Minutes));
    /// assert_eq!(task.id, Some(7));
    /// ```
    pub fn task(text: impl Into<String>) -> Self {
        Self::from_kind(TemplateKind::Task { text: text.into() })
    }

    pub fn if_condition(
        condition: impl Into<String>,
        then_branch: Vec<BlockTemplate>,
        else_branch: Vec<BlockTemplate>,
    ) -> Self {
        Self::from_kind(TemplateKind::If {
            condition: condition.into(),
            then_branch,
            else_branch,
        })
    }

    pub fn repeat_times(times: i64, body: Vec<BlockTemplate>) -> Self {
        Self::from_kind(TemplateKind::RepeatTimes { times, body })
    }

    pub fn repeat_condition(
        condition: impl Into<String>,
        kind: LoopKind,
        body: Vec<BlockTemplate>,
    ) -> Self {
        Self::from_kind(TemplateKind::RepeatCondition {
            condition: condition.into(),
            kind,
            body,
        })
    }

    pub fn parallel_or(
        text: impl Into<String>,
        choose: usize,
        branches: Vec<Vec<BlockTemplate>>,
    ) -> Self {
        Self::from_kind(TemplateKind::ParallelOr {
            text: text.into(),
            choose,
            branches,
        })
    }

    pub fn timer_sleep(
        value: i64,
        unit: TimeUnit,
        text: impl Into<String>,
        disable_notification: bool,
    ) -> Self {
        Self::from_kind(TemplateKind::TimerSleep {
            value,
            unit,
            text: text.into(),
            disable_notification,
        })
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_image(mut self, hash: impl Into<String>) -> Self {
        self.image = Some(hash.into());
        self
    }

    pub fn with_timer(mut self, timer: TimerConfig) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Text shown for this template before it is materialized.
    pub fn label(&self) -> String {
        match &self.kind {
            TemplateKind::Task { text } => text.clone(),
            TemplateKind::If { condition, .. } => condition.clone(),
            TemplateKind::RepeatTimes { times, .. } => format!("repeat {} times", times),
            TemplateKind::RepeatCondition { condition, .. } => condition.clone(),
            TemplateKind::ParallelOr { text, .. } => text.clone(),
            TemplateKind::TimerSleep { text, .. } => text.clone(),
        }
    }

    /// Nested template sequences (branches and bodies), in declaration order.
    pub fn children(&self) -> Vec<&[BlockTemplate]> {
        match &self.kind {
            TemplateKind::Task { .. } | TemplateKind::TimerSleep { .. } => Vec::new(),
            TemplateKind::If {
                then_branch,
                else_branch,
                ..
            } => vec![then_branch.as_slice(), else_branch.as_slice()],
            TemplateKind::RepeatTimes { body, .. } | TemplateKind::RepeatCondition { body, .. } => {
                vec![body.as_slice()]
            }
            TemplateKind::ParallelOr { branches, .. } => {
                branches.iter().map(|b| b.as_slice()).collect()
            }
        }
    }

    /// Materializes this template through `factory` and applies the shared metadata.
    pub fn build(&self, factory: &dyn BlockFactory) -> Block {
        let mut block = match &self.kind {
            TemplateKind::Task { text } => factory.create_task(text),
            TemplateKind::If {
                condition,
                then_branch,
                else_branch,
            } => factory.create_if(condition, then_branch, else_branch),
            TemplateKind::RepeatTimes { times, body } => factory.create_repeat_times(*times, body),
            TemplateKind::RepeatCondition {
                condition,
                kind,
                body,
            } => factory.create_repeat_condition(condition, *kind, body),
            TemplateKind::ParallelOr {
                text,
                choose,
                branches,
            } => factory.create_parallel_or(text, branches, *choose),
            TemplateKind::TimerSleep {
                value,
                unit,
                text,
                disable_notification,
            } => factory.create_timer_sleep(*value, *unit, text, *disable_notification),
        };

        if let Some(timer) = self.timer {
            block.set_timer(timer);
        }
        if let Some(ref image) = self.image {
            block.set_image(image.clone());
        }
        if let Some(id) = self.id {
            block.set_id(id);
        }
        block
    }
}

/// Materializes a template sequence, preserving order.
pub fn build_blocks(templates: &[BlockTemplate], factory: &dyn BlockFactory) -> Vec<Block> {
    templates.iter().map(|t| t.build(factory)).collect()
}

/// Root of a workflow: the builder's output for one goal.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,

    /// Reminder that runs for the whole execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerConfig>,

    #[serde(default)]
    pub blocks: Vec<BlockTemplate>,
}

impl WorkflowDefinition {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_block(mut self, block: BlockTemplate) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn with_timer(mut self, timer: TimerConfig) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Visits every template in the tree, depth first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a BlockTemplate)) {
        fn walk_all<'a>(templates: &'a [BlockTemplate], visit: &mut dyn FnMut(&'a BlockTemplate)) {
            for template in templates {
                visit(template);
                for child in template.children() {
                    walk_all(child, visit);
                }
            }
        }
        walk_all(&self.blocks, visit);
    }

    /// Builds a fresh root [`Execution`] for one run of this workflow.
    pub fn build(&self, factory: &dyn BlockFactory) -> Execution {
        let mut execution = factory.create_execution(Some(&self.description), self.timer);
        for block in build_blocks(&self.blocks, factory) {
            execution.push_block(block);
        }
        execution
    }
}
