//! Execution Blocks
//!
//! A [`Block`] is one live step of a running workflow. Every variant knows how
//! to enter, how to react to host events while it is current, and how to
//! leave. Blocks never touch the sequence that owns them; instead they return a
//! [`Transition`] and the owning [`Execution`](super::Execution) applies it.
//!
//! Loops are encoded structurally: a repeat block that decides to run again
//! splices its body followed by a fresh copy of itself, carrying the loop
//! state and the reminder handle over to the copy.

use std::borrow::Cow;
use std::fmt;

use log::{debug, warn};
use serde::Serialize;

use crate::error::{EngineError, ServiceError};
use crate::workflow::{build_blocks, BlockTemplate, LoopKind, TimeUnit, TimerConfig};

use super::parallel::ParallelOr;
use super::timer::{ExecutionContext, PauseRequests, PauseToken, TimerId};

/// Callback run once when its block leaves, most recently added first.
pub type LeaveHook = Box<dyn FnOnce(&mut ExecutionContext<'_>) -> Result<(), ServiceError>>;

/// External stimulus delivered by the host to the current block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// The user confirmed the current task
    Done,
    /// The user answered "yes" to a condition
    SelectYes,
    /// The user answered "no" to a condition
    SelectNo,
    /// The user skipped a running sleep
    ForceFinish,
    /// Countdown progress, in remaining seconds
    CountdownTick(f64),
    /// The countdown ran out
    CountdownElapsed,
}

/// What the owning execution must do after a block operation.
#[derive(Debug)]
pub(crate) enum Transition {
    /// The block stays current and waits for the next event.
    Stay,
    /// Splice the blocks right after the current one, then leave it.
    Leave(Vec<Block>),
}

impl Transition {
    pub(crate) fn leave() -> Self {
        Transition::Leave(Vec::new())
    }
}

/// Rendering and protocol tag of a block.
///
/// The numeric codes are stable and shared with external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BlockType {
    Simple = 1,
    Conditional = 2,
    Timer = 3,
    Parallel = 4,
    End = 5,
    Repeat = 6,
}

impl BlockType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfCondition {
    pub then_branch: Vec<BlockTemplate>,
    pub else_branch: Vec<BlockTemplate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepeatTimes {
    remaining: i64,
    entered: bool,
    body: Vec<BlockTemplate>,
}

impl RepeatTimes {
    /// Iterations still to be spliced after this copy.
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn is_entered(&self) -> bool {
        self.entered
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepeatCondition {
    kind: LoopKind,
    body: Vec<BlockTemplate>,
}

impl RepeatCondition {
    pub fn loop_kind(&self) -> LoopKind {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimerSleep {
    value: i64,
    unit: TimeUnit,
    disable_notification: bool,
    remaining_seconds: f64,
    pause_token: Option<PauseToken>,
    route: Vec<usize>,
}

impl TimerSleep {
    fn new(value: i64, unit: TimeUnit, disable_notification: bool) -> Self {
        Self {
            value,
            unit,
            disable_notification,
            remaining_seconds: unit.to_seconds(value) as f64,
            pause_token: None,
            route: Vec::new(),
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn disables_notification(&self) -> bool {
        self.disable_notification
    }

    pub fn remaining_seconds(&self) -> f64 {
        self.remaining_seconds
    }

    pub fn is_running(&self) -> bool {
        self.remaining_seconds > 0.0
    }

    /// Remaining time as `MM:SS`, or `HH:MM:SS` once an hour or more is left.
    pub fn countdown_text(&self) -> String {
        let total = self.remaining_seconds.max(0.0).trunc() as i64;
        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let seconds = total % 60;
        if hours > 0 {
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }

    fn enter(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
        route: &[usize],
    ) -> Result<Transition, EngineError> {
        self.remaining_seconds = self.unit.to_seconds(self.value) as f64;
        if self.value <= 0 {
            debug!("Sleep of {} {} is over before it starts", self.value, self.unit);
            return Ok(Transition::leave());
        }

        if self.disable_notification {
            self.pause_token = Some(pause.request(ctx.timers)?);
        }
        debug!("Starting countdown of {} {} for thread {:?}", self.value, self.unit, route);
        self.route = route.to_vec();
        ctx.countdown.start_countdown(self.value, self.unit, route)?;
        Ok(Transition::Stay)
    }

    fn release(&mut self, ctx: &mut ExecutionContext<'_>, pause: &mut PauseRequests) -> Result<(), ServiceError> {
        // still counting down only when the owning thread is being cancelled
        if self.is_running() {
            debug!("Stopping countdown of thread {:?}", self.route);
            ctx.countdown.cancel_countdown(&self.route)?;
            self.remaining_seconds = 0.0;
        }
        if let Some(token) = self.pause_token.take() {
            pause.release(token, ctx.timers)?;
        }
        Ok(())
    }
}

/// Variant-specific state of a [`Block`].
#[derive(Debug)]
pub enum BlockKind {
    Task,
    IfCondition(IfCondition),
    RepeatTimes(RepeatTimes),
    RepeatCondition(RepeatCondition),
    ParallelOr(ParallelOr),
    TimerSleep(TimerSleep),
}

/// One executable step of a workflow.
pub struct Block {
    id: Option<u32>,
    image: Option<String>,
    timer_config: Option<TimerConfig>,
    timer_handle: Option<TimerId>,
    on_leave: Vec<LeaveHook>,
    text: String,
    kind: BlockKind,
}

impl Block {
    fn with_kind(text: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: None,
            image: None,
            timer_config: None,
            timer_handle: None,
            on_leave: Vec::new(),
            text: text.into(),
            kind,
        }
    }

    pub fn task(text: impl Into<String>) -> Self {
        Self::with_kind(text, BlockKind::Task)
    }

    pub fn if_condition(
        condition: impl Into<String>,
        then_branch: Vec<BlockTemplate>,
        else_branch: Vec<BlockTemplate>,
    ) -> Self {
        Self::with_kind(
            condition,
            BlockKind::IfCondition(IfCondition {
                then_branch,
                else_branch,
            }),
        )
    }

    pub fn repeat_times(times: i64, body: Vec<BlockTemplate>) -> Self {
        Self::with_kind(
            "",
            BlockKind::RepeatTimes(RepeatTimes {
                remaining: times,
                entered: false,
                body,
            }),
        )
    }

    pub fn repeat_condition(condition: impl Into<String>, kind: LoopKind, body: Vec<BlockTemplate>) -> Self {
        Self::with_kind(condition, BlockKind::RepeatCondition(RepeatCondition { kind, body }))
    }

    pub fn parallel_or(text: impl Into<String>, branches: Vec<Vec<BlockTemplate>>, choose: usize) -> Self {
        Self::with_kind(text, BlockKind::ParallelOr(ParallelOr::new(branches, choose)))
    }

    pub fn timer_sleep(value: i64, unit: TimeUnit, text: impl Into<String>, disable_notification: bool) -> Self {
        Self::with_kind(
            text,
            BlockKind::TimerSleep(TimerSleep::new(value, unit, disable_notification)),
        )
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = Some(id);
    }

    pub fn set_image(&mut self, hash: impl Into<String>) {
        self.image = Some(hash.into());
    }

    pub fn set_timer(&mut self, timer: TimerConfig) {
        self.timer_config = Some(timer);
    }

    /// Registers a callback to run when this block leaves.
    pub fn add_on_leave<F>(&mut self, hook: F)
    where
        F: FnOnce(&mut ExecutionContext<'_>) -> Result<(), ServiceError> + 'static,
    {
        self.on_leave.push(Box::new(hook));
    }

    pub fn pending_leave_hooks(&self) -> usize {
        self.on_leave.len()
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn timer_config(&self) -> Option<TimerConfig> {
        self.timer_config
    }

    /// True while this block holds a registered reminder.
    pub fn has_active_timer(&self) -> bool {
        self.timer_handle.is_some()
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn block_type(&self) -> BlockType {
        match self.kind {
            BlockKind::Task => BlockType::Simple,
            BlockKind::IfCondition(_) | BlockKind::RepeatCondition(_) => BlockType::Conditional,
            BlockKind::RepeatTimes(_) => BlockType::Repeat,
            BlockKind::ParallelOr(_) => BlockType::Parallel,
            BlockKind::TimerSleep(_) => BlockType::Timer,
        }
    }

    /// Display text.
    pub fn text(&self) -> Cow<'_, str> {
        match &self.kind {
            BlockKind::RepeatTimes(repeat) => {
                let shown = if repeat.entered {
                    repeat.remaining + 1
                } else {
                    repeat.remaining
                };
                Cow::Owned(format!("{} more times...", shown))
            }
            _ => Cow::Borrowed(&self.text),
        }
    }

    /// Secondary line shown under the text: the countdown for sleeps.
    pub fn additional_text(&self) -> Option<String> {
        match &self.kind {
            BlockKind::TimerSleep(sleep) => Some(sleep.countdown_text()),
            _ => None,
        }
    }

    /// Configured sleep duration, e.g. `"5 m"`.
    pub fn start_time_text(&self) -> Option<String> {
        match &self.kind {
            BlockKind::TimerSleep(sleep) => Some(format!("{} {}", sleep.value, sleep.unit)),
            _ => None,
        }
    }

    pub fn is_condition(&self) -> bool {
        matches!(self.kind, BlockKind::IfCondition(_) | BlockKind::RepeatCondition(_))
    }

    pub fn is_timer_sleep(&self) -> bool {
        matches!(self.kind, BlockKind::TimerSleep(_))
    }

    pub fn is_timer_running(&self) -> bool {
        match &self.kind {
            BlockKind::TimerSleep(sleep) => sleep.is_running(),
            _ => false,
        }
    }

    pub fn parallel(&self) -> Option<&ParallelOr> {
        match &self.kind {
            BlockKind::ParallelOr(parallel) => Some(parallel),
            _ => None,
        }
    }

    pub(crate) fn parallel_mut(&mut self) -> Option<&mut ParallelOr> {
        match &mut self.kind {
            BlockKind::ParallelOr(parallel) => Some(parallel),
            _ => None,
        }
    }

    /// A new block sharing this one's metadata, taking over its reminder.
    fn successor(&mut self, kind: BlockKind) -> Block {
        Block {
            id: self.id,
            image: self.image.clone(),
            timer_config: self.timer_config,
            timer_handle: self.timer_handle.take(),
            on_leave: Vec::new(),
            text: self.text.clone(),
            kind,
        }
    }

    fn register_timer(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ServiceError> {
        if let (Some(timer), None) = (self.timer_config, self.timer_handle) {
            let id = ctx.timers.add_timer(&self.text(), timer.interval, timer.unit)?;
            debug!("Registered reminder {:?} for '{}'", id, self.text());
            self.timer_handle = Some(id);
        }
        Ok(())
    }

    fn unregister_timer(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ServiceError> {
        if let Some(id) = self.timer_handle.take() {
            debug!("Removing reminder {:?} of '{}'", id, self.text());
            ctx.timers.remove_timer(id)?;
        }
        Ok(())
    }

    pub(crate) fn enter(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
        route: &[usize],
    ) -> Result<Transition, EngineError> {
        debug!("Entering {:?} block '{}'", self.block_type(), self.text());
        self.register_timer(ctx)?;

        if matches!(self.kind, BlockKind::RepeatTimes(_)) {
            return Ok(self.enter_repeat_times(ctx));
        }
        match &mut self.kind {
            BlockKind::ParallelOr(parallel) => parallel.enter(ctx, pause, route),
            BlockKind::TimerSleep(sleep) => sleep.enter(ctx, pause, route),
            _ => Ok(Transition::Stay),
        }
    }

    fn enter_repeat_times(&mut self, ctx: &mut ExecutionContext<'_>) -> Transition {
        let BlockKind::RepeatTimes(repeat) = &mut self.kind else {
            return Transition::Stay;
        };
        repeat.entered = true;
        if repeat.remaining <= 0 {
            debug!("Repeat finished");
            return Transition::leave();
        }

        let next = RepeatTimes {
            remaining: repeat.remaining - 1,
            entered: true,
            body: repeat.body.clone(),
        };
        let mut blocks = build_blocks(&next.body, ctx.factory);
        debug!("Repeating body of {} blocks, {} more after this", blocks.len(), next.remaining);
        blocks.push(self.successor(BlockKind::RepeatTimes(next)));
        Transition::Leave(blocks)
    }

    /// Reacts to a host event while this block is current.
    pub(crate) fn handle(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        event: Event,
    ) -> Result<Transition, EngineError> {
        let transition = match event {
            Event::Done if matches!(self.kind, BlockKind::Task) => {
                debug!("Task '{}' done", self.text);
                Transition::leave()
            }
            Event::SelectYes | Event::SelectNo if matches!(self.kind, BlockKind::IfCondition(_)) => {
                self.take_branch(ctx, event == Event::SelectYes)
            }
            Event::SelectYes | Event::SelectNo if matches!(self.kind, BlockKind::RepeatCondition(_)) => {
                self.answer_loop(ctx, event == Event::SelectYes)
            }
            Event::CountdownTick(remaining) if self.is_timer_sleep() => {
                if let BlockKind::TimerSleep(sleep) = &mut self.kind {
                    sleep.remaining_seconds = remaining;
                }
                Transition::Stay
            }
            Event::CountdownElapsed | Event::ForceFinish if self.is_timer_sleep() => {
                if event == Event::ForceFinish {
                    ctx.countdown.force_finish()?;
                }
                if let BlockKind::TimerSleep(sleep) = &mut self.kind {
                    sleep.remaining_seconds = 0.0;
                }
                debug!("Sleep '{}' over ({:?})", self.text, event);
                Transition::leave()
            }
            _ => {
                warn!(
                    "Ignoring {:?} for {:?} block '{}'",
                    event,
                    self.block_type(),
                    self.text()
                );
                Transition::Stay
            }
        };
        Ok(transition)
    }

    fn take_branch(&mut self, ctx: &mut ExecutionContext<'_>, yes: bool) -> Transition {
        let BlockKind::IfCondition(condition) = &self.kind else {
            return Transition::Stay;
        };
        let templates = if yes {
            &condition.then_branch
        } else {
            &condition.else_branch
        };
        let mut blocks = build_blocks(templates, ctx.factory);
        debug!(
            "Condition '{}' answered {}, splicing {} blocks",
            self.text,
            if yes { "yes" } else { "no" },
            blocks.len()
        );

        // the reminder keeps running until the chosen branch is over
        if let Some(last) = blocks.last_mut() {
            if let Some(id) = self.timer_handle.take() {
                last.add_on_leave(move |ctx| ctx.timers.remove_timer(id));
            }
        }
        Transition::Leave(blocks)
    }

    fn answer_loop(&mut self, ctx: &mut ExecutionContext<'_>, yes: bool) -> Transition {
        let BlockKind::RepeatCondition(repeat) = &self.kind else {
            return Transition::Stay;
        };
        if !repeat.kind.continues_on(yes) {
            debug!("Leaving {:?} loop '{}'", repeat.kind, self.text);
            return Transition::leave();
        }

        let again = repeat.clone();
        let mut blocks = build_blocks(&again.body, ctx.factory);
        debug!("Continuing {:?} loop '{}' with {} blocks", again.kind, self.text, blocks.len());
        blocks.push(self.successor(BlockKind::RepeatCondition(again)));
        Transition::Leave(blocks)
    }

    /// Leave path shared by every variant: variant cleanup, reminder removal,
    /// then the leave hooks in reverse registration order.
    pub(crate) fn leave(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
    ) -> Result<(), EngineError> {
        debug!("Leaving {:?} block '{}'", self.block_type(), self.text());
        match &mut self.kind {
            BlockKind::RepeatTimes(repeat) => repeat.remaining -= 1,
            BlockKind::TimerSleep(sleep) => sleep.release(ctx, pause)?,
            BlockKind::ParallelOr(parallel) => parallel.cancel_threads(ctx, pause)?,
            BlockKind::Task | BlockKind::IfCondition(_) | BlockKind::RepeatCondition(_) => {}
        }
        self.unregister_timer(ctx)?;
        self.run_leave_hooks(ctx)?;
        Ok(())
    }

    /// Releases what a block that will never be entered still holds: a
    /// reminder taken over from a loop, or hooks attached by a condition.
    pub(crate) fn discard(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ServiceError> {
        self.unregister_timer(ctx)?;
        self.run_leave_hooks(ctx)
    }

    fn run_leave_hooks(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ServiceError> {
        while let Some(hook) = self.on_leave.pop() {
            hook(&mut *ctx)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("text", &self.text())
            .field("image", &self.image)
            .field("timer_config", &self.timer_config)
            .field("timer_handle", &self.timer_handle)
            .field("on_leave", &self.on_leave.len())
            .field("kind", &self.kind)
            .finish()
    }
}
