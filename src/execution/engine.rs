//! Workflow Execution Engine
//!
//! An [`Execution`] interprets one sequence of blocks. It keeps a cursor on the
//! current block, feeds it host events, splices the blocks a departing block
//! produces right after it, and moves on. Parallel threads are executions too,
//! owned by the parallel block that started them.
//!
//! # Example
//!
//! ```rust
//! use flowrunner::execution::{DefaultBlockFactory, ExecutionContext};
//! use flowrunner::host::{ManualCountdown, ManualTimerService};
//! use flowrunner::workflow::{BlockTemplate, WorkflowDefinition};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = WorkflowDefinition::new("Tea")
//!         .with_block(BlockTemplate::task("Boil water"))
//!         .with_block(BlockTemplate::task("Pour"));
//!
//!     let factory = DefaultBlockFactory;
//!     let mut timers = ManualTimerService::new();
//!     let mut countdown = ManualCountdown::new();
//!     let mut ctx = ExecutionContext::new(&mut timers, &mut countdown, &factory);
//!
//!     let mut execution = workflow.build(&factory);
//!     execution.start(&mut ctx)?;
//!     execution.done(&mut ctx)?;
//!     execution.done(&mut ctx)?;
//!     assert!(execution.is_finished());
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::mem;

use log::{debug, info, warn};

use crate::error::EngineError;
use crate::workflow::TimerConfig;

use super::block::{Block, Event, Transition};
use super::timer::{ExecutionContext, PauseRequests, PauseToken, TimerId};

type BlockListener = Box<dyn FnMut(usize, &Block)>;
type FinishListener = Box<dyn FnMut()>;

#[derive(Default)]
struct Listeners {
    on_leave: Vec<BlockListener>,
    on_entered: Vec<BlockListener>,
    on_finish: Vec<FinishListener>,
}

/// A running sequence of blocks.
pub struct Execution {
    blocks: Vec<Block>,
    cursor: usize,
    started: bool,
    finished: bool,
    cancelled: bool,
    description: Option<String>,
    periodic_timer: Option<TimerConfig>,
    timer_handle: Option<TimerId>,
    /// Pause requests of the whole tree; only the root's set is used
    pause: PauseRequests,
    address: Vec<usize>,
    listeners: Listeners,
}

impl Default for Execution {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl Execution {
    /// Creates an empty execution. With both a description and a timer, a
    /// reminder labelled with the description runs from start to finish.
    pub fn new(description: Option<String>, periodic_timer: Option<TimerConfig>) -> Self {
        Self {
            blocks: Vec::new(),
            cursor: 0,
            started: false,
            finished: false,
            cancelled: false,
            description,
            periodic_timer,
            timer_handle: None,
            pause: PauseRequests::new(),
            address: Vec::new(),
            listeners: Listeners::default(),
        }
    }

    pub fn push_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Inserts `blocks` directly after the current block, keeping their order.
    pub fn splice_after_cursor(&mut self, blocks: Vec<Block>) {
        if blocks.is_empty() {
            return;
        }
        let at = (self.cursor + 1).min(self.blocks.len());
        debug!("Splicing {} blocks at {}", blocks.len(), at);
        self.blocks.splice(at..at, blocks);
    }

    pub(crate) fn set_address(&mut self, address: Vec<usize>) {
        self.address = address;
    }

    /// Thread path of this execution from the root; empty for the root.
    pub fn address(&self) -> &[usize] {
        &self.address
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn periodic_timer(&self) -> Option<TimerConfig> {
        self.periodic_timer
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn current_index(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&Block> {
        self.blocks.get(self.cursor)
    }

    pub fn previous(&self) -> Option<&Block> {
        self.cursor.checked_sub(1).and_then(|i| self.blocks.get(i))
    }

    pub fn next(&self) -> Option<&Block> {
        self.blocks.get(self.cursor + 1)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Started and neither finished nor cancelled.
    pub fn is_running(&self) -> bool {
        self.started && !self.finished && !self.cancelled
    }

    pub fn is_timer_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Looks up a nested thread by its path of branch indices.
    ///
    /// Each step descends into the parallel block that is current at that
    /// level. An empty path returns `self`.
    pub fn thread(&self, path: &[usize]) -> Option<&Execution> {
        let Some((&branch, rest)) = path.split_first() else {
            return Some(self);
        };
        self.current()?.parallel()?.thread(branch)?.thread(rest)
    }

    /// Called with the block index every time a block has left.
    pub fn add_on_leave_listener(&mut self, listener: impl FnMut(usize, &Block) + 'static) {
        self.listeners.on_leave.push(Box::new(listener));
    }

    /// Called with the block index every time a block has been entered.
    pub fn add_on_entered_listener(&mut self, listener: impl FnMut(usize, &Block) + 'static) {
        self.listeners.on_entered.push(Box::new(listener));
    }

    /// Called once, when the execution runs past its last block.
    pub fn add_finish_listener(&mut self, listener: impl FnMut() + 'static) {
        self.listeners.on_finish.push(Box::new(listener));
    }

    fn with_pause<T>(&mut self, f: impl FnOnce(&mut Self, &mut PauseRequests) -> T) -> T {
        let mut pause = mem::take(&mut self.pause);
        let result = f(self, &mut pause);
        self.pause = pause;
        result
    }

    /// Starts the execution at its first block.
    ///
    /// Fails with [`EngineError::AlreadyStarted`] if called twice.
    pub fn start(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        self.with_pause(|execution, pause| execution.start_thread(ctx, pause))
    }

    pub(crate) fn start_thread(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
    ) -> Result<(), EngineError> {
        self.started = true;
        info!(
            "Starting execution '{}' with {} blocks",
            self.description.as_deref().unwrap_or_default(),
            self.blocks.len()
        );

        if let (Some(timer), Some(description)) = (self.periodic_timer, self.description.as_deref()) {
            self.timer_handle = Some(ctx.timers.add_timer(description, timer.interval, timer.unit)?);
        }

        let transition = self.enter_current(ctx, pause)?;
        self.apply(ctx, pause, transition)
    }

    /// Delivers `event` to the block addressed by `path`.
    ///
    /// An empty path targets this execution's current block; otherwise each
    /// index selects a thread of the parallel block current at that level.
    /// Events for executions that are not running, or for threads that no
    /// longer exist, are logged and ignored.
    pub fn dispatch(&mut self, ctx: &mut ExecutionContext<'_>, path: &[usize], event: Event) -> Result<(), EngineError> {
        self.with_pause(|execution, pause| execution.dispatch_with(ctx, pause, path, event))
    }

    pub(crate) fn dispatch_with(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
        path: &[usize],
        event: Event,
    ) -> Result<(), EngineError> {
        if !self.is_running() {
            warn!("Ignoring {:?}: execution is not running", event);
            return Ok(());
        }
        let Some(block) = self.blocks.get_mut(self.cursor) else {
            warn!("Ignoring {:?}: no current block", event);
            return Ok(());
        };

        let transition = match path.split_first() {
            None => block.handle(ctx, event)?,
            Some((&branch, rest)) => match block.parallel_mut() {
                Some(parallel) => parallel.dispatch(ctx, pause, branch, rest, event)?,
                None => {
                    warn!(
                        "Ignoring {:?} for thread {}: current block '{}' is not parallel",
                        event,
                        branch,
                        block.text()
                    );
                    Transition::Stay
                }
            },
        };
        self.apply(ctx, pause, transition)
    }

    pub fn done(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        self.dispatch(ctx, &[], Event::Done)
    }

    pub fn select_yes(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        self.dispatch(ctx, &[], Event::SelectYes)
    }

    pub fn select_no(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        self.dispatch(ctx, &[], Event::SelectNo)
    }

    pub fn force_finish(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        self.dispatch(ctx, &[], Event::ForceFinish)
    }

    pub fn countdown_tick(&mut self, ctx: &mut ExecutionContext<'_>, route: &[usize], remaining: f64) -> Result<(), EngineError> {
        self.dispatch(ctx, route, Event::CountdownTick(remaining))
    }

    pub fn countdown_elapsed(&mut self, ctx: &mut ExecutionContext<'_>, route: &[usize]) -> Result<(), EngineError> {
        self.dispatch(ctx, route, Event::CountdownElapsed)
    }

    /// Pauses reminder notifications until the returned token is released.
    pub fn request_timer_pause(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<PauseToken, EngineError> {
        Ok(self.pause.request(ctx.timers)?)
    }

    pub fn release_timer_pause(&mut self, ctx: &mut ExecutionContext<'_>, token: PauseToken) -> Result<(), EngineError> {
        Ok(self.pause.release(token, ctx.timers)?)
    }

    fn apply(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
        mut transition: Transition,
    ) -> Result<(), EngineError> {
        while let Transition::Leave(blocks) = transition {
            self.splice_after_cursor(blocks);
            transition = self.leave_current(ctx, pause)?;
        }
        Ok(())
    }

    fn leave_current(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
    ) -> Result<Transition, EngineError> {
        let Some(block) = self.blocks.get_mut(self.cursor) else {
            warn!("Leave requested without a current block");
            return Ok(Transition::Stay);
        };
        block.leave(ctx, pause)?;
        self.advance_after_leave(ctx, pause)
    }

    /// Moves past the block that just left: notify, step the cursor, then
    /// enter the next block or finish.
    fn advance_after_leave(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
    ) -> Result<Transition, EngineError> {
        let index = self.cursor;
        let Some(left) = self.blocks.get(index) else {
            warn!("Advance requested without a current block");
            return Ok(Transition::Stay);
        };
        for listener in &mut self.listeners.on_leave {
            listener(index, left);
        }
        self.cursor += 1;
        self.enter_current(ctx, pause)
    }

    fn enter_current(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
    ) -> Result<Transition, EngineError> {
        let index = self.cursor;
        let Some(block) = self.blocks.get_mut(index) else {
            self.finish(ctx)?;
            return Ok(Transition::Stay);
        };

        let transition = block.enter(ctx, pause, &self.address)?;
        for listener in &mut self.listeners.on_entered {
            listener(index, &*block);
        }
        Ok(transition)
    }

    fn finish(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if let Some(id) = self.timer_handle.take() {
            ctx.timers.remove_timer(id)?;
        }
        info!(
            "Execution '{}' finished",
            self.description.as_deref().unwrap_or_default()
        );
        for listener in &mut self.listeners.on_finish {
            listener();
        }
        Ok(())
    }

    /// Stops a running thread: its current block leaves, but nothing further
    /// is entered and the finish listeners never fire. Blocks still ahead of
    /// the cursor give back the reminders they carry.
    pub(crate) fn cancel(&mut self, ctx: &mut ExecutionContext<'_>, pause: &mut PauseRequests) -> Result<(), EngineError> {
        if !self.is_running() {
            return Ok(());
        }
        self.cancelled = true;

        let index = self.cursor;
        if let Some(block) = self.blocks.get_mut(index) {
            debug!("Cancelling at block {} '{}'", index, block.text());
            block.leave(ctx, pause)?;
            for listener in &mut self.listeners.on_leave {
                listener(index, &self.blocks[index]);
            }
            self.cursor += 1;
        }
        for block in self.blocks.iter_mut().skip(self.cursor) {
            block.discard(ctx)?;
        }
        if let Some(id) = self.timer_handle.take() {
            ctx.timers.remove_timer(id)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("description", &self.description)
            .field("address", &self.address)
            .field("cursor", &self.cursor)
            .field("started", &self.started)
            .field("finished", &self.finished)
            .field("cancelled", &self.cancelled)
            .field("timer_handle", &self.timer_handle)
            .field("blocks", &self.blocks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::error::ServiceError;
    use crate::execution::{BlockType, DefaultBlockFactory};
    use crate::host::{ManualCountdown, ManualTimerService};
    use crate::workflow::{BlockTemplate, LoopKind, TimeUnit, TimerConfig, WorkflowDefinition};

    struct Harness {
        timers: ManualTimerService,
        countdown: ManualCountdown,
        factory: DefaultBlockFactory,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                timers: ManualTimerService::new(),
                countdown: ManualCountdown::new(),
                factory: DefaultBlockFactory,
            }
        }

        fn ctx(&mut self) -> ExecutionContext<'_> {
            ExecutionContext::new(&mut self.timers, &mut self.countdown, &self.factory)
        }
    }

    fn build(blocks: Vec<BlockTemplate>) -> Execution {
        let mut definition = WorkflowDefinition::new("test");
        definition.blocks = blocks;
        definition.build(&DefaultBlockFactory)
    }

    fn current_text(execution: &Execution) -> Option<String> {
        execution.current().map(|b| b.text().into_owned())
    }

    fn record_entered(execution: &mut Execution) -> Rc<RefCell<Vec<String>>> {
        let entered = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&entered);
        execution.add_on_entered_listener(move |_, block| sink.borrow_mut().push(block.text().into_owned()));
        entered
    }

    #[test]
    fn test_sequential_tasks_need_one_done_each() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::task("a"),
            BlockTemplate::task("b"),
            BlockTemplate::task("c"),
        ]);
        let finished = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&finished);
        execution.add_finish_listener(move || *counter.borrow_mut() += 1);

        execution.start(&mut h.ctx()).unwrap();
        for expected in ["a", "b", "c"] {
            assert_eq!(current_text(&execution).as_deref(), Some(expected));
            assert!(!execution.is_finished());
            execution.done(&mut h.ctx()).unwrap();
        }

        assert!(execution.is_finished());
        assert_eq!(*finished.borrow(), 1);

        // events after the end change nothing
        execution.done(&mut h.ctx()).unwrap();
        assert_eq!(*finished.borrow(), 1);
    }

    #[test]
    fn test_empty_execution_finishes_on_start() {
        let mut h = Harness::new();
        let mut execution = build(vec![]);
        execution.start(&mut h.ctx()).unwrap();
        assert!(execution.is_finished());
    }

    #[test]
    fn test_start_twice_fails() {
        let mut h = Harness::new();
        let mut execution = build(vec![BlockTemplate::task("a")]);
        execution.start(&mut h.ctx()).unwrap();
        assert_eq!(execution.start(&mut h.ctx()), Err(EngineError::AlreadyStarted));
        assert_eq!(current_text(&execution).as_deref(), Some("a"));
    }

    #[test]
    fn test_events_before_start_are_ignored() {
        let mut h = Harness::new();
        let mut execution = build(vec![BlockTemplate::task("a")]);
        execution.done(&mut h.ctx()).unwrap();
        assert_eq!(execution.current_index(), 0);
        assert!(!execution.is_started());
    }

    #[test]
    fn test_splice_lands_right_after_cursor() {
        let mut execution = build(vec![BlockTemplate::task("a"), BlockTemplate::task("b")]);
        execution.splice_after_cursor(vec![Block::task("x"), Block::task("y")]);

        let texts: Vec<String> = execution.blocks().iter().map(|b| b.text().into_owned()).collect();
        assert_eq!(texts, vec!["a", "x", "y", "b"]);
    }

    #[test]
    fn test_splice_mid_run_keeps_earlier_blocks() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::task("a"),
            BlockTemplate::task("b"),
            BlockTemplate::task("c"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        assert_eq!(execution.current_index(), 1);

        execution.splice_after_cursor(vec![Block::task("x")]);

        let texts: Vec<String> = execution.blocks().iter().map(|b| b.text().into_owned()).collect();
        assert_eq!(texts, vec!["a", "b", "x", "c"]);
        assert_eq!(execution.current_index(), 1);
        assert_eq!(current_text(&execution).as_deref(), Some("b"));

        execution.done(&mut h.ctx()).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("x"));
    }

    #[test]
    fn test_if_yes_runs_then_branch() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::if_condition(
                "Raining?",
                vec![BlockTemplate::task("Umbrella"), BlockTemplate::task("Boots")],
                vec![BlockTemplate::task("Sunglasses")],
            ),
            BlockTemplate::task("Leave"),
        ]);
        let entered = record_entered(&mut execution);

        execution.start(&mut h.ctx()).unwrap();
        execution.select_yes(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();

        assert!(execution.is_finished());
        assert_eq!(*entered.borrow(), vec!["Raining?", "Umbrella", "Boots", "Leave"]);
    }

    #[test]
    fn test_if_no_with_empty_else_skips_ahead() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::if_condition("Raining?", vec![BlockTemplate::task("Umbrella")], vec![]),
            BlockTemplate::task("Leave"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        execution.select_no(&mut h.ctx()).unwrap();

        assert_eq!(current_text(&execution).as_deref(), Some("Leave"));
        assert_eq!(execution.len(), 2);
    }

    #[test]
    fn test_if_reminder_lives_until_branch_ends() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::if_condition(
                "Hungry?",
                vec![BlockTemplate::task("Cook"), BlockTemplate::task("Eat")],
                vec![],
            )
            .with_timer(TimerConfig::new(5, TimeUnit::Minutes)),
            BlockTemplate::task("Wash up"),
        ]);

        execution.start(&mut h.ctx()).unwrap();
        assert_eq!(h.timers.active_count(), 1);

        execution.select_yes(&mut h.ctx()).unwrap();
        assert_eq!(h.timers.active_count(), 1);
        execution.done(&mut h.ctx()).unwrap();
        assert_eq!(h.timers.active_count(), 1);
        execution.done(&mut h.ctx()).unwrap();

        assert_eq!(current_text(&execution).as_deref(), Some("Wash up"));
        assert_eq!(h.timers.active_count(), 0);
        assert_eq!(h.timers.added_count(), h.timers.removed_count());
    }

    #[test]
    fn test_if_empty_branch_drops_reminder() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::if_condition("Hungry?", vec![], vec![])
                .with_timer(TimerConfig::new(5, TimeUnit::Minutes)),
            BlockTemplate::task("Rest"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        execution.select_yes(&mut h.ctx()).unwrap();

        assert_eq!(h.timers.active_count(), 0);
        assert_eq!(h.timers.removed_count(), 1);
    }

    #[test]
    fn test_repeat_times_needs_exact_number_of_dones() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::repeat_times(3, vec![BlockTemplate::task("Push-up")]),
            BlockTemplate::task("Stretch"),
        ]);
        execution.start(&mut h.ctx()).unwrap();

        for _ in 0..3 {
            assert_eq!(current_text(&execution).as_deref(), Some("Push-up"));
            execution.done(&mut h.ctx()).unwrap();
        }
        assert_eq!(current_text(&execution).as_deref(), Some("Stretch"));
        execution.done(&mut h.ctx()).unwrap();
        assert!(execution.is_finished());
    }

    #[test]
    fn test_repeat_times_text_counts_down() {
        let mut h = Harness::new();
        let mut execution = build(vec![BlockTemplate::repeat_times(
            2,
            vec![BlockTemplate::task("Lap")],
        )]);
        assert_eq!(execution.get(0).map(|b| b.text().into_owned()).as_deref(), Some("2 more times..."));

        execution.start(&mut h.ctx()).unwrap();
        // [repeat, Lap, repeat copy]
        assert_eq!(execution.next().map(|b| b.text().into_owned()).as_deref(), Some("2 more times..."));

        execution.done(&mut h.ctx()).unwrap();
        assert_eq!(execution.next().map(|b| b.text().into_owned()).as_deref(), Some("1 more times..."));
    }

    #[test]
    fn test_repeat_times_zero_skips_body() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::repeat_times(0, vec![BlockTemplate::task("never")]),
            BlockTemplate::task("after"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("after"));
    }

    #[test]
    fn test_repeat_times_keeps_one_reminder() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::repeat_times(2, vec![BlockTemplate::task("Lap")])
                .with_timer(TimerConfig::new(1, TimeUnit::Minutes)),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        assert_eq!(h.timers.added_count(), 1);
        assert_eq!(h.timers.active_count(), 1);

        execution.done(&mut h.ctx()).unwrap();
        assert!(execution.is_finished());
        assert_eq!(h.timers.added_count(), 1);
        assert_eq!(h.timers.active_count(), 0);
    }

    #[test]
    fn test_while_loop_runs_until_no() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::repeat_condition("Still dirty?", LoopKind::While, vec![BlockTemplate::task("Scrub")]),
            BlockTemplate::task("Dry"),
        ]);
        let entered = record_entered(&mut execution);

        execution.start(&mut h.ctx()).unwrap();
        execution.select_yes(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        execution.select_yes(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        execution.select_no(&mut h.ctx()).unwrap();

        assert_eq!(current_text(&execution).as_deref(), Some("Dry"));
        assert_eq!(
            *entered.borrow(),
            vec!["Still dirty?", "Scrub", "Still dirty?", "Scrub", "Still dirty?", "Dry"]
        );
    }

    #[test]
    fn test_until_loop_exits_on_yes() {
        let mut h = Harness::new();
        let mut execution = build(vec![BlockTemplate::repeat_condition(
            "Clean?",
            LoopKind::Until,
            vec![BlockTemplate::task("Scrub")],
        )]);
        execution.start(&mut h.ctx()).unwrap();
        execution.select_no(&mut h.ctx()).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Scrub"));
        execution.done(&mut h.ctx()).unwrap();
        execution.select_yes(&mut h.ctx()).unwrap();
        assert!(execution.is_finished());
    }

    #[test]
    fn test_parallel_or_choose_two_of_three() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::parallel_or(
                "Chores",
                2,
                vec![
                    vec![BlockTemplate::task("Dishes")],
                    vec![BlockTemplate::task("Laundry")],
                    vec![BlockTemplate::task("Vacuum"), BlockTemplate::task("Mop")],
                ],
            ),
            BlockTemplate::task("Relax"),
        ]);
        let parallel_leaves = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&parallel_leaves);
        execution.add_on_leave_listener(move |_, block| {
            if block.block_type() == BlockType::Parallel {
                *counter.borrow_mut() += 1;
            }
        });
        execution.start(&mut h.ctx()).unwrap();

        let parallel = execution.current().and_then(Block::parallel).unwrap();
        assert_eq!(parallel.tasks_remaining(), 3);
        assert_eq!(parallel.tasks_todo(), 2);

        execution.dispatch(&mut h.ctx(), &[1], Event::Done).unwrap();
        let parallel = execution.current().and_then(Block::parallel).unwrap();
        assert_eq!(parallel.tasks_remaining(), 2);
        assert_eq!(parallel.tasks_todo(), 1);
        assert!(execution.thread(&[1]).is_none());
        assert!(execution.thread(&[2]).is_some());

        execution.dispatch(&mut h.ctx(), &[2], Event::Done).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Chores"));

        execution.dispatch(&mut h.ctx(), &[0], Event::Done).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Relax"));
        assert_eq!(*parallel_leaves.borrow(), 1);
        assert!(!execution.is_finished());
    }

    #[test]
    fn test_parallel_or_cancels_losing_threads() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::parallel_or(
                "Pick one",
                1,
                vec![
                    vec![BlockTemplate::task("Walk")],
                    vec![BlockTemplate::task("Read")
                        .with_timer(TimerConfig::new(10, TimeUnit::Minutes))],
                ],
            ),
            BlockTemplate::task("Sleep"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        assert_eq!(h.timers.active_count(), 1);

        execution.dispatch(&mut h.ctx(), &[0], Event::Done).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Sleep"));
        assert_eq!(h.timers.active_count(), 0);

        // late event for the cancelled thread
        execution.dispatch(&mut h.ctx(), &[1], Event::Done).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Sleep"));
    }

    #[test]
    fn test_parallel_or_choose_zero_waits_for_every_thread() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::parallel_or(
                "All of them",
                0,
                vec![vec![BlockTemplate::task("a")], vec![BlockTemplate::task("b")]],
            ),
            BlockTemplate::task("Next"),
        ]);
        execution.start(&mut h.ctx()).unwrap();

        execution.dispatch(&mut h.ctx(), &[0], Event::Done).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("All of them"));
        assert_eq!(execution.current().and_then(Block::parallel).map(|p| p.tasks_remaining()), Some(1));

        execution.dispatch(&mut h.ctx(), &[1], Event::Done).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Next"));
    }

    #[test]
    fn test_cancelled_thread_releases_if_branch_reminder() {
        let mut h = Harness::new();
        let mut execution = build(vec![BlockTemplate::parallel_or(
            "Either",
            1,
            vec![
                vec![BlockTemplate::task("Win")],
                vec![BlockTemplate::if_condition(
                    "Long way?",
                    vec![BlockTemplate::task("A"), BlockTemplate::task("B")],
                    vec![],
                )
                .with_timer(TimerConfig::new(1, TimeUnit::Minutes))],
            ],
        )]);
        execution.start(&mut h.ctx()).unwrap();
        execution.dispatch(&mut h.ctx(), &[1], Event::SelectYes).unwrap();
        assert_eq!(h.timers.active_count(), 1);

        execution.dispatch(&mut h.ctx(), &[0], Event::Done).unwrap();

        assert!(execution.is_finished());
        assert_eq!(h.timers.active_count(), 0);
        assert_eq!(h.timers.added_count(), h.timers.removed_count());
        assert_eq!(h.timers.unknown_removals(), 0);
    }

    #[test]
    fn test_cancelled_thread_releases_repeat_reminder() {
        let mut h = Harness::new();
        let mut execution = build(vec![BlockTemplate::parallel_or(
            "Either",
            1,
            vec![
                vec![BlockTemplate::task("Win")],
                vec![BlockTemplate::repeat_times(2, vec![BlockTemplate::task("Lap")])
                    .with_timer(TimerConfig::new(1, TimeUnit::Minutes))],
            ],
        )]);
        execution.start(&mut h.ctx()).unwrap();
        assert_eq!(h.timers.active_count(), 1);

        execution.dispatch(&mut h.ctx(), &[0], Event::Done).unwrap();

        assert!(execution.is_finished());
        assert_eq!(h.timers.active_count(), 0);
        assert_eq!(h.timers.added_count(), h.timers.removed_count());
        assert_eq!(h.timers.unknown_removals(), 0);
    }

    #[test]
    fn test_parallel_or_without_branches_leaves_on_entry() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::parallel_or("Nothing", 1, vec![]),
            BlockTemplate::task("Next"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Next"));
    }

    #[test]
    fn test_parallel_or_empty_branch_completes_immediately() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::parallel_or("Either", 1, vec![vec![], vec![BlockTemplate::task("Work")]]),
            BlockTemplate::task("Next"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Next"));
    }

    #[test]
    fn test_nested_parallel_addressing() {
        let mut h = Harness::new();
        let inner = BlockTemplate::parallel_or(
            "Inner",
            1,
            vec![vec![BlockTemplate::task("x")], vec![BlockTemplate::task("y")]],
        );
        let mut execution = build(vec![
            BlockTemplate::parallel_or("Outer", 1, vec![vec![inner], vec![BlockTemplate::task("z")]]),
            BlockTemplate::task("End"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        assert_eq!(
            execution.thread(&[0, 1]).map(|t| t.address().to_vec()),
            Some(vec![0, 1])
        );

        execution.dispatch(&mut h.ctx(), &[0, 1], Event::Done).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("End"));
    }

    #[test]
    fn test_thread_path_on_non_parallel_is_ignored() {
        let mut h = Harness::new();
        let mut execution = build(vec![BlockTemplate::task("a")]);
        execution.start(&mut h.ctx()).unwrap();
        execution.dispatch(&mut h.ctx(), &[0], Event::Done).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("a"));
    }

    #[test]
    fn test_timer_sleep_zero_is_skipped() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::timer_sleep(0, TimeUnit::Minutes, "Nap", true),
            BlockTemplate::task("Wake"),
        ]);
        execution.start(&mut h.ctx()).unwrap();

        assert_eq!(current_text(&execution).as_deref(), Some("Wake"));
        assert_eq!(h.countdown.started_count(), 0);
        assert!(h.timers.pause_changes().is_empty());
    }

    #[test]
    fn test_timer_sleep_pauses_reminders_while_sleeping() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::timer_sleep(2, TimeUnit::Minutes, "Steep", true),
            BlockTemplate::task("Drink"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        assert!(h.timers.is_paused());
        assert_eq!(h.countdown.running().map(|c| c.seconds), Some(120));

        execution.countdown_tick(&mut h.ctx(), &[], 65.0).unwrap();
        assert_eq!(
            execution.current().and_then(Block::additional_text).as_deref(),
            Some("01:05")
        );

        execution.countdown_elapsed(&mut h.ctx(), &[]).unwrap();
        assert!(!h.timers.is_paused());
        assert_eq!(current_text(&execution).as_deref(), Some("Drink"));
    }

    #[test]
    fn test_force_finish_ends_sleep() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::timer_sleep(10, TimeUnit::Seconds, "Wait", false),
            BlockTemplate::task("Go"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        assert!(execution.current().map(Block::is_timer_running).unwrap_or(false));

        execution.force_finish(&mut h.ctx()).unwrap();
        assert_eq!(h.countdown.forced_count(), 1);
        assert!(h.countdown.running().is_none());
        assert_eq!(current_text(&execution).as_deref(), Some("Go"));
        assert!(!h.timers.is_paused());
    }

    #[test]
    fn test_done_does_not_end_sleep() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::timer_sleep(10, TimeUnit::Seconds, "Wait", false),
            BlockTemplate::task("Go"),
        ]);
        execution.start(&mut h.ctx()).unwrap();

        execution.done(&mut h.ctx()).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Wait"));
        assert_eq!(h.countdown.running().map(|c| c.seconds), Some(10));

        execution.countdown_elapsed(&mut h.ctx(), &[]).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Go"));
    }

    #[test]
    fn test_stale_countdown_event_is_ignored() {
        let mut h = Harness::new();
        let mut execution = build(vec![BlockTemplate::task("a"), BlockTemplate::task("b")]);
        execution.start(&mut h.ctx()).unwrap();
        execution.countdown_elapsed(&mut h.ctx(), &[]).unwrap();
        execution.countdown_tick(&mut h.ctx(), &[], 3.0).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("a"));
    }

    #[test]
    fn test_pause_shared_between_host_and_sleep() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::timer_sleep(1, TimeUnit::Minutes, "Sleep", true),
            BlockTemplate::task("Up"),
        ]);
        let host_token = execution.request_timer_pause(&mut h.ctx()).unwrap();
        execution.start(&mut h.ctx()).unwrap();

        execution.countdown_elapsed(&mut h.ctx(), &[]).unwrap();
        assert!(h.timers.is_paused());
        assert!(execution.is_timer_paused());

        execution.release_timer_pause(&mut h.ctx(), host_token).unwrap();
        assert!(!h.timers.is_paused());
        assert_eq!(h.timers.pause_changes(), &[true, false]);
    }

    #[test]
    fn test_sleep_in_thread_routes_countdown() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::parallel_or(
                "Either",
                1,
                vec![
                    vec![BlockTemplate::task("Call")],
                    vec![BlockTemplate::timer_sleep(30, TimeUnit::Seconds, "Hold", true)],
                ],
            ),
            BlockTemplate::task("Next"),
        ]);
        execution.start(&mut h.ctx()).unwrap();
        assert_eq!(h.countdown.running().map(|c| c.route.clone()), Some(vec![1]));
        assert!(h.timers.is_paused());

        // the other thread wins; the sleeping thread is cancelled
        execution.dispatch(&mut h.ctx(), &[0], Event::Done).unwrap();
        assert_eq!(current_text(&execution).as_deref(), Some("Next"));
        assert!(!h.timers.is_paused());
        assert!(h.countdown.running().is_none());
    }

    #[test]
    fn test_execution_reminder_spans_run() {
        let mut h = Harness::new();
        let definition = WorkflowDefinition::new("Workout")
            .with_timer(TimerConfig::new(10, TimeUnit::Minutes))
            .with_block(BlockTemplate::task("Run"));
        let mut execution = definition.build(&h.factory);

        execution.start(&mut h.ctx()).unwrap();
        assert_eq!(h.timers.active_labels(), vec!["Workout".to_string()]);
        execution.done(&mut h.ctx()).unwrap();
        assert_eq!(h.timers.active_count(), 0);
    }

    #[test]
    fn test_every_added_timer_is_removed() {
        let mut h = Harness::new();
        let minute = TimerConfig::new(1, TimeUnit::Minutes);
        let definition = WorkflowDefinition::new("All")
            .with_timer(minute)
            .with_block(BlockTemplate::task("a").with_timer(minute))
            .with_block(
                BlockTemplate::if_condition("b", vec![BlockTemplate::task("c").with_timer(minute)], vec![])
                    .with_timer(minute),
            )
            .with_block(
                BlockTemplate::repeat_times(2, vec![BlockTemplate::task("d")]).with_timer(minute),
            )
            .with_block(
                BlockTemplate::parallel_or(
                    "e",
                    1,
                    vec![
                        vec![BlockTemplate::task("f").with_timer(minute)],
                        vec![BlockTemplate::task("g").with_timer(minute)],
                    ],
                )
                .with_timer(minute),
            );
        let mut execution = definition.build(&h.factory);

        execution.start(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        execution.select_yes(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        execution.dispatch(&mut h.ctx(), &[1], Event::Done).unwrap();

        assert!(execution.is_finished());
        assert_eq!(h.timers.active_count(), 0);
        assert_eq!(h.timers.added_count(), h.timers.removed_count());
        assert_eq!(h.timers.unknown_removals(), 0);
    }

    #[test]
    fn test_listeners_see_indices() {
        let mut h = Harness::new();
        let mut execution = build(vec![BlockTemplate::task("a"), BlockTemplate::task("b")]);
        let left = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&left);
        execution.add_on_leave_listener(move |index, block| sink.borrow_mut().push((index, block.block_type())));

        execution.start(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();
        execution.done(&mut h.ctx()).unwrap();

        assert_eq!(*left.borrow(), vec![(0, BlockType::Simple), (1, BlockType::Simple)]);
        assert_eq!(execution.previous().map(|b| b.text().into_owned()).as_deref(), Some("b"));
    }

    #[test]
    fn test_service_failure_propagates() {
        let mut h = Harness::new();
        let mut execution = build(vec![
            BlockTemplate::task("a").with_timer(TimerConfig::new(1, TimeUnit::Minutes)),
        ]);
        h.timers.set_failing(true);

        let result = execution.start(&mut h.ctx());
        assert!(matches!(result, Err(EngineError::Service(ServiceError::Timer(_)))));
    }
}
