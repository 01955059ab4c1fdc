//! Parallel-OR Fan-out
//!
//! A [`ParallelOr`] block runs one child [`Execution`] per branch and completes
//! as soon as `choose` of them have finished, or when no thread is left.
//! Threads still running at that point are cancelled.
//!
//! Threads are addressed by the index of the branch they were built from. That
//! index stays stable while sibling threads complete and are removed.

use log::{debug, info, warn};

use crate::error::EngineError;
use crate::workflow::{build_blocks, BlockTemplate};

use super::block::{Event, Transition};
use super::engine::Execution;
use super::timer::{ExecutionContext, PauseRequests};

/// A running child execution of a [`ParallelOr`] block.
#[derive(Debug)]
pub struct Thread {
    branch: usize,
    execution: Execution,
}

impl Thread {
    pub fn branch(&self) -> usize {
        self.branch
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }
}

#[derive(Debug)]
pub struct ParallelOr {
    branches: Vec<Vec<BlockTemplate>>,
    choose: usize,
    threads: Vec<Thread>,
    completed: usize,
    done: bool,
}

impl ParallelOr {
    pub fn new(branches: Vec<Vec<BlockTemplate>>, choose: usize) -> Self {
        Self {
            branches,
            choose,
            threads: Vec::new(),
            completed: 0,
            done: false,
        }
    }

    pub fn choose(&self) -> usize {
        self.choose
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// Threads that finished on their own.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// How many more threads must finish.
    pub fn tasks_todo(&self) -> usize {
        self.choose.saturating_sub(self.completed)
    }

    /// Threads still running.
    pub fn tasks_remaining(&self) -> usize {
        self.threads.len()
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// The running thread built from `branch`, if any.
    pub fn thread(&self, branch: usize) -> Option<&Execution> {
        self.threads
            .iter()
            .find(|t| t.branch == branch)
            .map(|t| &t.execution)
    }

    pub(crate) fn enter(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
        route: &[usize],
    ) -> Result<Transition, EngineError> {
        self.threads.clear();
        self.completed = 0;
        self.done = false;

        for (branch, templates) in self.branches.iter().enumerate() {
            let mut execution = ctx.factory.create_execution(None, None);
            let mut address = route.to_vec();
            address.push(branch);
            execution.set_address(address);
            for block in build_blocks(templates, ctx.factory) {
                execution.push_block(block);
            }
            self.threads.push(Thread { branch, execution });
        }

        if self.threads.is_empty() {
            debug!("Parallel block without branches");
            self.done = true;
            return Ok(Transition::leave());
        }

        info!("Starting {} parallel threads, {} to choose", self.threads.len(), self.choose);
        let mut position = 0;
        while position < self.threads.len() {
            self.threads[position].execution.start_thread(ctx, pause)?;
            if self.threads[position].execution.is_finished() {
                if let Transition::Leave(blocks) = self.complete_thread(ctx, pause, position)? {
                    return Ok(Transition::Leave(blocks));
                }
            } else {
                position += 1;
            }
        }
        Ok(Transition::Stay)
    }

    /// Forwards `event` to the thread built from `branch`.
    pub(crate) fn dispatch(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
        branch: usize,
        rest: &[usize],
        event: Event,
    ) -> Result<Transition, EngineError> {
        let Some(position) = self.threads.iter().position(|t| t.branch == branch) else {
            warn!("No running thread for branch {}, ignoring {:?}", branch, event);
            return Ok(Transition::Stay);
        };

        let thread = &mut self.threads[position];
        thread.execution.dispatch_with(ctx, pause, rest, event)?;
        if thread.execution.is_finished() {
            self.complete_thread(ctx, pause, position)
        } else {
            Ok(Transition::Stay)
        }
    }

    fn complete_thread(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
        position: usize,
    ) -> Result<Transition, EngineError> {
        let thread = self.threads.remove(position);
        self.completed += 1;
        info!(
            "Parallel thread {} finished ({} completed, {} to choose)",
            thread.branch, self.completed, self.choose
        );

        if self.threads.is_empty() || self.completed == self.choose {
            self.cancel_threads(ctx, pause)?;
            if !self.done {
                self.done = true;
                return Ok(Transition::leave());
            }
        }
        Ok(Transition::Stay)
    }

    /// Cancels every thread still running. Cancelled threads do not count as
    /// completed.
    pub(crate) fn cancel_threads(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        pause: &mut PauseRequests,
    ) -> Result<(), EngineError> {
        for mut thread in self.threads.drain(..) {
            debug!("Cancelling parallel thread {}", thread.branch);
            thread.execution.cancel(ctx, pause)?;
        }
        Ok(())
    }
}
