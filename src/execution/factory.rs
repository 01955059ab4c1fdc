//! Block Factory
//!
//! Templates materialize into live blocks through a [`BlockFactory`], so the
//! engine never constructs blocks on its own. Branches, loop bodies and parallel
//! threads are only built at the moment they are taken.

use crate::workflow::{BlockTemplate, LoopKind, TimeUnit, TimerConfig};

use super::block::Block;
use super::engine::Execution;

pub trait BlockFactory {
    fn create_task(&self, text: &str) -> Block;

    fn create_if(&self, condition: &str, then_branch: &[BlockTemplate], else_branch: &[BlockTemplate]) -> Block;

    fn create_repeat_times(&self, times: i64, body: &[BlockTemplate]) -> Block;

    fn create_repeat_condition(&self, condition: &str, kind: LoopKind, body: &[BlockTemplate]) -> Block;

    fn create_parallel_or(&self, text: &str, branches: &[Vec<BlockTemplate>], choose: usize) -> Block;

    fn create_timer_sleep(&self, value: i64, unit: TimeUnit, text: &str, disable_notification: bool) -> Block;

    /// An empty execution. Parallel threads are created with no description
    /// and no timer.
    fn create_execution(&self, description: Option<&str>, timer: Option<TimerConfig>) -> Execution;
}

/// Factory producing the stock block implementations.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBlockFactory;

impl BlockFactory for DefaultBlockFactory {
    fn create_task(&self, text: &str) -> Block {
        Block::task(text)
    }

    fn create_if(&self, condition: &str, then_branch: &[BlockTemplate], else_branch: &[BlockTemplate]) -> Block {
        Block::if_condition(condition, then_branch.to_vec(), else_branch.to_vec())
    }

    fn create_repeat_times(&self, times: i64, body: &[BlockTemplate]) -> Block {
        Block::repeat_times(times, body.to_vec())
    }

    fn create_repeat_condition(&self, condition: &str, kind: LoopKind, body: &[BlockTemplate]) -> Block {
        Block::repeat_condition(condition, kind, body.to_vec())
    }

    fn create_parallel_or(&self, text: &str, branches: &[Vec<BlockTemplate>], choose: usize) -> Block {
        Block::parallel_or(text, branches.to_vec(), choose)
    }

    fn create_timer_sleep(&self, value: i64, unit: TimeUnit, text: &str, disable_notification: bool) -> Block {
        Block::timer_sleep(value, unit, text, disable_notification)
    }

    fn create_execution(&self, description: Option<&str>, timer: Option<TimerConfig>) -> Execution {
        Execution::new(description.map(str::to_string), timer)
    }
}
