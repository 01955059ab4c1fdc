//! Serializable view of a running execution, for display and JSON output.

use serde::Serialize;

use super::block::{Block, BlockType};
use super::engine::Execution;

/// What the user will face after the current block.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum NextPreview {
    /// Depends on an answer still to be given
    Unknown,
    Block(String),
    End,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BlockSnapshot {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub block_type: BlockType,
    pub type_code: u8,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_text: Option<String>,
    pub timer_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks_todo: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks_remaining: Option<usize>,
}

impl BlockSnapshot {
    fn of(index: usize, block: &Block) -> Self {
        let parallel = block.parallel();
        Self {
            index,
            id: block.id(),
            block_type: block.block_type(),
            type_code: block.block_type().code(),
            text: block.text().into_owned(),
            image: block.image().map(str::to_string),
            additional_text: block.additional_text(),
            timer_running: block.is_timer_running(),
            tasks_todo: parallel.map(|p| p.tasks_todo()),
            tasks_remaining: parallel.map(|p| p.tasks_remaining()),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ThreadSnapshot {
    pub branch: usize,
    pub execution: ExecutionSnapshot,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ExecutionSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub address: Vec<usize>,
    pub finished: bool,
    pub current: Option<BlockSnapshot>,
    pub next: Option<NextPreview>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub threads: Vec<ThreadSnapshot>,
}

impl Execution {
    /// Captures the visible state of this execution and its running threads.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        let current = self.current().filter(|_| !self.is_finished());
        let threads = current
            .and_then(Block::parallel)
            .map(|parallel| {
                parallel
                    .threads()
                    .iter()
                    .map(|thread| ThreadSnapshot {
                        branch: thread.branch(),
                        execution: thread.execution().snapshot(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        ExecutionSnapshot {
            description: self.description().map(str::to_string),
            address: self.address().to_vec(),
            finished: self.is_finished(),
            current: current.map(|block| BlockSnapshot::of(self.current_index(), block)),
            next: current.map(|block| self.preview_after(block)),
            threads,
        }
    }

    fn preview_after(&self, current: &Block) -> NextPreview {
        if current.is_condition() {
            return NextPreview::Unknown;
        }
        match self.next() {
            Some(next) => NextPreview::Block(next.text().into_owned()),
            None => NextPreview::End,
        }
    }
}
