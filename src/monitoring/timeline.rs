//! Execution Timeline
//!
//! Tracks when blocks are entered and left, for the run report printed
//! after a workflow finishes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Duration, Local};
use serde::Serialize;

use crate::execution::Execution;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Block became current
    Entered,
    /// Block was left
    Left,
    /// Execution ran past its last block
    Finished,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    /// Position of the block in the sequence
    pub index: usize,
    /// Block text at the time of the event
    pub label: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Local>,
}

/// Time spent on one visit of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDuration {
    pub index: usize,
    pub label: String,
    pub duration: Duration,
}

/// Tracks the execution timeline of a workflow run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: DateTime<Local>,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Local::now(),
        }
    }

    pub fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    /// Records an event happening now.
    pub fn add_event(&mut self, index: usize, label: impl Into<String>, event_type: EventType) {
        self.record_at(index, label, event_type, Local::now());
    }

    pub fn record_at(
        &mut self,
        index: usize,
        label: impl Into<String>,
        event_type: EventType,
        timestamp: DateTime<Local>,
    ) {
        self.events.push(TimelineEvent {
            index,
            label: label.into(),
            event_type,
            timestamp,
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.events
            .iter()
            .any(|e| e.event_type == EventType::Finished)
    }

    /// Total time from creation to the last recorded event.
    pub fn elapsed(&self) -> Duration {
        self.events
            .last()
            .map(|e| e.timestamp - self.start_time)
            .unwrap_or_else(Duration::zero)
    }

    /// Duration of every completed block visit, in the order they were left.
    ///
    /// Indices are reused when the sequence grows, so an `Entered` event is
    /// paired with the next `Left` event at the same index.
    pub fn get_durations(&self) -> Vec<BlockDuration> {
        let mut entered: HashMap<usize, DateTime<Local>> = HashMap::new();
        let mut durations = Vec::new();

        for event in &self.events {
            match event.event_type {
                EventType::Entered => {
                    entered.insert(event.index, event.timestamp);
                }
                EventType::Left => {
                    if let Some(start) = entered.remove(&event.index) {
                        durations.push(BlockDuration {
                            index: event.index,
                            label: event.label.clone(),
                            duration: event.timestamp - start,
                        });
                    }
                }
                EventType::Finished => {}
            }
        }

        durations
    }

    /// Text report listing each block visit with its duration.
    pub fn report(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        for entry in self.get_durations() {
            output.push_str(&format!(
                "{:>4}  {:24} {}\n",
                entry.index,
                truncate(&entry.label, 24),
                format_duration(entry.duration)
            ));
        }

        output.push_str(&format!("\nTotal: {}\n", format_duration(self.elapsed())));
        output
    }

    /// Records the root execution's enter, leave and finish notifications
    /// into `timeline`.
    pub fn attach(timeline: &Rc<RefCell<ExecutionTimeline>>, execution: &mut Execution) {
        let sink = Rc::clone(timeline);
        execution.add_on_entered_listener(move |index, block| {
            sink.borrow_mut().add_event(index, block.text(), EventType::Entered);
        });

        let sink = Rc::clone(timeline);
        execution.add_on_leave_listener(move |index, block| {
            sink.borrow_mut().add_event(index, block.text(), EventType::Left);
        });

        let sink = Rc::clone(timeline);
        execution.add_finish_listener(move || {
            sink.borrow_mut().add_event(0, "", EventType::Finished);
        });
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    if total >= 3600 {
        format!("{}h {:02}m {:02}s", total / 3600, (total % 3600) / 60, total % 60)
    } else if total >= 60 {
        format!("{}m {:02}s", total / 60, total % 60)
    } else {
        format!("{} ms", duration.num_milliseconds().max(0))
    }
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
