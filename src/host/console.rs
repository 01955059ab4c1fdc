//! Console Commands
//!
//! Line-oriented commands the CLI reads from a terminal or a script file, and
//! the plain-text rendering of an execution's state.
//!
//! # Command Syntax
//!
//! ```text
//! [@PATH] done | yes | no | skip | tick SECONDS
//! wait | pause | resume | status | help | quit
//! ```
//!
//! `PATH` addresses a parallel thread by branch indices separated by `/`, so
//! `@1/0 done` confirms the task of thread 0 inside thread 1.

use std::fmt::Write;

use thiserror::Error;

use crate::execution::{BlockSnapshot, Event, ExecutionSnapshot, NextPreview};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Deliver an event to the block addressed by `path`
    Event { path: Vec<usize>, event: Event },
    /// Let the running countdown run out
    Wait,
    /// Pause reminders until `resume`
    Pause,
    Resume,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("invalid thread path '{0}'")]
    InvalidPath(String),
    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("'{0}' does not take a thread path")]
    UnexpectedPath(String),
}

/// Parses one command line. Lines starting with `#` should be skipped by the
/// caller before parsing.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let mut word = words.next().ok_or(CommandError::Empty)?;

    let path = match word.strip_prefix('@') {
        Some(raw) => {
            let path = parse_path(raw)?;
            word = words.next().ok_or(CommandError::Empty)?;
            Some(path)
        }
        None => None,
    };

    let event = match word.to_ascii_lowercase().as_str() {
        "done" | "d" => Event::Done,
        "yes" | "y" => Event::SelectYes,
        "no" | "n" => Event::SelectNo,
        "skip" => Event::ForceFinish,
        "tick" => {
            let raw = words.next().ok_or(CommandError::MissingArgument("tick"))?;
            let seconds = raw
                .parse::<f64>()
                .map_err(|_| CommandError::InvalidNumber(raw.to_string()))?;
            Event::CountdownTick(seconds)
        }
        other => {
            if path.is_some() {
                return Err(CommandError::UnexpectedPath(other.to_string()));
            }
            return match other {
                "wait" | "w" => Ok(Command::Wait),
                "pause" => Ok(Command::Pause),
                "resume" => Ok(Command::Resume),
                "status" | "s" => Ok(Command::Status),
                "help" | "?" => Ok(Command::Help),
                "quit" | "q" | "exit" => Ok(Command::Quit),
                _ => Err(CommandError::Unknown(other.to_string())),
            };
        }
    };

    Ok(Command::Event {
        path: path.unwrap_or_default(),
        event,
    })
}

fn parse_path(raw: &str) -> Result<Vec<usize>, CommandError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    raw.split('/')
        .map(|part| {
            part.parse::<usize>()
                .map_err(|_| CommandError::InvalidPath(raw.to_string()))
        })
        .collect()
}

pub fn command_help() -> &'static str {
    "Commands:
  [@PATH] done       confirm the current task (d)
  [@PATH] yes | no   answer the current question (y, n)
  [@PATH] skip       end a running sleep early
  [@PATH] tick SECS  report countdown progress
  wait               let the running countdown elapse (w)
  pause | resume     hold or release reminder notifications
  status             show where the workflow stands (s)
  help               show this list (?)
  quit               stop the run (q)

PATH selects a parallel thread, e.g. @0 or @1/2"
}

/// Renders a snapshot as an indented, human-readable tree.
pub fn render_status(snapshot: &ExecutionSnapshot) -> String {
    let mut out = String::new();
    render_into(&mut out, snapshot, 0);
    out
}

fn render_into(out: &mut String, snapshot: &ExecutionSnapshot, depth: usize) {
    let indent = "  ".repeat(depth);
    let Some(current) = &snapshot.current else {
        let _ = writeln!(out, "{}(finished)", indent);
        return;
    };

    let _ = writeln!(out, "{}{}", indent, describe_block(current));
    if let Some(extra) = &current.additional_text {
        let _ = writeln!(out, "{}  {}", indent, extra);
    }
    match &snapshot.next {
        Some(NextPreview::Block(text)) => {
            let _ = writeln!(out, "{}  next: {}", indent, text);
        }
        Some(NextPreview::Unknown) => {
            let _ = writeln!(out, "{}  next: ???", indent);
        }
        Some(NextPreview::End) => {
            let _ = writeln!(out, "{}  next: END", indent);
        }
        None => {}
    }

    for thread in &snapshot.threads {
        let path = thread
            .execution
            .address
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join("/");
        let _ = writeln!(out, "{}  @{}:", indent, path);
        render_into(out, &thread.execution, depth + 2);
    }
}

fn describe_block(block: &BlockSnapshot) -> String {
    let mut line = format!("[{}] {}", block.index, block.text);
    if let (Some(todo), Some(remaining)) = (block.tasks_todo, block.tasks_remaining) {
        line.push_str(&format!(" ({} of {} to do)", todo, remaining));
    }
    line
}
