//! Host-side Collaborators
//!
//! In-memory implementations of the timer and countdown services, and the
//! console command language used by the CLI.

pub mod console;
pub mod services;

pub use console::{command_help, parse_command, render_status, Command, CommandError};
pub use services::{ManualCountdown, ManualTimerService, RegisteredTimer, RunningCountdown};
