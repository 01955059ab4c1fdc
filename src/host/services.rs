//! In-process timer and countdown services.
//!
//! Both services record what the engine asked of them instead of talking to a
//! real clock. The CLI drives them from user commands; tests inspect them.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::error::ServiceError;
use crate::execution::{CountdownService, TimerId, TimerService};
use crate::workflow::TimeUnit;

#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTimer {
    pub label: String,
    pub interval: i64,
    pub unit: TimeUnit,
}

/// Reminder service keeping its timers in memory.
#[derive(Debug, Default)]
pub struct ManualTimerService {
    next_id: u64,
    active: BTreeMap<TimerId, RegisteredTimer>,
    paused: bool,
    pause_changes: Vec<bool>,
    added: usize,
    removed: usize,
    unknown_removals: usize,
    failing: bool,
}

impl ManualTimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail, to exercise error paths.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    fn check(&self) -> Result<(), ServiceError> {
        if self.failing {
            return Err(ServiceError::Timer("service unavailable".to_string()));
        }
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Every pause state change, in order.
    pub fn pause_changes(&self) -> &[bool] {
        &self.pause_changes
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_labels(&self) -> Vec<String> {
        self.active.values().map(|t| t.label.clone()).collect()
    }

    pub fn added_count(&self) -> usize {
        self.added
    }

    pub fn removed_count(&self) -> usize {
        self.removed
    }

    /// Removals of ids that were never added or were already removed.
    pub fn unknown_removals(&self) -> usize {
        self.unknown_removals
    }
}

impl TimerService for ManualTimerService {
    fn add_timer(&mut self, label: &str, interval: i64, unit: TimeUnit) -> Result<TimerId, ServiceError> {
        self.check()?;
        self.next_id += 1;
        let id = TimerId(self.next_id);
        info!("Reminder '{}' every {} {}", label, interval, unit);
        self.active.insert(
            id,
            RegisteredTimer {
                label: label.to_string(),
                interval,
                unit,
            },
        );
        self.added += 1;
        Ok(id)
    }

    fn remove_timer(&mut self, id: TimerId) -> Result<(), ServiceError> {
        self.check()?;
        match self.active.remove(&id) {
            Some(timer) => {
                debug!("Reminder '{}' removed", timer.label);
                self.removed += 1;
            }
            None => {
                debug!("Timer {:?} not found", id);
                self.unknown_removals += 1;
            }
        }
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), ServiceError> {
        self.check()?;
        if self.paused != paused {
            info!("Reminders {}", if paused { "paused" } else { "resumed" });
            self.paused = paused;
            self.pause_changes.push(paused);
        }
        Ok(())
    }
}

/// The countdown currently running, and where its events must go.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningCountdown {
    pub seconds: i64,
    pub route: Vec<usize>,
}

/// Countdown that only advances when told to.
#[derive(Debug, Default)]
pub struct ManualCountdown {
    running: Option<RunningCountdown>,
    started: usize,
    forced: usize,
}

impl ManualCountdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(&self) -> Option<&RunningCountdown> {
        self.running.as_ref()
    }

    pub fn started_count(&self) -> usize {
        self.started
    }

    pub fn forced_count(&self) -> usize {
        self.forced
    }

    /// Ends the running countdown and returns its route, so the host can
    /// deliver the elapsed event.
    pub fn elapse(&mut self) -> Option<Vec<usize>> {
        self.running.take().map(|c| c.route)
    }
}

impl CountdownService for ManualCountdown {
    fn start_countdown(&mut self, value: i64, unit: TimeUnit, route: &[usize]) -> Result<(), ServiceError> {
        if let Some(previous) = self.running.take() {
            debug!("Replacing countdown for thread {:?}", previous.route);
        }
        self.running = Some(RunningCountdown {
            seconds: unit.to_seconds(value),
            route: route.to_vec(),
        });
        self.started += 1;
        Ok(())
    }

    fn force_finish(&mut self) -> Result<(), ServiceError> {
        if self.running.take().is_some() {
            debug!("Countdown finished early");
        }
        self.forced += 1;
        Ok(())
    }

    fn cancel_countdown(&mut self, route: &[usize]) -> Result<(), ServiceError> {
        match &self.running {
            Some(running) if running.route == route => {
                debug!("Countdown for thread {:?} cancelled", route);
                self.running = None;
            }
            _ => debug!("No countdown running for thread {:?}", route),
        }
        Ok(())
    }
}
