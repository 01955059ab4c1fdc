//! Timer and Countdown Bridge
//!
//! The reminder timer service and the countdown service are shared,
//! externally-owned collaborators. The engine only ever talks to them through
//! the traits here, reached via the [`ExecutionContext`] handed to every
//! operation, and it disciplines their use in two ways:
//!
//! - every `add_timer` is matched by exactly one `remove_timer`
//! - pausing is reference counted through [`PauseRequests`]: the service is
//!   paused while at least one request is outstanding

use std::collections::BTreeSet;

use log::debug;

use crate::error::ServiceError;
use crate::execution::factory::BlockFactory;
use crate::workflow::TimeUnit;

/// Handle of a reminder registered with a [`TimerService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Token identifying one outstanding pause request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PauseToken(pub u32);

/// Recurring reminder service.
pub trait TimerService {
    /// Starts a reminder firing every `interval` `unit`s.
    fn add_timer(&mut self, label: &str, interval: i64, unit: TimeUnit) -> Result<TimerId, ServiceError>;

    /// Stops and forgets a reminder.
    fn remove_timer(&mut self, id: TimerId) -> Result<(), ServiceError>;

    /// Suppresses (or resumes) reminder notifications without removing timers.
    fn set_paused(&mut self, paused: bool) -> Result<(), ServiceError>;
}

/// One-shot countdown used by timer sleep blocks.
///
/// The host feeds the countdown's progress back into the engine as
/// [`Event::CountdownTick`](crate::execution::Event::CountdownTick) and
/// [`Event::CountdownElapsed`](crate::execution::Event::CountdownElapsed),
/// addressed to `route`, the thread path of the sleeping block.
pub trait CountdownService {
    fn start_countdown(&mut self, value: i64, unit: TimeUnit, route: &[usize]) -> Result<(), ServiceError>;

    /// Ends the running countdown early.
    fn force_finish(&mut self) -> Result<(), ServiceError>;

    /// Stops the countdown started for `route`, leaving any other one alone.
    fn cancel_countdown(&mut self, route: &[usize]) -> Result<(), ServiceError> {
        let _ = route;
        self.force_finish()
    }
}

/// Collaborators passed to every block and execution operation.
pub struct ExecutionContext<'a> {
    pub timers: &'a mut dyn TimerService,
    pub countdown: &'a mut dyn CountdownService,
    pub factory: &'a dyn BlockFactory,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        timers: &'a mut dyn TimerService,
        countdown: &'a mut dyn CountdownService,
        factory: &'a dyn BlockFactory,
    ) -> Self {
        Self {
            timers,
            countdown,
            factory,
        }
    }
}

/// Reference-counted pause requests against the shared timer service.
///
/// Empty set means unpaused, non-empty means paused, no matter which requester
/// added or removed entries.
#[derive(Debug, Default)]
pub struct PauseRequests {
    outstanding: BTreeSet<PauseToken>,
    next_token: u32,
}

impl PauseRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request; pauses the service if this is the first one.
    pub fn request(&mut self, timers: &mut dyn TimerService) -> Result<PauseToken, ServiceError> {
        let token = PauseToken(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);

        if self.outstanding.is_empty() {
            debug!("Pausing reminders");
            timers.set_paused(true)?;
        }
        self.outstanding.insert(token);
        Ok(token)
    }

    /// Drops a request; resumes the service when the last one is released.
    pub fn release(&mut self, token: PauseToken, timers: &mut dyn TimerService) -> Result<(), ServiceError> {
        if !self.outstanding.remove(&token) {
            debug!("Pause token {:?} is not outstanding", token);
            return Ok(());
        }
        if self.outstanding.is_empty() {
            debug!("Resuming reminders");
            timers.set_paused(false)?;
        }
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        !self.outstanding.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}
