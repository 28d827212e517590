use std::time::Duration;
use async_trait::async_trait;
use log::debug;

use super::exchange::Exchange;
use super::frame::Frame;
use crate::config::RetryConfig;
use crate::shutdown::{Cancelled, Shutdown};

/// Wait between two attempts
#[async_trait]
pub trait Pause: Send {
    async fn pause(&mut self, duration: Duration) -> Result<(), Cancelled>;
}

/// Sleeps on the tokio clock unless the shutdown signal fires first
pub struct ShutdownAwarePause {
    shutdown: Shutdown,
}

impl ShutdownAwarePause {
    pub fn new(shutdown: Shutdown) -> Self {
        return ShutdownAwarePause { shutdown };
    }
}

#[async_trait]
impl Pause for ShutdownAwarePause {
    async fn pause(&mut self, duration: Duration) -> Result<(), Cancelled> {
        if self.shutdown.is_signalled() {
            return Err(Cancelled);
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.shutdown.signalled() => Err(Cancelled),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        return RetryPolicy { max_attempts: 3, delay: Duration::from_millis(500) };
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        return RetryPolicy {
            max_attempts: config.attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    /// `attempt` counts the failed attempts so far
    Attempting { attempt: u32 },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        return matches!(self, RetryState::Succeeded { .. } | RetryState::Exhausted { .. });
    }
}

pub struct RetryCoordinator {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        return RetryCoordinator { policy, state: RetryState::Idle };
    }

    pub fn state(&self) -> RetryState {
        return self.state;
    }

    /// Drives the exchange until it succeeds or the attempts are used up.
    /// Returns the terminal state; a cancelled pause or exchange aborts right away.
    pub async fn run<E, P>(&mut self, frame: &Frame, exchange: &mut E, pause: &mut P) -> Result<RetryState, Cancelled>
    where
        E: Exchange + ?Sized,
        P: Pause + ?Sized,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        self.state = RetryState::Attempting { attempt: 0 };

        loop {
            let attempt = match self.state {
                RetryState::Attempting { attempt } => attempt,
                terminal => return Ok(terminal),
            };

            if attempt > 0 {
                pause.pause(self.policy.delay).await?;
            }

            let matched = exchange.exchange(frame).await?;
            let done = attempt + 1;
            debug!("Attempt {} - Success: {}", done, matched);

            self.state = if matched {
                RetryState::Succeeded { attempts: done }
            } else if done >= max_attempts {
                RetryState::Exhausted { attempts: done }
            } else {
                RetryState::Attempting { attempt: done }
            };
        }
    }
}
