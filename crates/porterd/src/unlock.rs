use porter_hw::Actuator;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::state::SharedState;

/// What happened to an unlock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockOutcome {
    Actuated,
    /// Another actuation was in flight; nothing was driven.
    AlreadyInProgress,
    /// The relay reported an error; the interlock was still released.
    ActuatorFailed,
}

/// Single choke point for driving the door relay.
pub struct UnlockController {
    actuator: Arc<dyn Actuator>,
    hold: Duration,
}

impl UnlockController {
    pub fn new(actuator: Arc<dyn Actuator>, hold: Duration) -> Self {
        Self { actuator, hold }
    }

    pub fn actuator_name(&self) -> String {
        self.actuator.name()
    }

    /// Energise the relay for the hold duration, unless an unlock is already running.
    ///
    /// Blocks the caller for the hold time. The interlock is taken and
    /// released under the shared lock; the hold itself runs unlocked.
    pub fn unlock_with_cooldown(&self, state: &SharedState, clock: &dyn Clock) -> UnlockOutcome {
        {
            let mut shared = state.lock();
            if shared.unlock.is_unlocking {
                tracing::warn!("unlock already in progress");
                return UnlockOutcome::AlreadyInProgress;
            }
            shared.unlock.is_unlocking = true;
        }
        let _release = Release { state, clock };

        tracing::info!(actuator = %self.actuator.name(), "starting door unlock");
        let mut outcome = UnlockOutcome::Actuated;
        match self.actuator.activate() {
            Ok(()) => std::thread::sleep(self.hold),
            Err(e) => {
                tracing::error!(error = %e, "relay activate failed");
                outcome = UnlockOutcome::ActuatorFailed;
            }
        }
        if let Err(e) = self.actuator.deactivate() {
            tracing::warn!(error = %e, "relay deactivate failed");
            outcome = UnlockOutcome::ActuatorFailed;
        }
        tracing::info!(?outcome, "door unlock completed");
        outcome
    }
}

/// Clears the interlock on every exit path, panics included.
struct Release<'a> {
    state: &'a SharedState,
    clock: &'a dyn Clock,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        let mut shared = self.state.lock();
        shared.unlock.is_unlocking = false;
        shared.unlock.last_unlock = Some(self.clock.now());
    }
}
