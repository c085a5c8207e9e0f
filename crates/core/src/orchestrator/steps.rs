use tokio::sync::watch;

/// A named stage of proof generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    /// Load the circuit's verification key.
    LoadVerificationKey,
    /// Find and validate the holder's attestation.
    ValidateAttestation,
    /// Derive scope, signal and nullifier.
    DeriveSignal,
    /// Ask the holder's wallet to sign the signal hash.
    RequestSignature,
    /// Recover the holder's public key from the signature.
    RecoverPublicKey,
    /// Assemble the flat circuit inputs.
    AssembleInputs,
    /// Make sure the device has room for proving.
    CheckStorage,
    /// Run the proving engine.
    GenerateProof,
    /// Split the proof into proof body and public inputs.
    ParseProof,
    /// Release the engine's cached resources.
    CleanupCache,
}

impl Step {
    /// Every step, in execution order.
    pub const ALL: [Self; 10] = [
        Self::LoadVerificationKey,
        Self::ValidateAttestation,
        Self::DeriveSignal,
        Self::RequestSignature,
        Self::RecoverPublicKey,
        Self::AssembleInputs,
        Self::CheckStorage,
        Self::GenerateProof,
        Self::ParseProof,
        Self::CleanupCache,
    ];

    /// Steps that must be completed before this one may start.
    #[must_use]
    pub const fn dependencies(self) -> &'static [Self] {
        match self {
            Self::LoadVerificationKey | Self::ValidateAttestation => &[],
            Self::DeriveSignal => &[Self::ValidateAttestation],
            Self::RequestSignature => &[Self::DeriveSignal],
            Self::RecoverPublicKey => &[Self::RequestSignature],
            Self::AssembleInputs => &[Self::ValidateAttestation, Self::RecoverPublicKey],
            Self::CheckStorage => &[Self::AssembleInputs],
            Self::GenerateProof => &[Self::LoadVerificationKey, Self::CheckStorage],
            Self::ParseProof => &[Self::GenerateProof],
            Self::CleanupCache => &[Self::ParseProof],
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// State of a single step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StepState {
    /// Not started.
    #[default]
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Failed with the given message.
    Error(String),
}

/// The state of every step at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepSnapshot {
    states: [StepState; 10],
}

impl StepSnapshot {
    /// The state of `step`.
    #[must_use]
    pub const fn state(&self, step: Step) -> &StepState {
        &self.states[step.index()]
    }

    /// The step that failed, if any.
    #[must_use]
    pub fn failed_step(&self) -> Option<Step> {
        Step::ALL
            .into_iter()
            .find(|step| matches!(self.state(*step), StepState::Error(_)))
    }

    /// Whether every step completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.states.iter().all(|s| *s == StepState::Completed)
    }

    /// Steps paired with their state, in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (Step, &StepState)> + '_ {
        Step::ALL.into_iter().zip(self.states.iter())
    }
}

/// Illegal step transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// A dependency has not completed.
    #[error("{step} cannot start before {dependency} completes")]
    DependencyNotMet {
        /// The step that was started.
        step: Step,
        /// The first incomplete dependency.
        dependency: Step,
    },
    /// An earlier step failed, so nothing else may start.
    #[error("{step} cannot start after {failed} failed")]
    Halted {
        /// The step that was started.
        step: Step,
        /// The step that failed.
        failed: Step,
    },
    /// The step is not pending.
    #[error("{0} was already started")]
    AlreadyStarted(Step),
    /// The step is not running.
    #[error("{0} is not in progress")]
    NotInProgress(Step),
}

/// Tracks step progress and publishes every change to subscribers.
#[derive(Debug)]
pub struct StepTracker {
    tx: watch::Sender<StepSnapshot>,
}

impl Default for StepTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StepTracker {
    /// Creates a tracker with every step pending.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StepSnapshot::default());
        Self { tx }
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StepSnapshot> {
        self.tx.subscribe()
    }

    /// The current state of every step.
    #[must_use]
    pub fn snapshot(&self) -> StepSnapshot {
        self.tx.borrow().clone()
    }

    /// Marks `step` as in progress.
    ///
    /// # Errors
    /// Fails if any step has errored, `step` is not pending, or a dependency has not completed.
    pub fn start(&self, step: Step) -> Result<(), StepError> {
        self.transition(step, |snapshot| {
            if let Some(failed) = snapshot.failed_step() {
                return Err(StepError::Halted { step, failed });
            }
            if *snapshot.state(step) != StepState::Pending {
                return Err(StepError::AlreadyStarted(step));
            }
            if let Some(dependency) = step
                .dependencies()
                .iter()
                .find(|dep| *snapshot.state(**dep) != StepState::Completed)
            {
                return Err(StepError::DependencyNotMet {
                    step,
                    dependency: *dependency,
                });
            }
            Ok(StepState::InProgress)
        })
    }

    /// Marks a running `step` as completed.
    ///
    /// # Errors
    /// Fails if `step` is not in progress.
    pub fn complete(&self, step: Step) -> Result<(), StepError> {
        self.transition(step, |snapshot| match snapshot.state(step) {
            StepState::InProgress => Ok(StepState::Completed),
            _ => Err(StepError::NotInProgress(step)),
        })
    }

    /// Marks `step` as failed. Completed steps keep their state.
    pub fn fail(&self, step: Step, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_if_modified(|snapshot| {
            let state = &mut snapshot.states[step.index()];
            if *state == StepState::Completed {
                return false;
            }
            *state = StepState::Error(message);
            true
        });
    }

    /// Returns every step to pending.
    pub fn reset(&self) {
        self.tx.send_replace(StepSnapshot::default());
    }

    fn transition(
        &self,
        step: Step,
        next: impl FnOnce(&StepSnapshot) -> Result<StepState, StepError>,
    ) -> Result<(), StepError> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|snapshot| match next(snapshot) {
            Ok(state) => {
                snapshot.states[step.index()] = state;
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(tracker: &StepTracker, step: Step) {
        tracker.start(step).unwrap();
        tracker.complete(step).unwrap();
    }

    #[test]
    fn steps_wait_for_dependencies() {
        let tracker = StepTracker::new();
        assert_eq!(
            tracker.start(Step::DeriveSignal),
            Err(StepError::DependencyNotMet {
                step: Step::DeriveSignal,
                dependency: Step::ValidateAttestation,
            })
        );

        run(&tracker, Step::ValidateAttestation);
        run(&tracker, Step::DeriveSignal);
        assert_eq!(
            *tracker.snapshot().state(Step::DeriveSignal),
            StepState::Completed
        );
    }

    #[test]
    fn failure_halts_remaining_steps() {
        let tracker = StepTracker::new();
        run(&tracker, Step::LoadVerificationKey);
        tracker.start(Step::ValidateAttestation).unwrap();
        tracker.fail(Step::ValidateAttestation, "no attestation");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.failed_step(), Some(Step::ValidateAttestation));
        assert_eq!(
            *snapshot.state(Step::LoadVerificationKey),
            StepState::Completed
        );
        assert!(matches!(
            tracker.start(Step::DeriveSignal),
            Err(StepError::Halted { .. })
        ));

        tracker.fail(Step::LoadVerificationKey, "late failure");
        assert_eq!(
            *tracker.snapshot().state(Step::LoadVerificationKey),
            StepState::Completed
        );
    }

    #[test]
    fn steps_cannot_restart_or_complete_twice() {
        let tracker = StepTracker::new();
        run(&tracker, Step::LoadVerificationKey);
        assert_eq!(
            tracker.start(Step::LoadVerificationKey),
            Err(StepError::AlreadyStarted(Step::LoadVerificationKey))
        );
        assert_eq!(
            tracker.complete(Step::ValidateAttestation),
            Err(StepError::NotInProgress(Step::ValidateAttestation))
        );
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let tracker = StepTracker::new();
        let mut rx = tracker.subscribe();

        tracker.start(Step::LoadVerificationKey).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow_and_update().state(Step::LoadVerificationKey),
            StepState::InProgress
        );

        tracker.reset();
        rx.changed().await.unwrap();
        assert!(rx
            .borrow_and_update()
            .iter()
            .all(|(_, state)| *state == StepState::Pending));
    }
}
