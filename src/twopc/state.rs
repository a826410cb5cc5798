use parking_lot::Mutex;

/// Progress of the batch currently being applied by the leader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No batch in flight
    Idle,
    /// Prepare sent to followers, or local prepare running
    Preparing,
    /// Every node prepared the batch
    Prepared,
    Committing,
    Committed,
    /// A prepare failed or was cancelled; undoing it everywhere
    RollingBack,
    RolledBack,
}

impl Phase {
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Preparing)
                | (Preparing, Prepared)
                | (Preparing, RollingBack)
                | (Prepared, Committing)
                | (Committing, Committed)
                | (RollingBack, RolledBack)
                | (Committed, Idle)
                | (RolledBack, Idle)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Preparing => write!(f, "Preparing"),
            Phase::Prepared => write!(f, "Prepared"),
            Phase::Committing => write!(f, "Committing"),
            Phase::Committed => write!(f, "Committed"),
            Phase::RollingBack => write!(f, "RollingBack"),
            Phase::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// Shared, observable phase of a runtime.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: Mutex<Phase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn get(&self) -> Phase {
        *self.phase.lock()
    }

    /// Moves to `next`, logging the transition.
    pub fn transition(&self, index: u64, next: Phase) {
        let mut phase = self.phase.lock();
        if !phase.can_transition_to(next) {
            tracing::error!(
                "Batch {} made unexpected transition {} -> {}",
                index,
                *phase,
                next
            );
        } else {
            tracing::debug!("Batch {} transitioning {} -> {}", index, *phase, next);
        }
        *phase = next;
    }

    /// Forces `Idle` after a batch was settled outside the normal path.
    pub fn reset(&self) {
        let mut phase = self.phase.lock();
        if *phase != Phase::Idle {
            tracing::warn!("Resetting phase {} to Idle", *phase);
            *phase = Phase::Idle;
        }
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
