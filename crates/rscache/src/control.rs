//! The cache's lifecycle state machine (§4.8).
//!
//! `NotStarted -> Running`; `Running <-> Flushing`; `Running ->
//! ShutdownInProgress -> ShutdownCompleted`. Represented as a single atomic
//! so every transition is a CAS, matching the "single atomic reference"
//! resource described for control state.

use std::sync::atomic::{AtomicU8, Ordering};

use rscache_errors::CacheError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlState {
    NotStarted = 0,
    Running = 1,
    Flushing = 2,
    ShutdownInProgress = 3,
    ShutdownCompleted = 4,
}

impl ControlState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ControlState::NotStarted,
            1 => ControlState::Running,
            2 => ControlState::Flushing,
            3 => ControlState::ShutdownInProgress,
            4 => ControlState::ShutdownCompleted,
            _ => unreachable!("invalid control state byte"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlState::NotStarted => "NOT_STARTED",
            ControlState::Running => "RUNNING",
            ControlState::Flushing => "FLUSHING",
            ControlState::ShutdownInProgress => "SHUTDOWN_IN_PROGRESS",
            ControlState::ShutdownCompleted => "SHUTDOWN_COMPLETED",
        }
    }

    /// Whether standard access operations (read/write) are permitted.
    pub fn allows_access(self) -> bool {
        matches!(self, ControlState::Running)
    }
}

/// Atomic holder for [`ControlState`] with the handful of CAS transitions
/// the engine needs.
pub struct ControlStateCell {
    state: AtomicU8,
}

impl ControlStateCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ControlState::NotStarted as u8),
        }
    }

    pub fn get(&self) -> ControlState {
        ControlState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `NotStarted -> Running`, once. Idempotent: starting an already
    /// running cache is not an error.
    pub fn start(&self) -> Result<(), CacheError> {
        match self.state.compare_exchange(
            ControlState::NotStarted as u8,
            ControlState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(current) if current == ControlState::Running as u8 => Ok(()),
            Err(current) => Err(CacheError::control_state(ControlState::from_u8(current).as_str())),
        }
    }

    /// `Running -> Flushing`. Fails if another flush/shutdown already
    /// claimed the transition.
    pub fn begin_flush(&self) -> Result<(), CacheError> {
        self.state
            .compare_exchange(
                ControlState::Running as u8,
                ControlState::Flushing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|current| CacheError::control_state(ControlState::from_u8(current).as_str()))
    }

    /// `Flushing -> Running`, the end of a successful or timed-out flush.
    pub fn end_flush(&self) {
        let _ = self.state.compare_exchange(
            ControlState::Flushing as u8,
            ControlState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// `Running | Flushing -> ShutdownInProgress`, one-way.
    pub fn begin_shutdown(&self) -> Result<(), CacheError> {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == ControlState::ShutdownInProgress as u8
                || current == ControlState::ShutdownCompleted as u8
            {
                return Ok(());
            }
            if current != ControlState::Running as u8 && current != ControlState::Flushing as u8 {
                return Err(CacheError::control_state(ControlState::from_u8(current).as_str()));
            }
            if self
                .state
                .compare_exchange(
                    current,
                    ControlState::ShutdownInProgress as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// `ShutdownInProgress -> ShutdownCompleted`, one-way, terminal.
    pub fn complete_shutdown(&self) {
        self.state.store(ControlState::ShutdownCompleted as u8, Ordering::Release);
    }

    pub fn require_access(&self) -> Result<(), CacheError> {
        let current = self.get();
        if current.allows_access() {
            Ok(())
        } else {
            Err(CacheError::control_state(current.as_str()))
        }
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.get(), ControlState::ShutdownCompleted)
    }
}

impl Default for ControlStateCell {
    fn default() -> Self {
        Self::new()
    }
}
