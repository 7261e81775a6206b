//! # Sync Session State Machine
//!
//! Tracks where the engine is in a check/download cycle and guards against
//! overlapping passes.
//!
//! ## State Machine
//!
//! ```text
//! Idle ────────┐
//! Ready ───────┼──→ Verifying ──→ Ready | NeedsUpdate | Idle
//! NeedsUpdate ─┘
//! NeedsUpdate ────→ Downloading ──→ Verifying (post) | Idle
//! ```
//!
//! - `Ready` and `NeedsUpdate` may start a new verification at any time.
//! - Pass-level failures and cancellation return to `Idle`.
//!
//! ## Session Guard
//!
//! The state lives in a `tokio::sync::watch` channel. Starting a pass is a
//! compare-and-swap on that channel: when the session is already busy the
//! second caller is refused without an error, so concurrent checks collapse
//! into one.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::watch;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Identifier of one pass, carried on every event it emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidSessionId(e.to_string()))?,
        ))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of the sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No pass has run, or the last one failed or was cancelled
    #[default]
    Idle,
    /// Local files are being compared against the remote listings
    Verifying,
    /// Every listed file is present and valid
    Ready,
    /// The last verification produced a non-empty plan
    NeedsUpdate,
    /// Plan items are being transferred
    Downloading,
}

impl SessionState {
    /// `true` while a pass is running.
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::Verifying | SessionState::Downloading)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Verifying => "verifying",
            SessionState::Ready => "ready",
            SessionState::NeedsUpdate => "needs_update",
            SessionState::Downloading => "downloading",
        }
    }

    /// Check that moving from `self` to `next` is allowed.
    pub fn validate_transition(&self, next: SessionState) -> Result<()> {
        use SessionState::*;

        let allowed = matches!(
            (*self, next),
            (Idle | Ready | NeedsUpdate, Verifying)
                | (Verifying, Ready | NeedsUpdate | Idle)
                | (NeedsUpdate, Downloading)
                | (Downloading, Verifying | Idle)
        );

        if allowed {
            Ok(())
        } else {
            Err(SyncError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
                reason: transition_reason(*self, next).to_string(),
            })
        }
    }
}

fn transition_reason(from: SessionState, to: SessionState) -> &'static str {
    match (from, to) {
        (_, SessionState::Downloading) => "Downloads require a pending update plan",
        (SessionState::Verifying | SessionState::Downloading, _) => "A pass is already running",
        _ => "Transition not permitted",
    }
}

impl FromStr for SessionState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SessionState::Idle),
            "verifying" => Ok(SessionState::Verifying),
            "ready" => Ok(SessionState::Ready),
            "needs_update" => Ok(SessionState::NeedsUpdate),
            "downloading" => Ok(SessionState::Downloading),
            _ => Err(SyncError::InvalidState(s.to_string())),
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Observable session state with an atomic "start pass" guard.
#[derive(Debug)]
pub struct Session {
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self { state }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Atomically move to `next` if the session is not busy.
    ///
    /// Returns the previous state on success and `None` when another pass
    /// holds the session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` when the session is idle-compatible
    /// but `next` is not reachable from the current state.
    pub fn try_begin(&self, next: SessionState) -> Result<Option<SessionState>> {
        let mut outcome = Ok(None);
        self.state.send_if_modified(|current| {
            if current.is_busy() {
                return false;
            }
            match current.validate_transition(next) {
                Ok(()) => {
                    outcome = Ok(Some(*current));
                    *current = next;
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&self, next: SessionState) -> Result<SessionState> {
        let mut outcome = Err(SyncError::InvalidState(next.as_str().to_string()));
        self.state.send_if_modified(|current| {
            match current.validate_transition(next) {
                Ok(()) => {
                    outcome = Ok(*current);
                    *current = next;
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }

    /// Return to `Idle` from any state.
    pub fn reset(&self) -> SessionState {
        self.state.send_replace(SessionState::Idle)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_strings() {
        for state in [
            SessionState::Idle,
            SessionState::Verifying,
            SessionState::Ready,
            SessionState::NeedsUpdate,
            SessionState::Downloading,
        ] {
            assert_eq!(state.as_str().parse::<SessionState>().unwrap(), state);
            assert_eq!(state.to_string(), state.as_str());
        }
        assert!("paused".parse::<SessionState>().is_err());
    }

    #[test]
    fn test_valid_transitions() {
        use SessionState::*;

        assert!(Idle.validate_transition(Verifying).is_ok());
        assert!(Verifying.validate_transition(Ready).is_ok());
        assert!(Verifying.validate_transition(NeedsUpdate).is_ok());
        assert!(NeedsUpdate.validate_transition(Downloading).is_ok());
        assert!(Downloading.validate_transition(Verifying).is_ok());
        assert!(Downloading.validate_transition(Idle).is_ok());
        assert!(Ready.validate_transition(Verifying).is_ok());
    }

    #[test]
    fn test_invalid_transitions() {
        use SessionState::*;

        assert!(Idle.validate_transition(Downloading).is_err());
        assert!(Ready.validate_transition(Downloading).is_err());
        assert!(Verifying.validate_transition(Downloading).is_err());
        assert!(Downloading.validate_transition(Ready).is_err());
        assert!(Verifying.validate_transition(Verifying).is_err());
    }

    #[test]
    fn test_try_begin_refuses_second_pass() {
        let session = Session::new();

        assert_eq!(
            session.try_begin(SessionState::Verifying).unwrap(),
            Some(SessionState::Idle)
        );
        assert_eq!(session.try_begin(SessionState::Verifying).unwrap(), None);
        assert_eq!(session.state(), SessionState::Verifying);
    }

    #[test]
    fn test_try_begin_download_requires_plan() {
        let session = Session::new();
        let err = session.try_begin(SessionState::Downloading).unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let session = Session::new();
        let mut rx = session.subscribe();

        session.try_begin(SessionState::Verifying).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::Verifying);

        session.transition(SessionState::NeedsUpdate).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::NeedsUpdate);

        assert_eq!(session.reset(), SessionState::NeedsUpdate);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_session_id_parsing() {
        let id = SessionId::new();
        assert_eq!(SessionId::from_string(&id.to_string()).unwrap(), id);
        assert!(SessionId::from_string("not-a-uuid").is_err());
    }
}
