//! The flashing state store.
//!
//! A [`Store`] holds one immutable [`Snapshot`] at a time. Front-ends send it
//! [`Action`]s and re-render from [`Store::state`]. A dispatch either validates
//! and replaces the snapshot, or fails and leaves the previous snapshot in place.
//!
//! ```text
//!            SET_FLASHING_FLAG              SET_FLASH_STATE
//!   Idle  ----------------------->  Flashing  <-------+
//!    ^                                 |   |          |
//!    |       UNSET_FLASHING_FLAG       |   +----------+
//!    +---------------------------------+
//!    RESET_FLASH_STATE returns to Idle from anywhere.
//! ```
use crate::error::{Error, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Which pass of the flash is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashStage {
    Write,
    Check,
}

impl fmt::Display for FlashStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            FlashStage::Write => "write",
            FlashStage::Check => "check",
        })
    }
}

/// Progress of the running flash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashState {
    #[serde(rename = "type")]
    pub stage: FlashStage,
    /// Always within `0..=100` once stored.
    pub percentage: f64,
    /// Throughput in MB/s, as reported by the writer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Estimated seconds remaining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<u64>,
}

impl FlashState {
    pub fn new(stage: FlashStage, percentage: f64) -> Self {
        Self {
            stage,
            percentage,
            speed: None,
            eta: None,
        }
    }
}

/// How the last flash ended.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlashResults {
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// The state the UI renders from.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub is_flashing: bool,
    pub flash_state: Option<FlashState>,
    pub flash_results: Option<FlashResults>,
}

/// A request for a state transition.
///
/// Serialized as `{ "type": "SET_FLASH_STATE", "data": { ... } }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    SetFlashingFlag,
    SetFlashState(FlashState),
    UnsetFlashingFlag(FlashResults),
    ResetFlashState,
}

fn check_percentage(percentage: f64) -> Result<()> {
    if percentage.is_nan() {
        return Err(Error::InvalidPercentage(percentage));
    }
    if percentage > 100.0 {
        return Err(Error::ExcessivePercentage(percentage));
    }
    if percentage < 0.0 {
        return Err(Error::DeficientPercentage(percentage));
    }
    Ok(())
}

/// Computes the snapshot that follows `state` once `action` is applied.
pub fn reduce(state: &Snapshot, action: Action) -> Result<Snapshot> {
    match action {
        Action::SetFlashingFlag => Ok(Snapshot {
            is_flashing: true,
            flash_state: None,
            flash_results: None,
        }),
        Action::SetFlashState(flash_state) => {
            // Range is checked before the flashing guard so bad values are
            // reported as such regardless of the current state.
            check_percentage(flash_state.percentage)?;
            if !state.is_flashing {
                return Err(Error::NotFlashing);
            }
            Ok(Snapshot {
                flash_state: Some(flash_state),
                ..state.clone()
            })
        }
        Action::UnsetFlashingFlag(results) => Ok(Snapshot {
            is_flashing: false,
            flash_state: None,
            flash_results: Some(results),
        }),
        Action::ResetFlashState => Ok(Snapshot::default()),
    }
}

/// Owns the current snapshot and serializes every dispatch.
#[derive(Debug, Default)]
pub struct Store {
    snapshot: Mutex<Arc<Snapshot>>,
}

impl Store {
    /// A store in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot.
    pub fn state(&self) -> Arc<Snapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `action` and returns the snapshot it produced.
    ///
    /// # Errors
    ///
    /// Returns the validation error if the action is rejected. The stored
    /// snapshot is left exactly as it was.
    pub fn dispatch(&self, action: Action) -> Result<Arc<Snapshot>> {
        let mut current = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Dispatching {:?}", action);

        match reduce(&current, action) {
            Ok(next) => {
                let next = Arc::new(next);
                *current = Arc::clone(&next);
                Ok(next)
            }
            Err(e) => {
                warn!("Rejected action: {}", e);
                Err(e)
            }
        }
    }

    /// Decodes a JSON action and dispatches it.
    pub fn dispatch_json(&self, json: &str) -> Result<Arc<Snapshot>> {
        let action: Action = serde_json::from_str(json)?;
        self.dispatch(action)
    }
}
