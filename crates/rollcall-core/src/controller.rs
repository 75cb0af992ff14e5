//! Attendance controller: detection state machine and debounced logging.
//!
//! The controller is either `Idle` or `Detecting`. While detecting, every
//! confident match is checked against the cooldown and, if accepted,
//! appended to the attendance log. Cooldown state is only advanced after
//! the log write succeeds.

use crate::store::AttendanceLog;
use crate::types::{AttendanceEvent, MatchResult};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Default minimum interval between two accepted events.
pub const DEFAULT_COOLDOWN_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    Detecting,
}

/// Whether one acceptance blocks everyone or only the same person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    Global,
    #[default]
    PerIdentity,
}

impl FromStr for CooldownScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "per_identity" | "per-identity" | "identity" => Ok(Self::PerIdentity),
            other => Err(format!("unknown cooldown scope: {other}")),
        }
    }
}

/// Last-accepted timestamps and the interval they enforce.
#[derive(Debug, Clone)]
pub struct Cooldown {
    scope: CooldownScope,
    interval: Duration,
    last_global: Option<NaiveDateTime>,
    last_by_identity: HashMap<String, NaiveDateTime>,
}

impl Cooldown {
    pub fn new(scope: CooldownScope, interval: Duration) -> Self {
        Self {
            scope,
            interval,
            last_global: None,
            last_by_identity: HashMap::new(),
        }
    }

    pub fn scope(&self) -> CooldownScope {
        self.scope
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn last_accepted(&self, employee_id: &str) -> Option<NaiveDateTime> {
        match self.scope {
            CooldownScope::Global => self.last_global,
            CooldownScope::PerIdentity => self.last_by_identity.get(employee_id).copied(),
        }
    }

    /// True if an event for `employee_id` at `now` falls inside the cooldown.
    pub fn is_cooling_down(&self, employee_id: &str, now: NaiveDateTime) -> bool {
        self.last_accepted(employee_id)
            .is_some_and(|last| now.signed_duration_since(last) < self.interval)
    }

    pub fn record(&mut self, employee_id: &str, at: NaiveDateTime) {
        match self.scope {
            CooldownScope::Global => self.last_global = Some(at),
            CooldownScope::PerIdentity => {
                self.last_by_identity.insert(employee_id.to_string(), at);
            }
        }
    }
}

impl Default for Cooldown {
    fn default() -> Self {
        Self::new(CooldownScope::default(), Duration::seconds(DEFAULT_COOLDOWN_SECS))
    }
}

/// What happened to one face crop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Recorded(AttendanceEvent),
    NotRecognized { score: Option<f32> },
    /// Confident match inside the cooldown window; nothing was written.
    Debounced { employee_id: String },
    /// Confident match whose log write failed; cooldown left unchanged.
    LogFailed { employee_id: String, reason: String },
}

pub struct AttendanceController<L: AttendanceLog> {
    state: State,
    cooldown: Cooldown,
    log: L,
}

impl<L: AttendanceLog> AttendanceController<L> {
    pub fn new(log: L, cooldown: Cooldown) -> Self {
        Self {
            state: State::Idle,
            cooldown,
            log,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_detecting(&self) -> bool {
        self.state == State::Detecting
    }

    pub fn cooldown(&self) -> &Cooldown {
        &self.cooldown
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Idle → Detecting. No-op if already detecting.
    pub fn start(&mut self) {
        if self.state == State::Idle {
            tracing::info!("detection started");
        }
        self.state = State::Detecting;
    }

    /// Detecting → Idle. No-op if already idle.
    pub fn stop(&mut self) {
        if self.state == State::Detecting {
            tracing::info!("detection stopped");
        }
        self.state = State::Idle;
    }

    /// Apply the attendance rule to one match result at time `now`.
    ///
    /// The cooldown check, log append and cooldown update happen in this
    /// one call, so two faces from the same frame cannot both pass.
    pub fn handle(&mut self, result: &MatchResult, now: NaiveDateTime) -> Outcome {
        let identity = match (&result.identity, result.is_confident) {
            (Some(identity), true) => identity,
            _ => {
                tracing::debug!(score = ?result.score, "face not recognized");
                return Outcome::NotRecognized { score: result.score };
            }
        };

        if self.cooldown.is_cooling_down(&identity.employee_id, now) {
            tracing::debug!(employee_id = %identity.employee_id, "inside cooldown; dropping match");
            return Outcome::Debounced {
                employee_id: identity.employee_id.clone(),
            };
        }

        let event = AttendanceEvent::for_identity(identity, now);
        match self.log.append(&event) {
            Ok(()) => {
                self.cooldown.record(&identity.employee_id, event.timestamp);
                tracing::info!(
                    employee_id = %event.employee_id,
                    name = %event.name,
                    department = %event.department,
                    timestamp = %event.timestamp,
                    "attendance recorded"
                );
                Outcome::Recorded(event)
            }
            Err(err) => {
                tracing::warn!(employee_id = %identity.employee_id, error = %err, "attendance write failed");
                Outcome::LogFailed {
                    employee_id: identity.employee_id.clone(),
                    reason: err.to_string(),
                }
            }
        }
    }
}
