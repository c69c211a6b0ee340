//! Persisted per-case workflow state
//!
//! One JSON document per case. Decoding is lenient about individual fields
//! (wrong types are defaulted and reported as corrections) but strict about
//! the document itself: an empty or non-object document is rejected, since
//! there is nothing to repair from.

use super::status::{Correction, CorrectionKind};
use super::transition::TransitionRecord;
use crate::error::{WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const SCHEMA_VERSION: &str = "1.0";

/// Completion state of a landmark for one case
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkState {
    #[default]
    NotStarted,
    InProgress,
    Complete,
    NotApplicable,
}

impl LandmarkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LandmarkState::NotStarted => "not_started",
            LandmarkState::InProgress => "in_progress",
            LandmarkState::Complete => "complete",
            LandmarkState::NotApplicable => "not_applicable",
        }
    }

    /// Complete or not applicable
    pub fn is_done(&self) -> bool {
        matches!(self, LandmarkState::Complete | LandmarkState::NotApplicable)
    }
}

impl fmt::Display for LandmarkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LandmarkState {
    type Err = String;

    /// Case-insensitive; accepts '-' or ' ' in place of '_'
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "not_started" => Ok(LandmarkState::NotStarted),
            "in_progress" => Ok(LandmarkState::InProgress),
            "complete" | "completed" => Ok(LandmarkState::Complete),
            "not_applicable" | "n/a" | "na" => Ok(LandmarkState::NotApplicable),
            _ => Err(format!(
                "unknown landmark status '{}' (expected not_started, in_progress, complete or not_applicable)",
                s
            )),
        }
    }
}

/// Relationship between a case and one landmark
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LandmarkStatus {
    #[serde(default)]
    pub status: LandmarkState,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_steps: BTreeMap<String, bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Keys this version does not know about, kept for round-tripping
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl LandmarkStatus {
    pub fn not_started(now: DateTime<Utc>) -> Self {
        Self {
            updated_at: Some(now),
            ..Self::default()
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    /// Move to `status`, keeping `completed_at` consistent
    pub fn set_status(&mut self, status: LandmarkState, now: DateTime<Utc>) {
        if status == LandmarkState::Complete && self.status != LandmarkState::Complete {
            self.completed_at = Some(now);
        } else if status != LandmarkState::Complete {
            self.completed_at = None;
        }
        self.status = status;
        self.updated_at = Some(now);
    }

    /// Append a line to the free-text notes
    pub fn add_note(&mut self, note: impl Into<String>) {
        let note = note.into();
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.trim().is_empty() => format!("{}\n{}", existing, note),
            _ => note,
        });
    }

    /// Every listed sub-step is recorded as done
    pub fn sub_steps_done(&self, names: &[String]) -> bool {
        !names.is_empty() && names.iter().all(|n| self.sub_steps.get(n).copied().unwrap_or(false))
    }
}

/// Free-form case metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_date: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One stay in a phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseHistoryEntry {
    pub phase: String,
    pub entered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<DateTime<Utc>>,
}

/// The per-case state document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseState {
    pub case_id: String,

    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Current phase id
    pub phase: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_entered_at: Option<DateTime<Utc>>,

    /// Phase the case left on its last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_phase: Option<String>,

    #[serde(default)]
    pub metadata: CaseMetadata,

    /// Keyed by landmark id
    #[serde(default)]
    pub landmarks: BTreeMap<String, LandmarkStatus>,

    #[serde(default)]
    pub phase_history: Vec<PhaseHistoryEntry>,

    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,

    /// Repairs made while decoding; drained by the status computer
    #[serde(skip)]
    pub repairs: Vec<Correction>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl CaseState {
    /// Fresh state entering `phase`
    pub fn new(case_id: impl Into<String>, phase: impl Into<String>, now: DateTime<Utc>) -> Self {
        let phase = phase.into();
        Self {
            case_id: case_id.into(),
            schema_version: default_schema_version(),
            phase: phase.clone(),
            phase_entered_at: Some(now),
            previous_phase: None,
            metadata: CaseMetadata::default(),
            landmarks: BTreeMap::new(),
            phase_history: vec![PhaseHistoryEntry {
                phase,
                entered_at: now,
                exited_at: None,
            }],
            transitions: Vec::new(),
            created_at: Some(now),
            updated_at: Some(now),
            extra: BTreeMap::new(),
            repairs: Vec::new(),
        }
    }

    /// Client name for display, falling back to the case id
    pub fn client_display_name(&self) -> &str {
        self.metadata
            .client_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.case_id)
    }

    pub fn landmark(&self, id: &str) -> Option<&LandmarkStatus> {
        self.landmarks.get(id)
    }

    pub fn landmark_state(&self, id: &str) -> LandmarkState {
        self.landmarks.get(id).map(|l| l.status).unwrap_or_default()
    }

    /// Insert a not_started entry if absent; true when one was added
    pub fn ensure_landmark(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        if self.landmarks.contains_key(id) {
            return false;
        }
        self.landmarks
            .insert(id.to_string(), LandmarkStatus::not_started(now));
        true
    }

    pub fn take_repairs(&mut self) -> Vec<Correction> {
        std::mem::take(&mut self.repairs)
    }

    pub fn to_json_pretty(&self) -> WorkflowResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode a stored document, repairing malformed fields
    pub fn from_json(case_id: &str, content: &str) -> WorkflowResult<Self> {
        if content.trim().is_empty() {
            return Err(malformed(case_id, "document is empty"));
        }
        let value: Value = serde_json::from_str(content)
            .map_err(|e| malformed(case_id, format!("not valid JSON: {}", e)))?;
        let Value::Object(map) = value else {
            return Err(malformed(case_id, "document is not a JSON object"));
        };
        if map.is_empty() {
            return Err(malformed(case_id, "document has no fields"));
        }

        Ok(Decoder::new(case_id).decode(map))
    }
}

fn malformed(case_id: &str, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::MalformedState {
        case_id: case_id.to_string(),
        reason: reason.into(),
    }
}

/// Append entries to the `<key>_unreadable` array kept among unknown fields
fn stash_unreadable(map: &mut Map<String, Value>, key: &str, entries: Vec<Value>) {
    let slot = map
        .entry(format!("{}_unreadable", key))
        .or_insert_with(|| Value::Array(Vec::new()));
    match slot {
        Value::Array(existing) => existing.extend(entries),
        other => {
            let mut kept = vec![other.take()];
            kept.extend(entries);
            *other = Value::Array(kept);
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Field-by-field decoder that records every coercion it makes
struct Decoder<'a> {
    case_id: &'a str,
    repairs: Vec<Correction>,
}

impl<'a> Decoder<'a> {
    fn new(case_id: &'a str) -> Self {
        Self {
            case_id,
            repairs: Vec::new(),
        }
    }

    fn repair(&mut self, subject: impl Into<String>, detail: impl Into<String>) {
        let correction = Correction::new(CorrectionKind::FieldRepaired, subject, detail);
        tracing::warn!(
            case_id = %self.case_id,
            field = %correction.subject,
            detail = %correction.detail,
            "repaired malformed state field"
        );
        self.repairs.push(correction);
    }

    /// Remove and decode `key`; wrong types are dropped with a repair
    fn field<T: DeserializeOwned>(&mut self, map: &mut Map<String, Value>, key: &str, path: &str) -> Option<T> {
        let value = map.remove(key)?;
        if value.is_null() {
            return None;
        }
        let kind = value_kind(&value);
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                self.repair(path, format!("dropped unreadable {} value ({})", kind, e));
                None
            }
        }
    }

    /// Decode a history list entry by entry
    ///
    /// Unreadable entries are never discarded: they move, untouched, to
    /// `<key>_unreadable` so they survive the next save.
    fn records<T: DeserializeOwned>(&mut self, map: &mut Map<String, Value>, key: &str) -> Vec<T> {
        let items = match map.remove(key) {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => {
                self.repair(
                    key,
                    format!("expected array, got {}; kept under '{}_unreadable'", value_kind(&other), key),
                );
                stash_unreadable(map, key, vec![other]);
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(items.len());
        let mut unreadable = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            match T::deserialize(&item) {
                Ok(record) => records.push(record),
                Err(e) => {
                    self.repair(
                        format!("{}[{}]", key, index),
                        format!("kept unreadable entry under '{}_unreadable' ({})", key, e),
                    );
                    unreadable.push(item);
                }
            }
        }
        if !unreadable.is_empty() {
            stash_unreadable(map, key, unreadable);
        }
        records
    }

    fn decode(mut self, mut map: Map<String, Value>) -> CaseState {
        let case_id = match map.remove("case_id") {
            Some(Value::String(id)) if id == self.case_id => id,
            Some(Value::String(other)) => {
                self.repair(
                    "case_id",
                    format!("document named '{}', stored under '{}'", other, self.case_id),
                );
                self.case_id.to_string()
            }
            None | Some(Value::Null) => {
                self.repair("case_id", "missing; filled from storage key");
                self.case_id.to_string()
            }
            Some(other) => {
                self.repair(
                    "case_id",
                    format!("expected string, got {}; filled from storage key", value_kind(&other)),
                );
                self.case_id.to_string()
            }
        };

        // Missing or unreadable phases are reset by the status computer
        let phase = match map.remove("phase") {
            Some(Value::String(s)) => s,
            Some(other) => {
                tracing::debug!(case_id = %self.case_id, kind = value_kind(&other), "phase is not a string");
                String::new()
            }
            None => String::new(),
        };

        let schema_version = self
            .field::<String>(&mut map, "schema_version", "schema_version")
            .unwrap_or_else(default_schema_version);
        let phase_entered_at = self.field(&mut map, "phase_entered_at", "phase_entered_at");
        let previous_phase = self.field(&mut map, "previous_phase", "previous_phase");
        let created_at = self.field(&mut map, "created_at", "created_at");
        let updated_at = self.field(&mut map, "updated_at", "updated_at");
        let phase_history = self.records(&mut map, "phase_history");
        let transitions = self.records(&mut map, "transitions");

        let metadata = match map.remove("metadata") {
            None | Some(Value::Null) => CaseMetadata::default(),
            Some(Value::Object(mut m)) => CaseMetadata {
                client_name: self.field(&mut m, "client_name", "metadata.client_name"),
                opened_at: self.field(&mut m, "opened_at", "metadata.opened_at"),
                incident_date: self.field(&mut m, "incident_date", "metadata.incident_date"),
                extra: m.into_iter().collect(),
            },
            Some(other) => {
                self.repair("metadata", format!("expected object, got {}", value_kind(&other)));
                CaseMetadata::default()
            }
        };

        let landmarks = match map.remove("landmarks") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(entries)) => entries
                .into_iter()
                .filter_map(|(id, v)| self.landmark(&id, v).map(|s| (id, s)))
                .collect(),
            Some(Value::Array(items)) => {
                self.repair("landmarks", "converted list form to keyed map");
                items
                    .into_iter()
                    .filter_map(|item| self.listed_landmark(item))
                    .collect()
            }
            Some(other) => {
                self.repair("landmarks", format!("expected object, got {}", value_kind(&other)));
                BTreeMap::new()
            }
        };

        CaseState {
            case_id,
            schema_version,
            phase,
            phase_entered_at,
            previous_phase,
            metadata,
            landmarks,
            phase_history,
            transitions,
            created_at,
            updated_at,
            extra: map.into_iter().collect(),
            repairs: self.repairs,
        }
    }

    fn listed_landmark(&mut self, item: Value) -> Option<(String, LandmarkStatus)> {
        let Value::Object(mut m) = item else {
            self.repair("landmarks", format!("dropped {} list entry", value_kind(&item)));
            return None;
        };
        let id = match m.remove("id").or_else(|| m.remove("landmark")) {
            Some(Value::String(id)) if !id.trim().is_empty() => id,
            _ => {
                self.repair("landmarks", "dropped list entry without an id");
                return None;
            }
        };
        let status = self.landmark(&id, Value::Object(m))?;
        Some((id, status))
    }

    fn landmark(&mut self, id: &str, value: Value) -> Option<LandmarkStatus> {
        let path = format!("landmarks.{}", id);
        match value {
            Value::String(s) => {
                let status = match s.parse::<LandmarkState>() {
                    Ok(status) => status,
                    Err(e) => {
                        self.repair(&path, e);
                        LandmarkState::NotStarted
                    }
                };
                self.repair(&path, "expanded bare status string");
                Some(LandmarkStatus {
                    status,
                    ..LandmarkStatus::default()
                })
            }
            Value::Object(mut m) => {
                let status = match m.remove("status") {
                    Some(Value::String(s)) => match s.parse::<LandmarkState>() {
                        Ok(status) => status,
                        Err(e) => {
                            self.repair(format!("{}.status", path), e);
                            LandmarkState::NotStarted
                        }
                    },
                    None | Some(Value::Null) => {
                        self.repair(format!("{}.status", path), "missing; defaulted to not_started");
                        LandmarkState::NotStarted
                    }
                    Some(other) => {
                        self.repair(
                            format!("{}.status", path),
                            format!("expected string, got {}; defaulted to not_started", value_kind(&other)),
                        );
                        LandmarkState::NotStarted
                    }
                };
                let sub_steps = self.sub_steps(&path, m.remove("sub_steps"));
                Some(LandmarkStatus {
                    status,
                    sub_steps,
                    notes: self.field(&mut m, "notes", &format!("{}.notes", path)),
                    completed_at: self.field(&mut m, "completed_at", &format!("{}.completed_at", path)),
                    updated_at: self.field(&mut m, "updated_at", &format!("{}.updated_at", path)),
                    extra: m.into_iter().collect(),
                })
            }
            other => {
                self.repair(&path, format!("dropped {} entry", value_kind(&other)));
                None
            }
        }
    }

    fn sub_steps(&mut self, path: &str, value: Option<Value>) -> BTreeMap<String, bool> {
        let mut steps = BTreeMap::new();
        let entries = match value {
            None | Some(Value::Null) => return steps,
            Some(Value::Object(entries)) => entries,
            Some(other) => {
                self.repair(
                    format!("{}.sub_steps", path),
                    format!("expected object, got {}", value_kind(&other)),
                );
                return steps;
            }
        };

        for (name, v) in entries {
            let step_path = format!("{}.sub_steps.{}", path, name);
            let coerced = match &v {
                Value::Bool(b) => Some(*b),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "yes" | "done" => Some(true),
                    "false" | "no" | "" => Some(false),
                    _ => None,
                },
                Value::Number(n) => n.as_i64().map(|n| n != 0),
                _ => None,
            };
            match coerced {
                Some(b) => {
                    if !v.is_boolean() {
                        self.repair(&step_path, format!("coerced {} to {}", value_kind(&v), b));
                    }
                    steps.insert(name, b);
                }
                None => self.repair(&step_path, format!("dropped {} value", value_kind(&v))),
            }
        }
        steps
    }
}
