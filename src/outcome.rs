//! Per-item attempt audit and cumulative run results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lead::{Lead, LeadId};

/// Terminal status of one attempt or one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failed,
}

/// One try of one item. Created by the requester, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt_number: u32,
    pub at: DateTime<Utc>,
    pub status: AttemptStatus,
    /// Error detail for failed attempts
    pub error: Option<String>,
    /// The payload echoed for audit
    pub payload: Lead,
}

/// One item's final state after all attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// The original payload
    pub lead: Lead,
    pub status: AttemptStatus,
    /// Chronological attempt sequence, at least one entry
    pub attempts: Vec<AttemptRecord>,
    /// Raw response body of the successful attempt; present iff status is success
    pub final_result: Option<String>,
    /// Most recent attempt's error; present iff status is failed
    pub last_error: Option<String>,
}

impl OutcomeRecord {
    pub fn lead_id(&self) -> &LeadId {
        &self.lead.lead_id
    }

    pub fn name(&self) -> &str {
        &self.lead.name
    }

    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Success
    }
}

/// Mapping from lead identifier to final outcome, accumulated batch by batch.
///
/// Exactly one record per submitted identifier after a completed run. On a
/// resumed run, records produced by the new run overwrite prior entries by
/// identifier; attempt lists are never combined across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    records: HashMap<LeadId, OutcomeRecord>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one outcome, overwriting any prior record for the same lead.
    pub fn insert(&mut self, outcome: OutcomeRecord) {
        self.records.insert(outcome.lead_id().clone(), outcome);
    }

    /// Merge a newer run's results into this set; the newer run wins on
    /// identifier collisions.
    pub fn merge(&mut self, newer: ResultSet) {
        for (id, outcome) in newer.records {
            self.records.insert(id, outcome);
        }
    }

    pub fn get(&self, id: &LeadId) -> Option<&OutcomeRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.records.values().filter(|r| r.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.records.values().filter(|r| !r.is_success()).count()
    }

    /// Payloads of failed items, for re-submission in resume mode.
    pub fn failed_leads(&self) -> Vec<Lead> {
        self.records
            .values()
            .filter(|r| !r.is_success())
            .map(|r| r.lead.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.records.values()
    }

    pub fn into_records(self) -> impl Iterator<Item = OutcomeRecord> {
        self.records.into_values()
    }
}
