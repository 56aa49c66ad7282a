//! Append-only, TTL-bounded record of findings.

use std::collections::BTreeMap;

use contracts::{Category, Finding, FindingKind, FindingSeverity};
use parking_lot::RwLock;

/// A finding before the sink assigns its sequence and expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct FindingDraft {
    pub kind: FindingKind,
    pub zone_id: String,
    pub category: Option<Category>,
    pub observed: f64,
    pub baseline_mean: f64,
    pub z_score: f64,
    pub severity: FindingSeverity,
    pub message: String,
    pub tick: u64,
    pub timestamp: u64,
}

type DedupKey = (String, Option<Category>);

#[derive(Debug, Default)]
struct SinkInner {
    findings: Vec<Finding>,
    next_sequence: u64,
    last_tick_by_key: BTreeMap<DedupKey, u64>,
}

#[derive(Debug)]
pub struct FindingSink {
    ttl_secs: u64,
    inner: RwLock<SinkInner>,
}

impl FindingSink {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            inner: RwLock::new(SinkInner {
                next_sequence: 1,
                ..SinkInner::default()
            }),
        }
    }

    /// Appends a finding unless the same (zone, category) already produced
    /// one in this tick.
    pub fn record(&self, draft: FindingDraft) -> Option<Finding> {
        let mut inner = self.inner.write();
        let key = (draft.zone_id.clone(), draft.category);
        if inner.last_tick_by_key.get(&key) == Some(&draft.tick) {
            return None;
        }

        let finding = Finding {
            sequence: inner.next_sequence,
            kind: draft.kind,
            zone_id: draft.zone_id,
            category: draft.category,
            observed: draft.observed,
            baseline_mean: draft.baseline_mean,
            z_score: draft.z_score,
            severity: draft.severity,
            message: draft.message,
            tick: draft.tick,
            timestamp: draft.timestamp,
            expiry: draft.timestamp.saturating_add(self.ttl_secs),
        };
        inner.next_sequence += 1;
        inner.last_tick_by_key.insert(key, finding.tick);
        inner.findings.push(finding.clone());
        Some(finding)
    }

    /// Unexpired findings, most recent first, optionally for one zone.
    pub fn active(&self, zone_id: Option<&str>, now: u64) -> Vec<Finding> {
        let inner = self.inner.read();
        inner
            .findings
            .iter()
            .rev()
            .filter(|finding| finding.is_active_at(now))
            .filter(|finding| zone_id.map_or(true, |zone| finding.zone_id == zone))
            .cloned()
            .collect()
    }

    /// Findings with a sequence greater than `after`, oldest first.
    pub fn since(&self, after: u64) -> Vec<Finding> {
        let inner = self.inner.read();
        let start = inner
            .findings
            .partition_point(|finding| finding.sequence <= after);
        inner.findings[start..].to_vec()
    }

    /// Physically removes expired findings.
    pub fn prune_expired(&self, now: u64) -> usize {
        let mut inner = self.inner.write();
        let before = inner.findings.len();
        inner.findings.retain(|finding| finding.is_active_at(now));
        before - inner.findings.len()
    }

    /// Reloads persisted findings. Sequences continue after the highest one.
    pub fn restore(&self, mut findings: Vec<Finding>) {
        findings.sort_by_key(|finding| finding.sequence);
        let mut inner = self.inner.write();
        let highest = findings.last().map(|finding| finding.sequence).unwrap_or(0);
        inner.next_sequence = inner.next_sequence.max(highest + 1);
        for finding in &findings {
            inner
                .last_tick_by_key
                .insert((finding.zone_id.clone(), finding.category), finding.tick);
        }
        inner.findings = findings;
    }

    pub fn len(&self) -> usize {
        self.inner.read().findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().findings.is_empty()
    }
}
