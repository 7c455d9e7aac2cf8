//! Subscription index: five hash maps keyed by the dimensions a filter can
//! constrain, plus the primary `byId`/`byClient` maps (§4.4.1).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use gateway_protocol::{StreamKind, SubscriptionFilter};

use crate::stream_key::StreamKey;

#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: String,
    pub client_id: String,
    pub filter: SubscriptionFilter,
    pub include_status: bool,
    pub created_at: DateTime<Utc>,
    pub event_count: u64,
}

/// One dimension of the index: subscriptions that pinned this dimension to
/// a specific value live in `by_value`; subscriptions that left it
/// unconstrained live in `wildcard` and match every value.
#[derive(Default)]
struct DimensionIndex {
    by_value: HashMap<String, HashSet<String>>,
    wildcard: HashSet<String>,
}

impl DimensionIndex {
    fn insert(&mut self, value: Option<&str>, sub_id: &str) {
        match value {
            Some(v) => {
                self.by_value.entry(v.to_owned()).or_default().insert(sub_id.to_owned());
            }
            None => {
                self.wildcard.insert(sub_id.to_owned());
            }
        }
    }

    fn remove(&mut self, value: Option<&str>, sub_id: &str) {
        match value {
            Some(v) => {
                if let Some(set) = self.by_value.get_mut(v) {
                    set.remove(sub_id);
                    if set.is_empty() {
                        self.by_value.remove(v);
                    }
                }
            }
            None => {
                self.wildcard.remove(sub_id);
            }
        }
    }

    /// Subscriptions pinned to `value`, plus subscriptions that left this
    /// dimension unconstrained.
    fn candidates_for_value(&self, value: &str) -> HashSet<String> {
        let mut set = self.by_value.get(value).cloned().unwrap_or_default();
        set.extend(self.wildcard.iter().cloned());
        set
    }
}

#[derive(Default)]
pub struct SubscriptionIndex {
    by_id: HashMap<String, SubscriptionRecord>,
    by_client: HashMap<String, HashSet<String>>,
    tenant: DimensionIndex,
    kind: DimensionIndex,
    site: DimensionIndex,
    cage: DimensionIndex,
    farm: DimensionIndex,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: SubscriptionRecord) {
        self.tenant.insert(record.filter.tenant_id.as_deref(), &record.id);
        self.kind.insert(record.filter.kind.map(StreamKind::as_str), &record.id);
        self.site.insert(record.filter.site_id.as_deref(), &record.id);
        self.cage.insert(record.filter.cage_id.as_deref(), &record.id);
        self.farm.insert(record.filter.farm_id.as_deref(), &record.id);
        self.by_client
            .entry(record.client_id.clone())
            .or_default()
            .insert(record.id.clone());
        self.by_id.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, sub_id: &str) -> Option<SubscriptionRecord> {
        let record = self.by_id.remove(sub_id)?;
        self.tenant.remove(record.filter.tenant_id.as_deref(), sub_id);
        self.kind.remove(record.filter.kind.map(StreamKind::as_str), sub_id);
        self.site.remove(record.filter.site_id.as_deref(), sub_id);
        self.cage.remove(record.filter.cage_id.as_deref(), sub_id);
        self.farm.remove(record.filter.farm_id.as_deref(), sub_id);
        if let Some(set) = self.by_client.get_mut(&record.client_id) {
            set.remove(sub_id);
            if set.is_empty() {
                self.by_client.remove(&record.client_id);
            }
        }
        Some(record)
    }

    pub fn remove_client(&mut self, client_id: &str) -> Vec<SubscriptionRecord> {
        let ids: Vec<String> = self
            .by_client
            .get(client_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.into_iter().filter_map(|id| self.remove(&id)).collect()
    }

    pub fn get(&self, sub_id: &str) -> Option<&SubscriptionRecord> {
        self.by_id.get(sub_id)
    }

    pub fn record_delivery(&mut self, sub_id: &str) {
        if let Some(record) = self.by_id.get_mut(sub_id) {
            record.event_count += 1;
        }
    }

    /// Candidate subscription ids for a DATA event. `kind` is the event's
    /// own stream kind (never `status` — DATA events never carry it).
    pub fn candidates_for_data(&self, key: &StreamKey, source: &str) -> Vec<String> {
        let candidates = self.candidates(key, &[key.kind.as_str()]);
        candidates
            .into_iter()
            .filter(|id| matches_source(&self.by_id[id], source))
            .collect()
    }

    /// Candidate subscription ids for a STATUS event describing `key`'s
    /// stream. Matches subscriptions with `kind` unset, `kind==status`, or
    /// `kind` equal to the underlying data kind — the heartbeat is treated
    /// as belonging to the stream it describes (§4.4.1).
    pub fn candidates_for_status(&self, key: &StreamKey, source: &str) -> Vec<String> {
        let candidates = self.candidates(key, &[key.kind.as_str(), StreamKind::Status.as_str()]);
        candidates
            .into_iter()
            .filter(|id| {
                let record = &self.by_id[id];
                record.include_status && matches_source(record, source)
            })
            .collect()
    }

    /// Intersects the tenant/farm/site dimensions (always present on a
    /// `StreamKey`), unions the kind dimension across `kind_values`, and
    /// intersects the cage dimension only if `key` has a cage — an absent
    /// event field means that dimension contributes no restriction (§4.4.1).
    /// Short-circuits as soon as the running intersection is empty.
    fn candidates(&self, key: &StreamKey, kind_values: &[&str]) -> HashSet<String> {
        let mut candidates = self.tenant.candidates_for_value(&key.tenant_id);
        if candidates.is_empty() {
            return candidates;
        }

        let mut kind_set = HashSet::new();
        for value in kind_values {
            kind_set.extend(self.kind.candidates_for_value(value));
        }
        candidates = intersect(candidates, kind_set);
        if candidates.is_empty() {
            return candidates;
        }

        candidates = intersect(candidates, self.farm.candidates_for_value(&key.farm_id));
        if candidates.is_empty() {
            return candidates;
        }

        candidates = intersect(candidates, self.site.candidates_for_value(&key.site_id));
        if candidates.is_empty() {
            return candidates;
        }

        if let Some(cage_id) = &key.cage_id {
            candidates = intersect(candidates, self.cage.candidates_for_value(cage_id));
        }

        candidates
    }
}

fn matches_source(record: &SubscriptionRecord, source: &str) -> bool {
    match &record.filter.sources {
        Some(set) if !set.is_empty() => set.contains(source),
        _ => true,
    }
}

fn intersect(a: HashSet<String>, b: HashSet<String>) -> HashSet<String> {
    a.intersection(&b).cloned().collect()
}
