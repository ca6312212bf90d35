//! Dual-source smart merge
//!
//! Bulk files and the remote API carry overlapping but not identical fields
//! for the same entities, and either can arrive first. The merge rules:
//!
//! - Scalars: an incoming non-null value wins; an incoming null never erases
//!   a stored value.
//! - Raw payload: union keyed by source-native field name, each entry tagged
//!   with the source that wrote it. A source may overwrite its own entries
//!   (re-import idempotence) but never entries owned by the other source.
//! - `data_source` promotes to `both` once both sources have contributed and
//!   never demotes.
//! - `last_updated_from` always records the source of the latest write.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cfdp_common::types::{DataSource, SourceKind};
use cfdp_common::Result;

use super::normalize::{CanonicalFields, NormalizedRecord};

/// One provenance-tagged entry in the raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEntry {
    pub value: Value,
    pub source: SourceKind,
}

/// Ordered map of source-native field name to tagged value.
///
/// Insertion order is preserved so the stored JSON stays stable across
/// re-imports of the same file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPayload(pub IndexMap<String, PayloadEntry>);

impl RawPayload {
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() || json.trim() == "{}" {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Fold a source-native field map into the payload. Keys owned by the
    /// other source are left untouched.
    pub fn absorb(&mut self, raw: &IndexMap<String, Value>, source: SourceKind) {
        for (name, value) in raw {
            match self.0.get(name) {
                Some(entry) if entry.source != source => continue,
                _ => {
                    self.0.insert(
                        name.clone(),
                        PayloadEntry { value: value.clone(), source },
                    );
                }
            }
        }
    }
}

/// A record as stored, or about to be stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedRecord {
    pub key: String,
    pub fields: CanonicalFields,
    pub data_source: Option<DataSource>,
    pub payload: RawPayload,
}

fn keep(incoming: Option<String>, existing: Option<String>) -> Option<String> {
    incoming.or(existing)
}

/// Merge an incoming normalized record into the stored state (if any).
pub fn merge(
    existing: Option<MergedRecord>,
    incoming: &NormalizedRecord,
    source: SourceKind,
) -> MergedRecord {
    let existing = existing.unwrap_or_default();
    let e = existing.fields;
    let i = incoming.fields.clone();

    let fields = CanonicalFields {
        name: keep(i.name, e.name),
        party: keep(i.party, e.party),
        office: keep(i.office, e.office),
        state: keep(i.state, e.state),
        district: keep(i.district, e.district),
        treasurer: keep(i.treasurer, e.treasurer),
        designation: keep(i.designation, e.designation),
        committee_type: keep(i.committee_type, e.committee_type),
        cand_id: keep(i.cand_id, e.cand_id),
        cmte_id: keep(i.cmte_id, e.cmte_id),
        city: keep(i.city, e.city),
        zip_code: keep(i.zip_code, e.zip_code),
        employer: keep(i.employer, e.employer),
        occupation: keep(i.occupation, e.occupation),
        amount: i.amount.or(e.amount),
        date: i.date.or(e.date),
        transaction_type: keep(i.transaction_type, e.transaction_type),
    };

    let data_source = match existing.data_source {
        Some(current) => current.combined_with(source),
        None => DataSource::from(source),
    };

    let mut payload = existing.payload;
    payload.absorb(&incoming.raw, source);

    MergedRecord {
        key: incoming.key.clone(),
        fields,
        data_source: Some(data_source),
        payload,
    }
}
