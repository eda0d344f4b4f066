//! Field-level difference between two states.

use crate::state::SimulationState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level fields diffed entry by entry rather than as a whole.
const MAPPING_FIELDS: [&str; 5] = ["entities", "metrics", "resources", "flags", "metadata"];

/// Fields excluded from deltas: wall-clock stamps are not simulation content.
const IGNORED_FIELDS: [&str; 1] = ["updated_at"];

/// Change to one field or mapping entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldChange {
    Added(serde_json::Value),
    Removed(serde_json::Value),
    Changed {
        before: serde_json::Value,
        after: serde_json::Value,
    },
}

/// Changes keyed by path: `time`, `resources.cpu`, `entities.team_a`, ...
pub type StateDelta = BTreeMap<String, FieldChange>;

/// Diff `before` against `after`.
pub fn compute_delta(before: &SimulationState, after: &SimulationState) -> StateDelta {
    let mut delta = StateDelta::new();
    let (serde_json::Value::Object(b), serde_json::Value::Object(a)) =
        (to_json(before), to_json(after))
    else {
        return delta;
    };

    for (field, after_value) in &a {
        if IGNORED_FIELDS.contains(&field.as_str()) {
            continue;
        }
        let before_value = b.get(field).unwrap_or(&serde_json::Value::Null);
        match (before_value, after_value) {
            (serde_json::Value::Object(bm), serde_json::Value::Object(am))
                if MAPPING_FIELDS.contains(&field.as_str()) =>
            {
                diff_entries(&mut delta, field, bm, am);
            }
            (bv, av) if bv != av => {
                delta.insert(
                    field.clone(),
                    FieldChange::Changed {
                        before: bv.clone(),
                        after: av.clone(),
                    },
                );
            }
            _ => {}
        }
    }
    delta
}

fn diff_entries(
    delta: &mut StateDelta,
    field: &str,
    before: &serde_json::Map<String, serde_json::Value>,
    after: &serde_json::Map<String, serde_json::Value>,
) {
    for (key, av) in after {
        let path = format!("{field}.{key}");
        match before.get(key) {
            None => {
                delta.insert(path, FieldChange::Added(av.clone()));
            }
            Some(bv) if bv != av => {
                delta.insert(
                    path,
                    FieldChange::Changed {
                        before: bv.clone(),
                        after: av.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }
    for (key, bv) in before {
        if !after.contains_key(key) {
            delta.insert(format!("{field}.{key}"), FieldChange::Removed(bv.clone()));
        }
    }
}

fn to_json(state: &SimulationState) -> serde_json::Value {
    serde_json::to_value(state).unwrap_or_default()
}
