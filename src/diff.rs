//! Member-item tracking for all-items alerts.
//!
//! An all-items alert covers many tracked items at once. Each poll reports the
//! items currently over threshold; the diff against the previous observation
//! tells the banner which of them are new.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Member item with its id normalized from `item_id` or `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredItem {
    pub id: String,
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemDiff {
    pub new_items: Vec<TriggeredItem>,
    pub all_items: Vec<TriggeredItem>,
    pub new_count: usize,
    pub is_initial_load: bool,
}

impl ItemDiff {
    pub fn new_item_ids(&self) -> Vec<String> {
        self.new_items.iter().map(|item| item.id.clone()).collect()
    }
}

/// Normalize raw `triggered_data` into member items.
///
/// Returns `None` when the payload is neither an array nor a string holding
/// a JSON array.
pub fn parse_member_items(raw: &Value) -> Option<Vec<TriggeredItem>> {
    let parsed;
    let entries = match raw {
        Value::Array(entries) => entries,
        Value::String(encoded) => {
            parsed = serde_json::from_str::<Value>(encoded).ok()?;
            parsed.as_array()?
        }
        _ => return None,
    };

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        match member_item_id(entry) {
            Some(id) => items.push(TriggeredItem {
                id,
                data: entry.clone(),
            }),
            None => debug!(
                component = "diff",
                event = "diff.item.missing_id",
                item = %entry
            ),
        }
    }
    Some(items)
}

fn member_item_id(entry: &Value) -> Option<String> {
    match entry {
        Value::Object(fields) => ["item_id", "id"]
            .iter()
            .filter_map(|field| fields.get(*field))
            .find_map(scalar_id),
        other => scalar_id(other),
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Compare `current` against `previous` and return the diff together with
/// the baseline that replaces `previous`.
///
/// An empty baseline with a non-empty current list is a first sighting and
/// reports nothing as new. Otherwise the baseline is replaced (not unioned),
/// so items that drop out are forgotten.
pub fn diff_member_items(
    previous: &HashSet<String>,
    current: Vec<TriggeredItem>,
) -> (ItemDiff, HashSet<String>) {
    let baseline: HashSet<String> = current.iter().map(|item| item.id.clone()).collect();

    if previous.is_empty() && !current.is_empty() {
        let diff = ItemDiff {
            new_items: Vec::new(),
            all_items: current,
            new_count: 0,
            is_initial_load: true,
        };
        return (diff, baseline);
    }

    let new_items: Vec<TriggeredItem> = current
        .iter()
        .filter(|item| !previous.contains(&item.id))
        .cloned()
        .collect();
    let diff = ItemDiff {
        new_count: new_items.len(),
        new_items,
        all_items: current,
        is_initial_load: false,
    };
    (diff, baseline)
}

fn matched_count_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\((\d+) (item\(s\)|items?) matched\)").expect("matched-count regex is valid")
    })
}

/// Rewrite "(N items matched)" into "(K NEW items matched)". Text without the
/// marker gets the new-count suffix appended. `new_count == 0` is a no-op.
pub fn annotate_new_items(text: &str, new_count: usize) -> String {
    if new_count == 0 {
        return text.to_string();
    }

    let plural = if new_count == 1 { "item" } else { "items" };
    let pattern = matched_count_pattern();
    if let Some(caps) = pattern.captures(text) {
        let label = match &caps[2] {
            "item(s)" => "item(s)",
            _ => plural,
        };
        let replacement = format!("({new_count} NEW {label} matched)");
        return pattern.replace(text, replacement.as_str()).into_owned();
    }

    format!("{text} ({new_count} NEW {plural} matched)")
}
