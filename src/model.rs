//! Wire and persisted types shared by the store, poll loop and views.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Stable alert identifier. The API sends numbers or strings; both collapse
/// to the string form, which is also the persisted key form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AlertId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for AlertId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<u64> for AlertId {
    fn from(raw: u64) -> Self {
        Self(raw.to_string())
    }
}

impl<'de> Deserialize<'de> for AlertId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(serde_json::Number),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(value) => Self(value.to_string()),
            RawId::Text(value) => Self(value),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Price,
    Spread,
    Spike,
    #[serde(other)]
    Other,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Spread => "spread",
            Self::Spike => "spike",
            Self::Other => "other",
        }
    }
}

/// One entry of the `triggered` array returned by the alerts API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredAlert {
    pub id: AlertId,
    pub triggered_text: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    #[serde(default)]
    pub is_all_items: bool,
    /// JSON-encoded string or inline array of member items.
    #[serde(default)]
    pub triggered_data: Option<Value>,
}

impl TriggeredAlert {
    pub fn is_spread_all_items(&self) -> bool {
        self.is_all_items && self.alert_type == AlertType::Spread
    }

    pub fn is_spike_all_items(&self) -> bool {
        self.is_all_items && self.alert_type == AlertType::Spike
    }
}

/// Full poll payload. Alert definitions are rendered elsewhere and kept opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertsResponse {
    #[serde(default)]
    pub alerts: Vec<Value>,
    #[serde(default, deserialize_with = "deserialize_triggered")]
    pub triggered: Vec<TriggeredAlert>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Entries that do not decode are skipped so one bad alert costs only its
/// own banner.
fn deserialize_triggered<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<TriggeredAlert>, D::Error> {
    let raw = Vec::<Value>::deserialize(deserializer)?;
    let mut alerts = Vec::with_capacity(raw.len());
    for (index, entry) in raw.into_iter().enumerate() {
        match serde_json::from_value::<TriggeredAlert>(entry) {
            Ok(alert) => alerts.push(alert),
            Err(err) => warn!(
                component = "poll",
                event = "poll.payload.entry_skipped",
                index,
                error = %err
            ),
        }
    }
    Ok(alerts)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: AlertId,
    pub text: String,
    pub alert_type: AlertType,
    pub is_all_items: bool,
    pub is_spread_all_items: bool,
    pub is_spike_all_items: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_item_ids: Vec<String>,
}

impl NotificationRecord {
    pub fn from_triggered(alert: &TriggeredAlert, text: String) -> Self {
        Self {
            id: alert.id.clone(),
            text,
            alert_type: alert.alert_type,
            is_all_items: alert.is_all_items,
            is_spread_all_items: alert.is_spread_all_items(),
            is_spike_all_items: alert.is_spike_all_items(),
            new_item_ids: Vec::new(),
        }
    }
}
