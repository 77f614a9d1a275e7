//! Canonical attribute-filter schema shared by every pipeline stage.
//!
//! Model output, CLI flags and follow-up criteria all arrive in slightly
//! different shapes (missing keys, `null`, a bare string instead of a list,
//! legacy key names). [`normalize`] is the single ingress point that turns any
//! of those into a [`FilterSet`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Five-slot attribute filter. Every slot is a set of lowercase tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterSet {
    pub dietary: BTreeSet<String>,
    pub meal_time: BTreeSet<String>,
    pub accessibility: BTreeSet<String>,
    pub service_type: BTreeSet<String>,
    pub special_needs: BTreeSet<String>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.slots().iter().all(|(_, s)| s.is_empty())
    }

    /// Slots paired with their canonical key names.
    pub fn slots(&self) -> [(&'static str, &BTreeSet<String>); 5] {
        [
            ("dietary", &self.dietary),
            ("meal_time", &self.meal_time),
            ("accessibility", &self.accessibility),
            ("service_type", &self.service_type),
            ("special_needs", &self.special_needs),
        ]
    }

    /// Slot-wise union of two filter sets.
    pub fn merge(mut self, other: &FilterSet) -> FilterSet {
        self.dietary.extend(other.dietary.iter().cloned());
        self.meal_time.extend(other.meal_time.iter().cloned());
        self.accessibility.extend(other.accessibility.iter().cloned());
        self.service_type.extend(other.service_type.iter().cloned());
        self.special_needs.extend(other.special_needs.iter().cloned());
        self
    }

    /// `true` when any of `tokens` is present in `slot`.
    pub fn any(slot: &BTreeSet<String>, tokens: &[&str]) -> bool {
        tokens.iter().any(|t| slot.contains(*t))
    }

    /// Human readable list of the active slots, e.g. `dietary: vegan, vegetarian`.
    pub fn summary(&self) -> Vec<String> {
        self.slots()
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(name, s)| {
                let joined = s.iter().cloned().collect::<Vec<_>>().join(", ");
                format!("{}: {}", name.replace('_', " "), joined)
            })
            .collect()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl<'de> Deserialize<'de> for FilterSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(normalize(Some(&raw)))
    }
}

/// Canonicalize an arbitrarily shaped filter payload.
///
/// ```
/// use localeats::filters::normalize;
/// use serde_json::json;
/// let f = normalize(Some(&json!({"dietary": " Vegan ", "service": ["Outdoor", ""]})));
/// assert!(f.dietary.contains("vegan"));
/// assert!(f.service_type.contains("outdoor"));
/// assert_eq!(f.service_type.len(), 1);
/// assert!(normalize(None).is_empty());
/// ```
pub fn normalize(raw: Option<&Value>) -> FilterSet {
    let map = match raw {
        Some(Value::Object(map)) => map,
        _ => return FilterSet::default(),
    };
    FilterSet {
        dietary: slot(map, "dietary", None),
        meal_time: slot(map, "meal_time", None),
        accessibility: slot(map, "accessibility", None),
        service_type: slot(map, "service_type", Some("service")),
        special_needs: slot(map, "special_needs", Some("special")),
    }
}

fn slot(map: &Map<String, Value>, key: &str, alias: Option<&str>) -> BTreeSet<String> {
    let canonical = tokens(map.get(key));
    match alias {
        Some(alias) if canonical.is_empty() => tokens(map.get(alias)),
        _ => canonical,
    }
}

fn tokens(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        None | Some(Value::Null) => BTreeSet::new(),
        Some(Value::Array(items)) => items.iter().filter_map(token).collect(),
        Some(other) => token(other).into_iter().collect(),
    }
}

fn token(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_lowercase(),
        other => other.to_string().trim().to_lowercase(),
    };
    (!text.is_empty()).then_some(text)
}
