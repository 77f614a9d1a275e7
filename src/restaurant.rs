use crate::geo::{Coordinates, METERS_PER_MILE};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Boolean capability columns a restaurant row may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Vegetarian,
    WheelchairAccessible,
    GoodForGroups,
    GoodForChildren,
    ServesBreakfast,
    ServesLunch,
    ServesDinner,
    ServesCoffee,
    OutdoorSeating,
    Takeout,
    Delivery,
    Reservable,
    AllowsDogs,
    LiveMusic,
    OpenNow,
}

impl Attribute {
    pub const ALL: [Attribute; 15] = [
        Attribute::Vegetarian,
        Attribute::WheelchairAccessible,
        Attribute::GoodForGroups,
        Attribute::GoodForChildren,
        Attribute::ServesBreakfast,
        Attribute::ServesLunch,
        Attribute::ServesDinner,
        Attribute::ServesCoffee,
        Attribute::OutdoorSeating,
        Attribute::Takeout,
        Attribute::Delivery,
        Attribute::Reservable,
        Attribute::AllowsDogs,
        Attribute::LiveMusic,
        Attribute::OpenNow,
    ];

    /// Columns returned by the similarity search itself. Everything else
    /// arrives through the enrichment lookup.
    pub fn is_core(self) -> bool {
        matches!(
            self,
            Attribute::Vegetarian
                | Attribute::WheelchairAccessible
                | Attribute::GoodForGroups
                | Attribute::OpenNow
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            Attribute::Vegetarian => "has vegetarian options",
            Attribute::WheelchairAccessible => "wheelchair friendly",
            Attribute::GoodForGroups => "suitable for groups",
            Attribute::GoodForChildren => "family/kid-friendly",
            Attribute::ServesBreakfast => "serves breakfast",
            Attribute::ServesLunch => "serves lunch",
            Attribute::ServesDinner => "serves dinner",
            Attribute::ServesCoffee => "serves coffee",
            Attribute::OutdoorSeating => "outdoor dining available",
            Attribute::Takeout => "takeout available",
            Attribute::Delivery => "delivery available",
            Attribute::Reservable => "accepts reservations",
            Attribute::AllowsDogs => "pet-friendly",
            Attribute::LiveMusic => "has live music",
            Attribute::OpenNow => "currently open",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = serde_json::to_value(self).map_err(|_| fmt::Error)?;
        f.write_str(v.as_str().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    pub meters: f64,
    pub miles: f64,
}

impl Distance {
    pub fn from_meters(meters: f64) -> Self {
        Self {
            meters,
            miles: meters / METERS_PER_MILE,
        }
    }
}

/// Columns supplied by the enrichment lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Details {
    pub address: Option<String>,
    pub phone: Option<String>,
    pub rating: Option<f64>,
    pub url: Option<String>,
    pub location: Option<Coordinates>,
    #[serde(default)]
    pub flags: BTreeMap<Attribute, bool>,
}

/// One candidate row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cuisine: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub neighborhood: String,
    /// Price tier 1 to 4.
    pub price_level: Option<u8>,
    /// 0 to 100.
    pub overall_score: Option<f64>,
    /// 0 to 100.
    pub safety_score: Option<f64>,
    pub tier: Option<String>,
    pub health_risk: Option<String>,
    pub nearest_stop_m: Option<f64>,
    #[serde(default)]
    pub flags: BTreeMap<Attribute, bool>,

    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub location: Option<Coordinates>,

    /// Set by the similarity search.
    #[serde(default)]
    pub similarity: Option<f64>,
    /// Set when distances are measured from a reference point.
    #[serde(default)]
    pub distance: Option<Distance>,
}

impl Restaurant {
    pub fn flag(&self, attr: Attribute) -> Option<bool> {
        self.flags.get(&attr).copied()
    }

    pub fn enrich(&mut self, details: Details) {
        self.address = details.address.or(self.address.take());
        self.phone = details.phone.or(self.phone.take());
        self.rating = details.rating.or(self.rating);
        self.url = details.url.or(self.url.take());
        self.location = details.location.or(self.location);
        self.flags.extend(details.flags);
    }

    /// Split into the row the similarity search returns and the columns the
    /// enrichment lookup adds.
    pub fn split_details(&self) -> (Restaurant, Details) {
        let mut core = self.clone();
        let details = Details {
            address: core.address.take(),
            phone: core.phone.take(),
            rating: core.rating.take(),
            url: core.url.take(),
            location: core.location.take(),
            flags: self
                .flags
                .iter()
                .filter(|(a, _)| !a.is_core())
                .map(|(a, v)| (*a, *v))
                .collect(),
        };
        core.flags.retain(|a, _| a.is_core());
        (core, details)
    }

    /// `$` repeated by price tier, `N/A` when unknown.
    pub fn price_symbols(&self) -> String {
        match self.price_level {
            Some(level) if level > 0 => "$".repeat(level as usize),
            _ => "N/A".into(),
        }
    }

    pub fn locality(&self) -> &str {
        if self.neighborhood.is_empty() {
            &self.city
        } else {
            &self.neighborhood
        }
    }
}

/// Descending order for optional scores, missing values last.
pub fn desc_nulls_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Ascending order for optional values, missing values last.
pub fn asc_nulls_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Ordered set of candidate rows.
///
/// Stages take a set by value or clone it; none of them hand a mutated set
/// back to the stage that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    rows: Vec<Restaurant>,
}

impl CandidateSet {
    pub fn new(rows: Vec<Restaurant>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Restaurant] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Restaurant> {
        self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Restaurant> {
        self.rows.iter()
    }

    /// A flag column exists when at least one row carries the key.
    pub fn has_column(&self, attr: Attribute) -> bool {
        self.rows.iter().any(|r| r.flags.contains_key(&attr))
    }

    pub fn has_coordinates(&self) -> bool {
        self.rows.iter().any(|r| r.location.is_some())
    }

    pub fn retain(&mut self, keep: impl FnMut(&Restaurant) -> bool) {
        self.rows.retain(keep)
    }

    pub fn sort_by(&mut self, cmp: impl FnMut(&Restaurant, &Restaurant) -> Ordering) {
        self.rows.sort_by(cmp)
    }

    pub fn for_each_mut(&mut self, f: impl FnMut(&mut Restaurant)) {
        self.rows.iter_mut().for_each(f)
    }

    /// First `n` rows as a new set.
    pub fn top(&self, n: usize) -> CandidateSet {
        Self::new(self.rows.iter().take(n).cloned().collect())
    }
}

impl FromIterator<Restaurant> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = Restaurant>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for CandidateSet {
    type Item = Restaurant;
    type IntoIter = std::vec::IntoIter<Restaurant>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
