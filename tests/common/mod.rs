#![allow(dead_code)]

use async_trait::async_trait;
use localeats::geo::Coordinates;
use localeats::llm::mock_embed::MockEmbed;
use localeats::llm::{CanChat, LlmProfile, TokenStream};
use localeats::restaurant::{Attribute, Restaurant};
use localeats::store::{InMemoryStore, RestaurantStore, StoredRestaurant};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const VALIDATOR: &str = "Answer with ONLY \"YES\" or \"NO\"";
pub const ANALYZER: &str = "query analyst";
pub const REVIEWER: &str = "strict QA reviewer";
pub const WRITER: &str = "ONLY recommend from the list";
pub const FOLLOWUP: &str = "intent classifier";

struct Route {
    marker: &'static str,
    replies: VecDeque<Option<String>>,
    calls: usize,
}

/// Model stub that answers by prompt marker.
///
/// Each marker owns a queue of replies; the last one repeats once the queue
/// runs dry. `None` makes that call fail. Routes are matched in the order
/// they were added, so add the reviewer before the writer: the reviewer
/// prompt quotes the writer's text.
#[derive(Default)]
pub struct ScriptedChat {
    routes: Mutex<Vec<Route>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<I, S>(self, marker: &'static str, replies: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        self.routes.lock().unwrap().push(Route {
            marker,
            replies: replies.into_iter().map(|r| r.map(Into::into)).collect(),
            calls: 0,
        });
        self
    }

    /// Same reply every time.
    pub fn always(self, marker: &'static str, reply: &str) -> Self {
        self.on(marker, [Some(reply)])
    }

    pub fn calls(&self, marker: &str) -> usize {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.marker == marker)
            .map_or(0, |r| r.calls)
    }

    /// Validator says yes, analyzer extracts nothing.
    pub fn accepting() -> Self {
        Self::new()
            .always(VALIDATOR, "YES")
            .always(ANALYZER, "{}")
    }
}

#[async_trait]
impl CanChat for ScriptedChat {
    async fn chat_stream(
        &self,
        _profile: &LlmProfile,
        prompt: &str,
        _temperature: f32,
    ) -> anyhow::Result<TokenStream> {
        let reply = {
            let mut routes = self.routes.lock().unwrap();
            let Some(route) = routes.iter_mut().find(|r| prompt.contains(r.marker)) else {
                anyhow::bail!("no scripted reply for prompt");
            };
            route.calls += 1;
            if route.replies.len() > 1 {
                route.replies.pop_front().flatten()
            } else {
                route.replies.front().cloned().flatten()
            }
        };
        match reply {
            Some(text) => Ok(Box::new(tokio_stream::iter(vec![text]))),
            None => anyhow::bail!("scripted failure"),
        }
    }
}

pub fn restaurant(
    id: &str,
    cuisine: &str,
    neighborhood: &str,
    price: u8,
    overall: f64,
    safety: f64,
) -> Restaurant {
    Restaurant {
        id: id.into(),
        name: format!("{cuisine} Place {id}"),
        cuisine: cuisine.into(),
        city: "Boston".into(),
        neighborhood: neighborhood.into(),
        price_level: Some(price),
        overall_score: Some(overall),
        safety_score: Some(safety),
        tier: Some("Good".into()),
        ..Default::default()
    }
}

pub fn at(mut r: Restaurant, lat: f64, lon: f64) -> Restaurant {
    r.location = Some(Coordinates::new(lat, lon));
    r
}

pub fn flagged(mut r: Restaurant, attr: Attribute, value: bool) -> Restaurant {
    r.flags.insert(attr, value);
    r
}

/// Small Boston-ish data set.
pub fn fixture_rows() -> Vec<Restaurant> {
    vec![
        at(
            flagged(restaurant("t1", "Mexican", "Kendall Square", 1, 88.0, 92.0), Attribute::Vegetarian, true),
            42.3625,
            -71.0862,
        ),
        at(
            flagged(restaurant("t2", "Mexican", "Back Bay", 2, 75.0, 85.0), Attribute::Vegetarian, false),
            42.3503,
            -71.0810,
        ),
        at(restaurant("t3", "Mexican", "Jamaica Plain", 3, 91.0, 60.0), 42.3099, -71.1111),
        restaurant("p1", "Pizza", "North End", 2, 80.0, 70.0),
        at(restaurant("p2", "Pizza", "Fenway", 1, 65.0, 95.0), 42.3467, -71.0972),
        at(restaurant("s1", "Sushi", "Harvard Square", 4, 95.0, 88.0), 42.3736, -71.1197),
    ]
}

pub async fn memory_store(rows: Vec<Restaurant>) -> Arc<dyn RestaurantStore> {
    let records = rows
        .into_iter()
        .map(|r| StoredRestaurant {
            description: format!("{} restaurant serving {} food in {}", r.name, r.cuisine, r.neighborhood),
            restaurant: r,
            embedding: None,
            reviews: Vec::new(),
        })
        .collect();
    Arc::new(
        InMemoryStore::new(records, Arc::new(MockEmbed), LlmProfile::default())
            .await
            .unwrap(),
    )
}
