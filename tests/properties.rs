mod common;

use common::*;
use localeats::config::ValidatorSettings;
use localeats::filters::normalize;
use localeats::geo::{haversine_m, Coordinates};
use localeats::llm::LlmProfile;
use localeats::message::{AgentMessage, Stage};
use localeats::researcher::{MaxPrice, ResearchCriteria, Researcher};
use localeats::restaurant::{CandidateSet, Restaurant};
use localeats::reviewer::parse_score;
use localeats::validator::{Rejection, Validator};
use serde_json::{json, Value};
use std::sync::Arc;

#[test]
fn normalizing_twice_changes_nothing() {
    let shapes = [
        Value::Null,
        json!("vegan"),
        json!(["vegan"]),
        json!({}),
        json!({"dietary": "Vegan", "meal_time": ["Lunch", " dinner "]}),
        json!({"service": "Takeout", "special": ["Live_Music", null, ""]}),
        json!({"service_type": ["outdoor"], "service": ["delivery"], "accessibility": 3}),
    ];
    for shape in &shapes {
        let once = normalize(Some(shape));
        let twice = normalize(Some(&once.to_value()));
        assert_eq!(once, twice, "{shape}");
    }
    assert_eq!(normalize(None), normalize(Some(&Value::Null)));
}

#[test]
fn score_parsing_tolerates_drift() {
    assert_eq!(parse_score("OVERALL: 9"), 9);
    assert_eq!(parse_score("Score: 11"), 10);
    assert_eq!(parse_score("no numbers here"), 7);
    assert_eq!(parse_score("That was a solid 8/10."), 8);
}

#[test]
fn haversine_is_zero_on_self_and_symmetric() {
    let points = [
        Coordinates::new(42.3601, -71.0942),
        Coordinates::new(42.3736, -71.1197),
        Coordinates::new(42.3099, -71.1111),
        Coordinates::new(-33.8688, 151.2093),
    ];
    for a in points {
        assert_eq!(haversine_m(a, a), 0.0);
        for b in points {
            let ab = haversine_m(a, b);
            let ba = haversine_m(b, a);
            assert!((ab - ba).abs() < 1e-6);
            assert!(ab >= 0.0);
        }
    }
}

#[test]
fn price_ceiling_keeps_matching_rows_in_order() {
    let tiers = [1u8, 2, 3, 4, 2, 1, 3, 4, 2, 1];
    let rows: CandidateSet = tiers
        .iter()
        .enumerate()
        .map(|(i, tier)| Restaurant {
            id: format!("r{i}"),
            name: format!("r{i}"),
            price_level: Some(*tier),
            ..Default::default()
        })
        .collect();
    let criteria = ResearchCriteria {
        max_price: MaxPrice::Level(2),
        ..Default::default()
    };
    let out = Researcher::new().filter_and_rank(
        AgentMessage::success(Stage::Retriever, rows, 0.9),
        &criteria,
    );
    let ids: Vec<_> = out.data().unwrap().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r0", "r1", "r4", "r5", "r8", "r9"]);
    assert_eq!(ids.len(), tiers.iter().filter(|t| **t <= 2).count());
}

#[test]
fn researcher_never_adds_rows() {
    let rows: CandidateSet = fixture_rows().into_iter().collect();
    let before = rows.len();
    for max_price in ["any", "1", "2", "3"] {
        let criteria = ResearchCriteria {
            max_price: max_price.parse().unwrap(),
            min_safety: 70.0,
            filters: normalize(Some(&json!({"dietary": "vegetarian"}))),
            ..Default::default()
        };
        let out = Researcher::new().filter_and_rank(
            AgentMessage::success(Stage::Retriever, rows.clone(), 0.9),
            &criteria,
        );
        let after = out.payload.as_ref().map_or(0, |s| s.len());
        assert!(after <= before);
    }
}

fn validator(chat: ScriptedChat) -> Validator {
    Validator::new(
        Arc::new(chat),
        LlmProfile::default(),
        ValidatorSettings::default(),
    )
}

#[tokio::test]
async fn validator_reference_cases() {
    let yes = validator(ScriptedChat::new().always(VALIDATOR, "YES"));
    assert_eq!(yes.check("pizza near MIT").await, Ok(()));
    assert_eq!(yes.check("cambodian restaurant").await, Ok(()));
    assert!(matches!(
        yes.check("cambodia").await,
        Err(Rejection::GeographicRestriction { .. })
    ));

    let no = validator(ScriptedChat::new().always(VALIDATOR, "NO"));
    assert_eq!(
        no.check("best hotels in boston").await,
        Err(Rejection::NotFoodRelated)
    );
}

#[tokio::test]
async fn validator_falls_back_to_keywords() {
    let offline = validator(ScriptedChat::new());
    assert_eq!(offline.check("cheap sushi spot").await, Ok(()));
    assert_eq!(
        offline.check("weather tomorrow").await,
        Err(Rejection::NoRestaurantKeywords)
    );
    // "eat" must not match inside "weather"
    assert_eq!(
        offline.check("great weather").await,
        Err(Rejection::NoRestaurantKeywords)
    );
}
