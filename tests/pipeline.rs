mod common;

use common::*;
use localeats::config::Settings;
use localeats::followup::{Followup, ResultSnapshot};
use localeats::geo::{Coordinates, Place, TableGeocoder};
use localeats::message::Stage;
use localeats::orchestrator::{Orchestrator, PipelineError, PipelineRequest};
use localeats::status::{Reporter, StageState};
use std::sync::Arc;

const MIT: Coordinates = Coordinates {
    latitude: 42.3601,
    longitude: -71.0942,
};

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.pipeline.min_similarity = 0.0;
    settings
}

async fn orchestrator_with(chat: Arc<ScriptedChat>, settings: &Settings) -> Orchestrator {
    let geocoder = TableGeocoder::new([("mit".to_string(), MIT)]);
    Orchestrator::new(
        chat,
        memory_store(fixture_rows()).await,
        Arc::new(geocoder),
        settings,
    )
}

async fn orchestrator(chat: Arc<ScriptedChat>) -> Orchestrator {
    orchestrator_with(chat, &settings()).await
}

fn request(query: &str, iterations: usize) -> PipelineRequest {
    let mut req = PipelineRequest::new(query);
    req.max_iterations = iterations;
    req.quality_threshold = 8;
    req
}

#[tokio::test]
async fn stops_at_first_score_meeting_threshold() {
    let chat = Arc::new(
        ScriptedChat::accepting()
            .on(
                REVIEWER,
                [Some("OVERALL: 5"), Some("OVERALL: 9"), Some("OVERALL: 3")],
            )
            .on(WRITER, [Some("Draft one"), Some("Draft two"), Some("Draft three")]),
    );
    let result = orchestrator(chat.clone())
        .await
        .run_pipeline(&request("mexican food", 3))
        .await
        .unwrap();
    assert_eq!(result.iterations, 2);
    assert_eq!(result.quality_score, 9);
    assert_eq!(result.narrative, "Draft two");
    assert_eq!(chat.calls(WRITER), 2);
    assert_eq!(chat.calls(REVIEWER), 2);
}

#[tokio::test]
async fn returns_best_attempt_when_threshold_never_met() {
    let chat = Arc::new(
        ScriptedChat::accepting()
            .on(REVIEWER, [Some("OVERALL: 4"), Some("OVERALL: 5")])
            .on(WRITER, [Some("First"), Some("Second")]),
    );
    let result = orchestrator(chat.clone())
        .await
        .run_pipeline(&request("mexican food", 2))
        .await
        .unwrap();
    assert_eq!(result.iterations, 2);
    assert_eq!(result.quality_score, 5);
    assert_eq!(result.narrative, "Second");

    let chat = Arc::new(
        ScriptedChat::accepting()
            .on(REVIEWER, [Some("OVERALL: 6"), Some("OVERALL: 3")])
            .on(WRITER, [Some("First"), Some("Second")]),
    );
    let result = orchestrator(chat)
        .await
        .run_pipeline(&request("mexican food", 2))
        .await
        .unwrap();
    assert_eq!(result.quality_score, 6);
    assert_eq!(result.narrative, "First");
}

#[tokio::test]
async fn writer_failure_only_costs_one_iteration() {
    let chat = Arc::new(
        ScriptedChat::accepting()
            .always(REVIEWER, "OVERALL: 6\nFEEDBACK: more detail")
            .on(WRITER, [None, Some("Recovered")]),
    );
    let result = orchestrator(chat.clone())
        .await
        .run_pipeline(&request("mexican food", 2))
        .await
        .unwrap();
    assert_eq!(result.narrative, "Recovered");
    assert_eq!(result.feedback, "more detail");
    assert_eq!(chat.calls(REVIEWER), 1);
}

#[tokio::test]
async fn no_narrative_when_writer_never_answers() {
    let chat = Arc::new(
        ScriptedChat::accepting()
            .always(REVIEWER, "OVERALL: 9")
            .on(WRITER, [None::<&str>]),
    );
    let err = orchestrator(chat.clone())
        .await
        .run_pipeline(&request("mexican food", 2))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoNarrative { .. }));
    assert_eq!(chat.calls(WRITER), 2);
    assert_eq!(chat.calls(REVIEWER), 0);
}

#[tokio::test]
async fn off_topic_query_is_rejected_before_analysis() {
    let chat = Arc::new(
        ScriptedChat::new()
            .always(VALIDATOR, "NO")
            .always(ANALYZER, "{}"),
    );
    let err = orchestrator(chat.clone())
        .await
        .run_pipeline(&request("best hotels in boston", 2))
        .await
        .unwrap_err();
    match &err {
        PipelineError::InputRejected { code, .. } => assert_eq!(code, "not_food_related"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.suggestion().contains("cheap Mexican food"));
    assert_eq!(chat.calls(ANALYZER), 0);
}

#[tokio::test]
async fn far_away_place_is_rejected_without_a_model_call() {
    let chat = Arc::new(ScriptedChat::accepting());
    let err = orchestrator(chat.clone())
        .await
        .run_pipeline(&request("pizza in cambodia", 2))
        .await
        .unwrap_err();
    match &err {
        PipelineError::InputRejected { code, .. } => assert_eq!(code, "geographic_restriction"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.suggestion().contains("Boston"));
    assert_eq!(chat.calls(VALIDATOR), 0);
}

#[tokio::test]
async fn unknown_cuisine_means_no_candidates() {
    let chat = Arc::new(
        ScriptedChat::new()
            .always(VALIDATOR, "YES")
            .always(ANALYZER, r#"{"cuisine": "Klingon"}"#),
    );
    let err = orchestrator(chat)
        .await
        .run_pipeline(&request("klingon food", 2))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoCandidates { .. }));
}

#[tokio::test]
async fn over_constrained_is_distinct_from_no_candidates() {
    let chat = Arc::new(ScriptedChat::accepting().always(WRITER, "unused"));
    let mut req = request("mexican food", 2);
    req.min_safety = 99.0;
    let err = orchestrator(chat)
        .await
        .run_pipeline(&req)
        .await
        .unwrap_err();
    match err {
        PipelineError::OverConstrained {
            summary,
            suggestions,
        } => {
            assert!(summary.contains(&"min safety: 99".to_string()));
            assert_eq!(suggestions.len(), 3);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn analyzer_budget_and_filters_are_applied() {
    let chat = Arc::new(
        ScriptedChat::new()
            .always(VALIDATOR, "YES")
            .always(
                ANALYZER,
                r#"{"cuisine": "Mexican", "budget": {"max_price_level": 2}, "filters": {"dietary": ["vegetarian"]}}"#,
            )
            .always(REVIEWER, "OVERALL: 9")
            .always(WRITER, "Go to t1."),
    );
    let result = orchestrator(chat)
        .await
        .run_pipeline(&request("cheap vegetarian mexican", 2))
        .await
        .unwrap();
    assert_eq!(result.retrieved.len(), 3);
    let ids: Vec<_> = result.researched.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["t1"]);
    assert_eq!(result.spec.cuisine.as_deref(), Some("Mexican"));
}

#[tokio::test]
async fn row_counts_never_grow() {
    let mut settings = settings();
    settings.pipeline.retrieve_limit = 4;
    let chat = Arc::new(
        ScriptedChat::accepting()
            .always(REVIEWER, "OVERALL: 9")
            .always(WRITER, "Narrative."),
    );
    let mut req = request("food", 1);
    req.max_price = "2".parse().unwrap();
    let result = orchestrator_with(chat, &settings)
        .await
        .run_pipeline(&req)
        .await
        .unwrap();
    assert!(result.retrieved.len() <= 4);
    assert!(result.researched.len() <= result.retrieved.len());
    assert!(result.researched.iter().all(|r| r.price_level <= Some(2)));
}

#[tokio::test]
async fn nearby_search_uses_geocoded_center() {
    let chat = Arc::new(
        ScriptedChat::new()
            .always(VALIDATOR, "YES")
            .always(
                ANALYZER,
                r#"{"location": {"name": "mit", "mode": "include_nearby", "radius_miles": 0.5}}"#,
            )
            .always(REVIEWER, "OVERALL: 9")
            .always(WRITER, "Close by."),
    );
    let result = orchestrator(chat)
        .await
        .run_pipeline(&request("food near mit", 1))
        .await
        .unwrap();
    let mut ids: Vec<_> = result.retrieved.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["p1".to_string(), "t1".to_string()]);
}

#[tokio::test]
async fn reference_point_adds_distances() {
    let chat = Arc::new(
        ScriptedChat::accepting()
            .always(REVIEWER, "OVERALL: 9")
            .always(WRITER, "Nearby picks."),
    );
    let mut req = request("food", 1);
    req.reference_point = Some(Place {
        name: "MIT".into(),
        coordinates: MIT,
    });
    let result = orchestrator(chat).await.run_pipeline(&req).await.unwrap();
    for r in result.researched.iter() {
        assert_eq!(r.distance.is_some(), r.location.is_some(), "{}", r.id);
    }
    let kendall = result.researched.iter().find(|r| r.id == "t1").unwrap();
    assert!(kendall.distance.unwrap().miles < 0.5);
}

#[tokio::test]
async fn stages_report_progress() {
    let chat = Arc::new(
        ScriptedChat::accepting()
            .always(REVIEWER, "OVERALL: 9")
            .always(WRITER, "Done."),
    );
    let (reporter, mut rx) = Reporter::channel();
    orchestrator(chat)
        .await
        .with_reporter(reporter)
        .run_pipeline(&request("mexican food", 2))
        .await
        .unwrap();
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events[0].stage, Stage::Validator);
    assert_eq!(events[0].state, StageState::Running);
    assert!(events
        .iter()
        .any(|e| e.stage == Stage::Orchestrator && e.state == StageState::Success));
}

#[tokio::test]
async fn followup_reuses_the_last_result() {
    let chat = Arc::new(
        ScriptedChat::accepting()
            .always(REVIEWER, "OVERALL: 9")
            .always(WRITER, "Several options.")
            .always(FOLLOWUP, r#"{"intent_type": "find_cheapest"}"#),
    );
    let settings = settings();
    let result = orchestrator_with(chat.clone(), &settings)
        .await
        .run_pipeline(&request("food", 1))
        .await
        .unwrap();
    let snapshot = ResultSnapshot::from(&result);
    let followup = Followup::new(
        chat.clone(),
        settings.llm.profile(),
        Arc::new(TableGeocoder::new(Vec::new())),
        &settings.geo,
    );
    let answer = followup
        .run_followup("which is cheapest?", &snapshot, None)
        .await;
    let rows = answer.results().unwrap();
    assert_eq!(rows.rows()[0].price_level, Some(1));
    assert!(rows.len() <= 5);
    assert_eq!(chat.calls(FOLLOWUP), 1);
}
