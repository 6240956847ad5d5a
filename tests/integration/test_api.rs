//! Integration tests for the HTTP API.
//!
//! These tests drive a real server bound to an ephemeral port through
//! complete learner flows: scheduling, practice, progress and the weekly
//! report built from what the server persisted.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{json, Value};
use tutor_orchestrator::{
    create_router, AppState, Config, Context, LearnerProfile, MemoryStore, Orchestrator,
    Persistence, Schedule,
};
use tutor_report::{DayActivity, MarkdownGenerator, PillarScores, ReportInput, WeeklyReport};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// A running server and the store behind it.
struct TestServer {
    base_url: String,
    store: Arc<MemoryStore>,
    client: reqwest::Client,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn post_interaction(&self, body: Value) -> Value {
        let response = self
            .client
            .post(format!("{}/api/interactions", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("Request failed");
        assert_eq!(response.status(), 200, "Interaction rejected: {body}");
        response.json().await.expect("Invalid JSON response")
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .expect("Request failed")
    }
}

/// Spawns the test server with a fresh in-memory store.
async fn spawn_test_server() -> TestServer {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let store = Arc::new(MemoryStore::new());
    let persistence: Arc<dyn Persistence> = store.clone();
    let orchestrator = Orchestrator::new(Context::new(Arc::new(Config::default()), persistence));
    let router = create_router(AppState::new(orchestrator));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base_url: format!("http://{addr}"),
        store,
        client: reqwest::Client::new(),
        _handle: handle,
    }
}

// ============================================================================
// Status Tests
// ============================================================================

#[tokio::test]
async fn test_status_reports_running_service() {
    let server = spawn_test_server().await;

    let response = server.get("/api/status").await;
    assert_eq!(response.status(), 200);

    let status: Value = response.json().await.expect("Invalid JSON");
    assert_eq!(status["status"], "running");
    assert_eq!(status["activeSpeakingSessions"], 0);
    assert!(status["version"].is_string());
}

// ============================================================================
// Routing Tests
// ============================================================================

#[tokio::test]
async fn test_unknown_request_type_returns_error_payload() {
    let server = spawn_test_server().await;

    let body = server
        .post_interaction(json!({"learner_id": "ana", "request_type": "teleport"}))
        .await;

    assert_eq!(body["status"], "error");
    assert!(body["error"]
        .as_str()
        .is_some_and(|e| e.contains("Unknown request type: teleport")));
    assert!(body["supported_types"]
        .as_array()
        .is_some_and(|types| types.iter().any(|t| t == "get_schedule")));
    assert!(body["request_id"].is_string());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_empty_learner_id_is_rejected() {
    let server = spawn_test_server().await;

    let response = server
        .client
        .post(format!("{}/api/interactions", server.base_url))
        .json(&json!({"learner_id": " ", "request_type": "get_progress"}))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.expect("Invalid JSON");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_concurrent_interactions_all_finalize() {
    let server = Arc::new(spawn_test_server().await);

    let mut handles = Vec::new();
    for (i, request_type) in ["get_progress", "get_next_activity", "get_schedule", "bogus"]
        .iter()
        .cycle()
        .take(12)
        .enumerate()
    {
        let server = Arc::clone(&server);
        let body = json!({"learner_id": format!("learner_{i}"), "request_type": request_type});
        handles.push(tokio::spawn(async move { server.post_interaction(body).await }));
    }

    let mut request_ids = Vec::new();
    for handle in handles {
        let body = handle.await.expect("Task panicked");
        assert!(body["status"] == "success" || body["status"] == "error");
        request_ids.push(body["request_id"].as_str().unwrap_or_default().to_string());
    }

    request_ids.sort();
    request_ids.dedup();
    assert_eq!(request_ids.len(), 12);
}

// ============================================================================
// Learner Flow Tests
// ============================================================================

#[tokio::test]
async fn test_schedule_practice_and_progress_flow() {
    let server = spawn_test_server().await;

    // A new learner with no review items gets a speaking filler entry.
    let body = server
        .post_interaction(json!({
            "learner_id": "ana",
            "request_type": "get_schedule",
            "activity_input": {"date": "2026-03-02"}
        }))
        .await;
    assert_eq!(body["type"], "daily_schedule");
    assert_eq!(body["status"], "success");
    let entry_id = body["schedule"]["scheduled_reviews"][0]["id"]
        .as_str()
        .expect("Schedule has no entries")
        .to_string();

    // Answer a vocabulary item and complete the schedule entry with it.
    let body = server
        .post_interaction(json!({
            "learner_id": "ana",
            "request_type": "vocabulary_exercise",
            "activity_input": {
                "word_id": "w_time",
                "answer": "time",
                "correct_answer": "time",
                "response_time_ms": 1500,
                "schedule_entry_id": entry_id,
                "schedule_date": "2026-03-02"
            }
        }))
        .await;
    assert_eq!(body["type"], "vocabulary_answer");
    assert_eq!(body["correct"], true);
    assert_eq!(body["quality"], 5);
    assert_eq!(body["next_review_days"], 1);

    // The review item and the completed entry were persisted.
    let item = server
        .store
        .get_review_item("ana", "w_time")
        .await
        .expect("Store failed")
        .expect("Review item missing");
    assert_eq!(item.practice_count, 1);

    let response = server
        .get("/api/learners/ana/schedule?date=2026-03-02")
        .await;
    assert_eq!(response.status(), 200);
    let schedule: Schedule = response.json().await.expect("Invalid schedule");
    assert_eq!(schedule.goal_progress.activities_completed, 1);
    assert_eq!(schedule.completed_reviews.len(), 1);

    // Progress reflects the practice.
    let body = server
        .post_interaction(json!({"learner_id": "ana", "request_type": "get_progress"}))
        .await;
    assert_eq!(body["type"], "progress_overview");
    assert_eq!(body["total_activities"], 1);
    assert_eq!(body["current_streak"], 1);

    let response = server.get("/api/learners/ana").await;
    assert_eq!(response.status(), 200);
    let profile: LearnerProfile = response.json().await.expect("Invalid profile");
    assert_eq!(profile.stats.total_activities, 1);
    assert_eq!(profile.sessions_since_last_assessment, 1);
}

#[tokio::test]
async fn test_weekly_report_from_served_data() {
    let server = spawn_test_server().await;

    for date in ["2026-03-03", "2026-03-05"] {
        let body = server
            .post_interaction(json!({
                "learner_id": "ana",
                "request_type": "get_schedule",
                "activity_input": {"date": date}
            }))
            .await;
        let entry_id = body["schedule"]["scheduled_reviews"][0]["id"].clone();

        server
            .post_interaction(json!({
                "learner_id": "ana",
                "request_type": "vocabulary_exercise",
                "activity_input": {
                    "word_id": "w_time",
                    "answer": 0,
                    "correct_index": 0,
                    "response_time_ms": 90_000,
                    "schedule_entry_id": entry_id,
                    "schedule_date": date
                }
            }))
            .await;
    }

    let profile: LearnerProfile = server
        .get("/api/learners/ana")
        .await
        .json()
        .await
        .expect("Invalid profile");
    let week_end = NaiveDate::from_ymd_opt(2026, 3, 8).expect("Invalid date");
    let week_start = NaiveDate::from_ymd_opt(2026, 3, 2).expect("Invalid date");
    let schedules = server
        .store
        .list_schedules("ana", week_start, week_end)
        .await
        .expect("Store failed");
    assert_eq!(schedules.len(), 2);

    let input = ReportInput {
        learner_id: profile.id.clone(),
        level: profile.level.to_string(),
        week_end,
        daily_goal_minutes: profile.daily_goal_minutes,
        current_streak: profile.stats.current_streak,
        longest_streak: profile.stats.longest_streak,
        scores: PillarScores {
            vocabulary: profile.scores.vocabulary,
            grammar: profile.scores.grammar,
            pronunciation: profile.scores.pronunciation,
            speaking: profile.scores.speaking,
        },
        days: schedules
            .iter()
            .map(|s| DayActivity {
                date: s.date,
                minutes_studied: s.goal_progress.minutes_studied,
                activities_completed: s.goal_progress.activities_completed,
                planned_activities: s.goal_progress.total_activities,
            })
            .collect(),
        ..ReportInput::default()
    };
    let report = WeeklyReport::build(&input).expect("Report failed");

    // 90 seconds per answer rounds up to two minutes.
    assert_eq!(report.days_active, 2);
    assert_eq!(report.activities_completed, 2);
    assert_eq!(report.total_study_minutes, 4);
    assert_eq!(report.daily_breakdown[1].activities, 1);
    assert_eq!(report.areas_to_improve.len(), 3);
    assert_eq!(report.areas_to_improve[0], "Focus on grammar: 0%");

    let markdown = MarkdownGenerator::new(&report).generate();
    assert!(markdown.contains("| Tue 2026-03-03 | 2 | 1 | - |"));
    assert!(markdown.contains("| Days Active | 2 of 7 |"));
}

// ============================================================================
// Learner Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_put_then_get_learner() {
    let server = spawn_test_server().await;

    let mut profile = LearnerProfile::new("ben", 45);
    profile.name = "Ben".to_string();
    profile.learning_goals = vec!["data_engineering".to_string()];

    let response = server
        .client
        .put(format!("{}/api/learners/ben", server.base_url))
        .json(&profile)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), 200);

    let stored: LearnerProfile = server
        .get("/api/learners/ben")
        .await
        .json()
        .await
        .expect("Invalid profile");
    assert_eq!(stored, profile);

    // The stored goal drives the next schedule.
    let body = server
        .post_interaction(json!({
            "learner_id": "ben",
            "request_type": "get_schedule",
            "activity_input": {"date": "2026-03-02"}
        }))
        .await;
    assert_eq!(body["schedule"]["goal_progress"]["goal_minutes"], 45);
}

#[tokio::test]
async fn test_missing_records_are_not_found() {
    let server = spawn_test_server().await;

    assert_eq!(server.get("/api/learners/nobody").await.status(), 404);
    assert_eq!(
        server
            .get("/api/learners/nobody/schedule?date=2026-03-02")
            .await
            .status(),
        404
    );
    assert_eq!(
        server
            .get("/api/learners/nobody/schedule?date=March")
            .await
            .status(),
        400
    );
}
