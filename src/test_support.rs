use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use sqlx::types::Json;
use time::{Date, Duration, Month, PrimitiveDateTime, Time};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::api;
use crate::core::{config::Settings, redis::RedisHandle, security, state::AppState, time::Clock};
use crate::db::models::{Answer, Question, QuestionOption, QuestionWithOptions, Test, TestDefinition};
use crate::db::types::{QuestionType, UserRole};
use crate::repositories::memory::MemoryStore;
use crate::services::attempt_lifecycle::{AttemptService, LifecyclePolicy, Principal};
use crate::services::realtime::{
    events::EventKind, ActivityFeed, BroadcastError, Broadcaster, LocalHub, RealtimeEvent,
};
use crate::services::scoring::ScoringPolicy;

const TEST_SECRET_KEY: &str = "test-secret";

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("CBT_ENV", "test");
    std::env::set_var("CBT_STRICT_CONFIG", "0");
    std::env::set_var("SECRET_KEY", TEST_SECRET_KEY);
    std::env::set_var("STORAGE_BACKEND", "memory");
    std::env::set_var("REDIS_HOST", "127.0.0.1");
    std::env::set_var("REDIS_PORT", "6379");
    std::env::set_var("REDIS_DB", "1");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for key in [
        "ENVIRONMENT",
        "ALGORITHM",
        "API_V1_STR",
        "DATABASE_URL",
        "REDIS_PASSWORD",
        "REALTIME_REDIS_FANOUT",
        "REALTIME_CHANNEL_CAPACITY",
        "ACTIVITY_FEED_CAPACITY",
        "EXPIRY_SWEEP_INTERVAL_SECONDS",
        "TIMER_SKEW_TOLERANCE_SECONDS",
        "MULTI_SELECT_PARTIAL_CREDIT",
        "BACKEND_CORS_ORIGINS",
    ] {
        std::env::remove_var(key);
    }
}

pub(crate) fn fixed_time() -> PrimitiveDateTime {
    let date = Date::from_calendar_date(2025, Month::March, 10).expect("date");
    PrimitiveDateTime::new(date, Time::from_hms(9, 0, 0).expect("time"))
}

/// Clock that only moves when a test says so.
pub(crate) struct ManualClock {
    now: StdMutex<PrimitiveDateTime>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self { now: StdMutex::new(fixed_time()) }
    }
}

impl ManualClock {
    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }

    pub(crate) fn set(&self, value: PrimitiveDateTime) {
        *self.now.lock().expect("clock lock") = value;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> PrimitiveDateTime {
        *self.now.lock().expect("clock lock")
    }
}

#[derive(Default)]
pub(crate) struct RecordingBroadcaster {
    events: StdMutex<Vec<RealtimeEvent>>,
    fail: bool,
}

impl RecordingBroadcaster {
    pub(crate) fn failing() -> Self {
        Self { events: StdMutex::default(), fail: true }
    }

    pub(crate) fn events(&self) -> Vec<RealtimeEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub(crate) fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|event| event.event).collect()
    }

    pub(crate) fn clear(&self) {
        self.events.lock().expect("events lock").clear();
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn publish(&self, event: RealtimeEvent) -> Result<(), BroadcastError> {
        if self.fail {
            let err = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
            return Err(BroadcastError::Encoding(err));
        }
        self.events.lock().expect("events lock").push(event);
        Ok(())
    }
}

/// Published test with `question_count` one-point single-choice questions. The first
/// option of every question is the correct one.
pub(crate) fn single_choice_test(
    duration_minutes: i32,
    max_attempts: i32,
    question_count: usize,
) -> TestDefinition {
    let now = fixed_time();
    let test = Test {
        id: Uuid::new_v4(),
        title: "Sample test".to_string(),
        duration_minutes,
        max_attempts,
        is_published: true,
        available_from: None,
        available_until: None,
        created_at: now,
        updated_at: now,
    };

    let questions = (0..question_count)
        .map(|index| {
            let question = Question {
                id: Uuid::new_v4(),
                test_id: test.id,
                question_type: QuestionType::SingleChoice,
                text: format!("Question {}", index + 1),
                points: 1.0,
                order_index: index as i32,
            };
            let options = ["right", "wrong"]
                .iter()
                .enumerate()
                .map(|(order, text)| QuestionOption {
                    id: Uuid::new_v4(),
                    question_id: question.id,
                    text: text.to_string(),
                    is_correct: order == 0,
                    order_index: order as i32,
                })
                .collect();
            QuestionWithOptions { question, options }
        })
        .collect();

    TestDefinition { test, questions }
}

pub(crate) fn correct_option(definition: &TestDefinition, index: usize) -> Uuid {
    definition.questions[index].options.iter().find(|o| o.is_correct).expect("correct option").id
}

pub(crate) fn wrong_option(definition: &TestDefinition, index: usize) -> Uuid {
    definition.questions[index].options.iter().find(|o| !o.is_correct).expect("wrong option").id
}

pub(crate) fn answer_row(
    question_id: Uuid,
    is_correct: bool,
    points_earned: f64,
    now: PrimitiveDateTime,
) -> Answer {
    Answer {
        id: Uuid::new_v4(),
        attempt_id: Uuid::new_v4(),
        question_id,
        option_id: None,
        selected_option_ids: Json(Vec::new()),
        text_answer: None,
        is_correct,
        points_earned,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn student() -> Principal {
    Principal { user_id: Uuid::new_v4(), role: UserRole::Student }
}

pub(crate) fn admin() -> Principal {
    Principal { user_id: Uuid::new_v4(), role: UserRole::Admin }
}

pub(crate) fn default_policy() -> LifecyclePolicy {
    LifecyclePolicy { scoring: ScoringPolicy::default(), timer_skew_tolerance_seconds: 5 }
}

pub(crate) struct LifecycleFixture {
    pub(crate) service: AttemptService,
    pub(crate) store: MemoryStore,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) events: Arc<RecordingBroadcaster>,
}

pub(crate) fn lifecycle_fixture() -> LifecycleFixture {
    lifecycle_fixture_with(default_policy(), RecordingBroadcaster::default())
}

pub(crate) fn lifecycle_fixture_with(
    policy: LifecyclePolicy,
    broadcaster: RecordingBroadcaster,
) -> LifecycleFixture {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::default());
    let events = Arc::new(broadcaster);
    let service =
        AttemptService::new(Arc::new(store.clone()), events.clone(), clock.clone(), policy);

    LifecycleFixture { service, store, clock, events }
}

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) store: MemoryStore,
    pub(crate) clock: Arc<ManualClock>,
    _guard: OwnedMutexGuard<()>,
}

fn build_memory_state(settings: Settings) -> (AppState, MemoryStore, Arc<ManualClock>) {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::default());
    let hub = LocalHub::new(settings.realtime().channel_capacity);
    let feed = ActivityFeed::new(settings.realtime().activity_feed_capacity, clock.clone());
    let service = AttemptService::new(
        Arc::new(store.clone()),
        Arc::new(hub.clone()),
        clock.clone(),
        default_policy(),
    );
    let redis = RedisHandle::new(settings.redis().redis_url());

    (AppState::new(settings, service, hub, feed, redis), store, clock)
}

/// State over the in-memory store, a local hub and a manual clock.
pub(crate) fn memory_state(settings: Settings) -> AppState {
    build_memory_state(settings).0
}

pub(crate) async fn setup_test_context() -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let (state, store, clock) = build_memory_state(settings);
    let app = api::router::router(state.clone());

    TestContext { state, app, store, clock, _guard: guard }
}

pub(crate) fn bearer_token(principal: Principal, settings: &Settings) -> String {
    security::create_access_token(principal.user_id, principal.role, settings, Duration::hours(1))
        .expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
