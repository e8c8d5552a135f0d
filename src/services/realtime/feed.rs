use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock};
use uuid::Uuid;

use super::events::{EventKind, RealtimeEvent, Topic};
use crate::core::time::{format_primitive, Clock};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ActivityEntry {
    pub(crate) event: EventKind,
    pub(crate) received_at: String,
    pub(crate) payload: serde_json::Value,
}

/// Rolling view of an attempt the monitor has seen start and not yet finish.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct InFlightAttempt {
    pub(crate) attempt_id: Uuid,
    pub(crate) user_id: Option<Uuid>,
    pub(crate) test_id: Option<Uuid>,
    pub(crate) test_title: Option<String>,
    pub(crate) started_at: Option<String>,
    pub(crate) answered_questions: u64,
    pub(crate) total_questions: Option<u64>,
    pub(crate) last_activity_at: String,
    #[serde(skip)]
    last_sequence: u64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ActivitySnapshot {
    pub(crate) recent: Vec<ActivityEntry>,
    pub(crate) in_flight: Vec<InFlightAttempt>,
}

/// Bound on tracked in-flight attempts and on remembered completions.
const IN_FLIGHT_CAPACITY: usize = 10_000;

#[derive(Default)]
struct FeedState {
    recent: VecDeque<ActivityEntry>,
    in_flight: HashMap<Uuid, InFlightAttempt>,
    completed: VecDeque<Uuid>,
    completed_lookup: HashSet<Uuid>,
    sequence: u64,
}

impl FeedState {
    /// Drops the least recently active entries, which covers completions lost to lag.
    fn evict_stale(&mut self, limit: usize) {
        while self.in_flight.len() > limit {
            let Some(oldest) =
                self.in_flight.values().min_by_key(|entry| entry.last_sequence).map(|e| e.attempt_id)
            else {
                break;
            };
            self.in_flight.remove(&oldest);
        }
    }

    fn remember_completed(&mut self, attempt_id: Uuid, limit: usize) {
        if !self.completed_lookup.insert(attempt_id) {
            return;
        }
        self.completed.push_back(attempt_id);
        while self.completed.len() > limit {
            if let Some(expired) = self.completed.pop_front() {
                self.completed_lookup.remove(&expired);
            }
        }
    }
}

/// Admin-side consumer of the global topic.
#[derive(Clone)]
pub(crate) struct ActivityFeed {
    capacity: usize,
    in_flight_capacity: usize,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<FeedState>>,
}

fn uuid_field(payload: &serde_json::Value, key: &str) -> Option<Uuid> {
    payload.get(key)?.as_str().and_then(|value| Uuid::parse_str(value).ok())
}

impl ActivityFeed {
    pub(crate) fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(capacity, IN_FLIGHT_CAPACITY, clock)
    }

    fn with_limits(capacity: usize, in_flight_capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight_capacity: in_flight_capacity.max(1),
            clock,
            state: Arc::new(RwLock::new(FeedState::default())),
        }
    }

    pub(crate) async fn apply(&self, event: &RealtimeEvent) {
        if event.topic != Topic::Admin {
            return;
        }
        let Some(attempt_id) = uuid_field(&event.payload, "attempt_id") else {
            tracing::debug!(event = ?event.event, "Admin event without attempt id ignored");
            return;
        };

        let now = format_primitive(self.clock.now());
        let mut state = self.state.write().await;

        state.recent.push_back(ActivityEntry {
            event: event.event,
            received_at: now.clone(),
            payload: event.payload.clone(),
        });
        while state.recent.len() > self.capacity {
            state.recent.pop_front();
        }

        state.sequence += 1;
        let sequence = state.sequence;
        let payload = &event.payload;
        match event.event {
            EventKind::StudentStartedExam => {
                if state.completed_lookup.contains(&attempt_id) {
                    return;
                }
                state.in_flight.insert(
                    attempt_id,
                    InFlightAttempt {
                        attempt_id,
                        user_id: uuid_field(payload, "user_id"),
                        test_id: uuid_field(payload, "test_id"),
                        test_title: payload["test_title"].as_str().map(str::to_string),
                        started_at: payload["started_at"].as_str().map(str::to_string),
                        answered_questions: 0,
                        total_questions: payload["total_questions"].as_u64(),
                        last_activity_at: now,
                        last_sequence: sequence,
                    },
                );
                state.evict_stale(self.in_flight_capacity);
            }
            EventKind::StudentAnsweredQuestion => {
                // A late answer event must not resurrect a finished attempt.
                let Some(entry) = state.in_flight.get_mut(&attempt_id) else {
                    return;
                };
                if let Some(answered) = payload["answered_questions"].as_u64() {
                    entry.answered_questions = answered;
                }
                if let Some(total) = payload["total_questions"].as_u64() {
                    entry.total_questions = Some(total);
                }
                entry.last_activity_at = now;
                entry.last_sequence = sequence;
            }
            EventKind::StudentCompletedExam => {
                state.in_flight.remove(&attempt_id);
                state.remember_completed(attempt_id, self.in_flight_capacity);
            }
            EventKind::AttemptStarted | EventKind::AnswerSubmitted | EventKind::AttemptCompleted => {}
        }
    }

    /// Most recent entry first.
    pub(crate) async fn snapshot(&self) -> ActivitySnapshot {
        let state = self.state.read().await;
        let mut in_flight: Vec<InFlightAttempt> = state.in_flight.values().cloned().collect();
        in_flight.sort_by(|a, b| a.started_at.cmp(&b.started_at));

        ActivitySnapshot { recent: state.recent.iter().rev().cloned().collect(), in_flight }
    }

    pub(crate) async fn run(
        self,
        mut events: broadcast::Receiver<RealtimeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = events.recv() => match received {
                    Ok(event) => self.apply(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Activity feed lagged behind realtime hub");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ManualClock;
    use serde_json::json;

    fn feed(capacity: usize) -> ActivityFeed {
        ActivityFeed::new(capacity, Arc::new(ManualClock::default()))
    }

    fn admin_event(event: EventKind, attempt_id: Uuid, extra: serde_json::Value) -> RealtimeEvent {
        let mut payload = json!({ "attempt_id": attempt_id });
        if let (Some(target), Some(source)) = (payload.as_object_mut(), extra.as_object()) {
            target.extend(source.clone());
        }
        RealtimeEvent { topic: Topic::Admin, event, payload }
    }

    #[tokio::test]
    async fn recent_feed_drops_oldest_beyond_capacity() {
        let feed = feed(50);
        let mut ids = Vec::new();
        for _ in 0..60 {
            let id = Uuid::new_v4();
            ids.push(id);
            feed.apply(&admin_event(EventKind::StudentStartedExam, id, json!({}))).await;
        }

        let snapshot = feed.snapshot().await;
        assert_eq!(snapshot.recent.len(), 50);
        assert_eq!(snapshot.recent[0].payload["attempt_id"], json!(ids[59]));
        assert_eq!(snapshot.recent[49].payload["attempt_id"], json!(ids[10]));
    }

    #[tokio::test]
    async fn in_flight_tracks_progress_until_completion() {
        let feed = feed(10);
        let id = Uuid::new_v4();

        feed.apply(&admin_event(
            EventKind::StudentStartedExam,
            id,
            json!({"test_title": "Physics", "total_questions": 4}),
        ))
        .await;
        feed.apply(&admin_event(
            EventKind::StudentAnsweredQuestion,
            id,
            json!({"answered_questions": 2, "total_questions": 4}),
        ))
        .await;

        let snapshot = feed.snapshot().await;
        assert_eq!(snapshot.in_flight.len(), 1);
        assert_eq!(snapshot.in_flight[0].answered_questions, 2);
        assert_eq!(snapshot.in_flight[0].test_title.as_deref(), Some("Physics"));

        feed.apply(&admin_event(EventKind::StudentCompletedExam, id, json!({}))).await;
        let snapshot = feed.snapshot().await;
        assert!(snapshot.in_flight.is_empty());
        assert_eq!(snapshot.recent.len(), 3);
    }

    #[tokio::test]
    async fn late_answer_does_not_revive_completed_attempt() {
        let feed = feed(10);
        let id = Uuid::new_v4();

        feed.apply(&admin_event(EventKind::StudentStartedExam, id, json!({}))).await;
        feed.apply(&admin_event(EventKind::StudentCompletedExam, id, json!({}))).await;
        feed.apply(&admin_event(
            EventKind::StudentAnsweredQuestion,
            id,
            json!({"answered_questions": 1, "total_questions": 2}),
        ))
        .await;
        feed.apply(&admin_event(EventKind::StudentStartedExam, id, json!({}))).await;

        let snapshot = feed.snapshot().await;
        assert!(snapshot.in_flight.is_empty());
        assert_eq!(snapshot.recent.len(), 4);
    }

    #[tokio::test]
    async fn answer_for_unseen_attempt_is_not_tracked() {
        let feed = feed(10);

        feed.apply(&admin_event(
            EventKind::StudentAnsweredQuestion,
            Uuid::new_v4(),
            json!({"answered_questions": 1}),
        ))
        .await;

        assert!(feed.snapshot().await.in_flight.is_empty());
    }

    #[tokio::test]
    async fn in_flight_evicts_least_recently_active_beyond_limit() {
        let feed = ActivityFeed::with_limits(10, 2, Arc::new(ManualClock::default()));
        let (first, second, third) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        feed.apply(&admin_event(EventKind::StudentStartedExam, first, json!({}))).await;
        feed.apply(&admin_event(EventKind::StudentStartedExam, second, json!({}))).await;
        feed.apply(&admin_event(EventKind::StudentAnsweredQuestion, first, json!({}))).await;
        feed.apply(&admin_event(EventKind::StudentStartedExam, third, json!({}))).await;

        let tracked: HashSet<Uuid> =
            feed.snapshot().await.in_flight.into_iter().map(|entry| entry.attempt_id).collect();
        assert_eq!(tracked, HashSet::from([first, third]));
    }

    #[tokio::test]
    async fn attempt_scoped_events_are_ignored() {
        let feed = feed(10);
        let id = Uuid::new_v4();
        let event = RealtimeEvent {
            topic: Topic::Attempt(id),
            event: EventKind::AttemptStarted,
            payload: json!({ "attempt_id": id }),
        };

        feed.apply(&event).await;

        assert!(feed.snapshot().await.recent.is_empty());
    }
}
