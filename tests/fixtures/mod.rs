//! Shared builders for integration tests

use pug_engine::config::{QueueSettings, RatingSettings};
use pug_engine::surface::RecordingSink;
use pug_engine::types::GameMode;
use pug_engine::vote::ResultCoordinator;
use pug_engine::{MemoryStore, QueueRegistry, Store, UserId};
use std::sync::Arc;

pub const SCOPE: &str = "integration";
pub const CHANNEL: u64 = 100;

/// Settings with one-second timers so timeout paths finish quickly
pub fn fast_settings() -> QueueSettings {
    QueueSettings {
        ready_check_seconds: 1,
        captain_wait_seconds: 1,
        winner_vote_seconds: 1,
        split_vote_seconds: 1,
        ..QueueSettings::default()
    }
}

/// A complete system wired against the in-memory store
pub struct TestSystem {
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub registry: Arc<QueueRegistry>,
    pub coordinator: Arc<ResultCoordinator>,
}

/// Build a system with one mode of the given team size and enough
/// registered players to fill it twice over. Ratings are spread out so
/// the balancer produces a deterministic, non-trivial partition.
pub fn create_test_system(team_size: usize) -> TestSystem {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::new());
    let settings = fast_settings();

    store
        .add_mode(
            SCOPE,
            GameMode {
                name: "pug".to_string(),
                display_name: format!("{}v{}", team_size / 2, team_size / 2),
                team_size,
                description: "Integration test mode".to_string(),
            },
        )
        .unwrap();

    for user in 1..=(team_size as UserId * 2) {
        store
            .register_player(SCOPE, user, &format!("Player_{user}"), 1000.0 + user as f64 * 50.0)
            .unwrap();
    }

    let registry = QueueRegistry::new(
        SCOPE.to_string(),
        settings.clone(),
        store.clone(),
        sink.clone(),
    );
    let coordinator = ResultCoordinator::new(
        SCOPE.to_string(),
        settings,
        &RatingSettings::default(),
        store.clone(),
        sink.clone(),
    );

    TestSystem {
        store,
        sink,
        registry,
        coordinator,
    }
}

impl TestSystem {
    /// Fill the queue and answer every ready check, leaving a fresh
    /// match in the store
    pub async fn play_match(&self, users: &[UserId]) {
        let engine = self.registry.get_or_create(CHANNEL, "pug").unwrap().unwrap();
        for &user in users {
            engine.join(user).await.unwrap();
        }
        for &user in users {
            // Sticky answers from a previous round may complete the
            // check before the last call, so rejections are tolerated
            let _ = engine.mark_ready(user).await.unwrap();
        }
    }
}
