//! Queue registry
//!
//! One registry per deployment scope. It owns the live queue engines,
//! keyed by (channel, canonical mode name), and carries out the
//! cross-queue sweep when a match forms.

use crate::config::QueueSettings;
use crate::error::{PugError, Result};
use crate::queue::engine::QueueEngine;
use crate::store::Store;
use crate::surface::MessageSink;
use crate::types::{ChannelId, ScopeId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Registry of live queues for one scope
pub struct QueueRegistry {
    scope: ScopeId,
    settings: QueueSettings,
    store: Arc<dyn Store>,
    sink: Arc<dyn MessageSink>,
    engines: Mutex<HashMap<(ChannelId, String), Arc<QueueEngine>>>,
}

impl QueueRegistry {
    pub fn new(
        scope: ScopeId,
        settings: QueueSettings,
        store: Arc<dyn Store>,
        sink: Arc<dyn MessageSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scope,
            settings,
            store,
            sink,
            engines: Mutex::new(HashMap::new()),
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Fetch the engine for a channel and mode, creating it on first
    /// use. The mode may be given by name or alias; unknown modes
    /// resolve to `None`.
    pub fn get_or_create(
        self: &Arc<Self>,
        channel: ChannelId,
        mode_name: &str,
    ) -> Result<Option<Arc<QueueEngine>>> {
        let Some(mode) = self.store.resolve_mode(&self.scope, mode_name)? else {
            return Ok(None);
        };

        let mut engines = self.engines.lock().map_err(|_| PugError::InternalError {
            message: "Failed to acquire engines lock".to_string(),
        })?;
        let engine = engines
            .entry((channel, mode.name.clone()))
            .or_insert_with(|| {
                debug!(channel, mode = %mode.name, "Creating queue engine");
                QueueEngine::new(
                    self.scope.clone(),
                    channel,
                    mode.clone(),
                    self.settings.clone(),
                    self.store.clone(),
                    self.sink.clone(),
                    Arc::downgrade(self),
                )
            })
            .clone();
        Ok(Some(engine))
    }

    /// Every live queue on a channel
    pub fn queues_for_channel(&self, channel: ChannelId) -> Result<Vec<Arc<QueueEngine>>> {
        let engines = self.engines.lock().map_err(|_| PugError::InternalError {
            message: "Failed to acquire engines lock".to_string(),
        })?;
        Ok(engines
            .iter()
            .filter(|((c, _), _)| *c == channel)
            .map(|(_, e)| e.clone())
            .collect())
    }

    /// Sweep the given users out of every queue except the one the
    /// match formed in
    pub async fn remove_from_all(
        &self,
        users: &[UserId],
        except_channel: ChannelId,
        except_mode: &str,
    ) -> Result<()> {
        let engines: Vec<Arc<QueueEngine>> = {
            let guard = self.engines.lock().map_err(|_| PugError::InternalError {
                message: "Failed to acquire engines lock".to_string(),
            })?;
            guard
                .iter()
                .filter(|((channel, mode), _)| {
                    !(*channel == except_channel && mode == except_mode)
                })
                .map(|(_, e)| e.clone())
                .collect()
        };

        for engine in engines {
            engine.sweep(users).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::surface::RecordingSink;
    use crate::types::GameMode;

    const SCOPE: &str = "test-scope";

    fn fast_settings() -> QueueSettings {
        QueueSettings {
            ready_check_seconds: 1,
            captain_wait_seconds: 1,
            ..QueueSettings::default()
        }
    }

    fn build() -> (Arc<QueueRegistry>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_default_mode(SCOPE));
        store
            .add_mode(
                SCOPE,
                GameMode {
                    name: "duos".to_string(),
                    display_name: "1v1".to_string(),
                    team_size: 2,
                    description: String::new(),
                },
            )
            .unwrap();
        let registry = QueueRegistry::new(
            SCOPE.to_string(),
            fast_settings(),
            store.clone(),
            Arc::new(RecordingSink::new()),
        );
        (registry, store)
    }

    #[test]
    fn test_get_or_create_resolves_aliases_to_one_engine() {
        let (registry, store) = build();
        store.add_mode_alias(SCOPE, "4s", "default").unwrap();

        let by_name = registry.get_or_create(1, "default").unwrap().unwrap();
        let by_alias = registry.get_or_create(1, "4S").unwrap().unwrap();
        assert!(Arc::ptr_eq(&by_name, &by_alias));

        assert!(registry.get_or_create(1, "unknown").unwrap().is_none());
    }

    #[test]
    fn test_engines_are_per_channel_and_mode() {
        let (registry, _) = build();
        let a = registry.get_or_create(1, "default").unwrap().unwrap();
        let b = registry.get_or_create(2, "default").unwrap().unwrap();
        let c = registry.get_or_create(1, "duos").unwrap().unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.queues_for_channel(1).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_finalize_sweeps_sibling_queues() {
        let (registry, store) = build();
        for user in 1..3 {
            store
                .register_player(SCOPE, user, &format!("P{user}"), 1000.0)
                .unwrap();
        }

        let duos = registry.get_or_create(1, "duos").unwrap().unwrap();
        let fours = registry.get_or_create(1, "default").unwrap().unwrap();

        // Both players sit in the 4v4 queue too
        fours.join(1).await.unwrap();
        fours.join(2).await.unwrap();

        // Filling the duos queue forms a match and claims them
        duos.join(1).await.unwrap();
        duos.join(2).await.unwrap();
        duos.mark_ready(1).await.unwrap();
        duos.mark_ready(2).await.unwrap();

        assert_eq!(store.recent_matches(SCOPE, 10).unwrap().len(), 1);
        assert!(fours.snapshot().unwrap().players.is_empty());
    }
}
