//! Service orchestration.
//!
//! Wires the state store, button model, source adapters, device sessions
//! and dispatchers together and runs them until the shutdown token fires.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::actions::ActionDispatcher;
use crate::buttons::ButtonModel;
use crate::config::ServiceConfig;
use crate::deck::{spawn_session, DeckBackend};
use crate::mixer::{mixer_channel, StatusInterpreter};
use crate::pollers::{CommandPoller, WorkspacePoller};
use crate::render::{redraw_channel, RenderDispatcher};
use crate::state::{SharedStore, StateStore};
use crate::video::{VideoAdapter, VideoKey};

pub struct Service {
    config: ServiceConfig,
    model: Arc<ButtonModel>,
    store: SharedStore,
    shutdown: CancellationToken,
}

impl Service {
    pub fn new(config: ServiceConfig, shutdown: CancellationToken) -> Self {
        let model = Arc::new(ButtonModel::new(config.buttons.clone()));
        let store = Arc::new(StateStore::new(shutdown.clone()));
        Self {
            config,
            model,
            store,
            shutdown,
        }
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// Run until shutdown is requested or every panel is gone.
    pub async fn run(self, backends: Vec<Box<dyn DeckBackend>>) -> Result<()> {
        let Service {
            config,
            model,
            store,
            shutdown,
        } = self;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut sessions = Vec::new();
        for (id, backend) in backends.into_iter().enumerate() {
            let brightness = config.deck.brightness;
            match spawn_session(id, backend, brightness, events_tx.clone(), &shutdown) {
                Ok(session) => sessions.push(session),
                Err(e) => error!("[Deck {}] Failed to start: {}", id, e),
            }
        }
        drop(events_tx);
        if sessions.is_empty() {
            bail!("no panel could be started");
        }

        let (mixer, mixer_adapter) = mixer_channel(
            config.mixer.clone(),
            Arc::clone(&store),
            StatusInterpreter::new(Arc::clone(&model)),
            shutdown.clone(),
        );
        let (redraw, redraw_rx) = redraw_channel();
        let video_target = &sessions[0].handle;
        let video_enabled = config.video.enabled && config.video.key < video_target.info.key_count;
        if config.video.enabled && !video_enabled {
            warn!(
                "[Video] Key {} does not exist on {} ({} keys), video disabled",
                config.video.key, video_target.info.name, video_target.info.key_count
            );
        }
        let video_key = video_enabled.then(|| VideoKey::new(config.video.key));

        let mut tasks = JoinSet::new();
        tasks.spawn(mixer_adapter.run());
        tasks.spawn(
            CommandPoller::new(
                model.update_predicates(),
                &config.poll,
                Arc::clone(&store),
                shutdown.clone(),
            )
            .run(),
        );
        tasks.spawn(
            WorkspacePoller::new(
                model.workspace_ids(),
                &config.poll,
                Arc::clone(&store),
                shutdown.clone(),
            )
            .run(),
        );

        for session in &sessions {
            let render = RenderDispatcher::new(
                Arc::clone(&model),
                Arc::clone(&store),
                session.handle.clone(),
                if session.handle.id == 0 { video_key.clone() } else { None },
                redraw_rx.clone(),
                shutdown.clone(),
            );
            tasks.spawn(render.run());
        }

        if let Some(key) = video_key {
            let target = sessions[0].handle.clone();
            let video = VideoAdapter::bind(
                config.video.clone(),
                key,
                target,
                redraw.clone(),
                shutdown.clone(),
            )
            .await
            .with_context(|| format!("Failed to listen for video on {}", config.video.listen))?;
            tasks.spawn(video.run());
        }

        tasks.spawn(
            ActionDispatcher::new(
                Arc::clone(&model),
                mixer,
                config.poll.workspace_switch.clone(),
                redraw,
                events_rx,
                shutdown.clone(),
            )
            .run(),
        );

        info!(
            "[Service] Running with {} panel(s), {} buttons",
            sessions.len(),
            model.len()
        );

        let session_tokens: Vec<CancellationToken> = sessions
            .iter()
            .map(|s| s.handle.cancelled().clone())
            .collect();
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = join_all(session_tokens.iter().map(|t| t.cancelled())) => {
                warn!("[Service] All panels are gone, shutting down");
                shutdown.cancel();
            }
        }

        info!("[Service] Shutting down...");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("[Service] Task failed: {}", e);
            }
        }
        for session in sessions {
            session.join().await;
        }
        info!("[Service] Stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, MixerConfig, PollConfig};
    use crate::deck::headless::headless;
    use crate::deck::KeyImage;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use voctodeck_common::{StateKey, SCENE_COLOR};

    fn config(mixer: String) -> ServiceConfig {
        let mut config = ServiceConfig {
            mixer: MixerConfig {
                address: mixer,
                backoff_initial_ms: 20,
                backoff_max_ms: 100,
                ..MixerConfig::default()
            },
            poll: PollConfig {
                interval_ms: 20,
                ..PollConfig::default()
            },
            ..ServiceConfig::default()
        };
        config.deck.backend = BackendKind::Headless;
        config
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn press_round_trips_through_the_mixer_and_exit_tears_everything_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let service = Service::new(
            config(listener.local_addr().unwrap().to_string()),
            shutdown.clone(),
        );
        let store = service.store();
        let (deck, panel) = headless(15);
        let task = tokio::spawn(service.run(vec![Box::new(deck)]));

        let (stream, _) = listener.accept().await.unwrap();
        let (r, mut w) = stream.into_split();
        let mut lines = BufReader::new(r).lines();
        for _ in 0..3 {
            lines.next_line().await.unwrap();
        }

        // Initial draw puts labels on the panel.
        wait_until(|| panel.active_images() > 0).await;
        assert_eq!(panel.brightness(), 30);

        // Status reply selects the scene key.
        w.write_all(b"composite_mode_and_video_status fullscreen slides cam\n")
            .await
            .unwrap();
        wait_until(|| {
            matches!(
                panel.image(0),
                Some(KeyImage::Face(face)) if face.highlight == Some(SCENE_COLOR)
            )
        })
        .await;

        // Pressing picture-in-picture sends the composite command.
        panel.press(2);
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("set_videos_and_composite slides cam picture_in_picture")
        );

        // Exit.
        panel.press(14);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(shutdown.is_cancelled());
        assert_eq!(panel.active_images(), 0);
        assert!(panel.is_closed());
        assert_eq!(lines.next_line().await.unwrap(), None);

        let revision = store.snapshot().revision();
        assert!(!store.assert(StateKey::StreamMode, "live"));
        assert_eq!(store.snapshot().revision(), revision);
    }

    #[tokio::test]
    async fn losing_the_only_panel_stops_the_service() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let service = Service::new(
            config(listener.local_addr().unwrap().to_string()),
            shutdown.clone(),
        );
        let (deck, panel) = headless(15);
        let task = tokio::spawn(service.run(vec![Box::new(deck)]));

        wait_until(|| panel.active_images() > 0).await;
        panel.unplug();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(shutdown.is_cancelled());
        assert!(panel.is_closed());
    }

    #[tokio::test]
    async fn second_panel_survives_the_first_failing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let service = Service::new(
            config(listener.local_addr().unwrap().to_string()),
            shutdown.clone(),
        );
        let (deck_a, panel_a) = headless(15);
        let (deck_b, panel_b) = headless(15);
        let task = tokio::spawn(service.run(vec![Box::new(deck_a), Box::new(deck_b)]));

        wait_until(|| panel_a.active_images() > 0 && panel_b.active_images() > 0).await;
        panel_a.unplug();
        wait_until(|| panel_a.is_closed()).await;
        assert!(!shutdown.is_cancelled());

        // The surviving panel still takes the exit key.
        panel_b.press(14);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(panel_b.active_images(), 0);
    }

    #[tokio::test]
    async fn no_panels_is_an_error() {
        let service = Service::new(config("127.0.0.1:1".into()), CancellationToken::new());
        assert!(service.run(Vec::new()).await.is_err());
    }
}
