//! Render dispatcher.
//!
//! One dispatcher per panel. It is the only writer of per-key selection and
//! of the "last drawn" cache, and it issues draws only for keys whose
//! appearance actually changed. A full redraw happens at startup and
//! whenever one is requested after a key press.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::buttons::{Button, ButtonModel};
use crate::deck::{DeckHandle, KeyFace, KeyImage};
use crate::state::{SharedStore, StateSnapshot};
use crate::video::VideoKey;

/// Requests a full redraw from every render dispatcher.
#[derive(Debug, Clone)]
pub struct RedrawTrigger {
    tx: Arc<watch::Sender<u64>>,
}

impl RedrawTrigger {
    pub fn request(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }
}

/// Create a trigger and the receiver handed to each dispatcher.
pub fn redraw_channel() -> (RedrawTrigger, watch::Receiver<u64>) {
    let (tx, rx) = watch::channel(0);
    (RedrawTrigger { tx: Arc::new(tx) }, rx)
}

/// How a key looks for a given selection state.
pub fn key_image(button: &Button, selected: bool) -> KeyImage {
    let highlight = if selected { button.highlight() } else { None };
    if button.label().is_empty() && highlight.is_none() {
        return KeyImage::Blank;
    }
    KeyImage::Face(KeyFace {
        label: button.label().to_string(),
        highlight,
    })
}

pub struct RenderDispatcher {
    model: Arc<ButtonModel>,
    store: SharedStore,
    deck: DeckHandle,
    /// Key handed to the video source while it streams
    video: Option<VideoKey>,
    selected: Vec<bool>,
    drawn: Vec<Option<KeyImage>>,
    redraw: watch::Receiver<u64>,
    cancel: CancellationToken,
}

impl RenderDispatcher {
    pub fn new(
        model: Arc<ButtonModel>,
        store: SharedStore,
        deck: DeckHandle,
        video: Option<VideoKey>,
        redraw: watch::Receiver<u64>,
        cancel: CancellationToken,
    ) -> Self {
        let key_count = deck.info.key_count;
        Self {
            selected: vec![false; model.len()],
            drawn: vec![None; key_count],
            model,
            store,
            deck,
            video,
            redraw,
            cancel,
        }
    }

    /// Compute the draws that bring the panel in line with `snapshot`.
    ///
    /// With `full` every key is returned; otherwise only keys whose image
    /// differs from what was last drawn.
    pub fn reconcile(&mut self, snapshot: &StateSnapshot, full: bool) -> Vec<(usize, KeyImage)> {
        let mut draws = Vec::new();
        let mut flipped = 0;

        for index in 0..self.drawn.len() {
            let image = match self.model.get(index) {
                Some(button) => {
                    let selected = button.is_selected_in(snapshot);
                    if self.selected[index] != selected {
                        self.selected[index] = selected;
                        flipped += 1;
                    }
                    key_image(button, selected)
                }
                None => KeyImage::Blank,
            };

            // Frames own the key; repaint it once the source lets go.
            if self.video_is_live(index) {
                self.drawn[index] = None;
                continue;
            }

            if full || self.drawn[index].as_ref() != Some(&image) {
                self.drawn[index] = Some(image.clone());
                draws.push((index, image));
            }
        }

        if flipped > 0 {
            debug!(
                "[Render] Deck {}: revision {}, {} keys flipped",
                self.deck.id,
                snapshot.revision(),
                flipped
            );
        }
        draws
    }

    fn video_is_live(&self, index: usize) -> bool {
        self.video
            .as_ref()
            .is_some_and(|video| video.index == index && video.is_live())
    }

    /// Whether the button at `index` currently reads as selected.
    #[allow(dead_code)]
    pub fn is_selected(&self, index: usize) -> bool {
        self.selected.get(index).copied().unwrap_or(false)
    }

    fn draw(&self, draws: Vec<(usize, KeyImage)>) {
        for (index, image) in draws {
            self.deck.draw(index, image);
        }
    }

    pub async fn run(mut self) {
        let mut changes = self.store.subscribe();
        changes.borrow_and_update();
        self.redraw.borrow_and_update();
        let deck_gone = self.deck.cancelled().clone();
        let mut redraw_open = true;

        let snapshot = self.store.snapshot();
        let draws = self.reconcile(&snapshot, true);
        info!(
            "[Render] Deck {}: initial draw of {} keys",
            self.deck.id,
            draws.len()
        );
        self.draw(draws);

        loop {
            let full = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = deck_gone.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    changes.borrow_and_update();
                    false
                }
                requested = self.redraw.changed(), if redraw_open => {
                    if requested.is_err() {
                        redraw_open = false;
                        continue;
                    }
                    self.redraw.borrow_and_update();
                    true
                }
            };

            let snapshot = self.store.snapshot();
            let draws = self.reconcile(&snapshot, full);
            self.draw(draws);
        }
        debug!("[Render] Deck {}: stopped", self.deck.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollConfig;
    use crate::deck::headless::{headless, HeadlessHandle};
    use crate::deck::{spawn_session, DeckSession};
    use crate::pollers::CommandPoller;
    use crate::state::StateStore;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use voctodeck_common::{default_layout, Binding, ButtonSpec, Rgb, StateKey, SCENE_COLOR};

    fn dispatcher(
        specs: Vec<ButtonSpec>,
        key_count: usize,
    ) -> (RenderDispatcher, SharedStore, DeckSession, HeadlessHandle, CancellationToken) {
        let root = CancellationToken::new();
        let (deck, panel) = headless(key_count);
        let (events_tx, _) = mpsc::unbounded_channel();
        let session = spawn_session(0, Box::new(deck), 30, events_tx, &root).unwrap();
        let store = Arc::new(StateStore::new(root.clone()));
        let (_trigger, redraw) = redraw_channel();
        let render = RenderDispatcher::new(
            Arc::new(ButtonModel::new(specs)),
            Arc::clone(&store),
            session.handle.clone(),
            None,
            redraw,
            root.clone(),
        );
        (render, store, session, panel, root)
    }

    #[tokio::test]
    async fn startup_draws_every_key_and_blanks_the_rest() {
        let (mut render, store, session, _panel, root) =
            dispatcher(default_layout()[..3].to_vec(), 6);
        let draws = render.reconcile(&store.snapshot(), true);

        assert_eq!(draws.len(), 6);
        assert!(matches!(&draws[0].1, KeyImage::Face(face) if face.label == "PC\nFULL"));
        assert!(draws[3..].iter().all(|(_, image)| image.is_blank()));

        root.cancel();
        session.join().await;
    }

    #[tokio::test]
    async fn only_changed_keys_are_redrawn() {
        let (mut render, store, session, _panel, root) = dispatcher(default_layout(), 15);
        render.reconcile(&store.snapshot(), true);

        store.assert(StateKey::SceneLayout, "pc-full");
        let draws = render.reconcile(&store.snapshot(), false);
        assert_eq!(draws.len(), 1);
        assert_eq!(
            draws[0],
            (
                0,
                KeyImage::Face(KeyFace {
                    label: "PC\nFULL".into(),
                    highlight: Some(SCENE_COLOR),
                })
            )
        );

        // Switching scenes flips exactly two keys.
        store.assert(StateKey::SceneLayout, "cam-full");
        let draws = render.reconcile(&store.snapshot(), false);
        let keys: Vec<usize> = draws.iter().map(|(i, _)| *i).collect();
        assert_eq!(keys, vec![0, 1]);
        assert!(!render.is_selected(0));
        assert!(render.is_selected(1));

        // Unrelated no-op snapshot draws nothing.
        assert!(render.reconcile(&store.snapshot(), false).is_empty());

        root.cancel();
        session.join().await;
    }

    #[tokio::test]
    async fn exactly_one_scene_is_selected_at_a_time() {
        let (mut render, store, session, _panel, root) = dispatcher(default_layout(), 15);
        let scenes = ["pc-full", "cam-full", "pip", "sbs-preview", "sbs-equal"];
        for scene in scenes.iter().cycle().take(20) {
            store.assert(StateKey::SceneLayout, *scene);
            render.reconcile(&store.snapshot(), false);
            let selected = (0..15)
                .filter(|&i| render.is_selected(i))
                .filter(|&i| matches!(default_layout()[i].binding, Binding::Scene { .. }))
                .count();
            assert_eq!(selected, 1);
        }

        root.cancel();
        session.join().await;
    }

    #[tokio::test]
    async fn bound_button_on_the_video_key_flips_without_a_source() {
        let (mut render, store, session, _panel, root) = dispatcher(default_layout(), 15);
        render.video = Some(VideoKey::new(0));
        render.reconcile(&store.snapshot(), true);

        store.assert(StateKey::SceneLayout, "pc-full");
        let draws = render.reconcile(&store.snapshot(), false);
        let keys: Vec<usize> = draws.iter().map(|(i, _)| *i).collect();
        assert_eq!(keys, vec![0]);
        assert!(render.is_selected(0));

        root.cancel();
        session.join().await;
    }

    #[tokio::test]
    async fn streaming_video_key_is_skipped_until_released() {
        let (mut render, store, session, _panel, root) = dispatcher(default_layout(), 15);
        let video = VideoKey::new(0);
        render.video = Some(video.clone());
        render.reconcile(&store.snapshot(), true);

        assert!(video.claim());
        store.assert(StateKey::SceneLayout, "pc-full");
        assert!(render
            .reconcile(&store.snapshot(), false)
            .iter()
            .all(|(i, _)| *i != 0));
        assert!(render
            .reconcile(&store.snapshot(), true)
            .iter()
            .all(|(i, _)| *i != 0));
        // Selection still tracks state underneath the frames.
        assert!(render.is_selected(0));

        assert!(video.release());
        assert_eq!(
            render.reconcile(&store.snapshot(), false),
            vec![(
                0,
                KeyImage::Face(KeyFace {
                    label: "PC\nFULL".into(),
                    highlight: Some(SCENE_COLOR),
                })
            )]
        );

        root.cancel();
        session.join().await;
    }

    #[tokio::test]
    async fn predicate_toggle_redraws_once_per_flip() {
        let flag = tempfile::NamedTempFile::new().unwrap();
        let flag_path = flag.path().to_path_buf();
        let mut specs = default_layout();
        specs[4] = ButtonSpec::new(
            "vpn",
            "VPN",
            Binding::Command {
                predicate: format!("test -e '{}'", flag_path.display()),
            },
        );
        specs[4].color = Some(Rgb(0, 255, 0));

        let (render, store, session, panel, root) = dispatcher(specs, 15);
        let poller = CommandPoller::new(
            vec![(
                "vpn".to_string(),
                format!("test -e '{}'", flag_path.display()),
            )],
            &PollConfig::default(),
            Arc::clone(&store),
            root.clone(),
        );
        let task = tokio::spawn(render.run());

        let draws_of_vpn = || panel.draws().iter().filter(|&&i| i == 4).count();
        async fn settle(expected: usize, count: &dyn Fn() -> usize) {
            for _ in 0..200 {
                if count() >= expected {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            // Give any extra draw a chance to show up.
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(count(), expected);
        }

        // Initial full draw.
        settle(1, &draws_of_vpn).await;

        // File exists: selected. Polling again changes nothing.
        store.apply(&poller.poll_once().await);
        store.apply(&poller.poll_once().await);
        settle(2, &draws_of_vpn).await;

        // Removed: deselected, once.
        std::fs::remove_file(&flag_path).unwrap();
        store.apply(&poller.poll_once().await);
        store.apply(&poller.poll_once().await);
        settle(3, &draws_of_vpn).await;

        // Back again.
        std::fs::write(&flag_path, b"").unwrap();
        store.apply(&poller.poll_once().await);
        settle(4, &draws_of_vpn).await;

        root.cancel();
        task.await.unwrap();
        session.join().await;
    }
}
