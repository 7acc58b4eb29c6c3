//! Action dispatcher.
//!
//! Receives key transitions from every panel and runs the pressed button's
//! action on key-down. Key-up is ignored.

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voctodeck_common::Action;

use crate::buttons::ButtonModel;
use crate::deck::DeckKeyEvent;
use crate::mixer::MixerHandle;
use crate::render::RedrawTrigger;

/// Placeholder replaced by the workspace id in the switch command.
const WORKSPACE_PLACEHOLDER: &str = "{id}";

pub struct ActionDispatcher {
    model: Arc<ButtonModel>,
    mixer: MixerHandle,
    workspace_switch: Vec<String>,
    redraw: RedrawTrigger,
    events: UnboundedReceiver<DeckKeyEvent>,
    shutdown: CancellationToken,
}

impl ActionDispatcher {
    pub fn new(
        model: Arc<ButtonModel>,
        mixer: MixerHandle,
        workspace_switch: Vec<String>,
        redraw: RedrawTrigger,
        events: UnboundedReceiver<DeckKeyEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            model,
            mixer,
            workspace_switch,
            redraw,
            events,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.events.recv() => event,
            };
            match event {
                Some(event) => self.dispatch(event),
                None => {
                    debug!("[Actions] All panels closed");
                    break;
                }
            }
        }
        info!("[Actions] Stopped");
    }

    /// Handle one key transition.
    pub fn dispatch(&self, event: DeckKeyEvent) {
        if !event.key.pressed {
            return;
        }
        let Some(button) = self.model.get(event.key.index) else {
            debug!(
                "[Actions] Deck {}: key {} has no button",
                event.deck, event.key.index
            );
            return;
        };
        debug!(
            "[Actions] Deck {}: {} (key {}) pressed",
            event.deck,
            button.name(),
            button.index
        );

        match button.action() {
            Action::None => return,
            Action::Mixer { command } => {
                if let Err(e) = self.mixer.send(command.clone()) {
                    warn!("[Actions] {}: `{}` not sent: {}", button.name(), command, e);
                }
            }
            Action::Run { argv } => spawn_detached(button.name(), argv),
            Action::Workspace { id } => {
                let argv = workspace_command(&self.workspace_switch, id);
                spawn_detached(button.name(), &argv);
            }
            Action::Exit => {
                info!("[Actions] Exit requested from deck {}", event.deck);
                self.shutdown.cancel();
                return;
            }
        }
        self.redraw.request();
    }
}

/// Substitute `id` into the configured switch command.
pub fn workspace_command(template: &[String], id: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace(WORKSPACE_PLACEHOLDER, id))
        .collect()
}

/// Launch a process without waiting for it; a background task reaps it.
fn spawn_detached(name: &str, argv: &[String]) {
    let Some((program, args)) = argv.split_first() else {
        warn!("[Actions] {}: empty command", name);
        return;
    };

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match child {
        Ok(mut child) => {
            info!("[Actions] {}: launched {}", name, program);
            let name = name.to_string();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) if !status.success() => {
                        debug!("[Actions] {}: exited with {}", name, status)
                    }
                    Ok(_) => {}
                    Err(e) => warn!("[Actions] {}: wait failed: {}", name, e),
                }
            });
        }
        Err(e) => warn!("[Actions] {}: failed to launch {}: {}", name, program, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixerConfig;
    use crate::deck::KeyEvent;
    use crate::mixer::{mixer_channel, StatusInterpreter};
    use crate::render::redraw_channel;
    use crate::state::StateStore;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use voctodeck_common::{default_layout, Binding, ButtonSpec};

    fn press(index: usize, pressed: bool) -> DeckKeyEvent {
        DeckKeyEvent {
            deck: 0,
            key: KeyEvent { index, pressed },
        }
    }

    fn dispatcher(
        specs: Vec<ButtonSpec>,
    ) -> (
        ActionDispatcher,
        CancellationToken,
        tokio::sync::watch::Receiver<u64>,
    ) {
        let shutdown = CancellationToken::new();
        let model = Arc::new(ButtonModel::new(specs));
        let store = Arc::new(StateStore::new(shutdown.clone()));
        let (mixer, _adapter) = mixer_channel(
            MixerConfig::default(),
            store,
            StatusInterpreter::new(Arc::clone(&model)),
            shutdown.clone(),
        );
        let (redraw, redraw_rx) = redraw_channel();
        let (_tx, events) = mpsc::unbounded_channel();
        let dispatcher = ActionDispatcher::new(
            model,
            mixer,
            vec!["true".into(), "{id}".into()],
            redraw,
            events,
            shutdown.clone(),
        );
        (dispatcher, shutdown, redraw_rx)
    }

    #[test]
    fn workspace_id_is_substituted() {
        let template = vec![
            "i3-msg".to_string(),
            "workspace".to_string(),
            "{id}".to_string(),
        ];
        assert_eq!(workspace_command(&template, "3"), vec!["i3-msg", "workspace", "3"]);
    }

    #[tokio::test]
    async fn exit_fires_on_key_down_only() {
        let (dispatcher, shutdown, _) = dispatcher(default_layout());
        dispatcher.dispatch(press(14, false));
        assert!(!shutdown.is_cancelled());
        dispatcher.dispatch(press(14, true));
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn press_requests_a_full_redraw() {
        let (dispatcher, shutdown, mut redraw_rx) = dispatcher(default_layout());
        redraw_rx.borrow_and_update();

        // Mixer is disconnected: the command is dropped, the redraw still happens.
        dispatcher.dispatch(press(0, true));
        assert!(redraw_rx.has_changed().unwrap());
        redraw_rx.borrow_and_update();

        // Unbound keys and out-of-layout keys do nothing.
        dispatcher.dispatch(press(4, true));
        dispatcher.dispatch(press(40, true));
        assert!(!redraw_rx.has_changed().unwrap());
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn run_action_launches_a_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("launched");
        let spec = ButtonSpec::new("touch", "TOUCH", Binding::None).with_action(Action::Run {
            argv: vec!["touch".into(), marker.display().to_string()],
        });
        let (dispatcher, _shutdown, _) = dispatcher(vec![spec]);

        dispatcher.dispatch(press(0, true));
        for _ in 0..200 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(marker.exists());
    }
}
