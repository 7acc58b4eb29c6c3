//! Update-button predicate poller.

use std::process::Stdio;
use std::time::Duration;

use futures::future::join_all;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voctodeck_common::{StateFact, StateKey, COMMAND_OK};

use crate::config::PollConfig;
use crate::state::SharedStore;

/// Periodically runs each update button's shell predicate.
///
/// A zero exit status selects the button; a non-zero status, a spawn
/// failure or a timeout deselects it.
pub struct CommandPoller {
    predicates: Vec<(String, String)>,
    shell: String,
    interval: Duration,
    timeout: Duration,
    store: SharedStore,
    cancel: CancellationToken,
}

impl CommandPoller {
    pub fn new(
        predicates: Vec<(String, String)>,
        config: &PollConfig,
        store: SharedStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            predicates,
            shell: config.shell.clone(),
            interval: config.interval(),
            timeout: config.command_timeout(),
            store,
            cancel,
        }
    }

    pub async fn run(self) {
        if self.predicates.is_empty() {
            debug!("[CommandPoller] No update buttons configured");
            return;
        }
        info!(
            "[CommandPoller] Polling {} predicates every {:?}",
            self.predicates.len(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let facts = tokio::select! {
                _ = self.cancel.cancelled() => break,
                facts = self.poll_once() => facts,
            };
            self.store.apply(&facts);
        }
        info!("[CommandPoller] Stopped");
    }

    /// Run every predicate once, concurrently.
    pub async fn poll_once(&self) -> Vec<StateFact> {
        let runs = self.predicates.iter().map(|(name, predicate)| async move {
            let ok = self.check(name, predicate).await;
            let key = StateKey::Command(name.clone());
            if ok {
                StateFact::assert(key, COMMAND_OK)
            } else {
                StateFact::clear(key)
            }
        });
        join_all(runs).await
    }

    async fn check(&self, name: &str, predicate: &str) -> bool {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(predicate)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("[CommandPoller] Failed to run predicate of {}: {}", name, e);
                return false;
            }
        };

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                warn!("[CommandPoller] Predicate of {} failed: {}", name, e);
                false
            }
            Err(_) => {
                warn!(
                    "[CommandPoller] Predicate of {} timed out after {:?}",
                    name, self.timeout
                );
                let _ = child.kill().await;
                false
            }
        }
    }
}
