//! Window-manager workspace poller.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voctodeck_common::{StateFact, StateKey, WORKSPACE_VISIBLE};

use crate::config::PollConfig;
use crate::state::SharedStore;

/// Workspace identifier as reported, either numeric or textual.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WorkspaceId {
    Number(i64),
    Text(String),
}

impl WorkspaceId {
    fn matches(&self, id: &str) -> bool {
        match self {
            WorkspaceId::Number(n) => n.to_string() == id,
            WorkspaceId::Text(s) => s == id,
        }
    }
}

/// One entry of the window manager's workspace list.
///
/// Accepts the generic `{id, visible}` shape as well as i3/sway's
/// `{num, name, visible}`.
#[derive(Debug, Clone, Deserialize)]
struct WorkspaceEntry {
    #[serde(default)]
    id: Option<WorkspaceId>,
    #[serde(default)]
    num: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    visible: bool,
}

impl WorkspaceEntry {
    fn matches(&self, id: &str) -> bool {
        self.name.as_deref() == Some(id)
            || self.num.is_some_and(|num| num.to_string() == id)
            || self.id.as_ref().is_some_and(|ws| ws.matches(id))
    }
}

/// Facts for every bound workspace id given the raw query output.
pub fn workspace_facts(ids: &[String], raw: &[u8]) -> Result<Vec<StateFact>, serde_json::Error> {
    let entries: Vec<WorkspaceEntry> = serde_json::from_slice(raw)?;
    Ok(ids
        .iter()
        .map(|id| {
            let key = StateKey::Workspace(id.clone());
            if entries.iter().any(|e| e.visible && e.matches(id)) {
                StateFact::assert(key, WORKSPACE_VISIBLE)
            } else {
                StateFact::clear(key)
            }
        })
        .collect())
}

/// Periodically asks the window manager which workspaces are visible.
pub struct WorkspacePoller {
    ids: Vec<String>,
    query: Vec<String>,
    interval: Duration,
    timeout: Duration,
    store: SharedStore,
    cancel: CancellationToken,
    last_output: Option<Vec<u8>>,
}

impl WorkspacePoller {
    pub fn new(
        ids: Vec<String>,
        config: &PollConfig,
        store: SharedStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ids,
            query: config.workspace_query.clone(),
            interval: config.interval(),
            timeout: config.command_timeout(),
            store,
            cancel,
            last_output: None,
        }
    }

    pub async fn run(mut self) {
        if self.ids.is_empty() {
            debug!("[WorkspacePoller] No workspace buttons configured");
            return;
        }
        info!(
            "[WorkspacePoller] Watching workspaces {:?} every {:?}",
            self.ids, self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let output = tokio::select! {
                _ = self.cancel.cancelled() => break,
                output = self.query() => output,
            };
            if let Some(output) = output {
                self.update(output);
            }
        }
        info!("[WorkspacePoller] Stopped");
    }

    /// Apply one query result. Identical output is not parsed again.
    ///
    /// Returns whether the output was new.
    pub fn update(&mut self, output: Vec<u8>) -> bool {
        if self.last_output.as_deref() == Some(output.as_slice()) {
            return false;
        }
        match workspace_facts(&self.ids, &output) {
            Ok(facts) => {
                self.store.apply(&facts);
            }
            Err(e) => warn!("[WorkspacePoller] Unparseable workspace list: {}", e),
        }
        self.last_output = Some(output);
        true
    }

    async fn query(&self) -> Option<Vec<u8>> {
        let (program, args) = self.query.split_first()?;
        let run = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) if output.status.success() => Some(output.stdout),
            Ok(Ok(output)) => {
                warn!("[WorkspacePoller] Query exited with {}", output.status);
                None
            }
            Ok(Err(e)) => {
                warn!("[WorkspacePoller] Failed to run {}: {}", program, e);
                None
            }
            Err(_) => {
                warn!("[WorkspacePoller] Query timed out after {:?}", self.timeout);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const I3_OUTPUT: &str = r#"[
        {"id": 94, "num": 1, "name": "1", "visible": false, "focused": false},
        {"id": 95, "num": 2, "name": "2:web", "visible": true, "focused": true},
        {"id": 96, "num": -1, "name": "video", "visible": true, "focused": false}
    ]"#;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn visibility_is_matched_by_name_or_number() {
        let facts = workspace_facts(&ids(&["1", "2", "video", "9"]), I3_OUTPUT.as_bytes()).unwrap();
        assert_eq!(
            facts,
            vec![
                StateFact::clear(StateKey::Workspace("1".into())),
                StateFact::assert(StateKey::Workspace("2".into()), WORKSPACE_VISIBLE),
                StateFact::assert(StateKey::Workspace("video".into()), WORKSPACE_VISIBLE),
                StateFact::clear(StateKey::Workspace("9".into())),
            ]
        );
    }

    #[test]
    fn plain_id_and_visibility_list_is_understood() {
        let raw = br#"[{"id": "1", "visible": true}, {"id": 2, "visible": false}, {"id": "mail"}]"#;
        let facts = workspace_facts(&ids(&["1", "2", "mail"]), raw).unwrap();
        assert_eq!(
            facts,
            vec![
                StateFact::assert(StateKey::Workspace("1".into()), WORKSPACE_VISIBLE),
                StateFact::clear(StateKey::Workspace("2".into())),
                StateFact::clear(StateKey::Workspace("mail".into())),
            ]
        );
    }

    #[test]
    fn identical_output_short_circuits() {
        let cancel = CancellationToken::new();
        let store = Arc::new(StateStore::new(cancel.clone()));
        let mut poller =
            WorkspacePoller::new(ids(&["2"]), &PollConfig::default(), Arc::clone(&store), cancel);

        assert!(poller.update(I3_OUTPUT.as_bytes().to_vec()));
        let revision = store.snapshot().revision();
        assert!(!poller.update(I3_OUTPUT.as_bytes().to_vec()));
        assert_eq!(store.snapshot().revision(), revision);

        let hidden = br#"[{"num": 2, "name": "2", "visible": false}]"#.to_vec();
        assert!(poller.update(hidden));
        assert_eq!(store.snapshot().get(&StateKey::Workspace("2".into())), None);
    }

    #[test]
    fn garbage_output_leaves_state_alone() {
        let cancel = CancellationToken::new();
        let store = Arc::new(StateStore::new(cancel.clone()));
        store.assert(StateKey::Workspace("2".into()), WORKSPACE_VISIBLE);
        let mut poller =
            WorkspacePoller::new(ids(&["2"]), &PollConfig::default(), Arc::clone(&store), cancel);

        poller.update(b"not json".to_vec());
        assert!(store
            .snapshot()
            .is_active(&StateKey::Workspace("2".into()), WORKSPACE_VISIBLE));
    }

    #[tokio::test]
    async fn polls_the_configured_query_command() {
        let cancel = CancellationToken::new();
        let store = Arc::new(StateStore::new(cancel.clone()));
        let config = PollConfig {
            interval_ms: 20,
            workspace_query: vec![
                "sh".into(),
                "-c".into(),
                r#"echo '[{"num": 3, "name": "3", "visible": true}]'"#.into(),
            ],
            ..PollConfig::default()
        };
        let poller = WorkspacePoller::new(ids(&["3"]), &config, Arc::clone(&store), cancel.clone());
        let task = tokio::spawn(poller.run());

        for _ in 0..200 {
            if !store.snapshot().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store
            .snapshot()
            .is_active(&StateKey::Workspace("3".into()), WORKSPACE_VISIBLE));

        cancel.cancel();
        task.await.unwrap();
    }
}
