//! Static button model.
//!
//! Built once at startup from the configured layout and read-only after
//! that. Per-key selection lives with each render dispatcher, which is the
//! only writer of it.

use tracing::debug;
use voctodeck_common::{Action, Binding, ButtonSpec, Rgb, StateKey};

use crate::state::StateSnapshot;

/// One physical key.
#[derive(Debug, Clone)]
pub struct Button {
    /// Position on the panel
    pub index: usize,
    pub spec: ButtonSpec,
    slot: Option<(StateKey, String)>,
    action: Action,
}

impl Button {
    fn new(index: usize, spec: ButtonSpec) -> Self {
        let slot = spec.binding.state_slot(&spec.name);
        let action = spec.effective_action();
        Self {
            index,
            spec,
            slot,
            action,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    pub fn highlight(&self) -> Option<Rgb> {
        self.spec.highlight()
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Whether this key should read as selected under `snapshot`.
    pub fn is_selected_in(&self, snapshot: &StateSnapshot) -> bool {
        match &self.slot {
            Some((key, value)) => snapshot.is_active(key, value),
            None => false,
        }
    }
}

/// The declared panel layout.
#[derive(Debug, Clone)]
pub struct ButtonModel {
    buttons: Vec<Button>,
}

impl ButtonModel {
    pub fn new(specs: Vec<ButtonSpec>) -> Self {
        let buttons = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Button::new(index, spec))
            .collect();
        Self { buttons }
    }

    pub fn len(&self) -> usize {
        self.buttons.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Button> {
        self.buttons.get(index)
    }

    #[allow(dead_code)]
    pub fn iter(&self) -> impl Iterator<Item = &Button> {
        self.buttons.iter()
    }

    /// Map a reported composition to the scene button that represents it.
    ///
    /// An exact `(mode, inputs)` match wins; otherwise the first scene with
    /// the same mode and primary input is used.
    pub fn scene_for(&self, mode: &str, inputs: &[String]) -> Option<&str> {
        let scenes: Vec<(&Button, &Vec<String>)> = self
            .buttons
            .iter()
            .filter_map(|b| match &b.spec.binding {
                Binding::Scene {
                    mode: scene_mode,
                    inputs: scene_inputs,
                } if scene_mode == mode => Some((b, scene_inputs)),
                _ => None,
            })
            .collect();

        let exact = scenes
            .iter()
            .find(|(_, scene_inputs)| scene_inputs.as_slice() == inputs);
        let matched = exact.or_else(|| {
            let primary = inputs.first()?;
            scenes
                .iter()
                .find(|(_, scene_inputs)| scene_inputs.first() == Some(primary))
        });

        if matched.is_none() {
            debug!("[Buttons] No scene for {} {:?}", mode, inputs);
        }
        matched.map(|(b, _)| b.name())
    }

    /// Update buttons as `(name, predicate)` pairs.
    pub fn update_predicates(&self) -> Vec<(String, String)> {
        self.buttons
            .iter()
            .filter_map(|b| match &b.spec.binding {
                Binding::Command { predicate } => Some((b.name().to_string(), predicate.clone())),
                _ => None,
            })
            .collect()
    }

    /// Workspace ids that have a button bound to them.
    pub fn workspace_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .buttons
            .iter()
            .filter_map(|b| match &b.spec.binding {
                Binding::Workspace { id } => Some(id.clone()),
                _ => None,
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
