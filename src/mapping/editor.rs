//! Mapping editor - cascading selection state machine
//!
//! Drives the dependent form target kind → target name(s) → action →
//! parameters for one (layer, input) pair. The editor never touches the
//! configuration mirror: saving or clearing produces an [`Intent`] and closes
//! the session, and the visible mapping only changes once the backend's
//! broadcast comes back.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::rules;
use crate::error::{PadmapError, Result, StaleReference};
use crate::state::{
    ActionKind, ConfigSnapshot, InputMapping, LayerId, ParamValue, Params, TargetKind, TargetName,
};
use crate::transport::Intent;

/// Where the form currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    /// No input selected
    Idle,
    /// Kind chosen, no target yet
    TargetKindChosen,
    /// Target(s) chosen, no action yet
    TargetNameChosen,
    /// Action chosen; it takes no parameters
    ActionChosen,
    /// Action chosen, parameters editable (possibly none, for forced kinds)
    ParamsEditable,
}

impl EditorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditorState::Idle => "idle",
            EditorState::TargetKindChosen => "target-kind-chosen",
            EditorState::TargetNameChosen => "target-name-chosen",
            EditorState::ActionChosen => "action-chosen",
            EditorState::ParamsEditable => "params-editable",
        }
    }
}

impl std::fmt::Display for EditorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// In-progress selections of an open editor session
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub layer: LayerId,
    pub input_id: String,
    pub target_kind: Option<TargetKind>,
    pub targets: Vec<String>,
    pub action: Option<ActionKind>,
    pub params: Params,
    /// Structured params restored from the existing mapping
    pub extra_params: BTreeMap<String, Value>,
    /// Actions offered for the current kind and targets
    pub available_actions: Vec<ActionKind>,
}

impl Selection {
    fn new(layer: LayerId, input_id: &str) -> Self {
        Self {
            layer,
            input_id: input_id.to_string(),
            target_kind: None,
            targets: Vec::new(),
            action: None,
            params: Params::new(),
            extra_params: BTreeMap::new(),
            available_actions: Vec::new(),
        }
    }

    /// Whether the operator must pick the action (false for forced kinds)
    pub fn action_is_choosable(&self) -> bool {
        self.target_kind
            .map(|kind| rules::forced_action(kind).is_none())
            .unwrap_or(false)
    }
}

/// Cascading mapping editor
#[derive(Debug, Clone)]
pub struct MappingEditor {
    state: EditorState,
    selection: Option<Selection>,
}

impl MappingEditor {
    pub fn new() -> Self {
        Self {
            state: EditorState::Idle,
            selection: None,
        }
    }

    pub fn state(&self) -> EditorState {
        self.state
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.selection.is_some()
    }

    /// Open a session for an input, restoring its existing mapping if any
    ///
    /// Without a mapping the kind defaults to OSC channel with nothing selected.
    pub fn select_input(&mut self, layer: LayerId, input_id: &str, snapshot: &ConfigSnapshot) {
        let mut selection = Selection::new(layer, input_id);

        match snapshot.mapping(layer, input_id) {
            Some(existing) => {
                debug!("Editing existing mapping {}:{}", layer, input_id);
                selection.target_kind = Some(existing.target_kind);
                selection.targets = existing.targets();
                selection.available_actions = rules::actions_for_targets(
                    existing.target_kind,
                    &selection.targets,
                    snapshot,
                );
                selection.action = existing.action;
                selection.params = match existing.action {
                    Some(action) => rules::rebuild_params(action, &existing.params),
                    None => Params::new(),
                };
                selection.extra_params = existing.extra_params.clone();
            }
            None => {
                selection.target_kind = Some(TargetKind::OscChannel);
                selection.available_actions = rules::actions_for(TargetKind::OscChannel).to_vec();
            }
        }

        self.selection = Some(selection);
        self.settle();
    }

    /// Change the target kind; everything downstream is reset
    pub fn set_target_kind(&mut self, kind: TargetKind) -> Result<()> {
        let selection = self.open_selection_mut()?;
        selection.target_kind = Some(kind);
        selection.targets.clear();
        selection.action = None;
        selection.params.clear();
        selection.extra_params.clear();
        selection.available_actions = rules::actions_for(kind).to_vec();
        self.state = EditorState::TargetKindChosen;
        Ok(())
    }

    /// Replace the chosen target(s)
    ///
    /// Names must exist in the snapshot for the current kind; single-target
    /// kinds accept exactly one.
    pub fn set_targets(&mut self, names: Vec<String>, snapshot: &ConfigSnapshot) -> Result<()> {
        let selection = self.open_selection_mut()?;
        let kind = selection
            .target_kind
            .ok_or_else(|| PadmapError::validation("choose a target kind first"))?;

        let mut unique: Vec<String> = Vec::new();
        for name in names.into_iter().map(|n| n.trim().to_string()) {
            let name = match (kind, LayerId::from_str(&name)) {
                (TargetKind::LayerSwitch, Some(id)) => id.as_str().to_string(),
                _ => name,
            };
            if name.is_empty() || unique.contains(&name) {
                continue;
            }
            if !snapshot.has_target(kind, &name) {
                return Err(PadmapError::validation(format!(
                    "no {} named '{}'",
                    kind, name
                )));
            }
            unique.push(name);
        }

        if unique.len() > 1 && !kind.allows_multiple_targets() {
            return Err(PadmapError::validation(format!(
                "{} mappings take a single target",
                kind
            )));
        }

        selection.targets = unique;
        self.rederive_actions(snapshot);
        Ok(())
    }

    /// Add or remove one target; single-target kinds replace their target
    pub fn toggle_target(&mut self, name: &str, snapshot: &ConfigSnapshot) -> Result<()> {
        let selection = self.open_selection()?;
        let kind = selection
            .target_kind
            .ok_or_else(|| PadmapError::validation("choose a target kind first"))?;

        let mut targets = selection.targets.clone();
        if !kind.allows_multiple_targets() {
            targets = vec![name.to_string()];
        } else if let Some(pos) = targets.iter().position(|t| t == name) {
            targets.remove(pos);
        } else {
            targets.push(name.to_string());
        }
        self.set_targets(targets, snapshot)
    }

    /// Choose the action; params reset to the action's defaults
    pub fn set_action(&mut self, action: ActionKind) -> Result<()> {
        let selection = self.open_selection_mut()?;
        if selection.targets.is_empty() {
            return Err(PadmapError::validation("choose a target first"));
        }
        if !selection.available_actions.contains(&action) {
            return Err(PadmapError::validation(format!(
                "action '{}' is not available here",
                action
            )));
        }

        selection.action = Some(action);
        selection.params = rules::default_params(action);
        self.settle();
        Ok(())
    }

    /// Set one parameter of the current action
    pub fn set_param(&mut self, key: &str, value: ParamValue) -> Result<()> {
        let selection = self.open_selection_mut()?;
        let action = selection
            .action
            .ok_or_else(|| PadmapError::validation("choose an action first"))?;
        rules::validate_param(action, key, &value)?;
        selection.params.insert(key.to_string(), value);
        Ok(())
    }

    /// Set one parameter from operator text, parsed per the schema
    pub fn set_param_text(&mut self, key: &str, text: &str) -> Result<()> {
        let action = self
            .open_selection()?
            .action
            .ok_or_else(|| PadmapError::validation("choose an action first"))?;
        let spec = rules::param_spec(action, key).ok_or_else(|| {
            PadmapError::validation(format!("action '{}' has no parameter '{}'", action, key))
        })?;
        let value = spec.param_type.parse(text).ok_or_else(|| {
            PadmapError::validation(format!("'{}' is not a valid value for '{}'", text, key))
        })?;
        self.set_param(key, value)
    }

    /// Remove an optional parameter; required ones fall back to their default
    pub fn unset_param(&mut self, key: &str) -> Result<()> {
        let selection = self.open_selection_mut()?;
        let action = selection
            .action
            .ok_or_else(|| PadmapError::validation("choose an action first"))?;
        let spec = rules::param_spec(action, key).ok_or_else(|| {
            PadmapError::validation(format!("action '{}' has no parameter '{}'", action, key))
        })?;

        if spec.optional {
            selection.params.remove(key);
        } else {
            selection.params.insert(key.to_string(), spec.default);
        }
        Ok(())
    }

    /// Validate and emit a save intent, then close the session
    ///
    /// On failure nothing is emitted and the selections stay as they are.
    pub fn save(&mut self, apply_to_all_layers: bool) -> Result<Intent> {
        let intent = self.prepare_save(apply_to_all_layers)?;
        self.reset();
        Ok(intent)
    }

    /// Build the save intent without closing the session
    pub fn prepare_save(&self, apply_to_all_layers: bool) -> Result<Intent> {
        let selection = self.open_selection()?;

        let kind = selection
            .target_kind
            .ok_or_else(|| PadmapError::validation("target kind is not set"))?;
        if selection.targets.is_empty() {
            return Err(PadmapError::validation("select at least one target"));
        }
        let action = selection
            .action
            .ok_or_else(|| PadmapError::validation("select an action"))?;

        let mapping = InputMapping {
            target_kind: kind,
            target_name: TargetName::for_kind(kind, &selection.targets),
            action: Some(action),
            params: rules::rebuild_params(action, &selection.params),
            extra_params: if rules::keeps_structured_params(action) {
                selection.extra_params.clone()
            } else {
                BTreeMap::new()
            },
        };
        rules::validate(&mapping)?;

        Ok(Intent::save_mapping(
            selection.layer,
            &selection.input_id,
            mapping,
            apply_to_all_layers,
        ))
    }

    /// Emit a clear intent for the open input, then close the session
    pub fn clear(&mut self, apply_to_all_layers: bool) -> Result<Intent> {
        let intent = self.prepare_clear(apply_to_all_layers)?;
        self.reset();
        Ok(intent)
    }

    /// Build the clear intent without closing the session
    pub fn prepare_clear(&self, apply_to_all_layers: bool) -> Result<Intent> {
        let selection = self.open_selection()?;
        Ok(Intent::clear_mapping(
            selection.layer,
            &selection.input_id,
            apply_to_all_layers,
        ))
    }

    /// Discard all selections; returns whether a session was open
    pub fn cancel(&mut self) -> bool {
        let was_open = self.is_open();
        self.reset();
        was_open
    }

    /// First reference of the open session that the snapshot no longer has
    pub fn check_references(&self, snapshot: &ConfigSnapshot) -> Option<StaleReference> {
        let selection = self.selection.as_ref()?;

        if snapshot.layer(selection.layer).is_none() {
            return Some(StaleReference::Layer(selection.layer));
        }

        let kind = selection.target_kind?;
        selection
            .targets
            .iter()
            .find(|name| !snapshot.has_target(kind, name))
            .map(|name| match kind {
                TargetKind::OscChannel => StaleReference::Channel(name.clone()),
                TargetKind::InternalVariable => StaleReference::Variable(name.clone()),
                TargetKind::LayerSwitch => LayerId::from_str(name)
                    .map(StaleReference::Layer)
                    .unwrap_or_else(|| StaleReference::LayerName(name.clone())),
            })
    }

    /// Re-derive offered actions against a newer snapshot
    pub fn refresh(&mut self, snapshot: &ConfigSnapshot) {
        if self.is_open() {
            self.rederive_actions(snapshot);
        }
    }

    /// Close without emitting anything
    pub(crate) fn reset(&mut self) {
        self.selection = None;
        self.state = EditorState::Idle;
    }

    fn open_selection(&self) -> Result<&Selection> {
        self.selection
            .as_ref()
            .ok_or_else(|| PadmapError::validation("no input selected"))
    }

    fn open_selection_mut(&mut self) -> Result<&mut Selection> {
        self.selection
            .as_mut()
            .ok_or_else(|| PadmapError::validation("no input selected"))
    }

    /// Recompute the action set after a target change
    fn rederive_actions(&mut self, snapshot: &ConfigSnapshot) {
        let Some(selection) = self.selection.as_mut() else {
            return;
        };
        let Some(kind) = selection.target_kind else {
            return;
        };

        selection.available_actions =
            rules::actions_for_targets(kind, &selection.targets, snapshot);

        if selection.targets.is_empty() {
            selection.action = None;
            selection.params.clear();
        } else if let Some(forced) = rules::forced_action(kind) {
            if selection.action != Some(forced) {
                selection.action = Some(forced);
                selection.params = rules::default_params(forced);
            }
        } else if let Some(action) = selection.action {
            if !selection.available_actions.contains(&action) {
                selection.action = None;
                selection.params.clear();
            }
        }

        self.settle();
    }

    /// Derive the state from what is selected
    fn settle(&mut self) {
        let Some(selection) = self.selection.as_mut() else {
            self.state = EditorState::Idle;
            return;
        };

        // Forced kinds with a target always carry their action
        if let (Some(kind), false) = (selection.target_kind, selection.targets.is_empty()) {
            if let Some(forced) = rules::forced_action(kind) {
                if selection.action != Some(forced) {
                    selection.action = Some(forced);
                    selection.params = rules::default_params(forced);
                }
            }
        }

        self.state = match (
            selection.target_kind,
            selection.targets.is_empty(),
            selection.action,
        ) {
            (None, _, _) => EditorState::Idle,
            (Some(_), true, _) => EditorState::TargetKindChosen,
            (Some(_), false, None) => EditorState::TargetNameChosen,
            (Some(kind), false, Some(action)) => {
                if rules::forced_action(kind).is_some()
                    || !rules::params_schema_for(action).is_empty()
                {
                    EditorState::ParamsEditable
                } else {
                    EditorState::ActionChosen
                }
            }
        };
    }
}

impl Default for MappingEditor {
    fn default() -> Self {
        Self::new()
    }
}
