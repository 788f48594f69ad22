//! Session - the console's shared context
//!
//! Owns the configuration mirror, the activity aggregator, the mapping
//! editor and the transport handle. Inbound broadcasts are applied here and
//! every operator command goes through here, so the editor never reads a
//! snapshot the store has not accepted.
//!
//! The session is itself a store subscriber: configuration and active-layer
//! notifications land in an inbox, and draining it is what revalidates the
//! editor and produces [`SessionEvent`]s for the console.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{PadmapError, Result, StaleReference};
use crate::input::{InputActivityAggregator, InputDefinitions};
use crate::mapping::MappingEditor;
use crate::state::{
    ActionKind, ChannelDef, ConfigSnapshot, ConfigStore, InputMapping, LayerId, Notification,
    SelectedInput, Subscription, TargetKind, TargetName, Topic, VariableDef,
};
use crate::transport::{Broadcast, Intent, LiveValue, OperationStatus, StatusScope, TransportHandle};

const MAX_NOTICES: usize = 50;

/// Backend operation result kept for display
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub scope: StatusScope,
    pub success: bool,
    pub message: String,
    pub at: DateTime<Local>,
}

/// Something the console may want to show after a broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConfigurationLoaded,
    ConfigurationUpdated,
    /// The open editor referenced something the new snapshot dropped
    EditorClosed(StaleReference),
    ActiveLayerChanged(LayerId),
    /// Set of active generic inputs changed
    ActivityChanged,
    DefinitionsInstalled(usize),
    Status(Notice),
    Connection(bool),
}

/// Store notifications not yet turned into session events
type Inbox = Arc<Mutex<VecDeque<Notification>>>;

pub struct Session {
    store: ConfigStore,
    inbox: Inbox,
    _subscriptions: Vec<Subscription>,
    aggregator: InputActivityAggregator,
    editor: MappingEditor,
    transport: TransportHandle,
    channel_values: BTreeMap<String, LiveValue>,
    variable_values: BTreeMap<String, LiveValue>,
    notices: VecDeque<Notice>,
}

impl Session {
    pub fn new(definitions: InputDefinitions, transport: TransportHandle) -> Self {
        let store = ConfigStore::new();
        let inbox = Inbox::default();
        let subscriptions = [
            Topic::ConfigurationLoaded,
            Topic::ConfigurationUpdated,
            Topic::ActiveLayerChanged,
        ]
        .into_iter()
        .map(|topic| {
            let inbox = Arc::clone(&inbox);
            store.subscribe(topic, move |notification| {
                inbox.lock().push_back(notification.clone())
            })
        })
        .collect();

        Self {
            store,
            inbox,
            _subscriptions: subscriptions,
            aggregator: InputActivityAggregator::new(definitions),
            editor: MappingEditor::new(),
            transport,
            channel_values: BTreeMap::new(),
            variable_values: BTreeMap::new(),
            notices: VecDeque::new(),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn aggregator(&self) -> &InputActivityAggregator {
        &self.aggregator
    }

    pub fn editor(&self) -> &MappingEditor {
        &self.editor
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn channel_values(&self) -> &BTreeMap<String, LiveValue> {
        &self.channel_values
    }

    pub fn variable_values(&self) -> &BTreeMap<String, LiveValue> {
        &self.variable_values
    }

    /// Most recent notices first
    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter().rev()
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Apply one broadcast from the backend
    pub fn handle_broadcast(&mut self, broadcast: Broadcast) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        match broadcast {
            Broadcast::Configuration(snapshot) => {
                self.store.publish(*snapshot);
            }
            Broadcast::RawInputs(payload) => {
                let before: Vec<String> =
                    self.aggregator.active_ids().into_iter().map(String::from).collect();
                self.aggregator.ingest_payload(Some(&payload));
                if self.aggregator.active_ids() != before {
                    events.push(SessionEvent::ActivityChanged);
                }
            }
            Broadcast::ChannelValue(update) => {
                self.channel_values.insert(update.name, update.value);
            }
            Broadcast::VariableValue(update) => {
                self.variable_values.insert(update.name, update.value);
            }
            Broadcast::InputDefinitions(table) => {
                let definitions = InputDefinitions::from_table(table);
                let count = definitions.len();
                if self.aggregator.install_definitions(definitions) {
                    info!("📋 Installed {} input definitions from backend", count);
                    events.push(SessionEvent::DefinitionsInstalled(count));
                }
            }
            Broadcast::ActiveLayer(layer) => {
                self.store.set_active_layer(layer);
            }
            Broadcast::OperationStatus(scope, status) => {
                events.push(SessionEvent::Status(self.record_notice(scope, status)));
            }
            Broadcast::Connection(up) => {
                if up {
                    info!("Backend link up");
                } else {
                    warn!("Backend link down");
                }
                events.push(SessionEvent::Connection(up));
            }
            Broadcast::Unknown(event) => debug!("Ignoring unhandled event '{}'", event),
        }

        self.drain_notifications(&mut events);
        events
    }

    /// Turn queued store notifications into events
    fn drain_notifications(&mut self, events: &mut Vec<SessionEvent>) {
        loop {
            // Lock released before handling, which may notify again
            let Some(notification) = self.inbox.lock().pop_front() else {
                break;
            };
            match notification {
                Notification::ConfigurationLoaded(snapshot) => {
                    events.push(SessionEvent::ConfigurationLoaded);
                    self.revalidate(&snapshot, events);
                }
                Notification::ConfigurationUpdated(snapshot) => {
                    events.push(SessionEvent::ConfigurationUpdated);
                    self.revalidate(&snapshot, events);
                }
                Notification::ActiveLayerChanged(layer) => {
                    events.push(SessionEvent::ActiveLayerChanged(layer));
                }
                Notification::SelectedInputChanged(_) => {}
            }
        }
    }

    /// Bring live values and the open editor in line with a new snapshot
    fn revalidate(&mut self, snapshot: &ConfigSnapshot, events: &mut Vec<SessionEvent>) {
        self.channel_values
            .retain(|name, _| snapshot.internal_channels.contains_key(name));
        self.variable_values
            .retain(|name, _| snapshot.internal_variables.contains_key(name));

        if let Some(stale) = self.editor.check_references(snapshot) {
            debug!("Closing editor: {}", stale);
            self.close_editor();
            events.push(SessionEvent::EditorClosed(stale));
        } else {
            self.editor.refresh(snapshot);
        }
    }

    fn record_notice(&mut self, scope: StatusScope, status: OperationStatus) -> Notice {
        let notice = Notice {
            scope,
            success: status.success,
            message: status.message,
            at: Local::now(),
        };
        if notice.success {
            info!("✅ {} operation: {}", scope.as_str(), notice.message);
        } else {
            warn!("❌ {} operation failed: {}", scope.as_str(), notice.message);
        }

        self.notices.push_back(notice.clone());
        while self.notices.len() > MAX_NOTICES {
            self.notices.pop_front();
        }
        notice
    }

    // =========================================================================
    // View state
    // =========================================================================

    /// Switch the layer the console shows
    pub fn set_active_layer(&mut self, layer: LayerId) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.store.set_active_layer(layer);
        self.drain_notifications(&mut events);
        events
    }

    // =========================================================================
    // Editor
    // =========================================================================

    pub fn select_input(&mut self, layer: LayerId, input_id: &str) -> Result<()> {
        let input_id = input_id.trim();
        if input_id.is_empty() {
            return Err(PadmapError::validation("input name cannot be empty"));
        }
        let snapshot = self.store.get();
        self.editor.select_input(layer, input_id, &snapshot);
        self.store.set_selected_input(Some(SelectedInput {
            layer,
            input_id: input_id.to_string(),
        }));
        Ok(())
    }

    pub fn set_target_kind(&mut self, kind: TargetKind) -> Result<()> {
        self.editor.set_target_kind(kind)
    }

    pub fn set_targets(&mut self, names: Vec<String>) -> Result<()> {
        let snapshot = self.store.get();
        self.editor.set_targets(names, &snapshot)
    }

    pub fn toggle_target(&mut self, name: &str) -> Result<()> {
        let snapshot = self.store.get();
        self.editor.toggle_target(name, &snapshot)
    }

    pub fn set_action(&mut self, action: ActionKind) -> Result<()> {
        self.editor.set_action(action)
    }

    pub fn set_param(&mut self, key: &str, text: &str) -> Result<()> {
        self.editor.set_param_text(key, text)
    }

    pub fn unset_param(&mut self, key: &str) -> Result<()> {
        self.editor.unset_param(key)
    }

    /// Send the open mapping to the backend
    ///
    /// The editor only closes once the intent is handed to the transport, so
    /// a save refused for a down link can be retried.
    pub fn save(&mut self, apply_to_all_layers: bool) -> Result<()> {
        self.ensure_connected()?;
        let intent = self.editor.prepare_save(apply_to_all_layers)?;
        self.transport.send(intent)?;
        self.close_editor();
        Ok(())
    }

    pub fn clear(&mut self, apply_to_all_layers: bool) -> Result<()> {
        self.ensure_connected()?;
        let intent = self.editor.prepare_clear(apply_to_all_layers)?;
        self.transport.send(intent)?;
        self.close_editor();
        Ok(())
    }

    pub fn cancel(&mut self) -> bool {
        self.store.set_selected_input(None);
        self.editor.cancel()
    }

    fn close_editor(&mut self) {
        self.editor.reset();
        self.store.set_selected_input(None);
    }

    /// Remove one channel from a multi-channel mapping without opening it
    pub fn clear_channel_from_mapping(
        &mut self,
        layer: LayerId,
        input_id: &str,
        channel: &str,
    ) -> Result<()> {
        let snapshot = self.store.get();
        let mapping = snapshot.mapping(layer, input_id).ok_or_else(|| {
            PadmapError::validation(format!("{} has no mapping on layer {}", input_id, layer))
        })?;
        if mapping.target_kind != TargetKind::OscChannel {
            return Err(PadmapError::validation(format!(
                "{} is not mapped to OSC channels",
                input_id
            )));
        }
        if !mapping.targets().iter().any(|t| t == channel) {
            return Err(PadmapError::validation(format!(
                "{} does not drive channel '{}'",
                input_id, channel
            )));
        }
        self.transport
            .send(Intent::clear_channel_from_mapping(layer, input_id, channel))
    }

    // =========================================================================
    // Channels and variables
    // =========================================================================

    pub fn add_channel(&mut self, name: &str, channel: ChannelDef) -> Result<()> {
        let name = non_empty_name(name)?;
        if self.store.get().channel(name).is_some() {
            return Err(PadmapError::validation(format!(
                "channel '{}' already exists",
                name
            )));
        }
        check_range(channel.min_value, channel.max_value)?;
        self.transport.send(Intent::add_channel(name, channel))
    }

    pub fn update_channel(&mut self, name: &str, channel: ChannelDef) -> Result<()> {
        self.existing_channel(name)?;
        check_range(channel.min_value, channel.max_value)?;
        self.transport.send(Intent::update_channel(name, channel))
    }

    pub fn delete_channel(&mut self, name: &str) -> Result<()> {
        self.existing_channel(name)?;
        self.transport.send(Intent::delete_channel(name))
    }

    /// Rename a channel through the operations the backend accepts
    ///
    /// The backend keeps a channel's key on update, so a rename is an add
    /// under the new name, a re-save of every mapping that drives the old
    /// channel, and a delete of the old one. Mappings are re-saved per layer.
    pub fn rename_channel(&mut self, name: &str, new_name: &str) -> Result<()> {
        let channel = self.existing_channel(name)?;
        let new_name = non_empty_name(new_name)?;
        if new_name == name {
            return Ok(());
        }
        let snapshot = self.store.get();
        if snapshot.channel(new_name).is_some() {
            return Err(PadmapError::validation(format!(
                "channel '{}' already exists",
                new_name
            )));
        }
        self.ensure_connected()?;

        let mut intents = vec![Intent::add_channel(new_name, channel)];
        for (layer, config) in &snapshot.layers {
            for (input_id, mapping) in &config.input_mappings {
                if let Some(mapping) = retarget(mapping, name, new_name) {
                    intents.push(Intent::save_mapping(*layer, input_id, mapping, false));
                }
            }
        }
        intents.push(Intent::delete_channel(name));

        info!("Renaming channel '{}' to '{}' ({} intents)", name, new_name, intents.len());
        for intent in intents {
            self.transport.send(intent)?;
        }
        Ok(())
    }

    pub fn add_variable(&mut self, name: &str, variable: VariableDef) -> Result<()> {
        let name = non_empty_name(name)?;
        if self.store.get().variable(name).is_some() {
            return Err(PadmapError::validation(format!(
                "variable '{}' already exists",
                name
            )));
        }
        check_range(variable.min_value, variable.max_value)?;
        self.transport.send(Intent::add_variable(name, variable))
    }

    pub fn update_variable(&mut self, name: &str, variable: VariableDef) -> Result<()> {
        self.existing_variable(name)?;
        check_range(variable.min_value, variable.max_value)?;
        self.transport.send(Intent::update_variable(name, variable))
    }

    pub fn delete_variable(&mut self, name: &str) -> Result<()> {
        self.existing_variable(name)?;
        self.transport.send(Intent::delete_variable(name))
    }

    /// Ask the backend to rebroadcast its configuration
    pub fn request_configuration(&self) -> Result<()> {
        self.transport.send(Intent::request_configuration())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(PadmapError::unavailable("not connected to the backend"))
        }
    }

    fn existing_channel(&self, name: &str) -> Result<ChannelDef> {
        self.store
            .get()
            .channel(name)
            .cloned()
            .ok_or_else(|| PadmapError::validation(format!("no channel named '{}'", name)))
    }

    fn existing_variable(&self, name: &str) -> Result<VariableDef> {
        self.store
            .get()
            .variable(name)
            .cloned()
            .ok_or_else(|| PadmapError::validation(format!("no variable named '{}'", name)))
    }
}

/// Copy of a channel mapping with one target renamed
fn retarget(mapping: &InputMapping, from: &str, to: &str) -> Option<InputMapping> {
    if mapping.target_kind != TargetKind::OscChannel {
        return None;
    }
    let targets = mapping.targets();
    if !targets.iter().any(|t| t == from) {
        return None;
    }
    let renamed: Vec<String> = targets
        .into_iter()
        .map(|t| if t == from { to.to_string() } else { t })
        .collect();
    Some(InputMapping {
        target_name: TargetName::for_kind(mapping.target_kind, &renamed),
        ..mapping.clone()
    })
}

fn non_empty_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PadmapError::validation("name cannot be empty"));
    }
    Ok(name)
}

fn check_range(min: Option<f64>, max: Option<f64>) -> Result<()> {
    match (min, max) {
        (Some(min), Some(max)) if min >= max => Err(PadmapError::validation(format!(
            "min ({}) must be below max ({})",
            min, max
        ))),
        _ => Ok(()),
    }
}
