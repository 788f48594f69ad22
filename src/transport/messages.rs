//! Wire messages exchanged with the mapping backend
//!
//! Every message is a named Socket.IO event with one JSON payload.
//! Outbound events are [`Intent`]s; inbound events decode into [`Broadcast`].

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::socketio;
use crate::state::{ChannelDef, ConfigSnapshot, InputMapping, LayerId, VariableDef};

/// Request to mutate (or re-read) the backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Intent {
    #[serde(rename = "get_active_config")]
    RequestConfiguration(Empty),
    #[serde(rename = "update_input_mapping")]
    SaveMapping(SaveMapping),
    #[serde(rename = "clear_input_mapping")]
    ClearMapping(ClearMapping),
    #[serde(rename = "clear_specific_mapping")]
    ClearChannelFromMapping(ClearChannelFromMapping),
    AddChannel(ChannelDef),
    UpdateChannel(UpdateChannel),
    DeleteChannel(DeleteByName),
    AddVariable(VariableDef),
    UpdateVariable(UpdateVariable),
    DeleteVariable(DeleteByName),
}

/// Empty payload object
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SaveMapping {
    pub layer_id: LayerId,
    pub input_name: String,
    pub mapping_data: InputMapping,
    pub save_to_all_layers: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ClearMapping {
    pub layer_id: LayerId,
    pub input_name: String,
    pub save_to_all_layers: bool,
}

/// Drop one channel from a multi-channel mapping
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ClearChannelFromMapping {
    pub layer_id: LayerId,
    pub input_name: String,
    pub channel_name: String,
}

/// Fields merged into an existing channel; the channel keeps its name
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct UpdateChannel {
    pub name: String,
    pub data: ChannelDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct UpdateVariable {
    pub name: String,
    pub data: VariableDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct DeleteByName {
    pub name: String,
}

impl Intent {
    pub fn request_configuration() -> Self {
        Intent::RequestConfiguration(Empty {})
    }

    pub fn save_mapping(
        layer: LayerId,
        input_id: &str,
        mapping: InputMapping,
        apply_to_all_layers: bool,
    ) -> Self {
        Intent::SaveMapping(SaveMapping {
            layer_id: layer,
            input_name: input_id.to_string(),
            mapping_data: mapping,
            save_to_all_layers: apply_to_all_layers,
        })
    }

    pub fn clear_mapping(layer: LayerId, input_id: &str, apply_to_all_layers: bool) -> Self {
        Intent::ClearMapping(ClearMapping {
            layer_id: layer,
            input_name: input_id.to_string(),
            save_to_all_layers: apply_to_all_layers,
        })
    }

    pub fn clear_channel_from_mapping(layer: LayerId, input_id: &str, channel: &str) -> Self {
        Intent::ClearChannelFromMapping(ClearChannelFromMapping {
            layer_id: layer,
            input_name: input_id.to_string(),
            channel_name: channel.to_string(),
        })
    }

    /// The payload carries the name alongside the channel fields
    pub fn add_channel(name: &str, mut channel: ChannelDef) -> Self {
        channel.name = Some(name.to_string());
        Intent::AddChannel(channel)
    }

    pub fn update_channel(name: &str, mut channel: ChannelDef) -> Self {
        channel.name = None;
        Intent::UpdateChannel(UpdateChannel {
            name: name.to_string(),
            data: channel,
        })
    }

    pub fn delete_channel(name: &str) -> Self {
        Intent::DeleteChannel(DeleteByName {
            name: name.to_string(),
        })
    }

    pub fn add_variable(name: &str, mut variable: VariableDef) -> Self {
        variable.name = Some(name.to_string());
        Intent::AddVariable(variable)
    }

    pub fn update_variable(name: &str, mut variable: VariableDef) -> Self {
        variable.name = None;
        Intent::UpdateVariable(UpdateVariable {
            name: name.to_string(),
            data: variable,
        })
    }

    pub fn delete_variable(name: &str) -> Self {
        Intent::DeleteVariable(DeleteByName {
            name: name.to_string(),
        })
    }

    /// Wire event name
    pub fn event_name(&self) -> &'static str {
        match self {
            Intent::RequestConfiguration(_) => "get_active_config",
            Intent::SaveMapping(_) => "update_input_mapping",
            Intent::ClearMapping(_) => "clear_input_mapping",
            Intent::ClearChannelFromMapping(_) => "clear_specific_mapping",
            Intent::AddChannel(_) => "add_channel",
            Intent::UpdateChannel(_) => "update_channel",
            Intent::DeleteChannel(_) => "delete_channel",
            Intent::AddVariable(_) => "add_variable",
            Intent::UpdateVariable(_) => "update_variable",
            Intent::DeleteVariable(_) => "delete_variable",
        }
    }

    /// Event payload without the name
    pub fn payload(&self) -> serde_json::Result<Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    /// Encode as a Socket.IO event frame
    pub fn to_frame(&self) -> serde_json::Result<String> {
        Ok(socketio::encode_event(self.event_name(), &self.payload()?))
    }
}

/// Scalar value pushed for a channel or variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum LiveValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl std::fmt::Display for LiveValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveValue::Number(n) => write!(f, "{:.3}", n),
            LiveValue::Bool(b) => write!(f, "{}", b),
            LiveValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Which family of operation a status notice reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusScope {
    Mapping,
    Channel,
    Variable,
    Config,
}

impl StatusScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusScope::Mapping => "mapping",
            StatusScope::Channel => "channel",
            StatusScope::Variable => "variable",
            StatusScope::Config => "config",
        }
    }
}

/// Result of a backend operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OperationStatus {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct NamedValue {
    pub name: String,
    pub value: LiveValue,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct ActiveLayerPayload {
    pub layer_id: LayerId,
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast {
    /// Full configuration snapshot
    Configuration(Box<ConfigSnapshot>),
    /// Raw per-device input payload, validated by the aggregator
    RawInputs(Value),
    ChannelValue(NamedValue),
    VariableValue(NamedValue),
    /// Raw-name → generic-id table, fetched over HTTP by the transport
    InputDefinitions(HashMap<String, String>),
    ActiveLayer(LayerId),
    OperationStatus(StatusScope, OperationStatus),
    /// Link state change reported by the transport itself
    Connection(bool),
    /// Event this client does not handle
    Unknown(String),
}

#[derive(Debug, Error)]
#[error("malformed '{event}' payload: {source}")]
pub struct FrameError {
    pub event: String,
    #[source]
    pub source: serde_json::Error,
}

impl Broadcast {
    /// Decode one inbound event
    pub fn from_event(event: &str, data: Value) -> Result<Self, FrameError> {
        fn payload<T: serde::de::DeserializeOwned>(
            event: &str,
            data: Value,
        ) -> Result<T, FrameError> {
            serde_json::from_value(data).map_err(|source| FrameError {
                event: event.to_string(),
                source,
            })
        }

        let broadcast = match event {
            "active_config_updated" => Broadcast::Configuration(Box::new(payload(event, data)?)),
            "raw_inputs_update" => Broadcast::RawInputs(data),
            "channel_value_update" => Broadcast::ChannelValue(payload(event, data)?),
            "variable_value_updated" => Broadcast::VariableValue(payload(event, data)?),
            "active_layer_changed" => {
                let layer: ActiveLayerPayload = payload(event, data)?;
                Broadcast::ActiveLayer(layer.layer_id)
            }
            "mapping_operation_status" => {
                Broadcast::OperationStatus(StatusScope::Mapping, payload(event, data)?)
            }
            "channel_operation_status" => {
                Broadcast::OperationStatus(StatusScope::Channel, payload(event, data)?)
            }
            "variable_operation_status" => {
                Broadcast::OperationStatus(StatusScope::Variable, payload(event, data)?)
            }
            "config_operation_status" => {
                Broadcast::OperationStatus(StatusScope::Config, payload(event, data)?)
            }
            _ => Broadcast::Unknown(event.to_string()),
        };
        Ok(broadcast)
    }
}
