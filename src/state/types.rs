//! Mapping configuration type definitions
//!
//! Mirrors the backend's authoritative configuration: layers, per-input
//! mappings, channels and variables. Field names follow the backend's JSON.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// One of the four fixed mapping layers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum LayerId {
    A,
    B,
    C,
    D,
}

impl LayerId {
    /// All layers in display order
    pub fn all() -> &'static [LayerId] {
        &[LayerId::A, LayerId::B, LayerId::C, LayerId::D]
    }

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Some(LayerId::A),
            "B" => Some(LayerId::B),
            "C" => Some(LayerId::C),
            "D" => Some(LayerId::D),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerId::A => "A",
            LayerId::B => "B",
            LayerId::C => "C",
            LayerId::D => "D",
        }
    }

    /// Name given to a freshly created layer
    pub fn default_name(&self) -> String {
        format!("Layer {}", self.as_str())
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category of mapping destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// One or more OSC channels (multi-target fan-out)
    OscChannel,
    /// A single internal variable
    InternalVariable,
    /// A layer to activate
    LayerSwitch,
}

impl TargetKind {
    pub fn all() -> &'static [TargetKind] {
        &[
            TargetKind::OscChannel,
            TargetKind::InternalVariable,
            TargetKind::LayerSwitch,
        ]
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "osc_channel" | "channel" | "osc" => Some(TargetKind::OscChannel),
            "internal_variable" | "variable" | "var" => Some(TargetKind::InternalVariable),
            "layer_switch" | "layer" => Some(TargetKind::LayerSwitch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::OscChannel => "osc_channel",
            TargetKind::InternalVariable => "internal_variable",
            TargetKind::LayerSwitch => "layer_switch",
        }
    }

    /// Whether this kind accepts several target names at once
    pub fn allows_multiple_targets(&self) -> bool {
        matches!(self, TargetKind::OscChannel)
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transformation or trigger semantics applied when an input drives its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Direct,
    Toggle,
    Rate,
    StepByMultiplierOnTrigger,
    ResetChannelOnTrigger,
    ActivateLayer,
    SetValueFromInput,
}

impl ActionKind {
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::Direct,
            ActionKind::Toggle,
            ActionKind::Rate,
            ActionKind::StepByMultiplierOnTrigger,
            ActionKind::ResetChannelOnTrigger,
            ActionKind::ActivateLayer,
            ActionKind::SetValueFromInput,
        ]
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ActionKind::Direct),
            "toggle" => Some(ActionKind::Toggle),
            "rate" => Some(ActionKind::Rate),
            "step_by_multiplier_on_trigger" => Some(ActionKind::StepByMultiplierOnTrigger),
            "reset_channel_on_trigger" => Some(ActionKind::ResetChannelOnTrigger),
            "activate_layer" => Some(ActionKind::ActivateLayer),
            "set_value_from_input" => Some(ActionKind::SetValueFromInput),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Direct => "direct",
            ActionKind::Toggle => "toggle",
            ActionKind::Rate => "rate",
            ActionKind::StepByMultiplierOnTrigger => "step_by_multiplier_on_trigger",
            ActionKind::ResetChannelOnTrigger => "reset_channel_on_trigger",
            ActionKind::ActivateLayer => "activate_layer",
            ActionKind::SetValueFromInput => "set_value_from_input",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mapping destination name(s): a single name, or a list for channel fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum TargetName {
    Single(String),
    Multi(Vec<String>),
}

impl TargetName {
    /// Build the wire shape expected for a target kind
    ///
    /// Channel targets always travel as a list; other kinds carry the first name.
    pub fn for_kind(kind: TargetKind, names: &[String]) -> Self {
        if kind.allows_multiple_targets() {
            TargetName::Multi(names.to_vec())
        } else {
            TargetName::Single(names.first().cloned().unwrap_or_default())
        }
    }

    /// All non-empty names
    pub fn names(&self) -> Vec<String> {
        match self {
            TargetName::Single(name) if name.is_empty() => Vec::new(),
            TargetName::Single(name) => vec![name.clone()],
            TargetName::Multi(names) => names.iter().filter(|n| !n.is_empty()).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

impl Default for TargetName {
    fn default() -> Self {
        TargetName::Multi(Vec::new())
    }
}

impl std::fmt::Display for TargetName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.names().join(", "))
    }
}

/// Scalar parameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<ParamValue> for Value {
    fn from(value: ParamValue) -> Self {
        match value {
            ParamValue::Bool(b) => Value::Bool(b),
            ParamValue::Number(n) => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }
}

/// Mapping parameters keyed by their wire name
pub type Params = BTreeMap<String, ParamValue>;

/// Binding of one generic input (on one layer) to a target
///
/// On the wire `params` is a single object. Bool and number entries land in
/// [`params`](Self::params); anything structured (the backend's
/// `on_change_osc` for layer switches) is kept verbatim in
/// [`extra_params`](Self::extra_params) and written back on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMapping", into = "WireMapping")]
pub struct InputMapping {
    pub target_kind: TargetKind,
    pub target_name: TargetName,
    /// `None` when the backend left the mapping without an action
    /// (e.g. after its only channel was removed)
    pub action: Option<ActionKind>,
    pub params: Params,
    pub extra_params: BTreeMap<String, Value>,
}

impl InputMapping {
    /// Target names, with empty entries dropped
    pub fn targets(&self) -> Vec<String> {
        self.target_name.names()
    }

    /// Whether the mapping carries everything needed to drive a target
    pub fn is_complete(&self) -> bool {
        self.action.is_some() && !self.target_name.is_empty()
    }
}

impl JsonSchema for InputMapping {
    fn schema_name() -> String {
        "InputMapping".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        WireMapping::json_schema(gen)
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
struct WireMapping {
    target_type: TargetKind,
    #[serde(default, deserialize_with = "null_as_default")]
    #[schemars(with = "TargetName")]
    target_name: TargetName,
    #[serde(default, deserialize_with = "lenient_action")]
    #[schemars(with = "Option<ActionKind>")]
    action: Option<ActionKind>,
    #[serde(default, deserialize_with = "null_as_default")]
    #[schemars(with = "BTreeMap<String, Value>")]
    params: BTreeMap<String, Value>,
}

impl From<WireMapping> for InputMapping {
    fn from(wire: WireMapping) -> Self {
        let mut params = Params::new();
        let mut extra_params = BTreeMap::new();
        for (key, value) in wire.params {
            let scalar = match &value {
                Value::Bool(b) => Some(ParamValue::Bool(*b)),
                Value::Number(n) => n.as_f64().map(ParamValue::Number),
                _ => None,
            };
            match scalar {
                Some(scalar) => {
                    params.insert(key, scalar);
                }
                None => {
                    extra_params.insert(key, value);
                }
            }
        }

        Self {
            target_kind: wire.target_type,
            target_name: wire.target_name,
            action: wire.action,
            params,
            extra_params,
        }
    }
}

impl From<InputMapping> for WireMapping {
    fn from(mapping: InputMapping) -> Self {
        let mut params = mapping.extra_params;
        params.extend(mapping.params.into_iter().map(|(k, v)| (k, Value::from(v))));

        Self {
            target_type: mapping.target_kind,
            target_name: mapping.target_name,
            action: mapping.action,
            params,
        }
    }
}

/// One layer's mapping table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LayerConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub input_mappings: BTreeMap<String, InputMapping>,
}

impl LayerConfig {
    pub fn empty(id: LayerId) -> Self {
        Self {
            name: id.default_name(),
            input_mappings: BTreeMap::new(),
        }
    }
}

/// How a channel's value is sent out
///
/// The backend stores whatever hint it was given, so unknown hints are
/// carried as [`Other`](Self::Other) rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelValueType {
    Float,
    Int,
    Bool,
    String,
    Other(String),
}

impl From<String> for ChannelValueType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "float" => ChannelValueType::Float,
            "int" => ChannelValueType::Int,
            "bool" => ChannelValueType::Bool,
            "string" => ChannelValueType::String,
            _ => ChannelValueType::Other(s),
        }
    }
}

impl From<ChannelValueType> for String {
    fn from(value: ChannelValueType) -> Self {
        match value {
            ChannelValueType::Float => "float".to_string(),
            ChannelValueType::Int => "int".to_string(),
            ChannelValueType::Bool => "bool".to_string(),
            ChannelValueType::String => "string".to_string(),
            ChannelValueType::Other(s) => s,
        }
    }
}

/// Output channel definition
///
/// Decoding never fails on a field's type: a value that does not fit its
/// typed slot stays in `extra` under its own key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(from = "RawFields")]
pub struct ChannelDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub osc_type: Option<ChannelValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osc_strings: Option<Vec<String>>,
    /// Fields the console does not interpret, kept for structural comparison
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChannelDef {
    pub fn is_string_valued(&self) -> bool {
        self.osc_type == Some(ChannelValueType::String)
    }
}

impl From<RawFields> for ChannelDef {
    fn from(mut raw: RawFields) -> Self {
        Self {
            name: take_field(&mut raw, "name"),
            min_value: take_field(&mut raw, "min_value"),
            max_value: take_field(&mut raw, "max_value"),
            default: take_field(&mut raw, "default"),
            osc_address: take_field(&mut raw, "osc_address"),
            osc_type: take_field(&mut raw, "osc_type"),
            osc_strings: take_field(&mut raw, "osc_strings"),
            extra: raw,
        }
    }
}

/// OSC message emitted when a variable changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OnChangeOsc {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_value_type")]
    pub value_type: String,
    #[serde(default = "default_value_content")]
    pub value_content: String,
}

/// Internal variable definition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(from = "RawFields")]
pub struct VariableDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub initial_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_change_osc: Option<OnChangeOsc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl From<RawFields> for VariableDef {
    fn from(mut raw: RawFields) -> Self {
        let initial_value = take_field(&mut raw, "initial_value").unwrap_or_default();
        // Always serialized, so an ill-typed original cannot ride along in `extra`
        raw.remove("initial_value");

        Self {
            name: take_field(&mut raw, "name"),
            initial_value,
            current_value: take_field(&mut raw, "current_value"),
            min_value: take_field(&mut raw, "min_value"),
            max_value: take_field(&mut raw, "max_value"),
            step: take_field(&mut raw, "step"),
            on_change_osc: take_field(&mut raw, "on_change_osc"),
            extra: raw,
        }
    }
}

/// Authoritative configuration as broadcast by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigSnapshot {
    #[serde(default = "default_layers")]
    pub layers: BTreeMap<LayerId, LayerConfig>,
    #[serde(default)]
    pub internal_channels: BTreeMap<String, ChannelDef>,
    #[serde(default)]
    pub internal_variables: BTreeMap<String, VariableDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osc_settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_settings: Option<Value>,
}

impl ConfigSnapshot {
    pub fn layer(&self, id: LayerId) -> Option<&LayerConfig> {
        self.layers.get(&id)
    }

    /// Existing mapping for an input on a layer
    pub fn mapping(&self, layer: LayerId, input_id: &str) -> Option<&InputMapping> {
        self.layers
            .get(&layer)
            .and_then(|l| l.input_mappings.get(input_id))
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelDef> {
        self.internal_channels.get(name)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDef> {
        self.internal_variables.get(name)
    }

    /// Whether a target of the given kind exists
    pub fn has_target(&self, kind: TargetKind, name: &str) -> bool {
        match kind {
            TargetKind::OscChannel => self.internal_channels.contains_key(name),
            TargetKind::InternalVariable => self.internal_variables.contains_key(name),
            TargetKind::LayerSwitch => LayerId::from_str(name)
                .map(|id| self.layers.contains_key(&id))
                .unwrap_or(false),
        }
    }

    /// Names selectable as targets for a kind, sorted
    pub fn target_names(&self, kind: TargetKind) -> Vec<String> {
        match kind {
            TargetKind::OscChannel => self.internal_channels.keys().cloned().collect(),
            TargetKind::InternalVariable => self.internal_variables.keys().cloned().collect(),
            TargetKind::LayerSwitch => self.layers.keys().map(|id| id.to_string()).collect(),
        }
    }
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            layers: default_layers(),
            internal_channels: BTreeMap::new(),
            internal_variables: BTreeMap::new(),
            osc_settings: None,
            web_settings: None,
            input_settings: None,
        }
    }
}

// Default value functions
fn default_layers() -> BTreeMap<LayerId, LayerConfig> {
    LayerId::all()
        .iter()
        .map(|id| (*id, LayerConfig::empty(*id)))
        .collect()
}

fn default_value_type() -> String {
    "float".to_string()
}

fn default_value_content() -> String {
    "value".to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_action<'de, D>(deserializer: D) -> Result<Option<ActionKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        let action = ActionKind::from_str(&s);
        if action.is_none() && !s.is_empty() {
            warn!("Ignoring unknown mapping action '{}'", s);
        }
        action
    }))
}

type RawFields = BTreeMap<String, Value>;

/// Pull a typed field out of a raw object
///
/// Null reads as absent. A value of the wrong type is put back so it
/// survives in the `extra` map.
fn take_field<T: DeserializeOwned>(raw: &mut RawFields, key: &str) -> Option<T> {
    let value = raw.remove(key)?;
    if value.is_null() {
        return None;
    }
    match T::deserialize(&value) {
        Ok(typed) => Some(typed),
        Err(e) => {
            warn!("Keeping field '{}' uninterpreted: {}", key, e);
            raw.insert(key.to_string(), value);
            None
        }
    }
}
