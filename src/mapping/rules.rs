//! Mapping rule engine
//!
//! Static compatibility tables: which actions a target kind accepts, and which
//! parameters each action takes. Everything here is a pure function over those
//! tables, used both to drive the editor's dependent fields and to validate
//! a mapping before it is sent.

use crate::error::{PadmapError, Result};
use crate::state::{
    ActionKind, ConfigSnapshot, InputMapping, ParamValue, Params, TargetKind, TargetName,
};

/// Wire names of the known parameters
pub const PARAM_INVERT: &str = "invert";
pub const PARAM_RATE_MULTIPLIER: &str = "rate_multiplier";
pub const PARAM_MULTIPLIER: &str = "multiplier";
pub const PARAM_VALUE_TO_SET: &str = "value_to_set";

/// Scalar type a parameter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    Float,
}

impl ParamType {
    pub fn accepts(&self, value: &ParamValue) -> bool {
        matches!(
            (self, value),
            (ParamType::Bool, ParamValue::Bool(_)) | (ParamType::Float, ParamValue::Number(_))
        )
    }

    /// Parse operator text into a value of this type
    pub fn parse(&self, text: &str) -> Option<ParamValue> {
        let text = text.trim();
        match self {
            ParamType::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Some(ParamValue::Bool(true)),
                "false" | "off" | "no" | "0" => Some(ParamValue::Bool(false)),
                _ => None,
            },
            ParamType::Float => text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(ParamValue::Number),
        }
    }
}

/// One parameter an action takes
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub key: &'static str,
    pub param_type: ParamType,
    pub default: ParamValue,
    /// Optional params are absent until explicitly set
    pub optional: bool,
    pub label: &'static str,
}

const DIRECT_PARAMS: &[ParamSpec] = &[ParamSpec {
    key: PARAM_INVERT,
    param_type: ParamType::Bool,
    default: ParamValue::Bool(false),
    optional: true,
    label: "Invert input",
}];

const RATE_PARAMS: &[ParamSpec] = &[ParamSpec {
    key: PARAM_RATE_MULTIPLIER,
    param_type: ParamType::Float,
    default: ParamValue::Number(1.0),
    optional: false,
    label: "Rate multiplier",
}];

const STEP_PARAMS: &[ParamSpec] = &[ParamSpec {
    key: PARAM_MULTIPLIER,
    param_type: ParamType::Float,
    default: ParamValue::Number(1.0),
    optional: false,
    label: "Step multiplier",
}];

const SET_VALUE_PARAMS: &[ParamSpec] = &[ParamSpec {
    key: PARAM_VALUE_TO_SET,
    param_type: ParamType::Float,
    default: ParamValue::Number(0.0),
    optional: false,
    label: "Value to set",
}];

/// Actions permitted for a target kind
pub fn actions_for(kind: TargetKind) -> &'static [ActionKind] {
    match kind {
        TargetKind::OscChannel => &[
            ActionKind::Direct,
            ActionKind::Toggle,
            ActionKind::Rate,
            ActionKind::StepByMultiplierOnTrigger,
            ActionKind::ResetChannelOnTrigger,
        ],
        TargetKind::InternalVariable => &[ActionKind::StepByMultiplierOnTrigger],
        TargetKind::LayerSwitch => &[ActionKind::ActivateLayer],
    }
}

/// The single action a kind implies, if the operator gets no choice
pub fn forced_action(kind: TargetKind) -> Option<ActionKind> {
    match kind {
        TargetKind::OscChannel => None,
        TargetKind::InternalVariable => Some(ActionKind::StepByMultiplierOnTrigger),
        TargetKind::LayerSwitch => Some(ActionKind::ActivateLayer),
    }
}

/// Actions meaningful for string-valued channels
const STRING_CHANNEL_ACTIONS: &[ActionKind] =
    &[ActionKind::Toggle, ActionKind::ResetChannelOnTrigger];

/// Actions offered once concrete targets are chosen
///
/// String-valued channels only switch between their predefined strings, so
/// they narrow the channel set; with several channels the intersection is
/// offered. Unknown targets do not narrow anything.
pub fn actions_for_targets(
    kind: TargetKind,
    targets: &[String],
    snapshot: &ConfigSnapshot,
) -> Vec<ActionKind> {
    let base = actions_for(kind);
    match kind {
        TargetKind::OscChannel => {
            let any_string_valued = targets
                .iter()
                .filter_map(|name| snapshot.channel(name))
                .any(|channel| channel.is_string_valued());

            base.iter()
                .copied()
                .filter(|action| !any_string_valued || STRING_CHANNEL_ACTIONS.contains(action))
                .collect()
        }
        TargetKind::InternalVariable | TargetKind::LayerSwitch => base.to_vec(),
    }
}

/// Parameter schema of an action
pub fn params_schema_for(action: ActionKind) -> &'static [ParamSpec] {
    match action {
        ActionKind::Direct => DIRECT_PARAMS,
        ActionKind::Rate => RATE_PARAMS,
        ActionKind::StepByMultiplierOnTrigger => STEP_PARAMS,
        ActionKind::SetValueFromInput => SET_VALUE_PARAMS,
        ActionKind::Toggle | ActionKind::ResetChannelOnTrigger | ActionKind::ActivateLayer => &[],
    }
}

/// Look up one parameter of an action
pub fn param_spec(action: ActionKind, key: &str) -> Option<&'static ParamSpec> {
    params_schema_for(action).iter().find(|spec| spec.key == key)
}

/// Fresh params for an action: every required key at its default
pub fn default_params(action: ActionKind) -> Params {
    params_schema_for(action)
        .iter()
        .filter(|spec| !spec.optional)
        .map(|spec| (spec.key.to_string(), spec.default))
        .collect()
}

/// Rebuild params against an action's schema
///
/// Values whose key and type fit the schema survive; required keys missing
/// from `previous` get their default; everything else is dropped. This is
/// what keeps `invert` off any action other than `direct`.
pub fn rebuild_params(action: ActionKind, previous: &Params) -> Params {
    params_schema_for(action)
        .iter()
        .filter_map(|spec| match previous.get(spec.key) {
            Some(value) if spec.param_type.accepts(value) => Some((spec.key.to_string(), *value)),
            _ if spec.optional => None,
            _ => Some((spec.key.to_string(), spec.default)),
        })
        .collect()
}

/// Whether structured params the backend attaches (`on_change_osc`) survive a save
pub fn keeps_structured_params(action: ActionKind) -> bool {
    action == ActionKind::ActivateLayer
}

/// Check one parameter value against an action's schema
pub fn validate_param(action: ActionKind, key: &str, value: &ParamValue) -> Result<()> {
    let spec = param_spec(action, key).ok_or_else(|| {
        PadmapError::validation(format!("action '{}' has no parameter '{}'", action, key))
    })?;
    if !spec.param_type.accepts(value) {
        return Err(PadmapError::validation(format!(
            "parameter '{}' expects a {} value",
            key,
            match spec.param_type {
                ParamType::Bool => "boolean",
                ParamType::Float => "numeric",
            }
        )));
    }
    Ok(())
}

/// Validate a complete mapping against the matrix and schema
pub fn validate(mapping: &InputMapping) -> Result<()> {
    let action = mapping
        .action
        .ok_or_else(|| PadmapError::validation("no action selected"))?;

    if !actions_for(mapping.target_kind).contains(&action) {
        return Err(PadmapError::validation(format!(
            "action '{}' is not permitted for {} targets",
            action, mapping.target_kind
        )));
    }

    match (&mapping.target_name, mapping.target_kind.allows_multiple_targets()) {
        (TargetName::Multi(_), false) => {
            return Err(PadmapError::validation(format!(
                "{} mappings take a single target",
                mapping.target_kind
            )))
        }
        (name, _) if name.is_empty() => {
            return Err(PadmapError::validation("no target selected"));
        }
        _ => {}
    }

    for (key, value) in &mapping.params {
        validate_param(action, key, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChannelDef, ChannelValueType};
    use proptest::prelude::*;

    fn kind_strategy() -> impl Strategy<Value = TargetKind> {
        prop::sample::select(TargetKind::all().to_vec())
    }

    fn action_strategy() -> impl Strategy<Value = ActionKind> {
        prop::sample::select(ActionKind::all().to_vec())
    }

    fn params_strategy() -> impl Strategy<Value = Params> {
        let key = prop::sample::select(vec![
            PARAM_INVERT,
            PARAM_RATE_MULTIPLIER,
            PARAM_MULTIPLIER,
            PARAM_VALUE_TO_SET,
            "legacy",
        ]);
        let value = prop_oneof![
            any::<bool>().prop_map(ParamValue::Bool),
            (-10.0f64..10.0).prop_map(ParamValue::Number),
        ];
        prop::collection::btree_map(key.prop_map(String::from), value, 0..5)
    }

    #[test]
    fn test_compatibility_matrix() {
        assert_eq!(
            actions_for(TargetKind::OscChannel),
            &[
                ActionKind::Direct,
                ActionKind::Toggle,
                ActionKind::Rate,
                ActionKind::StepByMultiplierOnTrigger,
                ActionKind::ResetChannelOnTrigger,
            ]
        );
        assert_eq!(
            actions_for(TargetKind::InternalVariable),
            &[ActionKind::StepByMultiplierOnTrigger]
        );
        assert_eq!(actions_for(TargetKind::LayerSwitch), &[ActionKind::ActivateLayer]);
    }

    #[test]
    fn test_forced_actions() {
        assert_eq!(forced_action(TargetKind::OscChannel), None);
        assert_eq!(
            forced_action(TargetKind::InternalVariable),
            Some(ActionKind::StepByMultiplierOnTrigger)
        );
        assert_eq!(forced_action(TargetKind::LayerSwitch), Some(ActionKind::ActivateLayer));
    }

    #[test]
    fn test_set_value_from_input_is_schema_only() {
        assert_eq!(params_schema_for(ActionKind::SetValueFromInput).len(), 1);
        for kind in TargetKind::all() {
            assert!(
                !actions_for(*kind).contains(&ActionKind::SetValueFromInput),
                "set_value_from_input must not be selectable for {}",
                kind
            );
        }
    }

    #[test]
    fn test_default_params() {
        assert_eq!(
            default_params(ActionKind::StepByMultiplierOnTrigger),
            Params::from([(PARAM_MULTIPLIER.to_string(), ParamValue::Number(1.0))])
        );
        assert_eq!(
            default_params(ActionKind::Rate),
            Params::from([(PARAM_RATE_MULTIPLIER.to_string(), ParamValue::Number(1.0))])
        );
        assert!(default_params(ActionKind::Direct).is_empty(), "invert is optional");
        assert!(default_params(ActionKind::Toggle).is_empty());
    }

    #[test]
    fn test_rebuild_keeps_matching_values() {
        let previous = Params::from([
            (PARAM_RATE_MULTIPLIER.to_string(), ParamValue::Number(-3.0)),
            (PARAM_INVERT.to_string(), ParamValue::Bool(true)),
        ]);
        let rebuilt = rebuild_params(ActionKind::Rate, &previous);
        assert_eq!(
            rebuilt,
            Params::from([(PARAM_RATE_MULTIPLIER.to_string(), ParamValue::Number(-3.0))])
        );

        let direct = rebuild_params(ActionKind::Direct, &previous);
        assert_eq!(direct.get(PARAM_INVERT), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn test_rebuild_replaces_wrong_type() {
        let previous = Params::from([(PARAM_MULTIPLIER.to_string(), ParamValue::Bool(true))]);
        let rebuilt = rebuild_params(ActionKind::StepByMultiplierOnTrigger, &previous);
        assert_eq!(rebuilt.get(PARAM_MULTIPLIER), Some(&ParamValue::Number(1.0)));
    }

    #[test]
    fn test_string_channels_narrow_actions() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.internal_channels.insert("Pan".to_string(), ChannelDef::default());
        snapshot.internal_channels.insert(
            "Scene".to_string(),
            ChannelDef {
                osc_type: Some(ChannelValueType::String),
                ..Default::default()
            },
        );

        let numeric = actions_for_targets(TargetKind::OscChannel, &["Pan".to_string()], &snapshot);
        assert_eq!(numeric, actions_for(TargetKind::OscChannel).to_vec());

        let mixed = actions_for_targets(
            TargetKind::OscChannel,
            &["Pan".to_string(), "Scene".to_string()],
            &snapshot,
        );
        assert_eq!(mixed, vec![ActionKind::Toggle, ActionKind::ResetChannelOnTrigger]);
    }

    #[test]
    fn test_validate_mapping() {
        let mut mapping = InputMapping {
            target_kind: TargetKind::InternalVariable,
            target_name: TargetName::Single("Speed".to_string()),
            action: Some(ActionKind::StepByMultiplierOnTrigger),
            params: default_params(ActionKind::StepByMultiplierOnTrigger),
            extra_params: Default::default(),
        };
        assert!(validate(&mapping).is_ok());

        mapping.action = Some(ActionKind::Direct);
        assert!(validate(&mapping).unwrap_err().is_validation());

        mapping.action = Some(ActionKind::StepByMultiplierOnTrigger);
        mapping.target_name = TargetName::Multi(vec!["Speed".to_string()]);
        assert!(validate(&mapping).is_err(), "Variables take a single target");

        mapping.target_name = TargetName::Single(String::new());
        assert!(validate(&mapping).is_err());
    }

    #[test]
    fn test_structured_params_only_for_layer_switch() {
        assert!(keeps_structured_params(ActionKind::ActivateLayer));
        assert!(!keeps_structured_params(ActionKind::Direct));
        assert!(!keeps_structured_params(ActionKind::StepByMultiplierOnTrigger));
    }

    #[test]
    fn test_param_parsing() {
        assert_eq!(ParamType::Bool.parse("on"), Some(ParamValue::Bool(true)));
        assert_eq!(ParamType::Float.parse(" -2.5 "), Some(ParamValue::Number(-2.5)));
        assert_eq!(ParamType::Float.parse("inf"), None);
        assert_eq!(ParamType::Bool.parse("maybe"), None);
    }

    proptest! {
        #[test]
        fn prop_actions_for_is_pure(kind in kind_strategy()) {
            prop_assert_eq!(actions_for(kind), actions_for(kind));
            if let Some(forced) = forced_action(kind) {
                prop_assert_eq!(actions_for(kind), &[forced][..]);
            }
        }

        #[test]
        fn prop_invert_stripped_unless_direct(action in action_strategy(), previous in params_strategy()) {
            let rebuilt = rebuild_params(action, &previous);
            if action != ActionKind::Direct {
                prop_assert!(!rebuilt.contains_key(PARAM_INVERT));
            }
            for key in rebuilt.keys() {
                prop_assert!(param_spec(action, key).is_some());
            }
        }
    }
}
