//! State management module - confirmed configuration mirror
//!
//! The store only ever reflects what the backend has broadcast. Local edits
//! travel upstream as intents and come back as a new snapshot.

mod store;
mod types;

pub use store::{ConfigStore, Notification, SelectedInput, Subscription, Topic};
pub use types::{
    ActionKind, ChannelDef, ChannelValueType, ConfigSnapshot, InputMapping, LayerConfig, LayerId,
    OnChangeOsc, ParamValue, Params, TargetKind, TargetName, VariableDef,
};
