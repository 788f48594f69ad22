//! Controller input handling
//!
//! Canonical generic ids, the raw-name translation table and the activity
//! aggregator that fans samples from every device into one signal per input.

pub mod aggregator;
pub mod definitions;
pub mod generic;

pub use aggregator::{
    ActivityMap, GenericInputActivity, InputActivityAggregator, RawInputSample, SampleBatch,
    SampleValue, ACTIVITY_DEADZONE,
};
pub use definitions::{load_default_definitions, InputDefinitions};
pub use generic::GenericInputKind;
