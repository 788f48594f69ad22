//! Input activity aggregation
//!
//! Fans in raw samples from every connected device into one activity signal
//! per generic input. Each batch is a full recomputation; the only state kept
//! between batches is the last good map, returned again when a batch is
//! malformed or missing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::definitions::InputDefinitions;

/// Minimum magnitude for an analog sample to count as active
pub const ACTIVITY_DEADZONE: f64 = 0.1;

/// Device-reported value: digital or analog
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum SampleValue {
    Bool(bool),
    Number(f64),
}

impl SampleValue {
    /// Numeric view: `true` is 1.0, `false` is 0.0
    pub fn as_f64(&self) -> f64 {
        match self {
            SampleValue::Bool(true) => 1.0,
            SampleValue::Bool(false) => 0.0,
            SampleValue::Number(v) => *v,
        }
    }

    /// Boolean-true, or magnitude at or above the deadzone
    pub fn is_active(&self) -> bool {
        match self {
            SampleValue::Bool(pressed) => *pressed,
            SampleValue::Number(v) => v.abs() >= ACTIVITY_DEADZONE,
        }
    }

    fn is_well_formed(&self) -> bool {
        match self {
            SampleValue::Bool(_) => true,
            SampleValue::Number(v) => v.is_finite(),
        }
    }
}

/// One raw reading from one device
#[derive(Debug, Clone, PartialEq)]
pub struct RawInputSample {
    pub device_id: String,
    pub raw_name: String,
    pub value: SampleValue,
}

/// Samples from all devices, in device then sample order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    samples: Vec<RawInputSample>,
}

/// Why a batch payload was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    #[error("batch payload is not an object of devices")]
    NotAnObject,
    #[error("device '{0}' samples are not an object")]
    DeviceNotAnObject(String),
    #[error("device '{device}' input '{raw_name}' has a non-scalar value")]
    BadValue { device: String, raw_name: String },
}

impl SampleBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample (builder style)
    pub fn with(mut self, device_id: &str, raw_name: &str, value: SampleValue) -> Self {
        self.push(device_id, raw_name, value);
        self
    }

    pub fn push(&mut self, device_id: &str, raw_name: &str, value: SampleValue) {
        self.samples.push(RawInputSample {
            device_id: device_id.to_string(),
            raw_name: raw_name.to_string(),
            value,
        });
    }

    /// Parse the backend's `{deviceId: {rawName: bool | number}}` payload
    pub fn from_json(payload: &Value) -> Result<Self, BatchError> {
        let devices = payload.as_object().ok_or(BatchError::NotAnObject)?;
        let mut batch = SampleBatch::new();

        for (device_id, readings) in devices {
            let readings = readings
                .as_object()
                .ok_or_else(|| BatchError::DeviceNotAnObject(device_id.clone()))?;

            for (raw_name, value) in readings {
                let value = match value {
                    Value::Bool(b) => SampleValue::Bool(*b),
                    Value::Number(n) => n.as_f64().map(SampleValue::Number).ok_or_else(|| {
                        BatchError::BadValue {
                            device: device_id.clone(),
                            raw_name: raw_name.clone(),
                        }
                    })?,
                    _ => {
                        return Err(BatchError::BadValue {
                            device: device_id.clone(),
                            raw_name: raw_name.clone(),
                        })
                    }
                };
                batch.push(device_id, raw_name, value);
            }
        }

        Ok(batch)
    }

    pub fn samples(&self) -> &[RawInputSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn is_well_formed(&self) -> bool {
        self.samples.iter().all(|s| s.value.is_well_formed())
    }
}

/// Derived per-input signal used for feedback display
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, JsonSchema)]
pub struct GenericInputActivity {
    pub is_active: bool,
    pub value: f64,
}

pub type ActivityMap = BTreeMap<String, GenericInputActivity>;

/// Evidence collected for one generic id within a batch
#[derive(Default)]
struct Evidence {
    first_active: Option<f64>,
    last_inactive: Option<f64>,
}

/// Translates raw names and folds samples into generic activity
#[derive(Debug, Clone)]
pub struct InputActivityAggregator {
    definitions: InputDefinitions,
    /// Set once the backend has supplied its own table
    definitions_from_backend: bool,
    current: ActivityMap,
}

impl InputActivityAggregator {
    pub fn new(definitions: InputDefinitions) -> Self {
        Self {
            definitions,
            definitions_from_backend: false,
            current: ActivityMap::new(),
        }
    }

    /// Install the backend's translation table
    ///
    /// The first table received is kept for the rest of the session; later
    /// ones are ignored and `false` is returned.
    pub fn install_definitions(&mut self, definitions: InputDefinitions) -> bool {
        if self.definitions_from_backend {
            debug!("Input definitions already received, ignoring replacement");
            return false;
        }
        self.definitions = definitions;
        self.definitions_from_backend = true;
        true
    }

    pub fn definitions(&self) -> &InputDefinitions {
        &self.definitions
    }

    /// Raw name → generic id, identity for unknown names
    pub fn translate(&self, raw_name: &str) -> String {
        self.definitions.translate(raw_name).into_owned()
    }

    /// Recompute activity from a batch
    ///
    /// A batch holding non-finite values is treated as malformed: the
    /// previous map is kept.
    pub fn ingest(&mut self, batch: &SampleBatch) -> &ActivityMap {
        if !batch.is_well_formed() {
            warn!("Dropping malformed sample batch ({} samples)", batch.len());
            return &self.current;
        }

        let mut evidence: BTreeMap<String, Evidence> = BTreeMap::new();
        for sample in batch.samples() {
            let generic_id = self.translate(&sample.raw_name);
            let entry = evidence.entry(generic_id).or_default();
            let value = sample.value.as_f64();

            if sample.value.is_active() {
                if entry.first_active.is_none() {
                    entry.first_active = Some(value);
                }
            } else {
                entry.last_inactive = Some(value);
            }
        }

        self.current = evidence
            .into_iter()
            .map(|(id, ev)| {
                let activity = GenericInputActivity {
                    is_active: ev.first_active.is_some(),
                    value: ev.first_active.or(ev.last_inactive).unwrap_or(0.0),
                };
                (id, activity)
            })
            .collect();

        &self.current
    }

    /// Ingest a wire payload; missing or malformed payloads keep the previous map
    pub fn ingest_payload(&mut self, payload: Option<&Value>) -> &ActivityMap {
        let Some(payload) = payload else {
            debug!("Missing sample batch, keeping previous activity");
            return &self.current;
        };

        match SampleBatch::from_json(payload) {
            Ok(batch) => self.ingest(&batch),
            Err(e) => {
                warn!("Dropping malformed sample batch: {}", e);
                &self.current
            }
        }
    }

    /// Activity of one generic id; inactive when nothing contributed
    pub fn activity(&self, generic_id: &str) -> GenericInputActivity {
        self.current.get(generic_id).copied().unwrap_or_default()
    }

    pub fn current(&self) -> &ActivityMap {
        &self.current
    }

    /// Generic ids active in the last good batch
    pub fn active_ids(&self) -> Vec<&str> {
        self.current
            .iter()
            .filter(|(_, a)| a.is_active)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::definitions::load_default_definitions;
    use proptest::prelude::*;
    use serde_json::json;

    fn make_test_aggregator() -> InputActivityAggregator {
        InputActivityAggregator::new(load_default_definitions().unwrap())
    }

    #[test]
    fn test_deadzone_boundary() {
        let mut agg = make_test_aggregator();

        agg.ingest(&SampleBatch::new().with("pad0", "LEFT_STICK_X", SampleValue::Number(0.05)));
        let below = agg.activity("LEFT_STICK_X");
        assert!(!below.is_active, "0.05 is inside the deadzone");
        assert_eq!(below.value, 0.05);

        agg.ingest(&SampleBatch::new().with("pad0", "LEFT_STICK_X", SampleValue::Number(0.5)));
        let above = agg.activity("LEFT_STICK_X");
        assert!(above.is_active);
        assert_eq!(above.value, 0.5);

        agg.ingest(&SampleBatch::new().with("pad0", "LEFT_STICK_X", SampleValue::Number(-0.1)));
        assert!(agg.activity("LEFT_STICK_X").is_active, "Deadzone is inclusive");
    }

    #[test]
    fn test_first_active_wins_across_devices() {
        let mut agg = make_test_aggregator();
        let batch = SampleBatch::new()
            .with("device1", "A", SampleValue::Bool(false))
            .with("device2", "A", SampleValue::Bool(true));

        agg.ingest(&batch);
        let a = agg.activity("A");
        assert!(a.is_active);
        assert_eq!(a.value, 1.0);
    }

    #[test]
    fn test_first_active_value_is_kept() {
        let mut agg = make_test_aggregator();
        let batch = SampleBatch::new()
            .with("jsl0", "STICK_LX", SampleValue::Number(0.4))
            .with("xinput0", "LEFT_STICK_X", SampleValue::Number(-0.9));

        agg.ingest(&batch);
        assert_eq!(agg.activity("LEFT_STICK_X").value, 0.4);
    }

    #[test]
    fn test_last_inactive_value_when_none_active() {
        let mut agg = make_test_aggregator();
        let batch = SampleBatch::new()
            .with("jsl0", "STICK_LX", SampleValue::Number(0.02))
            .with("xinput0", "LEFT_STICK_X", SampleValue::Number(-0.03));

        agg.ingest(&batch);
        let activity = agg.activity("LEFT_STICK_X");
        assert!(!activity.is_active);
        assert_eq!(activity.value, -0.03);
    }

    #[test]
    fn test_unknown_raw_name_passes_through() {
        let mut agg = make_test_aggregator();
        assert_eq!(agg.translate("PADDLE_L4"), "PADDLE_L4");

        agg.ingest(&SampleBatch::new().with("pad0", "PADDLE_L4", SampleValue::Bool(true)));
        assert!(agg.activity("PADDLE_L4").is_active);
    }

    #[test]
    fn test_malformed_payload_keeps_previous_map() {
        let mut agg = make_test_aggregator();
        agg.ingest_payload(Some(&json!({ "pad0": { "A": true } })));
        assert!(agg.activity("A").is_active);

        agg.ingest_payload(Some(&json!(["not", "a", "map"])));
        agg.ingest_payload(Some(&json!({ "pad0": { "A": "pressed" } })));
        agg.ingest_payload(None);
        agg.ingest(&SampleBatch::new().with("pad0", "A", SampleValue::Number(f64::NAN)));

        assert!(
            agg.activity("A").is_active,
            "Bad batches must not replace the last good map"
        );
    }

    #[test]
    fn test_batch_is_fresh_recomputation() {
        let mut agg = make_test_aggregator();
        agg.ingest(&SampleBatch::new().with("pad0", "A", SampleValue::Bool(true)));
        agg.ingest(&SampleBatch::new().with("pad0", "B", SampleValue::Bool(true)));

        assert!(!agg.activity("A").is_active, "Previous batch must not leak");
        assert_eq!(agg.active_ids(), vec!["B"]);
    }

    #[test]
    fn test_backend_definitions_are_immutable_once_received() {
        let mut agg = make_test_aggregator();
        let first = InputDefinitions::from_table([("P1".to_string(), "A".to_string())].into());
        let second = InputDefinitions::from_table([("P1".to_string(), "B".to_string())].into());

        assert!(agg.install_definitions(first));
        assert!(!agg.install_definitions(second));
        assert_eq!(agg.translate("P1"), "A");
    }

    fn sample_value() -> impl Strategy<Value = SampleValue> {
        prop_oneof![
            any::<bool>().prop_map(SampleValue::Bool),
            (-1.0f64..=1.0).prop_map(SampleValue::Number),
        ]
    }

    fn batch_strategy() -> impl Strategy<Value = SampleBatch> {
        let raw = prop::sample::select(vec![
            "STICK_LX",
            "LEFT_STICK_X",
            "A",
            "S",
            "TRIGGER_L",
            "X",
        ]);
        let device = prop::sample::select(vec!["jsl0", "jsl1", "xinput0"]);
        prop::collection::vec((device, raw, sample_value()), 0..12).prop_map(|samples| {
            samples
                .into_iter()
                .fold(SampleBatch::new(), |b, (d, r, v)| b.with(d, r, v))
        })
    }

    proptest! {
        #[test]
        fn prop_ingest_is_idempotent(batch in batch_strategy()) {
            let mut agg = make_test_aggregator();
            let first = agg.ingest(&batch).clone();
            let second = agg.ingest(&batch).clone();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_absent_inputs_are_inactive(batch in batch_strategy()) {
            let mut agg = make_test_aggregator();
            agg.ingest(&batch);
            let contributed: Vec<String> =
                batch.samples().iter().map(|s| agg.translate(&s.raw_name)).collect();

            for id in crate::input::generic::all_ids() {
                if !contributed.iter().any(|c| c == id) {
                    prop_assert!(!agg.activity(id).is_active);
                }
            }
        }

        #[test]
        fn prop_active_iff_some_sample_active(batch in batch_strategy()) {
            let mut agg = make_test_aggregator();
            agg.ingest(&batch);
            for (id, activity) in agg.current().clone() {
                let any_active = batch
                    .samples()
                    .iter()
                    .any(|s| agg.translate(&s.raw_name) == id && s.value.is_active());
                prop_assert_eq!(activity.is_active, any_active);
            }
        }
    }
}
