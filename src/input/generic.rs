//! Canonical generic input identifiers
//!
//! Every logical control has exactly one generic id, whatever device reports
//! it. Sticks and motion axes are bipolar (-1.0..1.0), triggers unipolar
//! (0.0..1.0), everything else digital.

/// Signal shape of a generic input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericInputKind {
    /// Centered axis, nominal range -1.0..1.0
    Bipolar,
    /// One-sided axis, nominal range 0.0..1.0
    Unipolar,
    /// On/off button
    Digital,
    /// Not a well-known id (passed through untranslated)
    Unknown,
}

impl GenericInputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenericInputKind::Bipolar => "bipolar",
            GenericInputKind::Unipolar => "unipolar",
            GenericInputKind::Digital => "digital",
            GenericInputKind::Unknown => "unknown",
        }
    }

    pub fn is_analog(&self) -> bool {
        matches!(self, GenericInputKind::Bipolar | GenericInputKind::Unipolar)
    }
}

impl std::fmt::Display for GenericInputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const BIPOLAR_IDS: &[&str] = &[
    "LEFT_STICK_X",
    "LEFT_STICK_Y",
    "RIGHT_STICK_X",
    "RIGHT_STICK_Y",
    "ACCEL_X",
    "ACCEL_Y",
    "ACCEL_Z",
    "GYRO_X",
    "GYRO_Y",
    "GYRO_Z",
];

pub const UNIPOLAR_IDS: &[&str] = &["LEFT_TRIGGER", "RIGHT_TRIGGER"];

pub const DIGITAL_IDS: &[&str] = &[
    "DPAD_UP",
    "DPAD_DOWN",
    "DPAD_LEFT",
    "DPAD_RIGHT",
    "START",
    "BACK",
    "LEFT_THUMB",
    "RIGHT_THUMB",
    "LEFT_SHOULDER",
    "RIGHT_SHOULDER",
    "A",
    "B",
    "X",
    "Y",
];

/// Classify a generic id
pub fn kind_of(generic_id: &str) -> GenericInputKind {
    if BIPOLAR_IDS.contains(&generic_id) {
        GenericInputKind::Bipolar
    } else if UNIPOLAR_IDS.contains(&generic_id) {
        GenericInputKind::Unipolar
    } else if DIGITAL_IDS.contains(&generic_id) {
        GenericInputKind::Digital
    } else {
        GenericInputKind::Unknown
    }
}

/// Whether the id is one of the canonical names
pub fn is_well_known(generic_id: &str) -> bool {
    kind_of(generic_id) != GenericInputKind::Unknown
}

/// All canonical ids: analog axes first, then buttons
pub fn all_ids() -> impl Iterator<Item = &'static str> {
    BIPOLAR_IDS
        .iter()
        .chain(UNIPOLAR_IDS.iter())
        .chain(DIGITAL_IDS.iter())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(kind_of("LEFT_STICK_X"), GenericInputKind::Bipolar);
        assert_eq!(kind_of("GYRO_Z"), GenericInputKind::Bipolar);
        assert_eq!(kind_of("RIGHT_TRIGGER"), GenericInputKind::Unipolar);
        assert_eq!(kind_of("A"), GenericInputKind::Digital);
        assert_eq!(kind_of("STICK_LX"), GenericInputKind::Unknown);
        assert!(kind_of("LEFT_TRIGGER").is_analog());
        assert!(!kind_of("START").is_analog());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<&str> = all_ids().collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total, "Each logical control must have exactly one id");
        assert_eq!(total, 26);
    }
}
