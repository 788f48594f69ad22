//! Raw-to-generic input definitions
//!
//! Parses `docs/input-definitions.csv` (raw_name, generic_id, source) into a
//! lookup table. The backend can supply its own table at startup, which then
//! replaces the embedded one for the rest of the session.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

use super::generic;

/// One row of the definitions CSV
#[derive(Debug, Clone, Deserialize)]
pub struct DefinitionRow {
    pub raw_name: String,
    pub generic_id: String,
    #[serde(default)]
    pub source: String,
}

/// Raw name → generic id lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputDefinitions {
    table: HashMap<String, String>,
}

impl InputDefinitions {
    /// Load definitions from a CSV file
    pub async fn load_from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let csv_content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read definitions file: {}", path.display()))?;

        Self::parse_csv(&csv_content)
    }

    /// Load from an in-memory CSV string
    pub fn load_from_string(csv_content: &str) -> Result<Self> {
        Self::parse_csv(csv_content)
    }

    /// Build from a table supplied by the backend
    pub fn from_table(table: HashMap<String, String>) -> Self {
        Self { table }
    }

    fn parse_csv(csv_content: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(csv_content.as_bytes());
        let mut table = HashMap::new();
        let mut sources: HashMap<String, usize> = HashMap::new();

        for result in reader.deserialize() {
            let row: DefinitionRow = result.context("Failed to parse definitions row")?;
            let raw_name = row.raw_name.trim().to_string();
            let generic_id = row.generic_id.trim().to_string();

            if raw_name.is_empty() || generic_id.is_empty() {
                anyhow::bail!("Definition rows need both raw_name and generic_id");
            }

            if let Some(existing) = table.get(&raw_name) {
                if *existing != generic_id {
                    anyhow::bail!(
                        "Raw input '{}' maps to both '{}' and '{}'",
                        raw_name,
                        existing,
                        generic_id
                    );
                }
            }

            *sources.entry(row.source).or_default() += 1;
            table.insert(raw_name, generic_id);
        }

        info!(
            "Loaded {} input definitions from {} sources",
            table.len(),
            sources.len()
        );

        Ok(Self { table })
    }

    /// Translate a raw name; unknown names pass through unchanged
    pub fn translate<'a>(&'a self, raw_name: &'a str) -> Cow<'a, str> {
        match self.table.get(raw_name) {
            Some(generic_id) => Cow::Borrowed(generic_id.as_str()),
            None => Cow::Borrowed(raw_name),
        }
    }

    /// Whether the raw name has an explicit entry
    pub fn contains(&self, raw_name: &str) -> bool {
        self.table.contains_key(raw_name)
    }

    /// Raw names aliasing a generic id, sorted
    pub fn aliases_of(&self, generic_id: &str) -> Vec<&str> {
        let mut aliases: Vec<&str> = self
            .table
            .iter()
            .filter(|(_, g)| g.as_str() == generic_id)
            .map(|(raw, _)| raw.as_str())
            .collect();
        aliases.sort_unstable();
        aliases
    }

    /// Generic ids the table produces that are not canonical names
    pub fn non_canonical_targets(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .table
            .values()
            .map(|g| g.as_str())
            .filter(|g| !generic::is_well_known(g))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Default embedded CSV content
pub const DEFAULT_CSV: &str = include_str!("../../docs/input-definitions.csv");

static DEFAULT_DEFINITIONS: OnceLock<InputDefinitions> = OnceLock::new();

/// Load the embedded definitions (cached after first parse)
pub fn load_default_definitions() -> Result<InputDefinitions> {
    if let Some(defs) = DEFAULT_DEFINITIONS.get() {
        return Ok(defs.clone());
    }

    let defs = InputDefinitions::load_from_string(DEFAULT_CSV)?;
    // Ignore error if another thread set it first
    let _ = DEFAULT_DEFINITIONS.set(defs.clone());
    Ok(defs)
}
