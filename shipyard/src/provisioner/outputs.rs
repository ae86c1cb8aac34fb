//! Parsing of `terraform output -json`

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::errors::EngineError;
use crate::models::ProvisioningOutputs;

#[derive(Debug, Deserialize)]
struct OutputEntry {
    value: Value,
}

/// Flatten `{"name": {"value": ...}}` into name/value strings.
///
/// String values are taken as-is; anything else keeps its JSON rendering.
/// Null values are dropped.
pub fn parse_outputs(raw: &str) -> Result<ProvisioningOutputs, EngineError> {
    if raw.trim().is_empty() {
        return Ok(ProvisioningOutputs::new());
    }

    let entries: BTreeMap<String, OutputEntry> =
        serde_json::from_str(raw).map_err(|e| EngineError::decode("terraform output", e))?;

    Ok(entries
        .into_iter()
        .filter_map(|(name, entry)| match entry.value {
            Value::Null => None,
            Value::String(s) => Some((name, s)),
            other => Some((name, other.to_string())),
        })
        .collect())
}
