//! Provisioning context and its validation

use serde::Serialize;

use crate::errors::EngineError;

/// Inputs for one cloud-local infrastructure config.
///
/// Required values are optional here so that a partially filled context can
/// be validated in one place, before anything is written or run.
#[derive(Debug, Clone)]
pub struct ProvisioningContext {
    pub region: Option<String>,
    pub machine_image: Option<String>,
    pub instance_type: Option<String>,
    pub key_name: Option<String>,
    /// Unique name prefix for every created resource
    pub resource_name: Option<String>,
    /// CIDR allowed to reach SSH, the API server and the node port
    pub ingress_cidr: String,
    pub node_port: u16,
    pub volume_size_gb: u32,
    /// Script the VM runs on first boot
    pub bootstrap_script: String,
}

impl Default for ProvisioningContext {
    fn default() -> Self {
        Self {
            region: None,
            machine_image: None,
            instance_type: None,
            key_name: None,
            resource_name: None,
            ingress_cidr: "0.0.0.0/0".to_string(),
            node_port: 30080,
            volume_size_gb: 30,
            bootstrap_script: String::new(),
        }
    }
}

/// Template variables for the infrastructure config
#[derive(Debug, Clone, Serialize)]
pub struct TerraformVars {
    pub region: String,
    pub ami: String,
    pub instance_type: String,
    pub key_name: String,
    pub resource_name: String,
    pub ingress_cidr: String,
    pub node_port: u16,
    pub volume_size_gb: u32,
}

impl ProvisioningContext {
    /// Check required fields in a fixed order and report the first missing one
    pub fn validate(&self) -> Result<TerraformVars, EngineError> {
        let vars = TerraformVars {
            region: required(&self.region, "Region")?,
            ami: required(&self.machine_image, "Machine Image")?,
            instance_type: required(&self.instance_type, "Instance Type")?,
            key_name: required(&self.key_name, "Key Name")?,
            resource_name: required(&self.resource_name, "Resource Name")?,
            ingress_cidr: self.ingress_cidr.clone(),
            node_port: self.node_port,
            volume_size_gb: self.volume_size_gb,
        };

        for (field, value) in [
            ("Region", &vars.region),
            ("Machine Image", &vars.ami),
            ("Instance Type", &vars.instance_type),
            ("Key Name", &vars.key_name),
            ("Resource Name", &vars.resource_name),
            ("Ingress CIDR", &vars.ingress_cidr),
        ] {
            literal_safe(field, value)?;
        }
        Ok(vars)
    }
}

// blank strings count as absent
fn required(value: &Option<String>, field: &'static str) -> Result<String, EngineError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(EngineError::MissingField { field }),
    }
}

/// Values land inside HCL string literals; none may close or interpolate one
fn literal_safe(field: &str, value: &str) -> Result<(), EngineError> {
    if value.contains(['"', '\\', '\n', '\r']) || value.contains("${") || value.contains("%{") {
        return Err(EngineError::Configuration(format!(
            "{} contains characters that are not allowed",
            field
        )));
    }
    Ok(())
}
