//! Side-effect-free rendering of infrastructure config, scripts and manifests
//!
//! Templates are compiled into the binary and rendered with tera from any
//! serializable context.

use serde::Serialize;
use tera::{Context, Tera};

use crate::errors::EngineError;

/// Every template the engine can render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateId {
    CloudLocalTerraform,
    BootstrapKind,
    RemoteBuild,
    Dockerfile,
    K8sDeployment,
    K8sService,
    ManagedKubeconfig,
}

impl TemplateId {
    pub fn name(&self) -> &'static str {
        match self {
            TemplateId::CloudLocalTerraform => "terraform/cloud_local.tf",
            TemplateId::BootstrapKind => "scripts/bootstrap_kind.sh",
            TemplateId::RemoteBuild => "scripts/remote_build.sh",
            TemplateId::Dockerfile => "docker/Dockerfile",
            TemplateId::K8sDeployment => "k8s/deployment.yaml",
            TemplateId::K8sService => "k8s/service.yaml",
            TemplateId::ManagedKubeconfig => "kubeconfig/managed.yaml",
        }
    }
}

const TEMPLATES: &[(&str, &str)] = &[
    (
        "terraform/cloud_local.tf",
        include_str!("../../templates/terraform/cloud_local.tf"),
    ),
    (
        "scripts/bootstrap_kind.sh",
        include_str!("../../templates/scripts/bootstrap_kind.sh"),
    ),
    (
        "scripts/remote_build.sh",
        include_str!("../../templates/scripts/remote_build.sh"),
    ),
    (
        "docker/Dockerfile",
        include_str!("../../templates/docker/Dockerfile"),
    ),
    (
        "k8s/deployment.yaml",
        include_str!("../../templates/k8s/deployment.yaml"),
    ),
    (
        "k8s/service.yaml",
        include_str!("../../templates/k8s/service.yaml"),
    ),
    (
        "kubeconfig/managed.yaml",
        include_str!("../../templates/kubeconfig/managed.yaml"),
    ),
];

/// Template renderer
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self, EngineError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_templates(TEMPLATES.iter().copied())?;
        Ok(Self { tera })
    }

    /// Render `template` with the fields of `context`
    pub fn render<C: Serialize>(
        &self,
        template: TemplateId,
        context: &C,
    ) -> Result<String, EngineError> {
        let context = Context::from_serialize(context)?;
        Ok(self.tera.render(template.name(), &context)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_templates_parse() {
        assert!(Renderer::new().is_ok());
    }

    #[test]
    fn test_dockerfile_renders_build_steps() {
        let renderer = Renderer::new().unwrap();
        let out = renderer
            .render(
                TemplateId::Dockerfile,
                &json!({
                    "base_image": "node:20-slim",
                    "build_cmds": ["npm ci", "npm run build"],
                    "port": 3000,
                    "run_cmd": "npm start",
                }),
            )
            .unwrap();

        assert!(out.starts_with("FROM node:20-slim"));
        assert!(out.contains("RUN npm ci\nRUN npm run build\n"));
        assert!(out.contains("EXPOSE 3000"));
        assert!(out.trim_end().ends_with("CMD npm start"));
    }

    #[test]
    fn test_service_node_port_is_optional() {
        let renderer = Renderer::new().unwrap();
        let base = json!({
            "app_name": "web",
            "namespace": "apps",
            "service_type": "LoadBalancer",
            "service_port": 80,
            "container_port": 8080,
            "node_port": null,
        });
        let out = renderer.render(TemplateId::K8sService, &base).unwrap();
        assert!(out.contains("type: LoadBalancer"));
        assert!(!out.contains("nodePort"));
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let renderer = Renderer::new().unwrap();
        let result = renderer.render(TemplateId::K8sService, &json!({"app_name": "web"}));
        assert!(matches!(result, Err(EngineError::Template(_))));
    }
}
