//! Cloud-hosted deployments onto a managed cluster

use shipyard::models::{CloudCredentials, DeploymentMode, DeploymentRequest, DeploymentStatus};
use shipyard::process::ScriptedResponse;
use shipyard::storage::Settings;

use crate::common::Harness;

const REPO: &str = "https://github.com/acme/web";
const REGISTRY: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com/apps";
const HOSTNAME: &str = "a1b2c3-123456.us-east-1.elb.amazonaws.com";
const DESCRIBE_CLUSTER: &str = r#"{"cluster": {"name": "prod", "endpoint": "https://ABCDEF.gr7.us-east-1.eks.amazonaws.com", "certificateAuthority": {"data": "LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0tCg=="}}}"#;

fn hosted_settings() -> Settings {
    let mut settings = Settings::default();
    settings.cloud_hosted.cluster_name = Some("prod".to_string());
    settings.cloud_hosted.registry = Some(REGISTRY.to_string());
    settings
}

fn request() -> DeploymentRequest {
    let mut request = DeploymentRequest::new(REPO, DeploymentMode::CloudHosted);
    request.target_namespace = "web".to_string();
    request.cloud_credentials = Some(CloudCredentials::new("AKIAEXAMPLE", "s3cr3t"));
    request
}

fn service_with(hostname: &str) -> String {
    format!(
        r#"{{"status": {{"loadBalancer": {{"ingress": [{{"hostname": "{}"}}]}}}}}}"#,
        hostname
    )
}

#[tokio::test]
async fn test_no_cluster_is_pending_feature() {
    let harness = Harness::new(Settings::default());

    let result = harness.orchestrator.deploy(request()).await;

    assert_eq!(result.status(), DeploymentStatus::PendingFeature);
    assert!(result.outputs().is_none());
    assert!(harness.runner.calls().is_empty());
    assert_eq!(harness.workspace_count(), 0);
}

#[tokio::test]
async fn test_missing_registry_is_a_configuration_error() {
    let mut settings = hosted_settings();
    settings.cloud_hosted.registry = None;
    let harness = Harness::new(settings);

    let result = harness.orchestrator.deploy(request()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("cloud_hosted.registry"));
    assert!(harness.runner.calls().is_empty());
}

#[tokio::test]
async fn test_deploys_behind_load_balancer() {
    let harness = Harness::new(hosted_settings());
    harness
        .runner
        .on("aws", &["get-login-password"], ScriptedResponse::ok("eyJwYXlsb2FkIjoi\n"))
        .on("aws", &["describe-cluster"], ScriptedResponse::ok(DESCRIBE_CLUSTER))
        .on(
            "aws",
            &["describe-load-balancers"],
            ScriptedResponse::ok(&format!(
                r#"{{"LoadBalancers": [{{"DNSName": "{}", "CanonicalHostedZoneId": "Z35SXDOTRQ7X7K"}}]}}"#,
                HOSTNAME
            )),
        )
        .on("kubectl", &["get", "service"], ScriptedResponse::ok(&service_with(HOSTNAME)));

    let result = harness.orchestrator.deploy(request()).await;

    assert_eq!(result.status(), DeploymentStatus::Success, "{}", result.message());
    let outputs = result.outputs().unwrap();
    assert_eq!(outputs.get("load_balancer_hostname"), Some(HOSTNAME));
    assert_eq!(outputs.get("load_balancer_zone_id"), Some("Z35SXDOTRQ7X7K"));
    assert_eq!(outputs.get("namespace"), Some("web"));
    let image = outputs.get("image").unwrap();
    assert!(image.starts_with(&format!("{}:web-", REGISTRY)));

    assert_eq!(harness.runner.count("docker", &["push", image]), 1);
    let login = harness
        .runner
        .calls()
        .into_iter()
        .find(|c| c.program == "docker" && c.has_args(&["login"]))
        .unwrap();
    assert_eq!(login.stdin.as_deref(), Some("eyJwYXlsb2FkIjoi"));
    assert_eq!(harness.runner.count("kubectl", &["delete"]), 0);
    assert_eq!(harness.credential_count(), 0);
}

#[tokio::test]
async fn test_undecodable_service_deletes_workload() {
    let harness = Harness::new(hosted_settings());
    harness
        .runner
        .on("aws", &["describe-cluster"], ScriptedResponse::ok(DESCRIBE_CLUSTER))
        .on("kubectl", &["get", "service"], ScriptedResponse::ok("<html>502 Bad Gateway</html>"));

    let result = harness.orchestrator.deploy(request()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("Malformed response"));
    assert!(result.message().contains("Cleanup succeeded: workload objects were deleted"));
    assert_eq!(harness.runner.count("kubectl", &["get", "service"]), 1);
    assert_eq!(harness.runner.count("kubectl", &["delete", "--ignore-not-found"]), 1);
    assert_eq!(harness.credential_count(), 0);
}

#[tokio::test]
async fn test_invalid_certificate_authority_is_decode_error() {
    let harness = Harness::new(hosted_settings());
    harness.runner.on(
        "aws",
        &["describe-cluster"],
        ScriptedResponse::ok(r#"{"cluster": {"endpoint": "https://x.eks.amazonaws.com", "certificateAuthority": {"data": "%%%not-base64%%%"}}}"#),
    );

    let result = harness.orchestrator.deploy(request()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("certificate authority"));
    assert_eq!(harness.runner.count("kubectl", &[]), 0);
}

#[tokio::test]
async fn test_rejected_registry_login() {
    let harness = Harness::new(hosted_settings());
    harness
        .runner
        .on(
            "docker",
            &["login"],
            ScriptedResponse::exit(1, "", "denied: Your authorization token has expired"),
        );

    let result = harness.orchestrator.deploy(request()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result
        .message()
        .contains("Authentication rejected by 123456789012.dkr.ecr.us-east-1.amazonaws.com"));
    assert_eq!(harness.runner.count("docker", &["push"]), 0);
}

#[tokio::test(start_paused = true)]
async fn test_load_balancer_without_address_deletes_workload() {
    let mut settings = hosted_settings();
    settings.timeouts.load_balancer_secs = 30;
    let harness = Harness::new(settings);
    harness
        .runner
        .on("aws", &["describe-cluster"], ScriptedResponse::ok(DESCRIBE_CLUSTER))
        .on(
            "kubectl",
            &["get", "service"],
            ScriptedResponse::ok(r#"{"status": {"loadBalancer": {}}}"#),
        );

    let result = harness.orchestrator.deploy(request()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("Timed out"), "{}", result.message());
    assert!(result.message().contains("load balancer address"));
    assert!(result.message().contains("Cleanup succeeded: workload objects were deleted"));
    assert_eq!(harness.runner.count("kubectl", &["get", "service"]), 3);
    assert_eq!(harness.runner.count("kubectl", &["delete", "--ignore-not-found"]), 1);
    assert_eq!(harness.runner.count("aws", &["describe-load-balancers"]), 0);
    assert_eq!(harness.credential_count(), 0);
}

#[tokio::test]
async fn test_region_falls_back_to_credentials() {
    let harness = Harness::new(hosted_settings());
    harness
        .runner
        .on("docker", &["login"], ScriptedResponse::exit(1, "", "denied"));
    let mut request = request();
    if let Some(credentials) = request.cloud_credentials.as_mut() {
        credentials.region = Some("eu-west-1".to_string());
    }

    harness.orchestrator.deploy(request).await;

    assert_eq!(
        harness
            .runner
            .count("aws", &["get-login-password", "--region", "eu-west-1"]),
        1
    );
}
