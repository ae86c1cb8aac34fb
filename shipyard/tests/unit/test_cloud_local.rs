//! Cloud-local saga: provisioning, compensation and bring-up

use shipyard::models::{CloudCredentials, DeploymentMode, DeploymentRequest, DeploymentStatus};
use shipyard::process::ScriptedResponse;
use shipyard::storage::Settings;

use crate::common::{write_key, Harness};

const REPO: &str = "https://github.com/acme/web";
const OUTPUTS_WITH_IP: &str = r#"{"public_ip": {"value": "203.0.113.7", "type": "string"}, "instance_id": {"value": "i-0abc"}}"#;
const KIND_CONFIG: &str = "apiVersion: v1\nclusters:\n- cluster:\n    certificate-authority-data: AAAA\n    server: https://0.0.0.0:6443\n  name: kind-shipyard\n";

fn request_with_key() -> DeploymentRequest {
    let mut request = DeploymentRequest::new(REPO, DeploymentMode::CloudLocal);
    request.key_name = Some("ops".to_string());
    request.cloud_credentials = Some(CloudCredentials::new("AKIAEXAMPLE", "s3cr3t"));
    request
}

#[tokio::test]
async fn test_missing_key_name_never_provisions() {
    let harness = Harness::new(Settings::default());

    let result = harness
        .orchestrator
        .deploy(DeploymentRequest::new(REPO, DeploymentMode::CloudLocal))
        .await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("Key Name"), "{}", result.message());
    assert_eq!(harness.runner.count("terraform", &[]), 0);
    assert_eq!(harness.workspace_count(), 0);
}

#[tokio::test]
async fn test_key_name_cannot_rewrite_the_config() {
    let harness = Harness::new(Settings::default());
    let mut request = request_with_key();
    request.key_name = Some("ops\"\n  associate_public_ip_address = true\n  #".to_string());

    let result = harness.orchestrator.deploy(request).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("Key Name"), "{}", result.message());
    assert_eq!(harness.runner.count("terraform", &[]), 0);
    assert_eq!(harness.workspace_count(), 0);
}

#[tokio::test]
async fn test_key_name_from_settings_is_used() {
    let mut settings = Settings::default();
    settings.cloud_local.key_name = Some("default-key".to_string());
    let harness = Harness::new(settings);

    let result = harness
        .orchestrator
        .deploy(DeploymentRequest::new(REPO, DeploymentMode::CloudLocal))
        .await;

    assert_eq!(result.status(), DeploymentStatus::Success);
    assert_eq!(harness.runner.count("terraform", &["apply"]), 1);
}

#[tokio::test]
async fn test_successful_init_is_followed_by_apply() {
    let harness = Harness::new(Settings::default());
    harness
        .runner
        .on(
            "terraform",
            &["init"],
            ScriptedResponse::exit(0, "Terraform has been successfully initialized!", ""),
        )
        .on("terraform", &["output", "-json"], ScriptedResponse::ok("{}"));

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Success);
    let programs: Vec<String> = harness
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.program == "terraform")
        .map(|c| c.args[0].clone())
        .collect();
    assert_eq!(programs, vec!["init", "apply", "output"]);
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 0);
}

#[tokio::test]
async fn test_credentials_travel_in_environment_only() {
    let harness = Harness::new(Settings::default());

    harness.orchestrator.deploy(request_with_key()).await;

    for call in harness.runner.calls().iter().filter(|c| c.program == "terraform") {
        assert!(call.env_keys.contains(&"AWS_ACCESS_KEY_ID".to_string()));
        assert!(call.env_keys.contains(&"AWS_SECRET_ACCESS_KEY".to_string()));
        assert!(!call.args.iter().any(|a| a.contains("s3cr3t")));
        assert!(call.working_dir.is_some());
    }
}

#[tokio::test]
async fn test_failed_init_does_not_destroy() {
    let harness = Harness::new(Settings::default());
    harness
        .runner
        .on(
            "terraform",
            &["init"],
            ScriptedResponse::exit(1, "", "Error: Failed to query available provider packages"),
        );

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("terraform init"));
    assert!(!result.message().contains("provider packages"));
    assert_eq!(harness.runner.count("terraform", &["apply"]), 0);
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 0);
}

#[tokio::test]
async fn test_failed_apply_is_destroyed_once() {
    let harness = Harness::new(Settings::default());
    harness
        .runner
        .on("terraform", &["apply"], ScriptedResponse::exit(1, "", "Error: UnauthorizedOperation"));

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("terraform apply failed with exit code 1"));
    assert!(result.message().contains("Cleanup succeeded"));
    assert!(!result.message().contains("UnauthorizedOperation"));
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 1);
    assert_eq!(harness.workspace_count(), 0);
}

#[tokio::test]
async fn test_failed_destroy_is_reported_as_warning() {
    let harness = Harness::new(Settings::default());
    harness
        .runner
        .on("terraform", &["apply"], ScriptedResponse::exit(1, "", "Error: quota exceeded"))
        .on("terraform", &["destroy"], ScriptedResponse::exit(1, "", "Error: DependencyViolation"));

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("terraform apply failed"));
    assert!(result.message().contains("WARNING"));
    assert!(result.message().contains("manual removal"));
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 1);
}

#[tokio::test]
async fn test_unreadable_outputs_still_succeed() {
    let harness = Harness::new(Settings::default());
    harness
        .runner
        .on("terraform", &["output"], ScriptedResponse::exit(1, "", "Error: state lock"));

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Success);
    assert!(result.outputs().unwrap().is_empty());
    assert!(result
        .messages()
        .iter()
        .any(|m| m.contains("outputs could not be read")));
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 0);
}

#[tokio::test]
async fn test_outputs_without_private_key_skip_bring_up() {
    let harness = Harness::new(Settings::default());
    harness
        .runner
        .on("terraform", &["output"], ScriptedResponse::ok(OUTPUTS_WITH_IP));

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Success);
    let outputs = result.outputs().unwrap();
    assert_eq!(outputs.get("public_ip"), Some("203.0.113.7"));
    assert_eq!(outputs.get("instance_id"), Some("i-0abc"));
    assert_eq!(harness.runner.count("ssh", &[]), 0);
}

#[tokio::test]
async fn test_rejected_ssh_key_destroys_infrastructure() {
    let keys = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.cloud_local.private_key_path = Some(write_key(keys.path()));
    let harness = Harness::new(settings);
    harness
        .runner
        .on("terraform", &["output"], ScriptedResponse::ok(OUTPUTS_WITH_IP))
        .on(
            "ssh",
            &[],
            ScriptedResponse::exit(255, "", "ubuntu@203.0.113.7: Permission denied (publickey)."),
        );

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("Authentication rejected by 203.0.113.7"));
    assert!(result.message().contains("Cleanup succeeded"));
    assert_eq!(harness.runner.count("ssh", &[]), 1);
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 1);
}

#[tokio::test]
async fn test_bring_up_deploys_workload_on_kind() {
    let keys = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.cloud_local.private_key_path = Some(write_key(keys.path()));
    let harness = Harness::new(settings);
    harness
        .runner
        .on("terraform", &["output"], ScriptedResponse::ok(OUTPUTS_WITH_IP))
        .on("ssh", &["sudo kind get kubeconfig --name shipyard"], ScriptedResponse::ok(KIND_CONFIG))
        .on(
            "kubectl",
            &["get", "namespace"],
            ScriptedResponse::exit(
                1,
                "",
                "Error from server (NotFound): namespaces \"default\" not found",
            ),
        );

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Success, "{}", result.message());
    let outputs = result.outputs().unwrap();
    assert_eq!(outputs.get("kubernetes_api"), Some("https://203.0.113.7:6443"));
    assert_eq!(outputs.get("app_url"), Some("http://203.0.113.7:30080"));
    assert_eq!(harness.runner.count("sftp", &[]), 1);
    assert_eq!(harness.runner.count("kubectl", &["create", "namespace", "default"]), 1);
    assert_eq!(harness.runner.count("kubectl", &["apply"]), 1);
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 0);
    assert_eq!(harness.credential_count(), 0);
    assert_eq!(harness.workspace_count(), 0);
}

#[tokio::test]
async fn test_remote_build_timeout_is_retried_once() {
    let keys = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.cloud_local.private_key_path = Some(write_key(keys.path()));
    let harness = Harness::new(settings);
    harness
        .runner
        .on("terraform", &["output"], ScriptedResponse::ok(OUTPUTS_WITH_IP))
        .on("ssh", &["true"], ScriptedResponse::ok(""))
        .on("ssh", &["test -f /var/lib/shipyard/bootstrap.done"], ScriptedResponse::ok(""))
        .on("ssh", &["sudo kind get kubeconfig --name shipyard"], ScriptedResponse::ok(KIND_CONFIG))
        .on_sequence("ssh", &[], vec![ScriptedResponse::Timeout, ScriptedResponse::ok("built\n")]);

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Success, "{}", result.message());
    let builds = harness
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.program == "ssh")
        .filter(|c| c.args.last().is_some_and(|a| a.starts_with("bash /tmp/shipyard-build-")))
        .count();
    assert_eq!(builds, 2);
    assert!(result.messages().iter().any(|m| m.contains("retrying once")));
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 0);
}

#[tokio::test]
async fn test_remote_build_second_timeout_destroys() {
    let keys = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.cloud_local.private_key_path = Some(write_key(keys.path()));
    let harness = Harness::new(settings);
    harness
        .runner
        .on("terraform", &["output"], ScriptedResponse::ok(OUTPUTS_WITH_IP))
        .on("ssh", &["true"], ScriptedResponse::ok(""))
        .on("ssh", &["test -f /var/lib/shipyard/bootstrap.done"], ScriptedResponse::ok(""))
        .on("ssh", &[], ScriptedResponse::Timeout);

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("Timed out"), "{}", result.message());
    let builds = harness
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.program == "ssh" && c.args.last().is_some_and(|a| a.starts_with("bash ")))
        .count();
    assert_eq!(builds, 2);
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 1);
}

#[tokio::test(start_paused = true)]
async fn test_api_server_timeout_destroys_infrastructure() {
    let keys = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.cloud_local.private_key_path = Some(write_key(keys.path()));
    settings.timeouts.api_server_secs = 10;
    let harness = Harness::new(settings);
    harness
        .runner
        .on("terraform", &["output"], ScriptedResponse::ok(OUTPUTS_WITH_IP))
        .on("ssh", &["sudo kind get kubeconfig --name shipyard"], ScriptedResponse::ok(KIND_CONFIG))
        .on("kubectl", &["/readyz"], ScriptedResponse::exit(1, "", "connection refused"));

    let result = harness.orchestrator.deploy(request_with_key()).await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("Timed out"));
    assert!(result.message().contains("Kubernetes API server"));
    assert_eq!(harness.runner.count("kubectl", &["apply"]), 0);
    assert_eq!(harness.runner.count("terraform", &["destroy"]), 1);
    assert_eq!(harness.credential_count(), 0);
}
