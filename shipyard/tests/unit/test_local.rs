//! Local container runtime deployments

use shipyard::deploy::RepoAnalysis;
use shipyard::models::{DeploymentMode, DeploymentRequest, DeploymentStatus};
use shipyard::process::ScriptedResponse;
use shipyard::storage::Settings;

use crate::common::Harness;

const REPO: &str = "https://github.com/acme/web.git";

#[tokio::test]
async fn test_container_runs_on_configured_port() {
    let mut settings = Settings::default();
    settings.local.host_port = 9000;
    let harness = Harness::new(settings);
    harness
        .runner
        .on("docker", &["run"], ScriptedResponse::ok("4f1c2d\n"))
        .on("docker", &["inspect"], ScriptedResponse::ok("true 0\n"));

    let result = harness
        .orchestrator
        .deploy(DeploymentRequest::new(REPO, DeploymentMode::Local))
        .await;

    assert_eq!(result.status(), DeploymentStatus::Success, "{}", result.message());
    let outputs = result.outputs().unwrap();
    assert_eq!(outputs.get("container_id"), Some("4f1c2d"));
    assert_eq!(outputs.get("url"), Some("http://localhost:9000"));
    assert!(outputs.get("image").unwrap().starts_with("shipyard/web:"));
    assert_eq!(harness.runner.count("git", &["clone", "--depth", "1", REPO]), 1);
    assert_eq!(harness.runner.count("docker", &["rm"]), 0);
    assert_eq!(harness.workspace_count(), 0);
}

#[tokio::test]
async fn test_exited_container_is_removed() {
    let harness = Harness::new(Settings::default());
    harness
        .runner
        .on("docker", &["run"], ScriptedResponse::ok("4f1c2d\n"))
        .on("docker", &["inspect"], ScriptedResponse::ok("false 3\n"))
        .on("docker", &["logs"], ScriptedResponse::exit(0, "", "panic: missing DATABASE_URL"));

    let result = harness
        .orchestrator
        .deploy(DeploymentRequest::new(REPO, DeploymentMode::Local))
        .await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("exit code 3"));
    assert!(result.message().contains("Cleanup succeeded"));
    assert!(!result.message().contains("DATABASE_URL"));
    assert_eq!(harness.runner.count("docker", &["rm", "-f"]), 1);
}

#[tokio::test]
async fn test_build_failure_has_nothing_to_clean_up() {
    let harness = Harness::new(Settings::default());
    harness
        .runner
        .on("docker", &["build"], ScriptedResponse::exit(1, "", "failed to solve"));

    let result = harness
        .orchestrator
        .deploy(DeploymentRequest::new(REPO, DeploymentMode::Local))
        .await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().starts_with("docker build failed"));
    assert_eq!(harness.runner.count("docker", &["run"]), 0);
    assert_eq!(harness.runner.count("docker", &["rm"]), 0);
}

#[tokio::test]
async fn test_readme_commands_generate_a_dockerfile() {
    let harness = Harness::with_analysis(
        Settings::default(),
        RepoAnalysis {
            has_dockerfile: false,
            build_cmds: vec!["npm install".to_string()],
            run_cmds: vec!["npm start".to_string()],
            base_image: "node:20-slim".to_string(),
        },
    );
    harness
        .runner
        .on("docker", &["inspect"], ScriptedResponse::ok("true 0\n"));

    let result = harness
        .orchestrator
        .deploy(DeploymentRequest::new(REPO, DeploymentMode::Local))
        .await;

    assert_eq!(result.status(), DeploymentStatus::Success, "{}", result.message());
    let build = harness
        .runner
        .calls()
        .into_iter()
        .find(|c| c.program == "docker" && c.args.first().map(String::as_str) == Some("build"))
        .unwrap();
    assert!(build.has_args(&["-f"]));
    assert!(build.args.iter().any(|a| a.ends_with("Dockerfile.generated")));
}

#[tokio::test]
async fn test_missing_tool_is_reported() {
    let harness = Harness::new(Settings::default());
    harness.runner.on("git", &["clone"], ScriptedResponse::ToolNotFound);

    let result = harness
        .orchestrator
        .deploy(DeploymentRequest::new(REPO, DeploymentMode::Local))
        .await;

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("Required tool not found: git"));
    assert_eq!(harness.workspace_count(), 0);
}

#[test]
fn test_blank_repository_is_rejected() {
    let harness = Harness::new(Settings::default());

    let result = tokio_test::block_on(
        harness
            .orchestrator
            .deploy(DeploymentRequest::new("   ", DeploymentMode::Local)),
    );

    assert_eq!(result.status(), DeploymentStatus::Error);
    assert!(result.message().contains("Repository URL"));
    assert!(harness.runner.calls().is_empty());
}
