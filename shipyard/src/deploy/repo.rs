//! Repository checkout and inspection

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::process::{CommandRunner, ProcessCommand};
use crate::templates::{Renderer, TemplateId};
use crate::utils::dns_label;

const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// What a checkout tells us about how to build and run it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoAnalysis {
    pub has_dockerfile: bool,
    pub build_cmds: Vec<String>,
    pub run_cmds: Vec<String>,
    /// Base image matching the detected language stack
    pub base_image: String,
}

/// Inspects a checked-out repository
#[async_trait]
pub trait RepoAnalyzer: Send + Sync {
    async fn analyze(&self, path: &Path) -> Result<RepoAnalysis, EngineError>;
}

/// Reads the checkout on the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FsRepoAnalyzer;

#[async_trait]
impl RepoAnalyzer for FsRepoAnalyzer {
    async fn analyze(&self, path: &Path) -> Result<RepoAnalysis, EngineError> {
        let has_dockerfile = tokio::fs::metadata(path.join("Dockerfile")).await.is_ok();

        let mut readme = String::new();
        for name in ["README.md", "README", "readme.md", "README.rst"] {
            if let Ok(contents) = tokio::fs::read_to_string(path.join(name)).await {
                readme = contents;
                break;
            }
        }
        let (build_cmds, run_cmds) = extract_readme_commands(&readme);

        let mut base_image = "ubuntu:22.04";
        for (marker, image) in [
            ("package.json", "node:20-slim"),
            ("requirements.txt", "python:3.12-slim"),
            ("pyproject.toml", "python:3.12-slim"),
            ("go.mod", "golang:1.22"),
            ("Cargo.toml", "rust:1.80"),
            ("pom.xml", "maven:3.9-eclipse-temurin-21"),
        ] {
            if tokio::fs::metadata(path.join(marker)).await.is_ok() {
                base_image = image;
                break;
            }
        }

        debug!(
            "Analyzed {}: dockerfile={}, {} build / {} run command(s)",
            path.display(),
            has_dockerfile,
            build_cmds.len(),
            run_cmds.len()
        );
        Ok(RepoAnalysis {
            has_dockerfile,
            build_cmds,
            run_cmds,
            base_image: base_image.to_string(),
        })
    }
}

const BUILD_PREFIXES: &[&str] = &[
    "npm install",
    "npm ci",
    "npm run build",
    "yarn install",
    "yarn build",
    "pnpm install",
    "pip install",
    "pip3 install",
    "poetry install",
    "go build",
    "cargo build",
    "mvn ",
    "./gradlew",
    "make",
];

const RUN_PREFIXES: &[&str] = &[
    "npm start",
    "npm run start",
    "npm run serve",
    "yarn start",
    "node ",
    "python ",
    "python3 ",
    "flask run",
    "uvicorn ",
    "gunicorn ",
    "go run",
    "cargo run",
    "java -jar",
];

/// Pull build and run commands out of the README's fenced shell blocks
pub fn extract_readme_commands(readme: &str) -> (Vec<String>, Vec<String>) {
    let mut build = Vec::new();
    let mut run = Vec::new();
    let mut in_shell_block = false;
    let mut in_other_block = false;

    for line in readme.lines() {
        let trimmed = line.trim();
        if let Some(lang) = trimmed.strip_prefix("```") {
            if in_shell_block || in_other_block {
                in_shell_block = false;
                in_other_block = false;
            } else if matches!(lang.trim(), "" | "bash" | "sh" | "shell" | "console" | "zsh") {
                in_shell_block = true;
            } else {
                in_other_block = true;
            }
            continue;
        }
        if !in_shell_block || trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let command = trimmed.trim_start_matches("$ ").trim().to_string();
        if BUILD_PREFIXES.iter().any(|p| command.starts_with(p)) {
            if !build.contains(&command) {
                build.push(command);
            }
        } else if RUN_PREFIXES.iter().any(|p| command.starts_with(p)) && !run.contains(&command) {
            run.push(command);
        }
    }

    (build, run)
}

#[derive(Serialize)]
struct DockerfileVars<'a> {
    base_image: &'a str,
    build_cmds: &'a [String],
    port: u16,
    run_cmd: &'a str,
}

/// Dockerfile to build with, or `None` when the repository brings its own
pub fn dockerfile_for(
    renderer: &Renderer,
    analysis: &RepoAnalysis,
    port: u16,
) -> Result<Option<String>, EngineError> {
    if analysis.has_dockerfile {
        return Ok(None);
    }
    let run_cmd = analysis.run_cmds.first().ok_or_else(|| {
        EngineError::Configuration(
            "repository has no Dockerfile and its README names no run command".to_string(),
        )
    })?;
    let rendered = renderer.render(
        TemplateId::Dockerfile,
        &DockerfileVars {
            base_image: &analysis.base_image,
            build_cmds: &analysis.build_cmds,
            port,
            run_cmd,
        },
    )?;
    Ok(Some(rendered))
}

/// `git clone --depth 1` into `dest`
pub async fn clone_repository(
    runner: &Arc<dyn CommandRunner>,
    git: &str,
    repo_url: &str,
    dest: &Path,
) -> Result<(), EngineError> {
    info!("Cloning {} into {}", repo_url, dest.display());
    let output = runner
        .run(
            ProcessCommand::new(git)
                .args(["clone", "--depth", "1", repo_url])
                .arg(dest.display().to_string())
                .timeout(CLONE_TIMEOUT),
        )
        .await?;
    if !output.success() {
        return Err(EngineError::execution("git clone", output.exit_code));
    }
    Ok(())
}

/// Short, DNS-safe application name derived from the repository URL
pub fn app_name_from_url(repo_url: &str) -> String {
    let last = repo_url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(repo_url);
    let name = dns_label(last.trim_end_matches(".git"));
    name.chars().take(40).collect::<String>().trim_end_matches('-').to_string()
}
