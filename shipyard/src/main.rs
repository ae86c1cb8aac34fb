//! Shipyard - Entry Point
//!
//! Serves deployment requests over HTTP, or runs a single deployment from
//! the command line with `--deploy`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context};
use colored::Colorize;
use shipyard::app::options::AppOptions;
use shipyard::app::run::run;
use shipyard::app::state::AppState;
use shipyard::filesys::file::File;
use shipyard::logs::{init_logging, LogOptions};
use shipyard::models::{
    CloudCredentials, DeploymentMode, DeploymentRequest, DeploymentResult, DeploymentStatus,
};
use shipyard::storage::layout::StorageLayout;
use shipyard::storage::settings::Settings;
use shipyard::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Retrieve the settings file
    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let settings = match load_settings(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            std::process::exit(2);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    if cli_args.contains_key("deploy") {
        let code = deploy_once(&cli_args, settings, layout).await;
        std::process::exit(code);
    }

    // Run the server
    let options = AppOptions::from_settings(&settings, layout);
    info!("Running shipyard {} with options: {:?}", version.version, options);
    if let Err(e) = run(options, settings, await_shutdown_signal()).await {
        error!("Failed to run shipyard: {e}");
        std::process::exit(1);
    }
}

const USAGE: &str = "usage: shipyard --deploy --repo=URL --mode=local|cloud-local|cloud-hosted \
                     [--namespace=NS] [--key-name=NAME] [--region=REGION] \
                     [--cluster=NAME] [--port=N]";

/// Run a single deployment and print its result; returns the exit code
async fn deploy_once(
    cli_args: &HashMap<String, String>,
    settings: Settings,
    layout: StorageLayout,
) -> i32 {
    let request = match request_from_args(cli_args) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            eprintln!("{}", USAGE);
            return 2;
        }
    };

    let state = match AppState::init(settings, layout)
        .await
        .context("unable to initialize the engine")
    {
        Ok(state) => state,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return 1;
        }
    };

    let result = state.orchestrator.deploy(request).await;
    print_result(&result);
    match result.status() {
        DeploymentStatus::Error => 1,
        DeploymentStatus::Success | DeploymentStatus::PendingFeature => 0,
    }
}

async fn load_settings(file: &File) -> anyhow::Result<Settings> {
    Settings::load(file)
        .await
        .with_context(|| format!("unable to read settings file {}", file.path().display()))
}

fn request_from_args(cli_args: &HashMap<String, String>) -> anyhow::Result<DeploymentRequest> {
    let Some(repo) = cli_args.get("repo") else {
        bail!("--repo is required");
    };
    let mode = match cli_args.get("mode") {
        Some(mode) => mode.parse::<DeploymentMode>().map_err(anyhow::Error::msg)?,
        None => DeploymentMode::Local,
    };

    let mut request = DeploymentRequest::new(repo.clone(), mode);
    if let Some(namespace) = cli_args.get("namespace") {
        request.target_namespace = namespace.clone();
    }
    request.key_name = cli_args.get("key-name").cloned();
    request.region = cli_args.get("region").cloned();
    request.cluster_name = cli_args.get("cluster").cloned();
    if let Some(port) = cli_args.get("port") {
        let port = port
            .parse()
            .with_context(|| format!("invalid port: {}", port))?;
        request.container_port = Some(port);
    }
    request.cloud_credentials = credentials_from_env();
    Ok(request)
}

/// Credentials from the standard AWS environment variables, when both keys are set
fn credentials_from_env() -> Option<CloudCredentials> {
    let access_key_id = env::var("AWS_ACCESS_KEY_ID").ok()?;
    let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok()?;
    let mut credentials = CloudCredentials::new(access_key_id, secret_access_key);
    credentials.session_token = env::var("AWS_SESSION_TOKEN").ok().map(Into::into);
    credentials.region = env::var("AWS_REGION").or_else(|_| env::var("AWS_DEFAULT_REGION")).ok();
    Some(credentials)
}

fn print_result(result: &DeploymentResult) {
    for message in result.messages() {
        println!("  {}", message.dimmed());
    }
    let label = match result.status() {
        DeploymentStatus::Success => "success".green().bold(),
        DeploymentStatus::PendingFeature => "pending".yellow().bold(),
        DeploymentStatus::Error => "error".red().bold(),
    };
    println!("{} [{}] {}", label, result.deployment_id(), result.message());
    if let Some(outputs) = result.outputs() {
        for (name, value) in outputs.iter() {
            println!("  {} = {}", name.cyan(), value);
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let signals = (signal(SignalKind::terminate()), signal(SignalKind::interrupt()));
        let (mut sigterm, mut sigint) = match signals {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down...");
        }
    }
}
