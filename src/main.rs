use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use liewave::audio::FfmpegTranscoder;
use liewave::cli::{Cli, Commands, ConfigAction};
use liewave::config::{Config, StorageBackend};
use liewave::daemon::run_daemon;
use liewave::ipc::client::send_command;
use liewave::ipc::protocol::{Command, ErrorKind, Response};
use liewave::ipc::server::IpcServer;
use liewave::model::{Classifier, ModelHandle, ModelRuntime};
use liewave::model::runtime::device_name;
use liewave::orchestrator::Orchestrator;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    liewave::logging::init(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Serve {
            socket,
            decode_timeout,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            apply_decode_timeout(&mut config, decode_timeout);
            config.validate()?;
            run_daemon(config, socket).await?;
        }
        Commands::Predict { path, user, socket } => {
            handle_ipc_command(socket, Command::predict(path, user)).await?;
        }
        Commands::Run {
            path,
            user,
            local_root,
            decode_timeout,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            apply_decode_timeout(&mut config, decode_timeout);
            if let Some(root) = local_root {
                config.storage.backend = StorageBackend::Local;
                config.storage.local_root = root;
            }
            config.validate()?;
            run_in_process(&config, &path, &user).await?;
        }
        Commands::Status { socket } => {
            handle_ipc_command(socket, Command::Status).await?;
        }
        Commands::Shutdown { socket } => {
            handle_ipc_command(socket, Command::Shutdown).await?;
        }
        Commands::Check => {
            let config = load_config(cli.config.as_deref())?;
            if !check_environment(&config).await {
                bail!("One or more checks failed");
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "liewave", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/liewave/config.toml)
/// 3. Built-in defaults
///
/// Environment variables override whichever was loaded.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

fn apply_decode_timeout(config: &mut Config, timeout: Option<Duration>) {
    if let Some(timeout) = timeout {
        config.decoder.timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
    }
}

async fn load_model(config: &Config) -> Result<std::sync::Arc<ModelHandle>> {
    let dir = config.model.path.clone();
    let handle = tokio::task::spawn_blocking(move || ModelRuntime::global().initialize(&dir))
        .await
        .context("Model loader task failed")??;
    Ok(handle)
}

/// Run the whole pipeline once in this process and print the result as JSON.
async fn run_in_process(config: &Config, path: &str, user_id: &str) -> Result<()> {
    let model = load_model(config).await?;
    let orchestrator = Orchestrator::from_config(config, model)?;
    let result = orchestrator.run(path, user_id).await?;
    let output = serde_json::json!({
        "prediction_data": result.data(),
        "user_id": user_id,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Send a command to the daemon and print its response.
async fn handle_ipc_command(socket: Option<PathBuf>, command: Command) -> Result<()> {
    let socket_path = socket.unwrap_or_else(IpcServer::default_socket_path);

    let response = send_command(&socket_path, command)
        .await
        .context("Is the daemon running? Start it with: liewave serve")?;

    match response {
        Response::Ok => println!("OK"),
        Response::Prediction {
            prediction_data,
            user_id,
        } => {
            let output = serde_json::json!({
                "prediction_data": prediction_data,
                "user_id": user_id,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Response::Status {
            model_state,
            device,
            model_name,
            in_flight,
            version,
        } => {
            println!("Status:");
            println!("  Client:    {}", liewave::version_string());
            println!("  Daemon:    {}", version);
            println!("  Model:     {}", model_state);
            if let Some(name) = model_name {
                println!("  Name:      {}", name);
            }
            if let Some(device) = device {
                println!("  Device:    {}", device);
            }
            println!("  In flight: {}", in_flight);
        }
        Response::Error { kind, message } => match kind {
            ErrorKind::Client => bail!("Rejected: {}", message),
            ErrorKind::Server => bail!("{}", message),
        },
    }

    Ok(())
}

/// Print one line per check; returns whether all passed.
async fn check_environment(config: &Config) -> bool {
    let mut all_ok = true;
    let mut report = |name: &str, outcome: std::result::Result<String, String>| match outcome {
        Ok(detail) => println!("  ok    {:<10} {}", name, detail),
        Err(detail) => {
            all_ok = false;
            println!("  FAIL  {:<10} {}", name, detail);
        }
    };

    println!("liewave {} ({})", liewave::version_string(), liewave::defaults::compute_backend());

    report(
        "config",
        config
            .validate()
            .map(|()| format!("{:?} storage backend", config.storage.backend))
            .map_err(|e| e.to_string()),
    );

    let transcoder = FfmpegTranscoder::from_config(&config.decoder);
    report(
        "decoder",
        transcoder.probe().await.map_err(|e| e.to_string()),
    );

    let dir = config.model.path.clone();
    let model = tokio::task::spawn_blocking(move || ModelHandle::load(&dir))
        .await
        .map_err(|e| e.to_string())
        .and_then(|loaded| loaded.map_err(|e| e.to_string()))
        .map(|handle| format!("{} on {}", handle.name(), device_name(handle.device())));
    report("model", model);

    all_ok
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut config = load_config(custom_path)?;
            if config.storage.access_token.is_some() {
                config.storage.access_token = Some("<redacted>".to_string());
            }
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
