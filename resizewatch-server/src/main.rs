//! # Resizewatch
//!
//! Watches a source folder and writes resized copies of every image into a
//! destination folder. `serve` (the default) exposes the control calls over
//! HTTP; `run` drives one session straight from the command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use resizewatch_core::{ResizePolicy, SessionController, StartOutcome};
use resizewatch_server::{
    AppState,
    infra::config::{Config, ConfigLoader, ConfigLoaderOptions},
    routes,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "resizewatch")]
#[command(about = "Resize every image dropped into a watched folder")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "RESIZEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP control surface (default)
    Serve(ServeArgs),
    /// Run one session from the command line until Ctrl-C
    Run(RunArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, env = "RESIZEWATCH_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "RESIZEWATCH_HOST")]
    host: Option<String>,
}

impl ServeArgs {
    /// Flags given after `serve` win over the ones given before it.
    fn or(self, fallback: ServeArgs) -> ServeArgs {
        ServeArgs {
            port: self.port.or(fallback.port),
            host: self.host.or(fallback.host),
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
struct RunArgs {
    /// Folder to read images from
    #[arg(long)]
    source: PathBuf,

    /// Folder to write resized images into
    #[arg(long)]
    destination: PathBuf,

    /// Uniform scale factor, e.g. 0.5
    #[arg(long, conflicts_with = "resolution", required_unless_present = "resolution")]
    scale: Option<f64>,

    /// Target length of the longer side, in pixels
    #[arg(long)]
    resolution: Option<u32>,

    /// Stop after the initial pass instead of watching
    #[arg(long, default_value_t = false)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.global.config.clone(),
        env_file: cli.global.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,resizewatch_core=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    match cli.command {
        None => run_server(config, cli.serve).await,
        Some(Command::Serve(args)) => run_server(config, args.or(cli.serve)).await,
        Some(Command::Run(args)) => run_session(config, args).await,
    }
}

async fn run_server(mut config: Config, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    let bind = config.server.bind_address();
    let state = AppState::new(config);
    let controller = state.controller().clone();
    let shutdown = state.shutdown.clone();
    let app = routes::create_app(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("resizewatch listening on http://{bind}");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {err}");
        }
        signal.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("server error")?;

    controller.shutdown().await;
    info!("server stopped");
    Ok(())
}

async fn run_session(config: Config, args: RunArgs) -> anyhow::Result<()> {
    let controller = SessionController::new(config.engine);
    controller.set_folders(&args.source, &args.destination)?;
    controller.set_resize_options(ResizePolicy::from_options(args.scale, args.resolution)?)?;

    let report = controller.initial_processing().await?;
    for result in &report.results {
        log_result(result.success, &result.filename, &result.status);
    }
    for name in &report.deferred {
        info!(file = %name, "still being written; will be picked up by the watcher");
    }
    info!(
        processed = report.results.len(),
        deferred = report.deferred.len(),
        "initial processing complete"
    );

    if args.no_watch {
        return Ok(());
    }

    let mut pushed = controller.reporter().subscribe();
    let mut liveness = tokio::time::interval(Duration::from_secs(1));
    if let StartOutcome::Started(session_id) = controller.start_processing().await? {
        info!(%session_id, "watching for new images; press Ctrl-C to stop");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(err) = signal {
                    error!("failed to listen for shutdown signal: {err}");
                }
                break;
            }
            frame = pushed.recv() => match frame {
                Ok(frame) => log_result(
                    frame.result.success,
                    &frame.result.filename,
                    &frame.result.status,
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "result log fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = liveness.tick() => {}
        }

        if !controller.state().is_running() {
            let status = controller.get_status();
            error!(
                state = %status.state,
                error = status.last_error.as_deref().unwrap_or("unknown"),
                "watch session ended"
            );
            break;
        }
    }

    controller.shutdown().await;
    let status = controller.get_status();
    info!(
        succeeded = status.succeeded,
        failed = status.failed,
        "session finished"
    );
    Ok(())
}

fn log_result(success: bool, filename: &str, status: &str) {
    if success {
        info!(file = %filename, "{status}");
    } else {
        warn!(file = %filename, "{status}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_flags_work_without_a_subcommand() {
        let cli = Cli::try_parse_from(["resizewatch", "--port", "9000", "--host", "0.0.0.0"])
            .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, Some(9000));
        assert_eq!(cli.serve.host.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn flags_after_serve_take_precedence() {
        let cli = Cli::try_parse_from(["resizewatch", "--port", "9000", "serve", "--port", "9001"])
            .unwrap();
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        let merged = args.or(cli.serve);
        assert_eq!(merged.port, Some(9001));
    }

    #[test]
    fn run_requires_a_policy() {
        assert!(
            Cli::try_parse_from(["resizewatch", "run", "--source", "a", "--destination", "b"])
                .is_err()
        );
        let cli = Cli::try_parse_from([
            "resizewatch",
            "run",
            "--source",
            "a",
            "--destination",
            "b",
            "--resolution",
            "1024",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Command::Run(RunArgs { resolution: Some(1024), .. }))));
    }
}
