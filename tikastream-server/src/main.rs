use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tikastream::{
    build_app, build_extractor, AppState, EngineArgs, EngineCommand, EngineManager,
    ExtractionRequest, InlineSource, ServeArgs, ServerConfig,
};

#[derive(Parser)]
#[command(name = "tikastream")]
#[command(about = "Streams plain text out of documents with Apache Tika")]
struct Cli {
    /// Path to config file (YAML format)
    #[arg(short, long, global = true, env = "TIKASTREAM_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP extraction service
    ///
    /// Serves plain HTTP only. Put a TLS-terminating reverse proxy in front of
    /// it before exposing it beyond a trusted network.
    Serve(ServeArgs),

    /// Extract a single document and write its text to stdout
    Extract {
        /// URL, local path, or "-" to read the document from stdin
        source: String,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env first so clap sees its TIKASTREAM_* values
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries extracted text
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tikastream=debug,tikastream_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load_with_fallback(cli.config.as_deref());
    match &cli.config {
        Some(path) => tracing::info!(path = %path, "config loaded"),
        None => tracing::debug!("using default config"),
    }

    match cli.command {
        Command::Serve(args) => {
            config.apply_serve_args(&args);
            serve(config).await
        }
        Command::Extract { source, engine } => {
            config.apply_engine_args(&engine);
            // A local invocation may always read local files
            config.allow_local_files = true;
            extract(config, source).await
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let engine = provision(&config).await?;
    let state = AppState::from_config(&config, engine)?;
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen))?;
    tracing::info!("Listening on http://{}", config.listen);
    tracing::info!("Health check: http://{}/health", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn extract(config: ServerConfig, source: String) -> Result<()> {
    let engine = provision(&config).await?;
    let extractor = build_extractor(&config, engine)?;

    let request = if source == "-" {
        ExtractionRequest::from_source(InlineSource::new(Box::pin(tokio::io::stdin())))
    } else {
        ExtractionRequest::from_url(source.clone())
    };

    let result = extractor
        .extract(request)
        .await
        .with_context(|| format!("Failed to extract {}", source))?;
    let (mut stream, completion) = result.into_parts();

    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut stream, &mut stdout)
        .await
        .context("Failed to write extracted text")?;
    stdout.flush().await?;

    completion
        .await
        .with_context(|| format!("Extraction of {} failed", source))?;
    Ok(())
}

/// Locate java and the jar (may download) off the async runtime
async fn provision(config: &ServerConfig) -> Result<EngineCommand> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || EngineManager::provision(&config))
        .await
        .context("Engine provisioning task failed")?
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_help_mentions_tls_proxy() {
        let mut cli = Cli::command();
        let serve = cli.find_subcommand_mut("serve").unwrap();
        let help = serve.render_long_help().to_string();
        assert!(help.contains("plain HTTP only"), "{help}");
        assert!(help.contains("TLS-terminating reverse proxy"), "{help}");
    }
}
