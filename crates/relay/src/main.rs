use std::sync::Arc;

use coach_llm::{CompletionBackend, RigBackend};
use coach_relay::config::RelayConfig;
use coach_relay::routes::{AppState, app};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,coach_relay=debug".into()),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env().expect("failed to load relay configuration");
    let listen_addr = config.socket_addr().expect("invalid listen address");

    // A missing credential is a per-request failure, not a startup failure:
    // the server comes up and answers each chat with a structured 500.
    let backend: Option<Arc<dyn CompletionBackend>> = match config.upstream_config() {
        Some(upstream) => match RigBackend::new(upstream) {
            Ok(backend) => {
                tracing::info!(
                    backend = backend.name(),
                    model = %config.model,
                    "upstream backend initialized"
                );
                Some(Arc::new(backend))
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to initialize upstream backend");
                None
            }
        },
        None => {
            tracing::warn!(
                "OPENAI_API_KEY is not set; chat requests will fail until it is configured"
            );
            None
        }
    };

    let state = AppState {
        config: Arc::new(config),
        backend,
    };

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .expect("failed to bind listen address");
    tracing::info!(%listen_addr, "coach relay listening");

    axum::serve(listener, app(state))
        .await
        .expect("server error");
}
