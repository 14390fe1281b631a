//! kubescan-webhook - security-scanning validating admission webhook.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads configuration from the environment
//! - Starts the health server and the TLS webhook server

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info};

use kubescan_webhook::health::{HealthState, run_health_server};
use kubescan_webhook::{CommandScanner, WebhookConfig, WebhookError, WebhookState, run_webhook_server};

/// Grace period for in-flight admissions to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kubescan_webhook=info".parse()?),
        )
        .json()
        .init();

    info!("Starting kubescan-webhook");

    let config = Arc::new(WebhookConfig::from_env()?);
    info!(
        scanner = %config.scanner.program.display(),
        args = ?config.scanner.args,
        timeout_secs = config.scanner.timeout.as_secs_f64(),
        mode = %config.policy.mode,
        severity_cutoff = %config.policy.severity_cutoff,
        max_severity_score = config.policy.max_severity_score,
        "Loaded configuration"
    );

    if !config.server.cert_path.exists() || !config.server.key_path.exists() {
        return Err(WebhookError::TlsConfig(format!(
            "certificate {} or key {} not found",
            config.server.cert_path.display(),
            config.server.key_path.display()
        ))
        .into());
    }

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately so liveness probes work during startup
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.server.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let scanner = Arc::new(CommandScanner::from_config(&config.scanner));
    let state = Arc::new(
        WebhookState::new(config.clone(), scanner).with_health_state(health_state.clone()),
    );

    let webhook_handle = tokio::spawn(async move {
        if let Err(e) = run_webhook_server(state).await {
            error!("Webhook server error: {}", e);
        }
    });

    health_state.set_ready(true).await;

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = webhook_handle => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready so the Service stops routing admissions here
            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting {}s for in-flight admissions to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Webhook stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
