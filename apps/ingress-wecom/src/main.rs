use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use hops_conversation::{Router, RouterDeps};
use hops_core::platforms::unraid::{UnraidClient, UnraidClientConfig, UnraidDispatcher};
use hops_core::platforms::wecom::{WeComClient, WeComClientConfig};
use hops_core::{SharedDispatcher, SharedHandler, SharedSender};
use hops_idempotency::{IdempotencyConfig, IdempotencyGuard};
use hops_ingress_wecom::notify::{StartupInfo, spawn_startup_notification};
use hops_ingress_wecom::{AppConfig, CallbackState, build_router};
use hops_session::{SessionConfig, StateStore};
use hops_telemetry::{TelemetryConfig, init_telemetry};
use security::{CryptoConfig, EnvelopeCrypto};
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "hops-ingress-wecom", version, about = "WeCom operations bot ingress")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "HOPS_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let started = Instant::now();
    let started_at = OffsetDateTime::now_utc();
    let cli = Cli::parse();

    let cfg = AppConfig::load(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    let telemetry = TelemetryConfig::from_env("hops-ingress-wecom", env!("CARGO_PKG_VERSION"))
        .with_default_level(cfg.log.level.clone());
    init_telemetry(&telemetry)?;

    let crypto = EnvelopeCrypto::new(CryptoConfig {
        token: cfg.wecom.token.clone(),
        encoding_aes_key: cfg.wecom.encoding_aes_key.clone(),
        receiver_id: cfg.wecom.corpid.clone(),
    })
    .context("init wecom callback crypto")?;

    let http = reqwest::Client::builder()
        .timeout(cfg.server.http_client_timeout())
        .build()
        .context("build http client")?;

    let sender: SharedSender = Arc::new(WeComClient::new(
        WeComClientConfig {
            api_base_url: cfg.wecom.api_base_url.clone(),
            corp_id: cfg.wecom.corpid.clone(),
            agent_id: cfg.wecom.agentid,
            secret: cfg.wecom.secret.clone(),
        },
        http.clone(),
    ));
    let dispatcher: SharedDispatcher = Arc::new(UnraidDispatcher::new(UnraidClient::new(
        UnraidClientConfig {
            endpoint: cfg.unraid.endpoint.clone(),
            api_key: cfg.unraid.api_key.clone(),
            origin: non_empty(&cfg.unraid.origin),
            force_update_mutation: non_empty(&cfg.unraid.force_update_mutation),
        },
        http,
    )));

    let users = cfg.auth.unique_users();
    let store = Arc::new(StateStore::from_config(&SessionConfig::from(
        &cfg.conversation,
    )));
    let handler: SharedHandler = Arc::new(Router::new(RouterDeps {
        sender: sender.clone(),
        dispatcher,
        state: store.clone(),
        allowed_users: users.iter().cloned().collect::<HashSet<_>>(),
        dispatch_timeout: cfg.conversation.dispatch_timeout(),
    }));
    let guard = IdempotencyGuard::from_config(&IdempotencyConfig::from(&cfg.dedup));

    let state = CallbackState::new(
        Arc::new(crypto),
        guard.clone(),
        handler,
        cfg.server.max_body_bytes,
        cfg.server.handler_timeout(),
    );

    let addr = cfg
        .server
        .socket_addr()
        .with_context(|| format!("invalid listen_addr {}", cfg.server.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    let local = listener.local_addr().unwrap_or(addr);
    info!(
        listen_addr = %local,
        allowed_users = users.len(),
        version = env!("CARGO_PKG_VERSION"),
        "hops-ingress-wecom listening"
    );

    if cfg.server.notify_on_startup {
        spawn_startup_notification(
            sender,
            users,
            StartupInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                config_path: cli.config.display().to_string(),
                listen_addr: local.to_string(),
                base_url: cfg.server.base_url.clone(),
                backend: format!("Unraid {}", cfg.unraid.endpoint),
                elapsed: started.elapsed(),
                started_at,
            },
        );
    }

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    guard.close().await;
    store.close().await;
    info!("hops-ingress-wecom stopped");
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "ctrl-c handler failed");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "sigterm handler failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
