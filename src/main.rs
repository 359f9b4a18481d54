use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use macvtap_webhook::config::Cli;
use macvtap_webhook::{http, Error, Result};
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_subscriber();

    let tls = webhook_tls(&cli).await?;
    let state = Arc::new(http::State::default());
    let cancel = tokio_util::sync::CancellationToken::new();

    let mut webhook_handle = tokio::spawn(http::serve_webhook(
        cli.addr,
        tls,
        state.clone(),
        cancel.child_token(),
    ));
    let mut metrics_handle = tokio::spawn(http::serve_metrics(
        cli.metrics_address,
        state,
        cancel.child_token(),
    ));
    let mut shutdown_handle = tokio::spawn(async move { shutdown_signal().await });
    // watch for shutdown and errors
    tokio::select! {
        h = &mut webhook_handle => exit("webhook", h),
        h = &mut metrics_handle => exit("metrics", h),
        _ = &mut shutdown_handle => {
                cancel.cancel();
                let (webhook, metrics) = tokio::join!(webhook_handle, metrics_handle);
                if let Err(w) = webhook {
                    error!("webhook exited with error: {}", w.to_string());
                }
                if let Err(m) = metrics {
                    error!("metrics exited with error: {}", m.to_string());
                }
            },
    };
    info!("Exiting...");
    Ok(())
}

async fn webhook_tls(cli: &Cli) -> Result<Option<RustlsConfig>> {
    if cli.allow_http {
        warn!("serving webhook over plain HTTP (development only)");
        return Ok(None);
    }

    let (Some(cert), Some(key)) = (cli.tls_cert.as_ref(), cli.tls_key.as_ref()) else {
        return Err(Error::Config(
            "TLS is required (provide --tls-cert and --tls-key or set \
             TLS_CERT_FILE/TLS_KEY_FILE)"
                .into(),
        ));
    };

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        return Err(Error::Tls("failed to install crypto provider".into()));
    }

    let config = RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(Some(config))
}

fn setup_subscriber() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "macvtap_webhook=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {
          info!("captured ctrl_c signal");
        },
        _ = terminate => {},
    }
}

fn exit(task: &str, out: Result<Result<()>, JoinError>) {
    match out {
        Ok(Ok(_)) => {
            info!("{task} exited")
        }
        Ok(Err(e)) => {
            error!("{task} failed with error: {e}")
        }
        Err(e) => {
            error!("{task} task failed to complete: {e}")
        }
    }
}
