use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Address for the webhook listener
    #[arg(long, default_value = "0.0.0.0:8443")]
    pub addr: SocketAddr,

    /// Path to the TLS certificate
    #[arg(long, env = "TLS_CERT_FILE")]
    pub tls_cert: Option<PathBuf>,

    /// Path to the TLS private key
    #[arg(long, env = "TLS_KEY_FILE")]
    pub tls_key: Option<PathBuf>,

    /// Serve the webhook over plain HTTP (for development only)
    #[arg(long)]
    pub allow_http: bool,

    /// Metrics listener address
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,
}
