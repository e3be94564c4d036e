use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use core::time::Duration;
use tonic::metadata::{AsciiMetadataValue, MetadataValue};

/// Runtime configuration for the `tonic-worker-server` binary.
///
/// These settings control where the worker listens, how the underlying tonic
/// server is tuned, and which interceptors guard incoming calls. All values are
/// parsed from CLI arguments or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tonic-worker-server",
    version,
    about = "Runs the gRPC health service as a managed tonic worker"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/tonic-worker.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Shared secret required as `authorization: Bearer <token>` on every
    /// call. Leave unset to disable authentication.
    ///
    /// Environment variable: `AUTH_TOKEN`
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Per-request timeout in milliseconds. `0` disables the timeout.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_MS`
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 0)]
    pub request_timeout_ms: u64,

    /// Maximum number of concurrent requests per connection. `0` means
    /// unlimited.
    ///
    /// Environment variable: `CONCURRENCY_LIMIT`
    #[arg(long, env = "CONCURRENCY_LIMIT", default_value_t = 0)]
    pub concurrency_limit: usize,

    /// Accept HTTP/1.1 connections in addition to HTTP/2.
    ///
    /// Environment variable: `ACCEPT_HTTP1`
    #[arg(long, env = "ACCEPT_HTTP1", default_value_t = false)]
    pub accept_http1: bool,

    /// Console log format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human readable output.
    Pretty,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub auth_token: Option<AsciiMetadataValue>,
    pub request_timeout: Option<Duration>,
    pub concurrency_limit: Option<usize>,
    pub accept_http1: bool,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.server_addr.trim().is_empty() {
            bail!("SERVER_ADDR must not be empty");
        }

        let auth_token = match args.auth_token {
            None => None,
            Some(token) if token.is_empty() => bail!("AUTH_TOKEN must not be empty when set"),
            Some(token) => {
                let mut value: AsciiMetadataValue =
                    MetadataValue::try_from(format!("Bearer {token}"))
                        .context("AUTH_TOKEN must be a printable ASCII string")?;
                value.set_sensitive(true);
                Some(value)
            }
        };

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            auth_token,
            request_timeout: (args.request_timeout_ms > 0)
                .then(|| Duration::from_millis(args.request_timeout_ms)),
            concurrency_limit: (args.concurrency_limit > 0).then_some(args.concurrency_limit),
            accept_http1: args.accept_http1,
            log_format: args.log_format,
        })
    }
}
