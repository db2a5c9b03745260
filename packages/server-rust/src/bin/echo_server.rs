//! Demo server exposing an `Echo` service over HTTP and the framed socket
//! transport.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use switchyard_server::network::{
    HttpBinding, HttpBindingConfig, SocketBinding, SocketBindingConfig,
};
use switchyard_server::service::{
    filter_fn, ProcedureSet, RpcService, ServiceRegistry, SharedFilter,
};
use switchyard_server::{Codec, Context, Message};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "echo-server", about = "Serves the Echo demo service")]
struct Args {
    /// Bind address for both listeners.
    #[arg(long, env = "ECHO_HOST", default_value = "127.0.0.1")]
    host: String,

    /// HTTP listener port.
    #[arg(long, env = "ECHO_HTTP_PORT", default_value_t = 8080)]
    http_port: u16,

    /// Socket listener port. 0 disables the socket binding.
    #[arg(long, env = "ECHO_SOCKET_PORT", default_value_t = 8081)]
    socket_port: u16,

    /// When set, requests must carry this value in the `x-auth` header.
    #[arg(long, env = "ECHO_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Seconds to wait for in-flight requests on shutdown.
    #[arg(long, env = "ECHO_DRAIN_SECS", default_value_t = 10)]
    drain_secs: u64,

    /// Codec assumed for HTTP requests without a content type.
    #[arg(long, env = "ECHO_DEFAULT_CODEC", value_enum, default_value_t = CodecArg::Json)]
    default_codec: CodecArg,

    /// Emit logs as JSON lines.
    #[arg(long, env = "ECHO_LOG_JSON")]
    log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CodecArg {
    Json,
    Msgpack,
}

impl From<CodecArg> for Codec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Json => Codec::Json,
            CodecArg::Msgpack => Codec::MsgPack,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Text {
    text: String,
}

impl Message for Text {}

struct Echo {
    auth_token: Option<String>,
}

impl RpcService for Echo {
    fn name(&self) -> &str {
        "Echo"
    }

    fn filters(&self) -> Vec<SharedFilter> {
        let Some(token) = self.auth_token.clone() else {
            return Vec::new();
        };
        vec![filter_fn("RequireAuthHeader", move |ctx: Context| {
            let token = token.clone();
            async move { Ok(ctx.header("x-auth") == Some(token.as_str())) }
        })]
    }

    fn procedures(set: &mut ProcedureSet<Self>) {
        set.unary("Repeat", |_svc, _ctx, req: Text| async move { Ok(req) });
        set.unary("Shout", |_svc, _ctx, req: Text| async move {
            Ok(Text {
                text: req.text.to_uppercase(),
            })
        });
        set.nullary_empty("Ping", |_svc, _ctx| async { Ok(()) });
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let drain_timeout = Duration::from_secs(args.drain_secs);
    let default_codec = Codec::from(args.default_codec);

    let registry = ServiceRegistry::with_span(tracing::info_span!("echo-server"));
    registry.register(Echo {
        auth_token: args.auth_token.clone(),
    })?;

    registry.attach(Arc::new(HttpBinding::new(
        "http",
        HttpBindingConfig {
            host: args.host.clone(),
            port: args.http_port,
            drain_timeout,
            default_codec,
            ..HttpBindingConfig::default()
        },
    )))?;
    if args.socket_port != 0 {
        registry.attach(Arc::new(SocketBinding::new(
            "socket",
            SocketBindingConfig {
                host: args.host.clone(),
                port: args.socket_port,
                drain_timeout,
                ..SocketBindingConfig::default()
            },
        )))?;
    }

    if let Err(e) = registry.start_all().await {
        // Bindings that did start are not rolled back by `start_all`.
        let _ = registry.stop_all().await;
        return Err(e.into());
    }
    info!(
        host = %args.host,
        http_port = args.http_port,
        socket_port = args.socket_port,
        "echo-server ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    registry.stop_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_codec_is_json() {
        let args = Args::try_parse_from(["echo-server"]).unwrap();
        assert_eq!(Codec::from(args.default_codec), Codec::Json);
    }

    #[test]
    fn msgpack_codec_is_accepted() {
        let args = Args::try_parse_from(["echo-server", "--default-codec", "msgpack"]).unwrap();
        assert_eq!(Codec::from(args.default_codec), Codec::MsgPack);
    }

    #[test]
    fn unknown_codec_is_rejected() {
        assert!(Args::try_parse_from(["echo-server", "--default-codec", "xml"]).is_err());
    }
}
