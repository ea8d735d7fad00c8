//! Data-plane Node CLI
//!
//! Bootstraps the process security context and serves the data plane with
//! secure cookie authentication.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::signal;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dataplane_security_core::config::{LoggingConfig, NodeConfig};
use dataplane_security_core::error::Result as NodeResult;
use dataplane_security_core::metrics::SecurityMetrics;
use dataplane_security_core::network::{DataPlaneListener, DataPlaneMessage, RequestHandler};
use dataplane_security_core::security::{
    AmbientIdentityProvider, IdentityProvider, LoginConfigSlot, ModuleChain, PropertyStore,
    SecurityConfiguration, SecurityContext, SecurityContextCell,
};

/// Data-plane node with security bootstrap.
#[derive(Parser)]
#[command(name = "dataplane-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Override listen address.
    #[arg(long)]
    listen: Option<String>,

    /// Secure cookie for data-plane authentication. Only used when security is enabled.
    #[arg(long, env = "NODE_SECURE_COOKIE", hide_env_values = true)]
    secure_cookie: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = NodeConfig::from_file(&args.config)?;

    // Apply CLI overrides
    if let Some(listen) = args.listen {
        config.listen.address = listen;
    }
    let cookie_overridden = config.security.apply_cookie_override(args.secure_cookie.clone());
    config.validate()?;

    // Override log level from verbosity flag
    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };

    setup_tracing(&log_config);

    if args.secure_cookie.is_some() && !cookie_overridden {
        debug!("security is disabled, ignoring secure cookie from command line");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen.address,
        security_enabled = config.security.enabled,
        "starting data-plane node"
    );

    let metrics = Arc::new(SecurityMetrics::new());
    let context = install_security_context(&config, &metrics)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async move { run_node(config, context, metrics).await });

    if let Err(e) = SecurityContextCell::global().reset() {
        tracing::warn!(error = %e, "failed to uninstall security modules");
    }
    result
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

/// Run the security module chain and install the process identity.
fn install_security_context(
    config: &NodeConfig,
    metrics: &SecurityMetrics,
) -> anyhow::Result<Arc<SecurityContext>> {
    let security = SecurityConfiguration::from_config(&config.security)?;

    let provider: Arc<dyn IdentityProvider> = Arc::new(AmbientIdentityProvider::new());
    let chain = ModuleChain::standard(
        Arc::clone(&provider),
        LoginConfigSlot::global(),
        PropertyStore::global(),
    );
    let modules = chain.names();

    let result = SecurityContextCell::global().install(&security, provider, chain);
    metrics.record_chain_install(&modules, result.as_ref().err());
    let context = result?;

    info!(user = %context.identity(), modules = ?modules, "security context ready");
    Ok(context)
}

/// Handles data-plane requests as the installed identity.
struct SecuredRequestLogger {
    context: Arc<SecurityContext>,
}

#[async_trait]
impl RequestHandler for SecuredRequestLogger {
    async fn handle(
        &self,
        peer: SocketAddr,
        request: DataPlaneMessage,
    ) -> NodeResult<Option<DataPlaneMessage>> {
        let outcome = self.context.run_secured(|| {
            info!(peer = %peer, kind = %request.kind(), "data-plane request");
            Ok::<_, Infallible>(())
        });
        if let Err(e) = outcome {
            tracing::warn!(peer = %peer, error = %e, "request could not run as node identity");
        }
        Ok(None)
    }
}

async fn run_node(
    config: NodeConfig,
    context: Arc<SecurityContext>,
    metrics: Arc<SecurityMetrics>,
) -> anyhow::Result<()> {
    // Fails when security is enabled without a cookie
    let secure_cookie = config.security.secure_cookie()?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_clone = Arc::clone(&metrics);
        let metrics_addr = config.metrics.address.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&metrics_addr, metrics_clone).await {
                tracing::error!(error = %e, "metrics server error");
            }
        });
        info!(address = %config.metrics.address, "metrics server started");
    }

    let handler = Arc::new(SecuredRequestLogger { context });
    let listener = DataPlaneListener::bind(&config.listen, secure_cookie, handler)
        .await?
        .with_metrics(metrics);
    info!(address = %listener.local_addr()?, "data plane bound");
    let shutdown_handle = listener.shutdown_handle();

    // Handle shutdown signals
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, stopping node");
        let _ = shutdown_handle.send(());
    });

    listener.run().await?;

    info!("node shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn start_metrics_server(
    addr: &str,
    metrics: Arc<SecurityMetrics>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                let metrics = Arc::clone(&metrics);
                async move {
                    let body = metrics.encode().unwrap_or_default();
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body))))
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "metrics connection error");
            }
        });
    }
}
