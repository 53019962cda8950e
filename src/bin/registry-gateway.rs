use anyhow::Context;
use clap::{Parser, ValueEnum};
use registry_gateway::server::{self, GatewayState, TlsOptions};
use registry_gateway::{
    admin, mapping, CertificateAuthority, ContentStore, FileContentStore, Manager,
    MemoryContentStore,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    File,
}

#[derive(Parser, Debug)]
#[command(name = "registry-gateway", version, about = "Docker/OCI registry gateway")]
struct Args {
    /// HTTP listen address
    #[arg(long, default_value = "0.0.0.0:80")]
    listen: SocketAddr,

    /// HTTPS listen address
    #[arg(long = "listen-tls", default_value = "0.0.0.0:443")]
    listen_tls: SocketAddr,

    /// Optional separate HTTPS bind serving only the local registry
    #[arg(long = "registry-tls")]
    registry_tls: Option<SocketAddr>,

    /// Operator-supplied TLS certificate (PEM)
    #[arg(long = "cert-file")]
    cert_file: Option<PathBuf>,

    /// Operator-supplied TLS private key (PEM)
    #[arg(long = "key-file")]
    key_file: Option<PathBuf>,

    /// Mint per-SNI certificates from the built-in CA when no pair is given
    #[arg(long = "auto-tls", default_value_t = true, action = clap::ArgAction::Set)]
    auto_tls: bool,

    /// Mapping store backend
    #[arg(long = "config-type", value_enum, default_value_t = StoreKind::Memory)]
    config_type: StoreKind,

    /// Mapping store file (required with --config-type file)
    #[arg(long = "config-path")]
    config_path: Option<String>,

    /// Enable the admin API listener
    #[arg(long = "admin-api", default_value_t = true, action = clap::ArgAction::Set)]
    admin_api: bool,

    /// Admin API listen address
    #[arg(long = "admin-addr", default_value = "0.0.0.0:5001")]
    admin_addr: SocketAddr,

    /// Content store backend for the local registry
    #[arg(long = "storage-type", value_enum, default_value_t = StoreKind::Memory)]
    storage_type: StoreKind,

    /// Content store root directory (required with --storage-type file)
    #[arg(long = "storage-path")]
    storage_path: Option<PathBuf>,

    /// Directory holding the root CA material
    #[arg(long = "ca-dir")]
    ca_dir: Option<PathBuf>,
}

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config_store = mapping::create_config_store(
        match args.config_type {
            StoreKind::Memory => "memory",
            StoreKind::File => "file",
        },
        args.config_path.as_deref(),
    )
    .context("failed to create config store")?;

    let manager = Arc::new(Manager::new(config_store.clone()));
    manager.seed_defaults();
    if let Ok(value) = std::env::var("REGISTRY_MAPPINGS") {
        manager.merge(mapping::mappings_from_env(&value));
    }

    let content: Arc<dyn ContentStore> = match args.storage_type {
        StoreKind::Memory => Arc::new(MemoryContentStore::new()),
        StoreKind::File => {
            let root = args
                .storage_path
                .clone()
                .context("--storage-path is required with --storage-type file")?;
            Arc::new(FileContentStore::open(root).context("failed to open content store")?)
        }
    };

    let ca_dir = args
        .ca_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("registry-gateway-ca"));
    let authority =
        Arc::new(CertificateAuthority::open(&ca_dir).context("failed to initialize root CA")?);

    let tls_options = TlsOptions {
        cert_file: args.cert_file.clone(),
        key_file: args.key_file.clone(),
        auto_tls: args.auto_tls,
    };
    let tls_config = server::build_tls_config(authority.clone(), config_store.clone(), &tls_options)
        .context("failed to build TLS configuration")?;

    let state = GatewayState {
        manager: manager.clone(),
        content: content.clone(),
    };
    let gateway_router = server::build_gateway_router(state);

    let mut handles: Vec<axum_server::Handle> = Vec::new();
    let mut servers = tokio::task::JoinSet::new();

    let http_listener = std::net::TcpListener::bind(args.listen)
        .with_context(|| format!("failed to bind HTTP listener on {}", args.listen))?;
    tracing::info!(addr = %args.listen, "starting HTTP listener");
    let http_handle = axum_server::Handle::new();
    handles.push(http_handle.clone());
    servers.spawn(server::serve_http(
        http_listener,
        gateway_router.clone(),
        http_handle,
    ));

    if let Some(tls_config) = tls_config.clone() {
        let tls_listener = std::net::TcpListener::bind(args.listen_tls)
            .with_context(|| format!("failed to bind HTTPS listener on {}", args.listen_tls))?;
        tracing::info!(addr = %args.listen_tls, "starting HTTPS listener");
        let tls_handle = axum_server::Handle::new();
        handles.push(tls_handle.clone());
        servers.spawn(server::serve_tls(
            tls_listener,
            tls_config.clone(),
            gateway_router.clone(),
            tls_handle,
        ));

        if let Some(registry_addr) = args.registry_tls {
            let registry_listener = std::net::TcpListener::bind(registry_addr).with_context(
                || format!("failed to bind registry HTTPS listener on {}", registry_addr),
            )?;
            tracing::info!(addr = %registry_addr, "starting local-registry HTTPS listener");
            let registry_handle = axum_server::Handle::new();
            handles.push(registry_handle.clone());
            servers.spawn(server::serve_tls(
                registry_listener,
                tls_config,
                server::build_registry_router(content.clone()),
                registry_handle,
            ));
        }
    } else {
        tracing::warn!("TLS disabled: no certificate pair supplied and auto-TLS is off");
    }

    if args.admin_api {
        let admin_listener = std::net::TcpListener::bind(args.admin_addr)
            .with_context(|| format!("failed to bind admin listener on {}", args.admin_addr))?;
        tracing::info!(addr = %args.admin_addr, "starting admin API listener");
        let admin_handle = axum_server::Handle::new();
        handles.push(admin_handle.clone());
        servers.spawn(server::serve_http(
            admin_listener,
            admin::build_admin_router(manager.clone()),
            admin_handle,
        ));
    }

    shutdown_signal().await?;
    tracing::info!("shutdown signal received, draining connections");
    for handle in &handles {
        handle.graceful_shutdown(Some(DRAIN_TIMEOUT));
    }
    while let Some(result) = servers.join_next().await {
        if let Ok(Err(e)) = result {
            tracing::error!(error = %e, "server task failed during shutdown");
        }
    }

    manager.close().context("failed to close config store")?;
    tracing::info!("all services stopped");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")
    }
}
