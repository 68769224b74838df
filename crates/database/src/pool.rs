use anyhow::Context;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::fs::File;
use std::io::BufReader;
use tokio_postgres::NoTls;
use tracing::info;

pub type DbPool = Pool;

/// Create a connection pool from configuration. TLS uses rustls with a
/// custom CA certificate when enabled.
pub fn create_pool(config: &config::DatabaseConfig) -> anyhow::Result<Pool> {
    let mut cfg = Config::new();
    cfg.host = config.host.clone();
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.database.clone());
    cfg.user = Some(config.username.clone());
    cfg.password = Some(config.password.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(
        config.max_connections as usize,
    ));

    if config.tls_enabled {
        let cert_path = config
            .tls_ca_cert_path
            .as_deref()
            .context("DATABASE_TLS_CA_CERT_PATH is required when TLS is enabled")?;
        create_pool_with_rustls(cfg, cert_path)
    } else {
        info!("Connecting to database without TLS");
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))
    }
}

fn create_pool_with_rustls(cfg: Config, cert_path: &str) -> anyhow::Result<Pool> {
    use tokio_postgres_rustls::MakeRustlsConnect;

    // Install the default crypto provider (ring) if not already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Using rustls with CA certificate from: {}", cert_path);

    let cert_file = File::open(cert_path)
        .map_err(|e| anyhow::anyhow!("Failed to open certificate file {}: {}", cert_path, e))?;
    let mut reader = BufReader::new(cert_file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to parse certificate: {}", e))?;

    if certs.is_empty() {
        return Err(anyhow::anyhow!("No certificates found in {}", cert_path));
    }

    let mut root_store = rustls::RootCertStore::empty();
    for cert in certs {
        root_store
            .add(cert)
            .map_err(|e| anyhow::anyhow!("Failed to add certificate to root store: {}", e))?;
    }

    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let tls = MakeRustlsConnect::new(client_config);

    cfg.create_pool(Some(Runtime::Tokio1), tls)
        .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))
}
