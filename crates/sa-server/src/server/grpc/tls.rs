use crate::server::config::TlsConfig;
use anyhow::Context;
use tonic::transport::{Certificate, Identity, ServerTlsConfig};

/// Loads the server identity and, when configured, the CA that client
/// certificates must chain to.
pub async fn load(tls: &TlsConfig) -> anyhow::Result<ServerTlsConfig> {
    let cert = read_pem(&tls.cert_file).await?;
    let key = read_pem(&tls.key_file).await?;
    let mut config = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));

    if let Some(ca_file) = &tls.ca_cert_file {
        let ca = read_pem(ca_file).await?;
        config = config.client_ca_root(Certificate::from_pem(ca));
    }
    Ok(config)
}

async fn read_pem(path: &std::path::Path) -> anyhow::Result<Vec<u8>> {
    let pem = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    if pem.is_empty() {
        anyhow::bail!("{} is empty", path.display());
    }
    Ok(pem)
}
