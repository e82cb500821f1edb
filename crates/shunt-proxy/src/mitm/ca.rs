//! Root CA management and per-host leaf certificates for TLS interception.
//!
//! The root CA is persisted as `ca_cert.pem` / `ca_key.pem` in the storage
//! directory and reused across restarts, so clients only need to trust it once.

use super::error::{CaError, Result};
use crate::proxy::crypto_provider;
use moka::future::Cache;
use rand::Rng;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

const CA_CERT_FILE: &str = "ca_cert.pem";
const CA_KEY_FILE: &str = "ca_key.pem";
/// Leaf certificate validity (1 year)
const LEAF_TTL_SECS: i64 = 365 * 24 * 60 * 60;
/// Cached leaf configs expire well before the certificate does
const CACHE_TTL_SECS: u64 = (LEAF_TTL_SECS / 2) as u64;
/// Backdate leaf certificates to tolerate client clock skew
const NOT_BEFORE_OFFSET_SECS: i64 = 60;

/// Self-signed root used to sign leaf certificates for intercepted hosts.
pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    ca_cert_der: CertificateDer<'static>,
    ca_cert_pem: String,
}

impl CertificateAuthority {
    /// Load the CA from `storage_path`, generating and persisting one if absent.
    pub fn load_or_generate(storage_path: impl AsRef<Path>) -> Result<Self> {
        let storage_path = storage_path.as_ref();
        fs::create_dir_all(storage_path)?;

        let cert_path = storage_path.join(CA_CERT_FILE);
        let key_path = storage_path.join(CA_KEY_FILE);

        let (cert_pem, key_pem) = if cert_path.exists() && key_path.exists() {
            info!("Loading MITM CA from {}", storage_path.display());
            (
                fs::read_to_string(&cert_path)?,
                fs::read_to_string(&key_path)?,
            )
        } else {
            info!("Generating MITM CA in {}", storage_path.display());
            let (cert_pem, key_pem) = Self::generate_ca()?;
            fs::write(&cert_path, &cert_pem)?;
            write_private_key(&key_path, &key_pem)?;
            (cert_pem, key_pem)
        };

        let key_pair = KeyPair::from_pem(&key_pem)
            .map_err(|e| CaError::certificate(format!("Failed to parse CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair).map_err(|e| {
            CaError::certificate(format!("Failed to create issuer from CA cert: {e}"))
        })?;

        let ca_cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| CaError::certificate("No certificate found in CA PEM"))?
            .map_err(|e| CaError::certificate(format!("Failed to parse CA PEM: {e}")))?;

        Ok(Self {
            issuer,
            ca_cert_der,
            ca_cert_pem: cert_pem,
        })
    }

    /// Generate a fresh CA, returning `(cert_pem, key_pem)`.
    fn generate_ca() -> Result<(String, String)> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Shunt MITM Proxy CA");
        dn.push(DnType::OrganizationName, "Shunt");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(3650);

        let key_pair = KeyPair::generate()
            .map_err(|e| CaError::certificate(format!("Failed to generate key pair: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CaError::certificate(format!("Failed to generate CA: {e}")))?;

        Ok((cert.pem(), key_pair.serialize_pem()))
    }

    /// Issue a leaf certificate for `host`, returning the chain `[leaf, ca]` and its key.
    pub fn issue_leaf(
        &self,
        host: &str,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let mut params = CertificateParams::default();
        params.serial_number = Some(rand::thread_rng().gen::<u64>().into());

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;

        params.subject_alt_names = if let Ok(ip) = host.parse::<IpAddr>() {
            vec![SanType::IpAddress(ip)]
        } else {
            vec![SanType::DnsName(host.try_into().map_err(|_| {
                CaError::certificate(format!("Invalid host name for certificate: {host}"))
            })?)]
        };
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::seconds(NOT_BEFORE_OFFSET_SECS);
        params.not_after = now + Duration::seconds(LEAF_TTL_SECS);

        let key_pair = KeyPair::generate()
            .map_err(|e| CaError::certificate(format!("Failed to generate key pair: {e}")))?;
        let cert = params
            .signed_by(&key_pair, &self.issuer)
            .map_err(|e| CaError::certificate(format!("Failed to sign leaf for {host}: {e}")))?;

        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        Ok((
            vec![cert.der().clone(), self.ca_cert_der.clone()],
            key_der,
        ))
    }

    /// The CA certificate in PEM form, for installation in client trust stores.
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }
}

/// Write the CA key readable by the owner only.
#[cfg(unix)]
fn write_private_key(path: &Path, key_pem: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(key_pem.as_bytes())
}

#[cfg(not(unix))]
fn write_private_key(path: &Path, key_pem: &str) -> std::io::Result<()> {
    fs::write(path, key_pem)
}

/// Hands out TLS server configs for intercepted hosts, caching one per host.
pub struct CertificateManager {
    ca: CertificateAuthority,
    configs: Cache<String, Arc<ServerConfig>>,
}

impl CertificateManager {
    pub fn new(ca: CertificateAuthority, cache_capacity: u64) -> Self {
        let configs = Cache::builder()
            .max_capacity(cache_capacity)
            .time_to_live(std::time::Duration::from_secs(CACHE_TTL_SECS))
            .build();
        Self { ca, configs }
    }

    /// TLS server config presenting a certificate for `host`.
    pub async fn server_config(&self, host: &str) -> Result<Arc<ServerConfig>> {
        if let Some(config) = self.configs.get(host).await {
            return Ok(config);
        }

        debug!("Issuing MITM certificate for {}", host);
        let (chain, key) = self.ca.issue_leaf(host)?;
        let mut config = ServerConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| CaError::tls(format!("Unsupported protocol versions: {e}")))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| CaError::tls(format!("Failed to build TLS config for {host}: {e}")))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        let config = Arc::new(config);
        self.configs.insert(host.to_string(), config.clone()).await;
        Ok(config)
    }
}
