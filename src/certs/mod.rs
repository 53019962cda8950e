//! On-the-fly TLS identities: one persistent root CA that mints and caches
//! a leaf certificate for every server name observed via SNI.

use crate::error::{GatewayError, Result};
use crate::mapping::ConfigStore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use rustls::crypto::ring::sign::any_supported_type;
use rustls::crypto::{ring::default_provider, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

const CA_CERT_FILE: &str = "ca.pem";
const CA_KEY_FILE: &str = "ca-key.pem";

const CA_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
const LEAF_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn tls_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Tls(e.to_string())
}

/// The persistent root CA and its per-hostname leaf cache.
///
/// Loaded from disk when present, generated and persisted otherwise. The
/// CA material is never rotated while the process runs; restart is the
/// rotation boundary. The leaf cache lives for the process lifetime.
pub struct CertificateAuthority {
    ca_cert: rcgen::Certificate,
    ca_key: KeyPair,
    ca_der: CertificateDer<'static>,
    ca_pem: String,
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

fn ca_params() -> Result<CertificateParams> {
    let mut params = CertificateParams::new(Vec::<String>::new()).map_err(tls_err)?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::OrganizationName, "Registry Gateway CA");
    params
        .distinguished_name
        .push(DnType::CommonName, "Registry Gateway Root CA");
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(1));
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::CrlSign,
    ];
    let not_before = SystemTime::now();
    params.not_before = not_before.into();
    params.not_after = (not_before + CA_VALIDITY).into();
    Ok(params)
}

/// Write key material readable by the owner only.
fn write_private_pem(path: &Path, data: &str) -> Result<()> {
    std::fs::write(path, data)
        .map_err(|e| GatewayError::Tls(format!("failed to write {}: {}", path.display(), e)))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
            GatewayError::Tls(format!("failed to chmod {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

impl CertificateAuthority {
    /// Load the CA from `dir`, generating and persisting a fresh one if
    /// no material exists yet.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| GatewayError::Tls(format!("failed to create CA dir: {}", e)))?;

        let cert_path = dir.join(CA_CERT_FILE);
        let key_path = dir.join(CA_KEY_FILE);

        if cert_path.exists() && key_path.exists() {
            let ca_pem = std::fs::read_to_string(&cert_path)
                .map_err(|e| GatewayError::Tls(format!("failed to read CA cert: {}", e)))?;
            let key_pem = std::fs::read_to_string(&key_path)
                .map_err(|e| GatewayError::Tls(format!("failed to read CA key: {}", e)))?;

            let ca_key = KeyPair::from_pem(&key_pem).map_err(tls_err)?;
            // The persisted DER is what clients trust; the rcgen issuer is
            // rebuilt from the same key and subject for signing.
            let ca_der = parse_single_cert_pem(&ca_pem)?;
            let ca_cert = ca_params()?.self_signed(&ca_key).map_err(tls_err)?;

            tracing::info!(path = %cert_path.display(), "loaded existing root CA");
            return Ok(CertificateAuthority {
                ca_cert,
                ca_key,
                ca_der,
                ca_pem,
                cache: RwLock::new(HashMap::new()),
            });
        }

        let ca_key = KeyPair::generate().map_err(tls_err)?;
        let ca_cert = ca_params()?.self_signed(&ca_key).map_err(tls_err)?;
        let ca_pem = ca_cert.pem();
        let ca_der = ca_cert.der().clone();

        write_private_pem(&cert_path, &ca_pem)?;
        write_private_pem(&key_path, &ca_key.serialize_pem())?;
        tracing::info!(path = %cert_path.display(), "generated new root CA");

        Ok(CertificateAuthority {
            ca_cert,
            ca_key,
            ca_der,
            ca_pem,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }

    /// Return the cached leaf for `server_name`, minting one if absent.
    ///
    /// Runs synchronously inside the TLS handshake callback. Concurrent
    /// first use for the same name may mint twice; the last insert wins
    /// and the loser is dropped.
    pub fn get_or_create(
        &self,
        server_name: &str,
        dns_names: &[String],
    ) -> Result<Arc<CertifiedKey>> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| GatewayError::Tls("certificate cache poisoned".to_string()))?;
            if let Some(key) = cache.get(server_name) {
                return Ok(key.clone());
            }
        }

        let certified = self.mint_leaf(server_name, dns_names)?;
        let certified = Arc::new(certified);

        let mut cache = self
            .cache
            .write()
            .map_err(|_| GatewayError::Tls("certificate cache poisoned".to_string()))?;
        cache.insert(server_name.to_string(), certified.clone());
        tracing::debug!(server_name = %server_name, "minted leaf certificate");
        Ok(certified)
    }

    fn mint_leaf(&self, server_name: &str, dns_names: &[String]) -> Result<CertifiedKey> {
        let mut sans = vec![server_name.to_string()];
        for name in dns_names {
            if !sans.contains(name) {
                sans.push(name.clone());
            }
        }

        let mut params = CertificateParams::new(sans).map_err(tls_err)?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Registry Gateway");
        params
            .distinguished_name
            .push(DnType::CommonName, server_name);
        params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let not_before = SystemTime::now();
        params.not_before = not_before.into();
        params.not_after = (not_before + LEAF_VALIDITY).into();

        let leaf_key = KeyPair::generate().map_err(tls_err)?;
        let leaf_cert = params
            .signed_by(&leaf_key, &self.ca_cert, &self.ca_key)
            .map_err(tls_err)?;

        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
        let signing_key = any_supported_type(&key_der).map_err(tls_err)?;
        let chain = vec![leaf_cert.der().clone(), self.ca_der.clone()];
        Ok(CertifiedKey::new(chain, signing_key))
    }
}

fn parse_single_cert_pem(pem: &str) -> Result<CertificateDer<'static>> {
    let mut reader = std::io::Cursor::new(pem.as_bytes());
    let certs: std::result::Result<Vec<CertificateDer>, _> =
        rustls_pemfile::certs(&mut reader).collect();
    let mut certs = certs.map_err(|e| GatewayError::Tls(format!("failed to parse PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(GatewayError::Tls("no certificates found".to_string()));
    }
    Ok(certs.remove(0))
}

/// Load an operator-supplied certificate/key pair from PEM files.
pub fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<Arc<CertifiedKey>> {
    let cert_file = std::fs::File::open(cert_path)
        .map_err(|e| GatewayError::Tls(format!("failed to open cert file: {}", e)))?;
    let mut cert_reader = std::io::BufReader::new(cert_file);
    let cert_chain: std::result::Result<Vec<CertificateDer>, _> =
        rustls_pemfile::certs(&mut cert_reader).collect();
    let cert_chain =
        cert_chain.map_err(|e| GatewayError::Tls(format!("failed to parse certificates: {}", e)))?;
    if cert_chain.is_empty() {
        return Err(GatewayError::Tls("no certificates found".to_string()));
    }

    let key_file = std::fs::File::open(key_path)
        .map_err(|e| GatewayError::Tls(format!("failed to open key file: {}", e)))?;
    let mut key_reader = std::io::BufReader::new(key_file);
    let mut keys: Vec<_> = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GatewayError::Tls(format!("failed to parse private key: {}", e)))?;
    if keys.is_empty() {
        return Err(GatewayError::Tls("no private keys found".to_string()));
    }

    let key = PrivateKeyDer::Pkcs8(keys.remove(0));
    let signing_key = any_supported_type(&key).map_err(tls_err)?;
    Ok(Arc::new(CertifiedKey::new(cert_chain, signing_key)))
}

/// Per-ClientHello certificate selection for the gateway's TLS listeners.
///
/// An operator-supplied pair wins unconditionally. Otherwise the observed
/// SNI name is looked up in the config store for its alias list and a leaf
/// is minted by the authority; unmapped names get a leaf for just the
/// observed name.
pub struct SniResolver {
    authority: Arc<CertificateAuthority>,
    mappings: Arc<dyn ConfigStore>,
    operator: Option<Arc<CertifiedKey>>,
}

impl SniResolver {
    pub fn new(
        authority: Arc<CertificateAuthority>,
        mappings: Arc<dyn ConfigStore>,
        operator: Option<Arc<CertifiedKey>>,
    ) -> Self {
        SniResolver {
            authority,
            mappings,
            operator,
        }
    }
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver")
            .field("operator", &self.operator.is_some())
            .finish()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        if let Some(operator) = &self.operator {
            return Some(operator.clone());
        }

        let server_name = client_hello.server_name()?.to_string();
        let dns_names = match self.mappings.get(&server_name) {
            Ok(Some(mapping)) => mapping.dns_names(),
            _ => vec![server_name.clone()],
        };

        match self.authority.get_or_create(&server_name, &dns_names) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::error!(server_name = %server_name, error = %e, "failed to mint leaf certificate");
                None
            }
        }
    }
}

/// rustls server config backed by the SNI resolver.
pub fn build_tls_server_config(resolver: SniResolver) -> Arc<rustls::ServerConfig> {
    // rustls 0.23 requires a process-level crypto provider.
    let _ = CryptoProvider::install_default(default_provider());
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Arc::new(config)
}
