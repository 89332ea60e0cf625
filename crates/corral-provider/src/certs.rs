//! TLS material for the state server.
//!
//! Preparing an environment generates a CA and a server certificate signed
//! by it. The database serves the server certificate; clients pin the CA,
//! which is recorded in the environment's endpoint.

use std::fs;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, SystemTime};

use camino::Utf8Path;
use corral_config::EnvironPaths;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, SanType};
use tempfile::NamedTempFile;
use tracing::info;

use crate::PROVIDER_TARGET;
use crate::error::ProviderError;

const CA_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
const SERVER_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Hostnames the state server certificate is valid for.
pub const SERVER_HOSTNAMES: [&str; 2] = ["localhost", "corral-apiserver"];

/// PEM-encoded certificates and keys for one environment.
#[derive(Clone)]
pub struct TlsMaterial {
    /// CA certificate.
    pub ca_cert_pem: String,
    /// CA private key.
    pub ca_key_pem: String,
    /// State server certificate.
    pub server_cert_pem: String,
    /// State server private key.
    pub server_key_pem: String,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TlsMaterial")
            .field("ca_cert_pem", &self.ca_cert_pem)
            .field("server_cert_pem", &self.server_cert_pem)
            .finish_non_exhaustive()
    }
}

fn certificate_error(what: &'static str) -> impl FnOnce(rcgen::Error) -> ProviderError {
    move |error| ProviderError::Certificate {
        what,
        message: error.to_string(),
    }
}

/// Generates a CA for `environment` and a server certificate signed by it.
///
/// # Errors
///
/// Returns [`ProviderError::Certificate`] naming the step that failed.
pub fn generate(environment: &str) -> Result<TlsMaterial, ProviderError> {
    let now = SystemTime::now();

    let mut ca_params = CertificateParams::new(Vec::<String>::new())
        .map_err(certificate_error("CA parameters"))?;
    ca_params.distinguished_name = DistinguishedName::new();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, format!("corral-generated CA for environment \"{environment}\""));
    ca_params.distinguished_name.push(DnType::OrganizationName, "corral");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.not_before = now.into();
    ca_params.not_after = (now + CA_VALIDITY).into();
    let ca_key = KeyPair::generate().map_err(certificate_error("CA key"))?;
    let ca_cert = ca_params.self_signed(&ca_key).map_err(certificate_error("CA certificate"))?;

    let hostnames: Vec<String> = SERVER_HOSTNAMES.iter().map(|name| (*name).to_owned()).collect();
    let mut server_params =
        CertificateParams::new(hostnames).map_err(certificate_error("server parameters"))?;
    server_params.distinguished_name = DistinguishedName::new();
    server_params.distinguished_name.push(DnType::CommonName, "*");
    server_params.distinguished_name.push(DnType::OrganizationName, "corral");
    server_params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    server_params.not_before = now.into();
    server_params.not_after = (now + SERVER_VALIDITY).into();
    let server_key = KeyPair::generate().map_err(certificate_error("server key"))?;
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .map_err(certificate_error("server certificate"))?;

    Ok(TlsMaterial {
        ca_cert_pem: ca_cert.pem(),
        ca_key_pem: ca_key.serialize_pem(),
        server_cert_pem: server_cert.pem(),
        server_key_pem: server_key.serialize_pem(),
    })
}

/// Writes the CA and the database's combined server PEM into the layout.
///
/// Every file is written owner-only through a temporary file in the same
/// directory.
///
/// # Errors
///
/// Returns [`ProviderError::Io`] naming the file that could not be written.
pub fn write_material(paths: &EnvironPaths, material: &TlsMaterial) -> Result<(), ProviderError> {
    write_private(&paths.ca_cert(), &material.ca_cert_pem)?;
    write_private(&paths.ca_key(), &material.ca_key_pem)?;
    let server_pem = format!("{}{}", material.server_cert_pem, material.server_key_pem);
    write_private(&paths.server_pem(), &server_pem)?;
    info!(target: PROVIDER_TARGET, root = %paths.root_dir(), "TLS material written");
    Ok(())
}

/// Reads the CA certificate written by [`write_material`].
///
/// # Errors
///
/// Returns [`ProviderError::Io`] when the certificate cannot be read.
pub fn read_ca_cert(paths: &EnvironPaths) -> Result<String, ProviderError> {
    let path = paths.ca_cert();
    fs::read_to_string(&path).map_err(|error| ProviderError::io("read", path, error))
}

fn write_private(path: &Utf8Path, contents: &str) -> Result<(), ProviderError> {
    let parent = path
        .parent()
        .ok_or_else(|| ProviderError::io("write", path, std::io::ErrorKind::InvalidInput.into()))?;
    let mut temp = NamedTempFile::new_in(parent)
        .map_err(|error| ProviderError::io("create temporary file", parent, error))?;
    temp.write_all(contents.as_bytes())
        .map_err(|error| ProviderError::io("write", path, error))?;
    temp.as_file()
        .sync_all()
        .map_err(|error| ProviderError::io("sync", path, error))?;
    temp.persist(path)
        .map_err(|error| ProviderError::io("rename", path, error.error))?;
    Ok(())
}
