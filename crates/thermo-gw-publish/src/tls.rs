//! ---
//! tgw_section: "05-networking-external-interfaces"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Broker publishing and publish supervision."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rumqttc::{TlsConfiguration, Transport};
use thermo_gw_common::TlsConfig;
use tracing::debug;

/// PEM material for mutual TLS with the broker.
#[derive(Clone)]
pub struct TlsMaterial {
    pub root_ca: Vec<u8>,
    pub device_cert: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl TlsMaterial {
    pub fn load(config: &TlsConfig) -> Result<Self> {
        Ok(Self {
            root_ca: read_pem(&config.root_ca, "root CA")?,
            device_cert: read_pem(&config.device_cert, "device certificate")?,
            private_key: read_pem(&config.private_key, "private key")?,
        })
    }

    pub fn into_transport(self) -> Transport {
        Transport::tls_with_config(TlsConfiguration::Simple {
            ca: self.root_ca,
            alpn: None,
            client_auth: Some((self.device_cert, self.private_key)),
        })
    }
}

// Key bytes stay out of logs.
impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("root_ca_len", &self.root_ca.len())
            .field("device_cert_len", &self.device_cert.len())
            .field("private_key_len", &self.private_key.len())
            .finish()
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    let bytes = fs::read(path)
        .with_context(|| format!("unable to read {} from {}", what, path.display()))?;
    if !bytes.windows(11).any(|window| window == b"-----BEGIN ") {
        bail!("{} at {} is not PEM encoded", what, path.display());
    }
    debug!(path = %path.display(), what, "loaded tls material");
    Ok(bytes)
}
