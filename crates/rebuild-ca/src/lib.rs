//! # rebuild-ca
//!
//! The ephemeral certificate authority behind the intercepting proxy: a
//! short-lived RSA-2048 root generated at startup, per-host server leaves
//! minted (and memoized) on demand, and the PEM/JKS serializations that get
//! materialized into build containers.

mod jks;

use std::collections::HashMap;
use std::sync::Mutex;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Name, X509};
use thiserror::Error;

/// Subject common name of the generated root.
pub const CA_COMMON_NAME: &str = "OSS Rebuild Proxy";
/// Root and leaf validity window, in days.
pub const VALIDITY_DAYS: u32 = 7;
/// Alias of the trusted-cert entry in the JKS serialization.
pub const JKS_ALIAS: &str = "proxy";

#[derive(Debug, Error)]
pub enum CaError {
    #[error("certificate operation failed: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
}

/// A certificate with its private key.
#[derive(Clone)]
pub struct CertifiedKey {
    pub cert: X509,
    pub key: PKey<Private>,
}

/// The intercepting CA. Read-only after generation; leaf minting memoizes
/// per host under an internal mutex, so one `Ca` is shared by every proxy.
pub struct Ca {
    root: CertifiedKey,
    /// One RSA key shared by all leaves; generating a fresh key per host
    /// would dominate handshake latency for no security benefit within a
    /// 7-day MITM scope.
    leaf_key: PKey<Private>,
    leaves: Mutex<HashMap<String, CertifiedKey>>,
}

impl Ca {
    /// Generates a fresh self-signed root: RSA-2048, CN "OSS Rebuild
    /// Proxy", valid from now for seven days, `BasicConstraints=CA`,
    /// key usage digitalSignature|keyCertSign, extended usage serverAuth.
    pub fn generate() -> Result<Self, CaError> {
        let key = PKey::from_rsa(Rsa::generate(2048)?)?;
        let name = common_name(CA_COMMON_NAME)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(VALIDITY_DAYS)?;
        builder.set_not_after(&not_after)?;
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_cert_sign()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;
        builder.sign(&key, MessageDigest::sha256())?;

        Ok(Ca {
            root: CertifiedKey {
                cert: builder.build(),
                key,
            },
            leaf_key: PKey::from_rsa(Rsa::generate(2048)?)?,
            leaves: Mutex::new(HashMap::new()),
        })
    }

    /// The root certificate.
    pub fn cert(&self) -> &X509 {
        &self.root.cert
    }

    /// Mints (or returns the memoized) server certificate for `host`,
    /// signed by this CA with `host` as both CN and DNS SAN.
    pub fn leaf_for_host(&self, host: &str) -> Result<CertifiedKey, CaError> {
        if let Some(leaf) = self
            .leaves
            .lock()
            .expect("leaf cache poisoned")
            .get(host)
        {
            return Ok(leaf.clone());
        }
        let leaf = self.mint_leaf(host)?;
        self.leaves
            .lock()
            .expect("leaf cache poisoned")
            .insert(host.to_string(), leaf.clone());
        Ok(leaf)
    }

    fn mint_leaf(&self, host: &str) -> Result<CertifiedKey, CaError> {
        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;
        let name = common_name(host)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(self.root.cert.subject_name())?;
        builder.set_pubkey(&self.leaf_key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(VALIDITY_DAYS)?;
        builder.set_not_after(&not_after)?;
        builder.append_extension(BasicConstraints::new().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;
        let san = SubjectAlternativeName::new()
            .dns(host)
            .build(&builder.x509v3_context(Some(&self.root.cert), None))?;
        builder.append_extension(san)?;
        builder.sign(&self.root.key, MessageDigest::sha256())?;
        Ok(CertifiedKey {
            cert: builder.build(),
            key: self.leaf_key.clone(),
        })
    }

    /// The root certificate as a single PEM `CERTIFICATE` block.
    pub fn to_pem(&self) -> Result<Vec<u8>, CaError> {
        Ok(self.root.cert.to_pem()?)
    }

    /// The root certificate in DER form.
    pub fn to_der(&self) -> Result<Vec<u8>, CaError> {
        Ok(self.root.cert.to_der()?)
    }

    /// The root certificate as a Java KeyStore holding one trusted-cert
    /// entry aliased `proxy` with an empty store password. The entry
    /// content is the DER serialization under the `X.509` type the JVM
    /// expects, and the output is byte-stable for a given certificate.
    pub fn to_jks(&self) -> Result<Vec<u8>, CaError> {
        let der = self.to_der()?;
        Ok(jks::encode_trusted_cert(JKS_ALIAS, "X.509", &der))
    }
}

fn common_name(cn: &str) -> Result<X509Name, CaError> {
    let mut name = X509Name::builder()?;
    name.append_entry_by_text("CN", cn)?;
    Ok(name.build())
}

fn random_serial() -> Result<openssl::asn1::Asn1Integer, CaError> {
    let mut bn = BigNum::new()?;
    bn.rand(127, MsbOption::MAYBE_ZERO, false)?;
    Ok(bn.to_asn1_integer()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_a_ca_named_for_the_proxy() {
        let ca = Ca::generate().unwrap();
        let subject = format!("{:?}", ca.cert().subject_name());
        assert!(subject.contains(CA_COMMON_NAME));
        let pem = ca.to_pem().unwrap();
        let text = String::from_utf8(pem.clone()).unwrap();
        assert!(text.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(text.matches("BEGIN CERTIFICATE").count(), 1);
    }

    #[test]
    fn serializations_are_stable_for_a_given_ca() {
        let ca = Ca::generate().unwrap();
        assert_eq!(ca.to_pem().unwrap(), ca.to_pem().unwrap());
        assert_eq!(ca.to_jks().unwrap(), ca.to_jks().unwrap());
    }

    #[test]
    fn jks_embeds_the_der_bytes_under_the_jvm_cert_type() {
        let ca = Ca::generate().unwrap();
        let der = ca.to_der().unwrap();
        let jks = ca.to_jks().unwrap();
        assert!(jks
            .windows(der.len())
            .any(|w| w == der.as_slice()));
        // Length-prefixed "X.509" precedes the certificate bytes.
        let tag = [&[0u8, 5][..], b"X.509"].concat();
        assert!(jks.windows(tag.len()).any(|w| w == tag.as_slice()));
    }

    #[test]
    fn leaves_are_memoized_and_issued_by_the_root() {
        let ca = Ca::generate().unwrap();
        let a = ca.leaf_for_host("example.com").unwrap();
        let b = ca.leaf_for_host("example.com").unwrap();
        assert_eq!(a.cert.to_der().unwrap(), b.cert.to_der().unwrap());
        assert_eq!(
            format!("{:?}", a.cert.issuer_name()),
            format!("{:?}", ca.cert().subject_name())
        );
        let root_key = ca.cert().public_key().unwrap();
        assert!(a.cert.verify(&root_key).unwrap());
    }
}
