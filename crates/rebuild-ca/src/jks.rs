//! Minimal Java KeyStore writer: exactly one trusted-certificate entry.
//!
//! The JKS container is magic + version + entries + a keyed SHA-1 trailer.
//! The store password participates in the trailer digest as UTF-16BE bytes;
//! an empty password contributes nothing. Output is a pure function of the
//! certificate bytes, so a given CA always serializes identically.

use sha1::{Digest, Sha1};

const MAGIC: u32 = 0xFEED_FEED;
const VERSION: u32 = 2;
const TAG_TRUSTED_CERT: u32 = 2;
const DIGEST_SALT: &[u8] = b"Mighty Aphrodite";

/// Encodes a keystore holding `cert` as a trusted certificate under
/// `alias`, with an empty store password.
pub fn encode_trusted_cert(alias: &str, cert_type: &str, cert: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cert.len() + 64);
    put_u32(&mut out, MAGIC);
    put_u32(&mut out, VERSION);
    put_u32(&mut out, 1); // entry count
    put_u32(&mut out, TAG_TRUSTED_CERT);
    put_utf(&mut out, alias);
    put_u64(&mut out, 0); // creation date; fixed for determinism
    put_utf(&mut out, cert_type);
    put_u32(&mut out, cert.len() as u32);
    out.extend_from_slice(cert);

    // Trailer: SHA-1 over password bytes (empty), the fixed salt, and
    // everything written so far.
    let mut hasher = Sha1::new();
    hasher.update(DIGEST_SALT);
    hasher.update(&out);
    let digest = hasher.finalize();
    out.extend_from_slice(&digest);
    out
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Java serialized UTF: 2-byte big-endian length prefix.
fn put_utf(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_starts_with_magic_and_version() {
        let jks = encode_trusted_cert("proxy", "X.509", b"CERTBYTES");
        assert_eq!(&jks[0..4], &MAGIC.to_be_bytes());
        assert_eq!(&jks[4..8], &VERSION.to_be_bytes());
        assert_eq!(&jks[8..12], &1u32.to_be_bytes());
        assert_eq!(&jks[12..16], &TAG_TRUSTED_CERT.to_be_bytes());
        // Alias: length-prefixed "proxy".
        assert_eq!(&jks[16..18], &5u16.to_be_bytes());
        assert_eq!(&jks[18..23], b"proxy");
    }

    #[test]
    fn output_is_deterministic() {
        let a = encode_trusted_cert("proxy", "X.509", b"SAME");
        let b = encode_trusted_cert("proxy", "X.509", b"SAME");
        assert_eq!(a, b);
    }

    #[test]
    fn trailer_is_keyed_sha1_of_body() {
        let jks = encode_trusted_cert("proxy", "X.509", b"BYTES");
        let (body, trailer) = jks.split_at(jks.len() - 20);
        let mut hasher = Sha1::new();
        hasher.update(DIGEST_SALT);
        hasher.update(body);
        assert_eq!(trailer, hasher.finalize().as_slice());
    }
}
