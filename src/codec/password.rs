//! Credential transport decoding (§4.4): hex → decrypt → XOR-unmask,
//! landing the plaintext in a buffer that is zeroed on drop rather
//! than an ordinary `String`.

use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Error, ErrorKind, Result};
use crate::session::{EncryptType, Session, SessionId};

/// A decoded password, held in heap memory that is explicitly zeroed
/// when dropped. Never `Clone`, never `Debug` — don't make it easy to
/// accidentally print or duplicate a secret.
pub struct SecurePassword(Zeroizing<Vec<u8>>);

impl SecurePassword {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Decodes a `hex(encryptedBytes)` credential: hex-decode, decrypt per
/// `encrypt_type` using the session's keys, then XOR-unmask against
/// the session nonce, stopping at the first zero byte.
pub fn decode_password(
    session: &Session,
    encrypt_type: EncryptType,
    hex_encoded: &str,
) -> Result<SecurePassword> {
    let encrypted = hex::decode(hex_encoded)?;
    let encoded = session.decrypt_field(encrypt_type, &encrypted)?;
    Ok(SecurePassword(Zeroizing::new(xor_unmask(&encoded, &session.id))))
}

/// Encodes `password` into the `hex(encrypt(xorMask(plaintext)))` wire
/// form `decode_password` consumes, for the initiating side: the
/// counterpart of `decode_password`, using the same session nonce and
/// the peer's public key (if RSA was advertised).
pub fn encode_password(session_id: &SessionId, peer_key: Option<&RsaPublicKey>, password: &str) -> Result<String> {
    let mut masked = password.as_bytes().to_vec();
    for (i, byte) in masked.iter_mut().enumerate() {
        *byte ^= session_id[i % session_id.len()];
    }
    let (_, encrypted) = Session::encrypt_for_peer(peer_key, &masked)?;
    Ok(hex::encode(encrypted))
}

fn xor_unmask(encoded: &[u8], nonce: &SessionId) -> Vec<u8> {
    let mut plain = Vec::with_capacity(encoded.len());
    for (i, &byte) in encoded.iter().enumerate() {
        let unmasked = byte ^ nonce[i % nonce.len()];
        if unmasked == 0 {
            break;
        }
        plain.push(unmasked);
    }
    plain
}

/// Verifies a decoded password against a stored SHA-256 hash using a
/// constant-time comparison, so a timing side channel can't be used to
/// recover the hash byte-by-byte.
pub fn verify_password(password: &SecurePassword, stored_hash: &[u8; 32]) -> Result<bool> {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let computed: [u8; 32] = hasher.finalize().into();

    let mut diff = 0u8;
    for (a, b) in computed.iter().zip(stored_hash.iter()) {
        diff |= a ^ b;
    }

    if diff == 0 {
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Convenience wrapper raising `InvalidSshPassword` on mismatch, for
/// callers that want a `Result`-shaped authorization check.
pub fn require_password(password: &SecurePassword, stored_hash: &[u8; 32]) -> Result<()> {
    if verify_password(password, stored_hash)? {
        Ok(())
    } else {
        Err(Error::protocol(ErrorKind::InvalidSshPassword, "password mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_unmask_stops_at_first_zero() {
        let nonce: SessionId = [0u8; 64];
        let mut masked = vec![b'h' ^ 0, b'i' ^ 0, 0, b'!' ^ 0];
        // with an all-zero nonce the mask is a no-op; verify the
        // early-stop at the NUL terminator regardless.
        let plain = xor_unmask(&masked, &nonce);
        assert_eq!(plain, b"hi");
        masked.clear();
    }

    #[test]
    fn decode_password_round_trips_through_none_encryption() {
        let session = Session::accept();
        let mut encoded = b"s3cr3t".to_vec();
        for (i, b) in encoded.iter_mut().enumerate() {
            *b ^= session.id[i % session.id.len()];
        }
        let hex_encoded = hex::encode(&encoded);

        let decoded = decode_password(&session, EncryptType::None, &hex_encoded).unwrap();
        assert_eq!(decoded.as_bytes(), b"s3cr3t");
    }

    #[test]
    fn encode_then_decode_round_trips_through_rsa_encryption() {
        let session = Session::accept();
        let public_key = &session.keys.as_ref().unwrap().public;

        let wire = encode_password(&session.id, Some(public_key), "hunter2").unwrap();
        let decoded = decode_password(&session, EncryptType::Rsa, &wire).unwrap();
        assert_eq!(decoded.as_bytes(), b"hunter2");
    }

    #[test]
    fn verify_password_accepts_matching_hash_and_rejects_others() {
        let password = SecurePassword(Zeroizing::new(b"correct horse".to_vec()));
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        let hash: [u8; 32] = hasher.finalize().into();

        assert!(verify_password(&password, &hash).unwrap());

        let wrong = SecurePassword(Zeroizing::new(b"battery staple".to_vec()));
        assert!(!verify_password(&wrong, &hash).unwrap());
    }
}
