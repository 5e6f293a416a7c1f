//! Per-connection session establishment (§4.2): a fresh nonce, an
//! ephemeral RSA keypair, and the encryption suite negotiated from it.
//!
//! Grounded on `Connector_authorize` in the original C sources, which
//! drives the client side of this exchange; the accepting half is new
//! but follows the same shape (generate, advertise, wait for exactly
//! one line back before anything else is read).

use std::sync::atomic::{AtomicU8, Ordering};

use rand::RngCore;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::codec::value::ArgumentMap;
use crate::error::{Error, ErrorKind, Result};

pub const SESSION_ID_LEN: usize = 64;
const RSA_KEY_BITS: usize = 2048;

pub type SessionId = [u8; SESSION_ID_LEN];

/// The encryption suite in effect for a connection's credential fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum EncryptType {
    None = 0,
    Rsa = 1,
}

impl EncryptType {
    pub(crate) fn as_wire(self) -> &'static str {
        match self {
            EncryptType::None => "NONE",
            EncryptType::Rsa => "RSA",
        }
    }

    pub(crate) fn from_wire(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(EncryptType::None),
            "RSA" => Some(EncryptType::Rsa),
            _ => None,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => EncryptType::Rsa,
            _ => EncryptType::None,
        }
    }
}

/// An ephemeral RSA keypair generated once per accepting connection.
/// Absent when the asymmetric primitive isn't available, in which case
/// only `EncryptType::None` is ever advertised.
pub struct KeyPair {
    pub public: RsaPublicKey,
    private: RsaPrivateKey,
}

impl KeyPair {
    pub fn generate() -> Result<Self> {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { public, private })
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(self
            .private
            .decrypt(rsa::Pkcs1v15Encrypt, ciphertext)?)
    }
}

/// Per-connection session state: the nonce masking credentials, the
/// keypair generated on accept (if any), and the encryption type
/// negotiated during `AUTHORIZE`. Lifetime = the owning `ServerIO`'s.
///
/// `selected_encrypt_type` is set once, by `AUTHORIZE`, after the session
/// itself has been handed out to a dispatcher behind a shared reference —
/// hence the atomic rather than a plain field.
pub struct Session {
    pub id: SessionId,
    pub keys: Option<KeyPair>,
    selected_encrypt_type: AtomicU8,
}

impl Session {
    /// Generates the nonce and keypair for a freshly accepted
    /// connection. Falls back to `encryptTypes=NONE` only if RSA key
    /// generation fails, mirroring the optional-asymmetric-primitive
    /// allowance in §4.2.
    pub fn accept() -> Self {
        let mut id = [0u8; SESSION_ID_LEN];
        rand::rngs::OsRng.fill_bytes(&mut id);
        let keys = KeyPair::generate().ok();
        Self {
            id,
            keys,
            selected_encrypt_type: AtomicU8::new(EncryptType::None as u8),
        }
    }

    /// Builds the initiator's view of a session from the nonce
    /// received in the peer's `SESSION` greeting. The initiator never
    /// holds a keypair of its own — it only needs the nonce to
    /// XOR-mask credentials and the peer's public key (kept alongside,
    /// not here) to encrypt them.
    pub fn for_initiator(id: SessionId) -> Self {
        Self {
            id,
            keys: None,
            selected_encrypt_type: AtomicU8::new(EncryptType::None as u8),
        }
    }

    /// The encryption type negotiated by `AUTHORIZE`, if it has run yet.
    pub fn selected_encrypt_type(&self) -> EncryptType {
        EncryptType::from_u8(self.selected_encrypt_type.load(Ordering::SeqCst))
    }

    /// Records the encryption type the peer tagged its `AUTHORIZE` with.
    /// Takes `&self` so a dispatcher holding the session behind a shared
    /// `Arc<ServerIo>` can still record it.
    pub fn select_encrypt_type(&self, encrypt_type: EncryptType) {
        self.selected_encrypt_type.store(encrypt_type as u8, Ordering::SeqCst);
    }

    /// Renders the single `SESSION` line emitted by the accepting side.
    pub fn render_greeting(&self) -> String {
        let id_hex = hex::encode(self.id);
        match &self.keys {
            Some(kp) => {
                let n = kp.public.n().to_string();
                let e = kp.public.e().to_string();
                format!("SESSION id={id_hex} encryptTypes=RSA,NONE n={n} e={e}")
            },
            None => format!("SESSION id={id_hex} encryptTypes=NONE"),
        }
    }

    /// Parses the greeting line on the initiating side. Returns the
    /// nonce and, when advertised, the peer's RSA public key.
    pub fn parse_greeting(line: &str) -> Result<(SessionId, Option<RsaPublicKey>)> {
        let rest = line
            .strip_prefix("SESSION ")
            .ok_or_else(|| Error::Malformed(format!("expected SESSION line, got: {line}")))?;
        let args = ArgumentMap::parse(rest)?;

        let id_hex = args.require_str("id")?;
        let id_bytes = hex::decode(id_hex)?;
        let id: SessionId = id_bytes
            .try_into()
            .map_err(|_| Error::Malformed("session id must be 64 bytes".into()))?;

        let types = args.require_str("encryptTypes")?;
        let supports_rsa = types.split(',').any(|t| EncryptType::from_wire(t) == Some(EncryptType::Rsa));

        let public_key = if supports_rsa {
            let n = args.require_str("n")?;
            let e = args.require_str("e")?;
            let n = rsa::BigUint::parse_bytes(n.as_bytes(), 10)
                .ok_or_else(|| Error::Malformed("invalid modulus".into()))?;
            let e = rsa::BigUint::parse_bytes(e.as_bytes(), 10)
                .ok_or_else(|| Error::Malformed("invalid exponent".into()))?;
            Some(RsaPublicKey::new(n, e).map_err(Error::Rsa)?)
        } else {
            None
        };

        Ok((id, public_key))
    }

    /// Encrypts `plaintext` for transmission on the initiating side,
    /// using the peer's public key when available, else clear.
    pub fn encrypt_for_peer(
        peer_key: Option<&RsaPublicKey>,
        plaintext: &[u8],
    ) -> Result<(EncryptType, Vec<u8>)> {
        match peer_key {
            Some(key) => {
                let mut rng = rand::rngs::OsRng;
                let ciphertext = key.encrypt(&mut rng, rsa::Pkcs1v15Encrypt, plaintext)?;
                Ok((EncryptType::Rsa, ciphertext))
            },
            None => Ok((EncryptType::None, plaintext.to_vec())),
        }
    }

    /// Decrypts a field tagged with `encrypt_type` on the accepting
    /// side, using this session's private key for RSA.
    pub fn decrypt_field(&self, encrypt_type: EncryptType, data: &[u8]) -> Result<Vec<u8>> {
        match encrypt_type {
            EncryptType::None => Ok(data.to_vec()),
            EncryptType::Rsa => {
                self.selected_encrypt_type_guard(encrypt_type)?;
                let kp = self
                    .keys
                    .as_ref()
                    .ok_or_else(|| Error::protocol(ErrorKind::InvalidData, "RSA not available"))?;
                kp.decrypt(data)
            },
        }
    }

    fn selected_encrypt_type_guard(&self, requested: EncryptType) -> Result<()> {
        if self.keys.is_none() && requested == EncryptType::Rsa {
            return Err(Error::protocol(
                ErrorKind::InvalidData,
                "RSA requested but no keypair available",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_round_trips_nonce_and_key() {
        let session = Session::accept();
        let greeting = session.render_greeting();
        assert!(greeting.starts_with("SESSION id="));

        let (id, public_key) = Session::parse_greeting(&greeting).unwrap();
        assert_eq!(id, session.id);
        assert!(public_key.is_some());
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let session = Session::accept();
        let (_, public_key) = Session::parse_greeting(&session.render_greeting()).unwrap();

        let (encrypt_type, ciphertext) =
            Session::encrypt_for_peer(public_key.as_ref(), b"hunter2").unwrap();
        assert_eq!(encrypt_type, EncryptType::Rsa);

        let plaintext = session.decrypt_field(encrypt_type, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hunter2");
    }

    #[test]
    fn rejects_non_session_line() {
        assert!(Session::parse_greeting("1 JOB_NEW").is_err());
    }

    #[test]
    fn select_encrypt_type_is_observable_through_a_shared_reference() {
        let session = Session::accept();
        assert_eq!(session.selected_encrypt_type(), EncryptType::None);
        session.select_encrypt_type(EncryptType::Rsa);
        assert_eq!(session.selected_encrypt_type(), EncryptType::Rsa);
    }
}
