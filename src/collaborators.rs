//! Seams for everything this crate treats as an external collaborator.
//!
//! The CRDT engine, the cryptographic primitive library, the tenant/user directory, and the
//! decryption key bag are all out of scope as *implementations* — this module only defines the
//! trait objects the rest of the crate is built against, composed into a concrete type rather
//! than reached through inheritance. Each trait also ships one concrete, real-crate-backed
//! implementation so the crate is exercisable end-to-end without a second repository; production
//! deployments are expected to supply their own.

use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// An opaque, byte-oriented CRDT change log.
///
/// The document loader never interprets change bytes itself; it only needs to know a change's
/// hash (for id derivation and the `crdt_hash → entry_id` map) and to be able to replay bytes
/// into an engine-owned document handle.
pub trait CrdtEngine: Send {
    /// Hash of a single change's bytes, independent of anything the engine knows about state.
    /// This is the `crdt_change_hash` fed into `id::derive_doc_entry_id`.
    fn change_hash(&self, change_bytes: &[u8]) -> String;

    /// Apply decrypted change bytes (from a `doc_create`, `doc_change`, or `doc_snapshot` entry)
    /// to the engine's running state. Must be idempotent with respect to re-applied identical
    /// changes.
    fn apply_changes(&mut self, change_bytes: &[u8]) -> Result<()>;

    /// Serialize the engine's current state, e.g. to build a `doc_snapshot` entry.
    fn snapshot(&self) -> Result<Vec<u8>>;
}

/// Signing identity, `"ed25519:<base64>"` by convention (see `collaborators::ed25519_crypto`).
pub type PublicKeyStr = String;

/// Cryptographic primitives used at the entry boundary and the network boundary.
///
/// Entries arrive at the CAS already encrypted and signed by a caller that holds the relevant
/// private key; the CAS and document loader only ever verify. `rsa_wrap`/`rsa_unwrap` are used
/// exclusively at the network boundary (`network::rsa_wrap`) to double-wrap payloads per
/// recipient in transit.
pub trait CryptoProvider: Send + Sync {
    /// Verify `signature` over `data` under the identity named by `public_key`.
    fn verify(&self, public_key: &PublicKeyStr, data: &[u8], signature: &[u8]) -> Result<bool>;

    /// Symmetric decryption under a key drawn from a `KeyBag`. Keys are opaque byte strings as
    /// far as this trait is concerned; the concrete implementation interprets them.
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Symmetric encryption, the inverse of `decrypt`, used by callers constructing new entries.
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Wrap `plaintext` for a single recipient's RSA public key, generating a fresh symmetric
    /// key and IV per call so repeated calls on identical plaintext yield distinct ciphertexts.
    fn rsa_wrap(&self, recipient_public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Inverse of `rsa_wrap` under the matching RSA private key.
    fn rsa_unwrap(&self, recipient_private_key: &[u8], wrapped: &[u8]) -> Result<Vec<u8>>;
}

/// Tenant/user directory: an opaque key-lookup and revocation oracle.
///
/// The network boundary's authentication service and the server-side CAS adapter's trusted-
/// signer check both go through this trait; nothing in this crate stores user records itself.
pub trait Directory: Send + Sync {
    /// Whether `user` is a known identity at all.
    fn user_exists(&self, user: &str) -> bool;

    /// Whether `user` has been revoked (present but no longer trusted).
    fn is_revoked(&self, user: &str) -> bool;

    /// The signing public key on file for `user`, if any.
    fn signing_public_key(&self, user: &str) -> Option<PublicKeyStr>;

    /// The RSA encryption public key on file for `user`, DER/SPKI bytes, for transport wrapping.
    fn encryption_public_key(&self, user: &str) -> Option<Vec<u8>>;

    /// Whether `public_key` is a signing key the directory trusts to author entries, used by the
    /// server-side CAS adapter to reject untrusted writers in `put_entries`.
    fn is_trusted_signer(&self, public_key: &PublicKeyStr) -> bool;

    /// The tenant-admin signing key, for admin-only-database enforcement.
    fn tenant_admin_public_key(&self) -> Option<PublicKeyStr>;
}

/// A symbolic-reference key lookup: `decryption_key_id → symmetric key bytes`.
///
/// Deliberately not keyed by user identity — entries reference keys by an opaque id so that key
/// rotation and sharing policy stay entirely outside this crate.
pub trait KeyBag: Send + Sync {
    fn get(&self, decryption_key_id: &str) -> Option<Vec<u8>>;
}

/// In-memory `Directory` backed by a plain map, suitable for tests and single-process
/// deployments that manage their user table elsewhere and mirror it in here.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<String, DirectoryEntry>>,
    admin_key: RwLock<Option<PublicKeyStr>>,
}

struct DirectoryEntry {
    signing_public_key: PublicKeyStr,
    encryption_public_key: Vec<u8>,
    revoked: bool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(
        &self,
        user: impl Into<String>,
        signing_public_key: impl Into<String>,
        encryption_public_key: Vec<u8>,
    ) {
        self.users.write().unwrap().insert(
            user.into(),
            DirectoryEntry {
                signing_public_key: signing_public_key.into(),
                encryption_public_key,
                revoked: false,
            },
        );
    }

    pub fn revoke(&self, user: &str) {
        if let Some(entry) = self.users.write().unwrap().get_mut(user) {
            entry.revoked = true;
        }
    }

    pub fn set_tenant_admin(&self, public_key: impl Into<String>) {
        *self.admin_key.write().unwrap() = Some(public_key.into());
    }
}

impl Directory for InMemoryDirectory {
    fn user_exists(&self, user: &str) -> bool {
        self.users.read().unwrap().contains_key(user)
    }

    fn is_revoked(&self, user: &str) -> bool {
        self.users
            .read()
            .unwrap()
            .get(user)
            .map(|e| e.revoked)
            .unwrap_or(false)
    }

    fn signing_public_key(&self, user: &str) -> Option<PublicKeyStr> {
        self.users
            .read()
            .unwrap()
            .get(user)
            .map(|e| e.signing_public_key.clone())
    }

    fn encryption_public_key(&self, user: &str) -> Option<Vec<u8>> {
        self.users
            .read()
            .unwrap()
            .get(user)
            .map(|e| e.encryption_public_key.clone())
    }

    fn is_trusted_signer(&self, public_key: &PublicKeyStr) -> bool {
        self.users
            .read()
            .unwrap()
            .values()
            .any(|e| &e.signing_public_key == public_key && !e.revoked)
    }

    fn tenant_admin_public_key(&self) -> Option<PublicKeyStr> {
        self.admin_key.read().unwrap().clone()
    }
}

/// In-memory `KeyBag` backed by a plain map. Mirrors the teacher's `InMemoryBackend` warning
/// about plaintext key storage: production key bags are expected to wrap an OS keychain or HSM.
#[derive(Default)]
pub struct InMemoryKeyBag {
    keys: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryKeyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, decryption_key_id: impl Into<String>, key: Vec<u8>) {
        self.keys.write().unwrap().insert(decryption_key_id.into(), key);
    }
}

impl KeyBag for InMemoryKeyBag {
    fn get(&self, decryption_key_id: &str) -> Option<Vec<u8>> {
        self.keys.read().unwrap().get(decryption_key_id).cloned()
    }
}

/// Default `CryptoProvider`: Ed25519 signatures (`ed25519-dalek`), AES-256-GCM symmetric
/// encryption (`aes-gcm`), and RSA-OAEP transport wrapping (`rsa`).
///
/// Key format for signing identities is `"ed25519:<base64>"`, matching the convention used
/// throughout the entry model.
pub struct DefaultCrypto;

impl DefaultCrypto {
    pub fn new() -> Self {
        Self
    }

    /// Parse a `"ed25519:<base64>"` identity string into a verifying key.
    pub fn parse_public_key(key_str: &str) -> Result<ed25519_dalek::VerifyingKey> {
        use base64ct::{Base64, Encoding};
        use ed25519_dalek::VerifyingKey;

        let key_data = key_str
            .strip_prefix("ed25519:")
            .ok_or_else(|| Error::InvalidKeyFormat("key must start with 'ed25519:'".into()))?;
        let key_bytes = Base64::decode_vec(key_data)
            .map_err(|e| Error::InvalidKeyFormat(format!("invalid base64 for key: {e}")))?;
        let key_array: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| Error::InvalidKeyFormat("ed25519 public key must be 32 bytes".into()))?;
        VerifyingKey::from_bytes(&key_array)
            .map_err(|e| Error::InvalidKeyFormat(format!("invalid ed25519 key: {e}")))
    }

    /// Format a verifying key as a `"ed25519:<base64>"` identity string.
    pub fn format_public_key(key: &ed25519_dalek::VerifyingKey) -> String {
        use base64ct::{Base64, Encoding};
        format!("ed25519:{}", Base64::encode_string(&key.to_bytes()))
    }

    /// Generate a fresh Ed25519 keypair, for tests and bootstrapping.
    pub fn generate_signing_keypair() -> (ed25519_dalek::SigningKey, ed25519_dalek::VerifyingKey) {
        let mut rng = rand::rngs::OsRng;
        let signing_key = ed25519_dalek::SigningKey::generate(&mut rng);
        let verifying_key = signing_key.verifying_key();
        (signing_key, verifying_key)
    }

    /// Sign arbitrary bytes with a raw Ed25519 signing key, for callers constructing entries or
    /// signing authentication challenges.
    pub fn sign(signing_key: &ed25519_dalek::SigningKey, data: &[u8]) -> Vec<u8> {
        use ed25519_dalek::Signer;
        signing_key.sign(data).to_bytes().to_vec()
    }
}

impl Default for DefaultCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider for DefaultCrypto {
    fn verify(&self, public_key: &PublicKeyStr, data: &[u8], signature: &[u8]) -> Result<bool> {
        use ed25519_dalek::{Signature, Verifier};

        let verifying_key = Self::parse_public_key(public_key)?;
        let signature_array: [u8; 64] = match signature.try_into() {
            Ok(a) => a,
            Err(_) => return Ok(false),
        };
        let signature = Signature::from_bytes(&signature_array);
        Ok(verifying_key.verify(data, &signature).is_ok())
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::aead::{Aead, KeyInit};
        use aes_gcm::{Aes256Gcm, Key, Nonce};

        if ciphertext.len() < 12 {
            return Err(Error::Crypto("ciphertext shorter than nonce".into()));
        }
        let (nonce_bytes, body) = ciphertext.split_at(12);
        let key = Key::<Aes256Gcm>::from_slice(key);
        let cipher = Aes256Gcm::new(key);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| Error::Crypto(format!("symmetric decryption failed: {e}")))
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
        use aes_gcm::{Aes256Gcm, Key};

        let key = Key::<Aes256Gcm>::from_slice(key);
        let cipher = Aes256Gcm::new(key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let body = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Crypto(format!("symmetric encryption failed: {e}")))?;
        let mut out = nonce.to_vec();
        out.extend(body);
        Ok(out)
    }

    fn rsa_wrap(&self, recipient_public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        use rand::rngs::OsRng;
        use rsa::traits::PublicKeyParts;
        use rsa::{Oaep, RsaPublicKey};
        use sha2::Sha256;

        let public_key = RsaPublicKey::from_pkcs1_der(recipient_public_key)
            .or_else(|_| {
                <RsaPublicKey as rsa::pkcs8::DecodePublicKey>::from_public_key_der(
                    recipient_public_key,
                )
            })
            .map_err(|e| Error::Crypto(format!("invalid RSA public key: {e}")))?;

        // RSA-OAEP/SHA-256 can carry at most `k - 2*hLen - 2` message bytes, where `k` is the
        // modulus size. Payloads within that bound are RSA-encrypted directly; anything larger
        // goes through a freshly generated symmetric-key envelope instead.
        let max_direct_len = public_key.size().saturating_sub(2 * 32 + 2);
        let payload = if plaintext.len() <= max_direct_len {
            let ciphertext = public_key
                .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
                .map_err(|e| Error::Crypto(format!("RSA-OAEP encryption failed: {e}")))?;
            RsaPayload::Direct { ciphertext }
        } else {
            let mut symmetric_key = [0u8; 32];
            rand::RngCore::fill_bytes(&mut OsRng, &mut symmetric_key);
            let body = self.encrypt(&symmetric_key, plaintext)?;
            let wrapped_key = public_key
                .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &symmetric_key)
                .map_err(|e| Error::Crypto(format!("RSA-OAEP wrap failed: {e}")))?;
            RsaPayload::Enveloped { wrapped_key, body }
        };

        serde_json::to_vec(&payload).map_err(Error::from)
    }

    fn rsa_unwrap(&self, recipient_private_key: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
        use rsa::{Oaep, RsaPrivateKey};
        use sha2::Sha256;

        let private_key = RsaPrivateKey::from_pkcs1_der(recipient_private_key)
            .or_else(|_| {
                <RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_der(
                    recipient_private_key,
                )
            })
            .map_err(|e| Error::Crypto(format!("invalid RSA private key: {e}")))?;

        let payload: RsaPayload = serde_json::from_slice(wrapped)?;
        match payload {
            RsaPayload::Direct { ciphertext } => private_key
                .decrypt(Oaep::new::<Sha256>(), &ciphertext)
                .map_err(|e| Error::Crypto(format!("RSA-OAEP decryption failed: {e}"))),
            RsaPayload::Enveloped { wrapped_key, body } => {
                let symmetric_key = private_key
                    .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
                    .map_err(|e| Error::Crypto(format!("RSA-OAEP unwrap failed: {e}")))?;
                self.decrypt(&symmetric_key, &body)
            }
        }
    }
}

use rsa::pkcs1::{DecodePrivateKey, DecodePublicKey};

/// Wire shape for `rsa_wrap`/`rsa_unwrap`: either a message RSA-encrypted directly, or a
/// symmetric-key envelope for payloads too large for a single RSA-OAEP block.
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum RsaPayload {
    Direct { ciphertext: Vec<u8> },
    Enveloped { wrapped_key: Vec<u8>, body: Vec<u8> },
}
