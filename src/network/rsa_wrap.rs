//! Per-recipient RSA transport wrapping for `encrypted_data` in transit.
//!
//! `Entry.encrypted_data` is already application-level ciphertext; this module wraps it a
//! second time under the requesting recipient's RSA public key before it leaves the server-side
//! adapter, and unwraps it on the client side. Defense in depth: a transport-layer break still
//! leaves the original application ciphertext intact.

use crate::collaborators::CryptoProvider;
use crate::entry::{Entry, EntryMetadata};
use crate::Result;
use serde::{Deserialize, Serialize};

/// An `Entry` whose `encrypted_data` has been wrapped for one recipient. Metadata travels in
/// the clear; only the payload is doubly wrapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEncryptedEntry {
    pub metadata: EntryMetadata,
    pub wrapped_data: Vec<u8>,
}

pub fn wrap_entry(
    crypto: &dyn CryptoProvider,
    recipient_public_key: &[u8],
    entry: &Entry,
) -> Result<NetworkEncryptedEntry> {
    let wrapped_data = crypto.rsa_wrap(recipient_public_key, &entry.encrypted_data)?;
    Ok(NetworkEncryptedEntry {
        metadata: entry.metadata.clone(),
        wrapped_data,
    })
}

pub fn unwrap_entry(
    crypto: &dyn CryptoProvider,
    recipient_private_key: &[u8],
    wrapped: NetworkEncryptedEntry,
) -> Result<Entry> {
    let encrypted_data = crypto.rsa_unwrap(recipient_private_key, &wrapped.wrapped_data)?;
    Ok(Entry {
        metadata: wrapped.metadata,
        encrypted_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::DefaultCrypto;
    use crate::entry::{DocEntryBuilder, EntryType};
    use rsa::pkcs1::EncodeRsaPrivateKey;

    #[test]
    fn wrap_then_unwrap_recovers_original_payload() {
        let entry = DocEntryBuilder::new(
            EntryType::DocChange,
            "doc1",
            "c1",
            vec![],
            vec![],
            1,
            "ed25519:test",
            "key1",
        )
        .unwrap()
        .build(vec![10, 20, 30], vec![1, 2], 3);

        let mut rng = rand::thread_rng();
        let private_key = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = rsa::RsaPublicKey::from(&private_key);
        use rsa::pkcs1::EncodeRsaPublicKey;
        let public_der = public_key.to_pkcs1_der().unwrap().as_bytes().to_vec();
        let private_der = private_key.to_pkcs1_der().unwrap().as_bytes().to_vec();

        let crypto = DefaultCrypto::new();
        let wrapped = wrap_entry(&crypto, &public_der, &entry).unwrap();
        assert_eq!(wrapped.metadata, entry.metadata);

        let unwrapped = unwrap_entry(&crypto, &private_der, wrapped).unwrap();
        assert_eq!(unwrapped, entry);
    }
}
