use mindoodb::collaborators::{CryptoProvider, DefaultCrypto};
use mindoodb::entry::{DocEntryBuilder, Entry, EntryType};

pub const SYMMETRIC_KEY: [u8; 32] = [7u8; 32];

/// Build a signed, encrypted `doc_change` entry using a throwaway keypair.
pub fn build_entry(
    crypto: &DefaultCrypto,
    signing_key: &ed25519_dalek::SigningKey,
    public_key: &str,
    doc_id: &str,
    change_hash: &str,
    created_at: i64,
    plaintext: &[u8],
) -> Entry {
    let ciphertext = crypto.encrypt(&SYMMETRIC_KEY, plaintext).unwrap();
    let signature = DefaultCrypto::sign(signing_key, &ciphertext);
    DocEntryBuilder::new(
        EntryType::DocChange,
        doc_id,
        change_hash,
        vec![],
        vec![],
        created_at,
        public_key,
        "key1",
    )
    .unwrap()
    .build(ciphertext, signature, plaintext.len() as u64)
}
