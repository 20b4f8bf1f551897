//! `ClientCasAdapter`: the client side of the abstract network protocol.
//!
//! Wraps a `Transport` (anything that can turn a `Request` into a `Response`), holds the current
//! token and its expiry, and re-authenticates automatically when the token is close to expiring.
//! `get_entries` unwraps the RSA transport layer before returning entries to the caller.

use crate::cas::{Cursor, ResolveOptions, ScanFilters, ScanResult};
use crate::collaborators::CryptoProvider;
use crate::entry::{Entry, EntryMetadata};
use crate::id::ID;
use crate::network::protocol::{AuthenticateResponse, Request, Response};
use crate::network::rsa_wrap;
use crate::{Error, Result};
use std::sync::Mutex;

/// Re-authenticate when less than this many seconds remain on the current token.
const TOKEN_RENEWAL_MARGIN_SECS: i64 = 60;

/// Anything that can carry a `Request` to a server and back. Implemented by whatever transport
/// a deployment chooses (HTTP, QUIC, an in-process channel for tests); this crate ships no
/// concrete transport.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> Result<Response>;
}

struct TokenState {
    token: String,
    expires_at: i64,
}

pub struct ClientCasAdapter {
    transport: Box<dyn Transport>,
    crypto: Box<dyn CryptoProvider>,
    user: String,
    sign: Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
    recipient_private_key: Vec<u8>,
    token_state: Mutex<Option<TokenState>>,
}

impl ClientCasAdapter {
    pub fn new(
        transport: Box<dyn Transport>,
        crypto: Box<dyn CryptoProvider>,
        user: impl Into<String>,
        sign: Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
        recipient_private_key: Vec<u8>,
    ) -> Self {
        Self {
            transport,
            crypto,
            user: user.into(),
            sign,
            recipient_private_key,
            token_state: Mutex::new(None),
        }
    }

    fn ensure_token(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        {
            let state = self.token_state.lock().unwrap();
            if let Some(state) = state.as_ref() {
                if state.expires_at - now > TOKEN_RENEWAL_MARGIN_SECS {
                    return Ok(state.token.clone());
                }
            }
        }

        let challenge_id = match self
            .transport
            .send(Request::RequestChallenge { user: self.user.clone() })?
        {
            Response::Challenge { challenge_id } => challenge_id,
            Response::Error(e) => return Err(Error::InvalidOperation(format!("{e:?}"))),
            other => return Err(Error::InvalidOperation(format!("unexpected response: {other:?}"))),
        };

        let signature = (self.sign)(challenge_id.as_bytes());
        let response = self.transport.send(Request::Authenticate { challenge_id, signature })?;
        let AuthenticateResponse { success, token, error } = match response {
            Response::Authenticate(inner) => inner,
            Response::Error(e) => return Err(Error::InvalidOperation(format!("{e:?}"))),
            other => return Err(Error::InvalidOperation(format!("unexpected response: {other:?}"))),
        };
        if !success {
            return Err(Error::InvalidOperation(format!("authentication failed: {error:?}")));
        }
        let token = token.ok_or_else(|| Error::InvalidOperation("missing token on success".into()))?;

        // The client never holds the signing secret, so it can't verify the token, but the
        // `exp` claim in the payload segment is plain base64url JSON and safe to read
        // unverified — the server re-validates on every call regardless. Fall back to a
        // conservative estimate only if the payload is somehow unparseable.
        let expires_at = decode_token_expiry(&token).unwrap_or(now + TOKEN_RENEWAL_MARGIN_SECS * 2);
        *self.token_state.lock().unwrap() = Some(TokenState { token: token.clone(), expires_at });
        Ok(token)
    }

    pub fn find_new_entries(&self, known_ids: Vec<ID>) -> Result<Vec<EntryMetadata>> {
        let token = self.ensure_token()?;
        match self.transport.send(Request::FindNewEntries { token, known_ids })? {
            Response::Entries(entries) => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    pub fn find_new_entries_for_doc(
        &self,
        known_ids: Vec<ID>,
        doc_id: impl Into<String>,
    ) -> Result<Vec<EntryMetadata>> {
        let token = self.ensure_token()?;
        let doc_id = doc_id.into();
        match self.transport.send(Request::FindNewEntriesForDoc { token, known_ids, doc_id })? {
            Response::Entries(entries) => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    pub fn find_entries(&self, filters: ScanFilters) -> Result<Vec<EntryMetadata>> {
        let token = self.ensure_token()?;
        match self.transport.send(Request::FindEntries { token, filters })? {
            Response::Entries(entries) => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    /// Fetch and unwrap entries. The RSA layer is removed here so callers never see
    /// `NetworkEncryptedEntry`.
    pub fn get_entries(&self, ids: Vec<ID>) -> Result<Vec<Entry>> {
        let token = self.ensure_token()?;
        match self.transport.send(Request::GetEntries { token, ids })? {
            Response::NetworkEntries(wrapped) => wrapped
                .into_iter()
                .map(|w| rsa_wrap::unwrap_entry(self.crypto.as_ref(), &self.recipient_private_key, w))
                .collect(),
            other => Err(unexpected(other)),
        }
    }

    pub fn put_entries(&self, entries: Vec<Entry>) -> Result<()> {
        let token = self.ensure_token()?;
        match self.transport.send(Request::PutEntries { token, entries })? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn has_entries(&self, ids: Vec<ID>) -> Result<Vec<ID>> {
        let token = self.ensure_token()?;
        match self.transport.send(Request::HasEntries { token, ids })? {
            Response::Ids(ids) => Ok(ids),
            other => Err(unexpected(other)),
        }
    }

    pub fn get_all_ids(&self) -> Result<Vec<ID>> {
        let token = self.ensure_token()?;
        match self.transport.send(Request::GetAllIds { token })? {
            Response::Ids(ids) => Ok(ids),
            other => Err(unexpected(other)),
        }
    }

    pub fn resolve_dependencies(&self, start_id: ID, opts: ResolveOptions) -> Result<Vec<ID>> {
        let token = self.ensure_token()?;
        match self.transport.send(Request::ResolveDependencies { token, start_id, opts })? {
            Response::Ids(ids) => Ok(ids),
            other => Err(unexpected(other)),
        }
    }

    pub fn scan_entries_since(
        &self,
        cursor: Option<Cursor>,
        limit: Option<usize>,
        filters: Option<ScanFilters>,
    ) -> Result<ScanResult> {
        let token = self.ensure_token()?;
        match self.transport.send(Request::ScanEntriesSince { token, cursor, limit, filters })? {
            Response::Scan(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }
}

/// Read the `exp` claim out of a JWT's payload segment without verifying its signature. The
/// client has no signing secret to verify against; it only needs `exp` to schedule its own
/// renewal, and the server is the sole source of truth on whether a token is actually still
/// valid.
fn decode_token_expiry(token: &str) -> Option<i64> {
    use base64ct::{Base64UrlUnpadded, Encoding};
    use crate::network::auth::TokenClaims;

    let payload = token.split('.').nth(1)?;
    let bytes = Base64UrlUnpadded::decode_vec(payload).ok()?;
    let claims: TokenClaims = serde_json::from_slice(&bytes).ok()?;
    Some(claims.exp)
}

fn unexpected(response: Response) -> Error {
    match response {
        Response::Error(e) => Error::InvalidOperation(format!("server error: {e:?}")),
        other => Error::InvalidOperation(format!("unexpected response: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::Cas;
    use crate::cas::InMemoryCas;
    use crate::collaborators::{DefaultCrypto, InMemoryDirectory};
    use crate::config::AuthServiceConfig;
    use crate::network::auth::AuthService;
    use crate::network::server::ServerCasAdapter;
    use std::sync::Arc;

    struct InProcessTransport {
        adapter: ServerCasAdapter,
    }

    impl Transport for InProcessTransport {
        fn send(&self, request: Request) -> Result<Response> {
            Ok(self.adapter.handle(request))
        }
    }

    #[test]
    fn client_authenticates_and_round_trips_entries() {
        let (signing_key, verifying_key) = DefaultCrypto::generate_signing_keypair();
        use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
        let mut rng = rand::thread_rng();
        let rsa_private = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let rsa_public = rsa::RsaPublicKey::from(&rsa_private);
        let rsa_public_der = rsa_public.to_pkcs1_der().unwrap().as_bytes().to_vec();
        let rsa_private_der = rsa_private.to_pkcs1_der().unwrap().as_bytes().to_vec();

        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_user(
            "alice",
            DefaultCrypto::format_public_key(&verifying_key),
            rsa_public_der,
        );
        let cas = Arc::new(InMemoryCas::new("db1"));
        let auth = Arc::new(AuthService::new(directory.clone(), AuthServiceConfig::new("t", "secret")));
        let server_crypto: Arc<dyn CryptoProvider> = Arc::new(DefaultCrypto::new());
        let adapter = ServerCasAdapter::new(cas.clone(), auth, directory, server_crypto);
        let transport = Box::new(InProcessTransport { adapter });

        let client = ClientCasAdapter::new(
            transport,
            Box::new(DefaultCrypto::new()),
            "alice",
            Box::new(move |bytes| DefaultCrypto::sign(&signing_key, bytes)),
            rsa_private_der,
        );

        use crate::entry::{DocEntryBuilder, EntryType};
        let public_key = DefaultCrypto::format_public_key(&verifying_key);
        let entry = DocEntryBuilder::new(
            EntryType::DocCreate,
            "doc1",
            "c1",
            vec![],
            vec![],
            1,
            public_key,
            "key1",
        )
        .unwrap()
        .build(vec![10, 20], vec![1], 2);

        cas.put_entries(vec![entry.clone()]).unwrap();

        let ids = client.get_all_ids().unwrap();
        assert_eq!(ids, vec![entry.id().clone()]);

        let fetched = client.get_entries(ids).unwrap();
        assert_eq!(fetched, vec![entry]);
    }

    #[test]
    fn decode_token_expiry_reads_the_real_exp_claim() {
        let (signing_key, verifying_key) = DefaultCrypto::generate_signing_keypair();
        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_user("alice", DefaultCrypto::format_public_key(&verifying_key), vec![]);
        let auth = AuthService::new(directory, AuthServiceConfig::new("t", "secret"));
        let crypto = DefaultCrypto::new();

        let challenge = auth.generate_challenge("alice").unwrap();
        let signature = DefaultCrypto::sign(&signing_key, challenge.as_bytes());
        let token = auth.authenticate(&challenge, &signature, &crypto, None).unwrap();

        let claims = auth.validate_token(&token).unwrap();
        assert_eq!(decode_token_expiry(&token), Some(claims.exp));
    }

    #[test]
    fn decode_token_expiry_returns_none_for_garbage() {
        assert_eq!(decode_token_expiry("not-a-jwt"), None);
    }
}
