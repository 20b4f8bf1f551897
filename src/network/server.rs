//! `ServerCasAdapter`: exposes a local `Cas` over the abstract network protocol.
//!
//! Every request carries a token minted by `AuthService`; this adapter validates it before
//! touching the underlying store, and rejects `put_entries` batches containing any entry whose
//! signer the directory doesn't trust. `get_entries` results are wrapped per-recipient via
//! `network::rsa_wrap` before leaving the adapter.

use crate::cas::Cas;
use crate::collaborators::{CryptoProvider, Directory};
use crate::network::auth::AuthService;
use crate::network::capabilities::Capabilities;
use crate::network::protocol::{AuthenticateResponse, BoundaryError, Request, Response};
use crate::network::rsa_wrap;
use std::collections::HashSet;
use std::sync::Arc;

pub struct ServerCasAdapter {
    cas: Arc<dyn Cas>,
    auth: Arc<AuthService>,
    directory: Arc<dyn Directory>,
    crypto: Arc<dyn CryptoProvider>,
}

impl ServerCasAdapter {
    pub fn new(
        cas: Arc<dyn Cas>,
        auth: Arc<AuthService>,
        directory: Arc<dyn Directory>,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Self {
        Self { cas, auth, directory, crypto }
    }

    /// Dispatch one request. `request_challenge` and `authenticate` don't require a prior token;
    /// every other variant is checked against `AuthService::validate_token` first.
    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::RequestChallenge { user } => match self.auth.generate_challenge(&user) {
                Ok(challenge_id) => Response::Challenge { challenge_id },
                Err(e) => Response::Error(e.into()),
            },
            Request::Authenticate { challenge_id, signature } => {
                match self.auth.authenticate(&challenge_id, &signature, self.crypto.as_ref(), None) {
                    Ok(token) => Response::Authenticate(AuthenticateResponse {
                        success: true,
                        token: Some(token),
                        error: None,
                    }),
                    Err(e) => Response::Authenticate(AuthenticateResponse {
                        success: false,
                        token: None,
                        error: Some(e.into()),
                    }),
                }
            }
            Request::FindNewEntries { token, known_ids } => self.with_token(&token, |_| {
                let known: HashSet<_> = known_ids.into_iter().collect();
                self.cas.find_new_entries(&known).map(Response::Entries)
            }),
            Request::FindNewEntriesForDoc { token, known_ids, doc_id } => self.with_token(&token, |_| {
                let known: HashSet<_> = known_ids.into_iter().collect();
                self.cas.find_new_entries_for_doc(&known, &doc_id).map(Response::Entries)
            }),
            Request::FindEntries { token, filters } => self.with_token(&token, |_| {
                self.cas.find_entries(&filters).map(Response::Entries)
            }),
            Request::GetEntries { token, ids } => self.with_token(&token, |user| {
                let recipient_key = self
                    .directory
                    .encryption_public_key(&user)
                    .ok_or(crate::Error::NotFound(user.clone()))?;
                let entries = self.cas.get_entries(&ids)?;
                let wrapped: Result<Vec<_>, _> = entries
                    .iter()
                    .map(|entry| rsa_wrap::wrap_entry(self.crypto.as_ref(), &recipient_key, entry))
                    .collect();
                Ok(Response::NetworkEntries(wrapped?))
            }),
            Request::PutEntries { token, entries } => self.with_token(&token, |_| {
                for entry in &entries {
                    if !self.directory.is_trusted_signer(&entry.metadata.created_by_public_key) {
                        return Err(crate::Error::InvalidOperation(format!(
                            "untrusted signer for entry {}",
                            entry.metadata.id
                        )));
                    }
                }
                self.cas.put_entries(entries)?;
                Ok(Response::Ok)
            }),
            Request::HasEntries { token, ids } => {
                self.with_token(&token, |_| self.cas.has_entries(&ids).map(Response::Ids))
            }
            Request::GetAllIds { token } => {
                self.with_token(&token, |_| self.cas.get_all_ids().map(Response::Ids))
            }
            Request::ResolveDependencies { token, start_id, opts } => self.with_token(&token, |_| {
                self.cas.resolve_dependencies(&start_id, &opts).map(Response::Ids)
            }),
            Request::ScanEntriesSince { token, cursor, limit, filters } => self.with_token(&token, |_| {
                self.cas
                    .scan_entries_since(cursor, limit, filters.as_ref())
                    .map(Response::Scan)
            }),
            Request::GetIdBloomSummary { token } => self.with_token(&token, |_| {
                self.cas.get_id_bloom_summary().map(Response::Bloom)
            }),
            Request::GetCapabilities { token } => {
                self.with_token(&token, |_| Ok(Response::Capabilities(Capabilities::current())))
            }
            Request::GetCompactionStatus { token } => self.with_token(&token, |_| {
                self.cas.get_compaction_status().map(Response::CompactionStatus)
            }),
        }
    }

    fn with_token(
        &self,
        token: &str,
        op: impl FnOnce(String) -> crate::Result<Response>,
    ) -> Response {
        match self.auth.validate_token(token) {
            Ok(claims) => match op(claims.sub) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "request failed after successful authentication");
                    Response::Error(e.into())
                }
            },
            Err(e) => Response::Error(BoundaryError::from(e)),
        }
    }
}
