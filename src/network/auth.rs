//! Challenge-response authentication and token issuance/validation.
//!
//! Tokens are standard three-part JWTs (`header.payload.signature`, HS256) carrying
//! `{ sub, iat, exp, tenant_id, db_id? }`, issued after a client proves possession of a
//! signing key by signing a single-use, time-limited challenge.

use crate::collaborators::{CryptoProvider, Directory, PublicKeyStr};
use crate::config::AuthServiceConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Authentication failure reasons, distinguished so callers can react differently (e.g. retry
/// vs. surface to a user) and so error messages satisfy the testable-property wording
/// ("used", "expired") the store's invariants are checked against.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("challenge not found")]
    ChallengeNotFound,
    #[error("challenge expired")]
    ChallengeExpired,
    #[error("challenge already used")]
    ChallengeUsed,
    #[error("user not found")]
    UserNotFound,
    #[error("user revoked")]
    UserRevoked,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
}

#[derive(Debug, Clone)]
struct ChallengeRecord {
    user: String,
    expires_at: i64,
    used: bool,
}

/// Claims carried by an issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub tenant_id: String,
    pub db_id: Option<String>,
}

pub struct AuthService {
    directory: Arc<dyn Directory>,
    config: AuthServiceConfig,
    challenges: Mutex<HashMap<String, ChallengeRecord>>,
}

impl AuthService {
    pub fn new(directory: Arc<dyn Directory>, config: AuthServiceConfig) -> Self {
        Self {
            directory,
            config,
            challenges: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a single-use challenge for `user`, sweeping expired challenges opportunistically.
    pub fn generate_challenge(&self, user: &str) -> Result<String, AuthError> {
        if !self.directory.user_exists(user) {
            return Err(AuthError::UserNotFound);
        }
        if self.directory.is_revoked(user) {
            return Err(AuthError::UserRevoked);
        }

        let now = now_secs();
        let mut challenges = self.challenges.lock().unwrap();
        challenges.retain(|_, record| record.expires_at > now);

        let challenge_id = Uuid::now_v7().to_string();
        challenges.insert(
            challenge_id.clone(),
            ChallengeRecord {
                user: user.to_string(),
                expires_at: now + self.config.challenge_ttl_secs,
                used: false,
            },
        );
        Ok(challenge_id)
    }

    /// Verify `signature` over `challenge_id` under `user`'s signing key, mark the challenge
    /// used, and issue a token on success.
    pub fn authenticate(
        &self,
        challenge_id: &str,
        signature: &[u8],
        crypto: &dyn CryptoProvider,
        db_id: Option<String>,
    ) -> Result<String, AuthError> {
        let user = {
            let mut challenges = self.challenges.lock().unwrap();
            let record = challenges
                .get_mut(challenge_id)
                .ok_or(AuthError::ChallengeNotFound)?;

            if record.used {
                return Err(AuthError::ChallengeUsed);
            }
            if record.expires_at <= now_secs() {
                return Err(AuthError::ChallengeExpired);
            }
            record.used = true;
            record.user.clone()
        };

        if self.directory.is_revoked(&user) {
            return Err(AuthError::UserRevoked);
        }
        let public_key: PublicKeyStr = self
            .directory
            .signing_public_key(&user)
            .ok_or(AuthError::UserNotFound)?;

        let verified = crypto
            .verify(&public_key, challenge_id.as_bytes(), signature)
            .map_err(|_| AuthError::InvalidSignature)?;
        if !verified {
            return Err(AuthError::InvalidSignature);
        }

        self.issue_token(&user, db_id)
    }

    fn issue_token(&self, user: &str, db_id: Option<String>) -> Result<String, AuthError> {
        let now = now_secs();
        let claims = TokenClaims {
            sub: user.to_string(),
            iat: now,
            exp: now + self.config.token_ttl_secs,
            tenant_id: self.config.tenant_id.clone(),
            db_id,
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|_| AuthError::InvalidToken)
    }

    /// MAC check, then expiry check, then directory revocation check.
    pub fn validate_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = false; // checked explicitly below so we can tell apart MAC vs expiry failures
        let data = jsonwebtoken::decode::<TokenClaims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|_| AuthError::InvalidToken)?;

        if data.claims.exp <= now_secs() {
            return Err(AuthError::TokenExpired);
        }
        if self.directory.is_revoked(&data.claims.sub) {
            return Err(AuthError::UserRevoked);
        }
        Ok(data.claims)
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DefaultCrypto, InMemoryDirectory};

    fn service() -> (AuthService, ed25519_dalek::SigningKey) {
        let (signing_key, verifying_key) = DefaultCrypto::generate_signing_keypair();
        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_user(
            "alice",
            DefaultCrypto::format_public_key(&verifying_key),
            vec![],
        );
        let config = AuthServiceConfig::new("tenant-a", "test-secret");
        (AuthService::new(directory, config), signing_key)
    }

    #[test]
    fn full_challenge_response_round_trip_issues_valid_token() {
        let (service, signing_key) = service();
        let crypto = DefaultCrypto::new();
        let challenge = service.generate_challenge("alice").unwrap();
        let signature = DefaultCrypto::sign(&signing_key, challenge.as_bytes());

        let token = service
            .authenticate(&challenge, &signature, &crypto, None)
            .unwrap();
        let claims = service.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "alice");
    }

    #[test]
    fn challenge_is_single_use() {
        let (service, signing_key) = service();
        let crypto = DefaultCrypto::new();
        let challenge = service.generate_challenge("alice").unwrap();
        let signature = DefaultCrypto::sign(&signing_key, challenge.as_bytes());

        service.authenticate(&challenge, &signature, &crypto, None).unwrap();
        let second = service.authenticate(&challenge, &signature, &crypto, None);
        assert_eq!(second, Err(AuthError::ChallengeUsed));
    }

    #[test]
    fn unknown_user_cannot_request_a_challenge() {
        let (service, _) = service();
        let result = service.generate_challenge("mallory");
        assert_eq!(result, Err(AuthError::UserNotFound));
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let (service, _) = service();
        let (other_signing_key, _) = DefaultCrypto::generate_signing_keypair();
        let crypto = DefaultCrypto::new();
        let challenge = service.generate_challenge("alice").unwrap();
        let bad_signature = DefaultCrypto::sign(&other_signing_key, challenge.as_bytes());

        let result = service.authenticate(&challenge, &bad_signature, &crypto, None);
        assert_eq!(result, Err(AuthError::InvalidSignature));
    }

    #[test]
    fn revoked_user_token_fails_validation() {
        let (signing_key, verifying_key) = DefaultCrypto::generate_signing_keypair();
        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_user("alice", DefaultCrypto::format_public_key(&verifying_key), vec![]);
        let config = AuthServiceConfig::new("tenant-a", "test-secret");
        let service = AuthService::new(directory.clone(), config);
        let crypto = DefaultCrypto::new();

        let challenge = service.generate_challenge("alice").unwrap();
        let signature = DefaultCrypto::sign(&signing_key, challenge.as_bytes());
        let token = service.authenticate(&challenge, &signature, &crypto, None).unwrap();

        directory.revoke("alice");
        assert_eq!(service.validate_token(&token), Err(AuthError::UserRevoked));
    }
}
