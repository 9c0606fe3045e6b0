//! Token codec: authenticates everything the bridge hands out or stores.
//!
//! Three independent keys are derived from one operator secret:
//!
//! - **Token signing**: the blob the browser carries in `?challenge=` is
//!   `base64url(token ‖ expires_at).base64url(HMAC-SHA256)`. It binds the
//!   token to its expiry and carries nothing else, so it can be checked
//!   without a store lookup and leaks no identity or scope data.
//! - **Record sealing**: stored challenges are `bincode` serialized and
//!   encrypted with AES-256-GCM under a fresh 96-bit nonce.
//! - **Session signing**: the session cookie is `<uuid>.<base64url(HMAC)>`.
//!
//! Every decode failure (bad base64, wrong length, bad MAC, failed AEAD tag)
//! collapses to [`IdpError::Invalid`].
//!
//! # Example
//!
//! ```
//! use idp_bridge::codec::TokenCodec;
//! use idp_bridge::{Challenge, Validity};
//! use chrono::{Duration, Utc};
//!
//! # fn example() -> idp_bridge::Result<()> {
//! let codec = TokenCodec::new(b"0123456789abcdef0123456789abcdef")?;
//! let now = Utc::now();
//! let challenge = Challenge::pending("ref", "client", vec![], Validity::starting_at(now, Duration::minutes(10)));
//!
//! let blob = codec.encode_token(&challenge)?;
//! let (token, _expires_at) = codec.decode_token(&blob, now)?;
//! assert_eq!(token, challenge.token);
//! # Ok(())
//! # }
//! ```

use crate::error::{IdpError, Result};
use crate::state::{Challenge, ChallengeToken, SessionId, SignedToken};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted length of the operator secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const EXPIRY_LEN: usize = 8;

const TOKEN_DOMAIN: &[u8] = b"idp-bridge/v1/challenge-token";
const RECORD_DOMAIN: &[u8] = b"idp-bridge/v1/challenge-record";
const SESSION_DOMAIN: &[u8] = b"idp-bridge/v1/session-cookie";

/// Signs tokens and session ids, seals stored records.
#[derive(Clone)]
pub struct TokenCodec {
    token_key: [u8; 32],
    session_key: [u8; 32],
    /// Shared across clones; every seal draws a fresh nonce.
    cipher: Arc<Aes256Gcm>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Derive the codec keys from `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Configuration`] if `secret` is shorter than
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(IdpError::Configuration(format!(
                "secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }

        let record_key = derive_key(RECORD_DOMAIN, secret);
        let cipher = Aes256Gcm::new_from_slice(&record_key).map_err(|e| {
            IdpError::Configuration(format!("Failed to initialize AES-256-GCM cipher: {e}"))
        })?;

        Ok(Self {
            token_key: derive_key(TOKEN_DOMAIN, secret),
            session_key: derive_key(SESSION_DOMAIN, secret),
            cipher: Arc::new(cipher),
        })
    }

    // ═══════════════════════════════════════════════════════════
    // Browser-facing tokens
    // ═══════════════════════════════════════════════════════════

    /// Produce the signed blob for `challenge`.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Internal`] if the MAC cannot be keyed.
    pub fn encode_token(&self, challenge: &Challenge) -> Result<SignedToken> {
        let mut payload = Vec::with_capacity(challenge.token.as_str().len() + EXPIRY_LEN);
        payload.extend_from_slice(challenge.token.as_str().as_bytes());
        payload.extend_from_slice(&challenge.expires_at.timestamp().to_be_bytes());

        let tag = mac(&self.token_key, &payload)?.finalize().into_bytes();

        Ok(SignedToken::new(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag)
        )))
    }

    /// Verify `blob` and return the token it names and its expiry.
    ///
    /// The MAC is checked in constant time before anything is parsed.
    ///
    /// # Errors
    ///
    /// - [`IdpError::Invalid`] for malformed or tampered blobs
    /// - [`IdpError::Expired`] if the embedded expiry is at or before `now`
    pub fn decode_token(
        &self,
        blob: &SignedToken,
        now: DateTime<Utc>,
    ) -> Result<(ChallengeToken, DateTime<Utc>)> {
        let (token, expires_at) = self.verify_token(blob)?;
        if expires_at <= now {
            return Err(IdpError::Expired);
        }
        Ok((token, expires_at))
    }

    /// Verify `blob` without judging its expiry.
    ///
    /// Lets the caller clean up after a token it has established is genuine
    /// but stale.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Invalid`] for malformed or tampered blobs.
    pub fn verify_token(&self, blob: &SignedToken) -> Result<(ChallengeToken, DateTime<Utc>)> {
        let (payload, tag) = split_signed(blob.as_str())?;

        mac(&self.token_key, &payload)?
            .verify_slice(&tag)
            .map_err(|_| IdpError::Invalid)?;

        if payload.len() <= EXPIRY_LEN {
            return Err(IdpError::Invalid);
        }
        let (token_bytes, expiry_bytes) = payload.split_at(payload.len() - EXPIRY_LEN);
        let expiry: [u8; EXPIRY_LEN] = expiry_bytes.try_into().map_err(|_| IdpError::Invalid)?;
        let expires_at = DateTime::from_timestamp(i64::from_be_bytes(expiry), 0)
            .ok_or(IdpError::Invalid)?;
        let token = String::from_utf8(token_bytes.to_vec()).map_err(|_| IdpError::Invalid)?;

        Ok((ChallengeToken::from_verified(token), expires_at))
    }

    // ═══════════════════════════════════════════════════════════
    // Stored records
    // ═══════════════════════════════════════════════════════════

    /// Encrypt `challenge` for storage.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Serialization`] or [`IdpError::Internal`] if the
    /// record cannot be encoded or encrypted.
    pub fn seal(&self, challenge: &Challenge) -> Result<String> {
        let plaintext = bincode::serialize(challenge)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| IdpError::Internal(format!("Encryption failed: {e}")))?;

        // Format: [nonce (12 bytes)][ciphertext (variable)]
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decrypt a record produced by [`Self::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Invalid`] if the blob was altered in any way.
    pub fn open(&self, sealed: &str) -> Result<Challenge> {
        let bytes = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|_| IdpError::Invalid)?;
        if bytes.len() <= NONCE_LEN {
            return Err(IdpError::Invalid);
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| IdpError::Invalid)?;

        bincode::deserialize(&plaintext).map_err(|_| IdpError::Invalid)
    }

    // ═══════════════════════════════════════════════════════════
    // Session cookie
    // ═══════════════════════════════════════════════════════════

    /// Cookie value for `session`.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Internal`] if the MAC cannot be keyed.
    pub fn sign_session(&self, session: SessionId) -> Result<String> {
        let id = session.0.to_string();
        let tag = mac(&self.session_key, id.as_bytes())?
            .finalize()
            .into_bytes();
        Ok(format!("{id}.{}", URL_SAFE_NO_PAD.encode(tag)))
    }

    /// Recover the session id from a cookie value.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Invalid`] for malformed or forged values.
    pub fn verify_session(&self, cookie: &str) -> Result<SessionId> {
        let (id, tag) = cookie.split_once('.').ok_or(IdpError::Invalid)?;
        let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| IdpError::Invalid)?;

        mac(&self.session_key, id.as_bytes())?
            .verify_slice(&tag)
            .map_err(|_| IdpError::Invalid)?;

        uuid::Uuid::parse_str(id)
            .map(SessionId)
            .map_err(|_| IdpError::Invalid)
    }
}

fn derive_key(domain: &[u8], secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update([0u8]);
    hasher.update(secret);
    hasher.finalize().into()
}

fn mac(key: &[u8], data: &[u8]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| IdpError::Internal(format!("HMAC key error: {e}")))?;
    mac.update(data);
    Ok(mac)
}

fn split_signed(blob: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let (payload, tag) = blob.split_once('.').ok_or(IdpError::Invalid)?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| IdpError::Invalid)?;
    let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| IdpError::Invalid)?;
    Ok((payload, tag))
}
