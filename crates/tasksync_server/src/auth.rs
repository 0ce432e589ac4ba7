//! Authentication support for the record store.
//!
//! Bearer tokens and anti-forgery tokens are both signed with HMAC-SHA256
//! under the server secret.
//!
//! ## Token Format
//!
//! Bearer: `base64url(user_id) "." issued_at_millis "." base64url(signature)`
//! where the signature covers `"bearer:" user_id ":" issued_at_millis`.
//!
//! Anti-forgery: `base64url(nonce) "." base64url(signature)` with a 16 byte
//! random nonce and the signature covering `"csrf:" nonce`. The same value is
//! set as a cookie and must be echoed in a header (double submit).

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Issues and validates signed tokens.
#[derive(Clone)]
pub struct TokenValidator {
    secret: Vec<u8>,
    token_expiry: Duration,
}

impl TokenValidator {
    /// Creates a validator signing with `secret`.
    pub fn new(secret: Vec<u8>, token_expiry: Duration) -> Self {
        Self {
            secret,
            token_expiry,
        }
    }

    /// Issues a bearer token for `user_id`.
    pub fn create_token(&self, user_id: &str) -> ServerResult<String> {
        self.create_token_at(user_id, now_millis())
    }

    fn create_token_at(&self, user_id: &str, issued_at: u64) -> ServerResult<String> {
        let signature = self.sign(format!("bearer:{user_id}:{issued_at}").as_bytes())?;
        Ok(format!(
            "{}.{issued_at}.{}",
            URL_SAFE_NO_PAD.encode(user_id),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Validates a bearer token, returning the user it was issued to.
    pub fn validate_token(&self, token: &str) -> ServerResult<String> {
        let invalid = || ServerError::NotAuthenticated("invalid token".into());

        let mut parts = token.split('.');
        let (Some(user), Some(issued_at), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let user_id = URL_SAFE_NO_PAD
            .decode(user)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(invalid)?;
        let issued_at: u64 = issued_at.parse().map_err(|_| invalid())?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;

        self.verify(format!("bearer:{user_id}:{issued_at}").as_bytes(), &signature)
            .map_err(|_| invalid())?;

        let expiry = self.token_expiry.as_millis() as u64;
        if now_millis() > issued_at.saturating_add(expiry) {
            return Err(ServerError::NotAuthenticated("token expired".into()));
        }
        Ok(user_id)
    }

    /// Issues an anti-forgery token.
    pub fn create_csrf(&self) -> ServerResult<String> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = URL_SAFE_NO_PAD.encode(nonce);
        let signature = self.sign(format!("csrf:{nonce}").as_bytes())?;
        Ok(format!("{nonce}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Checks that the header echoes the cookie and that the token is ours.
    pub fn validate_csrf(&self, header: Option<&str>, cookie: Option<&str>) -> ServerResult<()> {
        let header = header.ok_or_else(|| ServerError::Forbidden("missing csrf header".into()))?;
        let cookie = cookie.ok_or_else(|| ServerError::Forbidden("missing csrf cookie".into()))?;
        if header != cookie {
            return Err(ServerError::Forbidden("csrf token mismatch".into()));
        }
        let invalid = || ServerError::Forbidden("invalid csrf token".into());
        let (nonce, signature) = header.split_once('.').ok_or_else(invalid)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;
        self.verify(format!("csrf:{nonce}").as_bytes(), &signature)
            .map_err(|_| invalid())
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| ServerError::Internal(e.to_string()))
    }

    fn sign(&self, data: &[u8]) -> ServerResult<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> ServerResult<()> {
        let mut mac = self.mac()?;
        mac.update(data);
        mac.verify_slice(signature)
            .map_err(|_| ServerError::NotAuthenticated("bad signature".into()))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
