//! Browser session cookie.
//!
//! The cookie carries only a random [`SessionId`] and its HMAC, as produced by
//! [`TokenCodec::sign_session`]. Challenge records are keyed by it, so a token
//! carried into a different browser finds nothing.

use axum::http::{HeaderMap, HeaderValue, header};
use idp_bridge::{Result, SessionId, TokenCodec};

/// Cookie name.
pub const SESSION_COOKIE: &str = "idp_session";

/// Signing key and cookie attributes.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    codec: TokenCodec,
    secure: bool,
}

impl SessionKeys {
    /// Sign cookies with `codec`; mark them `Secure` when `secure`.
    #[must_use]
    pub const fn new(codec: TokenCodec, secure: bool) -> Self {
        Self { codec, secure }
    }

    /// The session named by the request's cookie, if it carries a valid one.
    #[must_use]
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<SessionId> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(name, _)| *name == SESSION_COOKIE)
            .find_map(|(_, value)| self.codec.verify_session(value).ok())
    }

    /// `Set-Cookie` value establishing `session`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie cannot be signed.
    pub fn set_cookie(&self, session: SessionId) -> Result<HeaderValue> {
        let value = self.codec.sign_session(session)?;
        let secure = if self.secure { "; Secure" } else { "" };
        HeaderValue::from_str(&format!(
            "{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax{secure}"
        ))
        .map_err(|e| idp_bridge::IdpError::Internal(format!("session cookie: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn keys(secure: bool) -> SessionKeys {
        SessionKeys::new(TokenCodec::new(&[3u8; 32]).unwrap(), secure)
    }

    fn cookie_header(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn set_cookie_round_trips_through_cookie_header() {
        let keys = keys(false);
        let session = SessionId::new();
        let set_cookie = keys.set_cookie(session).unwrap();
        let pair = set_cookie.to_str().unwrap().split(';').next().unwrap().to_string();

        let headers = cookie_header(&format!("theme=dark; {pair}; other=1"));
        assert_eq!(keys.from_headers(&headers), Some(session));
    }

    #[test]
    fn cookie_attributes() {
        let plain = keys(false).set_cookie(SessionId::new()).unwrap();
        let plain = plain.to_str().unwrap();
        assert!(plain.contains("HttpOnly"));
        assert!(plain.contains("SameSite=Lax"));
        assert!(!plain.contains("Secure"));

        let secure = keys(true).set_cookie(SessionId::new()).unwrap();
        assert!(secure.to_str().unwrap().ends_with("; Secure"));
    }

    #[test]
    fn forged_or_missing_cookie_is_ignored() {
        let keys = keys(false);
        assert_eq!(keys.from_headers(&HeaderMap::new()), None);

        let forged = format!("{SESSION_COOKIE}={}.AAAA", SessionId::new());
        assert_eq!(keys.from_headers(&cookie_header(&forged)), None);
    }

    #[test]
    fn cookie_signed_by_another_deployment_is_ignored() {
        let other = keys(false);
        let set_cookie = other.set_cookie(SessionId::new()).unwrap();
        let pair = set_cookie.to_str().unwrap().split(';').next().unwrap().to_string();

        let keys = SessionKeys::new(TokenCodec::new(&[4u8; 32]).unwrap(), false);
        assert_eq!(keys.from_headers(&cookie_header(&pair)), None);
    }
}
