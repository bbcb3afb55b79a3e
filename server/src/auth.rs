use crate::config::ConfigError;
use crate::error::CmsError;
use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "auth_token";
pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Password gate for the admin surface.
///
/// A session is the cookie `auth_token = {expiry}.{hex mac}`, where the MAC
/// covers the expiry in unix seconds. Nothing is stored server side.
#[derive(Clone)]
pub struct AuthGate {
    mac: HmacSha256,
    password: String,
    secure: bool,
}

impl AuthGate {
    pub fn new(password: &str, secret: &str, secure: bool) -> Result<Self, ConfigError> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| ConfigError::Invalid {
            key: "SESSION_SECRET",
            value: "<redacted>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(AuthGate {
            mac,
            password: password.to_string(),
            secure,
        })
    }

    /// Checks `password` and returns the `Set-Cookie` value for a new session.
    pub fn login(&self, password: &str) -> Result<String, CmsError> {
        if !self.password_matches(password) {
            warn!("login rejected");
            return Err(CmsError::Unauthorized);
        }
        let token = self.issue_token(Utc::now().timestamp() + SESSION_TTL_SECS);
        Ok(self.cookie(&token, SESSION_TTL_SECS))
    }

    /// `Set-Cookie` value that clears the session.
    pub fn logout_cookie(&self) -> String {
        self.cookie("", 0)
    }

    fn cookie(&self, value: &str, max_age: i64) -> String {
        let mut cookie =
            format!("{SESSION_COOKIE}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}");
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Compares MACs of both sides so the comparison runs in constant time.
    fn password_matches(&self, candidate: &str) -> bool {
        let mut expected = self.mac.clone();
        expected.update(b"password:");
        expected.update(self.password.as_bytes());
        let expected = expected.finalize().into_bytes();

        let mut given = self.mac.clone();
        given.update(b"password:");
        given.update(candidate.as_bytes());
        given.verify_slice(&expected).is_ok()
    }

    fn sign(&self, expiry: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(expiry.to_string().as_bytes());
        mac
    }

    pub fn issue_token(&self, expiry: i64) -> String {
        let tag = self.sign(expiry).finalize().into_bytes();
        format!("{expiry}.{}", hex::encode(tag))
    }

    /// True when `token` carries our MAC and has not expired at `now` (unix seconds).
    pub fn verify_token(&self, token: &str, now: i64) -> bool {
        let Some((expiry, tag)) = token.split_once('.') else {
            return false;
        };
        let (Ok(expiry), Ok(tag)) = (expiry.parse::<i64>(), hex::decode(tag)) else {
            return false;
        };
        if expiry <= now {
            debug!(expiry, "session expired");
            return false;
        }
        self.sign(expiry).verify_slice(&tag).is_ok()
    }

    /// Whether the request carries a valid session cookie.
    pub fn check(&self, headers: &HeaderMap) -> bool {
        cookie_value(headers, SESSION_COOKIE)
            .is_some_and(|token| self.verify_token(&token, Utc::now().timestamp()))
    }
}

/// First value of cookie `name` across all `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
}
