//! Anonymous visitor sessions carried in a signed cookie.
//!
//! The cookie value is `{token}.{signature}` where the signature is the
//! hex-encoded HMAC-SHA256 of the token under the server's session secret.
//! A cookie that is missing, malformed or signed with another key is treated
//! as absent and a new token is minted.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "research_session";

/// Signs and verifies session tokens.
#[derive(Clone)]
pub struct SessionSigner {
    secret: Vec<u8>,
}

impl SessionSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }

    /// A fresh random token.
    pub fn new_token() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Cookie value for `token`.
    pub fn sign(&self, token: &str) -> String {
        let mut mac = self.mac();
        mac.update(token.as_bytes());
        format!("{}.{}", token, hex::encode(mac.finalize().into_bytes()))
    }

    /// Returns the token when `value` carries a valid signature.
    pub fn verify(&self, value: &str) -> Option<String> {
        let (token, signature) = value.rsplit_once('.')?;
        if token.is_empty() {
            return None;
        }
        let signature = hex::decode(signature).ok()?;
        let mut mac = self.mac();
        mac.update(token.as_bytes());
        // verify_slice compares in constant time
        mac.verify_slice(&signature).ok()?;
        Some(token.to_string())
    }

    /// Full `Set-Cookie` header value for `token`.
    pub fn set_cookie_header(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            COOKIE_NAME,
            self.sign(token)
        )
    }
}

/// Finds our cookie in a raw `Cookie` header.
pub fn cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}
