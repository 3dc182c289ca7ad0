//! Cookie-based user identification (§6): the browser carries an opaque
//! `user_id` signed with the server's session secret, so a restart can't be
//! tricked into adopting an attacker-chosen id. There is no login flow —
//! any bearer of a validly-signed cookie, or none at all, is treated as
//! that user (or a fresh one).

use hmac::{Hmac, Mac};
use sha2::Sha256;

const COOKIE_NAME: &str = "sa_user";

type HmacSha256 = Hmac<Sha256>;

fn sign(secret: &str, user_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(user_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Build a `Set-Cookie` header value for `user_id`.
pub fn set_cookie_header(secret: &str, user_id: &str) -> String {
    let sig = sign(secret, user_id);
    format!("{COOKIE_NAME}={user_id}.{sig}; Path=/; HttpOnly; SameSite=Lax")
}

/// Extract and verify the user id carried by the `Cookie` header, if any.
pub fn extract_user_id(secret: &str, cookie_header: Option<&str>) -> Option<String> {
    let header = cookie_header?;
    let value = header.split(';').map(|p| p.trim()).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == COOKIE_NAME).then(|| value.to_string())
    })?;
    let (user_id, sig) = value.split_once('.')?;
    if sign(secret, user_id) == sig {
        Some(user_id.to_string())
    } else {
        None
    }
}

/// Resolve the request's user id, generating and signing a fresh one if the
/// cookie is absent or invalid. The second element is `Some(Set-Cookie ...)`
/// only when a new id had to be minted.
pub fn resolve_or_mint(secret: &str, cookie_header: Option<&str>) -> (String, Option<String>) {
    match extract_user_id(secret, cookie_header) {
        Some(id) => (id, None),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            let header = set_cookie_header(secret, &id);
            (id, Some(header))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_signed_cookie() {
        let header = set_cookie_header("secret", "user-1");
        let cookie_header = format!("other=x; {}", header.split(';').next().unwrap());
        assert_eq!(
            extract_user_id("secret", Some(&cookie_header)),
            Some("user-1".to_string())
        );
    }

    #[test]
    fn rejects_tampered_signature() {
        let tampered = "sa_user=user-1.deadbeef";
        assert_eq!(extract_user_id("secret", Some(tampered)), None);
    }

    #[test]
    fn missing_cookie_mints_a_fresh_id() {
        let (id, set) = resolve_or_mint("secret", None);
        assert!(!id.is_empty());
        assert!(set.is_some());
    }

    #[test]
    fn valid_cookie_is_reused_without_reminting() {
        let header = set_cookie_header("secret", "user-1");
        let cookie_header = header.split(';').next().unwrap().to_string();
        let (id, set) = resolve_or_mint("secret", Some(&cookie_header));
        assert_eq!(id, "user-1");
        assert!(set.is_none());
    }
}
