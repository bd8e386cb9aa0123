//! Session cookie policy
//!
//! One resolved set of transport attributes, validated once at boot and applied
//! identically to every cookie the server sets or clears.

use axum::http::{header::COOKIE, HeaderMap};
use std::str::FromStr;
use time::{macros::format_description, OffsetDateTime};

use super::jwt::SessionToken;

pub const SESSION_COOKIE_NAME: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

impl FromStr for SameSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SameSite::Strict),
            "lax" => Ok(SameSite::Lax),
            "none" => Ok(SameSite::None),
            other => Err(format!("expected none, lax or strict, got {:?}", other)),
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CookiePolicyError {
    #[error("SameSite=None cookies must also be Secure")]
    InsecureCrossSite,
    #[error("invalid cookie domain: {0:?}")]
    InvalidDomain(String),
}

#[derive(Debug, Clone)]
pub struct CookiePolicy {
    name: &'static str,
    secure: bool,
    same_site: SameSite,
    domain: Option<String>,
}

impl CookiePolicy {
    /// `HttpOnly` is not configurable: page scripts never see the token.
    pub fn new(
        secure: bool,
        same_site: SameSite,
        domain: Option<String>,
    ) -> Result<Self, CookiePolicyError> {
        if same_site == SameSite::None && !secure {
            return Err(CookiePolicyError::InsecureCrossSite);
        }

        if let Some(domain) = &domain {
            let valid = !domain.is_empty()
                && domain
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
            if !valid {
                return Err(CookiePolicyError::InvalidDomain(domain.clone()));
            }
        }

        Ok(Self {
            name: SESSION_COOKIE_NAME,
            secure,
            same_site,
            domain,
        })
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn same_site(&self) -> SameSite {
        self.same_site
    }

    /// `Set-Cookie` value carrying a freshly issued token.
    ///
    /// Cookie expiry equals the token's `exp`.
    pub fn session_cookie(&self, session: &SessionToken) -> String {
        let expires_at = session.claims.expires_at();
        let max_age = (expires_at - OffsetDateTime::now_utc())
            .whole_seconds()
            .max(0);

        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}",
            self.name, session.token, max_age
        );
        if let Some(expires) = http_date(expires_at) {
            cookie.push_str("; Expires=");
            cookie.push_str(&expires);
        }
        self.push_attributes(&mut cookie);
        cookie
    }

    /// `Set-Cookie` value that deletes the session cookie
    pub fn clear_cookie(&self) -> String {
        let mut cookie = format!(
            "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            self.name
        );
        self.push_attributes(&mut cookie);
        cookie
    }

    /// Read the session token back from the request's `Cookie` headers
    pub fn extract_token(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|cookies| cookies.split(';'))
            .filter_map(|cookie| {
                let (name, value) = cookie.trim().split_once('=')?;
                (name == self.name && !value.is_empty()).then(|| value.to_string())
            })
            .next()
    }

    fn push_attributes(&self, cookie: &mut String) {
        if let Some(domain) = &self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        cookie.push_str("; HttpOnly; SameSite=");
        cookie.push_str(self.same_site.as_str());
        if self.secure {
            cookie.push_str("; Secure");
        }
    }
}

fn http_date(at: OffsetDateTime) -> Option<String> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.to_offset(time::UtcOffset::UTC).format(&format).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{JwtManager, Role, DEFAULT_SESSION_TTL};
    use axum::http::HeaderValue;
    use uuid::Uuid;

    fn session() -> SessionToken {
        JwtManager::new("cookie-test-secret-key-0123456789abcdef", DEFAULT_SESSION_TTL)
            .issue(Uuid::new_v4(), Role::Student)
            .unwrap()
    }

    #[test]
    fn test_cross_site_requires_secure() {
        assert_eq!(
            CookiePolicy::new(false, SameSite::None, None).unwrap_err(),
            CookiePolicyError::InsecureCrossSite
        );
        assert!(CookiePolicy::new(false, SameSite::Lax, None).is_ok());
        assert!(CookiePolicy::new(true, SameSite::None, None).is_ok());
    }

    #[test]
    fn test_domain_validated() {
        assert!(CookiePolicy::new(true, SameSite::Lax, Some("campus.edu".into())).is_ok());
        assert!(matches!(
            CookiePolicy::new(true, SameSite::Lax, Some("evil.com; Secure".into())),
            Err(CookiePolicyError::InvalidDomain(_))
        ));
    }

    #[test]
    fn test_session_cookie_attributes() {
        let policy = CookiePolicy::new(true, SameSite::None, None).unwrap();
        let session = session();
        let cookie = policy.session_cookie(&session);

        assert!(cookie.starts_with(&format!("token={};", session.token)));
        assert!(cookie.contains("; HttpOnly"));
        assert!(cookie.contains("; SameSite=None"));
        assert!(cookie.ends_with("; Secure"));
        assert!(cookie.contains("; Path=/"));
        assert_eq!(cookie.matches("Secure").count(), 1);
    }

    #[test]
    fn test_cookie_lifetime_matches_token_expiry() {
        let policy = CookiePolicy::new(true, SameSite::None, None).unwrap();
        let session = session();
        let cookie = policy.session_cookie(&session);

        let max_age: i64 = cookie
            .split("; ")
            .find_map(|attr| attr.strip_prefix("Max-Age="))
            .unwrap()
            .parse()
            .unwrap();
        let ttl = DEFAULT_SESSION_TTL.whole_seconds();
        assert!((ttl - 2..=ttl).contains(&max_age), "max_age = {}", max_age);

        let expires = http_date(session.claims.expires_at()).unwrap();
        assert!(cookie.contains(&format!("Expires={}", expires)));
        assert!(expires.ends_with(" GMT"));
    }

    #[test]
    fn test_development_policy_omits_secure() {
        let policy = CookiePolicy::new(false, SameSite::Lax, None).unwrap();
        let cookie = policy.session_cookie(&session());
        assert!(!cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Lax"));
    }

    #[test]
    fn test_clear_cookie_matches_session_attributes() {
        let policy = CookiePolicy::new(true, SameSite::None, Some("campus.edu".into())).unwrap();
        let cleared = policy.clear_cookie();

        assert!(cleared.starts_with("token=;"));
        assert!(cleared.contains("Max-Age=0"));
        assert!(cleared.contains("; Domain=campus.edu"));
        assert!(cleared.contains("; HttpOnly; SameSite=None; Secure"));
    }

    #[test]
    fn test_extract_token_from_cookie_header() {
        let policy = CookiePolicy::new(true, SameSite::None, None).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; token=abc.def.ghi; other=1"),
        );
        assert_eq!(policy.extract_token(&headers).as_deref(), Some("abc.def.ghi"));

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("mytoken=nope; token="));
        assert_eq!(policy.extract_token(&headers), None);

        assert_eq!(policy.extract_token(&HeaderMap::new()), None);
    }
}
