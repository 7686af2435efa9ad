//! Authorization grants (codes) and the redirect URI allow-list rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// OAuth Authorization Code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    /// The authorization code
    pub code: String,
    /// User ID that authorized this code
    pub user_id: String,
    /// Client ID that requested this code
    pub client_id: String,
    /// Expiration timestamp; a grant without one is never usable
    pub expires: Option<DateTime<Utc>>,
    /// Space-separated redirect URIs presented at the authorize step
    pub redirect_uris: String,
    /// Opaque client state, echoed back unmodified
    pub state: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Grant {
    /// Returns true once `now` reaches the expiry, or when no expiry is set.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires {
            Some(expires) => now >= expires,
            None => true,
        }
    }

    /// Check a candidate redirect URI against this grant's allow-list.
    pub fn redirect_uri_allowed(&self, candidate: &str) -> bool {
        redirect_uri_allowed(self.redirect_uris.split_whitespace(), candidate)
    }
}

/// Check `candidate` against an allow-list of redirect URIs.
///
/// An entry matches when scheme, host, port and path are equal and every query
/// pair of the entry also appears on the candidate. Extra query pairs on the
/// candidate are tolerated.
pub fn redirect_uri_allowed<'a, I>(allowed_uris: I, candidate: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let Ok(candidate) = Url::parse(candidate) else {
        return false;
    };
    let candidate_query = query_set(&candidate);

    allowed_uris.into_iter().any(|allowed| {
        let Ok(allowed) = Url::parse(allowed) else {
            return false;
        };
        allowed.scheme() == candidate.scheme()
            && allowed.host_str() == candidate.host_str()
            && allowed.port_or_known_default() == candidate.port_or_known_default()
            && allowed.path() == candidate.path()
            && query_set(&allowed).is_subset(&candidate_query)
    })
}

fn query_set(url: &Url) -> HashSet<(String, String)> {
    url.query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(redirect_uris: &str, expires: Option<DateTime<Utc>>) -> Grant {
        Grant {
            code: "test-code".to_string(),
            user_id: "test-user".to_string(),
            client_id: "test-client".to_string(),
            expires,
            redirect_uris: redirect_uris.to_string(),
            state: Some("xyz".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_grant_expiry() {
        let now = Utc::now();
        assert!(grant("https://a.com/cb", Some(now - Duration::seconds(1))).is_expired(now));
        assert!(grant("https://a.com/cb", Some(now)).is_expired(now));
        assert!(!grant("https://a.com/cb", Some(now + Duration::minutes(1))).is_expired(now));
        assert!(grant("https://a.com/cb", None).is_expired(now));
    }

    #[test]
    fn test_redirect_query_subset() {
        let grant = grant("https://a.com/cb?x=1", None);
        assert!(grant.redirect_uri_allowed("https://a.com/cb?x=1"));
        assert!(grant.redirect_uri_allowed("https://a.com/cb?x=1&y=2"));
        assert!(grant.redirect_uri_allowed("https://a.com/cb?y=2&x=1"));
        assert!(!grant.redirect_uri_allowed("https://a.com/cb?y=2"));
        assert!(!grant.redirect_uri_allowed("https://a.com/cb?x=2"));
        assert!(!grant.redirect_uri_allowed("https://a.com/cb"));
    }

    #[test]
    fn test_redirect_components_must_match() {
        let grant = grant("https://a.com/cb", None);
        assert!(grant.redirect_uri_allowed("https://a.com/cb"));
        assert!(!grant.redirect_uri_allowed("https://a.com/other"));
        assert!(!grant.redirect_uri_allowed("http://a.com/cb"));
        assert!(!grant.redirect_uri_allowed("https://b.com/cb"));
        assert!(!grant.redirect_uri_allowed("https://a.com:8443/cb"));
        assert!(grant.redirect_uri_allowed("https://a.com:443/cb"));
        assert!(!grant.redirect_uri_allowed("not a uri"));
    }

    #[test]
    fn test_redirect_first_full_match_wins() {
        let grant = grant(
            "https://a.com/cb?x=1 https://a.com/cb?y=2 https://b.com/return",
            None,
        );
        assert!(grant.redirect_uri_allowed("https://a.com/cb?y=2"));
        assert!(grant.redirect_uri_allowed("https://b.com/return?next=%2Fhome"));
        assert!(!grant.redirect_uri_allowed("https://a.com/cb?z=3"));
    }

    #[test]
    fn test_redirect_empty_allow_list() {
        let grant = grant("", None);
        assert!(!grant.redirect_uri_allowed("https://a.com/cb"));
    }
}
