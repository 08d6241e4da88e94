use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered OAuth 2.0 client with a single exact-match redirect URI.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthClient {
    pub id: String,
    pub secret: String,
    pub redirect_uri: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    #[serde(rename = "S256")]
    S256,
    #[serde(rename = "PLAIN")]
    Plain,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "S256",
            CodeChallengeMethod::Plain => "PLAIN",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "S256" => Some(CodeChallengeMethod::S256),
            "PLAIN" => Some(CodeChallengeMethod::Plain),
            _ => None,
        }
    }
}

/// A single-use authorization code bound to a PKCE challenge.
#[derive(Debug, Clone)]
pub struct AuthCode {
    pub code: String,
    pub client_id: String,
    pub code_challenge: String,
    pub code_challenge_method: CodeChallengeMethod,
    pub redirect_uri: String,
    pub user_id: String,
    pub roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_method_parsing() {
        assert_eq!(CodeChallengeMethod::parse("S256"), Some(CodeChallengeMethod::S256));
        assert_eq!(CodeChallengeMethod::parse("PLAIN"), Some(CodeChallengeMethod::Plain));
        assert_eq!(CodeChallengeMethod::parse("s256"), None);
        assert_eq!(CodeChallengeMethod::parse("none"), None);
    }
}
