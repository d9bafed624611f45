//! Controller credentials and sessions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Username/password pair supplied by the surrounding configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Login name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create credentials
    #[inline]
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authenticated controller session
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Session identifier passed on every request
    pub uid: String,
    /// CSRF token for mutating requests
    pub csrf_token: Option<String>,
}

impl Session {
    /// Create session
    #[inline]
    #[must_use]
    pub fn new(uid: impl Into<String>, csrf_token: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            csrf_token,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("uid", &"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secrets() {
        let creds = Credentials::new("admin", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));

        let session = Session::new("abc123", Some("tok".into()));
        assert!(!format!("{session:?}").contains("abc123"));
    }
}
