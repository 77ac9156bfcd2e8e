//! Static AWS credentials.
//!
//! Function runtimes export the execution role's temporary credentials as
//! environment variables; nothing else is consulted.

use thiserror::Error;

/// A credential variable the runtime did not provide.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing AWS credential variable {0}")]
pub struct MissingCredentials(pub &'static str);

/// Access key pair plus optional session token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, MissingCredentials> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, MissingCredentials> {
        let access_key_id =
            var("AWS_ACCESS_KEY_ID").ok_or(MissingCredentials("AWS_ACCESS_KEY_ID"))?;
        let secret_access_key =
            var("AWS_SECRET_ACCESS_KEY").ok_or(MissingCredentials("AWS_SECRET_ACCESS_KEY"))?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: var("AWS_SESSION_TOKEN").filter(|t| !t.is_empty()),
        })
    }
}

// Never log secrets.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars() {
        let creds = Credentials::from_vars(|name| match name {
            "AWS_ACCESS_KEY_ID" => Some("AKID".into()),
            "AWS_SECRET_ACCESS_KEY" => Some("secret".into()),
            "AWS_SESSION_TOKEN" => Some(String::new()),
            _ => None,
        })
        .unwrap();
        assert_eq!(creds.access_key_id, "AKID");
        assert_eq!(creds.session_token, None);
    }

    #[test]
    fn test_missing_secret() {
        let err = Credentials::from_vars(|name| {
            (name == "AWS_ACCESS_KEY_ID").then(|| "AKID".to_string())
        })
        .unwrap_err();
        assert_eq!(err, MissingCredentials("AWS_SECRET_ACCESS_KEY"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("AKID", "super-secret", Some("token".into()));
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("\"token\""));
    }
}
