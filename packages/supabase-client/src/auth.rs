//! GoTrue password sign-in and session handling.

use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{check_status, Result, SupabaseClient};

/// Signed-in user as returned by GoTrue.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
}

/// An authenticated session.
#[derive(Clone, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub expires_at: Option<i64>,
    pub user: User,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

impl SupabaseClient {
    /// Sign in with email and password. The session is kept on the client
    /// and used for every subsequent request.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretBox<str>,
    ) -> Result<Session> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let body = PasswordGrant {
            email,
            password: password.expose_secret(),
        };
        let resp = self
            .authorize(self.http().post(url))
            .json(&body)
            .send()
            .await?;
        let session: Session = check_status(resp).await?.json().await?;

        tracing::info!(user_id = %session.user.id, "Signed in");
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    /// Revoke the current session server-side and forget it locally.
    ///
    /// The local session is cleared even if the logout request fails.
    pub async fn sign_out(&self) -> Result<()> {
        if self.session().is_none() {
            return Ok(());
        }
        let url = self.endpoint("auth/v1/logout")?;
        let result = self.authorize(self.http().post(url)).send().await;
        self.set_session(None);
        check_status(result?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_parses_gotrue_response() {
        let body = serde_json::json!({
            "access_token": "jwt",
            "refresh_token": "refresh",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1_700_000_000,
            "user": { "id": "5b1f0c2e-0000-4000-8000-000000000001", "email": "a@b.c", "role": "authenticated" }
        });
        let session: Session = serde_json::from_value(body).unwrap();
        assert_eq!(session.user.id, "5b1f0c2e-0000-4000-8000-000000000001");
        assert_eq!(session.expires_in, 3600);
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = Session {
            access_token: "secret-jwt".into(),
            refresh_token: "secret-refresh".into(),
            token_type: "bearer".into(),
            expires_in: 3600,
            expires_at: None,
            user: User {
                id: "u1".into(),
                email: None,
            },
        };
        let debug = format!("{:?}", session);
        assert!(!debug.contains("secret-jwt"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("u1"));
    }

    #[tokio::test]
    async fn test_sign_out_without_session_is_noop() {
        let client = SupabaseClient::new("http://127.0.0.1:9", "anon").unwrap();
        tokio_test::assert_ok!(client.sign_out().await);
    }
}
