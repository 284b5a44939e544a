//! Pure Supabase client.
//!
//! A minimal client for the pieces of the Supabase platform a browser-style
//! client needs: password sign-in (GoTrue), table reads and writes
//! (PostgREST), edge-function invocation, and Realtime `postgres_changes`
//! channels. No domain-specific logic lives here.
//!
//! # Example
//!
//! ```rust,ignore
//! use supabase_client::SupabaseClient;
//!
//! let client = SupabaseClient::from_env()?;
//! client.sign_in_with_password("me@example.com", &password).await?;
//!
//! let rows: Vec<serde_json::Value> = client
//!     .from("extracted_keywords")
//!     .eq("job_posting_id", 42)
//!     .order("frequency", false)
//!     .select("keyword, frequency")
//!     .await?;
//! ```

pub mod auth;
pub mod error;
pub mod functions;
pub mod postgrest;
pub mod realtime;

pub use auth::{Session, User};
pub use error::{Result, SupabaseError};
pub use postgrest::QueryBuilder;
pub use realtime::{
    ChannelEvent, ChannelHandle, PhoenixMessage, PostgresChangesFilter, RealtimeChannel,
    RealtimeClient,
};

use secrecy::{ExposeSecret, SecretBox};
use std::sync::{Arc, RwLock};
use url::Url;

/// Supabase project client.
///
/// Cheap to clone; clones share the same HTTP pool and session.
#[derive(Clone)]
pub struct SupabaseClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    anon_key: SecretBox<str>,
    session: RwLock<Option<Session>>,
}

impl SupabaseClient {
    /// Create a client for the project at `url` using its public anon key.
    pub fn new(url: &str, anon_key: impl Into<String>) -> Result<Self> {
        let mut base_url = Url::parse(url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let anon_key: String = anon_key.into();
        if anon_key.is_empty() {
            return Err(SupabaseError::Config("anon key is empty".into()));
        }

        Ok(Self {
            inner: Arc::new(ClientInner {
                http: reqwest::Client::new(),
                base_url,
                anon_key: SecretBox::new(Box::from(anon_key.as_str())),
                session: RwLock::new(None),
            }),
        })
    }

    /// Create from environment variables `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("SUPABASE_URL")
            .map_err(|_| SupabaseError::Config("SUPABASE_URL not set".into()))?;
        let key = std::env::var("SUPABASE_ANON_KEY")
            .map_err(|_| SupabaseError::Config("SUPABASE_ANON_KEY not set".into()))?;
        Self::new(&url, key)
    }

    /// Project base URL (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Start a query against `table`.
    pub fn from(&self, table: &str) -> QueryBuilder<'_> {
        QueryBuilder::new(self, table)
    }

    /// Realtime client bound to the current session's access token.
    pub fn realtime(&self) -> RealtimeClient {
        RealtimeClient::new(
            self.inner.base_url.clone(),
            self.inner.anon_key.expose_secret(),
            self.access_token(),
        )
    }

    /// Current session, if signed in.
    pub fn session(&self) -> Option<Session> {
        self.inner
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Id of the signed-in user, if any.
    pub fn user_id(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.user.id.clone())
    }

    pub(crate) fn set_session(&self, session: Option<Session>) {
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(|e| e.into_inner()) = session;
    }

    fn access_token(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.inner.base_url.join(path)?)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Attach `apikey` and bearer headers. The bearer is the user's access
    /// token when signed in, otherwise the anon key.
    pub(crate) fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let anon_key = self.inner.anon_key.expose_secret();
        let bearer = self.access_token().unwrap_or_else(|| anon_key.to_string());
        request.header("apikey", anon_key).bearer_auth(bearer)
    }
}

/// Turn a non-2xx response into [`SupabaseError::Api`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    tracing::warn!(status = %status, error = %message, "Supabase API error");
    Err(SupabaseError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = SupabaseClient::new("https://abc.supabase.co", "anon").unwrap();
        assert_eq!(client.base_url().as_str(), "https://abc.supabase.co/");

        let proxied = SupabaseClient::new("http://localhost:54321/proxy", "anon").unwrap();
        assert_eq!(
            proxied.endpoint("rest/v1/job_sources").unwrap().as_str(),
            "http://localhost:54321/proxy/rest/v1/job_sources"
        );
    }

    #[test]
    fn test_rejects_empty_key_and_bad_url() {
        assert!(matches!(
            SupabaseClient::new("https://abc.supabase.co", ""),
            Err(SupabaseError::Config(_))
        ));
        assert!(matches!(
            SupabaseClient::new("not a url", "anon"),
            Err(SupabaseError::Config(_))
        ));
    }

    #[test]
    fn test_no_session_by_default() {
        let client = SupabaseClient::new("https://abc.supabase.co", "anon").unwrap();
        assert!(client.session().is_none());
        assert!(client.user_id().is_none());
    }
}
