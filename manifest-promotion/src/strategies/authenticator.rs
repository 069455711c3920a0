//! Default URL-authenticator strategies: pass-through, and
//! username/password userinfo injection.

use async_trait::async_trait;
use url::Url;

use super::UrlAuthenticator;
use crate::reporter::Reporter;

/// Passes the URL through unchanged.
pub struct NoneAuthenticator;

#[async_trait]
impl UrlAuthenticator for NoneAuthenticator {
    async fn authenticated_url(&self, url: Url, _reporter: &Reporter) -> anyhow::Result<Url> {
        Ok(url)
    }
}

/// Injects `username:password` into the URL's userinfo.
pub struct UserPasswordAuthenticator {
    pub username: String,
    pub password: String,
}

impl UserPasswordAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl UrlAuthenticator for UserPasswordAuthenticator {
    async fn authenticated_url(&self, mut url: Url, reporter: &Reporter) -> anyhow::Result<Url> {
        url.set_username(&self.username)
            .map_err(|()| anyhow::anyhow!("url cannot carry credentials"))?;
        url.set_password(Some(&self.password))
            .map_err(|()| anyhow::anyhow!("url cannot carry credentials"))?;
        reporter
            .basic_progress("authenticating with username and password")
            .await;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn none_authenticator_passes_url_through() {
        let (reporter, mut rx) = Reporter::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let url = Url::parse("https://example.com/repo.git").unwrap();
        let out = NoneAuthenticator.authenticated_url(url.clone(), &reporter).await.unwrap();
        assert_eq!(out, url);
    }

    #[tokio::test]
    async fn user_password_authenticator_embeds_credentials() {
        let (reporter, mut rx) = Reporter::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let url = Url::parse("https://example.com/repo.git").unwrap();
        let authenticator = UserPasswordAuthenticator::new("alice", "hunter2");
        let out = authenticator.authenticated_url(url, &reporter).await.unwrap();
        assert_eq!(out.username(), "alice");
        assert_eq!(out.password(), Some("hunter2"));
    }
}
