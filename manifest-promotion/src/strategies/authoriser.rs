//! A default authoriser that always allows or always denies.

use async_trait::async_trait;

use super::Authoriser;
use crate::model::Request;
use crate::reporter::Reporter;

/// Always allows or always denies, regardless of the request.
pub struct StaticAuthoriser {
    pub allow: bool,
}

impl StaticAuthoriser {
    pub fn allow_all() -> Self {
        Self { allow: true }
    }

    pub fn deny_all() -> Self {
        Self { allow: false }
    }
}

#[async_trait]
impl Authoriser for StaticAuthoriser {
    async fn authorise(&self, _request: &Request, reporter: &Reporter) -> anyhow::Result<bool> {
        if self.allow {
            reporter.basic_progress("always allowing").await;
        } else {
            reporter.basic_progress("always denying").await;
        }
        Ok(self.allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Repository;

    fn request() -> Request {
        Request {
            target_repository: Repository::new("https://example.com/repo.git"),
            environment: "dev".into(),
            update_identifier: "feature-x".into(),
            app_name: "web".into(),
            dry_run: true,
            auto_review: false,
            source: None,
            paths: Default::default(),
            total_files: 0,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn allow_all_authorises_every_request() {
        let (reporter, mut rx) = Reporter::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let authoriser = StaticAuthoriser::allow_all();
        assert!(authoriser.authorise(&request(), &reporter).await.unwrap());
    }

    #[tokio::test]
    async fn deny_all_denies_every_request() {
        let (reporter, mut rx) = Reporter::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let authoriser = StaticAuthoriser::deny_all();
        assert!(!authoriser.authorise(&request(), &reporter).await.unwrap());
    }
}
