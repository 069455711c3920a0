//! The default targeter: derives branch names from a request.

use super::Targeter;
use crate::error::PipelineError;
use crate::model::{Request, Target, TargetBranch};

/// The default targeter: derives `source`/`target` branch names from
/// `(environment, app_name, update_identifier)` using a configurable
/// prefix, and names the worktree subdirectory after the application.
pub struct BranchTargeter {
    pub prefix: String,
    pub directory_name: String,
    /// Takes precedence over `upstream` if `true`.
    pub orphan: bool,
    /// Must be set if `orphan` is `false`.
    pub upstream: String,
}

impl BranchTargeter {
    pub fn orphan(prefix: impl Into<String>, directory_name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            directory_name: directory_name.into(),
            orphan: true,
            upstream: String::new(),
        }
    }

    pub fn with_upstream(
        prefix: impl Into<String>,
        directory_name: impl Into<String>,
        orphan: bool,
        upstream: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let upstream = upstream.into();
        if !orphan && upstream.is_empty() {
            return Err(PipelineError::TargetConfiguration(
                "upstream branch name cannot be empty when orphan is false".to_string(),
            ));
        }
        Ok(Self {
            prefix: prefix.into(),
            directory_name: directory_name.into(),
            orphan,
            upstream: if orphan { String::new() } else { upstream },
        })
    }
}

impl Targeter for BranchTargeter {
    fn create_target(&self, request: &Request) -> Result<Target, PipelineError> {
        if !self.orphan && self.upstream.is_empty() {
            return Err(PipelineError::TargetConfiguration(
                "upstream branch name cannot be empty when orphan is false".to_string(),
            ));
        }

        let upstream_source = if self.orphan { String::new() } else { self.upstream.clone() };

        Ok(Target {
            repository: request.target_repository.clone(),
            branch: TargetBranch {
                source: format!(
                    "{}{}-next/{}/{}",
                    self.prefix, request.environment, request.app_name, request.update_identifier
                ),
                target: format!("{}{}", self.prefix, request.environment),
                upstream_source,
            },
            directory: self.directory_name.clone(),
        })
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

    #[test]
    fn derives_environment_branch_names() {
        let targeter =
            BranchTargeter::with_upstream("environment/", "manifests", false, "environment/dev")
                .unwrap();
        let target = targeter.create_target(&request()).unwrap();
        assert_eq!(target.branch.target, "environment/dev");
        assert_eq!(target.branch.source, "environment/dev-next/web/feature-x");
        assert_eq!(target.branch.upstream_source, "environment/dev");
    }

    #[test]
    fn orphan_targeter_clears_upstream() {
        let targeter = BranchTargeter::orphan("environment/", "manifests");
        let target = targeter.create_target(&request()).unwrap();
        assert!(target.branch.is_orphan());
    }

    #[test]
    fn rejects_empty_upstream_when_not_orphan() {
        let err = BranchTargeter::with_upstream("environment/", "manifests", false, "").unwrap_err();
        assert!(matches!(err, PipelineError::TargetConfiguration(_)));
    }
}
