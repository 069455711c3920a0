//! Wraps a local `git2::Repository` working copy for one request's scratch
//! clone: clone/fetch, branch creation (including orphan), worktree prep,
//! commit, and push.

use std::path::Path;

use git2::{ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature};

use crate::error::GitServiceError;

pub const ORIGIN: &str = "origin";

#[derive(Debug, Clone)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    fn signature(&self) -> Result<Signature<'static>, GitServiceError> {
        Signature::now(&self.name, &self.email).map_err(GitServiceError::from)
    }
}

/// The init/prepare-environment/commit/push surface, scoped to one
/// request's working copy.
pub struct GitService {
    repo: Repository,
    clone_depth: i32,
    author: Author,
}

fn remote_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    // Credentials travel embedded in the remote URL's userinfo, applied by
    // the URL authenticator strategy before the clone/fetch/push call.
    // Falling back to the default git credential helper covers SSH-keyed
    // remotes used in local testing.
    callbacks.credentials(|url, username_from_url, allowed_types| {
        if let Ok(cred) = git2::Cred::credential_helper(
            &git2::Config::open_default().unwrap_or_else(|_| git2::Config::new().unwrap()),
            url,
            username_from_url,
        ) {
            return Ok(cred);
        }
        if allowed_types.contains(git2::CredentialType::SSH_KEY) {
            if let Some(username) = username_from_url {
                return git2::Cred::ssh_key_from_agent(username);
            }
        }
        git2::Cred::default()
    });
    callbacks
}

impl GitService {
    /// Shallow-clones `reference_name` from `remote_url` into `directory`.
    /// If that reference does not exist on the remote, clones the default
    /// branch instead and returns `Ok(None)` for the reference so the
    /// caller can perform the orphan-trunk bootstrap.
    fn clone(
        remote_url: &str,
        directory: &Path,
        reference_name: Option<&str>,
        depth: i32,
    ) -> Result<(Repository, bool), GitServiceError> {
        let mut builder = git2::build::RepoBuilder::new();
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(remote_callbacks());
        fetch_options.depth(depth);
        builder.fetch_options(fetch_options);

        if let Some(reference_name) = reference_name {
            builder.branch(reference_name);
        }

        match builder.clone(remote_url, directory) {
            Ok(repo) => Ok((repo, true)),
            Err(err)
                if reference_name.is_some()
                    && matches!(err.code(), ErrorCode::NotFound | ErrorCode::Reference) =>
            {
                // The requested ref (the environment trunk) doesn't exist
                // yet: fall back to cloning the remote's default branch so
                // the caller can bootstrap the trunk as an orphan.
                let mut fallback_builder = git2::build::RepoBuilder::new();
                let mut fallback_fetch = FetchOptions::new();
                fallback_fetch.remote_callbacks(remote_callbacks());
                fallback_fetch.depth(depth);
                fallback_builder.fetch_options(fallback_fetch);
                let repo = fallback_builder
                    .clone(remote_url, directory)
                    .map_err(GitServiceError::Clone)?;
                Ok((repo, false))
            }
            Err(err) => Err(GitServiceError::Clone(err)),
        }
    }

    /// Initialises the working copy for `trunk`. If `trunk` does not exist
    /// on the remote, clones the default branch, creates `trunk` as an
    /// orphan with an empty initial commit, and pushes it.
    pub fn init_repository(
        remote_url: &str,
        directory: &Path,
        trunk: &str,
        author: Author,
        clone_depth: i32,
    ) -> Result<Self, GitServiceError> {
        let (repo, found_trunk) = Self::clone(remote_url, directory, Some(trunk), clone_depth)?;

        let mut service = Self {
            repo,
            clone_depth,
            author,
        };

        if !found_trunk {
            service.bootstrap_orphan_trunk(trunk)?;
            service.push(trunk)?;
        }

        {
            let mut config = service.repo.config()?;
            config.set_str("user.name", &service.author.name)?;
            config.set_str("user.email", &service.author.email)?;
        }

        if service.repo.find_remote(ORIGIN).is_err() {
            service.repo.remote(ORIGIN, remote_url)?;
        }

        Ok(service)
    }

    /// Creates `trunk` as an orphan branch (HEAD symbolic-referenced to it,
    /// no parent) with an empty worktree, then commits
    /// "Initialise empty environment".
    fn bootstrap_orphan_trunk(&mut self, trunk: &str) -> Result<(), GitServiceError> {
        self.create_orphan_branch(trunk)?;
        self.clear_worktree_glob("*")?;
        self.commit(
            "Initialise empty environment",
            &format!("Initialising {}", short_name(trunk)),
        )?;
        Ok(())
    }

    /// Fetches `trunk` and `next` (tolerating a missing `next` on the
    /// remote), then resolves or creates `next` from `trunk`, checks it
    /// out, and clears the target directory in the worktree.
    pub fn prepare_environment(
        &mut self,
        trunk: &str,
        next: &str,
        upstream_source: Option<&str>,
        target_directory: &str,
    ) -> Result<(), GitServiceError> {
        self.fetch(&[trunk, next])?;

        self.get_or_create_branch(next, upstream_source.or(Some(trunk)))?;
        self.checkout(next)?;

        let pattern = format!("{}/*", target_directory.trim_end_matches('/'));
        self.clear_worktree_glob(&pattern)?;

        Ok(())
    }

    fn fetch(&self, refs: &[&str]) -> Result<(), GitServiceError> {
        let mut remote = self.repo.find_remote(ORIGIN)?;
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(remote_callbacks());
        fetch_options.depth(self.clone_depth);

        let refspecs: Vec<String> = refs
            .iter()
            .map(|r| format!("+{r}:{r}"))
            .collect();
        let refspecs: Vec<&str> = refspecs.iter().map(String::as_str).collect();

        // A ref that doesn't exist on the remote yet (the `next` branch,
        // before the first update for this app) is not an error.
        match remote.fetch(&refspecs, Some(&mut fetch_options), None) {
            Ok(()) => Ok(()),
            Err(err) if err.message().contains("could not find remote ref") => Ok(()),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(()),
            Err(err) => Err(GitServiceError::Fetch(err)),
        }
    }

    /// Prefers an existing remote-tracking `origin/<name>` reference;
    /// otherwise branches from `source` (or creates an orphan when `source`
    /// is `None`).
    pub fn get_or_create_branch(
        &mut self,
        name: &str,
        source: Option<&str>,
    ) -> Result<(), GitServiceError> {
        let remote_ref_name = format!("refs/remotes/{ORIGIN}/{}", short_name(name));

        if self.repo.find_reference(&remote_ref_name).is_ok() {
            self.create_branch_from(name, &remote_ref_name)?;
            return Ok(());
        }

        match source {
            Some(source) => self.create_branch_from(name, source),
            None => self.create_orphan_branch(name),
        }
    }

    fn create_branch_from(&mut self, branch_ref: &str, head_ref: &str) -> Result<(), GitServiceError> {
        let target = self
            .repo
            .find_reference(head_ref)
            .or_else(|_| self.repo.find_reference(&format!("refs/heads/{}", short_name(head_ref))))
            .map_err(|_| GitServiceError::ReferenceNotFound(head_ref.to_string()))?;

        let oid = target
            .peel_to_commit()
            .map_err(GitServiceError::from)?
            .id();

        self.repo
            .reference(branch_ref, oid, true, "branch created by manifest-promotion")?;
        Ok(())
    }

    /// Sets HEAD as a symbolic reference to `branch_ref` with no parent
    /// commit.
    fn create_orphan_branch(&mut self, branch_ref: &str) -> Result<(), GitServiceError> {
        self.repo.set_head(branch_ref)?;
        Ok(())
    }

    fn checkout(&mut self, branch_ref: &str) -> Result<(), GitServiceError> {
        let full_ref = full_ref_name(branch_ref);
        let obj = self.repo.revparse_single(&full_ref);

        match obj {
            Ok(obj) => {
                self.repo
                    .checkout_tree(&obj, Some(git2::build::CheckoutBuilder::new().force()))
                    .map_err(|source| GitServiceError::Checkout {
                        refname: branch_ref.to_string(),
                        source,
                    })?;
                self.repo.set_head(&full_ref)?;
            }
            Err(_) => {
                // Orphan branch: no tree to check out yet.
                self.repo.set_head(&full_ref)?;
            }
        }
        Ok(())
    }

    /// Removes everything matching `pattern` (relative to the worktree
    /// root) from the working tree and index, silencing "no matches" — the
    /// declarative-replace step of environment preparation.
    fn clear_worktree_glob(&self, pattern: &str) -> Result<(), GitServiceError> {
        let workdir = self
            .repo
            .workdir()
            .ok_or_else(|| GitServiceError::Other(git2::Error::from_str("repository has no worktree")))?
            .to_path_buf();

        let glob_pattern = workdir.join(pattern);
        let glob_pattern = glob_pattern.to_string_lossy().to_string();

        let mut index = self.repo.index()?;
        if let Ok(paths) = glob::glob(&glob_pattern) {
            for entry in paths.flatten() {
                if entry.is_dir() {
                    let _ = std::fs::remove_dir_all(&entry);
                } else {
                    let _ = std::fs::remove_file(&entry);
                }
                if let Ok(relative) = entry.strip_prefix(&workdir) {
                    let _ = index.remove_path(relative);
                }
            }
        }
        index.write()?;

        Ok(())
    }

    /// Adds files matching `<target_directory>/*`, then commits if the
    /// index differs from `HEAD`. Allows empty commits (the initial
    /// orphan-trunk bootstrap relies on this). Returns the number of
    /// objects that changed.
    pub fn commit_target_directory(
        &mut self,
        target_directory: &str,
        subject: &str,
        body: &str,
    ) -> Result<usize, GitServiceError> {
        let pattern = format!("{}/*", target_directory.trim_end_matches('/'));
        let mut index = self.repo.index()?;
        index.add_all([pattern.as_str()].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let diff_count = self.diff_count_against_head(&index)?;

        if diff_count > 0 {
            self.commit(subject, body)?;
        }

        Ok(diff_count)
    }

    fn diff_count_against_head(&self, index: &git2::Index) -> Result<usize, GitServiceError> {
        let head_tree = match self.repo.head() {
            Ok(head) => Some(head.peel_to_tree().map_err(GitServiceError::from)?),
            Err(_) => None, // orphan branch, no HEAD commit yet
        };

        let diff = self.repo.diff_tree_to_index(
            head_tree.as_ref(),
            Some(index),
            None,
        )?;
        Ok(diff.deltas().len())
    }

    /// Produces a commit with `message = subject + "\n\n" + body`, allowing
    /// empty commits.
    fn commit(&mut self, subject: &str, body: &str) -> Result<(), GitServiceError> {
        let message = format!("{subject}\n\n{body}");
        let signature = self.author.signature()?;

        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree().map_err(GitServiceError::Commit)?;
        let tree = self.repo.find_tree(tree_oid).map_err(GitServiceError::Commit)?;

        let parents = match self.repo.head() {
            Ok(head) => vec![head.peel_to_commit().map_err(GitServiceError::Commit)?],
            Err(_) => Vec::new(),
        };
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, &message, &tree, &parent_refs)
            .map_err(GitServiceError::Commit)?;

        tracing::debug!(hash = %oid, email = %self.author.email, "created commit object");

        Ok(())
    }

    /// Force-pushes `refname` to `origin` with refspec `+<ref>:<ref>`. A
    /// server-reported "up to date" is not an error.
    pub fn push(&self, refname: &str) -> Result<(), GitServiceError> {
        let full_ref = full_ref_name(refname);
        let mut remote = self.repo.find_remote(ORIGIN)?;
        let mut push_options = PushOptions::new();
        push_options.remote_callbacks(remote_callbacks());

        let refspec = format!("+{full_ref}:{full_ref}");
        remote
            .push(&[refspec.as_str()], Some(&mut push_options))
            .map_err(|source| GitServiceError::Push {
                refname: refname.to_string(),
                source,
            })?;

        Ok(())
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    /// The ref name HEAD currently points at, in short form (e.g.
    /// `environment/dev`), used for the response's `environment.ref_name`.
    pub fn head_short_name(&self) -> Result<String, GitServiceError> {
        let head = self.repo.find_reference("HEAD")?;
        if let Some(target) = head.symbolic_target() {
            return Ok(short_name(target).to_string());
        }
        let resolved = head.resolve()?;
        Ok(short_name(resolved.name().unwrap_or_default()).to_string())
    }
}

/// `refs/heads/<name>` form, accepting either a short or already-qualified
/// name.
fn full_ref_name(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/heads/{name}")
    }
}

/// Strips a leading `refs/heads/` or `refs/remotes/<remote>/`.
fn short_name(name: &str) -> &str {
    name.strip_prefix("refs/heads/")
        .or_else(|| name.strip_prefix(&format!("refs/remotes/{ORIGIN}/")))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_strips_heads_prefix() {
        assert_eq!(short_name("refs/heads/environment/dev"), "environment/dev");
    }

    #[test]
    fn short_name_strips_remote_prefix() {
        assert_eq!(
            short_name(&format!("refs/remotes/{ORIGIN}/environment/dev")),
            "environment/dev"
        );
    }

    #[test]
    fn full_ref_name_qualifies_short_names() {
        assert_eq!(full_ref_name("environment/dev"), "refs/heads/environment/dev");
        assert_eq!(full_ref_name("refs/heads/environment/dev"), "refs/heads/environment/dev");
    }
}
