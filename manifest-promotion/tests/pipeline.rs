//! Drives the orchestrator end-to-end against a bare `git2` repository
//! created in a temp dir, standing in for a real forge remote.

use std::path::Path;

use manifest_promotion::git_service::Author;
use manifest_promotion::model::{Repository, Request, RequestPaths};
use manifest_promotion::pipeline;
use manifest_promotion::processors::mutators::NewlineEofMutator;
use manifest_promotion::processors::validators::EmptyFileValidator;
use manifest_promotion::reporter::Reporter;
use manifest_promotion::strategies::authenticator::NoneAuthenticator;
use manifest_promotion::strategies::authoriser::StaticAuthoriser;
use manifest_promotion::strategies::committer::StandardCommitter;
use manifest_promotion::strategies::copier::SubpathCopier;
use manifest_promotion::strategies::reviewer::DummyReviewer;
use manifest_promotion::strategies::targeter::BranchTargeter;
use manifest_promotion::strategies::Strategies;
use tokio_util::sync::CancellationToken;

/// Seeds a bare repository with a single commit on `refs/heads/main`,
/// standing in for a config repository that already exists on the forge —
/// the orphan-trunk bootstrap only kicks in once a clone of this default
/// branch succeeds and the environment trunk itself is still missing.
fn seed_bare_remote(path: &Path) {
    let repo = git2::Repository::init_bare(path).expect("failed to init bare remote");
    repo.set_head("refs/heads/main").unwrap();

    let signature = git2::Signature::now("seed", "seed@example.com").unwrap();
    let tree_oid = {
        let mut index = repo.index().unwrap();
        index.write_tree().unwrap()
    };
    let tree = repo.find_tree(tree_oid).unwrap();
    repo.commit(Some("HEAD"), &signature, &signature, "Initial commit", &tree, &[])
        .unwrap();
}

fn strategies(auto_complete: bool) -> Strategies {
    Strategies {
        authoriser: Box::new(StaticAuthoriser::allow_all()),
        url_authenticator: Box::new(NoneAuthenticator),
        targeter: Box::new(BranchTargeter::orphan("environment/", "manifests")),
        file_copier: Box::new(SubpathCopier),
        committer: Box::new(StandardCommitter::new("Update rendered manifests")),
        reviewer: Box::new(DummyReviewer::new("https://example.com/review/1", auto_complete)),
        mutators: vec![Box::new(NewlineEofMutator)],
        validators: vec![Box::new(EmptyFileValidator)],
        git_author: Author::new("gitops-manager", "gitops-manager@example.com"),
        clone_depth: 1,
    }
}

fn request(remote_url: &str, scratch: &Path) -> Request {
    Request {
        target_repository: Repository::new(remote_url),
        environment: "dev".to_string(),
        update_identifier: "build-42".to_string(),
        app_name: "web".to_string(),
        dry_run: false,
        auto_review: true,
        source: None,
        paths: RequestPaths {
            temp_root: scratch.to_path_buf(),
            repository_dir: scratch.join("repository"),
            updated_manifests_dir: scratch.join("upload"),
        },
        total_files: 1,
        metadata: Default::default(),
    }
}

async fn drain_reporter(mut rx: tokio::sync::mpsc::Receiver<manifest_promotion::model::ProgressEvent>) {
    while rx.recv().await.is_some() {}
}

#[tokio::test]
async fn pushes_rendered_manifests_to_a_new_orphan_trunk() {
    let remote_dir = tempfile::tempdir().expect("failed to create temp directory");
    seed_bare_remote(remote_dir.path());
    let remote_url = remote_dir.path().to_string_lossy().to_string();

    let scratch = tempfile::tempdir().expect("failed to create temp directory");
    tokio::fs::create_dir_all(scratch.path().join("upload"))
        .await
        .unwrap();
    tokio::fs::write(scratch.path().join("upload/deployment.yaml"), b"kind: Deployment")
        .await
        .unwrap();

    let (reporter, rx) = Reporter::channel();
    let drain = tokio::spawn(drain_reporter(rx));

    let strategies = strategies(true);
    let req = request(&remote_url, scratch.path());
    let (response, result) = pipeline::run(&strategies, &reporter, &req, &CancellationToken::new()).await;
    drop(reporter);
    drain.await.unwrap();

    result.expect("pipeline should succeed against a fresh bare remote");
    assert_eq!(response.updated_files_count, 1);
    assert!(!response.is_error());

    let review = response.review_result.expect("review result should be set");
    assert!(review.created);
    assert!(review.completed);

    let environment = response.environment.expect("environment should be set");
    assert_eq!(environment.name, "dev");
    assert_eq!(environment.ref_name, "environment/dev");

    // The "next" branch should now exist on the bare remote with the
    // mutated (trailing-newline-appended) file committed.
    let remote_repo = git2::Repository::open_bare(remote_dir.path()).unwrap();
    let next = remote_repo
        .find_branch("environment/dev-next/web/build-42", git2::BranchType::Local)
        .expect("next branch should have been pushed");
    let tree = next.get().peel_to_tree().unwrap();
    let entry = tree
        .get_path(Path::new("manifests/deployment.yaml"))
        .expect("mutated file should be committed under the target directory");
    let blob = remote_repo.find_blob(entry.id()).unwrap();
    assert_eq!(blob.content(), b"kind: Deployment\n");
}

#[tokio::test]
async fn empty_change_set_skips_push_and_review() {
    let remote_dir = tempfile::tempdir().expect("failed to create temp directory");
    seed_bare_remote(remote_dir.path());
    let remote_url = remote_dir.path().to_string_lossy().to_string();

    // Bootstrap the trunk once so the second run's "next" branch starts
    // from it with identical content, producing a zero-delta commit.
    let first_scratch = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(first_scratch.path().join("upload"))
        .await
        .unwrap();
    tokio::fs::write(first_scratch.path().join("upload/config.yaml"), b"a: 1\n")
        .await
        .unwrap();
    {
        let (reporter, rx) = Reporter::channel();
        let drain = tokio::spawn(drain_reporter(rx));
        let strategies = strategies(true);
        let req = request(&remote_url, first_scratch.path());
        let (_, result) = pipeline::run(&strategies, &reporter, &req, &CancellationToken::new()).await;
        drop(reporter);
        drain.await.unwrap();
        result.unwrap();
    }

    // Promote the bootstrapped "next" branch onto the trunk so the
    // environment's trunk now carries the same manifest.
    {
        let repo = git2::Repository::open_bare(remote_dir.path()).unwrap();
        let next = repo
            .find_branch("environment/dev-next/web/build-42", git2::BranchType::Local)
            .unwrap();
        let oid = next.get().target().unwrap();
        repo.reference("refs/heads/environment/dev", oid, true, "fast-forward trunk")
            .unwrap();
    }

    let second_scratch = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(second_scratch.path().join("upload"))
        .await
        .unwrap();
    tokio::fs::write(second_scratch.path().join("upload/config.yaml"), b"a: 1\n")
        .await
        .unwrap();

    let (reporter, rx) = Reporter::channel();
    let drain = tokio::spawn(drain_reporter(rx));
    let strategies = strategies(true);
    let mut req = request(&remote_url, second_scratch.path());
    req.update_identifier = "build-43".to_string();
    let (response, result) = pipeline::run(&strategies, &reporter, &req, &CancellationToken::new()).await;
    drop(reporter);
    drain.await.unwrap();

    result.expect("an empty change set is not a pipeline failure");
    assert_eq!(response.updated_files_count, 0);
    let review = response.review_result.unwrap();
    assert!(!review.created);
    assert!(!review.completed);
}
