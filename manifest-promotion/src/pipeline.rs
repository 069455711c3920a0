//! The pipeline orchestrator: runs the eleven sequential stages that turn
//! an ingested [`Request`] into a pushed branch and a [`Response`].

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::git_service::GitService;
use crate::model::{CreateReviewResult, EnvironmentResponse, Request, Response, Target};
use crate::reporter::{Heartbeat, HeartbeatTemplate, Reporter};
use crate::strategies::Strategies;

const PROCESSOR_HEARTBEAT_PERIOD: Duration = Duration::from_secs(10);

/// Runs the full pipeline for one request. Any stage failure short-circuits
/// and is returned as a [`PipelineError`]; the caller (the stream handler)
/// turns that into the terminal `Error` frame. Partial `environment` data
/// gathered before the failure is returned alongside the error so the
/// caller can still report what was resolved. `cancellation` is observed
/// between stages and inside the per-file mutate/validate walks, mirroring
/// the request's context cancellation in the original implementation.
pub async fn run(
    strategies: &Strategies,
    reporter: &Reporter,
    request: &Request,
    cancellation: &CancellationToken,
) -> (Response, Result<(), PipelineError>) {
    let mut response = Response {
        dry_run: request.dry_run,
        ..Default::default()
    };

    match run_stages(strategies, reporter, request, &mut response, cancellation).await {
        Ok(()) => {
            response.msg = "Git operations completed successfully.".to_string();
            reporter.success(response.msg.clone()).await;
            (response, Ok(()))
        }
        Err(err) => {
            response.error = err.to_string();
            (response, Err(err))
        }
    }
}

/// Runs one stage's body: checks `cancellation` before starting (a stage
/// that never starts emits no `Heading`), emits `Heading`, then guarantees a
/// `Failure` progress event fires if the body returns `Err` before
/// propagating it — the equivalent of the original's
/// `defer s.report.Result(err, ...)` wrapping each stage function.
async fn run_stage<T, Fut>(
    reporter: &Reporter,
    cancellation: &CancellationToken,
    heading: &str,
    body: Fut,
) -> Result<T, PipelineError>
where
    Fut: Future<Output = Result<T, PipelineError>>,
{
    if cancellation.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    reporter.heading(heading).await;
    match body.await {
        Ok(value) => Ok(value),
        Err(err) => {
            reporter.failure(err.to_string()).await;
            Err(err)
        }
    }
}

async fn run_stages(
    strategies: &Strategies,
    reporter: &Reporter,
    request: &Request,
    response: &mut Response,
    cancellation: &CancellationToken,
) -> Result<(), PipelineError> {
    // 1. Authorisation.
    run_stage(reporter, cancellation, "authorising request", async {
        let allowed = strategies
            .authoriser
            .authorise(request, reporter)
            .await
            .map_err(|err| PipelineError::AuthorisationFailed(format!("{err:#}")))?;
        if !allowed {
            return Err(PipelineError::NotAuthorised);
        }
        Ok(())
    })
    .await?;
    reporter.success("request authorised").await;

    // 2. Target resolution.
    let target = run_stage(reporter, cancellation, "resolving target", async {
        strategies.targeter.create_target(request)
    })
    .await?;
    response.environment = Some(EnvironmentResponse {
        repository: target.repository.clone(),
        name: String::new(),
        ref_name: String::new(),
    });
    reporter.success("target resolved").await;

    // 3. Repository initialisation.
    let (mut git, head_ref) = run_stage(reporter, cancellation, "initialising repository", async {
        let authenticated_url = authenticate(strategies, reporter, &target.repository.url).await?;

        let git = GitService::init_repository(
            authenticated_url.as_str(),
            &request.paths.repository_dir,
            &target.branch.target,
            strategies.git_author.clone(),
            strategies.clone_depth,
        )
        .map_err(PipelineError::Repository)?;

        let head_ref = git.head_short_name().map_err(PipelineError::Repository)?;
        Ok::<_, PipelineError>((git, head_ref))
    })
    .await?;

    if let Some(environment) = response.environment.as_mut() {
        environment.ref_name = head_ref;
        environment.name = request.environment.clone();
    }
    reporter.success("repository initialised").await;

    // 4. Environment preparation.
    run_stage(reporter, cancellation, "preparing environment", async {
        let upstream_source = if target.branch.is_orphan() {
            None
        } else {
            Some(target.branch.upstream_source.as_str())
        };
        git.prepare_environment(
            &target.branch.target,
            &target.branch.source,
            upstream_source,
            &target.directory,
        )
        .map_err(PipelineError::Repository)
    })
    .await?;
    reporter.success("environment prepared").await;

    // 5. Mutation.
    run_stage(reporter, cancellation, "mutating manifests", async {
        mutate_all(strategies, reporter, request, cancellation).await
    })
    .await?;
    reporter.success("manifests mutated").await;

    // 6. Validation.
    run_stage(reporter, cancellation, "validating manifests", async {
        validate_all(strategies, reporter, request, cancellation).await
    })
    .await?;
    reporter.success("manifests are valid").await;

    // 7. File copy.
    run_stage(reporter, cancellation, "copying manifests", async {
        let destination = request.paths.repository_dir.join(&target.directory);
        strategies
            .file_copier
            .copy_files(&request.paths.updated_manifests_dir, &destination, reporter)
            .await
            .map_err(|err| PipelineError::Copy(format!("{err:#}")))
    })
    .await?;
    reporter.success("manifests copied").await;

    // 8. Commit.
    let outcome = run_stage(reporter, cancellation, "committing changes", async {
        strategies
            .committer
            .commit(&mut git, request, &target, reporter)
            .await
            .map_err(PipelineError::Repository)
    })
    .await?;
    response.updated_files_count = outcome.object_count as u32;

    if outcome.object_count == 0 {
        reporter.success("no changes to commit").await;
        response.review_result = Some(CreateReviewResult::default());
        return Ok(());
    }
    reporter.success("changes committed").await;

    // 9. Push.
    if !request.dry_run {
        run_stage(reporter, cancellation, "pushing changes", async {
            git.push(&target.branch.source).map_err(PipelineError::Repository)
        })
        .await?;
        reporter.success("changes pushed").await;
    }

    // 10. Create review.
    let review_result = create_review(strategies, reporter, cancellation, request, &target).await?;

    // 11. Auto-complete.
    let review_result = complete_review(strategies, reporter, cancellation, request, review_result).await?;
    response.review_result = Some(review_result);

    Ok(())
}

async fn authenticate(
    strategies: &Strategies,
    reporter: &Reporter,
    url: &str,
) -> anyhow::Result<url::Url> {
    let parsed = url::Url::parse(url)?;
    strategies
        .url_authenticator
        .authenticated_url(parsed, reporter)
        .await
}

async fn create_review(
    strategies: &Strategies,
    reporter: &Reporter,
    cancellation: &CancellationToken,
    request: &Request,
    target: &Target,
) -> Result<CreateReviewResult, PipelineError> {
    let result = run_stage(reporter, cancellation, "creating review", async {
        if request.dry_run {
            return Ok(CreateReviewResult {
                created: true,
                url: String::new(),
                completed: false,
            });
        }

        let result = strategies
            .reviewer
            .create_review(request, target, reporter)
            .await?;
        if !result.created {
            return Err(PipelineError::Review(crate::error::ReviewError::CreateFailed(
                "reviewer did not report a created review".to_string(),
            )));
        }
        Ok(result)
    })
    .await?;

    reporter.success("review created").await;
    Ok(result)
}

async fn complete_review(
    strategies: &Strategies,
    reporter: &Reporter,
    cancellation: &CancellationToken,
    request: &Request,
    mut result: CreateReviewResult,
) -> Result<CreateReviewResult, PipelineError> {
    if !request.auto_review {
        return Ok(result);
    }

    run_stage(reporter, cancellation, "completing review", async {
        let merged = if request.dry_run {
            true
        } else {
            strategies.reviewer.complete_review(request, &result, reporter).await?
        };

        if !merged {
            return Err(PipelineError::ReviewNotMerged);
        }
        Ok(())
    })
    .await?;

    result.completed = true;
    reporter.success("review completed").await;
    Ok(result)
}

/// Lists every regular file under `root`, relative paths sorted for
/// deterministic iteration order. Checked for cancellation on each directory
/// entry, since a large tree's walk can itself take long enough to observe a
/// client disconnect.
fn list_files(
    root: &Path,
    cancellation: &CancellationToken,
) -> Result<Vec<std::path::PathBuf>, PipelineError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).into_iter() {
        if cancellation.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let entry = entry.map_err(|err| PipelineError::Other(std::io::Error::from(err).to_string()))?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

async fn mutate_all(
    strategies: &Strategies,
    reporter: &Reporter,
    request: &Request,
    cancellation: &CancellationToken,
) -> Result<(), PipelineError> {
    if strategies.mutators.is_empty() {
        return Ok(());
    }

    let files = list_files(&request.paths.updated_manifests_dir, cancellation)?;
    let total = files.len() as u32;
    let progressed = Arc::new(AtomicU32::new(0));
    let heartbeat = Heartbeat::start(
        reporter.clone(),
        PROCESSOR_HEARTBEAT_PERIOD,
        total,
        HeartbeatTemplate {
            present_action: "mutating",
            past_action: "mutated",
            subject: "files",
        },
        progressed.clone(),
    );

    let mut errors = Vec::new();
    let mut cancelled = false;
    for path in &files {
        if cancellation.is_cancelled() {
            cancelled = true;
            break;
        }

        let relative = path
            .strip_prefix(&request.paths.updated_manifests_dir)
            .unwrap_or(path)
            .display()
            .to_string();

        match mutate_file(strategies, request, path).await {
            Ok(()) => {}
            Err((mutator_title, message)) => {
                errors.push(format!("{mutator_title} failed to mutate {relative}: {message}"));
            }
        }
        progressed.fetch_add(1, Ordering::Relaxed);
    }

    heartbeat.stop().await;

    if cancelled {
        return Err(PipelineError::Cancelled);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let joined = errors.join("; ");
        Err(PipelineError::Mutation(
            "mutators".to_string(),
            "files".to_string(),
            joined,
        ))
    }
}

/// Runs every mutator over one file in declared order, each reading the
/// current content and writing the transformed bytes back in full — the
/// read/write-in-place mutator contract, expressed here as a
/// read-all/write-all since files are small rendered manifests rather than
/// data at a scale in-place streaming would matter for.
async fn mutate_file(
    strategies: &Strategies,
    request: &Request,
    path: &Path,
) -> Result<(), (String, String)> {
    let mut content = tokio::fs::read(path)
        .await
        .map_err(|err| ("i/o".to_string(), err.to_string()))?;

    for mutator in &strategies.mutators {
        content = mutator
            .mutate(request, &content)
            .await
            .map_err(|err| (mutator.title().to_string(), format!("{err:#}")))?;
    }

    tokio::fs::write(path, &content)
        .await
        .map_err(|err| ("i/o".to_string(), err.to_string()))?;

    Ok(())
}

async fn validate_all(
    strategies: &Strategies,
    reporter: &Reporter,
    request: &Request,
    cancellation: &CancellationToken,
) -> Result<(), PipelineError> {
    if strategies.validators.is_empty() {
        return Ok(());
    }

    let files = list_files(&request.paths.updated_manifests_dir, cancellation)?;
    let total = files.len() as u32;
    let progressed = Arc::new(AtomicU32::new(0));
    let heartbeat = Heartbeat::start(
        reporter.clone(),
        PROCESSOR_HEARTBEAT_PERIOD,
        total,
        HeartbeatTemplate {
            present_action: "validating",
            past_action: "validated",
            subject: "files",
        },
        progressed.clone(),
    );

    let mut errors = Vec::new();
    let mut invalid = Vec::new();
    let mut cancelled = false;
    for path in &files {
        if cancellation.is_cancelled() {
            cancelled = true;
            break;
        }

        let relative = path
            .strip_prefix(&request.paths.updated_manifests_dir)
            .unwrap_or(path)
            .display()
            .to_string();

        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(err) => {
                errors.push(format!("{relative}: {err}"));
                progressed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        for validator in &strategies.validators {
            match validator.validate(&content).await {
                Ok(result) if result.is_valid => {}
                Ok(result) => {
                    invalid.push(format!("{relative}: {}", result.errors.join(", ")));
                }
                Err(err) => errors.push(format!("{relative}: {err:#}")),
            }
        }
        progressed.fetch_add(1, Ordering::Relaxed);
    }

    heartbeat.stop().await;

    if cancelled {
        return Err(PipelineError::Cancelled);
    }

    if errors.is_empty() && invalid.is_empty() {
        return Ok(());
    }

    let mut messages = errors;
    messages.extend(invalid);
    Err(PipelineError::Validation(messages.join("; ")))
}
