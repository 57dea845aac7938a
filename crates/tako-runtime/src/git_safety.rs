use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

const GIT_TIMEOUT: Duration = Duration::from_secs(15);

struct GitOutput {
    ok: bool,
    stdout: String,
    stderr: String,
}

async fn run_git(repo_root: &Path, args: &[&str]) -> GitOutput {
    let invocation = Command::new("git").args(args).current_dir(repo_root).output();
    match tokio::time::timeout(GIT_TIMEOUT, invocation).await {
        Ok(Ok(output)) => GitOutput {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        },
        _ => GitOutput { ok: false, stdout: String::new(), stderr: "git invocation failed".to_string() },
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub async fn is_git_repo(repo_root: &Path) -> bool {
    let out = run_git(repo_root, &["rev-parse", "--is-inside-work-tree"]).await;
    out.ok && out.stdout.trim() == "true"
}

/// `(configured, detail)` — `detail` is either `"name <email>"` or a reason
/// one of the two fields is missing.
pub async fn git_identity_status(repo_root: &Path) -> (bool, String) {
    if !is_git_repo(repo_root).await {
        return (true, "git repo not initialized".to_string());
    }
    let name_out = run_git(repo_root, &["config", "--get", "user.name"]).await;
    let email_out = run_git(repo_root, &["config", "--get", "user.email"]).await;
    let name = if name_out.ok { name_out.stdout.trim().to_string() } else { String::new() };
    let email = if email_out.ok { email_out.stdout.trim().to_string() } else { String::new() };

    if !name.is_empty() && !email.is_empty() {
        (true, format!("{name} <{email}>"))
    } else if name.is_empty() && email.is_empty() {
        (false, "git user.name/user.email are not configured".to_string())
    } else if name.is_empty() {
        (false, "git user.name is not configured".to_string())
    } else {
        (false, "git user.email is not configured".to_string())
    }
}

/// `(ok, detail, changed)` — sets `user.name=Takobot`/`user.email=takobot@local`
/// locally if identity isn't configured yet.
async fn ensure_local_git_identity(repo_root: &Path) -> (bool, String, bool) {
    let (ok, detail) = git_identity_status(repo_root).await;
    if ok {
        return (true, detail, false);
    }
    let set_name = run_git(repo_root, &["config", "user.name", "Takobot"]).await;
    if !set_name.ok {
        let err = one_line(&set_name.stderr);
        let err = if err.is_empty() { "failed to set user.name".to_string() } else { err };
        return (false, format!("failed to set local git user.name: {err}"), false);
    }
    let set_email = run_git(repo_root, &["config", "user.email", "takobot@local"]).await;
    if !set_email.ok {
        let err = one_line(&set_email.stderr);
        let err = if err.is_empty() { "failed to set user.email".to_string() } else { err };
        return (false, format!("failed to set local git user.email: {err}"), false);
    }
    let (ok2, detail2) = git_identity_status(repo_root).await;
    (ok2, detail2, true)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitAutoCommitResult {
    pub ok: bool,
    pub committed: bool,
    pub summary: String,
    pub commit: String,
}

impl GitAutoCommitResult {
    fn skip(summary: impl Into<String>) -> Self {
        Self { ok: true, committed: false, summary: summary.into(), commit: String::new() }
    }

    fn failure(summary: impl Into<String>) -> Self {
        Self { ok: false, committed: false, summary: summary.into(), commit: String::new() }
    }
}

/// Status → `add -A` → commit, with one retry after auto-configuring a
/// local git identity if the first commit fails on "author identity
/// unknown".
pub async fn auto_commit_pending(repo_root: &Path, message: &str) -> GitAutoCommitResult {
    if !is_git_repo(repo_root).await {
        return GitAutoCommitResult::skip("auto-commit skipped: not a git repo");
    }

    let status = run_git(repo_root, &["status", "--porcelain"]).await;
    if !status.ok {
        let detail = one_line(&status.stderr);
        return GitAutoCommitResult::failure(format!(
            "auto-commit status failed: {}",
            if detail.is_empty() { "status failed".to_string() } else { detail }
        ));
    }
    if status.stdout.trim().is_empty() {
        return GitAutoCommitResult::skip("no pending changes");
    }

    let add = run_git(repo_root, &["add", "-A"]).await;
    if !add.ok {
        let detail = one_line(&add.stderr);
        return GitAutoCommitResult::failure(format!(
            "auto-commit add failed: {}",
            if detail.is_empty() { "add failed".to_string() } else { detail }
        ));
    }

    let staged = run_git(repo_root, &["diff", "--cached", "--quiet"]).await;
    if staged.ok {
        return GitAutoCommitResult::skip("no staged changes after add");
    }

    let commit = run_git(repo_root, &["commit", "-m", message]).await;
    if !commit.ok {
        let detail = one_line(&commit.stderr);
        let lowered = detail.to_lowercase();
        if lowered.contains("author identity unknown") || lowered.contains("unable to auto-detect email address") {
            let (ensured, ensured_detail, changed) = ensure_local_git_identity(repo_root).await;
            if !ensured {
                return GitAutoCommitResult::failure(format!("auto-commit failed: {ensured_detail}"));
            }
            let retry = run_git(repo_root, &["commit", "-m", message]).await;
            if !retry.ok {
                let retry_detail = one_line(&retry.stderr);
                return GitAutoCommitResult::failure(format!(
                    "auto-commit failed: {}",
                    if retry_detail.is_empty() { "commit failed".to_string() } else { retry_detail }
                ));
            }
            return finish_after_commit(repo_root, changed, &ensured_detail).await;
        }
        return GitAutoCommitResult::failure(format!(
            "auto-commit failed: {}",
            if detail.is_empty() { "commit failed".to_string() } else { detail }
        ));
    }

    finish_after_commit(repo_root, false, "").await
}

async fn finish_after_commit(repo_root: &Path, identity_changed: bool, ensured_detail: &str) -> GitAutoCommitResult {
    let post_status = run_git(repo_root, &["status", "--porcelain"]).await;
    if !post_status.ok {
        let detail = one_line(&post_status.stderr);
        return GitAutoCommitResult::failure(format!(
            "auto-commit verify failed: {}",
            if detail.is_empty() { "status failed".to_string() } else { detail }
        ));
    }
    if !post_status.stdout.trim().is_empty() {
        return GitAutoCommitResult::failure("auto-commit verify failed: pending changes remain after commit");
    }

    let head = run_git(repo_root, &["rev-parse", "--short", "HEAD"]).await;
    let sha = if head.ok { head.stdout.trim().to_string() } else { String::new() };
    let summary = if identity_changed {
        format!("auto-commit created (git identity auto-configured: {ensured_detail})")
    } else {
        "auto-commit created".to_string()
    };
    GitAutoCommitResult { ok: true, committed: true, summary, commit: sha }
}

/// Boundary the heartbeat tick calls through for the auto-commit pass;
/// the default impl shells out to `git`, but tests and alternate
/// front-ends can substitute a fake.
#[async_trait]
pub trait GitAutoCommit: Send + Sync {
    async fn auto_commit(&self, repo_root: &Path, message: &str) -> GitAutoCommitResult;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShellGitAutoCommit;

#[async_trait]
impl GitAutoCommit for ShellGitAutoCommit {
    async fn auto_commit(&self, repo_root: &Path, message: &str) -> GitAutoCommitResult {
        auto_commit_pending(repo_root, message).await
    }
}
