//! Git working copies managed through the `git` command line.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::contract::{CommitInfo, RepoInfo, RepositorySource, SyncedRepository, VcsError};

const SHORT_HASH_LEN: usize = 7;

/// Clones repositories shallowly into `<repos_dir>/<repo name>`.
#[derive(Debug, Clone)]
pub struct GitCli {
    repos_dir: PathBuf,
}

impl GitCli {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
        }
    }

    async fn clone_repo(
        &self,
        repo_url: &str,
        branch: Option<&str>,
        target: &Path,
    ) -> Result<(), VcsError> {
        if !self.repos_dir.exists() {
            std::fs::create_dir_all(&self.repos_dir).map_err(|e| {
                tracing::error!(
                    error = ?e,
                    path = %self.repos_dir.display(),
                    "Failed to create repositories directory"
                );
                e
            })?;
        }

        let mut args = vec!["clone", "--depth", "1"];
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        let target_str = target.to_string_lossy();
        args.extend([repo_url, target_str.as_ref()]);

        tracing::info!(repo_url, branch = ?branch, path = %target.display(), "Cloning git repository");
        let output = git_output_async(&args, None).await?;
        checked_stdout(&args, output)?;
        tracing::info!(repo_url, path = %target.display(), "Successfully cloned git repository");
        Ok(())
    }

    /// Returns true when the pull brought in changes. A failed pull is logged and
    /// treated as "not updated" so an offline run can still ingest the old copy.
    async fn pull(&self, repo_path: &Path) -> Result<bool, VcsError> {
        ensure_repository(repo_path)?;
        tracing::info!(path = %repo_path.display(), "Pulling latest changes");
        let output = git_output_async(&["pull"], Some(repo_path)).await?;
        if !output.status.success() {
            tracing::warn!(
                path = %repo_path.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Git pull failed, using existing checkout"
            );
            return Ok(false);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let updated = !stdout.contains("Already up to date");
        tracing::info!(path = %repo_path.display(), updated, "Pull finished");
        Ok(updated)
    }
}

#[async_trait]
impl RepositorySource for GitCli {
    async fn sync(
        &self,
        repo_url: &str,
        branch: Option<String>,
        update: bool,
    ) -> Result<SyncedRepository, VcsError> {
        let info = RepoInfo {
            name: repo_name_from_url(repo_url),
            url: repo_url.to_string(),
        };
        let local_path = self.repos_dir.join(&info.name);

        let updated = if local_path.exists() {
            if let Some(branch) = &branch {
                tracing::warn!(
                    branch = %branch,
                    path = %local_path.display(),
                    "Checkout already exists, requested branch is ignored"
                );
            }
            if update {
                self.pull(&local_path).await?
            } else {
                tracing::info!(path = %local_path.display(), "Repository already present, reusing checkout");
                false
            }
        } else {
            self.clone_repo(repo_url, branch.as_deref(), &local_path).await?;
            true
        };

        Ok(SyncedRepository {
            info,
            local_path,
            updated,
        })
    }

    fn commit_info(&self, local_path: &Path) -> Result<CommitInfo, VcsError> {
        ensure_repository(local_path)?;

        let hash = run_git(&["rev-parse", "HEAD"], Some(local_path))?;
        let message = run_git(&["log", "-1", "--pretty=%s"], Some(local_path))?;
        let author = run_git(&["log", "-1", "--pretty=%an|%ae|%ai"], Some(local_path))?;

        let mut parts = author.splitn(3, '|');
        let (Some(author_name), Some(author_email), Some(date)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(VcsError::Output(format!("malformed author line: {author}")));
        };

        Ok(CommitInfo {
            short_hash: hash.chars().take(SHORT_HASH_LEN).collect(),
            hash,
            message,
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
            date: date.to_string(),
        })
    }
}

/// Repository name from an HTTP(S) or `git@host:owner/repo.git` URL.
///
/// ```
/// use code_bucket_core::vcs::repo_name_from_url;
/// assert_eq!(repo_name_from_url("git@github.com:acme/widgets.git"), "widgets");
/// ```
pub fn repo_name_from_url(repo_url: &str) -> String {
    let path = if let Some(rest) = repo_url.strip_prefix("git@") {
        rest.split_once(':').map(|(_, p)| p).unwrap_or(rest)
    } else if let Some((_, after_scheme)) = repo_url.split_once("://") {
        after_scheme
            .split_once('/')
            .map(|(_, p)| p)
            .unwrap_or("")
    } else {
        repo_url
    };
    let path = path.split(&['?', '#'][..]).next().unwrap_or(path);
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn ensure_repository(path: &Path) -> Result<(), VcsError> {
    if path.join(".git").exists() {
        Ok(())
    } else {
        Err(VcsError::NotARepository(path.to_path_buf()))
    }
}

fn git_output(args: &[&str], cwd: Option<&Path>) -> Result<Output, VcsError> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command.output().map_err(|e| launch_failed(args, e))
}

/// Like [`git_output`] but without blocking the runtime. The child is killed if
/// the returned future is dropped, so an interrupted clone does not linger.
async fn git_output_async(args: &[&str], cwd: Option<&Path>) -> Result<Output, VcsError> {
    let mut command = tokio::process::Command::new("git");
    command.args(args).kill_on_drop(true);
    // A terminal Ctrl-C must reach this process only; the child goes when the future is dropped.
    #[cfg(unix)]
    command.process_group(0);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command.output().await.map_err(|e| launch_failed(args, e))
}

fn launch_failed(args: &[&str], e: std::io::Error) -> VcsError {
    tracing::error!(error = ?e, args = ?args, "Failed to launch git process");
    VcsError::Launch(e)
}

/// Trimmed stdout, or an error when git exited non-zero.
fn checked_stdout(args: &[&str], output: Output) -> Result<String, VcsError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::error!(args = ?args, status = ?output.status, stderr = %stderr, "Git exited with non-zero code");
        return Err(VcsError::Command {
            command: args.join(" "),
            stderr,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<String, VcsError> {
    checked_stdout(args, git_output(args, cwd)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn names_from_common_url_shapes() {
        assert_eq!(repo_name_from_url("https://github.com/acme/widgets.git"), "widgets");
        assert_eq!(repo_name_from_url("https://github.com/acme/widgets"), "widgets");
        assert_eq!(repo_name_from_url("https://github.com/acme/widgets/"), "widgets");
        assert_eq!(repo_name_from_url("git@github.com:acme/widgets.git"), "widgets");
        assert_eq!(repo_name_from_url("git@gitlab.com:group/sub/tool.git"), "tool");
        assert_eq!(repo_name_from_url("/srv/git/local.git"), "local");
        // only the suffix is stripped
        assert_eq!(repo_name_from_url("https://host/acme/my.github.io.git"), "my.github.io");
    }

    #[test]
    fn commit_info_requires_a_repository() {
        let dir = tempdir().unwrap();
        let err = GitCli::new(dir.path()).commit_info(dir.path()).unwrap_err();
        assert!(matches!(err, VcsError::NotARepository(_)));
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "Ada")
            .env("GIT_AUTHOR_EMAIL", "ada@example.com")
            .env("GIT_COMMITTER_NAME", "Ada")
            .env("GIT_COMMITTER_EMAIL", "ada@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    #[tokio::test]
    async fn clones_local_repository_and_reads_commit() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let upstream = tempdir().unwrap();
        git(upstream.path(), &["init", "-q"]);
        std::fs::write(upstream.path().join("main.py"), "print('hi')\n").unwrap();
        git(upstream.path(), &["add", "."]);
        git(upstream.path(), &["commit", "-q", "-m", "Initial commit"]);

        let repos = tempdir().unwrap();
        let git_cli = GitCli::new(repos.path().join("checkouts"));
        let url = format!("file://{}", upstream.path().display());

        let synced = git_cli.sync(&url, None, false).await.unwrap();
        assert!(synced.updated);
        assert!(synced.local_path.join("main.py").exists());
        assert_eq!(synced.info.url, url);

        let commit = git_cli.commit_info(&synced.local_path).unwrap();
        assert_eq!(commit.hash.len(), 40);
        assert_eq!(commit.short_hash, &commit.hash[..7]);
        assert_eq!(commit.message, "Initial commit");
        assert_eq!(commit.author_name, "Ada");
        assert_eq!(commit.author_email, "ada@example.com");

        // second sync reuses the checkout
        let again = git_cli.sync(&url, None, false).await.unwrap();
        assert!(!again.updated);
        assert_eq!(again.local_path, synced.local_path);
    }

    #[tokio::test]
    async fn existing_checkout_keeps_its_branch_when_another_is_requested() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let upstream = tempdir().unwrap();
        git(upstream.path(), &["init", "-q"]);
        std::fs::write(upstream.path().join("main.py"), "print('hi')\n").unwrap();
        git(upstream.path(), &["add", "."]);
        git(upstream.path(), &["commit", "-q", "-m", "Initial commit"]);
        git(upstream.path(), &["branch", "feature"]);

        let repos = tempdir().unwrap();
        let git_cli = GitCli::new(repos.path());
        let url = format!("file://{}", upstream.path().display());
        let first = git_cli.sync(&url, None, false).await.unwrap();
        let head_before = git_cli.commit_info(&first.local_path).unwrap().hash;

        let again = git_cli
            .sync(&url, Some("feature".to_string()), false)
            .await
            .unwrap();
        assert!(!again.updated);
        let branch = run_git(&["rev-parse", "--abbrev-ref", "HEAD"], Some(&again.local_path)).unwrap();
        assert_ne!(branch, "feature");
        assert_eq!(git_cli.commit_info(&again.local_path).unwrap().hash, head_before);
    }

    #[tokio::test]
    async fn failed_clone_reports_git_stderr() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let repos = tempdir().unwrap();
        let missing = repos.path().join("no-such-upstream");
        let url = format!("file://{}", missing.display());
        let err = GitCli::new(repos.path().join("checkouts"))
            .sync(&url, None, false)
            .await
            .unwrap_err();
        match err {
            VcsError::Command { command, stderr } => {
                assert!(command.starts_with("clone --depth 1"), "{command}");
                assert!(!stderr.is_empty());
            }
            other => panic!("expected a git command error, got {other:?}"),
        }
    }
}
