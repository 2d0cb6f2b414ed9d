//! Collects the git side of a deploy: commit range, log and deployer name.
//!
//! Shells out to the `git` CLI in the deployed working copy.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Length of the abbreviated hashes used in ranges and log lines.
///
/// `--short`/`--abbrev` are minimums: git prints longer hashes when seven
/// characters are ambiguous in the repository, and those are not linked in
/// the rendered email.
pub const SHORT_SHA_LEN: usize = 7;

/// Env var that overrides the deployer name
pub const DEPLOYER_ENV: &str = "DEPLOYER";

/// `previous..current` from two abbreviated revisions, if both are known
pub fn commit_range(previous: Option<&str>, current: Option<&str>) -> Option<String> {
    let previous = previous.map(str::trim).filter(|rev| !rev.is_empty())?;
    let current = current.map(str::trim).filter(|rev| !rev.is_empty())?;
    Some(format!("{}..{}", previous, current))
}

/// Abbreviate a revision to [`SHORT_SHA_LEN`] characters.
///
/// Hex hashes are truncated in place and lowercased, matching what git
/// prints; anything else (`HEAD`, tags, branch names) is resolved with
/// `git rev-parse`.
pub async fn short_revision(repo: &Path, rev: &str) -> Result<String> {
    let rev = rev.trim();
    if is_hex_sha(rev) {
        return Ok(rev[..SHORT_SHA_LEN].to_ascii_lowercase());
    }

    let short = run_git(
        repo,
        &["rev-parse", &format!("--short={}", SHORT_SHA_LEN), rev],
    )
    .await?;
    Ok(short.trim().to_string())
}

/// One line per commit in `range`, as `<short sha> <subject> (<author>)`
pub async fn commit_log(repo: &Path, range: &str) -> Result<String> {
    let abbrev = format!("--abbrev={}", SHORT_SHA_LEN);
    let log = run_git(
        repo,
        &[
            "log",
            range,
            "--no-merges",
            &abbrev,
            "--format=format:%h %s (%an)",
        ],
    )
    .await?;
    Ok(log.trim_end().to_string())
}

/// `$DEPLOYER`, else `git config user.name`, else empty
pub async fn deployer_name(repo: &Path) -> String {
    if let Ok(name) = std::env::var(DEPLOYER_ENV) {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }

    match run_git(repo, &["config", "--get", "user.name"]).await {
        Ok(name) => name.trim().to_string(),
        Err(e) => {
            tracing::debug!(error = %e, "Could not read git user.name");
            String::new()
        }
    }
}

fn is_hex_sha(rev: &str) -> bool {
    rev.len() >= SHORT_SHA_LEN && rev.chars().all(|c| c.is_ascii_hexdigit())
}

async fn run_git(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to execute git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
