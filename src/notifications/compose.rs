//! Renders deployment facts into the notification subject and bodies.
//!
//! The body is a fixed-width summary followed by the raw git log. Two
//! variants are produced from it: HTML, where commit ranges and commit hashes
//! at the start of a line become links, and plain text, where only commit
//! ranges are expanded into compare URLs.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::config::MailOptions;
use crate::error::NotifyError;

use super::DeploymentFacts;

lazy_static! {
    /// Two abbreviated hashes joined by `..`, e.g. `abc1234..def5678`
    static ref COMMIT_RANGE_REGEX: Regex =
        Regex::new(r"\b([0-9a-f]{7})\.\.([0-9a-f]{7})\b").unwrap();

    /// An abbreviated hash at the start of a line, as printed by `git log --format=%h`
    static ref LEADING_COMMIT_REGEX: Regex = Regex::new(r"(?m)^([0-9a-f]{7})\b").unwrap();
}

const GITHUB_URL: &str = "https://github.com";

/// Subject and both body variants of one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// Compose the full message for one deployment.
///
/// Without a `giturl` or `github` option the bodies are rendered without
/// links and a warning is logged.
pub fn compose(facts: &DeploymentFacts, options: &MailOptions) -> ComposedMessage {
    let subject = build_subject(&facts.application, &facts.branch, &facts.stage);
    let body = build_body(facts);

    let (html_body, text_body) = match resolve_link_prefix(options) {
        Ok(prefix) => (render_html(&body, &prefix), render_text(&body, &prefix)),
        Err(e) => {
            tracing::warn!(error = %e, "Rendering notification without commit links");
            (render_plain_html(&body), body)
        }
    };

    ComposedMessage {
        subject,
        html_body,
        text_body,
    }
}

pub fn build_subject(application: &str, branch: &str, stage: &str) -> String {
    format!(
        "{} branch {} deployed to {}",
        titleize(application),
        branch,
        stage
    )
}

pub fn build_body(facts: &DeploymentFacts) -> String {
    format!(
        "DEPLOYER:     {user}
BRANCH:       {branch}
ENVIRONMENT:  {stage}
WHEN:         {date} at {time}

{range}

CHANGES
============================

{log}
",
        user = facts.user_name,
        branch = facts.branch,
        stage = facts.stage,
        date = facts.timestamp.format("%m/%d/%Y"),
        time = facts.timestamp.format("%I:%M %p %Z"),
        range = facts.git_range.as_deref().unwrap_or_default(),
        log = facts.git_log,
    )
}

/// Base URL for commit and compare links.
///
/// `giturl` wins over `github`; blank values count as unset.
pub fn resolve_link_prefix(options: &MailOptions) -> Result<String, NotifyError> {
    let non_blank = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if let Some(giturl) = non_blank(&options.giturl) {
        return Ok(giturl.trim_end_matches('/').to_string());
    }

    if let Some(github) = non_blank(&options.github) {
        return Ok(format!("{}/{}", GITHUB_URL, github.trim_matches('/')));
    }

    Err(NotifyError::Configuration(
        "neither `giturl` nor `github` is set, cannot build commit links".to_string(),
    ))
}

/// HTML variant: ranges link to the compare view, leading hashes to the commit view.
pub fn render_html(body: &str, link_prefix: &str) -> String {
    let escaped = html_escape(body);
    let href_prefix = html_escape(link_prefix);

    // Ranges first: a rewritten range starts with `<a`, so the line-start
    // pass below can no longer match its left half.
    let with_ranges = COMMIT_RANGE_REGEX.replace_all(&escaped, |caps: &Captures| {
        format!(
            "<a href=\"{}/compare/{}...{}\">{}..{}</a>",
            href_prefix, &caps[1], &caps[2], &caps[1], &caps[2]
        )
    });

    let with_commits = LEADING_COMMIT_REGEX.replace_all(&with_ranges, |caps: &Captures| {
        format!(
            "<a href=\"{}/commit/{}\">{}</a>",
            href_prefix, &caps[1], &caps[1]
        )
    });

    wrap_pre(&with_commits)
}

/// Plain-text variant: only ranges are expanded, into bare compare URLs.
pub fn render_text(body: &str, link_prefix: &str) -> String {
    COMMIT_RANGE_REGEX
        .replace_all(body, |caps: &Captures| {
            format!("{}/compare/{}...{}", link_prefix, &caps[1], &caps[2])
        })
        .into_owned()
}

fn render_plain_html(body: &str) -> String {
    wrap_pre(&html_escape(body))
}

fn wrap_pre(body: &str) -> String {
    format!("<pre>\n{}</pre>\n", body)
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Title-case an application name: `my_app`, `my-app` and `myApp` all become `My App`.
fn titleize(name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in name.chars() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|word| capitalize(word))
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn facts(range: Option<&str>, log: &str) -> DeploymentFacts {
        DeploymentFacts {
            application: "app".to_string(),
            user_name: "alice".to_string(),
            branch: "main".to_string(),
            stage: "production".to_string(),
            timestamp: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 3, 7, 14, 5, 0)
                .unwrap(),
            git_range: range.map(str::to_string),
            git_log: log.to_string(),
        }
    }

    fn github_options() -> MailOptions {
        MailOptions {
            github: Some("acme/app".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_subject() {
        assert_eq!(
            build_subject("app", "main", "production"),
            "App branch main deployed to production"
        );
        assert_eq!(
            build_subject("my_cool-app", "feature/x", "staging"),
            "My Cool App branch feature/x deployed to staging"
        );
        assert_eq!(build_subject("", "", ""), " branch  deployed to ");
    }

    #[test]
    fn test_titleize() {
        assert_eq!(titleize("myApp"), "My App");
        assert_eq!(titleize("SHOUTY_NAME"), "Shouty Name");
        assert_eq!(titleize("api2 server"), "Api2 Server");
        assert_eq!(titleize("__"), "");
    }

    #[test]
    fn test_build_body() {
        let body = build_body(&facts(Some("aaaaaaa..bbbbbbb"), "aaaaaaa Fix X\nbbbbbbb Add Y"));
        assert!(body.contains("DEPLOYER:     alice\n"));
        assert!(body.contains("BRANCH:       main\n"));
        assert!(body.contains("ENVIRONMENT:  production\n"));
        assert!(body.contains("WHEN:         03/07/2024 at 02:05 PM +00:00\n"));
        assert!(body.contains("\naaaaaaa..bbbbbbb\n"));
        assert!(body.ends_with("============================\n\naaaaaaa Fix X\nbbbbbbb Add Y\n"));
    }

    #[test]
    fn test_build_body_uses_deploy_local_time() {
        let mut deploy = facts(None, "");
        deploy.timestamp = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 12, 31, 23, 30, 0)
            .unwrap();
        let body = build_body(&deploy);
        assert!(body.contains("WHEN:         12/31/2024 at 11:30 PM +02:00\n"));
    }

    #[test]
    fn test_build_body_empty_log() {
        let body = build_body(&facts(None, ""));
        assert!(body.ends_with("CHANGES\n============================\n\n\n"));
    }

    #[test]
    fn test_resolve_link_prefix_giturl_wins() {
        let options = MailOptions {
            giturl: Some("https://git.example.com".to_string()),
            github: Some("acct/repo".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_link_prefix(&options).unwrap(), "https://git.example.com");
    }

    #[test]
    fn test_resolve_link_prefix_github() {
        let options = MailOptions {
            github: Some("acct/repo".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_link_prefix(&options).unwrap(),
            "https://github.com/acct/repo"
        );
    }

    #[test]
    fn test_resolve_link_prefix_blank_giturl_falls_back() {
        let options = MailOptions {
            giturl: Some("".to_string()),
            github: Some("acct/repo".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_link_prefix(&options).unwrap(),
            "https://github.com/acct/repo"
        );

        let trailing = MailOptions {
            giturl: Some("https://git.example.com/app/".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_link_prefix(&trailing).unwrap(),
            "https://git.example.com/app"
        );
    }

    #[test]
    fn test_resolve_link_prefix_missing() {
        let result = resolve_link_prefix(&MailOptions::default());
        assert!(matches!(result, Err(NotifyError::Configuration(_))));
    }

    #[test]
    fn test_render_html_range() {
        let html = render_html("abc1234..def5678\n", "https://github.com/acct/repo");
        assert!(html.contains(
            "<a href=\"https://github.com/acct/repo/compare/abc1234...def5678\">abc1234..def5678</a>"
        ));
        // the left half of the range is not linked a second time
        assert!(!html.contains("/commit/abc1234"));
    }

    #[test]
    fn test_render_html_leading_commit() {
        let html = render_html("1234567 Fix bug\n", "https://github.com/acct/repo");
        assert!(html.contains(
            "<a href=\"https://github.com/acct/repo/commit/1234567\">1234567</a> Fix bug"
        ));
        assert!(html.starts_with("<pre>\n"));
        assert!(html.ends_with("</pre>\n"));
    }

    #[test]
    fn test_render_html_ignores_mid_line_and_malformed_hashes() {
        let body = "Revert 1234567\nabc123 short\n12345678 eight\nsee abc1234..def56789\n0123456789abcdef0123456789abcdef01234567 full\nABCDEF1 upper\n";
        let html = render_html(body, "https://x");
        assert!(!html.contains("<a "));
    }

    #[test]
    fn test_render_html_escapes_log() {
        let html = render_html("1234567 Use <Vec> & friends\n", "https://x");
        assert!(html.contains("Use &lt;Vec&gt; &amp; friends"));
        assert!(html.contains("<a href=\"https://x/commit/1234567\">1234567</a>"));
    }

    #[test]
    fn test_render_text() {
        let text = render_text(
            "abc1234..def5678\n1234567 Fix bug\n",
            "https://github.com/acct/repo",
        );
        assert_eq!(
            text,
            "https://github.com/acct/repo/compare/abc1234...def5678\n1234567 Fix bug\n"
        );
    }

    #[test]
    fn test_compose_with_links() {
        let message = compose(
            &facts(Some("aaaaaaa..bbbbbbb"), "aaaaaaa Fix X\nbbbbbbb Add Y"),
            &github_options(),
        );

        assert_eq!(message.subject, "App branch main deployed to production");
        assert_eq!(message.html_body.matches("/compare/").count(), 1);
        assert_eq!(message.html_body.matches("/commit/").count(), 2);
        assert!(message
            .text_body
            .contains("https://github.com/acme/app/compare/aaaaaaa...bbbbbbb"));
        assert!(!message.text_body.contains("/commit/"));
    }

    #[test]
    fn test_compose_without_link_prefix_degrades() {
        let message = compose(
            &facts(Some("aaaaaaa..bbbbbbb"), "aaaaaaa Fix X"),
            &MailOptions::default(),
        );

        assert!(!message.html_body.contains("<a "));
        assert!(message.html_body.contains("aaaaaaa..bbbbbbb"));
        assert!(message.text_body.contains("aaaaaaa..bbbbbbb"));
        assert!(!message.text_body.contains("/compare/"));
    }

    #[test]
    fn test_compose_is_fresh_per_deploy() {
        let options = github_options();
        let first = compose(&facts(Some("aaaaaaa..bbbbbbb"), "aaaaaaa Fix X"), &options);
        let second = compose(&facts(Some("bbbbbbb..ccccccc"), "ccccccc Add Z"), &options);
        assert_ne!(first.html_body, second.html_body);
        assert!(second.html_body.contains("/compare/bbbbbbb...ccccccc"));
    }
}
