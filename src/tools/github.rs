use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// `github.com/owner/repo` and `git@github.com:owner/repo(.git)`
static GITHUB_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:https?://)?(?:www\.)?github\.com[/:]([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)")
        .expect("valid github url regex")
});

/// Bare `owner/repo`, only trusted next to a repository keyword
static SHORTHAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s(`'\x22])([A-Za-z0-9][A-Za-z0-9_.-]*)/([A-Za-z0-9][A-Za-z0-9_.-]*)")
        .expect("valid shorthand regex")
});

static REPO_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(github|repo|repository|repositories)\b").expect("valid keyword regex")
});

/// Result of scanning a message for a repository reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubRequest {
    pub is_github_request: bool,
    pub owner: Option<String>,
    pub repo: Option<String>,
}

impl GitHubRequest {
    /// `owner/repo` when both coordinates were found
    pub fn full_name(&self) -> Option<String> {
        match (&self.owner, &self.repo) {
            (Some(owner), Some(repo)) => Some(format!("{}/{}", owner, repo)),
            _ => None,
        }
    }
}

/// Detect a repository reference and extract its coordinates.
pub fn detect_github_request(message: &str) -> GitHubRequest {
    if let Some(caps) = GITHUB_URL.captures(message) {
        if let Some((owner, repo)) = clean_coordinates(&caps[1], &caps[2]) {
            return GitHubRequest {
                is_github_request: true,
                owner: Some(owner),
                repo: Some(repo),
            };
        }
    }

    let mentions_repo = REPO_KEYWORD.is_match(message);
    if mentions_repo {
        for caps in SHORTHAND.captures_iter(message) {
            // Skip URL paths such as "https://example.com/a/b"
            let start = caps.get(1).map(|m| m.start()).unwrap_or(0);
            if message[..start].ends_with("//") || message[..start].ends_with('.') {
                continue;
            }
            if let Some((owner, repo)) = clean_coordinates(&caps[1], &caps[2]) {
                return GitHubRequest {
                    is_github_request: true,
                    owner: Some(owner),
                    repo: Some(repo),
                };
            }
        }
    }

    GitHubRequest {
        is_github_request: message.to_lowercase().contains("github"),
        owner: None,
        repo: None,
    }
}

/// Strip trailing punctuation and a `.git` suffix.
fn clean_coordinates(owner: &str, repo: &str) -> Option<(String, String)> {
    const TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', ')', '\'', '"', '`'];

    let owner = owner.trim_end_matches(TRAILING);
    let mut repo = repo.trim_end_matches(TRAILING);
    if repo.len() > 4 && repo.to_lowercase().ends_with(".git") {
        repo = &repo[..repo.len() - 4];
    }
    let repo = repo.trim_end_matches(TRAILING);

    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}
