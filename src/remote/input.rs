//! Classification of free-form analysis input and git URL parsing.

use regex::Regex;
use reqwest::Url;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{Platform, RemoteRepoInfo};
use crate::security;

/// Package sites whose `/package/<name>` pages map to a registry.
const KNOWN_SITES: &[(&str, &str)] = &[
    ("npmjs.com", "https://registry.npmjs.org"),
    ("www.npmjs.com", "https://registry.npmjs.org"),
    ("yarnpkg.com", "https://registry.yarnpkg.com"),
    ("classic.yarnpkg.com", "https://registry.yarnpkg.com"),
    ("npmmirror.com", "https://registry.npmmirror.com"),
    ("www.npmmirror.com", "https://registry.npmmirror.com"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputType {
    NpmPackage,
    NpmSiteUrl,
    GitUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedInput {
    #[serde(rename = "type")]
    pub kind: InputType,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

/// Decide what `input` refers to.
///
/// Site URLs are tried before generic URLs since every site URL is also a URL.
/// Anything unrecognized is treated as a git URL and left for
/// [`parse_git_url`] to reject.
pub fn parse_input_type(input: &str) -> ParsedInput {
    let input = input.trim();

    if let Some((name, registry)) = match_package_site(input) {
        return ParsedInput {
            kind: InputType::NpmSiteUrl,
            value: name,
            registry: Some(registry.to_string()),
        };
    }

    let git = ParsedInput {
        kind: InputType::GitUrl,
        value: input.to_string(),
        registry: None,
    };

    if input.starts_with("http://") || input.starts_with("https://") || is_scp_like(input) {
        return git;
    }

    if is_package_name(input) {
        return ParsedInput {
            kind: InputType::NpmPackage,
            value: input.to_string(),
            registry: None,
        };
    }

    git
}

fn match_package_site(input: &str) -> Option<(String, &'static str)> {
    let url = Url::parse(input).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    let registry = KNOWN_SITES
        .iter()
        .find(|(site, _)| site.eq_ignore_ascii_case(host))
        .map(|(_, registry)| *registry)?;

    let segments: Vec<String> = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()))
        .collect();
    if segments.first().map(String::as_str) != Some("package") {
        return None;
    }
    let name = match segments.get(1) {
        // `%40scope%2Fname` decodes to the whole scoped name in one segment.
        Some(scope) if scope.starts_with('@') && !scope.contains('/') => {
            format!("{scope}/{}", segments.get(2)?)
        }
        Some(name) => name.clone(),
        None => return None,
    };
    is_package_name(&name).then_some((name, registry))
}

/// `user@host:path`
fn is_scp_like(input: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:")
        .map(|re| re.is_match(input))
        .unwrap_or(false)
}

fn is_package_name(input: &str) -> bool {
    Regex::new(r"^(@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*$")
        .map(|re| input.len() <= 214 && re.is_match(input))
        .unwrap_or(false)
}

fn platform_for_host(host: &str) -> Result<Platform> {
    match host.to_ascii_lowercase().trim_start_matches("www.") {
        "github.com" => Ok(Platform::Github),
        "gitlab.com" => Ok(Platform::Gitlab),
        other => Err(Error::Validation(format!("unsupported git host `{other}`"))),
    }
}

/// Parse a repository reference into host platform, owner, repo and branch.
///
/// Accepted forms:
/// - `https://github.com/owner/repo[.git]` and `.../tree/<branch>`
/// - `https://gitlab.com/group/sub/repo` and `.../-/tree/<branch>`
/// - `git@github.com:owner/repo.git`
/// - `github:owner/repo`, `gitlab:group/repo` (optionally `#branch`)
pub fn parse_git_url(input: &str) -> Result<RemoteRepoInfo> {
    let input = input.trim();

    let (platform, path) = if let Some(rest) = input.strip_prefix("github:") {
        (Platform::Github, rest.to_string())
    } else if let Some(rest) = input.strip_prefix("gitlab:") {
        (Platform::Gitlab, rest.to_string())
    } else if is_scp_like(input) {
        let (user_host, path) = input
            .split_once(':')
            .ok_or_else(|| Error::Validation(format!("invalid git URL `{input}`")))?;
        let host = user_host.rsplit('@').next().unwrap_or(user_host);
        (platform_for_host(host)?, path.to_string())
    } else {
        let url = Url::parse(input)
            .map_err(|e| Error::Validation(format!("invalid git URL `{input}`: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Validation(format!("git URL `{input}` has no host")))?;
        (platform_for_host(host)?, url.path().to_string())
    };

    let (path, fragment_branch) = match path.split_once('#') {
        Some((path, branch)) => (path.to_string(), Some(branch.to_string())),
        None => (path, None),
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let (project, tree_branch) = match platform {
        Platform::Github => split_github_path(&segments),
        Platform::Gitlab => split_gitlab_path(&segments),
    };
    let branch = fragment_branch.or(tree_branch).filter(|b| !b.is_empty());

    let Some((repo, owner)) = project.split_last() else {
        return Err(Error::Validation(format!("git URL `{input}` has no repository")));
    };
    let repo = repo.trim_end_matches(".git");
    if owner.is_empty() || repo.is_empty() {
        return Err(Error::Validation(format!(
            "git URL `{input}` must name an owner and a repository"
        )));
    }
    for segment in owner.iter().copied().chain(std::iter::once(repo)) {
        security::validate_repo_segment(segment)?;
    }
    if let Some(branch) = &branch {
        security::validate_branch_name(branch)?;
    }

    Ok(RemoteRepoInfo {
        platform,
        owner: owner.join("/"),
        repo: repo.to_string(),
        branch,
    })
}

/// `owner/repo[/tree|blob/<branch...>]`
fn split_github_path<'a>(segments: &[&'a str]) -> (Vec<&'a str>, Option<String>) {
    let project: Vec<&str> = segments.iter().take(2).copied().collect();
    let branch = match segments.get(2) {
        Some(&"tree") | Some(&"blob") if segments.len() > 3 => Some(segments[3..].join("/")),
        _ => None,
    };
    (project, branch)
}

/// `group[/subgroup...]/repo[/-/tree|blob/<branch...>]`
fn split_gitlab_path<'a>(segments: &[&'a str]) -> (Vec<&'a str>, Option<String>) {
    let Some(dash) = segments.iter().position(|s| *s == "-") else {
        return (segments.to_vec(), None);
    };
    let project = segments[..dash].to_vec();
    let rest = &segments[dash + 1..];
    let branch = match rest.first() {
        Some(&"tree") | Some(&"blob") if rest.len() > 1 => Some(rest[1..].join("/")),
        _ => None,
    };
    (project, branch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_urls_resolve_registry() {
        let parsed = parse_input_type("https://www.npmjs.com/package/lodash");
        assert_eq!(
            parsed,
            ParsedInput {
                kind: InputType::NpmSiteUrl,
                value: "lodash".into(),
                registry: Some("https://registry.npmjs.org".into()),
            }
        );

        let scoped = parse_input_type("https://npmmirror.com/package/@vue/reactivity?activeTab=versions");
        assert_eq!(scoped.kind, InputType::NpmSiteUrl);
        assert_eq!(scoped.value, "@vue/reactivity");
        assert_eq!(scoped.registry.as_deref(), Some("https://registry.npmmirror.com"));

        let encoded = parse_input_type("https://classic.yarnpkg.com/package/%40types%2Fnode");
        assert_eq!(encoded.value, "@types/node");
        assert_eq!(encoded.registry.as_deref(), Some("https://registry.yarnpkg.com"));
    }

    #[test]
    fn test_classification_precedence() {
        assert_eq!(
            parse_input_type("https://www.npmjs.com/settings/profile").kind,
            InputType::GitUrl
        );
        assert_eq!(parse_input_type("https://github.com/a/b").kind, InputType::GitUrl);
        assert_eq!(parse_input_type("git@github.com:a/b.git").kind, InputType::GitUrl);
        assert_eq!(parse_input_type("express").kind, InputType::NpmPackage);
        assert_eq!(parse_input_type(" @types/node ").value, "@types/node");
        assert_eq!(parse_input_type("github:a/b").kind, InputType::GitUrl);
        assert_eq!(parse_input_type("Not A Package").kind, InputType::GitUrl);
    }

    #[test]
    fn test_parse_ssh_url() {
        let info = parse_git_url("git@github.com:owner/repo.git").unwrap();
        assert_eq!(
            info,
            RemoteRepoInfo {
                platform: Platform::Github,
                owner: "owner".into(),
                repo: "repo".into(),
                branch: None,
            }
        );
    }

    #[test]
    fn test_parse_github_tree_branch() {
        let info = parse_git_url("https://github.com/vercel/next.js/tree/canary").unwrap();
        assert_eq!(info.owner, "vercel");
        assert_eq!(info.repo, "next.js");
        assert_eq!(info.branch.as_deref(), Some("canary"));

        let nested = parse_git_url("https://github.com/o/r/tree/feature/login").unwrap();
        assert_eq!(nested.branch.as_deref(), Some("feature/login"));
    }

    #[test]
    fn test_parse_gitlab_nested_groups() {
        let info = parse_git_url("https://gitlab.com/group/sub/project/-/tree/main").unwrap();
        assert_eq!(info.platform, Platform::Gitlab);
        assert_eq!(info.owner, "group/sub");
        assert_eq!(info.repo, "project");
        assert_eq!(info.branch.as_deref(), Some("main"));

        let plain = parse_git_url("https://gitlab.com/group/project.git").unwrap();
        assert_eq!(plain.owner, "group");
        assert_eq!(plain.repo, "project");
        assert_eq!(plain.branch, None);
    }

    #[test]
    fn test_parse_shorthands() {
        let info = parse_git_url("gitlab:team/app#develop").unwrap();
        assert_eq!(info.platform, Platform::Gitlab);
        assert_eq!(info.owner, "team");
        assert_eq!(info.branch.as_deref(), Some("develop"));
        assert_eq!(parse_git_url("github:a/b").unwrap().repo, "b");
    }

    #[test]
    fn test_rejects_unknown_hosts_and_bad_branches() {
        assert!(matches!(
            parse_git_url("https://bitbucket.org/a/b"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            parse_git_url("https://github.com/a/b/tree/..%2F..%2Fetc"),
            Err(Error::Validation(_))
        ));
        assert!(parse_git_url("https://github.com/only-owner").is_err());
        assert!(parse_git_url("Not A Package").is_err());
    }

    #[test]
    fn test_rejects_unsafe_owner_and_repo() {
        for input in [
            "github:../..",
            "gitlab:./repo",
            "git@github.com:a/b?x=1",
            "git@gitlab.com:group/re po.git",
            "github:owner/repo%2F..",
        ] {
            assert!(
                matches!(parse_git_url(input), Err(Error::Validation(_))),
                "accepted {input}"
            );
        }
        assert_eq!(parse_git_url("github:my.org/my_repo-2").unwrap().owner, "my.org");
    }
}
