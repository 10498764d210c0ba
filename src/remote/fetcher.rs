use reqwest::{Client, RequestBuilder};
use tracing::debug;

use crate::config::RemoteConfig;
use crate::models::{Platform, RemoteRepoInfo};

/// Fetch one file from a hosted repository through the platform's content API.
///
/// Without a branch the repository's default ref is used. Any non-2xx
/// response or transport failure yields `None`.
pub async fn fetch_file(
    client: &Client,
    config: &RemoteConfig,
    repo: &RemoteRepoInfo,
    path: &str,
) -> Option<String> {
    let request = match repo.platform {
        Platform::Github => github_request(client, config, repo, path),
        Platform::Gitlab => gitlab_request(client, config, repo, path),
    };

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(platform = %repo.platform, path, error = %e, "file fetch failed");
            return None;
        }
    };
    if !response.status().is_success() {
        debug!(platform = %repo.platform, path, status = %response.status(), "file not available");
        return None;
    }
    match response.text().await {
        Ok(body) => Some(body),
        Err(e) => {
            debug!(path, error = %e, "unreadable file body");
            None
        }
    }
}

/// `GET /repos/{owner}/{repo}/contents/{path}[?ref=branch]` with the raw media type.
fn github_request(
    client: &Client,
    config: &RemoteConfig,
    repo: &RemoteRepoInfo,
    path: &str,
) -> RequestBuilder {
    let url = format!(
        "{}/repos/{}/{}/contents/{}",
        config.github_api.trim_end_matches('/'),
        repo.owner,
        repo.repo,
        path.trim_start_matches('/')
    );
    let mut request = client
        .get(url)
        .header("Accept", "application/vnd.github.raw");
    if let Some(branch) = &repo.branch {
        request = request.query(&[("ref", branch)]);
    }
    if let Some(token) = &config.github_token {
        request = request.bearer_auth(token);
    }
    request
}

/// `GET /projects/{owner%2Frepo}/repository/files/{path%2F...}/raw?ref={branch|HEAD}`
fn gitlab_request(
    client: &Client,
    config: &RemoteConfig,
    repo: &RemoteRepoInfo,
    path: &str,
) -> RequestBuilder {
    let project = format!("{}/{}", repo.owner, repo.repo);
    let url = format!(
        "{}/projects/{}/repository/files/{}/raw",
        config.gitlab_api.trim_end_matches('/'),
        urlencoding::encode(&project),
        urlencoding::encode(path.trim_start_matches('/'))
    );
    let git_ref = repo.branch.as_deref().unwrap_or("HEAD");
    let mut request = client.get(url).query(&[("ref", git_ref)]);
    if let Some(token) = &config.gitlab_token {
        request = request.header("PRIVATE-TOKEN", token);
    }
    request
}
