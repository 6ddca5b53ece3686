//! GitHub integration: webhook validation and fix pull requests.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;

use crate::platforms::http_client;
use crate::remediation::{PullRequest, SourceControl, SourceControlError};

type HmacSha256 = Hmac<Sha256>;

/// Validate a GitHub webhook signature (X-Hub-Signature-256).
///
/// The header must be `sha256=` followed by the lowercase hex HMAC of the raw
/// body. An empty secret disables validation entirely, which is only
/// acceptable for local development.
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured, skipping validation");
        return true;
    }

    let Some(sig) = signature.strip_prefix("sha256=") else {
        return false;
    };
    if !sig.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return false;
    }
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    // Constant-time comparison.
    mac.verify_slice(&sig_bytes).is_ok()
}

/// Compute the header value GitHub would send for `payload`.
#[cfg(test)]
pub(crate) fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Opens fix pull requests through the GitHub REST API.
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Deserialize)]
struct GitCommit {
    sha: String,
    tree: GitObject,
}

#[derive(Deserialize)]
struct PullResponse {
    html_url: String,
    number: i64,
}

/// Where the change summary is committed on a fix branch.
fn summary_path(branch: &str) -> String {
    format!(".autofix/{}.md", branch.replace('/', "-"))
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_timeout(api_url, token, crate::platforms::REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        api_url: impl Into<String>,
        token: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            client: http_client(timeout),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.api_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "centrix-autofix")
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SourceControlError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| SourceControlError::Unreachable(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!("GitHub API request failed: {} {}", status, text);
            return Err(SourceControlError::Rejected { status, body: text });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, SourceControlError> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| SourceControlError::Unreachable(e.to_string()))
    }

    /// Commit `content` at `path` on top of `parent` and return the new commit's sha.
    async fn commit_file(
        &self,
        repo: &str,
        parent: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, SourceControlError> {
        let base: GitCommit = self
            .send_json(self.request(
                reqwest::Method::GET,
                &format!("/repos/{repo}/git/commits/{parent}"),
            ))
            .await?;

        let tree: GitObject = self
            .send_json(
                self.request(reqwest::Method::POST, &format!("/repos/{repo}/git/trees"))
                    .json(&serde_json::json!({
                        "base_tree": base.tree.sha,
                        "tree": [{
                            "path": path,
                            "mode": "100644",
                            "type": "blob",
                            "content": content,
                        }],
                    })),
            )
            .await?;

        let commit: GitObject = self
            .send_json(
                self.request(reqwest::Method::POST, &format!("/repos/{repo}/git/commits"))
                    .json(&serde_json::json!({
                        "message": message,
                        "tree": tree.sha,
                        "parents": [base.sha],
                    })),
            )
            .await?;
        Ok(commit.sha)
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    /// Branch off `base`, commit the change summary, then open the pull request.
    ///
    /// GitHub refuses a pull request whose head has no commits beyond its base,
    /// so the branch is created already pointing at the fix commit.
    async fn open_pull_request(
        &self,
        repo: &str,
        branch: &str,
        base: &str,
        title: &str,
        summary: &str,
    ) -> Result<PullRequest, SourceControlError> {
        if self.token.is_empty() {
            return Err(SourceControlError::NotConfigured);
        }

        let base_ref: GitRef = self
            .send_json(self.request(
                reqwest::Method::GET,
                &format!("/repos/{repo}/git/ref/heads/{base}"),
            ))
            .await?;

        let head = self
            .commit_file(repo, &base_ref.object.sha, &summary_path(branch), summary, title)
            .await?;

        self.send(
            self.request(reqwest::Method::POST, &format!("/repos/{repo}/git/refs"))
                .json(&serde_json::json!({
                    "ref": format!("refs/heads/{branch}"),
                    "sha": head,
                })),
        )
        .await?;

        let pull: PullResponse = self
            .send_json(
                self.request(reqwest::Method::POST, &format!("/repos/{repo}/pulls"))
                    .json(&serde_json::json!({
                        "title": title,
                        "head": branch,
                        "base": base,
                        "body": summary,
                    })),
            )
            .await?;

        tracing::info!(repo, branch, commit = %head, pr = pull.number, "Fix pull request opened");

        Ok(PullRequest {
            url: pull.html_url,
            number: pull.number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "It's a Secret to Everybody";
    const BODY: &[u8] = b"Hello, World!";

    #[test]
    fn accepts_valid_signature() {
        // Vector from GitHub's webhook validation docs.
        let header = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert_eq!(sign(SECRET, BODY), header);
        assert!(validate_signature(SECRET, BODY, header));
    }

    #[test]
    fn rejects_tampered_body_and_bad_headers() {
        let header = sign(SECRET, BODY);
        assert!(!validate_signature(SECRET, b"Hello, World?", &header));
        assert!(!validate_signature(SECRET, BODY, ""));
        assert!(!validate_signature(SECRET, BODY, header.trim_start_matches("sha256=")));
        assert!(!validate_signature(SECRET, BODY, &header.to_uppercase().replace("SHA256=", "sha256=")));
        assert!(!validate_signature(SECRET, BODY, "sha256=zz"));
    }

    #[test]
    fn empty_secret_is_permissive() {
        assert!(validate_signature("", BODY, ""));
    }

    #[tokio::test]
    async fn commits_the_summary_before_opening_the_pull_request() {
        let mut server = mockito::Server::new_async().await;
        let base = server
            .mock("GET", "/repos/acme/app/git/ref/heads/main")
            .with_status(200)
            .with_body(r#"{"ref":"refs/heads/main","object":{"sha":"abc123","type":"commit"}}"#)
            .expect(1)
            .create_async()
            .await;
        let base_commit = server
            .mock("GET", "/repos/acme/app/git/commits/abc123")
            .with_status(200)
            .with_body(r#"{"sha":"abc123","tree":{"sha":"tree0"}}"#)
            .expect(1)
            .create_async()
            .await;
        let tree = server
            .mock("POST", "/repos/acme/app/git/trees")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "base_tree": "tree0",
                "tree": [{
                    "path": ".autofix/auto-fix-9-1.md",
                    "mode": "100644",
                    "type": "blob",
                    "content": "Add package foo",
                }],
            })))
            .with_status(201)
            .with_body(r#"{"sha":"tree1"}"#)
            .expect(1)
            .create_async()
            .await;
        let commit = server
            .mock("POST", "/repos/acme/app/git/commits")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "message": "Auto-fix",
                "tree": "tree1",
                "parents": ["abc123"],
            })))
            .with_status(201)
            .with_body(r#"{"sha":"fix456"}"#)
            .expect(1)
            .create_async()
            .await;
        // The branch must point at the fix commit, not at the base head.
        let branch = server
            .mock("POST", "/repos/acme/app/git/refs")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "ref": "refs/heads/auto-fix/9/1",
                "sha": "fix456",
            })))
            .with_status(201)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let pull = server
            .mock("POST", "/repos/acme/app/pulls")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "head": "auto-fix/9/1",
                "base": "main",
            })))
            .with_status(201)
            .with_body(r#"{"html_url":"https://github.com/acme/app/pull/12","number":12}"#)
            .expect(1)
            .create_async()
            .await;

        let client = GitHubClient::new(server.url(), "token");
        let pr = client
            .open_pull_request("acme/app", "auto-fix/9/1", "main", "Auto-fix", "Add package foo")
            .await
            .unwrap();

        assert_eq!(pr.number, 12);
        assert_eq!(pr.url, "https://github.com/acme/app/pull/12");
        base.assert_async().await;
        base_commit.assert_async().await;
        tree.assert_async().await;
        commit.assert_async().await;
        branch.assert_async().await;
        pull.assert_async().await;
    }

    #[tokio::test]
    async fn failed_commit_opens_no_branch_or_pull_request() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/app/git/ref/heads/main")
            .with_status(200)
            .with_body(r#"{"object":{"sha":"abc123"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/app/git/commits/abc123")
            .with_status(200)
            .with_body(r#"{"sha":"abc123","tree":{"sha":"tree0"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/repos/acme/app/git/trees")
            .with_status(403)
            .with_body("Resource not accessible by integration")
            .create_async()
            .await;
        let branch = server
            .mock("POST", "/repos/acme/app/git/refs")
            .expect(0)
            .create_async()
            .await;
        let pull = server
            .mock("POST", "/repos/acme/app/pulls")
            .expect(0)
            .create_async()
            .await;

        let client = GitHubClient::new(server.url(), "token");
        let err = client
            .open_pull_request("acme/app", "auto-fix/9/1", "main", "Auto-fix", "s")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceControlError::Rejected { status: 403, .. }));
        branch.assert_async().await;
        pull.assert_async().await;
    }

    #[tokio::test]
    async fn silent_api_is_reported_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = GitHubClient::with_timeout(url, "token", std::time::Duration::from_millis(200));
        let err = client
            .open_pull_request("acme/app", "auto-fix/1/1", "main", "t", "s")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceControlError::Unreachable(_)));
        server.abort();
    }

    #[tokio::test]
    async fn missing_token_is_reported() {
        let client = GitHubClient::new("http://127.0.0.1:1", "");
        let err = client
            .open_pull_request("acme/app", "auto-fix/1/1", "main", "t", "s")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceControlError::NotConfigured));
    }
}
