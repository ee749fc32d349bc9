//! forge::gitlab
//!
//! GitLab REST API v4 implementation of [`Forge`].
//!
//! # Authentication
//!
//! Every request carries `PRIVATE-TOKEN: <token>`. The token is read once
//! at startup from the path named by `auth_token_file` and never logged.
//!
//! # Retries
//!
//! Network errors and 5xx responses are retried up to [`MAX_ATTEMPTS`] times
//! with a short fixed backoff. 4xx responses are never retried: they mean
//! the request itself was wrong, not that the server had a bad moment.
//!
//! # Wire format
//!
//! Field names and status strings below (`iid`, `source_branch`,
//! `target_branch`, `web_url`, `work_in_progress`, pipeline `status` values)
//! match the GitLab API's actual JSON, not a guess at one.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use super::traits::{CapabilitySet, Forge, ForgeError, Note};
use crate::core::types::{
    Approvals, BranchName, MergeMethod, MergeRequest, MrIid, MrState, Oid, Pipeline,
    PipelineStatus, Project, ProjectId, User, UserId,
};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// GitLab forge client.
pub struct GitLabForge {
    client: Client,
    token: String,
    base_url: String,
    capabilities: CapabilitySet,
}

impl GitLabForge {
    /// Construct a client and probe the instance's version to populate
    /// [`CapabilitySet`]. `base_url` is the instance root, e.g.
    /// `https://gitlab.example.com`, not the `/api/v4` prefix.
    pub async fn connect(
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, ForgeError> {
        let mut forge = Self {
            client: Client::new(),
            token: token.into(),
            base_url: base_url.into(),
            capabilities: CapabilitySet::default(),
        };
        forge.capabilities = forge.detect_capabilities().await?;
        Ok(forge)
    }

    async fn detect_capabilities(&self) -> Result<CapabilitySet, ForgeError> {
        let version: VersionResponse = self.get(&format!("{}/api/v4/version", self.base_url)).await?;
        let (major, minor) = parse_major_minor(&version.version).unwrap_or((0, 0));
        Ok(CapabilitySet {
            mr_pipelines_endpoint: (major, minor) >= (11, 5),
            squash: (major, minor) >= (10, 3),
            locked_state: (major, minor) >= (12, 4),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "PRIVATE-TOKEN",
            HeaderValue::from_str(&self.token).expect("token must be a valid header value"),
        );
        headers
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4/{}", self.base_url, path)
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ForgeError> {
        self.request(|c| c.get(url)).await
    }

    async fn request<T, F>(&self, build: F) -> Result<T, ForgeError>
    where
        T: for<'de> Deserialize<'de>,
        F: Fn(&Client) -> reqwest::RequestBuilder,
    {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let response = build(&self.client).headers(self.headers()).send().await;
            match response {
                Ok(resp) => match self.handle_response(resp).await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                        last_err = Some(e);
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                    Err(e) => return Err(e),
                },
                Err(e) => {
                    let err = ForgeError::NetworkError(e.to_string());
                    if attempt < MAX_ATTEMPTS {
                        last_err = Some(err);
                        tokio::time::sleep(RETRY_BACKOFF).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ForgeError::NetworkError("exhausted retries".into())))
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: Response,
    ) -> Result<T, ForgeError> {
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| ForgeError::ProtocolError(e.to_string()))
        } else {
            self.handle_error(response, status).await
        }
    }

    async fn handle_error<T>(
        &self,
        response: Response,
        status: StatusCode,
    ) -> Result<T, ForgeError> {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GitLabErrorResponse>(&body)
            .ok()
            .and_then(|e| e.message.or(e.error))
            .unwrap_or(body);

        Err(match status {
            StatusCode::NOT_FOUND => ForgeError::NotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ForgeError::Unauthorised(message),
            // 405 not-mergeable and 409 stale-sha both mean "try again once
            // the MR settles", same as finalise()'s sha-mismatch retry.
            StatusCode::CONFLICT | StatusCode::METHOD_NOT_ALLOWED => ForgeError::Conflict(message),
            // 406 unapproved and 422 are both "the server understood the
            // request and rejected it on the merits" — finalise() restarts
            // from PREPARE on either rather than treating it as transient.
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::NOT_ACCEPTABLE => {
                ForgeError::Unprocessable { reason: message }
            }
            s if s.is_server_error() => ForgeError::NetworkError(message),
            _ => ForgeError::ProtocolError(format!("{}: {}", status, message)),
        })
    }

    async fn post_empty(&self, url: &str) -> Result<(), ForgeError> {
        self.request::<serde_json::Value, _>(|c| c.post(url)).await?;
        Ok(())
    }

    /// GitLab never inlines the approver list on the MR resource itself;
    /// it lives on the separate approvals sub-resource.
    async fn fetch_approved_by(
        &self,
        project: ProjectId,
        mr: MrIid,
    ) -> Result<BTreeSet<User>, ForgeError> {
        let url = self.api_url(&format!("projects/{}/merge_requests/{}/approvals", project, mr.0));
        let raw: ApprovalsResponse = self.get(&url).await?;
        Ok(raw.approved_by.into_iter().map(|a| a.user.into_domain()).collect())
    }
}

#[async_trait]
impl Forge for GitLabForge {
    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    async fn list_projects_for_member(&self) -> Result<Vec<Project>, ForgeError> {
        let url = self.api_url("projects?membership=true&per_page=100");
        let raw: Vec<ProjectResponse> = self.get(&url).await?;
        raw.into_iter().map(ProjectResponse::into_domain).collect()
    }

    async fn list_assigned_mrs(&self, project: ProjectId) -> Result<Vec<MergeRequest>, ForgeError> {
        let url = self.api_url(&format!(
            "projects/{}/merge_requests?scope=assigned_to_me&state=opened",
            project
        ));
        let raw: Vec<MrResponse> = self.get(&url).await?;
        let mut mrs = Vec::with_capacity(raw.len());
        for response in raw {
            let iid = MrIid(response.iid);
            let approved_by = self.fetch_approved_by(project, iid).await?;
            mrs.push(response.into_domain(approved_by)?);
        }
        Ok(mrs)
    }

    async fn get_mr(&self, project: ProjectId, mr: MrIid) -> Result<MergeRequest, ForgeError> {
        let url = self.api_url(&format!("projects/{}/merge_requests/{}", project, mr.0));
        let raw: MrResponse = self.get(&url).await?;
        let approved_by = self.fetch_approved_by(project, mr).await?;
        raw.into_domain(approved_by)
    }

    async fn get_pipelines_for_mr(
        &self,
        project: ProjectId,
        mr: MrIid,
    ) -> Result<Vec<Pipeline>, ForgeError> {
        let url = self.api_url(&format!(
            "projects/{}/merge_requests/{}/pipelines",
            project, mr.0
        ));
        let raw: Vec<PipelineResponse> = self.get(&url).await?;
        raw.into_iter().map(PipelineResponse::into_domain).collect()
    }

    async fn get_pipelines_for_branch(
        &self,
        project: ProjectId,
        branch: &BranchName,
    ) -> Result<Vec<Pipeline>, ForgeError> {
        let url = self.api_url(&format!(
            "projects/{}/pipelines?ref={}",
            project,
            branch.as_str()
        ));
        let raw: Vec<PipelineResponse> = self.get(&url).await?;
        raw.into_iter().map(PipelineResponse::into_domain).collect()
    }

    async fn fetch_user_by_username(&self, username: &str) -> Result<User, ForgeError> {
        let url = self.api_url(&format!("users?username={}", username));
        let raw: Vec<UserResponse> = self.get(&url).await?;
        raw.into_iter()
            .next()
            .map(UserResponse::into_domain)
            .ok_or_else(|| ForgeError::NotFound(format!("user '{}'", username)))
    }

    async fn current_user(&self) -> Result<User, ForgeError> {
        let url = self.api_url("user");
        let raw: UserResponse = self.get(&url).await?;
        Ok(raw.into_domain())
    }

    async fn accept_mr(
        &self,
        project: ProjectId,
        mr: MrIid,
        expected_sha: &Oid,
    ) -> Result<(), ForgeError> {
        let url = self.api_url(&format!(
            "projects/{}/merge_requests/{}/merge?sha={}",
            project,
            mr.0,
            expected_sha.as_str()
        ));
        self.request::<serde_json::Value, _>(|c| c.put(&url)).await?;
        Ok(())
    }

    async fn approve_mr(&self, project: ProjectId, mr: MrIid) -> Result<(), ForgeError> {
        let url = self.api_url(&format!("projects/{}/merge_requests/{}/approve", project, mr.0));
        self.post_empty(&url).await
    }

    async fn unapprove_mr(&self, project: ProjectId, mr: MrIid) -> Result<(), ForgeError> {
        let url = self.api_url(&format!(
            "projects/{}/merge_requests/{}/unapprove",
            project, mr.0
        ));
        self.post_empty(&url).await
    }

    async fn post_note(
        &self,
        project: ProjectId,
        mr: MrIid,
        note: Note<'_>,
    ) -> Result<(), ForgeError> {
        let url = self.api_url(&format!("projects/{}/merge_requests/{}/notes", project, mr.0));
        #[derive(Serialize)]
        struct Body<'a> {
            body: &'a str,
        }
        self.request::<serde_json::Value, _>(|c| c.post(&url).json(&Body { body: note.0 }))
            .await?;
        Ok(())
    }

    async fn set_assignees(
        &self,
        project: ProjectId,
        mr: MrIid,
        assignees: &[UserId],
    ) -> Result<(), ForgeError> {
        let ids = assignees
            .iter()
            .map(|id| id.0.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let url = self.api_url(&format!(
            "projects/{}/merge_requests/{}?assignee_ids={}",
            project, mr.0, ids
        ));
        self.request::<serde_json::Value, _>(|c| c.put(&url)).await?;
        Ok(())
    }

    async fn reset_approvals(&self, project: ProjectId, mr: MrIid) -> Result<(), ForgeError> {
        self.unapprove_mr(project, mr).await
    }
}

fn parse_major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn parse_mr_state(state: &str, merge_status: Option<&str>) -> MrState {
    match state {
        "opened" => {
            if merge_status == Some("locked") {
                MrState::Locked
            } else {
                MrState::Opened
            }
        }
        "closed" => MrState::Closed,
        "merged" => MrState::Merged,
        "locked" => MrState::Locked,
        _ => MrState::Opened,
    }
}

fn parse_pipeline_status(status: &str) -> PipelineStatus {
    match status {
        "success" => PipelineStatus::Success,
        "failed" => PipelineStatus::Failed,
        "canceled" => PipelineStatus::Canceled,
        "skipped" => PipelineStatus::Skipped,
        "created" => PipelineStatus::Created,
        "running" => PipelineStatus::Running,
        "manual" => PipelineStatus::Manual,
        _ => PipelineStatus::Pending,
    }
}

#[derive(Debug, Deserialize)]
struct GitLabErrorResponse {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    id: u64,
    path_with_namespace: String,
    merge_method: String,
    approvals_before_merge: Option<u32>,
    reset_approvals_on_push: Option<bool>,
    ssh_url_to_repo: String,
}

impl ProjectResponse {
    fn into_domain(self) -> Result<Project, ForgeError> {
        let merge_method = match self.merge_method.as_str() {
            "merge" => MergeMethod::Merge,
            "rebase_merge" => MergeMethod::RebaseMerge,
            "ff" => MergeMethod::FfOnly,
            other => {
                return Err(ForgeError::ProtocolError(format!(
                    "unknown merge_method '{}'",
                    other
                )))
            }
        };
        Ok(Project {
            id: ProjectId(self.id),
            path: self.path_with_namespace,
            merge_method,
            approvals_required: self.approvals_before_merge.unwrap_or(0),
            reset_approvals_on_push: self.reset_approvals_on_push.unwrap_or(true),
            ssh_url_to_repo: self.ssh_url_to_repo,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: u64,
    name: String,
    username: String,
    email: Option<String>,
}

impl UserResponse {
    fn into_domain(self) -> User {
        User {
            id: UserId(self.id),
            name: self.name,
            username: self.username,
            email: self.email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApprovalsResponse {
    approved_by: Vec<ApprovedByEntry>,
}

#[derive(Debug, Deserialize)]
struct ApprovedByEntry {
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct MrResponse {
    id: u64,
    iid: u64,
    project_id: u64,
    source_project_id: u64,
    source_branch: String,
    target_branch: String,
    sha: String,
    title: String,
    description: Option<String>,
    assignees: Vec<UserResponse>,
    author: UserResponse,
    state: String,
    merge_status: Option<String>,
    work_in_progress: bool,
    web_url: String,
    updated_at: chrono::DateTime<chrono::Utc>,
    approvals_left: Option<i64>,
    blocking_discussions_resolved: Option<bool>,
}

impl MrResponse {
    /// `approved_by` comes from the separate approvals sub-resource
    /// ([`GitLabForge::fetch_approved_by`]); GitLab never inlines it here.
    /// `approvals_left` is "approvals still needed", so the threshold this
    /// MR was actually opened against is `len(approved_by) + approvals_left`.
    fn into_domain(self, approved_by: BTreeSet<User>) -> Result<MergeRequest, ForgeError> {
        let state = parse_mr_state(&self.state, self.merge_status.as_deref());
        let mut assignees = BTreeSet::new();
        for a in self.assignees {
            assignees.insert(a.into_domain());
        }
        let required = approved_by.len() as u32
            + self.approvals_left.map(|left| left.max(0) as u32).unwrap_or(0);

        Ok(MergeRequest {
            id: self.id,
            iid: MrIid(self.iid),
            project_id: ProjectId(self.project_id),
            source_project_id: ProjectId(self.source_project_id),
            source_branch: BranchName::new(self.source_branch)
                .map_err(|e| ForgeError::ProtocolError(e.to_string()))?,
            target_branch: BranchName::new(self.target_branch)
                .map_err(|e| ForgeError::ProtocolError(e.to_string()))?,
            sha: Oid::new(self.sha).map_err(|e| ForgeError::ProtocolError(e.to_string()))?,
            title: self.title,
            description: self.description.unwrap_or_default(),
            assignees,
            author: self.author.into_domain(),
            approvals: Approvals {
                by: approved_by,
                required,
            },
            state,
            work_in_progress: self.work_in_progress,
            web_url: self.web_url,
            updated_at: self.updated_at,
            has_unresolved_discussions: !self.blocking_discussions_resolved.unwrap_or(true),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PipelineResponse {
    sha: String,
    #[serde(rename = "ref")]
    git_ref: String,
    status: String,
    web_url: String,
}

impl PipelineResponse {
    fn into_domain(self) -> Result<Pipeline, ForgeError> {
        Ok(Pipeline {
            sha: Oid::new(self.sha).map_err(|e| ForgeError::ProtocolError(e.to_string()))?,
            git_ref: self.git_ref,
            status: parse_pipeline_status(&self.status),
            web_url: self.web_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version() {
        assert_eq!(parse_major_minor("16.4.1-ee"), Some((16, 4)));
        assert_eq!(parse_major_minor("garbage"), None);
    }

    #[test]
    fn mr_state_mapping() {
        assert_eq!(parse_mr_state("opened", None), MrState::Opened);
        assert_eq!(parse_mr_state("opened", Some("locked")), MrState::Locked);
        assert_eq!(parse_mr_state("closed", None), MrState::Closed);
        assert_eq!(parse_mr_state("merged", None), MrState::Merged);
    }

    #[test]
    fn pipeline_status_mapping() {
        assert_eq!(parse_pipeline_status("success"), PipelineStatus::Success);
        assert_eq!(parse_pipeline_status("failed"), PipelineStatus::Failed);
        assert_eq!(parse_pipeline_status("running"), PipelineStatus::Running);
        assert_eq!(
            parse_pipeline_status("waiting_for_resource"),
            PipelineStatus::Pending
        );
        assert_eq!(parse_pipeline_status("manual"), PipelineStatus::Manual);
    }
}
