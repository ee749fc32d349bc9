//! forge::mock
//!
//! An in-memory [`Forge`] for tests. Drives the worker state machine
//! without a network, and lets tests assert on exactly which calls a
//! worker made.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::traits::{CapabilitySet, Forge, ForgeError, Note};
use crate::core::types::{MergeRequest, MrIid, Oid, Pipeline, Project, ProjectId, User, UserId};

/// A recorded call, for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AcceptMr(ProjectId, MrIid, String),
    ApproveMr(ProjectId, MrIid),
    UnapproveMr(ProjectId, MrIid),
    PostNote(ProjectId, MrIid, String),
    SetAssignees(ProjectId, MrIid, Vec<UserId>),
    ResetApprovals(ProjectId, MrIid),
}

#[derive(Default)]
struct State {
    projects: Vec<Project>,
    mrs: HashMap<(ProjectId, MrIid), MergeRequest>,
    pipelines_by_mr: HashMap<(ProjectId, MrIid), Vec<Pipeline>>,
    pipelines_by_branch: HashMap<(ProjectId, String), Vec<Pipeline>>,
    users: HashMap<String, User>,
    current_user: Option<User>,
    calls: Vec<Call>,
    /// Project/MR pairs whose `accept_mr` should fail with `Conflict`, to
    /// simulate a stale-target-branch race.
    accept_conflicts: std::collections::HashSet<(ProjectId, MrIid)>,
}

/// An in-memory `Forge` double. Cloning is shallow: all clones share the
/// same interior state, matching how a single `Arc<dyn Forge>` is shared
/// by the fleet coordinator.
pub struct MockForge {
    state: Mutex<State>,
    capabilities: CapabilitySet,
}

impl Default for MockForge {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            capabilities: CapabilitySet {
                mr_pipelines_endpoint: true,
                squash: true,
                locked_state: true,
            },
        }
    }
}

impl MockForge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(capabilities: CapabilitySet) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    pub fn add_project(&self, project: Project) {
        self.state.lock().unwrap().projects.push(project);
    }

    pub fn add_mr(&self, mr: MergeRequest) {
        let key = (mr.project_id, mr.iid);
        self.state.lock().unwrap().mrs.insert(key, mr);
    }

    pub fn add_user(&self, user: User) {
        self.state.lock().unwrap().users.insert(user.username.clone(), user);
    }

    /// Set the account returned by `current_user`, i.e. the identity the
    /// configured token would authenticate as.
    pub fn set_current_user(&self, user: User) {
        self.state.lock().unwrap().current_user = Some(user);
    }

    pub fn set_pipelines_for_mr(&self, project: ProjectId, mr: MrIid, pipelines: Vec<Pipeline>) {
        self.state
            .lock()
            .unwrap()
            .pipelines_by_mr
            .insert((project, mr), pipelines);
    }

    pub fn set_pipelines_for_branch(&self, project: ProjectId, branch: &str, pipelines: Vec<Pipeline>) {
        self.state
            .lock()
            .unwrap()
            .pipelines_by_branch
            .insert((project, branch.to_string()), pipelines);
    }

    /// Force the next `accept_mr` call against this MR to fail as if the
    /// target branch moved underneath it.
    pub fn force_accept_conflict(&self, project: ProjectId, mr: MrIid) {
        self.state.lock().unwrap().accept_conflicts.insert((project, mr));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Update an MR already registered with `add_mr`, e.g. after a test
    /// simulates the bot pushing a new sha.
    pub fn update_mr(&self, project: ProjectId, mr: MrIid, f: impl FnOnce(&mut MergeRequest)) {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.mrs.get_mut(&(project, mr)) {
            f(existing);
        }
    }
}

#[async_trait]
impl Forge for MockForge {
    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    async fn list_projects_for_member(&self) -> Result<Vec<Project>, ForgeError> {
        Ok(self.state.lock().unwrap().projects.clone())
    }

    async fn list_assigned_mrs(&self, project: ProjectId) -> Result<Vec<MergeRequest>, ForgeError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .mrs
            .values()
            .filter(|mr| mr.project_id == project)
            .cloned()
            .collect())
    }

    async fn get_mr(&self, project: ProjectId, mr: MrIid) -> Result<MergeRequest, ForgeError> {
        self.state
            .lock()
            .unwrap()
            .mrs
            .get(&(project, mr))
            .cloned()
            .ok_or_else(|| ForgeError::NotFound(format!("mr {}/{}", project, mr)))
    }

    async fn get_pipelines_for_mr(
        &self,
        project: ProjectId,
        mr: MrIid,
    ) -> Result<Vec<Pipeline>, ForgeError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pipelines_by_mr
            .get(&(project, mr))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_pipelines_for_branch(
        &self,
        project: ProjectId,
        branch: &crate::core::types::BranchName,
    ) -> Result<Vec<Pipeline>, ForgeError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pipelines_by_branch
            .get(&(project, branch.as_str().to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_user_by_username(&self, username: &str) -> Result<User, ForgeError> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| ForgeError::NotFound(format!("user '{}'", username)))
    }

    async fn current_user(&self) -> Result<User, ForgeError> {
        self.state
            .lock()
            .unwrap()
            .current_user
            .clone()
            .ok_or_else(|| ForgeError::Unauthorised("no current user configured".to_string()))
    }

    async fn accept_mr(
        &self,
        project: ProjectId,
        mr: MrIid,
        expected_sha: &Oid,
    ) -> Result<(), ForgeError> {
        let mut state = self.state.lock().unwrap();
        if state.accept_conflicts.remove(&(project, mr)) {
            return Err(ForgeError::Conflict(format!(
                "target branch moved underneath {}/{}",
                project, mr
            )));
        }
        if let Some(existing) = state.mrs.get(&(project, mr)) {
            if &existing.sha != expected_sha {
                return Err(ForgeError::Conflict(format!(
                    "sha mismatch on {}/{}",
                    project, mr
                )));
            }
        }
        if let Some(existing) = state.mrs.get_mut(&(project, mr)) {
            existing.state = crate::core::types::MrState::Merged;
        }
        state
            .calls
            .push(Call::AcceptMr(project, mr, expected_sha.as_str().to_string()));
        Ok(())
    }

    async fn approve_mr(&self, project: ProjectId, mr: MrIid) -> Result<(), ForgeError> {
        self.state.lock().unwrap().calls.push(Call::ApproveMr(project, mr));
        Ok(())
    }

    async fn unapprove_mr(&self, project: ProjectId, mr: MrIid) -> Result<(), ForgeError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::UnapproveMr(project, mr));
        Ok(())
    }

    async fn post_note(&self, project: ProjectId, mr: MrIid, note: Note<'_>) -> Result<(), ForgeError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::PostNote(project, mr, note.0.to_string()));
        Ok(())
    }

    async fn set_assignees(
        &self,
        project: ProjectId,
        mr: MrIid,
        assignees: &[UserId],
    ) -> Result<(), ForgeError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::SetAssignees(project, mr, assignees.to_vec()));
        Ok(())
    }

    async fn reset_approvals(&self, project: ProjectId, mr: MrIid) -> Result<(), ForgeError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::ResetApprovals(project, mr));
        Ok(())
    }
}
