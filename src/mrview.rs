//! mrview
//!
//! Read-only predicates over a [`MergeRequest`] snapshot. An MR View is
//! cheap to construct and thrown away every poll cycle — nothing here
//! mutates forge state or caches across iterations.

use regex::Regex;

use crate::core::types::{MergeRequest, Project, User};

/// Is `user` currently in the MR's assignee set?
///
/// Supports both single- and multi-assignee forges: the bot only needs to
/// be *one* of possibly several assignees to be considered responsible for
/// landing it.
pub fn is_assigned_to(mr: &MergeRequest, user: &User) -> bool {
    mr.assignees.iter().any(|a| a.id == user.id)
}

/// Is the MR approved to its project's threshold, with the reviewer-equals-
/// author guard applied? An approval set whose only member is the MR's
/// author never counts, regardless of count.
pub fn is_approved(mr: &MergeRequest, project: &Project) -> bool {
    if !mr.approvals.meets_threshold() {
        return false;
    }
    let non_author_approvers = mr
        .approvals
        .by
        .iter()
        .filter(|u| u.id != mr.author.id)
        .count();
    non_author_approvers as u32 >= project.approvals_required
}

/// Does the MR's source branch name match `pattern`?
pub fn source_branch_matches(mr: &MergeRequest, pattern: &Regex) -> bool {
    pattern.is_match(mr.source_branch.as_str())
}

/// Does the MR's target branch name match `pattern`?
pub fn target_branch_matches(mr: &MergeRequest, pattern: &Regex) -> bool {
    pattern.is_match(mr.target_branch.as_str())
}

/// Refuses MRs whose source branch is the target branch itself — merging a
/// branch into itself is never a valid candidate, regardless of what the
/// branch happens to be named (including `master`).
pub fn is_trivial_source_branch(mr: &MergeRequest) -> bool {
    mr.source_branch.is_same_as(&mr.target_branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Approvals, BranchName, MergeMethod, MrIid, MrState, Oid, ProjectId, UserId};
    use std::collections::BTreeSet;

    fn user(id: u64, username: &str) -> User {
        User {
            id: UserId(id),
            name: username.to_string(),
            username: username.to_string(),
            email: None,
        }
    }

    fn project(approvals_required: u32) -> Project {
        Project {
            id: ProjectId(1),
            path: "group/project".to_string(),
            merge_method: MergeMethod::RebaseMerge,
            approvals_required,
            reset_approvals_on_push: true,
            ssh_url_to_repo: "git@gitlab.example.com:group/project.git".to_string(),
        }
    }

    fn mr(source: &str, target: &str, author: User, approvers: Vec<User>) -> MergeRequest {
        let mut by = BTreeSet::new();
        for approver in &approvers {
            by.insert(approver.clone());
        }
        MergeRequest {
            id: 1,
            iid: MrIid(42),
            project_id: ProjectId(1),
            source_project_id: ProjectId(1),
            source_branch: BranchName::new(source).unwrap(),
            target_branch: BranchName::new(target).unwrap(),
            sha: Oid::new("a".repeat(40)).unwrap(),
            title: "Fix the bug".to_string(),
            description: String::new(),
            assignees: BTreeSet::from([user(99, "marge")]),
            author,
            approvals: Approvals {
                by,
                required: 1,
            },
            state: MrState::Opened,
            work_in_progress: false,
            web_url: "https://example.com/mr/42".to_string(),
            updated_at: chrono::Utc::now(),
            has_unresolved_discussions: false,
        }
    }

    #[test]
    fn assigned_to_bot() {
        let mr = mr("feat/x", "main", user(1, "alice"), vec![user(2, "bob")]);
        assert!(is_assigned_to(&mr, &user(99, "marge")));
        assert!(!is_assigned_to(&mr, &user(100, "other-bot")));
    }

    #[test]
    fn approved_meets_project_threshold() {
        let mr = mr("feat/x", "main", user(1, "alice"), vec![user(2, "bob")]);
        assert!(is_approved(&mr, &project(1)));
        assert!(!is_approved(&mr, &project(2)));
    }

    #[test]
    fn author_only_approval_does_not_count() {
        let author = user(1, "alice");
        let mr = mr("feat/x", "main", author.clone(), vec![author]);
        assert!(!is_approved(&mr, &project(1)));
    }

    #[test]
    fn branch_regexes() {
        let mr = mr("feat/x", "main", user(1, "alice"), vec![]);
        let feat = Regex::new(r"^feat/").unwrap();
        let release = Regex::new(r"^release/").unwrap();
        assert!(source_branch_matches(&mr, &feat));
        assert!(!source_branch_matches(&mr, &release));
        assert!(target_branch_matches(&mr, &Regex::new("^main$").unwrap()));
    }

    #[test]
    fn trivial_source_branch_guard() {
        let trivial = mr("main", "main", user(1, "alice"), vec![]);
        let normal = mr("feat/x", "main", user(1, "alice"), vec![]);
        assert!(is_trivial_source_branch(&trivial));
        assert!(!is_trivial_source_branch(&normal));
    }
}
