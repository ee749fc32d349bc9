//! trailer
//!
//! The Commit Rewriter: prepends `Part-of` and appends `Reviewed-by` and
//! `Tested-by` trailers to a commit message as it is replayed during a
//! rebase or merge, before the result is pushed.
//!
//! # Idempotence
//!
//! Rewriting strips any existing trailer lines matching the keys this
//! module manages before re-adding them, so running the rewrite twice over
//! the same inputs produces byte-identical output. This matters because a
//! rejected push sends a worker back through PREPARE, which rewrites the
//! same commits again.
//!
//! # Ordering
//!
//! `Reviewed-by` trailers are sorted by username so the rewrite is
//! deterministic regardless of the order approvals arrived in.

use thiserror::Error;

use crate::core::types::User;

const REVIEWED_BY: &str = "Reviewed-by";
const TESTED_BY: &str = "Tested-by";
const PART_OF: &str = "Part-of";

/// Errors from rewriting a commit message's trailers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrailerError {
    /// `add_reviewers` is set but an approver has no public email on file,
    /// so no valid `Reviewed-by: Name <email>` line can be produced.
    #[error("approver '{0}' has no email on file")]
    MissingEmail(String),
}

/// What to append, already decided by the caller from [`crate::core::config::Config`].
#[derive(Clone, Copy)]
pub struct TrailerPlan<'a> {
    pub reviewers: &'a [User],
    pub tested_by: Option<&'a str>,
    pub part_of: Option<&'a str>,
}

impl<'a> TrailerPlan<'a> {
    /// No trailers to add. Used when none of `add-reviewers`, `add-tested`,
    /// `add-part-of` are configured.
    pub fn empty() -> Self {
        Self {
            reviewers: &[],
            tested_by: None,
            part_of: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reviewers.is_empty() && self.tested_by.is_none() && self.part_of.is_none()
    }

    /// The same plan, minus `tested_by` — used for every commit but the tip,
    /// since `Tested-by` only belongs on the commit CI actually ran on.
    pub(crate) fn without_tested_by(&self) -> Self {
        Self {
            reviewers: self.reviewers,
            tested_by: None,
            part_of: self.part_of,
        }
    }
}

/// Rewrite `message`'s trailers according to `plan`.
///
/// # Errors
///
/// Returns [`TrailerError::MissingEmail`] if a reviewer lacks an email and
/// `plan.reviewers` is non-empty.
pub fn rewrite(message: &str, plan: &TrailerPlan<'_>) -> Result<String, TrailerError> {
    let (body, mut trailers) = split_trailers(message);

    trailers.retain(|line| !is_managed_trailer(line));

    if let Some(part_of) = plan.part_of {
        trailers.insert(0, format!("{}: {}", PART_OF, part_of));
    }

    let mut reviewers: Vec<&User> = plan.reviewers.iter().collect();
    reviewers.sort_by(|a, b| a.username.cmp(&b.username));
    for reviewer in reviewers {
        let email = reviewer
            .email
            .as_ref()
            .ok_or_else(|| TrailerError::MissingEmail(reviewer.username.clone()))?;
        trailers.push(format!("{}: {} <{}>", REVIEWED_BY, reviewer.name, email));
    }

    if let Some(tested_by) = plan.tested_by {
        trailers.push(format!("{}: {}", TESTED_BY, tested_by));
    }

    Ok(assemble(&body, &trailers))
}

fn is_managed_trailer(line: &str) -> bool {
    [REVIEWED_BY, TESTED_BY, PART_OF]
        .iter()
        .any(|key| line.starts_with(&format!("{}: ", key)))
}

/// Split a commit message into its body and its trailing trailer block.
/// The trailer block is the maximal suffix of `key: value` lines preceded
/// by a blank line (or the whole message, if it's all trailers).
fn split_trailers(message: &str) -> (String, Vec<String>) {
    let lines: Vec<&str> = message.lines().collect();
    let mut split_at = lines.len();
    for (i, line) in lines.iter().enumerate().rev() {
        if line.trim().is_empty() {
            break;
        }
        if !looks_like_trailer(line) {
            break;
        }
        split_at = i;
    }

    let body_lines = &lines[..split_at];
    let trailer_lines: Vec<String> = lines[split_at..].iter().map(|s| s.to_string()).collect();

    let mut body = body_lines.join("\n");
    while body.ends_with('\n') {
        body.pop();
    }
    (body, trailer_lines)
}

fn looks_like_trailer(line: &str) -> bool {
    match line.split_once(": ") {
        Some((key, _)) => !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '-'),
        None => false,
    }
}

fn assemble(body: &str, trailers: &[String]) -> String {
    if trailers.is_empty() {
        return body.to_string();
    }
    format!("{}\n\n{}", body, trailers.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::UserId;

    fn user(username: &str, email: Option<&str>) -> User {
        User {
            id: UserId(1),
            name: username.to_string(),
            username: username.to_string(),
            email: email.map(str::to_string),
        }
    }

    #[test]
    fn appends_reviewed_by_sorted_by_username() {
        let reviewers = vec![
            user("zoe", Some("zoe@example.com")),
            user("alice", Some("alice@example.com")),
        ];
        let plan = TrailerPlan {
            reviewers: &reviewers,
            tested_by: None,
            part_of: None,
        };
        let result = rewrite("Fix the bug", &plan).unwrap();
        let alice_pos = result.find("alice").unwrap();
        let zoe_pos = result.find("zoe").unwrap();
        assert!(alice_pos < zoe_pos);
    }

    #[test]
    fn missing_email_is_an_error() {
        let reviewers = vec![user("alice", None)];
        let plan = TrailerPlan {
            reviewers: &reviewers,
            tested_by: None,
            part_of: None,
        };
        assert_eq!(
            rewrite("Fix the bug", &plan),
            Err(TrailerError::MissingEmail("alice".to_string()))
        );
    }

    #[test]
    fn idempotent_across_reruns() {
        let reviewers = vec![user("alice", Some("alice@example.com"))];
        let plan = TrailerPlan {
            reviewers: &reviewers,
            tested_by: Some("https://ci.example.com/1"),
            part_of: Some("!42"),
        };
        let once = rewrite("Fix the bug", &plan).unwrap();
        let twice = rewrite(&once, &plan).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn adds_tested_by_and_part_of() {
        let plan = TrailerPlan {
            reviewers: &[],
            tested_by: Some("https://ci.example.com/99"),
            part_of: Some("!7"),
        };
        let result = rewrite("Fix the bug", &plan).unwrap();
        assert!(result.contains("Tested-by: https://ci.example.com/99"));
        assert!(result.contains("Part-of: !7"));
    }

    #[test]
    fn no_trailers_leaves_message_unchanged() {
        let plan = TrailerPlan {
            reviewers: &[],
            tested_by: None,
            part_of: None,
        };
        assert_eq!(rewrite("Fix the bug", &plan).unwrap(), "Fix the bug");
    }

    #[test]
    fn preserves_unmanaged_trailers() {
        let plan = TrailerPlan {
            reviewers: &[],
            tested_by: Some("https://ci.example.com/1"),
            part_of: None,
        };
        let message = "Fix the bug\n\nSigned-off-by: Bob <bob@example.com>";
        let result = rewrite(message, &plan).unwrap();
        assert!(result.contains("Signed-off-by: Bob <bob@example.com>"));
        assert!(result.contains("Tested-by: https://ci.example.com/1"));
    }
}
