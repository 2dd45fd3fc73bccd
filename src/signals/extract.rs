//! Extraction rules for completion and approval signals.
//!
//! Two independent rules over a time-ordered comment feed:
//! - Completion: comments containing the marker, attributed to a worker by
//!   fuzzy author matching, with a human-readable summary pulled from the
//!   text around the marker.
//! - Approval: the most recent comment containing an approval keyword, with
//!   the author recorded verbatim as the approver.
//!
//! Both honor a `last_check` cutoff: comments timestamped at or before it
//! are excluded (strict greater-than).

use chrono::{DateTime, Utc};

use crate::github::IssueComment;

/// Marker a worker posts to signal phase-task completion.
pub const COMPLETION_MARKER: &str = "\u{2705}";

/// Keywords (case-insensitive) a human posts to approve a gate.
pub const APPROVAL_KEYWORDS: &[&str] = &["approved", "lgtm", "approve"];

/// Fallback summary when a completion comment has no usable text.
const DEFAULT_SUMMARY: &str = "Task completed";

/// A worker completion detected in the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSignal {
    pub worker: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    pub comment_id: String,
}

/// A human approval detected in the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalSignal {
    /// Comment author, recorded verbatim (no identity resolution).
    pub approver: String,
    pub timestamp: DateTime<Utc>,
    pub comment_id: String,
}

/// Scan comments chronologically for worker completions.
///
/// A comment counts when its body contains the completion marker and its
/// author fuzzy-matches one of `known_workers`. Unmatched authors are
/// ignored, not errors.
pub fn extract_completions(
    comments: &[IssueComment],
    known_workers: &[String],
    last_check: Option<DateTime<Utc>>,
) -> Vec<CompletionSignal> {
    let mut completions = Vec::new();

    for comment in comments {
        if let Some(cutoff) = last_check
            && comment.created_at <= cutoff
        {
            continue;
        }
        if !comment.body.contains(COMPLETION_MARKER) {
            continue;
        }
        let Some(worker) = match_worker(&comment.author, known_workers) else {
            continue;
        };
        completions.push(CompletionSignal {
            worker,
            summary: extract_summary(&comment.body),
            timestamp: comment.created_at,
            comment_id: comment.id.clone(),
        });
    }

    completions
}

/// Scan comments newest-first for a human approval.
///
/// The first comment (scanning backward) whose lowercased body contains any
/// approval keyword is the match.
pub fn extract_approval(
    comments: &[IssueComment],
    last_check: Option<DateTime<Utc>>,
) -> Option<ApprovalSignal> {
    for comment in comments.iter().rev() {
        if let Some(cutoff) = last_check
            && comment.created_at <= cutoff
        {
            continue;
        }
        let lowered = comment.body.to_lowercase();
        if APPROVAL_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            return Some(ApprovalSignal {
                approver: comment.author.clone(),
                timestamp: comment.created_at,
                comment_id: comment.id.clone(),
            });
        }
    }
    None
}

/// Attribute a comment author to a known worker handle.
///
/// Case-insensitive substring match in either direction, with any bot
/// annotation stripped first: `viollet-le-duc[bot]` matches `duc`.
/// First match in iteration order wins when handles overlap.
fn match_worker(author: &str, known_workers: &[String]) -> Option<String> {
    let author = author.to_lowercase().replace("[bot]", "");
    let author = author.trim();

    known_workers
        .iter()
        .find(|handle| {
            let handle = handle.to_lowercase();
            author.contains(&handle) || handle.contains(author)
        })
        .cloned()
}

/// Pull the human-readable summary out of a completion comment.
///
/// Captures the text following the marker, continuing through non-empty
/// lines until a new bold-labeled section starts. Falls back to the first
/// non-empty, non-heading line of the whole comment, then to a fixed
/// default.
fn extract_summary(body: &str) -> String {
    let mut summary_lines: Vec<&str> = Vec::new();
    let mut capture = false;

    for line in body.lines() {
        if line.contains(COMPLETION_MARKER) {
            capture = true;
            if let Some((_, after)) = line.split_once(COMPLETION_MARKER) {
                let after = after.trim();
                if !after.is_empty() {
                    summary_lines.push(after);
                }
            }
            continue;
        }
        if capture && line.trim().starts_with("**") {
            break;
        }
        if capture && !line.trim().is_empty() {
            summary_lines.push(line.trim());
        }
    }

    if !summary_lines.is_empty() {
        return summary_lines.join(" ");
    }

    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .unwrap_or(DEFAULT_SUMMARY)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn comment(id: &str, author: &str, body: &str, minute: u32) -> IssueComment {
        IssueComment {
            id: id.to_string(),
            author: author.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 2, 3, 10, minute, 0).unwrap(),
            body: body.to_string(),
        }
    }

    fn workers() -> Vec<String> {
        ["duc", "dede", "dali", "gus", "marie"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_completion_from_bot_author_with_summary() {
        let comments = vec![comment(
            "c1",
            "viollet-le-duc[bot]",
            "\u{2705} **Task Complete** (@duc)\n\nSpecs written to .plans/123/specs/",
            0,
        )];

        let found = extract_completions(&comments, &workers(), None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].worker, "duc");
        assert!(found[0].summary.contains("Specs written"));
        assert_eq!(found[0].comment_id, "c1");
    }

    #[test]
    fn test_completion_marker_required() {
        let comments = vec![comment("c1", "duc", "All done, no marker here", 0)];
        assert!(extract_completions(&comments, &workers(), None).is_empty());
    }

    #[test]
    fn test_unmatched_author_is_ignored_not_error() {
        let comments = vec![comment("c1", "random-human", "\u{2705} done", 0)];
        assert!(extract_completions(&comments, &workers(), None).is_empty());
    }

    #[test]
    fn test_author_matching_is_bidirectional() {
        // Handle contained in author.
        let a = vec![comment("c1", "marie-curie[bot]", "\u{2705} done", 0)];
        assert_eq!(extract_completions(&a, &workers(), None)[0].worker, "marie");

        // Author contained in handle.
        let b = vec![comment("c2", "Dali", "\u{2705} done", 0)];
        assert_eq!(extract_completions(&b, &workers(), None)[0].worker, "dali");
    }

    #[test]
    fn test_summary_stops_at_bold_section() {
        let body = "\u{2705}\nWrote the plans\nand the diagrams\n**Artifacts**\n- plans.md";
        let comments = vec![comment("c1", "gus", body, 0)];
        let found = extract_completions(&comments, &workers(), None);
        assert_eq!(found[0].summary, "Wrote the plans and the diagrams");
    }

    #[test]
    fn test_summary_falls_back_to_first_body_line() {
        let body = "# Heading\nImplemented the endpoint\n\u{2705}";
        let comments = vec![comment("c1", "dede", body, 0)];
        let found = extract_completions(&comments, &workers(), None);
        assert_eq!(found[0].summary, "Implemented the endpoint");
    }

    #[test]
    fn test_summary_default_when_comment_is_only_marker() {
        let comments = vec![comment("c1", "dede", "\u{2705}", 0)];
        let found = extract_completions(&comments, &workers(), None);
        assert_eq!(found[0].summary, "Task completed");
    }

    #[test]
    fn test_last_check_is_strictly_greater_than() {
        let comments = vec![
            comment("old", "duc", "\u{2705} first", 0),
            comment("new", "duc", "\u{2705} second", 30),
        ];
        let cutoff = Utc.with_ymd_and_hms(2026, 2, 3, 10, 15, 0).unwrap();

        let found = extract_completions(&comments, &workers(), Some(cutoff));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].comment_id, "new");

        // A comment exactly at the cutoff is excluded.
        let at_cutoff = Utc.with_ymd_and_hms(2026, 2, 3, 10, 0, 0).unwrap();
        let found = extract_completions(&comments, &workers(), Some(at_cutoff));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].comment_id, "new");
    }

    #[test]
    fn test_multiple_completions_in_chronological_order() {
        let comments = vec![
            comment("c1", "dede", "\u{2705} plan a done", 0),
            comment("c2", "nobody", "chatter", 1),
            comment("c3", "gus", "\u{2705} plan c done", 2),
        ];
        let found = extract_completions(&comments, &workers(), None);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].worker, "dede");
        assert_eq!(found[1].worker, "gus");
    }

    #[test]
    fn test_approval_keyword_match() {
        let comments = vec![comment("c1", "alice", "Looks good! approved", 0)];
        let approval = extract_approval(&comments, None).unwrap();
        assert_eq!(approval.approver, "alice");
        assert_eq!(approval.comment_id, "c1");
    }

    #[test]
    fn test_no_approval_in_plain_feedback() {
        let comments = vec![comment("c1", "alice", "Needs more work", 0)];
        assert!(extract_approval(&comments, None).is_none());
    }

    #[test]
    fn test_approval_is_case_insensitive_and_newest_first() {
        let comments = vec![
            comment("c1", "alice", "LGTM", 0),
            comment("c2", "bob", "Approve", 5),
        ];
        let approval = extract_approval(&comments, None).unwrap();
        assert_eq!(approval.approver, "bob", "newest matching comment wins");
    }

    #[test]
    fn test_approver_recorded_verbatim() {
        let comments = vec![comment("c1", "Alice-Reviewer[bot]", "approved", 0)];
        let approval = extract_approval(&comments, None).unwrap();
        assert_eq!(approval.approver, "Alice-Reviewer[bot]");
    }

    #[test]
    fn test_approval_respects_last_check() {
        let comments = vec![comment("c1", "alice", "approved", 0)];
        let cutoff = Utc.with_ymd_and_hms(2026, 2, 3, 10, 30, 0).unwrap();
        assert!(extract_approval(&comments, Some(cutoff)).is_none());
    }
}
