//! Follow-up task declarations in provider output.
//!
//! A provider may end its output with a block such as
//!
//! ~~~text
//! ```json
//! {"followups":[{"title":"Add tests","request":"Cover the parser","depends_on":"this"}]}
//! ```
//! ~~~
//!
//! Fenced blocks are preferred; a single-line bare JSON object containing
//! `"followups"` is also accepted. A block that fails to decode is dropped as
//! a whole and never affects the parent task.

use crate::db::Database;
use crate::types::{NewTask, Priority, Task};
use anyhow::Result;
use regex_lite::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{info, warn};
use uuid::Uuid;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(
        || match Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```") {
            Ok(regex) => regex,
            Err(err) => panic!("Fenced block regex is invalid: {err}"),
        },
    );

const FOLLOWUPS_KEY: &str = "\"followups\"";

/// The `depends_on` value meaning "after the parent succeeds". Any other
/// value enqueues the follow-up without a dependency.
pub const DEPENDS_ON_PARENT: &str = "this";

/// A string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TextOrList {
    Text(String),
    List(Vec<String>),
}

impl TextOrList {
    pub fn into_lines(self) -> Vec<String> {
        let lines = match self {
            TextOrList::Text(text) => vec![text],
            TextOrList::List(list) => list,
        };
        lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }
}

/// One declared follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FollowupSpec {
    pub title: String,
    pub request: String,
    #[serde(default)]
    pub repo_path: Option<String>,
    #[serde(default)]
    pub constraints: Option<TextOrList>,
    #[serde(default)]
    pub acceptance: Option<TextOrList>,
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FollowupBlock {
    followups: Vec<FollowupSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FollowupParseError {
    #[error("follow-up block does not decode: {0}")]
    Decode(String),

    #[error("found {0} follow-up blocks, expected at most one")]
    Ambiguous(usize),

    #[error("follow-up {index} has an empty {field}")]
    EmptyField { index: usize, field: &'static str },
}

/// Locate candidate follow-up blocks, fenced ones first.
fn candidate_blocks(output: &str) -> Vec<&str> {
    let fenced: Vec<&str> = FENCED_BLOCK
        .captures_iter(output)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|body| body.contains(FOLLOWUPS_KEY))
        .collect();
    if !fenced.is_empty() {
        return fenced;
    }

    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.ends_with('}') && line.contains(FOLLOWUPS_KEY))
        .collect()
}

/// Parse the follow-up block, if any. No block yields an empty list.
pub fn parse_followups(output: &str) -> Result<Vec<FollowupSpec>, FollowupParseError> {
    let blocks = candidate_blocks(output);
    let body = match blocks.as_slice() {
        [] => return Ok(Vec::new()),
        [single] => *single,
        many => return Err(FollowupParseError::Ambiguous(many.len())),
    };

    let block: FollowupBlock =
        serde_json::from_str(body).map_err(|e| FollowupParseError::Decode(e.to_string()))?;

    for (index, item) in block.followups.iter().enumerate() {
        if item.title.trim().is_empty() {
            return Err(FollowupParseError::EmptyField {
                index,
                field: "title",
            });
        }
        if item.request.trim().is_empty() {
            return Err(FollowupParseError::EmptyField {
                index,
                field: "request",
            });
        }
    }

    Ok(block.followups)
}

impl FollowupSpec {
    /// Build the task to enqueue under `parent`.
    pub fn into_new_task(self, parent: &Task) -> NewTask {
        let constraints = self
            .constraints
            .map(TextOrList::into_lines)
            .filter(|lines| !lines.is_empty())
            .map(|lines| lines.join("\n"));

        NewTask {
            title: self.title.trim().to_string(),
            request: self.request.trim().to_string(),
            repo_path: self
                .repo_path
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| parent.repo_path.clone()),
            constraints,
            acceptance: self.acceptance.map(TextOrList::into_lines).unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            depends_on_task_id: (self.depends_on.as_deref() == Some(DEPENDS_ON_PARENT))
                .then_some(parent.id),
            parent_task_id: Some(parent.id),
            chain_group_id: None,
            dangerous_ok: false,
            preferred_provider: Some(parent.preferred_provider.clone()),
        }
    }
}

/// Created follow-ups of one parent.
#[derive(Debug, Clone)]
pub struct ChainExpansion {
    pub chain_group_id: String,
    pub created: Vec<Task>,
}

/// Turns follow-up declarations into queued tasks.
#[derive(Clone)]
pub struct ChainExpander {
    db: Database,
}

impl ChainExpander {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Enqueue the follow-ups declared in `output`.
    ///
    /// Returns `Ok(None)` when there is no block or it is malformed (logged).
    /// Store errors are returned.
    pub fn expand(&self, parent: &Task, output: &str) -> Result<Option<ChainExpansion>> {
        let followups = match parse_followups(output) {
            Ok(followups) if followups.is_empty() => return Ok(None),
            Ok(followups) => followups,
            Err(e) => {
                warn!(task_id = parent.id, "Discarding follow-up block: {}", e);
                return Ok(None);
            }
        };

        let inputs: Vec<NewTask> = followups
            .into_iter()
            .map(|item| item.into_new_task(parent))
            .collect();
        let minted = Uuid::new_v4().to_string();
        let (chain_group_id, created) = self.db.create_followups(parent.id, &minted, inputs)?;

        info!(
            task_id = parent.id,
            chain_group = %chain_group_id,
            created = ?created.iter().map(|t| t.id).collect::<Vec<_>>(),
            "Enqueued follow-up tasks"
        );

        Ok(Some(ChainExpansion {
            chain_group_id,
            created,
        }))
    }
}
