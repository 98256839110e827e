use crate::error::{Result, StackError};
use crate::expr::{Bindings, Expr};
use crate::types::Branch;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

pub const EVENT_SOURCE: &str = "aws.codecommit";
pub const DETAIL_TYPE: &str = "CodeCommit Repository State Change";
pub const REFERENCE_TYPE_BRANCH: &str = "branch";

// ---------------------------------------------------------------------------
// ReferenceEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceEvent {
    ReferenceCreated,
    ReferenceUpdated,
    ReferenceDeleted,
}

impl ReferenceEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceEvent::ReferenceCreated => "referenceCreated",
            ReferenceEvent::ReferenceUpdated => "referenceUpdated",
            ReferenceEvent::ReferenceDeleted => "referenceDeleted",
        }
    }
}

impl fmt::Display for ReferenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReferenceEvent {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "referenceCreated" | "created" => Ok(ReferenceEvent::ReferenceCreated),
            "referenceUpdated" | "updated" => Ok(ReferenceEvent::ReferenceUpdated),
            "referenceDeleted" | "deleted" => Ok(ReferenceEvent::ReferenceDeleted),
            other => Err(StackError::InvalidEvent(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// CommitEvent
// ---------------------------------------------------------------------------

/// A source-control state change as delivered by the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitEvent {
    pub source: String,
    pub detail_type: String,
    pub repository_arn: String,
    pub event: ReferenceEvent,
    pub reference_type: String,
    pub reference_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
}

impl CommitEvent {
    pub fn branch(
        repository_arn: impl Into<String>,
        event: ReferenceEvent,
        branch: impl Into<String>,
        commit_id: Option<String>,
    ) -> Self {
        Self {
            source: EVENT_SOURCE.to_string(),
            detail_type: DETAIL_TYPE.to_string(),
            repository_arn: repository_arn.into(),
            event,
            reference_type: REFERENCE_TYPE_BRANCH.to_string(),
            reference_name: branch.into(),
            commit_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventPattern
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EventPattern {
    pub source: Vec<String>,
    pub detail_type: Vec<String>,
    pub resources: Vec<Expr>,
    pub events: Vec<ReferenceEvent>,
    pub reference_types: Vec<String>,
    pub reference_names: Vec<Expr>,
}

impl EventPattern {
    /// Branch created/updated on one repository.
    pub fn branch_commits(repository_arn: Expr, branch: Expr) -> Self {
        Self {
            source: vec![EVENT_SOURCE.to_string()],
            detail_type: vec![DETAIL_TYPE.to_string()],
            resources: vec![repository_arn],
            events: vec![
                ReferenceEvent::ReferenceCreated,
                ReferenceEvent::ReferenceUpdated,
            ],
            reference_types: vec![REFERENCE_TYPE_BRANCH.to_string()],
            reference_names: vec![branch],
        }
    }

    pub fn to_value(&self) -> Value {
        let events: Vec<&str> = self.events.iter().map(|e| e.as_str()).collect();
        json!({
            "source": self.source,
            "detail-type": self.detail_type,
            "resources": self.resources,
            "detail": {
                "event": events,
                "referenceType": self.reference_types,
                "referenceName": self.reference_names,
            },
        })
    }

    pub fn matches(&self, event: &CommitEvent, bindings: &Bindings) -> Result<bool> {
        if !self.source.contains(&event.source)
            || !self.detail_type.contains(&event.detail_type)
            || !self.events.contains(&event.event)
            || !self.reference_types.contains(&event.reference_type)
        {
            return Ok(false);
        }
        if !any_resolves_to(&self.resources, &event.repository_arn, bindings)? {
            return Ok(false);
        }
        any_resolves_to(&self.reference_names, &event.reference_name, bindings)
    }
}

fn any_resolves_to(candidates: &[Expr], value: &str, bindings: &Bindings) -> Result<bool> {
    for candidate in candidates {
        if candidate.resolve(bindings)? == value {
            return Ok(true);
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// TriggerRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RuleTarget {
    pub id: String,
    pub pipeline_arn: Expr,
    pub role_arn: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRule {
    pub logical_id: String,
    pub branch: Branch,
    pub enabled: bool,
    pub pattern: EventPattern,
    pub target: RuleTarget,
}

impl TriggerRule {
    pub fn to_properties(&self) -> Value {
        json!({
            "Description": format!("Start the pipeline on commits to {}", self.branch),
            "State": if self.enabled { "ENABLED" } else { "DISABLED" },
            "EventPattern": self.pattern.to_value(),
            "Targets": [{
                "Id": self.target.id,
                "Arn": self.target.pipeline_arn,
                "RoleArn": self.target.role_arn,
            }],
        })
    }
}

/// Checks that every watched branch has exactly one enabled rule and that
/// no enabled rule watches anything else.
pub fn rule_set_problems(rules: &[TriggerRule], watched: &[Branch]) -> Vec<String> {
    let mut problems = Vec::new();
    for branch in watched {
        let enabled = rules
            .iter()
            .filter(|r| r.enabled && r.branch == *branch)
            .count();
        if enabled != 1 {
            problems.push(format!(
                "branch '{branch}' has {enabled} enabled trigger rules (expected exactly 1)"
            ));
        }
    }
    for rule in rules.iter().filter(|r| r.enabled) {
        if !watched.contains(&rule.branch) {
            problems.push(format!(
                "rule '{}' is enabled for unwatched branch '{}'",
                rule.logical_id, rule.branch
            ));
        }
    }
    problems
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
