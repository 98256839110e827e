use crate::blueprint::Blueprint;
use crate::error::Result;
use crate::expr::Bindings;
use crate::trigger::{CommitEvent, TriggerRule};
use serde::Serialize;

/// One rule firing for one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub rule_id: String,
    pub target_id: String,
    pub pipeline_arn: String,
    pub role_arn: String,
    pub event: CommitEvent,
}

/// Delivers source events to the rules that match them. No retries: an
/// event either produces its invocations now or never.
#[derive(Debug, Clone)]
pub struct EventRouter {
    rules: Vec<TriggerRule>,
    bindings: Bindings,
}

impl EventRouter {
    pub fn new(rules: Vec<TriggerRule>, bindings: Bindings) -> Self {
        Self { rules, bindings }
    }

    pub fn from_blueprint(bp: &Blueprint) -> Self {
        Self::new(bp.rules.clone(), bp.bindings())
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    /// At most one invocation per enabled matching rule.
    pub fn route(&self, event: &CommitEvent) -> Result<Vec<Invocation>> {
        let mut out = Vec::new();
        for rule in self.rules.iter().filter(|r| r.enabled) {
            if !rule.pattern.matches(event, &self.bindings)? {
                continue;
            }
            out.push(Invocation {
                rule_id: rule.logical_id.clone(),
                target_id: rule.target.id.clone(),
                pipeline_arn: rule.target.pipeline_arn.resolve(&self.bindings)?,
                role_arn: rule.target.role_arn.resolve(&self.bindings)?,
                event: event.clone(),
            });
        }
        tracing::debug!(
            branch = %event.reference_name,
            event = %event.event,
            invocations = out.len(),
            "event routed"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StackConfig, StackParameters};
    use crate::trigger::ReferenceEvent;

    fn blueprint(branch: &str) -> Blueprint {
        let mut cfg = StackConfig::new("svc-pipeline", "svc", "123456789012");
        cfg.stack.account_id = Some("111111111111".into());
        cfg.source.branch = branch.into();
        Blueprint::from_parameters(StackParameters::from_config(&cfg).unwrap()).unwrap()
    }

    const REPO_ARN: &str = "arn:aws:codecommit:us-east-1:111111111111:svc";

    #[test]
    fn commit_on_watched_branch_invokes_pipeline_once() {
        let router = EventRouter::from_blueprint(&blueprint("develop"));
        let ev = CommitEvent::branch(REPO_ARN, ReferenceEvent::ReferenceUpdated, "develop", Some("abc".into()));
        let invocations = router.route(&ev).unwrap();
        assert_eq!(invocations.len(), 1);
        let inv = &invocations[0];
        assert_eq!(
            inv.pipeline_arn,
            "arn:aws:codepipeline:us-east-1:111111111111:svc-pipeline-pipeline"
        );
        assert_eq!(inv.role_arn, "arn:aws:iam::111111111111:role/svc-pipeline-TriggerRole");
        assert_eq!(inv.event.commit_id.as_deref(), Some("abc"));
    }

    #[test]
    fn other_branches_and_deletions_are_ignored() {
        let router = EventRouter::from_blueprint(&blueprint("main"));
        for ev in [
            CommitEvent::branch(REPO_ARN, ReferenceEvent::ReferenceUpdated, "develop", None),
            CommitEvent::branch(REPO_ARN, ReferenceEvent::ReferenceDeleted, "main", None),
            CommitEvent::branch(
                "arn:aws:codecommit:us-east-1:111111111111:other",
                ReferenceEvent::ReferenceCreated,
                "main",
                None,
            ),
        ] {
            assert!(router.route(&ev).unwrap().is_empty(), "{ev:?}");
        }
    }

    #[test]
    fn disabled_rules_never_fire() {
        let bp = blueprint("main");
        let mut rules = bp.rules.clone();
        rules[0].enabled = false;
        let router = EventRouter::new(rules, bp.bindings());
        let ev = CommitEvent::branch(REPO_ARN, ReferenceEvent::ReferenceCreated, "main", None);
        assert!(router.route(&ev).unwrap().is_empty());
    }
}
