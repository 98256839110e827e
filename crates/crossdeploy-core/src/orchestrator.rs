//! Local model of the pipeline's execution engine.
//!
//! Transitions: `Pending → Source → Deploy → Succeeded | Failed`, plus
//! `Superseded` when a newer execution replaces an unfinished one.
//!
//! Each [`Orchestrator::advance`] call performs one transition. Entering a
//! stage requires the previous stage's declared outputs to be in the artifact
//! store. Every service call an action makes is checked against the role that
//! would make it; a denial fails the execution the same way a failed build
//! does. Nothing is retried.

use crate::blueprint::{ids, Blueprint};
use crate::error::{Result, StackError};
use crate::expr::{Bindings, Expr};
use crate::ledger::ArtifactLedger;
use crate::pipeline::{Action, ActionProvider, PipelineDefinition, Stage, DEPLOY_STAGE, SOURCE_STAGE};
use crate::roles::Responsibility;
use crate::router::Invocation;
use crate::runner::{ActionContext, ActionRunner};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Source,
    Deploy,
    Succeeded,
    Failed,
    Superseded,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Superseded
        )
    }

    fn for_stage(index: usize) -> Self {
        if index == 0 {
            ExecutionState::Source
        } else {
            ExecutionState::Deploy
        }
    }

    fn stage_index(self) -> Option<usize> {
        match self {
            ExecutionState::Source => Some(0),
            ExecutionState::Deploy => Some(1),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Source => "source",
            ExecutionState::Deploy => "deploy",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::Superseded => "superseded",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        })
    }
}

// ---------------------------------------------------------------------------
// Execution record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionTrigger {
    pub reason: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRef {
    pub key: String,
    pub version_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Execution {
    pub id: Uuid,
    pub state: ExecutionState,
    pub trigger: ExecutionTrigger,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageRecord>,
    pub artifacts: BTreeMap<String, ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Execution {
    fn new(trigger: ExecutionTrigger, definition: &PipelineDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ExecutionState::Pending,
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            stages: definition
                .stages
                .iter()
                .map(|s| StageRecord {
                    name: s.name.clone(),
                    status: StageStatus::Pending,
                    started_at: None,
                    finished_at: None,
                    log: Vec::new(),
                })
                .collect(),
            artifacts: BTreeMap::new(),
            failure: None,
        }
    }

    fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    fn finish(&mut self, state: ExecutionState) {
        let now = Utc::now();
        for stage in &mut self.stages {
            match stage.status {
                StageStatus::Pending => stage.status = StageStatus::Skipped,
                StageStatus::InProgress if state != ExecutionState::Succeeded => {
                    stage.status = if state == ExecutionState::Failed {
                        StageStatus::Failed
                    } else {
                        StageStatus::Skipped
                    };
                    stage.finished_at = Some(now);
                }
                _ => {}
            }
        }
        self.state = state;
        self.finished_at = Some(now);
    }
}

/// Only the two-stage shape is executable.
fn check_shape(definition: &PipelineDefinition) -> Result<()> {
    definition.validate()?;
    let names: Vec<&str> = definition.stages.iter().map(|s| s.name.as_str()).collect();
    if names != [SOURCE_STAGE, DEPLOY_STAGE] {
        return Err(StackError::InvalidDefinition(format!(
            "expected stages [{SOURCE_STAGE}, {DEPLOY_STAGE}], got {names:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    blueprint: Blueprint,
    bindings: Bindings,
    definition: PipelineDefinition,
    environment: BTreeMap<String, String>,
    ledger: ArtifactLedger,
    history: Vec<Execution>,
    active: Option<usize>,
}

impl Orchestrator {
    pub fn new(blueprint: Blueprint) -> Result<Self> {
        let bindings = blueprint.bindings();
        let definition = blueprint.pipeline.clone();
        check_shape(&definition)?;
        let environment = blueprint.build_environment(&bindings)?;
        let ledger = ArtifactLedger::new(
            bindings.value(ids::ARTIFACT_BUCKET)?,
            blueprint.store.key_arn().resolve(&bindings)?,
            blueprint.params.retention_days,
        );
        Ok(Self {
            blueprint,
            bindings,
            definition,
            environment,
            ledger,
            history: Vec::new(),
            active: None,
        })
    }

    pub fn pipeline_name(&self) -> Result<String> {
        Expr::reference(ids::PIPELINE).resolve(&self.bindings)
    }

    pub fn pipeline_arn(&self) -> Result<String> {
        self.blueprint.pipeline_arn().resolve(&self.bindings)
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn ledger(&self) -> &ArtifactLedger {
        &self.ledger
    }

    /// Purge artifact versions past the retention window.
    pub fn expire_artifacts(&mut self, now: DateTime<Utc>) -> usize {
        self.ledger.expire_noncurrent(now)
    }

    pub fn history(&self) -> &[Execution] {
        &self.history
    }

    pub fn execution(&self, id: Uuid) -> Option<&Execution> {
        self.history.iter().find(|e| e.id == id)
    }

    pub fn active(&self) -> Option<&Execution> {
        self.active.map(|i| &self.history[i])
    }

    /// Start a new execution, superseding any unfinished one.
    pub fn start(&mut self, trigger: ExecutionTrigger) -> Uuid {
        self.supersede_active();
        let exec = Execution::new(trigger, &self.definition);
        let id = exec.id;
        tracing::info!(execution_id = %id, reason = %exec.trigger.reason, "execution started");
        self.history.push(exec);
        self.active = Some(self.history.len() - 1);
        id
    }

    /// Start an execution for a routed event, as the trigger role would.
    pub fn handle(&mut self, invocation: &Invocation) -> Result<Uuid> {
        let pipeline_arn = self.pipeline_arn()?;
        if invocation.pipeline_arn != pipeline_arn {
            return Err(StackError::InvalidTrigger(format!(
                "invocation targets {}, not {pipeline_arn}",
                invocation.pipeline_arn
            )));
        }
        self.authorize(
            Responsibility::Trigger,
            "codepipeline:StartPipelineExecution",
            &pipeline_arn,
        )?;
        Ok(self.start(ExecutionTrigger {
            reason: format!("{} via {}", invocation.event.event, invocation.rule_id),
            branch: invocation.event.reference_name.clone(),
            commit_id: invocation.event.commit_id.clone(),
        }))
    }

    /// Replace the pipeline definition. With restart-on-update set, an
    /// unfinished execution is superseded by a fresh one from `Pending`.
    pub fn update_definition(&mut self, definition: PipelineDefinition) -> Result<Option<Uuid>> {
        check_shape(&definition)?;
        if definition == self.definition {
            return Ok(None);
        }
        let restart = definition.restart_execution_on_update;
        self.definition = definition;
        tracing::info!(restart, "pipeline definition updated");

        let in_flight = self.active().map(|e| e.trigger.clone());
        match in_flight {
            Some(trigger) if restart => Ok(Some(self.start(ExecutionTrigger {
                reason: "pipeline definition updated".to_string(),
                ..trigger
            }))),
            _ => Ok(None),
        }
    }

    fn supersede_active(&mut self) {
        if let Some(i) = self.active.take() {
            let exec = &mut self.history[i];
            if !exec.state.is_terminal() {
                tracing::warn!(execution_id = %exec.id, state = %exec.state, "execution superseded");
                exec.finish(ExecutionState::Superseded);
            }
        }
    }

    /// Perform one transition of the active execution.
    pub fn advance(&mut self, runner: &mut dyn ActionRunner) -> Result<ExecutionState> {
        let idx = self.active.ok_or(StackError::NoActiveExecution)?;
        let state = self.history[idx].state;

        let next = match state.stage_index() {
            _ if state.is_terminal() => return Ok(state),
            None => self.enter_stage(idx, 0),
            Some(stage_idx) => self.complete_stage(idx, stage_idx, runner),
        };

        let exec = &mut self.history[idx];
        tracing::info!(execution_id = %exec.id, from = %state, to = %next, "execution state changed");
        if next.is_terminal() {
            exec.finish(next);
            self.active = None;
        } else {
            exec.state = next;
        }
        Ok(next)
    }

    /// Advance until the active execution finishes.
    pub fn run_to_completion(&mut self, runner: &mut dyn ActionRunner) -> Result<Execution> {
        let idx = self.active.ok_or(StackError::NoActiveExecution)?;
        while !self.advance(runner)?.is_terminal() {}
        Ok(self.history[idx].clone())
    }

    fn enter_stage(&mut self, idx: usize, stage_idx: usize) -> ExecutionState {
        let stage = &mut self.history[idx].stages[stage_idx];
        stage.status = StageStatus::InProgress;
        stage.started_at = Some(Utc::now());
        ExecutionState::for_stage(stage_idx)
    }

    fn complete_stage(&mut self, idx: usize, stage_idx: usize, runner: &mut dyn ActionRunner) -> ExecutionState {
        let stage = self.definition.stages[stage_idx].clone();
        let result = self
            .run_stage(idx, &stage, runner)
            .and_then(|()| self.check_outputs(idx, &stage));
        let now = Utc::now();

        match result {
            Ok(()) => {
                let record = &mut self.history[idx].stages[stage_idx];
                record.status = StageStatus::Succeeded;
                record.finished_at = Some(now);
                if stage_idx + 1 < self.definition.stages.len() {
                    self.enter_stage(idx, stage_idx + 1)
                } else {
                    ExecutionState::Succeeded
                }
            }
            Err(e) => {
                let exec = &mut self.history[idx];
                tracing::warn!(execution_id = %exec.id, stage = %stage.name, error = %e, "stage failed");
                exec.failure = Some(format!("{}: {e}", stage.name));
                ExecutionState::Failed
            }
        }
    }

    fn run_stage(&mut self, idx: usize, stage: &Stage, runner: &mut dyn ActionRunner) -> Result<()> {
        for action in &stage.actions {
            let (log, artifacts) = self
                .run_action(idx, stage, action, runner)
                .map_err(|e| match e {
                    StackError::BuildFailed(msg) => {
                        StackError::BuildFailed(format!("action '{}': {msg}", action.name))
                    }
                    other => other,
                })?;
            let exec = &mut self.history[idx];
            if let Some(record) = exec.stages.iter_mut().find(|s| s.name == stage.name) {
                if !log.is_empty() {
                    record.log.push(format!("{}: {}", action.name, log.trim_end()));
                }
            }
            exec.artifacts.extend(artifacts);
        }
        Ok(())
    }

    fn run_action(
        &mut self,
        idx: usize,
        stage: &Stage,
        action: &Action,
        runner: &mut dyn ActionRunner,
    ) -> Result<(String, Vec<(String, ArtifactRef)>)> {
        let (target, actor) = match action.provider {
            ActionProvider::CodeCommit => (
                self.blueprint.repository_arn().resolve(&self.bindings)?,
                Responsibility::Orchestrate,
            ),
            ActionProvider::CodeBuild => (
                self.blueprint.build_project.arn().resolve(&self.bindings)?,
                Responsibility::Build,
            ),
        };
        for permission in action.provider.required_permissions() {
            self.authorize(Responsibility::Orchestrate, permission, &target)?;
        }
        if action.provider == ActionProvider::CodeBuild {
            let role = self.blueprint.params.cross_account_role_arn();
            self.authorize(Responsibility::Build, "sts:AssumeRole", &role)?;
        }

        let pipeline = self.pipeline_name()?;
        let short_id = self.history[idx].short_id();
        let key_arn = self.ledger.key_arn().to_string();

        let mut inputs = BTreeMap::new();
        for name in &action.input_artifacts {
            let key = format!("{pipeline}/{name}/{short_id}");
            self.authorize(actor, "s3:GetObject", &self.ledger.object_arn(&key))?;
            self.authorize(actor, "kms:Decrypt", &key_arn)?;
            inputs.insert(name.clone(), self.ledger.get(&key)?.data.clone());
        }

        let trigger = &self.history[idx].trigger;
        let ctx = ActionContext {
            stage: &stage.name,
            action,
            inputs,
            environment: &self.environment,
            repository: &self.blueprint.params.repository,
            branch: &trigger.branch,
            commit_id: trigger.commit_id.as_deref(),
        };
        tracing::debug!(stage = %stage.name, action = %action.name, "running action");
        let mut outcome = runner.run(&ctx)?;

        let mut artifacts = Vec::new();
        for name in &action.output_artifacts {
            let data = outcome
                .outputs
                .remove(name)
                .ok_or_else(|| StackError::ArtifactNotFound(format!(
                    "action '{}' did not produce declared output '{name}'",
                    action.name
                )))?;
            let key = format!("{pipeline}/{name}/{short_id}");
            self.authorize(actor, "s3:PutObject", &self.ledger.object_arn(&key))?;
            self.authorize(actor, "kms:GenerateDataKey", &key_arn)?;
            let version_id = self.ledger.put(&key, data, &key_arn, Utc::now())?;
            artifacts.push((name.clone(), ArtifactRef { key, version_id }));
        }
        Ok((outcome.log, artifacts))
    }

    /// Declared outputs of a finished stage must be in the store before the
    /// next stage may start.
    fn check_outputs(&self, idx: usize, stage: &Stage) -> Result<()> {
        let exec = &self.history[idx];
        for name in stage.outputs() {
            let present = exec
                .artifacts
                .get(name)
                .is_some_and(|a| self.ledger.get_version(&a.key, a.version_id).is_ok());
            if !present {
                return Err(StackError::ArtifactNotFound(format!(
                    "'{name}' is missing from the artifact store"
                )));
            }
        }
        Ok(())
    }

    fn authorize(&self, responsibility: Responsibility, action: &str, resource: &str) -> Result<()> {
        let role = self.blueprint.role(responsibility);
        let decision = role.decide(&self.bindings, action, resource)?;
        if decision.is_allowed() {
            return Ok(());
        }
        tracing::warn!(role = role.logical_id(), action, resource, ?decision, "access denied");
        Err(StackError::AccessDenied {
            principal: role.logical_id().to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StackConfig, StackParameters};
    use crate::pipeline::{DEPLOY_ARTIFACT, SOURCE_ARTIFACT};
    use crate::policy::Statement;
    use crate::router::EventRouter;
    use crate::runner::ActionOutcome;
    use crate::trigger::{CommitEvent, ReferenceEvent};

    /// Emits each declared output with fixed bytes, or fails a named action.
    #[derive(Default)]
    struct ScriptedRunner {
        fail: Option<&'static str>,
        skip_outputs: bool,
        seen: Vec<(String, BTreeMap<String, Vec<u8>>, BTreeMap<String, String>)>,
    }

    impl ActionRunner for ScriptedRunner {
        fn run(&mut self, ctx: &ActionContext<'_>) -> Result<ActionOutcome> {
            self.seen.push((
                ctx.action.name.clone(),
                ctx.inputs.clone(),
                ctx.environment.clone(),
            ));
            if self.fail == Some(ctx.stage) {
                return Err(StackError::BuildFailed("exit status 1".into()));
            }
            let outputs = if self.skip_outputs {
                BTreeMap::new()
            } else {
                ctx.action
                    .output_artifacts
                    .iter()
                    .map(|n| (n.clone(), format!("{}-bytes", n).into_bytes()))
                    .collect()
            };
            Ok(ActionOutcome {
                outputs,
                log: format!("ran {}", ctx.action.name),
            })
        }
    }

    fn blueprint() -> Blueprint {
        let mut cfg = StackConfig::new("svc-pipeline", "svc", "123456789012");
        cfg.stack.account_id = Some("111111111111".into());
        Blueprint::from_parameters(StackParameters::from_config(&cfg).unwrap()).unwrap()
    }

    fn trigger() -> ExecutionTrigger {
        ExecutionTrigger {
            reason: "test".into(),
            branch: "main".into(),
            commit_id: Some("abc123".into()),
        }
    }

    #[test]
    fn happy_path_walks_every_state() {
        let mut orch = Orchestrator::new(blueprint()).unwrap();
        let mut runner = ScriptedRunner::default();
        orch.start(trigger());

        let mut states = vec![orch.active().unwrap().state];
        loop {
            let s = orch.advance(&mut runner).unwrap();
            states.push(s);
            if s.is_terminal() {
                break;
            }
        }
        assert_eq!(
            states,
            vec![
                ExecutionState::Pending,
                ExecutionState::Source,
                ExecutionState::Deploy,
                ExecutionState::Succeeded
            ]
        );
        let exec = &orch.history()[0];
        assert!(exec.stages.iter().all(|s| s.status == StageStatus::Succeeded));
        assert!(exec.artifacts.contains_key(SOURCE_ARTIFACT));
        assert!(exec.artifacts.contains_key(DEPLOY_ARTIFACT));
        assert!(orch.active().is_none());
        assert_eq!(
            orch.expire_artifacts(Utc::now() + chrono::Duration::days(3650)),
            0,
            "current versions are kept"
        );

        // Deploy received the Source output and the injected parameters.
        let (name, inputs, env) = &runner.seen[1];
        assert_eq!(name, "Deploy");
        assert_eq!(inputs[SOURCE_ARTIFACT], b"SourceArtifact-bytes");
        assert_eq!(env["TARGET_ACCOUNT_ID"], "123456789012");
    }

    #[test]
    fn build_failure_fails_execution_without_retry() {
        let mut orch = Orchestrator::new(blueprint()).unwrap();
        let mut runner = ScriptedRunner {
            fail: Some(DEPLOY_STAGE),
            ..Default::default()
        };
        orch.start(trigger());
        let exec = orch.run_to_completion(&mut runner).unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
        assert_eq!(exec.stages[0].status, StageStatus::Succeeded);
        assert_eq!(exec.stages[1].status, StageStatus::Failed);
        assert!(exec.failure.unwrap().contains("exit status 1"));
        assert_eq!(runner.seen.len(), 2, "no retry");
    }

    #[test]
    fn source_failure_skips_deploy() {
        let mut orch = Orchestrator::new(blueprint()).unwrap();
        let mut runner = ScriptedRunner {
            fail: Some(SOURCE_STAGE),
            ..Default::default()
        };
        orch.start(trigger());
        let exec = orch.run_to_completion(&mut runner).unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
        assert_eq!(exec.stages[1].status, StageStatus::Skipped);
    }

    #[test]
    fn missing_declared_output_blocks_next_stage() {
        let mut orch = Orchestrator::new(blueprint()).unwrap();
        let mut runner = ScriptedRunner {
            skip_outputs: true,
            ..Default::default()
        };
        orch.start(trigger());
        let exec = orch.run_to_completion(&mut runner).unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
        assert!(exec.failure.unwrap().contains(SOURCE_ARTIFACT));
        assert_eq!(runner.seen.len(), 1);
    }

    #[test]
    fn access_denial_fails_without_running_action() {
        let mut bp = blueprint();
        // Drop the CodeBuild grant from the pipeline role.
        bp.pipeline_role.policies[0]
            .document
            .statements
            .retain(|s| !s.grants("codebuild:StartBuild"));
        let mut orch = Orchestrator::new(bp).unwrap();
        let mut runner = ScriptedRunner::default();
        orch.start(trigger());
        let exec = orch.run_to_completion(&mut runner).unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
        assert!(exec.failure.unwrap().contains("codebuild:StartBuild"));
        assert_eq!(runner.seen.len(), 1, "deploy action never ran");
        // Source output already committed stays in the store.
        assert_eq!(orch.ledger().keys().count(), 1);
    }

    #[test]
    fn explicit_deny_on_artifacts_fails_execution() {
        let mut bp = blueprint();
        bp.build_role.policies[0]
            .document
            .statements
            .push(Statement::deny(["s3:PutObject"]).on([Expr::lit("*")]));
        let mut orch = Orchestrator::new(bp).unwrap();
        let mut runner = ScriptedRunner::default();
        orch.start(trigger());
        let exec = orch.run_to_completion(&mut runner).unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
        assert!(exec.failure.unwrap().contains("s3:PutObject"));
    }

    #[test]
    fn newer_execution_supersedes_active_one() {
        let mut orch = Orchestrator::new(blueprint()).unwrap();
        let mut runner = ScriptedRunner::default();
        let first = orch.start(trigger());
        orch.advance(&mut runner).unwrap();
        let second = orch.start(trigger());

        assert_eq!(orch.execution(first).unwrap().state, ExecutionState::Superseded);
        assert_eq!(orch.active().unwrap().id, second);
        let exec = orch.run_to_completion(&mut runner).unwrap();
        assert_eq!(exec.id, second);
        assert_eq!(exec.state, ExecutionState::Succeeded);
    }

    #[test]
    fn definition_update_restarts_in_flight_execution() {
        let mut orch = Orchestrator::new(blueprint()).unwrap();
        let mut runner = ScriptedRunner::default();
        let first = orch.start(trigger());
        orch.advance(&mut runner).unwrap();
        orch.advance(&mut runner).unwrap();
        assert_eq!(orch.active().unwrap().state, ExecutionState::Deploy);

        let mut def = orch.definition().clone();
        def.stages[1].actions[0] = def.stages[1].actions[0]
            .clone()
            .config("EnvironmentVariables", Expr::lit("[]"));
        let restarted = orch.update_definition(def).unwrap().unwrap();

        assert_eq!(orch.execution(first).unwrap().state, ExecutionState::Superseded);
        let fresh = orch.execution(restarted).unwrap();
        assert_eq!(fresh.state, ExecutionState::Pending);
        assert_eq!(fresh.trigger.commit_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn definition_update_without_restart_keeps_execution() {
        let mut orch = Orchestrator::new(blueprint()).unwrap();
        let first = orch.start(trigger());
        let mut def = orch.definition().clone();
        def.restart_execution_on_update = false;
        assert!(orch.update_definition(def).unwrap().is_none());
        assert_eq!(orch.active().unwrap().id, first);
    }

    #[test]
    fn invalid_definition_update_is_rejected() {
        let mut orch = Orchestrator::new(blueprint()).unwrap();
        let mut def = orch.definition().clone();
        def.stages.swap(0, 1);
        assert!(orch.update_definition(def).is_err());
    }

    #[test]
    fn advance_without_execution_errors() {
        let mut orch = Orchestrator::new(blueprint()).unwrap();
        assert!(matches!(
            orch.advance(&mut ScriptedRunner::default()),
            Err(StackError::NoActiveExecution)
        ));
    }

    #[test]
    fn routed_event_starts_execution() {
        let bp = blueprint();
        let router = EventRouter::from_blueprint(&bp);
        let mut orch = Orchestrator::new(bp).unwrap();
        let ev = CommitEvent::branch(
            "arn:aws:codecommit:us-east-1:111111111111:svc",
            ReferenceEvent::ReferenceUpdated,
            "main",
            Some("def456".into()),
        );
        let invocations = router.route(&ev).unwrap();
        assert_eq!(invocations.len(), 1);
        let id = orch.handle(&invocations[0]).unwrap();
        assert_eq!(
            orch.execution(id).unwrap().trigger.commit_id.as_deref(),
            Some("def456")
        );
    }

    #[test]
    fn trigger_role_without_permission_cannot_start() {
        let bp = blueprint();
        let router = EventRouter::from_blueprint(&bp);
        let mut denied = bp.clone();
        denied.trigger_role.policies[0].document.statements.clear();
        let mut orch = Orchestrator::new(denied).unwrap();
        let ev = CommitEvent::branch(
            "arn:aws:codecommit:us-east-1:111111111111:svc",
            ReferenceEvent::ReferenceCreated,
            "main",
            None,
        );
        let inv = &router.route(&ev).unwrap()[0];
        assert!(matches!(orch.handle(inv), Err(StackError::AccessDenied { .. })));
        assert!(orch.history().is_empty());
    }
}
