//! Named checks over a configuration, its blueprint and the rendered template.
//!
//! Every check reports into a flat list of [`Finding`]s so a caller sees all
//! problems at once. Errors block rendering; warnings do not.

use crate::blueprint::{ids, Blueprint};
use crate::config::{StackConfig, StackParameters};
use crate::error::Result;
use crate::expr::{Bindings, Expr};
use crate::pipeline::{ActionProvider, DEPLOY_STAGE, SOURCE_STAGE};
use crate::roles::{Responsibility, PASS_ROLE};
use crate::template::Template;
use crate::trigger::{self, CommitEvent, ReferenceEvent};
use crate::types::Branch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub level: Severity,
    pub check: String,
    pub message: String,
}

impl Finding {
    pub fn error(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: Severity::Error,
            check: check.into(),
            message: message.into(),
        }
    }

    pub fn warning(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: Severity::Warning,
            check: check.into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == Severity::Error
    }
}

pub fn has_errors(findings: &[Finding]) -> bool {
    findings.iter().any(Finding::is_error)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Config checks first; the blueprint is only built and checked when the
/// config has no errors.
pub fn validate_config(cfg: &StackConfig) -> Vec<Finding> {
    let mut findings = cfg.validate();
    if has_errors(&findings) {
        return findings;
    }
    match StackParameters::from_config(cfg).and_then(Blueprint::from_parameters) {
        Ok(bp) => findings.extend(check_blueprint(&bp)),
        Err(e) => findings.push(Finding::error("blueprint", e.to_string())),
    }
    findings
}

pub fn check_blueprint(bp: &Blueprint) -> Vec<Finding> {
    let template = bp.template();
    let bindings = bp.bindings();
    let mut findings = Vec::new();

    trigger_rules(bp, &mut findings);
    stage_sequencing(bp, &mut findings);
    template_references(&template, &mut findings);
    template_dependencies(&template, &mut findings);
    policy_resource_scope(bp, &mut findings);
    single_artifact_key(bp, &template, &mut findings);
    role_trust(bp, &mut findings);
    role_least_privilege(bp, &mut findings);
    cross_account_assumption(bp, &bindings, &mut findings);
    role_sufficiency(bp, &bindings, &mut findings);

    findings.push(Finding::warning(
        "trust.far_side",
        format!(
            "the trust policy on role '{}' in account {} is not provisioned by this stack; \
             run 'crossdeploy trust' for the required document",
            bp.params.cross_account_role, bp.params.target_account
        ),
    ));

    tracing::debug!(findings = findings.len(), "blueprint checks complete");
    findings
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

/// The blueprint's own rules fire for its watched branch only, and for every
/// allowed branch the rebuilt rule set holds exactly one enabled rule that
/// fires for that branch only.
fn trigger_rules(bp: &Blueprint, findings: &mut Vec<Finding>) {
    const CHECK: &str = "trigger.one_rule_per_branch";
    for problem in trigger::rule_set_problems(&bp.rules, &[bp.params.branch]) {
        findings.push(Finding::error(CHECK, problem));
    }
    for problem in event_sweep(bp, bp.params.branch) {
        findings.push(Finding::error(CHECK, problem));
    }

    for &branch in Branch::all() {
        if branch == bp.params.branch {
            continue;
        }
        let variant = match bp.for_branch(branch) {
            Ok(v) => v,
            Err(e) => {
                findings.push(Finding::error(CHECK, e.to_string()));
                continue;
            }
        };
        for problem in trigger::rule_set_problems(&variant.rules, &[branch]) {
            findings.push(Finding::error(CHECK, problem));
        }
        for problem in event_sweep(&variant, branch) {
            findings.push(Finding::error(CHECK, problem));
        }
    }
}

/// Sends created and updated events for every allowed branch, plus a
/// deletion of `watched`, through `bp`'s enabled rules. Anything other than
/// exactly one match for a commit on `watched` is a problem.
fn event_sweep(bp: &Blueprint, watched: Branch) -> Vec<String> {
    let mut problems = Vec::new();
    let bindings = bp.bindings();
    let repo_arn = match bp.repository_arn().resolve(&bindings) {
        Ok(arn) => arn,
        Err(e) => return vec![e.to_string()],
    };
    for &candidate in Branch::all() {
        for event in [ReferenceEvent::ReferenceCreated, ReferenceEvent::ReferenceUpdated] {
            let ev = CommitEvent::branch(&repo_arn, event, candidate.as_str(), None);
            match matching_rules(bp, &ev, &bindings) {
                Ok(n) if candidate == watched && n != 1 => problems.push(format!(
                    "{event} on '{candidate}' matched {n} rules (expected 1)"
                )),
                Ok(n) if candidate != watched && n != 0 => problems.push(format!(
                    "stack watching '{watched}' also starts on {event} for '{candidate}'"
                )),
                Ok(_) => {}
                Err(e) => problems.push(e.to_string()),
            }
        }
    }
    let deleted = CommitEvent::branch(
        &repo_arn,
        ReferenceEvent::ReferenceDeleted,
        watched.as_str(),
        None,
    );
    if matches!(matching_rules(bp, &deleted, &bindings), Ok(n) if n > 0) {
        problems.push(format!("branch deletion of '{watched}' starts the pipeline"));
    }
    problems
}

fn matching_rules(bp: &Blueprint, event: &CommitEvent, bindings: &Bindings) -> Result<usize> {
    let mut n = 0;
    for rule in bp.rules.iter().filter(|r| r.enabled) {
        if rule.pattern.matches(event, bindings)? {
            n += 1;
        }
    }
    Ok(n)
}

fn stage_sequencing(bp: &Blueprint, findings: &mut Vec<Finding>) {
    for problem in bp.pipeline.problems() {
        findings.push(Finding::error("pipeline.definition", problem));
    }

    const CHECK: &str = "pipeline.artifact_handoff";
    match (bp.pipeline.stage(SOURCE_STAGE), bp.pipeline.stage(DEPLOY_STAGE)) {
        (Some(source), Some(deploy)) => {
            let produced: BTreeSet<&str> = source.outputs().collect();
            let consumed: BTreeSet<&str> = deploy
                .actions
                .iter()
                .flat_map(|a| a.input_artifacts.iter().map(String::as_str))
                .collect();
            if produced.is_empty() || produced != consumed {
                findings.push(Finding::error(
                    CHECK,
                    format!(
                        "Deploy consumes {consumed:?} but Source produces {produced:?}"
                    ),
                ));
            }
        }
        _ => findings.push(Finding::error(
            CHECK,
            format!("pipeline must have '{SOURCE_STAGE}' and '{DEPLOY_STAGE}' stages"),
        )),
    }
}

fn template_references(template: &Template, findings: &mut Vec<Finding>) {
    for (location, name) in template.dangling_references() {
        findings.push(Finding::error(
            "template.references",
            format!("{location} references undeclared '{name}'"),
        ));
    }
}

fn template_dependencies(template: &Template, findings: &mut Vec<Finding>) {
    if let Some(cycle) = template.dependency_cycle() {
        findings.push(Finding::error(
            "template.dependencies",
            format!("resource dependency cycle: {}", cycle.join(" -> ")),
        ));
    }
}

/// Policy resources must name things the template declares. The single
/// wildcard allowed is `iam:PassRole` on the orchestrator role.
fn policy_resource_scope(bp: &Blueprint, findings: &mut Vec<Finding>) {
    const CHECK: &str = "policy.resource_scope";
    for role in bp.roles() {
        for st in role.statements() {
            for resource in &st.resource {
                if resource.is_wildcard() {
                    let allowed = role.responsibility == Responsibility::Orchestrate
                        && st.only_actions(&[PASS_ROLE]);
                    if !allowed {
                        findings.push(Finding::error(
                            CHECK,
                            format!(
                                "{} grants {:?} on '*'; only {PASS_ROLE} on the pipeline role may",
                                role.logical_id(),
                                st.action
                            ),
                        ));
                    }
                } else if matches!(resource, Expr::Lit(_)) {
                    findings.push(Finding::error(
                        CHECK,
                        format!(
                            "{} names a resource outside the template: {}",
                            role.logical_id(),
                            resource.to_value()
                        ),
                    ));
                }
            }
        }
    }
}

/// Bucket encryption, the pipeline's artifact store, the build project and
/// every `kms:Decrypt` grant all point at the one key.
fn single_artifact_key(bp: &Blueprint, template: &Template, findings: &mut Vec<Finding>) {
    const CHECK: &str = "artifacts.single_key";
    let key = bp.store.key_arn().to_value();

    let mut sites = Vec::new();
    if let Some(bucket) = template.resources.get(&bp.store.bucket_id) {
        sites.push((
            "bucket encryption",
            bucket.properties["BucketEncryption"]["ServerSideEncryptionConfiguration"][0]
                ["ServerSideEncryptionByDefault"]["KMSMasterKeyID"]
                .clone(),
        ));
    }
    if let Some(pipeline) = template.resources.get(ids::PIPELINE) {
        sites.push((
            "pipeline artifact store",
            pipeline.properties["ArtifactStore"]["EncryptionKey"]["Id"].clone(),
        ));
    }
    if let Some(project) = template.resources.get(&bp.build_project.logical_id) {
        sites.push(("build project", project.properties["EncryptionKey"].clone()));
    }
    if sites.len() != 3 {
        findings.push(Finding::error(CHECK, "artifact store resources are missing"));
    }
    for (site, value) in sites {
        if value != key {
            findings.push(Finding::error(
                CHECK,
                format!("{site} uses key {value} instead of {key}"),
            ));
        }
    }

    for role in bp.roles() {
        for st in role.statements().filter(|s| s.grants("kms:Decrypt")) {
            if st.resource != [bp.store.key_arn()] {
                findings.push(Finding::error(
                    CHECK,
                    format!("{} is granted kms:Decrypt on a different key", role.logical_id()),
                ));
            }
        }
    }
}

fn role_trust(bp: &Blueprint, findings: &mut Vec<Finding>) {
    for role in bp.roles() {
        if !role.trusts_only_its_service() {
            findings.push(Finding::error(
                "roles.trust",
                format!(
                    "{} must be assumable only by {}",
                    role.logical_id(),
                    role.responsibility.service()
                ),
            ));
        }
    }
}

fn role_least_privilege(bp: &Blueprint, findings: &mut Vec<Finding>) {
    for role in bp.roles() {
        let allowed = role.responsibility.allowed_actions();
        for st in role.statements() {
            for action in st.action.iter().filter(|a| !allowed.contains(&a.as_str())) {
                findings.push(Finding::error(
                    "roles.least_privilege",
                    format!(
                        "{} grants {action}, outside the {} responsibility",
                        role.logical_id(),
                        role.responsibility
                    ),
                ));
            }
        }
    }
}

/// The build role may assume the cross-account role and nothing else.
fn cross_account_assumption(bp: &Blueprint, bindings: &Bindings, findings: &mut Vec<Finding>) {
    const CHECK: &str = "roles.cross_account";
    for st in bp.build_role.statements().filter(|s| s.grants("sts:AssumeRole")) {
        if st.resource != [bp.cross_account_role_arn()] {
            findings.push(Finding::error(
                CHECK,
                "BuildRole may assume roles other than the cross-account role",
            ));
        }
    }
    let target = bp.params.cross_account_role_arn();
    match bp.build_role.decide(bindings, "sts:AssumeRole", &target) {
        Ok(d) if d.is_allowed() => {}
        Ok(d) => findings.push(Finding::error(
            CHECK,
            format!("BuildRole cannot assume {target} ({d:?})"),
        )),
        Err(e) => findings.push(Finding::error(CHECK, e.to_string())),
    }
}

/// Each role can actually do its job against the physical resources.
fn role_sufficiency(bp: &Blueprint, bindings: &Bindings, findings: &mut Vec<Finding>) {
    const CHECK: &str = "roles.sufficient";
    let (repo, project, pipeline) = match physical_targets(bp, bindings) {
        Ok(t) => t,
        Err(e) => {
            findings.push(Finding::error(CHECK, e.to_string()));
            return;
        }
    };

    let mut wanted: Vec<(Responsibility, &str, String)> = Vec::new();
    for stage in &bp.pipeline.stages {
        for action in &stage.actions {
            let resource = match action.provider {
                ActionProvider::CodeCommit => &repo,
                ActionProvider::CodeBuild => &project,
            };
            for &perm in action.provider.required_permissions() {
                wanted.push((Responsibility::Orchestrate, perm, resource.clone()));
            }
        }
    }
    wanted.push((
        Responsibility::Trigger,
        "codepipeline:StartPipelineExecution",
        pipeline,
    ));

    for (responsibility, action, resource) in wanted {
        let role = bp.role(responsibility);
        match role.decide(bindings, action, &resource) {
            Ok(d) if d.is_allowed() => {}
            Ok(_) => findings.push(Finding::error(
                CHECK,
                format!("{} cannot {action} on {resource}", role.logical_id()),
            )),
            Err(e) => findings.push(Finding::error(CHECK, e.to_string())),
        }
    }
}

fn physical_targets(bp: &Blueprint, bindings: &Bindings) -> Result<(String, String, String)> {
    Ok((
        bp.repository_arn().resolve(bindings)?,
        bp.build_project.arn().resolve(bindings)?,
        bp.pipeline_arn().resolve(bindings)?,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Statement;

    fn cfg() -> StackConfig {
        let mut c = StackConfig::new("svc-pipeline", "svc", "123456789012");
        c.stack.account_id = Some("111111111111".into());
        c
    }

    fn blueprint() -> Blueprint {
        Blueprint::from_parameters(StackParameters::from_config(&cfg()).unwrap()).unwrap()
    }

    fn errors(findings: &[Finding]) -> Vec<&Finding> {
        findings.iter().filter(|f| f.is_error()).collect()
    }

    #[test]
    fn default_stack_has_no_errors_and_one_trust_warning() {
        let findings = validate_config(&cfg());
        assert!(errors(&findings).is_empty(), "{findings:?}");
        let warnings: Vec<_> = findings.iter().filter(|f| !f.is_error()).collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].check, "trust.far_side");
    }

    #[test]
    fn every_branch_gets_exactly_one_matching_rule() {
        for &branch in Branch::all() {
            let mut c = cfg();
            c.source.branch = branch.as_str().into();
            assert!(errors(&validate_config(&c)).is_empty(), "{branch}");
        }
    }

    #[test]
    fn config_errors_skip_blueprint_checks() {
        let mut c = cfg();
        c.environment = "qa".into();
        let findings = validate_config(&c);
        assert!(findings.iter().all(|f| f.check.starts_with("config.")));
    }

    fn trigger_errors(bp: &Blueprint) -> Vec<Finding> {
        check_blueprint(bp)
            .into_iter()
            .filter(|f| f.is_error() && f.check == "trigger.one_rule_per_branch")
            .collect()
    }

    #[test]
    fn fresh_blueprint_has_no_trigger_errors() {
        assert!(trigger_errors(&blueprint()).is_empty());
    }

    #[test]
    fn duplicate_enabled_rule_is_reported() {
        let mut bp = blueprint();
        let mut extra = bp.rules[0].clone();
        extra.logical_id = "ExtraTrigger".into();
        bp.rules.push(extra);

        let found = trigger_errors(&bp);
        assert!(
            found.iter().any(|f| f.message.contains("2 enabled trigger rules")),
            "{found:?}"
        );
        assert!(found.iter().any(|f| f.message.contains("matched 2 rules")), "{found:?}");
    }

    #[test]
    fn disabled_rule_is_reported() {
        let mut bp = blueprint();
        bp.rules[0].enabled = false;

        let found = trigger_errors(&bp);
        assert!(found.iter().any(|f| f.message.contains("0 enabled")), "{found:?}");
        assert!(found.iter().any(|f| f.message.contains("matched 0 rules")), "{found:?}");
    }

    #[test]
    fn rule_watching_the_wrong_branch_is_reported() {
        let mut bp = blueprint();
        assert_eq!(bp.params.branch, Branch::Main);
        bp.rules[0].pattern.reference_names = vec![Expr::lit("develop")];

        let found = trigger_errors(&bp);
        assert!(
            found.iter().any(|f| f.message.contains("on 'main' matched 0 rules")),
            "{found:?}"
        );
        assert!(
            found.iter().any(|f| f.message.contains("also starts on referenceUpdated for 'develop'")),
            "{found:?}"
        );
    }

    #[test]
    fn broad_wildcard_is_flagged() {
        let mut bp = blueprint();
        bp.build_role.policies[0]
            .document
            .statements
            .push(Statement::allow(["s3:GetObject"]).on([Expr::lit("*")]));
        let findings = check_blueprint(&bp);
        assert!(findings.iter().any(|f| f.check == "policy.resource_scope"));
    }

    #[test]
    fn hardcoded_resource_is_flagged() {
        let mut bp = blueprint();
        bp.trigger_role.policies[0].document.statements[0].resource =
            vec![Expr::lit("arn:aws:codepipeline:us-east-1:222222222222:other")];
        let findings = check_blueprint(&bp);
        assert!(findings.iter().any(|f| f.check == "policy.resource_scope"));
        assert!(findings.iter().any(|f| f.check == "roles.sufficient"));
    }

    #[test]
    fn decrypt_on_other_key_is_flagged() {
        let mut bp = blueprint();
        bp.pipeline_role.policies[0]
            .document
            .statements
            .push(Statement::allow(["kms:Decrypt"]).on([Expr::get_att("OtherKey", "Arn")]));
        let findings = check_blueprint(&bp);
        assert!(findings.iter().any(|f| f.check == "artifacts.single_key"));
        assert!(findings.iter().any(|f| f.check == "template.references"));
    }

    #[test]
    fn build_project_key_mismatch_is_flagged() {
        let mut bp = blueprint();
        bp.build_project.encryption_key = Expr::sub("alias/aws/s3");
        let findings = check_blueprint(&bp);
        assert!(findings
            .iter()
            .any(|f| f.check == "artifacts.single_key" && f.message.contains("build project")));
    }

    #[test]
    fn extra_action_on_role_is_flagged() {
        let mut bp = blueprint();
        bp.trigger_role.policies[0].document.statements[0]
            .action
            .push("codepipeline:DeletePipeline".into());
        let findings = check_blueprint(&bp);
        assert!(findings.iter().any(|f| f.check == "roles.least_privilege"));
    }

    #[test]
    fn broken_handoff_is_flagged() {
        let mut bp = blueprint();
        bp.pipeline.stages[1].actions[0].input_artifacts = vec!["Other".into()];
        let findings = check_blueprint(&bp);
        assert!(findings.iter().any(|f| f.check == "pipeline.artifact_handoff"));
        assert!(findings.iter().any(|f| f.check == "pipeline.definition"));
    }

    #[test]
    fn findings_serialize_with_snake_case_level() {
        let v = serde_json::to_value(Finding::warning("x", "y")).unwrap();
        assert_eq!(v["level"], "warning");
    }
}
