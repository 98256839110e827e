//! The typed model of the whole stack.
//!
//! A [`Blueprint`] is assembled from validated [`StackParameters`]. It renders
//! to a CloudFormation [`Template`] and, for dry runs, supplies [`Bindings`]
//! that stand in for the physical names CloudFormation would assign.

use crate::arn;
use crate::artifact_store::ArtifactStore;
use crate::build::{self, BuildProject};
use crate::config::StackParameters;
use crate::error::Result;
use crate::expr::{Bindings, Expr};
use crate::pipeline::PipelineDefinition;
use crate::policy::PolicyDocument;
use crate::roles::{self, IdentityPolicy, Responsibility};
use crate::template::{Output, Parameter, Resource, Template};
use crate::trigger::{EventPattern, RuleTarget, TriggerRule};
use crate::types::{self, AccountId, Branch, Environment};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Logical ids of template parameters.
pub mod params {
    pub const TARGET_ACCOUNT_ID: &str = "TargetAccountId";
    pub const CROSS_ACCOUNT_ROLE_NAME: &str = "CrossAccountRoleName";
    pub const EXECUTION_ROLE_NAME: &str = "ExecutionRoleName";
    pub const REPOSITORY_NAME: &str = "RepositoryName";
    pub const BRANCH_NAME: &str = "BranchName";
    pub const ENVIRONMENT: &str = "Environment";
}

/// Logical ids of template resources.
pub mod ids {
    pub const ARTIFACT_KEY: &str = "ArtifactKey";
    pub const ARTIFACT_KEY_ALIAS: &str = "ArtifactKeyAlias";
    pub const ARTIFACT_BUCKET: &str = "ArtifactBucket";
    pub const ARTIFACT_BUCKET_POLICY: &str = "ArtifactBucketPolicy";
    pub const SOURCE_REPOSITORY: &str = "SourceRepository";
    pub const BUILD_PROJECT: &str = "BuildProject";
    pub const PIPELINE: &str = "Pipeline";
    pub const TRIGGER_RULE: &str = "PipelineTriggerRule";
}

pub const CLOUDFORMATION_SERVICE: &str = "cloudformation.amazonaws.com";

#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    pub params: StackParameters,
    pub store: ArtifactStore,
    pub build_project: BuildProject,
    pub pipeline: PipelineDefinition,
    pub build_role: IdentityPolicy,
    pub pipeline_role: IdentityPolicy,
    pub trigger_role: IdentityPolicy,
    pub rules: Vec<TriggerRule>,
}

impl Blueprint {
    pub fn from_parameters(stack: StackParameters) -> Result<Self> {
        let store = ArtifactStore {
            bucket_id: ids::ARTIFACT_BUCKET.to_string(),
            key_id: ids::ARTIFACT_KEY.to_string(),
            alias_id: ids::ARTIFACT_KEY_ALIAS.to_string(),
            alias_name: Expr::sub("alias/${AWS::StackName}-artifacts"),
            versioning: true,
            noncurrent_version_retention_days: stack.retention_days,
        };

        let build_role = roles::build_role(
            &store,
            log_group_arn(),
            cross_account_role_arn(),
        );
        let build_project = BuildProject::new(
            ids::BUILD_PROJECT,
            Expr::sub("${AWS::StackName}-build"),
            build_role.arn(),
            store.key_arn(),
            Expr::sub(LOG_GROUP_NAME),
            &stack.build,
        )
        .env(build::ENV_TARGET_ACCOUNT_ID, Expr::reference(params::TARGET_ACCOUNT_ID))
        .env(build::ENV_CROSS_ACCOUNT_ROLE, Expr::reference(params::CROSS_ACCOUNT_ROLE_NAME))
        .env(build::ENV_EXECUTION_ROLE, Expr::reference(params::EXECUTION_ROLE_NAME))
        .env(build::ENV_ENVIRONMENT, Expr::reference(params::ENVIRONMENT));

        let pipeline_role = roles::pipeline_role(
            &store,
            repository_arn(),
            build_project.arn(),
        );
        let trigger_role = roles::trigger_role(pipeline_arn());

        let pipeline = PipelineDefinition::two_stage(
            Expr::get_att(ids::SOURCE_REPOSITORY, "Name"),
            Expr::reference(params::BRANCH_NAME),
            Expr::reference(ids::BUILD_PROJECT),
        );
        pipeline.validate()?;

        let rules = vec![TriggerRule {
            logical_id: ids::TRIGGER_RULE.to_string(),
            branch: stack.branch,
            enabled: true,
            pattern: EventPattern::branch_commits(
                repository_arn(),
                Expr::reference(params::BRANCH_NAME),
            ),
            target: RuleTarget {
                id: "pipeline".to_string(),
                pipeline_arn: pipeline_arn(),
                role_arn: trigger_role.arn(),
            },
        }];

        tracing::debug!(stack = %stack.stack_name, "blueprint assembled");
        Ok(Self {
            params: stack,
            store,
            build_project,
            pipeline,
            build_role,
            pipeline_role,
            trigger_role,
            rules,
        })
    }

    /// Same stack, watching a different branch.
    pub fn for_branch(&self, branch: Branch) -> Result<Self> {
        let mut stack = self.params.clone();
        stack.branch = branch;
        Self::from_parameters(stack)
    }

    pub fn roles(&self) -> [&IdentityPolicy; 3] {
        [&self.build_role, &self.pipeline_role, &self.trigger_role]
    }

    pub fn role(&self, responsibility: Responsibility) -> &IdentityPolicy {
        match responsibility {
            Responsibility::Build => &self.build_role,
            Responsibility::Orchestrate => &self.pipeline_role,
            Responsibility::Trigger => &self.trigger_role,
        }
    }

    pub fn pipeline_arn(&self) -> Expr {
        pipeline_arn()
    }

    pub fn repository_arn(&self) -> Expr {
        repository_arn()
    }

    pub fn cross_account_role_arn(&self) -> Expr {
        cross_account_role_arn()
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    pub fn template(&self) -> Template {
        let p = &self.params;
        let description = p.description.clone().unwrap_or_else(|| {
            format!("Cross-account deployment pipeline for {}", p.repository)
        });
        let mut t = Template::new(description);

        t.parameters.insert(
            params::TARGET_ACCOUNT_ID.into(),
            Parameter::string("Account the pipeline deploys into")
                .pattern(AccountId::PATTERN, "must be exactly 12 digits")
                .default_value(p.target_account.as_str()),
        );
        t.parameters.insert(
            params::CROSS_ACCOUNT_ROLE_NAME.into(),
            Parameter::string("Role in the target account assumed by the build")
                .pattern(types::ROLE_NAME_PATTERN, "must be a valid IAM role name")
                .default_value(&p.cross_account_role),
        );
        t.parameters.insert(
            params::EXECUTION_ROLE_NAME.into(),
            Parameter::string("Role in the target account used to execute the deployment")
                .pattern(types::ROLE_NAME_PATTERN, "must be a valid IAM role name")
                .default_value(&p.execution_role),
        );
        t.parameters.insert(
            params::REPOSITORY_NAME.into(),
            Parameter::string("Source repository name")
                .pattern(types::REPOSITORY_NAME_PATTERN, "must be a valid repository name")
                .default_value(&p.repository),
        );
        t.parameters.insert(
            params::BRANCH_NAME.into(),
            Parameter::string("Branch that starts the pipeline")
                .values(Branch::all().iter().map(|b| b.as_str()))
                .default_value(p.branch.as_str()),
        );
        t.parameters.insert(
            params::ENVIRONMENT.into(),
            Parameter::string("Environment tag passed to the build")
                .values(Environment::all().iter().map(|e| e.as_str()))
                .default_value(p.environment.as_str()),
        );

        let s = &self.store;
        t.resources.insert(
            s.key_id.clone(),
            Resource::new("AWS::KMS::Key", s.key_properties()),
        );
        t.resources.insert(
            s.alias_id.clone(),
            Resource::new("AWS::KMS::Alias", s.alias_properties()),
        );
        t.resources.insert(
            s.bucket_id.clone(),
            Resource::new("AWS::S3::Bucket", s.bucket_properties()),
        );
        t.resources.insert(
            ids::ARTIFACT_BUCKET_POLICY.into(),
            Resource::new("AWS::S3::BucketPolicy", s.bucket_policy_properties()),
        );
        t.resources.insert(
            ids::SOURCE_REPOSITORY.into(),
            Resource::new(
                "AWS::CodeCommit::Repository",
                json!({
                    "RepositoryName": Expr::reference(params::REPOSITORY_NAME),
                    "RepositoryDescription": "Source for the cross-account deployment pipeline",
                }),
            ),
        );
        for role in self.roles() {
            t.resources.insert(
                role.logical_id().into(),
                Resource::new("AWS::IAM::Role", role.properties()),
            );
        }
        t.resources.insert(
            self.build_project.logical_id.clone(),
            Resource::new("AWS::CodeBuild::Project", self.build_project.properties()),
        );
        t.resources.insert(
            ids::PIPELINE.into(),
            Resource::new(
                "AWS::CodePipeline::Pipeline",
                json!({
                    "Name": Expr::sub("${AWS::StackName}-pipeline"),
                    "RoleArn": self.pipeline_role.arn(),
                    "ArtifactStore": s.pipeline_store_value(),
                    "RestartExecutionOnUpdate": self.pipeline.restart_execution_on_update,
                    "Stages": self.pipeline.stages_value(),
                }),
            )
            .depends_on(ids::ARTIFACT_BUCKET_POLICY),
        );
        for rule in &self.rules {
            t.resources.insert(
                rule.logical_id.clone(),
                Resource::new("AWS::Events::Rule", rule.to_properties()),
            );
        }

        for (name, description, value) in self.output_exprs() {
            t.outputs.insert(name.to_string(), Output::exported(name, description, &value));
        }
        t
    }

    fn output_exprs(&self) -> Vec<(&'static str, &'static str, Expr)> {
        vec![
            ("PipelineName", "Name of the pipeline", Expr::reference(ids::PIPELINE)),
            (
                "PipelineUrl",
                "Console URL of the pipeline",
                Expr::sub(
                    "https://${AWS::Region}.console.aws.amazon.com/codesuite/codepipeline/pipelines/${Pipeline}/view?region=${AWS::Region}",
                ),
            ),
            ("RepositoryArn", "ARN of the source repository", repository_arn()),
            (
                "RepositoryCloneUrlHttp",
                "HTTPS clone URL of the source repository",
                Expr::get_att(ids::SOURCE_REPOSITORY, "CloneUrlHttp"),
            ),
            ("BuildProjectName", "Name of the build project", Expr::reference(ids::BUILD_PROJECT)),
            ("BuildRoleArn", "ARN of the build role", self.build_role.arn()),
            ("PipelineRoleArn", "ARN of the pipeline role", self.pipeline_role.arn()),
            ("TriggerRoleArn", "ARN of the trigger role", self.trigger_role.arn()),
            ("ArtifactKeyArn", "ARN of the artifact encryption key", self.store.key_arn()),
            ("ArtifactBucketArn", "ARN of the artifact bucket", self.store.bucket_arn()),
            (
                "CrossAccountRoleArn",
                "Role in the target account assumed by the build",
                cross_account_role_arn(),
            ),
        ]
    }

    // -----------------------------------------------------------------------
    // Dry-run bindings
    // -----------------------------------------------------------------------

    pub fn pipeline_account(&self) -> AccountId {
        self.params
            .pipeline_account
            .clone()
            .unwrap_or_else(AccountId::placeholder)
    }

    /// Values CloudFormation would produce for every parameter, pseudo
    /// parameter and resource attribute the template refers to.
    pub fn bindings(&self) -> Bindings {
        let p = &self.params;
        let account = self.pipeline_account();
        let region = p.region.as_str();
        let stack = p.stack_name.as_str();
        let mut b = Bindings::with_pseudo(region, account.as_str(), stack);

        b.bind(params::TARGET_ACCOUNT_ID, p.target_account.as_str());
        b.bind(params::CROSS_ACCOUNT_ROLE_NAME, &p.cross_account_role);
        b.bind(params::EXECUTION_ROLE_NAME, &p.execution_role);
        b.bind(params::REPOSITORY_NAME, &p.repository);
        b.bind(params::BRANCH_NAME, p.branch.as_str());
        b.bind(params::ENVIRONMENT, p.environment.as_str());

        let key_id = format!("{stack}-artifact-key");
        b.bind(ids::ARTIFACT_KEY, &key_id);
        b.bind_attr(ids::ARTIFACT_KEY, "Arn", arn::kms_key_arn(region, &account, &key_id));
        b.bind(ids::ARTIFACT_KEY_ALIAS, format!("alias/{stack}-artifacts"));

        let bucket = format!("{}-artifacts-{}", stack.to_ascii_lowercase(), account);
        b.bind(ids::ARTIFACT_BUCKET, &bucket);
        b.bind(ids::ARTIFACT_BUCKET_POLICY, &bucket);
        b.bind_attr(ids::ARTIFACT_BUCKET, "Arn", arn::bucket_arn(&bucket));

        b.bind(ids::SOURCE_REPOSITORY, &p.repository);
        b.bind_attr(ids::SOURCE_REPOSITORY, "Name", &p.repository);
        b.bind_attr(
            ids::SOURCE_REPOSITORY,
            "Arn",
            arn::repository_arn(region, &account, &p.repository),
        );
        b.bind_attr(
            ids::SOURCE_REPOSITORY,
            "CloneUrlHttp",
            arn::clone_url_http(region, &p.repository),
        );

        for role in self.roles() {
            let name = format!("{stack}-{}", role.logical_id());
            b.bind_attr(role.logical_id(), "Arn", arn::role_arn(&account, &name));
            b.bind(role.logical_id(), name);
        }

        let project = format!("{stack}-build");
        b.bind_attr(
            ids::BUILD_PROJECT,
            "Arn",
            arn::build_project_arn(region, &account, &project),
        );
        b.bind(ids::BUILD_PROJECT, project);

        b.bind(ids::PIPELINE, format!("{stack}-pipeline"));
        for rule in &self.rules {
            b.bind(&rule.logical_id, format!("{stack}-{}", rule.logical_id));
        }
        b
    }

    /// Output values as they would read after deployment.
    pub fn resolved_outputs(&self, bindings: &Bindings) -> Result<BTreeMap<String, String>> {
        self.output_exprs()
            .into_iter()
            .map(|(name, _, value)| Ok((name.to_string(), value.resolve(bindings)?)))
            .collect()
    }

    /// Environment the build container receives.
    pub fn build_environment(&self, bindings: &Bindings) -> Result<BTreeMap<String, String>> {
        self.build_project
            .environment
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.resolve(bindings)?)))
            .collect()
    }

    /// What the target account must provision for deployments to work.
    pub fn far_side_trust(&self, bindings: &Bindings) -> Result<FarSideTrust> {
        let build_role_arn = self.build_role.arn().resolve(bindings)?;
        Ok(FarSideTrust {
            target_account: self.params.target_account.to_string(),
            cross_account_role: self.params.cross_account_role.clone(),
            cross_account_role_arn: self.params.cross_account_role_arn(),
            cross_account_trust: PolicyDocument::account_trust(vec![Expr::lit(build_role_arn)]),
            execution_role: self.params.execution_role.clone(),
            execution_trust: PolicyDocument::service_trust(CLOUDFORMATION_SERVICE),
        })
    }
}

/// Trust documents the target account's roles must carry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FarSideTrust {
    pub target_account: String,
    pub cross_account_role: String,
    pub cross_account_role_arn: String,
    pub cross_account_trust: PolicyDocument,
    pub execution_role: String,
    pub execution_trust: PolicyDocument,
}

const LOG_GROUP_NAME: &str = "/aws/codebuild/${AWS::StackName}-build";

fn log_group_arn() -> Expr {
    Expr::sub(format!(
        "arn:${{AWS::Partition}}:logs:${{AWS::Region}}:${{AWS::AccountId}}:log-group:{LOG_GROUP_NAME}"
    ))
}

fn repository_arn() -> Expr {
    Expr::get_att(ids::SOURCE_REPOSITORY, "Arn")
}

fn pipeline_arn() -> Expr {
    Expr::sub("arn:${AWS::Partition}:codepipeline:${AWS::Region}:${AWS::AccountId}:${Pipeline}")
}

fn cross_account_role_arn() -> Expr {
    Expr::sub(format!(
        "arn:${{AWS::Partition}}:iam::${{{}}}:role/${{{}}}",
        params::TARGET_ACCOUNT_ID,
        params::CROSS_ACCOUNT_ROLE_NAME
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::pipeline::{DEPLOY_STAGE, SOURCE_ARTIFACT, SOURCE_STAGE};

    fn blueprint() -> Blueprint {
        let mut cfg = StackConfig::new("svc-pipeline", "svc", "123456789012");
        cfg.stack.account_id = Some("111111111111".into());
        Blueprint::from_parameters(StackParameters::from_config(&cfg).unwrap()).unwrap()
    }

    #[test]
    fn template_declares_every_component() {
        let t = blueprint().template();
        let kinds: Vec<&str> = t.resources.values().map(|r| r.kind.as_str()).collect();
        for kind in [
            "AWS::KMS::Key",
            "AWS::KMS::Alias",
            "AWS::S3::Bucket",
            "AWS::S3::BucketPolicy",
            "AWS::CodeCommit::Repository",
            "AWS::IAM::Role",
            "AWS::CodeBuild::Project",
            "AWS::CodePipeline::Pipeline",
            "AWS::Events::Rule",
        ] {
            assert!(kinds.contains(&kind), "missing {kind}");
        }
        assert_eq!(kinds.iter().filter(|k| **k == "AWS::IAM::Role").count(), 3);
        assert!(t.dangling_references().is_empty(), "{:?}", t.dangling_references());
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = blueprint().template().to_json().unwrap();
        let b = blueprint().template().to_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parameters_carry_constraints_and_defaults() {
        let t = blueprint().template();
        let account = &t.parameters[params::TARGET_ACCOUNT_ID];
        assert_eq!(account.allowed_pattern.as_deref(), Some("^[0-9]{12}$"));
        assert_eq!(account.default.as_deref(), Some("123456789012"));
        assert_eq!(
            t.parameters[params::BRANCH_NAME].allowed_values,
            vec!["main", "master", "develop"]
        );
        assert_eq!(
            t.parameters[params::ENVIRONMENT].allowed_values,
            vec!["dev", "staging", "prod"]
        );
    }

    #[test]
    fn outputs_resolve_to_physical_identifiers() {
        let bp = blueprint();
        let outputs = bp.resolved_outputs(&bp.bindings()).unwrap();
        assert_eq!(
            outputs["CrossAccountRoleArn"],
            "arn:aws:iam::123456789012:role/cross-account-role-serverless-deployment"
        );
        assert_eq!(outputs["PipelineName"], "svc-pipeline-pipeline");
        assert_eq!(
            outputs["RepositoryArn"],
            "arn:aws:codecommit:us-east-1:111111111111:svc"
        );
        assert_eq!(
            outputs["BuildRoleArn"],
            "arn:aws:iam::111111111111:role/svc-pipeline-BuildRole"
        );
        assert!(outputs["PipelineUrl"].contains("/pipelines/svc-pipeline-pipeline/view"));
    }

    #[test]
    fn pipeline_hands_source_artifact_to_deploy() {
        let bp = blueprint();
        let source = bp.pipeline.stage(SOURCE_STAGE).unwrap();
        let deploy = bp.pipeline.stage(DEPLOY_STAGE).unwrap();
        assert_eq!(source.outputs().collect::<Vec<_>>(), vec![SOURCE_ARTIFACT]);
        assert_eq!(deploy.actions[0].input_artifacts, vec![SOURCE_ARTIFACT]);
    }

    #[test]
    fn build_environment_is_injected() {
        let bp = blueprint();
        let env = bp.build_environment(&bp.bindings()).unwrap();
        assert_eq!(env[build::ENV_TARGET_ACCOUNT_ID], "123456789012");
        assert_eq!(env[build::ENV_CROSS_ACCOUNT_ROLE], "cross-account-role-serverless-deployment");
        assert_eq!(env[build::ENV_EXECUTION_ROLE], "cloudformation-execution-role");
        assert_eq!(env[build::ENV_ENVIRONMENT], "dev");
    }

    #[test]
    fn far_side_trust_names_the_build_role() {
        let bp = blueprint();
        let trust = bp.far_side_trust(&bp.bindings()).unwrap();
        let doc = serde_json::to_value(&trust.cross_account_trust).unwrap();
        assert_eq!(
            doc["Statement"][0]["Principal"]["AWS"][0],
            "arn:aws:iam::111111111111:role/svc-pipeline-BuildRole"
        );
        assert_eq!(trust.target_account, "123456789012");
    }

    #[test]
    fn missing_pipeline_account_uses_placeholder() {
        let cfg = StackConfig::new("svc", "svc", "123456789012");
        let bp = Blueprint::from_parameters(StackParameters::from_config(&cfg).unwrap()).unwrap();
        assert_eq!(bp.pipeline_account().as_str(), "000000000000");
    }
}
