//! One IAM role per responsibility, each with the smallest action set that
//! responsibility needs.

use crate::artifact_store::ArtifactStore;
use crate::error::Result;
use crate::expr::{Bindings, Expr};
use crate::policy::{
    evaluate, Decision, NamedPolicy, PolicyDocument, Principal, ResolvedStatement, Statement,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

pub const PASS_ROLE: &str = "iam:PassRole";

const KMS_USAGE: &[&str] = &[
    "kms:Decrypt",
    "kms:DescribeKey",
    "kms:Encrypt",
    "kms:GenerateDataKey*",
    "kms:ReEncrypt*",
];

// ---------------------------------------------------------------------------
// Responsibility
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Responsibility {
    Build,
    Orchestrate,
    Trigger,
}

impl Responsibility {
    pub fn all() -> &'static [Responsibility] {
        &[
            Responsibility::Build,
            Responsibility::Orchestrate,
            Responsibility::Trigger,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Responsibility::Build => "build",
            Responsibility::Orchestrate => "orchestrate",
            Responsibility::Trigger => "trigger",
        }
    }

    pub fn logical_id(self) -> &'static str {
        match self {
            Responsibility::Build => "BuildRole",
            Responsibility::Orchestrate => "PipelineRole",
            Responsibility::Trigger => "TriggerRole",
        }
    }

    /// The only service allowed to assume the role.
    pub fn service(self) -> &'static str {
        match self {
            Responsibility::Build => "codebuild.amazonaws.com",
            Responsibility::Orchestrate => "codepipeline.amazonaws.com",
            Responsibility::Trigger => "events.amazonaws.com",
        }
    }

    /// Upper bound on what the role's policies may grant.
    pub fn allowed_actions(self) -> &'static [&'static str] {
        match self {
            Responsibility::Build => &[
                "logs:CreateLogGroup",
                "logs:CreateLogStream",
                "logs:PutLogEvents",
                "s3:GetObject",
                "s3:GetObjectVersion",
                "s3:PutObject",
                "kms:Decrypt",
                "kms:DescribeKey",
                "kms:Encrypt",
                "kms:GenerateDataKey*",
                "kms:ReEncrypt*",
                "sts:AssumeRole",
            ],
            Responsibility::Orchestrate => &[
                "codecommit:GetBranch",
                "codecommit:GetCommit",
                "codecommit:UploadArchive",
                "codecommit:GetUploadArchiveStatus",
                "codebuild:StartBuild",
                "codebuild:BatchGetBuilds",
                "s3:GetObject",
                "s3:GetObjectVersion",
                "s3:PutObject",
                "s3:GetBucketVersioning",
                "kms:Decrypt",
                "kms:DescribeKey",
                "kms:Encrypt",
                "kms:GenerateDataKey*",
                "kms:ReEncrypt*",
                PASS_ROLE,
            ],
            Responsibility::Trigger => &["codepipeline:StartPipelineExecution"],
        }
    }
}

impl fmt::Display for Responsibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// IdentityPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityPolicy {
    pub responsibility: Responsibility,
    pub trust: PolicyDocument,
    pub policies: Vec<NamedPolicy>,
}

impl IdentityPolicy {
    fn new(responsibility: Responsibility, statements: Vec<Statement>) -> Self {
        Self {
            responsibility,
            trust: PolicyDocument::service_trust(responsibility.service()),
            policies: vec![NamedPolicy {
                name: format!("{}-permissions", responsibility.as_str()),
                document: PolicyDocument::new(statements),
            }],
        }
    }

    pub fn logical_id(&self) -> &'static str {
        self.responsibility.logical_id()
    }

    pub fn arn(&self) -> Expr {
        Expr::get_att(self.logical_id(), "Arn")
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.policies.iter().flat_map(|p| p.document.statements.iter())
    }

    pub fn properties(&self) -> Value {
        json!({
            "Description": format!("Least-privilege role for the {} step", self.responsibility),
            "AssumeRolePolicyDocument": self.trust,
            "Policies": self.policies,
        })
    }

    pub fn resolve(&self, bindings: &Bindings) -> Result<Vec<ResolvedStatement>> {
        let mut out = Vec::new();
        for policy in &self.policies {
            out.extend(policy.document.resolve(bindings)?);
        }
        Ok(out)
    }

    pub fn decide(&self, bindings: &Bindings, action: &str, resource: &str) -> Result<Decision> {
        Ok(evaluate(&self.resolve(bindings)?, action, resource))
    }

    /// True when the trust document admits exactly the responsibility's
    /// service and nothing else.
    pub fn trusts_only_its_service(&self) -> bool {
        let expected = Principal::Service(vec![self.responsibility.service().to_string()]);
        !self.trust.statements.is_empty()
            && self.trust.statements.iter().all(|st| {
                st.principal.as_ref() == Some(&expected) && st.only_actions(&["sts:AssumeRole"])
            })
    }
}

// ---------------------------------------------------------------------------
// Role builders
// ---------------------------------------------------------------------------

fn artifact_statements(store: &ArtifactStore, actions: &[&str]) -> Vec<Statement> {
    vec![
        Statement::allow(actions.iter().copied())
            .sid("ArtifactObjects")
            .on([store.objects_arn()]),
        Statement::allow(KMS_USAGE.iter().copied())
            .sid("ArtifactKey")
            .on([store.key_arn()]),
    ]
}

/// Writes build logs, reads and writes artifacts, and assumes the single
/// cross-account deployment role.
pub fn build_role(store: &ArtifactStore, log_group_arn: Expr, cross_account_role: Expr) -> IdentityPolicy {
    let log_streams = match &log_group_arn {
        Expr::Sub(s) => Expr::sub(format!("{s}:*")),
        other => other.clone(),
    };
    let mut statements = vec![Statement::allow([
        "logs:CreateLogGroup",
        "logs:CreateLogStream",
        "logs:PutLogEvents",
    ])
    .sid("BuildLogs")
    .on([log_group_arn, log_streams])];
    statements.extend(artifact_statements(
        store,
        &["s3:GetObject", "s3:GetObjectVersion", "s3:PutObject"],
    ));
    statements.push(
        Statement::allow(["sts:AssumeRole"])
            .sid("AssumeDeploymentRole")
            .on([cross_account_role]),
    );
    IdentityPolicy::new(Responsibility::Build, statements)
}

/// Pulls source, starts builds, moves artifacts and passes roles to the
/// services it drives.
pub fn pipeline_role(store: &ArtifactStore, repository_arn: Expr, build_project_arn: Expr) -> IdentityPolicy {
    let mut statements = vec![
        Statement::allow([
            "codecommit:GetBranch",
            "codecommit:GetCommit",
            "codecommit:UploadArchive",
            "codecommit:GetUploadArchiveStatus",
        ])
        .sid("SourceRepository")
        .on([repository_arn]),
        Statement::allow(["codebuild:StartBuild", "codebuild:BatchGetBuilds"])
            .sid("BuildProject")
            .on([build_project_arn]),
        Statement::allow(["s3:GetBucketVersioning"])
            .sid("ArtifactBucket")
            .on([store.bucket_arn()]),
    ];
    statements.extend(artifact_statements(
        store,
        &["s3:GetObject", "s3:GetObjectVersion", "s3:PutObject"],
    ));
    statements.push(Statement::allow([PASS_ROLE]).sid("PassRole").on([Expr::lit("*")]));
    IdentityPolicy::new(Responsibility::Orchestrate, statements)
}

/// Starts exactly one pipeline.
pub fn trigger_role(pipeline_arn: Expr) -> IdentityPolicy {
    IdentityPolicy::new(
        Responsibility::Trigger,
        vec![Statement::allow(["codepipeline:StartPipelineExecution"])
            .sid("StartPipeline")
            .on([pipeline_arn])],
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
