//! IAM policy documents and a small evaluator.
//!
//! Documents are built with [`Expr`] resources so they render straight into
//! the template. For dry runs they are resolved against [`Bindings`] and
//! checked with [`evaluate`]: an explicit `Deny` wins, otherwise any matching
//! `Allow` grants, otherwise the request is implicitly denied. Statements
//! carrying a `Condition` block are skipped during evaluation.

use crate::error::Result;
use crate::expr::{Bindings, Expr};
use serde::Serialize;

pub const POLICY_VERSION: &str = "2012-10-17";

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Principal {
    #[serde(rename = "*")]
    Any,
    #[serde(rename = "Service")]
    Service(Vec<String>),
    #[serde(rename = "AWS")]
    Aws(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

impl Statement {
    pub fn allow<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_effect(Effect::Allow, actions)
    }

    pub fn deny<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_effect(Effect::Deny, actions)
    }

    fn with_effect<I, S>(effect: Effect, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sid: None,
            effect,
            principal: None,
            action: actions.into_iter().map(Into::into).collect(),
            resource: Vec::new(),
            condition: None,
        }
    }

    pub fn sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn on(mut self, resources: impl IntoIterator<Item = Expr>) -> Self {
        self.resource.extend(resources);
        self
    }

    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn condition(mut self, condition: serde_json::Value) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn grants(&self, action: &str) -> bool {
        self.effect == Effect::Allow && self.action.iter().any(|a| action_matches(a, action))
    }

    /// True when every action in the statement matches one of `allowed`.
    pub fn only_actions(&self, allowed: &[&str]) -> bool {
        self.action
            .iter()
            .all(|a| allowed.iter().any(|b| a.eq_ignore_ascii_case(b)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statements,
        }
    }

    /// Trust policy letting a single AWS service assume the role.
    pub fn service_trust(service: &str) -> Self {
        Self::new(vec![Statement::allow(["sts:AssumeRole"])
            .principal(Principal::Service(vec![service.to_string()]))])
    }

    /// Trust policy letting the given AWS principals assume the role.
    pub fn account_trust(principals: Vec<Expr>) -> Self {
        Self::new(vec![
            Statement::allow(["sts:AssumeRole"]).principal(Principal::Aws(principals))
        ])
    }

    pub fn resolve(&self, bindings: &Bindings) -> Result<Vec<ResolvedStatement>> {
        self.statements
            .iter()
            .filter(|s| s.condition.is_none())
            .map(|s| {
                let resources = s
                    .resource
                    .iter()
                    .map(|r| r.resolve(bindings))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ResolvedStatement {
                    effect: s.effect,
                    actions: s.action.clone(),
                    resources,
                })
            })
            .collect()
    }
}

/// An inline policy attached to a role.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedPolicy {
    #[serde(rename = "PolicyName")]
    pub name: String,
    #[serde(rename = "PolicyDocument")]
    pub document: PolicyDocument,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    ImplicitDeny,
    ExplicitDeny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

pub fn evaluate(statements: &[ResolvedStatement], action: &str, resource: &str) -> Decision {
    let mut allowed = false;
    for st in statements {
        let hit = st.actions.iter().any(|a| action_matches(a, action))
            && st.resources.iter().any(|r| wildcard_match(r, resource));
        if !hit {
            continue;
        }
        match st.effect {
            Effect::Deny => return Decision::ExplicitDeny,
            Effect::Allow => allowed = true,
        }
    }
    if allowed {
        Decision::Allow
    } else {
        Decision::ImplicitDeny
    }
}

/// IAM action names compare case-insensitively.
pub fn action_matches(pattern: &str, action: &str) -> bool {
    wildcard_match(&pattern.to_ascii_lowercase(), &action.to_ascii_lowercase())
}

/// Glob match supporting `*` (any run) and `?` (one char).
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let (mut pi, mut vi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, vi));
            pi += 1;
        } else if let Some((sp, sv)) = star {
            pi = sp + 1;
            vi = sv + 1;
            star = Some((sp, sv + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statement_serializes_like_iam() {
        let st = Statement::allow(["s3:GetObject"])
            .sid("Read")
            .on([Expr::sub("${ArtifactBucket.Arn}/*")]);
        assert_eq!(
            serde_json::to_value(&st).unwrap(),
            json!({
                "Sid": "Read",
                "Effect": "Allow",
                "Action": ["s3:GetObject"],
                "Resource": [{"Fn::Sub": "${ArtifactBucket.Arn}/*"}]
            })
        );
    }

    #[test]
    fn service_trust_document() {
        let doc = PolicyDocument::service_trust("codebuild.amazonaws.com");
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"Service": ["codebuild.amazonaws.com"]},
                    "Action": ["sts:AssumeRole"]
                }]
            })
        );
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("arn:aws:s3:::b/*", "arn:aws:s3:::b/key/x"));
        assert!(!wildcard_match("arn:aws:s3:::b/*", "arn:aws:s3:::other/key"));
        assert!(wildcard_match("a?c", "abc"));
        assert!(!wildcard_match("a?c", "ac"));
        assert!(wildcard_match("a*b*c", "axxbyyc"));
        assert!(!wildcard_match("a*b*c", "axxbyy"));
    }

    #[test]
    fn actions_match_case_insensitively() {
        assert!(action_matches("s3:Get*", "s3:getobject"));
        assert!(action_matches("CodePipeline:StartPipelineExecution", "codepipeline:startpipelineexecution"));
        assert!(!action_matches("s3:Get*", "s3:PutObject"));
    }

    #[test]
    fn explicit_deny_wins() {
        let statements = vec![
            ResolvedStatement {
                effect: Effect::Allow,
                actions: vec!["s3:*".into()],
                resources: vec!["*".into()],
            },
            ResolvedStatement {
                effect: Effect::Deny,
                actions: vec!["s3:DeleteObject".into()],
                resources: vec!["arn:aws:s3:::b/*".into()],
            },
        ];
        assert_eq!(evaluate(&statements, "s3:GetObject", "arn:aws:s3:::b/k"), Decision::Allow);
        assert_eq!(
            evaluate(&statements, "s3:DeleteObject", "arn:aws:s3:::b/k"),
            Decision::ExplicitDeny
        );
        assert_eq!(evaluate(&statements, "kms:Decrypt", "k"), Decision::ImplicitDeny);
    }

    #[test]
    fn resolve_skips_conditional_statements() {
        let doc = PolicyDocument::new(vec![
            Statement::allow(["kms:Decrypt"]).on([Expr::reference("Key")]),
            Statement::deny(["s3:*"])
                .on([Expr::lit("*")])
                .condition(json!({"Bool": {"aws:SecureTransport": "false"}})),
        ]);
        let mut b = Bindings::new();
        b.bind("Key", "arn:aws:kms:us-east-1:111111111111:key/k");
        let resolved = doc.resolve(&b).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].resources, vec!["arn:aws:kms:us-east-1:111111111111:key/k"]);
    }
}
