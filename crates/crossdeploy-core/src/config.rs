use crate::artifact_store::{DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS};
use crate::checks::Finding;
use crate::error::{Result, StackError};
use crate::paths;
use crate::types::{self, AccountId, Branch, Environment};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const KNOWN_COMPUTE_TYPES: &[&str] = &[
    "BUILD_GENERAL1_SMALL",
    "BUILD_GENERAL1_MEDIUM",
    "BUILD_GENERAL1_LARGE",
    "BUILD_GENERAL1_2XLARGE",
];

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Region used for dry runs and printed identifiers.
    #[serde(default = "default_region")]
    pub region: String,
    /// Account hosting the pipeline. Only needed for dry runs and `trust`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSection {
    pub account_id: String,
    pub cross_account_role: String,
    pub execution_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    Branch::Main.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSection {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_compute_type")]
    pub compute_type: String,
    #[serde(default = "default_buildspec")]
    pub buildspec: String,
}

fn default_image() -> String {
    "aws/codebuild/standard:7.0".to_string()
}

fn default_compute_type() -> String {
    "BUILD_GENERAL1_SMALL".to_string()
}

fn default_buildspec() -> String {
    "buildspec.yml".to_string()
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            image: default_image(),
            compute_type: default_compute_type(),
            buildspec: default_buildspec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsSection {
    #[serde(default = "default_retention")]
    pub noncurrent_version_retention_days: u32,
}

fn default_retention() -> u32 {
    DEFAULT_RETENTION_DAYS
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            noncurrent_version_retention_days: default_retention(),
        }
    }
}

// ---------------------------------------------------------------------------
// StackConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub stack: StackSection,
    pub target: TargetSection,
    pub source: SourceSection,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub artifacts: ArtifactsSection,
}

fn default_version() -> u32 {
    1
}

fn default_environment() -> String {
    Environment::Dev.as_str().to_string()
}

impl StackConfig {
    /// Starter config written by `crossdeploy init`.
    pub fn new(
        stack_name: impl Into<String>,
        repository: impl Into<String>,
        target_account: impl Into<String>,
    ) -> Self {
        Self {
            version: 1,
            stack: StackSection {
                name: stack_name.into(),
                description: None,
                region: default_region(),
                account_id: None,
            },
            target: TargetSection {
                account_id: target_account.into(),
                cross_account_role: "cross-account-role-serverless-deployment".to_string(),
                execution_role: "cloudformation-execution-role".to_string(),
            },
            source: SourceSection {
                repository: repository.into(),
                branch: default_branch(),
            },
            environment: default_environment(),
            build: BuildSection::default(),
            artifacts: ArtifactsSection::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(StackError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: StackConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Definition errors and warnings, all of them rather than the first.
    pub fn validate(&self) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut check = |name: &'static str, result: Result<()>| {
            if let Err(e) = result {
                findings.push(Finding::error(name, e.to_string()));
            }
        };

        check(
            "config.version",
            if self.version == 1 {
                Ok(())
            } else {
                Err(StackError::InvalidDefinition(format!(
                    "unsupported config version {} (expected 1)",
                    self.version
                )))
            },
        );
        check("config.stack_name", types::validate_stack_name(&self.stack.name));
        check(
            "config.target_account",
            self.target.account_id.parse::<AccountId>().map(|_| ()),
        );
        if let Some(acct) = &self.stack.account_id {
            check("config.pipeline_account", acct.parse::<AccountId>().map(|_| ()));
        }
        check(
            "config.cross_account_role",
            types::validate_role_name(&self.target.cross_account_role),
        );
        check(
            "config.execution_role",
            types::validate_role_name(&self.target.execution_role),
        );
        check(
            "config.repository",
            types::validate_repository_name(&self.source.repository),
        );
        check("config.branch", self.source.branch.parse::<Branch>().map(|_| ()));
        check(
            "config.environment",
            self.environment.parse::<Environment>().map(|_| ()),
        );

        let days = self.artifacts.noncurrent_version_retention_days;
        if days == 0 || days > MAX_RETENTION_DAYS {
            findings.push(Finding::error(
                "config.retention",
                format!("noncurrent_version_retention_days must be in 1..={MAX_RETENTION_DAYS}, got {days}"),
            ));
        }
        if self.build.image.trim().is_empty() {
            findings.push(Finding::error("config.build_image", "build.image must not be empty"));
        }
        if self.build.buildspec.trim().is_empty() {
            findings.push(Finding::error(
                "config.buildspec",
                "build.buildspec must not be empty",
            ));
        }
        if !KNOWN_COMPUTE_TYPES.contains(&self.build.compute_type.as_str()) {
            findings.push(Finding::warning(
                "config.compute_type",
                format!("unknown build.compute_type '{}'", self.build.compute_type),
            ));
        }
        if self.target.cross_account_role == self.target.execution_role {
            findings.push(Finding::warning(
                "config.role_separation",
                "cross_account_role and execution_role are the same role",
            ));
        }
        if self.stack.account_id.as_deref() == Some(self.target.account_id.as_str()) {
            findings.push(Finding::warning(
                "config.same_account",
                "target account equals the pipeline account; nothing is deployed cross-account",
            ));
        }

        findings
    }
}

// ---------------------------------------------------------------------------
// StackParameters
// ---------------------------------------------------------------------------

/// Typed, validated view of a [`StackConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct StackParameters {
    pub stack_name: String,
    pub description: Option<String>,
    pub region: String,
    pub pipeline_account: Option<AccountId>,
    pub target_account: AccountId,
    pub cross_account_role: String,
    pub execution_role: String,
    pub repository: String,
    pub branch: Branch,
    pub environment: Environment,
    pub build: BuildSection,
    pub retention_days: u32,
}

impl StackParameters {
    /// Fails with the first definition error; see [`StackConfig::validate`]
    /// for the full list.
    pub fn from_config(cfg: &StackConfig) -> Result<Self> {
        if let Some(finding) = cfg.validate().into_iter().find(Finding::is_error) {
            return Err(StackError::InvalidDefinition(finding.message));
        }
        Ok(Self {
            stack_name: cfg.stack.name.clone(),
            description: cfg.stack.description.clone(),
            region: cfg.stack.region.clone(),
            pipeline_account: cfg
                .stack
                .account_id
                .as_deref()
                .map(str::parse)
                .transpose()?,
            target_account: cfg.target.account_id.parse()?,
            cross_account_role: cfg.target.cross_account_role.clone(),
            execution_role: cfg.target.execution_role.clone(),
            repository: cfg.source.repository.clone(),
            branch: cfg.source.branch.parse()?,
            environment: cfg.environment.parse()?,
            build: cfg.build.clone(),
            retention_days: cfg.artifacts.noncurrent_version_retention_days,
        })
    }

    pub fn cross_account_role_arn(&self) -> String {
        crate::arn::role_arn(&self.target_account, &self.cross_account_role)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::Severity;
    use tempfile::TempDir;

    fn cfg() -> StackConfig {
        StackConfig::new("svc-pipeline", "svc", "123456789012")
    }

    #[test]
    fn default_config_is_valid() {
        let findings = cfg().validate();
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let c = cfg();
        c.save(dir.path()).unwrap();
        let loaded = StackConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.stack.name, "svc-pipeline");
        assert_eq!(loaded.target.account_id, "123456789012");
        assert_eq!(loaded.build, BuildSection::default());
    }

    #[test]
    fn load_without_config_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            StackConfig::load(dir.path()),
            Err(StackError::NotInitialized)
        ));
    }

    #[test]
    fn minimal_yaml_uses_defaults() {
        let yaml = r#"
stack:
  name: svc
target:
  account_id: "123456789012"
  cross_account_role: deployer
  execution_role: cfn-exec
source:
  repository: svc
"#;
        let c: StackConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.version, 1);
        assert_eq!(c.source.branch, "main");
        assert_eq!(c.environment, "dev");
        assert_eq!(c.stack.region, "us-east-1");
        assert_eq!(c.artifacts.noncurrent_version_retention_days, 30);
        assert_eq!(c.build.compute_type, "BUILD_GENERAL1_SMALL");
    }

    #[test]
    fn definition_errors_are_all_reported() {
        let mut c = cfg();
        c.target.account_id = "12345".into();
        c.source.branch = "feature/x".into();
        c.environment = "qa".into();
        c.artifacts.noncurrent_version_retention_days = 0;
        let findings = c.validate();
        let checks: Vec<&str> = findings.iter().map(|f| f.check.as_str()).collect();
        for expected in [
            "config.target_account",
            "config.branch",
            "config.environment",
            "config.retention",
        ] {
            assert!(checks.contains(&expected), "missing {expected}: {checks:?}");
        }
        assert!(findings.iter().all(|f| f.level == Severity::Error));
    }

    #[test]
    fn parameters_reject_invalid_config() {
        let mut c = cfg();
        c.target.account_id = "not-an-account".into();
        assert!(matches!(
            StackParameters::from_config(&c),
            Err(StackError::InvalidDefinition(msg)) if msg.contains("not-an-account")
        ));
    }

    #[test]
    fn parameters_build_cross_account_arn() {
        let p = StackParameters::from_config(&cfg()).unwrap();
        assert_eq!(p.branch, Branch::Main);
        assert_eq!(p.environment, Environment::Dev);
        assert_eq!(
            p.cross_account_role_arn(),
            "arn:aws:iam::123456789012:role/cross-account-role-serverless-deployment"
        );
    }

    #[test]
    fn same_account_and_role_warnings() {
        let mut c = cfg();
        c.stack.account_id = Some("123456789012".into());
        c.target.execution_role = c.target.cross_account_role.clone();
        let findings = c.validate();
        assert!(findings.iter().all(|f| f.level == Severity::Warning));
        assert!(findings.iter().any(|f| f.check == "config.same_account"));
        assert!(findings.iter().any(|f| f.check == "config.role_separation"));
    }
}
