use crate::config::BuildSection;
use crate::expr::Expr;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const ENV_TARGET_ACCOUNT_ID: &str = "TARGET_ACCOUNT_ID";
pub const ENV_CROSS_ACCOUNT_ROLE: &str = "CROSS_ACCOUNT_ROLE";
pub const ENV_EXECUTION_ROLE: &str = "EXECUTION_ROLE";
pub const ENV_ENVIRONMENT: &str = "ENVIRONMENT";

/// The container build that performs the deployment.
///
/// The project holds no credentials for the target account. It receives the
/// account id and role names as plain variables and assumes the cross-account
/// role at run time through its service role.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildProject {
    pub logical_id: String,
    pub name: Expr,
    pub service_role: Expr,
    pub encryption_key: Expr,
    pub log_group_name: Expr,
    pub image: String,
    pub compute_type: String,
    pub buildspec: String,
    pub environment: BTreeMap<String, Expr>,
}

impl BuildProject {
    pub fn new(
        logical_id: impl Into<String>,
        name: Expr,
        service_role: Expr,
        encryption_key: Expr,
        log_group_name: Expr,
        settings: &BuildSection,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            name,
            service_role,
            encryption_key,
            log_group_name,
            image: settings.image.clone(),
            compute_type: settings.compute_type.clone(),
            buildspec: settings.buildspec.clone(),
            environment: BTreeMap::new(),
        }
    }

    pub fn env(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.environment.insert(name.into(), value);
        self
    }

    pub fn arn(&self) -> Expr {
        Expr::get_att(&self.logical_id, "Arn")
    }

    pub fn properties(&self) -> Value {
        let variables: Vec<Value> = self
            .environment
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Type": "PLAINTEXT", "Value": value }))
            .collect();
        json!({
            "Name": self.name,
            "ServiceRole": self.service_role,
            "EncryptionKey": self.encryption_key,
            "Source": { "Type": "CODEPIPELINE", "BuildSpec": self.buildspec },
            "Artifacts": { "Type": "CODEPIPELINE" },
            "Environment": {
                "Type": "LINUX_CONTAINER",
                "ComputeType": self.compute_type,
                "Image": self.image,
                "PrivilegedMode": false,
                "EnvironmentVariables": variables,
            },
            "LogsConfig": {
                "CloudWatchLogs": { "Status": "ENABLED", "GroupName": self.log_group_name },
            },
        })
    }
}
