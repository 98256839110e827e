use crate::output::print_json;
use anyhow::Context;
use crossdeploy_core::{arn, types::AccountId};
use std::path::Path;

/// With both flags set the config is not read at all.
pub fn run(root: &Path, account: Option<&str>, role: Option<&str>, json: bool) -> anyhow::Result<()> {
    let role_arn = match (account, role) {
        (Some(account), Some(role)) => {
            let account: AccountId = account.parse().context("invalid --account")?;
            arn::role_arn(&account, role)
        }
        _ => super::load_blueprint(root)?.params.cross_account_role_arn(),
    };
    if json {
        print_json(&serde_json::json!({ "cross_account_role_arn": role_arn }))
    } else {
        println!("{role_arn}");
        Ok(())
    }
}
