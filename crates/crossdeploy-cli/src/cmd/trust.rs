use crate::output::print_json;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let blueprint = super::load_blueprint(root)?;
    let trust = blueprint.far_side_trust(&blueprint.bindings())?;
    if json {
        return print_json(&trust);
    }

    println!("Not provisioned by this stack. Target account {} must carry:", trust.target_account);
    println!("\nRole {} ({})", trust.cross_account_role, trust.cross_account_role_arn);
    println!("{}", serde_json::to_string_pretty(&trust.cross_account_trust)?);
    println!("\nRole {}", trust.execution_role);
    println!("{}", serde_json::to_string_pretty(&trust.execution_trust)?);
    Ok(())
}
