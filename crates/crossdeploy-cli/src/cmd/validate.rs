use crate::output::{print_findings, print_json};
use crossdeploy_core::checks::{self, Severity};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let findings = checks::validate_config(&config);
    let errors = findings.iter().filter(|f| f.level == Severity::Error).count();

    if json {
        print_json(&serde_json::json!({
            "ok": errors == 0,
            "findings": findings,
        }))?;
    } else if findings.is_empty() {
        println!("Stack is valid. No findings.");
    } else {
        print_findings(&findings);
    }

    if errors > 0 {
        anyhow::bail!("validation found {errors} error(s)");
    }
    Ok(())
}
