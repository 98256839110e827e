use crate::output::{print_json, print_table};
use crossdeploy_core::{
    arn,
    router::EventRouter,
    trigger::{CommitEvent, ReferenceEvent},
};
use std::path::Path;

pub fn run(
    root: &Path,
    branch: &str,
    repository: Option<&str>,
    event: ReferenceEvent,
    commit: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let blueprint = super::load_blueprint(root)?;
    let params = &blueprint.params;
    let repository = repository.unwrap_or(&params.repository);
    let repository_arn = arn::repository_arn(&params.region, &blueprint.pipeline_account(), repository);

    let event = CommitEvent::branch(repository_arn, event, branch, commit);
    let invocations = EventRouter::from_blueprint(&blueprint).route(&event)?;

    if json {
        return print_json(&serde_json::json!({
            "event": event,
            "invocations": invocations,
        }));
    }
    if invocations.is_empty() {
        println!("No rule matched {} on {repository}/{branch}.", event.event);
        return Ok(());
    }
    let rows: Vec<Vec<String>> = invocations
        .iter()
        .map(|i| vec![i.rule_id.clone(), i.pipeline_arn.clone(), i.role_arn.clone()])
        .collect();
    print_table(&["RULE", "PIPELINE", "ROLE"], &rows);
    Ok(())
}
