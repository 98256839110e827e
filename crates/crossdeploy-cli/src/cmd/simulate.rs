use crate::output::{print_json, print_table};
use anyhow::Context;
use crossdeploy_core::{
    orchestrator::{ExecutionState, ExecutionTrigger, Orchestrator},
    runner::LocalRunner,
};
use std::path::Path;

/// One execution of the pipeline against the working tree at `root`, with
/// `build_command` standing in for the buildspec.
pub fn run(root: &Path, build_command: &str, commit: Option<String>, json: bool) -> anyhow::Result<()> {
    let blueprint = super::load_blueprint(root)?;
    let branch = blueprint.params.branch.to_string();
    let mut orchestrator = Orchestrator::new(blueprint).context("failed to set up pipeline")?;
    let mut runner = LocalRunner::new(root, build_command);

    orchestrator.start(ExecutionTrigger {
        reason: "simulate".to_string(),
        branch,
        commit_id: commit,
    });
    let execution = orchestrator.run_to_completion(&mut runner)?;

    if json {
        print_json(&execution)?;
    } else {
        println!("Execution {} {}", execution.id, execution.state);
        let rows: Vec<Vec<String>> = execution
            .stages
            .iter()
            .map(|s| vec![s.name.clone(), s.status.to_string()])
            .collect();
        print_table(&["STAGE", "STATUS"], &rows);
        for stage in &execution.stages {
            for line in &stage.log {
                println!("{}: {line}", stage.name);
            }
        }
        for (name, artifact) in &execution.artifacts {
            println!("{name}: {} @ {}", artifact.key, artifact.version_id);
        }
    }

    if execution.state != ExecutionState::Succeeded {
        anyhow::bail!(
            "execution {}: {}",
            execution.state,
            execution.failure.as_deref().unwrap_or("no reason recorded")
        );
    }
    Ok(())
}
