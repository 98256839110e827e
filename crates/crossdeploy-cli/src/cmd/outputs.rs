use crate::output::{print_json, print_table};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let blueprint = super::load_blueprint(root)?;
    let outputs = blueprint.resolved_outputs(&blueprint.bindings())?;
    if json {
        return print_json(&outputs);
    }
    let rows: Vec<Vec<String>> = outputs.into_iter().map(|(k, v)| vec![k, v]).collect();
    print_table(&["OUTPUT", "VALUE"], &rows);
    Ok(())
}
