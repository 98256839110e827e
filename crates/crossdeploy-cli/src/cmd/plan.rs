use crate::output::{print_json, print_table};
use anyhow::Context;
use crossdeploy_core::{
    io, paths,
    plan::{self, Change},
    template::Template,
};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let next = super::load_blueprint(root)?.template();
    let record = paths::rendered_template_path(root);
    let previous = match io::read_optional(&record)? {
        Some(data) => Template::from_json(&data)
            .with_context(|| format!("failed to parse {}", record.display()))?,
        None => Template::new(next.description.clone()),
    };

    let changes = plan::diff(&previous, &next);
    if json {
        return print_json(&changes);
    }
    if changes.is_empty() {
        println!("No changes.");
        return Ok(());
    }

    let row = |action: &str, c: &Change| {
        vec![
            action.to_string(),
            c.section.to_string(),
            c.logical_id.clone(),
            c.kind.clone().unwrap_or_default(),
        ]
    };
    let mut rows = Vec::with_capacity(changes.len());
    rows.extend(changes.added.iter().map(|c| row("add", c)));
    rows.extend(changes.modified.iter().map(|c| row("modify", c)));
    rows.extend(changes.removed.iter().map(|c| row("remove", c)));
    print_table(&["ACTION", "SECTION", "LOGICAL ID", "TYPE"], &rows);
    Ok(())
}
