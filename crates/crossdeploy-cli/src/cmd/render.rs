use crate::output::{print_findings, print_json};
use anyhow::Context;
use crossdeploy_core::{checks, io, paths, template::Format};
use std::path::Path;

/// Render the template. The JSON rendering is always recorded under
/// `.crossdeploy/rendered/` so `plan` can diff against it.
pub fn run(root: &Path, format: Format, out: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let findings = checks::validate_config(&config);
    if checks::has_errors(&findings) {
        let errors: Vec<_> = findings.into_iter().filter(|f| f.is_error()).collect();
        if !json {
            print_findings(&errors);
        }
        anyhow::bail!("refusing to render: {} check(s) failed", errors.len());
    }

    let template = super::load_blueprint(root)?.template();
    let rendered = template.render(format).context("failed to render template")?;

    let record = paths::rendered_template_path(root);
    io::atomic_write(&record, template.to_json()?.as_bytes())
        .with_context(|| format!("failed to write {}", record.display()))?;

    match out {
        Some(path) => {
            io::atomic_write(path, rendered.as_bytes())
                .with_context(|| format!("failed to write {}", path.display()))?;
            if json {
                print_json(&serde_json::json!({
                    "path": path,
                    "format": format.to_string(),
                    "resources": template.resources.len(),
                }))?;
            } else {
                println!("wrote {} ({format}, {} resources)", path.display(), template.resources.len());
            }
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
