use crate::output::print_json;
use anyhow::Context;
use clap::Args;
use crossdeploy_core::{checks::Finding, config::StackConfig, paths};
use std::path::Path;

#[derive(Args)]
pub struct InitArgs {
    /// 12-digit account the pipeline deploys into
    #[arg(long)]
    pub target_account: String,

    /// Stack name (default: project directory name)
    #[arg(long)]
    pub stack: Option<String>,

    /// Repository to watch (default: stack name)
    #[arg(long)]
    pub repository: Option<String>,

    /// main, master or develop
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// dev, staging or prod
    #[arg(long, default_value = "dev")]
    pub environment: String,

    /// Account the pipeline runs in; only used to name resources in dry runs
    #[arg(long)]
    pub pipeline_account: Option<String>,

    #[arg(long, default_value = "us-east-1")]
    pub region: String,
}

pub fn run(root: &Path, args: InitArgs, json: bool) -> anyhow::Result<()> {
    let config_path = paths::config_path(root);
    if config_path.exists() {
        if json {
            print_json(&serde_json::json!({ "created": false, "path": paths::CONFIG_FILE }))?;
        } else {
            println!("  exists:  {}", paths::CONFIG_FILE);
        }
        return Ok(());
    }

    let stack_name = args.stack.unwrap_or_else(|| {
        let dir = root.file_name().map(|n| n.to_string_lossy());
        default_stack_name(dir.as_deref())
    });
    let repository = args.repository.unwrap_or_else(|| stack_name.clone());

    let mut config = StackConfig::new(&stack_name, repository, args.target_account);
    config.source.branch = args.branch;
    config.environment = args.environment;
    config.stack.region = args.region;
    config.stack.account_id = args.pipeline_account;

    let errors: Vec<Finding> = config.validate().into_iter().filter(Finding::is_error).collect();
    if let Some(first) = errors.first() {
        anyhow::bail!(
            "refusing to write an invalid config ({} error(s)); first: {}",
            errors.len(),
            first.message
        );
    }

    config.save(root).context("failed to write stack.yaml")?;
    tracing::debug!(stack = %stack_name, "config written");

    if json {
        print_json(&serde_json::json!({ "created": true, "path": paths::CONFIG_FILE }))?;
    } else {
        println!("Initializing crossdeploy in: {}", root.display());
        println!("  created: {}", paths::CONFIG_FILE);
        println!("\nNext: crossdeploy validate");
    }
    Ok(())
}

/// Turns a directory name into a valid stack name: letters, digits and '-',
/// starting with a letter.
fn default_stack_name(dir: Option<&str>) -> String {
    let mut name = String::new();
    for c in dir.unwrap_or_default().chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '-' };
        if name.is_empty() && !c.is_ascii_alphabetic() {
            continue;
        }
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }
    name.truncate(128);
    let name = name.trim_end_matches('-');
    if name.is_empty() {
        "pipeline".to_string()
    } else {
        name.to_string()
    }
}
