pub mod arn;
pub mod init;
pub mod outputs;
pub mod plan;
pub mod render;
pub mod simulate;
pub mod trigger;
pub mod trust;
pub mod validate;

use anyhow::Context;
use crossdeploy_core::{
    blueprint::Blueprint,
    config::{StackConfig, StackParameters},
};
use std::path::Path;

pub fn load_config(root: &Path) -> anyhow::Result<StackConfig> {
    StackConfig::load(root).context("failed to load stack config")
}

/// Load the config and build the typed blueprint it describes.
pub fn load_blueprint(root: &Path) -> anyhow::Result<Blueprint> {
    let config = load_config(root)?;
    let params = StackParameters::from_config(&config).context("invalid stack config")?;
    Blueprint::from_parameters(params).context("failed to build stack")
}
