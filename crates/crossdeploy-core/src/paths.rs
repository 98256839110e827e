use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CROSSDEPLOY_DIR: &str = ".crossdeploy";
pub const RENDERED_DIR: &str = ".crossdeploy/rendered";

pub const CONFIG_FILE: &str = ".crossdeploy/stack.yaml";
pub const RENDERED_TEMPLATE: &str = ".crossdeploy/rendered/template.json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn crossdeploy_dir(root: &Path) -> PathBuf {
    root.join(CROSSDEPLOY_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn rendered_dir(root: &Path) -> PathBuf {
    root.join(RENDERED_DIR)
}

pub fn rendered_template_path(root: &Path) -> PathBuf {
    root.join(RENDERED_TEMPLATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.crossdeploy/stack.yaml")
        );
        assert_eq!(
            rendered_template_path(root),
            PathBuf::from("/tmp/proj/.crossdeploy/rendered/template.json")
        );
        assert_eq!(crossdeploy_dir(root), PathBuf::from("/tmp/proj/.crossdeploy"));
    }
}
