use crate::template::Template;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Parameter,
    Resource,
    Output,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Section::Parameter => "parameter",
            Section::Resource => "resource",
            Section::Output => "output",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Change {
    pub section: Section,
    pub logical_id: String,
    /// Resource type, when the change is to a resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// What redeploying a template over another would touch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub added: Vec<Change>,
    pub modified: Vec<Change>,
    pub removed: Vec<Change>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

pub fn diff(old: &Template, new: &Template) -> ChangeSet {
    let mut cs = ChangeSet::default();
    diff_section(
        &mut cs,
        Section::Parameter,
        &old.parameters,
        &new.parameters,
        |_| None,
    );
    diff_section(
        &mut cs,
        Section::Resource,
        &old.resources,
        &new.resources,
        |r| Some(r.kind.clone()),
    );
    diff_section(&mut cs, Section::Output, &old.outputs, &new.outputs, |_| None);
    // Template-level description edits are not tracked.
    cs
}

fn diff_section<T: PartialEq>(
    cs: &mut ChangeSet,
    section: Section,
    old: &BTreeMap<String, T>,
    new: &BTreeMap<String, T>,
    kind: impl Fn(&T) -> Option<String>,
) {
    let change = |id: &str, item: &T| Change {
        section,
        logical_id: id.to_string(),
        kind: kind(item),
    };
    for (id, item) in new {
        match old.get(id) {
            None => cs.added.push(change(id, item)),
            Some(prev) if prev != item => cs.modified.push(change(id, item)),
            Some(_) => {}
        }
    }
    for (id, item) in old {
        if !new.contains_key(id) {
            cs.removed.push(change(id, item));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::Blueprint;
    use crate::config::{StackConfig, StackParameters};

    fn template(cfg: &StackConfig) -> Template {
        Blueprint::from_parameters(StackParameters::from_config(cfg).unwrap())
            .unwrap()
            .template()
    }

    fn cfg() -> StackConfig {
        StackConfig::new("svc-pipeline", "svc", "123456789012")
    }

    #[test]
    fn identical_config_gives_empty_change_set() {
        let a = template(&cfg());
        let b = template(&cfg());
        assert!(diff(&a, &b).is_empty());
    }

    #[test]
    fn reread_template_gives_empty_change_set() {
        let a = template(&cfg());
        let reread = Template::from_json(&a.to_json().unwrap()).unwrap();
        assert!(diff(&reread, &template(&cfg())).is_empty());
    }

    #[test]
    fn retention_change_modifies_bucket_only() {
        let a = template(&cfg());
        let mut c = cfg();
        c.artifacts.noncurrent_version_retention_days = 90;
        let cs = diff(&a, &template(&c));
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.modified[0].logical_id, "ArtifactBucket");
        assert_eq!(cs.modified[0].kind.as_deref(), Some("AWS::S3::Bucket"));
    }

    #[test]
    fn added_and_removed_resources() {
        let a = template(&cfg());
        let mut b = a.clone();
        b.resources.remove("PipelineTriggerRule");
        b.outputs.remove("PipelineUrl");
        let cs = diff(&a, &b);
        assert_eq!(cs.removed.len(), 2);
        assert!(cs.added.is_empty());
        let back = diff(&b, &a);
        assert_eq!(back.added.len(), 2);
        assert_eq!(back.added[0].section, Section::Resource);
    }
}
