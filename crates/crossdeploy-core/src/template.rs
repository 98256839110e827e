//! Serializable CloudFormation template.
//!
//! All maps are `BTreeMap`s so rendering the same blueprint twice yields the
//! same bytes, and a rendered file read back compares equal to a fresh render.

use crate::error::Result;
use crate::expr::{self, Expr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub const FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "AllowedPattern", default, skip_serializing_if = "Option::is_none")]
    pub allowed_pattern: Option<String>,
    #[serde(rename = "AllowedValues", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    #[serde(rename = "ConstraintDescription", default, skip_serializing_if = "Option::is_none")]
    pub constraint_description: Option<String>,
    #[serde(rename = "Default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl Parameter {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            kind: "String".to_string(),
            description: description.into(),
            allowed_pattern: None,
            allowed_values: Vec::new(),
            constraint_description: None,
            default: None,
        }
    }

    pub fn pattern(mut self, pattern: &str, constraint: impl Into<String>) -> Self {
        self.allowed_pattern = Some(pattern.to_string());
        self.constraint_description = Some(constraint.into());
        self
    }

    pub fn values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "Properties")]
    pub properties: Value,
}

impl Resource {
    pub fn new(kind: impl Into<String>, properties: Value) -> Self {
        Self {
            kind: kind.into(),
            depends_on: Vec::new(),
            properties,
        }
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    #[serde(rename = "Name")]
    pub name: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Export", default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

impl Output {
    /// An output exported as `${AWS::StackName}-<name>`.
    pub fn exported(name: &str, description: impl Into<String>, value: &Expr) -> Self {
        Self {
            description: description.into(),
            value: value.to_value(),
            export: Some(Export {
                name: Expr::sub(format!("${{{}}}-{name}", expr::PSEUDO_STACK_NAME)).to_value(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Parameters", default)]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,
    #[serde(rename = "Outputs", default)]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: description.into(),
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let mut s = serde_json::to_string_pretty(self)?;
        s.push('\n');
        Ok(s)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn render(&self, format: Format) -> Result<String> {
        match format {
            Format::Json => self.to_json(),
            Format::Yaml => self.to_yaml(),
        }
    }

    /// Logical names that may be referenced from inside the template.
    pub fn declared_names(&self) -> BTreeSet<&str> {
        self.parameters
            .keys()
            .chain(self.resources.keys())
            .map(String::as_str)
            .collect()
    }

    /// Every `(location, referenced name)` pair in the template that does not
    /// resolve to a parameter, a resource or a pseudo parameter.
    pub fn dangling_references(&self) -> Vec<(String, String)> {
        let declared = self.declared_names();
        let mut out = Vec::new();
        for (id, resource) in &self.resources {
            for name in value_references(&resource.properties) {
                if !declared.contains(name.as_str()) {
                    out.push((format!("Resources.{id}"), name));
                }
            }
            for dep in &resource.depends_on {
                if !self.resources.contains_key(dep) {
                    out.push((format!("Resources.{id}.DependsOn"), dep.clone()));
                }
            }
        }
        for (id, output) in &self.outputs {
            let mut names = value_references(&output.value);
            if let Some(export) = &output.export {
                names.extend(value_references(&export.name));
            }
            for name in names {
                if !declared.contains(name.as_str()) {
                    out.push((format!("Outputs.{id}"), name));
                }
            }
        }
        out
    }

    /// Resources each resource depends on, through references or `DependsOn`.
    pub fn dependency_graph(&self) -> BTreeMap<&str, BTreeSet<String>> {
        self.resources
            .iter()
            .map(|(id, resource)| {
                let deps: BTreeSet<String> = value_references(&resource.properties)
                    .into_iter()
                    .chain(resource.depends_on.iter().cloned())
                    .filter(|name| self.resources.contains_key(name))
                    .collect();
                (id.as_str(), deps)
            })
            .collect()
    }

    /// The first dependency cycle found, as a path of logical ids.
    pub fn dependency_cycle(&self) -> Option<Vec<String>> {
        let graph = self.dependency_graph();
        let mut done: BTreeSet<&str> = BTreeSet::new();
        for start in graph.keys() {
            let mut path = Vec::new();
            if let Some(cycle) = find_cycle(&graph, *start, &mut path, &mut done) {
                return Some(cycle);
            }
        }
        None
    }
}

fn find_cycle<'a>(
    graph: &'a BTreeMap<&'a str, BTreeSet<String>>,
    node: &'a str,
    path: &mut Vec<&'a str>,
    done: &mut BTreeSet<&'a str>,
) -> Option<Vec<String>> {
    if let Some(pos) = path.iter().position(|n| *n == node) {
        let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
        cycle.push(node.to_string());
        return Some(cycle);
    }
    if done.contains(node) {
        return None;
    }
    path.push(node);
    if let Some(deps) = graph.get(node) {
        for dep in deps {
            if let Some(cycle) = find_cycle(graph, dep.as_str(), path, done) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    done.insert(node);
    None
}

/// Names referenced by intrinsic functions anywhere inside `value`, pseudo
/// parameters excluded.
pub fn value_references(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_value_references(value, &mut out);
    out
}

fn collect_value_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) if map.len() == 1 => {
            if let Some(Value::String(name)) = map.get("Ref") {
                push_name(out, name);
                return;
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(name)) = parts.first() {
                    push_name(out, name);
                }
                return;
            }
            if let Some(Value::String(s)) = map.get("Fn::Sub") {
                for body in expr::sub_placeholders(s) {
                    push_name(out, body.split('.').next().unwrap_or(body));
                }
                return;
            }
            for v in map.values() {
                collect_value_references(v, out);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_value_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_value_references(v, out);
            }
        }
        _ => {}
    }
}

fn push_name(out: &mut Vec<String>, name: &str) {
    if !expr::is_pseudo(name) && !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Json,
    Yaml,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
        })
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "json" => Ok(Format::Json),
            "yaml" | "yml" => Ok(Format::Yaml),
            other => Err(format!("unknown format '{other}' (expected json or yaml)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> Template {
        let mut t = Template::new("test");
        t.parameters.insert(
            "BranchName".into(),
            Parameter::string("Branch").values(["main", "develop"]).default_value("main"),
        );
        t.resources.insert(
            "Bucket".into(),
            Resource::new("AWS::S3::Bucket", json!({ "Tags": [{"Key": "b", "Value": {"Ref": "BranchName"}}] })),
        );
        t.outputs.insert(
            "BucketArn".into(),
            Output::exported("BucketArn", "bucket", &Expr::get_att("Bucket", "Arn")),
        );
        t
    }

    #[test]
    fn json_roundtrips_to_equal_template() {
        let t = template();
        let back = Template::from_json(&t.to_json().unwrap()).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn output_export_name_uses_stack_name() {
        let t = template();
        let v: Value = serde_json::from_str(&t.to_json().unwrap()).unwrap();
        assert_eq!(
            v["Outputs"]["BucketArn"]["Export"]["Name"],
            json!({"Fn::Sub": "${AWS::StackName}-BucketArn"})
        );
        assert_eq!(v["Parameters"]["BranchName"]["AllowedValues"], json!(["main", "develop"]));
        assert!(v["Parameters"]["BranchName"].get("AllowedPattern").is_none());
    }

    #[test]
    fn finds_dangling_references() {
        let mut t = template();
        assert!(t.dangling_references().is_empty());
        t.resources.insert(
            "Policy".into(),
            Resource::new(
                "AWS::S3::BucketPolicy",
                json!({ "Bucket": {"Ref": "Missing"}, "Arn": {"Fn::Sub": "${Gone.Arn}/*${AWS::Region}"} }),
            )
            .depends_on("Nowhere"),
        );
        let dangling: Vec<String> = t.dangling_references().into_iter().map(|(_, n)| n).collect();
        assert_eq!(dangling.len(), 3, "{dangling:?}");
        for name in ["Missing", "Gone", "Nowhere"] {
            assert!(dangling.iter().any(|n| n == name), "{name}");
        }
    }

    #[test]
    fn detects_dependency_cycles() {
        let mut t = template();
        assert!(t.dependency_cycle().is_none());
        t.resources.insert(
            "A".into(),
            Resource::new("AWS::IAM::Role", json!({ "Arn": {"Fn::GetAtt": ["B", "Arn"]} })),
        );
        t.resources.insert(
            "B".into(),
            Resource::new("AWS::IAM::Role", json!({})).depends_on("A"),
        );
        let cycle = t.dependency_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&"A".to_string()) && cycle.contains(&"B".to_string()));
    }

    #[test]
    fn yaml_output_contains_sections() {
        let yaml = template().to_yaml().unwrap();
        assert!(yaml.contains("AWSTemplateFormatVersion: 2010-09-09") || yaml.contains("AWSTemplateFormatVersion: '2010-09-09'"));
        assert!(yaml.contains("Resources:"));
    }

    #[test]
    fn format_parsing() {
        assert_eq!("yml".parse::<Format>().unwrap(), Format::Yaml);
        assert!("toml".parse::<Format>().is_err());
    }
}
