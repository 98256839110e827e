//! CloudFormation intrinsic expressions.
//!
//! Values inside the template are either literal strings or intrinsic
//! function calls. [`Expr`] keeps them typed so the checks can see which
//! logical names a value depends on, and so a dry run can resolve them to
//! concrete strings through [`Bindings`].

use crate::error::{Result, StackError};
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const PSEUDO_REGION: &str = "AWS::Region";
pub const PSEUDO_ACCOUNT_ID: &str = "AWS::AccountId";
pub const PSEUDO_STACK_NAME: &str = "AWS::StackName";
pub const PSEUDO_PARTITION: &str = "AWS::Partition";

pub fn is_pseudo(name: &str) -> bool {
    name.starts_with("AWS::")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Lit(String),
    Ref(String),
    GetAtt(String, String),
    Sub(String),
    Join(String, Vec<Expr>),
}

impl Expr {
    pub fn lit(s: impl Into<String>) -> Self {
        Expr::Lit(s.into())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Expr::Ref(name.into())
    }

    pub fn get_att(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Expr::GetAtt(resource.into(), attribute.into())
    }

    pub fn sub(template: impl Into<String>) -> Self {
        Expr::Sub(template.into())
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Expr::Lit(s) if s == "*")
    }

    pub fn to_value(&self) -> Value {
        match self {
            Expr::Lit(s) => Value::String(s.clone()),
            Expr::Ref(name) => json!({ "Ref": name }),
            Expr::GetAtt(res, attr) => json!({ "Fn::GetAtt": [res, attr] }),
            Expr::Sub(s) => json!({ "Fn::Sub": s }),
            Expr::Join(delim, parts) => {
                let parts: Vec<Value> = parts.iter().map(Expr::to_value).collect();
                json!({ "Fn::Join": [delim, parts] })
            }
        }
    }

    /// Logical names this expression depends on, pseudo parameters excluded.
    pub fn references(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_references(&mut out, false);
        out
    }

    /// Like [`Expr::references`] but keeps `AWS::*` pseudo parameters.
    pub fn all_references(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_references(&mut out, true);
        out
    }

    fn collect_references(&self, out: &mut Vec<String>, keep_pseudo: bool) {
        match self {
            Expr::Lit(_) => {}
            Expr::Ref(name) => push_reference(out, name, keep_pseudo),
            Expr::GetAtt(res, _) => push_reference(out, res, keep_pseudo),
            Expr::Sub(s) => {
                for placeholder in sub_placeholders(s) {
                    let name = placeholder.split('.').next().unwrap_or(placeholder);
                    push_reference(out, name, keep_pseudo);
                }
            }
            Expr::Join(_, parts) => {
                for part in parts {
                    part.collect_references(out, keep_pseudo);
                }
            }
        }
    }

    pub fn resolve(&self, bindings: &Bindings) -> Result<String> {
        match self {
            Expr::Lit(s) => Ok(s.clone()),
            Expr::Ref(name) => bindings.value(name),
            Expr::GetAtt(res, attr) => bindings.attribute(res, attr),
            Expr::Sub(s) => resolve_sub(s, bindings),
            Expr::Join(delim, parts) => {
                let parts = parts
                    .iter()
                    .map(|p| p.resolve(bindings))
                    .collect::<Result<Vec<_>>>()?;
                Ok(parts.join(delim))
            }
        }
    }
}

fn push_reference(out: &mut Vec<String>, name: &str, keep_pseudo: bool) {
    if (keep_pseudo || !is_pseudo(name)) && !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Lit(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Fn::Sub placeholders
// ---------------------------------------------------------------------------

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").unwrap())
}

/// Placeholder bodies in a `Fn::Sub` string; `${!Literal}` escapes are skipped.
pub fn sub_placeholders(s: &str) -> Vec<&str> {
    placeholder_re()
        .captures_iter(s)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|body| !body.starts_with('!'))
        .collect()
}

fn resolve_sub(s: &str, bindings: &Bindings) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in placeholder_re().captures_iter(s) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&s[last..whole.start()]);
        let body = body.as_str();
        if let Some(literal) = body.strip_prefix('!') {
            out.push_str("${");
            out.push_str(literal);
            out.push('}');
        } else if let Some((res, attr)) = body.split_once('.') {
            out.push_str(&bindings.attribute(res, attr)?);
        } else {
            out.push_str(&bindings.value(body)?);
        }
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Concrete values for `Ref` targets and `Fn::GetAtt` attributes.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: BTreeMap<String, String>,
    attributes: BTreeMap<(String, String), String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pseudo(region: &str, account_id: &str, stack_name: &str) -> Self {
        let mut b = Self::new();
        b.bind(PSEUDO_REGION, region);
        b.bind(PSEUDO_ACCOUNT_ID, account_id);
        b.bind(PSEUDO_STACK_NAME, stack_name);
        b.bind(PSEUDO_PARTITION, "aws");
        b
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn bind_attr(
        &mut self,
        resource: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.attributes
            .insert((resource.into(), attribute.into()), value.into());
    }

    pub fn value(&self, name: &str) -> Result<String> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| StackError::UnresolvedReference(name.to_string()))
    }

    pub fn attribute(&self, resource: &str, attribute: &str) -> Result<String> {
        self.attributes
            .get(&(resource.to_string(), attribute.to_string()))
            .cloned()
            .ok_or_else(|| StackError::UnresolvedReference(format!("{resource}.{attribute}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_in_cloudformation_form() {
        assert_eq!(Expr::lit("x").to_value(), json!("x"));
        assert_eq!(Expr::reference("Bucket").to_value(), json!({"Ref": "Bucket"}));
        assert_eq!(
            Expr::get_att("Key", "Arn").to_value(),
            json!({"Fn::GetAtt": ["Key", "Arn"]})
        );
        let join = Expr::Join(",".into(), vec![Expr::lit("a"), Expr::reference("B")]);
        assert_eq!(
            serde_json::to_value(&join).unwrap(),
            json!({"Fn::Join": [",", ["a", {"Ref": "B"}]]})
        );
    }

    #[test]
    fn sub_references_skip_pseudo_and_escapes() {
        let e = Expr::sub("arn:${AWS::Partition}:s3:::${ArtifactBucket}/${!literal}/${Key.Arn}");
        assert_eq!(e.references(), vec!["ArtifactBucket", "Key"]);
        assert_eq!(
            e.all_references(),
            vec!["AWS::Partition", "ArtifactBucket", "Key"]
        );
    }

    #[test]
    fn resolve_sub_with_bindings() {
        let mut b = Bindings::with_pseudo("eu-west-1", "111111111111", "stack");
        b.bind("TargetAccountId", "123456789012");
        b.bind_attr("Role", "Arn", "arn:aws:iam::111111111111:role/r");
        let e = Expr::sub("arn:${AWS::Partition}:iam::${TargetAccountId}:role/x");
        assert_eq!(e.resolve(&b).unwrap(), "arn:aws:iam::123456789012:role/x");
        assert_eq!(
            Expr::sub("${Role.Arn}|${!Keep}").resolve(&b).unwrap(),
            "arn:aws:iam::111111111111:role/r|${Keep}"
        );
    }

    #[test]
    fn resolve_unknown_reference_fails() {
        let b = Bindings::new();
        assert!(matches!(
            Expr::reference("Missing").resolve(&b),
            Err(StackError::UnresolvedReference(name)) if name == "Missing"
        ));
    }
}
