use crate::error::{Result, StackError};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// A 12-digit AWS account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(String);

impl AccountId {
    pub const PATTERN: &'static str = "^[0-9]{12}$";

    /// Stand-in pipeline account for dry runs when none is configured.
    pub fn placeholder() -> Self {
        Self("000000000000".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccountId {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() == 12 && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(StackError::InvalidAccountId(s.to_string()))
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Main,
    Master,
    Develop,
}

impl Branch {
    pub fn all() -> &'static [Branch] {
        &[Branch::Main, Branch::Master, Branch::Develop]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Branch::Main => "main",
            Branch::Master => "master",
            Branch::Develop => "develop",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Branch {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "main" => Ok(Branch::Main),
            "master" => Ok(Branch::Master),
            "develop" => Ok(Branch::Develop),
            _ => Err(StackError::InvalidBranch(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn all() -> &'static [Environment] {
        &[Environment::Dev, Environment::Staging, Environment::Prod]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev" => Ok(Environment::Dev),
            "staging" => Ok(Environment::Staging),
            "prod" => Ok(Environment::Prod),
            _ => Err(StackError::InvalidEnvironment(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

pub const STACK_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9\-]{0,127}$";
pub const REPOSITORY_NAME_PATTERN: &str = r"^[A-Za-z0-9._\-]{1,100}$";
pub const ROLE_NAME_PATTERN: &str = r"^[\w+=,.@\-]{1,64}$";

static STACK_RE: OnceLock<Regex> = OnceLock::new();
static REPOSITORY_RE: OnceLock<Regex> = OnceLock::new();
static ROLE_RE: OnceLock<Regex> = OnceLock::new();

fn stack_re() -> &'static Regex {
    STACK_RE.get_or_init(|| Regex::new(STACK_NAME_PATTERN).unwrap())
}

fn repository_re() -> &'static Regex {
    REPOSITORY_RE.get_or_init(|| Regex::new(REPOSITORY_NAME_PATTERN).unwrap())
}

fn role_re() -> &'static Regex {
    ROLE_RE.get_or_init(|| Regex::new(ROLE_NAME_PATTERN).unwrap())
}

pub fn validate_stack_name(name: &str) -> Result<()> {
    if !stack_re().is_match(name) {
        return Err(StackError::InvalidName {
            kind: "stack name",
            value: name.to_string(),
            reason: "must start with a letter and contain only letters, digits or '-' (max 128)"
                .to_string(),
        });
    }
    Ok(())
}

/// CodeCommit repository names: 1-100 chars, no `.git` suffix.
pub fn validate_repository_name(name: &str) -> Result<()> {
    if !repository_re().is_match(name) {
        return Err(StackError::InvalidName {
            kind: "repository name",
            value: name.to_string(),
            reason: "must be 1-100 characters of letters, digits, '.', '_' or '-'".to_string(),
        });
    }
    if name.ends_with(".git") {
        return Err(StackError::InvalidName {
            kind: "repository name",
            value: name.to_string(),
            reason: "must not end with '.git'".to_string(),
        });
    }
    Ok(())
}

pub fn validate_role_name(name: &str) -> Result<()> {
    if !role_re().is_match(name) {
        return Err(StackError::InvalidName {
            kind: "role name",
            value: name.to_string(),
            reason: "must be 1-64 characters of letters, digits or '+=,.@_-'".to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
