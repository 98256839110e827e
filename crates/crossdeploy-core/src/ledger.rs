//! In-memory stand-in for the versioned artifact bucket.
//!
//! Writes never overwrite: each put appends a version and demotes the
//! previous one to noncurrent. The newest version wins. Noncurrent versions
//! are purged once they have been noncurrent for the retention window.

use crate::arn;
use crate::error::{Result, StackError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectVersion {
    pub version_id: Uuid,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub size: usize,
    pub key_arn: String,
    pub written_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noncurrent_since: Option<DateTime<Utc>>,
}

impl ObjectVersion {
    pub fn is_current(&self) -> bool {
        self.noncurrent_since.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactLedger {
    bucket: String,
    key_arn: String,
    retention: Duration,
    objects: BTreeMap<String, Vec<ObjectVersion>>,
}

impl ArtifactLedger {
    pub fn new(bucket: impl Into<String>, key_arn: impl Into<String>, retention_days: u32) -> Self {
        Self {
            bucket: bucket.into(),
            key_arn: key_arn.into(),
            retention: Duration::days(i64::from(retention_days)),
            objects: BTreeMap::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key_arn(&self) -> &str {
        &self.key_arn
    }

    pub fn object_arn(&self, key: &str) -> String {
        format!("{}/{key}", arn::bucket_arn(&self.bucket))
    }

    /// Store a new version of `key`, encrypted under `key_arn`.
    pub fn put(&mut self, key: &str, data: Vec<u8>, key_arn: &str, now: DateTime<Utc>) -> Result<Uuid> {
        if key_arn != self.key_arn {
            return Err(StackError::KeyMismatch {
                key: key.to_string(),
                expected: self.key_arn.clone(),
                actual: key_arn.to_string(),
            });
        }
        let versions = self.objects.entry(key.to_string()).or_default();
        for v in versions.iter_mut().filter(|v| v.is_current()) {
            v.noncurrent_since = Some(now);
        }
        let version_id = Uuid::new_v4();
        versions.push(ObjectVersion {
            version_id,
            size: data.len(),
            data,
            key_arn: key_arn.to_string(),
            written_at: now,
            noncurrent_since: None,
        });
        tracing::debug!(bucket = %self.bucket, key, %version_id, "artifact stored");
        Ok(version_id)
    }

    /// The current version of `key`.
    pub fn get(&self, key: &str) -> Result<&ObjectVersion> {
        self.objects
            .get(key)
            .and_then(|versions| versions.iter().rev().find(|v| v.is_current()))
            .ok_or_else(|| StackError::ArtifactNotFound(key.to_string()))
    }

    pub fn get_version(&self, key: &str, version_id: Uuid) -> Result<&ObjectVersion> {
        self.objects
            .get(key)
            .and_then(|versions| versions.iter().find(|v| v.version_id == version_id))
            .ok_or_else(|| StackError::ArtifactNotFound(format!("{key}@{version_id}")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    pub fn versions(&self, key: &str) -> &[ObjectVersion] {
        self.objects.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    /// Purge versions that have been noncurrent for at least the retention
    /// window. Returns how many were removed.
    pub fn expire_noncurrent(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.retention;
        let mut removed = 0;
        for versions in self.objects.values_mut() {
            let before = versions.len();
            versions.retain(|v| match v.noncurrent_since {
                Some(since) => now - since < retention,
                None => true,
            });
            removed += before - versions.len();
        }
        self.objects.retain(|_, versions| !versions.is_empty());
        if removed > 0 {
            tracing::debug!(bucket = %self.bucket, removed, "expired noncurrent artifact versions");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "arn:aws:kms:us-east-1:111111111111:key/k";

    fn ledger() -> ArtifactLedger {
        ArtifactLedger::new("svc-artifacts", KEY, 30)
    }

    #[test]
    fn last_writer_wins() {
        let mut l = ledger();
        let now = Utc::now();
        let first = l.put("p/SourceArtifact/a", b"one".to_vec(), KEY, now).unwrap();
        let second = l.put("p/SourceArtifact/a", b"two".to_vec(), KEY, now).unwrap();
        assert_ne!(first, second);
        assert_eq!(l.get("p/SourceArtifact/a").unwrap().data, b"two");
        assert_eq!(l.versions("p/SourceArtifact/a").len(), 2);
        assert_eq!(l.get_version("p/SourceArtifact/a", first).unwrap().data, b"one");
    }

    #[test]
    fn wrong_key_is_rejected() {
        let mut l = ledger();
        let err = l
            .put("obj", b"x".to_vec(), "arn:aws:kms:us-east-1:111111111111:key/other", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StackError::KeyMismatch { .. }));
        assert!(!l.contains("obj"));
    }

    #[test]
    fn missing_object_is_not_found() {
        assert!(matches!(ledger().get("nope"), Err(StackError::ArtifactNotFound(_))));
    }

    #[test]
    fn noncurrent_versions_expire_after_retention() {
        let mut l = ledger();
        let t0 = Utc::now();
        l.put("obj", b"v1".to_vec(), KEY, t0).unwrap();
        l.put("obj", b"v2".to_vec(), KEY, t0 + Duration::days(1)).unwrap();

        assert_eq!(l.expire_noncurrent(t0 + Duration::days(30)), 0);
        assert_eq!(l.expire_noncurrent(t0 + Duration::days(31)), 1);
        assert_eq!(l.versions("obj").len(), 1);
        assert_eq!(l.get("obj").unwrap().data, b"v2");
    }

    #[test]
    fn current_versions_never_expire() {
        let mut l = ledger();
        let t0 = Utc::now();
        l.put("obj", b"v1".to_vec(), KEY, t0).unwrap();
        assert_eq!(l.expire_noncurrent(t0 + Duration::days(3650)), 0);
        assert!(l.contains("obj"));
    }

    #[test]
    fn object_arn_is_under_bucket() {
        assert_eq!(ledger().object_arn("a/b"), "arn:aws:s3:::svc-artifacts/a/b");
    }
}
