use crate::expr::Expr;
use crate::policy::{PolicyDocument, Principal, Statement};
use serde_json::{json, Value};

pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const MAX_RETENTION_DAYS: u32 = 3650;

/// The S3 bucket and KMS key that carry artifacts between stages.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactStore {
    pub bucket_id: String,
    pub key_id: String,
    pub alias_id: String,
    pub alias_name: Expr,
    pub versioning: bool,
    pub noncurrent_version_retention_days: u32,
}

impl ArtifactStore {
    pub fn key_arn(&self) -> Expr {
        Expr::get_att(&self.key_id, "Arn")
    }

    pub fn bucket_arn(&self) -> Expr {
        Expr::get_att(&self.bucket_id, "Arn")
    }

    pub fn objects_arn(&self) -> Expr {
        Expr::sub(format!("${{{}.Arn}}/*", self.bucket_id))
    }

    pub fn bucket_ref(&self) -> Expr {
        Expr::reference(&self.bucket_id)
    }

    /// Key administration stays with the owning account; roles get usage
    /// through their own IAM policies.
    pub fn key_policy(&self) -> PolicyDocument {
        PolicyDocument::new(vec![Statement::allow(["kms:*"])
            .sid("AccountAdministration")
            .principal(Principal::Aws(vec![Expr::sub(
                "arn:${AWS::Partition}:iam::${AWS::AccountId}:root",
            )]))
            .on([Expr::lit("*")])])
    }

    pub fn key_properties(&self) -> Value {
        json!({
            "Description": "Encrypts pipeline artifacts",
            "EnableKeyRotation": true,
            "KeyPolicy": self.key_policy(),
        })
    }

    pub fn alias_properties(&self) -> Value {
        json!({
            "AliasName": self.alias_name,
            "TargetKeyId": Expr::reference(&self.key_id),
        })
    }

    pub fn bucket_properties(&self) -> Value {
        json!({
            "VersioningConfiguration": {
                "Status": if self.versioning { "Enabled" } else { "Suspended" },
            },
            "BucketEncryption": {
                "ServerSideEncryptionConfiguration": [{
                    "ServerSideEncryptionByDefault": {
                        "SSEAlgorithm": "aws:kms",
                        "KMSMasterKeyID": self.key_arn(),
                    },
                }],
            },
            "LifecycleConfiguration": {
                "Rules": [{
                    "Id": "ExpireNoncurrentArtifacts",
                    "Status": "Enabled",
                    "NoncurrentVersionExpiration": {
                        "NoncurrentDays": self.noncurrent_version_retention_days,
                    },
                }],
            },
            "PublicAccessBlockConfiguration": {
                "BlockPublicAcls": true,
                "BlockPublicPolicy": true,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": true,
            },
        })
    }

    pub fn bucket_policy(&self) -> PolicyDocument {
        PolicyDocument::new(vec![
            Statement::deny(["s3:PutObject"])
                .sid("DenyUnencryptedUploads")
                .principal(Principal::Any)
                .on([self.objects_arn()])
                .condition(json!({
                    "StringNotEquals": { "s3:x-amz-server-side-encryption": "aws:kms" }
                })),
            Statement::deny(["s3:*"])
                .sid("DenyInsecureTransport")
                .principal(Principal::Any)
                .on([self.bucket_arn(), self.objects_arn()])
                .condition(json!({ "Bool": { "aws:SecureTransport": "false" } })),
        ])
    }

    pub fn bucket_policy_properties(&self) -> Value {
        json!({
            "Bucket": self.bucket_ref(),
            "PolicyDocument": self.bucket_policy(),
        })
    }

    /// `ArtifactStore` block of the pipeline resource.
    pub fn pipeline_store_value(&self) -> Value {
        json!({
            "Type": "S3",
            "Location": self.bucket_ref(),
            "EncryptionKey": { "Id": self.key_arn(), "Type": "KMS" },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ArtifactStore {
        ArtifactStore {
            bucket_id: "ArtifactBucket".into(),
            key_id: "ArtifactKey".into(),
            alias_id: "ArtifactKeyAlias".into(),
            alias_name: Expr::sub("alias/${AWS::StackName}-artifacts"),
            versioning: true,
            noncurrent_version_retention_days: 30,
        }
    }

    #[test]
    fn bucket_is_versioned_encrypted_and_expires_noncurrent() {
        let props = store().bucket_properties();
        assert_eq!(props["VersioningConfiguration"]["Status"], "Enabled");
        assert_eq!(
            props["BucketEncryption"]["ServerSideEncryptionConfiguration"][0]
                ["ServerSideEncryptionByDefault"]["KMSMasterKeyID"],
            json!({"Fn::GetAtt": ["ArtifactKey", "Arn"]})
        );
        assert_eq!(
            props["LifecycleConfiguration"]["Rules"][0]["NoncurrentVersionExpiration"]
                ["NoncurrentDays"],
            30
        );
    }

    #[test]
    fn pipeline_store_uses_same_key_as_bucket() {
        let s = store();
        assert_eq!(
            s.pipeline_store_value()["EncryptionKey"]["Id"],
            s.bucket_properties()["BucketEncryption"]["ServerSideEncryptionConfiguration"][0]
                ["ServerSideEncryptionByDefault"]["KMSMasterKeyID"]
        );
    }

    #[test]
    fn bucket_policy_denies_insecure_transport() {
        let doc = serde_json::to_value(store().bucket_policy()).unwrap();
        let insecure = &doc["Statement"][1];
        assert_eq!(insecure["Effect"], "Deny");
        assert_eq!(insecure["Principal"], "*");
        assert_eq!(insecure["Condition"]["Bool"]["aws:SecureTransport"], "false");
    }

    #[test]
    fn objects_arn_is_bucket_prefix() {
        assert_eq!(store().objects_arn(), Expr::sub("${ArtifactBucket.Arn}/*"));
    }
}
