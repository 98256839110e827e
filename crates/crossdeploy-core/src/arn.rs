use crate::types::AccountId;

pub const PARTITION: &str = "aws";

pub fn role_arn(account: &AccountId, role_name: &str) -> String {
    format!("arn:{PARTITION}:iam::{account}:role/{role_name}")
}

pub fn repository_arn(region: &str, account: &AccountId, repository: &str) -> String {
    format!("arn:{PARTITION}:codecommit:{region}:{account}:{repository}")
}

pub fn pipeline_arn(region: &str, account: &AccountId, pipeline: &str) -> String {
    format!("arn:{PARTITION}:codepipeline:{region}:{account}:{pipeline}")
}

pub fn build_project_arn(region: &str, account: &AccountId, project: &str) -> String {
    format!("arn:{PARTITION}:codebuild:{region}:{account}:project/{project}")
}

pub fn bucket_arn(bucket: &str) -> String {
    format!("arn:{PARTITION}:s3:::{bucket}")
}

pub fn kms_key_arn(region: &str, account: &AccountId, key_id: &str) -> String {
    format!("arn:{PARTITION}:kms:{region}:{account}:key/{key_id}")
}

pub fn log_group_arn(region: &str, account: &AccountId, log_group: &str) -> String {
    format!("arn:{PARTITION}:logs:{region}:{account}:log-group:{log_group}")
}

pub fn clone_url_http(region: &str, repository: &str) -> String {
    format!("https://git-codecommit.{region}.amazonaws.com/v1/repos/{repository}")
}

pub fn pipeline_console_url(region: &str, pipeline: &str) -> String {
    format!(
        "https://{region}.console.aws.amazon.com/codesuite/codepipeline/pipelines/{pipeline}/view?region={region}"
    )
}
