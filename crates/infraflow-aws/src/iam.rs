//! IAM role and instance profile granting EC2 access to one bucket

use crate::error::{AwsError, Result};
use crate::{Tags, tags_with_name};
use infraflow_cloud::{Output, ResourceRef, Stack};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

pub const IAM_INSTANCE_PROFILE_TYPE: &str = "infraflow:iam:IamInstanceProfile";

const POLICY_VERSION: &str = "2012-10-17";

/// Arguments of [`IamInstanceProfile::build`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IamInstanceProfileArgs {
    pub bucket_arn: Option<Output>,
    pub tags: Tags,
}

/// Role, inline S3 policy and instance profile
#[derive(Debug, Clone)]
pub struct IamInstanceProfile {
    pub component: ResourceRef,
    pub role: ResourceRef,
    pub policy: ResourceRef,
    pub instance_profile: ResourceRef,
}

fn assume_role_policy() -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": {"Service": "ec2.amazonaws.com"},
        }],
    })
}

fn bucket_access_policy(bucket_arn: &Output) -> Value {
    let objects = Output::concat([bucket_arn.clone(), Output::from("/*")]);
    json!({
        "Version": POLICY_VERSION,
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["s3:ListBucket"],
                "Resource": bucket_arn,
            },
            {
                "Effect": "Allow",
                "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
                "Resource": objects,
            },
        ],
    })
}

impl IamInstanceProfile {
    pub fn build(stack: &mut Stack, name: &str, args: IamInstanceProfileArgs) -> Result<Self> {
        let bucket_arn = args
            .bucket_arn
            .ok_or_else(|| AwsError::missing("bucket_arn"))?;

        let component = stack.component(IAM_INSTANCE_PROFILE_TYPE, name, None)?;

        let role_name = format!("{}-role", name);
        let role = stack
            .resource(
                "iam-role",
                &role_name,
                json!({
                    "assume_role_policy": assume_role_policy(),
                    "tags": tags_with_name(&args.tags, &role_name),
                }),
            )
            .parent(&component)
            .create()?;

        let policy = stack
            .resource(
                "iam-role-policy",
                format!("{}-s3-policy", name),
                json!({
                    "role": role.attr("name"),
                    "policy": bucket_access_policy(&bucket_arn),
                }),
            )
            .parent(&role)
            .create()?;

        let profile_name = format!("{}-instance-profile", name);
        let instance_profile = stack
            .resource(
                "iam-instance-profile",
                &profile_name,
                json!({
                    "role": role.attr("name"),
                    "tags": tags_with_name(&args.tags, &profile_name),
                }),
            )
            .parent(&component)
            .create()?;

        stack.register_outputs(
            &component,
            json!({
                "role_arn": role.arn(),
                "role_name": role.attr("name"),
                "instance_profile_arn": instance_profile.arn(),
                "instance_profile_name": instance_profile.attr("name"),
            }),
        )?;

        info!(profile = name, "Declared IAM instance profile");
        Ok(Self {
            component,
            role,
            policy,
            instance_profile,
        })
    }

    pub fn role_arn(&self) -> Output {
        self.role.arn()
    }

    pub fn arn(&self) -> Output {
        self.instance_profile.arn()
    }

    pub fn name(&self) -> Output {
        self.instance_profile.attr("name")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_grants_bucket_access() {
        let mut stack = Stack::new("demo", "dev");
        let bucket = stack
            .resource("s3-bucket", "artifacts-bucket", json!({}))
            .create()
            .unwrap();
        let profile = IamInstanceProfile::build(
            &mut stack,
            "web",
            IamInstanceProfileArgs {
                bucket_arn: Some(bucket.arn()),
                ..Default::default()
            },
        )
        .unwrap();

        let role = stack.get(&profile.role.urn).unwrap();
        assert_eq!(
            role.props["assume_role_policy"]["Statement"][0]["Principal"]["Service"],
            "ec2.amazonaws.com"
        );
        assert_eq!(role.props["tags"]["Name"], "web-role");

        let policy = stack.get(&profile.policy.urn).unwrap();
        assert_eq!(policy.parent.as_deref(), Some(profile.role.urn.as_str()));
        let statements = &policy.props["policy"]["Statement"];
        assert_eq!(statements[0]["Resource"], bucket.arn().to_value());
        assert_eq!(
            statements[1]["Resource"],
            json!({"$concat": [bucket.arn().to_value(), "/*"]})
        );
        assert!(policy.depends_on.contains(&bucket.urn));
        assert!(policy.depends_on.contains(&profile.role.urn));

        let instance_profile = stack.get("iam-instance-profile:web-instance-profile").unwrap();
        assert_eq!(instance_profile.props["role"], profile.role.attr("name").to_value());
    }

    #[test]
    fn test_bucket_arn_is_required() {
        let mut stack = Stack::new("demo", "dev");
        let err = IamInstanceProfile::build(&mut stack, "web", IamInstanceProfileArgs::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "bucket_arn must be provided");
        assert!(stack.is_empty());
    }
}
