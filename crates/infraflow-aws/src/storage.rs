//! S3 buckets

use crate::error::Result;
use crate::{Tags, tags_with};
use infraflow_cloud::{Output, ResourceRef, Stack};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

pub const S3_BUCKET_TYPE: &str = "infraflow:storage:S3Bucket";

/// Arguments of [`S3Bucket::build`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct S3BucketArgs {
    /// Generated by the engine when absent
    pub bucket_name: Option<String>,
    pub versioning_enabled: bool,
    pub tags: Tags,
}

/// An S3 bucket with optional versioning
#[derive(Debug, Clone)]
pub struct S3Bucket {
    pub component: ResourceRef,
    pub bucket: ResourceRef,
    pub versioning: Option<ResourceRef>,
}

impl S3Bucket {
    pub fn build(stack: &mut Stack, name: &str, args: S3BucketArgs) -> Result<Self> {
        let mut props = Map::new();
        if let Some(bucket) = args.bucket_name.filter(|b| !b.is_empty()) {
            props.insert("bucket".into(), json!(bucket));
        }
        props.insert(
            "tags".into(),
            tags_with(&args.tags, [("ManagedBy", "infraflow".to_string())]),
        );

        let component = stack.component(S3_BUCKET_TYPE, name, None)?;
        let bucket = stack
            .resource("s3-bucket", format!("{}-bucket", name), Value::Object(props))
            .parent(&component)
            .create()?;

        let versioning = if args.versioning_enabled {
            Some(
                stack
                    .resource(
                        "s3-bucket-versioning",
                        format!("{}-versioning", name),
                        json!({
                            "bucket": bucket.id(),
                            "versioning_configuration": {"status": "Enabled"},
                        }),
                    )
                    .parent(&component)
                    .create()?,
            )
        } else {
            None
        };

        stack.register_outputs(
            &component,
            json!({
                "bucket_name": bucket.attr("bucket"),
                "bucket_arn": bucket.arn(),
                "bucket_id": bucket.id(),
            }),
        )?;

        info!(bucket = name, versioning = args.versioning_enabled, "Declared S3 bucket");
        Ok(Self {
            component,
            bucket,
            versioning,
        })
    }

    pub fn bucket_name(&self) -> Output {
        self.bucket.attr("bucket")
    }

    pub fn arn(&self) -> Output {
        self.bucket.arn()
    }

    pub fn id(&self) -> Output {
        self.bucket.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_is_tagged_and_unversioned_by_default() {
        let mut stack = Stack::new("demo", "dev");
        let mut tags = Tags::new();
        tags.insert("Environment".into(), "dev".into());
        tags.insert("ManagedBy".into(), "someone-else".into());

        let bucket = S3Bucket::build(
            &mut stack,
            "artifacts",
            S3BucketArgs {
                tags,
                ..Default::default()
            },
        )
        .unwrap();

        let props = &stack.get(&bucket.bucket.urn).unwrap().props;
        assert!(props.get("bucket").is_none());
        assert_eq!(
            props["tags"],
            json!({"Environment": "dev", "ManagedBy": "infraflow"})
        );
        assert!(bucket.versioning.is_none());
        assert!(stack.resources_of_type("s3-bucket-versioning").is_empty());
    }

    #[test]
    fn test_versioning_references_bucket() {
        let mut stack = Stack::new("demo", "dev");
        let bucket = S3Bucket::build(
            &mut stack,
            "artifacts",
            S3BucketArgs {
                bucket_name: Some("demo-artifacts".into()),
                versioning_enabled: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            stack.get(&bucket.bucket.urn).unwrap().props["bucket"],
            "demo-artifacts"
        );
        let versioning = stack.get("s3-bucket-versioning:artifacts-versioning").unwrap();
        assert_eq!(versioning.props["versioning_configuration"]["status"], "Enabled");
        assert_eq!(versioning.depends_on, vec![bucket.bucket.urn.clone()]);
        assert_eq!(bucket.bucket_name(), bucket.bucket.attr("bucket"));
    }
}
