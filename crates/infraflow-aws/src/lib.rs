//! AWS component builders for infraflow
//!
//! Every builder takes a [`Stack`](infraflow_cloud::Stack), a name and an
//! arguments record, validates the arguments and declares its resources
//! under a component node. Builders never talk to AWS; account facts such as
//! availability zones and machine images come from a
//! [`CloudInventory`](infraflow_cloud::CloudInventory).

pub mod cidr;
pub mod compute;
pub mod endpoint;
pub mod error;
pub mod iam;
pub mod inventory;
pub mod load_balancer;
pub mod network;
pub mod security;
pub mod storage;
pub mod user_data;

use serde_json::Value;
use std::collections::BTreeMap;

pub use cidr::{SubnetLayout, SubnetStrategy, allocate_subnets};
pub use compute::{
    AutoScalingGroup, AutoScalingGroupArgs, AutoScalingPolicy, AutoScalingPolicyArgs,
    BlockDeviceMapping, Ec2Instance, Ec2InstanceArgs, HealthCheckType, LaunchTemplate,
    LaunchTemplateArgs, ScalingPolicy, StepAdjustment, TagSpecification,
    TargetTrackingConfiguration,
};
pub use endpoint::{VpcGatewayEndpoint, VpcGatewayEndpointArgs};
pub use error::{AwsError, Result};
pub use iam::{IamInstanceProfile, IamInstanceProfileArgs};
pub use inventory::StaticInventory;
pub use load_balancer::{
    ApplicationLoadBalancer, ApplicationLoadBalancerArgs, FixedResponseConfig, HealthCheck,
    Listener, ListenerAction, ListenerActionConfig, ListenerConfig, ListenerProtocol, RedirectConfig, Stickiness,
    TargetGroup, TargetGroupArgs,
};
pub use network::{VpcNetwork, VpcNetworkArgs};
pub use security::{
    ApplicationSecurityGroupArgs, DatabaseSecurityGroupArgs, LoadBalancerSecurityGroupArgs,
    Protocol, RuleConfig, RuleSource, SecurityGroup, SecurityGroupArgs, SecurityRule,
    TieredSecurityGroups, WebSecurityGroupArgs, application_security_group,
    create_tiered_security_groups, database_port, database_security_group,
    load_balancer_security_group, web_security_group,
};
pub use storage::{S3Bucket, S3BucketArgs};
pub use user_data::BootScript;

/// Resource tags
pub type Tags = BTreeMap<String, String>;

/// Caller tags with `Name` set on top
pub(crate) fn tags_with_name(tags: &Tags, name: &str) -> Value {
    tags_with(tags, [("Name", name.to_string())])
}

/// Caller tags with `extra` merged on top
pub(crate) fn tags_with<'a>(
    tags: &Tags,
    extra: impl IntoIterator<Item = (&'a str, String)>,
) -> Value {
    let mut merged = tags.clone();
    for (key, value) in extra {
        merged.insert(key.to_string(), value);
    }
    Value::Object(
        merged
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    )
}
