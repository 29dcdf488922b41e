//! Compute provisioners: single instances, launch templates and auto scaling

use crate::error::{AwsError, Result};
use crate::security::{RuleSource, SecurityRule};
use crate::{Tags, tags_with_name};
use infraflow_cloud::{CloudInventory, ImageQuery, Output, ResourceRef, Stack};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

pub const EC2_INSTANCE_TYPE: &str = "infraflow:ec2:Ec2Instance";
pub const LAUNCH_TEMPLATE_TYPE: &str = "infraflow:asg:LaunchTemplate";
pub const AUTO_SCALING_GROUP_TYPE: &str = "infraflow:asg:AutoScalingGroup";
pub const AUTO_SCALING_POLICY_TYPE: &str = "infraflow:asg:AutoScalingPolicy";

const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";

fn default_instance_type() -> String {
    DEFAULT_INSTANCE_TYPE.to_string()
}

/// Explicit AMI, or the latest Amazon Linux 2023 image from the inventory
fn resolve_ami(inventory: &dyn CloudInventory, ami: Option<&str>) -> Result<String> {
    match ami.filter(|a| !a.is_empty()) {
        Some(ami) => Ok(ami.to_string()),
        None => {
            let image = inventory.latest_image(&ImageQuery::amazon_linux_2023())?;
            debug!(ami = %image.id, "Using latest Amazon Linux 2023 image");
            Ok(image.id)
        }
    }
}

/// Arguments of [`Ec2Instance::build`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ec2InstanceArgs {
    pub instance_type: String,
    pub ami: Option<String>,
    pub key_name: Option<String>,
    pub subnet_id: Option<Output>,
    pub security_group_ids: Vec<Output>,
    /// Required when no security groups are given
    pub vpc_id: Option<Output>,
    pub user_data: Option<Output>,
    /// SSH sources of the security group created when none is given;
    /// empty means no SSH ingress
    pub fallback_ssh_cidr_blocks: Vec<String>,
    pub tags: Tags,
}

impl Default for Ec2InstanceArgs {
    fn default() -> Self {
        Self {
            instance_type: default_instance_type(),
            ami: None,
            key_name: None,
            subnet_id: None,
            security_group_ids: Vec::new(),
            vpc_id: None,
            user_data: None,
            fallback_ssh_cidr_blocks: Vec::new(),
            tags: Tags::new(),
        }
    }
}

/// A single EC2 instance
#[derive(Debug, Clone)]
pub struct Ec2Instance {
    pub component: ResourceRef,
    pub instance: ResourceRef,
    /// Created only when the caller supplied no security groups
    pub security_group: Option<ResourceRef>,
}

impl Ec2Instance {
    pub fn build(
        stack: &mut Stack,
        inventory: &dyn CloudInventory,
        name: &str,
        args: Ec2InstanceArgs,
    ) -> Result<Self> {
        if args.security_group_ids.is_empty() && args.vpc_id.is_none() {
            return Err(AwsError::invalid(
                "Either security_group_ids or vpc_id must be provided",
            ));
        }
        let ami = resolve_ami(inventory, args.ami.as_deref())?;

        let component = stack.component(EC2_INSTANCE_TYPE, name, None)?;

        let mut security_group_ids = args.security_group_ids;
        let mut security_group = None;
        if let (true, Some(vpc_id)) = (security_group_ids.is_empty(), args.vpc_id) {
            let ingress: Vec<Value> = if args.fallback_ssh_cidr_blocks.is_empty() {
                Vec::new()
            } else {
                vec![
                    SecurityRule::tcp(
                        22,
                        RuleSource::cidrs(args.fallback_ssh_cidr_blocks.clone()),
                        "Allow SSH",
                    )
                    .to_value(),
                ]
            };
            let egress = SecurityRule::all_traffic(RuleSource::anywhere(), "Allow all outbound");

            let sg_name = format!("{}-sg", name);
            let group = stack
                .resource(
                    "security-group",
                    &sg_name,
                    json!({
                        "vpc_id": vpc_id,
                        "description": format!("Security group for {}", name),
                        "ingress": ingress,
                        "egress": [egress.to_value()],
                        "tags": tags_with_name(&args.tags, &sg_name),
                    }),
                )
                .parent(&component)
                .create()?;
            security_group_ids.push(group.id());
            security_group = Some(group);
        }

        let instance = stack
            .resource(
                "instance",
                format!("{}-instance", name),
                json!({
                    "instance_type": args.instance_type,
                    "ami": ami,
                    "key_name": args.key_name,
                    "subnet_id": args.subnet_id,
                    "vpc_security_group_ids": security_group_ids,
                    "user_data": args.user_data,
                    "tags": tags_with_name(&args.tags, name),
                }),
            )
            .parent(&component)
            .create()?;

        let mut outputs = json!({
            "instance_id": instance.id(),
            "public_ip": instance.attr("public_ip"),
            "public_dns": instance.attr("public_dns"),
            "private_ip": instance.attr("private_ip"),
        });
        if let (Some(group), Some(map)) = (&security_group, outputs.as_object_mut()) {
            map.insert("security_group_id".to_string(), group.id().to_value());
        }
        stack.register_outputs(&component, outputs)?;

        info!(instance = name, ami = %ami, "Declared EC2 instance");
        Ok(Self {
            component,
            instance,
            security_group,
        })
    }

    pub fn id(&self) -> Output {
        self.instance.id()
    }

    pub fn public_ip(&self) -> Output {
        self.instance.attr("public_ip")
    }

    pub fn public_dns(&self) -> Output {
        self.instance.attr("public_dns")
    }

    pub fn private_ip(&self) -> Output {
        self.instance.attr("private_ip")
    }
}

/// IAM instance profile reference of a launch template
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceProfileRef {
    Name(Output),
    Arn(Output),
}

impl InstanceProfileRef {
    /// Strings starting with `arn:` are ARNs, anything else is a profile name
    pub fn parse(value: &str) -> Self {
        if value.starts_with("arn:") {
            InstanceProfileRef::Arn(Output::from(value))
        } else {
            InstanceProfileRef::Name(Output::from(value))
        }
    }

    fn to_value(&self) -> Value {
        match self {
            InstanceProfileRef::Name(name) => json!({"name": name}),
            InstanceProfileRef::Arn(arn) => json!({"arn": arn}),
        }
    }
}

impl<'de> Deserialize<'de> for InstanceProfileRef {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(InstanceProfileRef::parse(&value))
    }
}

/// EBS settings of a block device
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EbsVolume {
    pub volume_size: u32,
    pub volume_type: String,
    pub delete_on_termination: bool,
    pub encrypted: bool,
}

impl Default for EbsVolume {
    fn default() -> Self {
        Self {
            volume_size: 8,
            volume_type: "gp3".to_string(),
            delete_on_termination: true,
            encrypted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockDeviceMapping {
    pub device_name: String,
    #[serde(default)]
    pub ebs: Option<EbsVolume>,
}

impl BlockDeviceMapping {
    fn to_value(&self) -> Value {
        let ebs = self.ebs.as_ref().map(|ebs| {
            json!({
                "volume_size": ebs.volume_size,
                "volume_type": ebs.volume_type,
                "delete_on_termination": ebs.delete_on_termination,
                "encrypted": ebs.encrypted,
            })
        });
        json!({"device_name": self.device_name, "ebs": ebs})
    }
}

/// Tags applied to resources launched from a template
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TagSpecification {
    #[serde(default = "default_tag_resource_type")]
    pub resource_type: String,
    #[serde(default)]
    pub tags: Tags,
}

fn default_tag_resource_type() -> String {
    "instance".to_string()
}

/// Arguments of [`LaunchTemplate::build`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LaunchTemplateArgs {
    pub instance_type: String,
    pub ami: Option<String>,
    pub key_name: Option<String>,
    pub security_group_ids: Vec<Output>,
    /// Plain-text boot script, base64-encoded once resolved
    pub user_data: Option<Output>,
    pub iam_instance_profile: Option<InstanceProfileRef>,
    pub enable_monitoring: bool,
    pub ebs_optimized: bool,
    pub volume_type: String,
    pub volume_size: u32,
    pub delete_on_termination: bool,
    pub encrypted: bool,
    /// Replaces the default root volume when set
    pub block_device_mappings: Option<Vec<BlockDeviceMapping>>,
    pub tags: Tags,
    pub tag_specifications: Vec<TagSpecification>,
}

impl Default for LaunchTemplateArgs {
    fn default() -> Self {
        let root = EbsVolume::default();
        Self {
            instance_type: default_instance_type(),
            ami: None,
            key_name: None,
            security_group_ids: Vec::new(),
            user_data: None,
            iam_instance_profile: None,
            enable_monitoring: false,
            ebs_optimized: false,
            volume_type: root.volume_type,
            volume_size: root.volume_size,
            delete_on_termination: root.delete_on_termination,
            encrypted: root.encrypted,
            block_device_mappings: None,
            tags: Tags::new(),
            tag_specifications: Vec::new(),
        }
    }
}

/// An EC2 launch template
#[derive(Debug, Clone)]
pub struct LaunchTemplate {
    pub component: ResourceRef,
    pub launch_template: ResourceRef,
}

impl LaunchTemplate {
    pub fn build(
        stack: &mut Stack,
        inventory: &dyn CloudInventory,
        name: &str,
        args: LaunchTemplateArgs,
    ) -> Result<Self> {
        if args.security_group_ids.is_empty() {
            return Err(AwsError::missing("security_group_ids"));
        }
        let ami = resolve_ami(inventory, args.ami.as_deref())?;

        let mut props = Map::new();
        props.insert("name_prefix".into(), json!(format!("{}-", name)));
        props.insert("image_id".into(), json!(ami));
        props.insert("instance_type".into(), json!(args.instance_type));
        props.insert("vpc_security_group_ids".into(), json!(args.security_group_ids));
        props.insert("tags".into(), tags_with_name(&args.tags, name));
        if let Some(key_name) = args.key_name.filter(|k| !k.is_empty()) {
            props.insert("key_name".into(), json!(key_name));
        }
        if let Some(user_data) = args.user_data {
            props.insert("user_data".into(), user_data.base64().to_value());
        }
        if let Some(profile) = &args.iam_instance_profile {
            props.insert("iam_instance_profile".into(), profile.to_value());
        }
        if args.enable_monitoring {
            props.insert("monitoring".into(), json!({"enabled": true}));
        }
        if args.ebs_optimized {
            props.insert("ebs_optimized".into(), json!("true"));
        }
        let mappings = args.block_device_mappings.unwrap_or_else(|| {
            vec![BlockDeviceMapping {
                device_name: "/dev/xvda".to_string(),
                ebs: Some(EbsVolume {
                    volume_size: args.volume_size,
                    volume_type: args.volume_type.clone(),
                    delete_on_termination: args.delete_on_termination,
                    encrypted: args.encrypted,
                }),
            }]
        });
        props.insert(
            "block_device_mappings".into(),
            Value::Array(mappings.iter().map(BlockDeviceMapping::to_value).collect()),
        );
        if !args.tag_specifications.is_empty() {
            let specs: Vec<Value> = args
                .tag_specifications
                .iter()
                .map(|spec| json!({"resource_type": spec.resource_type, "tags": spec.tags}))
                .collect();
            props.insert("tag_specifications".into(), Value::Array(specs));
        }

        let component = stack.component(LAUNCH_TEMPLATE_TYPE, name, None)?;
        let launch_template = stack
            .resource("launch-template", format!("{}-lt", name), Value::Object(props))
            .parent(&component)
            .create()?;

        stack.register_outputs(
            &component,
            json!({
                "launch_template_id": launch_template.id(),
                "launch_template_arn": launch_template.arn(),
                "launch_template_latest_version": launch_template.attr("latest_version"),
                "launch_template_name": launch_template.attr("name"),
            }),
        )?;

        info!(template = name, ami = %ami, "Declared launch template");
        Ok(Self {
            component,
            launch_template,
        })
    }

    pub fn id(&self) -> Output {
        self.launch_template.id()
    }

    pub fn name(&self) -> Output {
        self.launch_template.attr("name")
    }

    pub fn latest_version(&self) -> Output {
        self.launch_template.attr("latest_version")
    }
}

/// Health check source of an auto scaling group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthCheckType {
    #[default]
    Ec2,
    Elb,
}

impl HealthCheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthCheckType::Ec2 => "EC2",
            HealthCheckType::Elb => "ELB",
        }
    }
}

/// Arguments of [`AutoScalingGroup::build`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoScalingGroupArgs {
    pub launch_template_id: Option<Output>,
    pub launch_template_version: Output,
    pub min_size: u32,
    pub max_size: u32,
    /// Defaults to `min_size`
    pub desired_capacity: Option<u32>,
    pub vpc_zone_identifiers: Vec<Output>,
    pub health_check_type: HealthCheckType,
    pub health_check_grace_period: u32,
    pub target_group_arns: Vec<Output>,
    pub default_cooldown: u32,
    pub termination_policies: Vec<String>,
    pub enabled_metrics: Vec<String>,
    pub protect_from_scale_in: bool,
    pub wait_for_capacity_timeout: String,
    pub tags: Tags,
}

impl Default for AutoScalingGroupArgs {
    fn default() -> Self {
        Self {
            launch_template_id: None,
            launch_template_version: Output::from("$Latest"),
            min_size: 1,
            max_size: 3,
            desired_capacity: None,
            vpc_zone_identifiers: Vec::new(),
            health_check_type: HealthCheckType::default(),
            health_check_grace_period: 300,
            target_group_arns: Vec::new(),
            default_cooldown: 300,
            termination_policies: Vec::new(),
            enabled_metrics: Vec::new(),
            protect_from_scale_in: false,
            wait_for_capacity_timeout: "10m".to_string(),
            tags: Tags::new(),
        }
    }
}

/// An auto scaling group launching from a template
#[derive(Debug, Clone)]
pub struct AutoScalingGroup {
    pub component: ResourceRef,
    pub asg: ResourceRef,
}

impl AutoScalingGroup {
    pub fn build(stack: &mut Stack, name: &str, args: AutoScalingGroupArgs) -> Result<Self> {
        let launch_template_id = args
            .launch_template_id
            .ok_or_else(|| AwsError::missing("launch_template_id"))?;
        if args.vpc_zone_identifiers.is_empty() {
            return Err(AwsError::missing("vpc_zone_identifiers"));
        }
        let desired_capacity = args.desired_capacity.unwrap_or(args.min_size);
        if args.min_size > args.max_size {
            return Err(AwsError::invalid(format!(
                "min_size ({}) must not exceed max_size ({})",
                args.min_size, args.max_size
            )));
        }
        if desired_capacity < args.min_size || desired_capacity > args.max_size {
            return Err(AwsError::invalid(format!(
                "desired_capacity ({}) must be between min_size ({}) and max_size ({})",
                desired_capacity, args.min_size, args.max_size
            )));
        }

        let asg_name = format!("{}-asg", name);
        let mut props = Map::new();
        props.insert("name".into(), json!(asg_name));
        props.insert("min_size".into(), json!(args.min_size));
        props.insert("max_size".into(), json!(args.max_size));
        props.insert("desired_capacity".into(), json!(desired_capacity));
        props.insert("vpc_zone_identifiers".into(), json!(args.vpc_zone_identifiers));
        props.insert("health_check_type".into(), json!(args.health_check_type.as_str()));
        props.insert(
            "health_check_grace_period".into(),
            json!(args.health_check_grace_period),
        );
        props.insert("default_cooldown".into(), json!(args.default_cooldown));
        props.insert("protect_from_scale_in".into(), json!(args.protect_from_scale_in));
        props.insert(
            "wait_for_capacity_timeout".into(),
            json!(args.wait_for_capacity_timeout),
        );
        props.insert(
            "launch_template".into(),
            json!({"id": launch_template_id, "version": args.launch_template_version}),
        );
        if !args.target_group_arns.is_empty() {
            props.insert("target_group_arns".into(), json!(args.target_group_arns));
        }
        if !args.termination_policies.is_empty() {
            props.insert("termination_policies".into(), json!(args.termination_policies));
        }
        if !args.enabled_metrics.is_empty() {
            props.insert("enabled_metrics".into(), json!(args.enabled_metrics));
        }
        if !args.tags.is_empty() {
            let tags: Vec<Value> = args
                .tags
                .iter()
                .map(|(key, value)| json!({"key": key, "value": value, "propagate_at_launch": true}))
                .collect();
            props.insert("tags".into(), Value::Array(tags));
        }

        let component = stack.component(AUTO_SCALING_GROUP_TYPE, name, None)?;
        let asg = stack
            .resource("autoscaling-group", &asg_name, Value::Object(props))
            .parent(&component)
            .create()?;

        stack.register_outputs(
            &component,
            json!({
                "asg_id": asg.id(),
                "asg_arn": asg.arn(),
                "asg_name": asg.attr("name"),
                "min_size": asg.attr("min_size"),
                "max_size": asg.attr("max_size"),
                "desired_capacity": asg.attr("desired_capacity"),
            }),
        )?;

        info!(
            group = name,
            min = args.min_size,
            max = args.max_size,
            desired = desired_capacity,
            "Declared auto scaling group"
        );
        Ok(Self { component, asg })
    }

    pub fn id(&self) -> Output {
        self.asg.id()
    }

    pub fn name(&self) -> Output {
        self.asg.attr("name")
    }
}

/// Target tracking settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetTrackingConfiguration {
    pub target_value: f64,
    #[serde(default)]
    pub predefined_metric_type: Option<String>,
    #[serde(default)]
    pub customized_metric_specification: Option<Value>,
    #[serde(default)]
    pub disable_scale_in: bool,
}

impl TargetTrackingConfiguration {
    /// Keep average CPU utilisation of the group at `target` percent
    pub fn cpu(target: f64) -> Self {
        Self {
            target_value: target,
            predefined_metric_type: Some("ASGAverageCPUUtilization".to_string()),
            customized_metric_specification: None,
            disable_scale_in: false,
        }
    }

    fn to_value(&self) -> Value {
        let predefined = match (&self.predefined_metric_type, &self.customized_metric_specification) {
            (Some(metric), _) => Some(metric.clone()),
            (None, None) => Some("ASGAverageCPUUtilization".to_string()),
            (None, Some(_)) => None,
        };
        json!({
            "target_value": self.target_value,
            "predefined_metric_specification": predefined
                .map(|metric| json!({"predefined_metric_type": metric})),
            "customized_metric_specification": self.customized_metric_specification,
            "disable_scale_in": self.disable_scale_in,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepAdjustment {
    pub scaling_adjustment: i32,
    #[serde(default)]
    pub metric_interval_lower_bound: Option<f64>,
    #[serde(default)]
    pub metric_interval_upper_bound: Option<f64>,
}

/// Scaling policy variants
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "policy_type")]
pub enum ScalingPolicy {
    #[serde(rename = "TargetTrackingScaling")]
    TargetTracking(TargetTrackingConfiguration),
    #[serde(rename = "StepScaling")]
    Step {
        #[serde(default)]
        adjustment_type: Option<String>,
        step_adjustments: Vec<StepAdjustment>,
        #[serde(default)]
        metric_aggregation_type: Option<String>,
    },
    #[serde(rename = "SimpleScaling")]
    Simple {
        #[serde(default)]
        adjustment_type: Option<String>,
        scaling_adjustment: i32,
        #[serde(default)]
        cooldown: Option<u32>,
    },
}

impl ScalingPolicy {
    pub fn policy_type(&self) -> &'static str {
        match self {
            ScalingPolicy::TargetTracking(_) => "TargetTrackingScaling",
            ScalingPolicy::Step { .. } => "StepScaling",
            ScalingPolicy::Simple { .. } => "SimpleScaling",
        }
    }

    fn apply_to(&self, props: &mut Map<String, Value>) {
        match self {
            ScalingPolicy::TargetTracking(config) => {
                props.insert("target_tracking_configuration".into(), config.to_value());
            }
            ScalingPolicy::Step {
                adjustment_type,
                step_adjustments,
                metric_aggregation_type,
            } => {
                if let Some(adjustment_type) = adjustment_type {
                    props.insert("adjustment_type".into(), json!(adjustment_type));
                }
                let steps: Vec<Value> = step_adjustments
                    .iter()
                    .map(|step| {
                        json!({
                            "scaling_adjustment": step.scaling_adjustment,
                            "metric_interval_lower_bound": step.metric_interval_lower_bound,
                            "metric_interval_upper_bound": step.metric_interval_upper_bound,
                        })
                    })
                    .collect();
                props.insert("step_adjustments".into(), Value::Array(steps));
                if let Some(aggregation) = metric_aggregation_type {
                    props.insert("metric_aggregation_type".into(), json!(aggregation));
                }
            }
            ScalingPolicy::Simple {
                adjustment_type,
                scaling_adjustment,
                cooldown,
            } => {
                if let Some(adjustment_type) = adjustment_type {
                    props.insert("adjustment_type".into(), json!(adjustment_type));
                }
                props.insert("scaling_adjustment".into(), json!(scaling_adjustment));
                if let Some(cooldown) = cooldown {
                    props.insert("cooldown".into(), json!(cooldown));
                }
            }
        }
    }
}

/// Arguments of [`AutoScalingPolicy::build`]
#[derive(Debug, Clone, Deserialize)]
pub struct AutoScalingPolicyArgs {
    #[serde(default)]
    pub autoscaling_group_name: Option<Output>,
    #[serde(flatten)]
    pub policy: ScalingPolicy,
    #[serde(default)]
    pub estimated_instance_warmup: Option<u32>,
}

/// A dynamic scaling policy attached to a group
#[derive(Debug, Clone)]
pub struct AutoScalingPolicy {
    pub component: ResourceRef,
    pub policy: ResourceRef,
}

impl AutoScalingPolicy {
    pub fn build(stack: &mut Stack, name: &str, args: AutoScalingPolicyArgs) -> Result<Self> {
        let group_name = args
            .autoscaling_group_name
            .ok_or_else(|| AwsError::missing("autoscaling_group_name"))?;

        let policy_name = format!("{}-policy", name);
        let mut props = Map::new();
        props.insert("name".into(), json!(policy_name));
        props.insert("autoscaling_group_name".into(), group_name.to_value());
        props.insert("policy_type".into(), json!(args.policy.policy_type()));
        args.policy.apply_to(&mut props);
        if let Some(warmup) = args.estimated_instance_warmup {
            props.insert("estimated_instance_warmup".into(), json!(warmup));
        }

        let component = stack.component(AUTO_SCALING_POLICY_TYPE, name, None)?;
        let policy = stack
            .resource("autoscaling-policy", &policy_name, Value::Object(props))
            .parent(&component)
            .create()?;

        stack.register_outputs(
            &component,
            json!({
                "policy_arn": policy.arn(),
                "policy_name": policy.attr("name"),
                "policy_type": policy.attr("policy_type"),
            }),
        )?;

        info!(policy = name, kind = args.policy.policy_type(), "Declared scaling policy");
        Ok(Self { component, policy })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::StaticInventory;

    fn stack_with_group() -> (Stack, Output) {
        let mut stack = Stack::new("demo", "dev");
        let sg = stack
            .resource("security-group", "web-sg", json!({}))
            .create()
            .unwrap();
        (stack, sg.id())
    }

    #[test]
    fn test_instance_requires_groups_or_vpc() {
        let (mut stack, _) = stack_with_group();
        let err = Ec2Instance::build(
            &mut stack,
            &StaticInventory::new("us-east-1"),
            "box",
            Ec2InstanceArgs::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Either security_group_ids or vpc_id must be provided"
        );
    }

    #[test]
    fn test_instance_fallback_group_has_no_ssh_by_default() {
        let mut stack = Stack::new("demo", "dev");
        let vpc = stack.resource("vpc", "net-vpc", json!({})).create().unwrap();
        let instance = Ec2Instance::build(
            &mut stack,
            &StaticInventory::new("us-east-1"),
            "box",
            Ec2InstanceArgs {
                vpc_id: Some(vpc.id()),
                ..Default::default()
            },
        )
        .unwrap();

        let group = instance.security_group.as_ref().unwrap();
        let props = &stack.get(&group.urn).unwrap().props;
        assert_eq!(props["ingress"], json!([]));
        assert_eq!(props["egress"][0]["protocol"], "-1");

        let props = &stack.get(&instance.instance.urn).unwrap().props;
        assert_eq!(props["ami"], "ami-0c02fb55956c7d316");
        assert_eq!(props["instance_type"], "t2.micro");
        assert_eq!(props["vpc_security_group_ids"], json!([group.id()]));

        let outputs = &stack.get(&instance.component.urn).unwrap().outputs;
        assert!(outputs.contains_key("security_group_id"));
    }

    #[test]
    fn test_instance_fallback_ssh_is_explicit() {
        let mut stack = Stack::new("demo", "dev");
        let vpc = stack.resource("vpc", "net-vpc", json!({})).create().unwrap();
        let instance = Ec2Instance::build(
            &mut stack,
            &StaticInventory::new("us-east-1"),
            "box",
            Ec2InstanceArgs {
                vpc_id: Some(vpc.id()),
                fallback_ssh_cidr_blocks: vec!["203.0.113.7/32".into()],
                ..Default::default()
            },
        )
        .unwrap();
        let group = instance.security_group.unwrap();
        let props = &stack.get(&group.urn).unwrap().props;
        assert_eq!(props["ingress"][0]["from_port"], 22);
        assert_eq!(props["ingress"][0]["cidr_blocks"], json!(["203.0.113.7/32"]));
    }

    #[test]
    fn test_launch_template_defaults() {
        let (mut stack, sg) = stack_with_group();
        let lt = LaunchTemplate::build(
            &mut stack,
            &StaticInventory::new("us-east-1"),
            "web",
            LaunchTemplateArgs {
                security_group_ids: vec![sg],
                user_data: Some(Output::from("#!/bin/bash\necho hi")),
                iam_instance_profile: Some(InstanceProfileRef::parse(
                    "arn:aws:iam::000000000000:instance-profile/web",
                )),
                ..Default::default()
            },
        )
        .unwrap();

        let props = &stack.get(&lt.launch_template.urn).unwrap().props;
        assert_eq!(props["name_prefix"], "web-");
        assert_eq!(props["user_data"], json!({"$base64": "#!/bin/bash\necho hi"}));
        assert_eq!(
            props["iam_instance_profile"],
            json!({"arn": "arn:aws:iam::000000000000:instance-profile/web"})
        );
        let root = &props["block_device_mappings"][0];
        assert_eq!(root["device_name"], "/dev/xvda");
        assert_eq!(root["ebs"]["volume_type"], "gp3");
        assert_eq!(root["ebs"]["volume_size"], 8);
        assert_eq!(root["ebs"]["delete_on_termination"], true);
        assert_eq!(root["ebs"]["encrypted"], false);
        assert!(props.get("monitoring").is_none());
        assert!(props.get("tag_specifications").is_none());
    }

    #[test]
    fn test_launch_template_requires_groups() {
        let mut stack = Stack::new("demo", "dev");
        let err = LaunchTemplate::build(
            &mut stack,
            &StaticInventory::new("us-east-1"),
            "web",
            LaunchTemplateArgs::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "security_group_ids must be provided");
    }

    #[test]
    fn test_instance_profile_by_name() {
        assert_eq!(
            InstanceProfileRef::parse("web-profile"),
            InstanceProfileRef::Name(Output::from("web-profile"))
        );
    }

    fn asg_args(lt: Output, subnet: Output) -> AutoScalingGroupArgs {
        let mut tags = Tags::new();
        tags.insert("Tier".into(), "web".into());
        AutoScalingGroupArgs {
            launch_template_id: Some(lt),
            vpc_zone_identifiers: vec![subnet],
            tags,
            ..Default::default()
        }
    }

    #[test]
    fn test_asg_defaults_and_tags() {
        let mut stack = Stack::new("demo", "dev");
        let lt = stack.resource("launch-template", "web-lt", json!({})).create().unwrap();
        let subnet = stack.resource("subnet", "public-0", json!({})).create().unwrap();
        let asg = AutoScalingGroup::build(&mut stack, "web", asg_args(lt.id(), subnet.id())).unwrap();

        let props = &stack.get(&asg.asg.urn).unwrap().props;
        assert_eq!(props["name"], "web-asg");
        assert_eq!(props["min_size"], 1);
        assert_eq!(props["max_size"], 3);
        assert_eq!(props["desired_capacity"], 1);
        assert_eq!(props["health_check_type"], "EC2");
        assert_eq!(props["wait_for_capacity_timeout"], "10m");
        assert_eq!(props["launch_template"]["version"], "$Latest");
        assert_eq!(
            props["tags"],
            json!([{"key": "Tier", "value": "web", "propagate_at_launch": true}])
        );
        assert!(props.get("target_group_arns").is_none());
    }

    #[test]
    fn test_asg_capacity_is_validated() {
        let mut stack = Stack::new("demo", "dev");
        let lt = stack.resource("launch-template", "web-lt", json!({})).create().unwrap();
        let subnet = stack.resource("subnet", "public-0", json!({})).create().unwrap();

        let mut args = asg_args(lt.id(), subnet.id());
        args.desired_capacity = Some(5);
        let err = AutoScalingGroup::build(&mut stack, "web", args).unwrap_err();
        assert!(err.to_string().starts_with("desired_capacity (5)"));

        let mut args = asg_args(lt.id(), subnet.id());
        args.min_size = 4;
        args.max_size = 2;
        assert!(AutoScalingGroup::build(&mut stack, "web", args).is_err());

        let mut args = asg_args(lt.id(), subnet.id());
        args.vpc_zone_identifiers.clear();
        let err = AutoScalingGroup::build(&mut stack, "web", args).unwrap_err();
        assert_eq!(err.to_string(), "vpc_zone_identifiers must be provided");
    }

    #[test]
    fn test_scaling_policy_variants() {
        let mut stack = Stack::new("demo", "dev");
        let asg = stack
            .resource("autoscaling-group", "web-asg", json!({"name": "web-asg"}))
            .create()
            .unwrap();

        let cpu = AutoScalingPolicy::build(
            &mut stack,
            "cpu",
            AutoScalingPolicyArgs {
                autoscaling_group_name: Some(asg.attr("name")),
                policy: ScalingPolicy::TargetTracking(TargetTrackingConfiguration::cpu(50.0)),
                estimated_instance_warmup: Some(120),
            },
        )
        .unwrap();
        let props = &stack.get(&cpu.policy.urn).unwrap().props;
        assert_eq!(props["policy_type"], "TargetTrackingScaling");
        assert_eq!(
            props["target_tracking_configuration"]["predefined_metric_specification"]
                ["predefined_metric_type"],
            "ASGAverageCPUUtilization"
        );
        assert_eq!(props["estimated_instance_warmup"], 120);

        let step: AutoScalingPolicyArgs = serde_json::from_value(json!({
            "autoscaling_group_name": "web-asg",
            "policy_type": "StepScaling",
            "adjustment_type": "ChangeInCapacity",
            "step_adjustments": [{"scaling_adjustment": 1, "metric_interval_lower_bound": 0.0}]
        }))
        .unwrap();
        let step = AutoScalingPolicy::build(&mut stack, "step", step).unwrap();
        let props = &stack.get(&step.policy.urn).unwrap().props;
        assert_eq!(props["policy_type"], "StepScaling");
        assert_eq!(props["step_adjustments"][0]["scaling_adjustment"], 1);

        let err = AutoScalingPolicy::build(
            &mut stack,
            "orphan",
            AutoScalingPolicyArgs {
                autoscaling_group_name: None,
                policy: ScalingPolicy::Simple {
                    adjustment_type: None,
                    scaling_adjustment: 1,
                    cooldown: None,
                },
                estimated_instance_warmup: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "autoscaling_group_name must be provided");
    }
}
