//! `web-asg`: nginx behind an application load balancer, scaled by an auto
//! scaling group, with an artifact bucket reachable through an S3 gateway
//! endpoint

use super::{Settings, WebTier};
use anyhow::{Result, bail};
use infraflow_aws::compute::InstanceProfileRef;
use infraflow_aws::{
    ApplicationLoadBalancer, ApplicationLoadBalancerArgs, AutoScalingGroup, AutoScalingGroupArgs,
    AutoScalingPolicy, AutoScalingPolicyArgs, BootScript, HealthCheckType, IamInstanceProfile,
    IamInstanceProfileArgs, LaunchTemplate, LaunchTemplateArgs, ListenerConfig, S3Bucket,
    S3BucketArgs, ScalingPolicy, TagSpecification, TargetGroup, TargetGroupArgs,
    TargetTrackingConfiguration, VpcGatewayEndpoint, VpcGatewayEndpointArgs,
};
use infraflow_cloud::{CloudInventory, Output, Stack};
use infraflow_core::{ConfigNamespace, StackConfig};

const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";
const DEFAULT_MIN_SIZE: u32 = 2;
const DEFAULT_MAX_SIZE: u32 = 4;
const DEFAULT_DESIRED_CAPACITY: u32 = 2;
const DEFAULT_VOLUME_SIZE: u32 = 10;

pub fn build(
    stack: &mut Stack,
    inventory: &dyn CloudInventory,
    settings: &Settings,
    config: &StackConfig,
) -> Result<()> {
    let ec2 = config.namespace("ec2");
    let s3 = config.namespace("s3");
    let prefix = settings.prefix();
    let web_tags = settings.tags_with([("Tier", "web")]);

    let tier = WebTier::build(stack, inventory, settings, config, true)?;
    let network = &tier.network;

    let bucket = S3Bucket::build(
        stack,
        &format!("{}-artifacts", prefix),
        S3BucketArgs {
            bucket_name: s3.get_str("bucketName")?.map(str::to_string),
            versioning_enabled: s3.get_bool("versioning")?.unwrap_or(false),
            tags: settings.tags(),
        },
    )?;

    let profile = IamInstanceProfile::build(
        stack,
        &format!("{}-web", prefix),
        IamInstanceProfileArgs {
            bucket_arn: Some(bucket.arn()),
            tags: settings.tags(),
        },
    )?;

    let endpoint = VpcGatewayEndpoint::build(
        stack,
        inventory,
        &format!("{}-s3", prefix),
        VpcGatewayEndpointArgs {
            vpc_id: Some(network.vpc_id()),
            route_table_ids: network.route_table_ids(),
            tags: settings.tags(),
            ..Default::default()
        },
    )?;

    let user_data = BootScript::nginx(
        &settings.environment,
        &settings.branch,
        Some(bucket.bucket_name()),
    )
    .render()?;

    let server_name = format!("{}-web-server", prefix);
    let launch_template = LaunchTemplate::build(
        stack,
        inventory,
        &format!("{}-web-lt", prefix),
        LaunchTemplateArgs {
            instance_type: ec2
                .get_str("instanceType")?
                .unwrap_or(DEFAULT_INSTANCE_TYPE)
                .to_string(),
            key_name: settings.key_name.clone(),
            security_group_ids: tier.security_group_ids(),
            user_data: Some(user_data),
            iam_instance_profile: Some(InstanceProfileRef::Arn(profile.arn())),
            enable_monitoring: true,
            volume_type: ec2.get_str("volumeType")?.unwrap_or("gp3").to_string(),
            volume_size: config_u32(&ec2, "volumeSize")?.unwrap_or(DEFAULT_VOLUME_SIZE),
            delete_on_termination: ec2.get_bool("deleteOnTermination")?.unwrap_or(true),
            encrypted: ec2.get_bool("encrypted")?.unwrap_or(true),
            tags: web_tags.clone(),
            tag_specifications: vec![
                TagSpecification {
                    resource_type: "instance".to_string(),
                    tags: settings.tags_with([("Name", server_name.as_str()), ("Tier", "web")]),
                },
                TagSpecification {
                    resource_type: "volume".to_string(),
                    tags: settings.tags(),
                },
            ],
            ..Default::default()
        },
    )?;

    let target_group = TargetGroup::build(
        stack,
        &format!("{}-web-tg", prefix),
        TargetGroupArgs {
            vpc_id: Some(network.vpc_id()),
            deregistration_delay: 30,
            tags: web_tags.clone(),
            ..Default::default()
        },
    )?;

    let alb = ApplicationLoadBalancer::build(
        stack,
        &format!("{}-web-alb", prefix),
        ApplicationLoadBalancerArgs {
            subnet_ids: network.public_subnet_ids(),
            security_group_ids: vec![tier.web_sg.id()],
            listeners: vec![ListenerConfig::http_forward(80, target_group.arn())],
            tags: web_tags.clone(),
            ..Default::default()
        },
    )?;

    let asg_name = format!("{}-web-asg", prefix);
    let asg = AutoScalingGroup::build(
        stack,
        &asg_name,
        AutoScalingGroupArgs {
            launch_template_id: Some(launch_template.id()),
            min_size: config_u32(&ec2, "minSize")?.unwrap_or(DEFAULT_MIN_SIZE),
            max_size: config_u32(&ec2, "maxSize")?.unwrap_or(DEFAULT_MAX_SIZE),
            desired_capacity: Some(
                config_u32(&ec2, "desiredCapacity")?.unwrap_or(DEFAULT_DESIRED_CAPACITY),
            ),
            vpc_zone_identifiers: network.public_subnet_ids(),
            health_check_type: HealthCheckType::Elb,
            health_check_grace_period: 300,
            target_group_arns: vec![target_group.arn()],
            tags: settings.tags_with([("Name", asg_name.as_str()), ("Tier", "web")]),
            ..Default::default()
        },
    )?;

    if let Some(target) = ec2.get_float("cpuTarget")? {
        AutoScalingPolicy::build(
            stack,
            &format!("{}-web-cpu", prefix),
            AutoScalingPolicyArgs {
                autoscaling_group_name: Some(asg.name()),
                policy: ScalingPolicy::TargetTracking(TargetTrackingConfiguration::cpu(target)),
                estimated_instance_warmup: Some(300),
            },
        )?;
    }

    tier.export(stack);
    stack.export("launch_template_id", launch_template.id());
    stack.export("launch_template_name", launch_template.name());
    stack.export(
        "launch_template_latest_version",
        launch_template.latest_version(),
    );
    stack.export("target_group_id", target_group.id());
    stack.export("target_group_arn", target_group.arn());
    stack.export("target_group_name", target_group.name());
    stack.export("alb_id", alb.load_balancer.id());
    stack.export("alb_arn", alb.arn());
    stack.export("alb_dns_name", alb.dns_name());
    stack.export("alb_zone_id", alb.zone_id());
    stack.export("asg_id", asg.id());
    stack.export("asg_name", asg.name());
    stack.export("asg_arn", asg.asg.arn());
    stack.export("asg_min_size", asg.asg.attr("min_size"));
    stack.export("asg_max_size", asg.asg.attr("max_size"));
    stack.export("asg_desired_capacity", asg.asg.attr("desired_capacity"));
    stack.export("bucket_name", bucket.bucket_name());
    stack.export("bucket_arn", bucket.arn());
    stack.export("iam_role_arn", profile.role_arn());
    stack.export("instance_profile_arn", profile.arn());
    stack.export("vpc_endpoint_id", endpoint.id());
    stack.export(
        "application_url",
        Output::concat([Output::from("http://"), alb.dns_name()]),
    );
    Ok(())
}

fn config_u32(namespace: &ConfigNamespace<'_>, key: &str) -> Result<Option<u32>> {
    match namespace.get_int(key)? {
        None => Ok(None),
        Some(value) => match u32::try_from(value) {
            Ok(value) => Ok(Some(value)),
            Err(_) => bail!("Config {}:{} must not be negative, got {}", namespace.name(), key, value),
        },
    }
}
