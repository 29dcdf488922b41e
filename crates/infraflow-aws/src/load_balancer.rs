//! Application load balancers and target groups
//!
//! Listener records arrive loosely typed (`ListenerConfig`) and are checked
//! into [`Listener`] values before the load balancer is declared, so a bad
//! listener never leaves a half-built balancer in the graph.

use crate::error::{AwsError, Result};
use crate::{Tags, tags_with_name};
use infraflow_cloud::{Output, ResourceRef, Stack};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use tracing::{debug, info};

pub const TARGET_GROUP_TYPE: &str = "infraflow:loadbalancer:TargetGroup";
pub const APPLICATION_LOAD_BALANCER_TYPE: &str = "infraflow:loadbalancer:ApplicationLoadBalancer";

const DEFAULT_SSL_POLICY: &str = "ELBSecurityPolicy-2016-08";

/// Target group health check
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthCheck {
    pub enabled: bool,
    pub path: String,
    pub protocol: String,
    pub port: String,
    pub interval: u32,
    pub timeout: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub matcher: String,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/".to_string(),
            protocol: "HTTP".to_string(),
            port: "traffic-port".to_string(),
            interval: 30,
            timeout: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
            matcher: "200".to_string(),
        }
    }
}

/// Session stickiness, only applied when enabled
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Stickiness {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub cookie_duration: u32,
}

impl Default for Stickiness {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: "lb_cookie".to_string(),
            cookie_duration: 86400,
        }
    }
}

/// Arguments of [`TargetGroup::build`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetGroupArgs {
    pub vpc_id: Option<Output>,
    pub port: u16,
    pub protocol: String,
    pub target_type: String,
    pub health_check: HealthCheck,
    pub deregistration_delay: u32,
    pub stickiness: Stickiness,
    pub tags: Tags,
}

impl Default for TargetGroupArgs {
    fn default() -> Self {
        Self {
            vpc_id: None,
            port: 80,
            protocol: "HTTP".to_string(),
            target_type: "instance".to_string(),
            health_check: HealthCheck::default(),
            deregistration_delay: 300,
            stickiness: Stickiness::default(),
            tags: Tags::new(),
        }
    }
}

/// A target group for an application load balancer
#[derive(Debug, Clone)]
pub struct TargetGroup {
    pub component: ResourceRef,
    pub target_group: ResourceRef,
}

impl TargetGroup {
    pub fn build(stack: &mut Stack, name: &str, args: TargetGroupArgs) -> Result<Self> {
        let vpc_id = args.vpc_id.ok_or_else(|| AwsError::missing("vpc_id"))?;

        let tg_name = format!("{}-tg", name);
        let check = &args.health_check;
        let mut props = Map::new();
        props.insert("name".into(), json!(tg_name));
        props.insert("port".into(), json!(args.port));
        props.insert("protocol".into(), json!(args.protocol));
        props.insert("target_type".into(), json!(args.target_type));
        props.insert("vpc_id".into(), vpc_id.to_value());
        props.insert("deregistration_delay".into(), json!(args.deregistration_delay));
        props.insert(
            "health_check".into(),
            json!({
                "enabled": check.enabled,
                "path": check.path,
                "protocol": check.protocol,
                "port": check.port,
                "interval": check.interval,
                "timeout": check.timeout,
                "healthy_threshold": check.healthy_threshold,
                "unhealthy_threshold": check.unhealthy_threshold,
                "matcher": check.matcher,
            }),
        );
        if args.stickiness.enabled {
            props.insert(
                "stickiness".into(),
                json!({
                    "enabled": true,
                    "type": args.stickiness.kind,
                    "cookie_duration": args.stickiness.cookie_duration,
                }),
            );
        }
        props.insert("tags".into(), tags_with_name(&args.tags, name));

        let component = stack.component(TARGET_GROUP_TYPE, name, None)?;
        let target_group = stack
            .resource("target-group", &tg_name, Value::Object(props))
            .parent(&component)
            .create()?;

        stack.register_outputs(
            &component,
            json!({
                "target_group_id": target_group.id(),
                "target_group_arn": target_group.arn(),
                "target_group_name": target_group.attr("name"),
            }),
        )?;

        info!(target_group = name, port = args.port, "Declared target group");
        Ok(Self {
            component,
            target_group,
        })
    }

    pub fn id(&self) -> Output {
        self.target_group.id()
    }

    pub fn arn(&self) -> Output {
        self.target_group.arn()
    }

    pub fn name(&self) -> Output {
        self.target_group.attr("name")
    }
}

/// Listener protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListenerProtocol {
    #[default]
    Http,
    Https,
}

impl ListenerProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerProtocol::Http => "HTTP",
            ListenerProtocol::Https => "HTTPS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    pub protocol: String,
    pub port: String,
    pub status_code: String,
    pub host: String,
    pub path: String,
    pub query: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            protocol: "HTTPS".to_string(),
            port: "443".to_string(),
            status_code: "HTTP_301".to_string(),
            host: "#{host}".to_string(),
            path: "/#{path}".to_string(),
            query: "#{query}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FixedResponseConfig {
    pub content_type: String,
    pub message_body: String,
    pub status_code: String,
}

impl Default for FixedResponseConfig {
    fn default() -> Self {
        Self {
            content_type: "text/plain".to_string(),
            message_body: "OK".to_string(),
            status_code: "200".to_string(),
        }
    }
}

/// Default action of a listener
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerAction {
    Forward { target_group_arn: Output },
    Redirect(RedirectConfig),
    FixedResponse(FixedResponseConfig),
}

impl ListenerAction {
    pub fn forward(target_group_arn: Output) -> Self {
        ListenerAction::Forward { target_group_arn }
    }

    pub fn action_type(&self) -> &'static str {
        match self {
            ListenerAction::Forward { .. } => "forward",
            ListenerAction::Redirect(_) => "redirect",
            ListenerAction::FixedResponse(_) => "fixed-response",
        }
    }

    fn to_value(&self) -> Value {
        match self {
            ListenerAction::Forward { target_group_arn } => json!({
                "type": "forward",
                "target_group_arn": target_group_arn,
            }),
            ListenerAction::Redirect(redirect) => json!({
                "type": "redirect",
                "redirect": {
                    "protocol": redirect.protocol,
                    "port": redirect.port,
                    "status_code": redirect.status_code,
                    "host": redirect.host,
                    "path": redirect.path,
                    "query": redirect.query,
                },
            }),
            ListenerAction::FixedResponse(response) => json!({
                "type": "fixed-response",
                "fixed_response": {
                    "content_type": response.content_type,
                    "message_body": response.message_body,
                    "status_code": response.status_code,
                },
            }),
        }
    }
}

/// Loosely typed default action as found in configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListenerActionConfig {
    /// `forward` when absent
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub target_group_arn: Option<Output>,
    pub redirect: Option<RedirectConfig>,
    pub fixed_response: Option<FixedResponseConfig>,
}

/// Loosely typed listener record as found in configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub port: Option<u16>,
    pub protocol: ListenerProtocol,
    pub certificate_arn: Option<Output>,
    pub ssl_policy: Option<String>,
    pub default_action: Option<ListenerActionConfig>,
}

impl ListenerConfig {
    /// Plain HTTP listener forwarding to a target group
    pub fn http_forward(port: u16, target_group_arn: Output) -> Self {
        Self {
            port: Some(port),
            default_action: Some(ListenerActionConfig {
                kind: Some("forward".to_string()),
                target_group_arn: Some(target_group_arn),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// A validated listener
#[derive(Debug, Clone, PartialEq)]
pub struct Listener {
    pub port: u16,
    pub protocol: ListenerProtocol,
    /// Certificate ARN and SSL policy, HTTPS only
    pub tls: Option<(Output, String)>,
    pub default_action: ListenerAction,
}

impl Listener {
    /// Check the `idx`-th listener record
    pub fn from_config(idx: usize, config: ListenerConfig) -> Result<Self> {
        let port = config
            .port
            .filter(|p| *p != 0)
            .ok_or_else(|| AwsError::invalid(format!("Listener {}: port must be provided", idx)))?;
        let action = config.default_action.ok_or_else(|| {
            AwsError::invalid(format!("Listener {}: default_action must be provided", idx))
        })?;

        let default_action = match action.kind.as_deref().unwrap_or("forward") {
            "forward" => {
                let target_group_arn = action.target_group_arn.ok_or_else(|| {
                    AwsError::invalid(format!(
                        "Listener {}: target_group_arn required for forward action",
                        idx
                    ))
                })?;
                ListenerAction::Forward { target_group_arn }
            }
            "redirect" => ListenerAction::Redirect(action.redirect.unwrap_or_default()),
            "fixed-response" => {
                ListenerAction::FixedResponse(action.fixed_response.unwrap_or_default())
            }
            other => {
                return Err(AwsError::invalid(format!(
                    "Listener {}: unknown action type {}",
                    idx, other
                )));
            }
        };

        let tls = match config.protocol {
            ListenerProtocol::Https => {
                let certificate_arn = config.certificate_arn.ok_or_else(|| {
                    AwsError::invalid(format!(
                        "Listener {}: certificate_arn required for HTTPS protocol",
                        idx
                    ))
                })?;
                let policy = config
                    .ssl_policy
                    .unwrap_or_else(|| DEFAULT_SSL_POLICY.to_string());
                Some((certificate_arn, policy))
            }
            ListenerProtocol::Http => None,
        };

        Ok(Self {
            port,
            protocol: config.protocol,
            tls,
            default_action,
        })
    }
}

/// Arguments of [`ApplicationLoadBalancer::build`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationLoadBalancerArgs {
    pub subnet_ids: Vec<Output>,
    pub security_group_ids: Vec<Output>,
    pub internal: bool,
    pub enable_deletion_protection: bool,
    pub enable_http2: bool,
    pub enable_cross_zone_load_balancing: bool,
    pub idle_timeout: u32,
    pub listeners: Vec<ListenerConfig>,
    pub tags: Tags,
}

impl Default for ApplicationLoadBalancerArgs {
    fn default() -> Self {
        Self {
            subnet_ids: Vec::new(),
            security_group_ids: Vec::new(),
            internal: false,
            enable_deletion_protection: false,
            enable_http2: true,
            enable_cross_zone_load_balancing: true,
            idle_timeout: 60,
            listeners: Vec::new(),
            tags: Tags::new(),
        }
    }
}

/// An application load balancer and its listeners
#[derive(Debug, Clone)]
pub struct ApplicationLoadBalancer {
    pub component: ResourceRef,
    pub load_balancer: ResourceRef,
    pub listeners: Vec<ResourceRef>,
}

impl ApplicationLoadBalancer {
    pub fn build(stack: &mut Stack, name: &str, args: ApplicationLoadBalancerArgs) -> Result<Self> {
        if args.subnet_ids.len() < 2 {
            return Err(AwsError::invalid(
                "At least 2 subnet_ids must be provided in different AZs",
            ));
        }
        if args.security_group_ids.is_empty() {
            return Err(AwsError::missing("security_group_ids"));
        }
        if args.listeners.is_empty() {
            return Err(AwsError::invalid(
                "At least one listener configuration must be provided",
            ));
        }
        let listeners = args
            .listeners
            .into_iter()
            .enumerate()
            .map(|(idx, config)| Listener::from_config(idx, config))
            .collect::<Result<Vec<_>>>()?;
        let mut ports = BTreeSet::new();
        for (idx, listener) in listeners.iter().enumerate() {
            if !ports.insert(listener.port) {
                return Err(AwsError::invalid(format!(
                    "Listener {}: duplicate port {}",
                    idx, listener.port
                )));
            }
        }

        let alb_name = format!("{}-alb", name);
        let component = stack.component(APPLICATION_LOAD_BALANCER_TYPE, name, None)?;
        let load_balancer = stack
            .resource(
                "load-balancer",
                &alb_name,
                json!({
                    "name": alb_name,
                    "internal": args.internal,
                    "load_balancer_type": "application",
                    "security_groups": args.security_group_ids,
                    "subnets": args.subnet_ids,
                    "enable_deletion_protection": args.enable_deletion_protection,
                    "enable_http2": args.enable_http2,
                    "enable_cross_zone_load_balancing": args.enable_cross_zone_load_balancing,
                    "idle_timeout": args.idle_timeout,
                    "tags": tags_with_name(&args.tags, name),
                }),
            )
            .parent(&component)
            .create()?;

        let mut outputs = Map::new();
        outputs.insert("alb_id".into(), load_balancer.id().to_value());
        outputs.insert("alb_arn".into(), load_balancer.arn().to_value());
        outputs.insert("alb_dns_name".into(), load_balancer.attr("dns_name").to_value());
        outputs.insert("alb_zone_id".into(), load_balancer.attr("zone_id").to_value());

        let mut declared = Vec::with_capacity(listeners.len());
        for (idx, listener) in listeners.iter().enumerate() {
            let mut props = Map::new();
            props.insert("load_balancer_arn".into(), load_balancer.arn().to_value());
            props.insert("port".into(), json!(listener.port));
            props.insert("protocol".into(), json!(listener.protocol.as_str()));
            props.insert(
                "default_actions".into(),
                json!([listener.default_action.to_value()]),
            );
            if let Some((certificate_arn, ssl_policy)) = &listener.tls {
                props.insert("certificate_arn".into(), certificate_arn.to_value());
                props.insert("ssl_policy".into(), json!(ssl_policy));
            }

            let resource = stack
                .resource(
                    "listener",
                    format!("{}-listener-{}", name, listener.port),
                    Value::Object(props),
                )
                .parent(&component)
                .create()?;
            debug!(
                alb = name,
                port = listener.port,
                action = listener.default_action.action_type(),
                "Declared listener"
            );
            outputs.insert(format!("listener_{}_arn", idx), resource.arn().to_value());
            declared.push(resource);
        }

        stack.register_outputs(&component, Value::Object(outputs))?;

        info!(alb = name, listeners = declared.len(), "Declared application load balancer");
        Ok(Self {
            component,
            load_balancer,
            listeners: declared,
        })
    }

    pub fn arn(&self) -> Output {
        self.load_balancer.arn()
    }

    pub fn dns_name(&self) -> Output {
        self.load_balancer.attr("dns_name")
    }

    pub fn zone_id(&self) -> Output {
        self.load_balancer.attr("zone_id")
    }
}
