//! Security groups and rule presets
//!
//! [`SecurityGroup::build`] is the single rule composer. The presets are
//! plain functions that assemble a [`SecurityGroupArgs`] and delegate to it.

use crate::error::{AwsError, Result};
use crate::{Tags, tags_with_name};
use infraflow_cloud::{Output, ResourceRef, Stack};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

pub const SECURITY_GROUP_TYPE: &str = "infraflow:security:SecurityGroup";

const ANYWHERE: &str = "0.0.0.0/0";
const PRIVATE_NETWORK: &str = "10.0.0.0/8";

/// IP protocol of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "udp")]
    Udp,
    #[serde(rename = "icmp")]
    Icmp,
    #[serde(rename = "-1", alias = "all")]
    All,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::All => "-1",
        }
    }
}

/// Where traffic of a rule comes from (ingress) or goes to (egress)
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSource {
    Cidr {
        cidr_blocks: Vec<String>,
        ipv6_cidr_blocks: Vec<String>,
    },
    SecurityGroup(Output),
}

impl RuleSource {
    pub fn cidrs<I, S>(blocks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RuleSource::Cidr {
            cidr_blocks: blocks.into_iter().map(Into::into).collect(),
            ipv6_cidr_blocks: Vec::new(),
        }
    }

    pub fn anywhere() -> Self {
        RuleSource::cidrs([ANYWHERE])
    }

    pub fn group(id: Output) -> Self {
        RuleSource::SecurityGroup(id)
    }

    /// A CIDR source with no blocks matches nothing
    pub fn is_empty(&self) -> bool {
        matches!(
            self,
            RuleSource::Cidr { cidr_blocks, ipv6_cidr_blocks }
                if cidr_blocks.is_empty() && ipv6_cidr_blocks.is_empty()
        )
    }

    fn is_open_to_world(&self) -> bool {
        matches!(self, RuleSource::Cidr { cidr_blocks, .. } if cidr_blocks.iter().any(|c| c == ANYWHERE))
    }
}

/// A single ingress or egress rule
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RuleConfig")]
pub struct SecurityRule {
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub source: RuleSource,
    pub description: String,
}

impl SecurityRule {
    /// TCP rule on a single port
    pub fn tcp(port: u16, source: RuleSource, description: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
            source,
            description: description.into(),
        }
    }

    /// Every protocol and port
    pub fn all_traffic(source: RuleSource, description: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::All,
            from_port: 0,
            to_port: 0,
            source,
            description: description.into(),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        let (cidr_blocks, ipv6_cidr_blocks, security_groups) = match &self.source {
            RuleSource::Cidr {
                cidr_blocks,
                ipv6_cidr_blocks,
            } => (cidr_blocks.clone(), ipv6_cidr_blocks.clone(), Vec::new()),
            RuleSource::SecurityGroup(id) => (Vec::new(), Vec::new(), vec![id.clone()]),
        };
        json!({
            "protocol": self.protocol.as_str(),
            "from_port": self.from_port,
            "to_port": self.to_port,
            "cidr_blocks": cidr_blocks,
            "ipv6_cidr_blocks": ipv6_cidr_blocks,
            "security_groups": security_groups,
            "description": self.description,
        })
    }
}

/// Loosely typed rule record as found in configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub protocol: Option<Protocol>,
    pub from_port: Option<u16>,
    pub to_port: Option<u16>,
    pub cidr_blocks: Vec<String>,
    pub ipv6_cidr_blocks: Vec<String>,
    pub source_security_group_id: Option<Output>,
    pub description: Option<String>,
}

impl TryFrom<RuleConfig> for SecurityRule {
    type Error = AwsError;

    fn try_from(config: RuleConfig) -> Result<Self> {
        let source = match config.source_security_group_id {
            Some(_) if !config.cidr_blocks.is_empty() || !config.ipv6_cidr_blocks.is_empty() => {
                return Err(AwsError::invalid(
                    "a rule cannot name both source_security_group_id and cidr blocks",
                ));
            }
            Some(group) => RuleSource::SecurityGroup(group),
            None => RuleSource::Cidr {
                cidr_blocks: config.cidr_blocks,
                ipv6_cidr_blocks: config.ipv6_cidr_blocks,
            },
        };
        Ok(SecurityRule {
            protocol: config.protocol.unwrap_or_default(),
            from_port: config.from_port.unwrap_or(0),
            to_port: config.to_port.unwrap_or(0),
            source,
            description: config.description.unwrap_or_default(),
        })
    }
}

/// Arguments of [`SecurityGroup::build`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecurityGroupArgs {
    pub vpc_id: Option<Output>,
    pub description: Option<String>,
    pub ingress_rules: Vec<SecurityRule>,
    /// Defaults to a single allow-all rule when empty
    pub egress_rules: Vec<SecurityRule>,
    pub tags: Tags,
}

/// A declared security group
#[derive(Debug, Clone)]
pub struct SecurityGroup {
    pub component: ResourceRef,
    pub security_group: ResourceRef,
}

impl SecurityGroup {
    pub fn build(stack: &mut Stack, name: &str, args: SecurityGroupArgs) -> Result<Self> {
        let vpc_id = args.vpc_id.ok_or_else(|| AwsError::missing("vpc_id"))?;
        let description = args
            .description
            .unwrap_or_else(|| format!("Security group for {}", name));
        let egress_rules = if args.egress_rules.is_empty() {
            vec![default_egress()]
        } else {
            args.egress_rules
        };

        for rule in &args.ingress_rules {
            if rule.source.is_open_to_world() && rule.from_port <= 22 && rule.to_port >= 22 {
                warn!(group = name, "SSH is reachable from {}", ANYWHERE);
            }
        }

        let component = stack.component(SECURITY_GROUP_TYPE, name, None)?;
        let security_group = stack
            .resource(
                "security-group",
                format!("{}-sg", name),
                json!({
                    "vpc_id": vpc_id,
                    "description": description,
                    "ingress": args.ingress_rules.iter().map(SecurityRule::to_value).collect::<Vec<_>>(),
                    "egress": egress_rules.iter().map(SecurityRule::to_value).collect::<Vec<_>>(),
                    "tags": tags_with_name(&args.tags, name),
                }),
            )
            .parent(&component)
            .create()?;

        stack.register_outputs(
            &component,
            json!({
                "security_group_id": security_group.id(),
                "security_group_name": security_group.attr("name"),
            }),
        )?;

        info!(
            group = name,
            ingress = args.ingress_rules.len(),
            egress = egress_rules.len(),
            "Declared security group"
        );
        Ok(Self {
            component,
            security_group,
        })
    }

    pub fn id(&self) -> Output {
        self.security_group.id()
    }
}

/// Allow every protocol to anywhere
pub fn default_egress() -> SecurityRule {
    SecurityRule::all_traffic(RuleSource::anywhere(), "Allow all outbound traffic")
}

/// Default port of a database engine; unknown engines fall back to MySQL
pub fn database_port(database_type: &str) -> u16 {
    match database_type.to_ascii_lowercase().as_str() {
        "mysql" | "aurora-mysql" => 3306,
        "postgres" | "postgresql" | "aurora-postgres" => 5432,
        "redis" => 6379,
        "mongodb" => 27017,
        "mssql" => 1433,
        "oracle" => 1521,
        _ => 3306,
    }
}

fn require_source(source: Option<RuleSource>) -> Result<RuleSource> {
    source.filter(|s| !s.is_empty()).ok_or_else(|| {
        AwsError::invalid("Either source_security_group_id or source_cidr_blocks must be provided")
    })
}

/// Web server preset: HTTP, HTTPS and optional SSH
#[derive(Debug, Clone)]
pub struct WebSecurityGroupArgs {
    pub vpc_id: Option<Output>,
    pub allow_ssh: bool,
    pub ssh_cidr_blocks: Vec<String>,
    pub http_source: RuleSource,
    pub https_source: RuleSource,
    pub description: Option<String>,
    pub tags: Tags,
}

impl Default for WebSecurityGroupArgs {
    fn default() -> Self {
        Self {
            vpc_id: None,
            allow_ssh: true,
            ssh_cidr_blocks: vec![ANYWHERE.to_string()],
            http_source: RuleSource::anywhere(),
            https_source: RuleSource::anywhere(),
            description: None,
            tags: Tags::new(),
        }
    }
}

pub fn web_security_group(
    stack: &mut Stack,
    name: &str,
    args: WebSecurityGroupArgs,
) -> Result<SecurityGroup> {
    let mut ingress_rules = vec![
        SecurityRule::tcp(80, args.http_source, "Allow HTTP"),
        SecurityRule::tcp(443, args.https_source, "Allow HTTPS"),
    ];
    if args.allow_ssh {
        ingress_rules.push(SecurityRule::tcp(
            22,
            RuleSource::cidrs(args.ssh_cidr_blocks),
            "Allow SSH",
        ));
    }
    SecurityGroup::build(
        stack,
        name,
        SecurityGroupArgs {
            vpc_id: args.vpc_id,
            description: Some(
                args.description
                    .unwrap_or_else(|| "Security group for web servers".to_string()),
            ),
            ingress_rules,
            egress_rules: Vec::new(),
            tags: args.tags,
        },
    )
}

/// Database preset: one engine port from a required source
#[derive(Debug, Clone)]
pub struct DatabaseSecurityGroupArgs {
    pub vpc_id: Option<Output>,
    pub database_type: String,
    pub source: Option<RuleSource>,
    pub description: Option<String>,
    pub tags: Tags,
}

impl Default for DatabaseSecurityGroupArgs {
    fn default() -> Self {
        Self {
            vpc_id: None,
            database_type: "mysql".to_string(),
            source: None,
            description: None,
            tags: Tags::new(),
        }
    }
}

pub fn database_security_group(
    stack: &mut Stack,
    name: &str,
    args: DatabaseSecurityGroupArgs,
) -> Result<SecurityGroup> {
    let source = require_source(args.source)?;
    let port = database_port(&args.database_type);
    SecurityGroup::build(
        stack,
        name,
        SecurityGroupArgs {
            vpc_id: args.vpc_id,
            description: Some(args.description.unwrap_or_else(|| {
                format!("Security group for {} database", args.database_type)
            })),
            ingress_rules: vec![SecurityRule::tcp(
                port,
                source,
                format!("Allow {} access", args.database_type),
            )],
            egress_rules: Vec::new(),
            tags: args.tags,
        },
    )
}

/// Load balancer preset: HTTP and HTTPS from caller CIDRs
#[derive(Debug, Clone, Default)]
pub struct LoadBalancerSecurityGroupArgs {
    pub vpc_id: Option<Output>,
    pub internal: bool,
    /// Defaults to anywhere for external balancers; required for internal ones
    pub cidr_blocks: Option<Vec<String>>,
    pub description: Option<String>,
    pub tags: Tags,
}

pub fn load_balancer_security_group(
    stack: &mut Stack,
    name: &str,
    args: LoadBalancerSecurityGroupArgs,
) -> Result<SecurityGroup> {
    let cidr_blocks = match args.cidr_blocks {
        Some(blocks) if !blocks.is_empty() => blocks,
        _ if args.internal => {
            return Err(AwsError::invalid(
                "cidr_blocks must be provided for internal load balancers",
            ));
        }
        _ => vec![ANYWHERE.to_string()],
    };
    let lb_type = if args.internal { "internal" } else { "external" };
    SecurityGroup::build(
        stack,
        name,
        SecurityGroupArgs {
            vpc_id: args.vpc_id,
            description: Some(
                args.description
                    .unwrap_or_else(|| format!("Security group for {} load balancer", lb_type)),
            ),
            ingress_rules: vec![
                SecurityRule::tcp(80, RuleSource::cidrs(cidr_blocks.clone()), "Allow HTTP"),
                SecurityRule::tcp(443, RuleSource::cidrs(cidr_blocks), "Allow HTTPS"),
            ],
            egress_rules: Vec::new(),
            tags: args.tags,
        },
    )
}

/// Application server preset: the app port from a required source plus SSH
#[derive(Debug, Clone)]
pub struct ApplicationSecurityGroupArgs {
    pub vpc_id: Option<Output>,
    pub app_port: Option<u16>,
    pub source: Option<RuleSource>,
    pub allow_ssh: bool,
    pub ssh_cidr_blocks: Vec<String>,
    pub description: Option<String>,
    pub tags: Tags,
}

impl Default for ApplicationSecurityGroupArgs {
    fn default() -> Self {
        Self {
            vpc_id: None,
            app_port: None,
            source: None,
            allow_ssh: true,
            ssh_cidr_blocks: vec![PRIVATE_NETWORK.to_string()],
            description: None,
            tags: Tags::new(),
        }
    }
}

pub fn application_security_group(
    stack: &mut Stack,
    name: &str,
    args: ApplicationSecurityGroupArgs,
) -> Result<SecurityGroup> {
    let app_port = args
        .app_port
        .filter(|p| *p != 0)
        .ok_or_else(|| AwsError::missing("app_port"))?;
    let source = require_source(args.source)?;

    let mut ingress_rules = vec![SecurityRule::tcp(
        app_port,
        source,
        format!("Allow application traffic on port {}", app_port),
    )];
    if args.allow_ssh {
        ingress_rules.push(SecurityRule::tcp(
            22,
            RuleSource::cidrs(args.ssh_cidr_blocks),
            "Allow SSH from private network",
        ));
    }
    SecurityGroup::build(
        stack,
        name,
        SecurityGroupArgs {
            vpc_id: args.vpc_id,
            description: Some(
                args.description
                    .unwrap_or_else(|| "Security group for application servers".to_string()),
            ),
            ingress_rules,
            egress_rules: Vec::new(),
            tags: args.tags,
        },
    )
}

/// The four groups of a classic three-tier layout
#[derive(Debug, Clone)]
pub struct TieredSecurityGroups {
    pub load_balancer: SecurityGroup,
    pub web: SecurityGroup,
    pub app: SecurityGroup,
    pub db: SecurityGroup,
}

/// Load balancer → web → application (8080) → PostgreSQL, each tier only
/// reachable from the one in front of it
pub fn create_tiered_security_groups(
    stack: &mut Stack,
    name: &str,
    vpc_id: Output,
    tags: &Tags,
) -> Result<TieredSecurityGroups> {
    let tier_tags = |tier: &str| {
        let mut t = tags.clone();
        t.insert("Tier".to_string(), tier.to_string());
        t
    };

    let load_balancer = load_balancer_security_group(
        stack,
        &format!("{}-alb", name),
        LoadBalancerSecurityGroupArgs {
            vpc_id: Some(vpc_id.clone()),
            internal: false,
            tags: tier_tags("load-balancer"),
            ..Default::default()
        },
    )?;

    let web = web_security_group(
        stack,
        &format!("{}-web", name),
        WebSecurityGroupArgs {
            vpc_id: Some(vpc_id.clone()),
            http_source: RuleSource::group(load_balancer.id()),
            https_source: RuleSource::group(load_balancer.id()),
            ssh_cidr_blocks: vec![PRIVATE_NETWORK.to_string()],
            tags: tier_tags("web"),
            ..Default::default()
        },
    )?;

    let app = application_security_group(
        stack,
        &format!("{}-app", name),
        ApplicationSecurityGroupArgs {
            vpc_id: Some(vpc_id.clone()),
            app_port: Some(8080),
            source: Some(RuleSource::group(web.id())),
            tags: tier_tags("application"),
            ..Default::default()
        },
    )?;

    let db = database_security_group(
        stack,
        &format!("{}-db", name),
        DatabaseSecurityGroupArgs {
            vpc_id: Some(vpc_id),
            database_type: "postgres".to_string(),
            source: Some(RuleSource::group(app.id())),
            tags: tier_tags("database"),
            ..Default::default()
        },
    )?;

    Ok(TieredSecurityGroups {
        load_balancer,
        web,
        app,
        db,
    })
}
