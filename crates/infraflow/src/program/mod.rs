//! Top-level compositions
//!
//! A stack names its program with `program "<name>"`; the program reads the
//! stack config and declares every component into a fresh [`Stack`].

mod web_asg;
mod web_instance;

use anyhow::{Result, bail};
use infraflow_aws::{
    RuleSource, SecurityGroup, SecurityGroupArgs, SecurityRule, StaticInventory, Tags,
    VpcNetwork, VpcNetworkArgs, WebSecurityGroupArgs, web_security_group,
};
use infraflow_cloud::{CloudInventory, Output, Stack};
use infraflow_core::{StackConfig, StackDefinition};
use tracing::{info, warn};

pub const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PROGRAM: &str = "web-asg";
const DEFAULT_CIDR_BLOCK: &str = "10.0.0.0/16";
const ANYWHERE: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    /// Load-balanced auto scaling group behind an ALB
    WebAsg,
    /// One public web server
    WebInstance,
}

impl Program {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "web-asg" => Ok(Program::WebAsg),
            "web-instance" => Ok(Program::WebInstance),
            other => bail!(
                "Unknown program '{}', expected one of: web-asg, web-instance",
                other
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Program::WebAsg => "web-asg",
            Program::WebInstance => "web-instance",
        }
    }
}

/// Settings every program reads
#[derive(Debug, Clone)]
pub struct Settings {
    pub branch: String,
    pub environment: String,
    pub key_name: Option<String>,
    pub region: String,
    pub zones: Option<Vec<String>>,
    pub allow_ssh: bool,
    pub ssh_cidr_blocks: Vec<String>,
    pub http_cidr_blocks: Vec<String>,
    pub https_cidr_blocks: Vec<String>,
}

impl Settings {
    pub fn from_config(config: &StackConfig) -> Result<Self> {
        let project = config.project_namespace();
        let aws = config.namespace("aws");
        let security = config.namespace("security");
        let anywhere = || vec![ANYWHERE.to_string()];

        Ok(Self {
            branch: project.require_str("branch")?.to_string(),
            environment: project.require_str("env")?.to_string(),
            key_name: project.get_str("keyName")?.map(str::to_string),
            region: aws
                .get_str("region")?
                .unwrap_or(DEFAULT_REGION)
                .to_string(),
            zones: aws.get_str_list("zones")?,
            allow_ssh: security.get_bool("allowSsh")?.unwrap_or(true),
            ssh_cidr_blocks: security
                .get_str_list("sshCidrBlocks")?
                .unwrap_or_else(anywhere),
            http_cidr_blocks: security
                .get_str_list("httpCidrBlocks")?
                .unwrap_or_else(anywhere),
            https_cidr_blocks: security
                .get_str_list("httpsCidrBlocks")?
                .unwrap_or_else(anywhere),
        })
    }

    /// `<branch>-<env>`, the prefix of every component name
    pub fn prefix(&self) -> String {
        format!("{}-{}", self.branch, self.environment)
    }

    pub fn tags(&self) -> Tags {
        Tags::from([
            ("Environment".to_string(), self.environment.clone()),
            ("Project".to_string(), self.branch.clone()),
            ("ManagedBy".to_string(), "infraflow".to_string()),
        ])
    }

    /// Common tags plus extra pairs
    pub fn tags_with<const N: usize>(&self, extra: [(&str, &str); N]) -> Tags {
        let mut tags = self.tags();
        for (key, value) in extra {
            tags.insert(key.to_string(), value.to_string());
        }
        tags
    }

    pub fn inventory(&self) -> StaticInventory {
        let inventory = StaticInventory::new(&self.region);
        match &self.zones {
            Some(zones) => inventory.with_zones(zones.clone()),
            None => inventory,
        }
    }
}

/// A program's declared graph
#[derive(Debug)]
pub struct Deployment {
    pub program: Program,
    pub region: String,
    pub stack: Stack,
}

/// Run the stack's program
pub fn synthesize(project: &str, definition: &StackDefinition) -> Result<Deployment> {
    let program = Program::from_name(definition.program.as_deref().unwrap_or(DEFAULT_PROGRAM))?;
    let settings = Settings::from_config(&definition.config)?;
    let inventory = settings.inventory();

    let mut stack = Stack::new(project, &definition.name);
    match program {
        Program::WebAsg => web_asg::build(&mut stack, &inventory, &settings, &definition.config)?,
        Program::WebInstance => {
            web_instance::build(&mut stack, &inventory, &settings, &definition.config)?
        }
    }

    info!(
        program = program.name(),
        stack = %definition.name,
        resources = stack.len(),
        exports = stack.exports().len(),
        "Program declared"
    );
    Ok(Deployment {
        program,
        region: settings.region,
        stack,
    })
}

/// Network and the two security groups both programs start from
struct WebTier {
    network: VpcNetwork,
    web_sg: SecurityGroup,
    internal_sg: SecurityGroup,
}

impl WebTier {
    fn build(
        stack: &mut Stack,
        inventory: &dyn CloudInventory,
        settings: &Settings,
        config: &StackConfig,
        nat_allowed: bool,
    ) -> Result<Self> {
        let vpc = config.namespace("vpc");
        let prefix = settings.prefix();

        let enable_nat_gateway = vpc.get_bool("enableNatGateway")?.unwrap_or(false);
        if enable_nat_gateway && !nat_allowed {
            warn!("vpc:enableNatGateway is ignored by this program");
        }
        let network = VpcNetwork::build(
            stack,
            inventory,
            &format!("{}-network", prefix),
            VpcNetworkArgs {
                cidr_block: Some(
                    vpc.get_str("cidrBlock")?
                        .unwrap_or(DEFAULT_CIDR_BLOCK)
                        .to_string(),
                ),
                availability_zones: settings.zones.clone(),
                enable_nat_gateway: enable_nat_gateway && nat_allowed,
                enable_dns_hostnames: vpc.get_bool("enableDnsHostnames")?.unwrap_or(true),
                enable_dns_support: vpc.get_bool("enableDnsSupport")?.unwrap_or(true),
                tags: settings.tags(),
                ..Default::default()
            },
        )?;

        let web_sg = web_security_group(
            stack,
            &format!("{}-web-sg", prefix),
            WebSecurityGroupArgs {
                vpc_id: Some(network.vpc_id()),
                allow_ssh: settings.allow_ssh,
                ssh_cidr_blocks: settings.ssh_cidr_blocks.clone(),
                http_source: RuleSource::cidrs(settings.http_cidr_blocks.clone()),
                https_source: RuleSource::cidrs(settings.https_cidr_blocks.clone()),
                description: None,
                tags: settings.tags_with([("Tier", "web")]),
            },
        )?;

        let internal_sg = SecurityGroup::build(
            stack,
            &format!("{}-internal-sg", prefix),
            SecurityGroupArgs {
                vpc_id: Some(network.vpc_id()),
                description: Some("Security group for internal communication".to_string()),
                ingress_rules: vec![SecurityRule::all_traffic(
                    RuleSource::cidrs([network.cidr_block.to_string()]),
                    "Allow all traffic from VPC",
                )],
                egress_rules: Vec::new(),
                tags: settings.tags_with([("Purpose", "internal-communication")]),
            },
        )?;

        Ok(Self {
            network,
            web_sg,
            internal_sg,
        })
    }

    fn security_group_ids(&self) -> Vec<Output> {
        vec![self.web_sg.id(), self.internal_sg.id()]
    }

    fn export(&self, stack: &mut Stack) {
        let network = &self.network;
        stack.export("vpc_id", network.vpc_id());
        stack.export("vpc_cidr", network.vpc.attr("cidr_block"));
        stack.export("internet_gateway_id", network.internet_gateway.id());
        stack.export("public_subnet_ids", network.public_subnet_ids());
        stack.export("private_subnet_ids", network.private_subnet_ids());
        stack.export("web_security_group_id", self.web_sg.id());
        stack.export("internal_security_group_id", self.internal_sg.id());
        if !network.nat_gateways.is_empty() {
            stack.export("nat_gateway_ids", network.nat_gateway_ids());
            stack.export("nat_gateway_ips", network.nat_eip_addresses());
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use infraflow_core::parse_stack_string;

    /// Stack definition parsed from a KDL snippet
    pub(crate) fn definition(kdl: &str) -> StackDefinition {
        let project = parse_stack_string(kdl, "test".to_string()).unwrap();
        project.select_stack(None).unwrap().clone()
    }

    #[test]
    fn test_program_names() {
        assert_eq!(Program::from_name("web-asg").unwrap(), Program::WebAsg);
        assert_eq!(
            Program::from_name("web-instance").unwrap().name(),
            "web-instance"
        );
        let err = Program::from_name("lambda").unwrap_err();
        assert!(err.to_string().contains("Unknown program 'lambda'"));
    }

    #[test]
    fn test_settings_defaults() {
        let def = definition(r#"stack "dev" { config { branch "main"; env "dev" } }"#);
        let settings = Settings::from_config(&def.config).unwrap();
        assert_eq!(settings.prefix(), "main-dev");
        assert_eq!(settings.region, DEFAULT_REGION);
        assert_eq!(settings.key_name, None);
        assert!(settings.allow_ssh);
        assert_eq!(settings.ssh_cidr_blocks, vec!["0.0.0.0/0"]);
        assert_eq!(settings.tags()["ManagedBy"], "infraflow");
        assert_eq!(settings.tags_with([("Tier", "web")])["Tier"], "web");
        assert_eq!(
            settings.inventory().availability_zones().unwrap(),
            vec!["us-east-1a", "us-east-1b", "us-east-1c"]
        );
    }

    #[test]
    fn test_settings_from_namespaces() {
        let def = definition(
            r#"
stack "dev" {
    config { branch "feature-x"; env "qa"; keyName "deployer" }
    config "aws" { region "eu-west-1"; zones "eu-west-1b" "eu-west-1c" }
    config "security" { sshCidrBlocks "198.51.100.7/32"; allowSsh #false }
}
"#,
        );
        let settings = Settings::from_config(&def.config).unwrap();
        assert_eq!(settings.key_name.as_deref(), Some("deployer"));
        assert_eq!(settings.region, "eu-west-1");
        assert!(!settings.allow_ssh);
        assert_eq!(settings.ssh_cidr_blocks, vec!["198.51.100.7/32"]);
        let inventory = settings.inventory();
        assert_eq!(inventory.region(), "eu-west-1");
        assert_eq!(
            inventory.availability_zones().unwrap(),
            vec!["eu-west-1b", "eu-west-1c"]
        );
    }

    #[test]
    fn test_branch_and_env_are_required() {
        let def = definition(r#"stack "dev" { config { env "dev" } }"#);
        let err = Settings::from_config(&def.config).unwrap_err();
        assert!(err.to_string().contains("test:branch must be set"));
    }

    #[test]
    fn test_config_type_mismatch_is_fatal() {
        let def = definition(r#"stack "dev" { config { branch "x"; env 3 } }"#);
        let err = Settings::from_config(&def.config).unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn test_synthesize_defaults_to_web_asg() {
        let def = definition(r#"stack "dev" { config { branch "main"; env "dev" } }"#);
        let deployment = synthesize("test", &def).unwrap();
        assert_eq!(deployment.program, Program::WebAsg);
        assert_eq!(deployment.stack.name(), "dev");
        assert!(deployment.stack.exports().contains_key("application_url"));
    }
}
