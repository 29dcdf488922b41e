//! VPC network topology
//!
//! Declares a VPC with one public and one private subnet per availability
//! zone, a shared public route table behind an internet gateway, and one
//! private route table per zone, optionally routed through a per-zone NAT
//! gateway.

use crate::cidr::{SubnetLayout, SubnetStrategy, parse_cidr, validate_layout};
use crate::error::{AwsError, Result};
use crate::{Tags, tags_with, tags_with_name};
use infraflow_cloud::{CloudInventory, Output, ResourceRef, Stack};
use ipnet::Ipv4Net;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

pub const VPC_NETWORK_TYPE: &str = "infraflow:network:VpcNetwork";

const DEFAULT_CIDR_BLOCK: &str = "10.0.0.0/16";
const DEFAULT_ZONE_COUNT: usize = 2;
const ANYWHERE: &str = "0.0.0.0/0";

/// Arguments of [`VpcNetwork::build`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VpcNetworkArgs {
    pub cidr_block: Option<String>,
    /// Zones to use; looked up from the inventory when absent
    pub availability_zones: Option<Vec<String>>,
    /// Number of zones taken from the inventory
    pub zone_count: usize,
    pub public_subnet_cidrs: Option<Vec<String>>,
    pub private_subnet_cidrs: Option<Vec<String>>,
    pub subnet_strategy: SubnetStrategy,
    pub enable_nat_gateway: bool,
    pub enable_dns_hostnames: bool,
    pub enable_dns_support: bool,
    pub enable_ipv6: bool,
    pub tags: Tags,
}

impl Default for VpcNetworkArgs {
    fn default() -> Self {
        Self {
            cidr_block: None,
            availability_zones: None,
            zone_count: DEFAULT_ZONE_COUNT,
            public_subnet_cidrs: None,
            private_subnet_cidrs: None,
            subnet_strategy: SubnetStrategy::default(),
            enable_nat_gateway: true,
            enable_dns_hostnames: true,
            enable_dns_support: true,
            enable_ipv6: false,
            tags: Tags::new(),
        }
    }
}

/// Handles to everything a network declares
#[derive(Debug, Clone)]
pub struct VpcNetwork {
    pub component: ResourceRef,
    pub vpc: ResourceRef,
    pub ipv6_association: Option<ResourceRef>,
    pub internet_gateway: ResourceRef,
    pub prefix_list: ResourceRef,
    pub public_subnets: Vec<ResourceRef>,
    pub private_subnets: Vec<ResourceRef>,
    pub public_route_table: ResourceRef,
    pub public_route: ResourceRef,
    pub public_route_table_associations: Vec<ResourceRef>,
    pub nat_eips: Vec<ResourceRef>,
    pub nat_gateways: Vec<ResourceRef>,
    pub private_route_tables: Vec<ResourceRef>,
    pub private_routes: Vec<ResourceRef>,
    pub private_route_table_associations: Vec<ResourceRef>,
    pub availability_zones: Vec<String>,
    pub cidr_block: Ipv4Net,
    pub public_subnet_cidrs: Vec<Ipv4Net>,
    pub private_subnet_cidrs: Vec<Ipv4Net>,
}

impl VpcNetwork {
    pub fn build(
        stack: &mut Stack,
        inventory: &dyn CloudInventory,
        name: &str,
        args: VpcNetworkArgs,
    ) -> Result<Self> {
        let cidr_block = parse_cidr(args.cidr_block.as_deref().unwrap_or(DEFAULT_CIDR_BLOCK))?;
        let availability_zones = resolve_zones(inventory, &args)?;
        let layout = resolve_layout(cidr_block, availability_zones.len(), &args)?;
        let tags = &args.tags;

        let component = stack.component(VPC_NETWORK_TYPE, name, None)?;

        let vpc_name = format!("{}-vpc", name);
        let vpc = stack
            .resource(
                "vpc",
                &vpc_name,
                json!({
                    "cidr_block": cidr_block.to_string(),
                    "enable_dns_hostnames": args.enable_dns_hostnames,
                    "enable_dns_support": args.enable_dns_support,
                    "tags": tags_with_name(tags, &vpc_name),
                }),
            )
            .parent(&component)
            .create()?;

        let ipv6_association = if args.enable_ipv6 {
            Some(
                stack
                    .resource(
                        "vpc-ipv6-cidr-block-association",
                        format!("{}-ipv6-cidr", name),
                        json!({
                            "vpc_id": vpc.id(),
                            "amazon_provided_ipv6_cidr_block": true,
                        }),
                    )
                    .parent(&vpc)
                    .create()?,
            )
        } else {
            None
        };

        let igw_name = format!("{}-igw", name);
        let internet_gateway = stack
            .resource(
                "internet-gateway",
                &igw_name,
                json!({"vpc_id": vpc.id(), "tags": tags_with_name(tags, &igw_name)}),
            )
            .parent(&vpc)
            .create()?;

        let prefix_list_name = format!("{}-prefix-list", name);
        let prefix_list = stack
            .resource(
                "managed-prefix-list",
                &prefix_list_name,
                json!({
                    "name": prefix_list_name,
                    "address_family": "IPv4",
                    "max_entries": 10,
                    "tags": tags_with_name(tags, &prefix_list_name),
                }),
            )
            .parent(&vpc)
            .create()?;

        let mut public_subnets = Vec::with_capacity(availability_zones.len());
        for (i, (zone, cidr)) in availability_zones.iter().zip(&layout.public).enumerate() {
            let subnet = stack
                .resource(
                    "subnet",
                    format!("{}-public-subnet-{}", name, i),
                    json!({
                        "vpc_id": vpc.id(),
                        "cidr_block": cidr.to_string(),
                        "availability_zone": zone,
                        "map_public_ip_on_launch": true,
                        "tags": tags_with(tags, [
                            ("Name", format!("{}-public-subnet-{}", name, zone)),
                            ("Type", "public".to_string()),
                        ]),
                    }),
                )
                .parent(&vpc)
                .create()?;
            public_subnets.push(subnet);
        }

        let mut private_subnets = Vec::with_capacity(availability_zones.len());
        for (i, (zone, cidr)) in availability_zones.iter().zip(&layout.private).enumerate() {
            let subnet = stack
                .resource(
                    "subnet",
                    format!("{}-private-subnet-{}", name, i),
                    json!({
                        "vpc_id": vpc.id(),
                        "cidr_block": cidr.to_string(),
                        "availability_zone": zone,
                        "map_public_ip_on_launch": false,
                        "tags": tags_with(tags, [
                            ("Name", format!("{}-private-subnet-{}", name, zone)),
                            ("Type", "private".to_string()),
                        ]),
                    }),
                )
                .parent(&vpc)
                .create()?;
            private_subnets.push(subnet);
        }

        let public_rt_name = format!("{}-public-rt", name);
        let public_route_table = stack
            .resource(
                "route-table",
                &public_rt_name,
                json!({"vpc_id": vpc.id(), "tags": tags_with_name(tags, &public_rt_name)}),
            )
            .parent(&vpc)
            .create()?;

        let public_route = stack
            .resource(
                "route",
                format!("{}-public-route", name),
                json!({
                    "route_table_id": public_route_table.id(),
                    "destination_cidr_block": ANYWHERE,
                    "gateway_id": internet_gateway.id(),
                }),
            )
            .parent(&public_route_table)
            .create()?;

        let mut public_route_table_associations = Vec::with_capacity(public_subnets.len());
        for (i, subnet) in public_subnets.iter().enumerate() {
            let association = stack
                .resource(
                    "route-table-association",
                    format!("{}-public-rta-{}", name, i),
                    json!({
                        "subnet_id": subnet.id(),
                        "route_table_id": public_route_table.id(),
                    }),
                )
                .parent(&public_route_table)
                .create()?;
            public_route_table_associations.push(association);
        }

        let mut nat_eips = Vec::new();
        let mut nat_gateways = Vec::new();
        if args.enable_nat_gateway {
            for (i, subnet) in public_subnets.iter().enumerate() {
                let eip_name = format!("{}-nat-eip-{}", name, i);
                let eip = stack
                    .resource(
                        "eip",
                        &eip_name,
                        json!({"domain": "vpc", "tags": tags_with_name(tags, &eip_name)}),
                    )
                    .parent(&vpc)
                    .create()?;

                let nat_name = format!("{}-nat-gw-{}", name, i);
                let nat = stack
                    .resource(
                        "nat-gateway",
                        &nat_name,
                        json!({
                            "subnet_id": subnet.id(),
                            "allocation_id": eip.id(),
                            "tags": tags_with_name(tags, &nat_name),
                        }),
                    )
                    .parent(subnet)
                    .depends_on(&eip)
                    .create()?;
                nat_eips.push(eip);
                nat_gateways.push(nat);
            }
        }

        let mut private_route_tables = Vec::with_capacity(private_subnets.len());
        let mut private_routes = Vec::new();
        let mut private_route_table_associations = Vec::with_capacity(private_subnets.len());
        for (i, subnet) in private_subnets.iter().enumerate() {
            let rt_name = format!("{}-private-rt-{}", name, i);
            let route_table = stack
                .resource(
                    "route-table",
                    &rt_name,
                    json!({"vpc_id": vpc.id(), "tags": tags_with_name(tags, &rt_name)}),
                )
                .parent(&vpc)
                .create()?;

            if let Some(nat) = nat_gateways.get(i) {
                let route = stack
                    .resource(
                        "route",
                        format!("{}-private-route-{}", name, i),
                        json!({
                            "route_table_id": route_table.id(),
                            "destination_cidr_block": ANYWHERE,
                            "nat_gateway_id": nat.id(),
                        }),
                    )
                    .parent(&route_table)
                    .create()?;
                private_routes.push(route);
            }

            let association = stack
                .resource(
                    "route-table-association",
                    format!("{}-private-rta-{}", name, i),
                    json!({"subnet_id": subnet.id(), "route_table_id": route_table.id()}),
                )
                .parent(&route_table)
                .create()?;
            private_route_tables.push(route_table);
            private_route_table_associations.push(association);
        }

        let network = VpcNetwork {
            component,
            vpc,
            ipv6_association,
            internet_gateway,
            prefix_list,
            public_subnets,
            private_subnets,
            public_route_table,
            public_route,
            public_route_table_associations,
            nat_eips,
            nat_gateways,
            private_route_tables,
            private_routes,
            private_route_table_associations,
            availability_zones,
            cidr_block,
            public_subnet_cidrs: layout.public,
            private_subnet_cidrs: layout.private,
        };

        stack.register_outputs(
            &network.component,
            json!({
                "vpc_id": network.vpc_id(),
                "vpc_cidr": network.vpc.attr("cidr_block"),
                "internet_gateway_id": network.internet_gateway.id(),
                "ip_prefix_list_id": network.prefix_list.id(),
                "public_subnet_ids": network.public_subnet_ids(),
                "private_subnet_ids": network.private_subnet_ids(),
                "public_route_table_id": network.public_route_table.id(),
                "private_route_table_ids": ids(&network.private_route_tables),
                "nat_gateway_ids": network.nat_gateway_ids(),
                "nat_eip_addresses": network.nat_eip_addresses(),
            }),
        )?;

        info!(
            network = name,
            cidr = %network.cidr_block,
            zones = network.availability_zones.len(),
            nat = network.nat_gateways.len(),
            "Declared VPC network"
        );
        Ok(network)
    }

    pub fn vpc_id(&self) -> Output {
        self.vpc.id()
    }

    pub fn public_subnet_ids(&self) -> Vec<Output> {
        ids(&self.public_subnets)
    }

    pub fn private_subnet_ids(&self) -> Vec<Output> {
        ids(&self.private_subnets)
    }

    pub fn nat_gateway_ids(&self) -> Vec<Output> {
        ids(&self.nat_gateways)
    }

    pub fn nat_eip_addresses(&self) -> Vec<Output> {
        self.nat_eips.iter().map(|eip| eip.attr("public_ip")).collect()
    }

    /// Public route table followed by every private route table
    pub fn route_table_ids(&self) -> Vec<Output> {
        std::iter::once(&self.public_route_table)
            .chain(&self.private_route_tables)
            .map(ResourceRef::id)
            .collect()
    }

    pub fn ipv6_cidr_block(&self) -> Option<Output> {
        self.ipv6_association
            .as_ref()
            .map(|assoc| assoc.attr("ipv6_cidr_block"))
    }
}

fn ids(resources: &[ResourceRef]) -> Vec<Output> {
    resources.iter().map(ResourceRef::id).collect()
}

fn resolve_zones(inventory: &dyn CloudInventory, args: &VpcNetworkArgs) -> Result<Vec<String>> {
    if let Some(zones) = args.availability_zones.as_ref().filter(|z| !z.is_empty()) {
        return Ok(zones.clone());
    }
    if args.zone_count == 0 {
        return Err(AwsError::invalid("zone_count must be at least 1"));
    }
    let available = inventory.availability_zones()?;
    if available.len() < args.zone_count {
        return Err(AwsError::InsufficientZones {
            requested: args.zone_count,
            available: available.len(),
        });
    }
    debug!(region = inventory.region(), zones = ?available, "Looked up availability zones");
    Ok(available.into_iter().take(args.zone_count).collect())
}

fn resolve_layout(base: Ipv4Net, zones: usize, args: &VpcNetworkArgs) -> Result<SubnetLayout> {
    let supplied = |cidrs: &Option<Vec<String>>, kind: &str| -> Result<Option<Vec<Ipv4Net>>> {
        let Some(cidrs) = cidrs.as_ref().filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        if cidrs.len() != zones {
            return Err(AwsError::invalid(format!(
                "{}_subnet_cidrs must have one entry per availability zone ({} given, {} zones)",
                kind,
                cidrs.len(),
                zones
            )));
        }
        cidrs.iter().map(|c| parse_cidr(c)).collect::<Result<Vec<_>>>().map(Some)
    };
    let public = supplied(&args.public_subnet_cidrs, "public")?;
    let private = supplied(&args.private_subnet_cidrs, "private")?;

    let layout = match (public, private) {
        (Some(public), Some(private)) => SubnetLayout { public, private },
        (public, private) => {
            let derived = args.subnet_strategy.derive(base, zones)?;
            SubnetLayout {
                public: public.unwrap_or(derived.public),
                private: private.unwrap_or(derived.private),
            }
        }
    };
    validate_layout(base, &layout)?;
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::StaticInventory;
    use infraflow_cloud::Resource;

    fn inventory() -> StaticInventory {
        StaticInventory::new("us-east-1")
    }

    fn cidrs(stack: &Stack, prefix: &str) -> Vec<String> {
        stack
            .resources_of_type("subnet")
            .into_iter()
            .filter(|s| s.name.contains(prefix))
            .map(|s| s.props["cidr_block"].as_str().unwrap().to_string())
            .collect()
    }

    fn count(stack: &Stack, resource_type: &str) -> usize {
        stack.resources_of_type(resource_type).len()
    }

    #[test]
    fn test_default_network_with_nat() {
        let mut stack = Stack::new("demo", "dev");
        let network =
            VpcNetwork::build(&mut stack, &inventory(), "net", VpcNetworkArgs::default()).unwrap();

        assert_eq!(count(&stack, "vpc"), 1);
        assert_eq!(count(&stack, "internet-gateway"), 1);
        assert_eq!(count(&stack, "subnet"), 4);
        assert_eq!(count(&stack, "route-table"), 3);
        assert_eq!(count(&stack, "nat-gateway"), 2);
        assert_eq!(count(&stack, "eip"), 2);
        assert_eq!(network.public_subnets.len(), 2);
        assert_eq!(network.private_subnets.len(), 2);
        assert_eq!(network.availability_zones, vec!["us-east-1a", "us-east-1b"]);

        assert_eq!(cidrs(&stack, "public"), vec!["10.0.0.0/24", "10.0.1.0/24"]);
        assert_eq!(cidrs(&stack, "private"), vec!["10.0.10.0/24", "10.0.11.0/24"]);
    }

    #[test]
    fn test_private_routes_target_same_zone_nat() {
        let mut stack = Stack::new("demo", "dev");
        let network = VpcNetwork::build(
            &mut stack,
            &inventory(),
            "net",
            VpcNetworkArgs {
                zone_count: 3,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(network.nat_gateways.len(), network.public_subnets.len());
        for (i, route) in network.private_routes.iter().enumerate() {
            let route = stack.get(&route.urn).unwrap();
            assert_eq!(route.props["nat_gateway_id"], network.nat_gateways[i].id().to_value());
            assert_eq!(
                route.props["route_table_id"],
                network.private_route_tables[i].id().to_value()
            );
            let nat = stack.get(&network.nat_gateways[i].urn).unwrap();
            assert_eq!(nat.props["subnet_id"], network.public_subnets[i].id().to_value());
            assert!(nat.depends_on.contains(&network.nat_eips[i].urn));
        }
    }

    #[test]
    fn test_without_nat_private_tables_have_no_route() {
        let mut stack = Stack::new("demo", "dev");
        let network = VpcNetwork::build(
            &mut stack,
            &inventory(),
            "net",
            VpcNetworkArgs {
                enable_nat_gateway: false,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(network.nat_gateways.is_empty());
        assert_eq!(count(&stack, "eip"), 0);
        assert_eq!(network.private_route_tables.len(), 2);
        let routes: Vec<&Resource> = stack.resources_of_type("route");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].props["gateway_id"], network.internet_gateway.id().to_value());
    }

    #[test]
    fn test_tags_and_public_subnet_flags() {
        let mut stack = Stack::new("demo", "dev");
        let mut tags = Tags::new();
        tags.insert("Environment".into(), "dev".into());
        tags.insert("Name".into(), "overridden".into());
        let network = VpcNetwork::build(
            &mut stack,
            &inventory(),
            "net",
            VpcNetworkArgs {
                tags,
                ..Default::default()
            },
        )
        .unwrap();

        let vpc = stack.get(&network.vpc.urn).unwrap();
        assert_eq!(vpc.props["tags"]["Name"], "net-vpc");
        assert_eq!(vpc.props["tags"]["Environment"], "dev");

        let subnet = stack.get(&network.public_subnets[1].urn).unwrap();
        assert_eq!(subnet.props["map_public_ip_on_launch"], true);
        assert_eq!(subnet.props["tags"]["Name"], "net-public-subnet-us-east-1b");
        assert_eq!(subnet.props["tags"]["Type"], "public");
        assert_eq!(subnet.parent.as_deref(), Some(network.vpc.urn.as_str()));
    }

    #[test]
    fn test_supplied_cidrs_are_validated() {
        let mut stack = Stack::new("demo", "dev");
        let err = VpcNetwork::build(
            &mut stack,
            &inventory(),
            "net",
            VpcNetworkArgs {
                public_subnet_cidrs: Some(vec!["10.0.0.0/24".into(), "10.0.0.128/25".into()]),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AwsError::CidrOverlap(_)));

        let err = VpcNetwork::build(
            &mut stack,
            &inventory(),
            "net2",
            VpcNetworkArgs {
                private_subnet_cidrs: Some(vec!["10.0.20.0/24".into()]),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AwsError::InvalidArgument(_)));
    }

    #[test]
    fn test_sequential_strategy_and_ipv6() {
        let mut stack = Stack::new("demo", "dev");
        let network = VpcNetwork::build(
            &mut stack,
            &inventory(),
            "net",
            VpcNetworkArgs {
                cidr_block: Some("172.20.0.0/16".into()),
                subnet_strategy: SubnetStrategy::Sequential { subnet_prefix: 20 },
                enable_ipv6: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(cidrs(&stack, "public"), vec!["172.20.0.0/20", "172.20.16.0/20"]);
        assert_eq!(cidrs(&stack, "private"), vec!["172.20.32.0/20", "172.20.48.0/20"]);
        assert!(network.ipv6_cidr_block().is_some());
    }

    #[test]
    fn test_insufficient_zones_is_fatal() {
        let mut stack = Stack::new("demo", "dev");
        let err = VpcNetwork::build(
            &mut stack,
            &inventory(),
            "net",
            VpcNetworkArgs {
                zone_count: 4,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AwsError::InsufficientZones {
                requested: 4,
                available: 3
            }
        ));
    }

    #[test]
    fn test_outputs_registered() {
        let mut stack = Stack::new("demo", "dev");
        let network =
            VpcNetwork::build(&mut stack, &inventory(), "net", VpcNetworkArgs::default()).unwrap();
        let component = stack.get(&network.component.urn).unwrap();
        assert_eq!(component.outputs["public_subnet_ids"].as_array().unwrap().len(), 2);
        assert_eq!(component.outputs["nat_eip_addresses"].as_array().unwrap().len(), 2);
        assert_eq!(network.route_table_ids().len(), 3);
    }
}
