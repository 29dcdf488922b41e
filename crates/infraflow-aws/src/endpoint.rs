//! VPC gateway endpoints

use crate::error::{AwsError, Result};
use crate::{Tags, tags_with_name};
use infraflow_cloud::{CloudInventory, Output, ResourceRef, Stack};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub const VPC_GATEWAY_ENDPOINT_TYPE: &str = "infraflow:network:VpcGatewayEndpoint";

/// Arguments of [`VpcGatewayEndpoint::build`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VpcGatewayEndpointArgs {
    pub vpc_id: Option<Output>,
    pub route_table_ids: Vec<Output>,
    /// Service suffix such as `s3` or `dynamodb`
    pub service: String,
    pub tags: Tags,
}

impl Default for VpcGatewayEndpointArgs {
    fn default() -> Self {
        Self {
            vpc_id: None,
            route_table_ids: Vec::new(),
            service: "s3".to_string(),
            tags: Tags::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VpcGatewayEndpoint {
    pub component: ResourceRef,
    pub endpoint: ResourceRef,
}

impl VpcGatewayEndpoint {
    pub fn build(
        stack: &mut Stack,
        inventory: &dyn CloudInventory,
        name: &str,
        args: VpcGatewayEndpointArgs,
    ) -> Result<Self> {
        let vpc_id = args.vpc_id.ok_or_else(|| AwsError::missing("vpc_id"))?;
        if args.route_table_ids.is_empty() {
            return Err(AwsError::missing("route_table_ids"));
        }
        let service_name = format!("com.amazonaws.{}.{}", inventory.region(), args.service);

        let endpoint_name = format!("{}-endpoint", name);
        let component = stack.component(VPC_GATEWAY_ENDPOINT_TYPE, name, None)?;
        let endpoint = stack
            .resource(
                "vpc-endpoint",
                &endpoint_name,
                json!({
                    "vpc_id": vpc_id,
                    "service_name": service_name,
                    "vpc_endpoint_type": "Gateway",
                    "route_table_ids": args.route_table_ids,
                    "tags": tags_with_name(&args.tags, &endpoint_name),
                }),
            )
            .parent(&component)
            .create()?;

        stack.register_outputs(
            &component,
            json!({
                "endpoint_id": endpoint.id(),
                "endpoint_prefix_list_id": endpoint.attr("prefix_list_id"),
            }),
        )?;

        info!(endpoint = name, service = %service_name, "Declared gateway endpoint");
        Ok(Self {
            component,
            endpoint,
        })
    }

    pub fn id(&self) -> Output {
        self.endpoint.id()
    }

    pub fn prefix_list_id(&self) -> Output {
        self.endpoint.attr("prefix_list_id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::StaticInventory;

    #[test]
    fn test_service_name_uses_inventory_region() {
        let mut stack = Stack::new("demo", "dev");
        let vpc = stack.resource("vpc", "net-vpc", json!({})).create().unwrap();
        let rt = stack.resource("route-table", "net-public-rt", json!({})).create().unwrap();

        let endpoint = VpcGatewayEndpoint::build(
            &mut stack,
            &StaticInventory::new("eu-central-1"),
            "s3",
            VpcGatewayEndpointArgs {
                vpc_id: Some(vpc.id()),
                route_table_ids: vec![rt.id()],
                ..Default::default()
            },
        )
        .unwrap();

        let props = &stack.get(&endpoint.endpoint.urn).unwrap().props;
        assert_eq!(props["service_name"], "com.amazonaws.eu-central-1.s3");
        assert_eq!(props["vpc_endpoint_type"], "Gateway");
        assert_eq!(props["tags"]["Name"], "s3-endpoint");
    }

    #[test]
    fn test_route_tables_are_required() {
        let mut stack = Stack::new("demo", "dev");
        let vpc = stack.resource("vpc", "net-vpc", json!({})).create().unwrap();
        let err = VpcGatewayEndpoint::build(
            &mut stack,
            &StaticInventory::new("us-east-1"),
            "s3",
            VpcGatewayEndpointArgs {
                vpc_id: Some(vpc.id()),
                service: "dynamodb".into(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "route_table_ids must be provided");
    }
}
