//! `web-instance`: a single nginx server in the first public subnet

use super::{Settings, WebTier};
use anyhow::{Context, Result};
use infraflow_aws::{BootScript, Ec2Instance, Ec2InstanceArgs};
use infraflow_cloud::{CloudInventory, Output, Stack};
use infraflow_core::StackConfig;

const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";

pub fn build(
    stack: &mut Stack,
    inventory: &dyn CloudInventory,
    settings: &Settings,
    config: &StackConfig,
) -> Result<()> {
    let ec2 = config.namespace("ec2");
    let prefix = settings.prefix();

    let tier = WebTier::build(stack, inventory, settings, config, false)?;
    let subnet = tier
        .network
        .public_subnets
        .first()
        .context("network declared no public subnet")?;

    let name = format!("{}-web-server", prefix);
    let server = Ec2Instance::build(
        stack,
        inventory,
        &name,
        Ec2InstanceArgs {
            instance_type: ec2
                .get_str("instanceType")?
                .unwrap_or(DEFAULT_INSTANCE_TYPE)
                .to_string(),
            key_name: settings.key_name.clone(),
            subnet_id: Some(subnet.id()),
            security_group_ids: tier.security_group_ids(),
            user_data: Some(BootScript::nginx(&settings.environment, &settings.branch, None).render()?),
            tags: settings.tags_with([("Name", name.as_str()), ("Tier", "web")]),
            ..Default::default()
        },
    )?;

    tier.export(stack);
    stack.export("web_server_id", server.id());
    stack.export("web_server_public_ip", server.public_ip());
    stack.export("web_server_public_dns", server.public_dns());
    stack.export("web_server_private_ip", server.private_ip());
    stack.export(
        "ssh_command",
        Output::concat([
            Output::from("ssh -i <your-key>.pem ec2-user@"),
            server.public_dns(),
        ]),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::program::tests::definition;
    use crate::program::{Program, synthesize};
    use infraflow_cloud::{CloudProvider, LocalProvider};
    use serde_json::json;

    const STACK: &str = r#"
stack "dev" {
    program "web-instance"
    config { branch "main"; env "dev" }
    config "vpc" { enableNatGateway #true }
    config "ec2" { instanceType "t3.nano" }
}
"#;

    #[test]
    fn test_single_instance_without_nat() {
        let deployment = synthesize("tech-branch", &definition(STACK)).unwrap();
        assert_eq!(deployment.program, Program::WebInstance);
        let stack = &deployment.stack;

        assert!(stack.resources_of_type("nat-gateway").is_empty());
        assert!(stack.resources_of_type("autoscaling-group").is_empty());
        let instances = stack.resources_of_type("instance");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].prop("instance_type"), Some(&json!("t3.nano")));
        assert_eq!(
            instances[0].prop("subnet_id"),
            Some(&json!({"$ref": "subnet:main-dev-network-public-subnet-0", "attr": "id"}))
        );
        assert!(stack.exports().contains_key("ssh_command"));
        assert!(!stack.exports().contains_key("application_url"));
    }

    #[tokio::test]
    async fn test_ssh_command_resolves_after_apply() {
        let dir = tempfile::tempdir().unwrap();
        let deployment = synthesize("tech-branch", &definition(STACK)).unwrap();
        let desired = deployment.stack.to_resource_set("local");
        let provider = LocalProvider::new(dir.path(), "dev");

        let plan = provider.plan(&desired).await.unwrap();
        assert!(provider.apply(&plan).await.unwrap().is_success());

        let exports = provider.resolve_exports(&desired).await.unwrap();
        let ssh = exports["ssh_command"].as_str().unwrap();
        assert!(ssh.starts_with("ssh -i <your-key>.pem ec2-user@ec2-203-0-113-"));
        assert_eq!(exports["vpc_cidr"], json!("10.0.0.0/16"));
    }
}
