use super::*;
use serde_json::json;

const SAMPLE: &str = r#"
project "tech-branch"

config "aws" {
    region "us-east-1"
}

stack "dev" {
    program "web-asg"
    description "Feature branch environment"
    config {
        branch "feature-x"
        env "dev"
        keyName "my-key"
    }
    config "vpc" {
        cidrBlock "10.0.0.0/16"
        enableNatGateway #false
    }
    config "ec2" { instanceType "t3.micro"; minSize 2; maxSize 4 }
}

stack "prod" {
    program "web-instance"
    config "aws" { region "eu-west-1"; zones "eu-west-1a" "eu-west-1b" }
}
"#;

#[test]
fn test_parse_project_and_stacks() {
    let project = parse_stack_string(SAMPLE, "fallback".to_string()).unwrap();
    assert_eq!(project.name, "tech-branch");
    assert_eq!(project.stack_names(), vec!["dev", "prod"]);

    let dev = project.stack("dev").unwrap();
    assert_eq!(dev.program.as_deref(), Some("web-asg"));
    assert_eq!(dev.description.as_deref(), Some("Feature branch environment"));
}

#[test]
fn test_stack_config_namespaces() {
    let project = parse_stack_string(SAMPLE, "fallback".to_string()).unwrap();
    let config = &project.stack("dev").unwrap().config;

    let defaults = config.project_namespace();
    assert_eq!(defaults.get_str("branch").unwrap(), Some("feature-x"));
    assert_eq!(defaults.get_str("keyName").unwrap(), Some("my-key"));

    let vpc = config.namespace("vpc");
    assert_eq!(vpc.get_str("cidrBlock").unwrap(), Some("10.0.0.0/16"));
    assert_eq!(vpc.get_bool("enableNatGateway").unwrap(), Some(false));

    let ec2 = config.namespace("ec2");
    assert_eq!(ec2.get_int("minSize").unwrap(), Some(2));
    assert_eq!(ec2.get_int("desiredCapacity").unwrap(), None);
}

#[test]
fn test_project_config_is_inherited_and_overridden() {
    let project = parse_stack_string(SAMPLE, "fallback".to_string()).unwrap();

    let dev = &project.stack("dev").unwrap().config;
    assert_eq!(dev.namespace("aws").get_str("region").unwrap(), Some("us-east-1"));

    let prod = &project.stack("prod").unwrap().config;
    assert_eq!(prod.namespace("aws").get_str("region").unwrap(), Some("eu-west-1"));
    assert_eq!(
        prod.namespace("aws").get_str_list("zones").unwrap(),
        Some(vec!["eu-west-1a".to_string(), "eu-west-1b".to_string()])
    );
}

#[test]
fn test_node_values() {
    let doc: KdlDocument = r#"
        single "a"
        several 1 2 3
        flag
        props port=80 protocol="HTTP"
        nested {
            listener { port 80 }
            listener { port 443 }
            tag "x"
        }
    "#
    .parse()
    .unwrap();
    let values: Vec<_> = doc
        .nodes()
        .iter()
        .map(|n| node_to_value(n).unwrap())
        .collect();

    assert_eq!(values[0], json!("a"));
    assert_eq!(values[1], json!([1, 2, 3]));
    assert_eq!(values[2], json!(true));
    assert_eq!(values[3], json!({"port": 80, "protocol": "HTTP"}));
    assert_eq!(
        values[4],
        json!({"listener": [{"port": 80}, {"port": 443}], "tag": "x"})
    );
}

#[test]
fn test_node_values_reject_ambiguous_shapes() {
    let doc: KdlDocument = r#"
        mixed 80 protocol="HTTP"
        both "web" { port 80 }
        tags { "$ref" "vpc:main"; attr "id" }
    "#
    .parse()
    .unwrap();
    let errors: Vec<String> = doc
        .nodes()
        .iter()
        .map(|n| node_to_value(n).unwrap_err().to_string())
        .collect();

    assert_eq!(
        errors[0],
        "Invalid configuration: mixed: positional values cannot be combined with properties or children"
    );
    assert_eq!(
        errors[1],
        "Invalid configuration: both: positional values cannot be combined with properties or children"
    );
    assert_eq!(errors[2], "Invalid configuration: tags: key $ref is reserved");
}

#[test]
fn test_stack_config_with_mixed_node_fails() {
    let kdl = r#"
        stack "dev" {
            config "ec2" { instanceType "t3.micro" size=2 }
        }
    "#;
    let err = parse_stack_string(kdl, "fallback".to_string()).unwrap_err();
    assert!(err.to_string().contains("instanceType: positional values"));
}

#[test]
fn test_namespaced_key_in_default_config() {
    let kdl = r#"
        project "demo"
        stack "dev" {
            config { aws:region "ap-northeast-1" }
        }
    "#;
    let project = parse_stack_string(kdl, "fallback".to_string()).unwrap();
    let config = &project.stack("dev").unwrap().config;
    assert_eq!(
        config.namespace("aws").get_str("region").unwrap(),
        Some("ap-northeast-1")
    );
}

#[test]
fn test_select_stack() {
    let project = parse_stack_string(SAMPLE, "fallback".to_string()).unwrap();
    assert!(matches!(
        project.select_stack(None),
        Err(CoreError::NoStackSelected(names)) if names == vec!["dev", "prod"]
    ));
    assert!(matches!(
        project.select_stack(Some("staging")),
        Err(CoreError::StackNotFound(_))
    ));

    let single = parse_stack_string(r#"stack "only" { program "web-asg" }"#, "demo".into()).unwrap();
    assert_eq!(single.name, "demo");
    assert_eq!(single.select_stack(None).unwrap().name, "only");
}

#[test]
fn test_invalid_documents() {
    assert!(matches!(
        parse_stack_string("stack {", "x".into()),
        Err(CoreError::KdlParse(_))
    ));
    assert!(parse_stack_string("stack { program \"web-asg\" }", "x".into()).is_err());
    assert!(parse_stack_string("stack \"a\"\nstack \"a\"", "x".into()).is_err());
    assert!(parse_stack_string("stack \"a\" { config \"vpc\" }", "x".into()).is_err());
}
