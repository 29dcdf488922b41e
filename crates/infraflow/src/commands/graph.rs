use super::Session;
use colored::Colorize;
use infraflow_cloud::{Resource, ResourceKind, Stack};

pub async fn handle(stack: Option<&str>) -> anyhow::Result<()> {
    let session = Session::open(stack)?;
    session.print_header();

    let graph = &session.deployment.stack;
    for root in graph.resources().iter().filter(|r| r.parent.is_none()) {
        print_tree(graph, root, 0);
    }
    println!();
    println!(
        "{} resources, {} exports",
        session.desired.len(),
        graph.exports().len()
    );
    Ok(())
}

fn print_tree(graph: &Stack, resource: &Resource, depth: usize) {
    let indent = "  ".repeat(depth + 1);
    match resource.kind {
        ResourceKind::Component => println!(
            "{}{} {}",
            indent,
            resource.resource_type.blue(),
            resource.name.bold()
        ),
        ResourceKind::Custom => {
            // Dependencies other than the parent
            let extra: Vec<&str> = resource
                .depends_on
                .iter()
                .filter(|d| Some(*d) != resource.parent.as_ref())
                .map(String::as_str)
                .collect();
            if extra.is_empty() {
                println!("{}{} {}", indent, resource.resource_type, resource.name);
            } else {
                println!(
                    "{}{} {} {}",
                    indent,
                    resource.resource_type,
                    resource.name,
                    format!("-> {}", extra.join(", ")).dimmed()
                );
            }
        }
    }
    for child in graph.children_of(&resource.urn) {
        print_tree(graph, child, depth + 1);
    }
}
