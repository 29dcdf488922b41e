use super::{Session, confirmed};
use colored::Colorize;
use infraflow_cloud::{CloudProvider, ResourceStatus};

pub async fn handle(stack: Option<&str>, yes: bool) -> anyhow::Result<()> {
    let session = Session::open(stack)?;
    session.print_header();

    let state = session.provider.get_state().await?;
    if state.is_empty() {
        println!("{}", "No resources to destroy".yellow());
        return Ok(());
    }

    // Newest first, matching the order they are removed in
    let mut resources: Vec<_> = state.iter().map(|(_, r)| r).collect();
    resources.sort_by_key(|r| std::cmp::Reverse(r.sequence));
    for resource in &resources {
        let line = format!("  - {}", resource.urn);
        match resource.status {
            ResourceStatus::Error => println!("{} {}", line.red(), "(failed)".dimmed()),
            _ => println!("{}", line.red()),
        }
    }
    println!();
    println!("{}", format!("{} to delete", resources.len()).bold());

    if !confirmed(yes, "destroy") {
        return Ok(());
    }

    let result = session.provider.destroy_all().await?;
    println!(
        "{}",
        format!("✓ Destroyed {} resources", result.succeeded.len())
            .green()
            .bold()
    );
    Ok(())
}
