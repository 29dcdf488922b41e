use super::{Session, confirmed, print_plan};
use colored::Colorize;
use infraflow_cloud::CloudProvider;

pub async fn handle(stack: Option<&str>, yes: bool) -> anyhow::Result<()> {
    let session = Session::open(stack)?;
    session.print_header();

    let plan = session.provider.plan(&session.desired).await?;
    print_plan(&plan);

    if !plan.has_changes {
        session.provider.record_exports(&session.desired).await?;
        println!("{}", "✓ Stack is up to date".green().bold());
        return Ok(());
    }
    if !confirmed(yes, "apply") {
        return Ok(());
    }

    println!();
    println!("{}", "Applying...".blue());
    let result = session.provider.apply(&plan).await?;

    if !result.is_success() {
        eprintln!();
        eprintln!("{}", "✗ Apply failed".red().bold());
        for failure in &result.failed {
            eprintln!(
                "  {}: {}",
                failure.action_id,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
        std::process::exit(1);
    }

    println!(
        "{}",
        format!(
            "✓ Applied {} actions in {}ms",
            result.succeeded.len(),
            result.duration_ms
        )
        .green()
        .bold()
    );

    let exports = session.provider.record_exports(&session.desired).await?;
    if !exports.is_empty() {
        println!();
        println!("Outputs:");
        super::outputs::print_exports(&exports);
    }
    Ok(())
}
