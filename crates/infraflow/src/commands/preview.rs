use super::{Session, print_plan};
use colored::Colorize;
use infraflow_cloud::CloudProvider;

pub async fn handle(stack: Option<&str>) -> anyhow::Result<()> {
    let session = Session::open(stack)?;
    session.print_header();

    println!("{}", "Previewing changes...".blue());
    let plan = session.provider.plan(&session.desired).await?;
    print_plan(&plan);

    if !plan.has_changes {
        println!("{}", "✓ Stack is up to date".green().bold());
    }
    Ok(())
}
