use super::Session;
use colored::Colorize;

pub async fn handle(stack: Option<&str>) -> anyhow::Result<()> {
    println!("{}", "Validating configuration...".blue());

    let session = match Session::open(stack) {
        Ok(session) => session,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Configuration error".red().bold());
            eprintln!("  {:#}", e);
            std::process::exit(1);
        }
    };

    println!(
        "Stack file: {}",
        session.stack_file.display().to_string().cyan()
    );
    println!("{}", "✓ Configuration is valid".green().bold());
    println!();
    println!("Summary:");
    println!("  project:  {}", session.project.name.cyan());
    println!("  stacks:   {}", session.project.stack_names().join(", "));
    println!(
        "  selected: {} ({})",
        session.stack_name().cyan(),
        session.deployment.program.name()
    );
    println!("  region:   {}", session.deployment.region);
    println!("  resources: {}", session.desired.len());
    println!("  exports:  {}", session.deployment.stack.exports().len());
    Ok(())
}
