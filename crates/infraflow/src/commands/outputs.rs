use super::Session;
use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeMap;

pub async fn handle(stack: Option<&str>, json: bool) -> anyhow::Result<()> {
    let session = Session::open(stack)?;

    let Some(exports) = session.provider.recorded_exports().await? else {
        anyhow::bail!(
            "Stack {} has not been deployed; run `infra up` first",
            session.stack_name()
        );
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&exports)?);
    } else {
        session.print_header();
        print_exports(&exports);
    }
    Ok(())
}

pub fn print_exports(exports: &BTreeMap<String, Value>) {
    let width = exports.keys().map(String::len).max().unwrap_or(0);
    for (key, value) in exports {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("  {}  {}", format!("{:<width$}", key).cyan(), rendered);
    }
}
