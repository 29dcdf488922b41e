//! Boot scripts for instances and launch templates
//!
//! Scripts are tera templates. Variables whose value is already known are
//! rendered directly; unresolved outputs (a bucket name, say) are rendered as
//! placeholders and spliced back in afterwards, so the result is an
//! [`Output`] the engine finishes at apply time.

use crate::error::Result;
use infraflow_cloud::Output;
use std::collections::BTreeMap;
use tera::{Context, Tera};
use tracing::debug;

const PLACEHOLDER_OPEN: &str = "@@infraflow-output-";
const PLACEHOLDER_CLOSE: &str = "@@";

const NGINX_TEMPLATE: &str = r#"#!/bin/bash
dnf update -y
dnf install -y nginx

cat > /usr/share/nginx/html/index.html <<'EOF'
<!DOCTYPE html>
<html>
<head>
    <title>Welcome to Nginx on AWS</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 50px; background-color: #f0f0f0; }
        .container { background-color: white; padding: 30px; border-radius: 10px; }
        h1 { color: #009639; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Welcome to Nginx on AWS!</h1>
        <p><strong>Environment:</strong> {{ environment }}</p>
        <p><strong>Branch:</strong> {{ branch }}</p>
        <p><strong>Deployed with:</strong> infraflow</p>
    </div>
</body>
</html>
EOF
{% if bucket %}
aws s3 sync s3://{{ bucket }}/site/ /usr/share/nginx/html/ || true
{% endif %}
systemctl start nginx
systemctl enable nginx
"#;

/// A boot script with its template variables
#[derive(Debug, Clone)]
pub struct BootScript {
    template: String,
    vars: BTreeMap<String, Output>,
}

impl BootScript {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            vars: BTreeMap::new(),
        }
    }

    /// Installs nginx and serves a welcome page naming the environment and
    /// branch; with a bucket, site files under `site/` are synced on boot
    pub fn nginx(environment: &str, branch: &str, bucket: Option<Output>) -> Self {
        let mut script = Self::new(NGINX_TEMPLATE)
            .var("environment", environment)
            .var("branch", branch);
        if let Some(bucket) = bucket {
            script = script.var("bucket", bucket);
        }
        script
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<Output>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn render(&self) -> Result<Output> {
        render(&self.template, &self.vars)
    }
}

/// Render `template` with `vars`
///
/// Returns a known string when every variable is known, a concatenation
/// otherwise.
pub fn render(template: &str, vars: &BTreeMap<String, Output>) -> Result<Output> {
    let mut context = Context::new();
    let mut pending = Vec::new();
    for (name, value) in vars {
        match value {
            Output::Known(known) if value.is_known() => context.insert(name, known),
            _ => {
                let placeholder = format!("{}{}{}", PLACEHOLDER_OPEN, pending.len(), PLACEHOLDER_CLOSE);
                context.insert(name, &placeholder);
                pending.push(value.clone());
            }
        }
    }

    let rendered = Tera::one_off(template, &context, false)?;
    if pending.is_empty() {
        return Ok(Output::from(rendered));
    }
    debug!(pending = pending.len(), "Boot script waits on unresolved outputs");
    Ok(splice(&rendered, &pending))
}

fn splice(rendered: &str, pending: &[Output]) -> Output {
    let mut parts = Vec::new();
    let mut rest = rendered;
    while let Some(start) = rest.find(PLACEHOLDER_OPEN) {
        let after = &rest[start + PLACEHOLDER_OPEN.len()..];
        let Some(end) = after.find(PLACEHOLDER_CLOSE) else {
            break;
        };
        let Some(output) = after[..end].parse::<usize>().ok().and_then(|i| pending.get(i)) else {
            // Not one of ours, keep it as text
            parts.push(Output::from(&rest[..start + PLACEHOLDER_OPEN.len()]));
            rest = after;
            continue;
        };
        if start > 0 {
            parts.push(Output::from(&rest[..start]));
        }
        parts.push(output.clone());
        rest = &after[end + PLACEHOLDER_CLOSE.len()..];
    }
    if !rest.is_empty() {
        parts.push(Output::from(rest));
    }
    Output::concat(parts)
}
