//! `easel lsp`: start a project's language server, handshake, report its
//! capabilities.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use easel_core::{Host, Invocation, LspTransport};

use crate::config::EaselConfig;

const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// Sorted names of the capabilities an `initialize` result advertises.
pub fn capability_names(result: &Value) -> Vec<String> {
    let mut names: Vec<String> = result
        .get("capabilities")
        .and_then(Value::as_object)
        .map(|caps| caps.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();
    names
}

/// Execute `easel lsp`. The server is left registered with the host, which
/// performs the shutdown handshake when it is torn down.
pub async fn cmd_lsp(host: &Host, config: &EaselConfig, project: &Path, lang: &str) -> Result<()> {
    let tokens = config.lsp.get(lang).with_context(|| {
        format!("no language server configured for {lang:?}; add it under [lsp] in the config file")
    })?;
    let project = project
        .canonicalize()
        .with_context(|| format!("project directory {} not found", project.display()))?;

    let invocation = Invocation::new(tokens.iter().cloned()).in_dir(&project);
    println!("Starting {invocation}");
    let started = host
        .sessions()
        .get_or_start(invocation)
        .await
        .context("failed to start language server")?;
    let streams = started
        .streams
        .context("language server is already attached to another transport")?;

    let transport = Arc::new(LspTransport::from_streams(streams));
    host.sessions()
        .attach_transport(&started.key, transport.clone())
        .await;

    let params = json!({
        "processId": std::process::id(),
        "rootUri": format!("file://{}", project.display()),
        "capabilities": {},
    });
    let result = tokio::time::timeout(
        INITIALIZE_TIMEOUT,
        transport.request("initialize", Some(params)),
    )
    .await
    .context("language server did not answer initialize in time")?
    .context("initialize failed")?;
    transport
        .notify("initialized", Some(json!({})))
        .await
        .context("failed to send initialized")?;

    let names = capability_names(&result);
    println!("Server capabilities ({}):", names.len());
    for name in names {
        println!("  {name}");
    }
    Ok(())
}
