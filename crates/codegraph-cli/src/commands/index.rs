//! Index command - incrementally parse a workspace into the graph store.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use super::{build_server, print_info};
use crate::progress::{finish_spinner, finish_spinner_warn, spinner};
use crate::GlobalOptions;

/// Arguments for the `index` command.
#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Additional glob-style patterns to exclude, on top of the built-in defaults
    #[arg(long = "exclude")]
    exclude_patterns: Vec<String>,

    /// Ignore the stored merkle baseline and reparse every file
    #[arg(long)]
    full: bool,
}

pub async fn execute(args: IndexArgs, global: GlobalOptions) -> Result<()> {
    let workspace = super::resolve_workspace(&global)?;
    let server = build_server(&global).await.context("failed to build the code graph server")?;

    let pb = spinner(&format!("indexing {}", workspace.display()), global.quiet);

    let envelope = server
        .call(
            "index",
            json!({
                "workspace_path": workspace.to_string_lossy(),
                "exclude_patterns": args.exclude_patterns,
                "full_reindex": args.full,
            }),
        )
        .await;

    match &envelope {
        codegraph_mcp::ToolEnvelope::Success(s) => {
            let files = s.data.get("filesProcessed").and_then(|v| v.as_u64()).unwrap_or(0);
            let entities = s.data.get("entitiesIndexed").and_then(|v| v.as_u64()).unwrap_or(0);
            let relationships = s.data.get("relationshipsCreated").and_then(|v| v.as_u64()).unwrap_or(0);
            finish_spinner(pb, &format!("indexed {files} files ({entities} entities, {relationships} relationships)"));
            if global.quiet {
                println!("{}", serde_json::to_string(&s.data)?);
            } else if let Some(warnings) = &s.warnings {
                for w in warnings {
                    print_info(&format!("warning: {w}"), global.quiet);
                }
            }
        }
        codegraph_mcp::ToolEnvelope::Failure(f) => {
            finish_spinner_warn(pb, &format!("index failed: {}", f.error));
            anyhow::bail!("{}: {}", f.error_type, f.error);
        }
    }

    Ok(())
}
