//! Status command - graph/vector store health and agent/bus diagnostics.

use anyhow::{Context, Result};
use clap::Args;
use codegraph_mcp::ToolEnvelope;
use serde_json::json;

use super::{build_server, load_config, resolve_workspace};
use crate::GlobalOptions;

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show the resolved configuration alongside the status
    #[arg(long = "show-config")]
    show_config: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: StatusArgs, global: GlobalOptions) -> Result<()> {
    let workspace = resolve_workspace(&global)?;
    let config = load_config(&global, &workspace)?;
    let server = build_server(&global).await.context("failed to build the code graph server")?;

    let health = server.call("get_graph_health", json!({})).await;
    let metrics = server.call("get_metrics", json!({})).await;
    let agent_metrics = server.call("get_agent_metrics", json!({})).await;
    let bus_stats = server.call("get_bus_stats", json!({})).await;

    if args.json {
        let combined = json!({
            "workspace": workspace.to_string_lossy(),
            "health": envelope_data(&health),
            "metrics": envelope_data(&metrics),
            "agents": envelope_data(&agent_metrics),
            "bus": envelope_data(&bus_stats),
            "config": if args.show_config { Some(&config) } else { None },
        });
        println!("{}", serde_json::to_string_pretty(&combined)?);
        return Ok(());
    }

    println!("Workspace: {}", workspace.display());
    println!("Store:     {}", config.database_path(&workspace).display());
    println!();

    print_section("Graph health", &health);
    print_section("Conductor metrics", &metrics);
    print_section("Agent metrics", &agent_metrics);
    print_section("Knowledge bus", &bus_stats);

    if args.show_config {
        println!("\nConfiguration:\n{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}

fn envelope_data(envelope: &ToolEnvelope) -> serde_json::Value {
    match envelope {
        ToolEnvelope::Success(s) => s.data.clone(),
        ToolEnvelope::Failure(f) => json!({ "error": f.error, "errorType": f.error_type }),
    }
}

fn print_section(title: &str, envelope: &ToolEnvelope) {
    println!("{title}:");
    match envelope {
        ToolEnvelope::Success(s) => {
            if let Some(obj) = s.data.as_object() {
                for (key, value) in obj {
                    println!("  {key}: {value}");
                }
            } else {
                println!("  {}", s.data);
            }
        }
        ToolEnvelope::Failure(f) => println!("  error ({}): {}", f.error_type, f.error),
    }
    println!();
}
