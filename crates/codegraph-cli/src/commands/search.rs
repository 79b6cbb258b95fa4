//! Search command - hybrid structural + semantic search over an indexed workspace.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use codegraph_mcp::ToolEnvelope;
use serde_json::json;

use super::build_server;
use crate::GlobalOptions;

/// Which side of the hybrid result set to print.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SearchMode {
    /// Hybrid structural + semantic search (default)
    Hybrid,
    /// Semantic search only, via embeddings
    Semantic,
}

/// Arguments for the `search` command.
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text: matched structurally by name and semantically by embedding
    query: String,

    /// Search mode
    #[arg(long, value_enum, default_value = "hybrid")]
    mode: SearchMode,

    /// Maximum results to print
    #[arg(long, short = 'n', default_value = "10")]
    limit: usize,

    /// Restrict to entities whose file path starts with this prefix
    #[arg(long)]
    path_prefix: Option<String>,
}

pub async fn execute(args: SearchArgs, global: GlobalOptions) -> Result<()> {
    let server = build_server(&global).await.context("failed to build the code graph server")?;

    match args.mode {
        SearchMode::Hybrid => {
            let envelope = server
                .call(
                    "query",
                    json!({
                        "query": args.query,
                        "filters": { "file_path": args.path_prefix.map(|p| vec![p]).unwrap_or_default() },
                        "limit": args.limit,
                    }),
                )
                .await;
            print_query_results(&envelope, &global)
        }
        SearchMode::Semantic => {
            let envelope = server
                .call(
                    "semantic_search",
                    json!({
                        "query": args.query,
                        "filters": { "path_prefix": args.path_prefix },
                        "limit": args.limit,
                    }),
                )
                .await;
            print_semantic_results(&envelope, &global)
        }
    }
}

fn print_query_results(envelope: &ToolEnvelope, global: &GlobalOptions) -> Result<()> {
    match envelope {
        ToolEnvelope::Success(s) => {
            if global.quiet {
                println!("{}", serde_json::to_string(&s.data)?);
                return Ok(());
            }

            let structural_items = s
                .data
                .get("structural")
                .and_then(|v| v.get("items"))
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let semantic_items =
                s.data.get("semantic").and_then(|v| v.get("items")).and_then(|v| v.as_array()).cloned().unwrap_or_default();

            println!("Structural matches ({}):", structural_items.len());
            for item in &structural_items {
                print_entity_match(item);
            }

            println!("\nSemantic matches ({}):", semantic_items.len());
            for item in &semantic_items {
                print_hit_match(item);
            }
            Ok(())
        }
        ToolEnvelope::Failure(f) => anyhow::bail!("{}: {}", f.error_type, f.error),
    }
}

fn print_semantic_results(envelope: &ToolEnvelope, global: &GlobalOptions) -> Result<()> {
    match envelope {
        ToolEnvelope::Success(s) => {
            if global.quiet {
                println!("{}", serde_json::to_string(&s.data)?);
                return Ok(());
            }
            let hits = s.data.get("hits").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            if hits.is_empty() {
                println!("No semantic hits for query.");
                return Ok(());
            }
            println!("Semantic hits ({}):", hits.len());
            for hit in &hits {
                print_raw_hit(hit);
            }
            Ok(())
        }
        ToolEnvelope::Failure(f) => anyhow::bail!("{}: {}", f.error_type, f.error),
    }
}

/// Prints one structural match: `{"entity": Entity, "matchType": ...}`.
fn print_entity_match(item: &serde_json::Value) {
    let entity = item.get("entity");
    let name = entity.and_then(|e| e.get("name")).and_then(|v| v.as_str()).unwrap_or("?");
    let path = entity.and_then(|e| e.get("file_path")).and_then(|v| v.as_str()).unwrap_or("");
    let match_type = item.get("matchType").and_then(|v| v.as_str()).unwrap_or("");
    println!("  {name:<30} {path:<50} {match_type}");
}

/// Prints one semantic match: `{"hit": HybridHit, "matchType": ...}`.
fn print_hit_match(item: &serde_json::Value) {
    let hit = item.get("hit");
    let entity_id = hit.and_then(|h| h.get("entity_id")).and_then(|v| v.as_str()).unwrap_or("?");
    let path = hit.and_then(|h| h.get("path")).and_then(|v| v.as_str()).unwrap_or("");
    let score = hit.and_then(|h| h.get("final_score")).and_then(|v| v.as_f64()).unwrap_or(0.0);
    let match_type = item.get("matchType").and_then(|v| v.as_str()).unwrap_or("");
    println!("  {entity_id:<30} {path:<50} {match_type:<10} {score:.3}");
}

/// Prints one raw `HybridHit` from `semantic_search`'s `hits` array.
fn print_raw_hit(hit: &serde_json::Value) {
    let entity_id = hit.get("entity_id").and_then(|v| v.as_str()).unwrap_or("?");
    let path = hit.get("path").and_then(|v| v.as_str()).unwrap_or("");
    let score = hit.get("final_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
    println!("  {entity_id:<30} {path:<50} {score:.3}");
}
