//! Parser Agent: turns raw file content into [`ParseResult`]s, backed by
//! the content-hash cache so re-indexing unchanged files is a lookup.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use codegraph_core::{hash_content, CodeParser, ParseCache, ParseResult};
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::json;

use crate::agent::{spawn_resize_listener, Agent, AgentRuntime, AgentStatus, Capabilities, Task, TaskResult};
use crate::bus::KnowledgeBus;
use crate::error::{AgentError, Result};

#[derive(Debug, Deserialize)]
struct FileInput {
    file_path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ParseFileRequest {
    file_path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ParseBatchRequest {
    files: Vec<FileInput>,
}

#[derive(Debug, Deserialize)]
struct IncrementalChange {
    file_path: String,
    content: Option<String>,
    deleted: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ParseIncrementalRequest {
    changes: Vec<IncrementalChange>,
}

pub struct ParserAgent {
    runtime: AgentRuntime,
    cache: Arc<ParseCache>,
    bus: Arc<KnowledgeBus>,
}

impl ParserAgent {
    pub fn new(id: impl Into<String>, cache: Arc<ParseCache>, bus: Arc<KnowledgeBus>, capabilities: Capabilities) -> Self {
        Self {
            runtime: AgentRuntime::new(id, "parser", capabilities),
            cache,
            bus,
        }
    }

    /// Parses one file's content, consulting (and refreshing) the
    /// content-hash cache. Tree-sitter failures become a `ParseError` entry
    /// attached to the result rather than a hard failure — parse errors are
    /// non-fatal per the error handling policy.
    pub fn parse_one(&self, file_path: &str, content: &str) -> ParseResult {
        let content_hash = hash_content(content.as_bytes());
        if let Some(cached) = self.cache.get(&content_hash) {
            return cached;
        }

        let started = Instant::now();
        let path = Path::new(file_path);
        let result = match CodeParser::for_path(path) {
            Ok(mut parser) => match parser.parse(content) {
                Ok(tree) => {
                    let extracted = parser.extract(&tree, content, file_path);
                    ParseResult {
                        file_path: file_path.to_string(),
                        language: parser.language().as_str().to_string(),
                        content_hash: content_hash.clone(),
                        entities: extracted.entities,
                        relationships: extracted.relationships,
                        parse_time_ms: started.elapsed().as_millis() as u64,
                        from_cache: false,
                        errors: Vec::new(),
                    }
                }
                Err(e) => ParseResult {
                    file_path: file_path.to_string(),
                    language: parser.language().as_str().to_string(),
                    content_hash: content_hash.clone(),
                    entities: Vec::new(),
                    relationships: Vec::new(),
                    parse_time_ms: started.elapsed().as_millis() as u64,
                    from_cache: false,
                    errors: vec![codegraph_core::ParseError {
                        message: e.to_string(),
                        line: None,
                    }],
                },
            },
            Err(e) => ParseResult {
                file_path: file_path.to_string(),
                language: "unknown".to_string(),
                content_hash: content_hash.clone(),
                entities: Vec::new(),
                relationships: Vec::new(),
                parse_time_ms: started.elapsed().as_millis() as u64,
                from_cache: false,
                errors: vec![codegraph_core::ParseError {
                    message: e.to_string(),
                    line: None,
                }],
            },
        };

        self.cache.put(result.clone());
        result
    }

    fn parse_batch(&self, files: &[FileInput]) -> Vec<ParseResult> {
        files
            .par_iter()
            .map(|f| self.parse_one(&f.file_path, &f.content))
            .collect()
    }

    /// The content-hash cache backing this agent, shared with the Indexer
    /// Agent so `clean_index` can clear it alongside a graph reset.
    pub fn cache(&self) -> &Arc<ParseCache> {
        &self.cache
    }

    /// Subscribes to the Resource Governor's `resources:adjusted` event and
    /// resizes `maxConcurrency` in response.
    pub fn spawn_resize_listener(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let bus = self.bus.clone();
        spawn_resize_listener(bus, move |limit| self.runtime.resize_concurrency(limit))
    }
}

#[async_trait]
impl Agent for ParserAgent {
    fn id(&self) -> &str {
        &self.runtime.id
    }

    fn agent_type(&self) -> &'static str {
        self.runtime.agent_type
    }

    fn status(&self) -> AgentStatus {
        self.runtime.status()
    }

    fn capabilities(&self) -> Capabilities {
        self.runtime.capabilities()
    }

    fn can_handle(&self, task: &Task) -> bool {
        matches!(task.kind.as_str(), "parse:file" | "parse:batch" | "parse:incremental")
    }

    fn resize_concurrency(&self, max_concurrency: usize) {
        self.runtime.resize_concurrency(max_concurrency);
    }

    async fn process(&self, task: Task) -> Result<TaskResult> {
        let _permit = self.runtime.try_acquire()?;
        let started = Instant::now();

        let results = match task.kind.as_str() {
            "parse:file" => {
                let req: ParseFileRequest = serde_json::from_value(task.payload.clone())?;
                vec![self.parse_one(&req.file_path, &req.content)]
            }
            "parse:batch" => {
                let req: ParseBatchRequest = serde_json::from_value(task.payload.clone())?;
                self.parse_batch(&req.files)
            }
            "parse:incremental" => {
                let req: ParseIncrementalRequest = serde_json::from_value(task.payload.clone())?;
                req.changes
                    .iter()
                    .map(|c| {
                        if c.deleted.unwrap_or(false) {
                            ParseResult::empty_for_deletion(c.file_path.clone())
                        } else {
                            self.parse_one(&c.file_path, c.content.as_deref().unwrap_or(""))
                        }
                    })
                    .collect()
            }
            other => return Err(AgentError::CannotHandle(other.to_string())),
        };

        let stats = json!({
            "filesParsed": results.len(),
            "errors": results.iter().filter(|r| !r.errors.is_empty()).count(),
        });
        self.bus.publish(
            "parse:complete",
            json!({ "results": results, "stats": stats }),
        );

        Ok(TaskResult {
            task_id: task.id,
            data: serde_json::to_value(&results)?,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}
