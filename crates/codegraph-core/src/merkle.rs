//! Content hashing and change detection for incremental indexing.
//!
//! A workspace's state is a flat map of relative file path to SHA-256 content
//! hash (a "tree"). Diffing two trees yields the [`ChangeSet`] the Indexer
//! Agent feeds into the parsing pipeline — files whose hash is unchanged are
//! never re-parsed.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// SHA-256 hex digest of a byte slice. Shared by file-level and entity-level
/// content hashing so both use the same notion of "changed".
pub fn hash_content(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn hash_file(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Some(format!("{:x}", hasher.finalize()))
}

/// Files to exclude regardless of `.gitignore` contents — binary and
/// generated-artifact extensions nobody wants parsed as source.
const DEFAULT_EXCLUDE_EXTENSIONS: &[&str] = &[
    "*.pyc", "*.pyo", "*.jpg", "*.jpeg", "*.png", "*.gif", "*.bmp", "*.ico", "*.svg", "*.pdf",
    "*.zip", "*.tar", "*.gz", "*.rar", "*.7z", "*.exe", "*.dll", "*.so", "*.dylib", "*.o", "*.a",
    "*.lib", "*.class", "*.jar", "*.war", "*.whl", "*.egg", "*.db", "*.sqlite", "*.sqlite3",
];

/// Directories to always exclude, on top of whatever `.gitignore` covers.
const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    ".DS_Store",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    ".env",
    "target",
    "build",
    "dist",
    ".idea",
    ".vscode",
    ".code-graph-rag",
];

/// Decides which paths the workspace walk should skip.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    exclude_patterns: Vec<glob::Pattern>,
    exclude_dirs: HashSet<String>,
    exclude_hidden: bool,
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        Self::new(None, true)
    }
}

impl ExclusionFilter {
    pub fn new(custom_patterns: Option<&[&str]>, exclude_hidden: bool) -> Self {
        let mut patterns = Vec::new();
        for ext in DEFAULT_EXCLUDE_EXTENSIONS {
            if let Ok(p) = glob::Pattern::new(ext) {
                patterns.push(p);
            }
        }
        if let Some(custom) = custom_patterns {
            for pattern in custom {
                if let Ok(p) = glob::Pattern::new(pattern) {
                    patterns.push(p);
                }
            }
        }
        Self {
            exclude_patterns: patterns,
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
            exclude_hidden,
        }
    }

    pub fn should_exclude(&self, path: &Path) -> bool {
        if self.exclude_hidden {
            for component in path.components() {
                if let std::path::Component::Normal(name) = component {
                    if let Some(s) = name.to_str() {
                        if s.starts_with('.') && s != "." && s != ".." {
                            return true;
                        }
                    }
                }
            }
        }
        for component in path.components() {
            if let std::path::Component::Normal(name) = component {
                if let Some(s) = name.to_str() {
                    if self.exclude_dirs.contains(s) {
                        return true;
                    }
                }
            }
        }
        if let Some(filename) = path.file_name() {
            let filename_str = filename.to_string_lossy();
            if self.exclude_patterns.iter().any(|p| p.matches(&filename_str)) {
                return true;
            }
        }
        let path_str = path.to_string_lossy();
        self.exclude_patterns.iter().any(|p| p.matches(&path_str))
    }

    pub fn excludes_hidden(&self) -> bool {
        self.exclude_hidden
    }
}

/// Relative file path -> content hash for an entire workspace snapshot.
pub type MerkleTree = HashMap<String, String>;

/// Files added, modified, or deleted between two [`MerkleTree`] snapshots.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ChangeSet {
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.modified.is_empty() || !self.added.is_empty() || !self.deleted.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.modified.len() + self.added.len() + self.deleted.len()
    }

    pub fn files_to_process(&self) -> Vec<&str> {
        self.modified
            .iter()
            .chain(self.added.iter())
            .map(|s| s.as_str())
            .collect()
    }
}

/// Summary stats reported alongside a freshly built tree.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TreeStats {
    pub total_files: usize,
    pub total_dirs: usize,
    pub avg_path_depth: f64,
}

/// Walks a workspace, honoring `.gitignore` plus [`ExclusionFilter`], and
/// hashes every surviving file in parallel.
#[derive(Debug, Clone, Default)]
pub struct MerkleTreeManager {
    exclusion_filter: ExclusionFilter,
}

impl MerkleTreeManager {
    pub fn new(exclusion_filter: ExclusionFilter) -> Self {
        Self { exclusion_filter }
    }

    pub fn build_merkle_tree(&self, repo_path: &Path) -> std::io::Result<MerkleTree> {
        let repo_path = repo_path.canonicalize()?;
        let start = std::time::Instant::now();
        let files = self.find_files(&repo_path);
        info!(count = files.len(), "found files to hash");

        let hashes: Vec<(String, Option<String>)> = files
            .par_iter()
            .map(|(abs, rel)| (rel.clone(), hash_file(abs)))
            .collect();

        let mut tree = HashMap::new();
        let mut failed = 0;
        for (rel, hash) in hashes {
            match hash {
                Some(h) => {
                    tree.insert(rel, h);
                }
                None => {
                    failed += 1;
                    debug!(path = %rel, "failed to hash file");
                }
            }
        }
        if failed > 0 {
            warn!(failed, "some files could not be hashed");
        }
        info!(files = tree.len(), elapsed_ms = start.elapsed().as_millis() as u64, "built merkle tree");
        Ok(tree)
    }

    pub fn tree_stats(&self, tree: &MerkleTree) -> TreeStats {
        let total_files = tree.len();
        let dirs: HashSet<&str> = tree
            .keys()
            .filter_map(|p| p.rfind('/').map(|i| &p[..i]))
            .collect();
        let total_depth: usize = tree.keys().map(|p| p.matches('/').count()).sum();
        let avg_path_depth = if total_files > 0 {
            total_depth as f64 / total_files as f64
        } else {
            0.0
        };
        TreeStats {
            total_files,
            total_dirs: dirs.len(),
            avg_path_depth,
        }
    }

    fn find_files(&self, repo_path: &Path) -> Vec<(PathBuf, String)> {
        let mut files = Vec::new();
        let walker = WalkBuilder::new(repo_path)
            .follow_links(false)
            .hidden(self.exclusion_filter.excludes_hidden())
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .add_custom_ignore_filename(".code-graph-rag-ignore")
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "error walking workspace");
                    continue;
                }
            };
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let abs_path = entry.path();
            let rel_path = abs_path
                .strip_prefix(repo_path)
                .unwrap_or(abs_path)
                .to_string_lossy()
                .replace('\\', "/");
            if self.exclusion_filter.should_exclude(Path::new(&rel_path)) {
                continue;
            }
            files.push((abs_path.to_path_buf(), rel_path));
        }
        files
    }

    /// Diffs two snapshots into the set of files an incremental pass must
    /// reparse or purge.
    pub fn detect_changes(&self, old_tree: &MerkleTree, new_tree: &MerkleTree) -> ChangeSet {
        let old_files: HashSet<&String> = old_tree.keys().collect();
        let new_files: HashSet<&String> = new_tree.keys().collect();

        let modified = old_files
            .intersection(&new_files)
            .filter(|p| old_tree.get(**p) != new_tree.get(**p))
            .map(|s| (*s).clone())
            .collect();
        let added = new_files.difference(&old_files).map(|s| (*s).clone()).collect();
        let deleted = old_files.difference(&new_files).map(|s| (*s).clone()).collect();

        ChangeSet {
            modified,
            added,
            deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_content_is_deterministic() {
        assert_eq!(hash_content(b"hello"), hash_content(b"hello"));
        assert_ne!(hash_content(b"hello"), hash_content(b"world"));
    }

    #[test]
    fn exclusion_filter_skips_default_dirs_and_extensions() {
        let filter = ExclusionFilter::default();
        assert!(filter.should_exclude(Path::new("node_modules/left-pad/index.js")));
        assert!(filter.should_exclude(Path::new("target/debug/build.o")));
        assert!(filter.should_exclude(Path::new("src/.hidden-file.rs")));
        assert!(!filter.should_exclude(Path::new("src/lib.rs")));
    }

    #[test]
    fn detect_changes_partitions_added_modified_deleted() {
        let mgr = MerkleTreeManager::default();
        let mut old = MerkleTree::new();
        old.insert("a.rs".into(), "hash-a".into());
        old.insert("b.rs".into(), "hash-b".into());

        let mut new = MerkleTree::new();
        new.insert("a.rs".into(), "hash-a-changed".into());
        new.insert("c.rs".into(), "hash-c".into());

        let changes = mgr.detect_changes(&old, &new);
        assert_eq!(changes.modified, vec!["a.rs".to_string()]);
        assert_eq!(changes.added, vec!["c.rs".to_string()]);
        assert_eq!(changes.deleted, vec!["b.rs".to_string()]);
        assert!(changes.has_changes());
    }

    #[test]
    fn build_merkle_tree_hashes_files_in_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn b() {}").unwrap();

        let mgr = MerkleTreeManager::default();
        let tree = mgr.build_merkle_tree(dir.path()).unwrap();
        assert_eq!(tree.len(), 2);
        assert!(tree.contains_key("a.rs"));
        assert!(tree.contains_key("b.rs"));
    }
}
