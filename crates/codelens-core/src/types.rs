//! Core domain types shared across all codelens-core subsystems.
//!
//! These types form the API contract between modules. Changing them
//! requires updating all consumers, so they should be stable and minimal.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// File-level types
// ---------------------------------------------------------------------------

/// Identity of a source file tracked by the walker: `(path, size, modification time)`.
///
/// Two fingerprints for the same path compare equal when the walker has no
/// reason to believe the file changed, letting the pipeline skip a reparse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Path relative to the project root, POSIX-separated.
    pub path: String,
    /// File size in bytes at the time of the last scan.
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch.
    pub modified_ms: i64,
}

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Supported programming languages and document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python (.py)
    Python,
    /// TypeScript (.ts, .tsx)
    TypeScript,
    /// JavaScript (.js, .jsx)
    JavaScript,
    /// Rust (.rs)
    Rust,
    /// Go (.go)
    Go,
    /// Java (.java)
    Java,
    /// C (.c, .h)
    C,
    /// C++ (.cpp, .cc, .cxx, .hpp, .hxx)
    Cpp,
    /// C# (.cs)
    CSharp,
    /// CSS / SCSS (.css, .scss)
    Css,
    /// Ruby (.rb)
    Ruby,
    /// PHP (.php)
    Php,
    /// Swift (.swift)
    Swift,
    /// Kotlin (.kt, .kts)
    Kotlin,
    /// HTML (.html, .htm)
    Html,
    /// Shell / Bash (.sh, .bash, .zsh)
    Shell,
    /// SQL (.sql)
    Sql,
    /// Markdown (.md, .mdx)
    Markdown,
    /// TOML configuration (.toml)
    Toml,
    /// YAML configuration (.yml, .yaml)
    Yaml,
    /// JSON data (.json, .jsonc)
    Json,
    /// Unknown / unsupported
    Unknown,
}

impl Language {
    /// Detect language from file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "py" => Self::Python,
            "ts" | "tsx" => Self::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "rs" => Self::Rust,
            "go" => Self::Go,
            "java" => Self::Java,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Self::Cpp,
            "cs" => Self::CSharp,
            "css" | "scss" => Self::Css,
            "rb" => Self::Ruby,
            "php" => Self::Php,
            "swift" => Self::Swift,
            "kt" | "kts" => Self::Kotlin,
            "html" | "htm" => Self::Html,
            "sh" | "bash" | "zsh" => Self::Shell,
            "sql" => Self::Sql,
            "md" | "mdx" => Self::Markdown,
            "toml" => Self::Toml,
            "yml" | "yaml" => Self::Yaml,
            "json" | "jsonc" => Self::Json,
            _ => Self::Unknown,
        }
    }

    /// Returns the language identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::JavaScript => "javascript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Css => "css",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Swift => "swift",
            Self::Kotlin => "kotlin",
            Self::Html => "html",
            Self::Shell => "shell",
            Self::Sql => "sql",
            Self::Markdown => "markdown",
            Self::Toml => "toml",
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Unknown => "unknown",
        }
    }

    /// Returns true if this language is parsed via a tree-sitter grammar.
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            Self::Python
                | Self::TypeScript
                | Self::JavaScript
                | Self::Rust
                | Self::Go
                | Self::Java
                | Self::C
                | Self::Cpp
                | Self::CSharp
                | Self::Css
                | Self::Ruby
                | Self::Php
                | Self::Swift
                | Self::Kotlin
        )
    }

    /// Returns true if this is a document/config/data format handled by the
    /// text-structural analyzer rather than a tree-sitter grammar.
    pub fn is_document(&self) -> bool {
        matches!(
            self,
            Self::Markdown | Self::Toml | Self::Yaml | Self::Json | Self::Html | Self::Shell | Self::Sql
        )
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Chunk types
// ---------------------------------------------------------------------------

/// The syntax-level kind of construct a chunk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Free function or top-level function declaration.
    Function,
    /// Method defined inside a class/impl/interface body.
    Method,
    /// Arrow function (JS/TS) bound to a name via a variable declarator.
    Arrow,
    /// Struct or record definition.
    Struct,
    /// Enum definition.
    Enum,
    /// Class definition (languages without a dedicated struct/class split).
    Class,
    /// Trait, interface, or protocol definition.
    Trait,
    /// Implementation block (Rust `impl`).
    Impl,
    /// Type alias definition.
    TypeAlias,
    /// Constant or static variable.
    Const,
    /// Module or namespace declaration.
    Module,
    /// Test function or test block.
    Test,
    /// Top-level statements that don't fit other categories.
    TopLevel,
}

impl ChunkKind {
    /// Every variant, for callers that need to enumerate the vocabulary
    /// (e.g. smart bundle discovery by syntax kind).
    pub const ALL: [ChunkKind; 13] = [
        Self::Function,
        Self::Method,
        Self::Arrow,
        Self::Struct,
        Self::Enum,
        Self::Class,
        Self::Trait,
        Self::Impl,
        Self::TypeAlias,
        Self::Const,
        Self::Module,
        Self::Test,
        Self::TopLevel,
    ];

    /// Serializes to the syntax-kind vocabulary: function / method / arrow /
    /// struct / enum / trait / type-alias / interface, falling back to a
    /// descriptive name for kinds outside that vocabulary.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Arrow => "arrow",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Class => "class",
            Self::Trait => "trait",
            Self::Impl => "impl",
            Self::TypeAlias => "type-alias",
            Self::Const => "const",
            Self::Module => "module",
            Self::Test => "test",
            Self::TopLevel => "top_level",
        }
    }

    /// Parse from the string produced by `as_str`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "function" => Self::Function,
            "method" => Self::Method,
            "arrow" => Self::Arrow,
            "struct" => Self::Struct,
            "enum" => Self::Enum,
            "class" => Self::Class,
            "trait" => Self::Trait,
            "impl" => Self::Impl,
            "type-alias" | "typedef" => Self::TypeAlias,
            "const" => Self::Const,
            "module" => Self::Module,
            "test" => Self::Test,
            _ => Self::TopLevel,
        }
    }

    /// True for any function-shaped chunk (used by the classifier's
    /// "syntax kind is a function" predicates).
    pub fn is_function_like(&self) -> bool {
        matches!(self, Self::Function | Self::Method | Self::Arrow)
    }
}

/// Visibility of a code symbol, as determined by the language analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Accessible from outside the module/crate.
    Public,
    /// Accessible only within the current crate/package.
    Crate,
    /// Accessible from parent class or subclasses.
    Protected,
    /// Accessible only within the defining scope.
    Private,
}

impl Visibility {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Crate => "crate",
            Self::Protected => "protected",
            Self::Private => "private",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "public" => Self::Public,
            "crate" => Self::Crate,
            "protected" => Self::Protected,
            _ => Self::Private,
        }
    }
}

/// Complexity bucket derived from a chunk's numeric complexity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    /// Score < 5.
    Low,
    /// Score < 15.
    Medium,
    /// Score >= 15.
    High,
}

impl ComplexityLevel {
    /// Bucket a raw complexity score per the <5 low, <15 medium, else high rule.
    pub fn from_score(score: u32) -> Self {
        if score < 5 {
            Self::Low
        } else if score < 15 {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }
}

/// A semantically meaningful span of source code with a stable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id: `<file>:<name>:<start-line>`.
    pub id: String,
    /// Short name of the construct.
    pub name: String,
    /// Path relative to the project root, POSIX-separated.
    pub file: String,
    /// Starting line number (1-indexed).
    pub start_line: u32,
    /// Ending line number (1-indexed, inclusive).
    pub end_line: u32,
    /// Syntax-level kind of this chunk.
    pub syntax_kind: ChunkKind,
    /// Verbatim source code of the chunk.
    pub code: String,
    /// Whether the chunk is exported/public per the language's visibility rules.
    pub exported: bool,
    /// Whether the chunk is declared `async`.
    pub is_async: bool,
    /// Imports referenced by identifiers appearing in the chunk body, in source order.
    pub imports_referenced: Vec<String>,
    /// The single highest-confidence purpose tag.
    pub purpose: String,
    /// Domain tags (additive).
    pub domain_tags: BTreeSet<String>,
    /// Pattern tags (additive).
    pub pattern_tags: BTreeSet<String>,
    /// Raw complexity score (branch/loop/error-handling/short-circuit count + 1).
    pub complexity_score: u32,
    /// Bucketed complexity level derived from `complexity_score`.
    pub complexity_level: ComplexityLevel,
    /// Dense embedding vector, L2-normalized, `None` until the embedder backfills it.
    pub embedding: Option<Vec<f32>>,
    /// Names of bundles (excluding the catch-all `master`) that this chunk's file belongs to.
    pub bundles: BTreeSet<String>,
}

impl Chunk {
    /// Build the stable chunk id from its three identifying components.
    pub fn build_id(file: &str, name: &str, start_line: u32) -> String {
        format!("{file}:{name}:{start_line}")
    }
}

// ---------------------------------------------------------------------------
// Import extraction
// ---------------------------------------------------------------------------

/// An import/use statement extracted from source code, used to populate a
/// chunk's `imports_referenced` list.
#[derive(Debug, Clone)]
pub struct ImportStatement {
    /// The raw import path (e.g., "os.path", "crate::config", "./utils").
    pub import_path: String,
    /// Specific names imported, if the language's import syntax names them.
    pub imported_names: Vec<String>,
    /// Line number where the import appears.
    pub line: u32,
}

// ---------------------------------------------------------------------------
// Bundle types
// ---------------------------------------------------------------------------

/// A named collection of files materialized as a single artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Bundle {
    /// User-defined bundle resolved by glob pattern.
    Manual {
        /// Bundle name.
        name: String,
        /// Ordered glob patterns; any match includes the file.
        patterns: Vec<String>,
        /// Materialized file list as of the last resolution.
        files: Vec<String>,
        /// Unix millis of the last successful materialization, if any.
        last_generated_ms: Option<i64>,
        /// Size in bytes of the last materialized artifact.
        size_bytes: u64,
        /// Set when a matching file has changed since the last materialization.
        dirty: bool,
    },
    /// Derived bundle whose membership is computed from chunk classifications.
    Smart {
        /// Bundle name, always `smart:<slug>` or `smart:type-<slug>`.
        name: String,
        /// What selects chunks into this bundle.
        selector: SmartSelector,
    },
}

impl Bundle {
    /// The bundle's name, regardless of variant.
    pub fn name(&self) -> &str {
        match self {
            Self::Manual { name, .. } | Self::Smart { name, .. } => name,
        }
    }

    /// Build the always-present master bundle: a manual bundle matching every file.
    pub fn master() -> Self {
        Self::Manual {
            name: "master".to_string(),
            patterns: vec!["**/*".to_string()],
            files: Vec::new(),
            last_generated_ms: None,
            size_bytes: 0,
            dirty: true,
        }
    }
}

/// Selector for a smart bundle's derived membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SmartSelector {
    /// Chunks whose `purpose` equals this tag.
    Purpose(String),
    /// Chunks whose `syntax_kind` equals this kind.
    SyntaxKind(ChunkKind),
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// A 2-D coordinate for a chunk, valid only while the store's embedding
/// count matches the count recorded when the projection was computed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProjectionPoint {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// One turn in an agent conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    /// Who produced the turn ("user", "assistant", "tool").
    pub role: String,
    /// Turn content.
    pub content: String,
    /// Unix millis when the turn was recorded.
    pub timestamp_ms: i64,
    /// Opaque JSON metadata blob (tool call id, token counts, etc).
    pub metadata: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// A single scored search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matched chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query, in `[-1.0, 1.0]`.
    pub similarity: f64,
}

// ---------------------------------------------------------------------------
// Pipeline events
// ---------------------------------------------------------------------------

/// Events flowing through the indexing pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A file was created or modified and needs (re-)indexing.
    FileChanged {
        /// Path relative to the project root.
        path: PathBuf,
    },
    /// A file was deleted and should be removed from the index.
    FileDeleted {
        /// Path relative to the project root.
        path: PathBuf,
    },
    /// A full repository scan is requested.
    FullScan,
    /// Shutdown the pipeline gracefully.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Live-update fanout events
// ---------------------------------------------------------------------------

/// Events broadcast to tool-server/UI subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FanoutEvent {
    /// A file was reindexed.
    FileChanged {
        /// Path relative to the project root.
        path: String,
    },
    /// A bundle's materialized stats changed.
    BundleUpdated {
        /// Bundle name.
        name: String,
        /// File count after materialization.
        file_count: usize,
        /// Artifact size in bytes after materialization.
        size_bytes: u64,
    },
    /// Bundle regeneration started.
    BundleSyncStarted {
        /// Bundle name.
        name: String,
    },
    /// Bundle regeneration completed successfully.
    BundleSyncCompleted {
        /// Bundle name.
        name: String,
    },
    /// Bundle regeneration failed.
    BundleSyncFailed {
        /// Bundle name.
        name: String,
        /// Error message.
        message: String,
    },
    /// A full point-in-time snapshot, sent to a subscriber on subscribe.
    StatusSnapshot {
        /// Total indexed file count.
        file_count: usize,
        /// Total chunk count.
        chunk_count: usize,
        /// Total bundle count (manual + non-empty smart).
        bundle_count: usize,
    },
}
