//! Symbols Core - cached symbol search over repository commits
//!
//! Indexes live in a content-addressed disk cache, one SQLite file per
//! repository and commit. A missing index is built once, either from scratch
//! or by patching the most recent index of the same repository with a diff.

pub mod config;
pub mod context;
pub mod diskcache;
pub mod error;
pub mod git;
pub mod parse;
pub mod query;
pub mod search;
pub mod store;
pub mod symbol;
pub mod writer;

pub use config::Config;
pub use context::Context;
pub use diskcache::{CachedFile, DiskCache, EvictStats};
pub use error::SymbolsError;
pub use git::{Changes, FileSource, GitClient, VcsClient};
pub use parse::{SymbolParser, SymbolStream, TreeSitterParser};
pub use query::{SearchArgs, MAX_RESULTS};
pub use search::Searcher;
pub use store::{IndexStore, SearchResults, SCHEMA_VERSION};
pub use symbol::{SymbolKind, SymbolRecord};
pub use writer::{BuildMode, BuildOutcome, IndexWriter};

/// Result type alias for symbols operations
pub type Result<T> = std::result::Result<T, SymbolsError>;
