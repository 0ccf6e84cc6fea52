//! Symbol records produced by parsers and stored in index files

use serde::{Deserialize, Serialize};

/// One occurrence of a named program entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub name: String,
    /// Repository-relative path of the containing file
    pub path: String,
    /// 1-based line of the symbol name
    pub line: u32,
    /// 0-based byte column of the symbol name
    pub character: u32,
    pub kind: String,
    pub language: String,
    /// Name of the enclosing scope (class, impl target, receiver type), or empty
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub parent_kind: String,
    #[serde(default)]
    pub signature: String,
    /// Entity is not visible outside its file
    #[serde(default)]
    pub file_limited: bool,
}

/// Kinds emitted by the built-in parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Interface,
    Trait,
    Type,
    Module,
    Constant,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Interface => "interface",
            Self::Trait => "trait",
            Self::Type => "type",
            Self::Module => "module",
            Self::Constant => "constant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(Self::Function),
            "method" => Some(Self::Method),
            "class" => Some(Self::Class),
            "struct" => Some(Self::Struct),
            "enum" => Some(Self::Enum),
            "interface" => Some(Self::Interface),
            "trait" => Some(Self::Trait),
            "type" => Some(Self::Type),
            "module" => Some(Self::Module),
            "constant" => Some(Self::Constant),
            _ => None,
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
