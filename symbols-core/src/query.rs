//! Search arguments and their compilation into SQL conditions.
//!
//! Anchored literal patterns (`^foo$`, `^foo`) are answered by indexed
//! equality and GLOB prefix lookups. Everything else falls back to the
//! `REGEXP` function registered on every index connection.

use crate::error::SymbolsError;
use regex_syntax::hir::{Hir, HirKind, Look};
use serde::{Deserialize, Serialize};

/// Hard cap on rows returned by one search, whatever the caller asks for.
pub const MAX_RESULTS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchArgs {
    /// Symbol name pattern; empty matches every name
    #[serde(default)]
    pub query: String,
    /// Treat `query` as a regular expression rather than plain text
    #[serde(default = "default_true")]
    pub is_regexp: bool,
    #[serde(default)]
    pub is_case_sensitive: bool,
    /// Every include pattern must match the symbol's path
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Symbols whose path matches this are dropped
    #[serde(default)]
    pub exclude_pattern: String,
    /// Requested result count; 0 means [`MAX_RESULTS`]
    #[serde(default)]
    pub first: usize,
    /// Overrides the searcher's configured timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for SearchArgs {
    fn default() -> Self {
        Self {
            query: String::new(),
            is_regexp: true,
            is_case_sensitive: false,
            include_patterns: Vec::new(),
            exclude_pattern: String::new(),
            first: 0,
            timeout_ms: None,
        }
    }
}

impl SearchArgs {
    /// Row limit actually applied: `first` clamped into `1..=MAX_RESULTS`.
    pub fn effective_limit(&self) -> usize {
        if self.first == 0 || self.first > MAX_RESULTS {
            MAX_RESULTS
        } else {
            self.first
        }
    }

    /// Name pattern as a regular expression.
    fn name_pattern(&self) -> String {
        if self.is_regexp {
            self.query.clone()
        } else {
            regex::escape(&self.query)
        }
    }
}

/// Searchable column, with its lowercased twin for case-insensitive lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Name,
    Path,
}

impl Column {
    pub fn raw(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Path => "path",
        }
    }

    pub fn lowered(self) -> &'static str {
        match self {
            Self::Name => "name_lower",
            Self::Path => "path_lower",
        }
    }

    fn pick(self, case_sensitive: bool) -> &'static str {
        if case_sensitive {
            self.raw()
        } else {
            self.lowered()
        }
    }
}

/// A WHERE clause fragment. Values are always bound, never interpolated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    True,
    Equals { column: &'static str, value: String },
    Glob { column: &'static str, pattern: String },
    Regexp { column: &'static str, pattern: String },
    Not(Box<Condition>),
    And(Vec<Condition>),
}

impl Condition {
    /// SQL text with `?` placeholders, and the values to bind in order.
    pub fn to_sql(&self) -> (String, Vec<String>) {
        let mut params = Vec::new();
        let sql = self.write_sql(&mut params);
        (sql, params)
    }

    fn write_sql(&self, params: &mut Vec<String>) -> String {
        match self {
            Self::True => "1".to_string(),
            Self::Equals { column, value } => {
                params.push(value.clone());
                format!("{column} = ?")
            }
            Self::Glob { column, pattern } => {
                params.push(pattern.clone());
                format!("{column} GLOB ?")
            }
            Self::Regexp { column, pattern } => {
                params.push(pattern.clone());
                format!("{column} REGEXP ?")
            }
            Self::Not(inner) => format!("NOT ({})", inner.write_sql(params)),
            Self::And(parts) if parts.is_empty() => "1".to_string(),
            Self::And(parts) => parts
                .iter()
                .map(|part| format!("({})", part.write_sql(params)))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

fn is_start(look: &Look) -> bool {
    matches!(look, Look::Start | Look::StartLF | Look::StartCRLF)
}

fn is_end(look: &Look) -> bool {
    matches!(look, Look::End | Look::EndLF | Look::EndCRLF)
}

fn literal_text(hir: &Hir) -> Option<String> {
    match hir.kind() {
        HirKind::Literal(lit) => String::from_utf8(lit.0.to_vec()).ok(),
        _ => None,
    }
}

fn parse_hir(pattern: &str) -> Option<Hir> {
    regex_syntax::Parser::new().parse(pattern).ok()
}

/// `Some(lit)` when `pattern` matches exactly the string `lit` and nothing else.
///
/// Only the parse shape `[start anchor, literal, end anchor]` qualifies.
pub fn literal_equality(pattern: &str) -> Option<String> {
    let hir = parse_hir(pattern)?;
    let HirKind::Concat(parts) = hir.kind() else {
        return None;
    };
    match parts.as_slice() {
        [first, middle, last] => match (first.kind(), last.kind()) {
            (HirKind::Look(start), HirKind::Look(end)) if is_start(start) && is_end(end) => {
                literal_text(middle)
            }
            _ => None,
        },
        _ => None,
    }
}

/// `Some(lit)` when `pattern` matches exactly the strings starting with `lit`.
///
/// Only the parse shape `[start anchor, literal]` qualifies.
pub fn literal_prefix(pattern: &str) -> Option<String> {
    let hir = parse_hir(pattern)?;
    let HirKind::Concat(parts) = hir.kind() else {
        return None;
    };
    match parts.as_slice() {
        [first, rest] => match first.kind() {
            HirKind::Look(start) if is_start(start) => literal_text(rest),
            _ => None,
        },
        _ => None,
    }
}

/// Escape GLOB metacharacters by wrapping each in a one-character class.
pub fn glob_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '[' | ']' | '*' | '?' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Compile one pattern against `column`. An empty pattern yields no condition.
pub fn compile_condition(
    pattern: &str,
    column: Column,
    case_sensitive: bool,
) -> crate::Result<Option<Condition>> {
    if pattern.is_empty() {
        return Ok(None);
    }

    let fold = |s: String| if case_sensitive { s } else { s.to_lowercase() };

    if let Some(literal) = literal_equality(pattern) {
        return Ok(Some(Condition::Equals {
            column: column.pick(case_sensitive),
            value: fold(literal),
        }));
    }

    if let Some(literal) = literal_prefix(pattern) {
        return Ok(Some(Condition::Glob {
            column: column.pick(case_sensitive),
            pattern: format!("{}*", glob_escape(&fold(literal))),
        }));
    }

    // Validate before wrapping: `a)|(.*` only parses once inside `(?i:...)`
    regex::Regex::new(pattern).map_err(|e| SymbolsError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    let pattern = if case_sensitive {
        pattern.to_string()
    } else {
        format!("(?i:{pattern})")
    };
    Ok(Some(Condition::Regexp {
        column: column.raw(),
        pattern,
    }))
}

/// Logical negation. Absent conditions stay absent.
pub fn negate(condition: Option<Condition>) -> Option<Condition> {
    condition.map(|c| Condition::Not(Box::new(c)))
}

/// The full WHERE condition for a search.
pub fn compile_search(args: &SearchArgs) -> crate::Result<Condition> {
    let case_sensitive = args.is_case_sensitive;
    let mut conditions = Vec::new();

    conditions.extend(compile_condition(&args.name_pattern(), Column::Name, case_sensitive)?);
    conditions.extend(negate(compile_condition(
        &args.exclude_pattern,
        Column::Path,
        case_sensitive,
    )?));
    for include in &args.include_patterns {
        conditions.extend(compile_condition(include, Column::Path, case_sensitive)?);
    }

    Ok(match conditions.len() {
        0 => Condition::True,
        1 => conditions.remove(0),
        _ => Condition::And(conditions),
    })
}
