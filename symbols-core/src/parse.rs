//! Symbol extraction with tree-sitter.
//!
//! [`TreeSitterParser`] reads files through a [`FileSource`], parses them on
//! the rayon pool and hands symbols to the caller through a bounded channel,
//! so the returned [`SymbolStream`] is lazy and can only be consumed once.

use crate::context::Context;
use crate::error::SymbolsError;
use crate::git::FileSource;
use crate::symbol::{SymbolKind, SymbolRecord};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tree_sitter::Node;

/// Lazy, finite, single-use sequence of parsed symbols.
pub type SymbolStream = Box<dyn Iterator<Item = crate::Result<SymbolRecord>> + Send>;

pub trait SymbolParser: Send + Sync {
    /// Symbols of `paths` at `commit`; an empty `paths` means every file.
    fn parse(
        &self,
        ctx: &Context,
        repo: &str,
        commit: &str,
        paths: &[String],
    ) -> crate::Result<SymbolStream>;
}

const CHANNEL_CAPACITY: usize = 1024;
const MAX_SIGNATURE_CHARS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl Language {
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = std::path::Path::new(path).extension()?.to_str()?;
        match ext {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript | Self::Tsx => "typescript",
            Self::Go => "go",
        }
    }

    fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    fn is_js_like(self) -> bool {
        matches!(self, Self::JavaScript | Self::TypeScript | Self::Tsx)
    }
}

pub struct TreeSitterParser {
    source: Arc<dyn FileSource>,
    max_file_size: u64,
}

impl TreeSitterParser {
    pub fn new(source: Arc<dyn FileSource>, max_file_size: u64) -> Self {
        Self {
            source,
            max_file_size,
        }
    }
}

impl SymbolParser for TreeSitterParser {
    fn parse(
        &self,
        ctx: &Context,
        repo: &str,
        commit: &str,
        paths: &[String],
    ) -> crate::Result<SymbolStream> {
        let candidates = if paths.is_empty() {
            self.source.list_files(ctx, repo, commit)?
        } else {
            paths.to_vec()
        };
        let files: Vec<(String, Language)> = candidates
            .into_iter()
            .filter_map(|path| Language::from_path(&path).map(|lang| (path, lang)))
            .collect();
        tracing::debug!(parent: ctx.span(), repo, commit, files = files.len(), "parsing files");

        let (tx, rx) = crossbeam_channel::bounded::<crate::Result<SymbolRecord>>(CHANNEL_CAPACITY);
        let source = Arc::clone(&self.source);
        let ctx = ctx.clone();
        let repo = repo.to_string();
        let commit = commit.to_string();
        let max_file_size = self.max_file_size;

        std::thread::Builder::new()
            .name("symbol-parser".to_string())
            .spawn(move || {
                // Set once an error was sent or the consumer went away
                let closed = AtomicBool::new(false);

                files.par_iter().for_each_with(tx.clone(), |tx, (path, language)| {
                    if closed.load(Ordering::Relaxed) || ctx.is_done() {
                        return;
                    }
                    let file = FileRef {
                        repo: &repo,
                        commit: &commit,
                        path,
                        language: *language,
                    };
                    match parse_file(source.as_ref(), &ctx, &file, max_file_size) {
                        Ok(symbols) => {
                            for symbol in symbols {
                                if tx.send(Ok(symbol)).is_err() {
                                    closed.store(true, Ordering::Relaxed);
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            if !closed.swap(true, Ordering::Relaxed) {
                                let _ = tx.send(Err(err));
                            }
                        }
                    }
                });

                if let Some(err) = ctx.err() {
                    if !closed.load(Ordering::Relaxed) {
                        let _ = tx.send(Err(err));
                    }
                }
            })?;

        Ok(Box::new(rx.into_iter()))
    }
}

struct FileRef<'a> {
    repo: &'a str,
    commit: &'a str,
    path: &'a str,
    language: Language,
}

fn parse_file(
    source: &dyn FileSource,
    ctx: &Context,
    file: &FileRef<'_>,
    max_file_size: u64,
) -> crate::Result<Vec<SymbolRecord>> {
    let bytes = source.read_file(ctx, file.repo, file.commit, file.path)?;
    if bytes.len() as u64 > max_file_size {
        tracing::debug!(path = file.path, size = bytes.len(), "skipping large file");
        return Ok(Vec::new());
    }
    let Ok(text) = String::from_utf8(bytes) else {
        tracing::debug!(path = file.path, "skipping non-UTF-8 file");
        return Ok(Vec::new());
    };
    extract_symbols(file.path, &text, file.language)
}

/// All symbols declared in one file.
pub fn extract_symbols(
    path: &str,
    source: &str,
    language: Language,
) -> crate::Result<Vec<SymbolRecord>> {
    let parse_error = |message: String| SymbolsError::Parse {
        path: path.to_string(),
        message,
    };

    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| parse_error(e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| parse_error("parser produced no tree".to_string()))?;

    let mut extractor = Extractor {
        path,
        source,
        language,
        symbols: Vec::new(),
    };
    extractor.visit(tree.root_node(), None);
    Ok(extractor.symbols)
}

/// Enclosing class, impl or trait
#[derive(Clone)]
struct Scope {
    name: String,
    kind: SymbolKind,
}

struct Extractor<'a> {
    path: &'a str,
    source: &'a str,
    language: Language,
    symbols: Vec<SymbolRecord>,
}

impl Extractor<'_> {
    fn visit(&mut self, node: Node, scope: Option<&Scope>) {
        if let Some((kind, name)) = self.classify(node, scope) {
            let parent = match (self.language, node.kind()) {
                (Language::Go, "method_declaration") => self.go_receiver(node),
                _ => scope.cloned(),
            };
            self.push(node, name, kind, parent);
        }

        let inner = self.scope_for(node);
        let child_scope = inner.as_ref().or(scope);
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                self.visit(child, child_scope);
            }
        }
    }

    fn push(&mut self, node: Node, name: Node, kind: SymbolKind, parent: Option<Scope>) {
        let position = name.start_position();
        let name_text = self.text(name);
        let file_limited = self.is_file_limited(node, &name_text);
        self.symbols.push(SymbolRecord {
            name: name_text,
            path: self.path.to_string(),
            line: position.row as u32 + 1,
            character: position.column as u32,
            kind: kind.as_str().to_string(),
            language: self.language.name().to_string(),
            parent: parent.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
            parent_kind: parent
                .as_ref()
                .map(|p| p.kind.as_str().to_string())
                .unwrap_or_default(),
            signature: self.signature(node),
            file_limited,
        });
    }

    /// The symbol kind and name node if `node` declares a symbol.
    fn classify<'t>(&self, node: Node<'t>, scope: Option<&Scope>) -> Option<(SymbolKind, Node<'t>)> {
        let name = || node.child_by_field_name("name");
        let kind = match self.language {
            Language::Rust => match node.kind() {
                "function_item" | "function_signature_item" if scope.is_some() => SymbolKind::Method,
                "function_item" | "function_signature_item" => SymbolKind::Function,
                "struct_item" | "union_item" => SymbolKind::Struct,
                "enum_item" => SymbolKind::Enum,
                "trait_item" => SymbolKind::Trait,
                "type_item" => SymbolKind::Type,
                "mod_item" => SymbolKind::Module,
                "const_item" | "static_item" => SymbolKind::Constant,
                _ => return None,
            },
            Language::Python => match node.kind() {
                "function_definition" if scope.is_some() => SymbolKind::Method,
                "function_definition" => SymbolKind::Function,
                "class_definition" => SymbolKind::Class,
                "assignment" => return self.python_constant(node),
                _ => return None,
            },
            Language::JavaScript | Language::TypeScript | Language::Tsx => match node.kind() {
                "function_declaration" | "generator_function_declaration" => SymbolKind::Function,
                "class_declaration" | "abstract_class_declaration" => SymbolKind::Class,
                "method_definition" | "method_signature" | "abstract_method_signature" => {
                    SymbolKind::Method
                }
                "interface_declaration" => SymbolKind::Interface,
                "type_alias_declaration" => SymbolKind::Type,
                "enum_declaration" => SymbolKind::Enum,
                "internal_module" => SymbolKind::Module,
                "variable_declarator" => return self.js_top_level_const(node),
                _ => return None,
            },
            Language::Go => match node.kind() {
                "function_declaration" => SymbolKind::Function,
                "method_declaration" => SymbolKind::Method,
                "type_spec" | "type_alias" => match node.child_by_field_name("type")?.kind() {
                    "struct_type" => SymbolKind::Struct,
                    "interface_type" => SymbolKind::Interface,
                    _ => SymbolKind::Type,
                },
                "const_spec" => SymbolKind::Constant,
                _ => return None,
            },
        };
        Some((kind, name()?))
    }

    /// Scope that `node` opens for its children.
    fn scope_for(&self, node: Node) -> Option<Scope> {
        match (self.language, node.kind()) {
            (Language::Rust, "impl_item") => Some(Scope {
                name: self.impl_target(node)?,
                kind: SymbolKind::Struct,
            }),
            (Language::Rust, "trait_item") => Some(Scope {
                name: self.text(node.child_by_field_name("name")?),
                kind: SymbolKind::Trait,
            }),
            (Language::Python, "class_definition") => Some(Scope {
                name: self.text(node.child_by_field_name("name")?),
                kind: SymbolKind::Class,
            }),
            (lang, "class_declaration" | "abstract_class_declaration" | "class")
                if lang.is_js_like() =>
            {
                Some(Scope {
                    name: self.text(node.child_by_field_name("name")?),
                    kind: SymbolKind::Class,
                })
            }
            (lang, "interface_declaration") if lang.is_js_like() => Some(Scope {
                name: self.text(node.child_by_field_name("name")?),
                kind: SymbolKind::Interface,
            }),
            _ => None,
        }
    }

    /// `Foo` for `impl Foo`, `impl<T> Foo<T>` and `impl Trait for Foo`.
    fn impl_target(&self, node: Node) -> Option<String> {
        let ty = node.child_by_field_name("type")?;
        if ty.kind() == "generic_type" {
            if let Some(inner) = ty.child_by_field_name("type") {
                return Some(self.text(inner));
            }
        }
        Some(self.text(ty))
    }

    fn go_receiver(&self, node: Node) -> Option<Scope> {
        let receiver = node.child_by_field_name("receiver")?;
        let param = receiver.named_child(0)?;
        let mut ty = param.child_by_field_name("type")?;
        if ty.kind() == "pointer_type" {
            ty = ty.named_child(0)?;
        }
        if ty.kind() == "generic_type" {
            ty = ty.child_by_field_name("type")?;
        }
        Some(Scope {
            name: self.text(ty),
            kind: SymbolKind::Type,
        })
    }

    /// `NAME = ...` at module level with an all-caps name.
    fn python_constant<'t>(&self, node: Node<'t>) -> Option<(SymbolKind, Node<'t>)> {
        let statement = node.parent()?;
        if statement.kind() != "expression_statement" || statement.parent()?.kind() != "module" {
            return None;
        }
        let left = node.child_by_field_name("left")?;
        if left.kind() != "identifier" {
            return None;
        }
        let name = self.text(left);
        let is_constant = name.chars().any(|c| c.is_ascii_uppercase())
            && name
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        is_constant.then_some((SymbolKind::Constant, left))
    }

    /// Top-level `const` declarators: functions when bound to a function
    /// expression, constants otherwise.
    fn js_top_level_const<'t>(&self, node: Node<'t>) -> Option<(SymbolKind, Node<'t>)> {
        let declaration = node.parent()?;
        if declaration.kind() != "lexical_declaration" || !is_top_level(declaration) {
            return None;
        }
        let is_const = declaration
            .child(0)
            .is_some_and(|keyword| keyword.kind() == "const");
        if !is_const {
            return None;
        }
        let name = node.child_by_field_name("name")?;
        if name.kind() != "identifier" {
            return None;
        }
        let kind = match node.child_by_field_name("value").map(|v| v.kind()) {
            Some("arrow_function" | "function_expression" | "function" | "generator_function") => {
                SymbolKind::Function
            }
            _ => SymbolKind::Constant,
        };
        Some((kind, name))
    }

    fn is_file_limited(&self, node: Node, name: &str) -> bool {
        match self.language {
            Language::Rust => {
                // Trait items take the trait's visibility
                let in_trait = node
                    .parent()
                    .and_then(|p| p.parent())
                    .is_some_and(|gp| gp.kind() == "trait_item");
                !in_trait && find_child_by_kind(node, "visibility_modifier").is_none()
            }
            Language::Python => name.starts_with('_') && !name.starts_with("__"),
            Language::JavaScript | Language::TypeScript | Language::Tsx => {
                let declaration = if node.kind() == "variable_declarator" {
                    match node.parent() {
                        Some(parent) => parent,
                        None => return false,
                    }
                } else {
                    node
                };
                declaration.parent().is_some_and(|p| p.kind() == "program")
            }
            Language::Go => false,
        }
    }

    /// Declaration header: text up to the body, on one line.
    fn signature(&self, node: Node) -> String {
        let start = node.start_byte();
        let end = match node.child_by_field_name("body") {
            Some(body) => body.start_byte(),
            None => {
                let text = &self.source[start..node.end_byte()];
                start + text.find('\n').unwrap_or(text.len())
            }
        };
        let header = self.source[start..end]
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let header = header.trim_end_matches(['{', ':', ';']).trim_end();
        header.chars().take(MAX_SIGNATURE_CHARS).collect()
    }

    fn text(&self, node: Node) -> String {
        node_text(&node, self.source)
    }
}

/// Declared directly in the program, or in an `export` at program level.
fn is_top_level(node: Node) -> bool {
    match node.parent() {
        Some(parent) if parent.kind() == "program" => true,
        Some(parent) if parent.kind() == "export_statement" => {
            parent.parent().is_some_and(|p| p.kind() == "program")
        }
        _ => false,
    }
}

fn find_child_by_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.kind() == kind {
                return Some(child);
            }
        }
    }
    None
}

fn node_text(node: &Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}
