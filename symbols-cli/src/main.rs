//! Symbols CLI - search symbols at any commit of a local repository

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use symbols_core::config::DEFAULT_CONFIG;
use symbols_core::{
    Config, Context, DiskCache, GitClient, IndexWriter, SearchArgs, SearchResults, Searcher,
    SymbolsError, TreeSitterParser,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "symbols")]
#[command(about = "Symbol search over cached per-commit indexes", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "SYMBOLS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the cache directory
    #[arg(long, global = true, env = "SYMBOLS_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Directory containing the repositories, addressed by name
    #[arg(long, global = true, env = "SYMBOLS_REPOS_ROOT")]
    repos_root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search symbol names at a revision
    Search {
        /// Repository name under the repos root
        repo: String,
        /// Any revision git can resolve (HEAD, branch, tag, sha)
        rev: String,
        /// Regular expression matched against symbol names
        pattern: String,

        #[arg(short = 'c', long)]
        case_sensitive: bool,

        /// Match the pattern as plain text
        #[arg(short = 'F', long)]
        literal: bool,

        /// Only paths matching this regex (repeatable)
        #[arg(short, long)]
        include: Vec<String>,

        /// Drop paths matching this regex
        #[arg(short, long)]
        exclude: Option<String>,

        /// Maximum results (capped at 500)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Evict least recently used indexes down to the size budget
    Evict {
        /// Size budget in megabytes (default from config)
        #[arg(long)]
        max_size_mb: Option<u64>,
    },

    /// Write a commented default config file
    InitConfig {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    let result = match &cli.command {
        Commands::InitConfig { path, force } => cmd_init_config(path, *force),
        command => load_config(&cli).and_then(|config| match command {
            Commands::Search {
                repo,
                rev,
                pattern,
                case_sensitive,
                literal,
                include,
                exclude,
                limit,
            } => {
                let args = SearchArgs {
                    query: pattern.clone(),
                    is_regexp: !literal,
                    is_case_sensitive: *case_sensitive,
                    include_patterns: include.clone(),
                    exclude_pattern: exclude.clone().unwrap_or_default(),
                    first: limit.unwrap_or(0),
                    timeout_ms: None,
                };
                cmd_search(&config, repo, rev, &args, json)
            }
            Commands::Evict { max_size_mb } => cmd_evict(&config, *max_size_mb, json),
            Commands::InitConfig { .. } => Ok(()),
        }),
    };

    if let Err(e) = result {
        if json {
            let error_json = serde_json::json!({
                "code": error_code(&e),
                "message": e.to_string(),
            });
            eprintln!("{:#}", error_json);
        } else {
            eprintln!("{}: {}", "Error".red(), e);
        }
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> symbols_core::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.cache_dir {
        config.cache.dir = dir.clone();
    }
    if let Some(root) = &cli.repos_root {
        config.git.repos_root = root.clone();
    }
    Ok(config)
}

fn error_code(err: &SymbolsError) -> &'static str {
    match err {
        e if e.is_invalid_request() => "invalid_request",
        SymbolsError::DeadlineExceeded => "deadline_exceeded",
        SymbolsError::Cancelled => "cancelled",
        SymbolsError::Git { .. } => "git_error",
        SymbolsError::ConfigParse(_) => "config_error",
        _ => "error",
    }
}

fn cmd_search(
    config: &Config,
    repo: &str,
    rev: &str,
    args: &SearchArgs,
    json: bool,
) -> symbols_core::Result<()> {
    let git = Arc::new(GitClient::new(&config.git.repos_root));
    let ctx = Context::background().with_timeout(config.search_timeout());
    let commit = git.resolve_commit(&ctx, repo, rev)?;

    let parser = Arc::new(TreeSitterParser::new(git.clone(), config.parser.max_file_size));
    let cache =
        DiskCache::new(&config.cache.dir).with_background_timeout(config.background_timeout());
    let writer = IndexWriter::new(cache.clone(), parser, git);
    let searcher = Searcher::new(cache, Arc::new(writer)).with_timeout(config.search_timeout());

    let runtime = tokio::runtime::Runtime::new()?;
    let results = runtime.block_on(searcher.search(&ctx, repo, &commit, args))?;

    if json {
        print_json(&results);
    } else {
        print_results(&results, &commit);
    }
    Ok(())
}

fn print_results(results: &SearchResults, commit: &str) {
    if results.symbols.is_empty() {
        println!("{}", "No symbols found".yellow());
        return;
    }
    for symbol in &results.symbols {
        let location = format!("{}:{}:{}", symbol.path, symbol.line, symbol.character + 1);
        let scope = if symbol.parent.is_empty() {
            String::new()
        } else {
            format!(" ({} {})", symbol.parent_kind, symbol.parent)
        };
        println!(
            "{} {} {}{}",
            location.blue(),
            symbol.kind.dimmed(),
            symbol.name.green().bold(),
            scope.dimmed()
        );
        if !symbol.signature.is_empty() {
            println!("    {}", symbol.signature);
        }
    }

    let short = commit.get(..12).unwrap_or(commit);
    let mut summary = format!("{} symbols at {}", results.symbols.len(), short);
    if results.limit_hit {
        summary.push_str(" (limit hit, narrow the pattern or raise --limit)");
    }
    println!("\n{}", summary.dimmed());
}

fn cmd_evict(config: &Config, max_size_mb: Option<u64>, json: bool) -> symbols_core::Result<()> {
    let max_bytes = match max_size_mb {
        Some(mb) => mb.saturating_mul(1024 * 1024),
        None => config.cache_max_bytes(),
    };
    let stats = DiskCache::new(&config.cache.dir).evict(max_bytes)?;

    if json {
        print_json(&stats);
    } else {
        println!(
            "{}: {} indexes ({:.1} MB scanned, budget {:.1} MB)",
            "Evicted".green(),
            stats.evicted,
            stats.cache_size as f64 / 1_048_576.0,
            max_bytes as f64 / 1_048_576.0
        );
    }
    Ok(())
}

fn cmd_init_config(path: &Path, force: bool) -> symbols_core::Result<()> {
    if path.exists() && !force {
        return Err(SymbolsError::InvalidRequest(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    println!("{} {}", "Created".green(), path.display());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("{}: {}", "Error".red(), e),
    }
}
