//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//!
//! Each command has a pure half (`load_program`, `describe_entries`,
//! `check_program`) used by the integration tests, and a `cmd_*` half that
//! prints.

use crate::effects;
use reify_core::{
    Entry, Graph, GraphError, GraphStats, LoadReport, Pattern, Program, Quad, QueryResult, Term,
    catalog, install_aggregation, install_compute, install_effects,
    primitives::{META_TYPE, TYPE},
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// =============================================================================
// FILE LIMITS
// =============================================================================

/// Maximum program file size (100 MB).
///
/// This prevents memory exhaustion from malicious or accidental large files.
const MAX_PROGRAM_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), GraphError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| GraphError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(GraphError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve a program path to a canonical regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, GraphError> {
    let canonical = path.canonicalize().map_err(|e| {
        GraphError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(GraphError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

// =============================================================================
// PROGRAM FILES
// =============================================================================

/// Parse program text. `.json` files are JSON; everything else is TOML.
pub fn parse_program(text: &str, path: &Path) -> Result<Program, GraphError> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(text)
            .map_err(|e| GraphError::ParseError(format!("{}: {}", path.display(), e)))
    } else {
        toml::from_str(text)
            .map_err(|e| GraphError::ParseError(format!("{}: {}", path.display(), e)))
    }
}

/// Read and parse a program file.
pub fn read_program(path: &Path) -> Result<Program, GraphError> {
    let canonical = validate_file_path(path)?;
    validate_file_size(&canonical, MAX_PROGRAM_FILE_SIZE)?;

    let text = std::fs::read_to_string(&canonical)
        .map_err(|e| GraphError::IoError(format!("Cannot read '{}': {}", path.display(), e)))?;
    debug!(path = %canonical.display(), bytes = text.len(), "program read");

    parse_program(&text, &canonical)
}

/// A program loaded into a fresh graph.
#[derive(Debug)]
pub struct Loaded {
    pub program: Program,
    pub graph: Graph,
    pub report: LoadReport,
    /// Asynchronous effects recorded by `Graph::settle`.
    pub settled: usize,
}

/// Read a program, load it with the runtime registries and optionally
/// settle its asynchronous effects.
pub async fn load_program(path: &Path, settle: bool) -> Result<Loaded, GraphError> {
    let program = read_program(path)?;
    let mut graph = Graph::new();
    let report = program.load(&mut graph, &effects::registries())?;

    let settled = if settle { graph.settle().await? } else { 0 };
    if settled > 0 {
        info!(settled, quads = graph.len(), "async effects settled");
    }

    Ok(Loaded {
        program,
        graph,
        report,
        settled,
    })
}

fn print_json(value: &impl Serialize) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Output selection for `run`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub json_mode: bool,
    pub verbose: bool,
    pub dump: bool,
    pub settle: bool,
}

#[derive(Serialize)]
struct RunOutput<'a> {
    report: LoadReport,
    settled: usize,
    results: Vec<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quads: Option<Vec<&'a Quad>>,
}

/// Load a program and print its named query results.
pub async fn cmd_run(path: &Path, options: RunOptions) -> Result<(), GraphError> {
    let loaded = load_program(path, options.settle).await?;
    let results = loaded.program.evaluate(&loaded.graph);

    if options.json_mode {
        print_json(&RunOutput {
            report: loaded.report,
            settled: loaded.settled,
            results,
            quads: options.dump.then(|| loaded.graph.quads().collect()),
        });
        return Ok(());
    }

    if options.verbose {
        println!("Program: {}", path.display());
        println!("Facts:   {}", loaded.report.facts);
        println!("Rules:   {}", loaded.report.rules);
        println!("Quads:   {}", loaded.report.quads);
        println!("Settled: {}", loaded.settled);
        println!();
    }

    for result in &results {
        println!("{} ({} bindings)", result.name, result.bindings.len());
        for binding in &result.bindings {
            println!("  {}", binding);
        }
    }

    if options.dump {
        println!();
        println!("Quads ({})", loaded.graph.len());
        for quad in loaded.graph.quads() {
            println!("  {}", quad);
        }
    }

    Ok(())
}

// =============================================================================
// STATS COMMAND
// =============================================================================

#[derive(Serialize)]
struct StatsOutput {
    #[serde(flatten)]
    stats: GraphStats,
    checksum: String,
}

/// Load a program and print store statistics.
pub async fn cmd_stats(path: &Path, json_mode: bool) -> Result<(), GraphError> {
    let loaded = load_program(path, true).await?;
    let stats = loaded.graph.stats();
    let checksum = loaded.graph.store().checksum();

    if json_mode {
        print_json(&StatsOutput { stats, checksum });
        return Ok(());
    }

    println!("Reify Store Statistics");
    println!("======================");
    println!("Program:    {}", path.display());
    println!();
    println!("Quads:      {}", stats.quads);
    println!("Entities:   {}", stats.entities);
    println!("Attributes: {}", stats.attributes);
    println!("Contexts:   {}", stats.contexts);
    println!("Watches:    {}", stats.watches);
    println!("Pending:    {}", stats.pending_effects);
    println!("Checksum:   {}", checksum);

    Ok(())
}

// =============================================================================
// DESCRIBE COMMAND
// =============================================================================

/// Normalise a `--kind` argument to its meta-type word: `operation` → `OPERATION!`.
fn kind_term(kind: &str) -> Term {
    Term::word(format!("{}!", kind.trim().trim_end_matches('!').to_uppercase()))
}

/// Install the runtime registries into an empty graph and read back what
/// they say about themselves, optionally narrowed to one kind.
///
/// `type` lists the meta-types themselves.
pub fn describe_entries(kind: Option<&str>) -> Result<Vec<Entry>, GraphError> {
    let registries = effects::registries();
    let system = Term::word("system");
    let mut graph = Graph::new();

    let _operators = install_compute(&mut graph, &registries.compute, &system)?;
    let _aggregation = install_aggregation(&mut graph, &registries.aggregation, &system)?;
    let _effects = install_effects(&mut graph, &registries.effects, &system)?;

    let Some(kind) = kind.map(kind_term) else {
        return Ok(catalog(&graph));
    };

    if kind == Term::word(META_TYPE) {
        let metas = graph.query(Pattern::new("?name", TYPE, META_TYPE, "*"));
        return Ok(metas
            .into_iter()
            .filter_map(|binding| {
                Some(Entry {
                    name: binding.get("name")?.clone(),
                    kind: kind.clone(),
                    docs: None,
                    category: None,
                })
            })
            .collect());
    }

    Ok(catalog(&graph)
        .into_iter()
        .filter(|entry| entry.kind == kind)
        .collect())
}

/// List installed productions.
pub fn cmd_describe(kind: Option<&str>, json_mode: bool) -> Result<(), GraphError> {
    let entries = describe_entries(kind)?;

    if json_mode {
        print_json(&entries);
        return Ok(());
    }

    println!("{:<14} {:<14} {:<12} DOCS", "NAME", "KIND", "CATEGORY");
    for entry in &entries {
        println!(
            "{:<14} {:<14} {:<12} {}",
            entry.name.to_string(),
            entry.kind.to_string(),
            entry
                .category
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            entry.docs.as_ref().map(ToString::to_string).unwrap_or_default()
        );
    }
    println!();
    println!("{} entries", entries.len());

    Ok(())
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// What `check` found in a valid program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub facts: usize,
    pub rules: usize,
    pub queries: usize,
}

/// Read and validate a program without loading it.
pub fn check_program(path: &Path) -> Result<CheckReport, GraphError> {
    let program = read_program(path)?;
    program.validate()?;
    Ok(CheckReport {
        facts: program.facts.len(),
        rules: program.rules.len(),
        queries: program.queries.len(),
    })
}

/// Validate a program and print a summary.
pub fn cmd_check(path: &Path, json_mode: bool) -> Result<(), GraphError> {
    let report = check_program(path)?;

    if json_mode {
        print_json(&serde_json::json!({
            "valid": true,
            "facts": report.facts,
            "rules": report.rules,
            "queries": report.queries
        }));
        return Ok(());
    }

    println!(
        "{}: OK ({} facts, {} rules, {} queries)",
        path.display(),
        report.facts,
        report.rules,
        report.queries
    );
    Ok(())
}
