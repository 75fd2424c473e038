//! # itf
//!
//! Command-line front end: reads LLM-generated markdown from a file or stdin
//! and applies the file, diff, rename and delete blocks it contains to the
//! project, with undo/redo.
//!
//! ## Modes
//!
//! - default: plan and apply, then print a summary
//! - `--dry-run`: print the plan (and with `--diff`, unified diffs) only
//! - `--output-diff-fix`: print the corrected diffs
//! - `--output-tool`: print the contents of tool blocks
//! - `--undo` / `--redo`: step through the history log
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | General error (file not found, permission denied, I/O error) |
//! | 2 | Invalid command-line arguments |
//! | 3 | Dry-run mode: changes would be made |
//! | 4 | Parse error (invalid UTF-8 or binary input) |
//! | 5 | Some files could not be changed |

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::ValueEnum;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use itf::diff_fix::DEFAULT_SIMILARITY;
use itf::history::STATE_FILE_NAME;
use itf::plan::ExecutionPlan;
use itf::{App, AppConfig, BlockOutcome, FileAction, MatchMode, Summary, normalize_extensions};
use rich_rust::terminal;
use rich_rust::{ColorSystem, Console};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────────────
// Exit Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Semantic exit codes for scripting and CI integration
mod exit_codes {
    /// Success - completed without errors
    pub const SUCCESS: i32 = 0;
    /// General error (file not found, permission denied, I/O error)
    pub const ERROR: i32 = 1;
    /// Invalid command-line arguments
    pub const INVALID_ARGS: i32 = 2;
    /// Dry-run mode: changes would be made
    pub const WOULD_CHANGE: i32 = 3;
    /// Parse error (invalid UTF-8 or binary input)
    pub const PARSE_ERROR: i32 = 4;
    /// At least one file could not be changed
    pub const PARTIAL_FAILURE: i32 = 5;
}

#[derive(Debug)]
struct ArgError(String);

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ArgError {}

#[derive(Debug)]
struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Default)]
struct RunOutcome {
    dry_run: bool,
    would_change: bool,
    failed: bool,
}

impl RunOutcome {
    fn exit_code(&self) -> i32 {
        if self.failed {
            exit_codes::PARTIAL_FAILURE
        } else if self.dry_run && self.would_change {
            exit_codes::WOULD_CHANGE
        } else {
            exit_codes::SUCCESS
        }
    }
}

fn error_chain_has<T: std::error::Error + 'static>(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<T>())
}

fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    if error_chain_has::<ArgError>(err) {
        exit_codes::INVALID_ARGS
    } else if error_chain_has::<ParseError>(err) {
        exit_codes::PARSE_ERROR
    } else {
        exit_codes::ERROR
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CLI Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ColorMode {
    /// Auto-detect color support
    Auto,
    /// Always emit colors (even when not a TTY)
    Always,
    /// Never emit colors
    Never,
}

/// Apply LLM-generated markdown (file, diff, rename and delete blocks) to a project
#[derive(Parser, Debug)]
#[command(
    name = "itf",
    version,
    about,
    long_about = None,
    after_help = "EXIT CODES:\n  0  Success\n  1  General error (file not found, permission denied, I/O error)\n  2  Invalid command-line arguments\n  3  Dry-run mode: changes would be made\n  4  Parse error (invalid UTF-8 or binary input)\n  5  Some files could not be changed\n"
)]
struct Args {
    /// Markdown input. Reads from stdin if not provided.
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Path to config file (default: search for .itfrc)
    #[arg(long = "config", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Ignore config files
    #[arg(long = "no-config")]
    no_config: bool,

    /// Only accept files with these extensions (repeatable, comma-separated).
    /// `diff` alone switches to diff-only mode.
    #[arg(short = 'e', long = "extension", value_name = "EXT", value_delimiter = ',')]
    extensions: Vec<String>,

    /// Directory to resolve paths against (repeatable; default: current dir)
    #[arg(short = 'l', long = "lookup-dir", value_name = "DIR")]
    lookup_dirs: Vec<PathBuf>,

    /// Print the corrected diffs instead of applying anything
    #[arg(short = 'o', long, conflicts_with_all = ["output_tool", "undo", "redo", "dry_run"])]
    output_diff_fix: bool,

    /// Print the contents of tool blocks instead of applying anything
    #[arg(short = 't', long, conflicts_with_all = ["undo", "redo", "dry_run"])]
    output_tool: bool,

    /// Undo the last applied batch
    #[arg(short = 'u', long, conflicts_with = "redo")]
    undo: bool,

    /// Redo the last undone batch
    #[arg(short = 'r', long)]
    redo: bool,

    /// Preview changes without modifying files (exit 0=no changes, 3=would change)
    #[arg(short = 'n', long, conflicts_with_all = ["undo", "redo"])]
    dry_run: bool,

    /// With --dry-run, show unified diffs of the planned changes
    #[arg(short = 'd', long, requires = "dry_run")]
    diff: bool,

    /// Locate diff hunks by similarity instead of exact (whitespace-normalized) match
    #[arg(long)]
    fuzzy: bool,

    /// Minimum mean line similarity for fuzzy matching (0.0-1.0)
    #[arg(long, default_value_t = DEFAULT_SIMILARITY)]
    similarity: f64,

    /// History state file
    #[arg(long, value_name = "PATH", default_value = STATE_FILE_NAME)]
    state_file: PathBuf,

    /// Do not record this run in the history
    #[arg(long = "no-history")]
    no_history: bool,

    /// Verbose output showing what happened to each block
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Color output: auto, always, or never
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorMode,

    /// Output results as JSON for programmatic processing
    #[arg(long, conflicts_with_all = ["verbose", "diff"])]
    json: bool,

    /// Subcommand (config management)
    #[command(subcommand)]
    command: Option<Commands>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config management actions
#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Initialize a new .itfrc config file
    Init {
        /// Create in home directory instead of current
        #[arg(long)]
        global: bool,
    },
    /// Show effective configuration (merged file + CLI)
    Show,
    /// Show path to active config file
    Path,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and Console
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime configuration derived from CLI args
#[derive(Debug)]
struct Config {
    extensions: Vec<String>,
    lookup_dirs: Vec<PathBuf>,
    fuzzy: bool,
    similarity: f64,
    state_file: PathBuf,
    history: bool,
    color: ColorMode,
    verbose: bool,
    diff: bool,
    dry_run: bool,
    json: bool,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            extensions: normalize_extensions(&args.extensions),
            lookup_dirs: args.lookup_dirs.clone(),
            fuzzy: args.fuzzy,
            similarity: args.similarity,
            state_file: args.state_file.clone(),
            history: !args.no_history,
            color: args.color,
            verbose: args.verbose,
            diff: args.diff,
            dry_run: args.dry_run,
            json: args.json,
        }
    }
}

impl Config {
    fn match_mode(&self) -> MatchMode {
        if self.fuzzy {
            MatchMode::Fuzzy {
                threshold: self.similarity,
            }
        } else {
            MatchMode::Exact
        }
    }

    fn app_config(&self) -> AppConfig {
        AppConfig {
            extensions: self.extensions.clone(),
            lookup_dirs: self.lookup_dirs.clone(),
            match_mode: self.match_mode(),
            state_file: self.state_file.clone(),
            record_history: self.history,
        }
    }
}

struct VerboseStyle {
    use_color: bool,
}

impl VerboseStyle {
    fn new(use_color: bool) -> Self {
        Self { use_color }
    }

    fn wrap(&self, tag: &str, text: impl fmt::Display) -> String {
        if self.use_color {
            format!("[{}]{}[/]", tag, text)
        } else {
            text.to_string()
        }
    }

    fn header(&self, text: impl fmt::Display) -> String {
        self.wrap("bold cyan", text)
    }

    fn block(&self, text: impl fmt::Display) -> String {
        self.wrap("yellow", text)
    }

    fn success(&self, text: impl fmt::Display) -> String {
        self.wrap("bold green", text)
    }

    fn failure(&self, text: impl fmt::Display) -> String {
        self.wrap("bold red", text)
    }

    fn dim(&self, text: impl fmt::Display) -> String {
        self.wrap("dim", text)
    }

    fn stat_label(&self, text: impl fmt::Display) -> String {
        self.wrap("bold blue", text)
    }

    fn separator(&self) -> String {
        self.wrap("dim", "───")
    }
}

fn build_console(color: ColorMode) -> (Console, VerboseStyle) {
    match color {
        ColorMode::Never => (Console::new(), VerboseStyle::new(false)),
        ColorMode::Always => {
            let system = terminal::detect_color_system().unwrap_or(ColorSystem::Standard);
            let console = Console::builder()
                .force_terminal(true)
                .color_system(system)
                .build();
            (console, VerboseStyle::new(true))
        }
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                return (Console::new(), VerboseStyle::new(false));
            }

            if std::env::var("FORCE_COLOR").is_ok() {
                let system = terminal::detect_color_system().unwrap_or(ColorSystem::Standard);
                let console = Console::builder()
                    .force_terminal(true)
                    .color_system(system)
                    .build();
                return (console, VerboseStyle::new(true));
            }

            let console = Console::new();
            let use_color = console.is_color_enabled();
            (console, VerboseStyle::new(use_color))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config File Support
// ─────────────────────────────────────────────────────────────────────────────

/// Config file names searched in order
const CONFIG_FILENAMES: &[&str] = &[".itfrc", ".itfrc.toml", "itfrc.toml"];

/// Configuration loaded from a .itfrc file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    /// Extension allow-list
    extensions: Option<Vec<String>>,
    /// Directories to resolve paths against
    lookup_dirs: Option<Vec<PathBuf>>,
    /// Fuzzy hunk matching
    fuzzy: Option<bool>,
    /// Fuzzy similarity threshold (0.0-1.0)
    similarity: Option<f64>,
    /// History state file
    state_file: Option<PathBuf>,
    /// Record history
    history: Option<bool>,
    /// Show verbose output
    verbose: Option<bool>,
    /// Color mode: auto, always, never
    color: Option<ColorMode>,
    /// Output as JSON
    json: Option<bool>,
}

/// Search for a config file starting from the given directory
fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();

    // Search up the directory tree
    loop {
        for filename in CONFIG_FILENAMES {
            let config_path = current.join(filename);
            if config_path.exists() {
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    // Check home directory
    if let Some(home) = dirs::home_dir() {
        for filename in CONFIG_FILENAMES {
            let config_path = home.join(filename);
            if config_path.exists() {
                return Some(config_path);
            }
        }
    }

    None
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Create Config by merging file config with CLI args (CLI wins)
fn create_config(args: &Args) -> Result<Config> {
    let mut config = Config::from(args);

    if args.no_config {
        return Ok(config);
    }

    let config_path = if let Some(ref path) = args.config_file {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }
        Some(path.clone())
    } else {
        let start_dir = args
            .input
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        find_config_file(&start_dir)
    };

    if let Some(path) = config_path {
        let file_config = load_config_file(&path)?;

        // Only apply file values where the CLI kept its default
        if args.extensions.is_empty() {
            if let Some(exts) = file_config.extensions {
                config.extensions = normalize_extensions(&exts);
            }
        }

        if args.lookup_dirs.is_empty() {
            if let Some(dirs) = file_config.lookup_dirs {
                config.lookup_dirs = dirs;
            }
        }

        if !args.fuzzy {
            if let Some(f) = file_config.fuzzy {
                config.fuzzy = f;
            }
        }

        if args.similarity == DEFAULT_SIMILARITY {
            if let Some(s) = file_config.similarity {
                config.similarity = s;
            }
        }

        if args.state_file.as_os_str() == STATE_FILE_NAME {
            if let Some(state_file) = file_config.state_file {
                config.state_file = state_file;
            }
        }

        if !args.no_history {
            if let Some(h) = file_config.history {
                config.history = h;
            }
        }

        if !args.verbose {
            if let Some(v) = file_config.verbose {
                config.verbose = v;
            }
        }

        if args.color == ColorMode::Auto {
            if let Some(c) = file_config.color {
                config.color = c;
            }
        }

        if !args.json {
            if let Some(j) = file_config.json {
                config.json = j;
            }
        }
    }

    if !(0.0..=1.0).contains(&config.similarity) {
        return Err(ArgError("similarity must be between 0.0 and 1.0".to_string()).into());
    }

    Ok(config)
}

/// Default config file content
const DEFAULT_CONFIG: &str = r#"# .itfrc - itf configuration file

# Only accept these extensions ("diff" alone selects diff-only mode)
# extensions = ["rs", "toml"]

# Directories to resolve paths against (default: current directory)
# lookup_dirs = ["."]

# Locate diff hunks by similarity instead of exact match
fuzzy = false
similarity = 0.8

# History
# state_file = ".itf_state.json"
# history = true

# Output options
# verbose = false
# color = "auto"
# json = false
"#;

/// Handle the config subcommand
fn run_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { global } => {
            let path = if *global {
                dirs::home_dir()
                    .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?
                    .join(".itfrc")
            } else {
                PathBuf::from(".itfrc")
            };

            if path.exists() {
                return Err(anyhow::anyhow!(
                    "Config file already exists: {}",
                    path.display()
                ));
            }

            fs::write(&path, DEFAULT_CONFIG)
                .with_context(|| format!("Failed to create config file: {}", path.display()))?;

            eprintln!("Created config file: {}", path.display());
            Ok(())
        }

        ConfigAction::Show => {
            let args = Args::parse_from(["itf"]);
            let config = create_config(&args)?;

            eprintln!("Effective configuration:");
            eprintln!("  extensions: {:?}", config.extensions);
            eprintln!("  lookup_dirs: {:?}", config.lookup_dirs);
            eprintln!("  fuzzy: {}", config.fuzzy);
            eprintln!("  similarity: {}", config.similarity);
            eprintln!("  state_file: {}", config.state_file.display());
            eprintln!("  history: {}", config.history);
            eprintln!("  verbose: {}", config.verbose);
            eprintln!("  color: {:?}", config.color);
            eprintln!("  json: {}", config.json);

            let start_dir = std::env::current_dir().unwrap_or_default();
            if let Some(path) = find_config_file(&start_dir) {
                eprintln!();
                eprintln!("Config file: {}", path.display());
            }

            Ok(())
        }

        ConfigAction::Path => {
            let start_dir = std::env::current_dir().unwrap_or_default();
            if let Some(path) = find_config_file(&start_dir) {
                println!("{}", path.display());
                Ok(())
            } else {
                eprintln!("No config file found");
                std::process::exit(1);
            }
        }
    }
}

fn validate_args(args: &Args) -> Result<()> {
    if !(0.0..=1.0).contains(&args.similarity) {
        return Err(ArgError("--similarity must be between 0.0 and 1.0".to_string()).into());
    }

    if (args.undo || args.redo) && args.input.is_some() {
        return Err(ArgError("--undo/--redo take no input file".to_string()).into());
    }

    if let Some(dir) = args.lookup_dirs.iter().find(|d| !d.is_dir()) {
        return Err(ArgError(format!(
            "--lookup-dir is not a directory: {}",
            dir.display()
        ))
        .into());
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON Output Structures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonOutput<'a> {
    version: &'static str,
    status: &'static str,
    summary: &'a Summary,
    #[serde(skip_serializing_if = "no_blocks")]
    blocks: &'a [BlockOutcome],
}

fn no_blocks(blocks: &&[BlockOutcome]) -> bool {
    blocks.is_empty()
}

fn json_status(summary: &Summary, dry_run: bool) -> &'static str {
    if summary.has_failures() {
        "partial"
    } else if dry_run {
        "dry_run"
    } else {
        "success"
    }
}

fn output_json(summary: &Summary, blocks: &[BlockOutcome], dry_run: bool) -> Result<()> {
    let json_output = JsonOutput {
        version: "1.0",
        status: json_status(summary, dry_run),
        summary,
        blocks,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json_output).context("Failed to serialize JSON output")?
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Input
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum input size (100 MB) - reject larger files to prevent memory issues
const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Read markdown from a file path
fn read_file(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read file metadata: {}", path.display()))?;

    if metadata.len() > MAX_FILE_SIZE {
        return Err(ParseError(format!(
            "File too large: {} ({} MB). Maximum supported size is {} MB.",
            path.display(),
            metadata.len() / (1024 * 1024),
            MAX_FILE_SIZE / (1024 * 1024)
        ))
        .into());
    }

    let source_label = path.display().to_string();
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;

    parse_bytes_to_text(bytes, &source_label)
}

/// Read markdown from stdin
fn read_stdin_content() -> Result<String> {
    let mut buf = Vec::new();
    io::stdin()
        .read_to_end(&mut buf)
        .context("Failed to read stdin")?;
    parse_bytes_to_text(buf, "stdin")
}

/// Convert raw bytes to text, checking for binary content and valid UTF-8
fn parse_bytes_to_text(bytes: Vec<u8>, source_label: &str) -> Result<String> {
    if bytes.contains(&0) {
        return Err(ParseError(format!("Input appears to be binary: {}", source_label)).into());
    }

    String::from_utf8(bytes).map_err(|err| {
        let utf8_err = err.utf8_error();
        let valid_up_to = utf8_err.valid_up_to();
        let byte = err.as_bytes().get(valid_up_to).copied();
        let detail = match byte {
            Some(b) => format!(
                "Invalid UTF-8 at byte position {} (byte value: 0x{:02X}) in {}",
                valid_up_to, b, source_label
            ),
            None => format!("Invalid UTF-8 in {}", source_label),
        };
        ParseError(detail).into()
    })
}

fn read_input(args: &Args) -> Result<String> {
    match &args.input {
        Some(path) => read_file(path),
        None => read_stdin_content(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reporting
// ─────────────────────────────────────────────────────────────────────────────

/// What a plan would do, in the same shape as an applied run
fn plan_summary(app: &App, plan: &ExecutionPlan) -> Summary {
    let mut summary = Summary::default();
    for change in &plan.changes {
        let shown = app.display_path(&change.path);
        match plan.file_actions.get(&change.path) {
            Some(FileAction::Modify) => summary.modified.push(shown),
            _ => summary.created.push(shown),
        }
    }
    for rename in &plan.renames {
        summary.renamed.push(format!(
            "{} -> {}",
            app.display_path(&rename.from),
            app.display_path(&rename.to)
        ));
    }
    summary.deleted = plan.deletes.iter().map(|p| app.display_path(p)).collect();
    summary.failed = plan.failed.iter().map(|p| app.display_path(p)).collect();
    summary
}

/// Print the block-by-block outcome of planning
fn print_block_outcomes(outcomes: &[BlockOutcome], console: &Console, styles: &VerboseStyle) {
    console.print(&styles.header(format!("Found {} block(s)", outcomes.len())));
    for outcome in outcomes {
        let line = match outcome {
            BlockOutcome::Matched { kind, path } => {
                styles.success(format!("  {:?} {}", kind, path))
            }
            BlockOutcome::Collected { kind, entries } => {
                styles.block(format!("  {:?} block: {} entries", kind, entries))
            }
            BlockOutcome::Skipped { kind, reason } => {
                styles.dim(format!("  {:?} block skipped: {}", kind, reason))
            }
            BlockOutcome::Failed { kind, path, reason } => {
                styles.failure(format!("  {:?} {} failed: {}", kind, path, reason))
            }
        };
        console.print(&line);
    }
}

/// Print a run summary
fn print_summary(summary: &Summary, dry_run: bool, console: &Console, styles: &VerboseStyle) {
    if let Some(message) = &summary.message {
        console.print(&styles.dim(message));
    }

    let (created, modified, renamed, deleted) = if dry_run {
        ("Would create:", "Would modify:", "Would rename:", "Would delete:")
    } else {
        ("Created:", "Modified:", "Renamed:", "Deleted:")
    };

    for (label, paths) in [
        (created, &summary.created),
        (modified, &summary.modified),
        (renamed, &summary.renamed),
        (deleted, &summary.deleted),
    ] {
        for path in paths {
            console.print(&format!("{} {}", styles.stat_label(label), path));
        }
    }
    for path in &summary.failed {
        console.print(&format!("{} {}", styles.failure("Failed:"), path));
    }
}

fn print_stats_summary(summary: &Summary, console: &Console, styles: &VerboseStyle) {
    console.print("");
    console.print(&format!(
        "{} Summary {}",
        styles.separator(),
        styles.separator()
    ));
    console.print(&format!(
        "  {} {} created, {} modified, {} renamed, {} deleted",
        styles.stat_label("Files:"),
        summary.created.len(),
        summary.modified.len(),
        summary.renamed.len(),
        summary.deleted.len()
    ));
    if summary.has_failures() {
        console.print(&format!(
            "  {} {}",
            styles.failure("Failed:"),
            summary.failed.len()
        ));
    }
    console.print("");
}

/// Output a unified diff between a file's current and planned content
fn output_diff(filename: &str, original: &str, proposed: &str) -> Result<()> {
    if original == proposed {
        return Ok(());
    }

    let diff = TextDiff::from_lines(original, proposed);
    let mut stdout = io::stdout().lock();

    writeln!(stdout, "--- a/{}", filename)?;
    writeln!(stdout, "+++ b/{} (proposed)", filename)?;

    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        writeln!(stdout, "{}", hunk.header())?;
        for change in hunk.iter_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            let line = change.value();
            if line.ends_with('\n') {
                write!(stdout, "{}{}", sign, line)?;
            } else {
                writeln!(stdout, "{}{}", sign, line)?;
            }
        }
    }

    Ok(())
}

fn output_plan_diffs(app: &App, plan: &ExecutionPlan) -> Result<()> {
    for change in &plan.changes {
        let original = match fs::read_to_string(&change.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", change.path.display()));
            }
        };
        let proposed = itf::patch::render_lines(&change.content);
        output_diff(&app.display_path(&change.path), &original, &proposed)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_codes::SUCCESS,
                _ => exit_codes::INVALID_ARGS,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    // Handle subcommands first
    if let Some(Commands::Config { action }) = &args.command {
        let exit_code = match run_config_command(action) {
            Ok(()) => exit_codes::SUCCESS,
            Err(err) => {
                eprintln!("Error: {:#}", err);
                exit_code_for_error(&err)
            }
        };
        std::process::exit(exit_code);
    }

    let exit_code = match run(args) {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code_for_error(&err)
        }
    };

    std::process::exit(exit_code);
}

fn run(args: Args) -> Result<RunOutcome> {
    validate_args(&args)?;

    let config = create_config(&args)?;
    let (console, styles) = build_console(config.color);
    let mut app = App::new(config.app_config())?;

    if args.undo || args.redo {
        let summary = if args.undo { app.undo()? } else { app.redo()? };
        return report(&summary, &[], &config, &console, &styles);
    }

    let text = read_input(&args)?;

    if args.output_diff_fix {
        print!("{}", app.fix_diffs(&text));
        return Ok(RunOutcome::default());
    }

    if args.output_tool {
        let tools = app.tool_output(&text);
        if !tools.is_empty() {
            println!("{}", tools);
        }
        return Ok(RunOutcome::default());
    }

    if text.trim().is_empty() {
        let summary = Summary::with_message(itf::app::EMPTY_SOURCE_MESSAGE);
        return report(&summary, &[], &config, &console, &styles);
    }

    let plan = app.plan(&text)?;

    if config.verbose {
        print_block_outcomes(&plan.outcomes, &console, &styles);
    }

    if config.dry_run {
        if config.diff {
            output_plan_diffs(&app, &plan)?;
        }
        let mut summary = plan_summary(&app, &plan);
        if plan.is_empty() {
            summary.message = Some(itf::app::NO_CHANGES_MESSAGE.to_string());
        }
        let mut outcome = report(&summary, &plan.outcomes, &config, &console, &styles)?;
        outcome.would_change = !plan.is_empty();
        return Ok(outcome);
    }

    let summary = app.apply_plan(&plan)?;
    report(&summary, &plan.outcomes, &config, &console, &styles)
}

/// Print `summary` in the configured format and derive the outcome
fn report(
    summary: &Summary,
    blocks: &[BlockOutcome],
    config: &Config,
    console: &Console,
    styles: &VerboseStyle,
) -> Result<RunOutcome> {
    if config.json {
        output_json(summary, blocks, config.dry_run)?;
    } else {
        print_summary(summary, config.dry_run, console, styles);
        if config.verbose {
            print_stats_summary(summary, console, styles);
        }
    }

    Ok(RunOutcome {
        dry_run: config.dry_run,
        would_change: false,
        failed: summary.has_failures(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
