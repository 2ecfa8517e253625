//! sift-dedup CLI - JSONL corpus filtering and near-duplicate removal.

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use indicatif::{ProgressBar, ProgressStyle};
use sift_dedup::{DedupMode, FileOrchestrator, RunConfig, RunSummary, StoreBackendKind};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

/// Dedup mode flag values.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum ModeArg {
    /// One online pass against a store shared by all files
    IntraFile,
    /// Compare each file against every other file
    CrossFile,
}

impl From<ModeArg> for DedupMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::IntraFile => DedupMode::IntraFile,
            ModeArg::CrossFile => DedupMode::CrossFile,
        }
    }
}

/// Store ownership flag values.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum BackendArg {
    /// Workers lock a shared store
    Mutex,
    /// A broker thread owns the store and serves requests
    Broker,
}

impl From<BackendArg> for StoreBackendKind {
    fn from(backend: BackendArg) -> Self {
        match backend {
            BackendArg::Mutex => StoreBackendKind::Mutex,
            BackendArg::Broker => StoreBackendKind::Broker,
        }
    }
}

/// Filter JSON-Lines corpora and remove near-duplicate documents.
///
/// Near-duplicates are found with character-shingle MinHash signatures cut
/// into LSH bands. Colliding band hashes are kept in a blacklist file that
/// later runs can reuse.
#[derive(Parser, Debug)]
#[command(name = "sift-dedup")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Remove near-duplicates from one or more files
    Dedup(DedupArgs),
    /// Run the loader and content filters only, in parallel
    Clean(CleanArgs),
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct DedupArgs {
    /// Input files or glob patterns (.jsonl, .jsonl.zst).
    #[arg(value_name = "INPUT")]
    inputs: Vec<String>,

    /// Output directory; each input is written under its base name.
    #[arg(short, long = "output", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Blacklist file to load at startup and rewrite after each file.
    #[arg(long, value_name = "PATH")]
    blacklist: Option<PathBuf>,

    /// Truncate the blacklist before starting.
    #[arg(long)]
    recreate_blacklist: bool,

    /// Do not seed the seen set from the loaded blacklist.
    #[arg(long)]
    no_seed_seen: bool,

    /// How documents are compared.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Who owns the shared store.
    #[arg(long, value_enum)]
    store_backend: Option<BackendArg>,

    /// Only reject documents matching the loaded blacklist; never update it.
    #[arg(long)]
    offline: bool,

    /// Archive of documents removed in cross-file mode.
    #[arg(long, value_name = "PATH")]
    removed: Option<PathBuf>,

    /// N-gram size for shingling.
    #[arg(short = 'n', long)]
    ngram: Option<usize>,

    /// Number of LSH bands.
    #[arg(long)]
    bands: Option<usize>,

    /// MinHash rows per band.
    #[arg(long)]
    rows: Option<usize>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CleanArgs {
    /// Input file (.jsonl or .jsonl.zst).
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file.
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

/// Flags shared by `dedup` and `clean`.
#[derive(Args, Debug)]
struct CommonArgs {
    /// JSON config file; flags override its values.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Field containing the text.
    #[arg(short = 'f', long)]
    field: Option<String>,

    /// Metadata field to load (repeatable).
    #[arg(long = "metadata-key", value_name = "KEY")]
    metadata_keys: Vec<String>,

    /// Object holding the metadata fields, e.g. "metadata".
    #[arg(long, value_name = "KEY")]
    metadata_root: Option<String>,

    /// Drop malformed records instead of aborting.
    #[arg(long)]
    ignore_errors: bool,

    /// Number of worker threads.
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Reject documents shorter than this many characters.
    #[arg(long)]
    min_chars: Option<usize>,

    /// Reject documents longer than this many characters.
    #[arg(long)]
    max_chars: Option<usize>,

    /// Reject long documents padded with spaces.
    #[arg(long)]
    space_filter: bool,

    /// Reject documents whose quality warnings include header, footer or noisy.
    #[arg(long)]
    quality_warnings: bool,

    /// Newline-delimited list of words that reject a document.
    #[arg(long, value_name = "FILE")]
    ng_words: Option<PathBuf>,

    /// Output results as JSON.
    #[arg(long)]
    json: bool,

    /// Show progress bar.
    #[arg(long)]
    progress: bool,
}

impl CommonArgs {
    /// Defaults, then the config file, then `SIFT_*` variables, then flags.
    fn resolve(&self) -> Result<RunConfig, Box<dyn std::error::Error>> {
        let base = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };
        let mut config = base.apply_env()?;

        if let Some(field) = &self.field {
            config.text_field = field.clone();
        }
        if !self.metadata_keys.is_empty() {
            config.metadata_keys = self.metadata_keys.clone();
        }
        if self.metadata_root.is_some() {
            config.metadata_root = self.metadata_root.clone();
        }
        config.ignore_errors |= self.ignore_errors;
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.min_chars.is_some() {
            config.content.min_chars = self.min_chars;
        }
        if self.max_chars.is_some() {
            config.content.max_chars = self.max_chars;
        }
        config.content.space_filter |= self.space_filter;
        config.content.quality_warnings |= self.quality_warnings;
        if self.ng_words.is_some() {
            config.content.ng_words_path = self.ng_words.clone();
        }
        Ok(config)
    }

    fn progress_bar(&self, msg: &str) -> Option<ProgressBar> {
        (self.progress && !self.json).then(|| create_progress_bar(msg))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

/// Create a progress bar; the orchestrator sets its length.
fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(msg.to_string());
    pb
}

fn run_dedup(args: &DedupArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = args.common.resolve()?;

    if !args.inputs.is_empty() {
        config.inputs = args.inputs.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(path) = &args.blacklist {
        config.blacklist_path = Some(path.clone());
    }
    config.recreate_blacklist |= args.recreate_blacklist;
    if args.no_seed_seen {
        config.seed_seen = false;
    }
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }
    if let Some(backend) = args.store_backend {
        config.store_backend = backend.into();
    }
    if args.offline {
        config.online = false;
    }
    if args.removed.is_some() {
        config.removed_path = args.removed.clone();
    }
    if let Some(n) = args.ngram {
        config.signature.ngram_size = n;
    }
    if let Some(bands) = args.bands {
        config.signature.num_bands = bands;
    }
    if let Some(rows) = args.rows {
        config.signature.rows_per_band = rows;
    }

    if config.inputs.is_empty() {
        return Err("no input files given (pass INPUT or set inputs in --config)".into());
    }

    let pb = args.common.progress_bar("Deduplicating files");
    let mut orchestrator = FileOrchestrator::new(config);
    if let Some(pb) = &pb {
        orchestrator = orchestrator.with_progress(pb.clone());
    }

    let summary = orchestrator.run()?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    report(&summary, args.common.json)
}

fn run_clean(args: &CleanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.common.resolve()?;

    let pb = args.common.progress_bar("Cleaning");
    let mut orchestrator = FileOrchestrator::new(config);
    if let Some(pb) = &pb {
        orchestrator = orchestrator.with_progress(pb.clone());
    }

    let summary = orchestrator.run_clean(&args.input, &args.output)?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    report(&summary, args.common.json)
}

fn report(summary: &RunSummary, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    let totals = &summary.totals;
    eprintln!();
    match summary.mode {
        Some(mode) => eprintln!("Deduplication Results ({mode:?}):"),
        None => eprintln!("Clean Results:"),
    }
    for file in &summary.files {
        eprintln!(
            "  {} -> {}: {} of {} kept",
            file.input.display(),
            file.output.display(),
            file.counts.accepted,
            file.counts.read
        );
    }
    eprintln!();
    eprintln!("  Total documents:   {}", totals.read);
    eprintln!("  Accepted:          {}", totals.accepted);
    eprintln!("  Near-duplicates:   {}", totals.duplicates);
    eprintln!("  Filtered:          {}", totals.filtered);
    eprintln!("  Malformed:         {}", totals.malformed);
    if let Some(store) = &summary.store {
        eprintln!("  Seen components:   {}", store.seen);
        eprintln!("  Blacklisted:       {}", store.blacklist);
    }
    if let Some(removed) = &summary.removed {
        eprintln!("  Removed archive:   {}", removed.display());
    }
    eprintln!();
    eprintln!("Performance:");
    eprintln!("  Processing time:   {:.3}s", summary.elapsed_secs);
    eprintln!("  Throughput:        {:.0} docs/sec", summary.throughput());
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match &cli.command {
        Commands::Dedup(args) => run_dedup(args),
        Commands::Clean(args) => run_clean(args),
        Commands::Completions { shell } => {
            generate(*shell, &mut Cli::command(), "sift-dedup", &mut io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
