use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use hprof_analyzer::progress::{Outcome, Progress};
use hprof_analyzer::report::ReportOptions;
use hprof_analyzer::storage::StorageBacking;
use hprof_analyzer::utils::start_timer;
use hprof_analyzer::{ReportFormat, analyze_dump};

#[derive(Parser)]
#[command(name = "hprof-analyzer")]
#[command(about = "Analyze binary heap dumps for leak suspects")]
struct Cli {
    /// Input heap dump file
    #[arg(short, long)]
    input: PathBuf,

    /// Output report file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Classes to report paths for, comma separated (defaults to
    /// auto-nomination by instance count)
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<String>>,

    /// How many classes to auto-nominate
    #[arg(long, default_value = "5")]
    top_k: usize,

    /// Root-to-instance paths printed per class
    #[arg(long, default_value = "5")]
    paths_per_class: usize,

    /// Class rows per histogram section
    #[arg(long, default_value = "20")]
    histogram_cap: usize,

    /// Keep per-object scratch arrays in temp files instead of memory
    #[arg(long, default_value = "false")]
    file_backed: bool,

    /// Directory for the scratch files (implies --file-backed)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Skip the by-count histogram
    #[arg(long, default_value = "false")]
    no_histogram: bool,

    /// Add a by-size histogram
    #[arg(long, default_value = "false")]
    histogram_by_size: bool,

    /// Add the heaviest-subtrees section
    #[arg(long, default_value = "false")]
    dominator_tree: bool,

    /// Add the ownership grouping section
    #[arg(long, default_value = "false")]
    ownership: bool,

    /// Add the meta section
    #[arg(long, default_value = "false")]
    meta: bool,
}

/// Spinner that follows the engine's phase announcements. The CLI has no
/// cancellation path; library callers bring their own flag.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg}")
                .unwrap(),
        );
        Self { bar }
    }
}

impl Progress for CliProgress {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
        self.bar.tick();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    println!("HPROF Analyzer v0.1.0");
    println!();

    let format = match args.format.as_str() {
        "text" => ReportFormat::Text,
        "json" => ReportFormat::Json,
        other => bail!("unknown format {:?}, expected text or json", other),
    };
    let backing = match args.scratch_dir {
        Some(dir) => StorageBacking::FileIn(dir),
        None if args.file_backed => StorageBacking::File,
        None => StorageBacking::Memory,
    };
    let options = ReportOptions {
        class_names: args.classes,
        nominate_top: args.top_k,
        histogram_by_count: !args.no_histogram,
        histogram_by_size: args.histogram_by_size,
        histogram_class_cap: args.histogram_cap,
        include_ownership_section: args.ownership,
        include_dominator_section: args.dominator_tree,
        include_meta_section: args.meta,
        paths_per_class: args.paths_per_class,
    };

    let progress = CliProgress::new();
    let _t = start_timer(format!("Analyzing {}", args.input.display()));
    let outcome = analyze_dump(&args.input, &options, format, backing, &progress)?;
    std::mem::drop(_t);
    progress.bar.finish_and_clear();

    match outcome {
        Outcome::Completed(report) => match &args.output {
            Some(path) => fs::write(path, report)
                .with_context(|| format!("writing report to {}", path.display()))?,
            None => print!("{}", report),
        },
        Outcome::Cancelled => println!("Analysis cancelled."),
    }
    Ok(())
}
