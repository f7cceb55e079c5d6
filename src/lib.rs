pub mod analysis;
pub mod capture;
pub mod format;
pub mod navigator;
pub mod parse;
pub mod progress;
pub mod remap;
pub mod report;
pub mod storage;
pub mod types;
pub mod utils;

use std::path::Path;

use anyhow::{Context, Result};

use analysis::{GraphAnalyzer, Histogram, nominate};
use navigator::ObjectNavigator;
use parse::{DumpParser, ParsedDump, open_payloads};
use progress::{Outcome, Progress};
use remap::IdRemapper;
use report::{ReportGenerator, ReportOptions};
use storage::StorageBacking;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

/// Phase-1 parse of a dump file: header, classes, strings, roots and the
/// object index. Payload bytes stay on disk until a navigator asks.
pub fn parse_dump(path: &Path, progress: &dyn Progress) -> Result<Outcome<ParsedDump>> {
    let parser =
        DumpParser::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(parser.scan(progress)?)
}

/// The whole pipeline: parse, remap, histogram, nominate, traverse, render.
/// Every pass polls `progress`; the first one to observe cancellation stops
/// the run with `Outcome::Cancelled` and nothing is emitted.
pub fn analyze_dump(
    path: &Path,
    options: &ReportOptions,
    format: ReportFormat,
    backing: StorageBacking,
    progress: &dyn Progress,
) -> Result<Outcome<String>> {
    let Outcome::Completed(dump) = parse_dump(path, progress)? else {
        return Ok(Outcome::Cancelled);
    };

    let remapper = IdRemapper::build(&dump.objects, &backing)?;
    let payloads = open_payloads(path, &backing)?;
    let navigator = ObjectNavigator::new(&dump, &remapper, payloads);

    let Outcome::Completed(histogram) = Histogram::compute(&navigator, progress)? else {
        return Ok(Outcome::Cancelled);
    };
    let nominated = nominate(
        &histogram,
        options.class_names.as_deref(),
        options.nominate_top,
    );

    let analyzer = GraphAnalyzer::new(&navigator, &dump, &remapper, backing);
    let Outcome::Completed(traversal) = analyzer.traverse(progress)? else {
        return Ok(Outcome::Cancelled);
    };

    let generator = ReportGenerator::new(
        &dump, &navigator, &remapper, &analyzer, &traversal, &histogram, &nominated, options,
    );
    match format {
        ReportFormat::Text => generator.generate_text(progress),
        ReportFormat::Json => Ok(Outcome::Completed(generator.generate_json()?)),
    }
}
