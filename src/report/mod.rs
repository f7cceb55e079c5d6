use std::collections::BTreeMap;
use std::io::Write;

use ahash::AHashMap;
use anyhow::Result;
use fixedbitset::FixedBitSet;
use itertools::Itertools;
use serde::Serialize;

use crate::analysis::{GraphAnalyzer, Histogram, HistogramEntry, Traversal};
use crate::navigator::ObjectNavigator;
use crate::parse::ParsedDump;
use crate::progress::{Outcome, Progress};
use crate::remap::IdRemapper;
use crate::types::DenseId;
use crate::utils::{escape_string, format_bytes};

const DOMINATOR_TOP: usize = 10;
const DOMINATOR_CHILD_CAP: usize = 5;
const DOMINATOR_DEPTH: usize = 3;

/// Which report sections to emit and how much of each. Every toggle is
/// independent; nominated classes feed only the per-class path section.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Explicit class names to report paths for; None auto-nominates the
    /// top classes by instance count.
    pub class_names: Option<Vec<String>>,
    pub nominate_top: usize,
    pub histogram_by_count: bool,
    pub histogram_by_size: bool,
    pub histogram_class_cap: usize,
    pub include_ownership_section: bool,
    pub include_dominator_section: bool,
    pub include_meta_section: bool,
    pub paths_per_class: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            class_names: None,
            nominate_top: 5,
            histogram_by_count: true,
            histogram_by_size: false,
            histogram_class_cap: 20,
            include_ownership_section: false,
            include_dominator_section: false,
            include_meta_section: false,
            paths_per_class: 5,
        }
    }
}

/// Renders the analysis results as text or JSON. Output is deterministic
/// for a given dump and options: every section has a stable sort order and
/// nothing depends on hash-map iteration.
pub struct ReportGenerator<'a> {
    dump: &'a ParsedDump,
    navigator: &'a ObjectNavigator<'a>,
    remapper: &'a IdRemapper,
    analyzer: &'a GraphAnalyzer<'a>,
    traversal: &'a Traversal,
    histogram: &'a Histogram,
    nominated: &'a [String],
    options: &'a ReportOptions,
}

impl<'a> ReportGenerator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dump: &'a ParsedDump,
        navigator: &'a ObjectNavigator<'a>,
        remapper: &'a IdRemapper,
        analyzer: &'a GraphAnalyzer<'a>,
        traversal: &'a Traversal,
        histogram: &'a Histogram,
        nominated: &'a [String],
        options: &'a ReportOptions,
    ) -> Self {
        Self {
            dump,
            navigator,
            remapper,
            analyzer,
            traversal,
            histogram,
            nominated,
            options,
        }
    }

    /// Renders the full text report. The buffer is only handed back on
    /// completion; a cancelled run emits nothing.
    pub fn generate_text(&self, progress: &dyn Progress) -> Result<Outcome<String>> {
        progress.phase("rendering report");
        let mut out: Vec<u8> = Vec::new();

        writeln!(out, "Heap Dump Analysis")?;
        writeln!(out, "==================")?;
        writeln!(out)?;

        if self.options.include_meta_section {
            self.write_meta(&mut out)?;
        }
        self.write_roots_summary(&mut out)?;

        for class_name in self.nominated {
            if progress.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            self.write_class_paths(&mut out, class_name)?;
        }

        if self.options.histogram_by_count {
            self.write_histogram(&mut out, "by instance count", self.histogram.by_count_desc())?;
        }
        if self.options.histogram_by_size {
            self.write_histogram(&mut out, "by shallow size", self.histogram.by_size_desc())?;
        }

        if self.options.include_dominator_section {
            if progress.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            self.write_dominators(&mut out)?;
        }
        if self.options.include_ownership_section {
            if progress.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            self.write_ownership(&mut out)?;
        }

        Ok(Outcome::Completed(String::from_utf8_lossy(&out).into_owned()))
    }

    pub fn generate_json(&self) -> Result<String> {
        let total_shallow: u64 = self
            .histogram
            .entries()
            .iter()
            .map(|e| e.total_shallow_size)
            .sum();
        let report = JsonReport {
            summary: JsonSummary {
                total_objects: self.navigator.object_count(),
                reachable_objects: self.traversal.visited_count(),
                classes: self.dump.classes.len(),
                gc_roots: self.dump.roots.len(),
                total_shallow_bytes: total_shallow,
            },
            nominated: self.nominated,
            histogram: self
                .histogram
                .by_count_desc()
                .into_iter()
                .take(self.options.histogram_class_cap)
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }

    fn write_meta(&self, out: &mut Vec<u8>) -> Result<()> {
        writeln!(out, "Meta")?;
        writeln!(out, "----")?;
        writeln!(out, "  dump: {}", self.dump.path.display())?;
        writeln!(
            out,
            "  identifier size: {} bytes",
            self.dump.header.id_size.bytes()
        )?;
        writeln!(
            out,
            "  created: {} ms since epoch",
            self.dump.header.timestamp_millis
        )?;
        writeln!(
            out,
            "  objects: {} ({} reachable)",
            self.navigator.object_count(),
            self.traversal.visited_count()
        )?;
        writeln!(
            out,
            "  classes: {}, strings: {}, roots: {}",
            self.dump.classes.len(),
            self.dump.strings.len(),
            self.dump.roots.len()
        )?;
        writeln!(out)?;
        Ok(())
    }

    fn write_roots_summary(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut counts: AHashMap<&'static str, usize> = AHashMap::new();
        for root in &self.dump.roots {
            *counts.entry(root.reason.label()).or_default() += 1;
        }

        writeln!(out, "GC Roots: {}", self.dump.roots.len())?;
        writeln!(out, "------------")?;
        for (label, count) in counts.into_iter().sorted() {
            writeln!(out, "  {}: {}", label, count)?;
        }
        writeln!(out)?;
        Ok(())
    }

    /// Root-to-instance paths for one nominated class. Instances are
    /// visited in dense-id order; each hop line shows every reference in
    /// the parent that targets the child, so two fields holding the same
    /// object appear as two labels on one line.
    fn write_class_paths(&self, out: &mut Vec<u8>, class_name: &str) -> Result<()> {
        let instances: Vec<DenseId> = (0..self.navigator.object_count() as DenseId)
            .filter(|&dense| {
                self.navigator
                    .type_name(dense)
                    .map(|name| name == class_name)
                    .unwrap_or(false)
            })
            .collect();

        // Several histogram entries can render under one name; the section
        // covers all of them.
        let shallow: u64 = self
            .histogram
            .named(class_name)
            .map(|e| e.total_shallow_size)
            .sum();
        writeln!(
            out,
            "Instances of {}: {} ({} shallow)",
            class_name,
            instances.len(),
            format_bytes(shallow)
        )?;
        writeln!(out, "------------")?;
        if instances.is_empty() {
            writeln!(out, "  (no instances)")?;
            writeln!(out)?;
            return Ok(());
        }

        let root_reasons = self.root_reasons();
        for &dense in instances.iter().take(self.options.paths_per_class) {
            if !self.traversal.is_visited(dense)? {
                writeln!(
                    out,
                    "  {} @{}: unreachable from any GC root",
                    class_name,
                    self.remapper.original_of(dense)?
                )?;
                continue;
            }

            let path = self.traversal.path_from_root(dense)?;
            let root_label = root_reasons.get(&path[0]).copied().unwrap_or("unknown");
            writeln!(out, "  [{} root] {}", root_label, self.display_name(path[0])?)?;
            for (hop, window) in path.windows(2).enumerate() {
                let labels = self.labels_between(window[0], window[1])?;
                writeln!(
                    out,
                    "  {}{} -> {}",
                    "  ".repeat(hop + 1),
                    labels,
                    self.display_name(window[1])?
                )?;
            }
        }
        if instances.len() > self.options.paths_per_class {
            writeln!(
                out,
                "  ... and {} more instances",
                instances.len() - self.options.paths_per_class
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn write_histogram(
        &self,
        out: &mut Vec<u8>,
        order: &str,
        sorted: Vec<&HistogramEntry>,
    ) -> Result<()> {
        writeln!(out, "Histogram ({})", order)?;
        writeln!(out, "------------")?;
        writeln!(out, "  {:>10}  {:>12}  class", "count", "shallow")?;
        for entry in sorted.iter().take(self.options.histogram_class_cap) {
            writeln!(
                out,
                "  {:>10}  {:>12}  {}",
                entry.instance_count,
                format_bytes(entry.total_shallow_size),
                entry.name
            )?;
        }
        if sorted.len() > self.options.histogram_class_cap {
            writeln!(
                out,
                "  ... and {} more classes",
                sorted.len() - self.options.histogram_class_cap
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    /// The heaviest spanning-forest subtrees. A node nested inside an
    /// already-printed subtree is skipped at the top level, it shows up
    /// under its ancestor instead.
    fn write_dominators(&self, out: &mut Vec<u8>) -> Result<()> {
        let n = self.navigator.object_count();
        let mut candidates: Vec<DenseId> = Vec::with_capacity(self.traversal.visited_count());
        let mut children: Vec<Vec<DenseId>> = vec![Vec::new(); n];
        for index in 0..self.traversal.visited_count() {
            let dense = self.traversal.bfs_at(index)?;
            candidates.push(dense);
            if let Some(parent) = self.traversal.parent_of(dense)? {
                children[parent as usize].push(dense);
            }
        }

        candidates.sort_by_key(|&dense| {
            (
                std::cmp::Reverse(self.traversal.subtree_size(dense).unwrap_or(0)),
                dense,
            )
        });

        writeln!(out, "Heaviest objects (spanning-forest subtrees)")?;
        writeln!(out, "------------")?;
        let mut printed = FixedBitSet::with_capacity(n);
        let mut emitted = 0;
        for &dense in &candidates {
            if emitted == DOMINATOR_TOP {
                break;
            }
            if self.has_printed_ancestor(&printed, dense)? {
                continue;
            }
            self.write_dominator_node(out, &children, dense, 0)?;
            printed.insert(dense as usize);
            emitted += 1;
        }
        writeln!(out)?;
        Ok(())
    }

    fn has_printed_ancestor(&self, printed: &FixedBitSet, dense: DenseId) -> Result<bool> {
        let mut current = dense;
        while let Some(parent) = self.traversal.parent_of(current)? {
            if printed.contains(parent as usize) {
                return Ok(true);
            }
            current = parent;
        }
        Ok(false)
    }

    fn write_dominator_node(
        &self,
        out: &mut Vec<u8>,
        children: &[Vec<DenseId>],
        dense: DenseId,
        depth: usize,
    ) -> Result<()> {
        writeln!(
            out,
            "  {}{}: {} retained ({} shallow)",
            "  ".repeat(depth),
            self.display_name(dense)?,
            format_bytes(self.traversal.subtree_size(dense)? as u64),
            format_bytes(self.navigator.shallow_size(dense)?)
        )?;
        if depth == DOMINATOR_DEPTH {
            return Ok(());
        }

        let mut kids = children[dense as usize].clone();
        kids.sort_by_key(|&kid| {
            (
                std::cmp::Reverse(self.traversal.subtree_size(kid).unwrap_or(0)),
                kid,
            )
        });
        for &kid in kids.iter().take(DOMINATOR_CHILD_CAP) {
            self.write_dominator_node(out, children, kid, depth + 1)?;
        }
        if kids.len() > DOMINATOR_CHILD_CAP {
            writeln!(
                out,
                "  {}... and {} more children",
                "  ".repeat(depth + 1),
                kids.len() - DOMINATOR_CHILD_CAP
            )?;
        }
        Ok(())
    }

    /// Reachable instances grouped by the reference that first discovered
    /// them, i.e. "who holds these and through which field".
    fn write_ownership(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut groups: BTreeMap<(String, String), (u64, u64)> = BTreeMap::new();
        for index in 0..self.traversal.visited_count() {
            let dense = self.traversal.bfs_at(index)?;
            let Some(parent) = self.traversal.parent_of(dense)? else {
                continue;
            };
            let owner = self.display_name(parent)?;
            let label = match self.analyzer.owner_label(self.traversal, parent, dense)? {
                Some(label) => label.to_string(),
                None => "...".to_string(),
            };
            let slot = groups.entry((owner, label)).or_insert((0, 0));
            slot.0 += 1;
            slot.1 += self.navigator.shallow_size(dense)?;
        }

        writeln!(out, "Ownership (instances by owning reference)")?;
        writeln!(out, "------------")?;
        for ((owner, label), (count, bytes)) in &groups {
            writeln!(
                out,
                "  {}{}: {} instances, {}",
                owner,
                label,
                count,
                format_bytes(*bytes)
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    /// Type name with control characters escaped; dump strings are
    /// arbitrary bytes and must not break the line-oriented layout.
    fn display_name(&self, dense: DenseId) -> crate::types::Result<String> {
        Ok(escape_string(self.navigator.type_name(dense)?))
    }

    /// All labels in `parent` whose reference targets `child`, joined.
    fn labels_between(&self, parent: DenseId, child: DenseId) -> Result<String> {
        Ok(self
            .navigator
            .references_of(parent)?
            .iter()
            .filter(|r| r.target == child)
            .map(|r| r.label.to_string())
            .join(", "))
    }

    /// First recorded root reason per rooted dense id.
    fn root_reasons(&self) -> AHashMap<DenseId, &'static str> {
        let mut reasons: AHashMap<DenseId, &'static str> = AHashMap::new();
        for root in &self.dump.roots {
            if let Ok(Some(dense)) = self.remapper.dense_of(root.object_id) {
                reasons.entry(dense).or_insert(root.reason.label());
            }
        }
        reasons
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: JsonSummary,
    nominated: &'a [String],
    histogram: Vec<&'a HistogramEntry>,
}

#[derive(Serialize)]
struct JsonSummary {
    total_objects: usize,
    reachable_objects: usize,
    classes: usize,
    gc_roots: usize,
    total_shallow_bytes: u64,
}
