//! coverage/model.rs
//!
//! Uniform in-memory coverage representation. Reports are immutable values:
//! merging or re-collecting always produces a new report.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

/// Covered/missed pair for one kind of countable item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Counter {
    pub covered: u32,
    pub missed: u32,
}

impl Counter {
    pub fn new(covered: u32, missed: u32) -> Self {
        Self { covered, missed }
    }

    pub fn total(&self) -> u32 {
        self.covered.saturating_add(self.missed)
    }

    /// Covered fraction in `[0, 1]`; an empty counter is 0.
    pub fn ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            t => f64::from(self.covered) / f64::from(t),
        }
    }

    /// Max-merge: never sums, so re-collecting the same run is idempotent.
    pub fn merge(&self, other: &Counter) -> Counter {
        let total = self.total().max(other.total());
        let covered = self.covered.max(other.covered).min(total);
        Counter {
            covered,
            missed: total - covered,
        }
    }

    fn add(&self, other: &Counter) -> Counter {
        Counter {
            covered: self.covered.saturating_add(other.covered),
            missed: self.missed.saturating_add(other.missed),
        }
    }
}

/// Identity of a unit inside a file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct UnitKey {
    first_line: u32,
    last_line: u32,
    class: String,
    method: String,
}

/// A (class, method, line-range) triple with its counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageUnit {
    pub class: String,
    pub method: String,
    pub first_line: u32,
    pub last_line: u32,
    pub instructions: Counter,
    pub branches: Counter,
    /// line number → hit count
    pub line_hits: BTreeMap<u32, u64>,
}

impl CoverageUnit {
    pub fn new(class: impl Into<String>, method: impl Into<String>, first_line: u32, last_line: u32) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            first_line,
            last_line,
            instructions: Counter::default(),
            branches: Counter::default(),
            line_hits: BTreeMap::new(),
        }
    }

    pub fn with_instructions(mut self, covered: u32, missed: u32) -> Self {
        self.instructions = Counter::new(covered, missed);
        self
    }

    pub fn with_branches(mut self, covered: u32, missed: u32) -> Self {
        self.branches = Counter::new(covered, missed);
        self
    }

    pub fn with_line(mut self, line: u32, hits: u64) -> Self {
        let slot = self.line_hits.entry(line).or_insert(0);
        *slot = (*slot).max(hits);
        self
    }

    /// Lines with at least one hit vs. instrumented lines without.
    pub fn lines(&self) -> Counter {
        let covered = self.line_hits.values().filter(|h| **h > 0).count();
        let total = self.line_hits.len();
        Counter::new(to_u32(covered), to_u32(total - covered))
    }

    pub fn is_covered(&self) -> bool {
        self.instructions.covered > 0 || self.line_hits.values().any(|h| *h > 0)
    }

    fn key(&self) -> UnitKey {
        UnitKey {
            first_line: self.first_line,
            last_line: self.last_line,
            class: self.class.clone(),
            method: self.method.clone(),
        }
    }

    fn merge(&self, other: &CoverageUnit) -> CoverageUnit {
        let mut line_hits = self.line_hits.clone();
        for (line, hits) in &other.line_hits {
            let slot = line_hits.entry(*line).or_insert(0);
            *slot = (*slot).max(*hits);
        }

        CoverageUnit {
            class: self.class.clone(),
            method: self.method.clone(),
            first_line: self.first_line,
            last_line: self.last_line,
            instructions: self.instructions.merge(&other.instructions),
            branches: self.branches.merge(&other.branches),
            line_hits,
        }
    }
}

/// All units recorded for one source file, ordered by line range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileCoverage {
    units: Vec<CoverageUnit>,
}

impl FileCoverage {
    pub fn units(&self) -> &[CoverageUnit] {
        &self.units
    }

    /// Max hits per line across every unit touching that line.
    pub fn line_hits(&self) -> BTreeMap<u32, u64> {
        let mut out = BTreeMap::new();
        for unit in &self.units {
            for (line, hits) in &unit.line_hits {
                let slot = out.entry(*line).or_insert(0);
                *slot = u64::max(*slot, *hits);
            }
        }
        out
    }

    pub fn hits_at(&self, line: u32) -> Option<u64> {
        self.units
            .iter()
            .filter_map(|u| u.line_hits.get(&line).copied())
            .max()
    }
}

/// Aggregate ratios in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub instruction: f64,
    pub branch: f64,
    pub line: f64,
    pub method: f64,
    pub class: f64,
}

impl CoverageSummary {
    pub fn delta_from(&self, baseline: &CoverageSummary) -> CoverageSummary {
        CoverageSummary {
            instruction: self.instruction - baseline.instruction,
            branch: self.branch - baseline.branch,
            line: self.line - baseline.line,
            method: self.method - baseline.method,
            class: self.class - baseline.class,
        }
    }
}

/// Format a `[0, 1]` ratio as a percentage with two decimals.
pub fn percent(ratio: f64) -> String {
    format!("{:.2}%", ratio * 100.0)
}

impl fmt::Display for CoverageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {} | branch {} | instruction {} | method {} | class {}",
            percent(self.line),
            percent(self.branch),
            percent(self.instruction),
            percent(self.method),
            percent(self.class),
        )
    }
}

/// Immutable coverage snapshot: file → ordered units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    files: BTreeMap<String, FileCoverage>,
    partial: bool,
}

impl CoverageReport {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a report from raw `(file, unit)` pairs. Units sharing an identity
    /// collapse with the max rule.
    pub fn from_units<I>(units: I, partial: bool) -> Self
    where
        I: IntoIterator<Item = (String, CoverageUnit)>,
    {
        let mut by_file: BTreeMap<String, BTreeMap<UnitKey, CoverageUnit>> = BTreeMap::new();

        for (file, unit) in units {
            let slot = by_file.entry(file).or_default();
            let key = unit.key();
            let merged = match slot.remove(&key) {
                Some(existing) => existing.merge(&unit),
                None => unit,
            };
            slot.insert(key, merged);
        }

        let files = by_file
            .into_iter()
            .map(|(file, units)| {
                (
                    file,
                    FileCoverage {
                        units: units.into_values().collect(),
                    },
                )
            })
            .collect();

        Self { files, partial }
    }

    /// True when the underlying record was truncated.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &FileCoverage)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn file(&self, path: &str) -> Option<&FileCoverage> {
        self.files.get(path)
    }

    pub fn units(&self) -> impl Iterator<Item = (&str, &CoverageUnit)> {
        self.files
            .iter()
            .flat_map(|(f, fc)| fc.units.iter().map(move |u| (f.as_str(), u)))
    }

    /// Combine two reports. Commutative and idempotent.
    pub fn merge(&self, other: &CoverageReport) -> CoverageReport {
        let units = self
            .units()
            .chain(other.units())
            .map(|(f, u)| (f.to_string(), u.clone()));

        CoverageReport::from_units(units, self.partial || other.partial)
    }

    pub fn merge_all<'a, I>(reports: I) -> CoverageReport
    where
        I: IntoIterator<Item = &'a CoverageReport>,
    {
        reports
            .into_iter()
            .fold(CoverageReport::empty(), |acc, r| acc.merge(r))
    }

    pub fn summary(&self) -> CoverageSummary {
        let mut instructions = Counter::default();
        let mut branches = Counter::default();
        let mut lines = Counter::default();
        let mut methods = Counter::default();
        let mut classes: BTreeMap<(&str, &str), bool> = BTreeMap::new();

        for (file, fc) in &self.files {
            instructions = instructions.add(&fc.units.iter().fold(Counter::default(), |c, u| c.add(&u.instructions)));
            branches = branches.add(&fc.units.iter().fold(Counter::default(), |c, u| c.add(&u.branches)));

            let per_line = fc.line_hits();
            let covered = per_line.values().filter(|h| **h > 0).count();
            lines = lines.add(&Counter::new(to_u32(covered), to_u32(per_line.len() - covered)));

            for unit in &fc.units {
                let hit = unit.is_covered();
                methods = methods.add(&Counter::new(u32::from(hit), u32::from(!hit)));
                *classes.entry((file.as_str(), unit.class.as_str())).or_insert(false) |= hit;
            }
        }

        let covered_classes = classes.values().filter(|c| **c).count();
        let class_counter = Counter::new(to_u32(covered_classes), to_u32(classes.len() - covered_classes));

        CoverageSummary {
            instruction: instructions.ratio(),
            branch: branches.ratio(),
            line: lines.ratio(),
            method: methods.ratio(),
            class: class_counter.ratio(),
        }
    }

    /// Per-class view: `(file, class)` → summary of that class's units.
    pub fn class_summaries(&self) -> Vec<ClassCoverage> {
        let mut grouped: BTreeMap<(String, String), Vec<(String, CoverageUnit)>> = BTreeMap::new();
        for (file, unit) in self.units() {
            grouped
                .entry((file.to_string(), unit.class.clone()))
                .or_default()
                .push((file.to_string(), unit.clone()));
        }

        grouped
            .into_iter()
            .map(|((file, class), units)| ClassCoverage {
                file,
                class,
                summary: CoverageReport::from_units(units, false).summary(),
            })
            .collect()
    }

    pub fn class_names(&self) -> BTreeSet<String> {
        self.units().map(|(_, u)| u.class.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassCoverage {
    pub file: String,
    pub class: String,
    pub summary: CoverageSummary,
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(method: &str, lines: &[(u32, u64)]) -> CoverageUnit {
        lines
            .iter()
            .fold(CoverageUnit::new("Calc", method, 1, 10), |u, (l, h)| u.with_line(*l, *h))
    }

    #[test]
    fn counter_merge_takes_max() {
        let a = Counter::new(3, 7);
        let b = Counter::new(5, 5);
        assert_eq!(a.merge(&b), Counter::new(5, 5));
        assert_eq!(a.merge(&a), a);
    }

    #[test]
    fn duplicate_units_collapse_with_max_not_sum() {
        let report = CoverageReport::from_units(
            vec![
                ("calc.rs".to_string(), unit("add", &[(2, 1), (3, 0)])),
                ("calc.rs".to_string(), unit("add", &[(2, 4), (3, 2)])),
            ],
            false,
        );

        let file = report.file("calc.rs").unwrap();
        assert_eq!(file.units().len(), 1);
        assert_eq!(file.hits_at(2), Some(4));
        assert_eq!(file.hits_at(3), Some(2));
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let a = CoverageReport::from_units(vec![("a.py".into(), unit("f", &[(1, 1), (2, 0)]))], false);
        let b = CoverageReport::from_units(
            vec![
                ("a.py".into(), unit("f", &[(2, 3)])),
                ("b.py".into(), unit("g", &[(5, 1)])),
            ],
            true,
        );

        assert_eq!(a.merge(&b), b.merge(&a));
        assert_eq!(a.merge(&a), a);
        assert!(a.merge(&b).is_partial());
    }

    #[test]
    fn summary_ratios() {
        let report = CoverageReport::from_units(
            vec![
                (
                    "calc.rs".into(),
                    unit("add", &[(2, 1), (3, 1)]).with_instructions(6, 2).with_branches(1, 1),
                ),
                ("calc.rs".into(), CoverageUnit::new("Calc", "sub", 20, 25).with_line(21, 0).with_instructions(0, 4)),
            ],
            false,
        );

        let s = report.summary();
        assert!((s.instruction - 0.5).abs() < 1e-9);
        assert!((s.branch - 0.5).abs() < 1e-9);
        assert!((s.line - 2.0 / 3.0).abs() < 1e-9);
        assert!((s.method - 0.5).abs() < 1e-9);
        assert!((s.class - 1.0).abs() < 1e-9);
        assert_eq!(percent(s.branch), "50.00%");
    }

    #[test]
    fn empty_report_summary_is_zero() {
        assert_eq!(CoverageReport::empty().summary(), CoverageSummary::default());
    }
}
