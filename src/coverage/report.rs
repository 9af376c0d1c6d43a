//! Human-readable coverage reports.

use std::fmt::Write;

use crate::coverage::model::{percent, CoverageReport};

/// Plain-text per-class report.
pub fn render_text(report: &CoverageReport) -> String {
    let mut out = String::new();
    let summary = report.summary();

    let _ = writeln!(out, "Coverage report");
    let _ = writeln!(out, "===============");
    if report.is_partial() {
        let _ = writeln!(out, "(partial: the record was truncated)");
    }
    let _ = writeln!(out, "Overall  {summary}");
    let _ = writeln!(out);

    for class in report.class_summaries() {
        let s = class.summary;
        let _ = writeln!(out, "{}::{}", class.file, class.class);
        let _ = writeln!(out, "  line coverage:        {}", percent(s.line));
        let _ = writeln!(out, "  branch coverage:      {}", percent(s.branch));
        let _ = writeln!(out, "  instruction coverage: {}", percent(s.instruction));
        let _ = writeln!(out, "  method coverage:      {}", percent(s.method));
    }

    out
}

/// Markdown table, one row per class.
pub fn render_markdown(report: &CoverageReport) -> String {
    let mut out = String::new();
    let s = report.summary();

    let _ = writeln!(out, "| Class | Line | Branch | Instruction | Method |");
    let _ = writeln!(out, "|---|---:|---:|---:|---:|");
    for class in report.class_summaries() {
        let c = class.summary;
        let _ = writeln!(
            out,
            "| `{}::{}` | {} | {} | {} | {} |",
            class.file,
            class.class,
            percent(c.line),
            percent(c.branch),
            percent(c.instruction),
            percent(c.method)
        );
    }
    let _ = writeln!(
        out,
        "| **total** | {} | {} | {} | {} |",
        percent(s.line),
        percent(s.branch),
        percent(s.instruction),
        percent(s.method)
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::model::CoverageUnit;

    #[test]
    fn renders_each_class() {
        let report = CoverageReport::from_units(
            vec![
                ("src/a.rs".into(), CoverageUnit::new("A", "f", 1, 4).with_line(2, 1).with_line(3, 0)),
                ("src/b.rs".into(), CoverageUnit::new("B", "g", 1, 4).with_line(2, 5)),
            ],
            false,
        );

        let text = render_text(&report);
        assert!(text.contains("src/a.rs::A\n  line coverage:        50.00%"));
        assert!(text.contains("src/b.rs::B\n  line coverage:        100.00%"));

        let md = render_markdown(&report);
        assert!(md.contains("| `src/a.rs::A` | 50.00% |"));
        assert!(md.lines().last().unwrap().starts_with("| **total** | 66.67% |"));
    }
}
