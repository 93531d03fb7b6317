//! Markdown rendering of a [`SensitivityReport`] (spec §6.3).
//!
//! Built with `std::fmt::Write` into a single `String`, the same
//! accumulate-then-return pattern the teacher's CLI uses when building
//! JSON summaries field by field before a single `serde_json::json!` call.
//! Section order follows the documented convention: Summary, Bottlenecks,
//! Strong, Weak, Asymmetric, Detailed Results.

use crate::sensitivity::{BottleneckWarning, EffectSummaryEntry, SensitivityReport};
use std::fmt::Write as _;

pub fn render_markdown(report: &SensitivityReport) -> String {
    let mut out = String::new();

    writeln!(out, "# Sensitivity Analysis: {}", report.model_title).unwrap();
    writeln!(out).unwrap();
    writeln!(out, "- Generated: {}", report.timestamp).unwrap();
    writeln!(out, "- Sample count: {}", report.sample_count).unwrap();
    writeln!(out).unwrap();

    writeln!(out, "## Summary").unwrap();
    writeln!(out).unwrap();
    writeln!(
        out,
        "- Strong effects: {}\n- Weak effects: {}\n- Asymmetric effects: {}\n- Bottlenecks: {}",
        report.summary.strong_effects.len(),
        report.summary.weak_effects.len(),
        report.summary.asymmetric_effects.len(),
        report.summary.bottlenecks.len(),
    )
    .unwrap();
    writeln!(out).unwrap();

    writeln!(out, "## Bottlenecks").unwrap();
    writeln!(out).unwrap();
    render_bottlenecks(&mut out, &report.summary.bottlenecks);

    writeln!(out, "## Strong Effects").unwrap();
    writeln!(out).unwrap();
    render_effect_table(&mut out, &report.summary.strong_effects);

    writeln!(out, "## Weak Effects").unwrap();
    writeln!(out).unwrap();
    render_effect_table(&mut out, &report.summary.weak_effects);

    writeln!(out, "## Asymmetric Effects").unwrap();
    writeln!(out).unwrap();
    render_effect_table(&mut out, &report.summary.asymmetric_effects);

    writeln!(out, "## Detailed Results").unwrap();
    writeln!(out).unwrap();
    for exo in &report.results {
        writeln!(out, "### {}", exo.node_id).unwrap();
        writeln!(out).unwrap();
        for run in &exo.multipliers {
            writeln!(out, "Multiplier {:.2}:", run.multiplier).unwrap();
            writeln!(out).unwrap();
            if run.impacts.is_empty() {
                writeln!(out, "_No reachable downstream nodes._").unwrap();
                writeln!(out).unwrap();
                continue;
            }
            writeln!(out, "| Node | Baseline | Intervened | Abs Change | % Change |").unwrap();
            writeln!(out, "|---|---|---|---|---|").unwrap();
            for impact in &run.impacts {
                writeln!(
                    out,
                    "| {} | {:.3} | {:.3} | {:.3} | {:.1}% |",
                    impact.node_id, impact.baseline, impact.intervened, impact.absolute_change, impact.pct_change,
                )
                .unwrap();
            }
            writeln!(out).unwrap();
        }
    }

    out
}

fn render_bottlenecks(out: &mut String, bottlenecks: &[BottleneckWarning]) {
    if bottlenecks.is_empty() {
        writeln!(out, "_No bottlenecks detected._").unwrap();
        writeln!(out).unwrap();
        return;
    }
    for b in bottlenecks {
        match &b.suspected_bottleneck {
            Some(suspect) => writeln!(
                out,
                "- `{}` -> `{}` changed only {:.1}% under a 50% increase; suspected bottleneck: `{}` ({:.1}%)",
                b.source_id,
                b.terminal_id,
                b.terminal_pct_change,
                suspect,
                b.suspected_bottleneck_pct_change.unwrap_or(0.0),
            )
            .unwrap(),
            None => writeln!(
                out,
                "- `{}` -> `{}` changed only {:.1}% under a 50% increase",
                b.source_id, b.terminal_id, b.terminal_pct_change,
            )
            .unwrap(),
        };
    }
    writeln!(out).unwrap();
}

fn render_effect_table(out: &mut String, entries: &[EffectSummaryEntry]) {
    if entries.is_empty() {
        writeln!(out, "_None._").unwrap();
        writeln!(out).unwrap();
        return;
    }
    writeln!(out, "| Source | Target | Avg Increase % | Avg Decrease % | Overall % |").unwrap();
    writeln!(out, "|---|---|---|---|---|").unwrap();
    for e in entries {
        writeln!(
            out,
            "| {} | {} | {:.1}% | {:.1}% | {:.1}% |",
            e.source_id, e.target_id, e.avg_increase_pct, e.avg_decrease_pct, e.overall_pct,
        )
        .unwrap();
    }
    writeln!(out).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensitivity::{DownstreamImpact, ExogenousResult, MultiplierRun, SensitivitySummary};

    fn sample_report() -> SensitivityReport {
        SensitivityReport {
            model_title: "Test Model".into(),
            timestamp: "2026-07-28T00:00:00Z".into(),
            sample_count: 100,
            results: vec![ExogenousResult {
                node_id: "a".into(),
                multipliers: vec![MultiplierRun {
                    multiplier: 1.5,
                    impacts: vec![DownstreamImpact {
                        node_id: "b".into(),
                        node_label: "B".into(),
                        baseline: 5.0,
                        intervened: 7.5,
                        absolute_change: 2.5,
                        pct_change: 50.0,
                        units: None,
                    }],
                }],
            }],
            summary: SensitivitySummary {
                strong_effects: vec![EffectSummaryEntry {
                    source_id: "a".into(),
                    target_id: "b".into(),
                    avg_increase_pct: 50.0,
                    avg_decrease_pct: 50.0,
                    overall_pct: 50.0,
                }],
                weak_effects: vec![],
                asymmetric_effects: vec![],
                bottlenecks: vec![BottleneckWarning {
                    source_id: "a".into(),
                    terminal_id: "b".into(),
                    terminal_pct_change: 3.0,
                    suspected_bottleneck: Some("m".into()),
                    suspected_bottleneck_pct_change: Some(1.0),
                }],
            },
        }
    }

    #[test]
    fn renders_model_title_and_sample_count() {
        let md = render_markdown(&sample_report());
        assert!(md.contains("Test Model"));
        assert!(md.contains("Sample count: 100"));
    }

    #[test]
    fn renders_all_documented_sections_in_order() {
        let md = render_markdown(&sample_report());
        let summary_pos = md.find("## Summary").unwrap();
        let bottlenecks_pos = md.find("## Bottlenecks").unwrap();
        let strong_pos = md.find("## Strong Effects").unwrap();
        let weak_pos = md.find("## Weak Effects").unwrap();
        let asymmetric_pos = md.find("## Asymmetric Effects").unwrap();
        let detailed_pos = md.find("## Detailed Results").unwrap();
        assert!(summary_pos < bottlenecks_pos);
        assert!(bottlenecks_pos < strong_pos);
        assert!(strong_pos < weak_pos);
        assert!(weak_pos < asymmetric_pos);
        assert!(asymmetric_pos < detailed_pos);
    }

    #[test]
    fn renders_bottleneck_with_suspected_node() {
        let md = render_markdown(&sample_report());
        assert!(md.contains("suspected bottleneck: `m`"));
    }

    #[test]
    fn renders_detailed_impact_table_row() {
        let md = render_markdown(&sample_report());
        assert!(md.contains("| b | 5.000 | 7.500 | 2.500 | 50.0% |"));
    }

    #[test]
    fn empty_summary_lists_get_placeholder_text() {
        let mut report = sample_report();
        report.summary.strong_effects.clear();
        let md = render_markdown(&report);
        assert!(md.contains("_None._"));
    }
}
