use crate::engine::AnalysisReport;
use std::fmt::Write;

pub fn print_summary(report: &AnalysisReport, show_skipped: bool) {
    eprint!("{}", render_summary(report, show_skipped));
}

pub fn render_summary(report: &AnalysisReport, show_skipped: bool) -> String {
    let mut out = String::new();
    let run = &report.run;

    let _ = writeln!(
        out,
        "\nRun '{}' (#{}): {} scored, {} skipped",
        run.name,
        run.id,
        report.results.len(),
        report.skipped.len()
    );

    for r in report.failed_items() {
        let _ = writeln!(
            out,
            "❌ {:<24} {:<20} {}",
            r.testcase_name,
            r.strategy_name,
            truncate(r.error().unwrap_or("unknown error"), 120)
        );
    }

    for g in &report.group_failures {
        let _ = writeln!(
            out,
            "⛔ group {} ({} items not scored): {}",
            g.group, g.items, g.error
        );
    }

    if show_skipped {
        for s in &report.skipped {
            let _ = writeln!(
                out,
                "⏭️  {:<24} SKIPPED ({})",
                s.testcase_name, s.reason
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<28} {:>8} {:>6} {:>6}",
        "metric", "mean", "ok", "failed"
    );
    for s in report.summaries.values() {
        let mean = s
            .mean_score
            .map(|m| format!("{:.4}", m))
            .unwrap_or_else(|| "n/a".into());
        let _ = writeln!(
            out,
            "{:<28} {:>8} {:>6} {:>6}",
            s.metric_name, mean, s.successful_cases, s.failed_cases
        );
    }

    if report.cancelled {
        let _ = writeln!(
            out,
            "\n⚠️  analysis cancelled: {} items were not dispatched",
            report.undispatched
        );
    }

    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GroupFailure;
    use crate::model::{GroupKey, MetricSummary, Run, RunStatus, ScoreResult, SkipNote};
    use std::collections::BTreeMap;

    fn report() -> AnalysisReport {
        let k = GroupKey::new("exact_match", "Truthfulness");
        let mut summaries = BTreeMap::new();
        summaries.insert(
            "Truthfulness".to_string(),
            MetricSummary {
                metric_name: "Truthfulness".into(),
                mean_score: Some(1.0),
                successful_cases: 1,
                failed_cases: 1,
            },
        );
        AnalysisReport {
            run: Run {
                id: 1,
                name: "nightly".into(),
                target_id: None,
                start_ts: None,
                end_ts: None,
                status: RunStatus::Completed,
            },
            summaries,
            results: vec![
                ScoreResult::scored(&k, "a", 1.0),
                ScoreResult::failed(&k, "b", "parse error: no score"),
            ],
            skipped: vec![SkipNote {
                detail_id: 3,
                testcase_name: "c".into(),
                reason: "detail status is SKIPPED".into(),
            }],
            group_failures: vec![GroupFailure {
                group: "bogus:Truthfulness".into(),
                items: 2,
                error: "unknown strategy 'bogus'".into(),
            }],
            cancelled: false,
            undispatched: 0,
        }
    }

    #[test]
    fn lists_failures_groups_and_metric_lines() {
        let text = render_summary(&report(), true);
        assert!(text.contains("Run 'nightly' (#1): 2 scored, 1 skipped"));
        assert!(text.contains("parse error: no score"));
        assert!(text.contains("group bogus:Truthfulness (2 items not scored)"));
        assert!(text.contains("SKIPPED (detail status is SKIPPED)"));
        assert!(text.contains("1.0000"));
        assert!(!text.contains("cancelled"));
    }
}
