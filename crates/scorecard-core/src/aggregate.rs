use crate::model::{MetricSummary, ScoreResult};
use std::collections::BTreeMap;

#[derive(Default)]
struct Partition {
    scores: Vec<f64>,
    failed: u32,
}

/// Reduces ScoreResults into one MetricSummary per metric.
#[derive(Default)]
pub struct Aggregator {
    partitions: BTreeMap<String, Partition>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: &ScoreResult) {
        let part = self
            .partitions
            .entry(result.metric_name.clone())
            .or_default();
        match result.score() {
            Some(v) => part.scores.push(v),
            None => part.failed += 1,
        }
    }

    pub fn finish(self) -> BTreeMap<String, MetricSummary> {
        self.partitions
            .into_iter()
            .map(|(metric_name, part)| {
                let n = part.scores.len();
                // No successes means no mean, never 0.
                let mean_score = (n > 0).then(|| part.scores.iter().sum::<f64>() / n as f64);
                let summary = MetricSummary {
                    metric_name: metric_name.clone(),
                    mean_score,
                    successful_cases: n as u32,
                    failed_cases: part.failed,
                };
                (metric_name, summary)
            })
            .collect()
    }
}

pub fn aggregate<'a>(
    results: impl IntoIterator<Item = &'a ScoreResult>,
) -> BTreeMap<String, MetricSummary> {
    let mut agg = Aggregator::new();
    for r in results {
        agg.push(r);
    }
    agg.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GroupKey;

    #[test]
    fn mean_covers_successes_only() {
        let k = GroupKey::new("exact_match", "Truthfulness");
        let results = vec![
            ScoreResult::scored(&k, "a", 1.0),
            ScoreResult::scored(&k, "b", 0.0),
            ScoreResult::failed(&k, "c", "parse error"),
        ];
        let out = aggregate(&results);
        let s = &out["Truthfulness"];
        assert_eq!(s.mean_score, Some(0.5));
        assert_eq!(s.successful_cases, 2);
        assert_eq!(s.failed_cases, 1);
        assert_eq!(s.total_cases(), 3);
    }

    #[test]
    fn all_failed_partition_has_no_mean() {
        let k = GroupKey::new("mtbf", "Reliability");
        let results = vec![
            ScoreResult::failed(&k, "a", "insufficient data"),
            ScoreResult::failed(&k, "b", "insufficient data"),
        ];
        let s = &aggregate(&results)["Reliability"];
        assert_eq!(s.mean_score, None);
        assert_eq!(s.successful_cases + s.failed_cases, 2);
    }

    #[test]
    fn metrics_served_by_several_strategies_merge() {
        let a = GroupKey::new("exact_match", "Truthfulness");
        let b = GroupKey::new("llm_judge", "Truthfulness");
        let c = GroupKey::new("fluency", "Fluency");
        let results = vec![
            ScoreResult::scored(&a, "x", 1.0),
            ScoreResult::scored(&b, "y", 0.5),
            ScoreResult::scored(&c, "z", 0.9),
        ];
        let out = aggregate(&results);
        assert_eq!(out.len(), 2);
        assert_eq!(out["Truthfulness"].mean_score, Some(0.75));
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["Fluency", "Truthfulness"]);
    }
}
