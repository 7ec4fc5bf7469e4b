//! Timing metrics derived from an agent interaction log.
//!
//! Lines look like `[2024-05-01 10:00:00,250] Sending prompt ...`. Only lines
//! carrying one of the configured markers matter; a marker line without a
//! leading bracket is ignored, a bracket that is not a timestamp is an error.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use scorecard_core::errors::StrategyError;
use scorecard_core::registry::StrategyContext;
use scorecard_core::strategy_api::{Strategy, StrategyInput, StrategyScore};
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_PROMPT_MARKER: &str = "Sending prompt";
pub const DEFAULT_RESPONSE_MARKER: &str = "Received response";
pub const DEFAULT_FAILURE_MARKER: &str = "ERROR";
pub const DEFAULT_WINDOW_MINUTES: f64 = 60.0;

const TS_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S,%3f",
    "%Y-%m-%d %H:%M:%S%.3f",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Prompt,
    Response,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogEvent {
    pub kind: EventKind,
    pub at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct Markers {
    pub prompt: String,
    pub response: String,
    pub failure: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT_MARKER.into(),
            response: DEFAULT_RESPONSE_MARKER.into(),
            failure: DEFAULT_FAILURE_MARKER.into(),
        }
    }
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    TS_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

/// Events in log order. The failure marker wins over the other two.
pub fn parse_events(log: &str, markers: &Markers) -> Result<Vec<LogEvent>, StrategyError> {
    let mut events = Vec::new();
    for (lineno, line) in log.lines().enumerate() {
        let kind = if line.contains(&markers.failure) {
            EventKind::Failure
        } else if line.contains(&markers.prompt) {
            EventKind::Prompt
        } else if line.contains(&markers.response) {
            EventKind::Response
        } else {
            continue;
        };

        let Some(rest) = line.trim_start().strip_prefix('[') else {
            continue;
        };
        let inner = rest.split(']').next().unwrap_or_default();
        let at = parse_timestamp(inner).ok_or_else(|| {
            StrategyError::Parse(format!(
                "line {}: malformed timestamp '[{}]'",
                lineno + 1,
                inner
            ))
        })?;
        events.push(LogEvent { kind, at });
    }
    Ok(events)
}

/// FIFO pairing: a response closes the oldest open prompt; a response with
/// nothing open is dropped.
pub fn pair_intervals(events: &[LogEvent]) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut open = VecDeque::new();
    let mut out = Vec::new();
    for e in events {
        match e.kind {
            EventKind::Prompt => open.push_back(e.at),
            EventKind::Response => {
                if let Some(start) = open.pop_front() {
                    out.push((start, e.at));
                }
            }
            EventKind::Failure => {}
        }
    }
    out
}

fn secs_between(a: NaiveDateTime, b: NaiveDateTime) -> f64 {
    (b - a).num_milliseconds() as f64 / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimingMetric {
    TurnAroundTime,
    TransactionsPerMinute,
    MessageVolume { window_minutes: f64 },
    Mtbf,
    Uptime,
}

pub fn compute(metric: TimingMetric, events: &[LogEvent]) -> Result<StrategyScore, StrategyError> {
    match metric {
        TimingMetric::TurnAroundTime => {
            let intervals = checked_intervals(events)?;
            if intervals.is_empty() {
                return Ok(StrategyScore::with_details(
                    0.0,
                    serde_json::json!({ "intervals": 0 }),
                ));
            }
            let total: f64 = intervals.iter().map(|(a, b)| secs_between(*a, *b)).sum();
            Ok(StrategyScore::with_details(
                total / intervals.len() as f64,
                serde_json::json!({ "intervals": intervals.len() }),
            ))
        }
        TimingMetric::TransactionsPerMinute => {
            let (tpm, n, span) = per_minute(events)?;
            Ok(StrategyScore::with_details(
                tpm,
                serde_json::json!({ "intervals": n, "span_seconds": span }),
            ))
        }
        TimingMetric::MessageVolume { window_minutes } => {
            let (tpm, n, span) = per_minute(events)?;
            Ok(StrategyScore::with_details(
                tpm * window_minutes,
                serde_json::json!({
                    "intervals": n,
                    "span_seconds": span,
                    "window_minutes": window_minutes,
                }),
            ))
        }
        TimingMetric::Mtbf => {
            let failures: Vec<_> = events
                .iter()
                .filter(|e| e.kind == EventKind::Failure)
                .map(|e| e.at)
                .collect();
            if failures.len() < 2 {
                return Err(StrategyError::InsufficientData(format!(
                    "mtbf needs at least 2 failure events, found {}",
                    failures.len()
                )));
            }
            let gaps: f64 = failures
                .windows(2)
                .map(|w| secs_between(w[0], w[1]))
                .sum();
            Ok(StrategyScore::with_details(
                gaps / (failures.len() - 1) as f64,
                serde_json::json!({ "failures": failures.len() }),
            ))
        }
        TimingMetric::Uptime => uptime(events),
    }
}

fn checked_intervals(
    events: &[LogEvent],
) -> Result<Vec<(NaiveDateTime, NaiveDateTime)>, StrategyError> {
    let intervals = pair_intervals(events);
    if let Some((a, b)) = intervals.iter().find(|(a, b)| b < a) {
        return Err(StrategyError::InvalidInput(format!(
            "response at {} precedes its prompt at {}",
            b, a
        )));
    }
    Ok(intervals)
}

/// (rate, intervals, span seconds). Zero when nothing completed or no time passed.
fn per_minute(events: &[LogEvent]) -> Result<(f64, usize, f64), StrategyError> {
    let intervals = checked_intervals(events)?;
    let (Some(first), Some(last)) = (intervals.first(), intervals.last()) else {
        return Ok((0.0, 0, 0.0));
    };
    let last_end = intervals.iter().map(|(_, b)| *b).max().unwrap_or(last.1);
    let span = secs_between(first.0, last_end);
    if span <= 0.0 {
        return Ok((0.0, intervals.len(), span));
    }
    Ok((intervals.len() as f64 / (span / 60.0), intervals.len(), span))
}

/// Downtime runs from a failure to the next response (or the end of the log).
fn uptime(events: &[LogEvent]) -> Result<StrategyScore, StrategyError> {
    let (Some(first), Some(last)) = (events.first(), events.last()) else {
        return Err(StrategyError::InsufficientData(
            "uptime needs at least one timestamped event".into(),
        ));
    };
    let failures = events.iter().filter(|e| e.kind == EventKind::Failure).count();
    if failures == 0 {
        return Ok(StrategyScore::with_details(
            1.0,
            serde_json::json!({ "failures": 0 }),
        ));
    }
    let span = secs_between(first.at, last.at);
    if span <= 0.0 {
        return Err(StrategyError::InsufficientData(
            "uptime needs events spanning a positive duration".into(),
        ));
    }

    let mut down = 0.0;
    let mut down_since: Option<NaiveDateTime> = None;
    for e in events {
        match (e.kind, down_since) {
            (EventKind::Failure, None) => down_since = Some(e.at),
            (EventKind::Response, Some(start)) => {
                down += secs_between(start, e.at).max(0.0);
                down_since = None;
            }
            _ => {}
        }
    }
    if let Some(start) = down_since {
        down += secs_between(start, last.at).max(0.0);
    }

    let score = ((span - down) / span).clamp(0.0, 1.0);
    Ok(StrategyScore::with_details(
        score,
        serde_json::json!({
            "failures": failures,
            "span_seconds": span,
            "downtime_seconds": down,
        }),
    ))
}

pub struct TimingStrategy {
    name: String,
    metric: TimingMetric,
    file_path: String,
    markers: Markers,
}

fn build(ctx: &StrategyContext, metric: TimingMetric) -> Result<Arc<dyn Strategy>, StrategyError> {
    let file_path = ctx.params.require_str(&ctx.name, "file_path")?.to_string();
    let marker = |key: &str, default: &str| -> Result<String, StrategyError> {
        match ctx.params.str(key) {
            Some(m) if m.trim().is_empty() => Err(StrategyError::Config(format!(
                "strategy '{}': {} must not be blank",
                ctx.name, key
            ))),
            Some(m) => Ok(m.to_string()),
            None => Ok(default.to_string()),
        }
    };
    let markers = Markers {
        prompt: marker("prompt_marker", DEFAULT_PROMPT_MARKER)?,
        response: marker("response_marker", DEFAULT_RESPONSE_MARKER)?,
        failure: marker("failure_marker", DEFAULT_FAILURE_MARKER)?,
    };
    Ok(Arc::new(TimingStrategy {
        name: ctx.name.clone(),
        metric,
        file_path,
        markers,
    }))
}

pub fn build_turn_around_time(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    build(ctx, TimingMetric::TurnAroundTime)
}

pub fn build_transactions_per_minute(
    ctx: &StrategyContext,
) -> Result<Arc<dyn Strategy>, StrategyError> {
    build(ctx, TimingMetric::TransactionsPerMinute)
}

pub fn build_message_volume(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    let window_minutes = ctx.params.f64_or("window_minutes", DEFAULT_WINDOW_MINUTES)?;
    if !window_minutes.is_finite() || window_minutes <= 0.0 {
        return Err(StrategyError::Config(format!(
            "strategy '{}': window_minutes must be positive, got {}",
            ctx.name, window_minutes
        )));
    }
    build(ctx, TimingMetric::MessageVolume { window_minutes })
}

pub fn build_mtbf(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    build(ctx, TimingMetric::Mtbf)
}

pub fn build_uptime(ctx: &StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError> {
    build(ctx, TimingMetric::Uptime)
}

#[async_trait]
impl Strategy for TimingStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: StrategyInput<'_>) -> Result<StrategyScore, StrategyError> {
        let path = input.extra("log_file_path").unwrap_or(&self.file_path);
        let log = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StrategyError::Io(format!("failed to read log {}: {}", path, e)))?;
        let events = parse_events(&log, &self.markers)?;
        tracing::debug!(
            event = "log_parsed",
            strategy = %self.name,
            file = %path,
            events = events.len()
        );
        let mut out = compute(self.metric, &events)?;
        if let Some(obj) = out.details.as_object_mut() {
            obj.insert("log_file".into(), serde_json::json!(path));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorecard_core::strategy_api::StrategyParams;
    use std::collections::BTreeMap;

    const LOG: &str = "\
[2024-05-01 10:00:00,000] Sending prompt id=1
[2024-05-01 10:00:02,000] Received response id=1
noise without markers
[2024-05-01 10:00:10,000] Sending prompt id=2
[2024-05-01 10:00:14,000] Received response id=2
[2024-05-01 10:00:20,000] ERROR upstream 503
[2024-05-01 10:00:25,000] Sending prompt id=3
[2024-05-01 10:00:30,000] Received response id=3
[2024-05-01 10:01:00,000] ERROR upstream 503
";

    fn events(log: &str) -> Vec<LogEvent> {
        parse_events(log, &Markers::default()).unwrap()
    }

    #[test]
    fn turn_around_time_averages_paired_intervals() {
        let out = compute(TimingMetric::TurnAroundTime, &events(LOG)).unwrap();
        // (2 + 4 + 5) / 3
        assert!((out.score - 11.0 / 3.0).abs() < 1e-9);
        assert_eq!(out.details["intervals"], 3);
    }

    #[test]
    fn no_pairs_is_zero_not_an_error() {
        let log = "[2024-05-01 10:00:02,000] Received response\n[2024-05-01 10:00:03,000] Sending prompt\n";
        let ev = events(log);
        assert!(pair_intervals(&ev).is_empty());
        let out = compute(TimingMetric::TurnAroundTime, &ev).unwrap();
        assert_eq!(out.score, 0.0);
        assert_eq!(out.details["intervals"], 0);
        assert_eq!(compute(TimingMetric::TransactionsPerMinute, &ev).unwrap().score, 0.0);
    }

    #[test]
    fn rates_use_first_prompt_to_last_response() {
        // 3 intervals over 30 seconds.
        let tpm = compute(TimingMetric::TransactionsPerMinute, &events(LOG)).unwrap();
        assert!((tpm.score - 6.0).abs() < 1e-9);
        let mvh = compute(
            TimingMetric::MessageVolume {
                window_minutes: 60.0,
            },
            &events(LOG),
        )
        .unwrap();
        assert!((mvh.score - 360.0).abs() < 1e-9);
    }

    #[test]
    fn mtbf_needs_two_failures() {
        let out = compute(TimingMetric::Mtbf, &events(LOG)).unwrap();
        assert!((out.score - 40.0).abs() < 1e-9);

        let one = "[2024-05-01 10:00:20,000] ERROR once\n";
        assert!(matches!(
            compute(TimingMetric::Mtbf, &events(one)),
            Err(StrategyError::InsufficientData(_))
        ));
    }

    #[test]
    fn uptime_subtracts_failure_to_recovery_windows() {
        // span 60s; down 20->30 (10s) and 60->60 (0s).
        let out = compute(TimingMetric::Uptime, &events(LOG)).unwrap();
        assert!((out.score - 50.0 / 60.0).abs() < 1e-9);

        let healthy = "[2024-05-01 10:00:00,000] Sending prompt\n[2024-05-01 10:00:01,000] Received response\n";
        assert_eq!(compute(TimingMetric::Uptime, &events(healthy)).unwrap().score, 1.0);
    }

    #[test]
    fn malformed_timestamp_is_a_parse_error() {
        let bad = "[yesterday] Sending prompt\n";
        assert!(matches!(
            parse_events(bad, &Markers::default()),
            Err(StrategyError::Parse(_))
        ));
        // Unbracketed marker lines are not timestamped events.
        assert!(events("Sending prompt with no timestamp\n").is_empty());
    }

    #[tokio::test]
    async fn reads_log_from_params_or_item_override() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let main = dir.path().join("main.log");
        let other = dir.path().join("other.log");
        std::fs::write(&main, LOG)?;
        std::fs::write(
            &other,
            "[2024-05-01 10:00:00,000] Sending prompt\n[2024-05-01 10:00:09,500] Received response\n",
        )?;

        let ctx = StrategyContext::new(
            "turn_around_time",
            StrategyParams::default().with("file_path", main.to_string_lossy().into_owned()),
        );
        let s = build_turn_around_time(&ctx)?;

        fn input(extra: &BTreeMap<String, String>) -> StrategyInput<'_> {
            StrategyInput {
                agent_response: "",
                expected_response: None,
                system_prompt: None,
                judge_prompt: None,
                extra_inputs: extra,
            }
        }
        let none = BTreeMap::new();
        let a = s.evaluate(input(&none)).await?;
        assert!((a.score - 11.0 / 3.0).abs() < 1e-9);

        let mut over = BTreeMap::new();
        over.insert(
            "log_file_path".to_string(),
            other.to_string_lossy().into_owned(),
        );
        let b = s.evaluate(input(&over)).await?;
        assert!((b.score - 9.5).abs() < 1e-9);

        over.insert("log_file_path".to_string(), "/definitely/missing.log".into());
        assert!(matches!(
            s.evaluate(input(&over)).await,
            Err(StrategyError::Io(_))
        ));
        Ok(())
    }

    #[test]
    fn file_path_is_required_at_construction() {
        let ctx = StrategyContext::new("uptime", StrategyParams::default());
        let err = build_uptime(&ctx).err().unwrap();
        assert_eq!(
            err.to_string(),
            "config error: strategy 'uptime' requires parameter 'file_path'"
        );
    }
}
