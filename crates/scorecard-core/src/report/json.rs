use crate::engine::AnalysisReport;
use anyhow::Context;
use std::path::Path;

pub fn to_json(report: &AnalysisReport) -> anyhow::Result<serde_json::Value> {
    let mut v = serde_json::to_value(report)?;
    v["schema_version"] = serde_json::json!(1);
    v["generated_at"] = serde_json::json!(chrono::Utc::now().to_rfc3339());
    Ok(v)
}

pub fn write_json(report: &AnalysisReport, out: &Path) -> anyhow::Result<()> {
    let v = to_json(report)?;
    std::fs::write(out, serde_json::to_string_pretty(&v)?)
        .with_context(|| format!("failed to write report {}", out.display()))?;
    Ok(())
}
