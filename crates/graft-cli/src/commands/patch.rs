//! `graft patch`: Patch modules and write the artifact.

use anyhow::{bail, Context};
use graft_engine::patch::CandidateOutcome;
use graft_engine::{ModuleIndex, PatchConfig, PatchOutput, Patcher};
use std::path::{Path, PathBuf};

/// Artifact path used when neither `--out` nor the config names one
pub const DEFAULT_OUTPUT: &str = "patched.grafts";

pub fn execute(
    modules: Vec<PathBuf>,
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => PatchConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PatchConfig::default(),
    };
    let out = out
        .or_else(|| config.output.path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    let output = patch_modules(modules, &config)?;
    output
        .persist(&out)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report_json(&output, &out))?);
    } else {
        print_summary(&output, &out);
    }
    Ok(())
}

/// Load, configure and run one patch pass
pub fn patch_modules(modules: Vec<PathBuf>, config: &PatchConfig) -> anyhow::Result<PatchOutput> {
    let index = ModuleIndex::load(modules).context("Failed to load modules")?;
    tracing::debug!(modules = index.len(), "modules indexed");

    let mut patcher = Patcher::with_markers(index, config.markers.clone());
    config.apply_to(&mut patcher);

    match patcher.run().context("Patch run failed")? {
        Some(output) => Ok(output),
        None => bail!("Patch run did not start"),
    }
}

fn outcome_label(outcome: &CandidateOutcome) -> String {
    match outcome {
        CandidateOutcome::Rejected { reason } => format!("rejected: {}", reason),
        CandidateOutcome::FieldOnly { field } => format!("added {}", field),
        CandidateOutcome::Strategies {
            field,
            applied,
            rejected,
        } => {
            let mut label = format!("added {}", field);
            if !applied.is_empty() {
                label.push_str(&format!(" [{}]", applied.join(", ")));
            }
            for (strategy, reason) in rejected {
                label.push_str(&format!("; {} rejected: {}", strategy, reason));
            }
            label
        }
    }
}

fn print_summary(output: &PatchOutput, out: &Path) {
    for report in &output.reports {
        println!("  {}::{}  {}", report.owner, report.member, outcome_label(&report.outcome));
    }
    let stats = &output.stats;
    println!();
    println!(
        "{} fields added, {} stubs rejected, {} strategies applied ({} rejected), {} extensions applied",
        stats.synthesized,
        stats.rejected,
        stats.strategies_applied,
        stats.strategies_rejected,
        stats.extensions_applied
    );
    println!("Wrote {} module(s) to {}", output.modules.len(), out.display());
}

pub fn report_json(output: &PatchOutput, out: &Path) -> serde_json::Value {
    let reports: Vec<_> = output
        .reports
        .iter()
        .map(|r| {
            serde_json::json!({
                "owner": r.owner,
                "member": r.member,
                "field": r.field(),
                "rejected": r.is_rejected(),
                "outcome": outcome_label(&r.outcome),
            })
        })
        .collect();
    let stats = &output.stats;
    serde_json::json!({
        "artifact": out.display().to_string(),
        "modules": output.modules.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
        "stats": {
            "synthesized": stats.synthesized,
            "rejected": stats.rejected,
            "strategies_applied": stats.strategies_applied,
            "strategies_rejected": stats.strategies_rejected,
            "extensions_applied": stats.extensions_applied,
        },
        "reports": reports,
    })
}
