use std::io::{self, Write};

use serde::Serialize;

use crate::models::ModelKind;
use crate::orchestrator::{PruneResult, RunOutcome};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub datasource: String,
    pub model: String,
    pub init: String,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub datasource: String,
    pub species: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneReport {
    pub datasource: String,
    #[serde(flatten)]
    pub result: PruneResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub runs: Vec<RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruned: Option<Vec<PruneReport>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub name: &'static str,
    pub fcstep_hours: i64,
    pub fcstart_offset_hours: i64,
    pub fcend_offset_hours: i64,
    pub layer_type: &'static str,
    pub species: Vec<&'static str>,
}

impl ModelEntry {
    pub fn catalog() -> Vec<ModelEntry> {
        ModelKind::ALL
            .into_iter()
            .map(|kind| {
                let spec = kind.spec();
                ModelEntry {
                    id: kind.to_string(),
                    name: spec.name,
                    fcstep_hours: spec.fcstep_hours,
                    fcstart_offset_hours: spec.fcstart_offset_hours,
                    fcend_offset_hours: spec.fcend_offset_hours,
                    layer_type: spec.layer_type,
                    species: spec.species.iter().map(|species| species.key).collect(),
                }
            })
            .collect()
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_runs(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_fetch(report: &FetchReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_prune(reports: &[PruneReport]) -> io::Result<()> {
        Self::print_json(&reports)
    }

    pub fn print_models(models: &[ModelEntry]) -> io::Result<()> {
        Self::print_json(&models)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn run_line(report: &RunReport) -> String {
        let status = match &report.outcome {
            RunOutcome::NoSpecies => "no species configured".to_string(),
            RunOutcome::AlreadyDone => "already done".to_string(),
            RunOutcome::Locked => "locked by another run".to_string(),
            RunOutcome::Aborted { species, reason } => {
                format!("postponed, {species} not available ({reason})")
            }
            RunOutcome::Completed { species } => format!("done ({})", species.join(", ")),
        };
        format!("{} {}: {status}", report.datasource, report.init)
    }

    pub fn print_runs(reports: &[RunReport]) -> io::Result<()> {
        let mut stdout = io::stdout();
        for report in reports {
            writeln!(stdout, "{}", Self::run_line(report))?;
        }
        Ok(())
    }

    pub fn print_fetch(report: &FetchReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        for file in &report.files {
            writeln!(stdout, "{} {} -> {file}", report.datasource, report.species)?;
        }
        Ok(())
    }

    pub fn print_prune(reports: &[PruneReport]) -> io::Result<()> {
        let mut stdout = io::stdout();
        for report in reports {
            if report.result.removed.is_empty() {
                writeln!(stdout, "{}: nothing to prune", report.datasource)?;
            }
            for dir in &report.result.removed {
                writeln!(stdout, "{}: removed {dir}", report.datasource)?;
            }
        }
        Ok(())
    }

    pub fn print_models(models: &[ModelEntry]) -> io::Result<()> {
        let mut stdout = io::stdout();
        for model in models {
            writeln!(
                stdout,
                "{:<14} {:<14} step {}h  +{}h..+{}h  {}",
                model.id,
                model.name,
                model.fcstep_hours,
                model.fcstart_offset_hours,
                model.fcend_offset_hours,
                model.species.join(" ")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_report_flattens_outcome() {
        let report = RunReport {
            datasource: "CAMS_global".to_string(),
            model: "cams_global".to_string(),
            init: "2017-02-15T00:00:00Z".to_string(),
            outcome: RunOutcome::Aborted {
                species: "NO2".to_string(),
                reason: "manifest missing".to_string(),
            },
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "aborted");
        assert_eq!(value["species"], "NO2");
        assert_eq!(
            TextOutput::run_line(&report),
            "CAMS_global 2017-02-15T00:00:00Z: postponed, NO2 not available (manifest missing)"
        );
    }

    #[test]
    fn run_summary_carries_prune_reports() {
        let runs = vec![RunReport {
            datasource: "SILAM".to_string(),
            model: "silam".to_string(),
            init: "2017-02-15T00:00:00Z".to_string(),
            outcome: RunOutcome::AlreadyDone,
        }];

        let plain = serde_json::to_value(RunSummary {
            runs: runs.clone(),
            pruned: None,
        })
        .unwrap();
        assert_eq!(plain["runs"][0]["datasource"], "SILAM");
        assert!(plain.get("pruned").is_none());

        let pruned = serde_json::to_value(RunSummary {
            runs,
            pruned: Some(vec![PruneReport {
                datasource: "SILAM".to_string(),
                result: PruneResult {
                    removed: vec!["20170201".to_string()],
                },
            }]),
        })
        .unwrap();
        assert_eq!(pruned["pruned"][0]["datasource"], "SILAM");
        assert_eq!(pruned["pruned"][0]["removed"][0], "20170201");
    }

    #[test]
    fn catalog_lists_every_model() {
        let catalog = ModelEntry::catalog();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog[0].id, "cams_global");
        assert!(catalog[0].species.contains(&"AIR_PRESSURE"));
    }
}
