//! File-backed optimizer results: trial history as CSV and JSON, plus the
//! best parameter set.
//!
//! The JSON history is the resumable copy; the CSV is for spreadsheets.

use crate::domain::error::BandtraderError;
use crate::domain::optimizer::{SearchMethod, Trial, TrialHistory};
use crate::domain::strategy_config::ParamSet;
use crate::ports::session_port::ResultsSink;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct BestParams<'a> {
    method: SearchMethod,
    trial: usize,
    score: f64,
    profit_rate: f64,
    win_rate: f64,
    trades: usize,
    params: &'a ParamSet,
}

pub struct FileResultsSink {
    dir: PathBuf,
}

impl FileResultsSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn history_csv_path(&self, method: SearchMethod) -> PathBuf {
        self.dir.join(format!("{}_history.csv", method))
    }

    pub fn history_json_path(&self, method: SearchMethod) -> PathBuf {
        self.dir.join(format!("{}_history.json", method))
    }

    pub fn best_params_path(&self, method: SearchMethod) -> PathBuf {
        self.dir.join(format!("{}_best_params.json", method))
    }

    fn write_history_csv(&self, method: SearchMethod, history: &TrialHistory) -> Result<(), BandtraderError> {
        let names: BTreeSet<&str> = history
            .trials()
            .iter()
            .flat_map(|t| t.params.keys().map(String::as_str))
            .collect();

        let mut wtr = csv::Writer::from_path(self.history_csv_path(method))?;
        let mut header = vec!["number", "state", "score", "profit_rate", "win_rate", "trades"];
        header.extend(names.iter().copied());
        wtr.write_record(&header)?;

        for t in history.trials() {
            let mut record = vec![
                t.number.to_string(),
                format!("{:?}", t.state).to_lowercase(),
                t.score.to_string(),
                t.profit_rate.to_string(),
                t.win_rate.to_string(),
                t.trades.to_string(),
            ];
            record.extend(
                names
                    .iter()
                    .map(|n| t.params.get(*n).map(f64::to_string).unwrap_or_default()),
            );
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl ResultsSink for FileResultsSink {
    fn load_history(&self, method: SearchMethod) -> Result<Vec<Trial>, BandtraderError> {
        let path = self.history_json_path(method);
        if !path.exists() {
            debug!(path = %path.display(), "no saved history");
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(
        &self,
        method: SearchMethod,
        history: &TrialHistory,
        best: Option<&Trial>,
    ) -> Result<(), BandtraderError> {
        fs::create_dir_all(&self.dir)?;

        fs::write(
            self.history_json_path(method),
            serde_json::to_string_pretty(history.trials())?,
        )?;
        self.write_history_csv(method, history)?;

        if let Some(best) = best {
            let payload = BestParams {
                method,
                trial: best.number,
                score: best.score,
                profit_rate: best.profit_rate,
                win_rate: best.win_rate,
                trades: best.trades,
                params: &best.params,
            };
            fs::write(
                self.best_params_path(method),
                serde_json::to_string_pretty(&payload)?,
            )?;
        }

        info!(dir = %self.dir.display(), trials = history.len(), "optimizer results saved");
        Ok(())
    }
}
