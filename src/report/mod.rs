use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::ExecutionMode;
use crate::detect::Anomaly;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialReport {
    pub trial: u32,
    pub accumulator: i32,
    pub reads: usize,
    pub writes: usize,
    pub reader_cpu: Option<usize>,
    pub writer_cpu: Option<usize>,
    pub anomaly: Option<Anomaly>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: ExecutionMode,
    pub planned_trials: u32,
    pub trials: Vec<TrialReport>,
    pub anomaly: Option<(u32, Anomaly)>,
    pub total_time: Duration,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rematerialization harness report")?;
        writeln!(f, "Mode: {}", self.mode)?;
        writeln!(
            f,
            "Trials: {}/{} completed",
            self.completed(),
            self.planned_trials
        )?;
        writeln!(f, "Total time: {:?}", self.total_time)?;

        match &self.anomaly {
            Some((trial, anomaly)) => {
                writeln!(f, "\nAnomaly in trial {}: {}", trial, anomaly)?;
            }
            None => writeln!(f, "\nNo anomaly observed")?,
        }

        if !self.trials.is_empty() {
            writeln!(f, "\nTrials:")?;
            for trial in &self.trials {
                write!(
                    f,
                    "  #{} acc={} reads={} writes={}",
                    trial.trial, trial.accumulator, trial.reads, trial.writes
                )?;
                if let (Some(r), Some(w)) = (trial.reader_cpu, trial.writer_cpu) {
                    write!(f, " cpus={}/{}", r, w)?;
                }
                writeln!(f, " ({:?})", trial.elapsed)?;
            }
        }

        Ok(())
    }
}

impl RunReport {
    pub fn new(mode: ExecutionMode, planned_trials: u32) -> Self {
        Self {
            mode,
            planned_trials,
            trials: Vec::new(),
            anomaly: None,
            total_time: Duration::default(),
        }
    }

    /// Trials that ran to the end without the detector firing.
    pub fn completed(&self) -> usize {
        self.trials.iter().filter(|t| t.anomaly.is_none()).count()
    }

    pub fn save_to_file(&self, path: &str) -> std::io::Result<()> {
        use std::fs::File;
        use std::io::Write;

        let mut file = File::create(path)?;
        writeln!(file, "{}", self)?;

        let json_path = format!("{}.json", path);
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(json_path, json.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(n: u32, anomaly: Option<Anomaly>) -> TrialReport {
        TrialReport {
            trial: n,
            accumulator: -5,
            reads: 10,
            writes: 10,
            reader_cpu: Some(2),
            writer_cpu: Some(3),
            anomaly,
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn display_mentions_anomaly() {
        let anomaly = Anomaly {
            index: 7,
            previous: 1,
            observed: 2,
            changes: 2,
        };
        let mut report = RunReport::new(ExecutionMode::Concurrent, 5);
        report.trials.push(trial(0, None));
        report.trials.push(trial(1, Some(anomaly.clone())));
        report.anomaly = Some((1, anomaly));

        assert_eq!(report.completed(), 1);
        let text = report.to_string();
        assert!(text.contains("Trials: 1/5 completed"));
        assert!(text.contains("Anomaly in trial 1: slot 7 changed 2 times"));
        assert!(text.contains("cpus=2/3"));
    }

    #[test]
    fn json_roundtrip_keeps_trials() {
        let mut report = RunReport::new(ExecutionMode::Sequential, 1);
        report.trials.push(trial(0, None));
        let json = serde_json::to_string(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trials, report.trials);
    }

    #[test]
    fn saves_text_and_json() {
        let dir = std::env::temp_dir().join(format!("remat-report-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("run.txt");
        let path = path.to_str().unwrap();

        let report = RunReport::new(ExecutionMode::Concurrent, 0);
        report.save_to_file(path).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("No anomaly"));
        assert!(std::path::Path::new(&format!("{}.json", path)).exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
