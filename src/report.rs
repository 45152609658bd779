//! Search result reporting.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const REPORT_WIDTH: usize = 64;

fn write_banner(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f, "{:=^width$}", format!(" {} ", title), width = REPORT_WIDTH)
}

fn write_section(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f, "\n{:-^width$}", format!(" {} ", title), width = REPORT_WIDTH)
}

fn format_duration(duration: Duration) -> String {
    format!("{:.3} s", duration.as_secs_f64())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReport {
    pub tool_name: String,
    pub levelset: String,
    pub level_index: usize,
    pub solved: bool,
    pub unsolvable: bool,
    pub steps: u64,
    pub pushes: Option<usize>,
    pub moves: Option<usize>,
    pub full_deadlocks: u64,
    pub analysis_time: Duration,
    pub error: Option<String>,
}

impl SearchReport {
    pub fn new(levelset: String, level_index: usize) -> SearchReport {
        SearchReport {
            tool_name: "sokodlex".to_string(),
            levelset,
            level_index,
            solved: false,
            unsolvable: false,
            steps: 0,
            pushes: None,
            moves: None,
            full_deadlocks: 0,
            analysis_time: Duration::default(),
            error: None,
        }
    }

    pub fn save_to_file(&self, path: &str) -> std::io::Result<()> {
        use std::fs::File;
        use std::io::Write;

        let mut file = File::create(path)?;
        writeln!(file, "{}", self)?;

        let json_path = format!("{}.json", path);
        std::fs::write(
            json_path,
            serde_json::to_string_pretty(self)
                .expect("search report serializes")
                .as_bytes(),
        )?;

        Ok(())
    }
}

impl fmt::Display for SearchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_banner(f, "deadlock search report")?;
        writeln!(f, "{:<16}: {}", "tool", self.tool_name)?;
        writeln!(f, "{:<16}: {}", "levelset", self.levelset)?;
        writeln!(f, "{:<16}: {}", "level", self.level_index)?;
        writeln!(f, "{:<16}: {}", "time", format_duration(self.analysis_time))?;
        writeln!(f, "{:<16}: {}", "driver steps", self.steps)?;
        writeln!(f, "{:<16}: {}", "full deadlocks", self.full_deadlocks)?;

        write_section(f, "outcome")?;
        let outcome = if self.solved {
            "solved"
        } else if self.unsolvable {
            "unsolvable"
        } else {
            "open"
        };
        writeln!(f, "{:<16}: {}", "result", outcome)?;
        if let Some(pushes) = self.pushes {
            writeln!(f, "{:<16}: {}", "pushes", pushes)?;
        }
        if let Some(moves) = self.moves {
            writeln!(f, "{:<16}: {}", "moves", moves)?;
        }
        if let Some(error) = &self.error {
            write_section(f, "error")?;
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}
