use crate::models::LoginActivity;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

/// Output handler for login activity listings
pub struct OutputHandler {
    format: OutputFormat,
    writer: Box<dyn Write + Send>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Console,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "jsonl" => Ok(OutputFormat::Jsonl),
            "console" => Ok(OutputFormat::Console),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

impl OutputHandler {
    /// Create a new output handler writing to a file, or stdout if `None`
    pub fn new(format: OutputFormat, file_path: Option<PathBuf>) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = match file_path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Box::new(BufWriter::new(file))
            }
            None => Box::new(io::stdout()),
        };

        Ok(Self::with_writer(format, writer))
    }

    /// Create an output handler over an arbitrary writer
    pub fn with_writer(format: OutputFormat, writer: Box<dyn Write + Send>) -> Self {
        OutputHandler { format, writer }
    }

    /// Write a list of activities
    pub fn write_activities(
        &mut self,
        activities: &[LoginActivity],
    ) -> Result<(), Box<dyn std::error::Error>> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(activities)?;
                writeln!(self.writer, "{}", json)?;
            }
            OutputFormat::Jsonl => {
                for activity in activities {
                    writeln!(self.writer, "{}", serde_json::to_string(activity)?)?;
                }
            }
            OutputFormat::Console => {
                if activities.is_empty() {
                    writeln!(self.writer, "No login activity")?;
                }
                for activity in activities {
                    writeln!(self.writer, "{}", Self::console_line(activity))?;
                }
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    fn console_line(activity: &LoginActivity) -> String {
        format!(
            "{} {} {:<15} {:<24} {}{}",
            activity.created_at.format("%Y-%m-%d %H:%M:%S"),
            activity.id,
            activity.ip_address,
            activity.display_location(),
            activity.user_agent,
            if activity.unusual { "  [UNUSUAL]" } else { "" }
        )
    }
}
