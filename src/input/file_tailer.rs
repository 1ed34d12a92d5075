use crate::models::LoginEvent;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

/// Tail a JSON-lines file of successful logins
///
/// Each line is one [`LoginEvent`]:
///
/// ```text
/// {"user_id":"6f1c...","ip_address":"203.0.113.1","user_agent":"Mozilla/5.0"}
/// ```
pub struct FileTailer {
    file_path: PathBuf,
    reader: Option<BufReader<File>>,
    file_position: u64,
    /// Bytes of a line whose newline has not been written yet
    partial: String,
}

impl FileTailer {
    /// Create a new file tailer
    pub fn new(file_path: PathBuf) -> Self {
        FileTailer {
            file_path,
            reader: None,
            file_position: 0,
            partial: String::new(),
        }
    }

    /// Open the file and seek to its end, so only new lines are read
    pub fn initialize(&mut self) -> std::io::Result<()> {
        let file = File::open(&self.file_path)?;
        let mut reader = BufReader::new(file);

        reader.seek(SeekFrom::End(0))?;
        self.file_position = reader.stream_position()?;
        self.reader = Some(reader);
        self.partial.clear();

        Ok(())
    }

    /// Read login events appended since the last call
    ///
    /// Lines that are not valid events are skipped.
    pub fn read_events(&mut self) -> std::io::Result<Vec<LoginEvent>> {
        if self.reader.is_none() {
            self.initialize()?;
        }

        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(Vec::new()),
        };
        let mut events = Vec::new();

        loop {
            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line)?;

            if bytes_read == 0 {
                break;
            }
            self.file_position += bytes_read as u64;

            if !line.ends_with('\n') {
                // Writer is mid-line; keep it until the rest arrives
                self.partial.push_str(&line);
                break;
            }

            let full_line = if self.partial.is_empty() {
                line
            } else {
                let mut joined = std::mem::take(&mut self.partial);
                joined.push_str(&line);
                joined
            };

            if let Some(event) = Self::parse_line(&full_line) {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Parse one line into a LoginEvent
    pub fn parse_line(line: &str) -> Option<LoginEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<LoginEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                log::debug!("Skipping malformed login event: {}", e);
                None
            }
        }
    }

    /// Check if the file still exists and is readable
    pub fn is_valid(&self) -> bool {
        self.file_path.exists()
    }

    /// Byte offset of the next unread line
    pub fn position(&self) -> u64 {
        self.file_position
    }
}
