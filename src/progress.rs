//! Progress display for convergence runs.
//!
//! [`TerminalStatus`] renders each milestone on an `indicatif` bar and, when
//! a status file is configured, rewrites it with the JSON history of every
//! milestone seen so far.

use converge::{ProgressEvent, StatusChannel};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fs;
use std::path::PathBuf;

pub struct TerminalStatus {
    bar: ProgressBar,
    history: Vec<ProgressEvent>,
    status_file: Option<PathBuf>,
}

impl TerminalStatus {
    pub fn new(title: &str, quiet: bool, status_file: Option<PathBuf>) -> Self {
        let bar = ProgressBar::new(100);
        if quiet {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(title.to_string());
        bar.enable_steady_tick(std::time::Duration::from_millis(120));

        Self {
            bar,
            history: Vec::new(),
            status_file,
        }
    }

    pub fn history(&self) -> &[ProgressEvent] {
        &self.history
    }

    fn write_status_file(&self) {
        let Some(path) = &self.status_file else {
            return;
        };
        let written = serde_json::to_string_pretty(&self.history)
            .map_err(std::io::Error::other)
            .and_then(|json| fs::write(path, json + "\n"));
        if let Err(e) = written {
            log::warn!("Could not write status file {}: {}", path.display(), e);
        }
    }

    /// Stop and clear the bar
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl StatusChannel for TerminalStatus {
    fn update(&mut self, event: &ProgressEvent) {
        self.bar.set_position(u64::from(event.percent));
        self.bar
            .set_message(crate::ui::truncate_path(&event.label, 40));
        self.history.push(event.clone());
        self.write_status_file();
    }
}

impl Drop for TerminalStatus {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(label: &str, percent: u8) -> ProgressEvent {
        ProgressEvent {
            unit: "app3".to_string(),
            label: label.to_string(),
            percent,
        }
    }

    #[test]
    fn test_status_file_holds_full_history() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("status.json");
        let mut status = TerminalStatus::new("app3", true, Some(path.clone()));

        status.update(&event("start", 1));
        status.update(&event("app3::default", 80));

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let list = written.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1]["label"], "app3::default");
        assert_eq!(list[1]["percent"], 80);
        assert_eq!(status.history().len(), 2);
    }

    #[test]
    fn test_without_status_file() {
        let mut status = TerminalStatus::new("sync", true, None);
        status.update(&event("complete", 100));
        assert_eq!(status.history()[0].percent, 100);
    }
}
