//! Translating convergence tool output into progress percentages.
//!
//! A tracker holds an ordered list of markers. The first fires when the tool
//! announces its start (1%), the last on `Run complete` (100%). In between is
//! one marker per non-`lib` run list entry, spread across the first 80
//! points and matched against the tool's `(unit::recipe line N)` log lines.

use crate::context::StatusChannel;
use crate::error::Result;
use regex::Regex;
use runlist::{Category, RunList};
use serde::Serialize;

/// Line pattern that marks the tool process starting
pub const START_PATTERN: &str = r"Starting Chef( Infra)? Client";
/// Literal line marker that ends a run
pub const COMPLETE_MARKER: &str = "Run complete";

/// Share of the bar covered by per-recipe markers
const RECIPE_SPAN: usize = 80;

/// A progress milestone emitted to the status channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Unit the transaction is for
    pub unit: String,
    /// What was reached (`start`, `unit::recipe`, `complete`)
    pub label: String,
    pub percent: u8,
}

struct Marker {
    label: String,
    pattern: Regex,
    percent: u8,
}

/// Matches tool output lines against the expected markers, in order.
pub struct ProgressTracker {
    unit: String,
    markers: Vec<Marker>,
    cursor: usize,
}

impl ProgressTracker {
    /// Build markers for a run list.
    ///
    /// With no non-`lib` entries there are only the start and complete
    /// markers.
    pub fn for_run_list(unit: &str, run_list: &RunList) -> Result<Self> {
        let recipes: Vec<_> = run_list
            .iter()
            .filter(|e| e.category() != Category::Lib)
            .collect();

        let mut markers = Vec::with_capacity(recipes.len() + 2);
        markers.push(Marker {
            label: "start".to_string(),
            pattern: Regex::new(START_PATTERN)?,
            percent: 1,
        });

        let total = recipes.len();
        for (i, entry) in recipes.iter().enumerate() {
            let qualified = entry.qualified();
            let pattern = format!(r"\({} line \d+\)", regex::escape(&qualified));
            markers.push(Marker {
                label: qualified,
                pattern: Regex::new(&pattern)?,
                percent: recipe_percent(i, total),
            });
        }

        markers.push(Marker {
            label: "complete".to_string(),
            pattern: Regex::new(&regex::escape(COMPLETE_MARKER))?,
            percent: 100,
        });

        Ok(Self {
            unit: unit.to_string(),
            markers,
            cursor: 0,
        })
    }

    /// Percent values of every marker, in order
    pub fn percents(&self) -> Vec<u8> {
        self.markers.iter().map(|m| m.percent).collect()
    }

    /// Whether the complete marker has been seen
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.markers.len()
    }

    /// Feed one output line.
    ///
    /// Scans forward from the next expected marker; a matched marker (and any
    /// skipped before it) is consumed so percentages never go backwards.
    pub fn observe(&mut self, line: &str) -> Option<ProgressEvent> {
        let offset = self.markers[self.cursor..]
            .iter()
            .position(|m| m.pattern.is_match(line))?;
        let index = self.cursor + offset;
        self.cursor = index + 1;

        let marker = &self.markers[index];
        Some(ProgressEvent {
            unit: self.unit.clone(),
            label: marker.label.clone(),
            percent: marker.percent,
        })
    }

    /// Feed a line and forward any event to `status`
    pub fn observe_into(&mut self, line: &str, status: &mut dyn StatusChannel) {
        if let Some(event) = self.observe(line) {
            log::debug!("Progress {}% ({})", event.percent, event.label);
            status.update(&event);
        }
    }
}

fn recipe_percent(index: usize, total: usize) -> u8 {
    let pct = ((index + 1) * RECIPE_SPAN / total).max(1);
    // bounded by RECIPE_SPAN
    pct as u8
}
