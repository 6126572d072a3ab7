use serde::Serialize;
use serde_json::{Value, json};

use crate::check::state::{SourceState, Status};

/// Terminal states of one run, in manifest order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub states: Vec<SourceState>,
}

impl RunReport {
    /// Worst status of the run; CURRENT when nothing was checked
    pub fn outcome(&self) -> Status {
        Status::worst(self.states.iter().map(|state| state.status))
    }

    pub fn count(&self, status: Status) -> usize {
        self.states.iter().filter(|state| state.status == status).count()
    }

    /// One human-readable line per source
    pub fn lines(&self) -> Vec<String> {
        self.states.iter().map(line).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} source(s): {} current, {} updatable, {} broken, {} error",
            self.states.len(),
            self.count(Status::Current),
            self.count(Status::Updatable),
            self.count(Status::Broken),
            self.count(Status::Error),
        )
    }

    pub fn to_json(&self) -> Value {
        json!({
            "outcome": self.outcome(),
            "sources": self.states,
        })
    }
}

fn line(state: &SourceState) -> String {
    let mut line = format!("{}: {}", state.name(), state.status);
    if let Some(new) = &state.new {
        match &new.version {
            Some(version) => line.push_str(&format!(" -> {} ({})", version, new.locator)),
            None => line.push_str(&format!(" -> {}", new.locator)),
        }
    }
    if let Some(cause) = &state.cause {
        line.push_str(&format!(": {}", cause));
    }
    line
}
