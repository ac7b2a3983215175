// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event reporting
//!
//! The lifecycle never prints directly. It hands every classified event,
//! change-set entry and note to an [`EventReporter`]. [`ConsoleReporter`]
//! prints aligned, colored columns; [`RecordingReporter`] keeps everything
//! for assertions.

use std::sync::{Mutex, MutexGuard};

use colored::Colorize;

use super::events::{ResourceChange, StackEvent};
use super::status::StatusClass;

/// Sink for stack lifecycle output
pub trait EventReporter: Send + Sync {
    /// Polling starts
    fn header(&self) {}

    /// One newly seen event
    fn event(&self, event: &StackEvent, class: StatusClass);

    /// The operation failed; `log` is every event seen, oldest first
    fn failed(&self, log: &[StackEvent]);

    /// Resource changes of a preview
    fn changes(&self, changes: &[ResourceChange]);

    /// Free-form note ("No updates are to be performed.", change-set reasons)
    fn note(&self, text: &str);
}

/// Prints to the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    fn line(event: &StackEvent) -> String {
        format!(
            "{:<50} {:<25} {:<50} {:<25}",
            event.status.as_str(),
            event.logical_resource_id,
            event.reason.as_deref().unwrap_or(""),
            event.timestamp.to_rfc3339(),
        )
    }

    fn colored_line(event: &StackEvent, class: StatusClass) -> String {
        let line = Self::line(event);
        match class {
            StatusClass::Failure => line.red().to_string(),
            StatusClass::Warning => line.yellow().to_string(),
            StatusClass::Success => line.green().to_string(),
            StatusClass::Info => line,
        }
    }
}

impl EventReporter for ConsoleReporter {
    fn header(&self) {
        println!(
            "{:<50} {:<25} {:<50} {:<25}\n",
            "Resource Status", "Resource ID", "Reason", "Timestamp"
        );
    }

    fn event(&self, event: &StackEvent, class: StatusClass) {
        println!("{}", Self::colored_line(event, class));
    }

    fn failed(&self, log: &[StackEvent]) {
        eprintln!("{} {}", "✗".red(), "Stack operation failed, full event log:".bold());
        for event in log {
            eprintln!("{}", Self::colored_line(event, event.status.classify()));
        }
    }

    fn changes(&self, changes: &[ResourceChange]) {
        if changes.is_empty() {
            println!("No resource changes.");
            return;
        }
        println!("{:<10} {:<30} {:<40} {:<10}", "Action", "LogicalResourceId", "ResourceType", "Replacement");
        for change in changes {
            println!(
                "{:<10} {:<30} {:<40} {:<10}",
                change.action.as_str().cyan(),
                change.logical_resource_id,
                change.resource_type,
                change.replacement.as_deref().unwrap_or("-"),
            );
        }
    }

    fn note(&self, text: &str) {
        println!("{}", text.yellow());
    }
}

/// What a [`RecordingReporter`] saw
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub events: Vec<(StackEvent, StatusClass)>,
    pub failures: Vec<Vec<StackEvent>>,
    pub changes: Vec<ResourceChange>,
    pub notes: Vec<String>,
}

/// Collects output instead of printing it
#[derive(Debug, Default)]
pub struct RecordingReporter {
    inner: Mutex<Recorded>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Snapshot of everything recorded
    pub fn recorded(&self) -> Recorded {
        self.lock().clone()
    }

    /// Events reported with `class`
    pub fn lines_of(&self, class: StatusClass) -> Vec<StackEvent> {
        self.lock()
            .events
            .iter()
            .filter(|(_, c)| *c == class)
            .map(|(e, _)| e.clone())
            .collect()
    }
}

impl EventReporter for RecordingReporter {
    fn event(&self, event: &StackEvent, class: StatusClass) {
        self.lock().events.push((event.clone(), class));
    }

    fn failed(&self, log: &[StackEvent]) {
        self.lock().failures.push(log.to_vec());
    }

    fn changes(&self, changes: &[ResourceChange]) {
        self.lock().changes.extend_from_slice(changes);
    }

    fn note(&self, text: &str) {
        self.lock().notes.push(text.to_string());
    }
}
