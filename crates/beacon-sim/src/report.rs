//! JSON-lines scenario records written to stdout.

use std::io::Write;

use anyhow::Context;
use beacon_core::{BeaconError, Signal};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// One line of scenario output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<'a> {
    /// Identifies the scenario run.
    pub run_id: Uuid,
    /// When the signal was observed.
    pub at: DateTime<Utc>,
    /// Scenario step that produced it.
    pub step: &'a str,
    /// The signal, rendered as JSON.
    pub signal: Value,
}

/// Render a consumer signal as JSON.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized.
pub fn signal_to_json<T: Serialize>(signal: &Signal<T>) -> anyhow::Result<Value> {
    let value = match signal {
        Signal::Event(payload) => {
            json!({ "kind": "event", "payload": serde_json::to_value(payload)? })
        }
        Signal::Done(payload) => {
            json!({ "kind": "done", "payload": serde_json::to_value(payload)? })
        }
        Signal::Error(err) => error_to_json(err),
        Signal::Closed => json!({ "kind": "closed" }),
    };
    Ok(value)
}

/// Render a synchronously returned error as JSON.
#[must_use]
pub fn error_to_json(err: &BeaconError) -> Value {
    json!({
        "kind": "error",
        "code": err.error_code(),
        "message": err.to_string(),
    })
}

/// Writes records for one run.
#[derive(Debug)]
pub struct Reporter<W> {
    run_id: Uuid,
    out: W,
    written: usize,
}

impl<W: Write> Reporter<W> {
    /// Reporter tagging every record with a fresh run id.
    pub fn new(out: W) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            out,
            written: 0,
        }
    }

    /// Id shared by every record of this run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of records written.
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    /// Write one signal.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn signal<T: Serialize>(&mut self, step: &str, signal: &Signal<T>) -> anyhow::Result<()> {
        let value = signal_to_json(signal)?;
        self.write(step, value)
    }

    /// Write an error returned directly by a core call.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn rejected(&mut self, step: &str, err: &BeaconError) -> anyhow::Result<()> {
        self.write(step, error_to_json(err))
    }

    fn write(&mut self, step: &str, signal: Value) -> anyhow::Result<()> {
        let record = Record {
            run_id: self.run_id,
            at: Utc::now(),
            step,
            signal,
        };
        let line = serde_json::to_string(&record).context("could not serialize record")?;
        writeln!(self.out, "{line}").context("could not write record")?;
        self.written += 1;
        Ok(())
    }
}
