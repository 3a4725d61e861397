//! `glu history`: print a phase's recorded versions.

use std::io::Write;

use anyhow::{Context, Result};
use glu::config::GluConfig;
use glu::phases::git::KIND;
use glu_common::{Descriptor, Metadata};

pub fn cmd_history<W: Write>(
    config: &GluConfig,
    pipeline: &str,
    phase: &str,
    limit: Option<usize>,
    json: bool,
    out: &mut W,
) -> Result<()> {
    let log = config
        .open_version_log()
        .context("Failed to open version log")?;
    // Versions are keyed by pipeline and phase name only.
    let descriptor = Descriptor::new(KIND, pipeline, Metadata::new(phase));

    let states = match log.history::<serde_json::Value>(&descriptor) {
        Ok(states) => states,
        Err(e) if e.is_not_found() => {
            writeln!(out, "No history recorded for {}/{}", pipeline, phase)?;
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to read history"),
    };

    let states = states.into_iter().take(limit.unwrap_or(usize::MAX));
    if json {
        for state in states {
            writeln!(out, "{}", serde_json::to_string(&state)?)?;
        }
        return Ok(());
    }

    writeln!(out, "{:<36}  {:<20}  DIGEST", "VERSION", "RECORDED")?;
    for state in states {
        writeln!(
            out,
            "{:<36}  {:<20}  {}",
            state.version,
            state.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            state.digest
        )?;
    }
    Ok(())
}
