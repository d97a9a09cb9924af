use anyhow::{Result, anyhow};
use colored::*;

use super::output::print_line;
use super::{Command, ShellState};
use crate::engine::ResolutionEngine;

pub struct FetchCommand;

/// Resolve and fetch one identifier, returning the path to its local copy
pub(crate) fn resolve_and_fetch(engine: &ResolutionEngine, path: &str) -> Result<String> {
    if !engine.matches_schema(path) {
        let resolved = engine.resolve(path);
        if resolved.is_empty() {
            return Err(anyhow!("{path}: not found"));
        }
        return Ok(resolved);
    }

    let resolved = engine.resolve_name(path)?;
    engine.fetch_asset(path, &resolved)?;

    // the second resolution sees the fetched entry and returns the local path
    Ok(engine.resolve_name(path)?)
}

impl Command for FetchCommand {
    fn name(&self) -> &str {
        "fetch"
    }

    fn usage(&self) -> &str {
        "fetch PATH...      - Download objects into the local cache"
    }

    fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        if args.is_empty() {
            return Err(anyhow!("Usage: fetch PATH..."));
        }

        let mut failures = 0;
        for path in args {
            match resolve_and_fetch(state.engine(), path) {
                Ok(local) => {
                    let size = std::fs::metadata(&local).map(|m| m.len()).unwrap_or(0);
                    print_line!(
                        "{}  {}",
                        local,
                        humansize::format_size(size, humansize::BINARY).dimmed()
                    );
                }
                Err(e) => {
                    failures += 1;
                    eprintln!("{} {path}: {e}", "Error:".red().bold());
                }
            }
        }

        if failures > 0 {
            return Err(anyhow!("{failures} of {} fetches failed", args.len()));
        }
        Ok(())
    }
}
