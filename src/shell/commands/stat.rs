use anyhow::{Result, anyhow};
use serde_json::json;

use super::fetch::resolve_and_fetch;
use super::output::print_line;
use super::{Command, ShellState};

pub struct StatCommand;

impl Command for StatCommand {
    fn name(&self) -> &str {
        "stat"
    }

    fn usage(&self) -> &str {
        "stat [--json] ID.. - Fetch objects and show their cache entries"
    }

    fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        let as_json = args.iter().any(|a| a == "--json");
        let ids: Vec<&String> = args.iter().filter(|a| *a != "--json").collect();
        if ids.is_empty() {
            return Err(anyhow!("Usage: stat [--json] ID..."));
        }

        let engine = state.engine();
        for id in ids {
            if !engine.matches_schema(id) {
                return Err(anyhow!("{id}: not an S3 identifier"));
            }
            if let Err(e) = resolve_and_fetch(engine, id) {
                eprintln!("{id}: {e}");
            }

            let entry = engine
                .entry(id)
                .ok_or_else(|| anyhow!("{id}: no cache entry"))?;
            let timestamp = engine.get_timestamp(id);

            if as_json {
                let value = json!({
                    "identifier": id,
                    "state": entry.state.to_string(),
                    "local_path": entry.local_path.to_string_lossy(),
                    "last_modified": entry.last_modified.to_rfc3339(),
                    "pinned": entry.is_pinned,
                    "etag": entry.content_tag,
                });
                print_line!("{value}");
            } else {
                print_line!("{id}");
                print_line!("  state:         {}", entry.state);
                print_line!("  local path:    {}", entry.local_path.display());
                print_line!("  last modified: {timestamp}");
                print_line!("  pinned:        {}", entry.is_pinned);
                print_line!(
                    "  etag:          {}",
                    entry.content_tag.as_deref().unwrap_or("-")
                );
            }
        }

        Ok(())
    }
}
