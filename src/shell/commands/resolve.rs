use anyhow::{Result, anyhow};

use super::output::print_line;
use super::{Command, ShellState};

pub struct ResolveCommand;

impl Command for ResolveCommand {
    fn name(&self) -> &str {
        "resolve"
    }

    fn usage(&self) -> &str {
        "resolve PATH...    - Resolve paths without fetching"
    }

    fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        if args.is_empty() {
            return Err(anyhow!("Usage: resolve PATH..."));
        }

        let engine = state.engine();
        let _scope = engine.begin_scope();

        for path in args {
            let resolved = engine.resolve(path);
            if resolved.is_empty() {
                eprintln!("{path}: cannot resolve");
            } else {
                print_line!("{resolved}");
            }
        }

        Ok(())
    }
}
