pub mod commands;
pub mod completion;

use anyhow::{Result, anyhow};
use colored::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::ResolutionEngine;
use commands::Command;
pub use completion::ShellCompleter;

/// Built-in commands handled by the shell itself
const BUILTINS: &[&str] = &["entries", "metrics", "refresh", "help", "exit", "quit"];

/// Shell state - owns the engine and dispatches commands
pub struct ShellState {
    engine: Arc<ResolutionEngine>,
    /// Registered commands
    commands: HashMap<String, Arc<dyn Command>>,
}

impl ShellState {
    /// Create a shell with all built-in commands registered
    pub fn new(engine: Arc<ResolutionEngine>) -> Self {
        let mut state = ShellState {
            engine,
            commands: HashMap::new(),
        };

        state.register_command(Arc::new(commands::resolve::ResolveCommand));
        state.register_command(Arc::new(commands::fetch::FetchCommand));
        state.register_command(Arc::new(commands::stat::StatCommand));

        state
    }

    /// Register a command
    pub fn register_command(&mut self, command: Arc<dyn Command>) {
        self.commands.insert(command.name().to_string(), command);
    }

    pub fn engine(&self) -> &Arc<ResolutionEngine> {
        &self.engine
    }

    /// Names of every command, for completion
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .keys()
            .cloned()
            .chain(BUILTINS.iter().map(|s| s.to_string()))
            .collect();
        names.sort();
        names
    }

    /// Execute a command line
    pub fn execute(&mut self, line: &str) -> Result<()> {
        let parts = Self::parse_command_line(line.trim())?;
        let Some((cmd_name, args)) = parts.split_first() else {
            return Ok(());
        };
        self.execute_command(cmd_name, args)
    }

    /// Execute a single command with already split arguments
    pub fn execute_command(&mut self, cmd_name: &str, args: &[String]) -> Result<()> {
        match cmd_name {
            "exit" | "quit" => return Err(anyhow!("exit")),
            "help" => {
                self.print_help();
                return Ok(());
            }
            "refresh" => {
                let prefix = args.first().map(String::as_str).unwrap_or("");
                let dropped = self.engine.table().len();
                self.engine.refresh(prefix);
                println!("Dropped {dropped} cache entries");
                return Ok(());
            }
            "entries" => return self.print_entries(),
            "metrics" => return self.print_metrics(),
            _ => {}
        }

        if let Some(command) = self.commands.get(cmd_name) {
            let cmd = Arc::clone(command);
            cmd.execute(self, args)
        } else {
            Err(anyhow!("Unknown command: {cmd_name}"))
        }
    }

    fn print_entries(&self) -> Result<()> {
        let entries = self.engine.entries();
        if entries.is_empty() {
            println!("{}", "(no cache entries)".dimmed());
            return Ok(());
        }
        for (key, entry) in entries {
            let state = match entry.state {
                crate::cache::CacheState::Fetched => entry.state.to_string().green(),
                crate::cache::CacheState::NeedsFetching => entry.state.to_string().yellow(),
                crate::cache::CacheState::Missing => entry.state.to_string().red(),
            };
            let pin = if entry.is_pinned { " (pinned)" } else { "" };
            commands::output::print_line!("{state:>14}  s3://{key}{pin}");
        }
        Ok(())
    }

    fn print_metrics(&self) -> Result<()> {
        let m = self.engine.metrics();
        println!("Metadata checks:  {}", m.head_count());
        println!("Content fetches:  {}", m.get_count());
        println!("Not modified:     {}", m.not_modified_count());
        println!("Failures:         {}", m.failure_count());
        println!(
            "Transferred:      {}",
            humansize::format_size(m.total_bytes(), humansize::BINARY)
        );
        println!("Request time:     {:.2?}", m.total_request_time());
        Ok(())
    }

    /// Print help message
    fn print_help(&self) {
        println!("Available commands:");
        let mut commands: Vec<_> = self.commands.values().collect();
        commands.sort_by(|a, b| a.name().cmp(b.name()));
        for cmd in commands {
            println!("  {}", cmd.usage());
        }
        println!("  refresh [PREFIX]   - Drop all cache entries");
        println!("  entries            - List cache entries and their state");
        println!("  metrics            - Show S3 request metrics");
        println!("  help               - Show this help");
        println!("  exit/quit          - Exit the shell");
    }

    /// Get the prompt string
    pub fn prompt(&self) -> String {
        format!("s3resolver ({} entries) $ ", self.engine.table().len())
    }

    /// Split a command line into words, honouring single and double quotes
    fn parse_command_line(line: &str) -> Result<Vec<String>> {
        let mut args = Vec::new();
        let mut current = String::new();
        let mut quote: Option<char> = None;
        let mut chars = line.chars();

        while let Some(ch) = chars.next() {
            match (quote, ch) {
                (Some(q), c) if c == q => quote = None,
                (None, '\'' | '"') => quote = Some(ch),
                (q, '\\') if q != Some('\'') => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                (None, ' ' | '\t') => {
                    if !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(ch),
            }
        }

        if let Some(q) = quote {
            let kind = if q == '\'' { "single" } else { "double" };
            return Err(anyhow!("Unclosed {kind} quote"));
        }
        if !current.is_empty() {
            args.push(current);
        }

        Ok(args)
    }
}
