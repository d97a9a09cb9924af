use rustyline::Context;
use rustyline::completion::{Completer, Pair};
use std::sync::Arc;

use crate::engine::ResolutionEngine;
use crate::path::S3_PREFIX;

/// Tab completion helper for the shell.
///
/// Completes command names on the first word and identifiers already known
/// to the cache table afterwards.
pub struct ShellCompleter {
    engine: Arc<ResolutionEngine>,
    commands: Vec<String>,
}

impl ShellCompleter {
    pub fn new(engine: Arc<ResolutionEngine>, commands: Vec<String>) -> Self {
        ShellCompleter { engine, commands }
    }

    fn complete_command(&self, word: &str) -> Vec<Pair> {
        self.commands
            .iter()
            .filter(|cmd| cmd.starts_with(word))
            .map(|cmd| Pair {
                display: cmd.clone(),
                replacement: cmd.clone(),
            })
            .collect()
    }

    fn complete_identifier(&self, word: &str) -> Vec<Pair> {
        self.engine
            .entries()
            .into_iter()
            .map(|(key, _)| format!("{S3_PREFIX}{key}"))
            .filter(|id| id.starts_with(word))
            .map(|id| Pair {
                display: id.clone(),
                replacement: id,
            })
            .collect()
    }
}

impl Completer for ShellCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];
        if line.trim().is_empty() {
            return Ok((0, Vec::new()));
        }

        let starting_new_word = line.ends_with(char::is_whitespace);
        let words: Vec<&str> = line.split_whitespace().collect();
        let current = if starting_new_word {
            ""
        } else {
            words.last().copied().unwrap_or("")
        };
        let start = pos - current.len();

        if words.len() == 1 && !starting_new_word {
            return Ok((start, self.complete_command(current)));
        }

        Ok((start, self.complete_identifier(current)))
    }
}

impl rustyline::Helper for ShellCompleter {}
impl rustyline::highlight::Highlighter for ShellCompleter {}
impl rustyline::hint::Hinter for ShellCompleter {
    type Hint = String;
}
impl rustyline::validate::Validator for ShellCompleter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::FilesystemResolver;
    use rustyline::history::DefaultHistory;

    fn completer() -> ShellCompleter {
        let engine = Arc::new(ResolutionEngine::new(
            "/tmp/s3resolver-test",
            None,
            Arc::new(FilesystemResolver::new()),
        ));
        engine.resolve("s3://bucket/scene.usd");
        engine.resolve("s3://bucket/props/chair.usd");
        engine.resolve("s3://other/x.usd");
        ShellCompleter::new(
            engine,
            vec!["resolve".to_string(), "refresh".to_string(), "fetch".to_string()],
        )
    }

    #[test]
    fn test_complete_commands() {
        let c = completer();
        let history = DefaultHistory::new();
        let (start, pairs) = c.complete("re", 2, &Context::new(&history)).unwrap();
        assert_eq!(start, 0);
        let names: Vec<_> = pairs.into_iter().map(|p| p.replacement).collect();
        assert_eq!(names, vec!["resolve", "refresh"]);
    }

    #[test]
    fn test_complete_identifiers() {
        let c = completer();
        let history = DefaultHistory::new();
        let line = "fetch s3://bucket/";
        let (start, pairs) = c.complete(line, line.len(), &Context::new(&history)).unwrap();
        assert_eq!(start, "fetch ".len());
        let ids: Vec<_> = pairs.into_iter().map(|p| p.replacement).collect();
        assert_eq!(
            ids,
            vec!["s3://bucket/props/chair.usd", "s3://bucket/scene.usd"]
        );
    }
}
