use std::path::{Path, PathBuf};

use crate::cache::Timestamp;

/// Resolution for identifiers that are not S3 paths
pub trait DefaultResolver: Send + Sync {
    /// Resolve a path to a local file, or the empty string if it cannot be found
    fn resolve(&self, path: &str) -> String;

    /// Whether the path is relative and needs anchoring
    fn is_relative_path(&self, path: &str) -> bool;

    /// Modification time of the resolved file
    fn get_modification_timestamp(&self, path: &str, resolved_path: &str) -> Timestamp;
}

/// Plain filesystem resolution.
///
/// Relative paths are tried against the current directory first and then
/// against each search path in order.
#[derive(Debug, Clone, Default)]
pub struct FilesystemResolver {
    search_paths: Vec<PathBuf>,
}

impl FilesystemResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        FilesystemResolver {
            search_paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn candidates(&self, path: &Path) -> Vec<PathBuf> {
        if path.is_absolute() {
            return vec![path.to_path_buf()];
        }

        let mut out = Vec::with_capacity(self.search_paths.len() + 1);
        if let Ok(cwd) = std::env::current_dir() {
            out.push(cwd.join(path));
        }
        out.extend(self.search_paths.iter().map(|dir| dir.join(path)));
        out
    }
}

impl DefaultResolver for FilesystemResolver {
    fn resolve(&self, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }

        self.candidates(Path::new(path))
            .into_iter()
            .find(|candidate| candidate.exists())
            .map(|found| found.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn is_relative_path(&self, path: &str) -> bool {
        !path.is_empty() && Path::new(path).is_relative()
    }

    fn get_modification_timestamp(&self, _path: &str, resolved_path: &str) -> Timestamp {
        std::fs::metadata(resolved_path)
            .and_then(|m| m.modified())
            .map(Timestamp::from_system_time)
            .unwrap_or(Timestamp::UNKNOWN)
    }
}
