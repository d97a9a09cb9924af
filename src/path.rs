//! Parsing of `s3:` asset identifiers.
//!
//! Three spellings of the schema are accepted and mean the same object:
//! `s3://bucket/key`, `s3:/bucket/key` and `s3:bucket/key`. A trailing
//! `?versionId=<id>` pins the identifier to one immutable object version.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{ResolveError, Result};

/// Canonical schema prefix used when printing identifiers
pub const S3_PREFIX: &str = "s3://";
/// Shortest accepted prefix; every identifier starts with this
pub const S3_PREFIX_SHORT: &str = "s3:";

const VERSION_ID_PARAM: &str = "versionId=";

/// Returns true if the path uses the S3 schema
pub fn matches_schema(path: &str) -> bool {
    path.starts_with(S3_PREFIX_SHORT)
}

/// A parsed S3 identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S3Path {
    bucket: String,
    key: String,
    version_id: Option<String>,
}

impl S3Path {
    /// Parse an identifier such as `s3://bucket/dir/object.usd?versionId=abc`
    pub fn parse(identifier: &str) -> Result<Self> {
        let rest = identifier
            .strip_prefix(S3_PREFIX_SHORT)
            .ok_or_else(|| ResolveError::MalformedPath(identifier.to_string()))?
            .trim_start_matches('/');

        let (bucket, remainder) = rest
            .split_once('/')
            .ok_or_else(|| ResolveError::MalformedPath(identifier.to_string()))?;

        if bucket.is_empty() {
            return Err(ResolveError::MalformedPath(identifier.to_string()));
        }

        let (key, query) = match remainder.split_once('?') {
            Some((key, query)) => (key, Some(query)),
            None => (remainder, None),
        };

        if key.is_empty() {
            return Err(ResolveError::MalformedPath(identifier.to_string()));
        }

        let version_id = query
            .and_then(|q| q.find(VERSION_ID_PARAM).map(|i| &q[i + VERSION_ID_PARAM.len()..]))
            .map(|v| v.split('&').next().unwrap_or_default())
            .filter(|v| !v.is_empty())
            .map(String::from);

        Ok(S3Path {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }

    /// Versioned identifiers name immutable content
    pub fn is_versioned(&self) -> bool {
        self.version_id.is_some()
    }

    /// Cache table key: `bucket/key` plus the version query if present
    pub fn normalized(&self) -> String {
        match &self.version_id {
            Some(v) => format!("{}/{}?{}{}", self.bucket, self.key, VERSION_ID_PARAM, v),
            None => format!("{}/{}", self.bucket, self.key),
        }
    }

    /// Local destination `<cache_root>/<bucket>/<key>`, lexically normalized.
    ///
    /// `..` components never climb above the bucket directory.
    pub fn local_path(&self, cache_root: &Path) -> PathBuf {
        let mut path = cache_root.join(&self.bucket);
        let floor = path.components().count();

        for component in Path::new(&self.key).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::ParentDir => {
                    if path.components().count() > floor {
                        path.pop();
                    }
                }
                _ => {}
            }
        }

        path
    }
}

impl fmt::Display for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", S3_PREFIX, self.normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versioned() {
        let path = S3Path::parse("s3://bucket/dir/obj.ext?versionId=v1").unwrap();
        assert_eq!(path.bucket(), "bucket");
        assert_eq!(path.key(), "dir/obj.ext");
        assert_eq!(path.version_id(), Some("v1"));
        assert!(path.is_versioned());
    }

    #[test]
    fn test_parse_empty_version_is_unversioned() {
        for id in ["s3://bucket/obj.usd?versionId=", "s3://bucket/obj.usd?versionId=&x=1"] {
            let path = S3Path::parse(id).unwrap();
            assert_eq!(path.version_id(), None, "{id}");
            assert!(!path.is_versioned());
            assert_eq!(path.normalized(), "bucket/obj.usd");
        }
    }

    #[test]
    fn test_parse_schema_forms() {
        for id in ["s3://bucket/a/b.usd", "s3:/bucket/a/b.usd", "s3:bucket/a/b.usd"] {
            let path = S3Path::parse(id).unwrap();
            assert_eq!(path.bucket(), "bucket", "{id}");
            assert_eq!(path.key(), "a/b.usd", "{id}");
            assert!(!path.is_versioned());
        }
    }

    #[test]
    fn test_parse_redundant_separators() {
        let path = S3Path::parse("s3:////bucket/obj.usd").unwrap();
        assert_eq!(path.bucket(), "bucket");
        assert_eq!(path.key(), "obj.usd");
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            S3Path::parse("s3://bucket-only"),
            Err(ResolveError::MalformedPath(_))
        ));
        assert!(S3Path::parse("s3://bucket/").is_err());
        assert!(S3Path::parse("s3:///key").is_err());
        assert!(S3Path::parse("/local/file.usd").is_err());
    }

    #[test]
    fn test_normalized() {
        let plain = S3Path::parse("s3:/bucket/obj.usd").unwrap();
        assert_eq!(plain.normalized(), "bucket/obj.usd");
        assert_eq!(plain.to_string(), "s3://bucket/obj.usd");

        let pinned = S3Path::parse("s3://bucket/obj.usd?versionId=abc123").unwrap();
        assert_eq!(pinned.normalized(), "bucket/obj.usd?versionId=abc123");
    }

    #[test]
    fn test_local_path() {
        let path = S3Path::parse("s3://bucket/dir/../other/./obj.usd?versionId=x").unwrap();
        assert_eq!(
            path.local_path(Path::new("/cache")),
            PathBuf::from("/cache/bucket/other/obj.usd")
        );

        let escaping = S3Path::parse("s3://bucket/../../etc/passwd").unwrap();
        assert_eq!(
            escaping.local_path(Path::new("/cache")),
            PathBuf::from("/cache/bucket/etc/passwd")
        );
    }

    #[test]
    fn test_matches_schema() {
        assert!(matches_schema("s3://bucket/key"));
        assert!(matches_schema("s3:bucket/key"));
        assert!(!matches_schema("/tmp/s3:/key"));
        assert!(!matches_schema("S3://bucket/key"));
    }
}
