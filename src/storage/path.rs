//! Pipeline path handling.

use crate::error::{Error, Result};
use std::fmt;
use std::path::PathBuf;

/// A validated absolute path as seen by every layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerPath {
    components: Vec<String>,
}

impl LayerPath {
    /// Parse an absolute pipeline path.
    ///
    /// Repeated and trailing slashes collapse; `.` and `..` are refused so a
    /// path can never climb out of a device root.
    pub fn parse(path: &str) -> Result<Self> {
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| Error::InvalidPath(format!("{}: not absolute", path)))?;

        let mut components = Vec::new();
        for component in rest.split('/').filter(|c| !c.is_empty()) {
            if matches!(component, "." | "..") {
                return Err(Error::InvalidPath(format!(
                    "{}: dot component {:?}",
                    path, component
                )));
            }
            components.push(component.to_string());
        }
        Ok(Self { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Final component; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Same path with `suffix` appended to the last component.
    ///
    /// The root has no name to extend and is returned unchanged.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let mut extended = self.clone();
        if let Some(last) = extended.components.last_mut() {
            last.push_str(suffix);
        }
        extended
    }

    /// Relative form, for joining under a device root.
    pub fn relative(&self) -> PathBuf {
        self.components.iter().collect()
    }
}

impl fmt::Display for LayerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root() {
        let path = LayerPath::parse("/").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_string(), "/");
        assert_eq!(path.relative(), PathBuf::new());
    }

    #[test]
    fn test_parse_simple() {
        let path = LayerPath::parse("/foo//bar/").unwrap();
        assert_eq!(path.components(), &["foo", "bar"]);
        assert_eq!(path.to_string(), "/foo/bar");
        assert_eq!(path.relative(), PathBuf::from("foo/bar"));
    }

    #[test]
    fn test_parse_rejects_relative_and_dots() {
        assert!(LayerPath::parse("foo/bar").is_err());
        assert!(LayerPath::parse("/foo/../bar").is_err());
        assert!(LayerPath::parse("/./bar").is_err());
    }

    #[test]
    fn test_suffix() {
        let path = LayerPath::parse("/dir/file").unwrap();
        assert_eq!(path.with_suffix("-00000.data").to_string(), "/dir/file-00000.data");
        assert_eq!(path.name(), Some("file"));
        assert!(LayerPath::parse("/").unwrap().with_suffix(".x").is_root());
    }
}
