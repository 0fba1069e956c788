use rebuild_archive::Format;

/// Position within a potentially nested archive: a stack of
/// `(format, path-within-parent)` levels plus an optional current-entry
/// path. An entry inside a JAR being considered as a ZIP in its own right
/// pushes a new level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilizationContext {
    levels: Vec<(Format, String)>,
    entry: Option<String>,
}

impl StabilizationContext {
    /// Context for a top-level archive.
    pub fn root(format: Format) -> Self {
        StabilizationContext {
            levels: vec![(format, String::new())],
            entry: None,
        }
    }

    /// Descends into the entry at `path`, now treated as its own archive of
    /// `format`. Non-mutating.
    pub fn nested(&self, format: Format, path: impl Into<String>) -> Self {
        let mut levels = self.levels.clone();
        levels.push((format, path.into()));
        StabilizationContext {
            levels,
            entry: None,
        }
    }

    /// The same position with a current-entry path attached. Non-mutating.
    pub fn with_entry(&self, path: impl Into<String>) -> Self {
        StabilizationContext {
            levels: self.levels.clone(),
            entry: Some(path.into()),
        }
    }

    /// Nesting depth; a top-level archive is depth 1.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Format of the archive currently being stabilized (topmost level).
    pub fn format(&self) -> Format {
        self.levels.last().map(|(f, _)| *f).unwrap_or_default()
    }

    /// Path of the entry currently under consideration, when set.
    pub fn entry_path(&self) -> Option<&str> {
        self.entry.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesting_pushes_levels() {
        let root = StabilizationContext::root(Format::Zip);
        assert_eq!(root.depth(), 1);
        assert_eq!(root.format(), Format::Zip);

        let inner = root.nested(Format::Zip, "lib/inner.jar");
        assert_eq!(inner.depth(), 2);
        assert_eq!(inner.format(), Format::Zip);
        // The original context is untouched.
        assert_eq!(root.depth(), 1);
    }

    #[test]
    fn with_entry_attaches_a_path_without_mutating() {
        let ctx = StabilizationContext::root(Format::Tar);
        let entry = ctx.with_entry("src/main.rs");
        assert_eq!(entry.entry_path(), Some("src/main.rs"));
        assert_eq!(entry.format(), Format::Tar);
        assert_eq!(ctx.entry_path(), None);
    }
}
