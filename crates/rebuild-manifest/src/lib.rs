//! # rebuild-manifest
//!
//! Parser and writer for JAR `MANIFEST.MF` files.
//!
//! The reader is tolerant: it accepts `\r\n`, `\n`, and `\r` line endings and
//! normalizes everything to `\r\n` internally. The writer is strict: it emits
//! CRLF line endings, wraps physical lines at 72 bytes with single-space
//! continuation lines, separates sections with one blank line, and ends the
//! output with a trailing blank line — the byte layout the JDK's own tooling
//! produces.
//!
//! # Example
//!
//! ```
//! use rebuild_manifest::Manifest;
//!
//! let m = Manifest::parse(b"Manifest-Version: 1.0\r\nMain-Class: com.example.App\r\n\r\n").unwrap();
//! assert_eq!(m.main.get("Manifest-Version"), Some("1.0"));
//! let out = m.write();
//! assert_eq!(Manifest::parse(&out).unwrap().write(), out);
//! ```

use thiserror::Error;

/// Maximum physical line width in bytes, excluding the line terminator.
const MAX_LINE: usize = 72;

/// Errors produced while parsing a manifest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    /// A non-blank, non-continuation line had no `:` separator.
    #[error("line {0} has no colon separator")]
    MissingColon(usize),
    /// The same attribute name appeared twice within one section.
    #[error("duplicate attribute {0:?} in section")]
    DuplicateAttribute(String),
    /// An attribute name contained characters outside `[A-Za-z0-9_-]`,
    /// was empty, or started with `From`.
    #[error("invalid attribute name {0:?}")]
    InvalidName(String),
    /// A continuation line appeared before any attribute in its section.
    #[error("line {0} continues a nonexistent attribute")]
    UnexpectedContinuation(usize),
    /// The input did not end with a line terminator.
    #[error("manifest is missing its trailing newline")]
    MissingTrailingNewline,
    /// The input was not valid UTF-8.
    #[error("manifest is not valid UTF-8")]
    NotUtf8,
}

/// One manifest section: an insertion-ordered list of attributes.
///
/// Attribute names compare case-insensitively for lookup and duplicate
/// detection, but the original spelling is preserved on write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    attrs: Vec<(String, String)>,
}

impl Section {
    /// Creates an empty section.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the attribute with the given name, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Appends an attribute, validating the name and rejecting duplicates.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ManifestError> {
        validate_name(name)?;
        if self.get(name).is_some() {
            return Err(ManifestError::DuplicateAttribute(name.to_string()));
        }
        self.attrs.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Replaces the value of an existing attribute in place, keeping its
    /// position. Returns false when the attribute is absent.
    pub fn replace(&mut self, name: &str, value: &str) -> bool {
        for (n, v) in &mut self.attrs {
            if n.eq_ignore_ascii_case(name) {
                *v = value.to_string();
                return true;
            }
        }
        false
    }

    /// Removes the attribute with the given name. Returns true if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.attrs.len() != before
    }

    /// Iterates attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of attributes in this section.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// True when the section has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// A parsed manifest: the main section plus the per-entry sections that
/// follow it, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// The first section of the file.
    pub main: Section,
    /// Every section after the first, in order of appearance.
    pub entries: Vec<Section>,
}

impl Manifest {
    /// Parses manifest bytes.
    ///
    /// Line endings may be `\r\n`, `\n`, or `\r`. The final line must carry a
    /// terminator. Lines beginning with a single space continue the previous
    /// attribute value verbatim; a blank line closes the current section.
    pub fn parse(input: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(input).map_err(|_| ManifestError::NotUtf8)?;
        let lines = split_lines(text)?;

        let mut sections: Vec<Section> = Vec::new();
        let mut current: Option<Section> = None;

        for (idx, line) in lines.iter().enumerate() {
            let lineno = idx + 1;
            if line.is_empty() {
                if let Some(sec) = current.take() {
                    sections.push(sec);
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix(' ') {
                let sec = current
                    .as_mut()
                    .ok_or(ManifestError::UnexpectedContinuation(lineno))?;
                let (_, value) = sec
                    .attrs
                    .last_mut()
                    .ok_or(ManifestError::UnexpectedContinuation(lineno))?;
                value.push_str(rest);
                continue;
            }
            let colon = line
                .find(':')
                .ok_or(ManifestError::MissingColon(lineno))?;
            let name = &line[..colon];
            let mut value = &line[colon + 1..];
            if let Some(v) = value.strip_prefix(' ') {
                value = v;
            }
            current
                .get_or_insert_with(Section::new)
                .set(name, value)?;
        }
        if let Some(sec) = current.take() {
            sections.push(sec);
        }

        let mut iter = sections.into_iter();
        Ok(Self {
            main: iter.next().unwrap_or_default(),
            entries: iter.collect(),
        })
    }

    /// Serializes the manifest to its canonical byte form.
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_section(&mut out, &self.main);
        for sec in &self.entries {
            write_section(&mut out, sec);
        }
        out
    }
}

fn validate_name(name: &str) -> Result<(), ManifestError> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !valid || (name.len() >= 4 && name[..4].eq_ignore_ascii_case("from")) {
        return Err(ManifestError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Splits input into logical lines, accepting any of the three terminator
/// conventions. Errors when the final line is unterminated.
fn split_lines(text: &str) -> Result<Vec<&str>, ManifestError> {
    let mut lines = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                lines.push(&text[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            b'\n' => {
                lines.push(&text[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start != bytes.len() {
        return Err(ManifestError::MissingTrailingNewline);
    }
    Ok(lines)
}

fn write_section(out: &mut Vec<u8>, sec: &Section) {
    for (name, value) in sec.iter() {
        write_attr(out, name, value);
    }
    out.extend_from_slice(b"\r\n");
}

/// Emits `Name: value` wrapped at 72 bytes. Splits prefer the last space
/// before the limit; a continuation line starts with a single space that the
/// reader strips, so the remainder is carried over verbatim.
fn write_attr(out: &mut Vec<u8>, name: &str, value: &str) {
    let line = format!("{name}: {value}");
    let mut rest = line.as_str();
    let mut first = true;
    loop {
        let budget = if first { MAX_LINE } else { MAX_LINE - 1 };
        if !first {
            out.push(b' ');
        }
        if rest.len() <= budget {
            out.extend_from_slice(rest.as_bytes());
            out.extend_from_slice(b"\r\n");
            return;
        }
        let cut = split_point(rest.as_bytes(), budget);
        out.extend_from_slice(&rest.as_bytes()[..cut]);
        out.extend_from_slice(b"\r\n");
        rest = &rest[cut..];
        first = false;
    }
}

/// Picks a byte index to split at: the position after the last space within
/// the budget, or the budget itself when the window holds no space.
fn split_point(bytes: &[u8], budget: usize) -> usize {
    match bytes[..budget].iter().rposition(|&b| b == b' ') {
        Some(p) if p > 0 => p,
        _ => budget,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_main_and_entry_sections() {
        let input = b"Manifest-Version: 1.0\r\nCreated-By: 11 (Oracle)\r\n\r\nName: foo/Bar.class\r\nSHA-256-Digest: abc\r\n\r\n";
        let m = Manifest::parse(input).unwrap();
        assert_eq!(m.main.get("Manifest-Version"), Some("1.0"));
        assert_eq!(m.entries.len(), 1);
        assert_eq!(m.entries[0].get("Name"), Some("foo/Bar.class"));
    }

    #[test]
    fn tolerates_bare_lf_and_cr_endings() {
        let lf = Manifest::parse(b"A: 1\nB: 2\n").unwrap();
        let cr = Manifest::parse(b"A: 1\rB: 2\r").unwrap();
        assert_eq!(lf, cr);
        assert_eq!(lf.main.get("B"), Some("2"));
    }

    #[test]
    fn continuation_concatenates_verbatim() {
        let m = Manifest::parse(b"Export-Package: c,\n a,b,d,\n e\n").unwrap();
        assert_eq!(m.main.get("Export-Package"), Some("c,a,b,d,e"));
    }

    #[test]
    fn value_keeps_leading_content_after_optional_space() {
        let m = Manifest::parse(b"A:no-space\nB:  two-spaces\n").unwrap();
        assert_eq!(m.main.get("A"), Some("no-space"));
        // Only a single leading space is separator; the rest is value.
        assert_eq!(m.main.get("B"), Some(" two-spaces"));
    }

    #[test]
    fn rejects_missing_colon() {
        assert_eq!(
            Manifest::parse(b"NoColonHere\n"),
            Err(ManifestError::MissingColon(1))
        );
    }

    #[test]
    fn rejects_duplicate_attribute_in_section() {
        assert_eq!(
            Manifest::parse(b"A: 1\na: 2\n"),
            Err(ManifestError::DuplicateAttribute("a".to_string()))
        );
    }

    #[test]
    fn allows_same_attribute_across_sections() {
        let m = Manifest::parse(b"A: 1\n\nA: 2\n").unwrap();
        assert_eq!(m.main.get("A"), Some("1"));
        assert_eq!(m.entries[0].get("A"), Some("2"));
    }

    #[test]
    fn rejects_invalid_name_chars() {
        assert!(matches!(
            Manifest::parse(b"Bad Name: 1\n"),
            Err(ManifestError::InvalidName(_))
        ));
        assert!(matches!(
            Manifest::parse(b"From-Here: 1\n"),
            Err(ManifestError::InvalidName(_))
        ));
    }

    #[test]
    fn rejects_leading_continuation() {
        assert_eq!(
            Manifest::parse(b" orphan\n"),
            Err(ManifestError::UnexpectedContinuation(1))
        );
        assert_eq!(
            Manifest::parse(b"A: 1\n\n continued\n"),
            Err(ManifestError::UnexpectedContinuation(3))
        );
    }

    #[test]
    fn rejects_missing_trailing_newline() {
        assert_eq!(
            Manifest::parse(b"A: 1"),
            Err(ManifestError::MissingTrailingNewline)
        );
    }

    #[test]
    fn writer_emits_crlf_sections_and_trailing_blank() {
        let mut m = Manifest::default();
        m.main.set("Manifest-Version", "1.0").unwrap();
        let mut entry = Section::new();
        entry.set("Name", "x").unwrap();
        m.entries.push(entry);
        assert_eq!(
            m.write(),
            b"Manifest-Version: 1.0\r\n\r\nName: x\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn writer_wraps_long_lines_at_72_bytes() {
        let mut m = Manifest::default();
        let value = "x".repeat(200);
        m.main.set("Class-Path", &value).unwrap();
        let out = m.write();
        for line in out.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            assert!(line.len() <= MAX_LINE, "line too long: {}", line.len());
        }
        let back = Manifest::parse(&out).unwrap();
        assert_eq!(back.main.get("Class-Path"), Some(value.as_str()));
    }

    #[test]
    fn writer_prefers_space_splits() {
        let mut m = Manifest::default();
        let value = "alpha beta gamma ".repeat(8);
        m.main.set("Implementation-Title", value.trim_end()).unwrap();
        let out = m.write();
        let back = Manifest::parse(&out).unwrap();
        assert_eq!(back.main.get("Implementation-Title"), Some(value.trim_end()));
    }

    proptest! {
        /// Write is a fixed point of parse∘write: stabilized output re-parses
        /// and re-writes to identical bytes.
        #[test]
        fn write_parse_write_is_stable(
            attrs in proptest::collection::vec(
                ("[A-Za-z][A-Za-z0-9-]{0,30}", "[ -~]{0,200}"),
                1..8,
            )
        ) {
            let mut m = Manifest::default();
            for (name, value) in &attrs {
                // Duplicate names are rejected by set; skip those inputs.
                let _ = m.main.set(name, value);
            }
            prop_assume!(!m.main.is_empty());
            let once = m.write();
            let twice = Manifest::parse(&once).unwrap().write();
            prop_assert_eq!(once, twice);
        }
    }
}
