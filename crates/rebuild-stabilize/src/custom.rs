//! User-declared stabilization rules: regex substitution over matching
//! paths, or wholesale path exclusion.
//!
//! Paths match against glob patterns where `*` is any run of non-separator
//! bytes, `**` is any run including separators, and `?` is one non-separator
//! byte. Globs compile to anchored regexes.

use rebuild_archive::Format;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StabilizeError;
use crate::stabilizer::{Stabilizer, StabilizerFn};

/// Regex substitution applied to the bytes of every matching entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReplacePattern {
    pub paths: Vec<String>,
    pub pattern: String,
    pub replace: String,
}

/// Drops every entry whose name matches one of the paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExcludePath {
    pub paths: Vec<String>,
}

/// One user-declared rule. Exactly one of the two shapes must be set, and a
/// non-empty `reason` documents why the rule is sound for the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CustomStabilizerEntry {
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_pattern: Option<ReplacePattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_path: Option<ExcludePath>,
}

impl CustomStabilizerEntry {
    fn validate(&self, index: usize) -> Result<(), StabilizeError> {
        let invalid = |msg: String| StabilizeError::InvalidCustomStabilizer(msg);
        if self.reason.is_empty() {
            return Err(invalid(format!("entry {index}: reason must not be empty")));
        }
        let paths = match (&self.replace_pattern, &self.exclude_path) {
            (Some(rp), None) => {
                regex::bytes::Regex::new(&rp.pattern).map_err(|e| {
                    invalid(format!("entry {index}: pattern does not compile: {e}"))
                })?;
                &rp.paths
            }
            (None, Some(ep)) => &ep.paths,
            _ => {
                return Err(invalid(format!(
                    "entry {index}: exactly one of replacePattern or excludePath must be set"
                )));
            }
        };
        if paths.is_empty() {
            return Err(invalid(format!("entry {index}: paths must not be empty")));
        }
        if paths.iter().any(String::is_empty) {
            return Err(invalid(format!("entry {index}: paths must not contain empty strings")));
        }
        Ok(())
    }
}

/// Validates each entry and synthesizes named stabilizers for the given
/// format. Names carry the 0-based entry index (`replace-pattern-0`,
/// `exclude-path-1`, ...) so identical inputs always reproduce identical
/// configurations.
pub fn create(
    entries: &[CustomStabilizerEntry],
    format: Format,
) -> Result<Vec<Stabilizer>, StabilizeError> {
    if !matches!(format, Format::Zip | Format::Tar | Format::TarGz) {
        return Err(StabilizeError::InvalidCustomStabilizer(format!(
            "custom stabilizers are not supported for format {format}"
        )));
    }
    let mut out = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        entry.validate(index)?;
        if let Some(rp) = &entry.replace_pattern {
            let matcher = PathMatcher::compile(&rp.paths)?;
            let pattern = regex::bytes::Regex::new(&rp.pattern).map_err(|e| {
                StabilizeError::InvalidCustomStabilizer(format!(
                    "entry {index}: pattern does not compile: {e}"
                ))
            })?;
            let replace = rp.replace.clone().into_bytes();
            let name = format!("replace-pattern-{index}");
            out.push(match format {
                Format::Zip => Stabilizer::new(
                    name,
                    StabilizerFn::ZipEntry(Box::new(move |e| {
                        if !matcher.matches(&e.name) {
                            return;
                        }
                        let body = match e.body() {
                            Ok(b) => b.to_vec(),
                            Err(err) => {
                                warn!(entry = %e.name, error = %err, "skipping unreadable entry");
                                return;
                            }
                        };
                        let replaced = pattern.replace_all(&body, replace.as_slice());
                        if replaced != body {
                            e.set_body(replaced.into_owned());
                        }
                    })),
                ),
                _ => Stabilizer::new(
                    name,
                    StabilizerFn::TarEntry(Box::new(move |e| {
                        if !matcher.matches(&e.name) {
                            return;
                        }
                        let replaced = pattern.replace_all(e.body(), replace.as_slice());
                        if replaced != e.body() {
                            e.set_body(replaced.into_owned());
                        }
                    })),
                ),
            });
        } else if let Some(ep) = &entry.exclude_path {
            let matcher = PathMatcher::compile(&ep.paths)?;
            let name = format!("exclude-path-{index}");
            out.push(match format {
                Format::Zip => Stabilizer::new(
                    name,
                    StabilizerFn::ZipArchive(Box::new(move |a| {
                        a.entries.retain(|e| !matcher.matches(&e.name));
                    })),
                ),
                _ => Stabilizer::new(
                    name,
                    StabilizerFn::TarArchive(Box::new(move |a| {
                        a.entries.retain(|e| !matcher.matches(&e.name));
                    })),
                ),
            });
        }
    }
    Ok(out)
}

/// A compiled set of glob patterns; a path matches when any pattern does.
struct PathMatcher {
    patterns: Vec<regex::Regex>,
}

impl PathMatcher {
    fn compile(globs: &[String]) -> Result<Self, StabilizeError> {
        let patterns = globs
            .iter()
            .map(|g| {
                regex::Regex::new(&glob_to_regex(g)).map_err(|e| {
                    StabilizeError::InvalidCustomStabilizer(format!(
                        "path glob {g:?} does not compile: {e}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PathMatcher { patterns })
    }

    fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut re = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    re.push_str(".*");
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    re
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace_entry(paths: &[&str], pattern: &str, replace: &str) -> CustomStabilizerEntry {
        CustomStabilizerEntry {
            reason: "test".into(),
            replace_pattern: Some(ReplacePattern {
                paths: paths.iter().map(|s| s.to_string()).collect(),
                pattern: pattern.into(),
                replace: replace.into(),
            }),
            exclude_path: None,
        }
    }

    fn exclude_entry(paths: &[&str]) -> CustomStabilizerEntry {
        CustomStabilizerEntry {
            reason: "test".into(),
            replace_pattern: None,
            exclude_path: Some(ExcludePath {
                paths: paths.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    #[test]
    fn glob_star_stops_at_separators() {
        let m = PathMatcher::compile(&["src/*.rs".into()]).unwrap();
        assert!(m.matches("src/lib.rs"));
        assert!(!m.matches("src/nested/lib.rs"));
    }

    #[test]
    fn glob_double_star_crosses_separators() {
        let m = PathMatcher::compile(&["**/pom.properties".into()]).unwrap();
        assert!(m.matches("META-INF/maven/g/a/pom.properties"));
        assert!(!m.matches("META-INF/maven/g/a/pom.xml"));
    }

    #[test]
    fn glob_question_mark_is_one_byte() {
        let m = PathMatcher::compile(&["file.?".into()]).unwrap();
        assert!(m.matches("file.c"));
        assert!(!m.matches("file.cc"));
        assert!(!m.matches("file./"));
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let m = PathMatcher::compile(&["a+b.txt".into()]).unwrap();
        assert!(m.matches("a+b.txt"));
        assert!(!m.matches("aab.txt"));
    }

    #[test]
    fn names_are_deterministic_and_zero_based() {
        let entries = vec![
            replace_entry(&["*"], "a", "b"),
            exclude_entry(&["drop/**"]),
            replace_entry(&["*"], "c", "d"),
        ];
        let names: Vec<String> = create(&entries, Format::Tar)
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, ["replace-pattern-0", "exclude-path-1", "replace-pattern-2"]);
        let again: Vec<String> = create(&entries, Format::Tar)
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, again);
    }

    #[test]
    fn rejects_empty_reason() {
        let mut entry = exclude_entry(&["x"]);
        entry.reason.clear();
        assert!(matches!(
            create(&[entry], Format::Tar),
            Err(StabilizeError::InvalidCustomStabilizer(_))
        ));
    }

    #[test]
    fn rejects_empty_paths_and_empty_path_strings() {
        assert!(create(&[exclude_entry(&[])], Format::Tar).is_err());
        assert!(create(&[exclude_entry(&[""])], Format::Tar).is_err());
    }

    #[test]
    fn rejects_bad_pattern() {
        assert!(create(&[replace_entry(&["*"], "[unclosed", "")], Format::Zip).is_err());
    }

    #[test]
    fn rejects_zero_or_two_shapes() {
        let neither = CustomStabilizerEntry {
            reason: "r".into(),
            ..CustomStabilizerEntry::default()
        };
        assert!(create(&[neither], Format::Zip).is_err());
        let both = CustomStabilizerEntry {
            reason: "r".into(),
            replace_pattern: Some(ReplacePattern {
                paths: vec!["*".into()],
                pattern: "a".into(),
                replace: "b".into(),
            }),
            exclude_path: Some(ExcludePath { paths: vec!["*".into()] }),
        };
        assert!(create(&[both], Format::Zip).is_err());
    }

    #[test]
    fn deserializes_from_config_json() {
        let json = r##"[
            {"reason": "strip maven timestamps",
             "replacePattern": {"paths": ["**/pom.properties"], "pattern": "#.*", "replace": ""}},
            {"reason": "drop maven metadata",
             "excludePath": {"paths": ["META-INF/maven/**"]}}
        ]"##;
        let entries: Vec<CustomStabilizerEntry> = serde_json::from_str(json).unwrap();
        let stabilizers = create(&entries, Format::Zip).unwrap();
        assert_eq!(stabilizers.len(), 2);
    }
}
