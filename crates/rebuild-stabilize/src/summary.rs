//! Per-file digest summaries of archive content, and a merge-walk diff
//! between two summaries. Callers are expected to summarize *stabilized*
//! archives so that iteration order — and therefore diff order — is
//! deterministic.

use rebuild_archive::{read_gzip, Format, TarArchive, ZipArchive};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StabilizeError;

/// Parallel sequences of file names and lowercase-hex SHA-256 digests, in
/// archive iteration order, plus a CRLF count over all content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSummary {
    pub files: Vec<String>,
    pub hashes: Vec<String>,
    pub crlf_count: usize,
}

/// The three outcome lists of a summary diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub left_only: Vec<String>,
    pub diffs: Vec<String>,
    pub right_only: Vec<String>,
}

impl DiffResult {
    /// True when both sides held identical content.
    pub fn is_empty(&self) -> bool {
        self.left_only.is_empty() && self.diffs.is_empty() && self.right_only.is_empty()
    }
}

impl ContentSummary {
    /// Summarizes archive bytes. Directory entries contribute the digest of
    /// an empty body. Gzip summarizes its single member under the stored
    /// name; raw bytes summarize as one unnamed file.
    pub fn from_bytes(data: &[u8], format: Format) -> Result<Self, StabilizeError> {
        let mut summary = ContentSummary::default();
        match format {
            Format::Zip => {
                let mut archive = ZipArchive::parse(data)?;
                for entry in &mut archive.entries {
                    let name = entry.name.clone();
                    let body = entry.body()?.to_vec();
                    summary.push(name, &body);
                }
            }
            Format::Tar => {
                let archive = TarArchive::parse(data)?;
                for entry in &archive.entries {
                    summary.push(entry.name.clone(), entry.body());
                }
            }
            Format::TarGz => {
                let (_, payload) = read_gzip(data)?;
                return Self::from_bytes(&payload, Format::Tar);
            }
            Format::Gzip => {
                let (meta, payload) = read_gzip(data)?;
                let name = meta
                    .name
                    .map(|n| String::from_utf8_lossy(&n).into_owned())
                    .unwrap_or_default();
                summary.push(name, &payload);
            }
            Format::Raw => {
                summary.push(String::new(), data);
            }
            Format::Unknown => {
                return Err(StabilizeError::UnsupportedFormat(
                    "cannot summarize an archive of unknown format".into(),
                ));
            }
        }
        Ok(summary)
    }

    fn push(&mut self, name: String, body: &[u8]) {
        self.files.push(name);
        self.hashes.push(hex::encode(Sha256::digest(body)));
        self.crlf_count += count_crlf(body);
    }

    /// Merge-walks two summaries sorted by name. A name present on both
    /// sides with differing digests is reported under `diffs` as it appears
    /// on the right; equal content is skipped silently.
    pub fn diff(&self, right: &ContentSummary) -> DiffResult {
        let mut result = DiffResult::default();
        let (mut l, mut r) = (0, 0);
        while l < self.files.len() && r < right.files.len() {
            match self.files[l].cmp(&right.files[r]) {
                std::cmp::Ordering::Less => {
                    result.left_only.push(self.files[l].clone());
                    l += 1;
                }
                std::cmp::Ordering::Greater => {
                    result.right_only.push(right.files[r].clone());
                    r += 1;
                }
                std::cmp::Ordering::Equal => {
                    if self.hashes[l] != right.hashes[r] {
                        result.diffs.push(right.files[r].clone());
                    }
                    l += 1;
                    r += 1;
                }
            }
        }
        result.left_only.extend(self.files[l..].iter().cloned());
        result.right_only.extend(right.files[r..].iter().cloned());
        result
    }
}

fn count_crlf(body: &[u8]) -> usize {
    body.windows(2).filter(|w| w[0] == b'\r' && w[1] == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebuild_archive::{TarEntry, ZipEntry};

    fn tar_bytes(names_bodies: &[(&str, &[u8])]) -> Vec<u8> {
        TarArchive {
            entries: names_bodies
                .iter()
                .map(|(n, b)| TarEntry::new(*n, b.to_vec()))
                .collect(),
        }
        .write()
        .unwrap()
    }

    fn summary(names_hashes: &[(&str, &str)]) -> ContentSummary {
        ContentSummary {
            files: names_hashes.iter().map(|(n, _)| n.to_string()).collect(),
            hashes: names_hashes.iter().map(|(_, h)| h.to_string()).collect(),
            crlf_count: 0,
        }
    }

    #[test]
    fn records_names_hashes_and_crlf_counts() {
        let bytes = tar_bytes(&[("a", b"one\r\ntwo\r\n"), ("b", b"plain")]);
        let s = ContentSummary::from_bytes(&bytes, Format::Tar).unwrap();
        assert_eq!(s.files, ["a", "b"]);
        assert_eq!(s.hashes[1], hex::encode(Sha256::digest(b"plain")));
        assert_eq!(s.crlf_count, 2);
    }

    #[test]
    fn directories_hash_an_empty_body() {
        let bytes = tar_bytes(&[("dir/", b"")]);
        let s = ContentSummary::from_bytes(&bytes, Format::Tar).unwrap();
        assert_eq!(s.hashes[0], hex::encode(Sha256::digest(b"")));
    }

    #[test]
    fn zip_entries_hash_decompressed_bytes() {
        let mut archive = rebuild_archive::ZipArchive {
            entries: vec![{
                let mut e = ZipEntry::new("f", b"content".to_vec());
                e.method = rebuild_archive::zip::METHOD_DEFLATE;
                e
            }],
            comment: String::new(),
        };
        let bytes = archive.write().unwrap();
        let s = ContentSummary::from_bytes(&bytes, Format::Zip).unwrap();
        assert_eq!(s.hashes[0], hex::encode(Sha256::digest(b"content")));
    }

    #[test]
    fn identical_sides_diff_to_three_empty_lists() {
        let s = summary(&[("a", "h1"), ("b", "h2")]);
        assert!(s.diff(&s.clone()).is_empty());
    }

    #[test]
    fn single_changed_file_lands_only_in_diffs() {
        let left = summary(&[("a", "h1"), ("b", "h2")]);
        let right = summary(&[("a", "h1"), ("b", "CHANGED")]);
        let d = left.diff(&right);
        assert!(d.left_only.is_empty() && d.right_only.is_empty());
        assert_eq!(d.diffs, ["b"]);
    }

    #[test]
    fn one_sided_names_split_left_and_right() {
        let left = summary(&[("a", "h"), ("m", "h")]);
        let right = summary(&[("m", "h"), ("z", "h")]);
        let d = left.diff(&right);
        assert_eq!(d.left_only, ["a"]);
        assert!(d.diffs.is_empty());
        assert_eq!(d.right_only, ["z"]);
    }
}
