//! A filesystem view over a container, implemented against Docker's
//! `archive` endpoints: stat via HEAD, reads and writes via tar payloads.

use base64::Engine;
use hyper::{Body, Method, StatusCode};
use serde::Deserialize;

use rebuild_archive::{tar, TarArchive, TarEntry};

use crate::client::DockerClient;
use crate::error::DockerError;

/// Go's `os.ModeSymlink` bit, as Docker reports modes in path stats.
const GO_MODE_SYMLINK: u64 = 1 << 27;

/// Maximum symlink hops [`ContainerFs::open_and_resolve`] will follow.
const MAX_SYMLINK_HOPS: usize = 40;

/// One file read out of (or written into) a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFile {
    /// Absolute in-container path.
    pub path: String,
    /// Tar mode bits.
    pub mode: u32,
    /// Tar type flag.
    pub typeflag: u8,
    pub contents: Vec<u8>,
}

/// Decoded `X-Docker-Container-Path-Stat` header.
#[derive(Debug, Clone, Deserialize)]
pub struct PathStat {
    pub name: String,
    pub size: i64,
    /// Go `os.FileMode` bits.
    pub mode: u64,
    #[serde(default, rename = "linkTarget")]
    pub link_target: String,
}

impl PathStat {
    pub fn is_symlink(&self) -> bool {
        self.mode & GO_MODE_SYMLINK != 0
    }
}

/// Filesystem operations against one container.
pub struct ContainerFs<'a> {
    client: &'a DockerClient,
    container_id: &'a str,
}

impl<'a> ContainerFs<'a> {
    pub fn new(client: &'a DockerClient, container_id: &'a str) -> Self {
        ContainerFs {
            client,
            container_id,
        }
    }

    fn archive_path(&self, path: &str) -> String {
        format!(
            "/containers/{}/archive?path={}",
            self.container_id,
            urlencode(path)
        )
    }

    /// Stats a path. `Ok(None)` means the path does not exist.
    pub async fn stat(&self, path: &str) -> Result<Option<PathStat>, DockerError> {
        let resp = self
            .client
            .request(Method::HEAD, &self.archive_path(path), Body::empty())
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let header = resp
                    .headers()
                    .get("X-Docker-Container-Path-Stat")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        DockerError::Upstream("archive stat response carries no stat header".into())
                    })?;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(header)
                    .map_err(|e| DockerError::Upstream(format!("undecodable stat header: {e}")))?;
                Ok(Some(serde_json::from_slice(&decoded)?))
            }
            status => Err(DockerError::Upstream(format!(
                "stat of {path:?} failed with {status}"
            ))),
        }
    }

    /// Reads the file at `path` without following a final symlink.
    pub async fn read_file(&self, path: &str) -> Result<ContainerFile, DockerError> {
        let resp = self
            .client
            .request(Method::GET, &self.archive_path(path), Body::empty())
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(DockerError::Upstream(format!("{path:?} does not exist"))),
            status if status.is_success() => {
                let bytes = hyper::body::to_bytes(resp.into_body()).await?;
                let archive = TarArchive::parse(&bytes)?;
                let entry = archive
                    .entries
                    .iter()
                    .find(|e| e.typeflag != tar::TYPE_DIR)
                    .ok_or_else(|| {
                        DockerError::Upstream(format!("archive of {path:?} holds no file entry"))
                    })?;
                Ok(ContainerFile {
                    path: path.to_string(),
                    mode: entry.mode,
                    typeflag: entry.typeflag,
                    contents: if entry.typeflag == tar::TYPE_SYMLINK {
                        entry.linkname.clone().into_bytes()
                    } else {
                        entry.body().to_vec()
                    },
                })
            }
            status => Err(DockerError::Upstream(format!(
                "read of {path:?} failed with {status}"
            ))),
        }
    }

    /// Writes a file into the container by uploading a single-entry tar to
    /// its parent directory.
    pub async fn write_file(&self, file: &ContainerFile) -> Result<(), DockerError> {
        let (dir, name) = split_path(&file.path);
        let mut entry = TarEntry::new(name, file.contents.clone());
        entry.typeflag = file.typeflag;
        entry.mode = file.mode;
        let payload = TarArchive {
            entries: vec![entry],
        }
        .write()?;
        let resp = self
            .client
            .request(Method::PUT, &self.archive_path(dir), Body::from(payload))
            .await?;
        if !resp.status().is_success() {
            return Err(DockerError::Upstream(format!(
                "write of {:?} failed with {}",
                file.path,
                resp.status()
            )));
        }
        Ok(())
    }

    /// Opens `path`, following in-container symlinks, and returns the
    /// resolved file: final path, mode, type, contents.
    pub async fn open_and_resolve(&self, path: &str) -> Result<ContainerFile, DockerError> {
        let mut current = path.to_string();
        for _ in 0..MAX_SYMLINK_HOPS {
            let stat = self.stat(&current).await?.ok_or_else(|| {
                DockerError::Upstream(format!("{current:?} does not exist"))
            })?;
            if !stat.is_symlink() {
                return self.read_file(&current).await;
            }
            current = resolve_link(&current, &stat.link_target);
        }
        Err(DockerError::Upstream(format!(
            "too many symlink hops resolving {path:?}"
        )))
    }
}

/// Resolves a symlink target against the directory of the link.
fn resolve_link(link_path: &str, target: &str) -> String {
    if target.starts_with('/') {
        return target.to_string();
    }
    let (dir, _) = split_path(link_path);
    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    for part in target.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => ("/", path),
    }
}

/// Percent-encodes everything outside the RFC 3986 unreserved set, keeping
/// path separators.
fn urlencode(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for &b in path.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symlink_targets_resolve_relative_to_the_link_dir() {
        assert_eq!(
            resolve_link("/etc/ssl/cert.pem", "certs/ca-bundle.crt"),
            "/etc/ssl/certs/ca-bundle.crt"
        );
        assert_eq!(
            resolve_link("/etc/ssl/cert.pem", "../pki/tls/cert.pem"),
            "/etc/pki/tls/cert.pem"
        );
        assert_eq!(resolve_link("/etc/os-release", "/usr/lib/os-release"), "/usr/lib/os-release");
    }

    #[test]
    fn paths_split_into_dir_and_name() {
        assert_eq!(split_path("/var/cache/proxy.crt"), ("/var/cache", "proxy.crt"));
        assert_eq!(split_path("/proxy.crt"), ("/", "proxy.crt"));
    }

    #[test]
    fn urlencoding_keeps_separators() {
        assert_eq!(urlencode("/var/cache/proxy.crt"), "/var/cache/proxy.crt");
        assert_eq!(urlencode("/with space"), "/with%20space");
    }

    #[test]
    fn symlink_bit_is_the_go_mode_bit() {
        let stat = PathStat {
            name: "cert.pem".into(),
            size: 0,
            mode: GO_MODE_SYMLINK | 0o777,
            link_target: "/x".into(),
        };
        assert!(stat.is_symlink());
    }
}
