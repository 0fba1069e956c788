use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// Archive container format. Determines which codec path runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Unknown,
    Tar,
    TarGz,
    Gzip,
    Zip,
    /// Not an archive; bytes pass through untouched.
    Raw,
}

impl Format {
    /// All formats the stabilizer can rewrite.
    pub const SUPPORTED: [Format; 4] = [Format::Tar, Format::TarGz, Format::Gzip, Format::Zip];

    /// Sniffs the container format from leading magic bytes.
    ///
    /// A gzip member is decompressed far enough to look for a tar header so
    /// `.tar.gz`/`.crate` inputs classify as [`Format::TarGz`] rather than
    /// plain gzip. Anything unrecognized is [`Format::Raw`].
    pub fn detect(data: &[u8]) -> Format {
        if data.len() >= 4 && data[..2] == *b"PK" && matches!(data[2..4], [3, 4] | [5, 6] | [7, 8]) {
            return Format::Zip;
        }
        if data.len() >= 2 && data[..2] == [0x1f, 0x8b] {
            let mut head = [0u8; 512];
            let mut decoder = flate2::read::GzDecoder::new(data).take(512);
            let mut filled = 0;
            while filled < head.len() {
                match decoder.read(&mut head[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(_) => break,
                }
            }
            if filled >= 262 && &head[257..262] == b"ustar" {
                return Format::TarGz;
            }
            return Format::Gzip;
        }
        if data.len() >= 262 && &data[257..262] == b"ustar" {
            return Format::Tar;
        }
        Format::Raw
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Format::Unknown => "unknown",
            Format::Tar => "tar",
            Format::TarGz => "tar-gz",
            Format::Gzip => "gzip",
            Format::Zip => "zip",
            Format::Raw => "raw",
        };
        f.write_str(s)
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Format::Unknown),
            "tar" => Ok(Format::Tar),
            "tar-gz" | "targz" | "tgz" => Ok(Format::TarGz),
            "gzip" | "gz" => Ok(Format::Gzip),
            "zip" | "jar" | "whl" => Ok(Format::Zip),
            "raw" => Ok(Format::Raw),
            other => Err(format!("unknown archive format {other:?}")),
        }
    }
}
