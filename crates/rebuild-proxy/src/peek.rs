//! In-band ClientHello inspection.
//!
//! [`peek_client_hello`] reads just enough of a fresh TLS connection to
//! extract the SNI server name, then hands back a wrapper stream that
//! replays every consumed byte ahead of the raw connection — the peek is
//! invisible to whatever performs the real handshake afterwards.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use crate::error::ProxyError;

const RECORD_HANDSHAKE: u8 = 22;
const RECORD_ALERT: u8 = 21;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const EXTENSION_SERVER_NAME: u16 = 0;

/// A stream that yields buffered bytes before reading from the inner
/// connection. Writes pass straight through.
#[derive(Debug)]
pub struct PeekedStream<S> {
    buf: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> PeekedStream<S> {
    pub fn new(buf: Vec<u8>, inner: S) -> Self {
        PeekedStream { buf, pos: 0, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.pos < self.buf.len() {
            let n = (self.buf.len() - self.pos).min(out.remaining());
            let pos = self.pos;
            out.put_slice(&self.buf[pos..pos + n]);
            self.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, out)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Reads the first TLS record, requires it to be a ClientHello carrying a
/// usable SNI name, and returns that name with a stream replaying the
/// consumed bytes.
pub async fn peek_client_hello<S: AsyncRead + Unpin>(
    mut stream: S,
) -> Result<(String, PeekedStream<S>), ProxyError> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await?;
    if header[0] == RECORD_ALERT {
        return Err(ProxyError::TlsPeek("connection opened with a TLS alert".into()));
    }
    if header[0] != RECORD_HANDSHAKE {
        return Err(ProxyError::TlsPeek(format!(
            "unexpected record type {}",
            header[0]
        )));
    }
    if header[1] >= 0x10 {
        return Err(ProxyError::TlsPeek(format!(
            "implausible record version byte {:#x}",
            header[1]
        )));
    }
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    if len == 0 {
        return Err(ProxyError::TlsPeek("empty handshake record".into()));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;

    let name = parse_sni(&payload)?;
    if name.is_empty() {
        return Err(ProxyError::TlsPeek("client hello carries no server name".into()));
    }
    if name.ends_with('.') {
        return Err(ProxyError::TlsPeek(format!(
            "server name {name:?} has a trailing dot"
        )));
    }

    let mut consumed = header.to_vec();
    consumed.extend_from_slice(&payload);
    Ok((name, PeekedStream::new(consumed, stream)))
}

struct Cursor<'a> {
    payload: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ProxyError> {
        let slice = self
            .payload
            .get(self.at..self.at + n)
            .ok_or_else(|| ProxyError::TlsPeek("truncated client hello".into()))?;
        self.at += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<usize, ProxyError> {
        Ok(self.take(1)?[0] as usize)
    }

    fn take_u16(&mut self) -> Result<usize, ProxyError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]) as usize)
    }
}

/// Walks the ClientHello body to the server_name extension. Returns an
/// empty string when the extension is absent.
fn parse_sni(payload: &[u8]) -> Result<String, ProxyError> {
    let err = |msg: &str| ProxyError::TlsPeek(msg.to_string());
    let mut cur = Cursor { payload, at: 0 };

    if cur.take(1)?[0] != HANDSHAKE_CLIENT_HELLO {
        return Err(err("first handshake message is not a client hello"));
    }
    cur.take(3)?; // handshake length
    cur.take(2)?; // client version
    cur.take(32)?; // random
    let session_len = cur.take_u8()?;
    cur.take(session_len)?;
    let cipher_len = cur.take_u16()?;
    cur.take(cipher_len)?;
    let compression_len = cur.take_u8()?;
    cur.take(compression_len)?;
    if cur.at == payload.len() {
        return Ok(String::new()); // no extensions at all
    }
    let extensions_len = cur.take_u16()?;
    let extensions_end = (cur.at + extensions_len).min(payload.len());
    while cur.at + 4 <= extensions_end {
        let ext_type = cur.take_u16()?;
        let ext_len = cur.take_u16()?;
        if ext_type != EXTENSION_SERVER_NAME as usize {
            cur.take(ext_len)?;
            continue;
        }
        cur.take(2)?; // server name list length
        if cur.take_u8()? != 0 {
            return Err(err("unsupported server name type"));
        }
        let name_len = cur.take_u16()?;
        let name = cur.take(name_len)?;
        return String::from_utf8(name.to_vec())
            .map_err(|_| err("server name is not valid UTF-8"));
    }
    Ok(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    /// A syntactically valid ClientHello record carrying one SNI name.
    fn client_hello(sni: &str) -> Vec<u8> {
        let name = sni.as_bytes();
        let mut ext = Vec::new();
        // server_name extension
        ext.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
        let sni_body_len = 2 + 1 + 2 + name.len();
        ext.extend_from_slice(&(sni_body_len as u16).to_be_bytes());
        ext.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes()); // list length
        ext.push(0); // host_name
        ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
        ext.extend_from_slice(name);

        let mut hello = Vec::new();
        hello.extend_from_slice(&[3, 3]); // client version
        hello.extend_from_slice(&[0u8; 32]); // random
        hello.push(0); // session id
        hello.extend_from_slice(&2u16.to_be_bytes()); // one cipher suite
        hello.extend_from_slice(&[0, 0x2F]);
        hello.push(1); // one compression method
        hello.push(0);
        hello.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        hello.extend_from_slice(&ext);

        let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
        handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&hello);

        let mut record = vec![RECORD_HANDSHAKE, 3, 1];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[tokio::test]
    async fn extracts_the_sni_name() {
        let bytes = client_hello("build.example.com");
        let (name, _) = peek_client_hello(bytes.as_slice()).await.unwrap();
        assert_eq!(name, "build.example.com");
    }

    #[tokio::test]
    async fn peeking_consumes_nothing() {
        let mut bytes = client_hello("host.test");
        bytes.extend_from_slice(b"TRAILING APPLICATION DATA");
        let (_, mut stream) = peek_client_hello(bytes.as_slice()).await.unwrap();
        let mut replay = Vec::new();
        stream.read_to_end(&mut replay).await.unwrap();
        assert_eq!(replay, bytes);
    }

    #[tokio::test]
    async fn rejects_alerts_and_non_handshake_records() {
        let alert = [RECORD_ALERT, 3, 1, 0, 2, 2, 40];
        assert!(matches!(
            peek_client_hello(alert.as_slice()).await,
            Err(ProxyError::TlsPeek(_))
        ));
        let junk = b"GET / HTTP/1.1\r\n\r\n";
        assert!(peek_client_hello(junk.as_slice()).await.is_err());
    }

    #[tokio::test]
    async fn rejects_implausible_version_bytes() {
        let mut bytes = client_hello("h.test");
        bytes[1] = 0x47;
        assert!(peek_client_hello(bytes.as_slice()).await.is_err());
    }

    #[tokio::test]
    async fn rejects_missing_and_dotted_names() {
        // A hello with no extensions block at all.
        let no_ext = {
            let mut hello = Vec::new();
            hello.extend_from_slice(&[3, 3]);
            hello.extend_from_slice(&[0u8; 32]);
            hello.push(0);
            hello.extend_from_slice(&2u16.to_be_bytes());
            hello.extend_from_slice(&[0, 0x2F]);
            hello.push(1);
            hello.push(0);
            let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
            handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
            handshake.extend_from_slice(&hello);
            let mut record = vec![RECORD_HANDSHAKE, 3, 1];
            record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
            record.extend_from_slice(&handshake);
            record
        };
        assert!(peek_client_hello(no_ext.as_slice()).await.is_err());

        let dotted = client_hello("host.example.");
        assert!(peek_client_hello(dotted.as_slice()).await.is_err());
    }
}
