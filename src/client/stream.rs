// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single HTTP/1.1 exchange over a plain or TLS socket.
//!
//! The response head is read one line at a time, so every header reaches the
//! [`HeaderHook`] while the server is still working on the query. ClickHouse
//! writes `X-ClickHouse-Progress` lines into the head as the query runs and
//! only sends the body once it has finished.

use crate::client::{Credentials, HeaderHook, HttpResponse, HEADER_KEY, HEADER_USER};
use crate::error::{Error, Result};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Plain TCP or TLS connection to the server.
pub(crate) enum Stream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Where and how to open a connection for one base URL.
#[derive(Clone)]
pub(crate) struct Endpoint {
    host: String,
    port: u16,
    /// Value of the `Host` request header.
    authority: String,
    tls: Option<TlsConnector>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Endpoint {
    pub(crate) fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::invalid_options(format!("url '{}' has no host", url)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::invalid_options(format!("url '{}' has no port", url)))?;
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        // IPv6 literals keep their brackets only in the Host header.
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

        let tls = match url.scheme() {
            "http" => None,
            "https" => Some(tls_connector()?),
            other => {
                return Err(Error::invalid_options(format!(
                    "unsupported url scheme '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            host,
            port,
            authority,
            tls,
        })
    }

    pub(crate) fn authority(&self) -> &str {
        &self.authority
    }

    pub(crate) async fn connect(&self, connect_timeout: Duration) -> io::Result<Stream> {
        let tcp = timeout(connect_timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", connect_timeout),
                )
            })??;
        tcp.set_nodelay(true)?;

        let Some(ref connector) = self.tls else {
            return Ok(Stream::Tcp(tcp));
        };
        let domain = rustls::pki_types::ServerName::try_from(self.host.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let tls = connector.connect(domain, tcp).await?;
        Ok(Stream::Tls(Box::new(tls)))
    }
}

fn tls_connector() -> Result<TlsConnector> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::transport(format!("failed to configure TLS: {}", e)))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(tls_config)))
}

/// Check that a value can be sent as a request header.
pub(crate) fn validate_header_value(name: &str, value: &str) -> Result<()> {
    HeaderValue::from_str(value)
        .map(|_| ())
        .map_err(|_| Error::invalid_options(format!("invalid value for header {}", name)))
}

/// Serialize a `POST` request: head followed by the body.
pub(crate) fn encode_request(
    endpoint: &Endpoint,
    url: &Url,
    user_agent: &str,
    credentials: Option<&Credentials>,
    body: &str,
) -> Vec<u8> {
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut head = format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\n\
         Content-Type: text/plain; charset=UTF-8\r\nContent-Length: {}\r\nConnection: close\r\n",
        target,
        endpoint.authority(),
        user_agent,
        body.len()
    );
    if let Some(credentials) = credentials {
        head.push_str(&format!("{}: {}\r\n", HEADER_USER, credentials.user));
        head.push_str(&format!("{}: {}\r\n", HEADER_KEY, credentials.password));
    }
    head.push_str("\r\n");

    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

/// Read one CRLF-terminated line, without the terminator.
///
/// Returns `None` when the connection closed before any byte of the line.
async fn read_line<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| Error::transport(format!("failed to read response: {}", e)))?;
    if n == 0 {
        return Ok(None);
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(Some(line))
}

/// Read the status line, skipping interim `1xx` responses.
pub(crate) async fn read_status<R>(reader: &mut R) -> Result<StatusCode>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| Error::transport("connection closed before response status"))?;
        let line = String::from_utf8_lossy(&line);
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(Error::transport(format!("malformed status line '{}'", line)));
        }
        let status = StatusCode::from_bytes(code.as_bytes())
            .map_err(|_| Error::transport(format!("malformed status line '{}'", line)))?;

        if !status.is_informational() {
            return Ok(status);
        }
        debug!("Skipping interim response {}", status);
        read_headers(reader, None).await?;
    }
}

/// Read header lines up to the blank line, handing each to `hook` as soon as
/// it has been read.
pub(crate) async fn read_headers<R>(
    reader: &mut R,
    hook: Option<&dyn HeaderHook>,
) -> Result<Vec<(String, String)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Vec::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| Error::transport("connection closed inside response headers"))?;
        if line.is_empty() {
            return Ok(headers);
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| Error::transport("malformed response header line"))?;
        let (name, value) = (&line[..colon], &line[colon + 1..]);
        let name = HeaderName::from_bytes(name)
            .map_err(|_| Error::transport("malformed response header name"))?;
        let Ok(value) = std::str::from_utf8(value) else {
            debug!("Skipping non-UTF-8 header {}", name);
            continue;
        };
        let value = value.trim();

        if let Some(hook) = hook {
            hook.on_header(name.as_str(), value);
        }
        headers.push((name.as_str().to_string(), value.to_string()));
    }
}

/// Read the body framed by `Transfer-Encoding: chunked`, `Content-Length`, or
/// connection close, in that order of preference.
pub(crate) async fn read_body<R>(reader: &mut R, response: &HttpResponse) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let chunked = response
        .header("Transfer-Encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));

    let bytes = if chunked {
        read_chunked(reader).await?
    } else if let Some(length) = response.header("Content-Length") {
        let length: usize = length
            .trim()
            .parse()
            .map_err(|_| Error::transport(format!("invalid Content-Length '{}'", length)))?;
        let mut bytes = vec![0; length];
        reader
            .read_exact(&mut bytes)
            .await
            .map_err(|e| Error::transport(format!("failed to read response body: {}", e)))?;
        bytes
    } else {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| Error::transport(format!("failed to read response body: {}", e)))?;
        bytes
    };

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn read_chunked<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| Error::transport("connection closed inside chunked body"))?;
        let line = String::from_utf8_lossy(&line);
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size, 16)
            .map_err(|_| Error::transport(format!("invalid chunk size '{}'", size)))?;

        if size == 0 {
            // Trailer section, ended by a blank line or by close.
            while let Some(trailer) = read_line(reader).await? {
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(|e| Error::transport(format!("failed to read response body: {}", e)))?;
        read_line(reader).await?;
    }
}
