//! HTTP/1.1 wire codec for the LXD control socket
//!
//! Each request goes out on its own connection with `Connection: close`.
//! Response bodies are framed by `Content-Length`, chunked transfer encoding,
//! or the end of the stream:
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <body>
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

/// A complete HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn protocol_error(message: impl Into<String>) -> Error {
    Error::provider("http", message.into())
}

/// Write a request with an optional body
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    method: &str,
    target: &str,
    headers: &[(&str, String)],
    body: &[u8],
) -> Result<()> {
    let mut head = format!(
        "{method} {target} HTTP/1.1\r\nHost: lxd\r\nUser-Agent: gambol\r\nConnection: close\r\nContent-Length: {}\r\n",
        body.len()
    );
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Err(protocol_error("connection closed mid-response"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read a full response
pub async fn read_response<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<HttpResponse> {
    let status_line = read_line(reader).await?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(protocol_error(format!("Invalid status line: {status_line}")));
    }
    let status: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| protocol_error(format!("Invalid status line: {status_line}")))?;

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let mut response = HttpResponse {
        status,
        headers,
        body: Vec::new(),
    };

    let chunked = response
        .header("Transfer-Encoding")
        .map(|value| value.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    if chunked {
        response.body = read_chunked(reader).await?;
    } else if let Some(length) = response.header("Content-Length") {
        let length: usize = length
            .parse()
            .map_err(|_| protocol_error(format!("Invalid Content-Length: {length}")))?;
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        response.body = body;
    } else {
        reader.read_to_end(&mut response.body).await?;
    }

    Ok(response)
}

async fn read_chunked<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let size_line = read_line(reader).await?;
        let size = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size, 16)
            .map_err(|_| protocol_error(format!("Invalid chunk size: {size_line}")))?;

        if size == 0 {
            // Trailers, terminated by an empty line
            while !read_line(reader).await?.is_empty() {}
            return Ok(body);
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;
        read_line(reader).await?;
    }
}
