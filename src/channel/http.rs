//! Plain HTTP routes on the event channel listener
//!
//! A few short request/response routes (login and friends) share the
//! WebSocket port. The request line is peeked before the upgrade; a path
//! claimed by [`HttpRoutes`] is answered as one HTTP/1.1 exchange and the
//! connection is closed.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request, Response, StatusCode};

use super::error::ChannelError;

pub type HttpRequest = Request<Vec<u8>>;
pub type HttpResponse = Response<Vec<u8>>;

const MAX_HEAD: usize = 8 * 1024;
const MAX_BODY: usize = 16 * 1024;
const MAX_HEADERS: usize = 32;
const SNIFF_LEN: usize = 512;

/// How long a client may take to send its request line or request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes answered as plain HTTP instead of being upgraded
pub trait HttpRoutes: Send + Sync + 'static {
    fn handles(&self, path: &str) -> bool;
    fn respond(&self, request: &HttpRequest) -> HttpResponse;
}

/// JSON response with `status`
pub fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    let body = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Request path of the first line on `stream`, without consuming it
pub async fn sniff_path(stream: &TcpStream) -> Option<String> {
    let deadline = Instant::now() + REQUEST_TIMEOUT;
    let mut buf = [0u8; SNIFF_LEN];

    loop {
        let n = timeout_at(deadline, stream.peek(&mut buf)).await.ok()?.ok()?;
        if n == 0 {
            return None;
        }
        if let Some(end) = buf[..n].windows(2).position(|pair| pair == b"\r\n") {
            let line = std::str::from_utf8(&buf[..end]).ok()?;
            let target = line.split(' ').nth(1)?;
            let path = target.split('?').next().unwrap_or(target);
            return Some(path.to_string());
        }
        if n == SNIFF_LEN || Instant::now() >= deadline {
            return None;
        }
        // Only part of the request line has arrived
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Read one request with a `Content-Length` body
pub async fn read_request<S>(stream: &mut S) -> Result<HttpRequest, ChannelError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let head_len = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ChannelError::BadRequest("connection closed mid-request".into()));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut headers);
        match parsed.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => break len,
            Ok(httparse::Status::Partial) if buf.len() <= MAX_HEAD => continue,
            Ok(httparse::Status::Partial) => {
                return Err(ChannelError::BadRequest("request head too large".into()))
            }
            Err(e) => return Err(ChannelError::BadRequest(e.to_string())),
        }
    };

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    parsed
        .parse(&buf[..head_len])
        .map_err(|e| ChannelError::BadRequest(e.to_string()))?;

    let mut builder = Request::builder()
        .method(parsed.method.unwrap_or("GET"))
        .uri(parsed.path.unwrap_or("/"));
    let mut content_length = 0usize;
    for header in parsed.headers.iter() {
        if header.name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
            content_length = std::str::from_utf8(header.value)
                .ok()
                .and_then(|value| value.trim().parse().ok())
                .ok_or_else(|| ChannelError::BadRequest("invalid Content-Length".into()))?;
        }
        builder = builder.header(header.name, header.value);
    }
    if content_length > MAX_BODY {
        return Err(ChannelError::BadRequest("request body too large".into()));
    }

    let mut body = buf.split_off(head_len);
    body.truncate(content_length);
    if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        stream.read_exact(&mut body[already..]).await?;
    }

    builder
        .body(body)
        .map_err(|e| ChannelError::BadRequest(e.to_string()))
}

/// Write `response` and close the exchange
pub async fn write_response<S>(
    stream: &mut S,
    response: &HttpResponse,
) -> Result<(), ChannelError>
where
    S: AsyncWrite + Unpin,
{
    let mut head = format!("HTTP/1.1 {}\r\n", response.status());
    for (name, value) in response.headers() {
        if *name == CONTENT_LENGTH || *name == CONNECTION {
            continue;
        }
        if let Ok(value) = value.to_str() {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
    }
    head.push_str(&format!(
        "content-length: {}\r\nconnection: close\r\n\r\n",
        response.body().len()
    ));

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(response.body()).await?;
    stream.flush().await?;
    Ok(())
}
