//! Per-protocol connector that establishes a byte stream to the check-website through a proxy,
//! optionally wrapped in TLS. `reqwest`'s own SOCKS support only covers SOCKS5, so HTTP and
//! SOCKS4/SOCKS4a/SOCKS5 are all relayed by hand here, adapting the teacher's raw
//! `AsyncReadExt`/`AsyncWriteExt` probe (`probe_http`) and TLS wrap (`tls_probe`) in `scanner.rs`.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_native_tls::native_tls;
use tokio_native_tls::TlsStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};

use crate::proxy::{Proxy, ProxyProtocol};

fn encode_basic_auth(user: &str, pass: &str) -> String {
    BASE64_STANDARD.encode(format!("{user}:{pass}"))
}

#[derive(thiserror::Error, Debug)]
pub enum CheckError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out")]
    Timeout,
    #[error("check-website returned HTTP {0}")]
    HttpStatus(u16),
    #[error("failed to decode response body")]
    Decode,
    #[error("file descriptors exhausted")]
    FdExhausted,
}

/// Either a raw TCP tunnel or one wrapped in TLS, read/written uniformly below.
enum Tunnel {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Tunnel {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Tunnel::Plain(s) => s.write_all(buf).await,
            Tunnel::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Tunnel::Plain(s) => s.read(buf).await,
            Tunnel::Tls(s) => s.read(buf).await,
        }
    }
}

/// Opens the protocol-appropriate tunnel from `proxy` to `target_host:target_port`, then layers
/// TLS on top when `use_tls` is set (mirroring `scanner.rs`'s `tls_probe`, but over a tunnel
/// instead of a direct connection). Carries no timeout of its own — the caller bounds the whole
/// connect+request+read sequence with a single deadline (see `request_through_tunnel`).
async fn connect_tunnel(
    proxy: &Proxy,
    target_host: &str,
    target_port: u16,
    use_tls: bool,
) -> Result<Tunnel, CheckError> {
    // An HTTP proxy relays a plain request directly when the target is http, but needs an
    // explicit CONNECT tunnel first when the target is https (it cannot see inside TLS to relay
    // it). SOCKS proxies always tunnel raw bytes, so TLS (if any) is always layered afterward.
    let raw = match proxy.protocol {
        ProxyProtocol::Http if use_tls => connect_http_tunnel(proxy, target_host, target_port).await?,
        ProxyProtocol::Http => TcpStream::connect((proxy.host.as_str(), proxy.port))
            .await
            .map_err(classify_io_error)?,
        ProxyProtocol::Socks4 => connect_socks4(proxy, target_host, target_port).await?,
        ProxyProtocol::Socks5 => connect_socks5(proxy, target_host, target_port).await?,
    };

    if !use_tls {
        return Ok(Tunnel::Plain(raw));
    }

    let builder = native_tls::TlsConnector::builder()
        .build()
        .map_err(|err| CheckError::Transport(err.to_string()))?;
    let connector = tokio_native_tls::TlsConnector::from(builder);
    let tls = connector
        .connect(target_host, raw)
        .await
        .map_err(|err| CheckError::Transport(err.to_string()))?;
    Ok(Tunnel::Tls(Box::new(tls)))
}

async fn connect_http_tunnel(
    proxy: &Proxy,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, CheckError> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
        .await
        .map_err(classify_io_error)?;

    let mut request = format!("CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n");
    if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", encode_basic_auth(user, pass)));
    }
    request.push_str("Proxy-Connection: Keep-Alive\r\n\r\n");

    stream.write_all(request.as_bytes()).await.map_err(classify_io_error)?;

    let status_line = read_connect_response(&mut stream).await?;
    if !status_line.contains(" 200") {
        return Err(CheckError::Transport(format!("CONNECT rejected: {status_line}")));
    }
    Ok(stream)
}

async fn read_connect_response(stream: &mut TcpStream) -> Result<String, CheckError> {
    let mut buf = Vec::with_capacity(512);
    let mut tmp = [0u8; 512];
    loop {
        let n = stream.read(&mut tmp).await.map_err(classify_io_error)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() > 8192 {
            break;
        }
    }
    String::from_utf8(buf).map_err(|_| CheckError::Decode)
}

async fn connect_socks4(proxy: &Proxy, target_host: &str, target_port: u16) -> Result<TcpStream, CheckError> {
    let addr = (proxy.host.as_str(), proxy.port);
    let stream = Socks4Stream::connect(addr, (target_host, target_port))
        .await
        .map_err(|err| CheckError::Transport(err.to_string()))?;
    Ok(stream.into_inner())
}

async fn connect_socks5(proxy: &Proxy, target_host: &str, target_port: u16) -> Result<TcpStream, CheckError> {
    let addr = (proxy.host.as_str(), proxy.port);
    let stream = if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
        Socks5Stream::connect_with_password(addr, (target_host, target_port), user, pass).await
    } else {
        Socks5Stream::connect(addr, (target_host, target_port)).await
    }
    .map_err(|err| CheckError::Transport(err.to_string()))?;
    Ok(stream.into_inner())
}

fn classify_io_error(err: std::io::Error) -> CheckError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::TimedOut => CheckError::Timeout,
        _ if is_fd_exhaustion(&err) => CheckError::FdExhausted,
        _ => CheckError::Transport(err.to_string()),
    }
}

fn is_fd_exhaustion(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc_emfile) if libc_emfile == 24 || libc_emfile == 23)
}

/// Sends a minimal HTTP/1.1 GET for `path` on `host` through a freshly-opened per-proxy tunnel and
/// returns the decoded response status and body. The whole sequence (tunnel connect, optional TLS
/// handshake, write, read) is bounded by a single `total_timeout` applied once here, not re-armed
/// on each sub-step — so a proxy that trickles bytes can never accumulate more than `total_timeout`
/// of recorded latency, matching the "p.timeout <= Settings.timeout" invariant.
pub async fn request_through_tunnel(
    proxy: &Proxy,
    check_host: &str,
    check_port: u16,
    path: &str,
    use_tls: bool,
    total_timeout: Duration,
) -> Result<(u16, String), CheckError> {
    match tokio::time::timeout(
        total_timeout,
        request_through_tunnel_inner(proxy, check_host, check_port, path, use_tls),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(CheckError::Timeout),
    }
}

async fn request_through_tunnel_inner(
    proxy: &Proxy,
    check_host: &str,
    check_port: u16,
    path: &str,
    use_tls: bool,
) -> Result<(u16, String), CheckError> {
    let mut tunnel = connect_tunnel(proxy, check_host, check_port, use_tls).await?;

    // A plain (non-tunneled) HTTP proxy relays the request itself and expects the absolute-form
    // request line (the full URL, not just the path); everything else talks to the target direct.
    let request_target = if !use_tls && proxy.protocol == ProxyProtocol::Http {
        let scheme = if use_tls { "https" } else { "http" };
        format!("{scheme}://{check_host}:{check_port}{path}")
    } else {
        path.to_string()
    };
    let mut request = format!(
        "GET {request_target} HTTP/1.1\r\nHost: {check_host}\r\nUser-Agent: Mozilla/5.0\r\nConnection: close\r\n"
    );
    if !use_tls && proxy.protocol == ProxyProtocol::Http {
        if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
            request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", encode_basic_auth(user, pass)));
        }
    }
    request.push_str("\r\n");
    tunnel.write_all(request.as_bytes()).await.map_err(classify_io_error)?;

    let mut buf = Vec::with_capacity(4096);
    let mut tmp = [0u8; 4096];
    loop {
        let n = tunnel.read(&mut tmp).await.map_err(classify_io_error)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.len() > 1024 * 1024 {
            break;
        }
    }

    let text = String::from_utf8(buf).map_err(|_| CheckError::Decode)?;
    let Some(header_end) = text.find("\r\n\r\n") else {
        return Err(CheckError::Decode);
    };
    let status = parse_status_code(&text[..header_end]).ok_or(CheckError::Decode)?;
    let body = text[header_end + 4..].to_string();
    Ok((status, body))
}

fn parse_status_code(headers: &str) -> Option<u16> {
    let status_line = headers.lines().next()?;
    status_line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_code_reads_the_second_token() {
        assert_eq!(parse_status_code("HTTP/1.1 200 OK\r\nServer: nginx"), Some(200));
        assert_eq!(parse_status_code("HTTP/1.1 404 Not Found"), Some(404));
        assert_eq!(parse_status_code("garbage"), None);
    }

    #[test]
    fn encodes_user_colon_pass() {
        assert_eq!(encode_basic_auth("user", "pass"), "dXNlcjpwYXNz");
    }
}
