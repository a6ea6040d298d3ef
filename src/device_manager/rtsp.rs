use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::models::ProbeOutcome;

const USER_AGENT: &str = "camera-discovery/0.1";

/// Send one RTSP request and return the status code of the reply.
///
/// Refused or timed-out connections are `NotFound`; a peer that accepts the
/// connection but does not speak RTSP is `NotFound` as well.
pub async fn request_status(
    host: &str,
    port: u16,
    method: &str,
    url: &str,
    limit: Duration,
) -> ProbeOutcome<u16> {
    let mut stream = match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(_)) | Err(_) => return ProbeOutcome::NotFound,
    };

    let mut request = format!(
        "{} {} RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: {}\r\n",
        method, url, USER_AGENT
    );
    if method == "DESCRIBE" {
        request.push_str("Accept: application/sdp\r\n");
    }
    request.push_str("\r\n");

    if let Err(e) = stream.write_all(request.as_bytes()).await {
        return ProbeOutcome::Failed(format!("write {} to {}:{}: {}", method, host, port, e));
    }

    let mut buf = [0u8; 1024];
    match timeout(limit, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => match parse_status(&String::from_utf8_lossy(&buf[..n])) {
            Some(code) => ProbeOutcome::Found(code),
            None => ProbeOutcome::NotFound,
        },
        Ok(Ok(_)) | Err(_) => ProbeOutcome::NotFound,
        Ok(Err(e)) => ProbeOutcome::Failed(format!("read {} reply from {}:{}: {}", method, host, port, e)),
    }
}

/// Status code from an `RTSP/1.0 <code> <reason>` status line
pub fn parse_status(reply: &str) -> Option<u16> {
    let line = reply.lines().next()?;
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("RTSP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn status_line_is_parsed() {
        assert_eq!(parse_status("RTSP/1.0 200 OK\r\nCSeq: 1\r\n"), Some(200));
        assert_eq!(parse_status("RTSP/1.0 401 Unauthorized\r\n"), Some(401));
        assert_eq!(parse_status("HTTP/1.1 200 OK\r\n"), None);
        assert_eq!(parse_status(""), None);
    }

    #[tokio::test]
    async fn reply_from_local_server_is_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"RTSP/1.0 401 Unauthorized\r\nCSeq: 1\r\n\r\n")
                .await
                .unwrap();
        });

        let outcome = request_status(
            "127.0.0.1",
            port,
            "DESCRIBE",
            &format!("rtsp://127.0.0.1:{}/stream1", port),
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(outcome, ProbeOutcome::Found(401));
    }
}
