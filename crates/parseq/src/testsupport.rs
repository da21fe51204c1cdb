//! Shared helpers for inline tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Binds an ephemeral port, answers `hits` requests with `status_line`, and
/// returns the callback URL plus a handle yielding the JSON request bodies.
pub async fn http_responder(
    status_line: &'static str,
    hits: usize,
) -> (String, JoinHandle<Vec<serde_json::Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/hook", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut bodies = Vec::new();
        for _ in 0..hits {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\n\r\n", status_line);
            socket.write_all(response.as_bytes()).await.unwrap();

            let body_start = find_blank_line(&request).unwrap() + 4;
            bodies.push(serde_json::from_slice(&request[body_start..]).unwrap());
        }
        bodies
    });

    (url, handle)
}

/// Reads one HTTP request, honoring content-length so a body split across
/// packets is still captured whole.
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_blank_line(&buf) {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
            let expected = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + expected {
                break;
            }
        }
    }
    buf
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
