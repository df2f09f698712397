//! Single-resource HTTP server answering HEAD and `Range` GET requests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Default)]
pub struct Served {
    pub body: Vec<u8>,
    pub etag: String,
    /// Longest range answered per request; 0 means no limit.
    pub max_chunk: usize,
    /// Serve tagged requests even when `If-Match` does not match.
    pub ignore_if_match: bool,
    pub heads: usize,
    /// `If-Match` value of every GET, in arrival order.
    pub if_match: Vec<Option<String>>,
}

impl Served {
    pub fn new(body: Vec<u8>, etag: &str) -> Self {
        Self {
            body,
            etag: etag.to_string(),
            ..Default::default()
        }
    }

    /// Swap the resource for a new version.
    pub fn replace(&mut self, body: Vec<u8>, etag: &str) {
        self.body = body;
        self.etag = etag.to_string();
    }

    fn respond(&mut self, request: &str) -> Vec<u8> {
        let mut lines = request.split("\r\n");
        let method = lines
            .next()
            .and_then(|line| line.split(' ').next())
            .unwrap_or_default()
            .to_string();
        let headers: HashMap<String, String> = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();

        if method == "HEAD" {
            self.heads += 1;
            return format!(
                "HTTP/1.1 200 OK\r\nAccept-Ranges: bytes\r\nContent-Length: {}\r\nETag: {}\r\nConnection: close\r\n\r\n",
                self.body.len(),
                self.etag
            )
            .into_bytes();
        }

        let if_match = headers.get("if-match").cloned();
        self.if_match.push(if_match.clone());
        if let Some(tag) = &if_match
            && !self.ignore_if_match
            && *tag != self.etag
        {
            return status(412, "Precondition Failed");
        }

        let Some((start, end)) = headers
            .get("range")
            .and_then(|r| r.strip_prefix("bytes="))
            .and_then(|r| r.split_once('-'))
            .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)))
        else {
            return status(400, "Bad Request");
        };
        if start >= self.body.len() {
            return status(416, "Range Not Satisfiable");
        }

        let mut end = end.min(self.body.len() - 1);
        if self.max_chunk > 0 {
            end = end.min(start + self.max_chunk - 1);
        }
        let chunk = &self.body[start..=end];
        let mut out = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {start}-{end}/{}\r\nContent-Length: {}\r\nETag: {}\r\nCache-Control: max-age=60\r\nConnection: close\r\n\r\n",
            self.body.len(),
            chunk.len(),
            self.etag
        )
        .into_bytes();
        out.extend_from_slice(chunk);
        out
    }
}

fn status(code: u16, reason: &str) -> Vec<u8> {
    format!("HTTP/1.1 {code} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").into_bytes()
}

/// Start serving `state` on a local port and return its URL.
pub async fn serve(state: Arc<Mutex<Served>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let state = state.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = state.lock().respond(&String::from_utf8_lossy(&request));
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    format!("http://{addr}/bundle.zip")
}
