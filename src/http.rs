//! Blocking `ureq` calls bridged onto the tokio runtime.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared outbound HTTP client. Every call runs on the blocking pool.
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }
}

impl HttpClient {
    pub fn with_timeout(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self { agent }
    }

    pub async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        self.get_json_with_query(url, Vec::new()).await
    }

    /// GET with percent-encoded query parameters appended by ureq.
    pub async fn get_json_with_query(
        &self,
        url: &str,
        query: Vec<(&'static str, String)>,
    ) -> Result<Value, FetchError> {
        let agent = self.agent.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || {
            debug!(target: "http", %url, "GET");
            let mut request = agent.get(&url);
            for (name, value) in &query {
                request = request.query(name, value);
            }
            let response = request.call()?;
            decode(response)
        })
        .await?
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: Vec<(&'static str, String)>,
        body: Value,
    ) -> Result<Value, FetchError> {
        let agent = self.agent.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || {
            debug!(target: "http", %url, "POST");
            let mut request = agent.post(&url);
            for (name, value) in &headers {
                request = request.set(name, value);
            }
            let response = request.send_json(body)?;
            decode(response)
        })
        .await?
    }
}

fn decode(response: ureq::Response) -> Result<Value, FetchError> {
    let status = response.status();
    if !(200..300).contains(&status) {
        let body = response.into_string().unwrap_or_default();
        return Err(FetchError::Status {
            status,
            body: crate::error::shorten(&body),
        });
    }
    response
        .into_json::<Value>()
        .map_err(|err| FetchError::Decode(err.to_string()))
}

#[cfg(test)]
pub(crate) mod testing {
    //! One-shot HTTP responder used to stand in for upstream services.

    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    pub struct CannedServer {
        pub url: String,
        handle: JoinHandle<String>,
    }

    impl CannedServer {
        /// Serves a single response and hands back the raw request it received.
        pub fn respond(status: u16, body: &str) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral port");
            let address = listener.local_addr().expect("local addr available");
            let body = body.to_string();
            let handle = thread::spawn(move || {
                let mut request = String::new();
                if let Ok((mut stream, _)) = listener.accept() {
                    request = read_request(&mut stream);
                    let response = format!(
                        "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        reason(status),
                        body.len()
                    );
                    stream
                        .write_all(response.as_bytes())
                        .expect("response written");
                }
                request
            });
            Self {
                url: format!("http://{address}"),
                handle,
            }
        }

        pub fn join(self) -> String {
            self.handle.join().expect("http server thread joined")
        }
    }

    fn read_request(stream: &mut std::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buffer = [0_u8; 1024];
        loop {
            let read = match stream.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(read) => read,
            };
            data.extend_from_slice(&buffer[..read]);
            let text = String::from_utf8_lossy(&data);
            if let Some(split) = text.find("\r\n\r\n") {
                let content_length = text[..split]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= split + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    fn reason(status: u16) -> &'static str {
        match status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Status",
        }
    }

    /// An address nothing listens on.
    pub fn unreachable_url() -> String {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral port");
        let address = listener.local_addr().expect("local addr available");
        drop(listener);
        format!("http://{address}")
    }
}
