use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;

use crate::error::TransportError;

/// User-Agent sent with every tile request; some tile servers reject anonymous clients
const USER_AGENT: &str = concat!("daymap/", env!("CARGO_PKG_VERSION"));

/// Fetches raw bytes from a URL.
///
/// Implementations must be shareable across the tile worker pool.
pub trait Transport: Send + Sync {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

/// Blocking HTTP transport for tile servers
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// Use a preconfigured client, e.g. one with custom proxy settings
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        debug!("Downloading {}", url);

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|e| request_error(url, e))?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let data = response.bytes().map_err(|e| request_error(url, e))?;

        Ok(data.to_vec())
    }
}

fn request_error(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(url.to_string())
    } else {
        TransportError::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Answers one request with a canned HTTP response, returning the server URL
    fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/tile.webp", listener.local_addr().unwrap());
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            stream.write_all(response).unwrap();
        });
        url
    }

    fn local_transport() -> HttpTransport {
        // Keep proxy settings from the environment out of loopback requests
        let client = Client::builder()
            .no_proxy()
            .build()
            .expect("Failed to build client");
        HttpTransport::with_client(client)
    }

    #[test]
    fn test_default_client_builds() {
        assert!(HttpTransport::new().is_ok());
    }

    #[test]
    fn test_successful_response_returns_body() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nRIFF!");
        let body = local_transport().fetch(&url, Duration::from_secs(5)).unwrap();
        assert_eq!(body, b"RIFF!".to_vec());
    }

    #[test]
    fn test_error_status_is_reported() {
        let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let err = local_transport().fetch(&url, Duration::from_secs(5)).unwrap_err();
        assert_eq!(err, TransportError::Status { url, status: 404 });
    }

    #[test]
    fn test_connection_refused_is_a_request_error() {
        // Bind and immediately drop a listener to get a port nobody is serving
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{}/tile.webp", port);

        let transport = local_transport();
        let err = transport.fetch(&url, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, TransportError::Request { .. }), "got {:?}", err);
    }

    #[test]
    fn test_stalled_server_times_out() {
        // Accepts the connection but never answers
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/tile.webp", listener.local_addr().unwrap());

        let transport = local_transport();
        let err = transport.fetch(&url, Duration::from_millis(200)).unwrap_err();
        assert_eq!(err, TransportError::Timeout(url));
        drop(listener);
    }
}
