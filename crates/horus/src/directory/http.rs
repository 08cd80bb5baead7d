//! HTTP + JSON directory client.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{DirectoryFuture, DirectoryListing, DirectoryService, HostRecord, HostUpdate};
use crate::error::{DirectoryError, DirectoryResult};

/// The directory answers `update` and `delete` for a token it no longer
/// holds with a client error.
fn rejects_token(status: StatusCode) -> bool {
    status.is_client_error()
}

/// Directory reached over HTTP.
#[derive(Clone, Debug)]
pub struct HttpDirectory {
    client: Client,
    base: String,
}

impl HttpDirectory {
    /// Client for the directory at `base_uri`, giving up on requests after
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialised.
    pub fn new(base_uri: &str, timeout: Duration) -> DirectoryResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: base_uri.trim_end_matches('/').to_owned(),
        })
    }

    /// Base URI without the trailing slash.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }
}

impl DirectoryService for HttpDirectory {
    fn list(&self, version: &str) -> DirectoryFuture<DirectoryListing> {
        let request = self.client.get(self.url(version));
        Box::pin(async move {
            let body = request.send().await?.error_for_status()?.text().await?;
            let listing: DirectoryListing = serde_json::from_str(&body)?;
            debug!(servers = listing.servers().len(), "directory listing received");
            Ok(listing)
        })
    }

    fn add(&self, record: HostRecord) -> DirectoryFuture<String> {
        let request = self.client.post(self.url("add")).json(&record);
        Box::pin(async move {
            let token = request.send().await?.error_for_status()?.text().await?;
            Ok(token.trim().to_owned())
        })
    }

    fn update(&self, update: HostUpdate) -> DirectoryFuture<()> {
        let request = self.client.post(self.url("update")).json(&update);
        let token = update.token;
        Box::pin(async move {
            let response = request.send().await?;
            if rejects_token(response.status()) {
                return Err(DirectoryError::UnknownToken(token));
            }
            response.error_for_status()?;
            Ok(())
        })
    }

    fn delete(&self, token: String) -> DirectoryFuture<()> {
        let request = self.client.post(self.url("delete")).body(token.clone());
        Box::pin(async move {
            let response = request.send().await?;
            if rejects_token(response.status()) {
                return Err(DirectoryError::UnknownToken(token));
            }
            response.error_for_status()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    use super::*;
    use crate::jobs::WorkerPool;

    /// Serves one request with `status` and hands back the request text.
    fn answer_once(status: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let read = stream.read(&mut chunk).unwrap();
                request.extend_from_slice(&chunk[..read]);
                let text = String::from_utf8_lossy(&request).into_owned();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if read == 0 {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (base, server)
    }

    fn update(token: &str) -> HostUpdate {
        HostUpdate {
            status: HostUpdate::RUNNING,
            token: token.to_owned(),
            info: HostRecord {
                guid: "alpha:31414".into(),
                map: "pi_rah".into(),
                version: "1".into(),
                current_players: 1,
                max_players: 6,
            },
        }
    }

    #[test]
    fn test_urls_join_cleanly() {
        let directory = HttpDirectory::new("http://ohs.padrepio.in/", Duration::from_secs(1)).unwrap();
        assert_eq!(directory.base(), "http://ohs.padrepio.in");
        assert_eq!(directory.url("19062014"), "http://ohs.padrepio.in/19062014");
        assert_eq!(directory.url("add"), "http://ohs.padrepio.in/add");
    }

    #[test]
    fn test_forgotten_token_is_reported() {
        let pool = WorkerPool::new(1).unwrap();
        let (base, server) = answer_once("404 Not Found");
        let directory = HttpDirectory::new(&base, Duration::from_secs(5)).unwrap();

        let result = pool.block_on("update", Duration::from_secs(5), directory.update(update("stale")));
        assert!(matches!(result, Some(Err(DirectoryError::UnknownToken(token))) if token == "stale"));
        assert!(server.join().unwrap().starts_with("POST /update"));
    }

    #[test]
    fn test_accepted_update() {
        let pool = WorkerPool::new(1).unwrap();
        let (base, server) = answer_once("200 OK");
        let directory = HttpDirectory::new(&base, Duration::from_secs(5)).unwrap();

        let result = pool.block_on("update", Duration::from_secs(5), directory.update(update("live")));
        assert!(matches!(result, Some(Ok(()))));
        assert!(server.join().unwrap().contains("\"token\":\"live\""));
    }

    #[test]
    fn test_server_failure_is_not_a_lost_token() {
        let pool = WorkerPool::new(1).unwrap();
        let (base, server) = answer_once("503 Service Unavailable");
        let directory = HttpDirectory::new(&base, Duration::from_secs(5)).unwrap();

        let result = pool.block_on("delete", Duration::from_secs(5), directory.delete("live".into()));
        assert!(matches!(result, Some(Err(DirectoryError::Http(_)))));
        server.join().unwrap();
    }

    #[test]
    fn test_client_errors_reject_the_token() {
        assert!(rejects_token(StatusCode::NOT_FOUND));
        assert!(rejects_token(StatusCode::BAD_REQUEST));
        assert!(!rejects_token(StatusCode::OK));
        assert!(!rejects_token(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
