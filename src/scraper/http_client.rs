use crate::config::FetcherConfig;
use crate::error::FetchError;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, warn};

/// Long-lived HTTP client for one ingest run.
///
/// Owns the connection pool; dropping the client releases it, so holding it
/// in a scope is enough to guarantee release on every exit path.
pub struct HttpClient {
    inner: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            inner,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// Fetch a URL as text.
    ///
    /// Non-2xx answers and transport errors are retried with a fixed delay
    /// after every failed attempt, up to `max_retries` attempts in total.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let mut delays = FixedInterval::new(self.retry_delay);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(url, attempt, "GET");

            let err = match self.attempt(url).await {
                Ok(body) => {
                    debug!(url, attempt, bytes = body.len(), "fetched");
                    return Ok(body);
                }
                Err(e) => e,
            };

            warn!(url, attempt, max = self.max_retries, "fetch failed: {}", err);

            if let Some(delay) = delays.next() {
                sleep(delay).await;
            }

            if attempt >= self.max_retries {
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport { url: url.to_string(), source })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }

        resp.text()
            .await
            .map_err(|source| FetchError::Body { url: url.to_string(), source })
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        debug!("Releasing HTTP connection pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-response-per-connection HTTP server. `respond` maps the
    /// 1-based request number to a status line and body.
    async fn serve<F>(respond: F) -> (String, Arc<AtomicUsize>)
    where
        F: Fn(usize) -> (&'static str, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let (status, body) = respond(n);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let resp = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(resp.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{addr}/listing"), hits)
    }

    fn test_config(max_retries: u32, retry_delay_ms: u64) -> FetcherConfig {
        FetcherConfig {
            connect_timeout_secs: 2,
            timeout_secs: 5,
            max_retries,
            retry_delay_ms,
            user_agent: "showtime-ingest-test".into(),
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let (url, hits) = serve(|_| ("200 OK", "<html>ok</html>".to_string())).await;
        let client = HttpClient::new(&test_config(3, 10)).unwrap();

        let body = client.get_text(&url).await.unwrap();
        assert_eq!(body, "<html>ok</html>");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_exhausts_retries() {
        let (url, hits) = serve(|_| ("500 Internal Server Error", String::new())).await;
        let client = HttpClient::new(&test_config(3, 40)).unwrap();

        let started = Instant::now();
        let err = client.get_text(&url).await.unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(elapsed >= Duration::from_millis(40 * 3), "elapsed {:?}", elapsed);
        match err {
            FetchError::Exhausted { attempts, source, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, FetchError::Status { status: 500, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let (url, hits) = serve(|n| {
            if n < 2 {
                ("503 Service Unavailable", String::new())
            } else {
                ("200 OK", "recovered".to_string())
            }
        })
        .await;
        let client = HttpClient::new(&test_config(3, 10)).unwrap();

        assert_eq!(client.get_text(&url).await.unwrap(), "recovered");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let client = HttpClient::new(&test_config(2, 5)).unwrap();

        let err = client
            .get_text(&format!("http://127.0.0.1:{port}/"))
            .await
            .unwrap_err();
        match err {
            FetchError::Exhausted { attempts, source, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, FetchError::Transport { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hung_server_hits_total_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                // hold the connection open without answering
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    drop(socket);
                });
            }
        });

        let mut config = test_config(1, 0);
        config.timeout_secs = 1;
        let client = HttpClient::new(&config).unwrap();

        let started = Instant::now();
        let err = client.get_text(&format!("http://{addr}/")).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(900), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "elapsed {:?}", elapsed);
        match err {
            FetchError::Exhausted { attempts, source, .. } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*source, FetchError::Transport { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_zero_retries_still_makes_one_attempt() {
        let client = HttpClient::new(&test_config(0, 0)).unwrap();
        assert_eq!(client.max_retries, 1);
    }
}
