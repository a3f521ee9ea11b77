use crate::{
    persist_capped, read_capped, ReleaseSource, RemoteConfig, RemoteError, MAX_DOCUMENT_BYTES,
};
use std::path::Path;

/// Registry reachable over HTTP(S).
///
/// `GET <url>` must return the registry document. Artifact URLs are fetched
/// as-is; the bearer token is only sent to the registry host itself so that
/// redirects to third-party asset storage do not leak it.
pub struct HttpSource {
    config: RemoteConfig,
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn new(config: RemoteConfig) -> Self {
        let timeout = config.timeout();
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_connect(Some(timeout))
            .timeout_recv_response(Some(timeout))
            .timeout_recv_body(Some(timeout * 4))
            .build()
            .into();
        Self { config, agent }
    }

    fn same_host(&self, url: &str) -> bool {
        let host = |u: &str| url::Url::parse(u).ok().and_then(|p| p.host_str().map(str::to_owned));
        match (host(&self.config.url), host(url)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn do_get(&self, url: &str, accept: &str) -> Result<ureq::Body, RemoteError> {
        let mut req = self
            .agent
            .get(url)
            .header("Accept", accept)
            .header(
                "User-Agent",
                &format!("pfsense-saml2/{}", env!("CARGO_PKG_VERSION")),
            );
        if let Some(ref token) = self.config.auth_token {
            if self.same_host(url) {
                req = req.header("Authorization", &format!("Bearer {token}"));
            }
        }
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RemoteError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(RemoteError::Http(e.to_string()));
            }
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Err(RemoteError::NotFound(url.to_owned()));
        }
        if code >= 400 {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
        }
        Ok(resp.into_body())
    }
}

impl ReleaseSource for HttpSource {
    fn fetch_document(&self) -> Result<Vec<u8>, RemoteError> {
        tracing::debug!("GET {}", self.config.url);
        let body = self.do_get(&self.config.url, "application/json")?;
        read_capped(body.into_reader(), MAX_DOCUMENT_BYTES, "registry document")
    }

    fn download(&self, artifact_url: &str, dest: &Path) -> Result<u64, RemoteError> {
        tracing::debug!("GET {artifact_url} -> {}", dest.display());
        let body = self.do_get(artifact_url, "application/octet-stream")?;
        persist_capped(body.into_reader(), dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        path: String,
        headers: HashMap<String, String>,
    }

    /// Serves a fixed set of routes; anything else is a 404.
    struct MockServer {
        addr: String,
        _handle: std::thread::JoinHandle<()>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockServer {
        fn start(routes: HashMap<String, (u16, Vec<u8>)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let routes = Arc::new(routes);
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));

            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let routes = Arc::clone(&routes);
                    let reqs = Arc::clone(&requests_clone);

                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let path = parts[1].to_owned();

                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            if let Some((k, v)) = line.trim().split_once(": ") {
                                headers.insert(k.to_lowercase(), v.to_owned());
                            }
                        }
                        reqs.lock().unwrap().push(CapturedRequest {
                            path: path.clone(),
                            headers,
                        });

                        let (status, body) = routes
                            .get(&path)
                            .cloned()
                            .unwrap_or((404, Vec::new()));
                        let reason = match status {
                            200 => "OK",
                            404 => "Not Found",
                            _ => "Error",
                        };
                        let head = format!(
                            "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let _ = stream.write_all(head.as_bytes());
                        let _ = stream.write_all(&body);
                        let _ = stream.flush();
                    });
                }
            });

            MockServer {
                addr,
                _handle: handle,
                requests,
            }
        }

        fn captured_requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn routes(entries: &[(&str, u16, &[u8])]) -> HashMap<String, (u16, Vec<u8>)> {
        entries
            .iter()
            .map(|(p, s, b)| ((*p).to_owned(), (*s, b.to_vec())))
            .collect()
    }

    const CATALOG: &[u8] = br#"[{"version":"1.0.0","release_date":"2025-01-01","platform_constraint":"*","artifact_url":"x"}]"#;

    #[test]
    fn http_fetches_and_parses_catalog() {
        let server = MockServer::start(routes(&[("/releases.json", 200, CATALOG)]));
        let source = HttpSource::new(RemoteConfig::new(&format!("{}/releases.json", server.addr)));
        let releases = source.list_releases(false).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].version.as_str(), "1.0.0");
    }

    #[test]
    fn http_missing_document_is_not_found() {
        let server = MockServer::start(routes(&[]));
        let source = HttpSource::new(RemoteConfig::new(&format!("{}/releases.json", server.addr)));
        assert!(matches!(
            source.fetch_document(),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn http_server_error_is_http_error() {
        let server = MockServer::start(routes(&[("/releases.json", 500, &b"oops"[..])]));
        let source = HttpSource::new(RemoteConfig::new(&format!("{}/releases.json", server.addr)));
        assert!(matches!(source.fetch_document(), Err(RemoteError::Http(_))));
    }

    #[test]
    fn http_unreachable_is_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let source = HttpSource::new(RemoteConfig::new(&format!("http://{addr}/releases.json")));
        assert!(matches!(source.fetch_document(), Err(RemoteError::Http(_))));
    }

    #[test]
    fn http_silent_registry_times_out() {
        // Connections complete in the backlog but nothing is ever written.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let source = HttpSource::new(
            RemoteConfig::new(&format!("http://{addr}/releases.json"))
                .with_timeout(std::time::Duration::from_secs(1)),
        );

        let started = std::time::Instant::now();
        assert!(matches!(source.fetch_document(), Err(RemoteError::Http(_))));
        assert!(started.elapsed() < std::time::Duration::from_secs(20));
        drop(listener);
    }

    #[test]
    fn http_download_writes_artifact() {
        let server = MockServer::start(routes(&[("/pkg/1.0.0.pkg", 200, &b"tarball-bytes"[..])]));
        let source = HttpSource::new(RemoteConfig::new(&format!("{}/releases.json", server.addr)));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("1.0.0.pkg");
        let written = source
            .download(&format!("{}/pkg/1.0.0.pkg", server.addr), &dest)
            .unwrap();
        assert_eq!(written, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"tarball-bytes");
    }

    #[test]
    fn http_sends_bearer_token_to_registry_host() {
        let server = MockServer::start(routes(&[("/releases.json", 200, &b"[]"[..])]));
        let source = HttpSource::new(
            RemoteConfig::new(&format!("{}/releases.json", server.addr)).with_token("s3cret"),
        );
        source.fetch_document().unwrap();

        let reqs = server.captured_requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].path, "/releases.json");
        assert_eq!(
            reqs[0].headers.get("authorization").map(String::as_str),
            Some("Bearer s3cret")
        );
        assert!(reqs[0]
            .headers
            .get("user-agent")
            .is_some_and(|ua| ua.starts_with("pfsense-saml2/")));
    }

    #[test]
    fn http_no_auth_header_without_token() {
        let server = MockServer::start(routes(&[("/releases.json", 200, &b"[]"[..])]));
        let source = HttpSource::new(RemoteConfig::new(&format!("{}/releases.json", server.addr)));
        source.fetch_document().unwrap();
        let reqs = server.captured_requests();
        assert!(!reqs[0].headers.contains_key("authorization"));
    }
}
