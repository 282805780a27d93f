//! HTTP transport for artifact downloads.
//!
//! Two deadlines apply to every request:
//! - the connect timeout bounds dialing and every individual body read, so a
//!   source that accepts the connection and then stalls is abandoned;
//! - the request timeout bounds the whole transfer.

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::{Certificate, StatusCode};
use tracing::info;

use crate::config::NetworkConfig;
use crate::error::{InstallError, InstallResult};

/// An open response body.
pub struct Download {
    /// Value of `Content-Length`, if the server declared one.
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Payload of `TimedOut` body read errors naming the limit that expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyTimeout {
    pub timeout_secs: u64,
}

impl BodyTimeout {
    /// The timeout carried by `err`, if it is one.
    pub fn from_io(err: &io::Error) -> Option<Self> {
        if err.kind() != io::ErrorKind::TimedOut {
            return None;
        }
        err.get_ref()?.downcast_ref::<Self>().copied()
    }
}

impl std::fmt::Display for BodyTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "body read timed out after {}s", self.timeout_secs)
    }
}

impl std::error::Error for BodyTimeout {}

impl From<BodyTimeout> for io::Error {
    fn from(timeout: BodyTimeout) -> Self {
        io::Error::new(io::ErrorKind::TimedOut, timeout)
    }
}

/// Opens artifact URLs.
pub trait Transport {
    /// Issue a GET; anything but `200 OK` is an error.
    fn get(&self, url: &str) -> InstallResult<Download>;
}

/// Root certificates trusted for HTTPS sources.
///
/// Built once at startup and handed to every client constructor.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    extra_roots: Vec<Certificate>,
}

impl TrustStore {
    /// Only the built-in webpki roots.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Built-in roots plus every certificate in a PEM bundle.
    pub fn from_pem_file(path: &Path) -> InstallResult<Self> {
        let pem = fs::read(path).map_err(|e| InstallError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        let extra_roots = Certificate::from_pem_bundle(&pem).map_err(|e| {
            InstallError::InvalidConfig(format!("CA bundle {}: {}", path.display(), e))
        })?;
        Ok(Self { extra_roots })
    }

    /// Trust store described by the network configuration.
    pub fn from_config(config: &NetworkConfig) -> InstallResult<Self> {
        match &config.ca_bundle {
            Some(path) => Self::from_pem_file(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Number of certificates added on top of the built-in roots.
    pub fn extra_root_count(&self) -> usize {
        self.extra_roots.len()
    }
}

/// `reqwest` backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    connect_timeout: Duration,
    request_timeout: Duration,
    http_log: bool,
}

impl HttpTransport {
    /// Build a transport from the network settings and trust store.
    pub fn new(config: &NetworkConfig, trust: &TrustStore) -> InstallResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            // For the blocking client this bounds each read, not the transfer.
            .timeout(config.connect_timeout)
            .user_agent(concat!("dfa-installer/", env!("CARGO_PKG_VERSION")));
        for cert in &trust.extra_roots {
            builder = builder.add_root_certificate(cert.clone());
        }
        let client = builder
            .build()
            .map_err(|e| InstallError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            http_log: config.http_log,
        })
    }

    fn log_response(&self, url: &str, response: &Response, started: Instant) {
        if !self.http_log {
            return;
        }
        let headers: Vec<String> = response
            .headers()
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or("<binary>")))
            .collect();
        info!(
            url = %url,
            status = %response.status(),
            version = ?response.version(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            headers = %headers.join("; "),
            "HTTP response"
        );
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> InstallResult<Download> {
        let started = Instant::now();
        if self.http_log {
            info!(url = %url, "HTTP GET");
        }

        let response = self.client.get(url).send().map_err(|e| {
            if self.http_log {
                info!(url = %url, error = %e, "HTTP request failed");
            }
            if e.is_timeout() {
                InstallError::Timeout {
                    url: url.to_string(),
                    timeout_secs: self.connect_timeout.as_secs(),
                }
            } else {
                InstallError::Http {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        self.log_response(url, &response, started);

        if response.status() != StatusCode::OK {
            return Err(InstallError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let content_length = response.content_length().filter(|len| *len > 0);
        Ok(Download {
            content_length,
            body: Box::new(DeadlineReader {
                inner: response,
                deadline: started + self.request_timeout,
                request_timeout: self.request_timeout,
                stall_timeout: self.connect_timeout,
            }),
        })
    }
}

/// Fails reads once the overall request deadline has passed, and tags
/// stalled reads with the limit that expired.
struct DeadlineReader<R> {
    inner: R,
    deadline: Instant,
    request_timeout: Duration,
    stall_timeout: Duration,
}

impl<R: Read> Read for DeadlineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if Instant::now() >= self.deadline {
            return Err(BodyTimeout {
                timeout_secs: self.request_timeout.as_secs(),
            }
            .into());
        }
        match self.inner.read(buf) {
            Err(e) if is_stall(&e) => Err(BodyTimeout {
                timeout_secs: self.stall_timeout.as_secs(),
            }
            .into()),
            other => other,
        }
    }
}

/// `reqwest` reports an expired read timeout as an `Other` error wrapping
/// its own timeout error.
fn is_stall(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::TimedOut {
        return true;
    }
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
        .is_some_and(reqwest::Error::is_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_transport_builds_with_builtin_roots() {
        let transport = HttpTransport::new(&NetworkConfig::default(), &TrustStore::builtin());
        assert!(transport.is_ok());
        let transport = transport.unwrap();
        assert_eq!(transport.connect_timeout, Duration::from_secs(120));
        assert_eq!(transport.request_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_missing_ca_bundle_is_an_error() {
        let config = NetworkConfig {
            ca_bundle: Some("/nonexistent/bundle.pem".into()),
            ..NetworkConfig::default()
        };
        assert!(matches!(
            TrustStore::from_config(&config),
            Err(InstallError::ReadFailed { .. })
        ));
    }

    #[test]
    fn test_builtin_trust_store_is_empty() {
        assert_eq!(TrustStore::builtin().extra_root_count(), 0);
    }

    struct Stalled;

    impl Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::TimedOut))
        }
    }

    fn deadline_reader<R>(inner: R, deadline: Instant) -> DeadlineReader<R> {
        DeadlineReader {
            inner,
            deadline,
            request_timeout: Duration::from_secs(600),
            stall_timeout: Duration::from_secs(120),
        }
    }

    #[test]
    fn test_deadline_reader_passes_through_before_deadline() {
        let mut reader = deadline_reader(
            Cursor::new(b"abc".to_vec()),
            Instant::now() + Duration::from_secs(60),
        );
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_deadline_reader_times_out() {
        let mut reader = deadline_reader(Cursor::new(b"abc".to_vec()), Instant::now());
        let mut buf = [0u8; 3];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(
            BodyTimeout::from_io(&err),
            Some(BodyTimeout { timeout_secs: 600 })
        );
    }

    #[test]
    fn test_stalled_read_reports_stall_timeout() {
        let mut reader = deadline_reader(Stalled, Instant::now() + Duration::from_secs(60));
        let mut buf = [0u8; 3];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(
            BodyTimeout::from_io(&err),
            Some(BodyTimeout { timeout_secs: 120 })
        );
    }

    #[test]
    fn test_plain_errors_carry_no_timeout() {
        assert_eq!(BodyTimeout::from_io(&io::Error::from(io::ErrorKind::TimedOut)), None);
        assert_eq!(BodyTimeout::from_io(&io::Error::other("reset")), None);
    }
}
