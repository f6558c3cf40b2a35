// src/sync/fetch.rs

//! Conditional download of the schedule document

use log::{debug, error, warn};
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use std::error::Error;
use std::io;
use thiserror::Error;

use super::types::SyncConfig;
use super::utils::error_chain;

/// Closed set of reasons a download can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FailureCause {
    #[error("untrusted certificate")]
    UntrustedCertificate,
    #[error("connection timeout")]
    ConnectionTimeout,
    #[error("DNS lookup failed")]
    DnsFailure,
    #[error("cleartext traffic not permitted")]
    CleartextNotPermitted,
    #[error("could not connect")]
    CouldNotConnect,
    #[error("wrong credentials")]
    WrongCredentials,
    #[error("not found")]
    NotFound,
    #[error("cannot parse content")]
    CannotParseContent,
}

/// A failed download: the cause plus the fault it was derived from, if any.
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct FetchError {
    pub cause: FailureCause,
    #[source]
    fault: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl FetchError {
    pub fn new(cause: FailureCause) -> Self {
        Self { cause, fault: None }
    }

    pub fn with_fault(cause: FailureCause, fault: impl Error + Send + Sync + 'static) -> Self {
        Self { cause, fault: Some(Box::new(fault)) }
    }

    /// The underlying transport or I/O fault.
    pub fn fault(&self) -> Option<&(dyn Error + 'static)> {
        self.fault.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// The server confirmed the content behind the given ETag is still current.
    Unmodified,
    Fetched { content: String, etag: String },
    Failed(FetchError),
}

/// Downloads the schedule with a single conditional GET.
#[derive(Clone)]
pub struct ScheduleDownloader {
    client: reqwest::Client,
    https_only: bool,
}

impl ScheduleDownloader {
    pub fn new(client: reqwest::Client, config: &SyncConfig) -> Self {
        Self { client, https_only: config.https_only }
    }

    /// Fetches `url`. A non-empty `etag` is sent as `If-None-Match`.
    /// Never retries; every failure is reported as a [`FailureCause`].
    pub async fn download(&self, url: &str, etag: &str) -> FetchOutcome {
        debug!("Fetch: Downloading -> url = '{}', eTag = '{}'", url, etag);

        if self.https_only && url.trim_start().to_ascii_lowercase().starts_with("http:") {
            warn!("Fetch: Refusing cleartext request to '{}'", url);
            return FetchOutcome::Failed(FetchError::new(FailureCause::CleartextNotPermitted));
        }

        let mut request = self.client.get(url);
        if !etag.is_empty() {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let cause = classify_request_error(&e);
                error!("Fetch: Request to '{}' failed ({}): {}", url, cause, e);
                return FetchOutcome::Failed(FetchError::with_fault(cause, e));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("Fetch: Not modified");
            return FetchOutcome::Unmodified;
        }
        if status != StatusCode::OK {
            error!("Fetch: Download error -> statusCode = '{}'", status.as_u16());
            return FetchOutcome::Failed(FetchError::new(cause_for_status(status)));
        }

        let updated_etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        debug!("Fetch: New eTag = '{}'", updated_etag);

        match response.text().await {
            Ok(content) => {
                debug!("Fetch: Download finished successfully ({} bytes)", content.len());
                FetchOutcome::Fetched { content, etag: updated_etag }
            }
            Err(e) => {
                error!("Fetch: Failed to read response body: {}", e);
                FetchOutcome::Failed(FetchError::with_fault(FailureCause::CannotParseContent, e))
            }
        }
    }
}

/// Maps a non-OK, non-304 status code to a cause.
pub fn cause_for_status(status: StatusCode) -> FailureCause {
    match status {
        StatusCode::UNAUTHORIZED => FailureCause::WrongCredentials,
        StatusCode::NOT_FOUND => FailureCause::NotFound,
        _ => FailureCause::CouldNotConnect,
    }
}

fn classify_request_error(error: &reqwest::Error) -> FailureCause {
    if error.is_timeout() {
        return FailureCause::ConnectionTimeout;
    }
    if error.is_builder() && error.to_string().contains("scheme") {
        return FailureCause::CleartextNotPermitted;
    }
    // The outer message embeds the URL, so only the sources are inspected.
    match error.source() {
        Some(source) => classify_transport_fault(source),
        None => FailureCause::CouldNotConnect,
    }
}

/// Classifies a transport fault by walking its source chain.
pub fn classify_transport_fault(fault: &(dyn Error + 'static)) -> FailureCause {
    for e in error_chain(fault) {
        if let Some(io_error) = e.downcast_ref::<io::Error>() {
            if io_error.kind() == io::ErrorKind::TimedOut {
                return FailureCause::ConnectionTimeout;
            }
        }
        let message = e.to_string().to_ascii_lowercase();
        if message.contains("timed out") {
            return FailureCause::ConnectionTimeout;
        }
        if message.contains("dns error")
            || message.contains("failed to lookup address")
            || message.contains("name or service not known")
            || message.contains("no such host")
        {
            return FailureCause::DnsFailure;
        }
        if message.contains("certificate") || message.contains("tls") || message.contains("ssl") {
            return FailureCause::UntrustedCertificate;
        }
    }
    FailureCause::CouldNotConnect
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Wrapped(&'static str, io::Error);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.1)
        }
    }

    #[test]
    fn test_status_codes_map_to_causes() {
        assert_eq!(cause_for_status(StatusCode::UNAUTHORIZED), FailureCause::WrongCredentials);
        assert_eq!(cause_for_status(StatusCode::NOT_FOUND), FailureCause::NotFound);
        assert_eq!(cause_for_status(StatusCode::FORBIDDEN), FailureCause::CouldNotConnect);
        assert_eq!(
            cause_for_status(StatusCode::INTERNAL_SERVER_ERROR),
            FailureCause::CouldNotConnect
        );
        assert_eq!(cause_for_status(StatusCode::NO_CONTENT), FailureCause::CouldNotConnect);
    }

    #[test]
    fn test_classify_io_timeout() {
        let fault = Wrapped("error trying to connect", io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(classify_transport_fault(&fault), FailureCause::ConnectionTimeout);
    }

    #[test]
    fn test_classify_dns_failure() {
        let fault = Wrapped(
            "error trying to connect: dns error: failed to lookup address information",
            io::Error::new(io::ErrorKind::Other, "failed to lookup address information"),
        );
        assert_eq!(classify_transport_fault(&fault), FailureCause::DnsFailure);
    }

    #[test]
    fn test_classify_untrusted_certificate() {
        let fault = Wrapped(
            "error trying to connect",
            io::Error::new(io::ErrorKind::InvalidData, "invalid peer certificate: UnknownIssuer"),
        );
        assert_eq!(classify_transport_fault(&fault), FailureCause::UntrustedCertificate);
    }

    #[test]
    fn test_classify_anything_else_as_could_not_connect() {
        let fault = Wrapped(
            "error trying to connect",
            io::Error::from(io::ErrorKind::ConnectionRefused),
        );
        assert_eq!(classify_transport_fault(&fault), FailureCause::CouldNotConnect);
    }

    #[test]
    fn test_fetch_error_exposes_fault() {
        let error = FetchError::with_fault(
            FailureCause::CannotParseContent,
            io::Error::new(io::ErrorKind::UnexpectedEof, "body cut short"),
        );
        assert_eq!(error.to_string(), "cannot parse content");
        assert_eq!(error.fault().map(|f| f.to_string()).as_deref(), Some("body cut short"));
        assert!(FetchError::new(FailureCause::NotFound).fault().is_none());
    }

    #[tokio::test]
    async fn test_https_only_rejects_cleartext_url() {
        let config = SyncConfig { https_only: true, ..Default::default() };
        let client = crate::sync::http::create_http_client(&config).unwrap();
        let downloader = ScheduleDownloader::new(client, &config);

        match downloader.download("http://example.org/schedule.json", "").await {
            FetchOutcome::Failed(e) => assert_eq!(e.cause, FailureCause::CleartextNotPermitted),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
