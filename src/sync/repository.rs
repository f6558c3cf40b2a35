// src/sync/repository.rs

//! Network side of the schedule: fetching into a [`FetchScheduleResult`] and
//! handing the text to the parser

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::fmt;
use std::sync::Arc;
use url::Url;

use super::fetch::{FailureCause, FetchError, FetchOutcome, ScheduleDownloader};
use super::utils::deepest_message;
use crate::parser::{ParseEvent, ScheduleParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpStatus {
    HttpOk,
    HttpNotModified,
    HttpLoginFailUntrustedCertificate,
    HttpConnectTimeout,
    HttpDnsFailure,
    HttpCleartextNotPermitted,
    HttpCouldNotConnect,
    HttpWrongHttpCredentials,
    HttpNotFound,
    HttpCannotParseContent,
}

impl HttpStatus {
    pub fn is_successful(self) -> bool {
        self == HttpStatus::HttpOk
    }

    pub fn is_not_modified(self) -> bool {
        self == HttpStatus::HttpNotModified
    }
}

impl From<FailureCause> for HttpStatus {
    fn from(cause: FailureCause) -> Self {
        match cause {
            FailureCause::UntrustedCertificate => HttpStatus::HttpLoginFailUntrustedCertificate,
            FailureCause::ConnectionTimeout => HttpStatus::HttpConnectTimeout,
            FailureCause::DnsFailure => HttpStatus::HttpDnsFailure,
            FailureCause::CleartextNotPermitted => HttpStatus::HttpCleartextNotPermitted,
            FailureCause::CouldNotConnect => HttpStatus::HttpCouldNotConnect,
            FailureCause::WrongCredentials => HttpStatus::HttpWrongHttpCredentials,
            FailureCause::NotFound => HttpStatus::HttpNotFound,
            FailureCause::CannotParseContent => HttpStatus::HttpCannotParseContent,
        }
    }
}

impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpStatus::HttpOk => "HTTP_OK",
            HttpStatus::HttpNotModified => "HTTP_NOT_MODIFIED",
            HttpStatus::HttpLoginFailUntrustedCertificate => "HTTP_LOGIN_FAIL_UNTRUSTED_CERTIFICATE",
            HttpStatus::HttpConnectTimeout => "HTTP_CONNECT_TIMEOUT",
            HttpStatus::HttpDnsFailure => "HTTP_DNS_FAILURE",
            HttpStatus::HttpCleartextNotPermitted => "HTTP_CLEARTEXT_NOT_PERMITTED",
            HttpStatus::HttpCouldNotConnect => "HTTP_COULD_NOT_CONNECT",
            HttpStatus::HttpWrongHttpCredentials => "HTTP_WRONG_HTTP_CREDENTIALS",
            HttpStatus::HttpNotFound => "HTTP_NOT_FOUND",
            HttpStatus::HttpCannotParseContent => "HTTP_CANNOT_PARSE_CONTENT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchScheduleResult {
    pub http_status: HttpStatus,
    pub schedule_xml: String,
    pub etag: String,
    pub host_name: String,
    pub exception_message: String,
}

/// Combines the downloader and the parser.
#[derive(Clone)]
pub struct NetworkRepository {
    downloader: ScheduleDownloader,
    parser: Arc<dyn ScheduleParser>,
}

impl NetworkRepository {
    pub fn new(downloader: ScheduleDownloader, parser: Arc<dyn ScheduleParser>) -> Self {
        Self { downloader, parser }
    }

    /// Downloads the schedule. Fails without touching the network if `url` has no host.
    pub async fn fetch_schedule(&self, url: &str, etag: &str) -> Result<FetchScheduleResult> {
        let host_name = host_name_of(url)?;
        let outcome = self.downloader.download(url, etag).await;
        Ok(to_fetch_schedule_result(outcome, host_name))
    }

    /// Runs the parser, forwarding its events as they arrive.
    pub fn parse_schedule(
        &self,
        schedule_xml: &str,
        etag: &str,
        mut on_event: impl FnMut(ParseEvent),
    ) {
        debug!("Repository: Parsing {} bytes", schedule_xml.len());
        self.parser.parse(schedule_xml, etag, &mut on_event);
    }
}

pub fn host_name_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid schedule url = '{}'", url))?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Host is missing for url = '{}'", url))
}

pub fn to_fetch_schedule_result(outcome: FetchOutcome, host_name: String) -> FetchScheduleResult {
    match outcome {
        FetchOutcome::Unmodified => FetchScheduleResult {
            http_status: HttpStatus::HttpNotModified,
            schedule_xml: String::new(),
            etag: String::new(),
            host_name,
            exception_message: String::new(),
        },
        FetchOutcome::Fetched { content, etag } => FetchScheduleResult {
            http_status: HttpStatus::HttpOk,
            schedule_xml: content,
            etag,
            host_name,
            exception_message: String::new(),
        },
        FetchOutcome::Failed(error) => FetchScheduleResult {
            http_status: HttpStatus::from(error.cause),
            schedule_xml: String::new(),
            etag: String::new(),
            host_name,
            exception_message: exception_message(&error),
        },
    }
}

/// Certificate faults are usually wrapped; report the most specific of up to two nested causes.
fn exception_message(error: &FetchError) -> String {
    match (error.cause, error.fault()) {
        (_, None) => String::new(),
        (FailureCause::UntrustedCertificate, Some(fault)) => deepest_message(fault, 2),
        (_, Some(fault)) => fault.to_string(),
    }
}
