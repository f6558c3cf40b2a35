// src/parser.rs

//! Schedule document parsing. The sync pipeline only knows the [`ScheduleParser`]
//! trait; [`JsonScheduleParser`] is the adapter the binary ships with.

use log::{debug, warn};
use serde::Deserialize;

use crate::models::{Meta, ParseResult, Session};

/// Events a parser reports while processing a document, in the order they occur.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    Sessions(Vec<Session>),
    Meta(Meta),
    Done(ParseResult),
}

/// Turns schedule text into [`ParseEvent`]s. Implementations call `on_event`
/// synchronously and must finish with exactly one [`ParseEvent::Done`].
pub trait ScheduleParser: Send + Sync {
    fn parse(&self, text: &str, etag: &str, on_event: &mut dyn FnMut(ParseEvent));
}

#[derive(Deserialize)]
struct ScheduleDocument {
    #[serde(default)]
    meta: Meta,
    #[serde(default)]
    sessions: Vec<Session>,
}

/// Reads a document of the form `{ "meta": {...}, "sessions": [...] }`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonScheduleParser;

impl ScheduleParser for JsonScheduleParser {
    fn parse(&self, text: &str, etag: &str, on_event: &mut dyn FnMut(ParseEvent)) {
        let document: ScheduleDocument = match serde_json::from_str(text) {
            Ok(document) => document,
            Err(e) => {
                warn!("Parser: Invalid schedule document: {}", e);
                on_event(ParseEvent::Done(ParseResult::failure("")));
                return;
            }
        };

        let mut meta = document.meta;
        meta.etag = etag.to_string();
        let version = meta.version.clone();
        debug!(
            "Parser: Parsed version '{}' with {} sessions",
            version,
            document.sessions.len()
        );

        on_event(ParseEvent::Sessions(document.sessions));
        on_event(ParseEvent::Meta(meta));
        on_event(ParseEvent::Done(ParseResult::success(version)));
    }
}
