// tests/sync_flow_test.rs

use anyhow::Result;
use confsync::alarms::{AlarmServices, RecordingTimerService, TriggerIdentity};
use confsync::models::{ParseResult, Session};
use confsync::parser::{JsonScheduleParser, ParseEvent, ScheduleParser};
use confsync::store::{MemoryStore, ScheduleStore};
use confsync::sync::auto_update::{AutoUpdater, Notifier};
use confsync::sync::{Broadcaster, HttpStatus, SyncConfig, SyncManager, SyncStatus};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Response, Server};

struct Canned {
    status: u16,
    body: String,
    etag: Option<&'static str>,
    delay: Duration,
}

impl Canned {
    fn ok(body: &str, etag: &'static str) -> Self {
        Canned { status: 200, body: body.to_string(), etag: Some(etag), delay: Duration::ZERO }
    }

    fn status(status: u16) -> Self {
        Canned { status, body: String::new(), etag: None, delay: Duration::ZERO }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

// Serves the canned responses in order and records each If-None-Match header
fn serve(responses: Vec<Canned>) -> (String, Arc<Mutex<Vec<Option<String>>>>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_server = Arc::clone(&seen);

    thread::spawn(move || {
        for canned in responses {
            let Ok(request) = server.recv() else { return };
            let if_none_match = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("If-None-Match"))
                .map(|h| h.value.as_str().to_string());
            seen_by_server.lock().unwrap().push(if_none_match);

            thread::sleep(canned.delay);
            let mut response = Response::from_string(canned.body).with_status_code(canned.status);
            if let Some(etag) = canned.etag {
                response = response.with_header(Header::from_bytes(&b"ETag"[..], etag.as_bytes()).unwrap());
            }
            let _ = request.respond(response);
        }
    });

    (format!("http://127.0.0.1:{}/schedule.json", port), seen)
}

fn document(version: &str, sessions: &[(&str, &str, i64)]) -> String {
    let sessions: Vec<serde_json::Value> = sessions
        .iter()
        .map(|(id, title, date)| {
            serde_json::json!({ "session_id": id, "title": title, "day": 1, "date_utc": date })
        })
        .collect();
    serde_json::json!({ "meta": { "version": version, "num_days": 1 }, "sessions": sessions })
        .to_string()
}

fn manager_for(url: &str, parser: Arc<dyn ScheduleParser>) -> (SyncManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(url));
    let manager = SyncManager::new(&SyncConfig::default(), parser, store.clone())
        .unwrap()
        .with_status_broadcaster(Broadcaster::new(32));
    (manager, store)
}

const FETCH_THEN_PARSE: [SyncStatus; 6] = [
    SyncStatus::InitialFetching,
    SyncStatus::Fetching,
    SyncStatus::FetchSuccess,
    SyncStatus::InitialParsing,
    SyncStatus::Parsing,
    SyncStatus::ParseSuccess,
];

// Accepts anything and reports success without touching the store
struct AcceptingParser;

impl ScheduleParser for AcceptingParser {
    fn parse(&self, _text: &str, etag: &str, on_event: &mut dyn FnMut(ParseEvent)) {
        on_event(ParseEvent::Meta(confsync::models::Meta {
            version: "1".into(),
            etag: etag.into(),
            ..Default::default()
        }));
        on_event(ParseEvent::Done(ParseResult::success("1")));
    }
}

#[tokio::test]
async fn test_successful_attempt_emits_full_sequence() -> Result<()> {
    let (url, _seen) = serve(vec![Canned::ok("<xml/>", "v1")]);
    let (manager, store) = manager_for(&url, Arc::new(AcceptingParser));
    let mut statuses = manager.statuses();

    let final_status = manager.load_schedule(true).join().await?;

    assert_eq!(final_status, Some(SyncStatus::ParseSuccess));
    assert_eq!(statuses.drain(), FETCH_THEN_PARSE.to_vec());
    assert_eq!(store.read_meta().etag, "v1");
    Ok(())
}

#[tokio::test]
async fn test_not_modified_ends_after_fetch_phase() -> Result<()> {
    let body = document("1.0", &[("1", "Opening", 1000)]);
    let (url, seen) = serve(vec![Canned::ok(&body, "\"e1\""), Canned::status(304)]);
    let (manager, store) = manager_for(&url, Arc::new(JsonScheduleParser));

    manager.load_schedule(true).join().await?;
    let mut statuses = manager.statuses();
    let final_status = manager.load_schedule(false).join().await?;

    let expected_failure = SyncStatus::FetchFailure {
        http_status: HttpStatus::HttpNotModified,
        host_name: "127.0.0.1".into(),
        exception_message: String::new(),
        is_user_request: false,
    };
    assert_eq!(final_status, Some(expected_failure.clone()));
    assert_eq!(
        statuses.drain(),
        vec![SyncStatus::InitialFetching, SyncStatus::Fetching, expected_failure]
    );
    assert_eq!(*seen.lock().unwrap(), vec![None, Some("\"e1\"".to_string())]);
    assert_eq!(store.load_sessions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_fetch_failure_carries_user_request_flag() -> Result<()> {
    let (url, _seen) = serve(vec![Canned::status(404)]);
    let (manager, _store) = manager_for(&url, Arc::new(JsonScheduleParser));
    let mut statuses = manager.statuses();

    manager.load_schedule(true).join().await?;

    let all = statuses.drain();
    assert_eq!(all.len(), 3);
    assert!(!all.iter().any(SyncStatus::is_parse_phase));
    match &all[2] {
        SyncStatus::FetchFailure { http_status, is_user_request, .. } => {
            assert_eq!(*http_status, HttpStatus::HttpNotFound);
            assert!(*is_user_request);
        }
        other => panic!("unexpected status {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_parse_failure_is_forwarded_verbatim() -> Result<()> {
    let (url, _seen) = serve(vec![Canned::ok("<xml/>", "v1")]);
    let (manager, store) = manager_for(&url, Arc::new(JsonScheduleParser));
    let mut statuses = manager.statuses();

    let final_status = manager.load_schedule(true).join().await?;

    let failure = SyncStatus::ParseFailure { parse_result: ParseResult::failure("") };
    assert_eq!(final_status, Some(failure.clone()));
    assert_eq!(statuses.drain().last(), Some(&failure));
    assert!(store.load_sessions().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_changes_summary_published_after_parse_success() -> Result<()> {
    let first = document("1.0", &[("1", "Opening", 1000), ("2", "Keynote", 2000)]);
    let second = document("1.1", &[("1", "Opening", 1500), ("3", "Lightning talks", 3000)]);
    let (url, _seen) = serve(vec![Canned::ok(&first, "a"), Canned::ok(&second, "b")]);
    let (manager, store) = manager_for(&url, Arc::new(JsonScheduleParser));
    let mut changes = manager.schedule_changes();

    manager.load_schedule(false).join().await?;
    assert!(changes.try_next().is_none(), "first download has nothing to compare with");

    manager.load_schedule(false).join().await?;
    let parameter = changes.try_next().expect("changes should be published");
    assert_eq!(parameter.schedule_version, "1.1");
    assert_eq!(parameter.change_statistic.changed_sessions_count, 1);
    assert_eq!(parameter.change_statistic.new_sessions_count, 1);
    assert_eq!(parameter.change_statistic.canceled_sessions_count, 1);
    assert_eq!(store.read_meta().etag, "b");

    manager.acknowledge_schedule_changes()?;
    assert!(store.read_schedule_changes_seen());
    Ok(())
}

#[tokio::test]
async fn test_cancel_stops_publishing() -> Result<()> {
    let (url, _seen) = serve(vec![Canned::ok("<xml/>", "v1").delayed(Duration::from_millis(800))]);
    let (manager, store) = manager_for(&url, Arc::new(AcceptingParser));
    let mut statuses = manager.statuses();

    let handle = manager.load_schedule(true);
    assert_eq!(statuses.next().await, Some(SyncStatus::InitialFetching));
    assert_eq!(statuses.next().await, Some(SyncStatus::Fetching));
    manager.cancel_loading();

    assert_eq!(handle.join().await?, None);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(statuses.drain().is_empty());
    assert_eq!(store.read_meta().etag, "");
    Ok(())
}

#[tokio::test]
async fn test_cancel_after_finish_is_noop() -> Result<()> {
    let (url, _seen) = serve(vec![Canned::ok("<xml/>", "v1")]);
    let (manager, _store) = manager_for(&url, Arc::new(AcceptingParser));

    let handle = manager.load_schedule(true);
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.cancel();
    manager.cancel_loading();

    assert_eq!(handle.join().await?, Some(SyncStatus::ParseSuccess));
    Ok(())
}

#[tokio::test]
async fn test_late_subscriber_sees_nothing() -> Result<()> {
    let (url, _seen) = serve(vec![Canned::ok("<xml/>", "v1")]);
    let (manager, _store) = manager_for(&url, Arc::new(AcceptingParser));

    manager.load_schedule(true).join().await?;
    let mut late = manager.statuses();

    assert!(late.drain().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_url_without_host_fails_before_any_status() {
    let (manager, _store) = manager_for("mailto:schedule@example.org", Arc::new(AcceptingParser));
    let mut statuses = manager.statuses();

    assert!(manager.load_schedule(true).join().await.is_err());
    assert!(statuses.drain().is_empty());
}

#[derive(Default)]
struct CountingNotifier {
    updates: Mutex<Vec<(String, usize)>>,
}

impl Notifier for CountingNotifier {
    fn schedule_updated(&self, version: &str, changes_count: usize) {
        self.updates.lock().unwrap().push((version.to_string(), changes_count));
    }

    fn session_reminder(&self, _session_id: &str, _title: &str) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auto_updater_is_single_flight() -> Result<()> {
    let first = document("1.0", &[("1", "Opening", 1000)]);
    let second = document("1.1", &[("1", "Opening moved", 1000)]);
    let (url, seen) = serve(vec![
        Canned::ok(&first, "a"),
        Canned::ok(&second, "b").delayed(Duration::from_millis(500)),
    ]);
    let (manager, _store) = manager_for(&url, Arc::new(JsonScheduleParser));
    let manager = Arc::new(manager);
    let timer = Arc::new(RecordingTimerService::new());
    let notifier = Arc::new(CountingNotifier::default());
    let updater = Arc::new(AutoUpdater::new(
        manager.clone(),
        AlarmServices::new(timer.clone()),
        notifier.clone(),
        chrono::Duration::minutes(30),
    ));

    assert_eq!(updater.update().await?, Some(SyncStatus::ParseSuccess));
    assert!(notifier.updates.lock().unwrap().is_empty());

    let background = {
        let updater = Arc::clone(&updater);
        tokio::spawn(async move { updater.update().await })
    };
    while !updater.is_running() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(updater.update().await?, None, "second request must be ignored");

    assert_eq!(background.await??, Some(SyncStatus::ParseSuccess));
    assert!(!updater.is_running());
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(*notifier.updates.lock().unwrap(), vec![("1.1".to_string(), 1)]);
    assert!(timer.trigger_time(&TriggerIdentity::AutoUpdate).is_some());
    Ok(())
}

#[test]
fn test_session_alarm_from_stored_session() {
    let session = Session {
        session_id: "9".into(),
        title: "Closing".into(),
        day: 4,
        date_utc: 1_703_600_000_000,
        ..Default::default()
    };
    let timer = Arc::new(RecordingTimerService::new());
    let alarms = AlarmServices::new(timer.clone());

    alarms.schedule_session_alarm(&session.to_schedulable_alarm(), true);
    alarms.schedule_session_alarm(&session.to_schedulable_alarm(), true);

    assert_eq!(timer.active_count(), 1);
    alarms.discard_session_alarm(&session.to_schedulable_alarm());
    assert_eq!(timer.active_count(), 0);
}
