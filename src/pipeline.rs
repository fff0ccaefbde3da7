//! Lines in, one notification out.
//!
//! `lines → parse → complete world → persistent dedupe → in-batch dedupe
//! → enrichment → text → delivery`. Dedupe store and delivery failures are
//! fatal and abort before anything is sent; lookup failures are not.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{error, info};

use crate::bridges::discord::Notifier;
use crate::bridges::webhook::extract_lines;
use crate::config::AppConfig;
use crate::dedupe::{dedupe_in_batch, idempotency_key, DedupeOutcome, DedupeStats, DedupeStore};
use crate::enrich::Enricher;
use crate::error::Result;
use crate::http::HtmlFetcher;
use crate::parser::{complete_world_name, parse_party_join_event};
use crate::text::format_join_party_events;
use crate::types::{EnrichedEvent, PartyJoinEvent};
use crate::util::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandlerResponse {
    pub(crate) status: u16,
    pub(crate) body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PipelineOutcome {
    NoLines,
    NoEvents,
    Sent { count: usize, text: String },
}

impl PipelineOutcome {
    pub(crate) fn into_response(self) -> HandlerResponse {
        match self {
            PipelineOutcome::NoLines => HandlerResponse {
                status: 204,
                body: json!({"message": "no lines"}),
            },
            PipelineOutcome::NoEvents => HandlerResponse {
                status: 204,
                body: json!({"message": "no events"}),
            },
            PipelineOutcome::Sent { count, .. } => HandlerResponse {
                status: 200,
                body: json!({"sent": count}),
            },
        }
    }
}

/// Parses every line and fills the home world, keeping repeats.
pub(crate) fn parse_join_party_events(
    lines: &[String],
    default_world_name: Option<&str>,
) -> Vec<PartyJoinEvent> {
    lines
        .iter()
        .filter_map(|line| parse_party_join_event(line))
        .map(|event| complete_world_name(event, default_world_name))
        .collect()
}

/// Parses every line, fills the home world and collapses repeats in the batch.
pub(crate) fn extract_join_party_events(
    lines: &[String],
    default_world_name: Option<&str>,
) -> Vec<PartyJoinEvent> {
    dedupe_in_batch(parse_join_party_events(lines, default_world_name))
}

/// Drops events whose line was already accepted inside the TTL window.
pub(crate) fn accept_new_events(
    store: &dyn DedupeStore,
    ttl_seconds: u64,
    now_seconds: i64,
    events: Vec<PartyJoinEvent>,
) -> Result<(Vec<PartyJoinEvent>, DedupeStats)> {
    let mut stats = DedupeStats::default();
    let mut accepted = Vec::with_capacity(events.len());
    for event in events {
        let key = idempotency_key(&event.raw_line);
        match store.accept_once(&key, ttl_seconds, now_seconds)? {
            DedupeOutcome::Accepted => {
                stats.accepted += 1;
                accepted.push(event);
            }
            DedupeOutcome::Duplicate => stats.duplicate += 1,
        }
    }
    Ok((accepted, stats))
}

pub(crate) struct JoinPartyHandler<'a, F: HtmlFetcher, C: Clock, N: Notifier> {
    pub(crate) config: &'a AppConfig,
    pub(crate) fetcher: &'a F,
    pub(crate) clock: &'a C,
    pub(crate) store: Option<&'a dyn DedupeStore>,
    pub(crate) notifier: &'a N,
}

impl<F: HtmlFetcher, C: Clock, N: Notifier> JoinPartyHandler<'_, F, C, N> {
    /// Events that should be announced by this invocation.
    pub(crate) fn build_targets(&self, lines: &[String]) -> Result<Vec<PartyJoinEvent>> {
        let default_world = self.config.default_world_name.as_deref();
        let Some(store) = self.store else {
            return Ok(extract_join_party_events(lines, default_world));
        };
        // Every line is offered to the store before the batch collapse, so
        // an already-announced line cannot hide a newer join by the same
        // character.
        let events = parse_join_party_events(lines, default_world);
        let ttl_seconds = self
            .config
            .dedupe
            .as_ref()
            .map(|dedupe| dedupe.ttl_seconds)
            .unwrap_or(crate::dedupe::DEFAULT_TTL_SECONDS);
        let (accepted, stats) =
            accept_new_events(store, ttl_seconds, self.clock.now_epoch_seconds(), events)?;
        info!(accepted = stats.accepted, duplicate = stats.duplicate, "dedupe");
        Ok(dedupe_in_batch(accepted))
    }

    pub(crate) fn enrich(&self, events: Vec<PartyJoinEvent>) -> Result<Vec<EnrichedEvent>> {
        if !self.config.enable_lodestone {
            return Ok(events.into_iter().map(EnrichedEvent::passthrough).collect());
        }
        let enricher = Enricher::new(
            self.fetcher,
            self.clock,
            &self.config.lodestone_base_url,
            Duration::from_millis(self.config.pacing_ms),
        )?;
        Ok(enricher.enrich_all(events))
    }

    pub(crate) fn process_lines(&self, lines: &[String]) -> Result<PipelineOutcome> {
        if lines.is_empty() {
            return Ok(PipelineOutcome::NoLines);
        }
        let targets = self.build_targets(lines)?;
        if targets.is_empty() {
            return Ok(PipelineOutcome::NoEvents);
        }
        let count = targets.len();
        let enriched = self.enrich(targets)?;
        let text = format_join_party_events(&enriched);
        self.notifier.deliver(&text)?;
        info!(count, "sent party join notification");
        Ok(PipelineOutcome::Sent { count, text })
    }

    /// Request-style entry point: payload in, status and JSON body out.
    pub(crate) fn handle(&self, payload: &Value) -> HandlerResponse {
        let lines = extract_lines(payload);
        match self.process_lines(&lines) {
            Ok(outcome) => outcome.into_response(),
            Err(err) => {
                error!(error = %err, "invocation failed");
                HandlerResponse {
                    status: 500,
                    body: json!({"error": err.to_string()}),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::dedupe::{DedupeConfig, SqliteDedupeStore};
    use crate::error::JoinWatchError;
    use crate::http::test_support::StubFetcher;
    use crate::util::test_support::RecordingClock;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: RefCell<Vec<String>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn deliver(&self, text: &str) -> Result<()> {
            if self.fail {
                return Err(JoinWatchError::Delivery {
                    status: 500,
                    body: "boom".into(),
                });
            }
            self.sent.borrow_mut().push(text.to_string());
            Ok(())
        }
    }

    struct FailingStore;

    impl DedupeStore for FailingStore {
        fn accept_once(&self, _: &str, _: u64, _: i64) -> Result<DedupeOutcome> {
            Err(JoinWatchError::Store(rusqlite::Error::InvalidQuery))
        }
    }

    fn offline_config() -> AppConfig {
        AppConfig {
            enable_lodestone: false,
            default_world_name: Some("Titan".into()),
            dedupe: Some(DedupeConfig {
                db_path: ":memory:".into(),
                ttl_seconds: 600,
            }),
            ..AppConfig::default()
        }
    }

    fn line(name: &str, id: &str) -> String {
        format!("00|2024-05-01T21:03:11|0039||{name}がパーティに参加しました。|{id}")
    }

    #[test]
    fn extract_completes_world_and_dedupes() {
        let lines = vec![
            line("Azu Scala", "aaaaaaaa00000001"),
            "00|t|0039||Azu Scala joined.|aaaaaaaa00000002".to_string(),
            line("Azu Scala", "aaaaaaaa00000003"),
            line("Coco CocoGaia", "aaaaaaaa00000004"),
        ];
        let events = extract_join_party_events(&lines, Some("Titan"));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].world_name.as_deref(), Some("Titan"));
        assert_eq!(events[1].world_name.as_deref(), Some("Gaia"));
    }

    #[test]
    fn sends_once_per_window() {
        let config = offline_config();
        let fetcher = StubFetcher::default();
        let clock = RecordingClock::at(1_000);
        let store = SqliteDedupeStore::open_in_memory().unwrap();
        let notifier = RecordingNotifier::default();
        let handler = JoinPartyHandler {
            config: &config,
            fetcher: &fetcher,
            clock: &clock,
            store: Some(&store),
            notifier: &notifier,
        };
        let payload = json!({"records": [
            {"line": line("Azu Scala", "c707e700297d867e")},
            {"line": line("Coco Rune", "c707e700297d8680")}
        ]});

        let first = handler.handle(&payload);
        assert_eq!(first, HandlerResponse { status: 200, body: json!({"sent": 2}) });

        clock.advance(30);
        let second = handler.handle(&payload);
        assert_eq!(second, HandlerResponse { status: 204, body: json!({"message": "no events"}) });

        clock.advance(600);
        let third = handler.handle(&json!({"line": line("Azu Scala", "c707e700297d867e")}));
        assert_eq!(third.body, json!({"sent": 1}));

        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("参加者: Azu Scala @ Titan\nロードストーン: \n"));
        assert!(sent[0].contains("\n\n参加者: Coco Rune @ Titan\n"));
        assert_eq!(fetcher.request_count(), 0);
        assert!(clock.sleeps.borrow().is_empty());
    }

    #[test]
    fn stale_line_does_not_hide_rejoin_in_same_batch() {
        let config = offline_config();
        let fetcher = StubFetcher::default();
        let clock = RecordingClock::at(1_000);
        let store = SqliteDedupeStore::open_in_memory().unwrap();
        let notifier = RecordingNotifier::default();
        let handler = JoinPartyHandler {
            config: &config,
            fetcher: &fetcher,
            clock: &clock,
            store: Some(&store),
            notifier: &notifier,
        };
        let first = line("Azu Scala", "aaaaaaaa00000001");
        let rejoin = line("Azu Scala", "aaaaaaaa00000002");

        assert_eq!(handler.handle(&json!({"line": first.clone()})).body, json!({"sent": 1}));

        clock.advance(30);
        let targets = handler.build_targets(&[first.clone(), rejoin.clone()]).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].raw_line, rejoin);

        // The rejoin key is now live as well.
        let again = handler.build_targets(&[first, rejoin]).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn two_new_lines_for_one_character_collapse() {
        let config = offline_config();
        let fetcher = StubFetcher::default();
        let clock = RecordingClock::at(1_000);
        let store = SqliteDedupeStore::open_in_memory().unwrap();
        let notifier = RecordingNotifier::default();
        let handler = JoinPartyHandler {
            config: &config,
            fetcher: &fetcher,
            clock: &clock,
            store: Some(&store),
            notifier: &notifier,
        };
        let lines = vec![
            line("Azu Scala", "aaaaaaaa00000001"),
            line("Azu Scala", "aaaaaaaa00000002"),
        ];
        let targets = handler.build_targets(&lines).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].raw_line, lines[0]);
    }

    #[test]
    fn empty_payload_has_no_lines() {
        let config = offline_config();
        let fetcher = StubFetcher::default();
        let clock = RecordingClock::default();
        let notifier = RecordingNotifier::default();
        let handler = JoinPartyHandler {
            config: &config,
            fetcher: &fetcher,
            clock: &clock,
            store: None,
            notifier: &notifier,
        };
        assert_eq!(handler.handle(&json!({})).body, json!({"message": "no lines"}));
        assert_eq!(
            handler.handle(&json!({"line": "nothing to see"})).body,
            json!({"message": "no events"})
        );
        assert!(notifier.sent.borrow().is_empty());
    }

    #[test]
    fn store_failure_aborts_before_delivery() {
        let config = offline_config();
        let fetcher = StubFetcher::default();
        let clock = RecordingClock::default();
        let notifier = RecordingNotifier::default();
        let handler = JoinPartyHandler {
            config: &config,
            fetcher: &fetcher,
            clock: &clock,
            store: Some(&FailingStore),
            notifier: &notifier,
        };
        let response = handler.handle(&json!({"line": line("Azu Scala", "c707e700297d867e")}));
        assert_eq!(response.status, 500);
        assert!(notifier.sent.borrow().is_empty());
    }

    #[test]
    fn delivery_failure_is_surfaced() {
        let config = offline_config();
        let fetcher = StubFetcher::default();
        let clock = RecordingClock::default();
        let notifier = RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        };
        let handler = JoinPartyHandler {
            config: &config,
            fetcher: &fetcher,
            clock: &clock,
            store: None,
            notifier: &notifier,
        };
        let response = handler.handle(&json!({"line": line("Azu Scala", "c707e700297d867e")}));
        assert_eq!(response.status, 500);
        assert!(response.body["error"].as_str().unwrap().contains("delivery failed"));
    }

    #[test]
    fn enabled_lookup_degrades_per_event() {
        let config = AppConfig {
            enable_lodestone: true,
            ..offline_config()
        };
        // Every directory request 404s.
        let fetcher = StubFetcher::default();
        let clock = RecordingClock::default();
        let notifier = RecordingNotifier::default();
        let handler = JoinPartyHandler {
            config: &config,
            fetcher: &fetcher,
            clock: &clock,
            store: None,
            notifier: &notifier,
        };
        let lines = vec![line("Azu Scala", "c707e700297d867e"), line("Bob", "c707e700297d8681")];
        let outcome = handler.process_lines(&lines).unwrap();
        match outcome {
            PipelineOutcome::Sent { count, text } => {
                assert_eq!(count, 2);
                assert!(text.contains("参加者: Azu Scala @ Titan\nロードストーン: \n絶クリア: \n零式クリア: "));
                assert!(text.ends_with("参加者: Bob\nロードストーン: \n絶クリア: \n零式クリア: "));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(fetcher.request_count(), 1);
        assert_eq!(clock.sleeps.borrow().len(), 2);
    }
}
