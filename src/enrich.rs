//! Sequential per-event enrichment against the character directory.
//!
//! Events are looked up one at a time with a fixed pause after each lookup
//! cycle so the directory never sees a burst from one invocation. A failed
//! lookup only degrades its own event.

use std::time::Duration;

use tracing::{debug, warn};

use crate::achievements::AchievementClassifier;
use crate::error::Result;
use crate::http::HtmlFetcher;
use crate::lodestone::{IdentityVerifier, Verification};
use crate::types::{EnrichedEvent, PartyJoinEvent};
use crate::util::Clock;

pub(crate) const DEFAULT_PACING_MS: u64 = 250;

pub(crate) struct Enricher<'a, F: HtmlFetcher, C: Clock> {
    verifier: IdentityVerifier<'a, F>,
    classifier: AchievementClassifier<'a, F>,
    clock: &'a C,
    pacing: Duration,
}

impl<'a, F: HtmlFetcher, C: Clock> Enricher<'a, F, C> {
    pub(crate) fn new(fetcher: &'a F, clock: &'a C, base_url: &str, pacing: Duration) -> Result<Self> {
        let verifier = IdentityVerifier::new(fetcher, base_url)?;
        let classifier = AchievementClassifier::new(fetcher, verifier.base().clone());
        Ok(Self {
            verifier,
            classifier,
            clock,
            pacing,
        })
    }

    /// Verifier, then classifier for verified profiles only.
    pub(crate) fn enrich_event(&self, event: PartyJoinEvent) -> EnrichedEvent {
        let Some(expected) = event.expected_identity() else {
            debug!(actor = %event.character_raw, "no full identity, skipping lookup");
            return EnrichedEvent::passthrough(event);
        };

        match self.verifier.verify(&expected) {
            Verification::Verified {
                search_url,
                profile_url,
            } => {
                let clears = self.classifier.classify(&profile_url);
                let mut enriched = EnrichedEvent::passthrough(event);
                enriched.search_url = Some(search_url);
                if let Some(clears) = clears {
                    enriched.high_end_status = Some(clears.status);
                    enriched.ultimate_clears = clears.ultimate;
                    enriched.savage_clears = clears.savage;
                }
                enriched.profile_url = Some(profile_url);
                enriched
            }
            Verification::NoCandidate { search_url } => {
                debug!(actor = %event.actor_label(), "directory search returned no candidate");
                let mut enriched = EnrichedEvent::passthrough(event);
                enriched.search_url = Some(search_url);
                enriched
            }
            Verification::Unverified { found, .. } => {
                debug!(actor = %event.actor_label(), ?found, "top result not confirmed, dropping references");
                EnrichedEvent::passthrough(event)
            }
            Verification::Failed { error, .. } => {
                warn!(actor = %event.actor_label(), %error, "directory lookup failed");
                EnrichedEvent::passthrough(event)
            }
        }
    }

    /// Enriches in order, pausing after every event's lookup cycle.
    pub(crate) fn enrich_all(&self, events: Vec<PartyJoinEvent>) -> Vec<EnrichedEvent> {
        let mut enriched = Vec::with_capacity(events.len());
        for event in events {
            enriched.push(self.enrich_event(event));
            self.clock.sleep(self.pacing);
        }
        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievements::fixtures::{listing_page, LISTING_URL};
    use crate::http::test_support::StubFetcher;
    use crate::http::FetchError;
    use crate::lodestone::build_search_url;
    use crate::lodestone::fixtures::{profile_page, search_page, BASE, EMPTY_SEARCH_PAGE, PROFILE_URL};
    use crate::types::{CharacterIdentity, HighEndStatus};
    use crate::util::test_support::RecordingClock;
    use url::Url;

    fn event(family: &str, given: &str, world: Option<&str>) -> PartyJoinEvent {
        PartyJoinEvent {
            raw_line: format!("||{family} {given}がパーティに参加しました。"),
            character_raw: format!("{family} {given}"),
            family_name: Some(family.to_string()),
            given_name: Some(given.to_string()),
            world_name: world.map(String::from),
        }
    }

    fn search_url_for(name: &str, world: &str) -> String {
        build_search_url(
            &Url::parse(BASE).unwrap(),
            &CharacterIdentity {
                name: name.to_string(),
                world: world.to_string(),
            },
        )
    }

    fn verified_fetcher() -> StubFetcher {
        StubFetcher::default()
            .page(
                &search_url_for("Azu Scala", "Titan"),
                &search_page("/lodestone/character/12345/"),
            )
            .page(PROFILE_URL, &profile_page("Azu Scala", "Titan [Gaia]"))
    }

    #[test]
    fn verified_event_gets_profile_and_clears() {
        let fetcher = verified_fetcher().page(
            LISTING_URL,
            &listing_page(&[
                ("絶竜詩戦争を平定せし者", true),
                ("万魔殿の煉獄を完全制覇せし者：ランク1", true),
            ]),
        );
        let clock = RecordingClock::default();
        let enricher = Enricher::new(&fetcher, &clock, BASE, Duration::from_millis(250)).unwrap();

        let enriched = enricher.enrich_event(event("Azu", "Scala", Some("Titan")));
        assert_eq!(enriched.profile_url.as_deref(), Some(PROFILE_URL));
        assert_eq!(enriched.high_end_status, Some(HighEndStatus::Ok));
        assert_eq!(enriched.ultimate_clears, vec!["絶竜詩"]);
        assert_eq!(enriched.savage_clears, vec!["【パンデモ】煉獄"]);
    }

    #[test]
    fn classification_failure_keeps_references() {
        let fetcher = verified_fetcher().failure(LISTING_URL, FetchError::Transport("timed out".into()));
        let clock = RecordingClock::default();
        let enricher = Enricher::new(&fetcher, &clock, BASE, Duration::ZERO).unwrap();

        let enriched = enricher.enrich_event(event("Azu", "Scala", Some("Titan")));
        assert_eq!(enriched.profile_url.as_deref(), Some(PROFILE_URL));
        assert!(enriched.search_url.is_some());
        assert_eq!(enriched.high_end_status, Some(HighEndStatus::Error));
        assert!(enriched.ultimate_clears.is_empty());
    }

    #[test]
    fn mismatched_profile_attaches_nothing() {
        let fetcher = StubFetcher::default()
            .page(
                &search_url_for("Azu Scala", "Titan"),
                &search_page("/lodestone/character/12345/"),
            )
            .page(PROFILE_URL, &profile_page("Azu Scala", "Gaia [Elemental]"));
        let clock = RecordingClock::default();
        let enricher = Enricher::new(&fetcher, &clock, BASE, Duration::ZERO).unwrap();

        let enriched = enricher.enrich_event(event("Azu", "Scala", Some("Titan")));
        assert_eq!(enriched, EnrichedEvent::passthrough(event("Azu", "Scala", Some("Titan"))));
        assert!(!fetcher.requests.borrow().iter().any(|url| url == LISTING_URL));
    }

    #[test]
    fn no_candidate_keeps_search_reference_only() {
        let search_url = search_url_for("Azu Scala", "Titan");
        let fetcher = StubFetcher::default().page(&search_url, EMPTY_SEARCH_PAGE);
        let clock = RecordingClock::default();
        let enricher = Enricher::new(&fetcher, &clock, BASE, Duration::ZERO).unwrap();

        let enriched = enricher.enrich_event(event("Azu", "Scala", Some("Titan")));
        assert_eq!(enriched.search_url, Some(search_url));
        assert_eq!(enriched.profile_url, None);
        assert_eq!(enriched.high_end_status, None);
    }

    #[test]
    fn events_without_world_make_no_requests() {
        let fetcher = StubFetcher::default();
        let clock = RecordingClock::default();
        let enricher = Enricher::new(&fetcher, &clock, BASE, Duration::ZERO).unwrap();

        let enriched = enricher.enrich_event(event("Azu", "Scala", None));
        assert!(!enriched.has_reference());
        assert_eq!(fetcher.request_count(), 0);
    }

    #[test]
    fn pacing_follows_every_event_and_failures_stay_local() {
        let fetcher = verified_fetcher()
            .page(LISTING_URL, &listing_page(&[("絶バハムートを狩りし者", true)]))
            .failure(
                &search_url_for("Coco Rune", "Gaia"),
                FetchError::Status {
                    status: 503,
                    body: String::new(),
                },
            );
        let clock = RecordingClock::default();
        let enricher = Enricher::new(&fetcher, &clock, BASE, Duration::from_millis(250)).unwrap();

        let enriched = enricher.enrich_all(vec![
            event("Coco", "Rune", Some("Gaia")),
            event("Bare", "Name", None),
            event("Azu", "Scala", Some("Titan")),
        ]);

        assert_eq!(enriched.len(), 3);
        assert!(!enriched[0].has_reference());
        assert!(!enriched[1].has_reference());
        assert_eq!(enriched[2].ultimate_clears, vec!["絶バハ"]);
        assert_eq!(*clock.sleeps.borrow(), vec![Duration::from_millis(250); 3]);
        assert_eq!(
            *fetcher.requests.borrow(),
            vec![
                search_url_for("Coco Rune", "Gaia"),
                search_url_for("Azu Scala", "Titan"),
                PROFILE_URL.to_string(),
                LISTING_URL.to_string(),
            ]
        );
    }
}
