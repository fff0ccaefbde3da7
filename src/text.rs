use crate::types::{AchievementGroup, EnrichedEvent, HighEndStatus};

const ACTOR_LABEL: &str = "参加者";
const REFERENCE_LABEL: &str = "ロードストーン";
const ULTIMATE_LABEL: &str = "絶クリア";
const SAVAGE_LABEL: &str = "零式クリア";

const UNAVAILABLE_MARKER: &str = "非公開/取得不可";
const ERROR_MARKER: &str = "取得エラー";
const NONE_MARKER: &str = "なし";

fn format_clears(enriched: &EnrichedEvent, group: AchievementGroup) -> String {
    if !enriched.has_reference() {
        return String::new();
    }
    match enriched.high_end_status {
        Some(HighEndStatus::PrivateOrUnavailable) => return UNAVAILABLE_MARKER.to_string(),
        Some(HighEndStatus::Error) => return ERROR_MARKER.to_string(),
        _ => {}
    }
    let clears = match group {
        AchievementGroup::Ultimate => &enriched.ultimate_clears,
        AchievementGroup::Savage => &enriched.savage_clears,
    };
    if clears.is_empty() {
        NONE_MARKER.to_string()
    } else {
        clears.join(" / ")
    }
}

/// Four-line block: actor, directory reference, ultimate clears, savage clears.
pub(crate) fn format_join_party_event(enriched: &EnrichedEvent) -> String {
    let reference = enriched
        .profile_url
        .as_deref()
        .or(enriched.search_url.as_deref())
        .unwrap_or_default();
    [
        format!("{ACTOR_LABEL}: {}", enriched.event.actor_label()),
        format!("{REFERENCE_LABEL}: {reference}"),
        format!("{ULTIMATE_LABEL}: {}", format_clears(enriched, AchievementGroup::Ultimate)),
        format!("{SAVAGE_LABEL}: {}", format_clears(enriched, AchievementGroup::Savage)),
    ]
    .join("\n")
}

pub(crate) fn format_join_party_events(enriched: &[EnrichedEvent]) -> String {
    enriched
        .iter()
        .map(format_join_party_event)
        .collect::<Vec<_>>()
        .join("\n\n")
}
