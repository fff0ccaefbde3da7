//! Join-event extraction from raw log lines.
//!
//! Lines come from the game's chat log, usually wrapped by the log shipper
//! as `... line="<payload>" ...`. The payload is pipe-delimited and the
//! character segment sits right before the join marker, e.g.
//! `00|2024-01-01T00:00:00|0039||Azu Scalaがパーティに参加しました。|c707e700297d867e`.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::PartyJoinEvent;

pub(crate) const JOIN_MARKER: &str = "がパーティに参加しました";

static ENVELOPE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"line="([^"]+)""#).expect("envelope regex should compile"));

/// Unwraps a `line="..."` envelope; other lines are returned untouched.
pub(crate) fn extract_inner_line(log_line: &str) -> &str {
    ENVELOPE_REGEX
        .captures(log_line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(log_line)
}

/// Text between the last field separator and the join marker.
fn character_segment(line: &str) -> Option<&str> {
    let marker = line.find(JOIN_MARKER)?;
    let prefix = &line[..marker];
    let segment = if let Some(pos) = prefix.rfind("||") {
        &prefix[pos + 2..]
    } else if let Some(pos) = prefix.rfind('|') {
        &prefix[pos + 1..]
    } else {
        prefix
    };
    let segment = segment.trim();
    if segment.is_empty() { None } else { Some(segment) }
}

/// Splits a fused given-name/world token at the first lowercase→uppercase
/// boundary (`CocoTitan` → `Coco` + `Titan`). Best effort: names without
/// such a boundary keep the whole token as the given name.
pub(crate) fn split_given_world(token: &str) -> (String, Option<String>) {
    let mut prev: Option<char> = None;
    for (idx, ch) in token.char_indices() {
        if let Some(p) = prev {
            if p.is_ascii_lowercase() && ch.is_ascii_uppercase() {
                return (token[..idx].to_string(), Some(token[idx..].to_string()));
            }
        }
        prev = Some(ch);
    }
    (token.to_string(), None)
}

pub(crate) fn parse_party_join_event(log_line: &str) -> Option<PartyJoinEvent> {
    let line = extract_inner_line(log_line);
    if !line.contains(JOIN_MARKER) {
        return None;
    }
    let character_raw = character_segment(line)?;
    let tokens: Vec<&str> = character_raw.split_whitespace().collect();

    match tokens.as_slice() {
        [] => None,
        [_] => Some(PartyJoinEvent::bare(line, character_raw)),
        [family, given_world] => {
            let (given, world) = split_given_world(given_world);
            Some(PartyJoinEvent {
                raw_line: line.to_string(),
                character_raw: character_raw.to_string(),
                family_name: Some((*family).to_string()),
                given_name: Some(given),
                world_name: world,
            })
        }
        [family, given, rest @ ..] => Some(PartyJoinEvent {
            raw_line: line.to_string(),
            character_raw: character_raw.to_string(),
            family_name: Some((*family).to_string()),
            given_name: Some((*given).to_string()),
            world_name: Some(rest.concat()),
        }),
    }
}

/// Fills a missing world with the configured home world. Lines from the
/// log owner's own world omit it.
pub(crate) fn complete_world_name(
    mut event: PartyJoinEvent,
    default_world_name: Option<&str>,
) -> PartyJoinEvent {
    let Some(default_world) = default_world_name else {
        return event;
    };
    if event.world_name.is_none() && event.family_name.is_some() && event.given_name.is_some() {
        event.world_name = Some(default_world.to_string());
    }
    event
}
