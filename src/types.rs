use serde::{Deserialize, Serialize};

/// One party-join record extracted from a log line.
///
/// `family_name` and `given_name` are either both set or both unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PartyJoinEvent {
    pub(crate) raw_line: String,
    pub(crate) character_raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) world_name: Option<String>,
}

impl PartyJoinEvent {
    pub(crate) fn bare(raw_line: &str, character_raw: &str) -> Self {
        Self {
            raw_line: raw_line.to_string(),
            character_raw: character_raw.to_string(),
            family_name: None,
            given_name: None,
            world_name: None,
        }
    }

    /// Family, given and world names, only when all three are known.
    pub(crate) fn full_identity(&self) -> Option<(&str, &str, &str)> {
        match (&self.family_name, &self.given_name, &self.world_name) {
            (Some(family), Some(given), Some(world)) => Some((family, given, world)),
            _ => None,
        }
    }

    /// The `{name, world}` the directory profile has to match.
    pub(crate) fn expected_identity(&self) -> Option<CharacterIdentity> {
        let (family, given, world) = self.full_identity()?;
        Some(CharacterIdentity {
            name: format!("{family} {given}").trim().to_string(),
            world: world.trim().to_string(),
        })
    }

    pub(crate) fn actor_label(&self) -> String {
        match self.full_identity() {
            Some((family, given, world)) => format!("{family} {given} @ {world}"),
            None => self.character_raw.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CharacterIdentity {
    pub(crate) name: String,
    pub(crate) world: String,
}

impl CharacterIdentity {
    /// Name must match exactly, world case-insensitively.
    pub(crate) fn matches(&self, expected: &CharacterIdentity) -> bool {
        self.name.trim() == expected.name
            && self.world.trim().to_lowercase() == expected.world.to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum AchievementGroup {
    Ultimate,
    Savage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum HighEndStatus {
    Ok,
    PrivateOrUnavailable,
    Error,
}

impl HighEndStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::PrivateOrUnavailable => "private_or_unavailable",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for HighEndStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event plus whatever the directory lookups managed to attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct EnrichedEvent {
    pub(crate) event: PartyJoinEvent,
    pub(crate) search_url: Option<String>,
    pub(crate) profile_url: Option<String>,
    pub(crate) high_end_status: Option<HighEndStatus>,
    pub(crate) ultimate_clears: Vec<String>,
    pub(crate) savage_clears: Vec<String>,
}

impl EnrichedEvent {
    pub(crate) fn passthrough(event: PartyJoinEvent) -> Self {
        Self {
            event,
            search_url: None,
            profile_url: None,
            high_end_status: None,
            ultimate_clears: Vec::new(),
            savage_clears: Vec::new(),
        }
    }

    pub(crate) fn has_reference(&self) -> bool {
        self.profile_url.is_some() || self.search_url.is_some()
    }
}
