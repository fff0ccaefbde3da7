//! High-end content clears read from a character's achievement listing.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::http::HtmlFetcher;
use crate::types::{AchievementGroup, HighEndStatus};
use crate::util::inner_text;

/// Achievement category that lists both ultimate and savage titles.
const HIGH_END_CATEGORY_ID: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HighEndAchievement {
    pub(crate) canonical_label: &'static str,
    pub(crate) short_label: &'static str,
    pub(crate) group: AchievementGroup,
}

const fn entry(
    canonical_label: &'static str,
    short_label: &'static str,
    group: AchievementGroup,
) -> HighEndAchievement {
    HighEndAchievement {
        canonical_label,
        short_label,
        group,
    }
}

pub(crate) const HIGH_END_ACHIEVEMENTS: &[HighEndAchievement] = &[
    entry("絶バハムートを狩りし者", "絶バハ", AchievementGroup::Ultimate),
    entry("絶アルテマウェポンを破壊せし者", "絶テマ", AchievementGroup::Ultimate),
    entry("絶アレキサンダーを破壊せし者", "絶アレキ", AchievementGroup::Ultimate),
    entry("絶竜詩戦争を平定せし者", "絶竜詩", AchievementGroup::Ultimate),
    entry("絶オメガ検証戦を完遂せし者", "絶オメガ", AchievementGroup::Ultimate),
    entry("絶もうひとつの未来を見届けし者", "絶エデン", AchievementGroup::Ultimate),
    entry("万魔殿の辺獄を完全制覇せし者：ランク1", "【パンデモ】辺獄", AchievementGroup::Savage),
    entry("万魔殿の煉獄を完全制覇せし者：ランク1", "【パンデモ】煉獄", AchievementGroup::Savage),
    entry("万魔殿の天獄を完全制覇せし者：ランク1", "【パンデモ】天獄", AchievementGroup::Savage),
    entry(
        "アルカディアのライトヘビー級を完全制覇せし者：ランク1",
        "【アルカディア】ライトヘビー",
        AchievementGroup::Savage,
    ),
    entry(
        "アルカディアのクルーザー級を完全制覇せし者：ランク1",
        "【アルカディア】クルーザー",
        AchievementGroup::Savage,
    ),
    entry(
        "アルカディアのヘビー級を完全制覇せし者：ランク1",
        "【アルカディア】ヘビー",
        AchievementGroup::Savage,
    ),
];

/// Canonical label → registry entry, built once.
static REGISTRY: LazyLock<HashMap<&'static str, HighEndAchievement>> = LazyLock::new(|| {
    HIGH_END_ACHIEVEMENTS
        .iter()
        .map(|achievement| (achievement.canonical_label, *achievement))
        .collect()
});

static CHARACTER_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/lodestone/character/(\d+)/").expect("character id regex should compile")
});
static ENTRY_START_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<li[^>]*class="[^"]*\bentry\b[^"]*"[^>]*>"#).expect("entry regex should compile")
});
static ENTRY_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<p[^>]*class="[^"]*\bentry__activity__txt\b[^"]*"[^>]*>(.*?)</p>"#)
        .expect("label regex should compile")
});
static ENTRY_DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<time[^>]*class="[^"]*\bentry__activity__time\b"#).expect("date regex should compile")
});

pub(crate) fn lookup_achievement(canonical_label: &str) -> Option<&'static HighEndAchievement> {
    REGISTRY.get(canonical_label)
}

pub(crate) fn parse_character_id(profile_url: &str) -> Option<&str> {
    CHARACTER_ID_REGEX
        .captures(profile_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

pub(crate) fn build_achievement_category_url(base: &Url, profile_url: &str) -> Option<String> {
    let character_id = parse_character_id(profile_url)?;
    let mut url = base.clone();
    url.set_path(&format!(
        "/lodestone/character/{character_id}/achievement/category/{HIGH_END_CATEGORY_ID}/"
    ));
    url.set_query(None);
    url.set_fragment(Some("anchor_achievement"));
    Some(url.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AchievementPage {
    /// Whether any registry title appeared at all.
    pub(crate) readable: bool,
    /// Cleared canonical labels in page order.
    pub(crate) clears: Vec<&'static str>,
}

/// Scans `li.entry` blocks. A registry title counts as cleared only when
/// its block carries a `time.entry__activity__time` date.
pub(crate) fn parse_achievement_page(html: &str) -> AchievementPage {
    let starts: Vec<usize> = ENTRY_START_REGEX.find_iter(html).map(|m| m.start()).collect();
    let mut readable = false;
    let mut clears: Vec<&'static str> = Vec::new();

    for (idx, start) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).copied().unwrap_or(html.len());
        let block = &html[*start..end];
        let Some(label) = ENTRY_LABEL_REGEX
            .captures(block)
            .and_then(|caps| caps.get(1))
            .map(|m| inner_text(m.as_str()))
        else {
            continue;
        };
        let Some(achievement) = lookup_achievement(&label) else {
            continue;
        };
        readable = true;
        if ENTRY_DATE_REGEX.is_match(block) && !clears.contains(&achievement.canonical_label) {
            clears.push(achievement.canonical_label);
        }
    }

    AchievementPage { readable, clears }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HighEndClears {
    pub(crate) status: HighEndStatus,
    pub(crate) ultimate: Vec<String>,
    pub(crate) savage: Vec<String>,
}

impl HighEndClears {
    pub(crate) fn error() -> Self {
        Self {
            status: HighEndStatus::Error,
            ultimate: Vec::new(),
            savage: Vec::new(),
        }
    }

    pub(crate) fn from_page(page: &AchievementPage) -> Self {
        let mut ultimate = Vec::new();
        let mut savage = Vec::new();
        for label in &page.clears {
            let Some(achievement) = lookup_achievement(label) else {
                continue;
            };
            let short = achievement.short_label.to_string();
            match achievement.group {
                AchievementGroup::Ultimate => ultimate.push(short),
                AchievementGroup::Savage => savage.push(short),
            }
        }
        let status = if page.readable {
            HighEndStatus::Ok
        } else {
            HighEndStatus::PrivateOrUnavailable
        };
        Self {
            status,
            ultimate,
            savage,
        }
    }
}

pub(crate) struct AchievementClassifier<'a, F: HtmlFetcher> {
    fetcher: &'a F,
    base: Url,
}

impl<'a, F: HtmlFetcher> AchievementClassifier<'a, F> {
    pub(crate) fn new(fetcher: &'a F, base: Url) -> Self {
        Self { fetcher, base }
    }

    /// `None` when the profile URL has no character id to build a listing from.
    pub(crate) fn classify(&self, profile_url: &str) -> Option<HighEndClears> {
        let listing_url = build_achievement_category_url(&self.base, profile_url)?;
        match self.fetcher.fetch_text(&listing_url) {
            Ok(html) => Some(HighEndClears::from_page(&parse_achievement_page(&html))),
            Err(err) => {
                debug!(url = %listing_url, error = %err, "achievement listing fetch failed");
                Some(HighEndClears::error())
            }
        }
    }
}
