//! Character directory lookups: search, top result, and identity check.
//!
//! The directory returns the same name across many worlds, and the first
//! search hit is not guaranteed to be on the requested world. A profile is
//! only attached once its own page confirms both name and world.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::error::{JoinWatchError, Result};
use crate::http::{FetchError, HtmlFetcher};
use crate::types::CharacterIdentity;
use crate::util::{decode_html_entities, inner_text};

pub(crate) const DEFAULT_LODESTONE_BASE_URL: &str = "https://jp.finalfantasyxiv.com";

static ANCHOR_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<a\s[^>]*>").expect("anchor regex should compile"));
static CLASS_ATTR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bclass="([^"]*)""#).expect("class regex should compile"));
static HREF_ATTR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bhref="([^"]*)""#).expect("href regex should compile"));
static CHARA_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<p[^>]*class="[^"]*\bframe__chara__name\b[^"]*"[^>]*>(.*?)</p>"#)
        .expect("name regex should compile")
});
static CHARA_WORLD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<p[^>]*class="[^"]*\bframe__chara__world\b[^"]*"[^>]*>(.*?)</p>"#)
        .expect("world regex should compile")
});
static TITLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex should compile"));
static TITLE_NAME_WORLD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*[(（]\s*([^)）]+?)\s*[)）]$").expect("title split regex should compile")
});

/// Result of checking the directory for one expected identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verification {
    /// Top result's profile confirmed the expected name and world.
    Verified { search_url: String, profile_url: String },
    /// The search returned nothing to check.
    NoCandidate { search_url: String },
    /// A profile exists but is someone else, or could not be read.
    Unverified {
        search_url: String,
        found: Option<CharacterIdentity>,
    },
    /// Search or profile fetch failed.
    Failed { search_url: String, error: FetchError },
}

pub(crate) struct IdentityVerifier<'a, F: HtmlFetcher> {
    fetcher: &'a F,
    base: Url,
}

impl<'a, F: HtmlFetcher> IdentityVerifier<'a, F> {
    pub(crate) fn new(fetcher: &'a F, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| JoinWatchError::Config(format!("invalid directory base url {base_url}: {e}")))?;
        Ok(Self { fetcher, base })
    }

    pub(crate) fn base(&self) -> &Url {
        &self.base
    }

    pub(crate) fn search_url(&self, expected: &CharacterIdentity) -> String {
        build_search_url(&self.base, expected)
    }

    pub(crate) fn verify(&self, expected: &CharacterIdentity) -> Verification {
        let search_url = self.search_url(expected);

        let search_html = match self.fetcher.fetch_text(&search_url) {
            Ok(html) => html,
            Err(error) => return Verification::Failed { search_url, error },
        };
        let Some(profile_url) = parse_top_character_url(&search_html, &self.base) else {
            return Verification::NoCandidate { search_url };
        };

        let profile_html = match self.fetcher.fetch_text(&profile_url) {
            Ok(html) => html,
            Err(error) => return Verification::Failed { search_url, error },
        };
        match parse_character_identity(&profile_html) {
            Some(found) if found.matches(expected) => Verification::Verified {
                search_url,
                profile_url,
            },
            found => {
                debug!(
                    expected_name = %expected.name,
                    expected_world = %expected.world,
                    found = ?found,
                    "top result does not match"
                );
                Verification::Unverified { search_url, found }
            }
        }
    }
}

/// Search URL carrying the same parameters the directory's own form submits.
pub(crate) fn build_search_url(base: &Url, expected: &CharacterIdentity) -> String {
    let mut url = base.clone();
    url.set_path("/lodestone/character/");
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("q", &expected.name)
        .append_pair("worldname", &expected.world)
        .append_pair("classjob", "")
        .append_pair("race_tribe", "")
        .append_pair("gcid", "1")
        .append_pair("gcid", "2")
        .append_pair("gcid", "3")
        .append_pair("gcid", "0")
        .append_pair("blog_lang", "ja")
        .append_pair("blog_lang", "en")
        .append_pair("blog_lang", "de")
        .append_pair("blog_lang", "fr")
        .append_pair("order", "");
    url.to_string()
}

/// Absolute URL of the first `a.entry__link` on a search results page.
pub(crate) fn parse_top_character_url(html: &str, base: &Url) -> Option<String> {
    ANCHOR_TAG_REGEX
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|tag| {
            CLASS_ATTR_REGEX
                .captures(tag)
                .and_then(|caps| caps.get(1))
                .is_some_and(|class| class.as_str().split_whitespace().any(|c| c == "entry__link"))
        })
        .find_map(|tag| {
            let href = HREF_ATTR_REGEX.captures(tag)?.get(1)?.as_str();
            let href = decode_html_entities(href);
            if href.trim().is_empty() {
                return None;
            }
            base.join(href.trim()).ok().map(|url| url.to_string())
        })
}

/// `Titan [Gaia]` → `Titan`.
fn world_without_datacenter(text: &str) -> String {
    text.split(['[', '(', '（'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn identity_from_title(html: &str) -> (Option<String>, Option<String>) {
    let Some(title) = TITLE_REGEX
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| inner_text(m.as_str()))
    else {
        return (None, None);
    };
    let head = title.split('|').next().unwrap_or_default().trim();
    if head.is_empty() {
        return (None, None);
    }
    match TITLE_NAME_WORLD_REGEX.captures(head) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str().trim().to_string()),
            caps.get(2).map(|m| world_without_datacenter(m.as_str())),
        ),
        None => (Some(head.to_string()), None),
    }
}

/// Canonical name and world from a profile page. Structured fields win;
/// the page title fills in whatever they lack.
pub(crate) fn parse_character_identity(html: &str) -> Option<CharacterIdentity> {
    let structured = |regex: &Regex| {
        regex
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| inner_text(m.as_str()))
            .filter(|text| !text.is_empty())
    };
    let name = structured(&*CHARA_NAME_REGEX);
    let world = structured(&*CHARA_WORLD_REGEX)
        .map(|text| world_without_datacenter(&text))
        .filter(|text| !text.is_empty());

    let (name, world) = match (name, world) {
        (Some(name), Some(world)) => (name, world),
        (name, world) => {
            let (title_name, title_world) = identity_from_title(html);
            (name.or(title_name)?, world.or(title_world)?)
        }
    };
    if world.is_empty() {
        return None;
    }
    Some(CharacterIdentity { name, world })
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub(crate) const BASE: &str = "https://jp.finalfantasyxiv.com";
    pub(crate) const PROFILE_URL: &str = "https://jp.finalfantasyxiv.com/lodestone/character/12345/";

    pub(crate) fn search_page(href: &str) -> String {
        format!(
            r#"<html><body><div class="ldst__window">
            <div class="entry"><a href="{href}" class="entry__link">
              <div class="entry__box"><p class="entry__name">Azu Scala</p></div>
            </a></div>
            <div class="entry"><a href="/lodestone/character/99999/" class="entry__link">other</a></div>
            </div></body></html>"#
        )
    }

    pub(crate) const EMPTY_SEARCH_PAGE: &str =
        r#"<html><body><p class="parts__zero">該当するキャラクターが見つかりませんでした。</p></body></html>"#;

    pub(crate) fn profile_page(name: &str, world: &str) -> String {
        format!(
            r#"<html><head><title>{name} | FINAL FANTASY XIV, The Lodestone</title></head><body>
            <div class="frame__chara__box">
              <p class="frame__chara__name">{name}</p>
              <p class="frame__chara__world"><i class="xiv-lds xiv-lds-home-world js__tooltip"></i>{world}</p>
            </div></body></html>"#
        )
    }
}
