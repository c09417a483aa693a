use std::collections::HashSet;

use deunicode::deunicode;
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::{
    CompanyDef, COMPANY_NAME_PREFIXES, GENERIC_NAME_WORDS, OWNERSHIP_TRANSFERS,
};
use crate::model::{Plant, ReferencePlant};

lazy_static! {
    static ref PUNCTUATION_RE: Regex = Regex::new(r"[^\w\s]").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref SITE_SUFFIX_RE: Regex =
        Regex::new(r"\s+(steel|iron)?\s*(works|plant|mill|steelworks|ironworks)\s*$").unwrap();
}

/// Transliterate to ASCII, lowercase, strip punctuation, collapse whitespace.
pub fn normalize_name(raw: &str) -> String {
    let ascii = deunicode(raw);
    let lowered = ascii.to_lowercase();
    let stripped = PUNCTUATION_RE.replace_all(&lowered, "");
    WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Plant-name normalization for cross-vintage correspondence: in addition to
/// `normalize_name`, drop trailing site suffixes ("steel plant", "works") and
/// a leading company prefix, so "SSAB Raahe steel plant" matches "Raahe".
pub fn normalize_plant_name(raw: &str) -> String {
    let mut s = raw.trim().to_lowercase();
    s = SITE_SUFFIX_RE.replace(&s, "").to_string();
    for prefix in COMPANY_NAME_PREFIXES.iter() {
        if s.starts_with(prefix) {
            s = s[prefix.len()..].trim().to_string();
            break;
        }
    }
    normalize_name(&s)
}

/// Tokens of a normalized plant name that actually identify the site.
pub fn key_location_words(normalized: &str) -> HashSet<String> {
    normalized
        .split_whitespace()
        .filter(|w| !GENERIC_NAME_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Which tier of the name matcher produced a correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Substring,
    KeyWords,
}

/// Outcome of matching one plant name against a candidate list. The tiers
/// short-circuit, so a plant can never be claimed twice through different
/// tiers. Candidates from more than one company at the substring or key-word
/// tier are ambiguous and must be adjudicated by a reviewer, never picked.
#[derive(Debug)]
pub enum NameMatch<'a> {
    Unique(&'a ReferencePlant, MatchTier),
    Ambiguous(Vec<&'a ReferencePlant>),
    None,
}

/// Three-tier fallback matcher, each tier gated on an exact country match:
///   1. exact normalized-name equality
///   2. substring containment either way
///   3. overlap of key location words
/// The first tier yielding candidates decides the outcome.
pub fn match_plant_name<'a>(
    plant_name: &str,
    country: &str,
    candidates: &'a [ReferencePlant],
) -> NameMatch<'a> {
    let norm = normalize_plant_name(plant_name);
    let country_norm = country.trim().to_lowercase();

    let same_country: Vec<&ReferencePlant> = candidates
        .iter()
        .filter(|c| c.country.trim().to_lowercase() == country_norm)
        .collect();
    if same_country.is_empty() {
        return NameMatch::None;
    }

    let exact: Vec<&ReferencePlant> = same_country
        .iter()
        .copied()
        .filter(|c| normalize_plant_name(&c.plant_name) == norm)
        .collect();
    if let Some(&first) = exact.first() {
        // Exact duplicates are the same physical site listed twice.
        return NameMatch::Unique(first, MatchTier::Exact);
    }

    let substring: Vec<&ReferencePlant> = same_country
        .iter()
        .copied()
        .filter(|c| {
            let cand = normalize_plant_name(&c.plant_name);
            !norm.is_empty() && !cand.is_empty() && (cand.contains(&norm) || norm.contains(&cand))
        })
        .collect();
    match distinct_companies(&substring) {
        0 => {}
        1 => return NameMatch::Unique(substring[0], MatchTier::Substring),
        _ => return NameMatch::Ambiguous(substring),
    }

    let words = key_location_words(&norm);
    if words.is_empty() {
        return NameMatch::None;
    }
    let keyword: Vec<&ReferencePlant> = same_country
        .iter()
        .copied()
        .filter(|c| {
            let cand_words = key_location_words(&normalize_plant_name(&c.plant_name));
            !cand_words.is_empty() && words.intersection(&cand_words).next().is_some()
        })
        .collect();
    match distinct_companies(&keyword) {
        0 => NameMatch::None,
        1 => NameMatch::Unique(keyword[0], MatchTier::KeyWords),
        _ => NameMatch::Ambiguous(keyword),
    }
}

fn distinct_companies(candidates: &[&ReferencePlant]) -> usize {
    let mut seen = HashSet::new();
    for c in candidates {
        seen.insert(c.company.as_str());
    }
    seen.len()
}

/// How a plant was attributed to a company.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    ParentPattern,
    PlantNameFallback,
}

impl MatchSource {
    pub fn label(self) -> &'static str {
        match self {
            MatchSource::ParentPattern => "parent_pattern",
            MatchSource::PlantNameFallback => "plant_name_fallback",
        }
    }
}

/// A plant claimed by a company, with how the claim was made.
#[derive(Debug)]
pub struct ClaimedPlant<'a> {
    pub plant: &'a Plant,
    pub match_source: MatchSource,
}

/// Plants attributed to `company` for a given year.
///
/// Primary claim is the company pattern against the raw parent string. When
/// the company acquired another's plants, pre-transfer years exclude the
/// target's plants even though the current vintage's parent field already
/// shows the acquirer. When the parent claim comes up empty and a plant-name
/// fallback pattern exists (prior owners after a transfer), the fallback
/// claims by plant name instead.
pub fn company_plants<'a>(
    plants: &'a [Plant],
    company: &CompanyDef,
    year: Option<i32>,
) -> Vec<ClaimedPlant<'a>> {
    let mut claimed: Vec<ClaimedPlant> = plants
        .iter()
        .filter(|p| company.parent.is_match(&p.parent))
        .map(|p| ClaimedPlant {
            plant: p,
            match_source: MatchSource::ParentPattern,
        })
        .collect();

    if let Some(year) = year {
        for transfer in OWNERSHIP_TRANSFERS.iter() {
            if transfer.acquirer == company.name && year < transfer.effective_year {
                let before = claimed.len();
                claimed.retain(|c| !transfer.target_plant_pattern.is_match(&c.plant.plant_name));
                let excluded = before - claimed.len();
                if excluded > 0 {
                    log::debug!(
                        "excluded {} {} plants from {} for {} (pre-transfer)",
                        excluded,
                        transfer.prior_owner,
                        company.name,
                        year
                    );
                }
            }
        }
    }

    if claimed.is_empty() {
        if let Some(fallback) = &company.plant_name_fallback {
            claimed = plants
                .iter()
                .filter(|p| fallback.is_match(&p.plant_name))
                .map(|p| ClaimedPlant {
                    plant: p,
                    match_source: MatchSource::PlantNameFallback,
                })
                .collect();
            if !claimed.is_empty() {
                log::debug!(
                    "matched {} plants for '{}' via plant-name fallback",
                    claimed.len(),
                    company.name
                );
            }
        }
    }

    claimed
}
