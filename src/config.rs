use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

use crate::model::EstimateSource;

// ── File layout ──────────────────────────────────────────────────────────────
// Inputs live under --data-dir, outputs under --out-dir. Names are fixed so
// downstream consumers (R scripts, the website loader) can rely on them.

pub const PLANTS_FILE: &str = "plants.csv";
pub const COMPANY_PRODUCTION_FILE: &str = "company_production.csv";
pub const PLANT_PRODUCTION_FILE: &str = "plant_production.csv";
pub const REFERENCE_OWNERSHIP_FILE: &str = "reference_ownership.csv";
pub const REPORTED_FILE: &str = "reported.csv";
pub const SATELLITE_FILE: &str = "satellite.csv";
pub const REFERENCE_ALD_EMISSIONS_FILE: &str = "reference_ald_emissions.csv";
pub const COUNTRY_PRODUCTION_FILE: &str = "country_production.csv";

pub const OWNERSHIP_MAPPING_OUT: &str = "ownership_mapping.csv";
pub const OWNERSHIP_MISMATCHES_OUT: &str = "ownership_mismatches.csv";
pub const RESOLVED_PRODUCTION_OUT: &str = "resolved_production.csv";
pub const APA_EMISSIONS_OUT: &str = "apa_emissions.csv";
pub const MULTI_SOURCE_OUT: &str = "multi_source.csv";
pub const MULTI_SOURCE_COMPARISON_OUT: &str = "multi_source_comparison.csv";

#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
}

impl Paths {
    pub fn new(data_dir: &Path, out_dir: &Path) -> Self {
        Paths {
            data_dir: data_dir.to_path_buf(),
            out_dir: out_dir.to_path_buf(),
        }
    }

    pub fn input(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.out_dir.join(name)
    }
}

// ── Analysis window and tolerances ───────────────────────────────────────────

/// Years covered by the ownership mapping and the capacity back-fill.
pub const MAPPING_YEARS: std::ops::RangeInclusive<i32> = 2014..=2024;

/// Base year at which the current vintage is cross-checked against the
/// reference ownership list (the reference list has no per-year variation).
pub const REFERENCE_BASE_YEAR: i32 = 2020;

/// Years eligible for capacity-based production back-fill.
pub const FILL_YEARS: std::ops::Range<i32> = 2014..2020;

/// Equity shares within this tolerance of the reference list are not flagged.
pub const EQUITY_TOLERANCE: f64 = 0.02;

/// Floating-point slack when validating that parsed shares sum to <= 1.
pub const SHARE_EPSILON: f64 = 1e-6;

/// A bottom-up production year is discarded when fewer than this fraction of
/// the company's plants reported, relative to its best-covered year.
pub const COVERAGE_FLOOR: f64 = 0.5;

/// Company-years with utilization above this are skipped: the plant set is
/// incomplete and the aggregate would be materially wrong.
pub const UTILIZATION_MAX: f64 = 1.5;

/// Utilization bounds for samples feeding the back-fill average.
pub const UTILIZATION_SANE_MIN: f64 = 0.1;
pub const UTILIZATION_SANE_MAX: f64 = 1.5;

/// Default vs comparison divergence above this fraction is flagged for review.
pub const DIVERGENCE_REVIEW_THRESHOLD: f64 = 0.30;

/// Single-company values above these are flagged as suspicious.
pub const SUSPICIOUS_PRODUCTION_MT: f64 = 100.0;
pub const SUSPICIOUS_EMISSIONS_MT: f64 = 200.0;

/// Fixed "now" for recency scoring, so re-runs are deterministic.
pub const CERTAINTY_REFERENCE_YEAR: i32 = 2025;

// ── Emission factors ─────────────────────────────────────────────────────────
// BF-BOF values are Scope 1 + upstream intensities per region for the 2020
// reference year; the assigner applies a 0.5%/year compound improvement.
// EAF values are Scope 1 only and static. DRI factors are constants per
// reductant sub-type.

pub const EF_REFERENCE_YEAR: i32 = 2020;
pub const EF_BF_BOF_ANNUAL_IMPROVEMENT: f64 = 0.005;

pub const EF_DRI_COAL: f64 = 3.10;
pub const EF_DRI_GAS: f64 = 1.05;
pub const EF_H2_DRI: f64 = 0.04;

pub const GLOBAL_REGION: &str = "Global";

lazy_static! {
    pub static ref EF_BF_BOF: HashMap<&'static str, f64> = HashMap::from([
        ("Brazil", 2.19),
        ("China", 1.76),
        ("EU", 1.77),
        ("India", 3.72),
        ("Japan", 2.05),
        ("Russia", 2.79),
        ("Serbia", 2.06),
        ("South Africa", 3.57),
        ("South Korea", 2.00),
        ("Taiwan", 2.02),
        ("Turkey", 2.17),
        ("Ukraine", 2.30),
        ("United Kingdom", 2.05),
        ("United States", 1.94),
        ("Australia", 2.31),
        ("New Zealand", 3.10),
        ("Indonesia", 2.31),
        ("Kazakhstan", 2.31),
        ("Canada", 1.84),
        ("Global", 2.314),
    ]);

    pub static ref EF_EAF: HashMap<&'static str, f64> = HashMap::from([
        ("Belarus", 0.07),
        ("Brazil", 0.05),
        ("China", 0.03),
        ("EU", 0.04),
        ("India", 0.07),
        ("Japan", 0.04),
        ("Russia", 0.07),
        ("Serbia", 0.06),
        ("South Africa", 0.12),
        ("South Korea", 0.03),
        ("Switzerland", 0.08),
        ("Taiwan", 0.02),
        ("Thailand", 0.05),
        ("Turkey", 0.04),
        ("Ukraine", 0.04),
        ("United Kingdom", 0.04),
        ("United States", 0.04),
        ("Australia", 0.04),
        ("New Zealand", 0.04),
        ("Indonesia", 0.04),
        ("Kazakhstan", 0.07),
        ("Canada", 0.04),
        ("Global", 0.051),
    ]);

    /// Countries whose DRI fleet is coal-reduced rather than gas-reduced.
    pub static ref DRI_COAL_COUNTRIES: HashSet<&'static str> =
        HashSet::from(["India", "China", "South Africa", "New Zealand"]);

    /// Country -> emission-factor region. EU members collapse onto "EU";
    /// countries with no published intensity map onto a documented proxy.
    /// Anything absent falls back to the Global region.
    pub static ref COUNTRY_TO_REGION: HashMap<&'static str, &'static str> = HashMap::from([
        ("Belarus", "Belarus"),
        ("Brazil", "Brazil"),
        ("China", "China"),
        ("India", "India"),
        ("Japan", "Japan"),
        ("Russia", "Russia"),
        ("Serbia", "Serbia"),
        ("South Africa", "South Africa"),
        ("South Korea", "South Korea"),
        ("Switzerland", "Switzerland"),
        ("Taiwan", "Taiwan"),
        ("Thailand", "Thailand"),
        ("Turkey", "Turkey"),
        ("Turkiye", "Turkey"),
        ("Ukraine", "Ukraine"),
        ("United Kingdom", "United Kingdom"),
        ("United States", "United States"),
        // EU members
        ("Germany", "EU"),
        ("France", "EU"),
        ("Netherlands", "EU"),
        ("Belgium", "EU"),
        ("Austria", "EU"),
        ("Spain", "EU"),
        ("Italy", "EU"),
        ("Sweden", "EU"),
        ("Finland", "EU"),
        ("Poland", "EU"),
        ("Czech Republic", "EU"),
        ("Czechia", "EU"),
        ("Luxembourg", "EU"),
        ("Romania", "EU"),
        ("Slovakia", "EU"),
        ("Hungary", "EU"),
        ("Croatia", "EU"),
        ("Greece", "EU"),
        ("Portugal", "EU"),
        ("Bulgaria", "EU"),
        ("Slovenia", "EU"),
        ("Latvia", "EU"),
        ("Estonia", "EU"),
        ("Lithuania", "EU"),
        ("Ireland", "EU"),
        ("Cyprus", "EU"),
        ("Malta", "EU"),
        // Countries with their own published intensity
        ("Australia", "Australia"),
        ("New Zealand", "New Zealand"),
        ("Indonesia", "Indonesia"),
        ("Kazakhstan", "Kazakhstan"),
        ("Canada", "Canada"),
        // Proxies
        ("Mexico", "Brazil"),
        ("Vietnam", "China"),
        ("Malaysia", "China"),
        ("Philippines", "India"),
        ("Bangladesh", "India"),
        ("Iran", "Turkey"),
        ("Egypt", "Turkey"),
        ("Argentina", "Brazil"),
        ("Colombia", "Brazil"),
        ("Peru", "Brazil"),
        ("Chile", "Brazil"),
        ("Norway", "EU"),
        ("Saudi Arabia", "Turkey"),
        ("United Arab Emirates", "Turkey"),
        ("Qatar", "Turkey"),
        ("Oman", "Turkey"),
        ("Bahrain", "Turkey"),
        ("Kuwait", "Turkey"),
        ("Algeria", "Turkey"),
        ("Libya", "Turkey"),
        ("Tunisia", "Turkey"),
        ("Morocco", "Turkey"),
        ("Pakistan", "India"),
        ("Myanmar", "India"),
        ("Trinidad and Tobago", "Brazil"),
        ("Venezuela", "Brazil"),
        ("Ecuador", "Brazil"),
        ("Bolivia", "Brazil"),
        ("Uruguay", "Brazil"),
        ("Paraguay", "Brazil"),
    ]);
}

// ── Company matching configuration ───────────────────────────────────────────

/// A tracked company: canonical name plus the patterns used to claim plants.
/// `parent` is matched against the raw tracker parent/owner string;
/// `plant_name_fallback` is matched against the plant name when the parent
/// field no longer reflects historical ownership (post-acquisition vintages).
#[derive(Debug)]
pub struct CompanyDef {
    pub name: &'static str,
    pub parent: Regex,
    pub plant_name_fallback: Option<Regex>,
}

fn company(name: &'static str, parent: &str, fallback: Option<&str>) -> CompanyDef {
    CompanyDef {
        name,
        parent: Regex::new(&format!("(?i){}", parent)).unwrap(),
        plant_name_fallback: fallback.map(|p| Regex::new(&format!("(?i){}", p)).unwrap()),
    }
}

lazy_static! {
    pub static ref COMPANIES: Vec<CompanyDef> = vec![
        company("ArcelorMittal", r"ArcelorMittal", None),
        company("Tata Steel", r"Tata Steel", None),
        company("POSCO Holdings", r"Posco|POSCO", None),
        company("Nippon Steel", r"Nippon Steel", None),
        company("JSW Steel", r"JSW Steel|JSW Ispat", None),
        company("ThyssenKrupp", r"[Tt]hyssenkrupp|ThyssenKrupp", None),
        company("SSAB", r"SSAB", None),
        company("Severstal", r"Severstal", None),
        company("Baoshan Iron & Steel", r"Baoshan|Baowu", None),
        company("BlueScope Steel", r"BlueScope", None),
        company("China Steel", r"China Steel|Dragon Steel", None),
        company("Nucor", r"Nucor", None),
        company("Gerdau", r"Gerdau", None),
        company("JFE Holdings", r"JFE", None),
        company(
            "US Steel",
            r"U\.?S\.?\s*Steel|United States Steel",
            Some(r"U\.?S\.?\s*Steel"),
        ),
        company("Hyundai Steel", r"Hyundai Steel", None),
        company("Cleveland-Cliffs", r"Cleveland.Cliffs|Cliffs Natural|AK Steel", None),
        company("Kobe Steel", r"Kobe Steel|KOBELCO", None),
        company("voestalpine", r"voestalpine", None),
        company("SAIL", r"Steel Authority|SAIL", None),
        company("Steel Dynamics", r"Steel Dynamics|SDI\b", None),
        company("Salzgitter", r"Salzgitter", None),
        company("Ternium", r"Ternium", None),
        company("NLMK", r"NLMK|Novolipetsk", None),
        company("Evraz", r"Evraz", None),
        company("Liberty Steel", r"Liberty Steel|GFG Alliance", None),
    ];
}

/// Ownership transfer: plants matching `target_plant_pattern` belong to the
/// acquirer only from `effective_year` onward. The current tracker vintage
/// records present-day ownership, so pre-transfer years must subtract these
/// plants from the acquirer and re-attribute them via the prior owner's
/// plant-name fallback.
#[derive(Debug)]
pub struct OwnershipTransfer {
    pub acquirer: &'static str,
    pub prior_owner: &'static str,
    pub target_plant_pattern: Regex,
    pub effective_year: i32,
}

lazy_static! {
    pub static ref OWNERSHIP_TRANSFERS: Vec<OwnershipTransfer> = vec![OwnershipTransfer {
        acquirer: "Nippon Steel",
        prior_owner: "US Steel",
        target_plant_pattern: Regex::new(r"(?i)U\.?S\.?\s*Steel").unwrap(),
        effective_year: 2024,
    }];
}

// ── Name-matching word lists ─────────────────────────────────────────────────

lazy_static! {
    /// Generic words that do not identify a site; removed before the
    /// key-location-word overlap tier.
    pub static ref GENERIC_NAME_WORDS: HashSet<&'static str> = HashSet::from([
        "steel", "plant", "works", "iron", "mill", "new", "old",
        "integrated", "facility", "complex", "base",
    ]);

    /// Company-name prefixes stripped from plant names before matching, so
    /// "SSAB Raahe steel plant" and "Raahe works" can correspond.
    pub static ref COMPANY_NAME_PREFIXES: Vec<&'static str> = vec![
        "arcelormittal", "tata steel", "nippon steel", "posco", "ssab",
        "thyssenkrupp", "bluescope", "severstal", "baoshan", "nucor",
        "gerdau", "jfe", "jsw", "sail", "nlmk", "evraz", "liberty",
        "hyundai", "voestalpine", "salzgitter", "cleveland-cliffs",
        "am/ns", "us steel", "u.s. steel",
    ];
}

// ── Integrator configuration ─────────────────────────────────────────────────

/// Sector handled by this pipeline run. The integrator carries the sector
/// column so the cross-sector consumer can merge outputs.
pub const SECTOR: &str = "steel";

lazy_static! {
    /// Default-source priority per sector: the first source present for a
    /// (company, year, metric) becomes the default; the rest are exposed as
    /// comparison columns.
    pub static ref SECTOR_DEFAULT_PRIORITY: HashMap<&'static str, Vec<EstimateSource>> =
        HashMap::from([(
            "steel",
            vec![
                EstimateSource::ReferenceAld,
                EstimateSource::Apa,
                EstimateSource::Satellite,
                EstimateSource::AnnualReport,
            ],
        )]);
}
