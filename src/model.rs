use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a plant entry, as reported by the asset tracker.
/// Tracker vintages spell these inconsistently ("operating pre-retirement",
/// "Operating Pre-Retirement"), so parsing is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlantStatus {
    Operating,
    PreRetirement,
    Construction,
    Retired,
    Mothballed,
    Announced,
    Cancelled,
}

impl PlantStatus {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "operating" => Ok(PlantStatus::Operating),
            "operating pre-retirement" | "pre-retirement" => Ok(PlantStatus::PreRetirement),
            "construction" => Ok(PlantStatus::Construction),
            "retired" => Ok(PlantStatus::Retired),
            "mothballed" => Ok(PlantStatus::Mothballed),
            "announced" => Ok(PlantStatus::Announced),
            "cancelled" => Ok(PlantStatus::Cancelled),
            other => Err(anyhow!("unrecognized plant status: '{}'", other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PlantStatus::Operating => "operating",
            PlantStatus::PreRetirement => "operating pre-retirement",
            PlantStatus::Construction => "construction",
            PlantStatus::Retired => "retired",
            PlantStatus::Mothballed => "mothballed",
            PlantStatus::Announced => "announced",
            PlantStatus::Cancelled => "cancelled",
        }
    }
}

/// Production route of a plant. DRI is sub-typed by reductant at emission
/// factor lookup time (coal vs gas, by country); H2-DRI is its own class
/// because trackers list hydrogen pilots explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Technology {
    BfBof,
    Eaf,
    Dri,
    H2Dri,
}

impl Technology {
    /// Classify the free-text technology field. Mirrors the equipment-text
    /// fallback used by the tracker import: hydrogen beats DRI beats EAF,
    /// and anything unrecognized is treated as the integrated BF-BOF route.
    pub fn parse(raw: &str) -> Self {
        let t = raw.trim().to_lowercase();
        if t.contains("h2") || t.contains("hydrogen") {
            Technology::H2Dri
        } else if t.contains("dri") || t.contains("sponge") || t.contains("direct red") {
            Technology::Dri
        } else if t.contains("eaf") || t.contains("electric") || t.contains("scrap") {
            Technology::Eaf
        } else {
            Technology::BfBof
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Technology::BfBof => "BF-BOF",
            Technology::Eaf => "EAF",
            Technology::Dri => "DRI",
            Technology::H2Dri => "H2-DRI",
        }
    }
}

/// A physical production asset from the current tracker vintage.
/// Identifiers are vintage-specific: correspondence with other datasets is
/// always re-derived by name + country, never by `plant_id`.
#[derive(Debug, Clone)]
pub struct Plant {
    pub plant_id: String,
    pub plant_name: String,
    pub country: String,
    pub parent: String,
    pub status: PlantStatus,
    pub start_year: Option<i32>,
    pub technology: Technology,
    pub capacity_ttpa: f64,
}

/// A plant entry from the older reference ownership list, used only for
/// cross-validation of the current vintage's ownership data.
#[derive(Debug, Clone)]
pub struct ReferencePlant {
    pub company: String,
    pub ref_plant_id: String,
    pub plant_name: String,
    pub country: String,
    pub ownership_share: Option<f64>,
    pub capacity_ttpa: f64,
    pub status: String,
}

/// Company-level production source, ordered by priority. Adding a source is
/// a new variant plus a rank, not a new conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductionSource {
    BauReported,
    AnnualReport,
    CuratedReports,
    ReferenceAld,
    GemPlantLevel,
    CapacityEstimate,
}

impl ProductionSource {
    /// Lower rank wins when several sources cover the same company-year.
    pub fn priority(self) -> u8 {
        match self {
            ProductionSource::BauReported => 0,
            ProductionSource::AnnualReport => 1,
            ProductionSource::CuratedReports => 2,
            ProductionSource::ReferenceAld => 3,
            ProductionSource::GemPlantLevel => 4,
            ProductionSource::CapacityEstimate => 5,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "bau_reported" => Ok(ProductionSource::BauReported),
            "annual_report" => Ok(ProductionSource::AnnualReport),
            "curated_reports" => Ok(ProductionSource::CuratedReports),
            "reference_ald" => Ok(ProductionSource::ReferenceAld),
            "gem_plant_level" => Ok(ProductionSource::GemPlantLevel),
            "capacity_estimate" => Ok(ProductionSource::CapacityEstimate),
            other => Err(anyhow!("unrecognized production source: '{}'", other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProductionSource::BauReported => "bau_reported",
            ProductionSource::AnnualReport => "annual_report",
            ProductionSource::CuratedReports => "curated_reports",
            ProductionSource::ReferenceAld => "reference_ald",
            ProductionSource::GemPlantLevel => "gem_plant_level",
            ProductionSource::CapacityEstimate => "capacity_estimate",
        }
    }
}

/// A (company, year) production fact after priority resolution.
#[derive(Debug, Clone)]
pub struct ResolvedProduction {
    pub company: String,
    pub year: i32,
    pub production_mt: f64,
    pub source: ProductionSource,
}

/// Computed APA output record, one per company-year. Immutable: a re-run
/// regenerates the whole table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyYearEmissions {
    pub company: String,
    pub year: i32,
    pub production_mt: f64,
    pub emissions_mt: f64,
    pub weighted_ef: f64,
    pub utilization_rate: f64,
    pub n_plants: usize,
    pub total_capacity_mt: f64,
    pub production_source: String,
}

/// Kinds of ownership discrepancy surfaced for human review. None of these
/// feed back into the calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    NotInReference,
    NotInCurrent,
    EquityMismatch,
    EquityUnknown,
    MinorityStake,
    AmbiguousMatch,
}

impl MismatchKind {
    pub fn label(self) -> &'static str {
        match self {
            MismatchKind::NotInReference => "NOT_IN_REFERENCE",
            MismatchKind::NotInCurrent => "NOT_IN_CURRENT",
            MismatchKind::EquityMismatch => "EQUITY_MISMATCH",
            MismatchKind::EquityUnknown => "EQUITY_UNKNOWN",
            MismatchKind::MinorityStake => "MINORITY_STAKE",
            MismatchKind::AmbiguousMatch => "AMBIGUOUS_MATCH",
        }
    }
}

/// Independent emissions/production estimate source feeding the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimateSource {
    AnnualReport,
    Satellite,
    Apa,
    ReferenceAld,
}

impl EstimateSource {
    pub fn label(self) -> &'static str {
        match self {
            EstimateSource::AnnualReport => "annual_report",
            EstimateSource::Satellite => "satellite",
            EstimateSource::Apa => "apa",
            EstimateSource::ReferenceAld => "reference_ald",
        }
    }

    /// Pedigree base score: self-reported figures are audited, satellite and
    /// asset-based figures are modeled.
    pub fn base_score(self) -> f64 {
        match self {
            EstimateSource::AnnualReport => 0.50,
            EstimateSource::Satellite => 0.35,
            EstimateSource::Apa => 0.30,
            EstimateSource::ReferenceAld => 0.30,
        }
    }
}

/// What the integrator compares and publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    ProductionMt,
    EmissionsMtCo2,
}

impl Metric {
    pub fn label(self) -> &'static str {
        match self {
            Metric::ProductionMt => "production_mt",
            Metric::EmissionsMtCo2 => "emissions_mt_co2",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::ProductionMt => "Mt",
            Metric::EmissionsMtCo2 => "Mt CO2",
        }
    }
}

/// Extraction-quality tag attached to every integrated data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionQuality {
    ExplicitTable,
    ContextValidated,
    ModelCalculated,
    LowConfidence,
}

impl ExtractionQuality {
    /// Map the raw confidence tag carried by report extractions. Modeled
    /// sources tag themselves directly.
    pub fn from_confidence(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "high" => ExtractionQuality::ExplicitTable,
            "medium" => ExtractionQuality::ContextValidated,
            "modeled" => ExtractionQuality::ModelCalculated,
            _ => ExtractionQuality::LowConfidence,
        }
    }

    pub fn modifier(self) -> f64 {
        match self {
            ExtractionQuality::ExplicitTable => 0.30,
            ExtractionQuality::ContextValidated => 0.20,
            ExtractionQuality::ModelCalculated => 0.15,
            ExtractionQuality::LowConfidence => 0.05,
        }
    }
}

/// One long-format observation inside the integrator.
#[derive(Debug, Clone)]
pub struct Observation {
    pub company: String,
    pub year: i32,
    pub metric: Metric,
    pub value: f64,
    pub source: EstimateSource,
    pub quality: ExtractionQuality,
}
