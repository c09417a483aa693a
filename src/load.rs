use std::path::Path;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde::Deserialize;

use crate::model::{
    CompanyYearEmissions, Metric, Plant, PlantStatus, ProductionSource, ReferencePlant, Technology,
};

// Input readers. Per-row deserialization failures and unparseable enum values
// are hard errors: a malformed extract must halt the stage rather than leak a
// silently-coerced value into an emissions estimate. Missing values travel as
// empty fields and deserialize to None.

#[derive(Debug, Deserialize)]
struct PlantRow {
    plant_id: String,
    plant_name: String,
    country: String,
    parent: String,
    status: String,
    start_year: Option<i32>,
    technology: String,
    capacity_ttpa: f64,
}

pub fn load_plants(path: &Path) -> Result<Vec<Plant>> {
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open plant extract: {}", path.display()))?;

    let mut plants = Vec::new();
    for (i, row) in rdr.deserialize::<PlantRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?;
        let status = PlantStatus::parse(&row.status)
            .with_context(|| format!("{}: row {} ({})", path.display(), i + 2, row.plant_id))?;
        plants.push(Plant {
            plant_id: row.plant_id,
            plant_name: row.plant_name,
            country: row.country,
            parent: row.parent,
            status,
            start_year: row.start_year,
            technology: Technology::parse(&row.technology),
            capacity_ttpa: row.capacity_ttpa,
        });
    }
    log::info!("loaded {} plant entries from {}", plants.len(), path.display());
    Ok(plants)
}

/// One company-level production fact as supplied by an upstream source.
#[derive(Debug, Clone)]
pub struct CompanyProductionFact {
    pub company: String,
    pub year: i32,
    pub production_mt: f64,
    pub source: ProductionSource,
}

#[derive(Debug, Deserialize)]
struct CompanyProductionRow {
    company: String,
    year: i32,
    production_mt: f64,
    source: String,
}

pub fn load_company_production(path: &Path) -> Result<Vec<CompanyProductionFact>> {
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open company production: {}", path.display()))?;

    let mut facts = Vec::new();
    for (i, row) in rdr.deserialize::<CompanyProductionRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?;
        let source = ProductionSource::parse(&row.source)
            .with_context(|| format!("{}: row {}", path.display(), i + 2))?;
        facts.push(CompanyProductionFact {
            company: row.company,
            year: row.year,
            production_mt: row.production_mt,
            source,
        });
    }
    log::info!(
        "loaded {} company production records from {}",
        facts.len(),
        path.display()
    );
    Ok(facts)
}

/// Per-plant reported output for one year; None means the plant did not report.
#[derive(Debug, Deserialize)]
pub struct PlantProductionRow {
    pub plant_id: String,
    pub year: i32,
    pub production_ttpa: Option<f64>,
}

pub fn load_plant_production(path: &Path) -> Result<Vec<PlantProductionRow>> {
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open plant production: {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, row) in rdr.deserialize::<PlantProductionRow>().enumerate() {
        rows.push(row.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?);
    }
    log::info!(
        "loaded {} plant production records from {}",
        rows.len(),
        path.display()
    );
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct ResolvedProductionRow {
    company: String,
    year: i32,
    production_mt: f64,
    source: String,
}

pub fn load_resolved_production(path: &Path) -> Result<Vec<crate::model::ResolvedProduction>> {
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open resolved production: {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, row) in rdr.deserialize::<ResolvedProductionRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?;
        let source = ProductionSource::parse(&row.source)
            .with_context(|| format!("{}: row {}", path.display(), i + 2))?;
        rows.push(crate::model::ResolvedProduction {
            company: row.company,
            year: row.year,
            production_mt: row.production_mt,
            source,
        });
    }
    log::info!(
        "loaded {} resolved production rows from {}",
        rows.len(),
        path.display()
    );
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct ReferenceOwnershipRow {
    company: String,
    ref_plant_id: String,
    plant_name: String,
    country: String,
    ownership_share: Option<f64>,
    capacity_ttpa: f64,
    status: String,
}

pub fn load_reference_ownership(path: &Path) -> Result<Vec<ReferencePlant>> {
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open reference ownership list: {}", path.display()))?;

    let mut plants = Vec::new();
    for (i, row) in rdr.deserialize::<ReferenceOwnershipRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?;
        plants.push(ReferencePlant {
            company: row.company,
            ref_plant_id: row.ref_plant_id,
            plant_name: row.plant_name,
            country: row.country,
            ownership_share: row.ownership_share,
            capacity_ttpa: row.capacity_ttpa,
            status: row.status,
        });
    }
    log::info!(
        "loaded {} reference ownership entries from {}",
        plants.len(),
        path.display()
    );
    Ok(plants)
}

/// A self-reported (annual report) extraction with its confidence tag.
#[derive(Debug, Clone)]
pub struct ReportedFact {
    pub company: String,
    pub year: i32,
    pub metric: Metric,
    pub value: f64,
    pub confidence: String,
}

#[derive(Debug, Deserialize)]
struct ReportedRow {
    company: String,
    year: i32,
    metric: String,
    value: f64,
    confidence: String,
}

pub fn load_reported(path: &Path) -> Result<Vec<ReportedFact>> {
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open reported extractions: {}", path.display()))?;

    let mut facts = Vec::new();
    for (i, row) in rdr.deserialize::<ReportedRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?;
        let metric = match row.metric.trim() {
            "production_mt" => Metric::ProductionMt,
            "emissions_mt_co2" => Metric::EmissionsMtCo2,
            other => anyhow::bail!(
                "{}: row {}: unrecognized metric '{}'",
                path.display(),
                i + 2,
                other
            ),
        };
        facts.push(ReportedFact {
            company: row.company,
            year: row.year,
            metric,
            value: row.value,
            confidence: row.confidence,
        });
    }
    log::info!("loaded {} reported records from {}", facts.len(), path.display());
    Ok(facts)
}

/// One satellite/facility-model company-year estimate.
#[derive(Debug, Deserialize)]
pub struct SatelliteRow {
    pub company: String,
    pub year: i32,
    pub production_mt: Option<f64>,
    pub emissions_mt: Option<f64>,
}

pub fn load_satellite(path: &Path) -> Result<Vec<SatelliteRow>> {
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open satellite estimates: {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, row) in rdr.deserialize::<SatelliteRow>().enumerate() {
        rows.push(row.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?);
    }
    log::info!("loaded {} satellite records from {}", rows.len(), path.display());
    Ok(rows)
}

/// One reference asset-level-dataset company-year estimate.
#[derive(Debug, Deserialize)]
pub struct ReferenceAldRow {
    pub company: String,
    pub year: i32,
    pub production_mt: Option<f64>,
    pub emissions_mt: Option<f64>,
}

pub fn load_reference_ald_emissions(path: &Path) -> Result<Vec<ReferenceAldRow>> {
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open reference ALD estimates: {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, row) in rdr.deserialize::<ReferenceAldRow>().enumerate() {
        rows.push(row.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?);
    }
    log::info!(
        "loaded {} reference ALD records from {}",
        rows.len(),
        path.display()
    );
    Ok(rows)
}

/// Country-level production split for one company-year.
#[derive(Debug, Deserialize)]
pub struct CountryProductionRow {
    pub company: String,
    pub year: i32,
    pub country: String,
    pub production_kt: f64,
}

/// The country split is optional: a missing file means uniform allocation.
pub fn load_country_production(path: &Path) -> Result<Vec<CountryProductionRow>> {
    if !path.exists() {
        log::info!(
            "no country production file at {}, using uniform utilization",
            path.display()
        );
        return Ok(Vec::new());
    }
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open country production: {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, row) in rdr.deserialize::<CountryProductionRow>().enumerate() {
        rows.push(row.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?);
    }
    log::info!(
        "loaded {} country production records from {}",
        rows.len(),
        path.display()
    );
    Ok(rows)
}

pub fn load_apa_emissions(path: &Path) -> Result<Vec<CompanyYearEmissions>> {
    let mut rdr = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open APA output: {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, row) in rdr.deserialize::<CompanyYearEmissions>().enumerate() {
        rows.push(row.with_context(|| format!("{}: bad record at row {}", path.display(), i + 2))?);
    }
    log::info!("loaded {} APA records from {}", rows.len(), path.display());
    Ok(rows)
}
