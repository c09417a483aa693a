use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::{
    Paths, COMPANIES, COMPANY_PRODUCTION_FILE, COVERAGE_FLOOR, FILL_YEARS, PLANTS_FILE,
    PLANT_PRODUCTION_FILE, RESOLVED_PRODUCTION_OUT, UTILIZATION_SANE_MAX, UTILIZATION_SANE_MIN,
};
use crate::lifecycle::is_active;
use crate::load::{self, CompanyProductionFact, PlantProductionRow};
use crate::matcher::company_plants;
use crate::model::{Plant, ProductionSource, ResolvedProduction};

/// Build the bottom-up production source by summing per-plant reported output
/// over each company's claimed plants.
///
/// A sparse reporting year would understate the aggregate badly, so a year is
/// only accepted when at least half of the company's plants reported,
/// measured against its best-covered year; otherwise the year falls through
/// to lower-priority sources.
pub fn gem_plant_level_production(
    plants: &[Plant],
    plant_production: &[PlantProductionRow],
) -> Vec<CompanyProductionFact> {
    // plant_id -> year -> reported output
    let mut reported: HashMap<&str, BTreeMap<i32, f64>> = HashMap::new();
    for row in plant_production {
        if let Some(value) = row.production_ttpa {
            reported
                .entry(row.plant_id.as_str())
                .or_default()
                .insert(row.year, value);
        }
    }

    let mut facts = Vec::new();
    for company in COMPANIES.iter() {
        let claimed: Vec<&str> = company_plants(plants, company, None)
            .iter()
            .map(|c| c.plant.plant_id.as_str())
            .collect();
        if claimed.is_empty() {
            continue;
        }

        // Per-year totals and reporting counts over the claimed plants.
        let mut per_year: BTreeMap<i32, (f64, usize)> = BTreeMap::new();
        for plant_id in &claimed {
            if let Some(years) = reported.get(plant_id) {
                for (&year, &value) in years {
                    let entry = per_year.entry(year).or_insert((0.0, 0));
                    entry.0 += value;
                    entry.1 += 1;
                }
            }
        }

        let best_coverage = per_year.values().map(|(_, n)| *n).max().unwrap_or(0);
        if best_coverage == 0 {
            continue;
        }

        for (&year, &(total_ttpa, n_reporting)) in &per_year {
            if total_ttpa <= 0.0 {
                continue;
            }
            let coverage = n_reporting as f64 / best_coverage as f64;
            if coverage < COVERAGE_FLOOR {
                log::debug!(
                    "skipping bottom-up production for {} {}: {}/{} plants reporting",
                    company.name,
                    year,
                    n_reporting,
                    best_coverage
                );
                continue;
            }
            facts.push(CompanyProductionFact {
                company: company.name.to_string(),
                year,
                production_mt: round3(total_ttpa / 1000.0),
                source: ProductionSource::GemPlantLevel,
            });
        }
    }
    facts
}

/// Keep the highest-priority fact per (company, year).
pub fn resolve(facts: &[CompanyProductionFact]) -> Vec<ResolvedProduction> {
    let mut best: BTreeMap<(String, i32), &CompanyProductionFact> = BTreeMap::new();
    for fact in facts {
        let key = (fact.company.clone(), fact.year);
        match best.get(&key) {
            Some(existing) if existing.source.priority() <= fact.source.priority() => {}
            _ => {
                best.insert(key, fact);
            }
        }
    }
    best.into_values()
        .map(|f| ResolvedProduction {
            company: f.company.clone(),
            year: f.year,
            production_mt: f.production_mt,
            source: f.source,
        })
        .collect()
}

/// Estimate production for fill years with no source at all, as
/// capacity(year) × the company's average historical utilization. The
/// average comes from the earliest three observed years whose implied
/// utilization is sane; companies with no usable sample are left unfilled.
pub fn capacity_backfill(
    plants: &[Plant],
    resolved: &[ResolvedProduction],
) -> Vec<ResolvedProduction> {
    let existing: HashSet<(&str, i32)> = resolved
        .iter()
        .map(|r| (r.company.as_str(), r.year))
        .collect();

    let mut filled = Vec::new();
    for company in COMPANIES.iter() {
        let mut ur_samples: Vec<(i32, f64)> = Vec::new();
        for r in resolved.iter().filter(|r| r.company == company.name) {
            let cap_mt = company_capacity_mt(plants, company, r.year);
            if cap_mt > 0.0 {
                let ur = r.production_mt / cap_mt;
                if (UTILIZATION_SANE_MIN..=UTILIZATION_SANE_MAX).contains(&ur) {
                    ur_samples.push((r.year, ur));
                }
            }
        }
        if ur_samples.is_empty() {
            continue;
        }
        ur_samples.sort_by_key(|(year, _)| *year);
        let earliest = &ur_samples[..ur_samples.len().min(3)];
        let avg_ur = earliest.iter().map(|(_, ur)| ur).sum::<f64>() / earliest.len() as f64;

        for year in FILL_YEARS {
            if existing.contains(&(company.name, year)) {
                continue;
            }
            let cap_mt = company_capacity_mt(plants, company, year);
            if cap_mt <= 0.0 {
                continue;
            }
            let estimate = round3(cap_mt * avg_ur);
            log::info!(
                "estimated {} {}: {:.2} Mt (capacity {:.1} Mt x UR {:.2})",
                company.name,
                year,
                estimate,
                cap_mt,
                avg_ur
            );
            filled.push(ResolvedProduction {
                company: company.name.to_string(),
                year,
                production_mt: estimate,
                source: ProductionSource::CapacityEstimate,
            });
        }
    }
    filled
}

fn company_capacity_mt(plants: &[Plant], company: &crate::config::CompanyDef, year: i32) -> f64 {
    company_plants(plants, company, Some(year))
        .iter()
        .filter(|c| is_active(c.plant, year))
        .map(|c| c.plant.capacity_ttpa)
        .sum::<f64>()
        / 1000.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[derive(Debug, Serialize)]
struct ResolvedRow {
    company: String,
    year: i32,
    production_mt: f64,
    source: String,
}

/// Stage entry point: merge all sources, resolve priorities, back-fill, and
/// write the resolved production table.
pub fn run(paths: &Paths) -> Result<()> {
    let plants = load::load_plants(&paths.input(PLANTS_FILE))?;
    let mut facts = load::load_company_production(&paths.input(COMPANY_PRODUCTION_FILE))?;
    let plant_production = load::load_plant_production(&paths.input(PLANT_PRODUCTION_FILE))?;

    let bottom_up = gem_plant_level_production(&plants, &plant_production);
    log::info!("bottom-up production source: {} company-years", bottom_up.len());
    facts.extend(bottom_up);

    let mut resolved = resolve(&facts);
    let filled = capacity_backfill(&plants, &resolved);
    if !filled.is_empty() {
        log::info!("capacity back-fill added {} company-years", filled.len());
        resolved.extend(filled);
    }
    resolved.sort_by(|a, b| (a.company.as_str(), a.year).cmp(&(b.company.as_str(), b.year)));

    let out_path = paths.output(RESOLVED_PRODUCTION_OUT);
    let mut wtr = csv::Writer::from_path(&out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    for r in &resolved {
        wtr.serialize(ResolvedRow {
            company: r.company.clone(),
            year: r.year,
            production_mt: r.production_mt,
            source: r.source.label().to_string(),
        })?;
    }
    wtr.flush()?;
    log::info!(
        "wrote {} resolved production rows to {}",
        resolved.len(),
        out_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlantStatus, Technology};

    fn nucor_plant(id: &str, capacity: f64) -> Plant {
        Plant {
            plant_id: id.to_string(),
            plant_name: format!("{} mill", id),
            country: "United States".to_string(),
            parent: "Nucor Corp [100.0%]".to_string(),
            status: PlantStatus::Operating,
            start_year: Some(2000),
            technology: Technology::Eaf,
            capacity_ttpa: capacity,
        }
    }

    fn fact(company: &str, year: i32, mt: f64, source: ProductionSource) -> CompanyProductionFact {
        CompanyProductionFact {
            company: company.to_string(),
            year,
            production_mt: mt,
            source,
        }
    }

    #[test]
    fn highest_priority_source_wins() {
        let facts = vec![
            fact("Nucor", 2022, 20.0, ProductionSource::GemPlantLevel),
            fact("Nucor", 2022, 21.5, ProductionSource::AnnualReport),
            fact("Nucor", 2022, 21.0, ProductionSource::CuratedReports),
        ];
        let resolved = resolve(&facts);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].production_mt, 21.5);
        assert_eq!(resolved[0].source, ProductionSource::AnnualReport);
    }

    #[test]
    fn missing_company_year_is_omitted_not_zero() {
        let facts = vec![fact("Nucor", 2022, 21.5, ProductionSource::AnnualReport)];
        let resolved = resolve(&facts);
        assert!(!resolved.iter().any(|r| r.year == 2021));
    }

    #[test]
    fn coverage_floor_discards_sparse_years() {
        let plants = vec![
            nucor_plant("P1", 2000.0),
            nucor_plant("P2", 2000.0),
            nucor_plant("P3", 2000.0),
            nucor_plant("P4", 2000.0),
        ];
        // 2022: all four plants report. 2023: only one does (25% coverage).
        let mut rows = Vec::new();
        for id in ["P1", "P2", "P3", "P4"] {
            rows.push(PlantProductionRow {
                plant_id: id.to_string(),
                year: 2022,
                production_ttpa: Some(1800.0),
            });
        }
        rows.push(PlantProductionRow {
            plant_id: "P1".to_string(),
            year: 2023,
            production_ttpa: Some(1800.0),
        });

        let facts = gem_plant_level_production(&plants, &rows);
        let nucor: Vec<_> = facts.iter().filter(|f| f.company == "Nucor").collect();
        assert_eq!(nucor.len(), 1);
        assert_eq!(nucor[0].year, 2022);
        assert_eq!(nucor[0].production_mt, 7.2);
    }

    #[test]
    fn half_coverage_is_still_accepted() {
        let plants = vec![nucor_plant("P1", 2000.0), nucor_plant("P2", 2000.0)];
        let rows = vec![
            PlantProductionRow {
                plant_id: "P1".to_string(),
                year: 2022,
                production_ttpa: Some(1500.0),
            },
            PlantProductionRow {
                plant_id: "P2".to_string(),
                year: 2022,
                production_ttpa: Some(1500.0),
            },
            PlantProductionRow {
                plant_id: "P1".to_string(),
                year: 2023,
                production_ttpa: Some(1500.0),
            },
        ];
        let facts = gem_plant_level_production(&plants, &rows);
        // 1/2 plants in 2023 is exactly the floor, so both years survive.
        assert_eq!(facts.iter().filter(|f| f.company == "Nucor").count(), 2);
    }

    #[test]
    fn backfill_only_fills_years_without_any_source() {
        let plants = vec![nucor_plant("P1", 10000.0)];
        let resolved = vec![
            ResolvedProduction {
                company: "Nucor".to_string(),
                year: 2020,
                production_mt: 8.0,
                source: ProductionSource::AnnualReport,
            },
            ResolvedProduction {
                company: "Nucor".to_string(),
                year: 2014,
                production_mt: 7.5,
                source: ProductionSource::CuratedReports,
            },
        ];
        let filled = capacity_backfill(&plants, &resolved);
        // 2014 already covered; 2015-2019 get estimates at UR from samples.
        assert!(!filled.iter().any(|f| f.year == 2014));
        assert_eq!(filled.len(), 5);
        for f in &filled {
            assert_eq!(f.source, ProductionSource::CapacityEstimate);
            // avg UR from (2014: 0.75, 2020: 0.8) earliest years = 0.775
            assert!((f.production_mt - 7.75).abs() < 1e-9);
        }
    }

    #[test]
    fn backfill_skips_companies_with_implausible_utilization() {
        let plants = vec![nucor_plant("P1", 1000.0)];
        // 20 Mt against 1 Mt capacity: UR far outside the sane band.
        let resolved = vec![ResolvedProduction {
            company: "Nucor".to_string(),
            year: 2020,
            production_mt: 20.0,
            source: ProductionSource::AnnualReport,
        }];
        assert!(capacity_backfill(&plants, &resolved).is_empty());
    }
}
