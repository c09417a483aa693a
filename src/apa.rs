use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::config::{
    CompanyDef, Paths, APA_EMISSIONS_OUT, COMPANIES, COUNTRY_PRODUCTION_FILE, PLANTS_FILE,
    RESOLVED_PRODUCTION_OUT, UTILIZATION_MAX,
};
use crate::ef::emission_factor;
use crate::lifecycle::is_active;
use crate::load;
use crate::matcher::company_plants;
use crate::model::{CompanyYearEmissions, Plant, ResolvedProduction};
use crate::ownership::{company_equity, EquityShare};

/// Country-level production splits: (company, year) -> country -> Mt.
pub type CountryProductionMap = HashMap<(String, i32), BTreeMap<String, f64>>;

pub fn build_country_production_map(
    rows: &[load::CountryProductionRow],
) -> CountryProductionMap {
    let mut map: CountryProductionMap = HashMap::new();
    for row in rows {
        if row.production_kt <= 0.0 {
            continue;
        }
        *map.entry((row.company.clone(), row.year))
            .or_default()
            .entry(row.country.clone())
            .or_insert(0.0) += row.production_kt / 1000.0;
    }
    map
}

/// Compute one company-year emissions estimate from its active plant set.
///
/// Production is allocated to plants by capacity share: uniformly, or
/// country-by-country when a country split is supplied, with any residual
/// production spread over the plants in countries the split does not cover.
/// Each plant's emissions are weighted by the company's equity share in it;
/// a share the parent field does not state is attributed in full, and the
/// ownership mapping flags it for review.
///
/// Returns None when the company has no active plants or no capacity in that
/// year: the estimate is undefined, not zero.
pub fn calculate_company_year(
    plants: &[Plant],
    company: &CompanyDef,
    year: i32,
    production_mt: f64,
    country_production: Option<&BTreeMap<String, f64>>,
) -> Result<Option<CompanyYearEmissions>> {
    if production_mt <= 0.0 {
        return Ok(None);
    }

    let mut claimed = company_plants(plants, company, Some(year));
    claimed.retain(|c| is_active(c.plant, year));
    if claimed.is_empty() {
        return Ok(None);
    }
    // Deterministic allocation order.
    claimed.sort_by(|a, b| a.plant.plant_id.cmp(&b.plant.plant_id));

    let capacities_mt: Vec<f64> = claimed.iter().map(|c| c.plant.capacity_ttpa / 1000.0).collect();
    let total_capacity_mt: f64 = capacities_mt.iter().sum();
    if total_capacity_mt <= 0.0 {
        return Ok(None);
    }

    let utilization = production_mt / total_capacity_mt;

    let allocated = match country_production {
        Some(split) => allocate_by_country(&claimed, &capacities_mt, production_mt, split),
        None => capacities_mt.iter().map(|cap| cap * utilization).collect(),
    };

    let mut total_emissions = 0.0;
    for (i, claim) in claimed.iter().enumerate() {
        let plant = claim.plant;
        let ef = emission_factor(&plant.country, plant.technology, Some(year));
        let equity = match company_equity(&plant.parent, &company.parent)
            .with_context(|| format!("plant {} ({})", plant.plant_id, plant.plant_name))?
        {
            EquityShare::Explicit(share) => share,
            EquityShare::Unknown | EquityShare::Absent => 1.0,
        };
        total_emissions += allocated[i] * ef * equity;
    }

    let weighted_ef = total_emissions / production_mt;

    Ok(Some(CompanyYearEmissions {
        company: company.name.to_string(),
        year,
        production_mt,
        emissions_mt: round3(total_emissions),
        weighted_ef: round4(weighted_ef),
        utilization_rate: round4(utilization),
        n_plants: claimed.len(),
        total_capacity_mt: round3(total_capacity_mt),
        production_source: String::new(),
    }))
}

/// Country-aware allocation: countries with a stated production figure share
/// it among their plants by capacity; the remaining production is spread
/// across plants in the uncovered countries by a residual utilization rate.
fn allocate_by_country(
    claimed: &[crate::matcher::ClaimedPlant<'_>],
    capacities_mt: &[f64],
    production_mt: f64,
    split: &BTreeMap<String, f64>,
) -> Vec<f64> {
    let mut allocated = vec![0.0; claimed.len()];
    let mut covered = vec![false; claimed.len()];
    let mut remaining = production_mt;

    for (country, &country_production) in split {
        let indices: Vec<usize> = claimed
            .iter()
            .enumerate()
            .filter(|(_, c)| c.plant.country == *country)
            .map(|(i, _)| i)
            .collect();
        let country_capacity: f64 = indices.iter().map(|&i| capacities_mt[i]).sum();
        if country_capacity <= 0.0 || indices.is_empty() {
            continue;
        }
        let country_ur = country_production / country_capacity;
        for &i in &indices {
            allocated[i] = capacities_mt[i] * country_ur;
            covered[i] = true;
        }
        remaining -= country_production;
    }

    if remaining > 0.0 {
        let residual_capacity: f64 = capacities_mt
            .iter()
            .zip(&covered)
            .filter(|(_, &c)| !c)
            .map(|(cap, _)| cap)
            .sum();
        if residual_capacity > 0.0 {
            let residual_ur = remaining / residual_capacity;
            for (i, cap) in capacities_mt.iter().enumerate() {
                if !covered[i] {
                    allocated[i] = cap * residual_ur;
                }
            }
        }
    }

    allocated
}

/// Run the APA calculation for every resolved company-year. Company-years
/// whose implied utilization exceeds the plausibility ceiling are dropped
/// with a warning: a UR that high means the tracker is missing plants and
/// the aggregate would be materially wrong.
pub fn run_apa(
    plants: &[Plant],
    resolved: &[ResolvedProduction],
    country_production: &CountryProductionMap,
) -> Result<Vec<CompanyYearEmissions>> {
    let progress = ProgressBar::new(resolved.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} APA [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("#>-"),
    );

    let computed: Vec<Option<CompanyYearEmissions>> = resolved
        .par_iter()
        .map(|record| {
            let result = match COMPANIES.iter().find(|c| c.name == record.company) {
                Some(company) => {
                    let split = country_production
                        .get(&(record.company.clone(), record.year));
                    calculate_company_year(
                        plants,
                        company,
                        record.year,
                        record.production_mt,
                        split,
                    )?
                    .map(|mut r| {
                        r.production_source = record.source.label().to_string();
                        r
                    })
                }
                None => {
                    log::debug!("no matching patterns registered for '{}'", record.company);
                    None
                }
            };
            progress.inc(1);
            Ok(result)
        })
        .collect::<Result<Vec<_>>>()?;
    progress.finish_and_clear();

    let mut results: Vec<CompanyYearEmissions> = computed
        .into_iter()
        .flatten()
        .filter(|r| {
            if r.utilization_rate > UTILIZATION_MAX {
                log::warn!(
                    "skipping {} {}: utilization {:.2} exceeds {:.1} ({} plants, {:.1} Mt capacity vs {:.1} Mt production)",
                    r.company,
                    r.year,
                    r.utilization_rate,
                    UTILIZATION_MAX,
                    r.n_plants,
                    r.total_capacity_mt,
                    r.production_mt
                );
                false
            } else {
                true
            }
        })
        .collect();

    results.sort_by(|a, b| (a.company.as_str(), a.year).cmp(&(b.company.as_str(), b.year)));
    log::info!("APA results: {} company-year calculations", results.len());
    Ok(results)
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn round4(v: f64) -> f64 {
    (v * 10000.0).round() / 10000.0
}

/// Stage entry point.
pub fn run(paths: &Paths) -> Result<()> {
    let plants = load::load_plants(&paths.input(PLANTS_FILE))?;
    let resolved = load::load_resolved_production(&paths.output(RESOLVED_PRODUCTION_OUT))?;
    let country_rows = load::load_country_production(&paths.input(COUNTRY_PRODUCTION_FILE))?;
    let country_map = build_country_production_map(&country_rows);

    let results = run_apa(&plants, &resolved, &country_map)?;

    let out_path = paths.output(APA_EMISSIONS_OUT);
    let mut wtr = csv::Writer::from_path(&out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    for row in &results {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    log::info!("wrote {} APA rows to {}", results.len(), out_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlantStatus, ProductionSource, Technology};

    fn company(name: &str) -> &'static CompanyDef {
        COMPANIES.iter().find(|c| c.name == name).unwrap()
    }

    fn plant(
        id: &str,
        name: &str,
        country: &str,
        parent: &str,
        status: PlantStatus,
        start_year: Option<i32>,
        technology: Technology,
        capacity_ttpa: f64,
    ) -> Plant {
        Plant {
            plant_id: id.to_string(),
            plant_name: name.to_string(),
            country: country.to_string(),
            parent: parent.to_string(),
            status,
            start_year,
            technology,
            capacity_ttpa,
        }
    }

    #[test]
    fn wholly_owned_single_plant_scenario() {
        // 10 Mt BF-BOF plant in India, operating since 2010, production 8 Mt
        // in 2023: utilization 0.8, EF 3.72 x 0.995^3, emissions ~29.3 Mt.
        let plants = vec![plant(
            "P1",
            "Jamshedpur works",
            "India",
            "Tata Steel Ltd [100.0%]",
            PlantStatus::Operating,
            Some(2010),
            Technology::BfBof,
            10_000.0,
        )];
        let result = calculate_company_year(&plants, company("Tata Steel"), 2023, 8.0, None)
            .unwrap()
            .unwrap();

        assert!((result.utilization_rate - 0.8).abs() < 1e-9);
        let expected_ef = 3.72 * 0.995_f64.powi(3);
        assert!((result.weighted_ef - expected_ef).abs() < 1e-3);
        assert!((result.emissions_mt - 8.0 * expected_ef).abs() < 1e-2);
        assert_eq!(result.n_plants, 1);
        assert!((result.total_capacity_mt - 10.0).abs() < 1e-9);
    }

    #[test]
    fn weighted_ef_times_production_equals_emissions() {
        let plants = vec![
            plant(
                "P1",
                "Jamshedpur works",
                "India",
                "Tata Steel Ltd [100.0%]",
                PlantStatus::Operating,
                Some(1990),
                Technology::BfBof,
                8_000.0,
            ),
            plant(
                "P2",
                "IJmuiden works",
                "Netherlands",
                "Tata Steel IJmuiden BV [100.0%]",
                PlantStatus::Operating,
                Some(1950),
                Technology::BfBof,
                7_000.0,
            ),
            plant(
                "P3",
                "Port Talbot EAF",
                "United Kingdom",
                "Tata Steel UK Ltd [100.0%]",
                PlantStatus::Operating,
                Some(2010),
                Technology::Eaf,
                1_000.0,
            ),
        ];
        let result = calculate_company_year(&plants, company("Tata Steel"), 2022, 12.0, None)
            .unwrap()
            .unwrap();
        assert!((result.weighted_ef * result.production_mt - result.emissions_mt).abs() < 1e-2);
    }

    #[test]
    fn equity_share_scales_emissions() {
        let base = plant(
            "P1",
            "Hazira works",
            "India",
            "ArcelorMittal SA [100.0%]",
            PlantStatus::Operating,
            Some(2005),
            Technology::BfBof,
            10_000.0,
        );
        let mut joint = base.clone();
        joint.parent = "ArcelorMittal SA [60.0%]; Nippon Steel Corp [40.0%]".to_string();

        let full = calculate_company_year(&[base], company("ArcelorMittal"), 2022, 8.0, None)
            .unwrap()
            .unwrap();
        let partial = calculate_company_year(&[joint], company("ArcelorMittal"), 2022, 8.0, None)
            .unwrap()
            .unwrap();
        assert!((partial.emissions_mt - full.emissions_mt * 0.6).abs() < 1e-2);
    }

    #[test]
    fn zero_active_plants_yields_missing_not_zero() {
        // The only plant is announced: excluded for every year.
        let plants = vec![plant(
            "P1",
            "Greenfield project",
            "India",
            "Tata Steel Ltd [100.0%]",
            PlantStatus::Announced,
            Some(2020),
            Technology::BfBof,
            5_000.0,
        )];
        let result =
            calculate_company_year(&plants, company("Tata Steel"), 2023, 8.0, None).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn country_split_overrides_uniform_allocation() {
        let plants = vec![
            plant(
                "P1",
                "Jamshedpur works",
                "India",
                "Tata Steel Ltd [100.0%]",
                PlantStatus::Operating,
                Some(1990),
                Technology::BfBof,
                10_000.0,
            ),
            plant(
                "P2",
                "IJmuiden works",
                "Netherlands",
                "Tata Steel IJmuiden BV [100.0%]",
                PlantStatus::Operating,
                Some(1950),
                Technology::BfBof,
                10_000.0,
            ),
        ];
        // India runs hot (7 of 10 Mt), the Netherlands takes the residual.
        let mut split = BTreeMap::new();
        split.insert("India".to_string(), 7.0);

        let result =
            calculate_company_year(&plants, company("Tata Steel"), 2020, 10.0, Some(&split))
                .unwrap()
                .unwrap();

        // India: 7 x 3.72; Netherlands residual: 3 x 1.77 (EU).
        let expected = 7.0 * 3.72 + 3.0 * 1.77;
        assert!((result.emissions_mt - expected).abs() < 1e-2);

        let uniform = calculate_company_year(&plants, company("Tata Steel"), 2020, 10.0, None)
            .unwrap()
            .unwrap();
        assert!(result.emissions_mt > uniform.emissions_mt);
    }

    #[test]
    fn implausible_utilization_is_dropped() {
        let plants = vec![plant(
            "P1",
            "Jamshedpur works",
            "India",
            "Tata Steel Ltd [100.0%]",
            PlantStatus::Operating,
            Some(1990),
            Technology::BfBof,
            1_000.0,
        )];
        let resolved = vec![ResolvedProduction {
            company: "Tata Steel".to_string(),
            year: 2022,
            production_mt: 5.0, // 5x the tracked capacity
            source: ProductionSource::AnnualReport,
        }];
        let results = run_apa(&plants, &resolved, &HashMap::new()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn rerun_is_deterministic() {
        let plants = vec![
            plant(
                "P1",
                "Jamshedpur works",
                "India",
                "Tata Steel Ltd [100.0%]",
                PlantStatus::Operating,
                Some(1990),
                Technology::BfBof,
                8_000.0,
            ),
            plant(
                "P2",
                "IJmuiden works",
                "Netherlands",
                "Tata Steel IJmuiden BV [100.0%]",
                PlantStatus::Operating,
                Some(1950),
                Technology::BfBof,
                7_000.0,
            ),
        ];
        let resolved = vec![
            ResolvedProduction {
                company: "Tata Steel".to_string(),
                year: 2021,
                production_mt: 11.0,
                source: ProductionSource::AnnualReport,
            },
            ResolvedProduction {
                company: "Tata Steel".to_string(),
                year: 2022,
                production_mt: 12.0,
                source: ProductionSource::CuratedReports,
            },
        ];
        let a = run_apa(&plants, &resolved, &HashMap::new()).unwrap();
        let b = run_apa(&plants, &resolved, &HashMap::new()).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.company, y.company);
            assert_eq!(x.year, y.year);
            assert_eq!(x.emissions_mt, y.emissions_mt);
            assert_eq!(x.weighted_ef, y.weighted_ef);
        }
    }
}
