use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::certainty;
use crate::config::{
    Paths, APA_EMISSIONS_OUT, DIVERGENCE_REVIEW_THRESHOLD, MULTI_SOURCE_COMPARISON_OUT,
    MULTI_SOURCE_OUT, REFERENCE_ALD_EMISSIONS_FILE, REPORTED_FILE, SATELLITE_FILE, SECTOR,
    SECTOR_DEFAULT_PRIORITY, SUSPICIOUS_EMISSIONS_MT, SUSPICIOUS_PRODUCTION_MT,
};
use crate::load;
use crate::model::{
    CompanyYearEmissions, EstimateSource, ExtractionQuality, Metric, Observation,
};

/// Collect every source's company-year estimates into long-format
/// observations. Missing values are simply not observations; nothing here
/// invents zeros.
pub fn build_observations(
    apa: &[CompanyYearEmissions],
    reported: &[load::ReportedFact],
    satellite: &[load::SatelliteRow],
    reference_ald: &[load::ReferenceAldRow],
) -> Vec<Observation> {
    let mut observations = Vec::new();

    for row in apa {
        observations.push(Observation {
            company: row.company.clone(),
            year: row.year,
            metric: Metric::ProductionMt,
            value: row.production_mt,
            source: EstimateSource::Apa,
            quality: ExtractionQuality::ModelCalculated,
        });
        observations.push(Observation {
            company: row.company.clone(),
            year: row.year,
            metric: Metric::EmissionsMtCo2,
            value: row.emissions_mt,
            source: EstimateSource::Apa,
            quality: ExtractionQuality::ModelCalculated,
        });
    }

    for fact in reported {
        observations.push(Observation {
            company: fact.company.clone(),
            year: fact.year,
            metric: fact.metric,
            value: fact.value,
            source: EstimateSource::AnnualReport,
            quality: ExtractionQuality::from_confidence(&fact.confidence),
        });
    }

    for row in satellite {
        if let Some(production) = row.production_mt {
            observations.push(Observation {
                company: row.company.clone(),
                year: row.year,
                metric: Metric::ProductionMt,
                value: production,
                source: EstimateSource::Satellite,
                quality: ExtractionQuality::ModelCalculated,
            });
        }
        if let Some(emissions) = row.emissions_mt {
            observations.push(Observation {
                company: row.company.clone(),
                year: row.year,
                metric: Metric::EmissionsMtCo2,
                value: emissions,
                source: EstimateSource::Satellite,
                quality: ExtractionQuality::ModelCalculated,
            });
        }
    }

    for row in reference_ald {
        if let Some(production) = row.production_mt {
            observations.push(Observation {
                company: row.company.clone(),
                year: row.year,
                metric: Metric::ProductionMt,
                value: production,
                source: EstimateSource::ReferenceAld,
                quality: ExtractionQuality::ModelCalculated,
            });
        }
        if let Some(emissions) = row.emissions_mt {
            observations.push(Observation {
                company: row.company.clone(),
                year: row.year,
                metric: Metric::EmissionsMtCo2,
                value: emissions,
                source: EstimateSource::ReferenceAld,
                quality: ExtractionQuality::ModelCalculated,
            });
        }
    }

    observations
}

#[derive(Debug, Serialize)]
pub struct LongRow {
    pub company: String,
    pub year: i32,
    pub sector: String,
    pub metric: String,
    pub value: f64,
    pub unit: String,
    pub source: String,
    pub certainty: f64,
    pub is_default: bool,
    pub review_flag: String,
}

#[derive(Debug, Serialize)]
pub struct WideRow {
    pub company: String,
    pub year: i32,
    pub sector: String,
    pub default_emissions_mt: f64,
    pub default_source: String,
    pub default_certainty: f64,
    pub comparison_emissions_reference_ald: Option<f64>,
    pub comparison_emissions_apa: Option<f64>,
    pub comparison_emissions_satellite: Option<f64>,
    pub comparison_emissions_annual_report: Option<f64>,
    pub n_sources: usize,
    pub max_divergence_pct: Option<f64>,
    pub review_flag: String,
}

/// Merge all observations into the long table (every source kept, one marked
/// default per the sector priority) and the wide emissions comparison table.
/// Divergence beyond the review threshold is informational metadata for a
/// human analyst, never an error.
pub fn integrate(observations: &[Observation]) -> (Vec<LongRow>, Vec<WideRow>) {
    let priority = &SECTOR_DEFAULT_PRIORITY[SECTOR];

    // (company, year, metric) -> observations
    let mut groups: BTreeMap<(String, i32, &'static str), Vec<&Observation>> = BTreeMap::new();
    for obs in observations {
        groups
            .entry((obs.company.clone(), obs.year, obs.metric.label()))
            .or_default()
            .push(obs);
    }

    let mut long_rows = Vec::new();
    let mut wide_rows = Vec::new();

    for ((company, year, _), group) in &groups {
        let metric = group[0].metric;

        let default_source = priority
            .iter()
            .find(|src| group.iter().any(|o| o.source == **src))
            .copied();

        let mut default_value = None;
        let mut default_certainty = None;
        let mut divergent_sources: Vec<&'static str> = Vec::new();

        if let Some(default_source) = default_source {
            if let Some(default_obs) = group.iter().find(|o| o.source == default_source) {
                default_value = Some(default_obs.value);
                if default_obs.value > 0.0 {
                    for obs in group.iter().filter(|o| o.source != default_source) {
                        let rel = (obs.value - default_obs.value).abs() / default_obs.value;
                        if rel > DIVERGENCE_REVIEW_THRESHOLD {
                            divergent_sources.push(obs.source.label());
                        }
                    }
                }
            }
        }
        divergent_sources.sort_unstable();

        for obs in group {
            let nearest = nearest_independent(obs, group);
            let score =
                certainty::score(obs.source.base_score(), obs.quality, obs.year, obs.value, nearest);
            let is_default = default_source == Some(obs.source);
            if is_default {
                default_certainty = Some(score);
            }

            let mut flags = suspicious_flags(metric, obs.value);
            if is_default {
                for src in &divergent_sources {
                    flags.push(format!("DIVERGENCE_GT_30PCT_{}", src));
                }
            }

            long_rows.push(LongRow {
                company: company.clone(),
                year: *year,
                sector: SECTOR.to_string(),
                metric: metric.label().to_string(),
                value: obs.value,
                unit: metric.unit().to_string(),
                source: obs.source.label().to_string(),
                certainty: score,
                is_default,
                review_flag: flags.join("; "),
            });
        }

        if metric == Metric::EmissionsMtCo2 {
            if let (Some(default_value), Some(default_source)) = (default_value, default_source) {
                let value_of = |src: EstimateSource| {
                    group.iter().find(|o| o.source == src).map(|o| o.value)
                };
                let max_divergence_pct = if group.len() >= 2 && default_value > 0.0 {
                    group
                        .iter()
                        .filter(|o| o.source != default_source)
                        .map(|o| (o.value - default_value).abs() / default_value * 100.0)
                        .fold(None, |acc: Option<f64>, d| {
                            Some(acc.map_or(d, |a| a.max(d)))
                        })
                        .map(round1)
                } else {
                    None
                };

                let mut flags = suspicious_flags(metric, default_value);
                for src in &divergent_sources {
                    flags.push(format!("DIVERGENCE_GT_30PCT_{}", src));
                }

                wide_rows.push(WideRow {
                    company: company.clone(),
                    year: *year,
                    sector: SECTOR.to_string(),
                    default_emissions_mt: default_value,
                    default_source: default_source.label().to_string(),
                    default_certainty: default_certainty.unwrap_or(0.0),
                    comparison_emissions_reference_ald: value_of(EstimateSource::ReferenceAld),
                    comparison_emissions_apa: value_of(EstimateSource::Apa),
                    comparison_emissions_satellite: value_of(EstimateSource::Satellite),
                    comparison_emissions_annual_report: value_of(EstimateSource::AnnualReport),
                    n_sources: group.len(),
                    max_divergence_pct,
                    review_flag: flags.join("; "),
                });
            }
        }
    }

    // Group iteration is already (company, year, metric)-ordered; order rows
    // within a group by source label for stable output.
    long_rows.sort_by(|a, b| {
        (a.company.as_str(), a.year, a.metric.as_str(), a.source.as_str()).cmp(&(
            b.company.as_str(),
            b.year,
            b.metric.as_str(),
            b.source.as_str(),
        ))
    });

    (long_rows, wide_rows)
}

/// Closest value from any other source in the group.
fn nearest_independent(obs: &Observation, group: &[&Observation]) -> Option<f64> {
    group
        .iter()
        .filter(|o| o.source != obs.source)
        .map(|o| o.value)
        .min_by(|a, b| {
            let da = (a - obs.value).abs();
            let db = (b - obs.value).abs();
            da.total_cmp(&db)
        })
}

fn suspicious_flags(metric: Metric, value: f64) -> Vec<String> {
    let mut flags = Vec::new();
    match metric {
        Metric::ProductionMt if value > SUSPICIOUS_PRODUCTION_MT => {
            flags.push("SUSPICIOUS_PRODUCTION_GT_100MT".to_string());
        }
        Metric::EmissionsMtCo2 if value > SUSPICIOUS_EMISSIONS_MT => {
            flags.push("SUSPICIOUS_EMISSIONS_GT_200MT".to_string());
        }
        _ => {}
    }
    flags
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Stage entry point.
pub fn run(paths: &Paths) -> Result<()> {
    let apa = load::load_apa_emissions(&paths.output(APA_EMISSIONS_OUT))?;
    let reported = load::load_reported(&paths.input(REPORTED_FILE))?;
    let satellite = load::load_satellite(&paths.input(SATELLITE_FILE))?;
    let reference_ald =
        load::load_reference_ald_emissions(&paths.input(REFERENCE_ALD_EMISSIONS_FILE))?;

    let observations = build_observations(&apa, &reported, &satellite, &reference_ald);
    log::info!("integrating {} observations", observations.len());
    let (long_rows, wide_rows) = integrate(&observations);

    let long_path = paths.output(MULTI_SOURCE_OUT);
    let mut wtr = csv::Writer::from_path(&long_path)
        .with_context(|| format!("failed to create {}", long_path.display()))?;
    for row in &long_rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    log::info!("wrote {} long rows to {}", long_rows.len(), long_path.display());

    let wide_path = paths.output(MULTI_SOURCE_COMPARISON_OUT);
    let mut wtr = csv::Writer::from_path(&wide_path)
        .with_context(|| format!("failed to create {}", wide_path.display()))?;
    for row in &wide_rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    log::info!(
        "wrote {} comparison rows to {}",
        wide_rows.len(),
        wide_path.display()
    );

    let n_review = wide_rows.iter().filter(|r| !r.review_flag.is_empty()).count();
    if n_review > 0 {
        log::info!("{} comparison rows carry review flags", n_review);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(
        company: &str,
        year: i32,
        metric: Metric,
        value: f64,
        source: EstimateSource,
    ) -> Observation {
        Observation {
            company: company.to_string(),
            year,
            metric,
            value,
            source,
            quality: ExtractionQuality::ModelCalculated,
        }
    }

    #[test]
    fn default_follows_sector_priority() {
        let observations = vec![
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 9.8, EstimateSource::AnnualReport),
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 10.0, EstimateSource::ReferenceAld),
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 10.4, EstimateSource::Apa),
        ];
        let (long_rows, wide_rows) = integrate(&observations);

        let default: Vec<_> = long_rows.iter().filter(|r| r.is_default).collect();
        assert_eq!(default.len(), 1);
        assert_eq!(default[0].source, "reference_ald");

        assert_eq!(wide_rows.len(), 1);
        assert_eq!(wide_rows[0].default_source, "reference_ald");
        assert_eq!(wide_rows[0].default_emissions_mt, 10.0);
        assert_eq!(wide_rows[0].comparison_emissions_apa, Some(10.4));
        assert_eq!(wide_rows[0].comparison_emissions_annual_report, Some(9.8));
        assert_eq!(wide_rows[0].comparison_emissions_satellite, None);
    }

    #[test]
    fn next_priority_source_becomes_default_when_first_is_absent() {
        let observations = vec![
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 10.4, EstimateSource::Apa),
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 9.8, EstimateSource::AnnualReport),
        ];
        let (long_rows, _) = integrate(&observations);
        let default: Vec<_> = long_rows.iter().filter(|r| r.is_default).collect();
        assert_eq!(default.len(), 1);
        assert_eq!(default[0].source, "apa");
    }

    #[test]
    fn all_sources_survive_as_comparison_rows() {
        let observations = vec![
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 10.0, EstimateSource::ReferenceAld),
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 10.4, EstimateSource::Apa),
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 11.0, EstimateSource::Satellite),
        ];
        let (long_rows, _) = integrate(&observations);
        assert_eq!(long_rows.len(), 3);
        assert_eq!(long_rows.iter().filter(|r| r.is_default).count(), 1);
    }

    #[test]
    fn divergence_above_threshold_is_flagged_for_review() {
        let observations = vec![
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 10.0, EstimateSource::ReferenceAld),
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 14.0, EstimateSource::Satellite),
        ];
        let (long_rows, wide_rows) = integrate(&observations);

        let default = long_rows.iter().find(|r| r.is_default).unwrap();
        assert!(default.review_flag.contains("DIVERGENCE_GT_30PCT_satellite"));
        assert!(wide_rows[0].review_flag.contains("DIVERGENCE_GT_30PCT_satellite"));
        assert_eq!(wide_rows[0].max_divergence_pct, Some(40.0));
    }

    #[test]
    fn agreement_within_threshold_is_not_flagged() {
        let observations = vec![
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 10.0, EstimateSource::ReferenceAld),
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 11.5, EstimateSource::Satellite),
        ];
        let (_, wide_rows) = integrate(&observations);
        assert!(wide_rows[0].review_flag.is_empty());
    }

    #[test]
    fn corroborated_observations_score_higher() {
        let observations_agreeing = vec![
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 10.0, EstimateSource::Apa),
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 10.5, EstimateSource::Satellite),
        ];
        let observations_alone = vec![obs(
            "SSAB",
            2022,
            Metric::EmissionsMtCo2,
            10.0,
            EstimateSource::Apa,
        )];
        let (with, _) = integrate(&observations_agreeing);
        let (without, _) = integrate(&observations_alone);
        let apa_with = with.iter().find(|r| r.source == "apa").unwrap();
        let apa_without = without.iter().find(|r| r.source == "apa").unwrap();
        assert!((apa_with.certainty - apa_without.certainty - 0.10).abs() < 1e-9);
    }

    #[test]
    fn suspicious_magnitudes_are_flagged_informationally() {
        let observations = vec![
            obs("SSAB", 2022, Metric::ProductionMt, 150.0, EstimateSource::AnnualReport),
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 250.0, EstimateSource::AnnualReport),
        ];
        let (long_rows, _) = integrate(&observations);
        assert!(long_rows
            .iter()
            .any(|r| r.review_flag.contains("SUSPICIOUS_PRODUCTION_GT_100MT")));
        assert!(long_rows
            .iter()
            .any(|r| r.review_flag.contains("SUSPICIOUS_EMISSIONS_GT_200MT")));
    }

    #[test]
    fn production_metric_never_enters_the_wide_emissions_table() {
        let observations = vec![
            obs("SSAB", 2022, Metric::ProductionMt, 7.0, EstimateSource::Apa),
            obs("SSAB", 2022, Metric::EmissionsMtCo2, 10.0, EstimateSource::Apa),
        ];
        let (_, wide_rows) = integrate(&observations);
        assert_eq!(wide_rows.len(), 1);
        assert_eq!(wide_rows[0].default_emissions_mt, 10.0);
    }
}
