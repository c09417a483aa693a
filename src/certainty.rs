use crate::config::CERTAINTY_REFERENCE_YEAR;
use crate::model::ExtractionQuality;

/// Scores never fall below this floor, however weak the pedigree.
pub const CERTAINTY_FLOOR: f64 = 0.05;

/// Pedigree-matrix certainty score for one data point:
///
///   certainty = source_base + quality_modifier + recency_bonus
///             + cross_validation_bonus, clamped to [0.05, 1.0]
///
/// `nearest_independent` is the closest value reported by any other source
/// for the same (company, year, metric); agreement within 15% earns the full
/// bonus, within 30% half of it. Evaluated per data point with no side
/// effects; recency is measured against a fixed reference year so re-runs
/// score identically.
pub fn score(
    source_base: f64,
    quality: ExtractionQuality,
    data_year: i32,
    value: f64,
    nearest_independent: Option<f64>,
) -> f64 {
    let mut s = source_base + quality.modifier();

    let age = CERTAINTY_REFERENCE_YEAR - data_year;
    if age <= 2 {
        s += 0.10;
    } else if age <= 5 {
        s += 0.05;
    }

    if let Some(other) = nearest_independent {
        if other > 0.0 {
            let rel_diff = (value - other).abs() / other;
            if rel_diff <= 0.15 {
                s += 0.10;
            } else if rel_diff <= 0.30 {
                s += 0.05;
            }
        }
    }

    s.clamp(CERTAINTY_FLOOR, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EstimateSource;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn scores_stay_inside_bounds() {
        for base in [0.0, 0.30, 0.35, 0.50] {
            for quality in [
                ExtractionQuality::ExplicitTable,
                ExtractionQuality::ContextValidated,
                ExtractionQuality::ModelCalculated,
                ExtractionQuality::LowConfidence,
            ] {
                for year in [2000, 2015, 2020, 2024] {
                    for nearest in [None, Some(10.0), Some(11.0), Some(25.0)] {
                        let s = score(base, quality, year, 10.0, nearest);
                        assert!((CERTAINTY_FLOOR..=1.0).contains(&s));
                    }
                }
            }
        }
    }

    #[test]
    fn weakest_pedigree_sits_exactly_on_the_floor() {
        // Unrecognized source (base 0), low-confidence extraction, data older
        // than five years, nothing to cross-validate against.
        let s = score(0.0, ExtractionQuality::LowConfidence, 2014, 10.0, None);
        assert!(close(s, CERTAINTY_FLOOR));
    }

    #[test]
    fn audited_recent_corroborated_point_scores_near_one() {
        let s = score(
            EstimateSource::AnnualReport.base_score(),
            ExtractionQuality::ExplicitTable,
            2024,
            10.0,
            Some(10.5),
        );
        assert!(close(s, 1.0));
    }

    #[test]
    fn recency_bonus_steps_down_with_age() {
        let base = EstimateSource::Apa.base_score();
        let recent = score(base, ExtractionQuality::ModelCalculated, 2024, 10.0, None);
        let mid = score(base, ExtractionQuality::ModelCalculated, 2021, 10.0, None);
        let old = score(base, ExtractionQuality::ModelCalculated, 2015, 10.0, None);
        assert!(close(recent - mid, 0.05));
        assert!(close(mid - old, 0.05));
    }

    #[test]
    fn cross_validation_bonus_tiers() {
        let base = EstimateSource::Satellite.base_score();
        let within_15 = score(base, ExtractionQuality::ModelCalculated, 2015, 10.0, Some(11.0));
        let within_30 = score(base, ExtractionQuality::ModelCalculated, 2015, 10.0, Some(12.5));
        let beyond = score(base, ExtractionQuality::ModelCalculated, 2015, 10.0, Some(20.0));
        assert!(close(within_15 - beyond, 0.10));
        assert!(close(within_30 - beyond, 0.05));
    }
}
