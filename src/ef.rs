use crate::config::{
    COUNTRY_TO_REGION, DRI_COAL_COUNTRIES, EF_BF_BOF, EF_BF_BOF_ANNUAL_IMPROVEMENT, EF_DRI_COAL,
    EF_DRI_GAS, EF_EAF, EF_H2_DRI, EF_REFERENCE_YEAR, GLOBAL_REGION,
};
use crate::model::Technology;

/// Map a plant country to its emission-factor region; unmapped countries use
/// the Global region rather than failing.
pub fn ef_region(country: &str) -> &'static str {
    COUNTRY_TO_REGION
        .get(country.trim())
        .copied()
        .unwrap_or(GLOBAL_REGION)
}

/// Emission factor in tCO2 per tonne of product for (country, technology, year).
///
/// BF-BOF intensities decay at 0.5%/year compounded from the 2020 reference,
/// so earlier years are strictly higher and later years strictly lower. EAF
/// intensities are static per region. DRI is sub-typed by reductant: coal for
/// the documented high-coal-DRI countries, gas elsewhere; hydrogen pilots
/// carry their own constant. Unknown combinations always resolve through the
/// Global fallback.
pub fn emission_factor(country: &str, technology: Technology, year: Option<i32>) -> f64 {
    match technology {
        Technology::Dri => {
            if DRI_COAL_COUNTRIES.contains(country.trim()) {
                EF_DRI_COAL
            } else {
                EF_DRI_GAS
            }
        }
        Technology::H2Dri => EF_H2_DRI,
        Technology::Eaf => {
            let region = ef_region(country);
            *EF_EAF.get(region).unwrap_or(&EF_EAF[GLOBAL_REGION])
        }
        Technology::BfBof => {
            let region = ef_region(country);
            let base = *EF_BF_BOF.get(region).unwrap_or(&EF_BF_BOF[GLOBAL_REGION]);
            match year {
                Some(year) => {
                    let years_from_ref = year - EF_REFERENCE_YEAR;
                    base * (1.0 - EF_BF_BOF_ANNUAL_IMPROVEMENT).powi(years_from_ref)
                }
                None => base,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn reference_year_returns_base_value_exactly() {
        assert_eq!(emission_factor("India", Technology::BfBof, Some(2020)), 3.72);
        assert_eq!(emission_factor("China", Technology::BfBof, Some(2020)), 1.76);
    }

    #[test]
    fn bf_bof_decay_is_monotonic() {
        let ef_2014 = emission_factor("India", Technology::BfBof, Some(2014));
        let ef_2020 = emission_factor("India", Technology::BfBof, Some(2020));
        let ef_2024 = emission_factor("India", Technology::BfBof, Some(2024));
        assert!(ef_2014 > ef_2020);
        assert!(ef_2020 > ef_2024);
    }

    #[test]
    fn bf_bof_decay_compounds_from_reference() {
        let expected = 3.72 * 0.995_f64.powi(3);
        assert!(close(emission_factor("India", Technology::BfBof, Some(2023)), expected));
    }

    #[test]
    fn eaf_is_static_across_years() {
        let a = emission_factor("Germany", Technology::Eaf, Some(2014));
        let b = emission_factor("Germany", Technology::Eaf, Some(2024));
        assert_eq!(a, b);
        assert_eq!(a, 0.04);
    }

    #[test]
    fn dri_subtype_depends_on_country() {
        assert_eq!(emission_factor("India", Technology::Dri, Some(2022)), 3.10);
        assert_eq!(emission_factor("Iran", Technology::Dri, Some(2022)), 1.05);
        assert_eq!(emission_factor("Sweden", Technology::H2Dri, Some(2026)), 0.04);
    }

    #[test]
    fn unmapped_country_uses_global_fallback() {
        assert_eq!(ef_region("Atlantis"), "Global");
        assert_eq!(
            emission_factor("Atlantis", Technology::BfBof, None),
            2.314
        );
        assert_eq!(emission_factor("Atlantis", Technology::Eaf, None), 0.051);
    }

    #[test]
    fn eu_members_share_the_eu_intensity() {
        assert_eq!(
            emission_factor("Germany", Technology::BfBof, Some(2020)),
            emission_factor("Poland", Technology::BfBof, Some(2020)),
        );
    }
}
