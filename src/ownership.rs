use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::config::{
    Paths, COMPANIES, EQUITY_TOLERANCE, MAPPING_YEARS, OWNERSHIP_MAPPING_OUT,
    OWNERSHIP_MISMATCHES_OUT, REFERENCE_BASE_YEAR, REFERENCE_OWNERSHIP_FILE, SHARE_EPSILON,
    PLANTS_FILE,
};
use crate::lifecycle::is_active;
use crate::load;
use crate::matcher::{company_plants, match_plant_name, NameMatch};
use crate::model::{MismatchKind, Plant, ReferencePlant};

lazy_static! {
    // "[60.0%]" and "(60%)" annotation styles, with optional decimals.
    static ref BRACKET_PCT_RE: Regex = Regex::new(r"\[(\d+(?:\.\d+)?)\s*%\]").unwrap();
    static ref PAREN_PCT_RE: Regex = Regex::new(r"\((\d+(?:\.\d+)?)\s*%\)").unwrap();
    static ref PCT_ANNOTATION_RE: Regex =
        Regex::new(r"\s*[\[(]\d+(?:\.\d+)?\s*%[\])]").unwrap();
}

/// One named owner parsed from an ownership annotation; the share is None
/// when the owner is named without an explicit percentage.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerShare {
    pub name: String,
    pub share: Option<f64>,
}

/// Parse a free-text ownership annotation into named owners.
///
/// Formats seen in tracker extracts:
///   "ArcelorMittal SA [100.0%]"
///   "ArcelorMittal SA [60.0%]; Nippon Steel Corp [40.0%]"
///   "Shell (40%); BP (30%); Other"
///   "China Steel Corp; Formosa Plastics Corp"
///
/// "Other"/"Unknown" placeholders are dropped. Explicit shares summing above
/// 1 + epsilon are a data error, not something to clamp.
pub fn parse_ownership(raw: &str) -> Result<Vec<OwnerShare>> {
    let mut owners = Vec::new();
    for part in raw.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let share = BRACKET_PCT_RE
            .captures(part)
            .or_else(|| PAREN_PCT_RE.captures(part))
            .map(|caps| {
                caps[1]
                    .parse::<f64>()
                    .map(|pct| pct / 100.0)
                    .with_context(|| format!("unparseable percentage in '{}'", part))
            })
            .transpose()?;
        let name = PCT_ANNOTATION_RE.replace_all(part, "").trim().to_string();
        if name.is_empty() {
            bail!("ownership segment '{}' has a percentage but no owner name", part);
        }
        let lowered = name.to_lowercase();
        if lowered == "other" || lowered == "unknown" {
            continue;
        }
        owners.push(OwnerShare { name, share });
    }

    let explicit_sum: f64 = owners.iter().filter_map(|o| o.share).sum();
    if explicit_sum > 1.0 + SHARE_EPSILON {
        bail!(
            "ownership shares sum to {:.4} (> 1) in '{}'",
            explicit_sum,
            raw
        );
    }
    Ok(owners)
}

/// Fill unshared owners so a plant's shares sum toward 1: the remainder left
/// by explicit percentages is split equally among owners named without one.
pub fn resolve_shares(owners: &[OwnerShare]) -> Vec<(String, f64)> {
    let explicit_sum: f64 = owners.iter().filter_map(|o| o.share).sum();
    let n_unshared = owners.iter().filter(|o| o.share.is_none()).count();
    let remainder = (1.0 - explicit_sum).max(0.0);
    let per_unshared = if n_unshared > 0 {
        remainder / n_unshared as f64
    } else {
        0.0
    };

    owners
        .iter()
        .map(|o| (o.name.clone(), o.share.unwrap_or(per_unshared)))
        .collect()
}

/// A specific company's stake in a plant, as read from the raw parent string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EquityShare {
    Explicit(f64),
    /// Named in the parent string, but without a percentage.
    Unknown,
    /// Not named in the parent string at all (e.g. plant-name fallback match).
    Absent,
}

pub fn company_equity(raw_parent: &str, company_pattern: &Regex) -> Result<EquityShare> {
    let owners = parse_ownership(raw_parent)?;
    for owner in &owners {
        if company_pattern.is_match(&owner.name) {
            return Ok(match owner.share {
                Some(share) => EquityShare::Explicit(share),
                None => EquityShare::Unknown,
            });
        }
    }
    Ok(EquityShare::Absent)
}

// ── Ownership mapping stage ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MappingRow {
    pub company: String,
    pub year: i32,
    pub plant_id: String,
    pub plant_name: String,
    pub country: String,
    pub status: String,
    pub capacity_ttpa: f64,
    pub technology: String,
    pub equity_share: Option<f64>,
    pub reference_share: Option<f64>,
    pub match_source: String,
    pub flags: String,
}

#[derive(Debug, Serialize)]
pub struct MismatchRow {
    pub company: String,
    pub year: i32,
    pub plant_id: String,
    pub plant_name: String,
    pub country: String,
    pub kind: String,
    pub detail: String,
    pub current_share: Option<f64>,
    pub reference_share: Option<f64>,
}

/// Build the per-company-year plant mapping and its cross-validation flags.
///
/// The current vintage is cross-checked against the reference list by
/// name + country (identifiers are not stable across vintages). The check
/// runs at the base year only: the reference list has no per-year variation,
/// and running it against year-filtered plant sets would manufacture
/// spurious absence flags.
pub fn generate_mapping(
    plants: &[Plant],
    reference: &[ReferencePlant],
) -> Result<(Vec<MappingRow>, Vec<MismatchRow>)> {
    let reference_companies: HashSet<&str> =
        reference.iter().map(|r| r.company.as_str()).collect();

    let mut mapping = Vec::new();
    let mut mismatches = Vec::new();

    for company in COMPANIES.iter() {
        let company_in_reference = reference_companies.contains(company.name);
        // Reference plants matched at the base year, to find NOT_IN_CURRENT.
        let mut matched_ref_ids: HashSet<String> = HashSet::new();

        for year in MAPPING_YEARS {
            let mut claimed = company_plants(plants, company, Some(year));
            claimed.retain(|c| is_active(c.plant, year));
            claimed.sort_by(|a, b| a.plant.plant_id.cmp(&b.plant.plant_id));
            if claimed.is_empty() {
                continue;
            }

            for claim in &claimed {
                let plant = claim.plant;
                let equity = company_equity(&plant.parent, &company.parent)
                    .with_context(|| format!("plant {} ({})", plant.plant_id, plant.plant_name))?;
                let equity_value = match equity {
                    EquityShare::Explicit(share) => Some(share),
                    EquityShare::Unknown | EquityShare::Absent => None,
                };

                let mut flags: Vec<String> = Vec::new();
                let mut reference_share = None;

                if year == REFERENCE_BASE_YEAR && !reference.is_empty() {
                    match match_plant_name(&plant.plant_name, &plant.country, reference) {
                        NameMatch::Unique(ref_plant, _) if ref_plant.company == company.name => {
                            matched_ref_ids.insert(ref_plant.ref_plant_id.clone());
                            reference_share = ref_plant.ownership_share;
                            if let (Some(cur), Some(refv)) = (equity_value, reference_share) {
                                if (cur - refv).abs() > EQUITY_TOLERANCE {
                                    flags.push(MismatchKind::EquityMismatch.label().to_string());
                                    mismatches.push(MismatchRow {
                                        company: company.name.to_string(),
                                        year,
                                        plant_id: plant.plant_id.clone(),
                                        plant_name: plant.plant_name.clone(),
                                        country: plant.country.clone(),
                                        kind: MismatchKind::EquityMismatch.label().to_string(),
                                        detail: format!(
                                            "current {:.0}% vs reference {:.0}%",
                                            cur * 100.0,
                                            refv * 100.0
                                        ),
                                        current_share: equity_value,
                                        reference_share,
                                    });
                                }
                            }
                        }
                        NameMatch::Unique(ref_plant, _) => {
                            // The reference attributes this site to another
                            // company; from this company's view it is absent.
                            if company_in_reference {
                                flags.push(MismatchKind::NotInReference.label().to_string());
                                mismatches.push(MismatchRow {
                                    company: company.name.to_string(),
                                    year,
                                    plant_id: plant.plant_id.clone(),
                                    plant_name: plant.plant_name.clone(),
                                    country: plant.country.clone(),
                                    kind: MismatchKind::NotInReference.label().to_string(),
                                    detail: format!(
                                        "reference lists this site under '{}'",
                                        ref_plant.company
                                    ),
                                    current_share: equity_value,
                                    reference_share: None,
                                });
                            }
                        }
                        NameMatch::Ambiguous(hits) => {
                            let companies: Vec<&str> =
                                hits.iter().map(|h| h.company.as_str()).collect();
                            flags.push(MismatchKind::AmbiguousMatch.label().to_string());
                            mismatches.push(MismatchRow {
                                company: company.name.to_string(),
                                year,
                                plant_id: plant.plant_id.clone(),
                                plant_name: plant.plant_name.clone(),
                                country: plant.country.clone(),
                                kind: MismatchKind::AmbiguousMatch.label().to_string(),
                                detail: format!(
                                    "reference candidates from: {}",
                                    companies.join(", ")
                                ),
                                current_share: equity_value,
                                reference_share: None,
                            });
                        }
                        NameMatch::None => {
                            if company_in_reference {
                                flags.push(MismatchKind::NotInReference.label().to_string());
                                mismatches.push(MismatchRow {
                                    company: company.name.to_string(),
                                    year,
                                    plant_id: plant.plant_id.clone(),
                                    plant_name: plant.plant_name.clone(),
                                    country: plant.country.clone(),
                                    kind: MismatchKind::NotInReference.label().to_string(),
                                    detail: "no reference plant matched by name + country"
                                        .to_string(),
                                    current_share: equity_value,
                                    reference_share: None,
                                });
                            }
                        }
                    }
                }

                if equity_value.is_none() {
                    flags.push(MismatchKind::EquityUnknown.label().to_string());
                    mismatches.push(MismatchRow {
                        company: company.name.to_string(),
                        year,
                        plant_id: plant.plant_id.clone(),
                        plant_name: plant.plant_name.clone(),
                        country: plant.country.clone(),
                        kind: MismatchKind::EquityUnknown.label().to_string(),
                        detail: "parent field carries no percentage for this company".to_string(),
                        current_share: None,
                        reference_share,
                    });
                }

                if let Some(share) = equity_value {
                    if share < 0.5 {
                        flags.push(MismatchKind::MinorityStake.label().to_string());
                        mismatches.push(MismatchRow {
                            company: company.name.to_string(),
                            year,
                            plant_id: plant.plant_id.clone(),
                            plant_name: plant.plant_name.clone(),
                            country: plant.country.clone(),
                            kind: MismatchKind::MinorityStake.label().to_string(),
                            detail: format!("stake {:.0}% below 50%", share * 100.0),
                            current_share: Some(share),
                            reference_share,
                        });
                    }
                }

                mapping.push(MappingRow {
                    company: company.name.to_string(),
                    year,
                    plant_id: plant.plant_id.clone(),
                    plant_name: plant.plant_name.clone(),
                    country: plant.country.clone(),
                    status: plant.status.label().to_string(),
                    capacity_ttpa: plant.capacity_ttpa,
                    technology: plant.technology.label().to_string(),
                    equity_share: equity_value,
                    reference_share,
                    match_source: claim.match_source.label().to_string(),
                    flags: flags.join("; "),
                });
            }
        }

        // Reference plants this company should own but the current vintage
        // never matched: surfaced once, at the base year.
        if company_in_reference {
            for ref_plant in reference.iter().filter(|r| r.company == company.name) {
                let status = ref_plant.status.to_lowercase();
                if status == "announced" || status == "cancelled" {
                    continue;
                }
                if !matched_ref_ids.contains(&ref_plant.ref_plant_id) {
                    mismatches.push(MismatchRow {
                        company: company.name.to_string(),
                        year: REFERENCE_BASE_YEAR,
                        plant_id: ref_plant.ref_plant_id.clone(),
                        plant_name: ref_plant.plant_name.clone(),
                        country: ref_plant.country.clone(),
                        kind: MismatchKind::NotInCurrent.label().to_string(),
                        detail: "reference plant not matched in the current vintage; \
                                 possible rename or vintage difference"
                            .to_string(),
                        current_share: None,
                        reference_share: ref_plant.ownership_share,
                    });
                }
            }
        }
    }

    mapping.sort_by(|a, b| {
        (a.company.as_str(), a.year, a.country.as_str(), a.plant_name.as_str()).cmp(&(
            b.company.as_str(),
            b.year,
            b.country.as_str(),
            b.plant_name.as_str(),
        ))
    });
    mismatches.sort_by(|a, b| {
        (a.company.as_str(), a.year, a.kind.as_str(), a.plant_name.as_str()).cmp(&(
            b.company.as_str(),
            b.year,
            b.kind.as_str(),
            b.plant_name.as_str(),
        ))
    });

    Ok((mapping, mismatches))
}

/// Stage entry point: read the plant extract and reference list, write the
/// mapping and mismatch tables.
pub fn run(paths: &Paths) -> Result<()> {
    let plants = load::load_plants(&paths.input(PLANTS_FILE))?;
    let reference = load::load_reference_ownership(&paths.input(REFERENCE_OWNERSHIP_FILE))?;

    let (mapping, mismatches) = generate_mapping(&plants, &reference)?;

    let mapping_path = paths.output(OWNERSHIP_MAPPING_OUT);
    let mut wtr = csv::Writer::from_path(&mapping_path)
        .with_context(|| format!("failed to create {}", mapping_path.display()))?;
    for row in &mapping {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    log::info!(
        "wrote {} mapping rows to {}",
        mapping.len(),
        mapping_path.display()
    );

    let mismatch_path = paths.output(OWNERSHIP_MISMATCHES_OUT);
    let mut wtr = csv::Writer::from_path(&mismatch_path)
        .with_context(|| format!("failed to create {}", mismatch_path.display()))?;
    for row in &mismatches {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    log::info!(
        "wrote {} mismatch rows to {}",
        mismatches.len(),
        mismatch_path.display()
    );

    Ok(())
}
