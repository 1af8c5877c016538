//! Normalization of raw provider opinions.
//!
//! Providers answer in loosely structured shapes: team names or "home"/"away",
//! confidence as a fraction or a percentage, free-form risk labels. Everything
//! that can be resolved to one side of the matchup with a usable confidence
//! becomes an [`AnalysisOpinion`]; everything else is discarded with a reason.

use serde::Serialize;
use tracing::debug;

use crate::db::models::{AnalysisOpinion, BaselineResult, GameContext, RawOpinion, RiskLevel, Side};
use crate::engine::tracker::{names_match, normalize_team_name};

/// Baseline side probability at which the baseline counts as backing a side.
pub const BASELINE_FAVOURED: f64 = 0.55;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discarded {
    pub provider: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregation {
    pub opinions: Vec<AnalysisOpinion>,
    pub discarded: Vec<Discarded>,
}

/// Normalize every raw opinion, in input order. Never fails.
pub fn aggregate(raw: &[RawOpinion], ctx: &GameContext, baseline: &BaselineResult) -> Aggregation {
    let mut out = Aggregation::default();
    for opinion in raw {
        let provider = if opinion.provider.trim().is_empty() {
            "unknown".to_string()
        } else {
            opinion.provider.clone()
        };
        match normalize(opinion, ctx, baseline) {
            Ok(o) => out.opinions.push(AnalysisOpinion { provider, ..o }),
            Err(reason) => {
                debug!("Discarding opinion from {}: {}", provider, reason);
                out.discarded.push(Discarded { provider, reason });
            }
        }
    }
    out
}

fn normalize(
    raw: &RawOpinion,
    ctx: &GameContext,
    baseline: &BaselineResult,
) -> Result<AnalysisOpinion, String> {
    if let Some(err) = &raw.error {
        return Err(format!("provider error: {}", err));
    }

    let confidence = raw
        .confidence
        .ok_or_else(|| "missing confidence".to_string())
        .and_then(normalize_confidence)?;

    let pick = raw
        .predicted_side
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| "missing predicted side".to_string())?;
    let side = resolve_side(pick, ctx)
        .ok_or_else(|| format!("cannot resolve '{}' to either team", pick))?;

    let risk = raw
        .risk_level
        .as_deref()
        .and_then(RiskLevel::parse)
        .unwrap_or(RiskLevel::Medium);

    let factors = raw
        .factors
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();

    Ok(AnalysisOpinion {
        provider: raw.provider.clone(),
        side,
        team: ctx.team(side).to_string(),
        confidence,
        factors,
        risk,
        baseline_favoured: baseline.side_probability(side) >= BASELINE_FAVOURED,
    })
}

/// Accepts a fraction in (0, 1] or a percentage in (1, 100].
fn normalize_confidence(value: f64) -> Result<f64, String> {
    if !value.is_finite() {
        return Err("confidence is not a number".to_string());
    }
    let c = if value > 1.0 && value <= 100.0 {
        value / 100.0
    } else {
        value
    };
    if c <= 0.0 || c > 1.0 {
        return Err(format!("confidence {} out of range", value));
    }
    Ok(c)
}

/// Map a predicted-side string onto the matchup.
///
/// Literal "home"/"away" first, then name matching against both teams, then
/// team names mentioned inside a longer phrase ("Chiefs to cover"). A string
/// naming both teams resolves to the longer mention, or to nothing on a tie.
pub fn resolve_side(pick: &str, ctx: &GameContext) -> Option<Side> {
    let p = normalize_team_name(pick);
    match p.as_str() {
        "" => return None,
        "home" | "home team" => return Some(Side::Home),
        "away" | "away team" | "road" | "visitor" | "visitors" => return Some(Side::Away),
        _ => {}
    }

    let home = normalize_team_name(&ctx.home_team);
    let away = normalize_team_name(&ctx.away_team);
    if p == home {
        return Some(Side::Home);
    }
    if p == away {
        return Some(Side::Away);
    }

    match (names_match(&p, &home), names_match(&p, &away)) {
        (true, false) => return Some(Side::Home),
        (false, true) => return Some(Side::Away),
        _ => {}
    }

    let padded = format!(" {p} ");
    let mentions = |team: &str| !team.is_empty() && padded.contains(&format!(" {team} "));
    match (mentions(&home), mentions(&away)) {
        (true, false) => Some(Side::Home),
        (false, true) => Some(Side::Away),
        (true, true) if home.len() > away.len() => Some(Side::Home),
        (true, true) if away.len() > home.len() => Some(Side::Away),
        _ => None,
    }
}
