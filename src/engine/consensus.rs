//! Agreement arbitration across independent analyses.
//!
//! Decision table (n = number of valid opinions):
//! - n = 0: NO_CONSENSUS, no pick, confidence 0
//! - n = 1: SINGLE_SOURCE, confidence × 0.7
//! - n ≥ 2, one side holds a strict plurality with at least two supporters:
//!   STRONG_CONSENSUS, mean supporter confidence plus the consensus bonus
//!   scaled by the plurality margin (the full bonus when unanimous)
//! - otherwise (an even split): DISAGREEMENT, the highest-confidence opinion
//!   wins (earliest on ties), confidence × 0.8

use std::collections::HashSet;

use crate::db::models::{
    AgreementStatus, AnalysisOpinion, BaselineResult, ConsensusResult, ConsensusTier,
    GameContext, Pick, RiskLevel, Side, ValueRating,
};
use crate::engine::kelly::{capped_stake, expected_value, moneyline_to_price};

pub const CONSENSUS_BONUS: f64 = 0.15;
pub const DISAGREEMENT_DISCOUNT: f64 = 0.8;
pub const SINGLE_SOURCE_DISCOUNT: f64 = 0.7;
/// Share of the edge score added on top of confidence
const EDGE_WEIGHT: f64 = 0.15;
const MAX_SUCCESS_PROBABILITY: f64 = 0.95;
const MAX_LISTED_FACTORS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakeSettings {
    /// Fractional Kelly multiplier
    pub kelly_multiplier: f64,
    /// Safety ceiling on any single stake
    pub kelly_cap: f64,
}

impl Default for StakeSettings {
    fn default() -> Self {
        StakeSettings {
            kelly_multiplier: 1.0,
            kelly_cap: 0.25,
        }
    }
}

/// Build the consensus for one event. Total: degraded inputs degrade the
/// agreement status, never abort.
pub fn build_consensus(
    baseline: &BaselineResult,
    opinions: &[AnalysisOpinion],
    ctx: &GameContext,
    stake: StakeSettings,
) -> ConsensusResult {
    let Some(decision) = decide(opinions) else {
        return no_consensus();
    };

    let supporters: Vec<&AnalysisOpinion> = opinions
        .iter()
        .filter(|o| o.side == decision.side)
        .collect();

    let mut risk = supporters
        .iter()
        .map(|o| o.risk)
        .max()
        .unwrap_or(RiskLevel::High);
    if decision.agreement == AgreementStatus::Disagreement {
        risk = risk.max(RiskLevel::Medium);
    }

    let factors = distinct_factors(&supporters);
    let baseline_probability = baseline.side_probability(decision.side);
    let baseline_aligned = supporters.iter().any(|o| o.baseline_favoured);

    let confidence = decision.confidence;
    let factor_count: usize = opinions.iter().map(|o| o.factors.len()).sum();
    let edge_score = edge_score(confidence, factor_count, risk, baseline_aligned);
    let success_probability = (confidence + EDGE_WEIGHT * edge_score).min(MAX_SUCCESS_PROBABILITY);
    let value_rating = value_rating(edge_score);
    let tier = consensus_tier(confidence, decision.agreement, edge_score, success_probability);

    let price = ctx.moneyline(decision.side).and_then(moneyline_to_price);
    let kelly_fraction = price
        .map(|p| capped_stake(success_probability, p, stake.kelly_multiplier, stake.kelly_cap));
    let expected_value = price.map(|p| expected_value(success_probability, p));

    let team = ctx.team(decision.side).to_string();
    let mut reasoning = Vec::new();
    match decision.agreement {
        AgreementStatus::StrongConsensus if supporters.len() == opinions.len() => {
            reasoning.push(format!("All {} analyses agree on {}", opinions.len(), team));
        }
        AgreementStatus::StrongConsensus => {
            reasoning.push(format!(
                "{} of {} analyses favour {}",
                supporters.len(),
                opinions.len(),
                team
            ));
        }
        AgreementStatus::SingleSource => {
            reasoning.push(format!("Based on {} analysis only", decision.lead_provider));
        }
        _ => {}
    }
    if !factors.is_empty() {
        let listed: Vec<&str> = factors.iter().take(MAX_LISTED_FACTORS).map(String::as_str).collect();
        reasoning.push(format!("Key factors: {}", listed.join(", ")));
    }
    if decision.agreement == AgreementStatus::Disagreement {
        reasoning.push(format!(
            "Analyses disagree, using the higher-confidence pick from {} ({:.1}%)",
            decision.lead_provider,
            decision.lead_confidence * 100.0
        ));
    }
    if risk == RiskLevel::High {
        reasoning.push("High risk factors identified".to_string());
    }
    if baseline_aligned {
        reasoning.push(format!(
            "Statistical baseline agrees: {} at {:.1}%",
            team,
            baseline_probability * 100.0
        ));
    } else {
        reasoning.push(format!(
            "Statistical baseline does not back {} ({:.1}%)",
            team,
            baseline_probability * 100.0
        ));
    }
    reasoning.push(format!("Recommendation: {}", tier.action()));

    ConsensusResult {
        pick: Pick::Team {
            side: decision.side,
            team,
        },
        confidence,
        agreement: decision.agreement,
        edge_score,
        success_probability,
        value_rating,
        risk_level: risk,
        tier,
        kelly_fraction,
        expected_value,
        opinion_count: opinions.len(),
        reasoning,
    }
}

fn no_consensus() -> ConsensusResult {
    ConsensusResult {
        pick: Pick::NoPick,
        confidence: 0.0,
        agreement: AgreementStatus::NoConsensus,
        edge_score: 0.0,
        success_probability: 0.0,
        value_rating: ValueRating::Poor,
        risk_level: RiskLevel::High,
        tier: ConsensusTier::Skip,
        kelly_fraction: None,
        expected_value: None,
        opinion_count: 0,
        reasoning: vec!["No usable analysis, recommend skipping".to_string()],
    }
}

// ── Agreement ────────────────────────────────────────────────────────────────

struct Decision {
    side: Side,
    agreement: AgreementStatus,
    confidence: f64,
    lead_provider: String,
    lead_confidence: f64,
}

fn decide(opinions: &[AnalysisOpinion]) -> Option<Decision> {
    // Highest confidence, earliest on ties
    let lead = opinions.iter().fold(None::<&AnalysisOpinion>, |best, o| match best {
        Some(b) if b.confidence >= o.confidence => Some(b),
        _ => Some(o),
    })?;

    if opinions.len() == 1 {
        return Some(Decision {
            side: lead.side,
            agreement: AgreementStatus::SingleSource,
            confidence: lead.confidence * SINGLE_SOURCE_DISCOUNT,
            lead_provider: lead.provider.clone(),
            lead_confidence: lead.confidence,
        });
    }

    let home = opinions.iter().filter(|o| o.side == Side::Home).count();
    let away = opinions.len() - home;
    let (side, support, dissent) = if home >= away {
        (Side::Home, home, away)
    } else {
        (Side::Away, away, home)
    };

    if support > dissent && support >= 2 {
        let mean = opinions
            .iter()
            .filter(|o| o.side == side)
            .map(|o| o.confidence)
            .sum::<f64>()
            / support as f64;
        let bonus = CONSENSUS_BONUS * (support - dissent) as f64 / support as f64;
        return Some(Decision {
            side,
            agreement: AgreementStatus::StrongConsensus,
            confidence: (mean + bonus).min(1.0),
            lead_provider: lead.provider.clone(),
            lead_confidence: lead.confidence,
        });
    }

    Some(Decision {
        side: lead.side,
        agreement: AgreementStatus::Disagreement,
        confidence: lead.confidence * DISAGREEMENT_DISCOUNT,
        lead_provider: lead.provider.clone(),
        lead_confidence: lead.confidence,
    })
}

fn distinct_factors(opinions: &[&AnalysisOpinion]) -> Vec<String> {
    let mut seen = HashSet::new();
    opinions
        .iter()
        .flat_map(|o| o.factors.iter())
        .filter(|f| seen.insert(f.to_lowercase()))
        .cloned()
        .collect()
}

// ── Scores and tiers ─────────────────────────────────────────────────────────

pub fn edge_score(confidence: f64, factor_count: usize, risk: RiskLevel, baseline_aligned: bool) -> f64 {
    let mut edge: f64 = 0.0;
    edge += if confidence > 0.75 {
        0.3
    } else if confidence > 0.65 {
        0.2
    } else if confidence > 0.55 {
        0.1
    } else {
        0.0
    };
    edge += if factor_count >= 5 {
        0.2
    } else if factor_count >= 3 {
        0.1
    } else {
        0.0
    };
    edge += match risk {
        RiskLevel::Low => 0.15,
        RiskLevel::Medium => 0.05,
        RiskLevel::High => 0.0,
    };
    if baseline_aligned {
        edge += 0.1;
    }
    edge.clamp(0.0, 1.0)
}

pub fn value_rating(edge: f64) -> ValueRating {
    if edge >= 0.6 {
        ValueRating::Excellent
    } else if edge >= 0.4 {
        ValueRating::Good
    } else if edge >= 0.25 {
        ValueRating::Fair
    } else {
        ValueRating::Poor
    }
}

pub fn consensus_tier(
    confidence: f64,
    agreement: AgreementStatus,
    edge: f64,
    success_probability: f64,
) -> ConsensusTier {
    let strong = agreement == AgreementStatus::StrongConsensus;
    if confidence >= 0.8 && strong && edge >= 0.5 && success_probability >= 0.7 {
        ConsensusTier::VeryHigh
    } else if confidence >= 0.7
        && (strong || agreement == AgreementStatus::SingleSource)
        && edge >= 0.35
    {
        ConsensusTier::High
    } else if confidence >= 0.6 && edge >= 0.25 {
        ConsensusTier::Medium
    } else if confidence >= 0.5 {
        ConsensusTier::Low
    } else {
        ConsensusTier::Skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::baseline::compute_baseline;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn ctx() -> GameContext {
        GameContext {
            event_id: "evt-77".to_string(),
            sport: "NFL".to_string(),
            home_team: "Kansas City Chiefs".to_string(),
            away_team: "Buffalo Bills".to_string(),
            scheduled_at: Utc.with_ymd_and_hms(2026, 10, 18, 20, 25, 0).unwrap(),
            venue: None,
            home_moneyline: Some(-150),
            away_moneyline: Some(130),
            home_rating: Some(1550.0),
            away_rating: Some(1450.0),
            situation: Default::default(),
        }
    }

    fn opinion(provider: &str, side: Side, confidence: f64, risk: RiskLevel) -> AnalysisOpinion {
        let c = ctx();
        AnalysisOpinion {
            provider: provider.to_string(),
            side,
            team: c.team(side).to_string(),
            confidence,
            factors: vec!["Rest".to_string(), "Pass rush".to_string()],
            risk,
            baseline_favoured: side == Side::Home,
        }
    }

    #[test]
    fn two_agreeing_opinions_are_strong_consensus() {
        let c = ctx();
        let b = compute_baseline(&c);
        let ops = [
            opinion("alpha", Side::Home, 0.70, RiskLevel::Low),
            opinion("beta", Side::Home, 0.60, RiskLevel::Medium),
        ];
        let r = build_consensus(&b, &ops, &c, StakeSettings::default());
        assert_eq!(r.agreement, AgreementStatus::StrongConsensus);
        assert_eq!(r.pick.side(), Some(Side::Home));
        assert_relative_eq!(r.confidence, 0.65 + CONSENSUS_BONUS, epsilon = 1e-12);
        assert_eq!(r.risk_level, RiskLevel::Medium);
        assert_eq!(r.opinion_count, 2);
    }

    #[test]
    fn strong_consensus_caps_at_one() {
        let c = ctx();
        let b = compute_baseline(&c);
        let ops = [
            opinion("alpha", Side::Away, 0.95, RiskLevel::Low),
            opinion("beta", Side::Away, 0.92, RiskLevel::Low),
        ];
        let r = build_consensus(&b, &ops, &c, StakeSettings::default());
        assert_relative_eq!(r.confidence, 1.0);
        assert!(r.success_probability <= 0.95);
    }

    #[test]
    fn disagreement_takes_higher_confidence_with_discount() {
        let c = ctx();
        let b = compute_baseline(&c);
        let ops = [
            opinion("alpha", Side::Home, 0.62, RiskLevel::Low),
            opinion("beta", Side::Away, 0.74, RiskLevel::Low),
        ];
        let r = build_consensus(&b, &ops, &c, StakeSettings::default());
        assert_eq!(r.agreement, AgreementStatus::Disagreement);
        assert_eq!(r.pick.side(), Some(Side::Away));
        assert_relative_eq!(r.confidence, 0.74 * DISAGREEMENT_DISCOUNT, epsilon = 1e-12);
        assert!(r.confidence < 0.74);
        assert_eq!(r.risk_level, RiskLevel::Medium);
        assert!(r.reasoning.iter().any(|s| s.contains("disagree")));
    }

    #[test]
    fn disagreement_tie_goes_to_first_opinion() {
        let c = ctx();
        let b = compute_baseline(&c);
        let ops = [
            opinion("alpha", Side::Away, 0.7, RiskLevel::Low),
            opinion("beta", Side::Home, 0.7, RiskLevel::Low),
        ];
        let r = build_consensus(&b, &ops, &c, StakeSettings::default());
        assert_eq!(r.pick.side(), Some(Side::Away));
    }

    #[test]
    fn single_source_is_discounted() {
        let c = ctx();
        let b = compute_baseline(&c);
        let ops = [opinion("alpha", Side::Home, 0.80, RiskLevel::Low)];
        let r = build_consensus(&b, &ops, &c, StakeSettings::default());
        assert_eq!(r.agreement, AgreementStatus::SingleSource);
        assert_relative_eq!(r.confidence, 0.56, epsilon = 1e-12);
    }

    #[test]
    fn zero_opinions_is_no_pick() {
        let c = ctx();
        let b = compute_baseline(&c);
        let r = build_consensus(&b, &[], &c, StakeSettings::default());
        assert_eq!(r.pick, Pick::NoPick);
        assert_eq!(r.agreement, AgreementStatus::NoConsensus);
        assert_relative_eq!(r.confidence, 0.0);
        assert_eq!(r.tier, ConsensusTier::Skip);
        assert!(r.kelly_fraction.is_none());
    }

    #[test]
    fn two_to_one_plurality_scales_bonus() {
        let c = ctx();
        let b = compute_baseline(&c);
        let ops = [
            opinion("alpha", Side::Home, 0.70, RiskLevel::Low),
            opinion("beta", Side::Away, 0.90, RiskLevel::Low),
            opinion("gamma", Side::Home, 0.60, RiskLevel::Low),
        ];
        let r = build_consensus(&b, &ops, &c, StakeSettings::default());
        assert_eq!(r.agreement, AgreementStatus::StrongConsensus);
        assert_eq!(r.pick.side(), Some(Side::Home));
        assert_relative_eq!(r.confidence, 0.65 + CONSENSUS_BONUS / 2.0, epsilon = 1e-12);
        assert!(r.reasoning[0].starts_with("2 of 3"));
    }

    #[test]
    fn even_split_of_four_is_disagreement() {
        let c = ctx();
        let b = compute_baseline(&c);
        let ops = [
            opinion("a", Side::Home, 0.60, RiskLevel::Low),
            opinion("b", Side::Away, 0.66, RiskLevel::Low),
            opinion("c", Side::Home, 0.64, RiskLevel::Low),
            opinion("d", Side::Away, 0.61, RiskLevel::Low),
        ];
        let r = build_consensus(&b, &ops, &c, StakeSettings::default());
        assert_eq!(r.agreement, AgreementStatus::Disagreement);
        assert_eq!(r.pick.side(), Some(Side::Away));
    }

    #[test]
    fn edge_score_components() {
        assert_relative_eq!(edge_score(0.80, 5, RiskLevel::Low, true), 0.75, epsilon = 1e-12);
        assert_relative_eq!(edge_score(0.60, 3, RiskLevel::Medium, false), 0.25, epsilon = 1e-12);
        assert_relative_eq!(edge_score(0.50, 0, RiskLevel::High, false), 0.0);
    }

    #[test]
    fn factor_bonus_counts_every_opinion() {
        let c = ctx();
        let b = compute_baseline(&c);

        // Same two factors named twice: four in total
        let agree = [
            opinion("alpha", Side::Home, 0.70, RiskLevel::Low),
            opinion("beta", Side::Home, 0.60, RiskLevel::Medium),
        ];
        let r = build_consensus(&b, &agree, &c, StakeSettings::default());
        // 0.3 confidence + 0.1 factors + 0.05 medium risk + 0.1 baseline
        assert_relative_eq!(r.edge_score, 0.55, epsilon = 1e-12);

        let disagree = [
            opinion("alpha", Side::Home, 0.62, RiskLevel::Low),
            opinion("beta", Side::Away, 0.74, RiskLevel::Low),
        ];
        let r = build_consensus(&b, &disagree, &c, StakeSettings::default());
        // 0.1 confidence + 0.1 factors + 0.05 medium risk
        assert_relative_eq!(r.edge_score, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn value_and_tier_steps() {
        assert_eq!(value_rating(0.6), ValueRating::Excellent);
        assert_eq!(value_rating(0.45), ValueRating::Good);
        assert_eq!(value_rating(0.25), ValueRating::Fair);
        assert_eq!(value_rating(0.1), ValueRating::Poor);

        let strong = AgreementStatus::StrongConsensus;
        assert_eq!(consensus_tier(0.85, strong, 0.55, 0.9), ConsensusTier::VeryHigh);
        assert_eq!(
            consensus_tier(0.85, AgreementStatus::SingleSource, 0.55, 0.9),
            ConsensusTier::High
        );
        assert_eq!(
            consensus_tier(0.75, AgreementStatus::Disagreement, 0.55, 0.9),
            ConsensusTier::Medium
        );
        assert_eq!(consensus_tier(0.55, strong, 0.1, 0.6), ConsensusTier::Low);
        assert_eq!(consensus_tier(0.3, strong, 0.9, 0.9), ConsensusTier::Skip);
    }

    #[test]
    fn kelly_and_expected_value_use_pick_moneyline() {
        let c = ctx();
        let b = compute_baseline(&c);
        let ops = [
            opinion("alpha", Side::Home, 0.70, RiskLevel::Low),
            opinion("beta", Side::Home, 0.70, RiskLevel::Low),
        ];
        let settings = StakeSettings {
            kelly_multiplier: 0.5,
            kelly_cap: 0.05,
        };
        let r = build_consensus(&b, &ops, &c, settings);
        let price = 0.6; // -150
        assert_relative_eq!(
            r.kelly_fraction.unwrap(),
            capped_stake(r.success_probability, price, 0.5, 0.05),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            r.expected_value.unwrap(),
            r.success_probability / price - 1.0,
            epsilon = 1e-12
        );
        assert!(r.kelly_fraction.unwrap() <= 0.05);
    }

    #[test]
    fn missing_moneyline_means_no_stake() {
        let mut c = ctx();
        c.away_moneyline = None;
        let b = compute_baseline(&c);
        let r = build_consensus(&b, &[opinion("alpha", Side::Away, 0.8, RiskLevel::Low)], &c, StakeSettings::default());
        assert!(r.kelly_fraction.is_none());
        assert!(r.expected_value.is_none());
    }
}
