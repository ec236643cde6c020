/// Aggregated preview confidence.
///
/// Starts from the average per-record confidence and applies capped,
/// additive adjustments; the result is clamped into `[0.30, 0.98]` and a
/// single-source preview always stays strictly below the ceiling.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceInputs {
    /// Average confidence across the grouped records.
    pub base: f64,
    /// Mean share of sources agreeing with the winning values.
    pub consensus_ratio: f64,
    /// Share of fields resolved without conflicts.
    pub agreement_ratio: f64,
    /// Mean winning field score.
    pub quality: f64,
    pub source_count: usize,
    /// Mean reliability of the winning values' sources.
    pub reliability: f64,
    /// Share of records matching the preferred language.
    pub language_ratio: f64,
    /// Share of fields that carried conflicts.
    pub disagreement_ratio: f64,
}

pub const CONFIDENCE_FLOOR: f64 = 0.30;
pub const CONFIDENCE_CEILING: f64 = 0.98;

const CONSENSUS_CAP: f64 = 0.15;
const AGREEMENT_CAP: f64 = 0.10;
const QUALITY_CAP: f64 = 0.10;
const QUALITY_THRESHOLD: f64 = 0.7;
const SOURCE_COUNT_BONUS: f64 = 0.05;
const SOURCE_COUNT_THRESHOLD: usize = 3;
const RELIABILITY_CAP: f64 = 0.08;
const RELIABILITY_THRESHOLD: f64 = 0.8;
const LANGUAGE_CAP: f64 = 0.30;
const DISAGREEMENT_CAP: f64 = 0.20;
/// A lone source cannot reach the ceiling.
const SINGLE_SOURCE_CEILING: f64 = 0.95;

pub fn aggregate(inputs: &ConfidenceInputs) -> f64 {
    let mut confidence = inputs.base;

    // Consensus needs at least two sources to mean anything.
    if inputs.source_count >= 2 {
        confidence += (inputs.consensus_ratio * CONSENSUS_CAP).min(CONSENSUS_CAP);
        confidence += (inputs.agreement_ratio * AGREEMENT_CAP).min(AGREEMENT_CAP);
    }
    if inputs.quality > QUALITY_THRESHOLD {
        let scaled = (inputs.quality - QUALITY_THRESHOLD) / (1.0 - QUALITY_THRESHOLD);
        confidence += (scaled * QUALITY_CAP).min(QUALITY_CAP);
    }
    if inputs.source_count >= SOURCE_COUNT_THRESHOLD {
        confidence += SOURCE_COUNT_BONUS;
    }
    if inputs.reliability > RELIABILITY_THRESHOLD {
        let scaled = (inputs.reliability - RELIABILITY_THRESHOLD) / (1.0 - RELIABILITY_THRESHOLD);
        confidence += (scaled * RELIABILITY_CAP).min(RELIABILITY_CAP);
    }
    confidence += (inputs.language_ratio * LANGUAGE_CAP).min(LANGUAGE_CAP);
    confidence -= (inputs.disagreement_ratio * DISAGREEMENT_CAP).min(DISAGREEMENT_CAP);

    let clamped = confidence.clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING);
    if inputs.source_count <= 1 {
        clamped.min(SINGLE_SOURCE_CEILING)
    } else {
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(base: f64, sources: usize) -> ConfidenceInputs {
        ConfidenceInputs {
            base,
            source_count: sources,
            ..ConfidenceInputs::default()
        }
    }

    #[test]
    fn test_clamped_into_the_contract_range() {
        let low = aggregate(&ConfidenceInputs {
            base: 0.05,
            disagreement_ratio: 1.0,
            ..inputs(0.05, 2)
        });
        assert!((low - CONFIDENCE_FLOOR).abs() < f64::EPSILON);

        let high = aggregate(&ConfidenceInputs {
            base: 0.95,
            consensus_ratio: 1.0,
            agreement_ratio: 1.0,
            quality: 1.0,
            reliability: 1.0,
            language_ratio: 1.0,
            ..inputs(0.95, 5)
        });
        assert!((high - CONFIDENCE_CEILING).abs() < f64::EPSILON);
    }

    #[test]
    fn test_single_source_stays_strictly_below_ceiling() {
        let value = aggregate(&ConfidenceInputs {
            base: 0.97,
            quality: 1.0,
            reliability: 1.0,
            language_ratio: 1.0,
            ..inputs(0.97, 1)
        });
        assert!(value < CONFIDENCE_CEILING);
    }

    #[test]
    fn test_monotone_in_agreeing_sources() {
        // Holding everything else equal, more agreeing sources never lower
        // the aggregate.
        let mut previous = 0.0;
        for sources in 1..=6usize {
            let consensus = (sources.saturating_sub(1)) as f64 / sources as f64;
            let value = aggregate(&ConfidenceInputs {
                base: 0.7,
                consensus_ratio: consensus,
                agreement_ratio: 1.0,
                quality: 0.75,
                reliability: 0.85,
                ..inputs(0.7, sources)
            });
            assert!(
                value >= previous,
                "confidence regressed at {sources} sources: {value} < {previous}"
            );
            previous = value;
        }
    }

    #[test]
    fn test_disagreement_penalty_is_capped() {
        let calm = aggregate(&inputs(0.8, 3));
        let noisy = aggregate(&ConfidenceInputs {
            disagreement_ratio: 1.0,
            ..inputs(0.8, 3)
        });
        assert!((calm - noisy - DISAGREEMENT_CAP).abs() < 1e-9);
    }

    #[test]
    fn test_thresholds_gate_bonuses() {
        let below = aggregate(&ConfidenceInputs {
            quality: 0.7,
            reliability: 0.8,
            ..inputs(0.6, 2)
        });
        let above = aggregate(&ConfidenceInputs {
            quality: 0.85,
            reliability: 0.9,
            ..inputs(0.6, 2)
        });
        assert!(above > below);
    }
}
