use serde_json::Value;

/// One record's contribution to a field.
#[derive(Debug, Clone)]
pub struct FieldInput {
    /// Value as it should be displayed if this group wins.
    pub display: Value,
    /// Group key; inputs with equal keys agree.
    pub normalized: String,
    pub source: String,
    pub confidence: f64,
    pub reliability: f64,
    pub preferred_language: bool,
}

/// An aggregated candidate value for a field.
#[derive(Debug, Clone)]
pub struct CandidateValue {
    pub display: Value,
    pub normalized: String,
    pub sources: Vec<String>,
    pub source_count: usize,
    pub total_confidence: f64,
    pub preferred_language_count: usize,
    pub reliability_sum: f64,
}

impl CandidateValue {
    pub fn average_confidence(&self) -> f64 {
        self.total_confidence / self.source_count.max(1) as f64
    }

    pub fn average_reliability(&self) -> f64 {
        self.reliability_sum / self.source_count.max(1) as f64
    }
}

/// The winning candidate with everything needed to build a proposal.
#[derive(Debug, Clone)]
pub struct FieldSelection {
    pub winner: CandidateValue,
    pub rejected: Vec<CandidateValue>,
    pub score: f64,
    pub reasoning: String,
    /// Share of contributing sources that agree with the winner.
    pub agreement: f64,
}

// Field score weights: consensus is capped at four agreeing sources, the
// language bonus dominates reliability by design.
const CONSENSUS_WEIGHT: f64 = 0.35;
const CONFIDENCE_WEIGHT: f64 = 0.25;
const LANGUAGE_WEIGHT: f64 = 0.30;
const RELIABILITY_WEIGHT: f64 = 0.25;
const AGREEMENT_WEIGHT: f64 = 0.15;

const CONSENSUS_SOURCE_CAP: usize = 4;
/// Two candidates within this score distance are compared by preferred
/// language and, in a narrower window, reliability.
const LANGUAGE_TIEBREAK_WINDOW: f64 = 0.2;
const RELIABILITY_TIEBREAK_WINDOW: f64 = 0.15;
const RELIABILITY_TIEBREAK_DELTA: f64 = 0.05;
const STRONG_CONSENSUS_RATIO: f64 = 0.6;

/// Groups per-record inputs into candidates by their normalized value.
pub fn group(inputs: Vec<FieldInput>) -> Vec<CandidateValue> {
    let mut candidates: Vec<CandidateValue> = Vec::new();
    for input in inputs {
        match candidates
            .iter_mut()
            .find(|candidate| candidate.normalized == input.normalized)
        {
            Some(candidate) => {
                candidate.source_count += 1;
                candidate.total_confidence += input.confidence;
                candidate.reliability_sum += input.reliability;
                if input.preferred_language {
                    candidate.preferred_language_count += 1;
                }
                if !candidate.sources.contains(&input.source) {
                    candidate.sources.push(input.source);
                }
            }
            None => candidates.push(CandidateValue {
                display: input.display,
                normalized: input.normalized,
                sources: vec![input.source],
                source_count: 1,
                total_confidence: input.confidence,
                preferred_language_count: usize::from(input.preferred_language),
                reliability_sum: input.reliability,
            }),
        }
    }
    candidates
}

/// Final score of one candidate against the whole input set.
pub fn score(candidate: &CandidateValue, total_sources: usize) -> f64 {
    let consensus = CONSENSUS_WEIGHT
        * (candidate.source_count.min(CONSENSUS_SOURCE_CAP) as f64 / CONSENSUS_SOURCE_CAP as f64);
    let confidence = CONFIDENCE_WEIGHT * candidate.average_confidence();
    let language = LANGUAGE_WEIGHT
        * (candidate.preferred_language_count as f64 / candidate.source_count.max(1) as f64);
    let reliability = RELIABILITY_WEIGHT * candidate.average_reliability();
    let agreement =
        AGREEMENT_WEIGHT * (candidate.source_count as f64 / total_sources.max(1) as f64);
    consensus + confidence + language + reliability + agreement
}

/// Picks the winning candidate.
///
/// Highest score wins outright; near-ties resolve in order by strong
/// consensus, preferred-language support, reliability, then average
/// confidence.
pub fn select(candidates: Vec<CandidateValue>, total_sources: usize) -> Option<FieldSelection> {
    if candidates.is_empty() {
        return None;
    }

    let mut scored: Vec<(CandidateValue, f64)> = candidates
        .into_iter()
        .map(|candidate| {
            let value = score(&candidate, total_sources);
            (candidate, value)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut best_index = 0;
    for challenger_index in 1..scored.len() {
        if prefer_challenger(
            &scored[best_index],
            &scored[challenger_index],
            total_sources,
        ) {
            best_index = challenger_index;
        }
    }

    let (winner, winning_score) = scored.swap_remove(best_index);
    let rejected: Vec<CandidateValue> = scored.into_iter().map(|(candidate, _)| candidate).collect();
    let agreement = winner.source_count as f64 / total_sources.max(1) as f64;
    let reasoning = if rejected.is_empty() {
        format!(
            "{} of {} sources agree, no disagreement",
            winner.source_count, total_sources
        )
    } else {
        format!(
            "{} of {} sources agree over {} competing value(s)",
            winner.source_count,
            total_sources,
            rejected.len()
        )
    };

    Some(FieldSelection {
        winner,
        rejected,
        score: winning_score,
        reasoning,
        agreement,
    })
}

fn prefer_challenger(
    best: &(CandidateValue, f64),
    challenger: &(CandidateValue, f64),
    total_sources: usize,
) -> bool {
    let (best_candidate, best_score) = best;
    let (challenger_candidate, challenger_score) = challenger;
    let gap = best_score - challenger_score;

    if gap > LANGUAGE_TIEBREAK_WINDOW {
        return false;
    }

    // (a) strong consensus beats a slightly higher score
    let best_strong =
        best_candidate.source_count as f64 / total_sources.max(1) as f64 > STRONG_CONSENSUS_RATIO;
    let challenger_strong = challenger_candidate.source_count as f64 / total_sources.max(1) as f64
        > STRONG_CONSENSUS_RATIO;
    if challenger_strong != best_strong {
        return challenger_strong;
    }

    // (b) preferred-language support
    let language_delta = challenger_candidate.preferred_language_count as i64
        - best_candidate.preferred_language_count as i64;
    if language_delta.abs() >= 1 {
        return language_delta > 0;
    }

    // (c) reliability, in a narrower window
    if gap <= RELIABILITY_TIEBREAK_WINDOW {
        let reliability_delta =
            challenger_candidate.average_reliability() - best_candidate.average_reliability();
        if reliability_delta.abs() >= RELIABILITY_TIEBREAK_DELTA {
            return reliability_delta > 0.0;
        }
    }

    // (d) highest average confidence
    challenger_candidate.average_confidence() > best_candidate.average_confidence() && gap <= 0.0
}
