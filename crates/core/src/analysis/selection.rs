use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analysis::scoring::rank_order;
use crate::domain::candidate::Candidate;
use crate::domain::reason::{EngineError, ReasonCode, Rejection};

const SHARE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionConstraints {
    pub target_count: usize,
    pub max_industry_share: f64,
    pub min_industries: usize,
}

impl Default for SelectionConstraints {
    fn default() -> Self {
        Self {
            target_count: 8,
            max_industry_share: 0.5,
            min_industries: 3,
        }
    }
}

impl SelectionConstraints {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (6..=8).contains(&self.target_count),
            "SELECT_TARGET_COUNT must be within 6..=8 (got {})",
            self.target_count
        );
        anyhow::ensure!(
            self.max_industry_share > 0.0 && self.max_industry_share <= 0.5,
            "SELECT_MAX_INDUSTRY_SHARE must be within (0, 0.5] (got {})",
            self.max_industry_share
        );
        anyhow::ensure!(
            self.admits_one_per_industry(),
            "SELECT_MAX_INDUSTRY_SHARE {} leaves no room for even one member per industry out of {}",
            self.max_industry_share,
            self.target_count
        );
        anyhow::ensure!(
            self.min_industries >= 1 && self.min_industries <= self.target_count,
            "SELECT_MIN_INDUSTRIES must be within 1..={} (got {})",
            self.target_count,
            self.min_industries
        );
        Ok(())
    }

    /// Most members one industry may hold, measured against the eventual target count. Never
    /// below one; when the share cannot admit a single member, `select` flags the result.
    pub fn industry_cap(&self) -> usize {
        self.share_cap().max(1)
    }

    fn share_cap(&self) -> usize {
        (self.max_industry_share * self.target_count as f64 + SHARE_EPSILON).floor() as usize
    }

    pub fn admits_one_per_industry(&self) -> bool {
        self.share_cap() >= 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub selected: Vec<Candidate>,
    pub rejected: Vec<Rejection>,
    pub constraints_satisfied: bool,
    /// Empty when satisfied; otherwise which constraint could not be met.
    pub shortfall: Vec<ReasonCode>,
}

#[derive(Debug, Clone, Default)]
pub struct DiversificationSelector {
    constraints: SelectionConstraints,
}

impl DiversificationSelector {
    pub fn new(constraints: SelectionConstraints) -> Self {
        Self { constraints }
    }

    pub fn constraints(&self) -> &SelectionConstraints {
        &self.constraints
    }

    pub fn select(&self, mut candidates: Vec<Candidate>) -> SelectionResult {
        candidates.sort_by(rank_order);
        let cap = self.constraints.industry_cap();
        let target = self.constraints.target_count;

        let mut selected: Vec<Candidate> = Vec::new();
        let mut pool: Vec<(Candidate, Rejection)> = Vec::new();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();

        for c in candidates {
            let held = counts.get(&c.industry).copied().unwrap_or(0);
            if selected.len() >= target {
                let r = Rejection::new(&c.symbol, ReasonCode::TargetCountReached);
                pool.push((c, r));
            } else if held >= cap {
                let r = Rejection::new(&c.symbol, ReasonCode::IndustryCap).with_detail(format!(
                    "{} already holds {held} of {target} slots",
                    c.industry
                ));
                pool.push((c, r));
            } else {
                *counts.entry(c.industry.clone()).or_default() += 1;
                selected.push(c);
            }
        }

        // Backfill: trade a member of the most crowded industry for the best unrepresented one.
        while counts.len() < self.constraints.min_industries {
            let Some(incoming) = pool
                .iter()
                .position(|(c, _)| !counts.contains_key(&c.industry))
            else {
                break;
            };

            if selected.len() < target {
                let (c, _) = pool.remove(incoming);
                *counts.entry(c.industry.clone()).or_default() += 1;
                selected.push(c);
                continue;
            }

            let Some(outgoing) = crowded_victim(&selected, &counts) else {
                break;
            };

            let (c, _) = pool.remove(incoming);
            let out = selected.remove(outgoing);
            let admitted = c.industry.clone();
            tracing::debug!(
                swapped_out = %out.symbol,
                swapped_in = %c.symbol,
                "industry backfill swap"
            );
            if let Some(n) = counts.get_mut(&out.industry) {
                *n -= 1;
            }
            *counts.entry(c.industry.clone()).or_default() += 1;
            selected.push(c);

            let r = Rejection::new(&out.symbol, ReasonCode::TargetCountReached)
                .with_detail(format!("displaced to admit industry {admitted}"));
            pool.push((out, r));
        }

        selected.sort_by(rank_order);
        pool.sort_by(|a, b| rank_order(&a.0, &b.0));

        let mut shortfall = Vec::new();
        if !self.constraints.admits_one_per_industry() && !selected.is_empty() {
            shortfall.push(ReasonCode::IndustryCap);
        }
        if selected.len() < target {
            shortfall.push(ReasonCode::InsufficientCandidates);
        }
        if counts.len() < self.constraints.min_industries {
            shortfall.push(ReasonCode::TooFewIndustries);
        }
        let constraints_satisfied = shortfall.is_empty();
        if !constraints_satisfied {
            let err = EngineError::ConstraintInfeasible {
                reasons: shortfall.clone(),
            };
            tracing::warn!(
                selected = selected.len(),
                industries = counts.len(),
                target,
                "{err}"
            );
        }

        SelectionResult {
            selected,
            rejected: pool.into_iter().map(|(_, r)| r).collect(),
            constraints_satisfied,
            shortfall,
        }
    }
}

/// Index of the lowest-ranked member of the most represented industry holding at least two
/// members. Ties between equally crowded industries go to the one whose weakest member ranks
/// lower.
fn crowded_victim(selected: &[Candidate], counts: &BTreeMap<String, usize>) -> Option<usize> {
    let top = counts.values().copied().max().filter(|n| *n >= 2)?;
    selected
        .iter()
        .enumerate()
        .filter(|(_, c)| counts.get(&c.industry) == Some(&top))
        .max_by(|(_, a), (_, b)| rank_order(a, b))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::{DataCompleteness, DimensionScores, Tier};
    use std::collections::BTreeSet;

    fn cand(symbol: &str, industry: &str, score: f64) -> Candidate {
        Candidate {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            industry: industry.to_string(),
            dimension_scores: DimensionScores::uniform(score),
            composite_score: score,
            tier: Tier::from_score(score),
            completeness: DataCompleteness::default(),
        }
    }

    fn symbols(cs: &[Candidate]) -> Vec<&str> {
        cs.iter().map(|c| c.symbol.as_str()).collect()
    }

    fn industries(cs: &[Candidate]) -> BTreeMap<&str, usize> {
        let mut m = BTreeMap::new();
        for c in cs {
            *m.entry(c.industry.as_str()).or_default() += 1;
        }
        m
    }

    #[test]
    fn defaults_validate_and_cap_is_half_target() {
        let c = SelectionConstraints::default();
        c.validate().unwrap();
        assert_eq!(c.industry_cap(), 4);

        let bad = SelectionConstraints {
            target_count: 9,
            ..c
        };
        assert!(bad.validate().is_err());
        let bad = SelectionConstraints {
            max_industry_share: 0.6,
            ..c
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn diverse_pool_takes_top_scores() {
        let pool = vec![
            cand("A1", "semis", 90.0),
            cand("B1", "banks", 89.0),
            cand("C1", "shipping", 88.0),
            cand("A2", "semis", 87.0),
            cand("B2", "banks", 86.0),
            cand("C2", "shipping", 85.0),
            cand("A3", "semis", 84.0),
            cand("B3", "banks", 83.0),
            cand("C3", "shipping", 82.0),
        ];
        let out = DiversificationSelector::default().select(pool);
        assert!(out.constraints_satisfied);
        assert_eq!(out.selected.len(), 8);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].symbol, "C3");
        assert_eq!(out.rejected[0].reasons, vec![ReasonCode::TargetCountReached]);
    }

    #[test]
    fn industry_cap_skips_excess_members() {
        let mut pool: Vec<Candidate> = (0..6)
            .map(|i| cand(&format!("S{i}"), "semis", 95.0 - i as f64))
            .collect();
        pool.push(cand("B1", "banks", 70.0));
        pool.push(cand("B2", "banks", 69.0));
        pool.push(cand("T1", "telecom", 68.0));
        pool.push(cand("T2", "telecom", 67.0));

        let out = DiversificationSelector::default().select(pool);
        assert!(out.constraints_satisfied);
        assert_eq!(industries(&out.selected)["semis"], 4);
        let capped: Vec<&str> = out
            .rejected
            .iter()
            .filter(|r| r.reasons == vec![ReasonCode::IndustryCap])
            .map(|r| r.symbol.as_str())
            .collect();
        assert_eq!(capped, vec!["S4", "S5"]);
    }

    #[test]
    fn backfill_swaps_in_a_third_industry() {
        let mut pool = Vec::new();
        for i in 0..4 {
            pool.push(cand(&format!("A{i}"), "semis", 95.0 - i as f64));
            pool.push(cand(&format!("B{i}"), "banks", 90.0 - i as f64));
        }
        pool.push(cand("C0", "shipping", 66.0));

        let out = DiversificationSelector::default().select(pool);
        assert!(out.constraints_satisfied);
        assert_eq!(out.selected.len(), 8);
        assert!(symbols(&out.selected).contains(&"C0"));
        assert!(!symbols(&out.selected).contains(&"B3"));
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].symbol, "B3");
    }

    #[test]
    fn two_industry_pool_is_flagged_not_padded() {
        let mut pool = Vec::new();
        for i in 0..4 {
            pool.push(cand(&format!("A{i}"), "semis", 90.0 - i as f64));
            pool.push(cand(&format!("B{i}"), "banks", 80.0 - i as f64));
        }

        let out = DiversificationSelector::default().select(pool);
        assert!(!out.constraints_satisfied);
        assert_eq!(out.shortfall, vec![ReasonCode::TooFewIndustries]);
        assert_eq!(out.selected.len(), 8);
        assert_eq!(industries(&out.selected).len(), 2);
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn thin_pool_reports_insufficient_candidates() {
        let pool = vec![
            cand("A1", "semis", 90.0),
            cand("B1", "banks", 80.0),
            cand("C1", "shipping", 70.0),
        ];
        let out = DiversificationSelector::default().select(pool);
        assert!(!out.constraints_satisfied);
        assert_eq!(out.shortfall, vec![ReasonCode::InsufficientCandidates]);
        assert_eq!(out.selected.len(), 3);
    }

    #[test]
    fn empty_pool_reports_both_shortfalls() {
        let out = DiversificationSelector::default().select(Vec::new());
        assert!(out.selected.is_empty());
        assert_eq!(
            out.shortfall,
            vec![ReasonCode::InsufficientCandidates, ReasonCode::TooFewIndustries]
        );
    }

    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }
    }

    /// Exhaustive search over every subset of exactly `target_count` candidates.
    fn feasible(pool: &[Candidate], c: &SelectionConstraints) -> bool {
        if !c.admits_one_per_industry() {
            return false;
        }
        let cap = c.industry_cap();
        (0u32..(1 << pool.len()))
            .filter(|mask| mask.count_ones() as usize == c.target_count)
            .any(|mask| {
                let mut per: BTreeMap<&str, usize> = BTreeMap::new();
                for (i, cand) in pool.iter().enumerate() {
                    if mask & (1 << i) != 0 {
                        *per.entry(cand.industry.as_str()).or_default() += 1;
                    }
                }
                per.len() >= c.min_industries && per.values().all(|n| *n <= cap)
            })
    }

    #[test]
    fn satisfies_constraints_whenever_a_feasible_subset_exists() {
        let names = ["semis", "banks", "shipping", "steel", "biotech"];
        let mut rng = Lcg(0x5eed);

        for round in 0..150 {
            let target_count = 6 + rng.below(3) as usize;
            let constraints = SelectionConstraints {
                target_count,
                max_industry_share: [0.1, 0.15, 0.3, 0.4, 0.5][rng.below(5) as usize],
                min_industries: 3,
            };
            let industry_count = 3 + rng.below(3) as usize;
            let size = 8 + rng.below(8) as usize;
            // Skew toward the first industry so caps and backfill both get exercised.
            let pool: Vec<Candidate> = (0..size)
                .map(|i| {
                    let ind = if rng.below(2) == 0 {
                        0
                    } else {
                        rng.below(industry_count as u64) as usize
                    };
                    cand(
                        &format!("R{round}-{i}"),
                        names[ind],
                        40.0 + rng.below(6000) as f64 / 100.0,
                    )
                })
                .collect();

            let out = DiversificationSelector::new(constraints).select(pool.clone());
            let per = industries(&out.selected);
            let cap = constraints.industry_cap();

            assert!(
                per.values().all(|n| *n <= cap),
                "round {round}: cap {cap} violated: {per:?}"
            );
            assert_eq!(
                out.selected.len() + out.rejected.len(),
                pool.len(),
                "round {round}: every candidate is accounted for"
            );
            assert_eq!(
                out.constraints_satisfied,
                feasible(&pool, &constraints),
                "round {round}: feasibility mismatch for {per:?}"
            );
            if out.constraints_satisfied {
                assert_eq!(out.selected.len(), target_count);
                assert!(per.len() >= 3);
            }
            let unique: BTreeSet<&str> = symbols(&out.selected).into_iter().collect();
            assert_eq!(unique.len(), out.selected.len());
        }
    }

    #[test]
    fn share_below_one_member_is_rejected_and_flagged() {
        let c = SelectionConstraints {
            target_count: 6,
            max_industry_share: 0.1,
            min_industries: 3,
        };
        assert!(c.validate().is_err());
        let exact = SelectionConstraints {
            max_industry_share: 1.0 / 6.0,
            ..c
        };
        exact.validate().unwrap();
        assert_eq!(exact.industry_cap(), 1);

        let pool: Vec<Candidate> = ["semis", "banks", "shipping", "steel", "biotech", "retail"]
            .iter()
            .enumerate()
            .map(|(i, ind)| cand(&format!("{}", 2300 + i), ind, 80.0 - i as f64))
            .collect();
        let out = DiversificationSelector::new(c).select(pool);
        assert_eq!(out.selected.len(), 6);
        assert!(!out.constraints_satisfied);
        assert_eq!(out.shortfall, vec![ReasonCode::IndustryCap]);
    }
}
