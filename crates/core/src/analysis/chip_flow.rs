use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::flow::{FlowSeries, InvestorSet};

/// How small a day's net flow must be to count as noise inside a streak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseThreshold {
    /// Fraction of the window's mean absolute daily net.
    Relative(f64),
    /// Fixed size in lots.
    Absolute(i64),
}

impl Default for NoiseThreshold {
    fn default() -> Self {
        NoiseThreshold::Relative(0.10)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowOptions {
    pub lookback_days: usize,
    pub noise: NoiseThreshold,
    pub investors: InvestorSet,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            lookback_days: 10,
            noise: NoiseThreshold::default(),
            investors: InvestorSet::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakDirection {
    Buying,
    Selling,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakState {
    pub symbol: String,
    pub direction: StreakDirection,
    /// Trading days spanned by the trailing streak, tolerated noise days included.
    pub run_length: usize,
    pub tolerated_days: usize,
    pub cumulative_net: i64,
    pub early_window_net: i64,
    pub late_window_net: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    /// late_window_net / early_window_net.
    Ratio(f64),
    /// Early half was flat; any late flow is new interest.
    New,
    /// Both halves flat.
    Flat,
}

/// Flow classification, declared from least to most bullish so `Ord` follows bullishness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowTrend {
    Distribution,
    Reversing,
    Neutral,
    LeaningBullish,
    Buying,
    Accumulation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestorAlignment {
    BothBuying,
    BothSelling,
    Opposed,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStats {
    pub streak: StreakState,
    pub momentum: Momentum,
    pub trend: FlowTrend,
    pub buy_days: usize,
    pub sell_days: usize,
    pub foreign_net: i64,
    pub trust_net: i64,
    pub dealer_net: i64,
    pub alignment: InvestorAlignment,
    pub max_buy: Option<(NaiveDate, i64)>,
    pub max_sell: Option<(NaiveDate, i64)>,
    /// Daily nets of the analyzed window, oldest first.
    pub daily_nets: Vec<i64>,
    /// Absolute net below which a day counted as noise.
    pub noise_limit: f64,
}

impl FlowStats {
    pub fn is_noise(&self, net: i64) -> bool {
        (net.abs() as f64) < self.noise_limit
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChipFlowAnalyzer {
    options: FlowOptions,
}

impl ChipFlowAnalyzer {
    pub fn new(options: FlowOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FlowOptions {
        &self.options
    }

    /// Recomputes everything from the trailing window. Returns `None` for an empty series.
    pub fn analyze(&self, series: &FlowSeries) -> Option<FlowStats> {
        let window = series.window(self.options.lookback_days);
        if window.is_empty() {
            return None;
        }

        let nets: Vec<i64> = window.iter().map(|s| self.options.investors.net(s)).collect();
        let noise_limit = noise_limit(&nets, self.options.noise);
        let (direction, run_length, tolerated_days) = trailing_streak(&nets, noise_limit);

        let cumulative_net: i64 = nets.iter().sum();
        let half = nets.len() / 2;
        let early_window_net: i64 = nets[..half].iter().sum();
        let late_window_net: i64 = nets[nets.len() - half..].iter().sum();

        let momentum = if early_window_net != 0 {
            Momentum::Ratio(late_window_net as f64 / early_window_net as f64)
        } else if late_window_net != 0 {
            Momentum::New
        } else {
            Momentum::Flat
        };

        let trend = classify(direction, run_length, cumulative_net);

        let foreign_net = window.iter().map(|s| s.foreign_net).sum::<i64>();
        let trust_net = window.iter().map(|s| s.trust_net).sum::<i64>();
        let dealer_net = window.iter().map(|s| s.dealer_net).sum::<i64>();
        let alignment = match (foreign_net.signum(), trust_net.signum()) {
            (1, 1) => InvestorAlignment::BothBuying,
            (-1, -1) => InvestorAlignment::BothSelling,
            (1, -1) | (-1, 1) => InvestorAlignment::Opposed,
            _ => InvestorAlignment::Mixed,
        };

        let dated = window.iter().zip(nets.iter().copied());
        let max_buy = dated
            .clone()
            .filter(|(_, n)| *n > 0)
            .max_by_key(|(_, n)| *n)
            .map(|(s, n)| (s.date, n));
        let max_sell = dated
            .filter(|(_, n)| *n < 0)
            .min_by_key(|(_, n)| *n)
            .map(|(s, n)| (s.date, n));

        Some(FlowStats {
            streak: StreakState {
                symbol: series.symbol().to_string(),
                direction,
                run_length,
                tolerated_days,
                cumulative_net,
                early_window_net,
                late_window_net,
            },
            momentum,
            trend,
            buy_days: nets.iter().filter(|n| **n > 0).count(),
            sell_days: nets.iter().filter(|n| **n < 0).count(),
            foreign_net,
            trust_net,
            dealer_net,
            alignment,
            max_buy,
            max_sell,
            daily_nets: nets,
            noise_limit,
        })
    }
}

fn noise_limit(nets: &[i64], threshold: NoiseThreshold) -> f64 {
    match threshold {
        NoiseThreshold::Absolute(lots) => lots.max(0) as f64,
        NoiseThreshold::Relative(ratio) => {
            if nets.is_empty() || !ratio.is_finite() || ratio <= 0.0 {
                return 0.0;
            }
            let mean_abs = nets.iter().map(|n| n.abs() as f64).sum::<f64>() / nets.len() as f64;
            ratio * mean_abs
        }
    }
}

/// Walks newest to oldest. The direction comes from the newest non-noise day (looking past
/// at most one leading noise day). A single noise day that disagrees with the direction is
/// tolerated when an agreeing day follows it; two in a row end the streak.
fn trailing_streak(nets: &[i64], noise_limit: f64) -> (StreakDirection, usize, usize) {
    let is_noise = |x: i64| (x.abs() as f64) < noise_limit;
    let strong = |x: i64| x != 0 && !is_noise(x);
    let days: Vec<i64> = nets.iter().rev().copied().collect();

    let sign = match days.as_slice() {
        [first, ..] if strong(*first) => first.signum(),
        [_, second, ..] if strong(*second) => second.signum(),
        [first, ..] => first.signum(),
        [] => 0,
    };
    let direction = match sign {
        1 => StreakDirection::Buying,
        -1 => StreakDirection::Selling,
        _ => return (StreakDirection::None, 0, 0),
    };

    let mut run = 0;
    let mut tolerated = 0;
    let mut unconfirmed = 0;
    let mut prev_tolerated = false;
    for (i, &x) in days.iter().enumerate() {
        if x.signum() == sign {
            run = i + 1;
            tolerated += unconfirmed;
            unconfirmed = 0;
            prev_tolerated = false;
        } else if is_noise(x) && !prev_tolerated {
            unconfirmed += 1;
            prev_tolerated = true;
        } else {
            break;
        }
    }

    (direction, run, tolerated)
}

fn classify(direction: StreakDirection, run_length: usize, cumulative_net: i64) -> FlowTrend {
    let buying = direction == StreakDirection::Buying;
    if buying && run_length >= 5 && cumulative_net > 0 {
        FlowTrend::Accumulation
    } else if buying && run_length >= 3 && cumulative_net > 0 {
        FlowTrend::Buying
    } else if cumulative_net > 0 && direction == StreakDirection::Selling {
        FlowTrend::Reversing
    } else if cumulative_net > 0 {
        FlowTrend::LeaningBullish
    } else if cumulative_net < 0 && direction == StreakDirection::Selling {
        FlowTrend::Distribution
    } else {
        FlowTrend::Neutral
    }
}
