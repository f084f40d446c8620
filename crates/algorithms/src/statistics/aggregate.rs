//! Reduction of pixel samples into zone statistics

use crate::extract::PixelSample;
use crate::statistics::Statistic;

/// Statistics of one (zone, layer) pair
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticResult {
    values: Vec<(Statistic, Option<f64>)>,
    /// Samples that contributed
    pub valid_pixel_count: usize,
    /// Sum of the contributing samples' weights
    pub total_weight: f64,
}

impl StatisticResult {
    /// All-"no data" result for `requested`
    pub fn empty(requested: &[Statistic]) -> Self {
        Self {
            values: requested.iter().map(|&s| (s, None)).collect(),
            valid_pixel_count: 0,
            total_weight: 0.0,
        }
    }

    /// Value of `stat`; `None` when it is "no data" or was not requested
    pub fn get(&self, stat: Statistic) -> Option<f64> {
        self.values
            .iter()
            .find(|(s, _)| *s == stat)
            .and_then(|(_, v)| *v)
    }

    /// (statistic, value) pairs in request order
    pub fn iter(&self) -> impl Iterator<Item = (Statistic, Option<f64>)> + '_ {
        self.values.iter().copied()
    }
}

/// Single-pass accumulator.
///
/// Mean and variance use West's weighted form of Welford's update, so large
/// offsets do not cancel. Order statistics keep the raw values and only
/// when one was requested.
#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    weighted: bool,
    count: usize,
    weight_sum: f64,
    weighted_sum: f64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    values: Option<Vec<f64>>,
}

impl StatsAccumulator {
    /// With `weighted == false` every sample counts as weight 1
    pub fn new(weighted: bool, keep_values: bool) -> Self {
        Self {
            weighted,
            count: 0,
            weight_sum: 0.0,
            weighted_sum: 0.0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            values: keep_values.then(Vec::new),
        }
    }

    pub fn push(&mut self, sample: PixelSample) {
        let w = if self.weighted { sample.weight } else { 1.0 };
        if !(w > 0.0) || !sample.value.is_finite() {
            return;
        }
        let x = sample.value;

        self.count += 1;
        self.weight_sum += w;
        self.weighted_sum += w * x;
        let delta = x - self.mean;
        self.mean += (w / self.weight_sum) * delta;
        self.m2 += w * delta * (x - self.mean);

        self.min = self.min.min(x);
        self.max = self.max.max(x);
        if let Some(values) = self.values.as_mut() {
            values.push(x);
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Resolve the requested statistics
    pub fn finish(mut self, requested: &[Statistic]) -> StatisticResult {
        if self.count == 0 {
            return StatisticResult::empty(requested);
        }

        if let Some(values) = self.values.as_mut() {
            values.sort_by(f64::total_cmp);
        }
        let sorted = self.values.as_deref().unwrap_or(&[]);

        let mean = self.weighted_sum / self.weight_sum;
        let variance = (self.m2 / self.weight_sum).max(0.0);
        let std = variance.sqrt();

        let values = requested
            .iter()
            .map(|&stat| {
                let v = match stat {
                    Statistic::Mean => Some(mean),
                    Statistic::Sum => Some(self.weighted_sum),
                    Statistic::Min => Some(self.min),
                    Statistic::Max => Some(self.max),
                    Statistic::Range => Some(self.max - self.min),
                    Statistic::Count => Some(self.weight_sum),
                    Statistic::Variance => Some(variance),
                    Statistic::StdDev => Some(std),
                    Statistic::Cv => (mean != 0.0).then(|| std / mean * 100.0),
                    Statistic::Median => percentile(sorted, 50.0),
                    Statistic::Percentile(p) => percentile(sorted, p),
                    Statistic::Mode => frequency_extreme(sorted, true),
                    Statistic::Minority => frequency_extreme(sorted, false),
                    Statistic::Variety => (!sorted.is_empty()).then(|| distinct(sorted) as f64),
                    // Zone-level, filled in by the caller from the coverage mask
                    Statistic::CoverageFraction => None,
                };
                (stat, v.filter(|x| x.is_finite()))
            })
            .collect();

        StatisticResult {
            values,
            valid_pixel_count: self.count,
            total_weight: self.weight_sum,
        }
    }
}

/// Reduce `samples` into the requested statistics
pub fn aggregate<I>(samples: I, requested: &[Statistic], weighted: bool) -> StatisticResult
where
    I: IntoIterator<Item = PixelSample>,
{
    let keep = requested.iter().any(Statistic::needs_values);
    let mut acc = StatsAccumulator::new(weighted, keep);
    for sample in samples {
        acc.push(sample);
    }
    acc.finish(requested)
}

/// Linear interpolation between closest ranks over sorted values
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Most (or least) frequent value of sorted input; smallest value on ties
fn frequency_extreme(sorted: &[f64], most: bool) -> Option<f64> {
    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let v = sorted[i];
        let mut j = i;
        while j < sorted.len() && sorted[j] == v {
            j += 1;
        }
        let run = j - i;
        let better = match best {
            None => true,
            Some((_, n)) if most => run > n,
            Some((_, n)) => run < n,
        };
        if better {
            best = Some((v, run));
        }
        i = j;
    }
    best.map(|(v, _)| v)
}

fn distinct(sorted: &[f64]) -> usize {
    let mut n = 0;
    let mut prev: Option<f64> = None;
    for &v in sorted {
        if prev != Some(v) {
            n += 1;
            prev = Some(v);
        }
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit(values: &[f64]) -> Vec<PixelSample> {
        values.iter().map(|&value| PixelSample { value, weight: 1.0 }).collect()
    }

    const ALL: [Statistic; 14] = [
        Statistic::Mean,
        Statistic::Sum,
        Statistic::Min,
        Statistic::Max,
        Statistic::Median,
        Statistic::Mode,
        Statistic::Minority,
        Statistic::Variety,
        Statistic::StdDev,
        Statistic::Variance,
        Statistic::Cv,
        Statistic::Range,
        Statistic::Percentile(25.0),
        Statistic::Count,
    ];

    #[test]
    fn test_uniform_block() {
        let r = aggregate(unit(&[5.0; 100]), &ALL, false);
        assert_eq!(r.valid_pixel_count, 100);
        assert_eq!(r.get(Statistic::Mean), Some(5.0));
        assert_eq!(r.get(Statistic::Sum), Some(500.0));
        assert_eq!(r.get(Statistic::StdDev), Some(0.0));
        assert_eq!(r.get(Statistic::Cv), Some(0.0));
        assert_eq!(r.get(Statistic::Variety), Some(1.0));
        assert_eq!(r.get(Statistic::Count), Some(100.0));
    }

    #[test]
    fn test_known_values() {
        let r = aggregate(unit(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), &ALL, false);
        assert_relative_eq!(r.get(Statistic::Mean).unwrap(), 5.0);
        assert_relative_eq!(r.get(Statistic::StdDev).unwrap(), 2.0);
        assert_relative_eq!(r.get(Statistic::Variance).unwrap(), 4.0);
        assert_relative_eq!(r.get(Statistic::Median).unwrap(), 4.5);
        assert_relative_eq!(r.get(Statistic::Percentile(25.0)).unwrap(), 4.0);
        assert_eq!(r.get(Statistic::Mode), Some(4.0));
        assert_eq!(r.get(Statistic::Minority), Some(2.0));
        assert_eq!(r.get(Statistic::Variety), Some(5.0));
        assert_eq!(r.get(Statistic::Range), Some(7.0));
        assert_relative_eq!(r.get(Statistic::Cv).unwrap(), 40.0);
    }

    #[test]
    fn test_empty_is_all_no_data() {
        let r = aggregate(Vec::new(), &ALL, true);
        assert_eq!(r.valid_pixel_count, 0);
        assert!(r.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_cv_no_data_when_mean_zero() {
        let r = aggregate(unit(&[-1.0, 1.0]), &[Statistic::Cv, Statistic::StdDev], false);
        assert_eq!(r.get(Statistic::Cv), None);
        assert_eq!(r.get(Statistic::StdDev), Some(1.0));
    }

    #[test]
    fn test_weighted_mean_is_sum_over_count() {
        let samples = vec![
            PixelSample { value: 10.0, weight: 0.25 },
            PixelSample { value: 20.0, weight: 1.0 },
            PixelSample { value: 40.0, weight: 0.5 },
        ];
        let stats = [Statistic::Mean, Statistic::Sum, Statistic::Count, Statistic::Variance];
        let r = aggregate(samples.clone(), &stats, true);
        let (mean, sum, count) = (
            r.get(Statistic::Mean).unwrap(),
            r.get(Statistic::Sum).unwrap(),
            r.get(Statistic::Count).unwrap(),
        );
        assert_relative_eq!(count, 1.75);
        assert_relative_eq!(sum, 42.5);
        assert_relative_eq!(mean, sum / count);

        // Weighted population variance
        let expected = samples
            .iter()
            .map(|s| s.weight * (s.value - mean).powi(2))
            .sum::<f64>()
            / count;
        assert_relative_eq!(r.get(Statistic::Variance).unwrap(), expected, epsilon = 1e-9);

        let unweighted = aggregate(samples, &stats, false);
        assert_eq!(unweighted.get(Statistic::Count), Some(3.0));
    }

    #[test]
    fn test_variance_is_stable_with_large_offset() {
        let base = 1.0e9;
        let r = aggregate(unit(&[base + 4.0, base + 7.0, base + 13.0, base + 16.0]), &[Statistic::Variance], false);
        assert_relative_eq!(r.get(Statistic::Variance).unwrap(), 22.5, epsilon = 1e-6);
    }

    #[test]
    fn test_mode_tie_picks_smallest() {
        let r = aggregate(unit(&[3.0, 1.0, 3.0, 1.0, 2.0]), &[Statistic::Mode, Statistic::Minority], false);
        assert_eq!(r.get(Statistic::Mode), Some(1.0));
        assert_eq!(r.get(Statistic::Minority), Some(2.0));
    }
}
