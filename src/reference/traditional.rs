//! Nearest-to-mean reference selection.

use crate::config::TraditionalConfig;
use crate::metrics::stats::mean;
use crate::types::{ChannelSummary, ReferenceMethod};

use super::MethodPick;

/// Pick the candidate whose metric is closest to the candidates' mean.
///
/// Candidates without the metric are ignored; ties go to the earliest.
pub fn nearest_to_mean(
    candidates: &[&ChannelSummary],
    config: &TraditionalConfig,
) -> Option<MethodPick> {
    let present: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.metric(config.metric).map(|v| (i, v)))
        .collect();

    let values: Vec<f64> = present.iter().map(|(_, v)| *v).collect();
    let target = mean(&values)?;

    let mut best: Option<MethodPick> = None;
    for (index, value) in present {
        let distance = (value - target).abs();
        if best.map_or(true, |b| distance < b.score) {
            best = Some(MethodPick {
                method: ReferenceMethod::Traditional,
                index,
                score: distance,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::channel;

    #[test]
    fn test_nearest_to_mean() {
        let channels = vec![
            channel("1-1", 290.0),
            channel("2-1", 301.0),
            channel("3-1", 310.0),
        ];
        let refs: Vec<&ChannelSummary> = channels.iter().collect();

        // mean 300.33
        let pick = nearest_to_mean(&refs, &TraditionalConfig::default()).unwrap();
        assert_eq!(pick.index, 1);
        assert_eq!(pick.method, ReferenceMethod::Traditional);
    }

    #[test]
    fn test_tie_goes_to_first() {
        let channels = vec![channel("1-1", 290.0), channel("2-1", 310.0)];
        let refs: Vec<&ChannelSummary> = channels.iter().collect();
        let pick = nearest_to_mean(&refs, &TraditionalConfig::default()).unwrap();
        assert_eq!(pick.index, 0);
    }

    #[test]
    fn test_missing_metric_is_ignored() {
        let mut channels = vec![
            channel("1-1", 290.0),
            channel("2-1", 300.0),
            channel("3-1", 310.0),
        ];
        channels[1].first.discharge = None;
        let refs: Vec<&ChannelSummary> = channels.iter().collect();
        let pick = nearest_to_mean(&refs, &TraditionalConfig::default()).unwrap();
        assert_ne!(pick.index, 1);

        for c in &mut channels {
            c.first.discharge = None;
        }
        let refs: Vec<&ChannelSummary> = channels.iter().collect();
        assert!(nearest_to_mean(&refs, &TraditionalConfig::default()).is_none());
    }
}
