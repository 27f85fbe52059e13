//! Category completion formula

/// Weight of tool coverage in the completion score
pub const TOOL_COVERAGE_WEIGHT: f64 = 0.7;

/// Weight of event volume in the completion score
pub const ACTIVITY_WEIGHT: f64 = 0.3;

/// Completion of one category, in [0, 100].
///
/// A deterministic function of the category's event history: the share of
/// its mapped tools that have been used successfully, plus the number of
/// successful events relative to the category's expected count.
pub fn completion_percentage(
    distinct_tools_used: usize,
    total_tools: usize,
    event_count: i64,
    expected_events: u32,
) -> f64 {
    let coverage = if total_tools == 0 {
        0.0
    } else {
        (distinct_tools_used as f64 / total_tools as f64).min(1.0)
    };
    let activity = if expected_events == 0 {
        0.0
    } else {
        (event_count.max(0) as f64 / f64::from(expected_events)).min(1.0)
    };

    let score = 100.0 * coverage * TOOL_COVERAGE_WEIGHT + 100.0 * activity * ACTIVITY_WEIGHT;
    round2(score.clamp(0.0, 100.0))
}

/// Mean of a set of completions; 0 for an empty set.
pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        round2(sum / count as f64)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
