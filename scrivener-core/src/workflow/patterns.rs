//! Usage pattern classification over a window of recent events

use crate::config::WorkflowConfig;
use crate::taxonomy::Taxonomy;
use crate::types::{PatternType, ToolInvocationEvent};
use std::collections::{BTreeSet, HashMap};

/// Classification of a window plus the numbers that decided it
#[derive(Debug, Clone, PartialEq)]
pub struct PatternAnalysis {
    pub pattern: PatternType,
    /// Tool that tripped the repetition rule
    pub repeated_tool: Option<String>,
    /// Transitions between different tools
    pub transitions: usize,
    /// Of those, transitions following a taxonomy edge
    pub edge_transitions: usize,
    /// Distinct taxonomy acts in the window
    pub distinct_acts: usize,
}

/// Classify `window` (oldest first). Rules are checked in order:
/// repetitive, logical progression, exploratory, undetermined.
pub fn classify(
    window: &[ToolInvocationEvent],
    taxonomy: &Taxonomy,
    config: &WorkflowConfig,
) -> PatternAnalysis {
    let repeated_tool = most_repeated(window, config.repetition_threshold);

    let mut transitions = 0;
    let mut edge_transitions = 0;
    for pair in window.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.tool_name == next.tool_name {
            continue;
        }
        transitions += 1;
        let from = taxonomy.find_category(&prev.research_act, &prev.research_category);
        let to = taxonomy.find_category(&next.research_act, &next.research_category);
        if let (Some(from), Some(to)) = (from, to) {
            if taxonomy.is_edge(from, to) {
                edge_transitions += 1;
            }
        }
    }

    let distinct_acts = window
        .iter()
        .filter(|e| {
            taxonomy
                .find_category(&e.research_act, &e.research_category)
                .is_some()
        })
        .map(|e| e.research_act.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    let pattern = if repeated_tool.is_some() {
        PatternType::Repetitive
    } else if transitions > 0 && edge_transitions * 2 >= transitions {
        PatternType::LogicalProgression
    } else if distinct_acts >= config.exploration_min_acts {
        PatternType::Exploratory
    } else {
        PatternType::Undetermined
    };

    PatternAnalysis {
        pattern,
        repeated_tool,
        transitions,
        edge_transitions,
        distinct_acts,
    }
}

/// Most frequent tool appearing at least `threshold` times; ties go to the
/// one used most recently.
fn most_repeated(window: &[ToolInvocationEvent], threshold: usize) -> Option<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, event) in window.iter().enumerate() {
        let entry = counts.entry(event.tool_name.as_str()).or_insert((0, pos));
        entry.0 += 1;
        entry.1 = pos;
    }

    counts
        .into_iter()
        .filter(|(_, (count, _))| *count >= threshold)
        .max_by_key(|(_, (count, last))| (*count, *last))
        .map(|(tool, _)| tool.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use chrono::Utc;

    fn events(taxonomy: &Taxonomy, tools: &[&str]) -> Vec<ToolInvocationEvent> {
        tools
            .iter()
            .enumerate()
            .map(|(i, tool)| {
                let class = taxonomy.classify(tool);
                ToolInvocationEvent {
                    id: i as i64 + 1,
                    seq: i as i64 + 1,
                    kind: EventKind::Invocation,
                    session_id: None,
                    tool_name: tool.to_string(),
                    research_act: class.act,
                    research_category: class.category,
                    args_digest: String::new(),
                    result_summary: None,
                    execution_time_ms: 1,
                    success: true,
                    error_message: None,
                    timestamp: Utc::now(),
                }
            })
            .collect()
    }

    #[test]
    fn test_repetitive() {
        let taxonomy = Taxonomy::builtin().unwrap();
        let window = events(&taxonomy, &["X", "X", "X"]);
        let analysis = classify(&window, &taxonomy, &WorkflowConfig::default());
        assert_eq!(analysis.pattern, PatternType::Repetitive);
        assert_eq!(analysis.repeated_tool.as_deref(), Some("X"));
    }

    #[test]
    fn test_logical_progression() {
        let taxonomy = Taxonomy::builtin().unwrap();
        // Problem Framing -> Methodology Selection -> Project Planning
        let window = events(
            &taxonomy,
            &[
                "clarify_research_goals",
                "suggest_methodology",
                "timeline_planner",
            ],
        );
        let analysis = classify(&window, &taxonomy, &WorkflowConfig::default());
        assert_eq!(analysis.transitions, 2);
        assert_eq!(analysis.edge_transitions, 2);
        assert_eq!(analysis.pattern, PatternType::LogicalProgression);
    }

    #[test]
    fn test_exploratory() {
        let taxonomy = Taxonomy::builtin().unwrap();
        // Three acts, no edges between them in this order
        let window = events(
            &taxonomy,
            &[
                "simulate_peer_review",
                "clarify_research_goals",
                "generate_latex_document",
            ],
        );
        let analysis = classify(&window, &taxonomy, &WorkflowConfig::default());
        assert_eq!(analysis.edge_transitions, 0);
        assert_eq!(analysis.distinct_acts, 3);
        assert_eq!(analysis.pattern, PatternType::Exploratory);
    }

    #[test]
    fn test_undetermined() {
        let taxonomy = Taxonomy::builtin().unwrap();
        assert_eq!(
            classify(&[], &taxonomy, &WorkflowConfig::default()).pattern,
            PatternType::Undetermined
        );
        let window = events(&taxonomy, &["mystery_a", "mystery_b"]);
        assert_eq!(
            classify(&window, &taxonomy, &WorkflowConfig::default()).pattern,
            PatternType::Undetermined
        );
    }
}
