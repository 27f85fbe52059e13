//! Next-step recommendations from a classified window

use super::patterns::PatternAnalysis;
use crate::config::WorkflowConfig;
use crate::taxonomy::{CategoryId, Taxonomy, UNCATEGORIZED};
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// Everything a recommendation is derived from
#[derive(Debug)]
pub struct RecommendationInput<'a> {
    pub project_id: &'a str,
    pub session_id: Option<&'a str>,
    /// Recent invocation events, oldest first
    pub window: &'a [ToolInvocationEvent],
    pub analysis: &'a PatternAnalysis,
    /// Current progress by category; absent categories count as 0%
    pub progress: &'a HashMap<CategoryId, ResearchProgress>,
    /// Categories the session (or project, without a session) has touched
    pub touched: &'a BTreeSet<CategoryId>,
}

impl RecommendationInput<'_> {
    fn completion(&self, id: CategoryId) -> f64 {
        self.progress
            .get(&id)
            .map(|p| p.completion_percentage)
            .unwrap_or(0.0)
    }

    fn lowest(&self, candidates: impl IntoIterator<Item = CategoryId>) -> Option<CategoryId> {
        // min_by keeps the first of equal elements, so ties go to taxonomy order
        candidates
            .into_iter()
            .min_by(|a, b| self.completion(*a).total_cmp(&self.completion(*b)))
    }
}

/// Build a pending recommendation. `None` only for an empty taxonomy.
pub fn recommend(
    input: &RecommendationInput<'_>,
    taxonomy: &Taxonomy,
    config: &WorkflowConfig,
    at: DateTime<Utc>,
) -> Option<Recommendation> {
    let all = || taxonomy.categories().iter().map(|c| c.id);
    let last_categorized = input
        .window
        .iter()
        .rev()
        .find_map(|e| taxonomy.find_category(&e.research_act, &e.research_category));
    let current_act = last_categorized
        .map(|id| taxonomy.category(id).act.clone())
        .or_else(|| input.window.last().map(|e| e.research_act.clone()))
        .unwrap_or_else(|| UNCATEGORIZED.to_string());

    let analysis = input.analysis;
    let (target, reasoning) = match analysis.pattern {
        PatternType::Repetitive => {
            let repeated = analysis.repeated_tool.as_deref().unwrap_or_default();
            let repeats = input
                .window
                .iter()
                .filter(|e| e.tool_name == repeated)
                .count();
            let target = input
                .lowest(all().filter(|id| !input.touched.contains(id)))
                .or_else(|| input.lowest(all()))?;
            let reasoning = format!(
                "Usage pattern is {}: `{}` ran {} times in the last {} invocations. \
                 {} has not been touched yet and is {:.0}% complete; try a different tool there.",
                analysis.pattern,
                repeated,
                repeats,
                input.window.len(),
                describe(taxonomy, target),
                input.completion(target)
            );
            (target, reasoning)
        }
        PatternType::LogicalProgression => {
            let next = last_categorized
                .and_then(|from| input.lowest(taxonomy.successors(from).iter().copied()));
            match (last_categorized, next) {
                (Some(from), Some(target)) => {
                    let reasoning = format!(
                        "Usage pattern is {}: {} of {} recent transitions follow the usual research flow. \
                         {} typically comes after {} and is {:.0}% complete.",
                        analysis.pattern,
                        analysis.edge_transitions,
                        analysis.transitions,
                        describe(taxonomy, target),
                        taxonomy.category(from).name,
                        input.completion(target)
                    );
                    (target, reasoning)
                }
                _ => {
                    let target = input.lowest(all())?;
                    let reasoning = format!(
                        "Usage pattern is {}: the current step has no usual successor. \
                         {} is the least complete category in the project ({:.0}%).",
                        analysis.pattern,
                        describe(taxonomy, target),
                        input.completion(target)
                    );
                    (target, reasoning)
                }
            }
        }
        PatternType::Exploratory => {
            let visited: BTreeSet<&str> = input
                .window
                .iter()
                .map(|e| e.research_act.as_str())
                .collect();
            let target = input
                .lowest(all().filter(|id| visited.contains(taxonomy.category(*id).act.as_str())))
                .or_else(|| input.lowest(all()))?;
            let reasoning = format!(
                "Usage pattern is {}: recent work spans {} acts. \
                 Consolidate in {}, the least complete category among them ({:.0}%).",
                analysis.pattern,
                analysis.distinct_acts,
                describe(taxonomy, target),
                input.completion(target)
            );
            (target, reasoning)
        }
        PatternType::Undetermined => {
            let target = input.lowest(all())?;
            let reasoning = format!(
                "Usage pattern is {}: recent activity shows no clear direction. \
                 {} is the least complete category in the project ({:.0}%).",
                analysis.pattern,
                describe(taxonomy, target),
                input.completion(target)
            );
            (target, reasoning)
        }
    };

    let category = taxonomy.category(target);
    let used: &[String] = input
        .progress
        .get(&target)
        .map(|p| p.distinct_tools_used.as_slice())
        .unwrap_or(&[]);
    let excluded = analysis.repeated_tool.as_deref();

    // Unused tools first, then the rest, in table order
    let mut recommended_tools: Vec<String> = category
        .tools
        .iter()
        .filter(|t| Some(t.as_str()) != excluded)
        .filter(|t| !used.contains(t))
        .chain(
            category
                .tools
                .iter()
                .filter(|t| Some(t.as_str()) != excluded)
                .filter(|t| used.contains(t)),
        )
        .cloned()
        .collect();
    recommended_tools.truncate(config.recommended_tools_limit);

    let priority = priority(input, taxonomy, config, &current_act, target);

    Some(Recommendation {
        id: 0,
        project_id: input.project_id.to_string(),
        session_id: input.session_id.map(str::to_string),
        current_act,
        recommended_next_act: category.act.clone(),
        recommended_category: category.name.clone(),
        recommended_tools,
        pattern: analysis.pattern,
        reasoning,
        priority,
        status: RecommendationStatus::Pending,
        created_at: at,
    })
}

/// 1 when the current act has a category below the low-completion mark,
/// otherwise 2 for a target under half done and 3 for the rest.
fn priority(
    input: &RecommendationInput<'_>,
    taxonomy: &Taxonomy,
    config: &WorkflowConfig,
    current_act: &str,
    target: CategoryId,
) -> u8 {
    let current_act_lagging = taxonomy
        .act_categories(current_act)
        .iter()
        .any(|id| input.completion(*id) < config.low_completion_threshold);

    if current_act_lagging {
        1
    } else if input.completion(target) < 50.0 {
        2
    } else {
        3
    }
}

fn describe(taxonomy: &Taxonomy, id: CategoryId) -> String {
    let category = taxonomy.category(id);
    format!("{} ({})", category.name, category.act)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::patterns::classify;

    fn event(taxonomy: &Taxonomy, seq: i64, tool: &str) -> ToolInvocationEvent {
        let class = taxonomy.classify(tool);
        ToolInvocationEvent {
            id: seq,
            seq,
            kind: EventKind::Invocation,
            session_id: Some("s".to_string()),
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
    }

    fn row(taxonomy: &Taxonomy, act: &str, category: &str, pct: f64) -> (CategoryId, ResearchProgress) {
        (
            taxonomy.find_category(act, category).unwrap(),
            ResearchProgress {
                project_id: "p".to_string(),
                research_act: act.to_string(),
                research_category: category.to_string(),
                completion_percentage: pct,
                distinct_tools_used: vec![],
                event_count: 0,
                last_activity: None,
                stale: false,
            },
        )
    }

    fn run(
        taxonomy: &Taxonomy,
        tools: &[&str],
        progress: HashMap<CategoryId, ResearchProgress>,
    ) -> Recommendation {
        let window: Vec<_> = tools
            .iter()
            .enumerate()
            .map(|(i, t)| event(taxonomy, i as i64 + 1, t))
            .collect();
        let config = WorkflowConfig::default();
        let analysis = classify(&window, taxonomy, &config);
        let touched = window
            .iter()
            .filter_map(|e| taxonomy.find_category(&e.research_act, &e.research_category))
            .collect();
        let input = RecommendationInput {
            project_id: "p",
            session_id: Some("s"),
            window: &window,
            analysis: &analysis,
            progress: &progress,
            touched: &touched,
        };
        recommend(&input, taxonomy, &config, Utc::now()).unwrap()
    }

    #[test]
    fn test_repetitive_excludes_repeated_tool() {
        let taxonomy = Taxonomy::builtin().unwrap();
        let rec = run(
            &taxonomy,
            &["literature_search", "literature_search", "literature_search"],
            HashMap::new(),
        );
        assert_eq!(rec.pattern, PatternType::Repetitive);
        assert!(rec.reasoning.contains("repetitive"));
        assert!(!rec.recommended_tools.contains(&"literature_search".to_string()));
        assert_ne!(rec.recommended_category, "Literature Search");
        assert!(!rec.recommended_tools.is_empty());
        assert!(rec.recommended_tools.len() <= 3);
    }

    #[test]
    fn test_logical_progression_follows_edge() {
        let taxonomy = Taxonomy::builtin().unwrap();
        let progress = HashMap::from([
            row(&taxonomy, "Conceptualization", "Ideation", 60.0),
            row(&taxonomy, "Design & Planning", "Methodology Selection", 20.0),
        ]);
        // Problem Framing -> Ideation, ending in Ideation
        let rec = run(
            &taxonomy,
            &["clarify_research_goals", "brainstorm_hypotheses"],
            progress,
        );
        assert_eq!(rec.pattern, PatternType::LogicalProgression);
        assert!(rec.reasoning.contains("logical_progression"));
        // Ideation -> {Literature Search 0%, Methodology Selection 20%}
        assert_eq!(rec.recommended_category, "Literature Search");
        assert_eq!(rec.recommended_next_act, "Knowledge Acquisition");
        assert_eq!(rec.current_act, "Conceptualization");
        // Problem Framing is still at 0%
        assert_eq!(rec.priority, 1);
    }

    #[test]
    fn test_undetermined_picks_global_lowest() {
        let taxonomy = Taxonomy::builtin().unwrap();
        let progress: HashMap<_, _> = taxonomy
            .categories()
            .iter()
            .map(|c| row(&taxonomy, &c.act, &c.name, 80.0))
            .chain([row(&taxonomy, "Validation & Refinement", "Revision", 30.0)])
            .collect();
        let rec = run(&taxonomy, &["mystery_tool"], progress);
        assert_eq!(rec.pattern, PatternType::Undetermined);
        assert!(rec.reasoning.contains("undetermined"));
        assert_eq!(rec.recommended_category, "Revision");
        assert_eq!(rec.current_act, UNCATEGORIZED);
        assert_eq!(rec.priority, 2);
    }

    #[test]
    fn test_priority_low_when_everything_is_advanced() {
        let taxonomy = Taxonomy::builtin().unwrap();
        let progress: HashMap<_, _> = taxonomy
            .categories()
            .iter()
            .map(|c| row(&taxonomy, &c.act, &c.name, 90.0))
            .collect();
        let rec = run(&taxonomy, &["draft_section"], progress);
        assert_eq!(rec.priority, 3);
    }
}
