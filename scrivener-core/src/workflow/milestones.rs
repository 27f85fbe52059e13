//! Milestone detection
//!
//! Detection is stateless: it reports every milestone the current numbers
//! qualify for and the store keeps the first insert of each key. Running it
//! twice over the same event history therefore changes nothing.

use crate::types::{Milestone, MilestoneType};
use chrono::{DateTime, Utc};

/// What a threshold milestone is measured over
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    Category(&'a str),
    Act(&'a str),
}

impl Scope<'_> {
    fn milestone_type(&self) -> MilestoneType {
        match self {
            Scope::Category(_) => MilestoneType::CategoryThreshold,
            Scope::Act(_) => MilestoneType::ActThreshold,
        }
    }

    fn key(&self, threshold: u8) -> String {
        match self {
            Scope::Category(name) => format!("category:{}:threshold:{}", name, threshold),
            Scope::Act(name) => format!("act:{}:threshold:{}", name, threshold),
        }
    }

    fn describe(&self, threshold: u8) -> String {
        match self {
            Scope::Category(name) => format!("{} reached {}% completion", name, threshold),
            Scope::Act(name) => format!("{} act reached {}% completion", name, threshold),
        }
    }

    /// Act milestones aggregate several categories and weigh double
    fn impact(&self, threshold: u8) -> f64 {
        let base = f64::from(threshold) / 100.0;
        match self {
            Scope::Category(_) => base,
            Scope::Act(_) => base * 2.0,
        }
    }
}

/// Threshold milestones satisfied by `completion`.
pub fn detect(
    project_id: &str,
    scope: Scope<'_>,
    completion: f64,
    thresholds: &[u8],
    at: DateTime<Utc>,
) -> Vec<Milestone> {
    thresholds
        .iter()
        .copied()
        .filter(|t| completion >= f64::from(*t))
        .map(|t| Milestone {
            project_id: project_id.to_string(),
            milestone_type: scope.milestone_type(),
            key: scope.key(t),
            description: scope.describe(t),
            achieved_at: at,
            impact_score: scope.impact(t),
        })
        .collect()
}

/// Tool diversity milestone, once `distinct_tools` in an act reaches `required`.
pub fn tool_diversity(
    project_id: &str,
    act: &str,
    distinct_tools: usize,
    required: usize,
    at: DateTime<Utc>,
) -> Option<Milestone> {
    (required > 0 && distinct_tools >= required).then(|| Milestone {
        project_id: project_id.to_string(),
        milestone_type: MilestoneType::ToolDiversity,
        key: format!("act:{}:tool_diversity:{}", act, required),
        description: format!("Used {} distinct tools in {}", required, act),
        achieved_at: at,
        impact_score: 1.0,
    })
}
