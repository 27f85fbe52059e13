//! Text and JSON rendering for CLI output

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use scrivener_core::taxonomy::Taxonomy;
use scrivener_core::{
    Milestone, ProgressReport, Project, ProjectRef, Recommendation, Session, ToolInvocationEvent,
};
use serde::Serialize;
use serde_json::Value;

pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    pub fn message(&self, text: &str) -> Result<()> {
        if self.json {
            return self.emit(&serde_json::json!({ "message": text }));
        }
        println!("{}", text);
        Ok(())
    }

    pub fn value(&self, value: &Value) -> Result<()> {
        if self.json {
            return self.emit(value);
        }
        match value {
            Value::Object(obj) => {
                for (key, v) in obj {
                    println!("{}: {}", key, format_value(v));
                }
            }
            Value::Array(items) => {
                for item in items {
                    println!("- {}", format_value(item));
                }
            }
            other => println!("{}", format_value(other)),
        }
        Ok(())
    }

    pub fn project(&self, project: &Project) -> Result<()> {
        if self.json {
            return self.emit(project);
        }
        println!("Project:  {}", project.name);
        println!("Root:     {}", project.root_path.display());
        println!("ID:       {}", project.id);
        if let Some(domain) = &project.domain {
            println!("Domain:   {}", domain);
        }
        Ok(())
    }

    pub fn project_ref(&self, project: &ProjectRef) -> Result<()> {
        if self.json {
            return self.emit(project);
        }
        println!("Active project: {} ({})", project.name, project.root.display());
        Ok(())
    }

    pub fn status(
        &self,
        project: &ProjectRef,
        session: Option<&Session>,
        report: &ProgressReport,
        events: i64,
    ) -> Result<()> {
        if self.json {
            return self.emit(&serde_json::json!({
                "project": project,
                "active_session": session,
                "overall_completion": report.overall_completion,
                "events": events,
            }));
        }

        println!("Project:  {} ({})", project.name, project.root.display());
        println!("Source:   {}", project.source.as_str());
        match session {
            Some(s) => println!("Session:  {} - {}", short_id(&s.id), s.research_focus),
            None => println!("Session:  (none)"),
        }
        println!("Events:   {}", events);
        println!("Overall:  {:.1}%", report.overall_completion);
        Ok(())
    }

    pub fn progress(&self, report: &ProgressReport) -> Result<()> {
        if self.json {
            return self.emit(report);
        }

        for act in &report.acts {
            println!("{} ({:.1}%)", act.act, act.completion_percentage);
            for category in &act.categories {
                println!(
                    "  {:<24} {:>6.2}%  {} event(s), tools: {}",
                    category.research_category,
                    category.completion_percentage,
                    category.event_count,
                    list_or_dash(&category.distinct_tools_used)
                );
            }
        }
        if !report.other.is_empty() {
            println!("Other");
            for row in &report.other {
                println!(
                    "  {}/{}: {} event(s)",
                    row.research_act, row.research_category, row.event_count
                );
            }
        }
        println!("\nOverall: {:.1}%", report.overall_completion);
        Ok(())
    }

    pub fn milestones(&self, milestones: &[Milestone]) -> Result<()> {
        if self.json {
            return self.emit(milestones);
        }
        if milestones.is_empty() {
            println!("No milestones yet.");
            return Ok(());
        }
        for m in milestones {
            println!(
                "{}  {:<40} impact {:.2}",
                format_time(m.achieved_at),
                m.description,
                m.impact_score
            );
        }
        Ok(())
    }

    pub fn recommendations(&self, recommendations: &[Recommendation]) -> Result<()> {
        if self.json {
            return self.emit(recommendations);
        }
        if recommendations.is_empty() {
            println!("No recommendations.");
            return Ok(());
        }
        for rec in recommendations {
            println!(
                "#{} [P{}] {} / {} ({})",
                rec.id,
                rec.priority,
                rec.recommended_next_act,
                rec.recommended_category,
                rec.status.as_str()
            );
            println!("    tools: {}", list_or_dash(&rec.recommended_tools));
            println!("    {}", rec.reasoning);
        }
        Ok(())
    }

    pub fn history(&self, events: &[ToolInvocationEvent]) -> Result<()> {
        if self.json {
            return self.emit(events);
        }
        println!("{:<6} {:<17} {:<28} {:<4} Category", "Seq", "Time", "Tool", "OK");
        for e in events {
            println!(
                "{:<6} {:<17} {:<28} {:<4} {}/{}",
                e.seq,
                format_time(e.timestamp),
                e.tool_name,
                if e.success { "+" } else { "!" },
                e.research_act,
                e.research_category
            );
        }
        Ok(())
    }

    pub fn session(&self, session: &Session) -> Result<()> {
        if self.json {
            return self.emit(session);
        }
        println!("Session:  {}", session.id);
        println!("Focus:    {}", session.research_focus);
        println!("Status:   {}", session.status);
        println!("Started:  {}", format_time(session.started_at));
        if let Some(ended) = session.ended_at {
            println!("Ended:    {}", format_time(ended));
        }
        if !session.goals.is_empty() {
            println!("Goals:    {}", session.goals.join("; "));
        }
        Ok(())
    }

    pub fn sessions(&self, sessions: &[Session]) -> Result<()> {
        if self.json {
            return self.emit(sessions);
        }
        for s in sessions {
            println!(
                "{}  {:<10} {}  {}",
                short_id(&s.id),
                s.status.as_str(),
                format_time(s.started_at),
                s.research_focus
            );
        }
        Ok(())
    }

    pub fn taxonomy(&self, taxonomy: &Taxonomy) -> Result<()> {
        if self.json {
            let acts: Vec<Value> = taxonomy
                .acts()
                .iter()
                .map(|act| {
                    let categories: Vec<Value> = act
                        .categories
                        .iter()
                        .map(|id| {
                            let category = taxonomy.category(*id);
                            serde_json::json!({
                                "name": category.name,
                                "expected_events": category.expected_events,
                                "tools": category.tools,
                                "next": taxonomy
                                    .successors(*id)
                                    .iter()
                                    .map(|n| taxonomy.category(*n).name.clone())
                                    .collect::<Vec<_>>(),
                            })
                        })
                        .collect();
                    serde_json::json!({ "name": act.name, "categories": categories })
                })
                .collect();
            return self.emit(&acts);
        }

        for act in taxonomy.acts() {
            println!("{}", act.name);
            for id in &act.categories {
                let category = taxonomy.category(*id);
                println!("  {}: {}", category.name, category.tools.join(", "));
            }
        }
        Ok(())
    }
}

fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

fn list_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Compact one-line rendering of a JSON value
fn format_value(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() != 0.0 => format!("{:.2}", f),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(arr) if arr.len() <= 3 => format!(
            "[{}]",
            arr.iter().map(format_value).collect::<Vec<_>>().join(", ")
        ),
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(obj) if obj.len() <= 3 => format!(
            "{{{}}}",
            obj.iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::Object(obj) => format!("{{{} keys}}", obj.len()),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}
