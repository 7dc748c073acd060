//! Required-tool enforcement — lexicon matching and the deterministic
//! fallback that builds tool calls when the model will not.

use std::sync::Arc;

use chrono::{Local, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::warn;

use crate::lexicon;
use crate::nlp;
use crate::tools::base::ToolParams;
use crate::tools::cron::SchedulerPort;
use crate::tools::ToolRegistry;

static GROUP_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bgrp_[a-z0-9_-]+\b").unwrap());
static JOB_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-f0-9]{8}\b").unwrap());
static SMALL_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,3})\b").unwrap());
static ABSOLUTE_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}(?::\d{2})?(?:Z|[+-]\d{2}:?\d{2})?)").unwrap()
});

/// Which registered tool this message requires, if any.
///
/// Matching the immediate-action lexicon forces the tool loop; these
/// families additionally pin the exact tool the model must call.
pub fn required_tool_for_query(question: &str, tools: &ToolRegistry) -> Option<&'static str> {
    let lowered = question.to_lowercase();

    if tools.has("weather") && lexicon::contains_any(&lowered, lexicon::WEATHER_TERMS) {
        return Some("weather");
    }

    let is_cron_mgmt = lexicon::contains_any(&lowered, lexicon::CRON_MANAGEMENT_OPS)
        && lexicon::contains_any(&lowered, lexicon::CRON_MANAGEMENT_TERMS);
    if tools.has("cron") && is_cron_mgmt {
        return Some("cron");
    }
    if tools.has("cron") && lexicon::contains_any(&lowered, lexicon::REMINDER_TERMS) {
        return Some("cron");
    }

    if tools.has("get_system_info") && lexicon::contains_any(&lowered, lexicon::SYSTEM_INFO_TERMS) {
        return Some("get_system_info");
    }
    if tools.has("cleanup_system") && lexicon::contains_any(&lowered, lexicon::CLEANUP_TERMS) {
        return Some("cleanup_system");
    }
    if tools.has("get_process_memory")
        && lexicon::contains_any(&lowered, lexicon::PROCESS_MEMORY_TERMS)
    {
        return Some("get_process_memory");
    }

    None
}

/// Titles of existing schedule groups, for unique-title generation.
async fn existing_titles(scheduler: Option<&Arc<dyn SchedulerPort>>) -> Vec<String> {
    let Some(scheduler) = scheduler else {
        return Vec::new();
    };
    match scheduler.list_groups().await {
        Ok(groups) => groups.into_iter().map(|g| g.title).collect(),
        Err(_) => Vec::new(),
    }
}

fn params_from_json(value: serde_json::Value) -> ToolParams {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => ToolParams::new(),
    }
}

/// Execute the required tool deterministically after the model skipped it
/// twice. Returns the user-facing result, or `None` when this tool has no
/// fallback construction.
pub async fn execute_required_tool_fallback(
    tools: &ToolRegistry,
    scheduler: Option<&Arc<dyn SchedulerPort>>,
    required_tool: &str,
    content: &str,
) -> Option<String> {
    match required_tool {
        "weather" => {
            let Some(location) = nlp::extract_weather_location(content) else {
                return Some(
                    "I need a location to check the weather. Which city should I look up?"
                        .to_string(),
                );
            };
            let params = params_from_json(json!({
                "location": location,
                "context_text": content,
            }));
            Some(tools.execute("weather", params).await)
        }

        "get_system_info" => Some(tools.execute("get_system_info", ToolParams::new()).await),

        "get_process_memory" => {
            let lowered = content.to_lowercase();
            let limit = SMALL_NUMBER_RE
                .captures(&lowered)
                .and_then(|c| c.get(1).unwrap().as_str().parse::<i64>().ok())
                .unwrap_or(15)
                .clamp(1, 200);
            let params = params_from_json(json!({ "limit": limit }));
            Some(tools.execute("get_process_memory", params).await)
        }

        "cleanup_system" => {
            let lowered = content.to_lowercase();
            let level = if ["deep", "dalam", "mendalam", "full", "lengkap"]
                .iter()
                .any(|k| lowered.contains(k))
            {
                "deep"
            } else if ["quick", "cepat", "ringan", "light"]
                .iter()
                .any(|k| lowered.contains(k))
            {
                "quick"
            } else {
                "standard"
            };
            let params = params_from_json(json!({ "level": level }));
            Some(tools.execute("cleanup_system", params).await)
        }

        "cron" => cron_fallback(tools, scheduler, content).await,

        _ => None,
    }
}

/// The cron fallback: management requests, cycle schedules, recurring
/// schedules, then one-shot reminders, in that order.
async fn cron_fallback(
    tools: &ToolRegistry,
    scheduler: Option<&Arc<dyn SchedulerPort>>,
    content: &str,
) -> Option<String> {
    let lowered = content.to_lowercase();

    let exec_cron = |mut payload: serde_json::Value| {
        if let Some(map) = payload.as_object_mut() {
            map.entry("context_text").or_insert_with(|| json!(content));
        }
        let params = params_from_json(payload);
        async move { tools.execute("cron", params).await }
    };

    let is_management = lexicon::contains_any(&lowered, lexicon::CRON_MANAGEMENT_OPS)
        && lexicon::contains_any(&lowered, lexicon::CRON_MANAGEMENT_TERMS);

    if is_management && ["list", "lihat", "show"].iter().any(|k| lowered.contains(k)) {
        return Some(exec_cron(json!({"action": "list_groups"})).await);
    }

    if is_management && ["hapus", "delete", "remove"].iter().any(|k| lowered.contains(k)) {
        if let Some(group_id) = GROUP_ID_RE.find(&lowered) {
            return Some(
                exec_cron(json!({"action": "remove_group", "group_id": group_id.as_str()})).await,
            );
        }
        if let Some(title) = nlp::extract_explicit_schedule_title(content) {
            return Some(exec_cron(json!({"action": "remove_group", "title": title})).await);
        }
        if let Some(job_id) = JOB_ID_RE.find(&lowered) {
            return Some(exec_cron(json!({"action": "remove", "job_id": job_id.as_str()})).await);
        }
        return Some(
            "Which schedule should I remove? Give me its group id (grp_...) or title.".to_string(),
        );
    }

    if is_management && ["edit", "ubah", "update"].iter().any(|k| lowered.contains(k)) {
        let mut payload = json!({"action": "update_group"});
        let map = payload.as_object_mut().unwrap();
        if let Some(group_id) = GROUP_ID_RE.find(&lowered) {
            map.insert("group_id".into(), json!(group_id.as_str()));
        } else if let Some(title) = nlp::extract_explicit_schedule_title(content) {
            map.insert("title".into(), json!(title));
        } else {
            return Some(
                "Which schedule should I update? Give me its group id (grp_...) or title."
                    .to_string(),
            );
        }

        let mut has_change = false;
        if let Some(recurring) = nlp::extract_recurring_schedule(content) {
            if let Some(secs) = recurring.every_seconds {
                map.insert("every_seconds".into(), json!(secs));
                has_change = true;
            }
            if let Some(expr) = recurring.cron_expr {
                map.insert("cron_expr".into(), json!(expr));
                has_change = true;
            }
        }
        if let Some(new_title) = nlp::extract_new_schedule_title(content) {
            let titles = existing_titles(scheduler).await;
            let unique = nlp::make_unique_schedule_title(
                &new_title,
                titles.iter().map(String::as_str),
            );
            map.insert("new_title".into(), json!(unique));
            has_change = true;
        }
        if !has_change {
            return Some(
                "What should change on that schedule? A new time, interval, or title.".to_string(),
            );
        }
        return Some(exec_cron(payload).await);
    }

    // Cycle schedules: N work days with times, off days, repeating.
    if let Some(cycle) = nlp::extract_cycle_schedule(content, Local::now()) {
        let every_seconds = cycle.period_days as u64 * 86_400;
        let titles = existing_titles(scheduler).await;
        let group_title = nlp::build_cycle_title(
            content,
            cycle.period_days,
            titles.iter().map(String::as_str),
        );
        let group_id = nlp::build_group_id(&group_title, Utc::now().timestamp_millis());

        let mut created = 0usize;
        for event in &cycle.events {
            exec_cron(json!({
                "action": "add",
                "message": event.message,
                "title": group_title,
                "group_id": group_id,
                "every_seconds": every_seconds,
                "start_at": event.start_at,
                "one_shot": false,
            }))
            .await;
            created += 1;
        }
        warn!(
            group_id = %group_id,
            jobs = created,
            period_days = cycle.period_days,
            "cycle schedule created via deterministic fallback"
        );
        return Some(format!(
            "Created schedule '{group_title}' ({group_id}): {created} reminders repeating every {} days.",
            cycle.period_days
        ));
    }

    let reminder_text = nlp::extract_reminder_message(content);

    // Plain recurring schedules.
    if let Some(recurring) = nlp::extract_recurring_schedule(content) {
        let preview: String = reminder_text.chars().take(40).collect();
        let default_title = format!("Recurring: {}", preview.trim());
        let titles = existing_titles(scheduler).await;
        let group_title = nlp::make_unique_schedule_title(
            &default_title,
            titles.iter().map(String::as_str),
        );
        let group_id = nlp::build_group_id(&group_title, Utc::now().timestamp_millis());

        let mut payload = json!({
            "action": "add",
            "message": reminder_text,
            "title": group_title,
            "group_id": group_id,
            "one_shot": false,
        });
        let map = payload.as_object_mut().unwrap();
        if let Some(secs) = recurring.every_seconds {
            map.insert("every_seconds".into(), json!(secs));
        }
        if let Some(expr) = recurring.cron_expr {
            map.insert("cron_expr".into(), json!(expr));
        }
        return Some(exec_cron(payload).await);
    }

    // One-shot reminders: relative offset first, explicit timestamp second.
    let target_ms = match nlp::parse_relative_time_ms(content) {
        Some(offset) => Some(Utc::now().timestamp_millis() + offset),
        None => ABSOLUTE_TIME_RE
            .captures(content)
            .and_then(|c| nlp::parse_absolute_time_ms(c.get(1).unwrap().as_str())),
    };

    let Some(target_ms) = target_ms else {
        return Some(
            "When should I remind you? Say something like \"in 10 minutes\" or \"2026-05-01 08:00\"."
                .to_string(),
        );
    };

    let at_time = Local
        .timestamp_millis_opt(target_ms)
        .single()?
        .to_rfc3339_opts(SecondsFormat::Secs, false);
    Some(
        exec_cron(json!({
            "action": "add",
            "message": reminder_text,
            "at_time": at_time,
            "one_shot": true,
        }))
        .await,
    )
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
