//! Cron tool — the model-facing surface of the external scheduler.
//!
//! The scheduler itself lives outside this crate; [`SchedulerPort`] is the
//! contract it satisfies (add / update / remove / list, plus group
//! operations for cycle schedules). The tool maps action payloads onto the
//! port and renders human-readable confirmations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::base::{optional_i64, optional_string, require_string, Tool, ToolParams};
use crate::nlp;

// ─────────────────────────────────────────────
// Scheduler contract
// ─────────────────────────────────────────────

/// A job creation request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AddJobRequest {
    pub message: String,
    /// One-shot firing time (epoch ms).
    pub at_ms: Option<i64>,
    /// Repeat interval in seconds.
    pub every_seconds: Option<u64>,
    /// Standard 5-field cron expression.
    pub cron_expr: Option<String>,
    /// First firing for interval jobs (epoch ms).
    pub start_at_ms: Option<i64>,
    pub one_shot: bool,
    pub title: Option<String>,
    pub group_id: Option<String>,
    /// Delivery target.
    pub channel: String,
    pub chat_id: String,
}

/// A stored job, as the scheduler reports it.
#[derive(Clone, Debug)]
pub struct JobRecord {
    pub id: String,
    pub message: String,
    pub one_shot: bool,
    pub group_id: Option<String>,
    pub group_title: Option<String>,
    pub next_run_ms: Option<i64>,
}

/// A job group (one cycle schedule = one group).
#[derive(Clone, Debug)]
pub struct GroupRecord {
    pub group_id: String,
    pub title: String,
    pub job_count: usize,
}

/// Selects a group by id or by human title.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupSelector {
    Id(String),
    Title(String),
}

/// Fields updatable on a whole group.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupUpdate {
    pub every_seconds: Option<u64>,
    pub cron_expr: Option<String>,
    pub new_title: Option<String>,
}

/// The scheduler subsystem contract.
#[async_trait]
pub trait SchedulerPort: Send + Sync {
    async fn add_job(&self, request: AddJobRequest) -> anyhow::Result<JobRecord>;
    async fn remove_job(&self, job_id: &str) -> anyhow::Result<bool>;
    /// Remove every job in a group; returns the number removed.
    async fn remove_group(&self, selector: GroupSelector) -> anyhow::Result<usize>;
    /// Apply an update to every job in a group; returns the number touched.
    async fn update_group(
        &self,
        selector: GroupSelector,
        update: GroupUpdate,
    ) -> anyhow::Result<usize>;
    async fn list_jobs(&self) -> anyhow::Result<Vec<JobRecord>>;
    async fn list_groups(&self) -> anyhow::Result<Vec<GroupRecord>>;
}

// ─────────────────────────────────────────────
// CronTool
// ─────────────────────────────────────────────

/// Schedules reminders and recurring jobs through the scheduler port.
pub struct CronTool {
    scheduler: Arc<dyn SchedulerPort>,
    /// Delivery target for new jobs, rebound per turn.
    context: Mutex<(String, String)>,
}

impl CronTool {
    pub fn new(scheduler: Arc<dyn SchedulerPort>) -> Self {
        Self {
            scheduler,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }

    fn group_selector(params: &ToolParams) -> Option<GroupSelector> {
        if let Some(id) = optional_string(params, "group_id") {
            return Some(GroupSelector::Id(id));
        }
        optional_string(params, "title").map(GroupSelector::Title)
    }

    fn format_time(ms: i64) -> String {
        match Local.timestamp_millis_opt(ms).single() {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format!("@{ms}ms"),
        }
    }

    async fn handle_add(&self, params: &ToolParams) -> anyhow::Result<String> {
        let message = optional_string(params, "message")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Reminder".to_string());

        let mut at_ms = optional_string(params, "at_time")
            .as_deref()
            .and_then(nlp::parse_absolute_time_ms);
        let every_seconds = optional_i64(params, "every_seconds").map(|v| v.max(0) as u64);
        let cron_expr = optional_string(params, "cron_expr");
        let start_at_ms = optional_string(params, "start_at")
            .as_deref()
            .and_then(nlp::parse_absolute_time_ms);

        // No explicit timing: infer a one-shot offset from the raw text.
        if at_ms.is_none() && every_seconds.is_none() && cron_expr.is_none() {
            if let Some(context_text) = optional_string(params, "context_text") {
                if let Some(offset) = nlp::parse_relative_time_ms(&context_text) {
                    at_ms = Some(chrono::Utc::now().timestamp_millis() + offset);
                }
            }
        }

        if at_ms.is_none() && every_seconds.is_none() && cron_expr.is_none() {
            anyhow::bail!("No schedule given. Say when, e.g. \"in 10 minutes\" or \"every day at 7\".");
        }

        let one_shot = params
            .get("one_shot")
            .and_then(|v| v.as_bool())
            .unwrap_or_else(|| every_seconds.is_none() && cron_expr.is_none());

        let (channel, chat_id) = {
            let ctx = self.context.lock().await;
            ctx.clone()
        };

        let request = AddJobRequest {
            message: message.clone(),
            at_ms,
            every_seconds,
            cron_expr: cron_expr.clone(),
            start_at_ms,
            one_shot,
            title: optional_string(params, "title"),
            group_id: optional_string(params, "group_id"),
            channel,
            chat_id,
        };
        let job = self.scheduler.add_job(request).await?;

        let when = if let Some(ms) = at_ms {
            format!("at {}", Self::format_time(ms))
        } else if let Some(secs) = every_seconds {
            format!("every {secs} seconds")
        } else if let Some(ref expr) = cron_expr {
            format!("on schedule `{expr}`")
        } else {
            "as scheduled".to_string()
        };
        Ok(format!("Reminder '{message}' set {when} (job {})", job.id))
    }

    async fn handle_list(&self) -> anyhow::Result<String> {
        let jobs = self.scheduler.list_jobs().await?;
        if jobs.is_empty() {
            return Ok("No scheduled jobs.".to_string());
        }
        let mut lines = vec![format!("{} scheduled job(s):", jobs.len())];
        for job in jobs {
            let next = job
                .next_run_ms
                .map(Self::format_time)
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "  {} — {} (next: {}{})",
                job.id,
                job.message,
                next,
                if job.one_shot { ", one-shot" } else { "" }
            ));
        }
        Ok(lines.join("\n"))
    }

    async fn handle_list_groups(&self) -> anyhow::Result<String> {
        let groups = self.scheduler.list_groups().await?;
        if groups.is_empty() {
            return Ok("No schedule groups.".to_string());
        }
        let mut lines = vec![format!("{} schedule group(s):", groups.len())];
        for group in groups {
            lines.push(format!(
                "  {} — {} ({} jobs)",
                group.group_id, group.title, group.job_count
            ));
        }
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Manage scheduled reminders and recurring jobs: add one-shot or \
         recurring reminders, list them, update or remove schedule groups."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "One of: add, list, list_groups, remove, remove_group, update_group"
                },
                "message": {"type": "string", "description": "Reminder text"},
                "at_time": {"type": "string", "description": "One-shot time (ISO 8601)"},
                "every_seconds": {"type": "integer", "description": "Repeat interval in seconds"},
                "cron_expr": {"type": "string", "description": "5-field cron expression"},
                "start_at": {"type": "string", "description": "First firing for interval jobs (ISO 8601)"},
                "one_shot": {"type": "boolean", "description": "Delete the job after one firing"},
                "title": {"type": "string", "description": "Human title (also selects a group)"},
                "group_id": {"type": "string", "description": "Group id for cycle schedules"},
                "new_title": {"type": "string", "description": "Replacement title for update_group"},
                "job_id": {"type": "string", "description": "Job id for remove"},
                "context_text": {"type": "string", "description": "Original user text for time inference"}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: ToolParams) -> anyhow::Result<String> {
        let action = require_string(&params, "action")?;
        match action.as_str() {
            "add" => self.handle_add(&params).await,
            "list" => self.handle_list().await,
            "list_groups" => self.handle_list_groups().await,
            "remove" => {
                let job_id = require_string(&params, "job_id")?;
                if self.scheduler.remove_job(&job_id).await? {
                    Ok(format!("Job {job_id} removed."))
                } else {
                    Ok(format!("No job found with id {job_id}."))
                }
            }
            "remove_group" => {
                let selector = Self::group_selector(&params)
                    .ok_or_else(|| anyhow::anyhow!("remove_group needs group_id or title"))?;
                let removed = self.scheduler.remove_group(selector).await?;
                if removed == 0 {
                    Ok("No matching schedule group found.".to_string())
                } else {
                    Ok(format!("Removed schedule group ({removed} jobs)."))
                }
            }
            "update_group" => {
                let selector = Self::group_selector(&params)
                    .ok_or_else(|| anyhow::anyhow!("update_group needs group_id or title"))?;
                let update = GroupUpdate {
                    every_seconds: optional_i64(&params, "every_seconds").map(|v| v.max(0) as u64),
                    cron_expr: optional_string(&params, "cron_expr"),
                    new_title: optional_string(&params, "new_title"),
                };
                if update == GroupUpdate::default() {
                    anyhow::bail!("update_group needs at least one change");
                }
                let touched = self.scheduler.update_group(selector, update).await?;
                if touched == 0 {
                    Ok("No matching schedule group found.".to_string())
                } else {
                    Ok(format!("Updated schedule group ({touched} jobs)."))
                }
            }
            other => anyhow::bail!("Unknown cron action '{other}'"),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockScheduler;

    fn params(pairs: &[(&str, Value)]) -> ToolParams {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_add_one_shot_with_at_time() {
        let scheduler = Arc::new(MockScheduler::new());
        let tool = CronTool::new(scheduler.clone());
        tool.set_context("telegram", "42").await;

        let result = tool
            .execute(params(&[
                ("action", json!("add")),
                ("message", json!("makan")),
                ("at_time", json!("2026-05-01T08:30:00+07:00")),
                ("one_shot", json!(true)),
            ]))
            .await
            .unwrap();

        assert!(result.contains("makan"));
        let added = scheduler.added();
        assert_eq!(added.len(), 1);
        assert!(added[0].one_shot);
        assert!(added[0].at_ms.is_some());
        assert_eq!(added[0].channel, "telegram");
        assert_eq!(added[0].chat_id, "42");
    }

    #[tokio::test]
    async fn test_add_infers_time_from_context_text() {
        let scheduler = Arc::new(MockScheduler::new());
        let tool = CronTool::new(scheduler.clone());

        let before = chrono::Utc::now().timestamp_millis();
        tool.execute(params(&[
            ("action", json!("add")),
            ("message", json!("makan")),
            ("context_text", json!("ingatkan 2 menit lagi makan")),
        ]))
        .await
        .unwrap();
        let after = chrono::Utc::now().timestamp_millis();

        let added = scheduler.added();
        assert_eq!(added.len(), 1);
        let at = added[0].at_ms.unwrap();
        assert!(at >= before + 120_000 && at <= after + 120_000);
        assert!(added[0].one_shot);
    }

    #[tokio::test]
    async fn test_add_recurring_not_one_shot_by_default() {
        let scheduler = Arc::new(MockScheduler::new());
        let tool = CronTool::new(scheduler.clone());

        tool.execute(params(&[
            ("action", json!("add")),
            ("message", json!("standup")),
            ("cron_expr", json!("0 9 * * 1")),
        ]))
        .await
        .unwrap();

        assert!(!scheduler.added()[0].one_shot);
    }

    #[tokio::test]
    async fn test_add_without_schedule_errors() {
        let tool = CronTool::new(Arc::new(MockScheduler::new()));
        let err = tool
            .execute(params(&[("action", json!("add")), ("message", json!("x"))]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No schedule"));
    }

    #[tokio::test]
    async fn test_list_formats_jobs() {
        let scheduler = Arc::new(MockScheduler::new());
        scheduler
            .add_job(AddJobRequest {
                message: "drink water".into(),
                every_seconds: Some(3600),
                one_shot: false,
                channel: "cli".into(),
                chat_id: "direct".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let tool = CronTool::new(scheduler);
        let listing = tool.execute(params(&[("action", json!("list"))])).await.unwrap();
        assert!(listing.contains("1 scheduled job(s)"));
        assert!(listing.contains("drink water"));
    }

    #[tokio::test]
    async fn test_remove_group_by_title() {
        let scheduler = Arc::new(MockScheduler::new());
        for _ in 0..3 {
            scheduler
                .add_job(AddJobRequest {
                    message: "shift".into(),
                    every_seconds: Some(86400),
                    group_id: Some("grp_x_000001".into()),
                    title: Some("Night Watch".into()),
                    channel: "cli".into(),
                    chat_id: "d".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let tool = CronTool::new(scheduler.clone());
        let result = tool
            .execute(params(&[
                ("action", json!("remove_group")),
                ("title", json!("Night Watch")),
            ]))
            .await
            .unwrap();
        assert!(result.contains("3 jobs"));
        assert!(scheduler.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_group_requires_change() {
        let tool = CronTool::new(Arc::new(MockScheduler::new()));
        let err = tool
            .execute(params(&[
                ("action", json!("update_group")),
                ("group_id", json!("grp_a_1")),
            ]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least one change"));
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let tool = CronTool::new(Arc::new(MockScheduler::new()));
        let err = tool
            .execute(params(&[("action", json!("frobnicate"))]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown cron action"));
    }
}
