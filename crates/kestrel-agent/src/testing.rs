//! Test support — scripted mocks shared by unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use kestrel_core::types::{LlmResponse, Message, ToolDefinition};
use kestrel_providers::{LlmProvider, LlmRequestConfig, ProviderError};

use crate::tools::cron::{
    AddJobRequest, GroupRecord, GroupSelector, GroupUpdate, JobRecord, SchedulerPort,
};

/// One recorded provider call: the messages sent and the model used.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub model: String,
}

/// A provider that replays scripted responses in order and records every
/// call. Once the script runs out it returns a placeholder text response.
pub struct MockProvider {
    script: Mutex<Vec<Result<LlmResponse, ProviderError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    api_key: Mutex<String>,
}

impl MockProvider {
    pub fn new(script: Vec<Result<LlmResponse, ProviderError>>) -> Self {
        MockProvider {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
            api_key: Mutex::new("sk-mock".to_string()),
        }
    }

    /// A provider that always answers with the same text.
    pub fn simple(text: &str) -> Self {
        Self::new(vec![Ok(text_response(text))])
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// Build a plain text response.
pub fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: Some(text.to_string()),
        ..Default::default()
    }
}

/// Build a tool-call response with optional lead-in text.
pub fn tool_call_response(
    content: Option<&str>,
    calls: Vec<kestrel_core::types::ToolCall>,
) -> LlmResponse {
    LlmResponse {
        content: content.map(String::from),
        tool_calls: calls,
        ..Default::default()
    }
}

/// A 5xx provider error.
pub fn server_error() -> ProviderError {
    ProviderError::Status {
        code: 503,
        body: "overloaded".to_string(),
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(
        &self,
        messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
        model: &str,
        _config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            model: model.to_string(),
        });

        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(text_response("(no more responses)"))
        } else {
            script.remove(0)
        }
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    fn display_name(&self) -> &str {
        "MockProvider"
    }

    fn api_key(&self) -> Option<String> {
        Some(self.api_key.lock().unwrap().clone())
    }

    fn set_api_key(&self, key: &str) {
        *self.api_key.lock().unwrap() = key.to_string();
    }
}

// ─────────────────────────────────────────────
// Mock scheduler
// ─────────────────────────────────────────────

/// An in-memory scheduler recording every add request.
pub struct MockScheduler {
    jobs: Mutex<Vec<(JobRecord, AddJobRequest)>>,
    next_id: Mutex<usize>,
}

impl MockScheduler {
    pub fn new() -> Self {
        MockScheduler {
            jobs: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }

    /// Every add request received, in order.
    pub fn added(&self) -> Vec<AddJobRequest> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(_, req)| req.clone())
            .collect()
    }
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn selector_matches(selector: &GroupSelector, record: &JobRecord) -> bool {
    match selector {
        GroupSelector::Id(id) => record.group_id.as_deref() == Some(id.as_str()),
        GroupSelector::Title(title) => record
            .group_title
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case(title))
            .unwrap_or(false),
    }
}

#[async_trait]
impl SchedulerPort for MockScheduler {
    async fn add_job(&self, request: AddJobRequest) -> anyhow::Result<JobRecord> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("job{:04}", *next)
        };
        let record = JobRecord {
            id,
            message: request.message.clone(),
            one_shot: request.one_shot,
            group_id: request.group_id.clone(),
            group_title: request.title.clone(),
            next_run_ms: request.at_ms.or(request.start_at_ms),
        };
        self.jobs.lock().unwrap().push((record.clone(), request));
        Ok(record)
    }

    async fn remove_job(&self, job_id: &str) -> anyhow::Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|(record, _)| record.id != job_id);
        Ok(jobs.len() < before)
    }

    async fn remove_group(&self, selector: GroupSelector) -> anyhow::Result<usize> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|(record, _)| !selector_matches(&selector, record));
        Ok(before - jobs.len())
    }

    async fn update_group(
        &self,
        selector: GroupSelector,
        update: GroupUpdate,
    ) -> anyhow::Result<usize> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut touched = 0;
        for (record, request) in jobs.iter_mut() {
            if selector_matches(&selector, record) {
                if let Some(secs) = update.every_seconds {
                    request.every_seconds = Some(secs);
                }
                if let Some(ref expr) = update.cron_expr {
                    request.cron_expr = Some(expr.clone());
                }
                if let Some(ref title) = update.new_title {
                    record.group_title = Some(title.clone());
                    request.title = Some(title.clone());
                }
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn list_jobs(&self) -> anyhow::Result<Vec<JobRecord>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(record, _)| record.clone())
            .collect())
    }

    async fn list_groups(&self) -> anyhow::Result<Vec<GroupRecord>> {
        let jobs = self.jobs.lock().unwrap();
        let mut groups: Vec<GroupRecord> = Vec::new();
        for (record, _) in jobs.iter() {
            let (Some(group_id), Some(title)) = (&record.group_id, &record.group_title) else {
                continue;
            };
            match groups.iter_mut().find(|g| &g.group_id == group_id) {
                Some(group) => group.job_count += 1,
                None => groups.push(GroupRecord {
                    group_id: group_id.clone(),
                    title: title.clone(),
                    job_count: 1,
                }),
            }
        }
        Ok(groups)
    }
}
