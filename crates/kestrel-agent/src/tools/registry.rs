//! Tool registry — registration, validation, dispatch, and tool events.
//!
//! Registration happens at startup; at steady state the registry is
//! read-only and shared. Each dispatch validates arguments against the
//! tool's schema and emits `tool` system events (start / complete / error)
//! tagged with the current run id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{info, warn};

use kestrel_core::bus::types::SystemEvent;
use kestrel_core::types::ToolDefinition;
use kestrel_core::MessageBus;

use super::base::{validate_params, Tool, ToolParams};

/// Stores tools keyed by name and dispatches model tool calls.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    bus: Option<Arc<MessageBus>>,
    run_id: RwLock<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
            bus: None,
            run_id: RwLock::new("startup".to_string()),
        }
    }

    /// Attach the bus so dispatches emit tool events.
    pub fn attach_bus(&mut self, bus: Arc<MessageBus>) {
        self.bus = Some(bus);
    }

    /// Tag subsequent tool events with `run_id`.
    pub fn set_run_id(&self, run_id: &str) {
        *self.run_id.write().unwrap() = run_id.to_string();
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Model-facing definitions, sorted by name.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool by name.
    ///
    /// The model always gets a string back: unknown tools, invalid
    /// arguments, and handler failures all become `Error: …` results.
    pub async fn execute(&self, name: &str, params: ToolParams) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => {
                warn!(tool = name, "tool not found");
                return format!("Error: Tool '{name}' not found");
            }
        };

        if let Err(reason) = validate_params(&tool.parameters(), &params) {
            warn!(tool = name, reason = %reason, "invalid tool arguments");
            self.emit_tool_event(name, "error");
            return format!("Error: Invalid arguments for {name}: {reason}");
        }

        self.emit_tool_event(name, "start");
        match tool.execute(params).await {
            Ok(result) => {
                self.emit_tool_event(name, "complete");
                result
            }
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                self.emit_tool_event(name, "error");
                format!("Error executing {name}: {e}")
            }
        }
    }

    fn emit_tool_event(&self, tool_name: &str, status: &str) {
        if let Some(ref bus) = self.bus {
            let run_id = self.run_id.read().unwrap().clone();
            let seq = bus.next_seq(&run_id);
            bus.emit_system_event(SystemEvent::tool(run_id, seq, tool_name, status));
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"}
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, params: ToolParams) -> anyhow::Result<String> {
            Ok(format!(
                "Echo: {}",
                params.get("text").and_then(|v| v.as_str()).unwrap_or("")
            ))
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(&self, _params: ToolParams) -> anyhow::Result<String> {
            anyhow::bail!("intentional failure")
        }
    }

    fn text_params(text: &str) -> ToolParams {
        let mut p = ToolParams::new();
        p.insert("text".into(), json!(text));
        p
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert!(reg.has("echo"));
        assert!(!reg.has("nope"));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.tool_names(), vec!["echo"]);
    }

    #[test]
    fn test_definitions_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool));
        reg.register(Arc::new(EchoTool));
        let defs = reg.get_definitions();
        assert_eq!(defs[0].function.name, "echo");
        assert_eq!(defs[1].function.name, "fail");
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert_eq!(reg.execute("echo", text_params("hi")).await, "Echo: hi");
    }

    #[tokio::test]
    async fn test_execute_not_found() {
        let reg = ToolRegistry::new();
        let result = reg.execute("missing", ToolParams::new()).await;
        assert!(result.starts_with("Error: Tool 'missing' not found"));
    }

    #[tokio::test]
    async fn test_execute_invalid_args() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let result = reg.execute("echo", ToolParams::new()).await;
        assert!(result.starts_with("Error: Invalid arguments"));
    }

    #[tokio::test]
    async fn test_execute_handler_error_captured() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool));
        let result = reg.execute("fail", ToolParams::new()).await;
        assert!(result.starts_with("Error executing fail:"));
        assert!(result.contains("intentional failure"));
    }

    #[tokio::test]
    async fn test_tool_events_emitted_in_seq_order() {
        let bus = Arc::new(MessageBus::new(16));
        let collected = Arc::new(std::sync::Mutex::new(Vec::<SystemEvent>::new()));
        let sink = collected.clone();
        bus.subscribe_system_events(Arc::new(move |ev| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(ev);
                Ok(())
            })
        }));
        let dispatcher = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.dispatch_system_events().await })
        };

        let mut reg = ToolRegistry::new();
        reg.attach_bus(bus.clone());
        reg.register(Arc::new(EchoTool));
        reg.set_run_id("run-42");

        reg.execute("echo", text_params("one")).await;
        reg.execute("echo", text_params("two")).await;

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        bus.stop();
        let _ = dispatcher.await;

        // start + complete per call, strictly increasing seq within the run.
        let events = collected.lock().unwrap();
        assert_eq!(events.len(), 4);
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert!(events.iter().all(|e| e.run_id == "run-42"));
        assert_eq!(events[0].data["status"], json!("start"));
        assert_eq!(events[1].data["status"], json!("complete"));
    }
}
