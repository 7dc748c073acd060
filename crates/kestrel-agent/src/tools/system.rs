//! Host system tools — hardware specs, disk cleanup, per-process memory.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::info;

use super::base::{optional_i64, optional_string, Tool, ToolParams};

const SHELL_TIMEOUT: Duration = Duration::from_secs(60);

/// Run a shell script and capture combined output.
async fn run_shell(script: &str) -> anyhow::Result<String> {
    let child = Command::new("sh")
        .args(["-c", script])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| anyhow::anyhow!("Failed to spawn shell: {e}"))?;

    let output = tokio::time::timeout(SHELL_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| anyhow::anyhow!("Shell command timed out"))?
        .map_err(|e| anyhow::anyhow!("Shell command failed: {e}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stdout.trim().is_empty() && !stderr.trim().is_empty() {
        Ok(stderr.trim().to_string())
    } else {
        Ok(stdout.trim().to_string())
    }
}

// ─────────────────────────────────────────────
// get_system_info
// ─────────────────────────────────────────────

/// Reports CPU, memory, disk, and OS details of the host.
pub struct SystemInfoTool;

#[async_trait]
impl Tool for SystemInfoTool {
    fn name(&self) -> &str {
        "get_system_info"
    }

    fn description(&self) -> &str {
        "Get hardware (CPU, RAM, disk) and OS specifications of the host machine."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _params: ToolParams) -> anyhow::Result<String> {
        let script = match std::env::consts::OS {
            "linux" => {
                r####"echo "### System Specifications"
echo "**OS:** $(uname -sr)"
echo "**CPU:** $(grep -m1 'model name' /proc/cpuinfo | cut -d: -f2 | sed 's/^ //') ($(nproc) cores)"
echo "**RAM:** $(awk '/MemTotal/{printf "%.1f GB", $2/1048576}' /proc/meminfo) total, $(awk '/MemAvailable/{printf "%.1f GB", $2/1048576}' /proc/meminfo) available"
echo "**Disk:**"
df -h --output=target,size,avail 2>/dev/null | tail -n +2 | head -5 | sed 's/^/  /'"####
            }
            "macos" => {
                r####"echo "### System Specifications"
echo "**OS:** $(sw_vers -productName) $(sw_vers -productVersion)"
echo "**CPU:** $(sysctl -n machdep.cpu.brand_string) ($(sysctl -n hw.ncpu) cores)"
echo "**RAM:** $(echo "$(sysctl -n hw.memsize) / 1073741824" | bc) GB"
echo "**Disk:**"
df -h / | tail -1 | sed 's/^/  /'"####
            }
            other => {
                return Ok(format!("System info not supported on OS: {other}"));
            }
        };
        run_shell(script).await
    }
}

// ─────────────────────────────────────────────
// cleanup_system
// ─────────────────────────────────────────────

/// Frees disk space at three levels: quick, standard, deep.
pub struct CleanupTool;

impl CleanupTool {
    fn normalize_level(level: Option<String>) -> String {
        match level.as_deref() {
            Some("quick") | Some("deep") => level.unwrap(),
            _ => "standard".to_string(),
        }
    }
}

#[async_trait]
impl Tool for CleanupTool {
    fn name(&self) -> &str {
        "cleanup_system"
    }

    fn description(&self) -> &str {
        "Free disk space by clearing temp files and caches. \
         Levels: quick (temp only), standard (temp + caches), deep (adds package cleanup)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "level": {
                    "type": "string",
                    "description": "quick, standard, or deep (default standard)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: ToolParams) -> anyhow::Result<String> {
        let level = Self::normalize_level(optional_string(&params, "level"));
        info!(level = %level, "running system cleanup");

        if std::env::consts::OS != "linux" && std::env::consts::OS != "macos" {
            return Ok(format!(
                "Cleanup not supported on OS: {}",
                std::env::consts::OS
            ));
        }

        let mut cmds: Vec<String> = vec![
            "before=$(df / --output=avail 2>/dev/null | tail -1 || df / | awk 'NR==2{print $4}')"
                .to_string(),
            "rm -rf \"${TMPDIR:-/tmp}\"/* 2>/dev/null || true".to_string(),
        ];
        if level == "standard" || level == "deep" {
            cmds.push("rm -rf ~/.cache/* 2>/dev/null || true".to_string());
            cmds.push("command -v journalctl >/dev/null && journalctl --vacuum-time=3d 2>/dev/null || true".to_string());
        }
        if level == "deep" {
            cmds.push("command -v apt-get >/dev/null && apt-get clean 2>/dev/null || true".to_string());
        }
        cmds.push(
            "after=$(df / --output=avail 2>/dev/null | tail -1 || df / | awk 'NR==2{print $4}')"
                .to_string(),
        );
        cmds.push(format!("echo \"### Cleanup Complete (level: {level})\""));
        cmds.push("echo \"Free space: ${before}K -> ${after}K\"".to_string());

        run_shell(&cmds.join("\n")).await
    }
}

// ─────────────────────────────────────────────
// get_process_memory
// ─────────────────────────────────────────────

/// Lists the processes using the most memory.
pub struct ProcessMemoryTool;

#[async_trait]
impl Tool for ProcessMemoryTool {
    fn name(&self) -> &str {
        "get_process_memory"
    }

    fn description(&self) -> &str {
        "List the processes using the most memory, with their RSS in MB."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "How many processes to show (default 15, max 200)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: ToolParams) -> anyhow::Result<String> {
        let limit = optional_i64(&params, "limit").unwrap_or(15).clamp(1, 200);
        let script = format!(
            r####"echo "### Top {limit} processes by memory"
ps -eo pid,rss,comm --sort=-rss 2>/dev/null | head -n {rows} | awk 'NR==1{{print "  PID  RSS(MB)  COMMAND"}} NR>1{{printf "  %-6s %-8.1f %s\n", $1, $2/1024, $3}}'"####,
            rows = limit + 1,
        );
        run_shell(&script).await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_shell_captures_stdout() {
        let out = run_shell("printf hello").await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_run_shell_falls_back_to_stderr() {
        let out = run_shell("printf oops 1>&2").await.unwrap();
        assert_eq!(out, "oops");
    }

    #[test]
    fn test_cleanup_level_normalization() {
        assert_eq!(CleanupTool::normalize_level(Some("quick".into())), "quick");
        assert_eq!(CleanupTool::normalize_level(Some("deep".into())), "deep");
        assert_eq!(CleanupTool::normalize_level(Some("weird".into())), "standard");
        assert_eq!(CleanupTool::normalize_level(None), "standard");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_system_info_reports_sections() {
        let out = SystemInfoTool.execute(ToolParams::new()).await.unwrap();
        assert!(out.contains("System Specifications"));
        assert!(out.contains("CPU"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_process_memory_respects_limit() {
        let mut params = ToolParams::new();
        params.insert("limit".into(), serde_json::json!(3));
        let out = ProcessMemoryTool.execute(params).await.unwrap();
        assert!(out.contains("Top 3 processes"));
        // Header + at most 3 process lines after the title line.
        assert!(out.lines().count() <= 5);
    }

    #[test]
    fn test_tool_names_are_stable() {
        assert_eq!(SystemInfoTool.name(), "get_system_info");
        assert_eq!(CleanupTool.name(), "cleanup_system");
        assert_eq!(ProcessMemoryTool.name(), "get_process_memory");
    }
}
