//! Tool modules — the trait, the registry, and the built-in tool families.

pub mod base;
pub mod cron;
pub mod message;
pub mod registry;
pub mod shell;
pub mod system;
pub mod weather;

pub use base::{optional_bool, optional_i64, optional_string, require_string, Tool};
pub use cron::{CronTool, SchedulerPort};
pub use message::MessageTool;
pub use registry::ToolRegistry;
pub use shell::{ExecTool, PendingApproval};
pub use system::{CleanupTool, ProcessMemoryTool, SystemInfoTool};
pub use weather::WeatherTool;
