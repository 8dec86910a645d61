pub mod config;
pub mod error;
pub mod event;
pub mod tool;
pub mod traits;
pub mod types;

pub use config::{AgentConfig, AppConfig};
pub use error::{Result, StrandError};
pub use event::EventBus;
pub use tool::{ToolDescriptor, ToolParameterDescriptor, ToolParameterType};
pub use types::*;
