pub mod builtin;
pub mod registry;

pub use registry::{parse_args, ToolRegistry};
