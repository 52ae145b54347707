//! File operation tools: Read, Write, Edit, Glob, Grep.

mod edit;
mod glob;
mod grep;
mod path;
mod read;
mod write;

pub use edit::EditTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use read::ReadTool;
pub use write::WriteTool;
