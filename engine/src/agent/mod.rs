//! Assistant orchestration
//!
//! Ties the model, the conversation store, the bounded executor and the
//! upload workspace together behind one `Assistant`, and exposes it to core
//! tools through the sdk `AssistantHandle`.

pub mod assistant;
pub mod code_blocks;
pub mod handle;
pub mod prompts;

pub use assistant::Assistant;
pub use code_blocks::CodeBlock;
pub use handle::EngineAssistantHandle;
