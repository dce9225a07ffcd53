pub mod event;
pub mod message;
pub mod session;
pub mod tool;

pub use event::{ChatRequest, MessageEvent, FINISH_REASON_STOP};
pub use message::{Message, MessageContent, MessageMetadata, Role, TextContent, TokenState};
pub use session::{
    ModelConfig, Session, SessionDisplayInfo, SessionInsights, SessionListResponse, SessionType,
};
pub use tool::{CallToolRequest, CallToolResponse, ToolInfo};
