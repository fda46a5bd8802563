//! `genflow-providers`: pluggable AI backends behind an explicit capability query.
//!
//! Every provider can `execute` and report availability. Streaming, tool
//! calling and model listing are optional and discovered at runtime through
//! [`Provider::capabilities`] and the `as_*` accessors, never by downcasting.

pub mod builtin;
pub mod capability;
pub mod error;
pub mod pricing;
pub mod provider;
pub mod registry;

pub use builtin::{EchoProvider, StubProvider};
pub use capability::{Capabilities, Capability};
pub use error::ProviderError;
pub use pricing::{PriceQuote, PriceTable, Pricing};
pub use provider::{
    ChatMessage, ChunkSink, FinishReason, Generation, GenerationRequest, ModelLister, Provider,
    StreamingProvider, ToolCall, ToolCallingProvider, ToolChoice, ToolDefinition,
};
pub use registry::{ProviderInfo, ProviderRegistry, Selection};
