//! # Chat Playground Engine
//!
//! Streaming chat-completion orchestration for a tool-calling playground.
//!
//! ## Overview
//!
//! The engine runs one user submission ("turn") against an OpenAI-compatible
//! or Azure OpenAI provider:
//!
//! - streams assistant text to the caller as it arrives
//! - reassembles fragmented tool calls from the stream
//! - executes tool calls concurrently against their bound HTTP endpoints,
//!   with credentials picked by the authorization resolver
//! - feeds tool results back to the model until it answers in plain text or
//!   the iteration cap is reached
//! - keeps partial output on errors and cancellation
//!
//! Persistence and UI are left to the caller. Storage is reached through the
//! [`store::Store`] trait; rendering happens from [`TurnEvent`]s.
//!
//! ## Running a turn
//!
//! ```rust,no_run
//! use chat_playground::{ApiConfig, Message, Orchestrator, OrchestratorOptions, TurnEvent, TurnInput, tool};
//! use chat_playground::store::Catalog;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApiConfig::builder()
//!         .provider("openai")
//!         .api_key("sk-...")
//!         .model("gpt-4o-mini")
//!         .build()?;
//!
//!     let weather = tool("get_weather", "Current weather for a city")
//!         .param("city", "string")
//!         .get("https://api.example.com/weather/{city}")
//!         .build();
//!
//!     let input = TurnInput::new(config, Vec::new(), Message::user("Weather in Paris?"))
//!         .with_selected_tools(vec![weather.id.clone()])
//!         .with_catalog(Catalog {
//!             tools: vec![weather],
//!             ..Default::default()
//!         });
//!
//!     let orchestrator = Orchestrator::new(OrchestratorOptions::default())?;
//!     let mut turn = orchestrator.submit(input)?;
//!
//!     while let Some(event) = turn.next().await {
//!         match event {
//!             TurnEvent::Content(text) => print!("{}", text),
//!             TurnEvent::ToolCall(execution) => {
//!                 println!("\n[{} {:?}]", execution.tool_call.name(), execution.status)
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     let outcome = turn.outcome().await?;
//!     println!("\n{:?}, {} new messages", outcome.state, outcome.messages.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **provider**: chat-completion clients (OpenAI-compatible, Azure) behind one trait
//! - **stream**: SSE framing and tool-call fragment accumulation
//! - **orchestrator**: the turn state machine, cancellation and tool fan-out
//! - **invoker**: HTTP execution of a single tool call
//! - **auth**: authorization selection and header merging
//! - **proxy**: passthrough envelope for tool requests
//! - **tools / agent / types**: the data model
//! - **store**: storage collaborator interface and in-memory implementation
//! - **models**: available-model list with change subscription
//! - **generators**: title and agent-instruction helpers
//! - **config / error / retry**: configuration, error taxonomy, backoff

mod agent;
mod auth;
mod config;
mod error;
mod generators;
mod invoker;
mod models;
mod orchestrator;
mod provider;
mod tools;
mod types;

/// Passthrough proxy envelope and forwarder for tool HTTP calls.
pub mod proxy;

/// Retry with exponential backoff; used when opening provider streams.
pub mod retry;

/// Storage collaborator: the `Store` trait, typed record helpers and the
/// per-turn catalog loader.
pub mod store;

/// SSE parsing and tool-call fragment accumulation.
pub mod stream;

// --- Configuration ---

pub use config::{
    ApiConfig, ApiConfigBuilder, DEFAULT_AZURE_API_VERSION, DEFAULT_MAX_ITERATIONS,
    OrchestratorOptions, OrchestratorOptionsBuilder, ProviderConfig, ProviderKind,
    default_endpoint, get_endpoint, known_providers,
};

// --- Error Handling ---

pub use error::{Error, Result, ToolExecutionError};

// --- Data Model ---

pub use agent::{Agent, ToolBinding, normalize_bindings};
pub use tools::{Header, HttpMethod, HttpRequestTemplate, Tool, ToolBuilder, tool};
pub use types::{
    ChunkEvent, ExecutionStatus, FunctionCall, Message, MessageRole, ToolCall, ToolCallDelta,
    ToolCallExecution, Usage, is_tool_use_finish,
};

// --- Authorization ---

pub use auth::{Authorization, merge_headers, resolve, set_default, set_default_in_store};

// --- Providers ---

pub use provider::{
    AzureOpenAiProvider, ChatProvider, OpenAiProvider, build_http_client, create_provider,
    supported_providers,
};

// --- Tool Invocation ---

pub use invoker::{PreparedRequest, ToolInvoker, prepare_request};

// --- Orchestration ---

pub use orchestrator::{
    ActiveTool, Interrupt, Orchestrator, TurnEvent, TurnHandle, TurnInput, TurnOutcome,
    TurnState, request_history,
};

// --- Helpers ---

pub use generators::{
    DEFAULT_TITLE, MAX_TITLE_CHARS, TextStream, clean_title, generate_agent_instructions,
    generate_title, stream_agent_instructions,
};
pub use models::{AvailableModels, ModelAvailability};

/// The types most callers need.
///
/// `use chat_playground::prelude::*;`
pub mod prelude {
    pub use crate::store::{Catalog, MemoryStore, Session, Store};
    pub use crate::{
        Agent, ApiConfig, Authorization, ChatProvider, Error, Message, MessageRole,
        Orchestrator, OrchestratorOptions, Result, Tool, ToolBinding, ToolCall,
        ToolCallExecution, TurnEvent, TurnInput, TurnOutcome, TurnState, tool,
    };
}
