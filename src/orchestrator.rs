//! Conversation orchestrator: one user submission through to a terminal state.
//!
//! A turn is a small state machine:
//!
//! ```text
//! Idle -> Sending -> StreamingAssistant -> Done
//!                          |
//!                          v
//!                    ToolDispatch -> Sending -> ...
//!
//! any non-Idle state -> Cancelled | Errored
//! ```
//!
//! * **Sending**: the outbound list is `[system] + history + user message`,
//!   with the system prompt taken from the session override, then the agent,
//!   then the global config (first non-empty wins). Only the active tool set
//!   is offered; an empty set sends no `tools` field.
//! * **StreamingAssistant**: content deltas are forwarded to the caller as
//!   they arrive and buffered; tool-call fragments are accumulated per index.
//!   Tools run only if calls arrived and the finish reason asks for tool use;
//!   otherwise the turn ends `Done` with the buffered content.
//! * **ToolDispatch**: all tool calls of one assistant message run
//!   concurrently. Tool messages are appended in call order, not completion
//!   order. A failing call becomes an `Error: ..` tool message; it never ends
//!   the turn.
//! * **Iteration cap**: at most `max_iterations` model round-trips. If the
//!   model still asks for tools on the last one, the turn ends `Done` with the
//!   last assistant message marked `incomplete` and its tool calls dropped.
//! * **Errored**: a provider failure ends the turn; whatever content was
//!   already streamed is kept on an assistant message carrying `error` and
//!   `can_retry`.
//! * **Cancelled**: the [`Interrupt`] is checked between every stream event
//!   and around tool dispatch. Partial content is kept as an `incomplete`
//!   assistant message. Tool requests already sent run to completion, but
//!   their results are discarded.
//!
//! Existing transcript entries are never modified. Every new message of the
//! turn is returned in [`TurnOutcome::messages`] for the caller to append.
//!
//! # Example
//!
//! ```rust,no_run
//! use chat_playground::{ApiConfig, Message, Orchestrator, OrchestratorOptions, TurnEvent, TurnInput};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ApiConfig::from_env()?;
//! let orchestrator = Orchestrator::new(OrchestratorOptions::default())?;
//!
//! let mut turn = orchestrator.submit(TurnInput::new(config, Vec::new(), Message::user("Hi!")))?;
//! while let Some(event) = turn.next().await {
//!     if let TurnEvent::Content(text) = event {
//!         print!("{}", text);
//!     }
//! }
//! let outcome = turn.outcome().await?;
//! println!("\n{} new messages", outcome.messages.len());
//! # Ok(())
//! # }
//! ```

use crate::agent::ToolBinding;
use crate::auth;
use crate::config::{ApiConfig, OrchestratorOptions};
use crate::error::ToolExecutionError;
use crate::invoker::ToolInvoker;
use crate::provider::{ChatProvider, build_http_client, create_provider};
use crate::retry::retry_with_backoff_conditional;
use crate::store::Catalog;
use crate::stream::{ChunkStream, ToolCallAccumulator};
use crate::tools::Tool;
use crate::types::{Message, MessageRole, ToolCall, ToolCallExecution, Usage, is_tool_use_finish};
use crate::{Error, Result};
use futures::StreamExt;
use futures::future::join_all;
use futures::stream::Stream;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::Notify;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Sending,
    StreamingAssistant,
    ToolDispatch,
    Done,
    Cancelled,
    Errored,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Done | TurnState::Cancelled | TurnState::Errored)
    }
}

/// Progress reported while a turn runs
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    State(TurnState),
    /// Assistant text delta, forwarded as soon as it arrives
    Content(String),
    /// Tool execution created (`pending`) or settled
    ToolCall(ToolCallExecution),
    Usage(Usage),
}

/// Cancellation signal shared between a turn and whoever may stop it.
///
/// Setting the flag is idempotent; waiters are woken immediately.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`Interrupt::trigger`] has been called
    pub async fn triggered(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// Both handles share one flag
    fn same(&self, other: &Interrupt) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

/// Everything one turn needs, snapshotted at submission.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub config: ApiConfig,
    /// Transcript before the new user message
    pub history: Vec<Message>,
    pub user_message: Message,
    /// Session-level system prompt override
    pub session_system_prompt: Option<String>,
    pub catalog: Catalog,
    /// Tools offered when no agent is active
    pub selected_tool_ids: Vec<String>,
    /// Re-submission of a user message already in the caller's transcript
    pub is_retry: bool,
}

impl TurnInput {
    pub fn new(config: ApiConfig, history: Vec<Message>, user_message: Message) -> Self {
        Self {
            config,
            history,
            user_message,
            session_system_prompt: None,
            catalog: Catalog::default(),
            selected_tool_ids: Vec::new(),
            is_retry: false,
        }
    }

    /// Re-submit the last user message of `transcript`.
    ///
    /// Everything after that message (typically an errored assistant reply) is
    /// left out of the request; the caller should drop those entries before
    /// appending the outcome. The user message itself is not repeated in
    /// [`TurnOutcome::messages`].
    pub fn retry_last(config: ApiConfig, transcript: &[Message]) -> Result<Self> {
        let idx = transcript
            .iter()
            .rposition(|m| m.role == MessageRole::User)
            .ok_or_else(|| Error::invalid_input("No user message to retry"))?;

        let mut input = Self::new(config, transcript[..idx].to_vec(), transcript[idx].clone());
        input.is_retry = true;
        Ok(input)
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_session_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.session_system_prompt = Some(prompt.into());
        self
    }

    pub fn with_selected_tools(mut self, tool_ids: Vec<String>) -> Self {
        self.selected_tool_ids = tool_ids;
        self
    }

    /// Session override, then agent prompt, then global default
    pub fn system_prompt(&self) -> Option<&str> {
        [
            self.session_system_prompt.as_deref(),
            self.catalog.agent.as_ref().map(|a| a.system_prompt.as_str()),
            Some(self.config.system_prompt.as_str()),
        ]
        .into_iter()
        .flatten()
        .find(|p| !p.trim().is_empty())
    }

    /// Tools offered to the model, each with the agent binding it came from.
    ///
    /// Tools whose schema does not declare a function under their own name
    /// are skipped.
    pub fn active_tools(&self) -> Vec<ActiveTool> {
        let candidates: Vec<ActiveTool> = match &self.catalog.agent {
            Some(agent) => agent
                .bound_tools(&self.catalog.tools)
                .into_iter()
                .map(|(tool, binding)| ActiveTool {
                    tool: tool.clone(),
                    binding: Some(binding.clone()),
                })
                .collect(),
            None => self
                .selected_tool_ids
                .iter()
                .filter_map(|id| self.catalog.tools.iter().find(|t| &t.id == id))
                .map(|tool| ActiveTool {
                    tool: tool.clone(),
                    binding: None,
                })
                .collect(),
        };

        candidates
            .into_iter()
            .filter(|active| match active.tool.validate() {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Skipping tool: {}", e);
                    false
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ActiveTool {
    pub tool: Tool,
    pub binding: Option<ToolBinding>,
}

/// Result of a finished turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// `Done`, `Cancelled` or `Errored`
    pub state: TurnState,
    /// New transcript entries, in order
    pub messages: Vec<Message>,
    pub executions: Vec<ToolCallExecution>,
    /// The iteration cap was hit while the model still wanted tools
    pub incomplete: bool,
    /// Model round-trips made
    pub iterations: u32,
    pub usage: Option<Usage>,
    pub error: Option<String>,
}

impl TurnOutcome {
    fn new() -> Self {
        Self {
            state: TurnState::Idle,
            messages: Vec::new(),
            executions: Vec::new(),
            incomplete: false,
            iterations: 0,
            usage: None,
            error: None,
        }
    }

    /// Final assistant message, if one was committed
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
    }
}

/// A running turn: a stream of [`TurnEvent`]s plus the final outcome.
pub struct TurnHandle {
    events: UnboundedReceiverStream<TurnEvent>,
    task: JoinHandle<TurnOutcome>,
    interrupt: Interrupt,
}

impl TurnHandle {
    pub fn cancel(&self) {
        self.interrupt.trigger();
    }

    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Wait for the turn to finish. Events not yet read are dropped.
    pub async fn outcome(self) -> Result<TurnOutcome> {
        self.task
            .await
            .map_err(|e| Error::other(format!("Turn task failed: {}", e)))
    }
}

impl Stream for TurnHandle {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// Runs turns; at most one is active at a time.
#[derive(Clone)]
pub struct Orchestrator {
    options: OrchestratorOptions,
    http: reqwest::Client,
    invoker: ToolInvoker,
    provider_override: Option<Arc<dyn ChatProvider>>,
    active: Arc<Mutex<Option<Interrupt>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("options", &self.options)
            .field("provider_override", &self.provider_override.is_some())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions) -> Result<Self> {
        let http = build_http_client(options.connect_timeout)?;
        let mut invoker = ToolInvoker::new(http.clone());
        if let Some(proxy_url) = &options.proxy_url {
            invoker = invoker.with_proxy(proxy_url.clone());
        }
        Ok(Self {
            options,
            http,
            invoker,
            provider_override: None,
            active: Arc::new(Mutex::new(None)),
        })
    }

    /// Use `provider` for every turn instead of resolving one from the config
    pub fn with_provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.provider_override = Some(provider);
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    fn active(&self) -> MutexGuard<'_, Option<Interrupt>> {
        lock_slot(&self.active)
    }

    /// A turn started here has not finished yet
    pub fn is_busy(&self) -> bool {
        self.active().is_some()
    }

    /// Cancel the active turn, if any
    pub fn cancel(&self) {
        if let Some(interrupt) = self.active().take() {
            log::info!("Cancelling active turn");
            interrupt.trigger();
        }
    }

    fn begin(&self, input: &TurnInput) -> Result<(TurnRunner, Interrupt)> {
        let provider = match &self.provider_override {
            Some(provider) => provider.clone(),
            None => create_provider(&input.config, self.http.clone())?,
        };

        let interrupt = Interrupt::new();
        if let Some(previous) = self.active().replace(interrupt.clone()) {
            log::info!("New submission cancels the active turn");
            previous.trigger();
        }

        let runner = TurnRunner {
            provider,
            invoker: self.invoker.clone(),
            options: self.options.clone(),
        };
        Ok((runner, interrupt))
    }

    /// Start a turn in the background.
    ///
    /// Configuration problems are reported here, before any network I/O.
    /// Any turn still running is cancelled first.
    pub fn submit(&self, input: TurnInput) -> Result<TurnHandle> {
        let (runner, interrupt) = self.begin(&input)?;
        let (tx, rx) = unbounded_channel();

        let turn_interrupt = interrupt.clone();
        let slot = self.active.clone();
        let task = tokio::spawn(async move {
            let outcome = runner.run(input, Some(tx), turn_interrupt.clone()).await;
            release(&slot, &turn_interrupt);
            outcome
        });

        Ok(TurnHandle {
            events: UnboundedReceiverStream::new(rx),
            task,
            interrupt,
        })
    }

    /// Run a turn to completion on the current task, without events.
    pub async fn run_turn(&self, input: TurnInput) -> Result<TurnOutcome> {
        let (runner, interrupt) = self.begin(&input)?;
        let outcome = runner.run(input, None, interrupt.clone()).await;
        release(&self.active, &interrupt);
        Ok(outcome)
    }
}

fn lock_slot(slot: &Mutex<Option<Interrupt>>) -> MutexGuard<'_, Option<Interrupt>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Empty `slot` unless a newer turn has taken it over
fn release(slot: &Mutex<Option<Interrupt>>, interrupt: &Interrupt) {
    let mut active = lock_slot(slot);
    if active.as_ref().is_some_and(|current| current.same(interrupt)) {
        *active = None;
    }
}

struct TurnRunner {
    provider: Arc<dyn ChatProvider>,
    invoker: ToolInvoker,
    options: OrchestratorOptions,
}

/// Mutable state of one running turn
struct TurnRun {
    outcome: TurnOutcome,
    /// Request history: prior transcript plus this turn's messages
    transcript: Vec<Message>,
    events: Option<UnboundedSender<TurnEvent>>,
}

impl TurnRun {
    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            // receiver may be gone; the outcome still carries everything
            let _ = tx.send(event);
        }
    }

    fn set_state(&mut self, state: TurnState) {
        self.outcome.state = state;
        self.emit(TurnEvent::State(state));
    }

    fn commit(&mut self, message: Message) {
        self.transcript.push(message.clone());
        self.outcome.messages.push(message);
    }

    fn add_usage(&mut self, usage: Usage) {
        self.outcome.usage.get_or_insert_with(Usage::default).add(&usage);
        self.emit(TurnEvent::Usage(usage));
    }

    fn finish(mut self, state: TurnState) -> TurnOutcome {
        self.set_state(state);
        log::debug!(
            "Turn finished: {:?} after {} iteration(s), {} new message(s)",
            state,
            self.outcome.iterations,
            self.outcome.messages.len()
        );
        self.outcome
    }

    fn cancelled(mut self, partial: &str) -> TurnOutcome {
        log::info!("Turn cancelled during {:?}", self.outcome.state);
        if !partial.is_empty() {
            self.commit(Message::assistant(partial).with_incomplete(true));
        }
        self.finish(TurnState::Cancelled)
    }

    fn errored(mut self, partial: &str, error: Error) -> TurnOutcome {
        log::warn!("Turn failed: {}", error);
        let text = error.to_string();
        self.commit(Message::assistant(partial).with_error(text.clone()));
        self.outcome.error = Some(text);
        self.finish(TurnState::Errored)
    }
}

/// Outcome of draining one provider stream
enum Streamed {
    Finished {
        content: String,
        calls: Vec<ToolCall>,
        finish_reason: Option<String>,
    },
    Cancelled(String),
    Failed(String, Error),
}

impl TurnRunner {
    async fn run(
        self,
        input: TurnInput,
        events: Option<UnboundedSender<TurnEvent>>,
        interrupt: Interrupt,
    ) -> TurnOutcome {
        let active: Arc<[ActiveTool]> = input.active_tools().into();
        let authorizations: Arc<[auth::Authorization]> = input.catalog.authorizations.clone().into();
        let schemas: Vec<Value> = active.iter().map(|a| a.tool.to_openai_format()).collect();
        let system = input.system_prompt().map(Message::system);

        let mut run = TurnRun {
            outcome: TurnOutcome::new(),
            transcript: request_history(&input.history),
            events,
        };
        if input.is_retry {
            run.transcript.push(input.user_message.clone());
        } else {
            run.commit(input.user_message.clone());
        }

        log::debug!(
            "Turn started on {} with {} tool(s), retry={}",
            self.provider.provider_id(),
            schemas.len(),
            input.is_retry
        );

        let max_iterations = self.options.max_iterations.max(1);
        loop {
            if interrupt.is_triggered() {
                return run.cancelled("");
            }

            run.outcome.iterations += 1;
            run.set_state(TurnState::Sending);

            let mut request: Vec<Message> = Vec::with_capacity(run.transcript.len() + 1);
            request.extend(system.clone());
            request.extend(run.transcript.iter().cloned());

            let stream = tokio::select! {
                biased;
                _ = interrupt.triggered() => return run.cancelled(""),
                opened = self.open_stream(&request, &schemas) => opened,
            };
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => return run.errored("", e),
            };

            run.set_state(TurnState::StreamingAssistant);
            let (content, calls, finish_reason) = match self.drain(stream, &mut run, &interrupt).await {
                Streamed::Finished {
                    content,
                    calls,
                    finish_reason,
                } => (content, calls, finish_reason),
                Streamed::Cancelled(partial) => return run.cancelled(&partial),
                Streamed::Failed(partial, e) => return run.errored(&partial, e),
            };

            if calls.is_empty() || !is_tool_use_finish(finish_reason.as_deref()) {
                if !calls.is_empty() {
                    log::warn!(
                        "Ignoring {} tool call(s) from a stream that finished with {:?}",
                        calls.len(),
                        finish_reason
                    );
                }
                run.commit(Message::assistant(content));
                return run.finish(TurnState::Done);
            }

            if run.outcome.iterations >= max_iterations {
                log::warn!(
                    "Iteration cap of {} reached with {} tool call(s) pending",
                    max_iterations,
                    calls.len()
                );
                run.commit(Message::assistant(content).with_incomplete(true));
                run.outcome.incomplete = true;
                return run.finish(TurnState::Done);
            }

            run.commit(Message::assistant_with_tool_calls(content, calls.clone()));
            run.set_state(TurnState::ToolDispatch);

            if interrupt.is_triggered() {
                return run.cancelled("");
            }

            let pending: Vec<ToolCallExecution> =
                calls.into_iter().map(ToolCallExecution::pending).collect();
            for execution in &pending {
                run.emit(TurnEvent::ToolCall(execution.clone()));
            }

            // detached tasks: a cancelled turn leaves its tool requests running
            let handles: Vec<JoinHandle<ToolCallExecution>> = pending
                .iter()
                .cloned()
                .map(|execution| {
                    tokio::spawn(execute(
                        self.invoker.clone(),
                        execution,
                        active.clone(),
                        authorizations.clone(),
                    ))
                })
                .collect();
            let in_flight = handles.len();
            let settled = tokio::select! {
                biased;
                _ = interrupt.triggered() => {
                    log::debug!("Discarding results of {} in-flight tool call(s)", in_flight);
                    return run.cancelled("");
                }
                settled = join_all(handles) => settled,
            };

            for (mut execution, joined) in pending.into_iter().zip(settled) {
                match joined {
                    Ok(done) => execution = done,
                    Err(e) => execution.fail(format!("Tool task failed: {}", e)),
                }
                run.emit(TurnEvent::ToolCall(execution.clone()));
                run.commit(Message::tool(
                    execution.tool_call.id.clone(),
                    execution.tool_call.name(),
                    execution.message_content(),
                ));
                run.outcome.executions.push(execution);
            }
        }
    }

    async fn open_stream(&self, request: &[Message], schemas: &[Value]) -> Result<ChunkStream> {
        let provider = &self.provider;
        retry_with_backoff_conditional(self.options.retry.clone(), || {
            provider.stream_chat_completion(request, schemas)
        })
        .await
    }

    async fn drain(&self, mut stream: ChunkStream, run: &mut TurnRun, interrupt: &Interrupt) -> Streamed {
        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut finish_reason = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = interrupt.triggered() => return Streamed::Cancelled(content),
                next = stream.next() => next,
            };

            match next {
                None => break,
                Some(Ok(event)) => {
                    if let Some(text) = event.content {
                        content.push_str(&text);
                        run.emit(TurnEvent::Content(text));
                    }
                    accumulator.push_all(&event.tool_call_deltas);
                    if let Some(usage) = event.usage {
                        run.add_usage(usage);
                    }
                    if event.finish_reason.is_some() {
                        finish_reason = event.finish_reason;
                    }
                }
                Some(Err(e)) => return Streamed::Failed(content, e),
            }
        }

        log::debug!(
            "Stream ended (finish_reason={:?}, {} chars, {} tool call(s))",
            finish_reason,
            content.len(),
            accumulator.len()
        );

        Streamed::Finished {
            content,
            calls: accumulator.finish(),
            finish_reason,
        }
    }
}

/// Run one tool call against the tools offered this turn
async fn execute(
    invoker: ToolInvoker,
    mut execution: ToolCallExecution,
    active: Arc<[ActiveTool]>,
    authorizations: Arc<[auth::Authorization]>,
) -> ToolCallExecution {
    let call = execution.tool_call.clone();

    let Some(entry) = active
        .iter()
        .find(|a| a.tool.function_name() == Some(call.name()))
    else {
        log::warn!("Model requested unknown tool '{}'", call.name());
        execution.fail(ToolExecutionError::not_found(call.name()).to_string());
        return execution;
    };

    let authorization = auth::resolve(&entry.tool, &authorizations, entry.binding.as_ref());
    log::debug!(
        "Dispatching tool '{}' (call {}, authorization {:?})",
        entry.tool.name,
        call.id,
        authorization.map(|a| a.id.as_str())
    );

    match invoker.invoke(&entry.tool, &call, authorization).await {
        Ok(result) => execution.complete(result),
        Err(e) => execution.fail(e.to_string()),
    }
    log::debug!("Tool '{}' settled: {:?}", entry.tool.name, execution.status);
    execution
}

/// History as it is replayed to the provider.
///
/// Assistant messages that carry an error are left out. Tool calls that never
/// received a tool message (a turn cancelled mid-dispatch) are stripped so the
/// request stays well-formed; an assistant message left with neither content
/// nor calls is dropped.
pub fn request_history(history: &[Message]) -> Vec<Message> {
    let answered: HashSet<&str> = history
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();

    history
        .iter()
        .filter(|m| !(m.role == MessageRole::Assistant && m.error.is_some()))
        .filter_map(|m| {
            if m.role != MessageRole::Assistant || !m.has_tool_calls() {
                return Some(m.clone());
            }
            let mut message = m.clone();
            message
                .tool_calls
                .retain(|call| answered.contains(call.id.as_str()));
            if message.tool_calls.is_empty() && message.content.is_empty() {
                None
            } else {
                Some(message)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::tools::tool;

    fn config() -> ApiConfig {
        ApiConfig::builder()
            .provider("openai")
            .api_key("k")
            .model("m")
            .system_prompt("global")
            .build()
            .unwrap()
    }

    #[test]
    fn test_system_prompt_precedence() {
        let mut input = TurnInput::new(config(), vec![], Message::user("hi"));
        assert_eq!(input.system_prompt(), Some("global"));

        input.catalog.agent = Some(Agent::new("Bot", "agent prompt"));
        assert_eq!(input.system_prompt(), Some("agent prompt"));

        input.session_system_prompt = Some("   ".to_string());
        assert_eq!(input.system_prompt(), Some("agent prompt"));

        input = input.with_session_prompt("session prompt");
        assert_eq!(input.system_prompt(), Some("session prompt"));

        let mut bare = TurnInput::new(config(), vec![], Message::user("hi"));
        bare.config.system_prompt.clear();
        assert_eq!(bare.system_prompt(), None);
    }

    #[test]
    fn test_active_tools_agent_vs_selection() {
        let t1 = tool("one", "One").build().with_id("t1");
        let t2 = tool("two", "Two").build().with_id("t2");
        let catalog = Catalog {
            agent: None,
            tools: vec![t1, t2],
            authorizations: vec![],
        };

        let input = TurnInput::new(config(), vec![], Message::user("hi"))
            .with_catalog(catalog.clone())
            .with_selected_tools(vec!["t2".to_string(), "gone".to_string()]);
        let names: Vec<String> = input.active_tools().into_iter().map(|a| a.tool.name).collect();
        assert_eq!(names, vec!["two"]);

        let mut with_agent = input.clone();
        with_agent.catalog.agent =
            Some(Agent::new("Bot", "").with_binding(ToolBinding::new("t1").with_authorization("a1")));
        let active = with_agent.active_tools();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].tool.name, "one");
        assert_eq!(
            active[0].binding.as_ref().and_then(|b| b.authorization_id.as_deref()),
            Some("a1")
        );
    }

    #[test]
    fn test_active_tools_skip_mismatched_schema() {
        let good = tool("good", "Good").build().with_id("g");
        let mut renamed = tool("renamed", "Renamed").build().with_id("r");
        renamed.schema["function"]["name"] = serde_json::json!("something_else");

        let input = TurnInput::new(config(), vec![], Message::user("hi"))
            .with_catalog(Catalog {
                agent: None,
                tools: vec![good, renamed],
                authorizations: vec![],
            })
            .with_selected_tools(vec!["g".to_string(), "r".to_string()]);

        let active = input.active_tools();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].tool.function_name(), Some("good"));
    }

    #[tokio::test]
    async fn test_execute_matches_schema_function_name() {
        let calc = tool("calculator", "Adds").build();
        let active: Arc<[ActiveTool]> = vec![ActiveTool {
            tool: calc,
            binding: None,
        }]
        .into();
        let invoker = ToolInvoker::new(reqwest::Client::new());
        let no_auth: Arc<[auth::Authorization]> = Arc::new([]);

        let found = execute(
            invoker.clone(),
            ToolCallExecution::pending(ToolCall::new("c1", "calculator", "{}")),
            active.clone(),
            no_auth.clone(),
        )
        .await;
        assert_eq!(found.status, crate::types::ExecutionStatus::Completed);

        let missing = execute(
            invoker,
            ToolCallExecution::pending(ToolCall::new("c2", "Calculator", "{}")),
            active,
            no_auth,
        )
        .await;
        assert_eq!(missing.status, crate::types::ExecutionStatus::Failed);
    }

    #[test]
    fn test_retry_last_splits_transcript() {
        let transcript = vec![
            Message::user("first"),
            Message::assistant("answer"),
            Message::user("second"),
            Message::assistant("partial").with_error("boom"),
        ];
        let input = TurnInput::retry_last(config(), &transcript).unwrap();
        assert!(input.is_retry);
        assert_eq!(input.user_message.content, "second");
        assert_eq!(input.history.len(), 2);

        assert!(TurnInput::retry_last(config(), &[]).is_err());
    }

    #[test]
    fn test_request_history_filters() {
        let answered = ToolCall::new("c1", "f", "{}");
        let orphan = ToolCall::new("c2", "f", "{}");
        let history = vec![
            Message::user("q"),
            Message::assistant_with_tool_calls("", vec![answered.clone(), orphan]),
            Message::tool("c1", "f", "ok"),
            Message::assistant("partial").with_error("network"),
            Message::assistant_with_tool_calls("", vec![ToolCall::new("c3", "f", "{}")]),
        ];

        let replay = request_history(&history);
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[1].tool_calls, vec![answered]);
        assert_eq!(replay[2].role, MessageRole::Tool);
    }

    #[tokio::test]
    async fn test_interrupt_wakes_waiters() {
        let interrupt = Interrupt::new();
        let waiter = {
            let interrupt = interrupt.clone();
            tokio::spawn(async move { interrupt.triggered().await })
        };
        tokio::task::yield_now().await;
        interrupt.trigger();
        interrupt.trigger();
        waiter.await.unwrap();
        assert!(interrupt.is_triggered());

        // already triggered resolves immediately
        interrupt.triggered().await;
    }

    #[test]
    fn test_terminal_states() {
        assert!(TurnState::Done.is_terminal());
        assert!(TurnState::Cancelled.is_terminal());
        assert!(TurnState::Errored.is_terminal());
        assert!(!TurnState::ToolDispatch.is_terminal());
    }
}
