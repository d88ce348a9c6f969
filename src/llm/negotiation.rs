//! The tool-call negotiation loop.
//!
//! One query is answered in at most two completions:
//!
//! 1. Fetch the tool catalog from the host and offer it to the model with
//!    `tool_choice: auto`.
//! 2. If the model answers directly, that answer is final.
//! 3. Otherwise each requested call, in order, goes through the approval
//!    authority. Approved calls run on the host; denied calls are answered
//!    with `Tool '<name>' denied`. Either way exactly one tool message is
//!    appended per call.
//! 4. A second completion with `tool_choice: none` produces the answer.
//!
//! Tool-scoped host failures (unknown tool, bad arguments, handler error)
//! become a tool message and the query continues. Transport failures,
//! timeouts and provider errors abort the query.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{EventSink, NegotiationEvent, ToolSummary};
use super::{
    CompletionProvider, CompletionRequest, CompletionResponse, Message, PendingCall, ToolChoice,
    tool_schema,
};
use crate::approval::{ApprovalAuthority, Decision};
use crate::error::NegotiationError;
use crate::mcp::ToolHost;

#[derive(Debug, Clone)]
pub struct NegotiationOptions {
    pub model: String,
    /// Longest wait for one approval decision. `None` waits indefinitely.
    pub approval_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Completed,
    Denied,
    Failed,
}

/// What happened to one requested tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub call_id: Option<String>,
    pub name: String,
    pub status: ToolStatus,
    /// Content of the tool message sent back to the model.
    pub content: String,
}

/// Result of a negotiated query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// Final answer, trimmed.
    pub answer: String,
    /// The full conversation, starting with the user message.
    pub messages: Vec<Message>,
    pub tool_results: Vec<ToolOutcome>,
    /// Number of completion calls made (1 or 2).
    pub completion_requests: usize,
}

/// Phases of one query, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Catalog,
    FirstCompletion,
    ToolCalls,
    SecondCompletion,
    Done,
}

pub struct Negotiator {
    provider: Arc<dyn CompletionProvider>,
    host: Arc<dyn ToolHost>,
    approval: Arc<dyn ApprovalAuthority>,
    options: NegotiationOptions,
    events: Option<Box<dyn EventSink>>,
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("options", &self.options)
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

impl Negotiator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        host: Arc<dyn ToolHost>,
        approval: Arc<dyn ApprovalAuthority>,
        options: NegotiationOptions,
    ) -> Self {
        Self {
            provider,
            host,
            approval,
            options,
            events: None,
        }
    }

    /// Report progress to `events`, inline with the loop.
    #[must_use]
    pub fn with_events(mut self, events: impl EventSink + 'static) -> Self {
        self.events = Some(Box::new(events));
        self
    }

    pub async fn process_query(&self, query: &str) -> Result<QueryOutcome, NegotiationError> {
        self.process_query_with_cancel(query, &CancellationToken::new())
            .await
    }

    /// Like [`Negotiator::process_query`], aborting with
    /// [`NegotiationError::Cancelled`] as soon as `cancel` fires.
    pub async fn process_query_with_cancel(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome, NegotiationError> {
        let request_id = Uuid::new_v4();
        tracing::info!(
            request_id = %request_id,
            query_length = query.len(),
            "Starting query negotiation"
        );

        trace_phase(request_id, Phase::Catalog);
        let descriptors = cancellable(cancel, self.host.list_tools()).await??;
        for descriptor in &descriptors {
            tracing::debug!(
                name: "mcp.tool.discovered",
                request_id = %request_id,
                tool_name = %descriptor.name,
                "MCP tool discovered"
            );
        }
        self.emit(NegotiationEvent::ToolsListed {
            tools: descriptors
                .iter()
                .map(|d| ToolSummary {
                    name: d.name.clone(),
                    description: d.description.clone(),
                })
                .collect(),
        });
        let tools: Vec<_> = descriptors.iter().map(tool_schema).collect();

        let mut messages = vec![Message::user(query)];

        trace_phase(request_id, Phase::FirstCompletion);
        let first = self
            .complete(cancel, &messages, &tools, ToolChoice::Auto)
            .await?;
        let requests = first.message.tool_call_requests();
        tracing::info!(
            request_id = %request_id,
            tool_call_count = requests.len(),
            finish_reason = ?first.finish_reason,
            "First completion received"
        );
        messages.push(first.message);

        if requests.is_empty() {
            let answer = messages
                .last()
                .map(|m| m.text().trim().to_string())
                .unwrap_or_default();
            return Ok(self.finish(request_id, answer, messages, Vec::new(), 1));
        }

        trace_phase(request_id, Phase::ToolCalls);
        let mut tool_results = Vec::with_capacity(requests.len());
        for request in requests {
            let call = request.normalize();
            let outcome = self.resolve_call(request_id, cancel, call).await?;
            messages.push(Message::tool(outcome.call_id.clone(), outcome.content.clone()));
            tool_results.push(outcome);
        }

        trace_phase(request_id, Phase::SecondCompletion);
        let second = self
            .complete(cancel, &messages, &tools, ToolChoice::None)
            .await?;
        let answer = second.message.text().trim().to_string();
        messages.push(second.message);

        Ok(self.finish(request_id, answer, messages, tool_results, 2))
    }

    async fn complete(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[serde_json::Value],
        tool_choice: ToolChoice,
    ) -> Result<CompletionResponse, NegotiationError> {
        let request = CompletionRequest {
            model: self.options.model.clone(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            tool_choice,
        };
        Ok(cancellable(cancel, self.provider.complete(request)).await??)
    }

    /// Approve, run or deny one call, producing its tool message content.
    async fn resolve_call(
        &self,
        request_id: Uuid,
        cancel: &CancellationToken,
        call: PendingCall,
    ) -> Result<ToolOutcome, NegotiationError> {
        if call.arguments.is_raw() {
            tracing::warn!(
                request_id = %request_id,
                tool_name = %call.name,
                "Tool-call arguments are not valid JSON; forwarding raw text"
            );
        }
        self.emit(NegotiationEvent::ToolRequested {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        });

        let decision = self.await_approval(request_id, cancel, &call).await?;
        let PendingCall {
            id,
            name,
            arguments,
        } = call;

        if decision == Decision::Deny {
            tracing::info!(
                request_id = %request_id,
                tool_name = %name,
                tool_call_id = ?id,
                "Tool call denied"
            );
            self.emit(NegotiationEvent::ToolDenied {
                call_id: id.clone(),
                name: name.clone(),
            });
            let content = format!("Tool '{name}' denied");
            return Ok(ToolOutcome {
                call_id: id,
                name,
                status: ToolStatus::Denied,
                content,
            });
        }

        tracing::info!(
            request_id = %request_id,
            tool_name = %name,
            tool_call_id = ?id,
            "Executing tool"
        );
        match cancellable(cancel, self.host.call_tool(&name, arguments.to_value())).await? {
            Ok(result) => {
                let content = result.first_text().to_string();
                self.emit(NegotiationEvent::ToolCompleted {
                    call_id: id.clone(),
                    name: name.clone(),
                    output: content.clone(),
                });
                Ok(ToolOutcome {
                    call_id: id,
                    name,
                    status: ToolStatus::Completed,
                    content,
                })
            }
            Err(err) if err.is_tool_scoped() => {
                tracing::warn!(
                    request_id = %request_id,
                    tool_name = %name,
                    error = %err,
                    "Tool call failed"
                );
                self.emit(NegotiationEvent::ToolFailed {
                    call_id: id.clone(),
                    name: name.clone(),
                    error: err.to_string(),
                });
                let content = format!("Tool '{name}' failed: {err}");
                Ok(ToolOutcome {
                    call_id: id,
                    name,
                    status: ToolStatus::Failed,
                    content,
                })
            }
            Err(err) => {
                tracing::error!(
                    request_id = %request_id,
                    tool_name = %name,
                    error = %err,
                    "Tool call aborted the query"
                );
                Err(err.into())
            }
        }
    }

    async fn await_approval(
        &self,
        request_id: Uuid,
        cancel: &CancellationToken,
        call: &PendingCall,
    ) -> Result<Decision, NegotiationError> {
        let decide = self.approval.decide(call);
        let Some(limit) = self.options.approval_timeout else {
            return cancellable(cancel, decide).await;
        };
        match cancellable(cancel, tokio::time::timeout(limit, decide)).await? {
            Ok(decision) => Ok(decision),
            Err(_elapsed) => {
                tracing::warn!(
                    request_id = %request_id,
                    tool_name = %call.name,
                    timeout_secs = limit.as_secs_f64(),
                    "Approval timed out; treating as denied"
                );
                Ok(Decision::Deny)
            }
        }
    }

    fn finish(
        &self,
        request_id: Uuid,
        answer: String,
        messages: Vec<Message>,
        tool_results: Vec<ToolOutcome>,
        completion_requests: usize,
    ) -> QueryOutcome {
        trace_phase(request_id, Phase::Done);
        tracing::info!(
            request_id = %request_id,
            completion_requests,
            tool_calls = tool_results.len(),
            answer_length = answer.len(),
            "Query negotiation complete"
        );
        self.emit(NegotiationEvent::Answer {
            text: answer.clone(),
        });
        QueryOutcome {
            answer,
            messages,
            tool_results,
            completion_requests,
        }
    }

    fn emit(&self, event: NegotiationEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

fn trace_phase(request_id: Uuid, phase: Phase) {
    tracing::debug!(request_id = %request_id, phase = ?phase, "Negotiation phase");
}

/// Run `fut` unless `cancel` fires first.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, NegotiationError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(NegotiationError::Cancelled),
        out = fut => Ok(out),
    }
}
