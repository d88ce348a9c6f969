//! Approval authorities: who decides whether a requested tool call runs.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::llm::PendingCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    /// `y` (any case, surrounding whitespace ignored) approves; anything
    /// else denies.
    pub fn from_answer(answer: &str) -> Self {
        if answer.trim().eq_ignore_ascii_case("y") {
            Self::Approve
        } else {
            Self::Deny
        }
    }
}

/// Decides on one pending tool call.
#[async_trait]
pub trait ApprovalAuthority: Send + Sync {
    async fn decide(&self, call: &PendingCall) -> Decision;
}

/// Interactive approval on the controlling terminal.
///
/// Input is read on a dedicated thread, so a wait that is abandoned (timeout,
/// Ctrl-C) never holds up runtime shutdown.
pub struct TerminalApproval {
    answers: tokio::sync::Mutex<mpsc::UnboundedReceiver<io::Result<String>>>,
    prompt: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for TerminalApproval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalApproval").finish_non_exhaustive()
    }
}

impl Default for TerminalApproval {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalApproval {
    pub fn new() -> Self {
        Self::with_io(io::BufReader::new(io::stdin()), io::stdout())
    }

    /// Read answers from `input`, one per line, and write prompts to `prompt`.
    pub fn with_io<R, W>(input: R, prompt: W) -> Self
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = std::thread::Builder::new()
            .name("approval-input".into())
            .spawn(move || {
                for line in input.lines() {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
            });
        if let Err(err) = reader {
            tracing::warn!(error = %err, "failed to start approval reader; denying all calls");
        }
        Self {
            answers: tokio::sync::Mutex::new(rx),
            prompt: Mutex::new(Box::new(prompt)),
        }
    }

    fn write_prompt(&self, call: &PendingCall) {
        let mut out = self.prompt.lock().unwrap_or_else(PoisonError::into_inner);
        let written = write!(
            out,
            "\nAssistant requests tool: {}({})\nAllow execution? (y/n): ",
            call.name, call.arguments
        )
        .and_then(|()| out.flush());
        if let Err(err) = written {
            tracing::warn!(error = %err, "failed to write approval prompt");
        }
    }
}

#[async_trait]
impl ApprovalAuthority for TerminalApproval {
    async fn decide(&self, call: &PendingCall) -> Decision {
        let mut answers = self.answers.lock().await;
        self.write_prompt(call);
        match answers.recv().await {
            Some(Ok(answer)) => Decision::from_answer(&answer),
            Some(Err(err)) => {
                tracing::warn!(
                    tool_name = %call.name,
                    error = %err,
                    "failed to read approval; denying"
                );
                Decision::Deny
            }
            None => {
                tracing::warn!(tool_name = %call.name, "input closed; denying tool call");
                Decision::Deny
            }
        }
    }
}

/// Same decision for every call.
#[derive(Debug, Clone, Copy)]
pub struct FixedApproval(pub Decision);

#[async_trait]
impl ApprovalAuthority for FixedApproval {
    async fn decide(&self, _call: &PendingCall) -> Decision {
        self.0
    }
}

/// Decisions handed out in order; denies once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedApproval {
    decisions: Mutex<VecDeque<Decision>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedApproval {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            seen: Mutex::default(),
        }
    }

    /// Names of the tools asked about so far.
    pub fn asked(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ApprovalAuthority for ScriptedApproval {
    async fn decide(&self, call: &PendingCall) -> Decision {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.name.clone());
        self.decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Decision::Deny)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ParsedArguments;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// Input that blocks until its sender is dropped, then reports EOF.
    struct Stalled(std::sync::mpsc::Receiver<()>);

    impl io::Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn call(name: &str) -> PendingCall {
        PendingCall {
            id: None,
            name: name.into(),
            arguments: ParsedArguments::Structured(json!({})),
        }
    }

    #[test]
    fn parses_answers() {
        assert_eq!(Decision::from_answer("y"), Decision::Approve);
        assert_eq!(Decision::from_answer(" Y \n"), Decision::Approve);
        assert_eq!(Decision::from_answer("yes"), Decision::Deny);
        assert_eq!(Decision::from_answer(""), Decision::Deny);
    }

    #[tokio::test]
    async fn scripted_denies_when_exhausted() {
        let approval = ScriptedApproval::new([Decision::Approve]);
        assert_eq!(approval.decide(&call("a")).await, Decision::Approve);
        assert_eq!(approval.decide(&call("b")).await, Decision::Deny);
        assert_eq!(approval.asked(), ["a", "b"]);
    }

    #[tokio::test]
    async fn terminal_reads_one_answer_per_call() {
        let prompts = SharedBuf::default();
        let approval = TerminalApproval::with_io(io::Cursor::new("y\nn\n"), prompts.clone());

        assert_eq!(approval.decide(&call("calculate")).await, Decision::Approve);
        assert_eq!(approval.decide(&call("get_weather")).await, Decision::Deny);
        // Input exhausted.
        assert_eq!(approval.decide(&call("calculate")).await, Decision::Deny);

        let written = String::from_utf8(prompts.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("Assistant requests tool: calculate("), "{written}");
        assert!(written.contains("Assistant requests tool: get_weather("), "{written}");
        assert!(written.contains("Allow execution? (y/n): "), "{written}");
    }

    #[test]
    fn abandoned_wait_does_not_block_runtime_shutdown() {
        let (release, stalled) = std::sync::mpsc::channel::<()>();
        let approval = TerminalApproval::with_io(io::BufReader::new(Stalled(stalled)), io::sink());
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();

        let waited = runtime.block_on(async {
            tokio::time::timeout(Duration::from_millis(100), approval.decide(&call("calculate")))
                .await
        });
        assert!(waited.is_err());

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(runtime);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        drop(release);
    }
}
