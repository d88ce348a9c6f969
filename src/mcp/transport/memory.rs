//! In-process transport wired straight to a [`Dispatcher`].
//!
//! Useful for tests and for embedding the tool host in the same process as
//! the client.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Channel, Transport};
use crate::error::McpError;
use crate::server::{ConnectionState, Dispatcher};

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    dispatcher: Arc<Dispatcher>,
}

impl MemoryTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn connect(&self) -> Result<Channel, McpError> {
        let (client_tx, mut host_rx) = mpsc::unbounded_channel::<String>();
        let (host_tx, client_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::clone(&self.dispatcher);

        let host = tokio::spawn(async move {
            let mut state = ConnectionState::default();
            while let Some(line) = host_rx.recv().await {
                if let Some(reply) = dispatcher.handle_line(&mut state, &line).await {
                    if host_tx.send(Ok(reply)).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Channel::new(client_tx, client_rx).with_task(host))
    }
}
