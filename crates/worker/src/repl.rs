use anyhow::Context;
use brokerbot_core::cache::BrokerCache;
use brokerbot_core::chat::ChatSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const BANNER: &str = "Broker assistant ready. Type /reset to start over, /quit to exit.\n\n";

/// Line-oriented chat loop. Ends on `/quit` or end of input.
pub async fn run<R, W>(
    cache: Arc<BrokerCache>,
    thinking_delay: Duration,
    input: R,
    mut output: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = ChatSession::new(cache).with_thinking_delay(thinking_delay);
    let mut lines = input.lines();

    output.write_all(BANNER.as_bytes()).await?;
    output.flush().await?;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let text = line.trim();
        match text {
            "/quit" | "/exit" => break,
            "/reset" => {
                session.clear_conversation();
                output.write_all(b"Conversation cleared.\n\n").await?;
            }
            _ => {
                let reply = session.send_message(text).await;
                output.write_all(reply.as_bytes()).await?;
                output.write_all(b"\n\n").await?;
            }
        }
        output.flush().await?;
    }

    tracing::info!(session_id = %session.id(), turns = session.context().len(), "chat ended");
    Ok(())
}
