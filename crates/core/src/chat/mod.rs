use crate::cache::BrokerCache;
use crate::domain::broker::BrokerSnapshot;
use crate::domain::conversation::ContextBuffer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub mod compose;
pub mod intent;

pub use compose::{TECHNICAL_DIFFICULTIES_REPLY, UNAVAILABLE_REPLY};
pub use intent::{classify, IntentCategory};

type Composer = fn(IntentCategory, &str, &[BrokerSnapshot], usize) -> anyhow::Result<String>;

/// One conversation with the broker assistant.
///
/// The context buffer and greeting RNG are owned per session; the broker cache is shared between
/// sessions. Callers must not run two `send_message` calls on the same session concurrently,
/// which `&mut self` already enforces.
pub struct ChatSession {
    id: Uuid,
    cache: Arc<BrokerCache>,
    context: ContextBuffer,
    rng: StdRng,
    thinking_delay: Duration,
    composer: Composer,
}

impl ChatSession {
    pub fn new(cache: Arc<BrokerCache>) -> Self {
        Self {
            id: Uuid::new_v4(),
            cache,
            context: ContextBuffer::default(),
            rng: StdRng::from_entropy(),
            thinking_delay: Duration::ZERO,
            composer: compose::compose,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Seeded RNG for reproducible greeting selection.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Cosmetic pause before composing, for UIs that show a typing indicator.
    pub fn with_thinking_delay(mut self, delay: Duration) -> Self {
        self.thinking_delay = delay;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context(&self) -> &ContextBuffer {
        &self.context
    }

    /// Classifies `text`, composes a reply and records the exchange. Never fails: composition
    /// errors and panics are logged and answered with a fixed apology.
    pub async fn send_message(&mut self, text: &str) -> String {
        let t0 = std::time::Instant::now();
        let intent = classify(text, &self.context);

        if !self.thinking_delay.is_zero() {
            tokio::time::sleep(self.thinking_delay).await;
        }

        let reply = match self.respond(intent, text).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(session_id = %self.id, ?intent, error = %err, "failed to compose reply");
                TECHNICAL_DIFFICULTIES_REPLY.to_string()
            }
        };

        self.context.push_exchange(text, reply.clone());
        tracing::debug!(
            session_id = %self.id,
            ?intent,
            context_len = self.context.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "chat exchange"
        );
        reply
    }

    pub fn clear_conversation(&mut self) {
        self.context.clear();
        tracing::debug!(session_id = %self.id, "conversation cleared");
    }

    async fn respond(&mut self, intent: IntentCategory, text: &str) -> anyhow::Result<String> {
        let brokers: Arc<[BrokerSnapshot]> = if intent.needs_brokers() {
            self.cache.get_brokers().await
        } else {
            Arc::from(Vec::new())
        };
        let greeting_index = match intent {
            IntentCategory::Greeting => self.rng.gen_range(0..compose::GREETINGS.len()),
            _ => 0,
        };
        let composer = self.composer;
        panic::catch_unwind(AssertUnwindSafe(|| {
            composer(intent, text, &brokers, greeting_index)
        }))
        .unwrap_or_else(|payload| {
            Err(anyhow::anyhow!(
                "reply composition panicked: {}",
                panic_message(payload.as_ref())
            ))
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
