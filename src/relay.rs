//! Conversational relay: trigger-matched messages go to the completion
//! endpoint with short-lived per-user context; everything else is ignored.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::completion::{ChatCompletion, Message, SamplingParams};
use crate::image::ImageClient;
use crate::persona::Persona;

/// What the relay wants sent back, if anything.
#[derive(Debug, PartialEq)]
pub enum Reply {
    Text(String),
    Image { url: String, caption: String },
}

#[derive(Clone)]
struct Exchange {
    user: String,
    assistant: String,
}

pub struct Relay<C> {
    persona: Arc<Persona>,
    completion: C,
    image: Option<ImageClient>,
    /// Per-user rolling context, newest last. Mutations are serialized
    /// behind one lock; relay requests and scheduler ticks never share
    /// state beyond this.
    contexts: Mutex<HashMap<i64, VecDeque<Exchange>>>,
    context_depth: usize,
}

fn relay_params() -> SamplingParams {
    SamplingParams::new(150, 0.85).with_penalties(0.7, 0.5)
}

impl<C: ChatCompletion> Relay<C> {
    pub fn new(
        persona: Arc<Persona>,
        completion: C,
        image: Option<ImageClient>,
        context_depth: usize,
    ) -> Self {
        Self {
            persona,
            completion,
            image,
            contexts: Mutex::new(HashMap::new()),
            context_depth,
        }
    }

    /// Handle one inbound message. `None` means silently ignore it.
    pub async fn handle(&self, user_id: i64, text: &str) -> Option<Reply> {
        if let Some(prompt) = self.persona.image_prompt(text) {
            return Some(self.draw(prompt).await);
        }

        if !self.persona.matches_trigger(text) {
            return None;
        }

        let mut messages = self.context_messages(user_id).await;
        messages.push(Message::user(self.persona.relay_prompt(text)));

        match self
            .completion
            .complete(&self.persona.system_prompt, &messages, relay_params())
            .await
        {
            Ok(raw) => {
                let reply = self.persona.post_process(&raw);
                self.remember(user_id, text, &reply).await;
                Some(Reply::Text(reply))
            }
            Err(e) => {
                warn!("Completion failed for user {user_id}: {e}");
                Some(Reply::Text(self.persona.apology.clone()))
            }
        }
    }

    async fn draw(&self, prompt: &str) -> Reply {
        let Some(ref client) = self.image else {
            return Reply::Text(self.persona.image_unavailable.clone());
        };

        match client.generate(prompt).await {
            Ok(url) => Reply::Image {
                url,
                caption: format!("🐋 {prompt}"),
            },
            Err(e) => {
                warn!("Image generation failed: {e}");
                Reply::Text(self.persona.apology.clone())
            }
        }
    }

    /// Drop one user's conversation context.
    pub async fn clear_context(&self, user_id: i64) -> bool {
        let cleared = self.contexts.lock().await.remove(&user_id).is_some();
        if cleared {
            info!("Cleared context for user {user_id}");
        }
        cleared
    }

    async fn context_messages(&self, user_id: i64) -> Vec<Message> {
        let contexts = self.contexts.lock().await;
        let Some(history) = contexts.get(&user_id) else {
            return Vec::new();
        };

        let mut messages = Vec::with_capacity(history.len() * 2);
        for exchange in history {
            messages.push(Message::user(exchange.user.clone()));
            messages.push(Message::assistant(exchange.assistant.clone()));
        }
        messages
    }

    async fn remember(&self, user_id: i64, user_text: &str, reply: &str) {
        if self.context_depth == 0 {
            return;
        }
        let mut contexts = self.contexts.lock().await;
        let history = contexts.entry(user_id).or_default();
        while history.len() >= self.context_depth {
            history.pop_front();
        }
        history.push_back(Exchange {
            user: user_text.to_string(),
            assistant: reply.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Error;
    use std::sync::Mutex as StdMutex;

    /// Scripted completion endpoint recording every call.
    struct MockCompletion {
        replies: StdMutex<VecDeque<Result<String, Error>>>,
        calls: StdMutex<Vec<Vec<Message>>>,
    }

    impl MockCompletion {
        fn new(replies: Vec<Result<String, Error>>) -> Self {
            Self {
                replies: StdMutex::new(replies.into()),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ChatCompletion for &MockCompletion {
        async fn complete(
            &self,
            _system: &str,
            messages: &[Message],
            _params: SamplingParams,
        ) -> Result<String, Error> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(Error::Empty))
        }
    }

    fn relay(completion: &MockCompletion) -> Relay<&MockCompletion> {
        Relay::new(Arc::new(Persona::orca()), completion, None, 3)
    }

    #[tokio::test]
    async fn test_non_trigger_messages_are_ignored() {
        let mock = MockCompletion::new(vec![]);
        let relay = relay(&mock);

        assert_eq!(relay.handle(1, "what's for lunch?").await, None);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_trigger_produces_post_processed_reply() {
        let mock = MockCompletion::new(vec![Ok("hello! the pod says hi".into())]);
        let relay = relay(&mock);

        let reply = relay.handle(1, "hey orca, say hi").await;
        assert_eq!(reply, Some(Reply::Text("The pod says hi".into())));
    }

    #[tokio::test]
    async fn test_upstream_failure_yields_fixed_apology() {
        let mock = MockCompletion::new(vec![Err(Error::Http("connection refused".into()))]);
        let relay = relay(&mock);

        let persona = Persona::orca();
        let reply = relay.handle(1, "orca help").await;
        assert_eq!(reply, Some(Reply::Text(persona.apology)));
    }

    #[tokio::test]
    async fn test_context_is_carried_and_bounded() {
        let replies = (0..5).map(|i| Ok(format!("Reply {i}"))).collect();
        let mock = MockCompletion::new(replies);
        let relay = relay(&mock);

        for i in 0..5 {
            relay.handle(7, &format!("orca question {i}")).await;
        }

        // Depth 3: the fifth call sees 3 prior exchanges (6 context messages)
        // plus the current prompt.
        let calls = mock.calls.lock().unwrap();
        assert_eq!(calls[4].len(), 7);
        // Oldest exchange evicted: first context message stems from question 1.
        assert!(calls[4][0].content.contains("question 1"));
    }

    #[tokio::test]
    async fn test_zero_depth_keeps_no_context() {
        let replies = (0..3).map(|i| Ok(format!("Reply {i}"))).collect();
        let mock = MockCompletion::new(replies);
        let relay = Relay::new(Arc::new(Persona::orca()), &mock, None, 0);

        for i in 0..3 {
            relay.handle(9, &format!("orca question {i}")).await;
        }

        // Depth 0 means stateless: every call carries only the current prompt.
        let calls = mock.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        for call in calls.iter() {
            assert_eq!(call.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_failed_calls_do_not_pollute_context() {
        let mock = MockCompletion::new(vec![
            Err(Error::Empty),
            Ok("Second answer".into()),
        ]);
        let relay = relay(&mock);

        relay.handle(2, "orca first").await;
        relay.handle(2, "orca second").await;

        let calls = mock.calls.lock().unwrap();
        // The failed first call leaves no exchange behind.
        assert_eq!(calls[1].len(), 1);
    }

    #[tokio::test]
    async fn test_clear_context_forgets_history() {
        let mock = MockCompletion::new(vec![Ok("One".into()), Ok("Two".into())]);
        let relay = relay(&mock);

        relay.handle(3, "orca remember this").await;
        assert!(relay.clear_context(3).await);
        assert!(!relay.clear_context(3).await);

        relay.handle(3, "orca what did i say?").await;
        let calls = mock.calls.lock().unwrap();
        assert_eq!(calls[1].len(), 1);
    }

    #[tokio::test]
    async fn test_image_trigger_without_client_degrades() {
        let mock = MockCompletion::new(vec![]);
        let relay = relay(&mock);

        let persona = Persona::orca();
        let reply = relay.handle(1, "orca draw a breaching humpback").await;
        assert_eq!(reply, Some(Reply::Text(persona.image_unavailable)));
        assert_eq!(mock.call_count(), 0);
    }
}
