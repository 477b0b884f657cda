//! Relay pipeline: filter each webhook event, ask the completion service, reply with the top candidate.
//!
//! All events of one delivery are driven concurrently on the calling task and joined with
//! `join_all`, so every event runs to completion even when another one fails. The delivery
//! as a whole fails if any event failed.

use crate::channels::{
    ChannelError, InboundEvent, MessageBody, ReplyConfirmation, ReplyMessage, ReplySender,
};
use crate::llm::{CompletionClient, CompletionError, CompletionRequest};
use futures_util::future::join_all;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Reply(#[from] ChannelError),
}

/// Why an event produced no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotTextMessage,
    /// Text message without a reply token (standby mode); nothing to answer with.
    NoReplyToken,
    NoCandidate,
}

/// Settled result of one event.
#[derive(Debug)]
pub enum EventOutcome {
    Sent(ReplyConfirmation),
    Skipped(SkipReason),
    Failed(RelayError),
}

/// At least one event of a delivery failed.
#[derive(Debug, thiserror::Error)]
#[error("{failed} of {total} event(s) failed; first error: {first}")]
pub struct BatchError {
    pub failed: usize,
    pub total: usize,
    pub first: RelayError,
}

/// True for text message events, the only kind we answer.
pub fn is_eligible(event: &InboundEvent) -> bool {
    eligible_text(event).is_some()
}

/// (reply token, message text) of an eligible event.
fn eligible_text(event: &InboundEvent) -> Option<(Option<&str>, &str)> {
    match event {
        InboundEvent::Message {
            reply_token,
            message: MessageBody::Text { text },
        } => Some((reply_token.as_deref(), text.as_str())),
        _ => None,
    }
}

/// Process one event: at most one completion call and at most one reply call.
pub async fn process_event(
    completion: &dyn CompletionClient,
    replies: &dyn ReplySender,
    model: &str,
    event: &InboundEvent,
) -> EventOutcome {
    match relay_event(completion, replies, model, event).await {
        Ok(outcome) => outcome,
        Err(e) => EventOutcome::Failed(e),
    }
}

async fn relay_event(
    completion: &dyn CompletionClient,
    replies: &dyn ReplySender,
    model: &str,
    event: &InboundEvent,
) -> Result<EventOutcome, RelayError> {
    let Some((reply_token, text)) = eligible_text(event) else {
        return Ok(EventOutcome::Skipped(SkipReason::NotTextMessage));
    };
    let Some(reply_token) = reply_token else {
        log::debug!("relay: text message without reply token, skipping");
        return Ok(EventOutcome::Skipped(SkipReason::NoReplyToken));
    };

    let request = CompletionRequest::new(model, text);
    let response = completion.complete(&request).await?;
    let Some(candidate) = response.first_text() else {
        log::debug!("relay: completion returned no candidates");
        return Ok(EventOutcome::Skipped(SkipReason::NoCandidate));
    };

    let message = ReplyMessage::text(candidate.trim());
    let confirmation = replies.reply(reply_token, &message).await?;
    Ok(EventOutcome::Sent(confirmation))
}

/// Shared handles for the pipeline. Built once at startup; cloning shares the clients.
#[derive(Clone)]
pub struct Relay {
    completion: Arc<dyn CompletionClient>,
    replies: Arc<dyn ReplySender>,
    model: String,
}

impl Relay {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        replies: Arc<dyn ReplySender>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            completion,
            replies,
            model: model.into(),
        }
    }

    /// Process one event with this relay's clients.
    pub async fn process(&self, event: &InboundEvent) -> EventOutcome {
        process_event(
            self.completion.as_ref(),
            self.replies.as_ref(),
            &self.model,
            event,
        )
        .await
    }

    /// Process every event of a delivery concurrently and wait for all of them.
    /// Ok holds one entry per event in input order: the confirmation, or None when skipped.
    pub async fn dispatch(
        &self,
        events: &[InboundEvent],
    ) -> Result<Vec<Option<ReplyConfirmation>>, BatchError> {
        let total = events.len();
        let outcomes = join_all(events.iter().map(|event| self.process(event))).await;

        let mut results = Vec::with_capacity(total);
        let mut failed = 0;
        let mut first = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                EventOutcome::Sent(confirmation) => results.push(Some(confirmation)),
                EventOutcome::Skipped(_) => results.push(None),
                EventOutcome::Failed(e) => {
                    log::warn!("relay: event {} failed: {}", index, e);
                    failed += 1;
                    first.get_or_insert(e);
                }
            }
        }
        match first {
            Some(first) => Err(BatchError {
                failed,
                total,
                first,
            }),
            None => Ok(results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::SentMessage;
    use crate::llm::{CompletionChoice, CompletionResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Completion fake: answers per prompt, records every request.
    #[derive(Default)]
    struct FakeCompletion {
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionClient for FakeCompletion {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            self.requests.lock().unwrap().push(request.clone());
            let prompt = request.prompt.as_str();
            if prompt == "outage" {
                return Err(CompletionError::Api("503 Service Unavailable".to_string()));
            }
            if prompt == "empty" {
                return Ok(CompletionResponse::default());
            }
            if let Some(rest) = prompt.strip_prefix("slow:") {
                tokio::time::sleep(Duration::from_millis(50)).await;
                return Ok(response_with(&[rest]));
            }
            if prompt == "blank" {
                return Ok(response_with(&["  \n "]));
            }
            Ok(response_with(&[&format!(" re: {} ", prompt), "ignored"]))
        }
    }

    fn response_with(texts: &[&str]) -> CompletionResponse {
        CompletionResponse {
            choices: texts
                .iter()
                .enumerate()
                .map(|(i, t)| CompletionChoice {
                    text: t.to_string(),
                    index: Some(i as u32),
                    finish_reason: Some("stop".to_string()),
                })
                .collect(),
        }
    }

    /// Reply fake: records (token, message); token "bad" fails.
    #[derive(Default)]
    struct FakeReplies {
        sent: Mutex<Vec<(String, ReplyMessage)>>,
    }

    #[async_trait]
    impl ReplySender for FakeReplies {
        async fn reply(
            &self,
            reply_token: &str,
            message: &ReplyMessage,
        ) -> Result<ReplyConfirmation, ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((reply_token.to_string(), message.clone()));
            if reply_token == "bad" {
                return Err(ChannelError::Api("400 Invalid reply token".to_string()));
            }
            Ok(ReplyConfirmation {
                sent_messages: vec![SentMessage {
                    id: format!("id-{}", reply_token),
                    quote_token: None,
                }],
            })
        }
    }

    fn text_event(token: &str, text: &str) -> InboundEvent {
        InboundEvent::Message {
            reply_token: Some(token.to_string()),
            message: MessageBody::Text {
                text: text.to_string(),
            },
        }
    }

    fn standby_event(text: &str) -> InboundEvent {
        InboundEvent::Message {
            reply_token: None,
            message: MessageBody::Text {
                text: text.to_string(),
            },
        }
    }

    fn image_event(token: &str) -> InboundEvent {
        InboundEvent::Message {
            reply_token: Some(token.to_string()),
            message: MessageBody::NonText,
        }
    }

    fn relay() -> (Relay, Arc<FakeCompletion>, Arc<FakeReplies>) {
        let completion = Arc::new(FakeCompletion::default());
        let replies = Arc::new(FakeReplies::default());
        let relay = Relay::new(completion.clone(), replies.clone(), "test-model");
        (relay, completion, replies)
    }

    fn confirmation(token: &str) -> ReplyConfirmation {
        ReplyConfirmation {
            sent_messages: vec![SentMessage {
                id: format!("id-{}", token),
                quote_token: None,
            }],
        }
    }

    #[test]
    fn only_text_messages_are_eligible() {
        assert!(is_eligible(&text_event("T", "hi")));
        assert!(!is_eligible(&image_event("T")));
        assert!(!is_eligible(&InboundEvent::Other));
    }

    #[tokio::test]
    async fn ineligible_events_make_no_calls() {
        let (relay, completion, replies) = relay();
        for event in [image_event("T1"), InboundEvent::Other] {
            let outcome = relay.process(&event).await;
            assert!(matches!(
                outcome,
                EventOutcome::Skipped(SkipReason::NotTextMessage)
            ));
        }
        assert!(completion.requests.lock().unwrap().is_empty());
        assert!(replies.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_event_is_answered_with_trimmed_first_candidate() {
        let (relay, completion, replies) = relay();
        let outcome = relay.process(&text_event("T1", "  Hello\n")).await;
        match outcome {
            EventOutcome::Sent(c) => assert_eq!(c, confirmation("T1")),
            other => panic!("expected Sent, got {:?}", other),
        }

        let requests = completion.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, "  Hello\n");
        assert_eq!(requests[0].model, "test-model");
        assert_eq!(requests[0].params, crate::llm::GenerationParams::DEFAULT);

        let sent = replies.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![("T1".to_string(), ReplyMessage::text("re:   Hello"))]
        );
    }

    #[tokio::test]
    async fn whitespace_only_candidate_replies_with_empty_text() {
        let (relay, _, replies) = relay();
        let outcome = relay.process(&text_event("T1", "blank")).await;
        assert!(matches!(outcome, EventOutcome::Sent(_)));
        assert_eq!(
            *replies.sent.lock().unwrap(),
            vec![("T1".to_string(), ReplyMessage::text(""))]
        );
    }

    #[tokio::test]
    async fn no_candidate_skips_reply() {
        let (relay, completion, replies) = relay();
        let outcome = relay.process(&text_event("T1", "empty")).await;
        assert!(matches!(
            outcome,
            EventOutcome::Skipped(SkipReason::NoCandidate)
        ));
        assert_eq!(completion.requests.lock().unwrap().len(), 1);
        assert!(replies.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_failure_fails_event_without_reply() {
        let (relay, _, replies) = relay();
        let outcome = relay.process(&text_event("T1", "outage")).await;
        assert!(matches!(
            outcome,
            EventOutcome::Failed(RelayError::Completion(_))
        ));
        assert!(replies.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_failure_fails_event() {
        let (relay, _, _) = relay();
        let outcome = relay.process(&text_event("bad", "Hello")).await;
        assert!(matches!(outcome, EventOutcome::Failed(RelayError::Reply(_))));
    }

    #[tokio::test]
    async fn missing_reply_token_skips_without_calls() {
        let (relay, completion, replies) = relay();
        let outcome = relay.process(&standby_event("hi")).await;
        assert!(matches!(
            outcome,
            EventOutcome::Skipped(SkipReason::NoReplyToken)
        ));
        assert!(completion.requests.lock().unwrap().is_empty());
        assert!(replies.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn standby_event_does_not_block_its_neighbours() {
        let (relay, completion, replies) = relay();
        let events = vec![text_event("T1", "Hello"), standby_event("hi")];
        let results = relay.dispatch(&events).await.unwrap();
        assert_eq!(results, vec![Some(confirmation("T1")), None]);
        assert_eq!(completion.requests.lock().unwrap().len(), 1);
        assert_eq!(replies.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_delivery_is_accepted_with_no_results() {
        let (relay, completion, _) = relay();
        let results = relay.dispatch(&[]).await.unwrap();
        assert!(results.is_empty());
        assert!(completion.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn results_follow_input_order_regardless_of_timing() {
        let (relay, completion, _) = relay();
        let events = vec![
            text_event("T1", "slow:first"),
            image_event("T2"),
            text_event("T3", "fast"),
        ];
        let results = relay.dispatch(&events).await.unwrap();
        assert_eq!(
            results,
            vec![Some(confirmation("T1")), None, Some(confirmation("T3"))]
        );
        assert_eq!(completion.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn events_run_concurrently() {
        let (relay, _, _) = relay();
        let events: Vec<_> = (0..10)
            .map(|i| text_event(&format!("T{}", i), "slow:x"))
            .collect();
        let started = std::time::Instant::now();
        let results = relay.dispatch(&events).await.unwrap();
        assert_eq!(results.len(), 10);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn one_failure_fails_the_batch_but_others_still_reply() {
        let (relay, completion, replies) = relay();
        let events = vec![
            text_event("T1", "Hello"),
            text_event("bad", "Hello"),
            text_event("T3", "outage"),
            image_event("T4"),
        ];
        let err = relay.dispatch(&events).await.unwrap_err();
        assert_eq!(err.failed, 2);
        assert_eq!(err.total, 4);
        assert!(matches!(err.first, RelayError::Reply(_)));

        assert_eq!(completion.requests.lock().unwrap().len(), 3);
        let tokens: Vec<String> = replies
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect();
        assert!(tokens.contains(&"T1".to_string()));
        assert!(tokens.contains(&"bad".to_string()));
        assert_eq!(tokens.len(), 2);
    }
}
