//! Property-based tests for sessions
//!
//! Whatever mix of successes and failures the provider produces, the
//! transcript only ever grows, in submission order, and every session ends
//! idle.

use super::*;
use crate::llm::LlmError;
use crate::testing::{MockGatewayBuilder, MockReply};
use futures::StreamExt;
use proptest::prelude::*;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum Outcome {
    Reply(Vec<String>),
    Fail,
    BreakMidStream(Vec<String>),
}

fn arb_fragments() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-z ]{1,8}", 1..5)
}

fn arb_outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        3 => arb_fragments().prop_map(Outcome::Reply),
        1 => Just(Outcome::Fail),
        1 => arb_fragments().prop_map(Outcome::BreakMidStream),
    ]
}

fn mock_reply(outcome: &Outcome) -> MockReply {
    match outcome {
        Outcome::Reply(parts) => MockReply::Fragments(parts.clone()),
        Outcome::Fail => MockReply::Error(LlmError::provider("boom")),
        Outcome::BreakMidStream(parts) => {
            MockReply::FailAfter(parts.clone(), LlmError::network("reset"))
        }
    }
}

proptest! {
    #[test]
    fn prop_transcript_grows_in_order(
        rounds in proptest::collection::vec(("[a-z]{1,10}", arb_outcome(), any::<bool>()), 1..8)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let builder = MockGatewayBuilder::new();
        for (_, outcome, _) in &rounds {
            builder.llm.queue(mock_reply(outcome));
        }
        let session = Session::initialize("p", &Ok(Credential::new("k")), &builder).unwrap();
        let handle = Arc::new(Mutex::new(session));

        let mut expected = Vec::new();
        let mut previous_len = 0;
        for (text, outcome, streaming) in &rounds {
            rt.block_on(async {
                let submission = Submission::begin(handle.clone().lock_owned().await, text).unwrap();
                if *streaming {
                    submission.into_events().collect::<Vec<_>>().await;
                } else {
                    let _ = submission.reply().await;
                }
            });

            expected.push(Turn::user(text.as_str()));
            if let Outcome::Reply(parts) = outcome {
                expected.push(Turn::assistant(parts.concat()));
            }

            let session = handle.try_lock().unwrap();
            prop_assert!(session.current().len() > previous_len);
            prop_assert_eq!(session.current(), expected.as_slice());
            prop_assert_eq!(session.state(), ChatState::Idle);
            previous_len = session.current().len();
        }
    }
}
