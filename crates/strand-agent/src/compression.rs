use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use strand_core::error::{Result, StrandError};
use strand_core::types::Message;

use crate::session::WriteSession;

/// How much of the history a compression pass summarizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "size", rename_all = "snake_case")]
pub enum HistoryCompression {
    /// Everything after the leading system message becomes one summary.
    WholeHistory,
    /// Only the last `n` messages become one summary.
    FromLastN(usize),
    /// Consecutive chunks of `size` messages are summarized separately.
    Chunked(usize),
}

/// Messages kept verbatim, followed by the groups to summarize in order.
#[derive(Debug, PartialEq)]
struct Plan {
    kept: Vec<Message>,
    groups: Vec<Vec<Message>>,
}

fn plan(messages: &[Message], strategy: HistoryCompression) -> Result<Plan> {
    let split = usize::from(messages.first().is_some_and(Message::is_system));
    let (head, body) = messages.split_at(split);
    let mut kept = head.to_vec();

    let groups = match strategy {
        HistoryCompression::WholeHistory => vec![body.to_vec()],
        HistoryCompression::FromLastN(n) => {
            let start = body.len().saturating_sub(n);
            kept.extend_from_slice(&body[..start]);
            vec![body[start..].to_vec()]
        }
        HistoryCompression::Chunked(0) => {
            return Err(StrandError::Config(
                "history compression chunk size must be positive".to_string(),
            ))
        }
        HistoryCompression::Chunked(size) => body.chunks(size).map(<[Message]>::to_vec).collect(),
    };

    Ok(Plan {
        kept,
        groups: groups.into_iter().filter(|g| !g.is_empty()).collect(),
    })
}

impl WriteSession<'_> {
    /// Replace part of the history with model-written summaries.
    ///
    /// The leading system message is always kept. Returns the number of
    /// summaries produced.
    pub async fn compress_history(&mut self, strategy: HistoryCompression) -> Result<usize> {
        let Plan { mut kept, groups } = plan(self.messages(), strategy)?;
        if groups.is_empty() {
            debug!(?strategy, "Nothing to compress");
            return Ok(0);
        }

        let before = self.messages().len();
        for group in &groups {
            kept.push(self.summarize(group).await?);
        }
        let count = groups.len();
        info!(
            ?strategy,
            before,
            after = kept.len(),
            summaries = count,
            "Compressed history"
        );
        self.set_messages(kept);
        Ok(count)
    }

    async fn summarize(&self, group: &[Message]) -> Result<Message> {
        let transcript: Vec<String> = group.iter().map(Message::render).collect();
        let prompt = vec![Message::user(format!(
            "Summarize the following conversation concisely, preserving key facts, \
             decisions, tool results, and open questions. Output only the summary.\n\n{}",
            transcript.join("\n")
        ))];

        let responses = self.send(&prompt, &[]).await?;
        let text: Vec<&str> = responses.iter().filter_map(Message::text).collect();
        if text.is_empty() {
            return Err(StrandError::Llm("summary response had no text".to_string()));
        }
        Ok(Message::summary(text.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strand_core::config::ModelConfig;
    use strand_test_utils::ScriptedExecutor;

    use crate::session::ModelSession;

    fn history(k: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("be brief")];
        messages.extend((0..k).map(|i| Message::user(format!("message {}", i))));
        messages
    }

    async fn summarizing_session(messages: Vec<Message>) -> (ModelSession, Arc<ScriptedExecutor>) {
        let executor = Arc::new(
            ScriptedExecutor::new().with_fallback(|_, _| vec![Message::assistant("summary")]),
        );
        let session = ModelSession::new(executor.clone(), ModelConfig::new("m"), vec![]);
        session.write_session().await.set_messages(messages);
        (session, executor)
    }

    #[test]
    fn plan_whole_history_keeps_system_message() {
        let plan = plan(&history(4), HistoryCompression::WholeHistory).unwrap();
        assert_eq!(plan.kept.len(), 1);
        assert!(plan.kept[0].is_system());
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].len(), 4);
    }

    #[test]
    fn plan_last_n_leaves_earlier_history() {
        let plan = plan(&history(5), HistoryCompression::FromLastN(2)).unwrap();
        assert_eq!(plan.kept.len(), 4);
        assert_eq!(plan.groups[0][0].text(), Some("message 3"));

        let everything = super::plan(&history(2), HistoryCompression::FromLastN(10)).unwrap();
        assert_eq!(everything.kept.len(), 1);
        assert_eq!(everything.groups[0].len(), 2);
    }

    #[test]
    fn plan_chunks_cover_every_message_once() {
        for (k, c) in [(7, 3), (6, 3), (1, 4), (5, 1)] {
            let plan = plan(&history(k), HistoryCompression::Chunked(c)).unwrap();
            assert_eq!(plan.groups.len(), k.div_ceil(c));
            assert_eq!(plan.groups.iter().map(Vec::len).sum::<usize>(), k);
        }
    }

    #[test]
    fn plan_edge_cases() {
        assert!(plan(&history(0), HistoryCompression::WholeHistory)
            .unwrap()
            .groups
            .is_empty());
        assert!(plan(&history(3), HistoryCompression::FromLastN(0))
            .unwrap()
            .groups
            .is_empty());
        assert!(matches!(
            plan(&history(3), HistoryCompression::Chunked(0)),
            Err(StrandError::Config(_))
        ));
    }

    #[tokio::test]
    async fn whole_history_yields_one_summary() {
        let (session, executor) = summarizing_session(history(5)).await;
        let count = session
            .write_session()
            .await
            .compress_history(HistoryCompression::WholeHistory)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let r = session.read_session().await;
        assert_eq!(r.messages().len(), 2);
        assert!(r.messages()[0].is_system());
        assert!(r.messages()[1].summary);
        assert!(r.messages().iter().all(|m| m.text() != Some("message 0")));
        assert!(executor.requests()[0].messages[0]
            .text()
            .unwrap()
            .contains("message 4"));
    }

    #[tokio::test]
    async fn chunked_yields_ceil_summaries() {
        let (session, executor) = summarizing_session(history(7)).await;
        let count = session
            .write_session()
            .await
            .compress_history(HistoryCompression::Chunked(3))
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(executor.request_count(), 3);
        assert_eq!(session.read_session().await.messages().len(), 4);
    }

    #[tokio::test]
    async fn last_n_keeps_prefix_in_place() {
        let (session, _) = summarizing_session(history(4)).await;
        session
            .write_session()
            .await
            .compress_history(HistoryCompression::FromLastN(2))
            .await
            .unwrap();
        let r = session.read_session().await;
        let texts: Vec<_> = r.messages().iter().filter_map(|m| m.text()).collect();
        assert_eq!(texts, vec!["be brief", "message 0", "message 1", "summary"]);
    }
}
