//! Replays a JSON-lines event log through a hook.
//!
//! One `ExternalEvent` per line. Blank lines are skipped and lines that fail
//! to parse are logged and counted, never fatal.

use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use tracelink_core::{EventType, ExternalEvent, TracelinkError};

use crate::subsystems::hooks::TraceHook;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub delivered: usize,
    pub skipped: usize,
    /// Ids of the graph-start events seen, in order.
    pub graphs: Vec<String>,
}

pub async fn replay_events<R>(reader: R, hook: &dyn TraceHook) -> Result<ReplayReport, TracelinkError>
where
    R: AsyncBufRead + Unpin,
{
    let mut report = ReplayReport::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: ExternalEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed event");
                report.skipped += 1;
                continue;
            }
        };

        if event.event_type == EventType::GraphStart {
            report.graphs.push(event.id.clone());
        }
        hook.on_event(&event).await;
        report.delivered += 1;
    }

    tracing::info!(
        delivered = report.delivered,
        skipped = report.skipped,
        graphs = report.graphs.len(),
        "Replay complete"
    );
    Ok(report)
}

pub async fn replay_file(
    path: impl AsRef<Path>,
    hook: &dyn TraceHook,
) -> Result<ReplayReport, TracelinkError> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    replay_events(BufReader::new(file), hook).await
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collecting {
        ids: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TraceHook for Collecting {
        async fn on_event(&self, event: &ExternalEvent) {
            self.ids.lock().unwrap().push(event.id.clone());
        }
    }

    #[tokio::test]
    async fn test_replay_skips_blank_and_malformed_lines() {
        let log = concat!(
            r#"{"id":"g1","event_type":"graph_start","start_time":"2024-01-01T00:00:00Z"}"#,
            "\n\n",
            "not json\n",
            r#"{"id":"n1","parent_id":"g1","event_type":"node_start","node_name":"step","start_time":"2024-01-01T00:00:01Z"}"#,
            "\n",
        );
        let hook = Collecting::default();

        let report = replay_events(log.as_bytes(), &hook).await.unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.graphs, vec!["g1".to_string()]);
        assert_eq!(*hook.ids.lock().unwrap(), vec!["g1", "n1"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let hook = Collecting::default();
        let err = replay_file("/nonexistent/tracelink/events.jsonl", &hook)
            .await
            .unwrap_err();
        assert!(matches!(err, TracelinkError::Io(_)));
    }
}
