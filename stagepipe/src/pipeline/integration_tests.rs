//! End-to-end tests for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::config::PipelineConfig;
    use crate::errors::ServiceError;
    use crate::events::{event_types, CollectingEventSink};
    use crate::pipeline::{PipelineBuilder, StageStatus};
    use crate::stages::{
        AggregateStage, BatchStage, BoundedStage, DedupStage, FnStage, Identified,
        IdentityResolver, ItemOperation, SourceStage, Stage,
    };
    use crate::stream::{Inbox, Outbox};
    use crate::tasks::TaskGroupSummary;
    use crate::testing::{ConcurrencyProbe, RecordingFetcher};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Word {
        key: char,
        text: String,
    }

    impl Identified for Word {
        type Key = char;

        fn identity(&self) -> char {
            self.key
        }
    }

    struct FirstLetter;

    #[async_trait]
    impl IdentityResolver for FirstLetter {
        type Input = String;
        type Record = Word;

        async fn resolve(&self, input: String) -> Result<Word, ServiceError> {
            let key = input
                .chars()
                .next()
                .ok_or_else(|| ServiceError::invalid_input("", "empty word"))?;
            Ok(Word { key, text: input })
        }
    }

    struct Shout {
        probe: Arc<ConcurrencyProbe>,
    }

    #[async_trait]
    impl ItemOperation for Shout {
        type Input = Word;
        type Output = String;

        async fn apply(&self, word: Word) -> Result<String, ServiceError> {
            let _guard = self.probe.enter();
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(word.text.to_uppercase())
        }
    }

    /// Reads a single item and returns, leaving the rest unread.
    #[derive(Debug)]
    struct TakeFirst;

    #[async_trait]
    impl Stage for TakeFirst {
        type Input = u32;
        type Output = u32;

        fn name(&self) -> &str {
            "take_first"
        }

        async fn run(&self, input: &mut Inbox<u32>, output: &Outbox<u32>) -> TaskGroupSummary {
            if let Some(item) = input.recv().await {
                let _ = output.send(item).await;
            }
            TaskGroupSummary::default()
        }
    }

    /// Resolves numbers to themselves and panics on 2.
    struct PanicsOnTwo;

    #[async_trait]
    impl IdentityResolver for PanicsOnTwo {
        type Input = u32;
        type Record = Word;

        async fn resolve(&self, input: u32) -> Result<Word, ServiceError> {
            assert!(input != 2, "resolver cannot handle two");
            let key = char::from_digit(input, 10).unwrap_or('?');
            Ok(Word {
                key,
                text: input.to_string(),
            })
        }
    }

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_dedup_batch_bounded_aggregate() {
        let probe = Arc::new(ConcurrencyProbe::new());
        let fetcher = Arc::new(RecordingFetcher::<Word>::new());

        let output = PipelineBuilder::new("words")
            .stage(SourceStage::new("source", words(&["a", "a", "b"])))
            .stage(DedupStage::new("dedup", FirstLetter))
            .stage(BatchStage::from_arc("batch", Arc::clone(&fetcher), 2).unwrap())
            .stage(
                BoundedStage::new(
                    "shout",
                    Shout {
                        probe: Arc::clone(&probe),
                    },
                    1,
                )
                .unwrap(),
            )
            .stage(AggregateStage::sorted("sort", |a: &String, b: &String| a.cmp(b)))
            .run()
            .await
            .unwrap();

        assert_eq!(output.items, vec!["A", "B"]);
        assert_eq!(fetcher.batch_sizes(), vec![2]);
        assert_eq!(probe.peak(), 1);
        assert!(output.report.is_clean());
        assert_eq!(output.report.stages.len(), 5);
    }

    #[tokio::test]
    async fn test_panicking_stage_still_closes_output() {
        let events = Arc::new(CollectingEventSink::new());

        let output = PipelineBuilder::new("panics")
            .with_event_sink(events.clone())
            .stage(SourceStage::new("source", vec![1u32, 2, 3]))
            .stage(FnStage::new("boom", |x: u32| {
                assert!(x != 2, "cannot handle two");
                Some(x)
            }))
            .stage(FnStage::new("show", |x: u32| Some(x.to_string())))
            .run()
            .await
            .unwrap();

        assert_eq!(output.items, vec!["1"]);

        let boom = output.report.stage("boom").unwrap();
        assert_eq!(boom.status, StageStatus::Panicked);
        assert!(boom.panic.as_deref().unwrap_or_default().contains("cannot handle two"));
        assert_eq!(output.report.stage("show").unwrap().status, StageStatus::Completed);
        assert!(!output.report.is_clean());
        assert_eq!(output.report.panicked().count(), 1);

        assert_eq!(events.events_of_type(event_types::STAGE_PANICKED).len(), 1);
        assert_eq!(events.events_of_type(event_types::STAGE_COMPLETED).len(), 2);
    }

    #[tokio::test]
    async fn test_subtask_panic_reaches_report() {
        let events = Arc::new(CollectingEventSink::new());

        let output = PipelineBuilder::new("lossy")
            .with_event_sink(events.clone())
            .stage(SourceStage::new("source", vec![1u32, 2, 3]))
            .stage(DedupStage::new("dedup", PanicsOnTwo))
            .run()
            .await
            .unwrap();

        assert_eq!(output.items.len(), 2);

        let dedup = output.report.stage("dedup").unwrap();
        assert_eq!(dedup.status, StageStatus::Completed);
        assert_eq!(dedup.subtasks, 3);
        assert_eq!(dedup.subtask_panics, 1);
        assert!(!output.report.is_clean());

        let completed = events.events_of_type(event_types::STAGE_COMPLETED);
        let dedup_event = completed
            .iter()
            .flatten()
            .find(|data| data["stage"] == "dedup")
            .unwrap();
        assert_eq!(dedup_event["subtask_panics"], 1);
    }

    #[tokio::test]
    async fn test_unread_input_is_drained() {
        let output = PipelineBuilder::new("leftovers")
            .stage(SourceStage::new("source", vec![1u32, 2, 3, 4, 5]))
            .stage(TakeFirst)
            .run()
            .await
            .unwrap();

        assert_eq!(output.items, vec![1]);

        let source = output.report.stage("source").unwrap();
        assert_eq!(source.items_out, 5);

        let take = output.report.stage("take_first").unwrap();
        assert_eq!(take.items_in, 1);
        assert_eq!(take.discarded, 4);
        assert!(take.is_success());
    }

    #[tokio::test]
    async fn test_wait_discards_final_output() {
        let mut running = PipelineBuilder::new("unread")
            .stage(SourceStage::new("source", vec![1u32, 2, 3]))
            .stage(FnStage::new("double", |x: u32| Some(x * 2)))
            .spawn();

        assert_eq!(running.recv().await, Some(2));

        let report = running.wait().await.unwrap();
        assert_eq!(report.undrained, 2);
        assert!(!report.is_clean());
        assert!(report.stages.iter().all(|stage| stage.is_success()));
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let events = Arc::new(CollectingEventSink::new());

        let running = PipelineBuilder::new("events")
            .with_event_sink(events.clone())
            .stage(SourceStage::new("source", vec!["x".to_string()]))
            .stage(FnStage::new("len", |s: String| Some(s.len())))
            .spawn();
        let run_id = running.run_id();
        let output = running.collect().await.unwrap();

        assert_eq!(output.items, vec![1]);
        assert_eq!(output.report.run_id, run_id);

        let started = events.events_of_type(event_types::PIPELINE_STARTED);
        assert_eq!(started.len(), 1);
        let data = started[0].as_ref().unwrap();
        assert_eq!(data["run_id"], run_id.to_string());
        assert_eq!(data["stages"], serde_json::json!(["source", "len"]));

        assert_eq!(events.events_of_type(event_types::STAGE_STARTED).len(), 2);
        assert_eq!(events.events_of_type(event_types::STAGE_COMPLETED).len(), 2);

        let (last, _) = events.events().pop().unwrap();
        assert_eq!(last, event_types::PIPELINE_COMPLETED);
    }

    #[tokio::test]
    async fn test_large_output_with_default_capacity() {
        let output = PipelineBuilder::new("wide")
            .with_config(PipelineConfig::new().with_channel_capacity(1))
            .unwrap()
            .stage(SourceStage::new("source", 0u32..500))
            .stage(FnStage::new("odd", |x: u32| (x % 2 == 1).then_some(x)))
            .run()
            .await
            .unwrap();

        assert_eq!(output.items.len(), 250);
        assert!(output.items.windows(2).all(|w| w[0] < w[1]));
    }

    #[cfg(feature = "spam")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_spam_report_stays_within_service_limits() {
        use crate::spam::{spam_report_pipeline, Latency, MailService, SpamServices};

        let service = Arc::new(MailService::sample(Latency::between(1, 5)));
        let emails = words(&[
            "alice@mail.ru",
            "bob@mail.ru",
            "alice.smith@mail.ru",
            "carol@mail.ru",
            "dave@mail.ru",
            "c.jones@mail.ru",
            "bob@mail.ru",
        ]);

        let output = spam_report_pipeline(
            PipelineBuilder::new("spam"),
            emails,
            SpamServices::from_service(&service),
        )
        .unwrap()
        .run()
        .await
        .unwrap();

        assert_eq!(
            output.items,
            vec!["true 101", "true 301", "true 302", "false 102", "false 201", "false 303"]
        );
        assert_eq!(service.stats().rejected(), 0);
        assert!(service.peak_spam_requests() <= service.limits().max_spam_requests);
    }
}
