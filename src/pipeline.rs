//! Batch reconciliation pipeline: select remaining reviews, classify them in
//! bounded batches, merge results back by id, and persist — looping forever
//! with drain/backoff/pacing waits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::classifier::Classify;
use crate::config::Config;
use crate::models::{AnalysisResult, AnalyzedReview, Review};
use crate::storage::{ReviewStore, StorageError};

/// Left-join classifier results onto the original batch by id and append the
/// merged rows to the progress table in one transaction.
///
/// Results with no matching original are dropped (their denormalized fields
/// cannot be recovered); originals with no result stay unpersisted and remain
/// eligible for a future batch. Empty results are a no-op, not an error.
pub async fn reconcile(
    store: &ReviewStore,
    batch: &[Review],
    results: &[AnalysisResult],
) -> Result<u64, StorageError> {
    if results.is_empty() {
        return Ok(0);
    }

    let by_id: HashMap<i64, &Review> = batch.iter().map(|r| (r.id, r)).collect();

    let mut rows: Vec<AnalyzedReview> = Vec::with_capacity(results.len());
    for result in results {
        match by_id.get(&result.id) {
            Some(review) => rows.push(AnalyzedReview::merge(review, result)),
            None => {
                tracing::info!(id = result.id, "dropping result with no matching review");
            }
        }
    }

    let unmatched = batch.len().saturating_sub(rows.len());
    if unmatched > 0 {
        tracing::info!(
            count = unmatched,
            "reviews left unpersisted, eligible for a later batch"
        );
    }

    if rows.is_empty() {
        return Ok(0);
    }

    store.insert_analyzed(&rows).await
}

/// The polling driver tying selector, classifier and reconciler together.
///
/// Single worker, no concurrent batches; every suspension point is an
/// explicit timed wait that also honors the cancellation token.
pub struct Pipeline {
    store: ReviewStore,
    classifier: Arc<dyn Classify>,
    batch_size: i64,
    drain_wait: Duration,
    backoff_wait: Duration,
    pacing_wait: Duration,
}

impl Pipeline {
    pub fn new(store: ReviewStore, classifier: Arc<dyn Classify>, config: &Config) -> Self {
        Self {
            store,
            classifier,
            batch_size: config.batch_size,
            drain_wait: config.drain_wait(),
            backoff_wait: config.backoff_wait(),
            pacing_wait: config.pacing_wait(),
        }
    }

    /// Run until the token is cancelled. Classifier and store failures inside
    /// the loop become backoff waits; nothing here escalates to a crash.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(batch_size = self.batch_size, "pipeline started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let batch = match self.store.select_unanalyzed(self.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(error = %e, "batch selection failed, backing off");
                    if self.wait(&cancel, self.backoff_wait).await {
                        break;
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                tracing::debug!("no unanalyzed reviews, idling");
                if self.wait(&cancel, self.drain_wait).await {
                    break;
                }
                continue;
            }

            tracing::info!(size = batch.len(), first_id = batch[0].id, "classifying batch");

            let results = match self.classifier.classify(&batch).await {
                Ok(results) => results,
                Err(e) => {
                    // Nothing was persisted, so the full batch is retried
                    // next cycle.
                    tracing::warn!(error = %e, "classify failed, backing off");
                    if self.wait(&cancel, self.backoff_wait).await {
                        break;
                    }
                    continue;
                }
            };

            match reconcile(&self.store, &batch, &results).await {
                Ok(persisted) => {
                    tracing::info!(persisted, batch = batch.len(), "batch reconciled");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reconcile failed, backing off");
                    if self.wait(&cancel, self.backoff_wait).await {
                        break;
                    }
                    continue;
                }
            }

            if self.wait(&cancel, self.pacing_wait).await {
                break;
            }
        }

        tracing::info!("pipeline stopped");
    }

    /// Sleep for `duration` unless cancelled first. Returns true when the
    /// token fired.
    async fn wait(&self, cancel: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierError, Result as ClassifyResult};
    use crate::models::{Category, NewReview, Sentiment};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;

    async fn create_test_store() -> (ReviewStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = ReviewStore::new(db_path.to_str().unwrap()).await.unwrap();
        store.init_schema().await.unwrap();
        (store, temp_dir)
    }

    async fn seed_reviews(store: &ReviewStore, count: i64) {
        let rows: Vec<NewReview> = (1..=count)
            .map(|n| NewReview {
                author_id: Some(n),
                brand_name: Some("FOREO".into()),
                submission_time: Some(1_600_000_000 + n),
                rating: Some(4),
                review_title: None,
                review_text: Some(format!("text {}", n)),
                product_name: Some("Luna 3".into()),
            })
            .collect();
        store.insert_reviews(&rows).await.unwrap();
    }

    fn ok_result(id: i64) -> AnalysisResult {
        AnalysisResult {
            id,
            category: Category::Other,
            sentiment: Sentiment::Neutral,
        }
    }

    /// Scripted classify outcomes, one per call; defaults to full success
    /// when the script runs out.
    enum Outcome {
        Ok,
        /// Results for only the first `n` reviews of the batch.
        Partial(usize),
        /// Results including an id not present in the batch.
        Stray(i64),
        Fail,
    }

    struct MockClassifier {
        script: Mutex<VecDeque<Outcome>>,
        calls: Mutex<Vec<(Instant, Vec<i64>)>>,
    }

    impl MockClassifier {
        fn new(script: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Instant, Vec<i64>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Classify for MockClassifier {
        async fn classify(&self, batch: &[Review]) -> ClassifyResult<Vec<AnalysisResult>> {
            let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
            self.calls.lock().unwrap().push((Instant::now(), ids.clone()));

            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Outcome::Ok);
            match outcome {
                Outcome::Ok => Ok(ids.into_iter().map(ok_result).collect()),
                Outcome::Partial(n) => Ok(ids.into_iter().take(n).map(ok_result).collect()),
                Outcome::Stray(extra) => {
                    let mut results: Vec<AnalysisResult> =
                        ids.into_iter().map(ok_result).collect();
                    results.push(ok_result(extra));
                    Ok(results)
                }
                Outcome::Fail => Err(ClassifierError::EmptyResponse),
            }
        }
    }

    fn test_pipeline(store: ReviewStore, classifier: Arc<dyn Classify>, batch_size: i64) -> Pipeline {
        Pipeline {
            store,
            classifier,
            batch_size,
            drain_wait: Duration::from_millis(10),
            backoff_wait: Duration::from_millis(100),
            pacing_wait: Duration::from_millis(5),
        }
    }

    async fn wait_for_analyzed(store: &ReviewStore, expected: i64) {
        for _ in 0..200 {
            if store.count_analyzed().await.unwrap() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("analysis did not reach {} rows in time", expected);
    }

    // -------------------------------------------------------------------------
    // Reconciler
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn reconcile_merge_miss_both_directions() {
        let (store, _temp) = create_test_store().await;
        seed_reviews(&store, 3).await;

        let batch = store.select_unanalyzed(100).await.unwrap();
        // Results for {2,3,4}: 4 has no source row, 1 got no result
        let results = vec![ok_result(2), ok_result(3), ok_result(4)];

        let persisted = reconcile(&store, &batch, &results).await.unwrap();
        assert_eq!(persisted, 2);

        let ids: Vec<i64> = store
            .get_analyzed()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);

        // Review 1 remains eligible for a later batch
        let remaining: Vec<i64> = store
            .select_unanalyzed(100)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(remaining, vec![1]);
    }

    #[tokio::test]
    async fn reconcile_empty_results_is_a_no_op() {
        let (store, _temp) = create_test_store().await;
        seed_reviews(&store, 3).await;
        let batch = store.select_unanalyzed(100).await.unwrap();

        let persisted = reconcile(&store, &batch, &[]).await.unwrap();
        assert_eq!(persisted, 0);
        assert_eq!(store.count_analyzed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reconcile_all_stray_results_persists_nothing() {
        let (store, _temp) = create_test_store().await;
        seed_reviews(&store, 2).await;
        let batch = store.select_unanalyzed(100).await.unwrap();

        let persisted = reconcile(&store, &batch, &[ok_result(99)]).await.unwrap();
        assert_eq!(persisted, 0);
        assert_eq!(store.count_analyzed().await.unwrap(), 0);
    }

    // -------------------------------------------------------------------------
    // Driver
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn driver_processes_all_batches_then_drains() {
        let (store, _temp) = create_test_store().await;
        seed_reviews(&store, 5).await;

        let mock = MockClassifier::new(vec![]);
        let pipeline = test_pipeline(store.clone(), mock.clone(), 2);

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(cancel).await })
        };

        wait_for_analyzed(&store, 5).await;
        cancel.cancel();
        handle.await.unwrap();

        let batches: Vec<Vec<i64>> = mock.calls().into_iter().map(|(_, ids)| ids).collect();
        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);

        let ids: Vec<i64> = store
            .get_analyzed()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn driver_backs_off_and_retries_identical_batch() {
        let (store, _temp) = create_test_store().await;
        seed_reviews(&store, 3).await;

        let mock = MockClassifier::new(vec![Outcome::Fail]);
        let pipeline = test_pipeline(store.clone(), mock.clone(), 3);

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(cancel).await })
        };

        wait_for_analyzed(&store, 3).await;
        cancel.cancel();
        handle.await.unwrap();

        let calls = mock.calls();
        assert!(calls.len() >= 2);
        // Nothing was persisted on failure, so the retry sees the same ids
        assert_eq!(calls[0].1, vec![1, 2, 3]);
        assert_eq!(calls[1].1, calls[0].1);
        // The retry waited at least the configured backoff interval
        let gap = calls[1].0.duration_since(calls[0].0);
        assert!(gap >= Duration::from_millis(100), "gap was {:?}", gap);
    }

    #[tokio::test]
    async fn driver_retries_unmatched_reviews_from_partial_results() {
        let (store, _temp) = create_test_store().await;
        seed_reviews(&store, 3).await;

        // First call only classifies the first review of [1, 2]
        let mock = MockClassifier::new(vec![Outcome::Partial(1)]);
        let pipeline = test_pipeline(store.clone(), mock.clone(), 2);

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(cancel).await })
        };

        wait_for_analyzed(&store, 3).await;
        cancel.cancel();
        handle.await.unwrap();

        let batches: Vec<Vec<i64>> = mock.calls().into_iter().map(|(_, ids)| ids).collect();
        assert_eq!(batches[0], vec![1, 2]);
        // Review 2 came back around in the next selection
        assert_eq!(batches[1], vec![2, 3]);

        let ids: Vec<i64> = store
            .get_analyzed()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn driver_ignores_stray_result_ids() {
        let (store, _temp) = create_test_store().await;
        seed_reviews(&store, 2).await;

        let mock = MockClassifier::new(vec![Outcome::Stray(99)]);
        let pipeline = test_pipeline(store.clone(), mock.clone(), 10);

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(cancel).await })
        };

        wait_for_analyzed(&store, 2).await;
        cancel.cancel();
        handle.await.unwrap();

        let ids: Vec<i64> = store
            .get_analyzed()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn restarted_driver_never_reclassifies_persisted_rows() {
        let (store, _temp) = create_test_store().await;
        seed_reviews(&store, 4).await;

        // First session completes everything
        let mock = MockClassifier::new(vec![]);
        let pipeline = test_pipeline(store.clone(), mock.clone(), 2);
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(cancel).await })
        };
        wait_for_analyzed(&store, 4).await;
        cancel.cancel();
        handle.await.unwrap();

        // Second session against the same store: drained from the start,
        // the classifier must never be called again
        let mock2 = MockClassifier::new(vec![]);
        let pipeline2 = test_pipeline(store.clone(), mock2.clone(), 2);
        let cancel2 = CancellationToken::new();
        let handle2 = {
            let cancel = cancel2.clone();
            tokio::spawn(async move { pipeline2.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel2.cancel();
        handle2.await.unwrap();

        assert!(mock2.calls().is_empty());
        assert_eq!(store.count_analyzed().await.unwrap(), 4);
        // Each id appears exactly once
        let ids: Vec<i64> = store
            .get_analyzed()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn cancellation_interrupts_waits_promptly() {
        let (store, _temp) = create_test_store().await;
        // Empty store: driver sits in the drain wait

        let mock = MockClassifier::new(vec![]);
        let mut pipeline = test_pipeline(store, mock, 10);
        pipeline.drain_wait = Duration::from_secs(3600);

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let start = Instant::now();
        cancel.cancel();
        handle.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
