//! Fixed-size batching over a reranker with ordered reassembly.

use std::collections::BTreeMap;
use std::thread;

use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use tracing::debug;

use super::Reranker;

type BatchResult = Result<(usize, Vec<f32>)>;

/// Scores `inputs` in batches of `batch_size` spread across `workers` threads.
///
/// The returned scores line up with `inputs` exactly as a single unbatched
/// `predict` call would; any failed batch fails the whole call.
pub fn score_in_batches(
    reranker: &dyn Reranker,
    inputs: &[String],
    batch_size: usize,
    workers: usize,
) -> Result<Vec<f32>> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }
    let batches: Vec<&[String]> = inputs.chunks(batch_size.max(1)).collect();
    let workers = workers.clamp(1, batches.len());
    if workers == 1 {
        let mut scores = Vec::with_capacity(inputs.len());
        for (id, batch) in batches.iter().enumerate() {
            scores.extend(score_batch(reranker, id, batch)?);
        }
        return Ok(scores);
    }

    let (task_tx, task_rx) = bounded::<(usize, &[String])>(batches.len());
    let (result_tx, result_rx) = bounded::<BatchResult>(batches.len());
    thread::scope(|scope| -> Result<Vec<f32>> {
        for worker_id in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (batch_id, batch) in task_rx.iter() {
                    debug!(worker_id, batch_id, inputs = batch.len(), "scoring batch");
                    let result = score_batch(reranker, batch_id, batch).map(|scores| (batch_id, scores));
                    let failed = result.is_err();
                    if result_tx.send(result).is_err() || failed {
                        break;
                    }
                }
            });
        }
        drop(task_rx);
        drop(result_tx);

        for (batch_id, batch) in batches.iter().enumerate() {
            task_tx
                .send((batch_id, *batch))
                .map_err(|_| anyhow!("rerank worker channel closed"))?;
        }
        drop(task_tx);

        // moved in so an early return disconnects the workers
        let result_rx = result_rx;
        let mut pending: BTreeMap<usize, Vec<f32>> = BTreeMap::new();
        let mut next_batch = 0usize;
        let mut scores = Vec::with_capacity(inputs.len());
        for result in result_rx.iter() {
            let (batch_id, batch_scores) = result?;
            pending.insert(batch_id, batch_scores);
            while let Some(ready) = pending.remove(&next_batch) {
                scores.extend(ready);
                next_batch += 1;
            }
        }
        anyhow::ensure!(
            next_batch == batches.len(),
            "only {} of {} rerank batches completed",
            next_batch,
            batches.len()
        );
        Ok(scores)
    })
}

fn score_batch(reranker: &dyn Reranker, batch_id: usize, batch: &[String]) -> Result<Vec<f32>> {
    let scores = reranker
        .predict(batch)
        .map_err(|err| err.context(format!("rerank batch {batch_id} failed")))?;
    anyhow::ensure!(
        scores.len() == batch.len(),
        "rerank batch {} returned {} scores for {} inputs",
        batch_id,
        scores.len(),
        batch.len()
    );
    if let Some(pos) = scores.iter().position(|score| !score.is_finite()) {
        anyhow::bail!(
            "rerank batch {batch_id} returned non-finite score {} for input {pos}",
            scores[pos]
        );
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scores an input by its length, sleeping longer for earlier batches so
    /// that concurrent batches finish out of order.
    struct LengthScorer {
        calls: AtomicUsize,
    }

    impl Reranker for LengthScorer {
        fn predict(&self, inputs: &[String]) -> Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5u64.saturating_sub(call as u64)));
            Ok(inputs.iter().map(|s| s.len() as f32 * 0.5).collect())
        }
    }

    struct FailsOn(String);

    impl Reranker for FailsOn {
        fn predict(&self, inputs: &[String]) -> Result<Vec<f32>> {
            if inputs.iter().any(|s| *s == self.0) {
                anyhow::bail!("model server unavailable");
            }
            Ok(vec![1.0; inputs.len()])
        }
    }

    struct DropsOne;

    impl Reranker for DropsOne {
        fn predict(&self, inputs: &[String]) -> Result<Vec<f32>> {
            Ok(vec![0.0; inputs.len().saturating_sub(1)])
        }
    }

    fn inputs(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    #[test]
    fn batched_output_matches_unbatched_for_every_batch_size() {
        let inputs = inputs(23);
        let reference = LengthScorer { calls: AtomicUsize::new(0) }
            .predict(&inputs)
            .unwrap();
        for batch_size in 1..=inputs.len() + 1 {
            for workers in [1, 2, 4] {
                let scorer = LengthScorer { calls: AtomicUsize::new(0) };
                let scores = score_in_batches(&scorer, &inputs, batch_size, workers).unwrap();
                assert_eq!(scores, reference, "batch_size={batch_size} workers={workers}");
            }
        }
    }

    #[test]
    fn one_failed_batch_fails_everything() {
        let inputs = inputs(10);
        let poisoned = FailsOn("x".repeat(7));
        for workers in [1, 3] {
            let err = score_in_batches(&poisoned, &inputs, 3, workers).unwrap_err();
            assert!(format!("{err:#}").contains("model server unavailable"));
        }
    }

    #[test]
    fn short_batch_output_is_rejected() {
        let err = score_in_batches(&DropsOne, &inputs(4), 2, 2).unwrap_err();
        assert!(err.to_string().contains("returned 1 scores for 2 inputs"));
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let scorer = LengthScorer { calls: AtomicUsize::new(0) };
        assert!(score_in_batches(&scorer, &[], 4, 2).unwrap().is_empty());
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    struct NanScorer;

    impl Reranker for NanScorer {
        fn predict(&self, inputs: &[String]) -> Result<Vec<f32>> {
            Ok(inputs
                .iter()
                .map(|input| if input == "bad" { f32::NAN } else { 0.5 })
                .collect())
        }
    }

    #[test]
    fn non_finite_score_fails_the_call() {
        let inputs: Vec<String> = ["ok", "ok", "bad", "ok"].iter().map(|s| s.to_string()).collect();
        for workers in [1, 2] {
            let err = score_in_batches(&NanScorer, &inputs, 2, workers).unwrap_err();
            assert!(format!("{err:#}").contains("non-finite"), "{err:#}");
        }
    }
}
