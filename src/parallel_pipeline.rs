// THEORY:
// Exhaustive linking is embarrassingly parallel: a tube's score depends only on its
// own proposals. The `ParallelLinker` fans the enumeration order out to a pool of
// tokio workers as contiguous index ranges, each worker reports the first-seen best
// of its range, and the fan-in keeps the best of those in range order. Because the
// ranges are reduced in order with the same strict "greater wins" rule, the result is
// identical to the sequential exhaustive linker, ties included.
//
// The pool mirrors a classic dispatcher layout: one dispatcher task receives every
// `ScoreTask` and deals it round-robin to per-worker channels. Each task carries its
// own oneshot reply channel. Workers share nothing mutable; the clip travels as an
// `Arc` and is only read. Scoring a range is pure CPU work, so each worker hands it
// to tokio's blocking pool and only awaits the answer.
//
// Only exhaustive search fans out. The dynamic and beam strategies are already
// cheap and run on the sequential linker.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::core_modules::enumerator::TubeEnumerator;
use crate::core_modules::proposal::Clip;
use crate::core_modules::scorer::TubeScorer;
use crate::error::{LinkError, LinkResult};
use crate::pipeline::{LinkReport, LinkStrategy, LinkedTube, LinkerConfig, TubeLinker, select_best};

/// Ranges handed out per worker, so a slow range does not stall the whole pool.
const RANGES_PER_WORKER: u64 = 4;

/// The best tube found inside one index range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBest {
    pub index: u64,
    pub choice: Vec<usize>,
    pub score: f64,
}

pub struct ScoreTask {
    pub clip: Arc<Clip>,
    pub start: u64,
    pub end: u64,
    pub result_sender: oneshot::Sender<LinkResult<Option<RangeBest>>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<ScoreTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the dispatcher and `worker_count` workers. Must be called from within a
    /// tokio runtime.
    pub fn new(worker_count: usize, scorer: TubeScorer) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<ScoreTask>();
        let mut workers = Vec::with_capacity(worker_count + 1);

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<ScoreTask>())
            .unzip();

        workers.push(tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        }));

        for mut worker_receiver in worker_receivers {
            workers.push(tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let ScoreTask {
                        clip,
                        start,
                        end,
                        result_sender,
                    } = task;
                    let best = tokio::task::spawn_blocking(move || Self::score_range_worker(&clip, start, end, &scorer))
                        .await
                        .unwrap_or_else(|e| Err(LinkError::WorkerPool(format!("range scoring task failed: {}", e))));
                    let _ = result_sender.send(best);
                }
            }));
        }

        Self { task_sender, workers }
    }

    fn score_range_worker(clip: &Clip, start: u64, end: u64, scorer: &TubeScorer) -> LinkResult<Option<RangeBest>> {
        let enumerator = TubeEnumerator::new(clip)?;
        let scored = (start..).zip(enumerator.range(start, end)).map(|(index, choice)| {
            let score = scorer.score_choice(clip, &choice);
            ((index, choice), score)
        });
        Ok(select_best(scored).map(|((index, choice), score)| RangeBest { index, choice, score }))
    }

    /// Scores the tubes numbered `start..end` of `clip` on some worker.
    pub async fn score_range(&self, clip: Arc<Clip>, start: u64, end: u64) -> LinkResult<Option<RangeBest>> {
        let (result_sender, result_receiver) = oneshot::channel();
        let task = ScoreTask {
            clip,
            start,
            end,
            result_sender,
        };

        self.task_sender
            .send(task)
            .map_err(|_| LinkError::WorkerPool("failed to send task to worker pool".into()))?;

        result_receiver
            .await
            .map_err(|_| LinkError::WorkerPool("failed to receive result from worker".into()))?
    }

    /// Number of scoring workers, not counting the dispatcher.
    pub fn worker_count(&self) -> usize {
        self.workers.len() - 1
    }

    /// Closes the task queue and waits for every task to finish.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Exhaustive linking spread over a worker pool.
///
/// Other strategies are delegated to a `TubeLinker` on the calling task.
pub struct ParallelLinker {
    config: LinkerConfig,
    sequential: TubeLinker,
    worker_pool: WorkerPool,
}

impl ParallelLinker {
    /// Must be called from within a tokio runtime.
    pub fn new(config: LinkerConfig) -> LinkResult<Self> {
        let sequential = TubeLinker::new(config.clone())?;
        if config.strategy != LinkStrategy::Exhaustive {
            warn!(strategy = ?config.strategy, "only exhaustive search uses the worker pool, linking sequentially");
        }
        let worker_pool = WorkerPool::new(config.worker_count(), *sequential.scorer());
        Ok(Self {
            config,
            sequential,
            worker_pool,
        })
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.worker_pool.worker_count()
    }

    pub async fn link(&self, clip: Arc<Clip>) -> LinkResult<LinkReport> {
        if self.config.strategy != LinkStrategy::Exhaustive {
            return self.sequential.link(&clip);
        }
        let warnings = clip.check(self.config.n_clips, self.config.n_anchors)?;
        let total = TubeEnumerator::new(&clip)?.len();
        if total > self.config.max_candidates {
            return Err(LinkError::InvalidConfiguration(format!(
                "{} candidate tubes exceed max_candidates {}",
                total, self.config.max_candidates
            )));
        }

        let ranges = (self.worker_count() as u64 * RANGES_PER_WORKER).max(1);
        let range_len = total.div_ceil(ranges).max(1);
        debug!(total, range_len, workers = self.worker_count(), "fanning out clip");

        let pending = (0..total)
            .step_by(range_len as usize)
            .map(|start| self.worker_pool.score_range(clip.clone(), start, (start + range_len).min(total)));
        let results = join_all(pending).await;

        let mut bests = Vec::with_capacity(results.len());
        for result in results {
            if let Some(best) = result? {
                let score = best.score;
                bests.push((best, score));
            }
        }
        let (best, score) = select_best(bests).ok_or(LinkError::EmptyInput { frame: 0 })?;
        debug!(index = best.index, score, "parallel linker selected tube");

        Ok(LinkReport {
            selected: LinkedTube {
                tube: clip.tube(&best.choice),
                score,
            },
            evaluations: total,
            warnings,
        })
    }

    pub async fn shutdown(self) {
        self.worker_pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::bbox::BBox;
    use crate::core_modules::proposal::Proposal;

    fn grid_clip(frames: usize, per_frame: usize) -> Clip {
        Clip::new(
            (0..frames)
                .map(|t| {
                    (0..per_frame)
                        .map(|i| {
                            let x = (i * 7 + t * 3) as f64;
                            let act = ((i * 31 + t * 17) % 11) as f64 / 10.0;
                            Proposal::new(BBox::new(x, x / 2.0, x + 12.0, x / 2.0 + 9.0), act)
                        })
                        .collect()
                })
                .collect(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn parallel_agrees_with_sequential() {
        let clip = grid_clip(4, 5);
        let config = LinkerConfig::new(4, 5).with_workers(3);
        let sequential = TubeLinker::new(config.clone()).unwrap().link(&clip).unwrap();
        let parallel = ParallelLinker::new(config).unwrap();
        let report = parallel.link(Arc::new(clip)).await.unwrap();
        assert_eq!(report, sequential);
        parallel.shutdown().await;
    }

    #[tokio::test]
    async fn ties_match_sequential_order() {
        let p = Proposal::new(BBox::new(0.0, 0.0, 5.0, 5.0), 0.4);
        let clip = Arc::new(Clip::new(vec![vec![p; 4]; 3]));
        let parallel = ParallelLinker::new(LinkerConfig::new(3, 4).with_workers(2)).unwrap();
        let report = parallel.link(clip).await.unwrap();
        assert_eq!(report.selected.tube.indices, vec![0, 0, 0]);
        assert_eq!(report.evaluations, 64);
    }

    #[tokio::test]
    async fn empty_frame_fails_before_fan_out() {
        let mut clip = grid_clip(3, 2);
        clip.frames[2].clear();
        let parallel = ParallelLinker::new(LinkerConfig::new(3, 2)).unwrap();
        assert_eq!(
            parallel.link(Arc::new(clip)).await,
            Err(LinkError::EmptyInput { frame: 2 })
        );
    }

    #[tokio::test]
    async fn other_strategies_follow_the_sequential_linker() {
        let clip = grid_clip(4, 3);
        for strategy in [LinkStrategy::Dynamic, LinkStrategy::Beam { width: 1 }] {
            let config = LinkerConfig::new(4, 3).with_strategy(strategy).with_workers(2);
            let sequential = TubeLinker::new(config.clone()).unwrap().link(&clip).unwrap();
            let parallel = ParallelLinker::new(config).unwrap();
            assert_eq!(parallel.link(Arc::new(clip.clone())).await.unwrap(), sequential);
            assert!(sequential.evaluations < 81, "{strategy:?}");
            parallel.shutdown().await;
        }
    }

    #[tokio::test]
    async fn pool_reports_range_bests() {
        let clip = Arc::new(grid_clip(2, 3));
        let scorer = TubeScorer::new(2).unwrap();
        let pool = WorkerPool::new(2, scorer);
        let best = pool.score_range(clip.clone(), 3, 6).await.unwrap().unwrap();
        assert!((3..6).contains(&best.index));
        assert_eq!(best.choice[0], 1);
        assert!(pool.score_range(clip, 9, 9).await.unwrap().is_none());
        assert_eq!(pool.worker_count(), 2);
        pool.shutdown().await;
    }
}
