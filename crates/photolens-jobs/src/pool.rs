//! Bounded, cancellable worker pool for per-item job work.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::job::Job;

/// Run `work` over `items` with at most `concurrency` units in flight.
///
/// Cancellation is checked before and after acquiring a slot; once observed
/// no further units start, and the call returns after in-flight units drain.
/// Every unit that finishes before cancellation bumps the job's processed
/// counter and broadcasts `progress`; units still in flight when the job is
/// cancelled are abandoned and not counted. Returns the number of units
/// started.
pub async fn run_bounded<T, F, Fut>(job: &Arc<Job>, items: Vec<T>, concurrency: usize, work: F) -> usize
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = job.cancellation_token();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let work = Arc::new(work);
    let mut tasks = JoinSet::new();
    let mut started = 0usize;

    for item in items {
        if token.is_cancelled() {
            break;
        }
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        if token.is_cancelled() {
            break;
        }

        started += 1;
        let work = Arc::clone(&work);
        let job = Arc::clone(job);
        let token = token.clone();
        tasks.spawn(async move {
            let _permit = permit;
            work(item).await;
            if !token.is_cancelled() {
                job.record_progress();
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(job_id = %job.id(), error = ?e, "Job unit panicked");
        }
    }
    debug!(job_id = %job.id(), started, cancelled = token.is_cancelled(), "Worker pool drained");
    started
}
