//! Bounded concurrent bulletin downloads.
//!
//! Every discovered file gets a task up front; a semaphore keeps the
//! number of transfers actually in flight at the configured cap. The
//! whole session shares one deadline, and transfers still running when
//! it expires are aborted so a partial batch can continue downstream.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::discovery::BulletinLink;

/// Response bodies stream to disk through a buffer of this size.
const WRITE_BUF: usize = 8 * 1024;

pub struct DownloadStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub timed_out: bool,
}

pub async fn download_all(
    links: &BTreeMap<NaiveDate, BulletinLink>,
    dest: &Path,
    settings: &Settings,
) -> Result<DownloadStats> {
    tokio::fs::create_dir_all(dest).await?;

    let client = reqwest::Client::builder().build()?;
    let total = links.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let jobs: Vec<_> = links
        .values()
        .cloned()
        .map(|link| {
            let client = client.clone();
            let path = dest.join(&link.filename);
            let pb = pb.clone();
            async move {
                let ok = match fetch_to_disk(&client, &link.url, &path).await {
                    Ok(()) => {
                        debug!(file = %path.display(), "download complete");
                        true
                    }
                    Err(e) => {
                        warn!(url = %link.url, error = %e, "download failed, skipping file");
                        // a truncated file would poison extraction
                        let _ = tokio::fs::remove_file(&path).await;
                        false
                    }
                };
                pb.inc(1);
                (link.filename, ok)
            }
        })
        .collect();

    let (outcomes, timed_out) = run_session(
        jobs,
        settings.concurrency,
        Duration::from_secs(settings.session_timeout_secs),
    )
    .await;
    pb.finish_and_clear();

    let completed: HashSet<String> = outcomes
        .into_iter()
        .filter(|(_, ok)| *ok)
        .map(|(filename, _)| filename)
        .collect();

    if timed_out {
        warn!(
            timeout_secs = settings.session_timeout_secs,
            "session deadline hit, aborted outstanding transfers"
        );
        // aborted transfers can leave truncated files behind
        for link in links.values() {
            if !completed.contains(&link.filename) {
                let _ = tokio::fs::remove_file(dest.join(&link.filename)).await;
            }
        }
    }

    let ok = completed.len();
    info!(total, ok, errors = total - ok, "download session finished");
    Ok(DownloadStats {
        total,
        ok,
        errors: total - ok,
        timed_out,
    })
}

/// Run every job, at most `limit` in flight, until done or `timeout`
/// elapses. Returns the outcomes that finished and whether the deadline
/// cut the session short.
async fn run_session<Fut, R>(jobs: Vec<Fut>, limit: usize, timeout: Duration) -> (Vec<R>, bool)
where
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut tasks = JoinSet::new();
    for job in jobs {
        let sem = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            job.await
        });
    }

    let deadline = Instant::now() + timeout;
    let mut results = Vec::new();
    let mut timed_out = false;

    loop {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(None) => break,
            Ok(Some(Ok(result))) => results.push(result),
            Ok(Some(Err(e))) => warn!(error = %e, "download task aborted unexpectedly"),
            Err(_) => {
                timed_out = true;
                tasks.abort_all();
                // jobs that finish in the abort window still count
                while let Some(joined) = tasks.join_next().await {
                    if let Ok(result) = joined {
                        results.push(result);
                    }
                }
                break;
            }
        }
    }

    (results, timed_out)
}

async fn fetch_to_disk(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let mut resp = client.get(url).send().await?.error_for_status()?;
    let file = tokio::fs::File::create(path).await?;
    let mut out = BufWriter::with_capacity(WRITE_BUF, file);
    while let Some(chunk) = resp.chunk().await? {
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn respects_concurrency_cap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..20)
            .map(|i| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    i
                }
            })
            .collect();

        let (results, timed_out) = run_session(jobs, 3, Duration::from_secs(10)).await;

        assert_eq!(results.len(), 20);
        assert!(!timed_out);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn deadline_aborts_stragglers() {
        let quick = async { "quick" };
        let slow = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "slow"
        };
        let jobs = vec![
            Box::pin(quick) as std::pin::Pin<Box<dyn Future<Output = &'static str> + Send>>,
            Box::pin(slow),
        ];

        let started = std::time::Instant::now();
        let (results, timed_out) = run_session(jobs, 2, Duration::from_millis(100)).await;

        assert!(timed_out);
        assert_eq!(results, vec!["quick"]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn empty_session() {
        let jobs: Vec<std::future::Ready<()>> = Vec::new();
        let (results, timed_out) = run_session(jobs, 4, Duration::from_millis(10)).await;
        assert!(results.is_empty());
        assert!(!timed_out);
    }
}
