use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::browser::{BrowserDriver, BrowserLauncher};
use super::capture::{CaptureSettings, capture_onion};
use super::error::Tor2TorError;
use super::links::LinkSource;
use super::pool::BrowserPool;
use super::results::{CrawlResults, CrawlSummary};
use super::types::WorkItem;

pub const NO_BROWSERS: &str = "no browser instances available";

/// FIFO of links to capture. Filled once, then only drained.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
}

impl WorkQueue {
    /// Numbers the links from 1 in the order given.
    pub fn from_links(links: impl IntoIterator<Item = String>) -> Self {
        let items = links
            .into_iter()
            .enumerate()
            .map(|(i, url)| WorkItem { index: i + 1, url })
            .collect();
        Self {
            items: Mutex::new(items),
        }
    }

    pub fn pop(&self) -> Option<WorkItem> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// What the pool looked like around teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    pub idle_after_drain: usize,
    pub terminated: usize,
}

/// Pops items until the queue is empty. Each item is captured with a browser
/// borrowed for exactly that item.
pub async fn worker<D: BrowserDriver + 'static>(
    id: usize,
    queue: Arc<WorkQueue>,
    results: Arc<CrawlResults>,
    pool: Arc<BrowserPool<D>>,
    settings: Arc<CaptureSettings>,
) {
    let mut processed = 0usize;
    while let Some(item) = queue.pop() {
        match pool.acquire().await {
            Ok(mut browser) => {
                capture_onion(&settings, &item, &mut *browser, &results).await;
            }
            Err(err) => results.record_skip(item.index, item.url, err.to_string()),
        }
        processed += 1;
    }
    debug!("worker {id} finished after {processed} items");
}

/// Opens a pool of `pool_size` browsers, drains `queue` with `num_workers`
/// workers, then closes the pool.
pub async fn execute_worker<L: BrowserLauncher>(
    launcher: &L,
    queue: Arc<WorkQueue>,
    results: Arc<CrawlResults>,
    settings: Arc<CaptureSettings>,
    num_workers: usize,
    pool_size: usize,
) -> Result<PoolReport, Tor2TorError> {
    let pool = BrowserPool::open(launcher, pool_size).await?;

    if pool.size() == 0 {
        if !queue.is_empty() {
            warn!("Browser pool is empty; skipping {} onions", queue.len());
        }
        while let Some(item) = queue.pop() {
            results.record_skip(item.index, item.url, NO_BROWSERS);
        }
    } else {
        let num_workers = num_workers.max(1);
        info!(
            "Capturing {} onions with {num_workers} workers and {} browsers",
            queue.len(),
            pool.size()
        );

        let mut workers = JoinSet::new();
        for id in 1..=num_workers {
            workers.spawn(worker(
                id,
                Arc::clone(&queue),
                Arc::clone(&results),
                Arc::clone(&pool),
                Arc::clone(&settings),
            ));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!("worker task failed: {err}");
            }
        }
    }

    let idle_after_drain = pool.idle_count();
    let terminated = pool.close().await;
    Ok(PoolReport {
        idle_after_drain,
        terminated,
    })
}

/// One crawl: links from `links`, screenshots through browsers from `launcher`.
#[derive(Debug)]
pub struct Scraper<S, L> {
    links: S,
    launcher: L,
    settings: Arc<CaptureSettings>,
    workers: usize,
    pool_size: usize,
}

impl<S: LinkSource, L: BrowserLauncher> Scraper<S, L> {
    pub fn new(
        links: S,
        launcher: L,
        settings: CaptureSettings,
        workers: usize,
        pool_size: usize,
    ) -> Self {
        Self {
            links,
            launcher,
            settings: Arc::new(settings),
            workers,
            pool_size,
        }
    }

    /// Captures the first `limit` onions linked from `onion_url`.
    ///
    /// Only a failure to fetch `onion_url` itself is returned as an error;
    /// every per-link problem is recorded in `results`.
    pub async fn execute_scraper(
        &self,
        onion_url: &str,
        results: Arc<CrawlResults>,
        limit: usize,
    ) -> Result<CrawlSummary, Tor2TorError> {
        let mut onions = self.links.onions_on_page(onion_url).await?;
        info!("Found {} onions on {onion_url}", onions.len());
        onions.truncate(limit);

        let queue = Arc::new(WorkQueue::from_links(onions));
        if queue.is_empty() {
            warn!("Nothing to capture on {onion_url}");
        } else {
            let report = execute_worker(
                &self.launcher,
                Arc::clone(&queue),
                Arc::clone(&results),
                Arc::clone(&self.settings),
                self.workers,
                self.pool_size,
            )
            .await?;
            debug!(
                "{} browsers idle after drain, {} terminated",
                report.idle_after_drain, report.terminated
            );
        }

        info!(
            "DONE! {} captured, {} skipped",
            results.captured_count(),
            results.skipped_count()
        );
        Ok(results.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::app::testing::{FakeLauncher, FakeStats};

    fn links(count: usize) -> Vec<String> {
        (0..count).map(|n| format!("http://site{n}.onion")).collect()
    }

    struct FixedLinks(Vec<String>);

    #[async_trait]
    impl LinkSource for FixedLinks {
        async fn onions_on_page(&self, _url: &str) -> Result<Vec<String>, Tor2TorError> {
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl LinkSource for Unreachable {
        async fn onions_on_page(&self, url: &str) -> Result<Vec<String>, Tor2TorError> {
            Err(Tor2TorError::InvalidTarget(url.to_string()))
        }
    }

    #[test]
    fn queue_numbers_items_from_one_in_order() {
        let queue = WorkQueue::from_links(links(3));

        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue.pop(),
            Some(WorkItem {
                index: 1,
                url: "http://site0.onion".to_string()
            })
        );
        assert_eq!(queue.pop().map(|i| i.index), Some(2));
        assert_eq!(queue.pop().map(|i| i.index), Some(3));
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn single_worker_drains_the_queue_and_returns_the_browser() {
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = FakeLauncher::default();
        let pool = BrowserPool::open(&launcher, 1).await.expect("pool opens");
        let queue = Arc::new(WorkQueue::from_links(vec!["http://one.onion".to_string()]));
        let results = Arc::new(CrawlResults::default());

        worker(
            1,
            Arc::clone(&queue),
            Arc::clone(&results),
            Arc::clone(&pool),
            Arc::new(CaptureSettings::new(dir.path())),
        )
        .await;

        assert!(queue.is_empty());
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(results.captured_count(), 1);
        assert_eq!(FakeStats::get(&launcher.stats.navigations), 1);
    }

    #[tokio::test]
    async fn execute_worker_drains_everything_and_returns_every_browser() {
        for (items, pool_size, workers) in [(0, 1, 1), (1, 1, 4), (7, 3, 3), (12, 2, 5), (5, 4, 1)] {
            let dir = tempfile::tempdir().expect("tempdir");
            let launcher = FakeLauncher {
                delay: Duration::from_millis(5),
                ..FakeLauncher::default()
            };
            let queue = Arc::new(WorkQueue::from_links(links(items)));
            let results = Arc::new(CrawlResults::default());

            let report = execute_worker(
                &launcher,
                Arc::clone(&queue),
                Arc::clone(&results),
                Arc::new(CaptureSettings::new(dir.path())),
                workers,
                pool_size,
            )
            .await
            .expect("crawl runs");

            assert!(queue.is_empty());
            assert_eq!(report.idle_after_drain, pool_size);
            assert_eq!(report.terminated, pool_size);
            assert_eq!(FakeStats::get(&launcher.stats.quits), pool_size);
            assert_eq!(results.captured_count() + results.skipped_count(), items);
            assert_eq!(results.captured_count(), items);
            assert_eq!(FakeStats::get(&launcher.stats.double_checkouts), 0);
            assert!(FakeStats::get(&launcher.stats.max_concurrent) <= pool_size);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn browser_scarcity_bounds_concurrency_not_worker_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = FakeLauncher {
            delay: Duration::from_millis(20),
            ..FakeLauncher::default()
        };
        let queue = Arc::new(WorkQueue::from_links(links(10)));
        let results = Arc::new(CrawlResults::default());

        execute_worker(
            &launcher,
            Arc::clone(&queue),
            Arc::clone(&results),
            Arc::new(CaptureSettings::new(dir.path())),
            8,
            2,
        )
        .await
        .expect("crawl runs");

        assert_eq!(results.captured_count(), 10);
        assert!(FakeStats::get(&launcher.stats.max_concurrent) <= 2);
        assert_eq!(FakeStats::get(&launcher.stats.double_checkouts), 0);
    }

    #[tokio::test]
    async fn one_failing_link_does_not_affect_the_others() {
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = FakeLauncher {
            fail_marker: Some("site2".to_string()),
            ..FakeLauncher::default()
        };
        let results = Arc::new(CrawlResults::default());

        execute_worker(
            &launcher,
            Arc::new(WorkQueue::from_links(links(5))),
            Arc::clone(&results),
            Arc::new(CaptureSettings::new(dir.path())),
            2,
            2,
        )
        .await
        .expect("crawl runs");

        let summary = results.snapshot();
        assert_eq!(summary.captured.len(), 4);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].index, 3);
        assert_eq!(summary.skipped[0].url, "http://site2.onion");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_links_to_one_host_are_captured_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = FakeLauncher {
            delay: Duration::from_millis(50),
            ..FakeLauncher::default()
        };
        let results = Arc::new(CrawlResults::default());

        execute_worker(
            &launcher,
            Arc::new(WorkQueue::from_links(vec![
                "http://dup.onion/a".to_string(),
                "http://dup.onion/b".to_string(),
            ])),
            Arc::clone(&results),
            Arc::new(CaptureSettings::new(dir.path())),
            2,
            2,
        )
        .await
        .expect("crawl runs");

        let summary = results.snapshot();
        assert_eq!(summary.captured.len(), 1);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].reason, "already exists");
        assert_eq!(FakeStats::get(&launcher.stats.navigations), 1);
        assert_eq!(FakeStats::get(&launcher.stats.screenshots), 1);
    }

    #[tokio::test]
    async fn empty_pool_skips_every_item() {
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = FakeLauncher::default();
        let queue = Arc::new(WorkQueue::from_links(links(3)));
        let results = Arc::new(CrawlResults::default());

        let report = execute_worker(
            &launcher,
            Arc::clone(&queue),
            Arc::clone(&results),
            Arc::new(CaptureSettings::new(dir.path())),
            3,
            0,
        )
        .await
        .expect("crawl runs");

        assert!(queue.is_empty());
        assert_eq!(report.terminated, 0);
        let summary = results.snapshot();
        assert_eq!(summary.skipped.len(), 3);
        assert!(summary.skipped.iter().all(|s| s.reason == NO_BROWSERS));
    }

    #[tokio::test]
    async fn scraper_truncates_to_the_limit_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = FakeLauncher::default();
        let stats = Arc::clone(&launcher.stats);
        let scraper = Scraper::new(
            FixedLinks(links(6)),
            launcher,
            CaptureSettings::new(dir.path()),
            3,
            2,
        );

        let summary = scraper
            .execute_scraper("http://target.onion", Arc::new(CrawlResults::default()), 2)
            .await
            .expect("crawl runs");

        assert_eq!(summary.total(), 2);
        assert_eq!(FakeStats::get(&stats.navigations), 2);
        let mut urls = summary
            .captured
            .iter()
            .map(|c| (c.index, c.url.clone()))
            .collect::<Vec<_>>();
        urls.sort();
        assert_eq!(
            urls,
            vec![
                (1, "http://site0.onion".to_string()),
                (2, "http://site1.onion".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn second_run_over_the_same_target_is_all_skips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = FakeLauncher::default();
        let stats = Arc::clone(&launcher.stats);
        let scraper = Scraper::new(
            FixedLinks(links(4)),
            launcher,
            CaptureSettings::new(dir.path()),
            2,
            2,
        );

        let first = scraper
            .execute_scraper("http://target.onion", Arc::new(CrawlResults::default()), 10)
            .await
            .expect("first run");
        let second = scraper
            .execute_scraper("http://target.onion", Arc::new(CrawlResults::default()), 10)
            .await
            .expect("second run");

        assert_eq!(first.captured.len(), 4);
        assert!(second.captured.is_empty());
        assert_eq!(second.skipped.len(), 4);
        assert!(second.skipped.iter().all(|s| s.reason == "already exists"));
        assert_eq!(FakeStats::get(&stats.navigations), 4);
    }

    #[tokio::test]
    async fn page_fetch_failure_aborts_before_any_browser_starts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let launcher = FakeLauncher::default();
        let stats = Arc::clone(&launcher.stats);
        let scraper = Scraper::new(Unreachable, launcher, CaptureSettings::new(dir.path()), 3, 3);
        let results = Arc::new(CrawlResults::default());

        let err = scraper
            .execute_scraper("http://target.onion", Arc::clone(&results), 10)
            .await
            .expect_err("fetch fails");

        assert!(matches!(err, Tor2TorError::InvalidTarget(_)));
        assert_eq!(FakeStats::get(&stats.launched), 0);
        assert_eq!(results.snapshot().total(), 0);
    }
}
