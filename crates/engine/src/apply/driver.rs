// Reconcile driver: boot retries, then throttled passes driven by the
// mutation feed, plus debounced saves, until shutdown.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::throttle::ReconcileThrottle;
use crate::config::EngineConfig;
use crate::session::Session;
use crate::store::KeyValueStore;
use crate::tree::{Document, MutationRecord};

/// A document and the session reconciling it, shared between the driver
/// and whoever feeds it edits.
pub struct Page<S: KeyValueStore> {
    pub doc: Document,
    pub session: Session<S>,
}

impl<S: KeyValueStore> Page<S> {
    pub fn new(doc: Document, session: Session<S>) -> Self {
        Self { doc, session }
    }
}

/// Re-applies right after activation, for content that renders late.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootPlan {
    pub retry_count: u32,
    pub retry_interval: Duration,
}

impl Default for BootPlan {
    fn default() -> Self {
        Self { retry_count: 5, retry_interval: Duration::from_millis(200) }
    }
}

impl BootPlan {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self { retry_count: config.boot.retry_count, retry_interval: config.boot_retry_interval() }
    }

    /// Retry instants after an immediate pass at `start`.
    pub fn retries_after(&self, start: Instant) -> VecDeque<Instant> {
        (1..=self.retry_count).map(|n| start + self.retry_interval * n).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverReport {
    /// Boot passes, the immediate one included.
    pub boot_passes: usize,
    /// Throttled passes triggered by mutations.
    pub passes: usize,
    /// Due passes pushed back because the page was busy.
    pub deferred: usize,
    /// Patches applied across all passes.
    pub applied: usize,
    pub batches: usize,
    pub ignored_batches: usize,
    pub saves: usize,
}

/// Run until `shutdown` fires (or its sender is dropped). The boot retry
/// sequence always runs to completion first: mutation-driven passes wait for
/// it, and a shutdown requested during boot is honored after the last retry.
///
/// The host forwards `Document::take_mutations` batches on `mutations`.
/// Session changes that leave the tree alone (a patch deletion, say) should
/// be followed by an empty batch so the driver picks up the new save deadline.
pub async fn run_reconciler<S: KeyValueStore>(
    page: Arc<Mutex<Page<S>>>,
    mut mutations: mpsc::Receiver<Vec<MutationRecord>>,
    mut shutdown: broadcast::Receiver<()>,
) -> DriverReport {
    let mut report = DriverReport::default();
    let (mut throttle, mut boot_queue) = {
        let mut guard = page.lock().await;
        let config = guard.session.config();
        let throttle = ReconcileThrottle::new(config.reconcile_interval());
        let plan = BootPlan::from_config(config);

        let start = Instant::now();
        let queue = if guard.session.patches().is_empty() {
            VecDeque::new()
        } else {
            boot_pass(&mut guard, &mut report);
            plan.retries_after(start)
        };
        (throttle, queue)
    };
    let mut mutations_open = true;
    let mut persist_deadline = None;
    // Relevant batches seen while boot retries are still queued.
    let mut boot_dirty = false;
    let mut stopping = false;
    info!(boot_retries = boot_queue.len(), "reconciler started");

    loop {
        // Keep the last known deadline while someone else holds the page.
        if let Ok(guard) = page.try_lock() {
            persist_deadline = guard.session.persist_deadline();
        }
        let booting = !boot_queue.is_empty();

        tokio::select! {
            biased;

            _ = shutdown.recv(), if !stopping => {
                if booting {
                    info!(remaining = boot_queue.len(), "shutdown requested; finishing boot retries");
                    stopping = true;
                } else {
                    info!("reconciler shutting down");
                    break;
                }
            }

            batch = mutations.recv(), if mutations_open => match batch {
                Some(batch) => {
                    report.batches += 1;
                    // A busy page is assumed to have changed.
                    let relevant = match page.try_lock() {
                        Ok(guard) => guard.session.on_mutations(&guard.doc, &batch),
                        Err(_) => !batch.is_empty(),
                    };
                    if !relevant {
                        report.ignored_batches += 1;
                    } else if booting {
                        boot_dirty = true;
                    } else {
                        throttle.notify_at(Instant::now());
                    }
                }
                None => {
                    debug!("mutation feed closed");
                    mutations_open = false;
                }
            },

            _ = sleep_until_opt(throttle.deadline()), if !booting => {
                let now = Instant::now();
                if throttle.take_due_at(now) {
                    match page.try_lock() {
                        Ok(mut guard) => {
                            let current = &mut *guard;
                            let summary = current.session.apply_all(&mut current.doc);
                            throttle.mark_ran_at(now);
                            report.passes += 1;
                            report.applied += summary.applied;
                        }
                        Err(_) => {
                            debug!("page busy; reconciliation deferred");
                            throttle.defer_at(now);
                            report.deferred += 1;
                        }
                    }
                }
            }

            _ = sleep_until_opt(persist_deadline) => {
                let mut guard = page.lock().await;
                match guard.session.poll_persistence(Instant::now()) {
                    Ok(true) => report.saves += 1,
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "scheduled save failed"),
                }
            }

            _ = sleep_until_opt(boot_queue.front().copied()) => {
                boot_queue.pop_front();
                {
                    let mut guard = page.lock().await;
                    boot_pass(&mut guard, &mut report);
                }
                if boot_queue.is_empty() {
                    if stopping {
                        info!("boot retries finished; reconciler shutting down");
                        break;
                    }
                    if std::mem::take(&mut boot_dirty) {
                        throttle.notify_at(Instant::now());
                    }
                    debug!("boot retries finished; mutation-driven reconciliation takes over");
                }
            }
        }
    }

    let mut guard = page.lock().await;
    match guard.session.flush_persistence() {
        Ok(true) => report.saves += 1,
        Ok(false) => {}
        Err(e) => warn!(error = %e, "final save failed"),
    }
    info!(
        boot_passes = report.boot_passes,
        passes = report.passes,
        saves = report.saves,
        "reconciler stopped"
    );
    report
}

fn boot_pass<S: KeyValueStore>(page: &mut Page<S>, report: &mut DriverReport) {
    let summary = page.session.apply_all(&mut page.doc);
    report.boot_passes += 1;
    report.applied += summary.applied;
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use pagepatch_common::locator::Locator;
    use pagepatch_common::scope::PageScope;
    use pagepatch_common::types::{Patch, PatchKind, ScopeGranularity};

    use super::*;
    use crate::store::{MemoryKv, PatchStore};
    use crate::tree::query::TreeQuery;
    use crate::tree::NodeId;

    const ADDRESS: &str = "https://shop.test/item";

    fn find(doc: &Document, selector: &str) -> NodeId {
        TreeQuery::new(doc).deep_query_first(doc.root(), selector).unwrap().unwrap()
    }

    fn seeded_kv(patches: Vec<Patch>) -> MemoryKv {
        let mut kv = MemoryKv::new();
        let scope = PageScope::from_address(ADDRESS, ScopeGranularity::Full).unwrap();
        let mut store = PatchStore::new(scope);
        store.replace_all(patches);
        store.persist(&mut kv).unwrap();
        kv
    }

    fn page(markup: &str, kv: MemoryKv) -> Arc<Mutex<Page<MemoryKv>>> {
        let session = Session::activate(kv, EngineConfig::default(), ADDRESS, None).unwrap();
        Arc::new(Mutex::new(Page::new(Document::parse(markup), session)))
    }

    #[test]
    fn boot_plan_spaces_retries() {
        let plan = BootPlan::default();
        let start = Instant::now();
        let retries = plan.retries_after(start);
        assert_eq!(retries.len(), 5);
        assert_eq!(retries[0], start + Duration::from_millis(200));
        assert_eq!(retries[4], start + Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn boot_applies_and_reconciles_rerenders() {
        let kv = seeded_kv(vec![Patch::new(Locator::css("#price"), PatchKind::SetText, "$12")]);
        let page = page("<main id=app><span id=price>$10</span></main>", kv);
        let (tx, rx) = mpsc::channel(16);
        let (stop, stop_rx) = broadcast::channel(1);
        let driver = tokio::spawn(run_reconciler(page.clone(), rx, stop_rx));

        tokio::time::sleep(Duration::from_millis(1)).await;
        {
            let guard = page.lock().await;
            assert_eq!(guard.doc.text_content(find(&guard.doc, "#price")), "$12");
        }

        // The app re-renders and wipes the edit.
        let batch = {
            let mut guard = page.lock().await;
            let app = find(&guard.doc, "#app");
            guard.doc.set_inner_html(app, "<span id=price>$10</span>").unwrap();
            guard.doc.take_mutations()
        };
        tx.send(batch).await.unwrap();
        // Still booting: no throttled pass yet, the next boot retry restores it.
        tokio::time::sleep(Duration::from_millis(150)).await;
        {
            let guard = page.lock().await;
            assert_eq!(guard.doc.text_content(find(&guard.doc, "#price")), "$10");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            let guard = page.lock().await;
            assert_eq!(guard.doc.text_content(find(&guard.doc, "#price")), "$12");
        }

        tokio::time::sleep(Duration::from_millis(1000)).await;
        stop.send(()).unwrap();
        let report = driver.await.unwrap();
        assert_eq!(report.boot_passes, 6);
        // The batch seen during boot is replayed once the retries finish.
        assert_eq!(report.passes, 1);
        assert_eq!(report.applied, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_boot_waits_for_the_retries() {
        let kv = seeded_kv(vec![Patch::new(Locator::css("#t"), PatchKind::Hide, "")]);
        let page = page("<p id=t>x</p>", kv);
        let (tx, rx) = mpsc::channel(16);
        let (stop, stop_rx) = broadcast::channel(1);
        let started = Instant::now();
        let driver = tokio::spawn(run_reconciler(page.clone(), rx, stop_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let target = find(&page.lock().await.doc, "#t");
        tx.send(vec![MutationRecord { target }]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.send(()).unwrap();

        let report = driver.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert_eq!(report.boot_passes, 6);
        assert_eq!(report.batches, 1);
        assert_eq!(report.passes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_scope_skips_boot_and_ignores_mutations() {
        let page = page("<p id=t>x</p>", MemoryKv::new());
        let (tx, rx) = mpsc::channel(16);
        let (stop, stop_rx) = broadcast::channel(1);
        let driver = tokio::spawn(run_reconciler(page.clone(), rx, stop_rx));

        let target = find(&page.lock().await.doc, "#t");
        tx.send(vec![MutationRecord { target }]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        stop.send(()).unwrap();

        let report = driver.await.unwrap();
        assert_eq!(report.boot_passes, 0);
        assert_eq!(report.batches, 1);
        assert_eq!(report.ignored_batches, 1);
        assert_eq!(report.passes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_page_defers_instead_of_overlapping() {
        let kv = seeded_kv(vec![Patch::new(Locator::css("#t"), PatchKind::Hide, "")]);
        let page = page("<p id=t>x</p>", kv);
        let (tx, rx) = mpsc::channel(16);
        let (stop, stop_rx) = broadcast::channel(1);
        let driver = tokio::spawn(run_reconciler(page.clone(), rx, stop_rx));
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let guard = page.lock().await;
        let target = find(&guard.doc, "#t");
        tx.send(vec![MutationRecord { target }]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.send(()).unwrap();
        let report = driver.await.unwrap();
        assert!(report.deferred >= 1);
        assert_eq!(report.passes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_are_saved_after_the_quiet_window_and_on_shutdown() {
        let page = page("<h1 id=title>Old</h1>", MemoryKv::new());
        let (tx, rx) = mpsc::channel(16);
        let (stop, stop_rx) = broadcast::channel(1);
        let driver = tokio::spawn(run_reconciler(page.clone(), rx, stop_rx));

        let batch = {
            let mut guard = page.lock().await;
            let page = &mut *guard;
            let title = find(&page.doc, "#title");
            page.session
                .commit_edit(&mut page.doc, &[title], &crate::session::EditCommand::set_text("New"))
                .unwrap();
            page.doc.take_mutations()
        };
        tx.send(batch).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(page.lock().await.session.kv().writes(), 1);

        {
            let mut guard = page.lock().await;
            let page = &mut *guard;
            let title = find(&page.doc, "#title");
            page.session
                .commit_edit(&mut page.doc, &[title], &crate::session::EditCommand::set_text("Newer"))
                .unwrap();
        }
        tx.send(Vec::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.send(()).unwrap();
        let report = driver.await.unwrap();
        assert_eq!(report.saves, 2);
        assert_eq!(page.lock().await.session.kv().writes(), 2);
    }
}
