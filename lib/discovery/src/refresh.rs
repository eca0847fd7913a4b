use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use metrics::{Attributes, Counter, Histogram, Metric, Registry, exponential_buckets};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tripwire::Tripwire;

use crate::TargetGroup;

/// A discovery mechanism which has to be polled periodically to learn about
/// its targets.
pub trait Refresh: Send {
    type Error: std::fmt::Display + Send;

    /// Returns the complete current state, groups emitted by previous calls
    /// are replaced by this one.
    fn refresh(&mut self) -> impl Future<Output = Result<Vec<TargetGroup>, Self::Error>> + Send;
}

/// Call `refresher` every `interval` and send the groups to `output`.
///
/// The first refresh starts immediately. Refreshes never overlap, ticks which
/// fire while a refresh is in flight are skipped. Failed refreshes are logged
/// and counted, nothing is sent for them.
///
/// Returns when `shutdown` fires, the in flight refresh is dropped and not
/// counted in that case, or when the receiving half of `output` is closed.
pub async fn run<R: Refresh>(
    mut refresher: R,
    interval: Duration,
    metrics: &RefreshMetrics,
    mut shutdown: Tripwire,
    output: mpsc::Sender<Vec<TargetGroup>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let start = Instant::now();
        let result = tokio::select! {
            biased;

            _ = &mut shutdown => {
                debug!(
                    message = "refresh cancelled",
                    mechanism = metrics.mechanism(),
                    config = metrics.config(),
                );
                break;
            }
            result = refresher.refresh() => result,
        };
        metrics.observe_duration(start.elapsed());

        match result {
            Ok(groups) => {
                tokio::select! {
                    biased;

                    _ = &mut shutdown => break,
                    result = output.send(groups) => {
                        if result.is_err() {
                            debug!(
                                message = "target group receiver is closed",
                                mechanism = metrics.mechanism(),
                                config = metrics.config(),
                            );
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                metrics.inc_failures();

                warn!(
                    message = "refresh targets failed",
                    mechanism = metrics.mechanism(),
                    config = metrics.config(),
                    %err,
                );
            }
        }
    }
}

const FAILURES_NAME: &str = "sd_refresh_failures_total";
const DURATION_NAME: &str = "sd_refresh_duration_seconds";

/// The instruments of one discoverer instance, identified by the `mechanism`
/// and `config` attributes.
///
/// Series are created by [`RefreshMetrics::register`] and removed by
/// [`RefreshMetrics::unregister`] or on drop, so discoverers can be created
/// and torn down repeatedly, e.g. on reload, without leaking series.
pub struct RefreshMetrics {
    attributes: Attributes,

    failures: Metric<Counter>,
    duration: Metric<Histogram>,

    recorders: Option<(Counter, Histogram)>,
}

impl RefreshMetrics {
    pub fn new(registry: &Registry, mechanism: &'static str, config: impl Into<String>) -> Self {
        let failures = registry.register_counter(
            FAILURES_NAME,
            "Number of failed refreshes of a service discovery mechanism",
        );
        let duration = registry.register_histogram(
            DURATION_NAME,
            "Duration of refreshes of a service discovery mechanism",
            exponential_buckets(0.01, 2.0, 14),
        );

        RefreshMetrics {
            attributes: Attributes::from([
                ("mechanism", Cow::Borrowed(mechanism)),
                ("config", Cow::Owned(config.into())),
            ]),
            failures,
            duration,
            recorders: None,
        }
    }

    pub fn mechanism(&self) -> &str {
        self.attributes.get("mechanism").unwrap_or_default()
    }

    pub fn config(&self) -> &str {
        self.attributes.get("config").unwrap_or_default()
    }

    pub fn is_registered(&self) -> bool {
        self.recorders.is_some()
    }

    /// Create the series of this instance. Nothing is left behind if any of
    /// them fails, e.g. because another instance with the same attributes is
    /// registered already.
    pub fn register(&mut self) -> Result<(), metrics::Error> {
        if self.recorders.is_some() {
            return Ok(());
        }

        let failures = self.failures.register(self.attributes.clone())?;
        let duration = match self.duration.register(self.attributes.clone()) {
            Ok(duration) => duration,
            Err(err) => {
                self.failures.unregister(self.attributes.clone());
                return Err(err);
            }
        };

        self.recorders = Some((failures, duration));

        Ok(())
    }

    /// Remove the series of this instance. Series owned by other instances
    /// are never touched, so this is safe after a failed `register` and
    /// calling it twice is fine too.
    pub fn unregister(&mut self) {
        if self.recorders.take().is_some() {
            self.failures.unregister(self.attributes.clone());
            self.duration.unregister(self.attributes.clone());
        }
    }

    fn inc_failures(&self) {
        if let Some((failures, _)) = &self.recorders {
            failures.inc(1);
        }
    }

    fn observe_duration(&self, elapsed: Duration) {
        if let Some((_, duration)) = &self.recorders {
            duration.record(elapsed.as_secs_f64());
        }
    }
}

impl Drop for RefreshMetrics {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    fn attrs(config: &'static str) -> Attributes {
        Attributes::from(&[("config", config), ("mechanism", "test")])
    }

    fn failures(registry: &Registry, config: &'static str) -> Option<u64> {
        let metric = registry.register_counter(FAILURES_NAME, "");
        metric
            .contains(attrs(config))
            .then(|| metric.recorder(attrs(config)).fetch())
    }

    fn refreshes(registry: &Registry, config: &'static str) -> Option<u64> {
        let metric = registry.register_histogram(DURATION_NAME, "", std::iter::empty());
        metric
            .contains(attrs(config))
            .then(|| metric.recorder(attrs(config)).count())
    }

    fn registered(registry: &Registry, config: &'static str) -> RefreshMetrics {
        let mut metrics = RefreshMetrics::new(registry, "test", config);
        metrics.register().unwrap();
        metrics
    }

    fn group(source: &str) -> Vec<TargetGroup> {
        vec![TargetGroup::new(source)]
    }

    /// Replays a script of results, the n-th refresh takes the n-th delay.
    /// Start times of refreshes are recorded.
    struct Scripted {
        script: VecDeque<Result<Vec<TargetGroup>, String>>,
        delays: VecDeque<Duration>,
        started: Arc<Mutex<Vec<Instant>>>,
    }

    impl Scripted {
        fn new(script: impl IntoIterator<Item = Result<Vec<TargetGroup>, String>>) -> Self {
            Scripted {
                script: script.into_iter().collect(),
                delays: VecDeque::new(),
                started: Arc::new(Mutex::new(vec![])),
            }
        }
    }

    impl Refresh for Scripted {
        type Error = String;

        async fn refresh(&mut self) -> Result<Vec<TargetGroup>, String> {
            self.started.lock().push(Instant::now());

            if let Some(delay) = self.delays.pop_front() {
                tokio::time::sleep(delay).await;
            }

            self.script
                .pop_front()
                .unwrap_or_else(|| Ok(group("steady")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted() {
        let registry = Registry::new();
        let metrics = registered(&registry, "failing");
        let refresher = Scripted::new([
            Err("connection refused".to_string()),
            Err("unexpected status code 500".to_string()),
            Ok(group("recovered")),
        ]);

        let (trigger, shutdown) = Tripwire::new();
        let (tx, mut rx) = mpsc::channel(4);

        let handle = tokio::spawn(async move {
            run(refresher, Duration::from_secs(10), &metrics, shutdown, tx).await;
            metrics
        });

        // failed refreshes emit nothing
        assert_eq!(rx.recv().await.unwrap(), group("recovered"));
        assert_eq!(failures(&registry, "failing"), Some(2));
        assert_eq!(refreshes(&registry, "failing"), Some(3));

        trigger.cancel();
        let metrics = handle.await.unwrap();
        assert!(metrics.is_registered());
        drop(metrics);

        assert_eq!(failures(&registry, "failing"), None);
        assert_eq!(refreshes(&registry, "failing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_refresh_skips_ticks() {
        let registry = Registry::new();
        let metrics = registered(&registry, "slow");
        let mut refresher = Scripted::new([]);
        refresher.delays.push_back(Duration::from_secs(25));
        let started = Arc::clone(&refresher.started);

        let (trigger, shutdown) = Tripwire::new();
        let (tx, mut rx) = mpsc::channel(8);

        let handle = tokio::spawn(async move {
            run(refresher, Duration::from_secs(10), &metrics, shutdown, tx).await;
        });

        for _ in 0..4 {
            assert_eq!(rx.recv().await.unwrap(), group("steady"));
        }
        trigger.cancel();
        handle.await.unwrap();

        // ticks at 10s and 20s fire while the first refresh is running, only
        // one of them is delivered and the schedule resumes at 30s
        let started = started.lock();
        let offsets = started[..4]
            .iter()
            .map(|at| at.duration_since(started[0]).as_secs())
            .collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 25, 30, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_refresh() {
        let registry = Registry::new();
        let metrics = registered(&registry, "cancelled");
        let mut refresher = Scripted::new([Err("never returned".to_string())]);
        refresher.delays.push_back(Duration::from_secs(3600));
        let started = Arc::clone(&refresher.started);

        let (trigger, shutdown) = Tripwire::new();
        let (tx, mut rx) = mpsc::channel(4);

        let handle = tokio::spawn(async move {
            run(refresher, Duration::from_secs(10), &metrics, shutdown, tx).await;
            metrics
        });

        while started.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        trigger.cancel();
        let _metrics = handle.await.unwrap();

        assert_eq!(failures(&registry, "cancelled"), Some(0));
        assert_eq!(refreshes(&registry, "cancelled"), Some(0));
        // the sender is dropped with the loop
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_receiver_stops() {
        let registry = Registry::new();
        let metrics = registered(&registry, "closed");
        let refresher = Scripted::new([]);
        let started = Arc::clone(&refresher.started);

        let (_trigger, shutdown) = Tripwire::new();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        run(refresher, Duration::from_secs(10), &metrics, shutdown, tx).await;

        assert_eq!(started.lock().len(), 1);
        // the refresher is dropped on return
        assert_eq!(Arc::strong_count(&started), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = Registry::new();
        let mut metrics = RefreshMetrics::new(&registry, "test", "idempotent");

        // never registered
        metrics.unregister();

        metrics.register().unwrap();
        metrics.register().unwrap();
        assert_eq!(failures(&registry, "idempotent"), Some(0));

        metrics.unregister();
        metrics.unregister();
        assert_eq!(failures(&registry, "idempotent"), None);
        assert_eq!(refreshes(&registry, "idempotent"), None);

        // registering again after unregister works
        metrics.register().unwrap();
        assert_eq!(refreshes(&registry, "idempotent"), Some(0));
    }

    #[test]
    fn duplicate_instance() {
        let registry = Registry::new();
        let first = registered(&registry, "dup");

        let mut second = RefreshMetrics::new(&registry, "test", "dup");
        assert!(second.register().is_err());
        assert!(!second.is_registered());

        // the failed instance must not remove series it does not own
        second.unregister();
        drop(second);
        assert_eq!(failures(&registry, "dup"), Some(0));
        assert!(first.is_registered());

        // other configs are unaffected
        let _other = registered(&registry, "other");
    }

    #[test]
    fn partial_register_rolls_back() {
        let registry = Registry::new();
        registry
            .register_histogram(DURATION_NAME, "", std::iter::empty())
            .register(attrs("partial"))
            .unwrap();

        let mut metrics = RefreshMetrics::new(&registry, "test", "partial");
        let err = metrics.register().unwrap_err();
        assert!(matches!(
            err,
            metrics::Error::AlreadyRegistered {
                name: DURATION_NAME,
                ..
            }
        ));

        // the counter registered before the failure is gone again
        assert_eq!(failures(&registry, "partial"), None);
        assert_eq!(refreshes(&registry, "partial"), Some(0));
    }
}
