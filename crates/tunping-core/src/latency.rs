use crate::client::HttpProbe;
use tokio::sync::broadcast;
use tracing::debug;

/// One timed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSample {
    /// Round trip in milliseconds. Any value is valid, however large.
    Delay(u64),
    /// The request failed or timed out
    Timeout(String),
}

/// Reduction of a run of samples
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub delay_sum: u64,
    pub valid_count: u64,
    /// Message of the most recent failed sample. Later successes leave it in place.
    pub last_error: String,
    /// Set when a shutdown signal ended the loop early
    pub cancelled: bool,
}

impl ProbeOutcome {
    pub fn record(&mut self, sample: ProbeSample) {
        match sample {
            ProbeSample::Delay(ms) => {
                self.delay_sum += ms;
                self.valid_count += 1;
            }
            ProbeSample::Timeout(message) => self.last_error = message,
        }
    }

    pub fn has_any_valid(&self) -> bool {
        self.valid_count > 0
    }

    /// Truncating mean over valid samples
    pub fn average(&self) -> Option<u64> {
        self.delay_sum.checked_div(self.valid_count)
    }
}

/// Receives every sample as it is taken
pub trait SampleObserver: Send + Sync {
    fn on_sample(&self, index: u32, sample: &ProbeSample);
}

impl SampleObserver for () {
    fn on_sample(&self, _index: u32, _sample: &ProbeSample) {}
}

/// Issues `times` sequential GETs against `target_url` and folds the results.
#[derive(Debug, Clone)]
pub struct LatencyAggregator {
    pub target_url: String,
    pub times: u32,
}

impl LatencyAggregator {
    pub fn new(target_url: impl Into<String>, times: u32) -> Self {
        Self {
            target_url: target_url.into(),
            times,
        }
    }

    pub async fn run(
        &self,
        probe: &dyn HttpProbe,
        observer: &dyn SampleObserver,
        mut shutdown: Option<broadcast::Receiver<()>>,
    ) -> ProbeOutcome {
        let mut outcome = ProbeOutcome::default();
        for index in 0..self.times {
            let sample = tokio::select! {
                sample = probe.ping(&self.target_url) => sample,
                _ = shutdown_signal(&mut shutdown) => {
                    debug!("latency loop cancelled after {} samples", index);
                    outcome.cancelled = true;
                    break;
                }
            };
            match &sample {
                ProbeSample::Delay(ms) => debug!(index, delay_ms = ms, "sample ok"),
                ProbeSample::Timeout(message) => debug!(index, error = %message, "sample failed"),
            }
            observer.on_sample(index, &sample);
            outcome.record(sample);
        }
        outcome
    }
}

/// Resolves when a shutdown is broadcast; never resolves without a receiver
/// or once every sender is gone.
async fn shutdown_signal(shutdown: &mut Option<broadcast::Receiver<()>>) {
    if let Some(rx) = shutdown {
        if !matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)) {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of samples
    struct Scripted(Mutex<VecDeque<ProbeSample>>);

    impl Scripted {
        fn new(samples: Vec<ProbeSample>) -> Self {
            Self(Mutex::new(samples.into()))
        }
    }

    #[async_trait]
    impl HttpProbe for Scripted {
        async fn ping(&self, _url: &str) -> ProbeSample {
            self.0.lock().unwrap().pop_front().expect("script exhausted")
        }

        async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            unreachable!()
        }
    }

    fn timeout(msg: &str) -> ProbeSample {
        ProbeSample::Timeout(msg.to_string())
    }

    #[tokio::test]
    async fn averages_valid_samples_with_truncation() {
        let probe = Scripted::new(vec![
            ProbeSample::Delay(100),
            timeout("first"),
            ProbeSample::Delay(201),
        ]);
        let outcome = LatencyAggregator::new("http://x", 3)
            .run(&probe, &(), None)
            .await;
        assert_eq!(outcome.delay_sum, 301);
        assert_eq!(outcome.valid_count, 2);
        assert_eq!(outcome.average(), Some(150));
        assert_eq!(outcome.last_error, "first");
    }

    #[tokio::test]
    async fn keeps_stale_error_after_later_success() {
        let probe = Scripted::new(vec![
            timeout("one"),
            timeout("two"),
            ProbeSample::Delay(40),
        ]);
        let outcome = LatencyAggregator::new("http://x", 3)
            .run(&probe, &(), None)
            .await;
        assert_eq!(outcome.last_error, "two");
        assert!(outcome.has_any_valid());
    }

    #[tokio::test]
    async fn all_failures_keep_last_message() {
        let probe = Scripted::new(vec![timeout("a"), timeout("b"), timeout("c")]);
        let outcome = LatencyAggregator::new("http://x", 3)
            .run(&probe, &(), None)
            .await;
        assert!(!outcome.has_any_valid());
        assert_eq!(outcome.average(), None);
        assert_eq!(outcome.last_error, "c");
    }

    #[tokio::test]
    async fn sentinel_sized_delay_is_still_valid() {
        let probe = Scripted::new(vec![ProbeSample::Delay(11000)]);
        let outcome = LatencyAggregator::new("http://x", 1)
            .run(&probe, &(), None)
            .await;
        assert_eq!(outcome.average(), Some(11000));
    }

    #[tokio::test]
    async fn zero_times_takes_no_samples() {
        let probe = Scripted::new(vec![]);
        let outcome = LatencyAggregator::new("http://x", 0)
            .run(&probe, &(), None)
            .await;
        assert_eq!(outcome, ProbeOutcome::default());
    }

    #[tokio::test]
    async fn observer_sees_each_sample_in_order() {
        struct Collect(Mutex<Vec<(u32, ProbeSample)>>);
        impl SampleObserver for Collect {
            fn on_sample(&self, index: u32, sample: &ProbeSample) {
                self.0.lock().unwrap().push((index, sample.clone()));
            }
        }

        let probe = Scripted::new(vec![ProbeSample::Delay(5), timeout("x")]);
        let observer = Collect(Mutex::new(Vec::new()));
        LatencyAggregator::new("http://x", 2)
            .run(&probe, &observer, None)
            .await;
        assert_eq!(
            *observer.0.lock().unwrap(),
            vec![(0, ProbeSample::Delay(5)), (1, timeout("x"))]
        );
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        struct Stuck;
        #[async_trait]
        impl HttpProbe for Stuck {
            async fn ping(&self, _url: &str) -> ProbeSample {
                std::future::pending().await
            }
            async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
                unreachable!()
            }
        }

        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();
        let outcome = LatencyAggregator::new("http://x", 5)
            .run(&Stuck, &(), Some(rx))
            .await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.valid_count, 0);
    }

    #[tokio::test]
    async fn dropped_sender_does_not_cancel() {
        let (tx, rx) = broadcast::channel::<()>(1);
        drop(tx);
        let probe = Scripted::new(vec![ProbeSample::Delay(7), ProbeSample::Delay(9)]);
        let outcome = LatencyAggregator::new("http://x", 2)
            .run(&probe, &(), Some(rx))
            .await;
        assert!(!outcome.cancelled);
        assert_eq!(outcome.average(), Some(8));
    }
}
