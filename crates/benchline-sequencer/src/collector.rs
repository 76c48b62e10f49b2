//! Sample collection for one phase.
//!
//! [`collect`] turns a [`PhaseSpec`] and an [`Instrument`] into a finite
//! stream of [`Sample`]s, yielded as they are read. The stream ends when the
//! phase duration has elapsed, when the cancellation token fires, or right
//! after yielding the first error.
//!
//! Two acquisition methods:
//!
//! - **Poll**: read at `0, I, 2I, …` measured from the phase start. Each
//!   deadline is computed from the previous deadline, not from the end of
//!   the previous read, so slow reads do not shift the schedule. Ticks that
//!   were missed entirely are skipped.
//! - **Event sync**: arm the data-update event once, then repeat
//!   wait-for-update, read, clear-register until the duration is reached.
//!   The loop may leave mid-iteration once the duration has passed.
//!
//! Cancellation is checked between exchanges, never during one.

use benchline_core::{CollectionMethod, PhaseSpec, Sample};
use benchline_hardware::{ConnError, Instrument};
use futures::Stream;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Item type of the sample stream.
pub type SampleResult = Result<Sample, ConnError>;

/// Floor for the polling interval. Specs that skipped validation still
/// advance the schedule.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct Collector<'a, I> {
    spec: &'a PhaseSpec,
    instrument: &'a mut I,
    cancel: &'a CancellationToken,
    started: Instant,
    deadline: Instant,
    next_tick: Instant,
    interval: Duration,
    armed: bool,
    finished: bool,
}

impl<I: Instrument> Collector<'_, I> {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn expired(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    async fn next_sample(&mut self) -> Option<SampleResult> {
        if self.finished {
            return None;
        }
        let item = match self.spec.method {
            CollectionMethod::Poll => self.poll_step().await,
            CollectionMethod::EventSync => self.event_step().await,
        };
        match &item {
            None => {
                debug!(
                    "Phase {} collection finished after {:.3}s",
                    self.spec.name,
                    self.elapsed().as_secs_f64()
                );
                self.finished = true;
            }
            Some(Err(_)) => self.finished = true,
            Some(Ok(_)) => {}
        }
        item
    }

    async fn poll_step(&mut self) -> Option<SampleResult> {
        if self.next_tick >= self.deadline || self.cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            _ = self.cancel.cancelled() => return None,
            _ = sleep_until(self.next_tick) => {}
        }

        let at = self.elapsed();
        let value = match self.instrument.read_value().await {
            Ok(value) => value,
            Err(e) => return Some(Err(e)),
        };

        self.next_tick += self.interval;
        let now = Instant::now();
        while self.next_tick <= now {
            trace!("Phase {}: skipping missed tick", self.spec.name);
            self.next_tick += self.interval;
        }

        Some(Ok(Sample::new(at.as_secs_f64(), value)))
    }

    async fn event_step(&mut self) -> Option<SampleResult> {
        if self.expired() {
            return None;
        }

        if !self.armed {
            if let Err(e) = self.instrument.arm_data_ready().await {
                return Some(Err(e));
            }
            self.armed = true;
            if self.expired() {
                return None;
            }
        }

        match self.instrument.wait_data_ready().await {
            Ok(true) => {}
            Ok(false) => trace!("Phase {}: data update came late", self.spec.name),
            Err(e) => return Some(Err(e)),
        }
        if self.expired() {
            return None;
        }

        let at = self.elapsed();
        let value = match self.instrument.read_value().await {
            Ok(value) => value,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = self.instrument.clear_event_register().await {
            return Some(Err(e));
        }

        Some(Ok(Sample::new(at.as_secs_f64(), value)))
    }
}

/// Stream the samples of one phase.
///
/// The phase clock starts when this function is called. Elapsed times are
/// non-decreasing and every sample is taken before the duration elapses.
pub fn collect<'a, I: Instrument>(
    spec: &'a PhaseSpec,
    instrument: &'a mut I,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = SampleResult> + 'a {
    let started = Instant::now();
    let collector = Collector {
        spec,
        instrument,
        cancel,
        started,
        deadline: started + spec.duration,
        next_tick: started,
        interval: spec.interval.max(MIN_POLL_INTERVAL),
        armed: false,
        finished: false,
    };

    futures::stream::unfold(collector, |mut collector| async move {
        collector
            .next_sample()
            .await
            .map(|sample| (sample, collector))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchline_core::{DeviceId, Element};
    use benchline_hardware::DriverError;
    use benchline_protocol::Identity;
    use futures::StreamExt;
    use std::collections::VecDeque;

    /// Scripted instrument whose exchanges take simulated time.
    #[derive(Default)]
    struct FakeInstrument {
        values: VecDeque<Option<f64>>,
        read_latency: Duration,
        update_every: Duration,
        calls: Vec<&'static str>,
        fail_read_at: Option<usize>,
        reads: usize,
    }

    impl FakeInstrument {
        fn with_values(values: impl IntoIterator<Item = Option<f64>>) -> Self {
            Self {
                values: values.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl Instrument for FakeInstrument {
        async fn configure(&mut self, _element: Element) -> benchline_hardware::Result<()> {
            self.calls.push("configure");
            Ok(())
        }

        async fn read_value(&mut self) -> benchline_hardware::Result<Option<f64>> {
            self.calls.push("read");
            self.reads += 1;
            tokio::time::sleep(self.read_latency).await;
            if self.fail_read_at == Some(self.reads) {
                return Err(ConnError::driver(
                    &DeviceId::new("fake").unwrap(),
                    DriverError::protocol(":NUMERIC:NORMAL:VALUE?", "no response"),
                ));
            }
            Ok(self.values.pop_front().unwrap_or(Some(0.5)))
        }

        async fn arm_data_ready(&mut self) -> benchline_hardware::Result<()> {
            self.calls.push("arm");
            Ok(())
        }

        async fn wait_data_ready(&mut self) -> benchline_hardware::Result<bool> {
            self.calls.push("wait");
            tokio::time::sleep(self.update_every).await;
            Ok(true)
        }

        async fn clear_event_register(&mut self) -> benchline_hardware::Result<u32> {
            self.calls.push("clear");
            Ok(1)
        }

        async fn identify(&mut self) -> benchline_hardware::Result<Identity> {
            Identity::parse("FAKE,PA,0,1").map_err(|e| {
                ConnError::driver(&DeviceId::new("fake").unwrap(), DriverError::parse("*IDN?", e))
            })
        }
    }

    fn poll_spec(duration_ms: u64, interval_ms: u64) -> PhaseSpec {
        PhaseSpec::new("P1", Duration::from_millis(duration_ms), 0.0, 10.0)
            .with_interval(Duration::from_millis(interval_ms))
    }

    async fn run(spec: &PhaseSpec, instrument: &mut FakeInstrument) -> Vec<SampleResult> {
        let cancel = CancellationToken::new();
        collect(spec, instrument, &cancel).collect().await
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_sample_count_and_order() {
        let spec = poll_spec(1000, 250);
        let mut instrument = FakeInstrument::default();
        let samples: Vec<Sample> = run(&spec, &mut instrument)
            .await
            .into_iter()
            .map(|s| s.unwrap())
            .collect();

        assert_eq!(samples.len(), 4);
        let elapsed: Vec<f64> = samples.iter().map(|s| s.elapsed_seconds).collect();
        assert!(elapsed.windows(2).all(|w| w[0] <= w[1]));
        assert!(elapsed.iter().all(|&t| t <= 1.25));
        assert!((elapsed[3] - 0.75).abs() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_zero_interval_still_terminates() {
        let spec = poll_spec(5, 0);
        let mut instrument = FakeInstrument {
            read_latency: Duration::from_micros(300),
            ..FakeInstrument::default()
        };
        let samples = run(&spec, &mut instrument).await;

        assert_eq!(samples.len(), 5);
        assert!(samples.iter().all(|s| s.is_ok()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_does_not_drift_with_slow_reads() {
        let spec = poll_spec(1000, 100);
        let mut instrument = FakeInstrument {
            read_latency: Duration::from_millis(40),
            ..FakeInstrument::default()
        };
        let samples: Vec<Sample> = run(&spec, &mut instrument)
            .await
            .into_iter()
            .map(|s| s.unwrap())
            .collect();

        assert_eq!(samples.len(), 10);
        // Reads start on the grid even though each takes 40 ms
        assert!((samples[9].elapsed_seconds - 0.9).abs() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_skips_missed_ticks() {
        let spec = poll_spec(1000, 100);
        let mut instrument = FakeInstrument {
            read_latency: Duration::from_millis(250),
            ..FakeInstrument::default()
        };
        let samples: Vec<Sample> = run(&spec, &mut instrument)
            .await
            .into_iter()
            .map(|s| s.unwrap())
            .collect();

        let elapsed: Vec<f64> = samples.iter().map(|s| s.elapsed_seconds).collect();
        assert_eq!(elapsed.len(), 4);
        assert!((elapsed[1] - 0.3).abs() < 1e-3);
        assert!(elapsed.iter().all(|&t| t < 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_keeps_missing_values() {
        let spec = poll_spec(300, 100);
        let mut instrument = FakeInstrument::with_values([Some(0.1), None, Some(1.5)]);
        let values: Vec<Option<f64>> = run(&spec, &mut instrument)
            .await
            .into_iter()
            .map(|s| s.unwrap().value)
            .collect();
        assert_eq!(values, vec![Some(0.1), None, Some(1.5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_ends_stream() {
        let spec = poll_spec(1000, 100);
        let mut instrument = FakeInstrument {
            fail_read_at: Some(3),
            ..FakeInstrument::default()
        };
        let items = run(&spec, &mut instrument).await;
        assert_eq!(items.len(), 3);
        assert!(items[2].is_err());
        assert_eq!(instrument.reads, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_sync_call_order() {
        let spec = poll_spec(1000, 100).with_method(CollectionMethod::EventSync);
        let mut instrument = FakeInstrument {
            update_every: Duration::from_millis(300),
            ..FakeInstrument::default()
        };
        let samples = run(&spec, &mut instrument).await;

        // Updates at 300, 600, 900 ms; the wait ending at 1200 ms is past the duration
        assert_eq!(samples.len(), 3);
        assert_eq!(
            &instrument.calls[..4],
            &["arm", "wait", "read", "clear"]
        );
        assert_eq!(instrument.calls.last(), Some(&"wait"));
        assert_eq!(instrument.calls.iter().filter(|c| **c == "arm").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_collection() {
        let spec = poll_spec(10_000, 100);
        let mut instrument = FakeInstrument::default();
        let cancel = CancellationToken::new();

        let mut stream = Box::pin(collect(&spec, &mut instrument, &cancel));
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_some());
        cancel.cancel();
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let spec = poll_spec(1000, 100).with_method(CollectionMethod::EventSync);
        let mut instrument = FakeInstrument::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let samples: Vec<SampleResult> = collect(&spec, &mut instrument, &cancel).collect().await;
        assert!(samples.is_empty());
        assert!(instrument.calls.is_empty());
    }
}
