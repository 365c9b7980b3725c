use super::{Dispatcher, DroppedArrivalError};
use crate::sample::ErrorTag;
use crate::ticker::Ticker;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn, Instrument};

impl Dispatcher {
    /// Open-model dispatch: iterations start at the ramp's rate whether or not earlier ones have
    /// finished. Arrivals that find no free worker are dropped.
    pub(super) async fn run_arrival_rate(&self, stop: &CancellationToken, started: Instant) {
        let mut ticker = Ticker::new(self.settings.tick).await;
        debug!("Arrival-rate tick {ticker}.");

        let mut tasks = JoinSet::new();
        let total = self.ramp.total_duration();
        let per_unit = self.time_unit.as_secs_f64();

        let mut carry = 0.;
        let mut last_elapsed = Duration::ZERO;
        let mut last_rate = self.ramp.value_at(Duration::ZERO);

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!("Stop signalled; no further arrivals.");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let elapsed = started.elapsed().min(total);
            let rate = self.ramp.value_at(elapsed);
            let dt = elapsed.saturating_sub(last_elapsed).as_secs_f64();

            // Trapezoid over the tick keeps linear ramps exact.
            carry += (last_rate + rate) / 2. / per_unit * dt;
            let due = carry.floor();
            carry -= due;

            let mut dropped = 0;
            for _ in 0..due as u64 {
                if !self.dispatch(&mut tasks) {
                    dropped += 1;
                }
            }
            if dropped > 0 {
                warn!(
                    "{dropped} of {due} arrivals dropped; all {} workers busy.",
                    self.pool.capacity()
                );
            }

            while let Some(res) = tasks.try_join_next() {
                if let Err(err) = res {
                    error!("Worker task of {} failed: {err}", self.name);
                }
            }

            self.publish(
                self.phase_at(elapsed),
                rate,
                self.pool.busy(),
                started.elapsed(),
            );
            trace!("t={elapsed:?} rate={rate:.3} due={due} carry={carry:.3}");

            last_elapsed = elapsed;
            last_rate = rate;
            if elapsed >= total {
                break;
            }
        }

        self.drain(&mut tasks, started).await;
    }

    /// Starts one iteration on a free worker. Returns `false` if the arrival was dropped.
    fn dispatch(&self, tasks: &mut JoinSet<()>) -> bool {
        match self.pool.try_acquire() {
            Ok(slot) => {
                self.worker.note_busy(self.pool.busy());
                let guard = self.worker.arrive();
                let worker = self.worker.clone();
                tasks.spawn(
                    async move {
                        worker.run(guard, slot.id()).await;
                        drop(slot);
                    }
                    .in_current_span(),
                );
                true
            }
            Err(source) => {
                let err = DroppedArrivalError {
                    scenario: self.name.to_string(),
                    source,
                };
                trace!("{err}");
                self.worker.reject(ErrorTag::DroppedArrival);
                false
            }
        }
    }
}
