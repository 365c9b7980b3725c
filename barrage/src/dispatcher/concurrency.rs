use super::Dispatcher;
use crate::sample::ErrorTag;
use crate::ticker::Ticker;
use std::collections::VecDeque;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn, Instrument};

/// Handle on one looping worker.
struct Looper {
    /// Cancelled when the looper exits, or to stop it after its current iteration.
    token: CancellationToken,
    /// `true` asks the looper to leave after its current iteration. Clearing it again before
    /// then keeps the looper, and its pool slot, in service.
    retire: watch::Sender<bool>,
}

impl Looper {
    fn running(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Dispatcher {
    /// Closed-model dispatch: a number of looping workers tracks the ramp, each running the exec
    /// function back to back with `pause` in between.
    pub(super) async fn run_fixed_concurrency(&self, stop: &CancellationToken, started: Instant) {
        let mut ticker = Ticker::new(self.settings.tick).await;
        let mut tasks = JoinSet::new();
        // Oldest first.
        let mut active: VecDeque<Looper> = VecDeque::new();
        // Asked to leave but possibly still mid-iteration.
        let mut retiring: VecDeque<Looper> = VecDeque::new();
        let total = self.ramp.total_duration();

        loop {
            let elapsed = started.elapsed().min(total);
            let target = self.ramp.value_at(elapsed);
            let wanted = (target + 1e-9).floor() as usize;

            active.retain(Looper::running);
            retiring.retain(Looper::running);
            if active.len() != wanted {
                debug!("Adjusting workers {} -> {wanted}.", active.len());
            }

            while active.len() < wanted {
                // Loopers still finishing an iteration hold their slots; take them back first.
                if let Some(looper) = retiring.pop_back() {
                    looper.retire.send_replace(false);
                    if looper.running() {
                        trace!("Revived a retiring worker.");
                        active.push_back(looper);
                    }
                    continue;
                }
                active.push_back(self.spawn_looper(&mut tasks, stop));
            }
            while active.len() > wanted {
                if let Some(looper) = active.pop_front() {
                    looper.retire.send_replace(true);
                    retiring.push_back(looper);
                }
            }

            while let Some(res) = tasks.try_join_next() {
                if let Err(err) = res {
                    error!("Worker task of {} failed: {err}", self.name);
                }
            }

            self.publish(
                self.phase_at(elapsed),
                target,
                active.len(),
                started.elapsed(),
            );

            if elapsed >= total {
                break;
            }

            tokio::select! {
                _ = stop.cancelled() => {
                    debug!("Stop signalled; stopping workers.");
                    break;
                }
                _ = ticker.tick() => {}
            }
        }

        for looper in active.drain(..).chain(retiring.drain(..)) {
            looper.token.cancel();
        }
        self.drain(&mut tasks, started).await;
    }

    fn spawn_looper(&self, tasks: &mut JoinSet<()>, stop: &CancellationToken) -> Looper {
        let token = stop.child_token();
        // Marks the looper as gone however it exits.
        let exited = token.clone().drop_guard();
        let looper_stop = token.clone();
        let (retire, mut retired) = watch::channel(false);

        let worker = self.worker.clone();
        let pool = self.pool.clone();
        let pause = self.pause;
        let acquire_timeout = self.settings.acquire_timeout;

        let looper = async move {
            let _exited = exited;
            let slot = match pool.acquire(acquire_timeout).await {
                Ok(slot) => slot,
                Err(err) => {
                    warn!("Worker not started: {err}.");
                    worker.reject(ErrorTag::PoolExhausted);
                    return;
                }
            };
            worker.note_busy(pool.busy());

            while !looper_stop.is_cancelled() && !*retired.borrow() {
                worker.run(worker.arrive(), slot.id()).await;
                if pause.is_zero() {
                    tokio::task::yield_now().await;
                    continue;
                }
                tokio::select! {
                    _ = looper_stop.cancelled() => break,
                    _ = retired.wait_for(|retired| *retired) => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        };
        tasks.spawn(looper.in_current_span());

        Looper { token, retire }
    }
}
