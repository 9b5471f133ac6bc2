// Actor-owned timers.
//
// Each kind has at most one armed instance. Arming spawns a sleeper that
// posts `Input::Timer` back to the actor; the generation tag lets the actor
// ignore a fire that raced with a cancel or re-arm.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::Input;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum TimerKind {
    Connect,
    Disconnect,
    Command,
    Delay,
    LinkQuality,
}

struct Armed {
    generation: u64,
    cancel: CancellationToken,
}

pub(crate) struct Timers {
    tx: mpsc::UnboundedSender<Input>,
    armed: HashMap<TimerKind, Armed>,
    next_generation: u64,
}

impl Timers {
    pub fn new(tx: mpsc::UnboundedSender<Input>) -> Self {
        Self {
            tx,
            armed: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Arm `kind`, replacing any instance already armed.
    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.cancel(kind);
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(after) => {
                    let _ = tx.send(Input::Timer { kind, generation });
                }
            }
        });

        trace!(timer = %kind, ?after, generation, "timer armed");
        self.armed.insert(kind, Armed { generation, cancel });
    }

    /// Idempotent.
    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(armed) = self.armed.remove(&kind) {
            armed.cancel.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.cancel.cancel();
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    /// Accept a fire. Returns `false` for a stale one.
    pub fn fire(&mut self, kind: TimerKind, generation: u64) -> bool {
        match self.armed.get(&kind) {
            Some(armed) if armed.generation == generation => {
                self.armed.remove(&kind);
                true
            }
            _ => false,
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fired(input: Input) -> (TimerKind, u64) {
        match input {
            Input::Timer { kind, generation } => (kind, generation),
            _ => panic!("expected a timer input"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.arm(TimerKind::Command, Duration::from_secs(10));

        let (kind, generation) = fired(rx.recv().await.unwrap());
        assert_eq!(kind, TimerKind::Command);
        assert!(timers.fire(kind, generation));
        assert!(!timers.is_armed(TimerKind::Command));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_makes_earlier_fire_stale() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.arm(TimerKind::Delay, Duration::from_millis(5));
        let first = timers.armed.get(&TimerKind::Delay).unwrap().generation;
        timers.arm(TimerKind::Delay, Duration::from_millis(50));

        let (kind, generation) = fired(rx.recv().await.unwrap());
        assert_ne!(generation, first);
        assert!(!timers.fire(kind, first));
        assert!(timers.fire(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.arm(TimerKind::Connect, Duration::from_secs(1));
        timers.cancel(TimerKind::Connect);
        timers.cancel(TimerKind::Connect);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }
}
