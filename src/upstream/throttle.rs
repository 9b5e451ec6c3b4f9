//! Outbound request spacing.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Spaces outbound request starts by a minimum interval.
///
/// Each caller reserves the next free start slot and sleeps until it. A
/// caller dropped before its slot arrives gives the slot back, provided no
/// later reservation has been stacked on top of it.
#[derive(Debug, Default)]
pub struct Throttle {
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new() -> Self {
        Self {
            next_slot: Mutex::new(None),
        }
    }

    /// Wait until this caller may start, keeping `spacing` from the previous start.
    pub async fn acquire(&self, spacing: Duration) {
        let reservation = self.reserve(spacing);
        tokio::time::sleep_until(reservation.slot).await;
        reservation.commit();
    }

    fn reserve(&self, spacing: Duration) -> Reservation<'_> {
        let mut next = self.next_slot.lock();
        let now = Instant::now();
        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + spacing);

        Reservation {
            throttle: self,
            slot,
            released_to: slot + spacing,
            committed: false,
        }
    }
}

struct Reservation<'a> {
    throttle: &'a Throttle,
    slot: Instant,
    released_to: Instant,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut next = self.throttle.next_slot.lock();
        if *next == Some(self.released_to) {
            *next = Some(self.slot);
        }
    }
}
