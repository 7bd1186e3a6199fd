use embedded_time::Instant;
use rand::Rng;

use crate::time::{millis_between, Clock, Millis};

/// The armed deadline of one outstanding request.
///
/// A Confirmable request starts with a nominal delay of `ack_timeout`
/// and doubles it on every retransmission; each armed delay is the
/// nominal value stretched by a uniform jitter factor in
/// [1, `random_factor_pct`/100]. The retry index counts up; the
/// number of retransmissions already performed is the only state the
/// backoff arithmetic depends on.
///
/// A Non-confirmable request gets a single fixed lifetime and is never
/// retransmitted.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer<C: Clock> {
  start: Instant<C>,
  delay: Millis,
  nominal: Millis,
  factor_pct: u16,
  retransmits: u8,
  max_retransmit: u8,
  con: bool,
}

impl<C: Clock> RetryTimer<C> {
  /// Arm the timer for a freshly sent Confirmable request
  pub fn con(now: Instant<C>,
             ack_timeout: Millis,
             factor_pct: u16,
             max_retransmit: u8,
             rng: &mut impl Rng)
             -> Self {
    Self { start: now,
           delay: jitter(ack_timeout, factor_pct, rng),
           nominal: ack_timeout,
           factor_pct,
           retransmits: 0,
           max_retransmit,
           con: true }
  }

  /// Arm the timer for a freshly sent Non-confirmable request
  pub fn non(now: Instant<C>, lifetime: Millis) -> Self {
    Self { start: now,
           delay: lifetime,
           nominal: lifetime,
           factor_pct: 100,
           retransmits: 0,
           max_retransmit: 0,
           con: false }
  }

  /// Has the armed delay fully elapsed?
  pub fn expired(&self, now: Instant<C>) -> bool {
    millis_between(self.start, now) >= self.delay
  }

  /// True when no retransmissions remain: the request should be
  /// expired rather than resent.
  pub fn exhausted(&self) -> bool {
    !self.con || self.retransmits >= self.max_retransmit
  }

  /// Re-arm for the next retransmission: bump the retry index, double
  /// the nominal delay accordingly, and apply fresh jitter.
  pub fn backoff(&mut self, now: Instant<C>, rng: &mut impl Rng) {
    self.retransmits += 1;
    let nominal = Millis::new(self.nominal.0 << self.retransmits);
    self.delay = jitter(nominal, self.factor_pct, rng);
    self.start = now;
  }

  /// Number of retransmissions performed so far
  pub fn retransmits(&self) -> u8 {
    self.retransmits
  }

  /// The currently armed delay
  pub fn delay(&self) -> Millis {
    self.delay
  }
}

fn jitter(nominal: Millis, factor_pct: u16, rng: &mut impl Rng) -> Millis {
  let hi = (nominal.0 * factor_pct as u64 / 100).max(nominal.0);
  Millis::new(rng.gen_range(nominal.0..=hi))
}
