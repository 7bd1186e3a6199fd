use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = embedded_time::duration::Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the type of "ticks"
/// to u64 microseconds (see the `SCALING_FACTOR` of
/// [`crate::std::Clock`]).
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Timeout configuration allowing for "never time out" as an option
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub enum Timeout {
  /// Timeout after some number of milliseconds has elapsed
  Millis(u64),
  /// Never time out
  Never,
}

/// Milliseconds elapsed between two instants, saturating to zero when
/// `later` does not come after `earlier`.
pub fn millis_between<C: Clock>(earlier: Instant<C>, later: Instant<C>) -> Millis {
  later.checked_duration_since(&earlier)
       .and_then(|dur| Millis::try_from(dur).ok())
       .unwrap_or(Millis::new(0))
}

/// The instant expressed as whole microseconds since the clock's epoch.
pub fn micros_since_epoch<C: Clock>(now: Instant<C>) -> u64 {
  embedded_time::duration::Microseconds::<u64>::try_from(now.duration_since_epoch())
    .map(|us| us.0)
    .unwrap_or(0)
}
