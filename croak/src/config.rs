
use crate::time::Millis;

/// Size of every PDU buffer: the receive buffer, the retransmit-pool
/// slots, and the largest message the engine will build or accept.
pub const PDU_BUF_SIZE: usize = 1152;

/// How many requests may be outstanding at once. When the table is
/// full, sends are refused with `NoSlot`.
pub const REQ_WAITING_MAX: usize = 8;

/// How many distinct remote endpoints may hold Observe registrations.
pub const OBS_CLIENTS_MAX: usize = 4;

/// How many Observe registrations may exist across all resources.
pub const OBS_REGISTRATIONS_MAX: usize = 4;

/// Slots in the retransmit pool. Each Confirmable request owns one
/// slot until it is acknowledged, answered, or given up on.
pub const RESEND_BUFS_MAX: usize = 8;

/// How many listeners may be registered.
pub const LISTENERS_MAX: usize = 8;

/// Capacity of the dispatch mailbox.
pub const MSG_QUEUE_SIZE: usize = 8;

/// Bytes of a request retained for matching when the full PDU is not
/// kept: a 4-byte header plus up to 8 token bytes.
pub const HDR_MAX: usize = 12;

/// Runtime config
///
/// Field defaults follow the RFC 7252 transmission parameters.
///
/// ```
/// use croak::config::Config;
///
/// let cfg = Config::default();
/// assert_eq!(cfg.ack_timeout.0, 2_000);
/// assert_eq!(cfg.max_retransmit, 4);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Config {
  /// Nominal wait before the first retransmission of a Confirmable
  /// request (`ACK_TIMEOUT`). Defaults to 2 seconds.
  pub ack_timeout: Millis,

  /// Number of retransmissions of a Confirmable request before its
  /// callback fires with a timeout (`MAX_RETRANSMIT`). Defaults to 4.
  pub max_retransmit: u8,

  /// Upper bound of the retransmission jitter, as a percentage of the
  /// nominal delay (`ACK_RANDOM_FACTOR`). 150 means each wait is drawn
  /// uniformly from [1.0, 1.5] times the nominal delay.
  pub random_factor_pct: u16,

  /// How long to wait for a response to a Non-confirmable request
  /// before its callback fires with a timeout. Defaults to 5 seconds.
  pub non_timeout: Millis,

  /// Receive timeout used by the dispatch loop while any request is
  /// outstanding, so that retransmission timers are serviced promptly.
  /// With nothing outstanding the loop blocks without timeout.
  /// Defaults to 1 second.
  pub recv_timeout: Millis,

  /// Right-shift applied to the monotonic microsecond clock when
  /// deriving the 24-bit Observe counter. Larger values slow the
  /// counter down; at the default of 5 it advances every 32 us.
  pub obs_tick_exponent: u8,

  /// Length of generated request tokens, 0-8 bytes. Defaults to 2.
  pub token_len: u8,

  /// The engine's UDP port. Defaults to 5683, the IANA CoAP port.
  pub port: u16,
}

impl Default for Config {
  fn default() -> Self {
    Config { ack_timeout: Millis::new(2_000),
             max_retransmit: 4,
             random_factor_pct: 150,
             non_timeout: Millis::new(5_000),
             recv_timeout: Millis::new(1_000),
             obs_tick_exponent: 5,
             token_len: 2,
             port: 5683 }
  }
}
