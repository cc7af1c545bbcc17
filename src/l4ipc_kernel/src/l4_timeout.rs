//! The bit-packed IPC timeout descriptor
use crate::Tick;

/// A decoded timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait without a deadline. The wait is still cancellable by a kill.
    Never,
    /// Fail immediately if no rendezvous is possible.
    Zero,
    /// Wait for at most the given number of ticks.
    Relative(Tick),
    /// Wait until the given point in time.
    Absolute(Tick),
}

/// A [`Timeout`] resolved against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    Never,
    Zero,
    At(Tick),
}

impl Timeout {
    pub(crate) fn deadline(self, now: Tick) -> Deadline {
        match self {
            Self::Never => Deadline::Never,
            Self::Zero | Self::Relative(0) => Deadline::Zero,
            Self::Relative(d) => Deadline::At(now.saturating_add(d)),
            Self::Absolute(t) if t <= now => Deadline::Zero,
            Self::Absolute(t) => Deadline::At(t),
        }
    }
}

/// The L4 timeout word carrying a send and a receive timeout, each as a
/// mantissa/exponent pair, plus the page fault timeouts.
///
/// An exponent of zero means "never". A zero mantissa with a non-zero
/// exponent means "zero". Otherwise the timeout is
/// `mantissa << ((15 - exponent) * 2)` ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct L4Timeout(u32);

const RCV_EXP_SHIFT: u32 = 0;
const SND_EXP_SHIFT: u32 = 4;
const RCV_PFAULT_SHIFT: u32 = 8;
const SND_PFAULT_SHIFT: u32 = 12;
const SND_MAN_SHIFT: u32 = 16;
const RCV_MAN_SHIFT: u32 = 24;

impl L4Timeout {
    /// Both timeouts are infinite.
    pub const NEVER: Self = Self(0);

    /// Both timeouts are zero.
    pub const ZERO: Self = Self((1 << RCV_EXP_SHIFT) | (1 << SND_EXP_SHIFT));

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Construct a descriptor with the given send and receive pairs and
    /// infinite page fault timeouts.
    pub const fn new(snd_man: u8, snd_exp: u8, rcv_man: u8, rcv_exp: u8) -> Self {
        Self(
            (((rcv_exp & 0xf) as u32) << RCV_EXP_SHIFT)
                | (((snd_exp & 0xf) as u32) << SND_EXP_SHIFT)
                | ((snd_man as u32) << SND_MAN_SHIFT)
                | ((rcv_man as u32) << RCV_MAN_SHIFT),
        )
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn rcv_exp(self) -> u8 {
        ((self.0 >> RCV_EXP_SHIFT) & 0xf) as u8
    }

    #[inline]
    pub const fn snd_exp(self) -> u8 {
        ((self.0 >> SND_EXP_SHIFT) & 0xf) as u8
    }

    #[inline]
    pub const fn rcv_pfault(self) -> u8 {
        ((self.0 >> RCV_PFAULT_SHIFT) & 0xf) as u8
    }

    #[inline]
    pub const fn snd_pfault(self) -> u8 {
        ((self.0 >> SND_PFAULT_SHIFT) & 0xf) as u8
    }

    #[inline]
    pub const fn snd_man(self) -> u8 {
        (self.0 >> SND_MAN_SHIFT) as u8
    }

    #[inline]
    pub const fn rcv_man(self) -> u8 {
        (self.0 >> RCV_MAN_SHIFT) as u8
    }

    /// Decode the send timeout. `abs_clock` is `Some(c)` if the caller
    /// requested an absolute timeout, `c` being the clock bit that
    /// disambiguates the wrap-around.
    pub fn send(self, now: Tick, abs_clock: Option<bool>) -> Timeout {
        decode(self.snd_man(), self.snd_exp(), now, abs_clock)
    }

    /// Decode the receive timeout. See [`Self::send`].
    pub fn receive(self, now: Tick, abs_clock: Option<bool>) -> Timeout {
        decode(self.rcv_man(), self.rcv_exp(), now, abs_clock)
    }
}

fn decode(man: u8, exp: u8, now: Tick, abs_clock: Option<bool>) -> Timeout {
    if exp == 0 {
        return Timeout::Never;
    }

    match abs_clock {
        Some(c) => {
            let t = absolute(man, exp, now, c);
            if t <= now {
                Timeout::Zero
            } else {
                Timeout::Absolute(t)
            }
        }
        None if man == 0 => Timeout::Zero,
        None => Timeout::Relative((man as Tick) << ((15 - exp as u32) * 2)),
    }
}

/// Place the mantissa at bit `15 - exp` of the current clock value. Bit
/// `e + 8` of the clock selects between the two nearest candidates.
fn absolute(man: u8, exp: u8, now: Tick, c: bool) -> Tick {
    let e = 15 - exp as u32;
    let span: Tick = 1 << (e + 8);

    let mut t = (now & !(span - 1)) | ((man as Tick) << e);

    if ((now >> (e + 8)) & 1 != 0) != c {
        t = t.wrapping_add(span);
    }

    if t > now.saturating_add(span) {
        t = t.saturating_sub(span << 1);
    }

    t
}
