//! Thread identifiers
use core::fmt;

/// Task (address space) number.
pub type TaskNum = u16;

/// Identifier of a thread, in the 32-bit L4 version 2 layout.
///
/// ```text
///  31      28 27                 17 16          10 9                0
/// +----------+---------------------+--------------+------------------+
/// | ver_high |        task         |   lthread    |    ver_low       |
/// +----------+---------------------+--------------+------------------+
/// ```
///
/// The all-zero value is [`Uid::NIL`] and the all-ones value is
/// [`Uid::INVALID`]; neither names a thread.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Uid(u32);

const VERSION_LOW_BITS: u32 = 10;
const LTHREAD_SHIFT: u32 = 10;
const LTHREAD_BITS: u32 = 7;
const TASK_SHIFT: u32 = 17;
const TASK_BITS: u32 = 11;
const VERSION_HIGH_SHIFT: u32 = 28;
const VERSION_HIGH_BITS: u32 = 4;

const VERSION_LOW_MASK: u32 = (1 << VERSION_LOW_BITS) - 1;
const LTHREAD_MASK: u32 = ((1 << LTHREAD_BITS) - 1) << LTHREAD_SHIFT;
const TASK_MASK: u32 = ((1 << TASK_BITS) - 1) << TASK_SHIFT;

impl Uid {
    /// The nil identifier.
    pub const NIL: Self = Self(0);

    /// The invalid identifier.
    pub const INVALID: Self = Self(u32::MAX);

    /// The number of thread slots a task can have.
    pub const MAX_LTHREADS: usize = 1 << LTHREAD_BITS;

    /// The number of tasks the layout can address.
    pub const MAX_TASKS: usize = 1 << TASK_BITS;

    /// The largest representable version number.
    pub const MAX_VERSION: u16 = (1 << (VERSION_LOW_BITS + VERSION_HIGH_BITS)) - 1;

    /// Construct a `Uid` from its raw bit representation.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Construct a `Uid` from its fields. Excess bits of each field are
    /// discarded.
    pub const fn new(task: TaskNum, lthread: u8, version: u16) -> Self {
        let version = version as u32;
        Self(
            (version & VERSION_LOW_MASK)
                | (((lthread as u32) << LTHREAD_SHIFT) & LTHREAD_MASK)
                | (((task as u32) << TASK_SHIFT) & TASK_MASK)
                | ((version >> VERSION_LOW_BITS) << VERSION_HIGH_SHIFT),
        )
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn task(self) -> TaskNum {
        ((self.0 & TASK_MASK) >> TASK_SHIFT) as TaskNum
    }

    #[inline]
    pub const fn lthread(self) -> u8 {
        ((self.0 & LTHREAD_MASK) >> LTHREAD_SHIFT) as u8
    }

    /// Get the version number, combining the low and high version fields.
    #[inline]
    pub const fn version(self) -> u16 {
        ((self.0 & VERSION_LOW_MASK) | ((self.0 >> VERSION_HIGH_SHIFT) << VERSION_LOW_BITS)) as u16
    }

    #[inline]
    pub const fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }

    #[inline]
    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID.0
    }

    /// Project to the identifier of the owning task by masking off the
    /// thread-local part.
    #[inline]
    pub const fn task_id(self) -> Self {
        Self(self.0 & !LTHREAD_MASK)
    }

    /// Return a flag indicating whether `self` names the first thread of a
    /// task.
    #[inline]
    pub const fn is_task_id(self) -> bool {
        self.0 & LTHREAD_MASK == 0
    }

    #[inline]
    pub const fn same_task(self, other: Self) -> bool {
        self.task() == other.task()
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_nil() {
            f.write_str("Uid(NIL)")
        } else if self.is_invalid() {
            f.write_str("Uid(INVALID)")
        } else {
            write!(
                f,
                "Uid({:x}.{:02x} v{})",
                self.task(),
                self.lthread(),
                self.version()
            )
        }
    }
}
