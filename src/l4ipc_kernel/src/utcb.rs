//! Message registers and the user-level thread control block (UTCB)
//!
//! The short part of a message travels in [`Message`], which mirrors the
//! registers used by the IPC system call. Longer payloads and exception state
//! travel in the value words of the UTCB. Both are plain `#[repr(C)]` blocks of
//! machine words; the rendezvous protocol copies them without interpreting
//! them.
use crate::Mword;

/// The number of machine words transferred in registers.
pub const SHORT_MSG_WORDS: usize = 3;

/// The number of value words in a UTCB.
pub const UTCB_VALUES: usize = 32;

/// Message tag. Describes how many UTCB value words accompany a message.
///
/// ```text
///  63..16     15..12   11..6    5..0
/// +--------+---------+-------+-------+
/// | label  |  flags  |   -   | words |
/// +--------+---------+-------+-------+
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct MsgTag(Mword);

const TAG_WORDS_MASK: Mword = 0x3f;
const TAG_FLAGS_SHIFT: u32 = 12;
const TAG_FLAGS_MASK: Mword = 0xf << TAG_FLAGS_SHIFT;
const TAG_LABEL_SHIFT: u32 = 16;

impl MsgTag {
    pub const fn new(label: u16, words: usize) -> Self {
        Self(((label as Mword) << TAG_LABEL_SHIFT) | (words & TAG_WORDS_MASK))
    }

    #[inline]
    pub const fn from_raw(raw: Mword) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> Mword {
        self.0
    }

    /// The number of UTCB value words the sender wants to transfer.
    #[inline]
    pub const fn words(self) -> usize {
        self.0 & TAG_WORDS_MASK
    }

    #[inline]
    pub const fn flags(self) -> u8 {
        ((self.0 & TAG_FLAGS_MASK) >> TAG_FLAGS_SHIFT) as u8
    }

    #[inline]
    pub const fn label(self) -> u16 {
        (self.0 >> TAG_LABEL_SHIFT) as u16
    }
}

/// The register part of a message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Message {
    pub tag: MsgTag,
    pub words: [Mword; SHORT_MSG_WORDS],
}

impl Message {
    pub const EMPTY: Self = Self::new(MsgTag::new(0, 0), [0; SHORT_MSG_WORDS]);

    pub const fn new(tag: MsgTag, words: [Mword; SHORT_MSG_WORDS]) -> Self {
        Self { tag, words }
    }
}

macro_rules! define_exception_frame {
    (
        $( #[$meta:meta] )*
        pub struct $name:ident {
            $( $( #[$fmeta:meta] )* pub $field:ident, )*
        }
    ) => {
        $( #[$meta] )*
        pub struct $name {
            $( $( #[$fmeta] )* pub $field: Mword, )*
        }

        impl $name {
            /// The number of machine words in the frame.
            pub const WORDS: usize = [$( stringify!($field) ),*].len();

            /// A frame with all registers cleared.
            pub const ZERO: Self = Self { $( $field: 0, )* };

            /// Serialize the frame into the order used in UTCB value words.
            pub fn to_words(&self) -> [Mword; Self::WORDS] {
                [$( self.$field ),*]
            }

            /// Deserialize a frame from UTCB value words.
            pub fn from_words(words: &[Mword; Self::WORDS]) -> Self {
                let mut it = words.iter().copied();
                Self {
                    $( $field: it.next().unwrap_or_default(), )*
                }
            }
        }
    };
}

define_exception_frame! {
    /// The trap state of a thread, as delivered to its exception handler.
    ///
    /// The general-purpose register shadow comes first, followed by the fault
    /// address, the trap number, the error code, and the hardware frame.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct ExceptionFrame {
        pub r15,
        pub r14,
        pub r13,
        pub r12,
        pub r11,
        pub r10,
        pub r9,
        pub r8,
        pub rdi,
        pub rsi,
        pub rbp,
        pub rbx,
        pub rdx,
        pub rcx,
        pub rax,
        /// Page fault address
        pub pfa,
        pub trapno,
        pub err,
        pub ip,
        pub cs,
        pub flags,
        pub sp,
        pub ss,
    }
}

/// The user-level thread control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Utcb {
    pub values: [Mword; UTCB_VALUES],
    pub status: Mword,
}

impl Default for Utcb {
    fn default() -> Self {
        Self::new()
    }
}

impl Utcb {
    pub const fn new() -> Self {
        Self {
            values: [0; UTCB_VALUES],
            status: 0,
        }
    }

    /// Copy the value words announced by `tag` from `self` to `rcv`, bounded
    /// by the UTCB capacity. Returns the number of words copied.
    pub fn copy_values_to(&self, tag: MsgTag, rcv: &mut Utcb) -> usize {
        let n = tag.words().min(UTCB_VALUES);
        rcv.values[..n].copy_from_slice(&self.values[..n]);
        n
    }

    /// Store `frame` in the value words.
    pub fn write_exception(&mut self, frame: &ExceptionFrame) {
        self.values[..ExceptionFrame::WORDS].copy_from_slice(&frame.to_words());
    }

    /// Load an exception frame from the value words.
    pub fn read_exception(&self) -> ExceptionFrame {
        let mut words = [0; ExceptionFrame::WORDS];
        words.copy_from_slice(&self.values[..ExceptionFrame::WORDS]);
        ExceptionFrame::from_words(&words)
    }
}

// The exception frame must fit in the value words
const _: () = assert!(ExceptionFrame::WORDS <= UTCB_VALUES);
