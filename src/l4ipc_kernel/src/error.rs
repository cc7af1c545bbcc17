//! Result codes and error types
use core::fmt;

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use l4ipc_kernel::ResultCode;
            /// assert_eq!(ResultCode::WouldBlock.as_str(), "WouldBlock");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that a kernel entry can report.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// The specified identifier lies outside the configured thread arena
        /// or does not name a thread slot in the expected state.
        NoAccess = -18,
        /// The current context disallows the operation, e.g., the kernel lock
        /// is already held or the calling thread is not running.
        BadContext = -25,
        /// The caller does not own the resource.
        NotOwner = -29,
        /// The resource is held by someone else and waiting for it could
        /// deadlock.
        WouldDeadlock = -30,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -41,
        /// The partner (or the calling thread itself) was killed while the
        /// operation was pending.
        Canceled = -49,
        /// The deadline passed before a rendezvous occurred.
        Timeout = -50,
        /// No immediate rendezvous was possible and the timeout was zero.
        WouldBlock = -51,
        /// The target identifier does not name a live thread.
        InvalidDestination = -52,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode`
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                match x {
                    $(
                        $name::$vname => Self::$vname,
                    )*
                }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname as i8,
                        $name::$vname as i8,
                    );
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod bad_context_error {}
    /// The kernel lock could not be acquired because it is already held.
    pub enum BadContextError {
        BadContext,
    }
}

define_error! {
    mod bad_id_error {}
    /// The identifier does not name a slot of the thread arena.
    pub enum BadIdError {
        NoAccess,
    }
}

define_error! {
    mod create_thread_error {}
    /// Error type for [`KernelState::create_thread`].
    ///
    /// [`KernelState::create_thread`]: crate::KernelState::create_thread
    pub enum CreateThreadError: BadContextError, BadIdError {
        /// The identifier is nil, invalid, or outside the arena, or the
        /// creator is not a live thread.
        NoAccess,
        /// The kernel lock is already held.
        BadContext,
    }
}

define_error! {
    mod thread_op_error {}
    /// Error type for operations on one live thread, such as
    /// [`KernelState::start_thread`] and
    /// [`KernelState::set_thread_priority`].
    ///
    /// [`KernelState::start_thread`]: crate::KernelState::start_thread
    /// [`KernelState::set_thread_priority`]: crate::KernelState::set_thread_priority
    pub enum ThreadOpError: BadContextError, BadIdError {
        /// The identifier does not name a live thread.
        NoAccess,
        /// The kernel lock is already held.
        BadContext,
        /// The thread is not in a state that allows the operation.
        BadObjectState,
    }
}

define_error! {
    mod lock_thread_error {}
    /// Error type for [`KernelState::try_lock_thread`].
    ///
    /// [`KernelState::try_lock_thread`]: crate::KernelState::try_lock_thread
    pub enum LockThreadError: BadContextError, BadIdError {
        /// The owner or the target is not a live thread.
        NoAccess,
        /// The kernel lock is already held.
        BadContext,
        /// The target's lock is held by another owner.
        WouldDeadlock,
    }
}

define_error! {
    mod unlock_thread_error {}
    /// Error type for [`KernelState::unlock_thread`].
    ///
    /// [`KernelState::unlock_thread`]: crate::KernelState::unlock_thread
    pub enum UnlockThreadError: BadContextError, BadIdError {
        /// The owner or the target is not a live thread.
        NoAccess,
        /// The kernel lock is already held.
        BadContext,
        /// The caller does not hold the target's lock.
        NotOwner,
    }
}

define_error! {
    mod kill_error {}
    /// Error type for [`KernelState::kill`].
    ///
    /// [`KernelState::kill`]: crate::KernelState::kill
    pub enum KillError: BadContextError, BadIdError {
        /// The killer is not a live thread, or the victim identifier is
        /// outside the arena.
        NoAccess,
        /// The kernel lock is already held.
        BadContext,
        /// The killer does not hold the victim's lock.
        NotOwner,
    }
}

define_error! {
    mod ipc_error {}
    /// Error type for the IPC primitives ([`KernelState::send`],
    /// [`KernelState::receive`], [`KernelState::call`],
    /// [`KernelState::reply_and_wait`], and [`KernelState::ipc`]).
    ///
    /// [`KernelState::send`]: crate::KernelState::send
    /// [`KernelState::receive`]: crate::KernelState::receive
    /// [`KernelState::call`]: crate::KernelState::call
    /// [`KernelState::reply_and_wait`]: crate::KernelState::reply_and_wait
    /// [`KernelState::ipc`]: crate::KernelState::ipc
    pub enum IpcError: BadContextError {
        /// The kernel lock is already held, or the calling thread is not a
        /// running thread.
        BadContext,
        /// No immediate rendezvous was possible and the timeout was zero.
        WouldBlock,
        /// The deadline passed before a rendezvous occurred.
        Timeout,
        /// The partner (or the calling thread itself) was killed while the
        /// operation was pending.
        Canceled,
        /// The target identifier does not name a live thread.
        InvalidDestination,
    }
}

/// The phase of an IPC operation an error is reported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcDirection {
    Send,
    Receive,
}

/// Bit set in every send-phase message dope error code.
pub const MSGDOPE_SEND_ERROR: u32 = 0x10;

impl IpcError {
    /// Convert the error to the error field of an L4 message dope.
    ///
    /// ```
    /// use l4ipc_kernel::{IpcDirection, IpcError};
    /// assert_eq!(IpcError::Timeout.to_msgdope(IpcDirection::Receive), 0x20);
    /// assert_eq!(IpcError::Timeout.to_msgdope(IpcDirection::Send), 0x30);
    /// ```
    pub fn to_msgdope(self, dir: IpcDirection) -> u32 {
        let send_bit = match dir {
            IpcDirection::Send => MSGDOPE_SEND_ERROR,
            IpcDirection::Receive => 0,
        };
        match self {
            // `ENOT_EXISTENT` is shared by both directions
            Self::InvalidDestination => 0x10,
            Self::WouldBlock | Self::Timeout => 0x20 | send_bit,
            Self::Canceled => 0x40 | send_bit,
            // The operation was refused because of the caller's own state,
            // which is what `ABORTED` reports
            Self::BadContext => 0xc0 | send_bit,
        }
    }
}
