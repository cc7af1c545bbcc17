//! Kernel state locking mechanism
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::{error::BadContextError, utils::intrusive_list::CellLike, PortThreading};

pub(crate) struct CpuLockTag<Traits>(Traits);

/// The key that "unlocks" [`CpuLockCell`].
pub(crate) type CpuLockToken<Traits> = tokenlock::UnsyncSingletonToken<CpuLockTag<Traits>>;

/// The keyhole type for [`UnsyncTokenLock`] that can be "unlocked" by
/// [`CpuLockToken`].
pub(crate) type CpuLockKeyhole<Traits> = tokenlock::SingletonTokenId<CpuLockTag<Traits>>;

/// Cell type that can be accessed by [`CpuLockToken`] (which can be obtained
/// by [`lock_cpu`]).
///
/// The token is a singleton per `Traits`, while a program may construct
/// several [`KernelState`]`<Traits>`. A cell is `!Sync`, so it never leaves
/// the thread that owns its kernel, and the safety contract of
/// [`KernelState::new`] rules out holding the CPU Lock of two instances on
/// one thread.
///
/// [`KernelState`]: crate::KernelState
/// [`KernelState::new`]: crate::KernelState::new
pub(crate) struct CpuLockCell<Traits, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<Traits>>);

impl<Traits, T> CpuLockCell<Traits, T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::new(), x))
    }
}

impl<Traits, T: Default> Default for CpuLockCell<Traits, T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<Traits, T: ?Sized> fmt::Debug for CpuLockCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // The contents can't be read without the port, which the cell doesn't
        // know about
        f.write_str("CpuLockCell(..)")
    }
}

impl<Traits, T> ops::Deref for CpuLockCell<Traits, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<Traits>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<Traits, T> ops::DerefMut for CpuLockCell<Traits, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'a, Element: Clone, Traits> CellLike<CpuLockTokenRefMut<'a, Traits>>
    for CpuLockCell<Traits, Element>
{
    type Target = Element;

    fn get(&self, key: &CpuLockTokenRefMut<'a, Traits>) -> Self::Target {
        self.0.get(&**key)
    }
    fn set(&self, key: &mut CpuLockTokenRefMut<'a, Traits>, value: Self::Target) {
        self.0.replace(&mut **key, value);
    }
    fn modify<T>(
        &self,
        key: &mut CpuLockTokenRefMut<'a, Traits>,
        f: impl FnOnce(&mut Self::Target) -> T,
    ) -> T {
        f(self.0.write(&mut **key))
    }
}

/// Attempt to enter a CPU Lock state and get an RAII guard.
/// Return `BadContext` if the kernel is already in a CPU Lock state.
pub(crate) fn lock_cpu<Traits: PortThreading>(
    port: &Traits,
) -> Result<CpuLockGuard<'_, Traits>, BadContextError> {
    if port.try_enter_cpu_lock() {
        debug_assert!(port.is_cpu_lock_active());
        Ok(CpuLockGuard {
            port,
            // Safety: We just entered a CPU Lock state of this kernel
            //         instance, so no other `CpuLockToken` is alive on this
            //         code path
            token: unsafe { CpuLockToken::new_unchecked() },
        })
    } else {
        Err(BadContextError::BadContext)
    }
}

/// RAII guard for a CPU Lock state.
///
/// [`CpuLockToken`] can be borrowed from this type.
pub(crate) struct CpuLockGuard<'a, Traits: PortThreading> {
    port: &'a Traits,
    token: CpuLockToken<Traits>,
}

impl<Traits: PortThreading> CpuLockGuard<'_, Traits> {
    /// Construct a [`CpuLockTokenRefMut`] by borrowing `self`.
    pub(crate) fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_, Traits> {
        self.token.borrow_mut()
    }
}

impl<Traits: PortThreading> Drop for CpuLockGuard<'_, Traits> {
    fn drop(&mut self) {
        self.port.leave_cpu_lock();
    }
}

impl<Traits: PortThreading> ops::Deref for CpuLockGuard<'_, Traits> {
    type Target = CpuLockToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: PortThreading> ops::DerefMut for CpuLockGuard<'_, Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// Borrowed version of [`CpuLockGuard`]. This is equivalent to
/// `&'a mut CpuLockGuard` but does not consume memory.
///
///  - Always prefer this over `&mut CpuLockGuard` in function parameters.
///  - When you pass `&'a mut _` to a function, the compiler automatically
///    reborrows it as `&'b mut _` so that the original `&'a mut _` remains
///    accessible after the function call. This does not happen with
///    `CpuLockTokenRefMut`. You have to call [`borrow_mut`] manually.
///
/// [`borrow_mut`]: tokenlock::UnsyncSingletonTokenRefMut::borrow_mut
pub(crate) type CpuLockTokenRefMut<'a, Traits> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, CpuLockTag<Traits>>;
