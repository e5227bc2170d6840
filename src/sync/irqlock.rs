//! Interrupt-masking lock built on a raw spinlock.
//!
//! All process-wide mutable kernel state (heap, frame bitmap, process table,
//! driver registry) must only be touched with interrupts disabled, otherwise
//! an IRQ handler could re-enter the critical section on the same CPU. This
//! lock disables interrupts before taking the underlying `spin::Mutex` and
//! restores the previous interrupt-enable state when the guard drops.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::arch::interrupts;

pub struct IrqLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> IrqLockGuard<'_, T> {
        let interrupts_were_enabled = interrupts::are_enabled();
        interrupts::disable();

        IrqLockGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            interrupts_were_enabled,
        }
    }
}

pub struct IrqLockGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    interrupts_were_enabled: bool,
}

impl<T> Deref for IrqLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<T> Drop for IrqLockGuard<'_, T> {
    fn drop(&mut self) {
        // The mutex must be released before interrupts come back on,
        // otherwise an IRQ handler could spin on a lock we still hold.
        // SAFETY:
        // - `guard` is dropped exactly once, here.
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }

        if self.interrupts_were_enabled {
            interrupts::enable();
        }
    }
}
