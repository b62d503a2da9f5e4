use log::warn;
use std::sync::{MutexGuard, PoisonError};

/// Recovers the guard of a poisoned mutex instead of propagating the panic.
///
/// The data behind the gateway's locks stays consistent across a panicking
/// holder (plain queues and counters), so carrying on is safe.
pub trait PoisonedLockRecovery<T> {
    fn recover_poisoned_lock(self, context: &str) -> T;
}

impl<'a, T> PoisonedLockRecovery<MutexGuard<'a, T>> for Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>> {
    fn recover_poisoned_lock(self, context: &str) -> MutexGuard<'a, T> {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Lock poisoned in {}, recovering with poisoned data", context);
                poisoned.into_inner()
            }
        }
    }
}
