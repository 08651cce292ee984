//! Usage: Poison-tolerant locking for credential and refresh state.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) trait MutexExt<T> {
    fn lock_or_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[track_caller]
    fn lock_or_recover(&self) -> MutexGuard<'_, T> {
        let caller = std::panic::Location::caller();
        self.lock().unwrap_or_else(|poisoned: PoisonError<MutexGuard<'_, T>>| {
            tracing::error!(
                guarded = std::any::type_name::<T>(),
                at = %caller,
                "lock poisoned by an earlier panic; continuing with last written state"
            );
            poisoned.into_inner()
        })
    }
}
