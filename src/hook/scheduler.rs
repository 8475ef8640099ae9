//! # Scheduler Hook
//!
//! Intercepts the host's per-frame scheduler update and rescales the elapsed time it is given. The original
//! update always runs; only its time argument changes.
//!
//! The detour can't capture anything, so the active [`TimeScale`] lives in a process-wide slot that only
//! [`InlineSchedulerHook`] writes to.

use std::ffi::c_void;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, TryLockError};

use lazy_static::lazy_static;
use tracing::{debug, info};

use crate::patcher::byte::{BytePatchGuard, BytePatcher};
use crate::patcher::mem::{PermissionWrapper, PermissionWrapperGuard};

use super::inline::{InlineHook, InlineHookGuard};
use super::{ProcessHook, ProcessHookError};

/// Signature of the host's scheduler update: the scheduler and the seconds since the last frame
#[cfg(target_arch = "x86")]
pub type SchedulerUpdateFn = unsafe extern "fastcall" fn(*mut c_void, f32);
/// Signature of the host's scheduler update: the scheduler and the seconds since the last frame
#[cfg(not(target_arch = "x86"))]
pub type SchedulerUpdateFn = unsafe extern "C" fn(*mut c_void, f32);

/// Rewrites the elapsed time of each frame
pub trait TimeScale: Send + Sync {
    /// Time to report for a frame that took `dt` seconds
    fn scale(&self, dt: f32) -> f32;
}

/// Runs `original` with `dt` passed through `scale`.
///
/// A panicking scale is treated as no scale at all, so the update is never skipped.
///
/// # Safety
///
/// `original` must be safe to call with `scheduler`
pub unsafe fn forward_scaled(
    original: SchedulerUpdateFn,
    scheduler: *mut c_void,
    dt: f32,
    scale: Option<&dyn TimeScale>,
) {
    let dt = match scale {
        Some(scale) => panic::catch_unwind(AssertUnwindSafe(|| scale.scale(dt))).unwrap_or(dt),
        None => dt,
    };
    original(scheduler, dt)
}

/// Trampoline to the original update, 0 while nothing is hooked
static ORIGINAL: AtomicUsize = AtomicUsize::new(0);

lazy_static! {
    /// Scale applied by the detour
    static ref SCALE: RwLock<Option<Arc<dyn TimeScale>>> = RwLock::new(None);
}

/// Hook shared by every [`InlineSchedulerHook`]
static HOOK: ProcessHook = InlineHook::new(PermissionWrapper::new(BytePatcher::new()));

/// Current scale, without waiting on a writer
fn current_scale() -> Option<Arc<dyn TimeScale>> {
    match SCALE.try_read() {
        Ok(scale) => scale.clone(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().clone(),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Replaces the scale the detour applies
fn set_scale(scale: Option<Arc<dyn TimeScale>>) {
    let mut slot = SCALE.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = scale;
}

/// Body of the detour
///
/// # Safety
///
/// Only called by the host through the hook
unsafe fn on_update(scheduler: *mut c_void, dt: f32) {
    let original = ORIGINAL.load(Ordering::Acquire);
    if original == 0 {
        return;
    }
    // Safety: only trampolines for a `SchedulerUpdateFn` are stored in `ORIGINAL`
    let original: SchedulerUpdateFn = mem::transmute(original);
    let scale = current_scale();
    forward_scaled(original, scheduler, dt, scale.as_deref());
}

/// Replaces the host's update while hooked
#[cfg(target_arch = "x86")]
unsafe extern "fastcall" fn scheduler_update_detour(scheduler: *mut c_void, dt: f32) {
    on_update(scheduler, dt)
}

/// Replaces the host's update while hooked
#[cfg(not(target_arch = "x86"))]
unsafe extern "C" fn scheduler_update_detour(scheduler: *mut c_void, dt: f32) {
    on_update(scheduler, dt)
}

/// Installs and removes the scheduler interception
pub trait SchedulerInterceptor {
    /// Redirects the update function at `target` through `scale`. Installing again replaces the previous hook.
    fn install(&mut self, target: usize, scale: Arc<dyn TimeScale>) -> Result<(), ProcessHookError>;

    /// Removes the hook, if any
    fn uninstall(&mut self);

    /// Whether a hook is active
    fn is_installed(&self) -> bool;
}

/// Guard type of the process-wide hook
type SchedulerGuard = InlineHookGuard<PermissionWrapperGuard<BytePatchGuard>>;

/// [`SchedulerInterceptor`] using an inline hook on the real update function
pub struct InlineSchedulerHook {
    /// Active hook
    guard: Option<SchedulerGuard>,
}

impl InlineSchedulerHook {
    /// Creates an interceptor with nothing hooked
    ///
    /// # Safety
    ///
    /// Every `target` later passed to [`SchedulerInterceptor::install`] must be the start of a function with the
    /// [`SchedulerUpdateFn`] signature, and no thread may be executing its first instructions while they are
    /// overwritten.
    pub unsafe fn new() -> Self {
        Self { guard: None }
    }
}

impl SchedulerInterceptor for InlineSchedulerHook {
    fn install(&mut self, target: usize, scale: Arc<dyn TimeScale>) -> Result<(), ProcessHookError> {
        self.uninstall();
        set_scale(Some(scale));

        // the trampoline is published before the jump is written, so the detour always has an original to call
        let publish = |original: *const u8| ORIGINAL.store(original as usize, Ordering::Release);
        // Safety: `new`'s contract covers `target`; the detour matches its signature
        let guard = unsafe {
            HOOK.hook_with(
                target as *const u8,
                scheduler_update_detour as *const u8,
                publish,
            )
        };
        let guard = match guard {
            Ok(guard) => guard,
            Err(e) => {
                ORIGINAL.store(0, Ordering::Release);
                set_scale(None);
                return Err(e);
            }
        };
        self.guard = Some(guard);
        info!(address = format_args!("{target:#x}"), "scheduler hooked");
        Ok(())
    }

    fn uninstall(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            ORIGINAL.store(0, Ordering::Release);
            set_scale(None);
            debug!("scheduler unhooked");
        }
    }

    fn is_installed(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for InlineSchedulerHook {
    fn drop(&mut self) {
        self.uninstall();
    }
}
