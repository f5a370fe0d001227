//! # Frames
//!
//! A frame is exactly one `before_frame → build → after_frame` triple:
//!
//! - `before_frame` invalidates every stored entry and resets the positional
//!   id counter.
//! - the build pass walks the widget tree with a [`BuildCx`], which hands out
//!   keys and reads/writes state (revalidating what it touches).
//! - `after_frame` sweeps and disposes whatever the build pass did not touch.
//!
//! ```rust
//! use retain_core::*;
//!
//! let mut rt = Runtime::new(RuntimeConfig::default());
//! let open = rt
//!     .run_frame(|cx| -> Result<bool, FrameError> {
//!         let key = cx.key(None, "Popup");
//!         let state = cx.remember_state(&key, || false)?;
//!         state.set(true);
//!         Ok(state.get())
//!     })
//!     .unwrap();
//! assert!(open);
//! assert_eq!(rt.store().keys(), vec!["Popup_0".to_string()]);
//!
//! // A frame that builds nothing sweeps the popup state.
//! rt.run_frame(|_| Ok::<_, FrameError>(())).unwrap();
//! assert!(rt.store().is_empty());
//! ```
//!
//! There is no global runtime: the host owns a `Runtime` and passes the
//! `BuildCx` down the build call tree by `&mut`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use web_time::Instant;

use crate::effects::{Dispose, Disposable, EffectSlot, StateCell};
use crate::error::{FrameError, StateError};
use crate::identity::{IdentityAllocator, WidgetKey};
use crate::state::StateStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    /// Between frames.
    Idle,
    /// Between `before_frame` and `after_frame`.
    Building,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramePhase::Idle => f.write_str("idle"),
            FramePhase::Building => f.write_str("building"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RuntimeConfig {
    /// Warn when more entries than this survive a sweep. Usually means keys
    /// are being generated from something that changes every frame.
    pub entry_warn_threshold: Option<usize>,
}

impl RuntimeConfig {
    pub fn entry_warn_threshold(mut self, n: usize) -> Self {
        self.entry_warn_threshold = Some(n);
        self
    }
}

/// What one `after_frame` observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    /// 1-based frame number.
    pub frame: u64,
    /// Entries alive after the sweep.
    pub live: usize,
    /// Entries removed and disposed by the sweep.
    pub swept: usize,
    /// Time between `before_frame` and the start of the sweep.
    pub build_time: Duration,
}

type Waker = Arc<dyn Fn() + Send + Sync>;

/// Cloneable "please build another frame" flag.
///
/// Background tasks call `request` when they changed state the UI should
/// show; the host polls `Runtime::take_redraw` or installs a waker that
/// nudges its event loop.
#[derive(Clone, Default)]
pub struct RedrawHandle {
    pending: Arc<AtomicBool>,
    waker: Option<Waker>,
}

impl RedrawHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_waker(waker: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            waker: Some(Arc::new(waker)),
        }
    }

    pub fn request(&self) {
        self.pending.store(true, Ordering::Release);
        if let Some(w) = &self.waker {
            w();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns whether a redraw was pending and clears it.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

impl fmt::Debug for RedrawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedrawHandle")
            .field("pending", &self.is_pending())
            .field("waker", &self.waker.is_some())
            .finish()
    }
}

/// Owns the state store and identity allocator and sequences frames.
pub struct Runtime {
    config: RuntimeConfig,
    store: StateStore,
    ids: IdentityAllocator,
    redraw: RedrawHandle,
    phase: FramePhase,
    frame: u64,
    frame_started: Option<Instant>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            store: StateStore::new(),
            ids: IdentityAllocator::new(),
            redraw: RedrawHandle::new(),
            phase: FramePhase::Idle,
            frame: 0,
            frame_started: None,
        }
    }

    pub fn with_redraw(mut self, redraw: RedrawHandle) -> Self {
        self.redraw = redraw;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Number of frames started so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn redraw_handle(&self) -> RedrawHandle {
        self.redraw.clone()
    }

    pub fn take_redraw(&self) -> bool {
        self.redraw.take()
    }

    pub fn before_frame(&mut self) -> Result<(), FrameError> {
        self.expect_phase("before_frame", FramePhase::Idle)?;
        self.store.invalidate();
        self.ids.reset();
        self.frame += 1;
        self.frame_started = Some(Instant::now());
        self.phase = FramePhase::Building;
        Ok(())
    }

    /// Build-time handle for the current frame.
    pub fn build_cx(&mut self) -> Result<BuildCx<'_>, FrameError> {
        self.expect_phase("build", FramePhase::Building)?;
        Ok(BuildCx {
            store: &self.store,
            ids: &mut self.ids,
            redraw: &self.redraw,
            frame: self.frame,
        })
    }

    pub fn after_frame(&mut self) -> Result<FrameReport, FrameError> {
        self.expect_phase("after_frame", FramePhase::Building)?;
        let build_time = self
            .frame_started
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let swept = self.store.sweep();
        self.phase = FramePhase::Idle;

        let report = FrameReport {
            frame: self.frame,
            live: self.store.len(),
            swept,
            build_time,
        };
        log::debug!(
            "frame {}: {} live, {} swept, build {:.2} ms",
            report.frame,
            report.live,
            report.swept,
            report.build_time.as_secs_f64() * 1000.0
        );
        if let Some(limit) = self.config.entry_warn_threshold
            && report.live > limit
        {
            log::warn!(
                "frame {}: {} live state entries (threshold {limit}); are keys stable?",
                report.frame,
                report.live
            );
        }
        Ok(report)
    }

    /// Ends the current build without sweeping.
    ///
    /// Marks from a partial build are not trusted; the next `before_frame`
    /// invalidates them anyway.
    pub fn abort_frame(&mut self) {
        if self.phase == FramePhase::Building {
            log::error!("frame {} aborted; sweep skipped", self.frame);
            self.frame_started = None;
            self.phase = FramePhase::Idle;
        }
    }

    /// Runs one whole frame around `build`.
    ///
    /// If `build` fails the frame is aborted and the error returned.
    pub fn run_frame<R, E>(
        &mut self,
        build: impl FnOnce(&mut BuildCx<'_>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<FrameError>,
    {
        self.before_frame()?;
        let result = {
            let mut cx = self.build_cx()?;
            build(&mut cx)
        };
        match result {
            Ok(value) => {
                self.after_frame()?;
                Ok(value)
            }
            Err(err) => {
                self.abort_frame();
                Err(err)
            }
        }
    }

    fn expect_phase(&self, operation: &'static str, want: FramePhase) -> Result<(), FrameError> {
        if self.phase == want {
            Ok(())
        } else {
            Err(FrameError::Phase {
                operation,
                phase: self.phase,
            })
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let n = self.store.clear();
        if n > 0 {
            log::debug!("runtime dropped; disposed {n} state entries");
        }
    }
}

/// Handle passed through the build call tree for one frame.
pub struct BuildCx<'a> {
    store: &'a StateStore,
    ids: &'a mut IdentityAllocator,
    redraw: &'a RedrawHandle,
    frame: u64,
}

impl<'a> BuildCx<'a> {
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn store(&self) -> &'a StateStore {
        self.store
    }

    pub fn redraw_handle(&self) -> RedrawHandle {
        self.redraw.clone()
    }

    pub fn widget_key(&mut self, explicit: Option<&str>, discriminator: &str) -> WidgetKey {
        self.ids.assign(explicit, discriminator)
    }

    /// State key for the next widget: `explicit` if given, otherwise
    /// `discriminator_N` from the positional counter.
    pub fn key(&mut self, explicit: Option<&str>, discriminator: &str) -> String {
        self.ids.assign_key(explicit, discriminator)
    }

    pub fn get_state<T: Disposable>(&self, key: &str) -> Result<Option<Arc<T>>, StateError> {
        self.store.get(key)
    }

    pub fn set_state<T: Disposable>(&self, key: impl Into<String>, payload: T) -> Arc<T> {
        self.store.set(key, payload)
    }

    /// Key-based remember: the stored payload, or `init()` stored under `key`.
    pub fn remember<T: Disposable>(
        &self,
        key: &str,
        init: impl FnOnce() -> T,
    ) -> Result<Arc<T>, StateError> {
        self.store.get_or_insert_with(key, init)
    }

    pub fn remember_state<T: Send + 'static>(
        &self,
        key: &str,
        init: impl FnOnce() -> T,
    ) -> Result<Arc<StateCell<T>>, StateError> {
        self.remember(key, || StateCell::new(init()))
    }

    /// Runs `effect` whenever `dep` differs from the previous frame's value,
    /// running the previous cleanup first. The last cleanup runs when the
    /// entry under `key` is swept.
    pub fn disposable_effect<K>(
        &self,
        key: &str,
        dep: K,
        effect: impl FnOnce() -> Dispose,
    ) -> Result<(), StateError>
    where
        K: PartialEq + Send + 'static,
    {
        let slot = self.remember(key, EffectSlot::<K>::new)?;
        let changed = slot.last_key.lock().as_ref() != Some(&dep);
        if changed {
            let previous = slot.cleanup.lock().take();
            if let Some(d) = previous {
                d.run();
            }
            *slot.last_key.lock() = Some(dep);
            let d = effect();
            *slot.cleanup.lock() = Some(d);
        }
        Ok(())
    }

    pub fn request_redraw(&self) {
        self.redraw.request();
    }
}
