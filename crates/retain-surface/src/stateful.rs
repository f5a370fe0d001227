//! # Asynchronous surface loading
//!
//! `StatefulSurface` wraps a [`BoundSurface`] with a small state machine so a
//! widget can start a slow fetch and keep rendering while it runs:
//!
//! ```text
//! Idle ──load_surface──▶ Loading ──fetch ok──▶ Success
//!                           │                     │
//!                           └──fetch err──▶ Failure
//! Success | Failure ──reset──▶ Idle
//! ```
//!
//! The fetch runs on its own thread. When it completes, the result is applied
//! under the machine's lock, the matching callback runs, and a redraw is
//! requested. `dispose` (called when the owning state entry is swept) cancels
//! the pending completion: a fetch that finishes afterwards changes nothing and
//! calls nothing.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use retain_core::*;
//! use retain_surface::*;
//!
//! let backend: Arc<dyn TextureBackend> = Arc::new(MemoryBackend::new());
//! let mut rt = Runtime::default();
//! rt.run_frame(|cx| -> Result<(), FrameError> {
//!     let image = StatefulSurface::remember(cx, None, "AsyncImage", backend.clone())?;
//!     if image.state() == LoadState::Idle {
//!         let _ = image.load_surface(UrlLoader::new("https://example.com/gopher.png"));
//!     }
//!     Ok(())
//! })
//! .unwrap();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use image::RgbaImage;
use parking_lot::{Mutex, ReentrantMutex};
use retain_core::{BuildCx, Disposable, RedrawHandle, StateError};

use crate::backend::{TextureBackend, TextureId};
use crate::error::{LoadError, LoadStateError};
use crate::loader::SurfaceLoader;
use crate::surface::BoundSurface;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Success,
    Failure,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadState::Idle => "idle",
            LoadState::Loading => "loading",
            LoadState::Success => "loaded",
            LoadState::Failure => "failed",
        };
        f.write_str(s)
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;
type FailureCallback = Arc<dyn Fn(&LoadError) + Send + Sync>;

#[derive(Default, Clone)]
struct Callbacks {
    on_reset: Option<Callback>,
    on_loading: Option<Callback>,
    on_success: Option<Callback>,
    on_failure: Option<FailureCallback>,
}

struct Machine {
    state: LoadState,
    last_error: Option<Arc<LoadError>>,
    /// Cancellation flag of the in-flight fetch.
    cancel: Option<Arc<AtomicBool>>,
    disposed: bool,
    callbacks: Callbacks,
}

pub struct StatefulSurface {
    surface: BoundSurface,
    machine: Mutex<Machine>,
    // Held while callbacks run; `dispose` takes it too, so no callback
    // starts after `dispose` returns. Re-entrant so callbacks may call back
    // into the surface.
    dispatch: ReentrantMutex<()>,
    redraw: Option<RedrawHandle>,
}

impl StatefulSurface {
    pub fn new(backend: Arc<dyn TextureBackend>) -> Self {
        Self::from_surface(BoundSurface::new(backend))
    }

    pub fn from_surface(surface: BoundSurface) -> Self {
        Self {
            surface,
            machine: Mutex::new(Machine {
                state: LoadState::Idle,
                last_error: None,
                cancel: None,
                disposed: false,
                callbacks: Callbacks::default(),
            }),
            dispatch: ReentrantMutex::new(()),
            redraw: None,
        }
    }

    /// Requests a redraw on `redraw` whenever a fetch completes.
    pub fn with_redraw(mut self, redraw: RedrawHandle) -> Self {
        self.redraw = Some(redraw);
        self
    }

    /// The surface stored under the widget's key, created on first use.
    pub fn remember(
        cx: &mut BuildCx<'_>,
        explicit: Option<&str>,
        discriminator: &str,
        backend: Arc<dyn TextureBackend>,
    ) -> Result<Arc<Self>, StateError> {
        let key = cx.key(explicit, discriminator);
        let redraw = cx.redraw_handle();
        cx.remember(&key, || Self::new(backend).with_redraw(redraw))
    }

    pub fn state(&self) -> LoadState {
        self.machine.lock().state
    }

    /// Error of the last failed fetch; cleared by `reset`.
    pub fn last_error(&self) -> Option<Arc<LoadError>> {
        self.machine.lock().last_error.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.machine.lock().disposed
    }

    pub fn surface(&self) -> &BoundSurface {
        &self.surface
    }

    /// Commits the surface and returns its texture. Call from the build
    /// thread.
    pub fn texture(&self) -> TextureId {
        self.surface.texture()
    }

    pub fn on_reset(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.machine.lock().callbacks.on_reset = Some(Arc::new(f));
        self
    }

    pub fn on_loading(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.machine.lock().callbacks.on_loading = Some(Arc::new(f));
        self
    }

    pub fn on_success(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.machine.lock().callbacks.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_failure(&self, f: impl Fn(&LoadError) + Send + Sync + 'static) -> &Self {
        self.machine.lock().callbacks.on_failure = Some(Arc::new(f));
        self
    }

    /// Starts fetching with `loader` on a background thread.
    ///
    /// Only allowed from `Idle`; otherwise the state is left alone and
    /// `AlreadyLoading` is returned.
    pub fn load_surface(
        self: &Arc<Self>,
        loader: impl SurfaceLoader + 'static,
    ) -> Result<(), LoadStateError> {
        let _dispatch = self.dispatch.lock();
        let cancel = Arc::new(AtomicBool::new(false));
        let on_loading = {
            let mut m = self.machine.lock();
            if m.disposed {
                return Err(LoadStateError::Disposed);
            }
            if m.state != LoadState::Idle {
                return Err(LoadStateError::AlreadyLoading { state: m.state });
            }
            m.state = LoadState::Loading;
            m.cancel = Some(cancel.clone());
            m.callbacks.on_loading.clone()
        };
        if let Some(cb) = on_loading {
            cb();
        }

        let this: Weak<Self> = Arc::downgrade(self);
        let task_cancel = cancel.clone();
        let spawned = std::thread::Builder::new()
            .name("retain-surface-load".into())
            .spawn(move || {
                let result = loader.fetch();
                match this.upgrade() {
                    Some(this) => this.complete(&task_cancel, result),
                    None => log::debug!("surface dropped before its fetch completed"),
                }
            });
        if let Err(source) = spawned {
            self.complete(
                &cancel,
                Err(LoadError::Io {
                    path: "<loader thread>".into(),
                    source,
                }),
            );
        }
        Ok(())
    }

    /// Returns a finished surface to `Idle`.
    ///
    /// Fails with `StillLoading` while a fetch is in flight, since its result
    /// would land on a surface that has moved on. Resetting an idle surface
    /// does nothing.
    pub fn reset(&self) -> Result<(), LoadStateError> {
        let _dispatch = self.dispatch.lock();
        let on_reset = {
            let mut m = self.machine.lock();
            match m.state {
                LoadState::Idle => return Ok(()),
                LoadState::Loading => return Err(LoadStateError::StillLoading),
                LoadState::Success | LoadState::Failure => {
                    m.state = LoadState::Idle;
                    m.last_error = None;
                    m.callbacks.on_reset.clone()
                }
            }
        };
        if let Some(cb) = on_reset {
            cb();
        }
        Ok(())
    }

    fn complete(&self, cancel: &AtomicBool, result: Result<RgbaImage, LoadError>) {
        let _dispatch = self.dispatch.lock();
        let outcome = {
            let mut m = self.machine.lock();
            if cancel.load(Ordering::Acquire) || m.disposed {
                log::debug!("discarding fetch result for a disposed surface");
                return;
            }
            m.cancel = None;
            let applied = result.and_then(|pixels| self.surface.set_pixels(pixels, false));
            match applied {
                Ok(()) => {
                    m.state = LoadState::Success;
                    Ok(m.callbacks.on_success.clone())
                }
                Err(err) => {
                    log::warn!("surface load failed: {err}");
                    let err = Arc::new(err);
                    m.state = LoadState::Failure;
                    m.last_error = Some(err.clone());
                    Err((err, m.callbacks.on_failure.clone()))
                }
            }
        };

        match outcome {
            Ok(Some(cb)) => cb(),
            Err((err, Some(cb))) => cb(err.as_ref()),
            Ok(None) | Err((_, None)) => {}
        }
        if let Some(redraw) = &self.redraw {
            redraw.request();
        }
    }
}

impl Disposable for StatefulSurface {
    fn dispose(&self) {
        let _dispatch = self.dispatch.lock();
        {
            let mut m = self.machine.lock();
            if let Some(cancel) = m.cancel.take() {
                cancel.store(true, Ordering::Release);
                log::debug!("cancelled in-flight surface fetch");
            }
            m.disposed = true;
            m.callbacks = Callbacks::default();
        }
        self.surface.dispose();
    }
}

impl fmt::Debug for StatefulSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.machine.lock();
        f.debug_struct("StatefulSurface")
            .field("state", &m.state)
            .field("last_error", &m.last_error)
            .field("disposed", &m.disposed)
            .field("surface", &self.surface)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::loader::UniformLoader;
    use image::Rgba;
    use retain_core::{Color, FrameError, Runtime};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    const DEADLINE: Duration = Duration::from_secs(5);

    fn new_surface() -> (Arc<MemoryBackend>, Arc<StatefulSurface>) {
        let backend = Arc::new(MemoryBackend::new());
        let surface = Arc::new(StatefulSurface::new(backend.clone()));
        (backend, surface)
    }

    fn wait_for(surface: &StatefulSurface, want: LoadState) {
        let start = Instant::now();
        while surface.state() != want {
            assert!(
                start.elapsed() < DEADLINE,
                "timed out waiting for {want}, still {}",
                surface.state()
            );
            std::thread::yield_now();
        }
    }

    /// Sends on drop. The loader thread drops its loader only after the
    /// completion has run, so this marks the end of the background task.
    struct Finished(mpsc::Sender<()>);

    impl Drop for Finished {
        fn drop(&mut self) {
            let _ = self.0.send(());
        }
    }

    struct Gate {
        release: mpsc::Sender<()>,
        finished: mpsc::Receiver<()>,
    }

    impl Gate {
        /// Lets the fetch return and waits until its completion has run.
        fn release_and_join(self) {
            self.release.send(()).unwrap();
            self.finished.recv_timeout(DEADLINE).unwrap();
        }
    }

    /// Loader that blocks until the test releases its gate.
    fn gated_loader(result: Result<RgbaImage, String>) -> (Gate, impl SurfaceLoader + 'static) {
        let (release, gate_rx) = mpsc::channel::<()>();
        let (finished_tx, finished) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let finished_tx = Finished(finished_tx);
        let loader = move || {
            let _ = &finished_tx;
            let _ = gate_rx.lock().recv_timeout(DEADLINE);
            result.clone().map_err(LoadError::Other)
        };
        (Gate { release, finished }, loader)
    }

    #[test]
    fn test_load_success_applies_pixels() {
        let (backend, surface) = new_surface();
        let successes = Arc::new(AtomicUsize::new(0));
        let loading = Arc::new(AtomicUsize::new(0));
        {
            let successes = successes.clone();
            let loading = loading.clone();
            surface
                .on_success(move || {
                    successes.fetch_add(1, Ordering::SeqCst);
                })
                .on_loading(move || {
                    loading.fetch_add(1, Ordering::SeqCst);
                });
        }

        surface
            .load_surface(UniformLoader::new(6, 2, Color::from_rgb(1, 2, 3)))
            .unwrap();
        assert_eq!(loading.load(Ordering::SeqCst), 1);
        wait_for(&surface, LoadState::Success);

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert!(surface.last_error().is_none());
        assert_eq!(surface.surface().size(), (6, 2));
        // Background completion does not bind; the build thread does.
        assert_eq!(backend.binds(), 0);
        let tex = surface.texture();
        assert_eq!(backend.size_of(tex), Some((6, 2)));
    }

    #[test]
    fn test_load_failure_records_error() {
        let (_, surface) = new_surface();
        let (tx, rx) = mpsc::channel::<String>();
        surface.on_failure(move |err| {
            let _ = tx.send(err.to_string());
        });

        surface
            .load_surface(|| -> Result<RgbaImage, LoadError> {
                Err(LoadError::Other("connection refused".into()))
            })
            .unwrap();

        let reported = rx.recv_timeout(DEADLINE).unwrap();
        assert_eq!(reported, "connection refused");
        wait_for(&surface, LoadState::Failure);
        let err = surface.last_error().unwrap();
        assert!(matches!(*err, LoadError::Other(_)));
    }

    #[test]
    fn test_load_and_reset_rejected_while_loading() {
        let (_, surface) = new_surface();
        let (gate, loader) = gated_loader(Ok(RgbaImage::from_pixel(1, 1, Rgba([0; 4]))));
        surface.load_surface(loader).unwrap();
        assert_eq!(surface.state(), LoadState::Loading);

        let again = surface.load_surface(UniformLoader::new(1, 1, Color::WHITE));
        assert_eq!(
            again,
            Err(LoadStateError::AlreadyLoading {
                state: LoadState::Loading
            })
        );
        assert_eq!(surface.reset(), Err(LoadStateError::StillLoading));
        assert_eq!(surface.state(), LoadState::Loading);

        gate.release_and_join();
        assert_eq!(surface.state(), LoadState::Success);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let (_, surface) = new_surface();
        let resets = Arc::new(AtomicUsize::new(0));
        {
            let resets = resets.clone();
            surface.on_reset(move || {
                resets.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Idle reset is a no-op.
        surface.reset().unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 0);

        surface
            .load_surface(|| -> Result<RgbaImage, LoadError> { Err(LoadError::Other("x".into())) })
            .unwrap();
        wait_for(&surface, LoadState::Failure);

        assert_eq!(
            surface.load_surface(UniformLoader::new(1, 1, Color::WHITE)),
            Err(LoadStateError::AlreadyLoading {
                state: LoadState::Failure
            })
        );

        surface.reset().unwrap();
        assert_eq!(surface.state(), LoadState::Idle);
        assert!(surface.last_error().is_none());
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        surface
            .load_surface(UniformLoader::new(1, 1, Color::WHITE))
            .unwrap();
        wait_for(&surface, LoadState::Success);
    }

    #[test]
    fn test_dispose_ignores_late_completion() {
        let (backend, surface) = new_surface();
        let callbacks = Arc::new(AtomicUsize::new(0));
        {
            let on_success = callbacks.clone();
            let on_failure = callbacks.clone();
            surface
                .on_success(move || {
                    on_success.fetch_add(1, Ordering::SeqCst);
                })
                .on_failure(move |_| {
                    on_failure.fetch_add(1, Ordering::SeqCst);
                });
        }
        let (gate, loader) = gated_loader(Ok(RgbaImage::from_pixel(2, 2, Rgba([7; 4]))));
        surface.load_surface(loader).unwrap();

        surface.dispose();
        assert!(surface.is_disposed());
        gate.release_and_join();

        assert_eq!(surface.state(), LoadState::Loading);
        assert!(surface.surface().pixels().is_none());
        assert_eq!(callbacks.load(Ordering::SeqCst), 0);
        assert_eq!(backend.live(), 0);

        // A disposed surface keeps handing out no texture.
        assert_eq!(surface.texture(), TextureId::NONE);
        assert_eq!(backend.live(), 0);

        assert_eq!(
            surface.load_surface(UniformLoader::new(1, 1, Color::WHITE)),
            Err(LoadStateError::Disposed)
        );
    }

    #[test]
    fn test_completion_requests_redraw() {
        let backend: Arc<dyn TextureBackend> = Arc::new(MemoryBackend::new());
        let redraw = RedrawHandle::new();
        let surface = Arc::new(StatefulSurface::new(backend).with_redraw(redraw.clone()));
        surface
            .load_surface(UniformLoader::new(1, 1, Color::BLACK))
            .unwrap();
        wait_for(&surface, LoadState::Success);

        let start = Instant::now();
        while !redraw.is_pending() {
            assert!(start.elapsed() < DEADLINE);
            std::thread::yield_now();
        }
    }

    #[test]
    fn test_swept_widget_cancels_its_fetch() {
        let backend = Arc::new(MemoryBackend::new());
        let mut rt = Runtime::default();
        let (gate, loader) = gated_loader(Ok(RgbaImage::from_pixel(1, 1, Rgba([1; 4]))));
        let mut loader = Some(loader);

        let image = rt
            .run_frame(|cx| -> Result<Arc<StatefulSurface>, FrameError> {
                let image = StatefulSurface::remember(cx, None, "AsyncImage", backend.clone())?;
                if let Some(loader) = loader.take() {
                    image.load_surface(loader).unwrap();
                }
                image.texture();
                Ok(image)
            })
            .unwrap();
        assert_eq!(rt.store().keys(), vec!["AsyncImage_0".to_string()]);
        assert_eq!(backend.live(), 1);

        // The image widget is gone in the next frame.
        rt.run_frame(|_| Ok::<_, FrameError>(())).unwrap();
        assert!(image.is_disposed());
        assert_eq!(backend.live(), 0);

        gate.release_and_join();
        assert_eq!(image.state(), LoadState::Loading);
        assert!(image.surface().pixels().is_none());
        assert!(!rt.take_redraw());

        // Still held by the caller after the sweep: no texture leaks.
        assert_eq!(image.texture(), TextureId::NONE);
        assert_eq!(backend.live(), 0);
    }
}
