//! # Persistent state for rebuilt-every-frame widgets
//!
//! Retain widgets are plain values that are thrown away and rebuilt every
//! frame. Some of them still need state that outlives a frame: a text cursor,
//! an open flag, an image that is loading in the background. This crate gives
//! them that state without a retained widget tree. There are three pieces:
//!
//! - `IdentityAllocator`: turns a widget's position in the build pass (or an
//!   explicit id) into a string key.
//! - `StateStore`: key → payload cache with mark-and-sweep eviction.
//! - `Runtime`: runs each frame as invalidate, build, sweep.
//!
//! ## Keys
//!
//! ```rust
//! use retain_core::*;
//!
//! let mut ids = IdentityAllocator::new();
//! assert_eq!(ids.assign_key(None, "X"), "X_0");
//! assert_eq!(ids.assign_key(None, "X"), "X_1");
//! ```
//!
//! Positional keys depend on build order. Widgets that appear conditionally
//! should carry an explicit id.
//!
//! ## Stored state
//!
//! Every payload implements `Disposable`. The store calls `dispose` exactly
//! once when the widget that owns the entry stops asking for it:
//!
//! ```rust
//! use retain_core::*;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Cursor {
//!     pos: StateCell<usize>,
//!     released: Arc<AtomicUsize>,
//! }
//!
//! impl Disposable for Cursor {
//!     fn dispose(&self) {
//!         self.released.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let released = Arc::new(AtomicUsize::new(0));
//! let mut rt = Runtime::default();
//!
//! rt.run_frame(|cx| -> Result<(), FrameError> {
//!     let key = cx.key(Some("editor"), "InputText");
//!     let cursor = cx.remember(&key, || Cursor {
//!         pos: StateCell::new(0),
//!         released: released.clone(),
//!     })?;
//!     cursor.pos.set(5);
//!     Ok(())
//! })
//! .unwrap();
//!
//! // The editor is not built this frame, so its state is swept.
//! rt.run_frame(|_| Ok::<_, FrameError>(())).unwrap();
//! assert_eq!(released.load(Ordering::SeqCst), 1);
//! ```
//!
//! ## Effects and cleanup
//!
//! `BuildCx::disposable_effect` ties a side effect to a store entry: it runs
//! again when its dependency changes and its cleanup runs when the entry is
//! swept. Long-running work (network, disk) belongs on a background task whose
//! owning payload cancels it in `dispose`; see the `retain-surface` crate.

pub mod color;
pub mod effects;
pub mod error;
pub mod identity;
pub mod prelude;
pub mod runtime;
pub mod state;

pub use color::*;
pub use effects::*;
pub use error::*;
pub use identity::*;
pub use runtime::*;
pub use state::*;
