//! # Retained image surfaces
//!
//! Image widgets built on `retain-core`'s state store.
//!
//! - [`BoundSurface`]: pixels plus the texture they were uploaded to, rebound
//!   only when the content hash changes.
//! - [`StatefulSurface`]: a `BoundSurface` filled by a background fetch,
//!   tracked by a small `Idle / Loading / Success / Failure` machine.
//! - [`SurfaceLoader`]s: files, in-memory bytes, URLs, solid colors.
//! - [`TextureBackend`]: where pixels go. [`MemoryBackend`] records uploads
//!   in-process and is what tests and demos use.
//!
//! Both surface types implement [`retain_core::Disposable`], so storing one
//! under a widget key releases its texture when the widget stops appearing.

pub mod backend;
pub mod error;
pub mod loader;
pub mod stateful;
pub mod surface;

pub use backend::*;
pub use error::*;
pub use loader::*;
pub use stateful::*;
pub use surface::*;
