pub use crate::color::Color;
pub use crate::effects::{Disposable, Dispose, StateCell, on_unmount};
pub use crate::error::{FrameError, StateError};
pub use crate::identity::{IdentityAllocator, WidgetKey};
pub use crate::runtime::{
    BuildCx, FramePhase, FrameReport, RedrawHandle, Runtime, RuntimeConfig,
};
pub use crate::state::StateStore;
