//! # Widget identity
//!
//! Widgets are rebuilt every frame, so the only thing that ties a widget to
//! its stored state is the key it asks for. A key is either explicit (the
//! caller names the widget) or positional: the widget's discriminator plus a
//! per-frame counter value.
//!
//! ```rust
//! use retain_core::IdentityAllocator;
//!
//! let mut ids = IdentityAllocator::new();
//! assert_eq!(ids.assign_key(None, "Button"), "Button_0");
//! assert_eq!(ids.assign_key(Some("save"), "Button"), "save");
//! assert_eq!(ids.assign_key(None, "Slider"), "Slider_1");
//!
//! ids.reset();
//! assert_eq!(ids.assign_key(None, "Button"), "Button_0");
//! ```
//!
//! Positional keys are only stable while the sequence of key requests is the
//! same from frame to frame. If a widget is built conditionally without an
//! explicit id, every positional key after it shifts and the later widgets
//! pick up (or miss) state by position. Give such widgets explicit ids.

use std::fmt;

/// Identity of one widget instance within a frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WidgetKey {
    Explicit(String),
    Positional {
        discriminator: String,
        index: usize,
    },
}

impl WidgetKey {
    pub fn is_explicit(&self) -> bool {
        matches!(self, WidgetKey::Explicit(_))
    }
}

impl fmt::Display for WidgetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidgetKey::Explicit(id) => f.write_str(id),
            WidgetKey::Positional {
                discriminator,
                index,
            } => write!(f, "{discriminator}_{index}"),
        }
    }
}

impl From<WidgetKey> for String {
    fn from(key: WidgetKey) -> Self {
        match key {
            WidgetKey::Explicit(id) => id,
            positional => positional.to_string(),
        }
    }
}

/// Per-frame positional counter.
#[derive(Debug, Default)]
pub struct IdentityAllocator {
    counter: usize,
}

impl IdentityAllocator {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// Must run once before every build pass.
    pub fn reset(&mut self) {
        self.counter = 0;
    }

    pub fn next(&mut self) -> usize {
        let index = self.counter;
        self.counter += 1;
        index
    }

    /// Number of positional keys handed out since the last reset.
    pub fn issued(&self) -> usize {
        self.counter
    }

    /// Explicit ids are returned as-is and do not consume a counter value.
    pub fn assign(&mut self, explicit: Option<&str>, discriminator: &str) -> WidgetKey {
        match explicit {
            Some(id) => WidgetKey::Explicit(id.to_owned()),
            None => WidgetKey::Positional {
                discriminator: discriminator.to_owned(),
                index: self.next(),
            },
        }
    }

    pub fn assign_key(&mut self, explicit: Option<&str>, discriminator: &str) -> String {
        self.assign(explicit, discriminator).into()
    }
}
