//! # UI Snapshot Domain Types
//!
//! Flat descriptors of interactive on-screen widgets, as produced by the UI
//! snapshot layer in `droidwalk-device` and consumed by the exploration graph.
//!
//! These live in the core crate because both the device layer (which parses
//! `uiautomator` dumps) and the graph (which stores element attributes) use them.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `[left,top][right,bottom]` as written by uiautomator
static BOUNDS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]$").expect("Invalid bounds regex")
});

/// Screen rectangle of a widget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Parse the uiautomator `bounds` attribute
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = BOUNDS_PATTERN.captures(raw.trim())?;
        let n = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<i32>().ok());
        Some(Self::new(n(1)?, n(2)?, n(3)?, n(4)?))
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{}][{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// One interactive widget from a UI snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiElement {
    pub resource_id: String,
    pub class_name: String,
    pub text: String,
    pub content_description: String,
    pub bounds: Bounds,
    pub clickable: bool,
    pub long_clickable: bool,
    pub checkable: bool,
    pub scrollable: bool,
}

impl UiElement {
    /// Last segment of the class name, lowercased ("android.widget.Button" -> "button")
    pub fn short_class(&self) -> String {
        self.class_name
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }

    /// Text fields receive generated input instead of a tap
    pub fn is_editable(&self) -> bool {
        self.class_name.ends_with("EditText")
    }

    /// Whether any interaction is possible at all
    pub fn is_interactive(&self) -> bool {
        self.clickable || self.long_clickable || self.checkable || self.scrollable
    }

    /// Selector equality used when re-locating a widget in a fresh snapshot
    pub fn same_widget(&self, other: &UiElement) -> bool {
        self.resource_id == other.resource_id
            && self.class_name == other.class_name
            && self.text == other.text
    }
}
