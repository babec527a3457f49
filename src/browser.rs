//! Browser session abstraction for action primitives.
//!
//! This module provides a unified interface over browser automation:
//! - `BrowserSession` is the contract the engine requires from a driver
//!   (navigate, click-at-coordinates, type-text, scroll, screenshots, ...)
//! - `MockBrowser` is a scriptable in-memory session for testing
//!
//! Primitives never retry internally; retry policy belongs to the step
//! executor. Each primitive mutates live page state, so callers must hold
//! the session exclusively for the duration of a run.

use image::{ImageBuffer, Rgb, RgbImage};
use std::collections::VecDeque;
use std::io::Cursor;

use crate::plan::ScrollDirection;

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Errors a browser primitive can signal
#[derive(Debug)]
pub enum BrowserError {
    /// The target element detached or became non-interactable
    TargetUnavailable(String),

    /// Navigation failed (DNS, timeout, ...); transient
    Navigation(String),

    /// The session is no longer usable; fatal, never retried
    SessionClosed,

    /// I/O error from the driver transport
    Io(std::io::Error),
}

impl std::fmt::Display for BrowserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserError::TargetUnavailable(msg) => write!(f, "Target unavailable: {}", msg),
            BrowserError::Navigation(msg) => write!(f, "Navigation error: {}", msg),
            BrowserError::SessionClosed => write!(f, "Browser session closed"),
            BrowserError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for BrowserError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrowserError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BrowserError {
    fn from(e: std::io::Error) -> Self {
        BrowserError::Io(e)
    }
}

/// Pixel coordinates on the page viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Contract the execution engine requires from a browser driver.
///
/// Implementations wrap a live automation backend (CDP, WebDriver, ...).
/// All methods are synchronous from the caller's perspective and must not
/// retry internally.
pub trait BrowserSession: Send {
    /// Navigate to a literal URL.
    fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    /// Click at viewport coordinates.
    fn click_at(&mut self, point: Point) -> BrowserResult<()>;

    /// Type text into the currently focused element.
    fn type_text(&mut self, text: &str) -> BrowserResult<()>;

    /// Press a key combination (e.g., "Control+A").
    fn key_combination(&mut self, keys: &str) -> BrowserResult<()>;

    /// Scroll the page.
    fn scroll(&mut self, direction: ScrollDirection, amount_px: u32) -> BrowserResult<()>;

    /// Move the pointer to viewport coordinates without clicking.
    fn hover_at(&mut self, point: Point) -> BrowserResult<()>;

    /// Drag from one point to another.
    fn drag(&mut self, from: Point, to: Point) -> BrowserResult<()>;

    /// Browser history back.
    fn go_back(&mut self) -> BrowserResult<()>;

    /// Browser history forward.
    fn go_forward(&mut self) -> BrowserResult<()>;

    /// Open the default search engine page.
    fn open_search(&mut self) -> BrowserResult<()>;

    /// Capture the current viewport as PNG bytes.
    fn screenshot(&mut self) -> BrowserResult<Vec<u8>>;

    /// Whether the session is still usable.
    fn is_alive(&self) -> bool;

    /// Close the session and release the underlying driver.
    fn close(&mut self) -> BrowserResult<()>;
}

/// Failure a `MockBrowser` can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    TargetUnavailable,
    Navigation,
    SessionClosed,
}

impl ScriptedFailure {
    fn to_error(self) -> BrowserError {
        match self {
            ScriptedFailure::TargetUnavailable => {
                BrowserError::TargetUnavailable("scripted".to_string())
            }
            ScriptedFailure::Navigation => BrowserError::Navigation("scripted".to_string()),
            ScriptedFailure::SessionClosed => BrowserError::SessionClosed,
        }
    }
}

/// A scriptable in-memory browser session for testing.
///
/// Records every primitive invocation, serves synthetic PNG screenshots
/// whose content changes as actions accumulate, and can be scripted to fail
/// upcoming primitives in order.
#[derive(Debug)]
pub struct MockBrowser {
    /// Log of performed primitives, in order
    actions: Vec<String>,
    /// Failures to inject into upcoming primitives, consumed front-first
    scripted: VecDeque<ScriptedFailure>,
    alive: bool,
    width: u32,
    height: u32,
}

impl MockBrowser {
    /// Create a mock session with a 1280x800 viewport.
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            scripted: VecDeque::new(),
            alive: true,
            width: 1280,
            height: 800,
        }
    }

    /// Queue a failure for the next primitive invocation.
    pub fn script_failure(&mut self, failure: ScriptedFailure) -> &mut Self {
        self.scripted.push_back(failure);
        self
    }

    /// Log of performed primitives (e.g., `"navigate https://example.com"`).
    pub fn action_log(&self) -> &[String] {
        &self.actions
    }

    /// Number of primitives performed so far.
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    fn perform(&mut self, description: String) -> BrowserResult<()> {
        if !self.alive {
            return Err(BrowserError::SessionClosed);
        }
        if let Some(failure) = self.scripted.pop_front() {
            if failure == ScriptedFailure::SessionClosed {
                self.alive = false;
            }
            return Err(failure.to_error());
        }
        self.actions.push(description);
        Ok(())
    }
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserSession for MockBrowser {
    fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.perform(format!("navigate {}", url))
    }

    fn click_at(&mut self, point: Point) -> BrowserResult<()> {
        self.perform(format!("click_at {},{}", point.x, point.y))
    }

    fn type_text(&mut self, text: &str) -> BrowserResult<()> {
        self.perform(format!("type_text {}", text))
    }

    fn key_combination(&mut self, keys: &str) -> BrowserResult<()> {
        self.perform(format!("key_combination {}", keys))
    }

    fn scroll(&mut self, direction: ScrollDirection, amount_px: u32) -> BrowserResult<()> {
        self.perform(format!("scroll {:?} {}", direction, amount_px))
    }

    fn hover_at(&mut self, point: Point) -> BrowserResult<()> {
        self.perform(format!("hover_at {},{}", point.x, point.y))
    }

    fn drag(&mut self, from: Point, to: Point) -> BrowserResult<()> {
        self.perform(format!("drag {},{} -> {},{}", from.x, from.y, to.x, to.y))
    }

    fn go_back(&mut self) -> BrowserResult<()> {
        self.perform("go_back".to_string())
    }

    fn go_forward(&mut self) -> BrowserResult<()> {
        self.perform("go_forward".to_string())
    }

    fn open_search(&mut self) -> BrowserResult<()> {
        self.perform("open_search".to_string())
    }

    fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        if !self.alive {
            return Err(BrowserError::SessionClosed);
        }
        // Shade varies with the action count so consecutive captures differ,
        // the way a live page would after each action.
        let shade = (self.actions.len() as u32 * 16 % 256) as u8;
        let img: RgbImage =
            ImageBuffer::from_pixel(self.width, self.height, Rgb([shade, shade, 64]));
        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png)
            .map_err(|e| BrowserError::Io(std::io::Error::other(e.to_string())))?;
        Ok(png)
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn close(&mut self) -> BrowserResult<()> {
        self.alive = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_actions() {
        let mut browser = MockBrowser::new();
        browser.navigate("https://example.com").unwrap();
        browser.click_at(Point::new(10, 20)).unwrap();
        assert_eq!(
            browser.action_log(),
            &["navigate https://example.com".to_string(), "click_at 10,20".to_string()]
        );
    }

    #[test]
    fn test_scripted_failure_consumed_in_order() {
        let mut browser = MockBrowser::new();
        browser.script_failure(ScriptedFailure::Navigation);

        let err = browser.navigate("https://example.com").unwrap_err();
        assert!(matches!(err, BrowserError::Navigation(_)));

        // Next attempt succeeds once the script is drained.
        browser.navigate("https://example.com").unwrap();
        assert_eq!(browser.action_count(), 1);
    }

    #[test]
    fn test_session_closed_is_sticky() {
        let mut browser = MockBrowser::new();
        browser.script_failure(ScriptedFailure::SessionClosed);

        assert!(matches!(browser.go_back().unwrap_err(), BrowserError::SessionClosed));
        assert!(!browser.is_alive());
        assert!(matches!(browser.go_back().unwrap_err(), BrowserError::SessionClosed));
        assert!(matches!(browser.screenshot().unwrap_err(), BrowserError::SessionClosed));
    }

    #[test]
    fn test_screenshots_change_with_actions() {
        let mut browser = MockBrowser::new();
        let before = browser.screenshot().unwrap();
        browser.click_at(Point::new(1, 1)).unwrap();
        let after = browser.screenshot().unwrap();
        assert_ne!(before, after);
    }
}
