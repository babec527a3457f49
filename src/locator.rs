//! Target locator: resolves natural-language element descriptions to pixel
//! coordinates using the vision model.
//!
//! `NotFound` is a normal outcome, not an error - the executor retries it
//! with a fresh screenshot because the screen may have changed (e.g., a
//! spinner finished). Transport and model faults surface separately as
//! `LocatorError` so the executor can apply backoff instead.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::browser::Point;
use crate::vision::{self, VisionConfig, VisionError};

/// Result type for locator operations
pub type LocatorResult = Result<LocateOutcome, LocatorError>;

/// A located element on the screenshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementLocation {
    /// Center of the element in viewport pixels
    pub point: Point,
    /// Approximate element width in pixels, when reported
    pub width: Option<u32>,
    /// Approximate element height in pixels, when reported
    pub height: Option<u32>,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    /// Text visible on the element, when reported
    pub element_text: String,
}

/// Outcome of a locate call. `NotFound` is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum LocateOutcome {
    /// The element was found at the given location
    Found(ElementLocation),
    /// The element is not on the current screenshot
    NotFound {
        /// The model's explanation of what it saw instead
        reason: String,
    },
}

/// Transport or model fault during a locate call (retryable with backoff)
#[derive(Debug)]
pub enum LocatorError {
    /// The vision endpoint failed or returned garbage
    Unavailable(String),
}

impl std::fmt::Display for LocatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocatorError::Unavailable(msg) => write!(f, "Locator unavailable: {}", msg),
        }
    }
}

impl std::error::Error for LocatorError {}

impl From<VisionError> for LocatorError {
    fn from(e: VisionError) -> Self {
        LocatorError::Unavailable(e.to_string())
    }
}

/// Contract for resolving element descriptions to coordinates.
pub trait TargetLocator: Send + Sync {
    /// Find the element matching `description` on `screenshot`.
    fn locate(&self, description: &str, screenshot: &[u8]) -> LocatorResult;
}

/// Vision-model-backed locator.
pub struct VisionLocator {
    config: VisionConfig,
}

impl VisionLocator {
    pub fn new(config: VisionConfig) -> Self {
        Self { config }
    }
}

impl TargetLocator for VisionLocator {
    fn locate(&self, description: &str, screenshot: &[u8]) -> LocatorResult {
        let prompt = build_locate_prompt(description);
        let reply = vision::query_image(&self.config, screenshot, &prompt)?;
        parse_locate_reply(&reply).map_err(LocatorError::from)
    }
}

/// Build the grounding prompt for an element description.
pub fn build_locate_prompt(description: &str) -> String {
    format!(
        r#"Analyze this screenshot and find the UI element matching this description:
"{}"

IMPORTANT: Return ONLY a JSON object with these fields:
- found: boolean (true if element was found)
- x: integer (center x coordinate in pixels)
- y: integer (center y coordinate in pixels)
- width: integer (approximate width in pixels)
- height: integer (approximate height in pixels)
- confidence: float (0.0 to 1.0, how confident you are)
- element_text: string (the actual text on the element if any)
- reason: string (when not found, what you saw instead)

If the element is NOT found, return: {{"found": false, "reason": "..."}}

Respond ONLY with valid JSON, no other text."#,
        description
    )
}

/// Parse the model's locate reply into an outcome.
pub fn parse_locate_reply(reply: &str) -> Result<LocateOutcome, VisionError> {
    let json = vision::extract_json_object(reply)?;

    if !json["found"].as_bool().unwrap_or(false) {
        let reason = json["reason"]
            .as_str()
            .or_else(|| json["reasoning"].as_str())
            .unwrap_or("element not present on screen")
            .to_string();
        return Ok(LocateOutcome::NotFound { reason });
    }

    let x = json["x"]
        .as_u64()
        .ok_or_else(|| VisionError::InvalidResponse("found element without x".to_string()))?;
    let y = json["y"]
        .as_u64()
        .ok_or_else(|| VisionError::InvalidResponse("found element without y".to_string()))?;

    Ok(LocateOutcome::Found(ElementLocation {
        point: Point::new(x as u32, y as u32),
        width: json["width"].as_u64().map(|w| w as u32),
        height: json["height"].as_u64().map(|h| h as u32),
        confidence: json["confidence"].as_f64().unwrap_or(0.5),
        element_text: json["element_text"].as_str().unwrap_or("").to_string(),
    }))
}

/// One scripted response for `ScriptedLocator`.
#[derive(Debug, Clone)]
pub enum LocateScript {
    /// Report the element found at (x, y)
    Found(u32, u32),
    /// Report the element missing
    NotFound,
    /// Fail as a transport error
    Unavailable,
}

impl LocateScript {
    fn into_result(self) -> LocatorResult {
        match self {
            LocateScript::Found(x, y) => Ok(LocateOutcome::Found(ElementLocation {
                point: Point::new(x, y),
                width: Some(100),
                height: Some(30),
                confidence: 0.95,
                element_text: "scripted".to_string(),
            })),
            LocateScript::NotFound => Ok(LocateOutcome::NotFound {
                reason: "scripted miss".to_string(),
            }),
            LocateScript::Unavailable => {
                Err(LocatorError::Unavailable("scripted outage".to_string()))
            }
        }
    }
}

/// A scriptable locator for testing.
///
/// Serves queued responses in order, then repeats a fallback. Records every
/// call so tests can assert attempt counts.
pub struct ScriptedLocator {
    script: Mutex<VecDeque<LocateScript>>,
    fallback: LocateScript,
    calls: Mutex<u32>,
}

impl ScriptedLocator {
    /// A locator that always answers with `fallback`.
    pub fn always(fallback: LocateScript) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(0),
        }
    }

    /// Queue a response served before the fallback kicks in.
    pub fn then(self, script: LocateScript) -> Self {
        self.script.lock().unwrap().push_back(script);
        self
    }

    /// Number of locate calls observed.
    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl TargetLocator for ScriptedLocator {
    fn locate(&self, _description: &str, _screenshot: &[u8]) -> LocatorResult {
        *self.calls.lock().unwrap() += 1;
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_locate_prompt_carries_description() {
        let prompt = build_locate_prompt("the blue 'Submit' button");
        assert!(prompt.contains("the blue 'Submit' button"));
        assert!(prompt.contains("found: boolean"));
    }

    #[test]
    fn test_parse_found_reply() {
        let reply = r#"{"found": true, "x": 450, "y": 320, "width": 120, "height": 40, "confidence": 0.95, "element_text": "Submit"}"#;
        match parse_locate_reply(reply).unwrap() {
            LocateOutcome::Found(loc) => {
                assert_eq!(loc.point, Point::new(450, 320));
                assert_eq!(loc.width, Some(120));
                assert_eq!(loc.element_text, "Submit");
            }
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_found_reply() {
        let reply = r#"{"found": false, "reason": "only a loading spinner is visible"}"#;
        assert_eq!(
            parse_locate_reply(reply).unwrap(),
            LocateOutcome::NotFound {
                reason: "only a loading spinner is visible".to_string()
            }
        );
    }

    #[test]
    fn test_parse_found_without_coordinates_is_invalid() {
        let reply = r#"{"found": true, "confidence": 0.9}"#;
        assert!(parse_locate_reply(reply).is_err());
    }

    #[test]
    fn test_scripted_locator_sequence() {
        let locator = ScriptedLocator::always(LocateScript::Found(10, 10))
            .then(LocateScript::NotFound)
            .then(LocateScript::Unavailable);

        assert!(matches!(
            locator.locate("x", b"png").unwrap(),
            LocateOutcome::NotFound { .. }
        ));
        assert!(locator.locate("x", b"png").is_err());
        assert!(matches!(
            locator.locate("x", b"png").unwrap(),
            LocateOutcome::Found(_)
        ));
        assert_eq!(locator.call_count(), 3);
    }
}
