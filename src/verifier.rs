//! Visual verifier: judges whether a screenshot matches an expected-visual
//! description.
//!
//! A low-confidence or negative match is a normal `passed=false` outcome,
//! never an error. Only transport/model faults surface as `VerifierError`,
//! which the executor retries with backoff.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::config;
use crate::vision::{self, VisionConfig, VisionError};

/// Result type for verifier operations
pub type VerifierResult = Result<Verification, VerifierError>;

/// Judgement of one verification call.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    /// Whether the expected visual is confidently present
    pub passed: bool,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    /// The model's reasoning about the match
    pub explanation: String,
    /// What the model actually observed on screen
    pub actual: Option<String>,
    /// True when the confidence falls between the fail and pass thresholds
    pub uncertain: bool,
}

/// Transport or model fault during verification (retryable with backoff)
#[derive(Debug)]
pub enum VerifierError {
    /// The vision endpoint failed or returned garbage
    Unavailable(String),
}

impl std::fmt::Display for VerifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifierError::Unavailable(msg) => write!(f, "Verifier unavailable: {}", msg),
        }
    }
}

impl std::error::Error for VerifierError {}

impl From<VisionError> for VerifierError {
    fn from(e: VisionError) -> Self {
        VerifierError::Unavailable(e.to_string())
    }
}

/// Contract for judging screenshots against expected-visual descriptions.
pub trait VisualVerifier: Send + Sync {
    /// Judge whether `screenshot` satisfies `expected_visual`.
    fn verify(&self, screenshot: &[u8], expected_visual: &str) -> VerifierResult;
}

/// Vision-model-backed verifier with confidence thresholds.
pub struct VisionJudge {
    config: VisionConfig,
    pass_threshold: f64,
    fail_threshold: f64,
}

impl VisionJudge {
    /// Create a judge with thresholds from the global configuration.
    pub fn new(vision_config: VisionConfig) -> Self {
        let cfg = config::get();
        Self {
            config: vision_config,
            pass_threshold: cfg.vision.pass_threshold,
            fail_threshold: cfg.vision.fail_threshold,
        }
    }

    /// Override the confidence required for a pass.
    pub fn pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }
}

impl VisualVerifier for VisionJudge {
    fn verify(&self, screenshot: &[u8], expected_visual: &str) -> VerifierResult {
        let prompt = build_verify_prompt(expected_visual);
        let reply = vision::query_image(&self.config, screenshot, &prompt)?;
        parse_verify_reply(&reply, self.pass_threshold, self.fail_threshold)
            .map_err(VerifierError::from)
    }
}

/// Build the verification prompt for an expected-visual description.
pub fn build_verify_prompt(expected_visual: &str) -> String {
    format!(
        r#"You are verifying the outcome of a browser QA test step.

EXPECTED VISUAL STATE:
"{}"

Look at the screenshot and judge whether the expected state is present.

RULES:
1. Use ONLY what is visible in the screenshot
2. Consider partial matches as uncertain, not a match
3. Describe what you actually see

Return ONLY a JSON object with these fields:
- matches: boolean (true if the expected state is present)
- confidence: float (0.0 to 1.0)
- actual_description: string (what the screenshot actually shows)
- reasoning: string (why you judged it this way)

Respond ONLY with valid JSON, no other text."#,
        expected_visual
    )
}

/// Parse the model's verify reply into a judgement.
pub fn parse_verify_reply(
    reply: &str,
    pass_threshold: f64,
    fail_threshold: f64,
) -> Result<Verification, VisionError> {
    let json = vision::extract_json_object(reply)?;

    let matches = json["matches"].as_bool().unwrap_or(false);
    let confidence = json["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0);
    let explanation = json["reasoning"]
        .as_str()
        .or_else(|| json["reason"].as_str())
        .unwrap_or("no reasoning provided")
        .to_string();
    let actual = json["actual_description"].as_str().map(|s| s.to_string());

    let passed = matches && confidence >= pass_threshold;
    let uncertain = !passed && confidence >= fail_threshold;

    Ok(Verification { passed, confidence, explanation, actual, uncertain })
}

/// One scripted response for `ScriptedVerifier`.
#[derive(Debug, Clone)]
pub enum VerifyScript {
    /// Report a pass with the given confidence
    Pass(f64),
    /// Report a confident mismatch with the given confidence
    Fail(f64),
    /// Fail as a transport error
    Unavailable,
}

impl VerifyScript {
    fn into_result(self) -> VerifierResult {
        match self {
            VerifyScript::Pass(confidence) => Ok(Verification {
                passed: true,
                confidence,
                explanation: "scripted match".to_string(),
                actual: Some("scripted screen".to_string()),
                uncertain: false,
            }),
            VerifyScript::Fail(confidence) => Ok(Verification {
                passed: false,
                confidence,
                explanation: "scripted mismatch".to_string(),
                actual: Some("scripted screen".to_string()),
                uncertain: false,
            }),
            VerifyScript::Unavailable => {
                Err(VerifierError::Unavailable("scripted outage".to_string()))
            }
        }
    }
}

/// A scriptable verifier for testing.
///
/// Serves queued responses in order, then repeats a fallback. Records every
/// call so tests can assert attempt counts.
pub struct ScriptedVerifier {
    script: Mutex<VecDeque<VerifyScript>>,
    fallback: VerifyScript,
    calls: Mutex<u32>,
}

impl ScriptedVerifier {
    /// A verifier that always answers with `fallback`.
    pub fn always(fallback: VerifyScript) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(0),
        }
    }

    /// Queue a response served before the fallback kicks in.
    pub fn then(self, script: VerifyScript) -> Self {
        self.script.lock().unwrap().push_back(script);
        self
    }

    /// Number of verify calls observed.
    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl VisualVerifier for ScriptedVerifier {
    fn verify(&self, _screenshot: &[u8], _expected_visual: &str) -> VerifierResult {
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
    fn test_verify_prompt_carries_expectation() {
        let prompt = build_verify_prompt("The dashboard shows a welcome banner");
        assert!(prompt.contains("The dashboard shows a welcome banner"));
        assert!(prompt.contains("matches: boolean"));
    }

    #[test]
    fn test_parse_confident_match() {
        let reply = r#"{"matches": true, "confidence": 0.92, "actual_description": "dashboard with banner", "reasoning": "banner text matches"}"#;
        let v = parse_verify_reply(reply, 0.75, 0.5).unwrap();
        assert!(v.passed);
        assert!(!v.uncertain);
        assert_eq!(v.confidence, 0.92);
        assert_eq!(v.actual.as_deref(), Some("dashboard with banner"));
    }

    #[test]
    fn test_parse_low_confidence_is_failed_not_error() {
        let reply = r#"{"matches": false, "confidence": 0.4, "reasoning": "banner missing"}"#;
        let v = parse_verify_reply(reply, 0.75, 0.5).unwrap();
        assert!(!v.passed);
        assert!(!v.uncertain);
        assert_eq!(v.explanation, "banner missing");
    }

    #[test]
    fn test_uncertain_band() {
        // A positive match below the pass threshold lands in the uncertain band.
        let reply = r#"{"matches": true, "confidence": 0.6, "reasoning": "partially visible"}"#;
        let v = parse_verify_reply(reply, 0.75, 0.5).unwrap();
        assert!(!v.passed);
        assert!(v.uncertain);
    }

    #[test]
    fn test_confidence_clamped() {
        let reply = r#"{"matches": true, "confidence": 1.7, "reasoning": "x"}"#;
        let v = parse_verify_reply(reply, 0.75, 0.5).unwrap();
        assert_eq!(v.confidence, 1.0);
    }

    #[test]
    fn test_scripted_verifier_sequence() {
        let verifier = ScriptedVerifier::always(VerifyScript::Pass(0.9))
            .then(VerifyScript::Unavailable);
        assert!(verifier.verify(b"png", "x").is_err());
        assert!(verifier.verify(b"png", "x").unwrap().passed);
        assert_eq!(verifier.call_count(), 2);
    }
}
