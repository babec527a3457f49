//! Test plan data model: declarative steps, action kinds, and plan validation.
//!
//! A plan is an ordered list of steps. Each step names an action, a target
//! (a literal such as a URL, or a natural-language description of a UI
//! element), an optional value payload, and a required expected-visual
//! description used for verification. No coordinates, no CSS selectors —
//! targeting is semantic and resolved at execution time by the locator.
//!
//! The wire encoding is flat (`StepRecord`); internally each action kind
//! carries only the fields it needs (`Action`), so the executor can match
//! exhaustively.

use serde::{Deserialize, Serialize};

/// Wire-level action kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Navigate,
    Click,
    Input,
    Scroll,
    Wait,
    Verify,
    KeyCombination,
    Drag,
    Hover,
    Search,
    GoBack,
    GoForward,
}

impl ActionKind {
    /// Human-readable name matching the wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Input => "input",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
            ActionKind::Verify => "verify",
            ActionKind::KeyCombination => "key-combination",
            ActionKind::Drag => "drag",
            ActionKind::Hover => "hover",
            ActionKind::Search => "search",
            ActionKind::GoBack => "go-back",
            ActionKind::GoForward => "go-forward",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a step names the element it acts on.
///
/// `Literal` and `Description` are mutually exclusive on the wire: a step
/// carries `target` or `target_description`, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A literal target the browser can use directly (e.g., a URL).
    Literal(String),
    /// A natural-language description resolved by the locator at run time.
    Description(String),
}

impl Target {
    /// The description text, if this target needs visual resolution.
    pub fn description(&self) -> Option<&str> {
        match self {
            Target::Description(d) => Some(d),
            Target::Literal(_) => None,
        }
    }

    /// Display form for logs and intents.
    pub fn display(&self) -> &str {
        match self {
            Target::Literal(t) | Target::Description(t) => t,
        }
    }
}

/// Scroll directions supported by the scroll action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "up" => Some(ScrollDirection::Up),
            "down" => Some(ScrollDirection::Down),
            "left" => Some(ScrollDirection::Left),
            "right" => Some(ScrollDirection::Right),
            _ => None,
        }
    }
}

/// Default wait length when a wait step omits its value (seconds).
const DEFAULT_WAIT_SECONDS: u64 = 5;

/// Ceiling on explicit wait lengths (seconds).
const MAX_WAIT_SECONDS: u64 = 30;

/// A fully typed action, each variant carrying only the fields it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Navigate to a literal URL.
    Navigate { url: String },
    /// Click a target element.
    Click { target: Target },
    /// Type a value into a target field.
    Input { target: Target, value: String },
    /// Scroll the page.
    Scroll { direction: ScrollDirection },
    /// Wait a fixed number of seconds for the page to settle.
    Wait { seconds: u64 },
    /// No browser action; verification only.
    Verify,
    /// Press a key combination (e.g., "Control+A").
    KeyCombination { keys: String },
    /// Drag from a described source to a described destination.
    Drag { source: Target, destination: String },
    /// Hover over a target element.
    Hover { target: Target },
    /// Open the search engine, optionally typing a query.
    Search { query: Option<String> },
    /// Browser history back.
    GoBack,
    /// Browser history forward.
    GoForward,
}

impl Action {
    /// The wire-level kind of this action.
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Navigate { .. } => ActionKind::Navigate,
            Action::Click { .. } => ActionKind::Click,
            Action::Input { .. } => ActionKind::Input,
            Action::Scroll { .. } => ActionKind::Scroll,
            Action::Wait { .. } => ActionKind::Wait,
            Action::Verify => ActionKind::Verify,
            Action::KeyCombination { .. } => ActionKind::KeyCombination,
            Action::Drag { .. } => ActionKind::Drag,
            Action::Hover { .. } => ActionKind::Hover,
            Action::Search { .. } => ActionKind::Search,
            Action::GoBack => ActionKind::GoBack,
            Action::GoForward => ActionKind::GoForward,
        }
    }

    /// The target needing visual resolution, if this action has one.
    pub fn described_target(&self) -> Option<&str> {
        match self {
            Action::Click { target }
            | Action::Input { target, .. }
            | Action::Hover { target } => target.description(),
            Action::Drag { source, .. } => source.description(),
            _ => None,
        }
    }
}

/// A single declarative test step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique positive identifier within the plan.
    pub step_id: u32,
    /// The typed action to perform.
    pub action: Action,
    /// Natural-language description of the expected visual outcome.
    pub expected_visual: String,
}

impl Step {
    /// One-line intent summary for logs. Input values whose target mentions
    /// a password are masked.
    pub fn intent(&self) -> String {
        match &self.action {
            Action::Navigate { url } => format!("Navigate browser to {}", url),
            Action::Click { target } => format!("Click on {}", target.display()),
            Action::Input { target, value } => {
                let shown = if target.display().to_lowercase().contains("password") {
                    "********"
                } else {
                    value.as_str()
                };
                format!("Enter '{}' into {}", shown, target.display())
            }
            Action::Scroll { direction } => format!("Scroll {:?}", direction).to_lowercase(),
            Action::Wait { seconds } => format!("Wait {}s for: {}", seconds, self.expected_visual),
            Action::Verify => format!("Verify visual state: {}", self.expected_visual),
            Action::KeyCombination { keys } => format!("Press keys {}", keys),
            Action::Drag { source, destination } => {
                format!("Drag {} to {}", source.display(), destination)
            }
            Action::Hover { target } => format!("Hover over {}", target.display()),
            Action::Search { query: Some(q) } => format!("Search for '{}'", q),
            Action::Search { query: None } => "Open search engine".to_string(),
            Action::GoBack => "Go back in history".to_string(),
            Action::GoForward => "Go forward in history".to_string(),
        }
    }
}

/// Flat wire encoding of a step.
///
/// Canonical fields: `step_id`, `action`, one of `target` (literal) or
/// `target_description`, optional `value`, and `expected_visual`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Unique positive step identifier
    pub step_id: u32,

    /// Action kind (kebab-case enum string)
    pub action: ActionKind,

    /// Literal target (e.g., a URL for navigate)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Natural-language description of the target element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_description: Option<String>,

    /// Value payload (text to type, keys to press, drag destination, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Expected visual outcome, verified after the action
    pub expected_visual: String,
}

/// A complete test plan.
#[derive(Debug, Clone, PartialEq)]
pub struct TestPlan {
    /// Plan identifier
    pub plan_id: String,
    /// Human description of the scenario
    pub description: String,
    /// Steps in declared execution order
    pub steps: Vec<Step>,
}

impl TestPlan {
    /// Look up a step by its identifier.
    pub fn get_step(&self, step_id: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Position of a step in declared order.
    pub fn position_of(&self, step_id: u32) -> Option<usize> {
        self.steps.iter().position(|s| s.step_id == step_id)
    }
}

/// Wire encoding of a complete plan submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecord {
    /// Plan identifier (`test_case_id` accepted as a legacy alias)
    #[serde(alias = "test_case_id")]
    pub plan_id: String,

    /// Human description of the scenario
    #[serde(default)]
    pub description: String,

    /// Steps in execution order
    pub steps: Vec<StepRecord>,
}

/// Result type for plan operations
pub type PlanResult<T> = Result<T, PlanError>;

/// Validation errors for submitted plans
#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    /// Plan contains no steps
    Empty,
    /// Step identifier is zero (identifiers must be positive)
    NonPositiveStepId,
    /// Two steps share an identifier
    DuplicateStepId(u32),
    /// A required field is missing for the step's action kind
    MissingField { step_id: u32, field: &'static str },
    /// `target` and `target_description` were both supplied
    ConflictingTarget(u32),
    /// A field value could not be interpreted
    InvalidField { step_id: u32, field: &'static str, reason: String },
    /// The submission was not valid JSON for a plan
    Malformed(String),
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanError::Empty => write!(f, "Plan has no steps"),
            PlanError::NonPositiveStepId => write!(f, "Step identifiers must be positive"),
            PlanError::DuplicateStepId(id) => write!(f, "Duplicate step id {}", id),
            PlanError::MissingField { step_id, field } => {
                write!(f, "Step {} is missing required field '{}'", step_id, field)
            }
            PlanError::ConflictingTarget(id) => write!(
                f,
                "Step {} has both 'target' and 'target_description'; they are mutually exclusive",
                id
            ),
            PlanError::InvalidField { step_id, field, reason } => {
                write!(f, "Step {} field '{}' is invalid: {}", step_id, field, reason)
            }
            PlanError::Malformed(msg) => write!(f, "Malformed plan: {}", msg),
        }
    }
}

impl std::error::Error for PlanError {}

/// Synchronous validation response for a plan submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanValidation {
    /// Whether the plan is executable
    pub valid: bool,

    /// Number of steps, when valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<usize>,

    /// Specific rejection reason, when invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanValidation {
    /// Validation result for an accepted plan.
    pub fn accepted(total_steps: usize) -> Self {
        Self { valid: true, total_steps: Some(total_steps), error: None }
    }

    /// Validation result for a rejected plan.
    pub fn rejected(error: impl std::fmt::Display) -> Self {
        Self { valid: false, total_steps: None, error: Some(error.to_string()) }
    }
}

impl TestPlan {
    /// Parse and validate a plan from its JSON wire encoding.
    pub fn from_json(json: &str) -> PlanResult<Self> {
        let record: PlanRecord =
            serde_json::from_str(json).map_err(|e| PlanError::Malformed(e.to_string()))?;
        Self::from_record(record)
    }

    /// Validate a wire-format plan and convert it to the typed model.
    pub fn from_record(record: PlanRecord) -> PlanResult<Self> {
        if record.steps.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut seen = std::collections::HashSet::new();
        let mut steps = Vec::with_capacity(record.steps.len());
        for rec in record.steps {
            if rec.step_id == 0 {
                return Err(PlanError::NonPositiveStepId);
            }
            if !seen.insert(rec.step_id) {
                return Err(PlanError::DuplicateStepId(rec.step_id));
            }
            steps.push(step_from_record(rec)?);
        }

        Ok(TestPlan {
            plan_id: record.plan_id,
            description: record.description,
            steps,
        })
    }

    /// Convert back to the wire encoding.
    pub fn to_record(&self) -> PlanRecord {
        PlanRecord {
            plan_id: self.plan_id.clone(),
            description: self.description.clone(),
            steps: self.steps.iter().map(step_to_record).collect(),
        }
    }
}

fn step_from_record(rec: StepRecord) -> PlanResult<Step> {
    let step_id = rec.step_id;

    if rec.expected_visual.trim().is_empty() {
        return Err(PlanError::MissingField { step_id, field: "expected_visual" });
    }
    if rec.target.is_some() && rec.target_description.is_some() {
        return Err(PlanError::ConflictingTarget(step_id));
    }

    let element_target = |rec: &StepRecord| -> PlanResult<Target> {
        if let Some(t) = &rec.target {
            Ok(Target::Literal(t.clone()))
        } else if let Some(d) = &rec.target_description {
            Ok(Target::Description(d.clone()))
        } else {
            Err(PlanError::MissingField { step_id, field: "target or target_description" })
        }
    };

    let action = match rec.action {
        ActionKind::Navigate => {
            let url = rec
                .target
                .clone()
                .ok_or(PlanError::MissingField { step_id, field: "target" })?;
            Action::Navigate { url }
        }
        ActionKind::Click => Action::Click { target: element_target(&rec)? },
        ActionKind::Input => {
            let value = rec
                .value
                .clone()
                .ok_or(PlanError::MissingField { step_id, field: "value" })?;
            Action::Input { target: element_target(&rec)?, value }
        }
        ActionKind::Scroll => {
            let direction = match &rec.value {
                Some(v) => ScrollDirection::parse(v).ok_or_else(|| PlanError::InvalidField {
                    step_id,
                    field: "value",
                    reason: format!("'{}' is not a scroll direction", v),
                })?,
                None => ScrollDirection::Down,
            };
            Action::Scroll { direction }
        }
        ActionKind::Wait => {
            let seconds = match &rec.value {
                Some(v) => v.trim().parse::<u64>().map_err(|_| PlanError::InvalidField {
                    step_id,
                    field: "value",
                    reason: format!("'{}' is not a number of seconds", v),
                })?,
                None => DEFAULT_WAIT_SECONDS,
            };
            Action::Wait { seconds: seconds.min(MAX_WAIT_SECONDS) }
        }
        ActionKind::Verify => Action::Verify,
        ActionKind::KeyCombination => {
            let keys = rec
                .value
                .clone()
                .ok_or(PlanError::MissingField { step_id, field: "value" })?;
            Action::KeyCombination { keys }
        }
        ActionKind::Drag => {
            let source = element_target(&rec)?;
            let destination = rec
                .value
                .clone()
                .ok_or(PlanError::MissingField { step_id, field: "value" })?;
            Action::Drag { source, destination }
        }
        ActionKind::Hover => Action::Hover { target: element_target(&rec)? },
        ActionKind::Search => Action::Search { query: rec.value.clone() },
        ActionKind::GoBack => Action::GoBack,
        ActionKind::GoForward => Action::GoForward,
    };

    Ok(Step { step_id, action, expected_visual: rec.expected_visual })
}

fn step_to_record(step: &Step) -> StepRecord {
    let mut rec = StepRecord {
        step_id: step.step_id,
        action: step.action.kind(),
        target: None,
        target_description: None,
        value: None,
        expected_visual: step.expected_visual.clone(),
    };

    let set_target = |rec: &mut StepRecord, target: &Target| match target {
        Target::Literal(t) => rec.target = Some(t.clone()),
        Target::Description(d) => rec.target_description = Some(d.clone()),
    };

    match &step.action {
        Action::Navigate { url } => rec.target = Some(url.clone()),
        Action::Click { target } | Action::Hover { target } => set_target(&mut rec, target),
        Action::Input { target, value } => {
            set_target(&mut rec, target);
            rec.value = Some(value.clone());
        }
        Action::Scroll { direction } => {
            rec.value = Some(format!("{:?}", direction).to_lowercase());
        }
        Action::Wait { seconds } => rec.value = Some(seconds.to_string()),
        Action::KeyCombination { keys } => rec.value = Some(keys.clone()),
        Action::Drag { source, destination } => {
            set_target(&mut rec, source);
            rec.value = Some(destination.clone());
        }
        Action::Search { query } => rec.value = query.clone(),
        Action::Verify | Action::GoBack | Action::GoForward => {}
    }

    rec
}

/// Validate a JSON plan submission without keeping the typed plan.
pub fn validate_submission(json: &str) -> PlanValidation {
    match TestPlan::from_json(json) {
        Ok(plan) => PlanValidation::accepted(plan.steps.len()),
        Err(e) => PlanValidation::rejected(e),
    }
}
