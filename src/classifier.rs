//! Stock event classifier - decides whether a reading is worth persisting
//!
//! The classifier is a pure function of `(previous log entry, current reading,
//! thresholds)`. It is expressed as an ordered list of [`Rule`]s; each rule is
//! a predicate over an immutable [`Snapshot`] plus an effect on the
//! [`Decision`]. Every rule is evaluated, later effects overwrite earlier ones.
//!
//! Rule order:
//! 1. first reading for the slot is always logged
//! 2. significant weight delta or a status/ingredient/slot change is logged
//! 3. impossible jump (|delta| above the sensor error bound) flags SENSOR_ERROR
//! 4. weight outside `[0, max_plausible_weight]` flags SENSOR_ERROR
//! 5. plausible increase above the restock bound tags RESTOCK
//! 6. plausible decrease above the batch usage bound tags BATCH_USAGE
//! 7. negative weight is never logged, whatever alert earlier rules set
//!
//! Rule 7 means a SENSOR_ERROR alert can be raised for a reading that is not
//! persisted. Both behaviors are kept.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::model::{AlertType, EventTag, IngredientLogEntry, SENSOR_ERROR_STATUS};

/// Numeric bounds used by the rules. Weights are in grams.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub sensor_error_delta_abs: f64,
    pub max_plausible_weight: f64,
    pub restock_delta_min: f64,
    pub batch_usage_delta_min: f64,
    pub significant_change_delta: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            sensor_error_delta_abs: 10_000.0,
            max_plausible_weight: 20_000.0,
            restock_delta_min: 100.0,
            batch_usage_delta_min: 1_000.0,
            significant_change_delta: 10.0,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        let all = [
            self.sensor_error_delta_abs,
            self.max_plausible_weight,
            self.restock_delta_min,
            self.batch_usage_delta_min,
            self.significant_change_delta,
        ];
        if all.iter().any(|v| !v.is_finite() || *v < 0.0) {
            bail!("classifier thresholds must be finite and non-negative");
        }
        if self.significant_change_delta > self.restock_delta_min
            || self.significant_change_delta > self.batch_usage_delta_min
        {
            bail!("significant_change_delta must not exceed the restock/batch usage bounds");
        }
        Ok(())
    }
}

/// One reading as seen by the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub slot_id: String,
    pub ingredient: String,
    pub weight: f64,
    pub status: String,
}

impl From<&IngredientLogEntry> for Reading {
    fn from(entry: &IngredientLogEntry) -> Self {
        Self {
            slot_id: entry.slot_id.clone(),
            ingredient: entry.ingredient.clone(),
            weight: entry.weight,
            status: entry.status.clone(),
        }
    }
}

/// Immutable input to every rule.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub previous: Option<&'a Reading>,
    pub current: &'a Reading,
    pub thresholds: &'a Thresholds,
}

impl Snapshot<'_> {
    /// `current - previous`, `None` for a first reading.
    pub fn delta(&self) -> Option<f64> {
        self.previous.map(|prev| self.current.weight - prev.weight)
    }

    fn in_plausible_range(&self) -> bool {
        self.current.weight >= 0.0 && self.current.weight <= self.thresholds.max_plausible_weight
    }

    /// Restock/usage tags only apply to readings that are not sensor errors.
    fn is_plausible(&self) -> bool {
        let jump_ok = self
            .delta()
            .map(|d| d.abs() <= self.thresholds.sensor_error_delta_abs)
            .unwrap_or(true);
        jump_ok && self.in_plausible_range()
    }

    fn identity_changed(&self) -> bool {
        match self.previous {
            None => false,
            Some(prev) => {
                prev.status != self.current.status
                    || prev.ingredient != self.current.ingredient
                    || prev.slot_id != self.current.slot_id
            }
        }
    }
}

/// Result of classifying one reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub should_log: bool,
    pub logged_status: String,
    pub event_tag: Option<EventTag>,
    pub alert_type: Option<AlertType>,
    pub alert_details: Option<String>,
    /// Names of the rules whose predicate matched, in evaluation order
    pub matched_rules: Vec<&'static str>,
}

impl Decision {
    fn initial(current: &Reading) -> Self {
        Self {
            should_log: false,
            logged_status: current.status.clone(),
            event_tag: None,
            alert_type: None,
            alert_details: None,
            matched_rules: Vec::new(),
        }
    }
}

/// A predicate→effect pair.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&Snapshot<'_>) -> bool,
    pub effect: fn(&Snapshot<'_>, &mut Decision),
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

fn flag_sensor_error(decision: &mut Decision, details: String) {
    decision.should_log = true;
    decision.logged_status = SENSOR_ERROR_STATUS.to_string();
    decision.alert_type = Some(AlertType::SensorError);
    decision.alert_details = Some(details);
}

fn tag_event(decision: &mut Decision, tag: EventTag, details: String) {
    decision.should_log = true;
    decision.event_tag = Some(tag);
    decision.alert_type = Some(tag.into());
    decision.alert_details = Some(details);
}

fn is_first_reading(s: &Snapshot<'_>) -> bool {
    s.previous.is_none()
}

fn is_significant_change(s: &Snapshot<'_>) -> bool {
    let moved = s
        .delta()
        .map(|delta| delta.abs() > s.thresholds.significant_change_delta)
        .unwrap_or(false);
    moved || s.identity_changed()
}

fn is_impossible_jump(s: &Snapshot<'_>) -> bool {
    s.delta()
        .map(|delta| delta.abs() > s.thresholds.sensor_error_delta_abs)
        .unwrap_or(false)
}

fn is_implausible_weight(s: &Snapshot<'_>) -> bool {
    !s.in_plausible_range()
}

fn is_restock(s: &Snapshot<'_>) -> bool {
    s.is_plausible()
        && s.delta()
            .map(|delta| delta > s.thresholds.restock_delta_min)
            .unwrap_or(false)
}

fn is_batch_usage(s: &Snapshot<'_>) -> bool {
    s.is_plausible()
        && s.delta()
            .map(|delta| -delta > s.thresholds.batch_usage_delta_min)
            .unwrap_or(false)
}

fn is_negative_weight(s: &Snapshot<'_>) -> bool {
    s.current.weight < 0.0
}

fn mark_logged(_: &Snapshot<'_>, d: &mut Decision) {
    d.should_log = true;
}

fn mark_not_logged(_: &Snapshot<'_>, d: &mut Decision) {
    d.should_log = false;
}

fn flag_impossible_jump(s: &Snapshot<'_>, d: &mut Decision) {
    let prev = s.previous.map(|p| p.weight).unwrap_or_default();
    flag_sensor_error(
        d,
        format!("Weight jumped from {:.1}g to {:.1}g", prev, s.current.weight),
    );
}

fn flag_implausible_weight(s: &Snapshot<'_>, d: &mut Decision) {
    flag_sensor_error(
        d,
        format!(
            "Weight {:.1}g outside plausible range 0-{:.0}g",
            s.current.weight, s.thresholds.max_plausible_weight
        ),
    );
}

fn tag_restock(s: &Snapshot<'_>, d: &mut Decision) {
    let delta = s.delta().unwrap_or_default();
    tag_event(d, EventTag::Restock, format!("Restocked {:.1}g", delta));
}

fn tag_batch_usage(s: &Snapshot<'_>, d: &mut Decision) {
    let used = -s.delta().unwrap_or_default();
    tag_event(d, EventTag::BatchUsage, format!("Batch usage of {:.1}g", used));
}

/// Default rule set, in evaluation order.
pub const DEFAULT_RULES: &[Rule] = &[
    Rule {
        name: "first_reading",
        applies: is_first_reading,
        effect: mark_logged,
    },
    Rule {
        name: "significant_change",
        applies: is_significant_change,
        effect: mark_logged,
    },
    Rule {
        name: "impossible_jump",
        applies: is_impossible_jump,
        effect: flag_impossible_jump,
    },
    Rule {
        name: "implausible_weight",
        applies: is_implausible_weight,
        effect: flag_implausible_weight,
    },
    Rule {
        name: "restock",
        applies: is_restock,
        effect: tag_restock,
    },
    Rule {
        name: "batch_usage",
        applies: is_batch_usage,
        effect: tag_batch_usage,
    },
    Rule {
        name: "negative_weight_not_logged",
        applies: is_negative_weight,
        effect: mark_not_logged,
    },
];

/// Runs a rule list over readings.
#[derive(Debug, Clone)]
pub struct Classifier {
    thresholds: Thresholds,
    rules: &'static [Rule],
}

impl Classifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            rules: DEFAULT_RULES,
        }
    }

    pub fn classify(&self, previous: Option<&Reading>, current: &Reading) -> Decision {
        let snapshot = Snapshot {
            previous,
            current,
            thresholds: &self.thresholds,
        };
        let mut decision = Decision::initial(current);
        for rule in self.rules {
            if (rule.applies)(&snapshot) {
                decision.matched_rules.push(rule.name);
                (rule.effect)(&snapshot, &mut decision);
            }
        }
        decision
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
