use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::cutoff::CutoffPolicy;
use crate::error::{CanteenError, Result};
use crate::models::{Choice, MealDecisions, MealSlot};

/// What an `adjust_quantity` call did to the matching choice.
#[derive(Debug, Clone, PartialEq)]
pub enum Adjustment {
    Created(Choice),
    Updated(Choice),
    Removed,
    Unchanged,
}

/// One employee's choices and per-date meal decisions.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ChoiceLedger {
    choices: Vec<Choice>,
    decisions: MealDecisions,
}

impl ChoiceLedger {
    pub fn new(choices: Vec<Choice>, decisions: MealDecisions) -> Self {
        Self { choices, decisions }
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn decisions(&self) -> &MealDecisions {
        &self.decisions
    }

    pub fn decision(&self, date: NaiveDate) -> Option<bool> {
        self.decisions.get(&date).copied()
    }

    /// Fails with `CutoffPassed` once orders for `date` have closed.
    pub fn ensure_open(policy: &CutoffPolicy, now: DateTime<Utc>, date: NaiveDate) -> Result<()> {
        if policy.mutations_allowed(now, date) {
            Ok(())
        } else {
            Err(CanteenError::CutoffPassed {
                date,
                cutoff: policy.describe(),
            })
        }
    }

    /// Change the quantity of one item by `delta`, creating or removing the choice as needed.
    #[allow(clippy::too_many_arguments)]
    pub fn adjust_quantity(
        &mut self,
        policy: &CutoffPolicy,
        now: DateTime<Utc>,
        slot: MealSlot,
        item_id: i64,
        item_name: &str,
        delta: i32,
        date: NaiveDate,
    ) -> Result<Adjustment> {
        Self::ensure_open(policy, now, date)?;
        if self.decision(date) == Some(false) {
            return Err(CanteenError::OptedOut(date));
        }
        if delta == 0 {
            return Ok(Adjustment::Unchanged);
        }

        let Some(idx) = self
            .choices
            .iter()
            .position(|c| c.matches(date, slot, item_id))
        else {
            if delta < 0 {
                return Ok(Adjustment::Unchanged);
            }
            let choice = Choice {
                target_date: date,
                meal_slot: slot,
                item_id,
                item_name: item_name.to_string(),
                quantity: delta.unsigned_abs(),
                last_modified_at: now,
                canceled: false,
                canceled_at: None,
            };
            self.choices.push(choice.clone());
            return Ok(Adjustment::Created(choice));
        };

        let new_qty = i64::from(self.choices[idx].quantity) + i64::from(delta);
        if new_qty <= 0 {
            self.choices.remove(idx);
            return Ok(Adjustment::Removed);
        }

        let choice = &mut self.choices[idx];
        choice.quantity = u32::try_from(new_qty).unwrap_or(u32::MAX);
        choice.last_modified_at = now;
        // Ordering more of a withdrawn item puts it back on the order
        if delta > 0 {
            choice.canceled = false;
            choice.canceled_at = None;
        }
        Ok(Adjustment::Updated(choice.clone()))
    }

    /// Remove every choice in `slot` for `date`, or just the one item if `item_id` is given.
    pub fn delete_choice(
        &mut self,
        policy: &CutoffPolicy,
        now: DateTime<Utc>,
        slot: MealSlot,
        item_id: Option<i64>,
        date: NaiveDate,
    ) -> Result<usize> {
        Self::ensure_open(policy, now, date)?;
        let before = self.choices.len();
        self.choices.retain(|c| {
            if c.target_date != date || c.meal_slot != slot {
                return true;
            }
            matches!(item_id, Some(id) if c.item_id != id)
        });
        Ok(before - self.choices.len())
    }

    /// Opt in or out of meals for `date`. Existing choices are kept either way.
    pub fn record_decision(
        &mut self,
        policy: &CutoffPolicy,
        now: DateTime<Utc>,
        date: NaiveDate,
        will_order: bool,
    ) -> Result<()> {
        Self::ensure_open(policy, now, date)?;
        self.decisions.insert(date, will_order);
        Ok(())
    }

    /// Withdraw a choice without deleting it. Allowed after the cutoff, where it
    /// records a no-show. Returns false if nothing matched.
    pub fn cancel_choice(
        &mut self,
        now: DateTime<Utc>,
        slot: MealSlot,
        item_id: i64,
        date: NaiveDate,
    ) -> bool {
        let Some(choice) = self
            .choices
            .iter_mut()
            .find(|c| c.matches(date, slot, item_id))
        else {
            return false;
        };
        if !choice.canceled {
            choice.canceled = true;
            choice.canceled_at = Some(now);
            choice.last_modified_at = now;
        }
        true
    }
}
