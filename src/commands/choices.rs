use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::choices::{Adjustment, ChoiceLedger};
use crate::cutoff::CutoffPolicy;
use crate::db::{decisions_key, orders_key, Database, MENU_KEY};
use crate::error::{CanteenError, Result};
use crate::models::{
    decode_choices, decode_decisions, MealSlot, MenuDay, OrderSummary, SelectionLine, WeeklyMenu,
};
use crate::scheduler::{Scheduler, Subscription};
use crate::summary;

use super::menu::load_published_menu;

/// One employee's ordering state, backed by the shared store.
pub struct EmployeeSession {
    employee: String,
    policy: CutoffPolicy,
    ledger: ChoiceLedger,
    menu: WeeklyMenu,
}

fn read_ledger(db: &Database, employee: &str) -> Result<ChoiceLedger> {
    let choices = db
        .get_value(&orders_key(employee))?
        .map(|raw| decode_choices(&raw))
        .unwrap_or_default();
    let decisions = db
        .get_value(&decisions_key(employee))?
        .map(|raw| decode_decisions(&raw))
        .unwrap_or_default();
    Ok(ChoiceLedger::new(choices, decisions))
}

impl EmployeeSession {
    /// Start from whatever is stored. A store that can't be read starts empty.
    pub fn load(db: &Database, employee: &str, policy: CutoffPolicy) -> Self {
        let ledger = read_ledger(db, employee).unwrap_or_else(|e| {
            warn!(employee, error = %e, "Could not load choices");
            ChoiceLedger::default()
        });
        let menu = load_published_menu(db).unwrap_or_else(|e| {
            warn!(employee, error = %e, "Could not load menu");
            WeeklyMenu::default()
        });
        if menu.is_empty() {
            debug!(employee, "No weekly menu published yet");
        }
        Self {
            employee: employee.to_string(),
            policy,
            ledger,
            menu,
        }
    }

    pub fn employee(&self) -> &str {
        &self.employee
    }

    pub fn ledger(&self) -> &ChoiceLedger {
        &self.ledger
    }

    pub fn policy(&self) -> &CutoffPolicy {
        &self.policy
    }

    /// Re-read the published menu. On failure the previous menu is kept.
    pub fn refresh_menu(&mut self, db: &Database) -> bool {
        match load_published_menu(db) {
            Ok(menu) => {
                self.menu = menu;
                true
            }
            Err(e) => {
                warn!(employee = %self.employee, error = %e, "Menu refresh failed, keeping previous menu");
                false
            }
        }
    }

    /// Pick up writes made by another device. On failure the current choices are kept.
    pub fn reload_choices(&mut self, db: &Database) -> bool {
        match read_ledger(db, &self.employee) {
            Ok(ledger) => {
                self.ledger = ledger;
                true
            }
            Err(e) => {
                warn!(employee = %self.employee, error = %e, "Reload failed, keeping current choices");
                false
            }
        }
    }

    fn persist(&self, db: &Database, ledger: &ChoiceLedger) -> Result<()> {
        let orders = orders_key(&self.employee);
        let decisions = decisions_key(&self.employee);
        let choices_json = serde_json::to_string(ledger.choices())?;
        let decisions_json = serde_json::to_string(ledger.decisions())?;
        db.put_values(&[
            (orders.as_str(), choices_json.as_str()),
            (decisions.as_str(), decisions_json.as_str()),
        ])
    }

    /// Apply `change` to a copy, store it, then keep it. Nothing changes if either step fails.
    fn commit<T>(
        &mut self,
        db: &Database,
        change: impl FnOnce(&mut ChoiceLedger) -> Result<T>,
    ) -> Result<T> {
        let mut next = self.ledger.clone();
        let outcome = change(&mut next)?;
        if next != self.ledger {
            self.persist(db, &next)?;
            self.ledger = next;
        }
        Ok(outcome)
    }

    /// Keep a shared session current while it is open: re-read the menu when a chef
    /// republishes it, and the choices when another device writes them. Dropping
    /// the returned subscriptions stops the updates.
    pub fn watch(
        session: &Arc<Mutex<EmployeeSession>>,
        db: &Arc<Database>,
        scheduler: &dyn Scheduler,
    ) -> Result<Vec<Subscription>> {
        let employee = session
            .lock()
            .map_err(|_| CanteenError::LockPoisoned)?
            .employee()
            .to_string();

        let menu_sub = {
            let session = Arc::clone(session);
            let db = Arc::clone(db);
            scheduler.on_external_change(
                MENU_KEY,
                Box::new(move |_: &str| match session.lock() {
                    Ok(mut s) => {
                        s.refresh_menu(&db);
                    }
                    Err(_) => warn!("Session lock poisoned, menu not refreshed"),
                }),
            )
        };

        let mut subs = vec![menu_sub];
        for key in [orders_key(&employee), decisions_key(&employee)] {
            let session = Arc::clone(session);
            let db = Arc::clone(db);
            subs.push(scheduler.on_external_change(
                &key,
                Box::new(move |_: &str| match session.lock() {
                    Ok(mut s) => {
                        s.reload_choices(&db);
                    }
                    Err(_) => warn!("Session lock poisoned, choices not reloaded"),
                }),
            ));
        }

        debug!(employee = %employee, "Watching for menu and choice changes");
        Ok(subs)
    }

    pub fn adjust_quantity(
        &mut self,
        db: &Database,
        now: DateTime<Utc>,
        date: NaiveDate,
        slot: MealSlot,
        item_id: i64,
        delta: i32,
    ) -> Result<Adjustment> {
        ChoiceLedger::ensure_open(&self.policy, now, date)?;
        // Prefer the menu's name; fall back to what was stored if the item is gone
        let item_name = MenuDay::from_date(date)
            .and_then(|day| self.menu.find(day, slot, item_id))
            .map(|item| item.name.clone())
            .or_else(|| {
                self.ledger
                    .choices()
                    .iter()
                    .find(|c| c.matches(date, slot, item_id))
                    .map(|c| c.item_name.clone())
            });
        let Some(item_name) = item_name else {
            if delta > 0 {
                return Err(CanteenError::NotFound(format!(
                    "Item {item_id} on the {slot} menu for {date}"
                )));
            }
            return Ok(Adjustment::Unchanged);
        };

        let policy = self.policy;
        let result = self.commit(db, |ledger| {
            ledger.adjust_quantity(&policy, now, slot, item_id, &item_name, delta, date)
        });
        match &result {
            Ok(outcome) => info!(employee = %self.employee, %date, %slot, item_id, delta, ?outcome, "Adjusted quantity"),
            Err(e) => warn!(employee = %self.employee, %date, %slot, item_id, delta, error = %e, "Adjust rejected"),
        }
        result
    }

    pub fn delete_choice(
        &mut self,
        db: &Database,
        now: DateTime<Utc>,
        date: NaiveDate,
        slot: MealSlot,
        item_id: Option<i64>,
    ) -> Result<usize> {
        let policy = self.policy;
        let result = self.commit(db, |ledger| {
            ledger.delete_choice(&policy, now, slot, item_id, date)
        });
        match &result {
            Ok(removed) => info!(employee = %self.employee, %date, %slot, ?item_id, removed, "Deleted choices"),
            Err(e) => warn!(employee = %self.employee, %date, %slot, error = %e, "Delete rejected"),
        }
        result
    }

    pub fn record_decision(
        &mut self,
        db: &Database,
        now: DateTime<Utc>,
        date: NaiveDate,
        will_order: bool,
    ) -> Result<()> {
        let policy = self.policy;
        self.commit(db, |ledger| ledger.record_decision(&policy, now, date, will_order))?;
        info!(employee = %self.employee, %date, will_order, "Recorded meal decision");
        Ok(())
    }

    pub fn cancel_choice(
        &mut self,
        db: &Database,
        now: DateTime<Utc>,
        date: NaiveDate,
        slot: MealSlot,
        item_id: i64,
    ) -> Result<()> {
        let found = self.commit(db, |ledger| Ok(ledger.cancel_choice(now, slot, item_id, date)))?;
        if !found {
            return Err(CanteenError::NotFound(format!(
                "Choice for item {item_id} at {slot} on {date}"
            )));
        }
        info!(
            employee = %self.employee,
            %date,
            %slot,
            item_id,
            after_cutoff = !self.policy.mutations_allowed(now, date),
            "Canceled choice"
        );
        Ok(())
    }

    pub fn selection(&self, date: NaiveDate) -> Vec<SelectionLine> {
        summary::selection(self.ledger.choices(), &self.menu, date)
    }

    /// Recomputed from the current choices and menu on every call.
    pub fn order_total(&self, date: NaiveDate) -> f64 {
        summary::order_total(self.ledger.choices(), &self.menu, date)
    }

    pub fn order_summary(&self, now: DateTime<Utc>, date: NaiveDate) -> OrderSummary {
        let seconds_remaining = self.policy.seconds_remaining(now, date);
        OrderSummary {
            target_date: date,
            decision: self.ledger.decision(date),
            lines: self.selection(date),
            total: self.order_total(date),
            seconds_remaining,
            mutations_allowed: seconds_remaining > 0,
        }
    }
}
