use chrono::NaiveDate;
use tracing::{debug, info};

use crate::cutoff::CutoffPolicy;
use crate::db::Database;
use crate::error::Result;
use crate::models::{decode_choices, ChefSummary, Choice, Role};
use crate::summary::aggregate_by_item;

use super::require_role;

/// Everything every employee has chosen for `date`. Unreadable lists are skipped.
pub fn collect_choices(db: &Database, date: NaiveDate) -> Result<(usize, Vec<Choice>)> {
    let mut employees = 0;
    let mut choices = Vec::new();

    for (employee, raw) in db.all_employee_orders()? {
        let theirs: Vec<Choice> = decode_choices(&raw)
            .into_iter()
            .filter(|c| c.target_date == date)
            .collect();
        debug!(employee = %employee, count = theirs.len(), %date, "Collected choices");
        if !theirs.is_empty() {
            employees += 1;
            choices.extend(theirs);
        }
    }

    Ok((employees, choices))
}

/// Kitchen counts for `date`, grouped by item name.
pub fn get_chef_summary(
    db: &Database,
    role: Role,
    policy: &CutoffPolicy,
    date: NaiveDate,
) -> Result<ChefSummary> {
    require_role(role, Role::Chef)?;

    let (employees, choices) = collect_choices(db, date)?;
    let items = aggregate_by_item(&choices, date, policy.cutoff_instant(date));

    info!(%date, employees, items = items.len(), "Built chef summary");

    Ok(ChefSummary {
        target_date: date,
        employees,
        items,
    })
}
