//! Counts for the kitchen and totals for the employee.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{Choice, ItemCount, MealSlot, SelectionLine, WeeklyMenu};

/// A cancellation only takes an order off the count if it landed before the cutoff.
/// Later cancellations are no-shows: the kitchen has already committed to them.
fn withdrawn_in_time(choice: &Choice, cutoff: DateTime<Utc>) -> bool {
    choice.canceled && choice.canceled_at.is_some_and(|at| at <= cutoff)
}

/// Per-item counts for `date`, grouped by display name in first-seen order.
pub fn aggregate_by_item(
    choices: &[Choice],
    date: NaiveDate,
    cutoff: DateTime<Utc>,
) -> Vec<ItemCount> {
    let mut counts: Vec<ItemCount> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for choice in choices {
        if choice.target_date != date || withdrawn_in_time(choice, cutoff) {
            continue;
        }
        let qty = u64::from(choice.quantity.max(1));
        match index.get(choice.item_name.as_str()) {
            Some(&i) => counts[i].count += qty,
            None => {
                index.insert(choice.item_name.as_str(), counts.len());
                counts.push(ItemCount {
                    item_name: choice.item_name.clone(),
                    count: qty,
                });
            }
        }
    }

    counts
}

/// What the employee will pay for `date`. Items no longer on the menu cost nothing.
pub fn order_total(choices: &[Choice], menu: &WeeklyMenu, date: NaiveDate) -> f64 {
    choices
        .iter()
        .filter(|c| c.target_date == date && !c.canceled)
        .map(|c| f64::from(c.quantity) * menu.price_on(date, c.meal_slot, c.item_id))
        .sum()
}

/// Active choices for `date` merged per (slot, item), with current prices.
pub fn selection(choices: &[Choice], menu: &WeeklyMenu, date: NaiveDate) -> Vec<SelectionLine> {
    let mut lines: Vec<SelectionLine> = Vec::new();
    let mut index: HashMap<(MealSlot, i64), usize> = HashMap::new();

    for choice in choices.iter().filter(|c| c.target_date == date && !c.canceled) {
        let key = (choice.meal_slot, choice.item_id);
        let line_idx = *index.entry(key).or_insert_with(|| {
            lines.push(SelectionLine {
                meal_slot: choice.meal_slot,
                item_id: choice.item_id,
                item_name: choice.item_name.clone(),
                quantity: 0,
                unit_price: menu.price_on(date, choice.meal_slot, choice.item_id),
                line_total: 0.0,
            });
            lines.len() - 1
        });
        let line = &mut lines[line_idx];
        line.quantity = line.quantity.saturating_add(choice.quantity);
        line.line_total = f64::from(line.quantity) * line.unit_price;
    }

    lines.sort_by_key(|line| line.meal_slot);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cutoff::CutoffPolicy;
    use crate::models::{MenuDay, MenuEntry};
    use chrono::TimeDelta;

    // A Monday
    fn target() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn choice(item_id: i64, name: &str, quantity: u32) -> Choice {
        Choice {
            target_date: target(),
            meal_slot: MealSlot::Breakfast,
            item_id,
            item_name: name.to_string(),
            quantity,
            last_modified_at: "2026-10-18T08:00:00Z".parse().unwrap(),
            canceled: false,
            canceled_at: None,
        }
    }

    fn canceled(mut c: Choice, at: DateTime<Utc>) -> Choice {
        c.canceled = true;
        c.canceled_at = Some(at);
        c
    }

    fn menu_with_idli(price: f64) -> WeeklyMenu {
        WeeklyMenu::from_entries(vec![MenuEntry {
            id: 1,
            name: "Idli".to_string(),
            price,
            day: MenuDay::Monday,
            slot: MealSlot::Breakfast,
        }])
    }

    #[test]
    fn test_aggregate_drops_cancellations_before_cutoff() {
        let cutoff = CutoffPolicy::default().cutoff_instant(target());
        let choices = vec![
            choice(1, "Idli", 2),
            canceled(choice(1, "Idli", 3), cutoff - TimeDelta::hours(2)),
            choice(2, "Dosa", 1),
        ];

        let counts = aggregate_by_item(&choices, target(), cutoff);
        assert_eq!(
            counts,
            vec![
                ItemCount { item_name: "Idli".to_string(), count: 2 },
                ItemCount { item_name: "Dosa".to_string(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_aggregate_counts_no_shows() {
        let cutoff = CutoffPolicy::default().cutoff_instant(target());
        let choices = vec![
            canceled(choice(1, "Idli", 3), cutoff + TimeDelta::hours(8)),
            canceled(choice(2, "Dosa", 1), cutoff),
        ];

        let counts = aggregate_by_item(&choices, target(), cutoff);
        // Cancelling exactly at the cutoff is still in time
        assert_eq!(
            counts,
            vec![ItemCount { item_name: "Idli".to_string(), count: 3 }]
        );
    }

    #[test]
    fn test_aggregate_canceled_without_timestamp_still_counts() {
        let cutoff = CutoffPolicy::default().cutoff_instant(target());
        let mut c = choice(1, "Idli", 4);
        c.canceled = true;

        let counts = aggregate_by_item(&[c], target(), cutoff);
        assert_eq!(counts[0].count, 4);
    }

    #[test]
    fn test_aggregate_merges_same_name_and_ignores_other_dates() {
        let cutoff = CutoffPolicy::default().cutoff_instant(target());
        let mut lunch_idli = choice(7, "Idli", 1);
        lunch_idli.meal_slot = MealSlot::Lunch;
        let mut next_week = choice(1, "Idli", 10);
        next_week.target_date = target() + TimeDelta::days(7);

        let counts = aggregate_by_item(&[choice(1, "Idli", 2), lunch_idli, next_week], target(), cutoff);
        assert_eq!(
            counts,
            vec![ItemCount { item_name: "Idli".to_string(), count: 3 }]
        );
    }

    #[test]
    fn test_order_total_uses_menu_price() {
        let menu = menu_with_idli(40.0);
        let total = order_total(&[choice(1, "Idli", 3)], &menu, target());
        assert!((total - 120.0).abs() < 0.001);
    }

    #[test]
    fn test_order_total_orphaned_item_is_free() {
        let choices = vec![choice(1, "Idli", 3)];
        assert!((order_total(&choices, &menu_with_idli(40.0), target()) - 120.0).abs() < 0.001);

        // Chef deletes the item after it was chosen
        let menu = WeeklyMenu::from_entries(Vec::new());
        assert_eq!(order_total(&choices, &menu, target()), 0.0);
    }

    #[test]
    fn test_order_total_tracks_price_changes_and_skips_canceled() {
        let choices = vec![
            choice(1, "Idli", 2),
            canceled(choice(1, "Idli", 5), "2026-10-18T09:00:00Z".parse().unwrap()),
        ];
        assert!((order_total(&choices, &menu_with_idli(40.0), target()) - 80.0).abs() < 0.001);
        assert!((order_total(&choices, &menu_with_idli(45.5), target()) - 91.0).abs() < 0.001);
    }

    #[test]
    fn test_selection_merges_lines_by_slot_and_item() {
        let menu = menu_with_idli(40.0);
        let mut snack = choice(3, "Tea", 1);
        snack.meal_slot = MealSlot::Snacks;
        let choices = vec![snack, choice(1, "Idli", 1), choice(1, "Idli", 2)];

        let lines = selection(&choices, &menu, target());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].item_name, "Idli");
        assert_eq!(lines[0].quantity, 3);
        assert!((lines[0].line_total - 120.0).abs() < 0.001);
        assert_eq!(lines[1].item_name, "Tea");
        assert_eq!(lines[1].unit_price, 0.0);
    }
}
