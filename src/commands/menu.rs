use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cutoff::CutoffPolicy;
use crate::db::{Database, MENU_KEY};
use crate::error::{CanteenError, Result};
use crate::models::{
    decode_menu, CreateMenuItem, MealSlot, MenuDay, MenuEntry, MenuOverview, Role,
    UpdateMenuItem, WeeklyMenu,
};

use super::require_role;

fn validate(name: &str, price: f64) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CanteenError::InvalidInput("item name is required".into()));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(CanteenError::InvalidInput(format!(
            "price must be a non-negative amount, got {price}"
        )));
    }
    Ok(name.to_string())
}

fn select_entries(conn: &Connection, filter: &str, id: Option<i64>) -> Result<Vec<MenuEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, price, day, slot FROM menu_items {filter} ORDER BY id"
    ))?;
    let rows = match id {
        Some(id) => stmt.query_map([id], row_to_raw)?.collect::<std::result::Result<Vec<_>, _>>()?,
        None => stmt.query_map([], row_to_raw)?.collect::<std::result::Result<Vec<_>, _>>()?,
    };

    // Rows written by other tools may carry days or slots the canteen doesn't serve
    let mut entries: Vec<MenuEntry> = rows
        .into_iter()
        .filter_map(|(id, name, price, day, slot)| {
            match (day.parse::<MenuDay>(), slot.parse::<MealSlot>()) {
                (Ok(day), Ok(slot)) => Some(MenuEntry {
                    id,
                    name,
                    price,
                    day,
                    slot,
                }),
                (day, slot) => {
                    warn!(id, ?day, ?slot, "Skipping menu item with unknown day or slot");
                    None
                }
            }
        })
        .collect();
    entries.sort_by_key(|e| (e.day, e.slot));
    Ok(entries)
}

type RawEntry = (i64, String, f64, String, String);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

pub fn list_menu_items(db: &Database) -> Result<Vec<MenuEntry>> {
    let conn = db.lock()?;
    select_entries(&conn, "", None)
}

pub fn get_weekly_menu(db: &Database) -> Result<WeeklyMenu> {
    Ok(WeeklyMenu::from_entries(list_menu_items(db)?))
}

/// Write the current menu into the shared store so open sessions pick it up.
pub fn publish_menu(db: &Database) -> Result<WeeklyMenu> {
    let menu = get_weekly_menu(db)?;
    db.put_value(MENU_KEY, &serde_json::to_string(&menu)?)?;
    info!("Published weekly menu");
    Ok(menu)
}

/// The last published menu. Missing or unreadable snapshots read as empty.
pub fn load_published_menu(db: &Database) -> Result<WeeklyMenu> {
    Ok(db
        .get_value(MENU_KEY)?
        .map(|raw| decode_menu(&raw))
        .unwrap_or_default())
}

pub fn add_menu_item(db: &Database, role: Role, item: CreateMenuItem) -> Result<MenuEntry> {
    require_role(role, Role::Chef)?;
    let name = validate(&item.name, item.price)?;

    let entry = {
        let conn = db.lock()?;
        conn.execute(
            "INSERT INTO menu_items (day, slot, name, price) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![item.day.as_str(), item.slot.as_str(), name, item.price],
        )?;
        let id = conn.last_insert_rowid();
        MenuEntry {
            id,
            name,
            price: item.price,
            day: item.day,
            slot: item.slot,
        }
    };

    info!(id = entry.id, day = %entry.day, slot = %entry.slot, name = %entry.name, "Added menu item");
    publish_menu(db)?;
    Ok(entry)
}

pub fn edit_menu_item(db: &Database, role: Role, update: UpdateMenuItem) -> Result<MenuEntry> {
    require_role(role, Role::Chef)?;
    let name = validate(&update.name, update.price)?;

    let entry = {
        let conn = db.lock()?;
        conn.execute(
            "UPDATE menu_items SET name = ?1, price = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?3",
            rusqlite::params![name, update.price, update.id],
        )?;
        if conn.changes() == 0 {
            return Err(CanteenError::NotFound(format!("Menu item {}", update.id)));
        }
        select_entries(&conn, "WHERE id = ?1", Some(update.id))?
            .into_iter()
            .next()
            .ok_or_else(|| CanteenError::NotFound(format!("Menu item {}", update.id)))?
    };

    info!(id = entry.id, name = %entry.name, price = entry.price, "Updated menu item");
    publish_menu(db)?;
    Ok(entry)
}

/// Choices that reference a deleted item stay put; they simply price at 0.
pub fn delete_menu_item(db: &Database, role: Role, id: i64) -> Result<()> {
    require_role(role, Role::Chef)?;

    {
        let conn = db.lock()?;
        conn.execute("DELETE FROM menu_items WHERE id = ?1", [id])?;
        if conn.changes() == 0 {
            return Err(CanteenError::NotFound(format!("Menu item {id}")));
        }
    }

    info!(id, "Deleted menu item");
    publish_menu(db)?;
    Ok(())
}

/// Today's and tomorrow's menus, in the canteen's zone.
pub fn get_menu_overview(
    db: &Database,
    policy: &CutoffPolicy,
    now: DateTime<Utc>,
) -> Result<MenuOverview> {
    let today = policy.local_date(now);
    let tomorrow = policy.service_date(now);
    let entries = list_menu_items(db)?;

    let served_on = |date| {
        let day = MenuDay::from_date(date);
        entries
            .iter()
            .filter(|e| Some(e.day) == day)
            .cloned()
            .collect::<Vec<_>>()
    };

    Ok(MenuOverview {
        today: today.format("%A").to_string(),
        tomorrow: tomorrow.format("%A").to_string(),
        today_menu: served_on(today),
        tomorrow_menu: served_on(tomorrow),
    })
}
