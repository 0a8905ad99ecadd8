use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MealSlot {
    #[serde(alias = "morning")]
    Breakfast,
    #[serde(alias = "afternoon")]
    Lunch,
    #[serde(alias = "evening")]
    Snacks,
}

impl MealSlot {
    pub const ALL: [MealSlot; 3] = [MealSlot::Breakfast, MealSlot::Lunch, MealSlot::Snacks];

    pub fn as_str(&self) -> &'static str {
        match self {
            MealSlot::Breakfast => "breakfast",
            MealSlot::Lunch => "lunch",
            MealSlot::Snacks => "snacks",
        }
    }
}

impl fmt::Display for MealSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breakfast" | "morning" => Ok(MealSlot::Breakfast),
            "lunch" | "afternoon" => Ok(MealSlot::Lunch),
            "snacks" | "evening" => Ok(MealSlot::Snacks),
            other => Err(format!("unknown meal slot: {other}")),
        }
    }
}

/// Days the canteen serves. Sunday is closed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MenuDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl MenuDay {
    pub const ALL: [MenuDay; 6] = [
        MenuDay::Monday,
        MenuDay::Tuesday,
        MenuDay::Wednesday,
        MenuDay::Thursday,
        MenuDay::Friday,
        MenuDay::Saturday,
    ];

    pub fn from_date(date: NaiveDate) -> Option<Self> {
        match date.weekday() {
            Weekday::Mon => Some(MenuDay::Monday),
            Weekday::Tue => Some(MenuDay::Tuesday),
            Weekday::Wed => Some(MenuDay::Wednesday),
            Weekday::Thu => Some(MenuDay::Thursday),
            Weekday::Fri => Some(MenuDay::Friday),
            Weekday::Sat => Some(MenuDay::Saturday),
            Weekday::Sun => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MenuDay::Monday => "Monday",
            MenuDay::Tuesday => "Tuesday",
            MenuDay::Wednesday => "Wednesday",
            MenuDay::Thursday => "Thursday",
            MenuDay::Friday => "Friday",
            MenuDay::Saturday => "Saturday",
        }
    }
}

impl fmt::Display for MenuDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MenuDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        MenuDay::ALL
            .into_iter()
            .find(|day| day.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("not a canteen day: {wanted}"))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Chef,
    Employee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Chef => "chef",
            Role::Employee => "employee",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chef" => Ok(Role::Chef),
            "employee" => Ok(Role::Employee),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MenuItem {
    pub id: i64,
    pub name: String,
    pub price: f64,
}

/// A menu item as the backend lists it, tagged with where it is served.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MenuEntry {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub day: MenuDay,
    pub slot: MealSlot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMenuItem {
    pub day: MenuDay,
    pub slot: MealSlot,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateMenuItem {
    pub id: i64,
    pub name: String,
    pub price: f64,
}

/// Day -> slot -> items in insertion order. Ids are unique within a (day, slot).
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct WeeklyMenu {
    days: BTreeMap<MenuDay, BTreeMap<MealSlot, Vec<MenuItem>>>,
}

impl WeeklyMenu {
    /// Every serving day gets all three slots, even if empty.
    pub fn from_entries(entries: impl IntoIterator<Item = MenuEntry>) -> Self {
        let mut menu = WeeklyMenu::default();
        for day in MenuDay::ALL {
            let slots = menu.days.entry(day).or_default();
            for slot in MealSlot::ALL {
                slots.entry(slot).or_default();
            }
        }
        for entry in entries {
            menu.insert(
                entry.day,
                entry.slot,
                MenuItem {
                    id: entry.id,
                    name: entry.name,
                    price: entry.price,
                },
            );
        }
        menu
    }

    /// Returns false (and leaves the menu alone) if the id is already taken in that slot.
    pub fn insert(&mut self, day: MenuDay, slot: MealSlot, item: MenuItem) -> bool {
        let items = self.days.entry(day).or_default().entry(slot).or_default();
        if items.iter().any(|existing| existing.id == item.id) {
            warn!(%day, %slot, id = item.id, "Duplicate menu item id ignored");
            return false;
        }
        items.push(item);
        true
    }

    pub fn items(&self, day: MenuDay, slot: MealSlot) -> &[MenuItem] {
        self.days
            .get(&day)
            .and_then(|slots| slots.get(&slot))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn find(&self, day: MenuDay, slot: MealSlot, item_id: i64) -> Option<&MenuItem> {
        self.items(day, slot).iter().find(|item| item.id == item_id)
    }

    /// Unit price for a served date. Items that are gone (or Sundays) price at 0.
    pub fn price_on(&self, date: NaiveDate, slot: MealSlot, item_id: i64) -> f64 {
        MenuDay::from_date(date)
            .and_then(|day| self.find(day, slot, item_id))
            .map(|item| item.price)
            .filter(|price| price.is_finite())
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.days
            .values()
            .all(|slots| slots.values().all(Vec::is_empty))
    }
}

/// One employee's standing order for one item on one date.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub target_date: NaiveDate,
    pub meal_slot: MealSlot,
    pub item_id: i64,
    pub item_name: String,
    pub quantity: u32,
    pub last_modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub canceled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Choice {
    pub fn matches(&self, date: NaiveDate, slot: MealSlot, item_id: i64) -> bool {
        self.target_date == date && self.meal_slot == slot && self.item_id == item_id
    }
}

/// Loosely-typed persisted record. Older writers left out `quantity` or
/// `lastModifiedAt`, or stored junk in the quantity.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredChoice {
    target_date: NaiveDate,
    meal_slot: MealSlot,
    item_id: i64,
    item_name: String,
    #[serde(default)]
    quantity: Option<serde_json::Value>,
    #[serde(default)]
    last_modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    canceled: Option<bool>,
    #[serde(default)]
    canceled_at: Option<DateTime<Utc>>,
}

impl StoredChoice {
    fn into_choice(self) -> Option<Choice> {
        let quantity = match self.quantity.as_ref().and_then(serde_json::Value::as_f64) {
            None => 1,
            // Fractions round up so any positive amount still counts
            Some(q) if q.is_finite() && q > 0.0 => q.ceil().min(u32::MAX as f64) as u32,
            // zero or negative: a deleted record
            Some(_) => return None,
        };
        Some(Choice {
            target_date: self.target_date,
            meal_slot: self.meal_slot,
            item_id: self.item_id,
            item_name: self.item_name,
            quantity,
            last_modified_at: self.last_modified_at.unwrap_or_default(),
            canceled: self.canceled.unwrap_or(false),
            canceled_at: self.canceled_at,
        })
    }
}

/// Decode a persisted choice list. A list that isn't a JSON array yields nothing;
/// inside one, each unreadable record is skipped on its own.
pub fn decode_choices(raw: &str) -> Vec<Choice> {
    let records = match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "Malformed choice list, treating as empty");
            return Vec::new();
        }
    };

    records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| {
            match serde_json::from_value::<StoredChoice>(record) {
                Ok(stored) => stored.into_choice(),
                Err(e) => {
                    warn!(index, error = %e, "Skipping unreadable choice record");
                    None
                }
            }
        })
        .collect()
}

/// Decode a persisted weekly menu snapshot. Anything unparseable yields an empty menu.
pub fn decode_menu(raw: &str) -> WeeklyMenu {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(error = %e, "Malformed weekly menu, treating as empty");
        WeeklyMenu::default()
    })
}

/// Per-date opt in/out decisions, keyed by the date being ordered for.
pub type MealDecisions = BTreeMap<NaiveDate, bool>;

pub fn decode_decisions(raw: &str) -> MealDecisions {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(error = %e, "Malformed meal decisions, treating as empty");
        MealDecisions::new()
    })
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemCount {
    pub item_name: String,
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionLine {
    pub meal_slot: MealSlot,
    pub item_id: i64,
    pub item_name: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub line_total: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub target_date: NaiveDate,
    pub decision: Option<bool>,
    pub lines: Vec<SelectionLine>,
    pub total: f64,
    pub seconds_remaining: u64,
    pub mutations_allowed: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChefSummary {
    pub target_date: NaiveDate,
    pub employees: usize,
    pub items: Vec<ItemCount>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MenuOverview {
    pub today: String,
    pub tomorrow: String,
    pub today_menu: Vec<MenuEntry>,
    pub tomorrow_menu: Vec<MenuEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, name: &str, price: f64, day: MenuDay, slot: MealSlot) -> MenuEntry {
        MenuEntry {
            id,
            name: name.to_string(),
            price,
            day,
            slot,
        }
    }

    #[test]
    fn test_meal_slot_accepts_backend_sessions() {
        let slot: MealSlot = serde_json::from_str("\"afternoon\"").unwrap();
        assert_eq!(slot, MealSlot::Lunch);
        assert_eq!("evening".parse::<MealSlot>().unwrap(), MealSlot::Snacks);
        assert!("brunch".parse::<MealSlot>().is_err());
    }

    #[test]
    fn test_menu_day_skips_sunday() {
        let sunday = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(MenuDay::from_date(sunday), None);
        assert_eq!(MenuDay::from_date(monday), Some(MenuDay::Monday));
        assert_eq!("friday".parse::<MenuDay>().unwrap(), MenuDay::Friday);
        assert!("Sunday".parse::<MenuDay>().is_err());
    }

    #[test]
    fn test_weekly_menu_keeps_insertion_order_and_unique_ids() {
        let menu = WeeklyMenu::from_entries(vec![
            entry(2, "Dosa", 30.0, MenuDay::Monday, MealSlot::Breakfast),
            entry(1, "Idli", 40.0, MenuDay::Monday, MealSlot::Breakfast),
            entry(1, "Idli again", 45.0, MenuDay::Monday, MealSlot::Breakfast),
            entry(1, "Rice", 60.0, MenuDay::Monday, MealSlot::Lunch),
        ]);

        let names: Vec<&str> = menu
            .items(MenuDay::Monday, MealSlot::Breakfast)
            .iter()
            .map(|item| item.name.as_str())
            .collect();
        assert_eq!(names, vec!["Dosa", "Idli"]);
        // Same id is fine in a different slot
        assert_eq!(menu.find(MenuDay::Monday, MealSlot::Lunch, 1).unwrap().name, "Rice");
        assert!(menu.items(MenuDay::Saturday, MealSlot::Snacks).is_empty());
    }

    #[test]
    fn test_price_on_resolves_weekday_and_missing_items() {
        let menu = WeeklyMenu::from_entries(vec![entry(
            7,
            "Idli",
            40.0,
            MenuDay::Monday,
            MealSlot::Breakfast,
        )]);
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();

        assert_eq!(menu.price_on(monday, MealSlot::Breakfast, 7), 40.0);
        assert_eq!(menu.price_on(tuesday, MealSlot::Breakfast, 7), 0.0);
        assert_eq!(menu.price_on(monday, MealSlot::Breakfast, 8), 0.0);
    }

    #[test]
    fn test_decode_choices_lenient_quantity() {
        let raw = r#"[
            {"targetDate":"2026-10-19","mealSlot":"breakfast","itemId":1,"itemName":"Idli",
             "lastModifiedAt":"2026-10-18T10:00:00Z"},
            {"targetDate":"2026-10-19","mealSlot":"lunch","itemId":2,"itemName":"Rice",
             "quantity":3,"lastModifiedAt":"2026-10-18T10:00:00Z"},
            {"targetDate":"2026-10-19","mealSlot":"lunch","itemId":3,"itemName":"Dal",
             "quantity":0,"lastModifiedAt":"2026-10-18T10:00:00Z"},
            {"targetDate":"2026-10-19","mealSlot":"snacks","itemId":4,"itemName":"Samosa",
             "quantity":"lots","lastModifiedAt":"2026-10-18T10:00:00Z"}
        ]"#;

        let choices = decode_choices(raw);
        let quantities: Vec<(&str, u32)> = choices
            .iter()
            .map(|c| (c.item_name.as_str(), c.quantity))
            .collect();
        assert_eq!(quantities, vec![("Idli", 1), ("Rice", 3), ("Samosa", 1)]);
        assert!(choices.iter().all(|c| !c.canceled));
    }

    #[test]
    fn test_decode_choices_skips_only_bad_records() {
        let raw = r#"[
            {"targetDate":"2026-10-19","mealSlot":"breakfast","itemId":1,"itemName":"Idli",
             "quantity":5,"lastModifiedAt":"2026-10-18T10:00:00Z"},
            {"targetDate":"2026-10-19","mealSlot":"breakfast","itemId":2,"itemName":"Dosa"},
            {"targetDate":"not a date","mealSlot":"lunch","itemId":3,"itemName":"Rice"},
            {"targetDate":"2026-10-19","mealSlot":"snacks","itemId":4,"itemName":"Tea",
             "quantity":0.5,"lastModifiedAt":"2026-10-18T10:00:00Z"}
        ]"#;

        let choices = decode_choices(raw);
        let quantities: Vec<(&str, u32)> = choices
            .iter()
            .map(|c| (c.item_name.as_str(), c.quantity))
            .collect();
        assert_eq!(quantities, vec![("Idli", 5), ("Dosa", 1), ("Tea", 1)]);
        assert_eq!(choices[1].last_modified_at, DateTime::<Utc>::default());
    }

    #[test]
    fn test_malformed_store_data_is_empty() {
        assert!(decode_choices("{not json").is_empty());
        assert!(decode_choices("{\"a\":1}").is_empty());
        assert!(decode_menu("[1,2,3]").is_empty());
        assert!(decode_decisions("nope").is_empty());
    }

    #[test]
    fn test_choice_serializes_camel_case() {
        let choice = Choice {
            target_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            meal_slot: MealSlot::Lunch,
            item_id: 4,
            item_name: "Rice".to_string(),
            quantity: 2,
            last_modified_at: "2026-10-18T10:00:00Z".parse().unwrap(),
            canceled: false,
            canceled_at: None,
        };
        let json = serde_json::to_value(&choice).unwrap();
        assert_eq!(json["targetDate"], "2026-10-19");
        assert_eq!(json["mealSlot"], "lunch");
        assert!(json.get("canceled").is_none());
    }
}
