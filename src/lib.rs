pub mod choices;
pub mod commands;
pub mod config;
pub mod cutoff;
pub mod db;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod summary;


use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::choices::EmployeeSession;
use commands::{menu, reports};
use config::Config;
use db::{Database, MENU_KEY};
use models::{CreateMenuItem, MealSlot, MenuDay, Role, UpdateMenuItem};
use scheduler::{Scheduler, TokioScheduler};

#[derive(Parser)]
#[command(name = "karmic-canteen", about = "Canteen menu and next-day meal ordering")]
pub struct Cli {
    /// Which dashboard to act as
    #[arg(long, global = true, default_value = "employee")]
    role: Role,

    /// Employee or chef id, e.g. EMP001
    #[arg(long, global = true, default_value = "EMP001")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Weekly menu management
    #[command(subcommand)]
    Menu(MenuCommand),
    /// Your order for the next service day
    #[command(subcommand)]
    Order(OrderCommand),
    /// Kitchen counts per item (chef)
    Summary(DateArg),
    /// Live countdown to the ordering cutoff, with your running total
    Countdown(DateArg),
}

#[derive(Args)]
struct DateArg {
    /// Service date, defaults to tomorrow
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum MenuCommand {
    List,
    Show,
    Overview,
    Add {
        #[arg(long)]
        day: MenuDay,
        #[arg(long)]
        slot: MealSlot,
        #[arg(long, default_value = "New Item")]
        name: String,
        #[arg(long, default_value_t = 0.0)]
        price: f64,
    },
    Edit {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        price: f64,
    },
    Delete {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum OrderCommand {
    Show(DateArg),
    Adjust {
        #[arg(long)]
        slot: MealSlot,
        #[arg(long)]
        item: i64,
        #[arg(long, allow_hyphen_values = true)]
        delta: i32,
        #[command(flatten)]
        date: DateArg,
    },
    Remove {
        #[arg(long)]
        slot: MealSlot,
        #[arg(long)]
        item: Option<i64>,
        #[command(flatten)]
        date: DateArg,
    },
    /// Will you eat at the canteen? yes or no
    Decide {
        #[arg(action = clap::ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
        will_order: bool,
        #[command(flatten)]
        date: DateArg,
    },
    Cancel {
        #[arg(long)]
        slot: MealSlot,
        #[arg(long)]
        item: i64,
        #[command(flatten)]
        date: DateArg,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn run() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let db = Arc::new(Database::new(&config.database_path)?);
    db.initialize()?;

    match execute(&db, &config, cli) {
        Err(e) => match e.downcast::<error::CanteenError>() {
            Ok(canteen) if canteen.is_user_facing() => {
                print_json(&serde_json::json!({ "error": canteen }))?;
                std::process::exit(1);
            }
            Ok(canteen) => Err(canteen.into()),
            Err(other) => Err(other),
        },
        ok => ok,
    }
}

fn execute(db: &Arc<Database>, config: &Config, cli: Cli) -> anyhow::Result<()> {
    let policy = config.cutoff_policy();
    let now = Utc::now();
    let service_date = |arg: &DateArg| arg.date.unwrap_or_else(|| policy.service_date(now));

    match cli.command {
        Command::Menu(cmd) => match cmd {
            MenuCommand::List => print_json(&menu::list_menu_items(db)?),
            MenuCommand::Show => print_json(&menu::get_weekly_menu(db)?),
            MenuCommand::Overview => print_json(&menu::get_menu_overview(db, &policy, now)?),
            MenuCommand::Add { day, slot, name, price } => print_json(&menu::add_menu_item(
                db,
                cli.role,
                CreateMenuItem { day, slot, name, price },
            )?),
            MenuCommand::Edit { id, name, price } => print_json(&menu::edit_menu_item(
                db,
                cli.role,
                UpdateMenuItem { id, name, price },
            )?),
            MenuCommand::Delete { id } => {
                menu::delete_menu_item(db, cli.role, id)?;
                print_json(&serde_json::json!({ "message": "Menu item deleted" }))
            }
        },
        Command::Order(cmd) => {
            commands::require_role(cli.role, Role::Employee)?;
            let mut session = EmployeeSession::load(db, &cli.user, policy);
            let date = match &cmd {
                OrderCommand::Show(d) => service_date(d),
                OrderCommand::Adjust { date, .. }
                | OrderCommand::Remove { date, .. }
                | OrderCommand::Decide { date, .. }
                | OrderCommand::Cancel { date, .. } => service_date(date),
            };
            match cmd {
                OrderCommand::Show(_) => {}
                OrderCommand::Adjust { slot, item, delta, .. } => {
                    session.adjust_quantity(db, now, date, slot, item, delta)?;
                }
                OrderCommand::Remove { slot, item, .. } => {
                    session.delete_choice(db, now, date, slot, item)?;
                }
                OrderCommand::Decide { will_order, .. } => {
                    session.record_decision(db, now, date, will_order)?;
                }
                OrderCommand::Cancel { slot, item, .. } => {
                    session.cancel_choice(db, now, date, slot, item)?;
                }
            }
            print_json(&session.order_summary(now, date))
        }
        Command::Summary(arg) => {
            print_json(&reports::get_chef_summary(db, cli.role, &policy, service_date(&arg))?)
        }
        Command::Countdown(arg) => {
            let session = (cli.role == Role::Employee)
                .then(|| EmployeeSession::load(db, &cli.user, policy));
            countdown(db, config, session, service_date(&arg))
        }
    }
}

/// Print the time left every tick until the cutoff passes or Ctrl-C. An employee
/// also sees their total, which follows menu and order changes made elsewhere.
fn countdown(
    db: &Arc<Database>,
    config: &Config,
    session: Option<EmployeeSession>,
    date: NaiveDate,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let scheduler = TokioScheduler::new(config.tick_interval, db.change_feed())?;
        let (closed_tx, mut closed_rx) = tokio::sync::mpsc::unbounded_channel::<()>();

        let session = session.map(|s| Arc::new(Mutex::new(s)));
        let watchers = match &session {
            Some(shared) => EmployeeSession::watch(shared, db, &scheduler)?,
            None => vec![scheduler.on_external_change(
                MENU_KEY,
                Box::new(|key: &str| info!(key, "Menu was republished")),
            )],
        };

        let policy = config.cutoff_policy();
        let mut last_shown: Option<(u64, String)> = None;
        let ticks = scheduler.on_tick(Box::new(move || {
            let (countdown, total) = match session.as_ref().map(|s| s.lock()) {
                Some(Ok(s)) => (
                    s.policy().countdown(Utc::now(), date),
                    format!(", your total {:.2}", s.order_total(date)),
                ),
                Some(Err(_)) => {
                    warn!("Session lock poisoned");
                    (policy.countdown(Utc::now(), date), String::new())
                }
                None => (policy.countdown(Utc::now(), date), String::new()),
            };
            let shown = (countdown.remaining_secs, total);
            if last_shown.as_ref() != Some(&shown) {
                println!("{date} closes in {countdown} ({:?}){}", countdown.urgency, shown.1);
                last_shown = Some(shown);
            }
            if countdown.remaining_secs == 0 {
                let _ = closed_tx.send(());
            }
        }));

        tokio::select! {
            _ = closed_rx.recv() => info!(%date, "Ordering closed"),
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "Could not listen for Ctrl-C");
                }
            }
        }

        ticks.cancel();
        drop(watchers);
        Ok::<_, anyhow::Error>(())
    })
}
