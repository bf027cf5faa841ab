//! Print a saved Eve history, and the frames the history viewer would read from it.

mod config;

use crate::config::Config;
use eve_history::codec::{to_base64, EMPTY_FRAME};
use eve_history::{AccessoryType, History, Scheduler};
use eyre::Report;

#[tokio::main]
async fn main() -> Result<(), Report> {
    stable_eyre::install()?;
    pretty_env_logger::init();
    color_backtrace::install();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eyre::bail!(
            "USAGE: {} <type> <accessory name> [custom fields...]",
            args[0]
        );
    }
    let accessory_type: AccessoryType = args[1].parse()?;
    let name = &args[2];
    let config = Config::from_file()?;

    // Nothing is appended here, so there is no need for a running clock.
    let mut options = config.history;
    options.disable_timer = true;
    let scheduler = Scheduler::new(options.tick_interval());

    let mut builder = History::builder(accessory_type, name);
    builder.set_options(options);
    for field in &args[3..] {
        builder.add_custom_field(field)?;
    }
    println!(
        "Reading {}",
        config.storage_path.join(builder.snapshot_key()).display()
    );
    builder.set_storage_path(&config.storage_path);
    let history = builder.spawn(&scheduler);
    history.wait_loaded().await?;

    let entries: Vec<String> = history
        .with_log(|log| {
            log.entries()
                .map(|(index, entry)| format!("{:>5} {}", index, entry))
                .collect()
        })
        .await;
    println!("{} entries", entries.len());
    for entry in entries {
        println!("{}", entry);
    }
    if let Some(initial_time) = history.initial_time().await {
        println!("Initial time: {}", initial_time);
    }
    println!("Extra data: {}", history.extra_persisted_data().await);
    println!("Status: {}", history.status().await);

    let empty = to_base64(&EMPTY_FRAME);
    history.begin_transfer(0).await;
    loop {
        let chunk = history.read_data().await;
        if chunk == empty {
            break;
        }
        println!("Data: {}", chunk);
    }

    scheduler.shutdown();
    Ok(())
}
