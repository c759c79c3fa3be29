use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mflc_site::{
    BibleApiClient, Clock, SystemClock, calendar, config::AppConfig, daily_image_index,
    pick_verse_of_day, schedule, server, today_key,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "mflc-site")]
#[command(about = "Verse of the day, service schedule and contact relay for the MFLC website")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Print today's verse
    Votd,
    /// Print the next scheduled services
    Upcoming {
        #[arg(long)]
        count: Option<usize>,
    },
    /// Write a featured event's calendar file
    Ics {
        /// Position of the event in the featured list
        #[arg(long, default_value_t = 0)]
        index: usize,
        /// Output path (defaults to a name derived from the event title)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("mflc_site=debug,tower_http=info");

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => rt.block_on(async {
            tracing::info!("Starting MFLC site server");
            server::serve(&config).await
        }),
        Command::Votd => rt.block_on(print_verse(&config)),
        Command::Upcoming { count } => print_upcoming(&config, count),
        Command::Ics { index, out } => write_calendar(&config, index, out),
    }
}

/// Fetch and print today's verse straight from the API
async fn print_verse(config: &AppConfig) -> Result<()> {
    let tz = config.site.tz()?;
    let (Some(bible_id), Some(api_key)) = (&config.bible.bible_id, &config.bible.api_key) else {
        anyhow::bail!("Bible API is not configured (set BIBLE_BIBLE_ID and BIBLE_API_KEY)");
    };
    let client = BibleApiClient::new(
        &config.bible.api_url,
        bible_id.clone(),
        api_key.clone(),
        &config.network,
    )?;

    let now = SystemClock.now_utc();
    let selection = pick_verse_of_day(now, tz, &client).await?;
    println!("{}", selection.text);
    println!("  {} ({})", selection.reference, client.bible_id());
    println!("  image{}.jpeg", daily_image_index(today_key(now, tz)));
    Ok(())
}

fn print_upcoming(config: &AppConfig, count: Option<usize>) -> Result<()> {
    let tz = config.site.tz()?;
    let anchor = schedule::local_today_start(SystemClock.now_utc(), tz).date();
    let count = count.unwrap_or(config.events.upcoming_count);

    for occurrence in
        schedule::upcoming_within(anchor, &schedule::SERVICE_RULES, count, config.events.weeks)
    {
        let display = occurrence.display();
        println!(
            "{} {} {} {:>8}  {}",
            display.weekday_short, display.day, display.month_short, display.time, occurrence.title
        );
    }
    Ok(())
}

fn write_calendar(config: &AppConfig, index: usize, out: Option<PathBuf>) -> Result<()> {
    let tz = config.site.tz()?;
    let event = config
        .events
        .featured
        .get(index)
        .with_context(|| format!("No featured event at index {index}"))?;

    let uid_base = uuid::Uuid::new_v4().simple().to_string();
    let ics = calendar::to_calendar_file(event, tz, &uid_base)?;
    let path = out.unwrap_or_else(|| PathBuf::from(calendar::calendar_file_name(&event.title)));

    std::fs::write(&path, ics).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Wrote {} occurrence(s) to {}", event.occurrences.len(), path.display());
    Ok(())
}
