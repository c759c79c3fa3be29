use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::calendar::{FeaturedEvent, FeaturedOccurrence};
use crate::schedule::DEFAULT_WEEKS;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub site: SiteConfig,
    pub bible: BibleConfig,
    pub network: NetworkConfig,
    pub mail: MailConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    /// Short name used in email subjects and calendar identifiers.
    pub name: String,
    /// IANA timezone that defines the site's calendar day.
    pub timezone: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "MFLC".to_string(),
            timezone: "America/New_York".to_string(),
        }
    }
}

impl SiteConfig {
    /// Parse the configured timezone name.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Invalid site timezone {:?}: {}", self.timezone, e))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BibleConfig {
    pub api_url: String,
    pub bible_id: Option<String>,
    pub api_key: Option<String>,
}

impl Default for BibleConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.scripture.api.bible/v1".to_string(),
            bible_id: None,
            api_key: None,
        }
    }
}

impl BibleConfig {
    /// Both the bible id and the API key are present.
    pub fn is_complete(&self) -> bool {
        self.bible_id.as_deref().is_some_and(|s| !s.is_empty())
            && self.api_key.as_deref().is_some_and(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    /// Inbox that receives contact submissions.
    pub to: Option<String>,
    /// Verified sender address.
    pub from: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.resend.com".to_string(),
            api_key: None,
            to: None,
            from: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    pub upcoming_count: usize,
    pub weeks: u32,
    #[serde(default = "default_featured_events")]
    pub featured: Vec<FeaturedEvent>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            upcoming_count: 2,
            weeks: DEFAULT_WEEKS,
            featured: default_featured_events(),
        }
    }
}

impl EventsConfig {
    /// The schedule horizon must cover the month-end services.
    pub fn validate(&self) -> Result<()> {
        if self.weeks < DEFAULT_WEEKS {
            return Err(anyhow!(
                "events.weeks must be at least {}, got {}",
                DEFAULT_WEEKS,
                self.weeks
            ));
        }
        Ok(())
    }
}

/// The anniversary celebration shipped with the site.
pub fn default_featured_events() -> Vec<FeaturedEvent> {
    let address = "191 North Broadway, Yonkers, NY 10701";
    vec![FeaturedEvent {
        title: "14º Aniversario".to_string(),
        address: address.to_string(),
        maps_query: address.to_string(),
        description: "Celebra con nosotros el aniversario de nuestro ministerio con alabanza, \
                      palabra y compañerismo. ¡Todos son bienvenidos!"
            .to_string(),
        occurrences: vec![
            FeaturedOccurrence::new("Aniversario (Día 1)", "09/12/2025", "7:30 PM"),
            FeaturedOccurrence::new("Aniversario (Día 2)", "09/13/2025", "7:00 PM"),
            FeaturedOccurrence::new("Aniversario (Día 3)", "09/14/2025", "2:30 PM"),
        ],
    }]
}

fn env_secret(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Defaults, then `./config.toml`, then the user config directory, then env.
    pub fn load() -> Result<Self> {
        // Load .env file (silently ignore if not present - production uses env vars directly)
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mflc-site");

        Self::load_from(&[PathBuf::from("config.toml"), config_dir.join("config.toml")])
    }

    /// Layer the given TOML files (later wins, missing ones skipped) between
    /// the defaults and the environment.
    pub fn load_from(files: &[PathBuf]) -> Result<Self> {
        // Secrets keep the names the hosting dashboard already uses
        let bible_id = env_secret("BIBLE_BIBLE_ID");
        let bible_key = env_secret("BIBLE_API_KEY");
        let mail_key = env_secret("RESEND_API_KEY");
        let mail_to = env_secret("CONTACT_TO_EMAIL");
        let mail_from = env_secret("CONTACT_FROM_EMAIL");

        let mut builder = Config::builder()
            // 1. Load default values
            // Server
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            // Site
            .set_default("site.name", "MFLC")?
            .set_default("site.timezone", "America/New_York")?
            // Bible content API
            .set_default("bible.api_url", "https://api.scripture.api.bible/v1")?
            .set_default("bible.bible_id", bible_id)?
            .set_default("bible.api_key", bible_key)?
            // Network
            .set_default("network.request_timeout_secs", 30)?
            .set_default("network.connect_timeout_secs", 10)?
            // Mail relay
            .set_default("mail.api_url", "https://api.resend.com")?
            .set_default("mail.api_key", mail_key)?
            .set_default("mail.to", mail_to)?
            .set_default("mail.from", mail_from)?
            // Events
            .set_default("events.upcoming_count", 2)?
            .set_default("events.weeks", i64::from(DEFAULT_WEEKS))?;

        // 2. Config files (optional, later files override earlier ones)
        for file in files {
            builder = builder.add_source(File::from(file.clone()).required(false));
        }

        // 3. Environment variables (MFLC__SITE__TIMEZONE=...)
        let builder = builder.add_source(Environment::with_prefix("MFLC").separator("__"));

        let s = builder.build().context("Failed to assemble configuration sources")?;
        let config: Self = s.try_deserialize()?;

        // Fail at startup rather than on the first request
        config.site.tz()?;
        config.events.validate()?;

        Ok(config)
    }
}
