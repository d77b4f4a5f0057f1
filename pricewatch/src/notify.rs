use crate::model::Market;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Embed colours.
pub mod colour {
    pub const CRYPTO: u32 = 0xF7931A;
    pub const US_STOCK: u32 = 0x0066CC;
    pub const KR_STOCK: u32 = 0xFF6B6B;
    pub const SUCCESS: u32 = 0x00FF00;
    pub const WARNING: u32 = 0xFFAA00;
    pub const ERROR: u32 = 0xFF0000;
}

/// Logical notification channel. One per market plus whale, volume and system messages.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[display("crypto")]
    Crypto,
    #[display("us_stock")]
    UsStock,
    #[display("kr_stock")]
    KrStock,
    #[display("whale")]
    Whale,
    #[display("volume")]
    Volume,
    #[display("system")]
    System,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Crypto,
        Channel::UsStock,
        Channel::KrStock,
        Channel::Whale,
        Channel::Volume,
        Channel::System,
    ];
}

impl From<Market> for Channel {
    fn from(market: Market) -> Self {
        match market {
            Market::Crypto => Channel::Crypto,
            Market::UsEquity => Channel::UsStock,
            Market::KrEquity => Channel::KrStock,
        }
    }
}

/// Single `name: value` line of a [`Notification`].
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Structured message accepted by a [`Notifier`].
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Notification {
    pub channel: Channel,
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<Field>,
    pub colour: u32,
    pub time: DateTime<Utc>,
}

impl Notification {
    pub fn new(channel: Channel, title: impl Into<String>) -> Self {
        Self {
            channel,
            title: title.into(),
            description: None,
            fields: Vec::new(),
            colour: colour::SUCCESS,
            time: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            inline: true,
        });
        self
    }

    pub fn with_colour(mut self, colour: u32) -> Self {
        self.colour = colour;
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Plain text rendering, used for logs and text only sinks.
    pub fn to_text(&self) -> String {
        let mut text = self.title.clone();
        if let Some(description) = &self.description {
            text.push('\n');
            text.push_str(description);
        }
        for field in &self.fields {
            text.push_str(&format!("\n{}: {}", field.name, field.value));
        }
        text
    }
}

/// Outbound notification delivery.
///
/// Returns `true` on confirmed delivery. Failures are reported through the return value and
/// must never panic into the calling detector.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> bool;
}

/// [`Notifier`] that writes every notification to the log. Used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> bool {
        info!(
            channel = %notification.channel,
            title = %notification.title,
            "{}",
            notification.to_text()
        );
        true
    }
}

/// Group the integer digits of an already formatted number with commas.
fn group_thousands(formatted: &str) -> String {
    let (sign, unsigned) = match formatted.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", formatted),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

/// Format a price with precision scaled to its magnitude.
///
/// `>= 1000`: `$50,000.00`, `>= 1`: `$1.2345`, otherwise `$0.00001234`.
pub fn format_price(price: f64) -> String {
    let magnitude = price.abs();
    let formatted = if magnitude >= 1_000.0 {
        group_thousands(&format!("{magnitude:.2}"))
    } else if magnitude >= 1.0 {
        format!("{magnitude:.4}")
    } else {
        format!("{magnitude:.8}")
    };

    if price.is_sign_negative() && magnitude > 0.0 {
        format!("-${formatted}")
    } else {
        format!("${formatted}")
    }
}

/// Format a USD notional compactly: `$1.25B`, `$1.00M`, `$950,000`.
pub fn format_usd_compact(value: f64) -> String {
    if value >= 1_000_000_000.0 {
        format!("${:.2}B", value / 1_000_000_000.0)
    } else if value >= 1_000_000.0 {
        format!("${:.2}M", value / 1_000_000.0)
    } else {
        format!("${}", group_thousands(&format!("{value:.0}")))
    }
}

/// Format a base asset volume: `12.3K` above one thousand, whole units otherwise.
pub fn format_volume(volume: f64) -> String {
    if volume >= 1_000.0 {
        format!("{:.1}K", volume / 1_000.0)
    } else {
        format!("{volume:.0}")
    }
}
