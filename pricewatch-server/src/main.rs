use pricewatch::{
    AppContext, Channel, Config, LogNotifier, Notification, Notifier, Providers, notify::colour,
};
use pricewatch_data::{
    QuoteProvider,
    provider::{StaticToken, binance::BinanceRest, kis::KisQuote, yahoo::YahooChart},
};
use std::sync::Arc;
use tracing::{error, info, warn};

mod webhook;

use webhook::WebhookNotifier;

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting pricewatch");

    let config = Config::from_env();
    info!(
        webhooks = !config.webhooks.is_empty(),
        whale = config.whale.enabled,
        volume = config.volume.enabled,
        "loaded configuration"
    );

    let client = reqwest::Client::new();

    let notifier: Arc<dyn Notifier> = if config.webhooks.is_empty() {
        warn!("No webhooks configured, alerts will only be logged");
        Arc::new(LogNotifier)
    } else {
        Arc::new(WebhookNotifier::new(client.clone(), config.webhooks.clone()))
    };

    let providers = providers(&config, client);
    let context = AppContext::new(config, providers, Arc::clone(&notifier));
    context.start();

    system_message(notifier.as_ref(), "Pricewatch started", colour::SUCCESS).await;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(error) => error!(%error, "failed to listen for Ctrl-C, shutting down"),
    }

    context.stop().await;
    system_message(notifier.as_ref(), "Pricewatch stopped", colour::WARNING).await;
}

/// Live market data providers sharing one HTTP client.
///
/// The KR equity poller only runs when KIS credentials and an access token are configured.
fn providers(config: &Config, client: reqwest::Client) -> Providers {
    let binance = Arc::new(BinanceRest::new(client.clone()));
    let yahoo = Arc::new(YahooChart::new(client.clone()));

    let kr_quotes = match config.kis.credentials() {
        Some((credentials, token)) => {
            let quotes: Arc<dyn QuoteProvider> = Arc::new(KisQuote::new(
                client,
                credentials,
                Arc::new(StaticToken::new(token)),
            ));
            Some(quotes)
        }
        None => {
            warn!("KIS credentials missing, KR equity monitor disabled");
            None
        }
    };

    Providers {
        crypto_candles: binance.clone(),
        crypto_quotes: binance,
        index_candles: yahoo.clone(),
        us_quotes: yahoo,
        kr_quotes,
    }
}

async fn system_message(notifier: &dyn Notifier, title: &str, colour: u32) {
    let notification = Notification::new(Channel::System, title).with_colour(colour);
    if !notifier.send(notification).await {
        warn!(title, "failed to deliver system message");
    }
}

/// Initialize logging
///
/// `RUST_LOG` filters as usual (default `info`), `LOG_FORMAT=json` switches to JSON lines.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
