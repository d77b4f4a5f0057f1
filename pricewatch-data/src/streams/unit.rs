use super::state::{UnitEvent, UnitState};
use crate::{
    error::DataError,
    event::MarketEvent,
    exchange::{Connector, WsMessage},
    subscription::{Purpose, SymbolSource, UnitId},
};
use futures::{SinkExt, StreamExt};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Notify, mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

/// Callback receiving every normalised event, in arrival order per unit.
///
/// Runs on the read loop, so it must not block: enqueue work, do not perform it inline.
pub type EventCallback = Arc<dyn Fn(MarketEvent) + Send + Sync>;

/// Connection unit configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitConfig {
    /// Fixed delay between a disconnect and the next connection attempt.
    pub reconnect_delay: Duration,
    /// How long an idle unit waits before recomputing an empty symbol set.
    pub idle_wait: Duration,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            idle_wait: Duration::from_secs(10),
        }
    }
}

impl UnitConfig {
    /// Set reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set idle wait
    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }
}

/// Flags shared between a running unit and its [`UnitHandle`].
#[derive(Debug, Default)]
struct Signals {
    stop: AtomicBool,
    resubscribe: AtomicBool,
    wake: Notify,
}

impl Signals {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn take_resubscribe(&self) -> bool {
        self.resubscribe.swap(false, Ordering::AcqRel)
    }
}

/// Handle to a spawned connection unit.
#[derive(Debug)]
pub struct UnitHandle {
    id: UnitId,
    signals: Arc<Signals>,
    state_rx: watch::Receiver<UnitState>,
    task: JoinHandle<()>,
}

impl UnitHandle {
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Current [`UnitState`].
    pub fn state(&self) -> UnitState {
        *self.state_rx.borrow()
    }

    /// Receiver of every [`UnitState`] transition.
    pub fn subscribe_state(&self) -> watch::Receiver<UnitState> {
        self.state_rx.clone()
    }

    /// Ask the unit to recompute its symbol set.
    ///
    /// An idle unit wakes immediately. A subscribed unit checks the signal between messages and
    /// reconnects with the fresh symbol set.
    pub fn resubscribe(&self) {
        self.signals.resubscribe.store(true, Ordering::Release);
        self.signals.wake.notify_one();
    }

    /// Set the cooperative stop flag.
    ///
    /// Observed at the top of every loop iteration and between messages. An in-flight read is
    /// not interrupted, so a subscribed unit stops once its next message or close arrives.
    pub fn stop(&self) {
        self.signals.stop.store(true, Ordering::Release);
        self.signals.wake.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the unit and wait for its task to exit.
    pub async fn join(self) {
        self.stop();
        if let Err(error) = self.task.await {
            error!(unit = %self.id, ?error, "connection unit task failed");
        }
    }
}

/// One supervised connection per (exchange, purpose) pair.
pub struct ConnectionUnit<C> {
    connector: C,
    purpose: Purpose,
    symbols: Arc<dyn SymbolSource>,
    callback: EventCallback,
    config: UnitConfig,
}

impl<C> ConnectionUnit<C>
where
    C: Connector,
{
    pub fn new(
        connector: C,
        purpose: Purpose,
        symbols: Arc<dyn SymbolSource>,
        callback: EventCallback,
        config: UnitConfig,
    ) -> Self {
        Self {
            connector,
            purpose,
            symbols,
            callback,
            config,
        }
    }

    pub fn id(&self) -> UnitId {
        UnitId::new(C::ID, self.purpose)
    }

    /// Spawn the unit onto the tokio runtime.
    pub fn spawn(self) -> UnitHandle {
        let id = self.id();
        let signals = Arc::new(Signals::default());
        let (state_tx, state_rx) = watch::channel(UnitState::Idle);

        let task = tokio::spawn(self.run(Arc::clone(&signals), state_tx));

        UnitHandle {
            id,
            signals,
            state_rx,
            task,
        }
    }

    async fn run(self, signals: Arc<Signals>, state_tx: watch::Sender<UnitState>) {
        let id = self.id();
        let transition = |event: UnitEvent| {
            state_tx.send_if_modified(|state| {
                let next = state.next(event);
                if next != *state {
                    debug!(unit = %id, from = %state, to = %next, "connection unit transition");
                    *state = next;
                    true
                } else {
                    false
                }
            });
        };

        info!(unit = %id, "starting connection unit");

        loop {
            if signals.stopped() {
                break;
            }

            // Symbol set is fixed for the lifetime of this attempt
            let symbols = self.symbols.symbols();
            if symbols.is_empty() {
                transition(UnitEvent::SymbolsEmpty);
                debug!(unit = %id, "no symbols to subscribe, waiting");
                tokio::select! {
                    _ = tokio::time::sleep(self.config.idle_wait) => {}
                    _ = signals.wake.notified() => {}
                }
                signals.take_resubscribe();
                continue;
            }

            transition(UnitEvent::SymbolsReady);
            signals.take_resubscribe();

            match self.session(&symbols, &signals, &transition).await {
                Ok(SessionEnd::Resubscribe) => {
                    info!(unit = %id, "resubscribing with refreshed symbol set");
                    transition(UnitEvent::Resubscribe);
                    continue;
                }
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::Closed) => {
                    warn!(unit = %id, "connection closed, will reconnect...");
                }
                Err(error) if error.is_transient() => {
                    warn!(unit = %id, %error, "connection failed, will reconnect...");
                }
                Err(error) => {
                    error!(unit = %id, %error, "connection failed, will reconnect...");
                }
            }

            if signals.stopped() {
                break;
            }

            transition(UnitEvent::Disconnected);
            debug!(
                unit = %id,
                "Waiting {:?} before reconnecting...",
                self.config.reconnect_delay
            );
            tokio::time::sleep(self.config.reconnect_delay).await;
            transition(UnitEvent::BackoffElapsed);
        }

        transition(UnitEvent::Stop);
        info!(unit = %id, "connection unit stopped");
    }

    /// Connect, subscribe and read until the connection ends.
    async fn session<F>(
        &self,
        symbols: &[smol_str::SmolStr],
        signals: &Signals,
        transition: &F,
    ) -> Result<SessionEnd, DataError>
    where
        F: Fn(UnitEvent),
    {
        let id = self.id();
        let url = self.connector.url(self.purpose, symbols)?;

        let (websocket, _) = connect_async(url.as_str()).await?;
        info!(unit = %id, %url, symbols = symbols.len(), "connected");

        let (mut write, mut read) = websocket.split();
        for request in self.connector.requests(self.purpose, symbols) {
            write.send(request).await?;
        }
        transition(UnitEvent::Subscribed);

        // Keep-alive task owns the write half for the rest of the session
        let (ping_shutdown_tx, mut ping_shutdown_rx) = mpsc::channel::<()>(1);
        let ping = self.connector.ping_interval();
        let ping_task = tokio::spawn(async move {
            let Some(ping) = ping else {
                let _ = ping_shutdown_rx.recv().await;
                return;
            };
            let mut interval =
                tokio::time::interval_at(Instant::now() + ping.interval, ping.interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if write.send((ping.ping)()).await.is_err() {
                            debug!("Failed to send ping, connection likely dead");
                            break;
                        }
                    }
                    _ = ping_shutdown_rx.recv() => break,
                }
            }
        });

        let mut end = SessionEnd::Closed;
        while let Some(message) = read.next().await {
            match message {
                Ok(WsMessage::Text(text)) => self.dispatch(text.as_str()),
                Ok(WsMessage::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.dispatch(text),
                    Err(error) => debug!(unit = %id, %error, "dropping non utf-8 binary frame"),
                },
                Ok(WsMessage::Close(frame)) => {
                    info!(unit = %id, ?frame, "server closed connection");
                    break;
                }
                Ok(_) => {
                    // Ping/Pong heartbeats are answered by tungstenite
                }
                Err(error) => {
                    warn!(unit = %id, %error, "WebSocket error");
                    break;
                }
            }

            if signals.stopped() {
                end = SessionEnd::Stopped;
                break;
            }
            if signals.take_resubscribe() {
                end = SessionEnd::Resubscribe;
                break;
            }
        }

        let _ = ping_shutdown_tx.send(()).await;
        let _ = ping_task.await;

        if signals.stopped() {
            end = SessionEnd::Stopped;
        }
        Ok(end)
    }

    fn dispatch(&self, payload: &str) {
        match self.connector.parse(self.purpose, payload) {
            Ok(events) => events.into_iter().for_each(|event| (self.callback)(event)),
            Err(error) => debug!(unit = %self.id(), %error, "dropping unparseable message"),
        }
    }
}

/// Reason a connected session ended without a transport error.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum SessionEnd {
    Closed,
    Stopped,
    Resubscribe,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::DataKind,
        exchange::okx::Okx,
        subscription::StaticSymbols,
    };
    use parking_lot::Mutex;
    use smol_str::SmolStr;
    use tokio::{net::TcpListener, sync::oneshot, time::timeout};
    use tokio_tungstenite::accept_async;

    const OKX_TRADE: &str = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"1","px":"50000","sz":"20","side":"buy","ts":"1630048897897"}]}"#;

    fn channel_callback() -> (EventCallback, mpsc::UnboundedReceiver<MarketEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: EventCallback = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (callback, rx)
    }

    fn fast_config() -> UnitConfig {
        UnitConfig::default()
            .with_reconnect_delay(Duration::from_millis(50))
            .with_idle_wait(Duration::from_secs(3600))
    }

    #[test]
    fn test_default_config() {
        let config = UnitConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.idle_wait, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_unit_subscribes_normalises_and_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (close_tx, close_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let subscribe = ws.next().await.unwrap().unwrap();
            ws.send(WsMessage::text(OKX_TRADE)).await.unwrap();
            let _ = close_rx.await;
            let _ = ws.close(None).await;
            subscribe.to_text().unwrap().to_owned()
        });

        let (callback, mut events) = channel_callback();
        let handle = ConnectionUnit::new(
            Okx::default().with_base_url(format!("ws://{addr}")),
            Purpose::Trades,
            Arc::new(StaticSymbols::new(vec![SmolStr::new("BTC")])),
            callback,
            fast_config(),
        )
        .spawn();

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.symbol, "BTC");
        match event.kind {
            DataKind::Trade(trade) => assert_eq!(trade.value_usd, 1_000_000.0),
            other => panic!("unexpected kind: {other:?}"),
        }
        assert_eq!(handle.state(), UnitState::Subscribed);

        let state_rx = handle.subscribe_state();
        handle.stop();
        close_tx.send(()).unwrap();

        let subscribe = server.await.unwrap();
        assert!(subscribe.contains(r#""instId":"BTC-USDT""#));

        timeout(Duration::from_secs(5), handle.join()).await.unwrap();
        assert_eq!(*state_rx.borrow(), UnitState::Idle);
    }

    #[tokio::test]
    async fn test_unit_reconnects_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // First connection is closed straight after the subscription arrives
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            let _ = ws.close(None).await;

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            ws.send(WsMessage::text(OKX_TRADE)).await.unwrap();
            ws
        });

        let (callback, mut events) = channel_callback();
        let handle = ConnectionUnit::new(
            Okx::default().with_base_url(format!("ws://{addr}")),
            Purpose::Trades,
            Arc::new(StaticSymbols::new(vec![SmolStr::new("BTC")])),
            callback,
            fast_config(),
        )
        .spawn();

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.exchange, crate::exchange::ExchangeId::Okx);

        handle.stop();
        let mut ws = server.await.unwrap();
        let _ = ws.close(None).await;
        timeout(Duration::from_secs(5), handle.join()).await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_unit_wakes_on_resubscribe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let symbols = Arc::new(Mutex::new(Vec::<SmolStr>::new()));
        let source = {
            let symbols = Arc::clone(&symbols);
            move || symbols.lock().clone()
        };

        let (callback, _events) = channel_callback();
        let handle = ConnectionUnit::new(
            Okx::default().with_base_url(format!("ws://{addr}")),
            Purpose::Trades,
            Arc::new(source),
            callback,
            fast_config(),
        )
        .spawn();

        // No symbols: the unit must stay idle without connecting
        let accept = timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accept.is_err());
        assert_eq!(handle.state(), UnitState::Idle);

        symbols.lock().push(SmolStr::new("ETH"));
        handle.resubscribe();

        let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let subscribe = ws.next().await.unwrap().unwrap();
        assert!(subscribe.to_text().unwrap().contains("ETH-USDT"));

        handle.stop();
        let _ = ws.close(None).await;
        timeout(Duration::from_secs(5), handle.join()).await.unwrap();
    }
}
