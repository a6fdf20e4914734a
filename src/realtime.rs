//! Realtime control channel: a long-lived WebSocket whose only job is to
//! tell the engine "something changed, pull". Payloads are opaque and never
//! carry data.
//!
//! The socket is read on its own async thread; engine callbacks (which do
//! blocking HTTP) run on a separate dispatch thread so a slow pull never
//! stalls the read loop.

use crate::context::SessionContext;
use crate::sync::SyncEngine;
use futures_util::StreamExt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(500);

enum Signal {
    /// First inbound message of a connection.
    Connected,
    Notification,
    Disconnected,
}

pub struct RealtimeChannel {
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl RealtimeChannel {
    /// Connect-and-reconnect forever until the engine stops.
    pub fn spawn(engine: Arc<SyncEngine>, session: Arc<SessionContext>, ws_url: String) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let reader_engine = Arc::clone(&engine);
        let reader = std::thread::spawn(move || run_reader(reader_engine, session, ws_url, tx));
        let dispatcher = std::thread::spawn(move || run_dispatcher(engine, rx));
        Self { reader, dispatcher }
    }

    /// Wait for both threads; call after the engine has been stopped.
    pub fn join(self) {
        let _ = self.reader.join();
        let _ = self.dispatcher.join();
    }
}

fn run_dispatcher(engine: Arc<SyncEngine>, rx: mpsc::Receiver<Signal>) {
    for signal in rx {
        match signal {
            Signal::Connected => {
                engine.set_online(true);
                engine.on_back_online();
            }
            Signal::Notification => engine.on_realtime_notification(""),
            Signal::Disconnected => engine.set_online(false),
        }
        if engine.stopped() {
            return;
        }
    }
}

fn run_reader(
    engine: Arc<SyncEngine>,
    session: Arc<SessionContext>,
    ws_url: String,
    tx: mpsc::Sender<Signal>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "realtime channel could not build a runtime");
            return;
        }
    };
    runtime.block_on(async move {
        loop {
            if engine.stopped() {
                return;
            }
            // A token that will only 401 is not worth a connect storm.
            if session.is_token_expired() || session.current_wallet().is_none() {
                if sleep_until_stopped(&engine, RECONNECT_DELAY).await {
                    return;
                }
                continue;
            }
            let url = subscribe_url(&ws_url, &session);
            match connect_async(url.as_str()).await {
                Ok((mut stream, _response)) => {
                    debug!("realtime channel connected");
                    let mut announced = false;
                    loop {
                        tokio::select! {
                            msg = stream.next() => match msg {
                                Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                                    if !announced {
                                        announced = true;
                                        let _ = tx.send(Signal::Connected);
                                    }
                                    let _ = tx.send(Signal::Notification);
                                }
                                Some(Ok(_)) => {} // ping/pong and close frames
                                Some(Err(e)) => {
                                    warn!(error = %e, "realtime channel errored");
                                    break;
                                }
                                None => break,
                            },
                            _ = tokio::time::sleep(STOP_POLL) => {
                                if engine.stopped() {
                                    return;
                                }
                            }
                        }
                    }
                    let _ = tx.send(Signal::Disconnected);
                }
                Err(e) => {
                    debug!(error = %e, "realtime connect failed");
                    let _ = tx.send(Signal::Disconnected);
                }
            }
            if sleep_until_stopped(&engine, RECONNECT_DELAY).await {
                return;
            }
        }
    });
}

fn subscribe_url(ws_url: &str, session: &SessionContext) -> String {
    let mut url = ws_url.to_string();
    let mut sep = if url.contains('?') { '&' } else { '?' };
    if let Some(token) = session.token() {
        url.push(sep);
        url.push_str("token=");
        url.push_str(&token);
        sep = '&';
    }
    if let Some(wallet) = session.current_wallet() {
        url.push(sep);
        url.push_str("wallet_id=");
        url.push_str(wallet.as_str());
    }
    url
}

async fn sleep_until_stopped(engine: &SyncEngine, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if engine.stopped() {
            return true;
        }
        let step = remaining.min(STOP_POLL);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    engine.stopped()
}
