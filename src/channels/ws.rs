//! Outbound WebSocket [`Channel`] (§4.3, §6.2 `ws`/`wss` schemes).
//!
//! One long-lived connection per entry (`is_persistent() == true`): a
//! `Closed` event keeps the registry entry around so the same destination
//! can reconnect later. Reads and writes run on two tasks spawned onto the
//! current `LocalSet` — the engine is `!Send`/`!Sync` by design (§5), so
//! every task here talks back to it only through [`EngineHandle`], which is
//! safe to clone and hand across tasks within the same local task set but
//! never across threads.

use std::cell::RefCell;
use std::rc::Rc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::channel::{Channel, ChannelId};
use crate::config::WsDefaults;
use crate::engine::EngineHandle;

struct WsInner {
    handle: Option<EngineHandle>,
    id: Option<ChannelId>,
    write_tx: Option<mpsc::UnboundedSender<Message>>,
}

pub struct WsChannel {
    inner: Rc<RefCell<WsInner>>,
    url: String,
    defaults: WsDefaults,
}

impl WsChannel {
    pub fn new(url: impl Into<String>, defaults: WsDefaults) -> Rc<Self> {
        Rc::new(Self {
            inner: Rc::new(RefCell::new(WsInner {
                handle: None,
                id: None,
                write_tx: None,
            })),
            url: url.into(),
            defaults,
        })
    }

    fn handle_and_id(inner: &RefCell<WsInner>) -> Option<(EngineHandle, ChannelId)> {
        let g = inner.borrow();
        Some((g.handle.clone()?, g.id?))
    }
}

impl Channel for WsChannel {
    fn bind(&self, handle: EngineHandle, id: ChannelId) {
        let mut inner = self.inner.borrow_mut();
        inner.handle = Some(handle);
        inner.id = Some(id);
    }

    fn connect(&self) {
        let inner = self.inner.clone();
        let url = self.url.clone();
        let idle_close = self.defaults.idle_close_timeout_ms;
        tokio::task::spawn_local(async move {
            let connected = tokio_tungstenite::connect_async(&url).await;
            let Some((handle, id)) = Self::handle_and_id(&inner) else { return };

            let stream = match connected {
                Ok((stream, _response)) => stream,
                Err(err) => {
                    tracing::warn!(%url, %err, "websocket connect failed");
                    handle.on_closed(id);
                    return;
                }
            };

            let (mut sink, mut source) = stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
            inner.borrow_mut().write_tx = Some(tx);
            handle.on_open(id);

            let writer_handle = handle.clone();
            tokio::task::spawn_local(async move {
                while let Some(msg) = rx.recv().await {
                    let ok = sink.send(msg).await.is_ok();
                    writer_handle.on_send_complete(id, ok);
                    if !ok {
                        break;
                    }
                }
            });

            let reader_handle = handle.clone();
            tokio::task::spawn_local(async move {
                loop {
                    let next = if idle_close == 0 {
                        source.next().await
                    } else {
                        match tokio::time::timeout(
                            std::time::Duration::from_millis(idle_close),
                            source.next(),
                        )
                        .await
                        {
                            Ok(msg) => msg,
                            Err(_) => {
                                tracing::debug!(%url, "websocket idle timeout, closing");
                                break;
                            }
                        }
                    };
                    match next {
                        Some(Ok(Message::Text(text))) => reader_handle.on_frame(id, text.into_bytes()),
                        Some(Ok(Message::Binary(bytes))) => reader_handle.on_frame(id, bytes),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::warn!(%err, "websocket read error");
                            break;
                        }
                    }
                }
                reader_handle.on_closed(id);
            });
        });
    }

    fn close(&self) {
        if let Some(tx) = self.inner.borrow_mut().write_tx.take() {
            let _ = tx.send(Message::Close(None));
        }
    }

    fn send_frame(&self, bytes: Vec<u8>) -> bool {
        let inner = self.inner.borrow();
        match &inner.write_tx {
            Some(tx) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                tx.send(Message::Text(text)).is_ok()
            }
            None => false,
        }
    }

    fn get_type(&self) -> &str {
        "ws"
    }

    fn get_info(&self) -> Option<String> {
        Some(self.url.clone())
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel as _;

    #[test]
    fn send_frame_fails_before_a_connection_exists() {
        let channel = WsChannel::new("ws://example.invalid/rpc", WsDefaults::default());
        assert!(!channel.send_frame(b"{}".to_vec()));
    }

    #[test]
    fn reports_its_type_and_info() {
        let channel = WsChannel::new("ws://example.invalid/rpc", WsDefaults::default());
        assert_eq!(channel.get_type(), "ws");
        assert_eq!(channel.get_info().as_deref(), Some("ws://example.invalid/rpc"));
        assert!(channel.is_persistent());
    }

    #[tokio::test]
    async fn connect_reports_closed_when_the_handshake_fails() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                // A real listener that accepts and immediately drops the
                // connection, so the websocket handshake fails reliably
                // without depending on any external network state.
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();
                tokio::task::spawn_local(async move {
                    if let Ok((stream, _)) = listener.accept().await {
                        drop(stream);
                    }
                });

                let engine = crate::engine::RpcEngine::new(crate::config::Config::default());
                let closed = Rc::new(RefCell::new(false));
                let closed_flag = closed.clone();
                engine.add_observer(Box::new(move |event| {
                    if matches!(event, crate::engine::ObserverEvent::Closed { .. }) {
                        *closed_flag.borrow_mut() = true;
                    }
                }));

                let channel = WsChannel::new(format!("ws://{addr}/rpc"), WsDefaults::default());
                engine.add_channel("peer", channel.clone());
                channel.connect();

                for _ in 0..200 {
                    if *closed.borrow() {
                        break;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
                assert!(*closed.borrow(), "expected the ws channel to report CLOSED after a failed handshake");
            })
            .await;
    }
}
