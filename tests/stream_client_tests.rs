//! End-to-end tests for the streaming client against a local WebSocket
//! server.

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use pricekeeper::feed::store::ConnectionStore;
    use pricekeeper::feed::{ClientOptions, ErrorCategory, FeedEvent, StreamClient};
    use pricekeeper::types::{Asset, Venue};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    async fn next_event(events: &mut mpsc::UnboundedReceiver<FeedEvent>) -> FeedEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for a feed event")
            .expect("event channel closed")
    }

    fn client_for(
        venue: Venue,
        url: String,
    ) -> (StreamClient, mpsc::UnboundedReceiver<FeedEvent>) {
        let mut options = ClientOptions::new(url);
        options.reconnect_delay = Duration::from_millis(50);
        let store = Arc::new(ConnectionStore::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (StreamClient::new(venue, options, store, events_tx), events_rx)
    }

    #[tokio::test]
    async fn test_open_subscribe_and_parse_update() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = frames_tx.send(text);
            }
            ws.send(Message::Text(
                r#"{"type":"ticker","product_id":"ETH-USD","price":"1500","best_bid":"1499","best_ask":"1501"}"#.to_string(),
            ))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (client, mut events) = client_for(Venue::Coinbase, url);
        client.subscribe(client.adapter().topics(&[Asset::Eth]));

        assert!(matches!(
            next_event(&mut events).await,
            FeedEvent::Open { venue: Venue::Coinbase }
        ));

        let subscribe_frame = frames_rx.recv().await.unwrap();
        assert!(subscribe_frame.contains("subscribe"));
        assert!(subscribe_frame.contains("ETH-USD"));

        match next_event(&mut events).await {
            FeedEvent::Update { venue, update } => {
                assert_eq!(venue, Venue::Coinbase);
                assert_eq!(update.asset, Asset::Eth);
                assert_eq!(update.price, dec!(1500));
                assert_eq!(update.last_price, dec!(1500));
            }
            other => panic!("expected an update, got {:?}", other),
        }

        client.close();
    }

    #[tokio::test]
    async fn test_reconnects_and_resubscribes_after_server_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            // first session: take the subscribe request, then hang up
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = frames_tx.send(text);
            }
            drop(ws);

            // second session stays up until the client closes it
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = frames_tx.send(text);
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (client, mut events) = client_for(Venue::Coinbase, url);
        client.subscribe(client.adapter().topics(&[Asset::Btc]));

        assert!(matches!(next_event(&mut events).await, FeedEvent::Open { .. }));
        let first = frames_rx.recv().await.unwrap();
        assert!(first.contains("BTC-USD"));

        assert!(matches!(
            next_event(&mut events).await,
            FeedEvent::Reconnect { .. }
        ));
        assert!(matches!(
            next_event(&mut events).await,
            FeedEvent::Reconnected { .. }
        ));

        // stored topics are re-issued on the fresh connection
        let second = frames_rx.recv().await.unwrap();
        assert!(second.contains("BTC-USD"));

        client.close();
        loop {
            if matches!(next_event(&mut events).await, FeedEvent::Closed { .. }) {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_close_suppresses_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
        });

        let (client, mut events) = client_for(Venue::Coinbase, url);
        client.subscribe(client.adapter().topics(&[Asset::Eth]));
        assert!(matches!(next_event(&mut events).await, FeedEvent::Open { .. }));

        client.close();
        assert!(matches!(
            next_event(&mut events).await,
            FeedEvent::Closed { .. }
        ));

        // no further session opens
        assert!(
            tokio::time::timeout(Duration::from_millis(300), events.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_missing_pong_triggers_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            // first session never answers the liveness ping
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }

            // second session answers pings so the connection stays alive
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Text(text) if text.contains("ping") => {
                        ws.send(Message::Text(r#"{"type":"pong"}"#.to_string()))
                            .await
                            .unwrap();
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        let mut options = ClientOptions::new(url);
        options.ping_interval = Duration::from_millis(50);
        options.pong_timeout = Duration::from_millis(50);
        options.reconnect_delay = Duration::from_millis(10);
        let store = Arc::new(ConnectionStore::new());
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let client = StreamClient::new(Venue::Ftx, options, store, events_tx);

        client.subscribe(client.adapter().topics(&[Asset::Btc]));
        assert!(matches!(next_event(&mut events).await, FeedEvent::Open { .. }));

        // the unanswered ping closes the first session
        assert!(matches!(
            next_event(&mut events).await,
            FeedEvent::Reconnect { .. }
        ));
        assert!(matches!(
            next_event(&mut events).await,
            FeedEvent::Reconnected { .. }
        ));

        client.close();
    }

    #[tokio::test]
    async fn test_failed_first_dial_still_reports_open() {
        // reserve a port, then drop the listener so the first dial fails
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut options = ClientOptions::new(format!("ws://{}", addr));
        options.reconnect_delay = Duration::from_millis(200);
        let store = Arc::new(ConnectionStore::new());
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let client = StreamClient::new(Venue::Coinbase, options, store, events_tx);
        client.subscribe(client.adapter().topics(&[Asset::Eth]));

        assert!(matches!(
            next_event(&mut events).await,
            FeedEvent::Error {
                category: ErrorCategory::ConnectionFailed,
                ..
            }
        ));

        // the venue comes back before the retry dial
        let listener = TcpListener::bind(addr).await.unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
        });

        // a connection that never opened is a first connect, so the retry
        // that succeeds reports Open rather than Reconnected
        assert!(matches!(
            next_event(&mut events).await,
            FeedEvent::Open { venue: Venue::Coinbase }
        ));

        client.close();
    }
}
