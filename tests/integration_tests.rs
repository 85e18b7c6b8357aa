//! Integration tests for the framed-TCP networking stack
//!
//! These tests run a real server on an ephemeral port and talk to it with
//! raw `TcpStream` peers speaking the frame protocol directly, so they
//! exercise the full accept → track → authenticate → broadcast path.

use server::{ChatHandler, Server, ServerEvent};
use shared::{default_registry, read_frame, write_frame, ChatPacket, LoginPacket, PingPacket};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

async fn start_server() -> (Server, SocketAddr) {
    let server = Server::new("127.0.0.1:0", Arc::new(default_registry()));
    server.start().await.expect("server failed to start");
    let addr = server.local_addr().expect("no local addr after start");
    (server, addr)
}

/// Polls until the server tracks exactly `count` clients.
async fn wait_for_clients(server: &Server, count: usize) -> Vec<String> {
    for _ in 0..200 {
        let ids = server.client_ids().await;
        if ids.len() == count {
            return ids;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("server never reached {} tracked clients", count);
}

/// Waits until the tracked connection for `id` has noticed its peer died.
async fn wait_for_dead(server: &Server, id: &str) {
    for _ in 0..200 {
        match server.get_client(id).await {
            Some(connection) if connection.is_alive() => {
                sleep(Duration::from_millis(10)).await;
            }
            _ => return,
        }
    }
    panic!("connection {} never died", id);
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn connect_fires_event_and_tracks_client() {
        let (server, addr) = start_server().await;
        let mut events = server.subscribe();

        let _peer = TcpStream::connect(addr).await.unwrap();

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ServerEvent::Connected { client_id, args } => {
                assert!(args.success);
                assert!(args.param("ip").is_some());
                let ids = server.client_ids().await;
                assert_eq!(ids, vec![client_id]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        server.shutdown().await;
    }

    #[tokio::test]
    async fn each_client_gets_a_unique_id() {
        let (server, addr) = start_server().await;

        let _a = TcpStream::connect(addr).await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();
        let _c = TcpStream::connect(addr).await.unwrap();

        let mut ids = wait_for_clients(&server, 3).await;
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_removes_client_from_lookup() {
        let (server, addr) = start_server().await;
        let _peer = TcpStream::connect(addr).await.unwrap();

        let ids = wait_for_clients(&server, 1).await;
        let id = &ids[0];
        assert!(server.get_client(id).await.is_some());

        server.disconnect(id, Some("test disconnect")).await;
        assert!(server.get_client(id).await.is_none());
        assert!(server.client_ids().await.is_empty());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_disconnects_everyone_and_is_terminal() {
        let (server, addr) = start_server().await;
        let _a = TcpStream::connect(addr).await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&server, 2).await;

        server.shutdown().await;
        assert!(server.client_ids().await.is_empty());
        assert!(!server.is_running());

        // Restart is refused after shutdown.
        server.start().await.unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn stop_keeps_tracked_clients() {
        let (server, addr) = start_server().await;
        let _peer = TcpStream::connect(addr).await.unwrap();
        let ids = wait_for_clients(&server, 1).await;

        server.stop().await;
        assert!(!server.is_running());
        assert_eq!(server.client_ids().await, ids);
        server.shutdown().await;
    }
}

/// AUTHENTICATION AND DELIVERY TESTS
mod delivery_tests {
    use super::*;

    #[tokio::test]
    async fn unauthenticated_client_receives_nothing() {
        let (server, addr) = start_server().await;
        let mut peer = TcpStream::connect(addr).await.unwrap();
        let ids = wait_for_clients(&server, 1).await;

        assert!(!server.is_authenticated(&ids[0]).await);
        server
            .send_packet(&ChatPacket::new("server", "secret"), None)
            .await;

        // Nothing should arrive for an unauthenticated client.
        let read = timeout(Duration::from_millis(200), read_frame(&mut peer)).await;
        assert!(read.is_err(), "unauthenticated client got a packet");

        // Granting authentication opens the tap.
        server.authenticate(&ids[0], true).await;
        server
            .send_packet(&ChatPacket::new("server", "now visible"), None)
            .await;

        let frame = timeout(Duration::from_secs(2), read_frame(&mut peer))
            .await
            .unwrap()
            .unwrap();
        let registry = default_registry();
        let packet = registry.decode(&frame);
        let chat = packet.as_any().downcast_ref::<ChatPacket>().unwrap();
        assert_eq!(chat.message, "now visible");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn frames_arrive_in_send_order() {
        let (server, addr) = start_server().await;
        let mut peer = TcpStream::connect(addr).await.unwrap();
        let ids = wait_for_clients(&server, 1).await;
        server.authenticate(&ids[0], true).await;

        let registry = default_registry();
        for n in 1..=3 {
            let packet = ChatPacket::new("server", format!("m{}", n));
            server.send_packet(&packet, Some(&ids)).await;
        }

        for n in 1..=3 {
            let frame = timeout(Duration::from_secs(2), read_frame(&mut peer))
                .await
                .unwrap()
                .unwrap();
            let packet = registry.decode(&frame);
            let chat = packet.as_any().downcast_ref::<ChatPacket>().unwrap();
            assert_eq!(chat.message, format!("m{}", n));
        }
        server.shutdown().await;
    }

    #[tokio::test]
    async fn broadcast_failure_is_isolated_per_recipient() {
        let (server, addr) = start_server().await;
        let mut alive_a = TcpStream::connect(addr).await.unwrap();
        let mut alive_b = TcpStream::connect(addr).await.unwrap();
        let doomed = TcpStream::connect(addr).await.unwrap();
        let doomed_addr = doomed.local_addr().unwrap();

        let ids = wait_for_clients(&server, 3).await;
        for id in &ids {
            server.authenticate(id, true).await;
        }
        let doomed_id = server
            .client_id_for_addr(doomed_addr)
            .await
            .expect("doomed client not tracked");

        // Kill one socket out from under the server.
        drop(doomed);
        wait_for_dead(&server, &doomed_id).await;

        let mut events = server.subscribe();
        server
            .send_packet(&ChatPacket::new("server", "survivors"), None)
            .await;

        // The two healthy peers still get the frame.
        let registry = default_registry();
        for peer in [&mut alive_a, &mut alive_b] {
            let frame = timeout(Duration::from_secs(2), read_frame(peer))
                .await
                .unwrap()
                .unwrap();
            let packet = registry.decode(&frame);
            let chat = packet.as_any().downcast_ref::<ChatPacket>().unwrap();
            assert_eq!(chat.message, "survivors");
        }

        // The dead one was disconnected with a reason, and only it.
        match timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
        {
            ServerEvent::Disconnected { client_id, args } => {
                assert_eq!(client_id, doomed_id);
                assert!(args.success);
                assert!(args.param("reason").is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(server.get_client(&doomed_id).await.is_none());
        assert_eq!(server.client_ids().await.len(), 2);
        server.shutdown().await;
    }
}

/// FULL PROTOCOL SCENARIO TESTS (through the run loop and chat handler)
mod scenario_tests {
    use super::*;

    async fn login(peer: &mut TcpStream, username: &str) {
        let registry = default_registry();
        let packet = LoginPacket {
            username: username.to_string(),
            password: String::new(),
        };
        let bytes = registry.encode(&packet).unwrap();
        write_frame(peer, &bytes).await.unwrap();
    }

    #[tokio::test]
    async fn login_then_chat_round_trip() {
        let (server, addr) = start_server().await;
        let run_server = server.clone();
        let run_task = tokio::spawn(async move {
            run_server.run(Arc::new(ChatHandler)).await;
        });

        let mut peer = TcpStream::connect(addr).await.unwrap();
        let ids = wait_for_clients(&server, 1).await;
        let registry = default_registry();

        login(&mut peer, "alice").await;
        for _ in 0..200 {
            if server.is_authenticated(&ids[0]).await {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(server.is_authenticated(&ids[0]).await);

        let chat = ChatPacket::new("ignored", "hello everyone");
        let bytes = registry.encode(&chat).unwrap();
        write_frame(&mut peer, &bytes).await.unwrap();

        let frame = timeout(Duration::from_secs(2), read_frame(&mut peer))
            .await
            .unwrap()
            .unwrap();
        let packet = registry.decode(&frame);
        let received = packet.as_any().downcast_ref::<ChatPacket>().unwrap();
        assert_eq!(received.message, "hello everyone");
        // The server stamps the sender with the tracked client id.
        assert_eq!(received.sender, ids[0]);

        server.shutdown().await;
        let _ = timeout(Duration::from_secs(2), run_task).await;
    }

    #[tokio::test]
    async fn empty_login_is_rejected_and_gates_chat() {
        let (server, addr) = start_server().await;
        let run_server = server.clone();
        tokio::spawn(async move {
            run_server.run(Arc::new(ChatHandler)).await;
        });

        let mut peer = TcpStream::connect(addr).await.unwrap();
        let ids = wait_for_clients(&server, 1).await;
        let registry = default_registry();

        login(&mut peer, "").await;
        sleep(Duration::from_millis(200)).await;
        assert!(!server.is_authenticated(&ids[0]).await);

        // A chat from the rejected client is processed but broadcast
        // reaches no authenticated recipient, itself included.
        let bytes = registry
            .encode(&ChatPacket::new("x", "should vanish"))
            .unwrap();
        write_frame(&mut peer, &bytes).await.unwrap();

        let read = timeout(Duration::from_millis(200), read_frame(&mut peer)).await;
        assert!(read.is_err());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn login_sent_immediately_after_connect_is_processed() {
        let (server, addr) = start_server().await;
        let run_server = server.clone();
        tokio::spawn(async move {
            run_server.run(Arc::new(ChatHandler)).await;
        });

        // No settling wait between connect and login: the frame races the
        // server-side registration and must not be lost.
        let mut peer = TcpStream::connect(addr).await.unwrap();
        login(&mut peer, "fred").await;

        let ids = wait_for_clients(&server, 1).await;
        for _ in 0..200 {
            if server.is_authenticated(&ids[0]).await {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(server.is_authenticated(&ids[0]).await);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped_not_fatal() {
        let (server, addr) = start_server().await;
        let run_server = server.clone();
        tokio::spawn(async move {
            run_server.run(Arc::new(ChatHandler)).await;
        });

        let mut peer = TcpStream::connect(addr).await.unwrap();
        let ids = wait_for_clients(&server, 1).await;
        let registry = default_registry();

        // A frame with an unknown type code, then garbage payload bytes.
        write_frame(&mut peer, &999i32.to_le_bytes()).await.unwrap();
        write_frame(&mut peer, &[0xFF, 0xFE]).await.unwrap();

        // The connection survives and the protocol still works.
        login(&mut peer, "dave").await;
        for _ in 0..200 {
            if server.is_authenticated(&ids[0]).await {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(server.is_authenticated(&ids[0]).await);

        let bytes = registry.encode(&ChatPacket::new("x", "still here")).unwrap();
        write_frame(&mut peer, &bytes).await.unwrap();

        let frame = timeout(Duration::from_secs(2), read_frame(&mut peer))
            .await
            .unwrap()
            .unwrap();
        let chat_packet = registry.decode(&frame);
        let chat = chat_packet.as_any().downcast_ref::<ChatPacket>().unwrap();
        assert_eq!(chat.message, "still here");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn externally_closed_socket_triggers_disconnect() {
        let (server, addr) = start_server().await;
        let run_server = server.clone();
        tokio::spawn(async move {
            run_server.run(Arc::new(ChatHandler)).await;
        });

        let peer = TcpStream::connect(addr).await.unwrap();
        let ids = wait_for_clients(&server, 1).await;
        let id = ids[0].clone();
        let mut events = server.subscribe();

        drop(peer);

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ServerEvent::Disconnected { client_id, .. } => assert_eq!(client_id, id),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(server.get_client(&id).await.is_none());
        server.shutdown().await;
    }
}

/// CLIENT SESSION TESTS (session crate against a live server)
mod session_tests {
    use super::*;
    use client::Session;

    #[tokio::test]
    async fn session_chats_through_the_server() {
        let (server, addr) = start_server().await;
        let run_server = server.clone();
        tokio::spawn(async move {
            run_server.run(Arc::new(ChatHandler)).await;
        });

        let registry = Arc::new(default_registry());
        let session = Session::connect(&addr.to_string(), registry, "eve")
            .await
            .unwrap();

        let ids = wait_for_clients(&server, 1).await;
        for _ in 0..200 {
            if server.is_authenticated(&ids[0]).await {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(server.is_authenticated(&ids[0]).await);

        assert!(session.send_chat("round trip"));

        let mut received = None;
        for _ in 0..200 {
            if let Some(packet) = session.poll() {
                received = Some(packet);
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        let packet = received.expect("no chat came back");
        let chat = packet.as_any().downcast_ref::<ChatPacket>().unwrap();
        assert_eq!(chat.message, "round trip");
        assert_eq!(chat.sender, ids[0]);

        session.close().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn ping_echoes_to_sender_only() {
        let (server, addr) = start_server().await;
        let run_server = server.clone();
        tokio::spawn(async move {
            run_server.run(Arc::new(ChatHandler)).await;
        });

        let registry = Arc::new(default_registry());
        let sender = Session::connect(&addr.to_string(), Arc::clone(&registry), "sender")
            .await
            .unwrap();
        let bystander = Session::connect(&addr.to_string(), registry, "bystander")
            .await
            .unwrap();

        let ids = wait_for_clients(&server, 2).await;
        for _ in 0..200 {
            if server.is_authenticated(&ids[0]).await && server.is_authenticated(&ids[1]).await {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        for id in &ids {
            assert!(server.is_authenticated(id).await);
        }

        assert!(sender.send_ping(77));

        let mut received = None;
        for _ in 0..200 {
            if let Some(packet) = sender.poll() {
                received = Some(packet);
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        let packet = received.expect("no ping came back");
        let ping = packet.as_any().downcast_ref::<PingPacket>().unwrap();
        assert_eq!(ping.nonce, 77);

        // The other authenticated client sees nothing.
        sleep(Duration::from_millis(200)).await;
        assert!(bystander.poll().is_none());

        sender.close().await;
        bystander.close().await;
        server.shutdown().await;
    }
}
