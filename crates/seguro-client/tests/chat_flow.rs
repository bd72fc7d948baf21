use tokio::net::TcpListener;

use seguro_client::ChatClient;
use seguro_crypto::{session::Inbound, IdentityKeys};
use seguro_relay::{config::ServerConfig, Relay, RelayServer};

async fn spawn_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RelayServer::new(ServerConfig::default()).await.unwrap();
    tokio::spawn(async move { server.serve(listener).await });
    format!("http://{addr}")
}

async fn spawn_relay_with_handle() -> (String, Relay) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RelayServer::new(ServerConfig::default()).await.unwrap();
    let relay = server.relay().clone();
    tokio::spawn(async move { server.serve(listener).await });
    (format!("http://{addr}"), relay)
}

async fn client(base: &str, name: &str) -> ChatClient {
    let client = ChatClient::new(base, name, IdentityKeys::generate()).unwrap();
    client.publish().await.unwrap();
    client
}

#[tokio::test]
async fn private_chat_round_trip() {
    let base = spawn_relay().await;
    let mut alice = client(&base, "alice").await;
    let mut bob = client(&base, "bob").await;

    assert_eq!(alice.peers().await.unwrap(), vec!["bob"]);

    alice.send_private("bob", "olá bob").await.unwrap();
    let got = bob.sync().await.unwrap();
    assert_eq!(
        got,
        vec![Inbound::Chat {
            conversation: "alice".into(),
            from: "alice".into(),
            text: "olá bob".into()
        }]
    );

    // Pending still holds the same entry; the cursor filters it out.
    assert!(bob.poll_pending().await.unwrap().is_empty());
    assert!(bob.sync().await.unwrap().is_empty());
}

#[tokio::test]
async fn group_chat_with_key_distribution() {
    let base = spawn_relay().await;
    let mut alice = client(&base, "alice").await;
    let mut bob = client(&base, "bob").await;
    let mut carol = client(&base, "carol").await;

    let members = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
    let mut keyed = alice.create_group("g1", &members).await.unwrap();
    keyed.sort();
    assert_eq!(keyed, vec!["bob", "carol"]);

    // Alice received no distribution of her own.
    assert!(alice.sync().await.unwrap().is_empty());

    alice.send_group("g1", "reunião às 10").await.unwrap();

    for member in [&mut bob, &mut carol] {
        let got = member.sync().await.unwrap();
        assert!(matches!(&got[0], Inbound::GroupJoined { group_id, from } if group_id == "g1" && from == "alice"));
        assert!(matches!(&got[1], Inbound::Chat { conversation, text, .. } if conversation == "g1" && text == "reunião às 10"));
    }

    bob.send_group("g1", "ok").await.unwrap();
    let got = alice.sync().await.unwrap();
    assert!(matches!(&got[0], Inbound::Chat { from, text, .. } if from == "bob" && text == "ok"));
}

#[tokio::test]
async fn members_without_keys_are_skipped() {
    let base = spawn_relay().await;
    let mut alice = client(&base, "alice").await;
    let _bob = client(&base, "bob").await;

    let members = vec!["bob".to_string(), "ghost".to_string()];
    let keyed = alice.create_group("g2", &members).await.unwrap();
    assert_eq!(keyed, vec!["bob"]);

    let err = alice.create_group("g2", &members).await.unwrap_err();
    assert!(matches!(err, seguro_client::ChatError::Relay(ref e) if e.is_conflict()));
}

#[tokio::test]
async fn ids_with_url_delimiters_stay_one_path_segment() {
    let base = spawn_relay().await;
    let ana = client(&base, "ana").await;
    let mut sender = client(&base, "sender").await;
    let ana_key = ana.session().identity().public_b64();

    let mut peers = Vec::new();
    for id in ["ana/maria", "ana?x", "ana#1"] {
        let peer = client(&base, id).await;
        let key = sender.relay().get_key(id).await.unwrap();
        assert_eq!(key, peer.session().identity().public_b64(), "key lookup for {id}");
        assert_ne!(key, ana_key);
        peers.push(peer);
    }

    sender.send_private("ana?x", "só para ana?x").await.unwrap();
    assert_eq!(
        peers[1].sync().await.unwrap(),
        vec![Inbound::Chat {
            conversation: "sender".into(),
            from: "sender".into(),
            text: "só para ana?x".into()
        }]
    );
    assert!(sender.relay().fetch_history("ana", None, None).await.unwrap().is_empty());

    let members = vec!["ana/maria".to_string()];
    sender.create_group("team/a", &members).await.unwrap();
    sender.send_group("team/a", "olá equipa").await.unwrap();
    assert_eq!(sender.relay().list_groups("ana/maria").await.unwrap(), vec!["team/a"]);

    let got = peers[0].sync().await.unwrap();
    assert!(matches!(&got[0], Inbound::GroupJoined { group_id, .. } if group_id == "team/a"));
    assert!(matches!(&got[1], Inbound::Chat { conversation, text, .. } if conversation == "team/a" && text == "olá equipa"));
}

#[tokio::test]
async fn pending_with_a_gap_falls_back_to_history() {
    let (base, relay) = spawn_relay_with_handle().await;
    let mut alice = client(&base, "alice").await;
    let mut bob = client(&base, "bob").await;

    alice.send_private("bob", "one").await.unwrap();
    // Another channel for bob takes entry 1 and is pushed entry 2.
    let reg = relay.register("bob").unwrap();
    alice.send_private("bob", "two").await.unwrap();
    relay.unregister(&reg.connection);
    alice.send_private("bob", "three").await.unwrap();

    let texts: Vec<String> = bob
        .poll_pending()
        .await
        .unwrap()
        .into_iter()
        .filter_map(|inbound| match inbound {
            Inbound::Chat { text, .. } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
    assert_eq!(bob.session().cursor(), 3);
}
