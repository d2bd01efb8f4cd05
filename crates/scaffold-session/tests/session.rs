use pretty_assertions::assert_eq;
use scaffold_net::{LocalRelay, Signaling, TcpRelay, TcpSignaling};
use scaffold_session::{Role, Session, SessionConfig, SessionError, SessionLocation, Stage, View};
use scaffold_test_utils::{eventually, settle};
use std::sync::Arc;

const HOME: &str = "https://scaffold.local/";

async fn creator(signaling: Arc<dyn Signaling>, name: &str) -> Session {
    Session::start(
        SessionConfig::new().with_display_name(name),
        signaling,
        SessionLocation::new(HOME),
    )
    .await
    .unwrap()
}

async fn joiner(signaling: Arc<dyn Signaling>, invite: &str, name: &str) -> Session {
    Session::start(
        SessionConfig::new().with_display_name(name),
        signaling,
        SessionLocation::new(invite),
    )
    .await
    .unwrap()
}

/// Creator plus one admitted joiner
async fn admitted_pair(relay: Arc<dyn Signaling>) -> (Session, Session) {
    let host = creator(relay.clone(), "Ada").await;
    let guest = joiner(relay, host.invite_link(), "Grace").await;
    assert!(eventually(|| !host.pending_requests().is_empty()).await);
    host.admit(guest.peer_id()).unwrap();
    assert!(eventually(|| guest.stage() == Stage::Active).await);
    (host, guest)
}

#[tokio::test]
async fn creator_bootstraps_a_fresh_room() {
    let relay = Arc::new(LocalRelay::new());
    let host = creator(relay.clone(), "Ada").await;

    assert_eq!(host.role(), Role::Creator);
    assert_eq!(host.stage(), Stage::Active);
    assert_eq!(host.location().fragment(), host.room().as_str());
    assert_eq!(relay.room_size(host.room()), 1);

    let roster = host.roster();
    assert_eq!(roster.len(), 1);
    assert!(roster[0].is_self && roster[0].admitted);
    assert_eq!(roster[0].name, "Ada");
}

#[tokio::test]
async fn joiner_waits_at_the_gate_until_admitted() {
    let relay = Arc::new(LocalRelay::new());
    let host = creator(relay.clone(), "Ada").await;
    host.type_input("Rainfall increases soil moisture.").unwrap();

    let guest = joiner(relay.clone(), host.invite_link(), "Grace").await;
    assert_eq!(guest.role(), Role::Joiner);
    assert_eq!(guest.room(), host.room());
    assert_eq!(guest.stage(), Stage::Gated);

    // replicated, but not shown
    assert!(eventually(|| guest.doc().text() == host.doc().text()).await);
    assert!(matches!(guest.view(), View::Waiting { .. }));
    assert!(guest.pending_requests().is_empty());

    assert!(eventually(|| host.pending_requests().len() == 1).await);
    let request = &host.pending_requests()[0];
    assert_eq!(&request.peer_id, guest.peer_id());
    assert_eq!(request.name, "Grace");

    assert!(host.admit(guest.peer_id()).unwrap());
    assert!(eventually(|| guest.stage() == Stage::Active).await);
    assert!(eventually(|| host.pending_requests().is_empty()).await);

    match guest.view() {
        View::Workspace { text, .. } => assert_eq!(text, "Rainfall increases soil moisture."),
        other => panic!("expected workspace, got {other:?}"),
    }
    guest.type_input("Rainfall increases soil moisture. Heat reduces crop yield.").unwrap();
    assert!(eventually(|| host.doc().text().ends_with("Heat reduces crop yield.")).await);
}

#[tokio::test]
async fn admitted_joiner_can_admit_the_next() {
    let relay: Arc<dyn Signaling> = Arc::new(LocalRelay::new());
    let (host, guest) = admitted_pair(relay.clone()).await;
    let third = joiner(relay, host.invite_link(), "Alan").await;

    assert!(eventually(|| guest.pending_requests().iter().any(|p| &p.peer_id == third.peer_id())).await);
    assert!(guest.admit(third.peer_id()).unwrap());
    assert!(!guest.admit(third.peer_id()).unwrap());
    assert!(eventually(|| third.stage() == Stage::Active).await);
}

#[tokio::test]
async fn gated_peer_cannot_admit_or_edit() {
    let relay = Arc::new(LocalRelay::new());
    let host = creator(relay.clone(), "Ada").await;
    let guest = joiner(relay.clone(), host.invite_link(), "Grace").await;
    let other = joiner(relay, host.invite_link(), "Alan").await;
    settle().await;

    assert!(matches!(guest.admit(other.peer_id()), Err(SessionError::NotAdmitted { .. })));
    assert!(guest.append_dictation("let me in").is_err());
    assert_eq!(host.doc().text(), "");
    assert!(!host.doc().is_allowed(other.peer_id()));
}

#[tokio::test]
async fn dismissed_request_returns_on_next_change() {
    let relay = Arc::new(LocalRelay::new());
    let host = creator(relay.clone(), "Ada").await;
    let guest = joiner(relay.clone(), host.invite_link(), "Grace").await;
    assert!(eventually(|| host.pending_requests().len() == 1).await);

    assert!(host.dismiss(guest.peer_id()));
    assert!(host.pending_requests().is_empty());

    let _late = joiner(relay, host.invite_link(), "Alan").await;
    assert!(eventually(|| host.pending_requests().len() == 2).await);
    assert!(!host.doc().is_allowed(guest.peer_id()));
}

#[tokio::test]
async fn concurrent_expansions_settle_on_one_graph() {
    let relay: Arc<dyn Signaling> = Arc::new(LocalRelay::new());
    let (host, guest) = admitted_pair(relay).await;
    host.type_input("Rainfall increases soil moisture. Soil moisture boosts crop yield.")
        .unwrap();
    host.extract_graph().await.unwrap();
    assert!(eventually(|| guest.doc().graph().is_some()).await);

    let (a, b) = futures::join!(host.expand_node("rainfall"), guest.expand_node("crop-yield"));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a, b);

    assert!(eventually(|| host.doc().graph() == guest.doc().graph()).await);
    let survivor = host.doc().graph().unwrap();
    assert!(*survivor == *a || *survivor == *b);
    assert!(eventually(|| host.projection().graph() == guest.projection().graph()).await);
}

#[tokio::test]
async fn local_edit_is_not_processed_twice() {
    let relay: Arc<dyn Signaling> = Arc::new(LocalRelay::new());
    let (host, guest) = admitted_pair(relay).await;
    settle().await;

    let before = host.revision();
    host.type_input("heat reduces yield").unwrap();
    assert!(eventually(|| guest.doc().text() == "heat reduces yield").await);
    settle().await;
    assert_eq!(host.revision(), before + 1);
}

#[tokio::test]
async fn rooms_do_not_leak_into_each_other() {
    let relay = Arc::new(LocalRelay::new());
    let one = creator(relay.clone(), "Ada").await;
    let two = creator(relay.clone(), "Grace").await;
    assert_ne!(one.room(), two.room());

    one.type_input("only in room one").unwrap();
    settle().await;
    assert_eq!(two.doc().text(), "");
    assert_eq!(two.roster().len(), 1);
    assert_eq!(relay.room_count(), 2);
}

#[tokio::test]
async fn unreachable_relay_leaves_a_working_lone_session() {
    let relay = Arc::new(LocalRelay::new());
    relay.set_online(false);

    let host = creator(relay.clone(), "Ada").await;
    assert!(!host.is_online());
    host.type_input("Heat reduces crop yield.").unwrap();
    assert!(host.extract_graph().await.is_ok());

    let guest = joiner(relay, host.invite_link(), "Grace").await;
    settle().await;
    assert_eq!(guest.stage(), Stage::Gated);
    assert_eq!(guest.doc().text(), "");
}

#[tokio::test]
async fn leaving_drops_presence_but_keeps_admission() {
    let relay: Arc<dyn Signaling> = Arc::new(LocalRelay::new());
    let (host, mut guest) = admitted_pair(relay).await;
    assert!(eventually(|| host.roster().len() == 2).await);
    let guest_id = guest.peer_id().clone();

    guest.leave();
    assert!(eventually(|| host.roster().len() == 1).await);
    assert!(host.doc().is_allowed(&guest_id));
    assert!(host.pending_requests().is_empty());
}

#[tokio::test]
async fn rooms_work_over_tcp() {
    let server = TcpRelay::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.serve());

    let signaling: Arc<dyn Signaling> = Arc::new(TcpSignaling::new(addr));
    let (host, guest) = admitted_pair(signaling).await;
    guest.append_dictation("Pests reduce crop yield.").unwrap();
    assert!(eventually(|| host.doc().text() == "Pests reduce crop yield.").await);
}
