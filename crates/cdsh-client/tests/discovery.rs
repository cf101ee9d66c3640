use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use cdsh_client::{
    transport::{ConnectionEvent, TransportError, NORMAL_CLOSURE},
    CdshConfig, CdshSocket, DiscoveryError, DiscoveryServiceV1, DiscoveryServiceV2,
};
use cdsh_protocol::{
    Aci, ClientRequest, ClientResponse, DiscoveryRequestV2, Pni, ResponseItem, E164,
};
use cdsh_test::{sealed_response, FakeEnclave, FakeEnclaveFactory, ScriptedTransport};
use futures::StreamExt;
use prost::Message;

fn config() -> CdshConfig {
    CdshConfig {
        url: "https://cdsh.example.org".to_string(),
        public_key: "aa".repeat(32),
        code_hashes: vec!["bb".repeat(32)],
        ..Default::default()
    }
}

fn handshake_reply() -> ConnectionEvent {
    ConnectionEvent::Message(FakeEnclave::HANDSHAKE_REPLY.to_vec())
}

fn close(code: u16) -> ConnectionEvent {
    ConnectionEvent::Closing {
        code,
        reason: String::new(),
    }
}

fn v1_page(records: &[(u64, [u8; 16])]) -> ConnectionEvent {
    let mut buf = Vec::new();
    for (e164, aci) in records {
        buf.extend_from_slice(&e164.to_be_bytes());
        buf.extend_from_slice(aci);
    }
    sealed_response(&ClientResponse {
        e164_pni_aci_triples: buf,
        ..Default::default()
    })
}

fn v2_page(records: &[(u64, [u8; 16], [u8; 16])], token: &[u8]) -> ConnectionEvent {
    let mut buf = Vec::new();
    for (e164, pni, aci) in records {
        buf.extend_from_slice(&e164.to_be_bytes());
        buf.extend_from_slice(pni);
        buf.extend_from_slice(aci);
    }
    sealed_response(&ClientResponse {
        e164_pni_aci_triples: buf,
        token: token.to_vec(),
        ..Default::default()
    })
}

/// Decrypt and decode a request the client sent
fn open_request(sent: &[u8]) -> (u8, ClientRequest) {
    let plaintext = FakeEnclave::open(sent).expect("sealed request");
    let (version, body) = plaintext.split_first().expect("version byte");
    (*version, ClientRequest::decode(body).expect("valid request"))
}

fn v1_service(transport: &ScriptedTransport) -> DiscoveryServiceV1<FakeEnclaveFactory> {
    DiscoveryServiceV1::new(
        &config(),
        Arc::new(transport.clone()),
        FakeEnclaveFactory::default(),
    )
    .expect("valid config")
}

#[tokio::test]
async fn test_v1_lookup() {
    let transport = ScriptedTransport::with_events(vec![
        handshake_reply(),
        v1_page(&[(15550001, [1; 16]), (15550002, [0; 16])]),
        v1_page(&[(15550003, [3; 16])]),
        v1_page(&[(15550004, [4; 16])]),
        close(NORMAL_CLOSURE),
    ]);

    let registered = v1_service(&transport)
        .get_registered_users(
            "user",
            "pass",
            ["+15550001", "+15550002", "+15550003", "+15550004"],
        )
        .await
        .expect("lookup succeeds");

    assert_eq!(
        registered,
        HashMap::from([
            (E164::new(15550001), Aci::from_bytes([1; 16])),
            (E164::new(15550003), Aci::from_bytes([3; 16])),
            (E164::new(15550004), Aci::from_bytes([4; 16])),
        ])
    );

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].url,
        format!(
            "wss://cdsh.example.org/discovery/{}/{}",
            "aa".repeat(32),
            "bb".repeat(32)
        )
    );
    assert_eq!(
        requests[0].headers,
        vec![("Authorization".to_string(), "Basic dXNlcjpwYXNz".to_string())]
    );

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], FakeEnclave::HANDSHAKE_REQUEST);
    let (version, request) = open_request(&sent[1]);
    assert_eq!(version, 1);
    assert!(!request.has_more);
    assert_eq!(request.new_e164s.len(), 4 * 8);

    // The server closed normally, so the client never initiates a close
    assert!(transport.closes().is_empty());
}

#[tokio::test]
async fn test_v1_large_address_book_is_paged() {
    let transport =
        ScriptedTransport::with_events(vec![handshake_reply(), close(NORMAL_CLOSURE)]);
    let numbers: Vec<String> = (0..12_001u64)
        .map(|i| format!("+1555{:07}", i))
        .collect();

    let registered = v1_service(&transport)
        .get_registered_users("user", "pass", &numbers)
        .await
        .expect("lookup succeeds");
    assert!(registered.is_empty());

    let sent = transport.sent();
    assert_eq!(sent.len(), 1 + 3);

    let pages: Vec<ClientRequest> = sent[1..]
        .iter()
        .map(|message| open_request(message).1)
        .collect();
    assert_eq!(
        pages.iter().map(|p| p.has_more).collect::<Vec<_>>(),
        [true, true, false]
    );
    assert_eq!(
        pages.iter().map(|p| p.new_e164s.len() / 8).collect::<Vec<_>>(),
        [5000, 5000, 2001]
    );
    assert_eq!(&pages[0].new_e164s[..8], &15550000000u64.to_be_bytes());
}

#[tokio::test]
async fn test_non_normal_close_fails_and_closes_once() {
    let transport = ScriptedTransport::with_events(vec![
        handshake_reply(),
        v1_page(&[(15550001, [1; 16])]),
        ConnectionEvent::Closing {
            code: 4003,
            reason: "rate limited".to_string(),
        },
    ]);

    let result = v1_service(&transport)
        .get_registered_users("user", "pass", ["+15550001"])
        .await;

    let err = result.expect_err("should fail");
    assert_eq!(err, DiscoveryError::NonSuccessfulClose { code: 4003 });
    assert_eq!(err.status_code(), 4003);
    assert_eq!(
        transport.wait_for_closes(1).await,
        vec![(NORMAL_CLOSURE, "Remote closed with code 4003".to_string())]
    );
}

#[tokio::test]
async fn test_handshake_failure_sends_no_requests() {
    let transport = ScriptedTransport::with_events(vec![
        handshake_reply(),
        v1_page(&[(15550001, [1; 16])]),
        close(NORMAL_CLOSURE),
    ]);
    let service = DiscoveryServiceV1::new(
        &config(),
        Arc::new(transport.clone()),
        FakeEnclaveFactory::rejecting_handshake(),
    )
    .expect("valid config");

    let result = service
        .get_registered_users("user", "pass", ["+15550001"])
        .await;

    assert!(matches!(result, Err(DiscoveryError::HandshakeFailure(_))));
    assert_eq!(transport.sent(), vec![FakeEnclave::HANDSHAKE_REQUEST.to_vec()]);
    assert_eq!(
        transport.wait_for_closes(1).await,
        vec![(NORMAL_CLOSURE, "OK".to_string())]
    );
}

#[tokio::test]
async fn test_invalid_number_fails_before_connecting() {
    let transport = ScriptedTransport::new();
    let enclaves = FakeEnclaveFactory::default();
    let service =
        DiscoveryServiceV1::new(&config(), Arc::new(transport.clone()), enclaves.clone())
            .expect("valid config");

    let err = service
        .get_registered_users("user", "pass", ["+15550001", "not a number"])
        .await
        .expect_err("should fail");

    assert_eq!(err, DiscoveryError::InvalidE164("not a number".to_string()));
    assert!(err.is_caller_error());
    assert!(transport.requests().is_empty());
    assert_eq!(enclaves.created(), 0);
}

#[tokio::test]
async fn test_v2_too_many_items_fails_before_connecting() {
    let transport = ScriptedTransport::new();
    let enclaves = FakeEnclaveFactory::default();
    let config = CdshConfig {
        max_request_items: 2,
        ..config()
    };
    let service = DiscoveryServiceV2::new(&config, Arc::new(transport.clone()), enclaves.clone())
        .expect("valid config");

    let request = DiscoveryRequestV2 {
        previous_e164s: [E164::new(1), E164::new(2)].into(),
        new_e164s: [E164::new(3)].into(),
        ..Default::default()
    };
    let err = service
        .get_registered_users("user", "pass", &request)
        .await
        .expect_err("should fail");

    assert_eq!(err, DiscoveryError::TooManyItems { count: 3, limit: 2 });
    assert!(transport.requests().is_empty());
    assert_eq!(enclaves.created(), 0);
}

#[tokio::test]
async fn test_v2_lookup() {
    let transport = ScriptedTransport::with_events(vec![
        handshake_reply(),
        v2_page(&[(15550001, [1; 16], [2; 16])], &[]),
        v2_page(&[(15550002, [3; 16], [0; 16])], &[9; 32]),
        close(NORMAL_CLOSURE),
    ]);
    let service = DiscoveryServiceV2::new(
        &config(),
        Arc::new(transport.clone()),
        FakeEnclaveFactory::default(),
    )
    .expect("valid config");

    let request = DiscoveryRequestV2 {
        new_e164s: [E164::new(15550001), E164::new(15550002)].into(),
        token: Some(vec![5; 32]),
        ..Default::default()
    };
    let response = service
        .get_registered_users("user", "pass", &request)
        .await
        .expect("lookup succeeds");

    assert_eq!(response.token, vec![9; 32]);
    assert_eq!(
        response.results.get(&E164::new(15550001)),
        Some(&ResponseItem {
            pni: Pni::from_bytes([1; 16]),
            aci: Some(Aci::from_bytes([2; 16])),
        })
    );
    assert_eq!(
        response.results.get(&E164::new(15550002)),
        Some(&ResponseItem {
            pni: Pni::from_bytes([3; 16]),
            aci: None,
        })
    );

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    let (version, message) = open_request(&sent[1]);
    assert_eq!(version, 2);
    assert_eq!(message.token, vec![5; 32]);
}

#[tokio::test]
async fn test_v2_without_token_is_malformed() {
    let transport = ScriptedTransport::with_events(vec![
        handshake_reply(),
        v2_page(&[(15550001, [1; 16], [2; 16])], &[]),
        close(NORMAL_CLOSURE),
    ]);
    let service = DiscoveryServiceV2::new(
        &config(),
        Arc::new(transport.clone()),
        FakeEnclaveFactory::default(),
    )
    .expect("valid config");

    let result = service
        .get_registered_users("user", "pass", &DiscoveryRequestV2::default())
        .await;

    assert!(matches!(result, Err(DiscoveryError::MalformedResponse(_))));
}

#[tokio::test]
async fn test_rejected_upgrade_reports_status() {
    let transport = ScriptedTransport::new();
    transport.push_refusal(TransportError::new(401, "Upgrade rejected: 401 Unauthorized"));

    let err = v1_service(&transport)
        .get_registered_users("user", "wrong", ["+15550001"])
        .await
        .expect_err("should fail");

    assert!(matches!(
        err,
        DiscoveryError::TransportFailure { status: 401, .. }
    ));
    assert!(!err.is_caller_error());
}

#[tokio::test]
async fn test_connection_ending_without_close_fails() {
    let transport =
        ScriptedTransport::with_events(vec![handshake_reply(), v1_page(&[(1, [1; 16])])]);

    let err = v1_service(&transport)
        .get_registered_users("user", "pass", ["+1"])
        .await
        .expect_err("should fail");

    assert!(matches!(
        err,
        DiscoveryError::TransportFailure { status: 0, .. }
    ));
}

#[tokio::test]
async fn test_connect_timeout() {
    let transport = ScriptedTransport::new();
    transport.push_hang();
    let socket = CdshSocket::new(
        Arc::new(transport.clone()),
        "wss://cdsh.example.org/discovery/aa/bb",
        Duration::from_millis(10),
    );

    let mut pages = socket.connect("Basic x".to_string(), FakeEnclave::new(), vec![]);

    assert!(matches!(
        pages.next().await,
        Some(Err(DiscoveryError::TransportFailure { status: 0, .. }))
    ));
    assert!(pages.next().await.is_none());
}

#[tokio::test]
async fn test_pages_stream_in_order_then_complete() {
    let transport = ScriptedTransport::with_events(vec![
        handshake_reply(),
        v2_page(&[], &[1]),
        v2_page(&[], &[2]),
        close(NORMAL_CLOSURE),
    ]);
    let socket = CdshSocket::new(
        Arc::new(transport.clone()),
        "wss://cdsh.example.org/discovery/aa/bb",
        Duration::from_secs(1),
    );

    let mut pages = socket.connect("Basic x".to_string(), FakeEnclave::new(), vec![vec![2]]);

    let first = pages.next().await.expect("page").expect("ok");
    let second = pages.next().await.expect("page").expect("ok");
    assert_eq!(first.token, [1]);
    assert_eq!(second.token, [2]);
    assert!(pages.next().await.is_none());
    assert!(pages.next().await.is_none());

    // Cancelling after completion has no effect on the connection
    pages.cancel();
    pages.cancel();
    assert!(pages.next().await.is_none());
    drop(pages);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(transport.closes().is_empty());
}

#[tokio::test]
async fn test_cancel_closes_once() {
    let transport = ScriptedTransport::new();
    transport.push_events_keep_open(vec![handshake_reply()]);
    let socket = CdshSocket::new(
        Arc::new(transport.clone()),
        "wss://cdsh.example.org/discovery/aa/bb",
        Duration::from_secs(1),
    );

    let mut pages = socket.connect("Basic x".to_string(), FakeEnclave::new(), vec![vec![1]]);
    // Wait for the handshake and the request to go out
    for _ in 0..200 {
        if transport.sent().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    pages.cancel();
    pages.cancel();

    assert_eq!(
        transport.wait_for_closes(1).await,
        vec![(NORMAL_CLOSURE, "OK".to_string())]
    );
    assert_eq!(pages.next().await, Some(Err(DiscoveryError::Cancelled)));
    assert!(pages.next().await.is_none());

    pages.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.closes().len(), 1);
}

#[tokio::test]
async fn test_nothing_is_delivered_after_failure() {
    let transport = ScriptedTransport::with_events(vec![
        handshake_reply(),
        ConnectionEvent::Message(b"garbage".to_vec()),
        v2_page(&[], &[1]),
        close(4001),
    ]);
    let socket = CdshSocket::new(
        Arc::new(transport.clone()),
        "wss://cdsh.example.org/discovery/aa/bb",
        Duration::from_secs(1),
    );

    let mut pages = socket.connect("Basic x".to_string(), FakeEnclave::new(), vec![]);

    assert!(matches!(
        pages.next().await,
        Some(Err(DiscoveryError::DecryptFailure(_)))
    ));
    assert!(pages.next().await.is_none());
    assert_eq!(
        transport.wait_for_closes(1).await,
        vec![(NORMAL_CLOSURE, "OK".to_string())]
    );
}

#[tokio::test]
async fn test_silent_server_times_out_and_closes() {
    let transport = ScriptedTransport::new();
    transport.push_events_keep_open(vec![handshake_reply()]);
    let socket = CdshSocket::new(
        Arc::new(transport.clone()),
        "wss://cdsh.example.org/discovery/aa/bb",
        Duration::from_secs(1),
    )
    .with_exchange_timeout(Some(Duration::from_millis(50)));

    let mut pages = socket.connect("Basic x".to_string(), FakeEnclave::new(), vec![vec![1]]);

    let result = tokio::time::timeout(Duration::from_secs(2), pages.next())
        .await
        .expect("the exchange timeout fires first");
    assert_eq!(result, Some(Err(DiscoveryError::Timeout)));
    assert!(pages.next().await.is_none());
    assert_eq!(
        transport.wait_for_closes(1).await,
        vec![(NORMAL_CLOSURE, "OK".to_string())]
    );
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn test_exchange_timeout_covers_connecting() {
    let transport = ScriptedTransport::new();
    transport.push_hang();
    let socket = CdshSocket::new(
        Arc::new(transport.clone()),
        "wss://cdsh.example.org/discovery/aa/bb",
        Duration::from_secs(5),
    )
    .with_exchange_timeout(Some(Duration::from_millis(20)));

    let mut pages = socket.connect("Basic x".to_string(), FakeEnclave::new(), vec![]);

    assert_eq!(pages.next().await, Some(Err(DiscoveryError::Timeout)));
    assert!(transport.closes().is_empty());
}

#[tokio::test]
async fn test_v2_exchange_timeout_from_config() {
    let transport = ScriptedTransport::new();
    transport.push_events_keep_open(vec![handshake_reply()]);
    let config = CdshConfig {
        exchange_timeout_secs: Some(1),
        ..config()
    };
    let service = DiscoveryServiceV2::new(
        &config,
        Arc::new(transport.clone()),
        FakeEnclaveFactory::default(),
    )
    .expect("valid config");

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        service.get_registered_users("user", "pass", &DiscoveryRequestV2::default()),
    )
    .await
    .expect("the exchange timeout fires first");

    assert_eq!(result, Err(DiscoveryError::Timeout));
    assert_eq!(
        transport.wait_for_closes(1).await,
        vec![(NORMAL_CLOSURE, "OK".to_string())]
    );
}

#[tokio::test]
async fn test_v2_token_saver_receives_first_token() {
    let transport = ScriptedTransport::with_events(vec![
        handshake_reply(),
        v2_page(&[(15550001, [1; 16], [2; 16])], &[]),
        v2_page(&[], &[7; 32]),
        v2_page(&[], &[8; 32]),
        close(NORMAL_CLOSURE),
    ]);
    let saved = Arc::new(Mutex::new(Vec::new()));
    let sink = saved.clone();
    let service = DiscoveryServiceV2::new(
        &config(),
        Arc::new(transport.clone()),
        FakeEnclaveFactory::default(),
    )
    .expect("valid config")
    .with_token_saver(move |token| sink.lock().expect("lock").push(token.to_vec()));

    let response = service
        .get_registered_users("user", "pass", &DiscoveryRequestV2::default())
        .await
        .expect("lookup succeeds");

    assert_eq!(response.token, vec![7; 32]);
    assert_eq!(*saved.lock().expect("lock"), vec![vec![7; 32]]);
}

#[tokio::test]
async fn test_v2_token_is_saved_before_a_failure() {
    let transport = ScriptedTransport::with_events(vec![
        handshake_reply(),
        v2_page(&[], &[7; 32]),
        close(4008),
    ]);
    let saved = Arc::new(Mutex::new(Vec::new()));
    let sink = saved.clone();
    let service = DiscoveryServiceV2::new(
        &config(),
        Arc::new(transport.clone()),
        FakeEnclaveFactory::default(),
    )
    .expect("valid config")
    .with_token_saver(move |token| sink.lock().expect("lock").push(token.to_vec()));

    let err = service
        .get_registered_users("user", "pass", &DiscoveryRequestV2::default())
        .await
        .expect_err("should fail");

    assert_eq!(err, DiscoveryError::NonSuccessfulClose { code: 4008 });
    assert_eq!(*saved.lock().expect("lock"), vec![vec![7; 32]]);
}
