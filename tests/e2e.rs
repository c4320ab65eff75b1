mod common;

use std::time::Duration;

use common::{spawn_arith_server, Args, Sum};
use geerpc::client::dial;
use geerpc::discovery::{MultiServersDiscovery, SelectMode};
use geerpc::option::Options;
use geerpc::xclient::XClient;
use tokio_util::sync::CancellationToken;

// S1: a registered method round-trips through a real client/server connection.
#[tokio::test]
async fn sum_round_trips_over_the_wire() {
    let addr = spawn_arith_server().await.unwrap();
    let client = dial(&addr, Options::default()).await.unwrap();

    let reply: Sum = client
        .call_uncancellable("Arith.Sum", Args { num1: 3, num2: 4 })
        .await
        .unwrap();

    assert_eq!(reply.value, 7);
}

// Property 2: seq assigned to successive calls on one client increases by one.
#[tokio::test]
async fn seq_is_strictly_increasing() {
    let addr = spawn_arith_server().await.unwrap();
    let client = dial(&addr, Options::default()).await.unwrap();

    let (done, _rx) = tokio::sync::mpsc::channel::<geerpc::client::Call<Sum>>(1);
    let first = client.go("Arith.Sum", Args { num1: 1, num2: 1 }, done.clone()).await.unwrap();
    let second = client.go("Arith.Sum", Args { num1: 1, num2: 1 }, done).await.unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 2);
}

// S2: a handler that outruns handle_timeout is reported as a timeout whose
// message names the configured duration.
#[tokio::test]
async fn handle_timeout_reports_the_configured_duration() {
    let addr = spawn_arith_server().await.unwrap();
    let opt = Options::default().with_handle_timeout(Duration::from_millis(100));
    let client = dial(&addr, opt).await.unwrap();

    let err = client
        .call_uncancellable::<_, Sum>("Arith.Sleep", Args { num1: 1, num2: 1 })
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("request handle timeout"), "{message}");
    assert!(message.contains("100ms"), "{message}");
}

// S3: connecting to an address nothing listens on with a short connect
// timeout fails with a timeout error, not a hang.
#[tokio::test]
async fn connect_timeout_fires_on_an_unreachable_host() {
    let opt = Options::default().with_connect_timeout(Duration::from_millis(50));
    let err = dial("10.255.255.1:9", opt).await.unwrap_err();
    assert!(err.to_string().contains("connect timeout"), "{err}");
}

// Property 5: cancelling a call before the reply arrives surfaces a
// cancellation error and does not wedge the connection for later calls.
#[tokio::test]
async fn cancellation_before_reply_does_not_leak_the_pending_entry() {
    let addr = spawn_arith_server().await.unwrap();
    let client = dial(&addr, Options::default()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client
        .call::<_, Sum>("Arith.Sum", Args { num1: 1, num2: 1 }, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, geerpc::Error::Cancelled(_)));

    // The connection must still be usable for a fresh call afterward.
    let reply: Sum = client
        .call_uncancellable("Arith.Sum", Args { num1: 5, num2: 6 })
        .await
        .unwrap();
    assert_eq!(reply.value, 11);
}

// Property 7: duplicate registration and unresolved routes fail with
// messages naming the offending component.
#[tokio::test]
async fn duplicate_registration_and_unknown_routes_fail() {
    use geerpc::service::ServiceBuilder;

    let registry = geerpc::service::ServiceRegistry::new();
    let service = ServiceBuilder::new("Arith", common::Arith).method("Sum", common::Arith::sum).build();
    registry.register(service).unwrap();

    let duplicate = ServiceBuilder::new("Arith", common::Arith).method("Sum", common::Arith::sum).build();
    let err = registry.register(duplicate).unwrap_err();
    assert!(err.to_string().contains("Arith"));

    let missing_service = registry.find("Missing.Sum").unwrap_err();
    assert!(missing_service.to_string().contains("Missing"));

    let missing_method = registry.find("Arith.Nope").unwrap_err();
    assert!(missing_method.to_string().contains("Nope"));
}

// S5: round-robin cycles every endpoint exactly once before repeating, and
// a closed XClient's cache is empty but still usable (it simply redials).
#[tokio::test]
async fn xclient_round_robins_then_refuses_after_close() {
    use geerpc::discovery::Discovery;

    let a = spawn_arith_server().await.unwrap();
    let b = spawn_arith_server().await.unwrap();
    let c = spawn_arith_server().await.unwrap();
    let endpoints = [format!("tcp@{a}"), format!("tcp@{b}"), format!("tcp@{c}")];

    let discovery = MultiServersDiscovery::new(endpoints.to_vec());
    let mut seen = std::collections::HashSet::new();
    for _ in 0..3 {
        seen.insert(discovery.get(SelectMode::RoundRobin).await.unwrap());
    }
    assert_eq!(seen, endpoints.iter().cloned().collect());

    let discovery = MultiServersDiscovery::new(endpoints.to_vec());
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    for _ in 0..3 {
        let cancel = CancellationToken::new();
        let reply: Sum = xclient.call("Arith.Sum", Args { num1: 1, num2: 1 }, &cancel).await.unwrap();
        assert_eq!(reply.value, 2);
    }

    xclient.close().await.unwrap();

    let cancel = CancellationToken::new();
    let reply: Result<Sum, geerpc::Error> = xclient.call("Arith.Sum", Args { num1: 1, num2: 1 }, &cancel).await;
    assert!(reply.is_err(), "further calls on a closed xclient must fail, per S5");
}

// S8: a connection that never presents the right magic number is dropped
// without the server attempting to read a request off it.
#[tokio::test]
async fn wrong_magic_number_closes_the_connection() {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    let addr = spawn_arith_server().await.unwrap();
    let mut stream = TcpStream::connect(&addr).await.unwrap();

    let bogus = serde_json::json!({
        "MagicNumber": 0,
        "CodecType": "application/gob",
        "ConnectTimeout": 0,
        "HandleTimeout": 0,
    });
    let bytes = serde_json::to_vec(&bogus).unwrap();
    stream.write_u32(bytes.len() as u32).await.unwrap();
    stream.write_all(&bytes).await.unwrap();

    // The server closes the connection rather than reading a request; the
    // client observes EOF.
    let mut buf = [0u8; 1];
    use tokio::io::AsyncReadExt;
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}

// S6: broadcast returns the first error observed even if a slower sibling
// would otherwise have succeeded.
#[tokio::test]
async fn broadcast_first_error_wins_over_a_later_success() {
    let good = spawn_arith_server().await.unwrap();

    let discovery = MultiServersDiscovery::new(vec![
        "tcp@127.0.0.1:1".to_string(), // nothing listens here
        format!("tcp@{good}"),
    ]);
    let opt = Options::default().with_connect_timeout(Duration::from_millis(200));
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, opt);

    let result: Result<Sum, geerpc::Error> = xclient.broadcast("Arith.Sum", Args { num1: 1, num2: 1 }).await;
    assert!(result.is_err());
}

// Property 1 / S4: many concurrent calls on each of two clients sharing one
// server all complete, and every reply matches the arguments that produced it.
#[tokio::test]
async fn concurrent_calls_across_two_clients_are_never_misrouted() {
    use std::sync::Arc;

    const CALLS_PER_CLIENT: i64 = 1000;

    let addr = spawn_arith_server().await.unwrap();
    let client_a = Arc::new(dial(&addr, Options::default()).await.unwrap());
    let client_b = Arc::new(dial(&addr, Options::default()).await.unwrap());

    let mut tasks = Vec::new();
    for client in [client_a, client_b] {
        for i in 0..CALLS_PER_CLIENT {
            let client = Arc::clone(&client);
            tasks.push(tokio::spawn(async move {
                let args = Args { num1: i, num2: i * 2 };
                let reply: Sum = client.call_uncancellable("Arith.Sum", args).await.unwrap();
                assert_eq!(reply.value, i + i * 2);
            }));
        }
    }

    for task in tasks {
        task.await.unwrap();
    }
}
