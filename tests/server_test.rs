mod helpers;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use helpers::{Behavior, MockUpstream};
use sandbox_dns::dns::{DnsQuery, DnsResponse, RecordData, RecordType, Rcode};
use sandbox_dns::transport::tcp::{read_dns_message, write_dns_message};
use sandbox_dns::{DnsServer, Endpoint, IpFamily, Network, NetworkRegistry, ResolverConfig, Sandbox};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

fn registry() -> Arc<NetworkRegistry> {
    let registry = Arc::new(NetworkRegistry::new());
    registry.add_network(Arc::new(Network::new("n1", "dtnet1", "bridge")));
    registry
}

#[tokio::test]
async fn test_server_answers_udp_and_tcp_until_shutdown() {
    let upstream = MockUpstream::udp(Behavior::Rcode(Rcode::NxDomain)).await;
    let config = ResolverConfig {
        ext_servers: vec![upstream.entry()],
        timeout: Duration::from_secs(1),
        ..ResolverConfig::default()
    };
    let sandbox = Sandbox::new("c1", registry(), config);
    sandbox
        .join(Endpoint::new("ep1", "web", "n1").with_ipv4(Ipv4Addr::new(172, 18, 0, 2)))
        .unwrap();

    let server = DnsServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.run(Arc::clone(sandbox.resolver()), shutdown.clone()));

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&DnsQuery::new(0x1111, "Web.", RecordType::A).to_bytes().unwrap(), addr)
        .await
        .unwrap();
    let mut buf = vec![0u8; 512];
    let (len, _) = client.recv_from(&mut buf).await.unwrap();
    let udp = DnsResponse::parse(&buf[..len]).unwrap();
    assert_eq!(udp.id, 0x1111);
    assert_eq!(udp.answers[0].rdata, RecordData::A(Ipv4Addr::new(172, 18, 0, 2)));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for (id, name, rcode) in [(0x2222, "web", Rcode::NoError), (0x3333, "elsewhere.example", Rcode::ServFail)] {
        write_dns_message(&mut stream, &DnsQuery::new(id, name, RecordType::A).to_bytes().unwrap())
            .await
            .unwrap();
        let raw = read_dns_message(&mut stream).await.unwrap().unwrap();
        let response = DnsResponse::parse(&raw).unwrap();
        assert_eq!(response.id, id);
        assert_eq!(response.rcode(), rcode);
    }
    // TCP queries are forwarded over TCP, where nothing listens.
    assert_eq!(upstream.requests(), 0);

    // Too short to carry an id: dropped without a reply, so the next
    // datagram received is the FORMERR below.
    client.send_to(&[0x01], addr).await.unwrap();
    client.send_to(&[0xAB, 0xCD, 0x00], addr).await.unwrap();
    let (len, _) = client.recv_from(&mut buf).await.unwrap();
    let formerr = DnsResponse::parse(&buf[..len]).unwrap();
    assert_eq!(formerr.id, 0xABCD);
    assert_eq!(formerr.rcode(), Rcode::FormErr);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("server stops after cancellation")
        .unwrap();
}

#[test]
fn test_leave_never_leaves_a_visible_record() {
    let network = Arc::new(Network::new("n1", "dtnet1", "bridge"));
    network
        .join(Endpoint::new("stable", "stable", "n1").with_ipv4(Ipv4Addr::new(10, 0, 0, 1)))
        .unwrap();

    let round = Arc::new(AtomicU32::new(0));
    let removed = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let network = Arc::clone(&network);
            let round = Arc::clone(&round);
            let removed = Arc::clone(&removed);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    let before = round.load(Ordering::SeqCst);
                    let was_removed = removed.load(Ordering::SeqCst);
                    let result = network.resolve_name("churn", IpFamily::V4);
                    if was_removed && round.load(Ordering::SeqCst) == before {
                        assert_eq!(result, None, "record visible after its endpoint left");
                    }
                    assert!(network.resolve_name("stable", IpFamily::V4).is_some());
                }
            })
        })
        .collect();

    for n in 0..500u32 {
        round.fetch_add(1, Ordering::SeqCst);
        removed.store(false, Ordering::SeqCst);
        let ip = Ipv4Addr::from(0x0A01_0000 + n);
        network
            .join(Endpoint::new("churn-ep", "churn", "n1").with_ipv4(ip).with_alias("churn-alias"))
            .unwrap();
        assert_eq!(network.resolve_name("churn", IpFamily::V4), Some(vec![ip.into()]));

        network.leave("churn-ep").unwrap();
        removed.store(true, Ordering::SeqCst);
        assert_eq!(network.resolve_name("churn-alias", IpFamily::V4), None);
    }

    done.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(network.records().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_are_independent() {
    let sandbox = Arc::new(Sandbox::new(
        "c1",
        registry(),
        ResolverConfig {
            proxy_dns: false,
            ..ResolverConfig::default()
        },
    ));
    for i in 0..20u8 {
        sandbox
            .join(Endpoint::new(format!("ep{i}"), format!("task{i}"), "n1").with_ipv4(Ipv4Addr::new(10, 0, 1, i)))
            .unwrap();
    }

    let tasks: Vec<_> = (0..200u16)
        .map(|n| {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move {
                let i = (n % 20) as u8;
                let query = DnsQuery::new(n, &format!("TASK{i}"), RecordType::A).to_bytes().unwrap();
                let raw = sandbox.resolver().serve(&query, sandbox_dns::Protocol::Udp).await;
                let response = DnsResponse::parse(&raw).unwrap();
                assert_eq!(response.id, n);
                assert_eq!(response.answers[0].rdata, RecordData::A(Ipv4Addr::new(10, 0, 1, i)));
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(sandbox.resolver().stats_snapshot_and_reset().local, 200);
}
