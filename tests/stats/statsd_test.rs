//! Tests for the UDP client in `src/stats.rs`.

use std::net::UdpSocket;
use std::time::Duration;

use unilog::stats::{split_tags, StatsClient, StatsdClient};

fn agent() -> (UdpSocket, String) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind");
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let address = socket.local_addr().expect("addr").to_string();
    (socket, address)
}

fn receive(socket: &UdpSocket) -> String {
    let mut buf = [0u8; 1024];
    let n = socket.recv(&mut buf).expect("datagram");
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

#[test]
fn counters_carry_global_and_call_tags() {
    let (socket, address) = agent();
    let client = StatsdClient::connect(&address, split_tags("env:test,,role:logger"))
        .expect("connect");

    client
        .count("unilog.bytes", 42, &["err_action:none".to_owned()], 1.0)
        .expect("send");
    assert_eq!(
        receive(&socket),
        "unilog.bytes:42|c|#env:test,role:logger,err_action:none"
    );
}

#[test]
fn gauges_use_the_gauge_type() {
    let (socket, address) = agent();
    let client = StatsdClient::connect(&address, Vec::new()).expect("connect");

    client
        .gauge("unilog.austerity.box", 2.0, &[], 1.0)
        .expect("send");
    assert_eq!(receive(&socket), "unilog.austerity.box:2|g");
}

#[test]
fn unresolvable_address_is_an_error() {
    assert!(StatsdClient::connect("not an address", Vec::new()).is_err());
}

#[test]
fn tag_lists_are_split_on_commas() {
    assert_eq!(split_tags(" a:b , c:d,"), ["a:b", "c:d"]);
    assert!(split_tags("").is_empty());
}
