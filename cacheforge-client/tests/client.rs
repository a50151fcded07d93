use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use cacheforge_client::{ClientConfig, ClientTtl, KVClient};

fn spawn_server(expected_commands: usize, handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream)) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    addr
}

/// Reads one binary frame: `<name_len:u32 LE><name><argc:u32 LE>{<len:u32 LE><arg>}*`.
/// The first element returned is the command name, the rest are its arguments.
fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let name_len = read_u32(reader)?;
    let mut name = vec![0u8; name_len as usize];
    reader.read_exact(&mut name)?;

    let argc = read_u32(reader)?;
    let mut parts = Vec::with_capacity(1 + argc as usize);
    parts.push(name);

    for _ in 0..argc {
        let len = read_u32(reader)?;
        let mut arg = vec![0u8; len as usize];
        reader.read_exact(&mut arg)?;
        parts.push(arg);
    }

    Ok(parts)
}

fn read_u32(reader: &mut BufReader<TcpStream>) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_simple(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(b"+");
    let _ = stream.write_all(msg.as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(b"$");
    let _ = stream.write_all(data.len().to_string().as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.write_all(data);
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn write_integer(stream: &mut TcpStream, value: i64) {
    let _ = stream.write_all(b":");
    let _ = stream.write_all(value.to_string().as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn write_null(stream: &mut TcpStream) {
    let _ = stream.write_all(b"$-1\r\n");
    let _ = stream.flush();
}

fn write_array(stream: &mut TcpStream, items: &[&[u8]]) {
    let _ = stream.write_all(b"*");
    let _ = stream.write_all(items.len().to_string().as_bytes());
    let _ = stream.write_all(b"\r\n");
    for item in items {
        write_bulk(stream, item);
    }
}

fn client_with_addr(addr: String) -> KVClient {
    let config = ClientConfig {
        addr,
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
    };
    KVClient::with_config(config).expect("client")
}

#[test]
fn client_set_get_roundtrip() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"SET");
            assert_eq!(args[1], b"key");
            assert_eq!(args[2], b"value");
            write_simple(stream, "OK");
        } else {
            assert_eq!(args[0], b"GET");
            assert_eq!(args[1], b"key");
            write_bulk(stream, b"value");
        }
    });

    let client = client_with_addr(addr);
    client.set(b"key", b"value").expect("set");
    let value = client.get(b"key").expect("get");
    assert_eq!(value, Some(b"value".to_vec()));
}

#[test]
fn client_get_missing_key_returns_none() {
    let addr = spawn_server(1, |_idx, args, stream| {
        assert_eq!(args[0], b"GET");
        assert_eq!(args[1], b"missing");
        write_null(stream);
    });

    let client = client_with_addr(addr);
    let value = client.get(b"missing").expect("get");
    assert_eq!(value, None);
}

#[test]
fn client_ttl_and_delete() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"TTL");
            assert_eq!(args[1], b"key");
            write_integer(stream, 5);
        } else {
            assert_eq!(args[0], b"DEL");
            assert_eq!(args[1], b"key");
            write_integer(stream, 1);
        }
    });

    let client = client_with_addr(addr);
    let ttl = client.ttl(b"key").expect("ttl");
    assert_eq!(ttl, ClientTtl::ExpiresIn(Duration::from_secs(5)));
    let removed = client.delete(b"key").expect("delete");
    assert!(removed);
}

#[test]
fn client_ttl_reports_missing_and_no_expiry() {
    let addr = spawn_server(2, |idx, args, stream| {
        assert_eq!(args[0], b"TTL");
        if idx == 0 {
            write_integer(stream, -2);
        } else {
            write_integer(stream, -1);
        }
    });

    let client = client_with_addr(addr);
    assert_eq!(client.ttl(b"a").expect("ttl"), ClientTtl::Missing);
    assert_eq!(client.ttl(b"a").expect("ttl"), ClientTtl::NoExpiry);
}

#[test]
fn client_set_with_ttl_sends_ex_suffix() {
    let addr = spawn_server(1, |_idx, args, stream| {
        assert_eq!(args[0], b"SET");
        assert_eq!(args[1], b"key");
        assert_eq!(args[2], b"value");
        assert_eq!(args[3], b"EX");
        assert_eq!(args[4], b"30");
        write_simple(stream, "OK");
    });

    let client = client_with_addr(addr);
    client.set_with_ttl(b"key", b"value", Duration::from_secs(30)).expect("set_with_ttl");
}

#[test]
fn client_keys_returns_matches() {
    let addr = spawn_server(1, |_idx, args, stream| {
        assert_eq!(args[0], b"KEYS");
        assert_eq!(args[1], b"a:*");
        write_array(stream, &[b"a:1", b"a:2"]);
    });

    let client = client_with_addr(addr);
    let keys = client.keys(b"a:*").expect("keys");
    assert_eq!(keys, vec![b"a:1".to_vec(), b"a:2".to_vec()]);
}

#[test]
fn client_surfaces_server_error() {
    let addr = spawn_server(1, |_idx, args, stream| {
        assert_eq!(args[0], b"SET");
        let _ = stream.write_all(b"-ERR value too large\r\n");
        let _ = stream.flush();
    });

    let client = client_with_addr(addr);
    let err = client.set(b"key", b"value").unwrap_err();
    assert!(matches!(err, cacheforge_client::ClientError::Server { .. }));
}

#[test]
fn client_ping_roundtrip() {
    let addr = spawn_server(1, |_idx, args, stream| {
        assert_eq!(args[0], b"PING");
        write_simple(stream, "PONG");
    });

    let client = client_with_addr(addr);
    let reply = client.ping(None).expect("ping");
    assert_eq!(reply, b"PONG");
}
