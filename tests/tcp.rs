use std::{
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::Duration,
};

use realtime_mt::run_tcp;

mod common;

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn connect(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(socket) = TcpStream::connect(("127.0.0.1", port)) {
            return socket;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("server never started listening on port {port}");
}

fn read_line(reader: &mut impl BufRead) -> String {
    let mut line = String::new();
    assert!(reader.read_line(&mut line).unwrap() > 0, "connection closed");
    line.trim_end().to_owned()
}

/// Reads a SAVE reply up to and including its EOF line.
fn read_state_block(reader: &mut impl BufRead) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let line = read_line(reader);
        let done = line == "EOF";
        lines.push(line);
        if done {
            return lines;
        }
    }
}

#[test]
fn tcp_round_trip_with_inline_state_stream() {
    let fixture = common::fixture();
    let translator = Arc::new(fixture.translator(5, false));
    let port = free_port();
    {
        let translator = Arc::clone(&translator);
        thread::spawn(move || run_tcp(translator, port).unwrap());
    }

    let mut socket = connect(port);
    let mut reader = BufReader::new(socket.try_clone().unwrap());

    socket.write_all(b"TR ctxA ||| hola mundo\n").unwrap();
    assert_eq!(read_line(&mut reader), "hyp(w0=1.0): hola mundo");

    // LEARN produces no response; the connection handles its commands in
    // order, so the following SAVE sees the updated context.
    socket
        .write_all(b"LEARN ctxA ||| hola mundo ||| hello world\n")
        .unwrap();
    socket.write_all(b"SAVE ctxA\n").unwrap();
    let saved = read_state_block(&mut reader);
    assert_eq!(
        saved,
        vec![
            "w0=1.0 +u".to_owned(),
            "hola mundo ||| hello world ||| 0-0".to_owned(),
            "EOF".to_owned(),
        ]
    );

    // A LOAD without a filename streams its state block over the socket.
    socket.write_all(b"LOAD ctxB\n").unwrap();
    for line in &saved {
        socket.write_all(line.as_bytes()).unwrap();
        socket.write_all(b"\n").unwrap();
    }
    socket.write_all(b"SAVE ctxB\n").unwrap();
    assert_eq!(read_state_block(&mut reader), saved);

    socket.write_all(b"LIST\n").unwrap();
    assert_eq!(read_line(&mut reader), "ctx_name ||| ctxA ctxB");

    translator.close(false).unwrap();
}

#[test]
fn tcp_serves_concurrent_connections() {
    let fixture = common::fixture();
    let translator = Arc::new(fixture.translator(5, false));
    let port = free_port();
    {
        let translator = Arc::clone(&translator);
        thread::spawn(move || run_tcp(translator, port).unwrap());
    }

    let clients: Vec<_> = ["uno", "dos"]
        .into_iter()
        .map(|sentence| {
            thread::spawn(move || {
                let mut socket = connect(port);
                let mut reader = BufReader::new(socket.try_clone().unwrap());
                socket
                    .write_all(format!("TR shared ||| {sentence}\n").as_bytes())
                    .unwrap();
                read_line(&mut reader)
            })
        })
        .collect();
    let mut replies: Vec<String> = clients
        .into_iter()
        .map(|client| client.join().unwrap())
        .collect();
    replies.sort();
    assert_eq!(
        replies,
        vec!["hyp(w0=1.0): dos".to_owned(), "hyp(w0=1.0): uno".to_owned()]
    );

    translator.close(false).unwrap();
}
