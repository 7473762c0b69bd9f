//! Black-box end-to-end scenarios (§8), driven through [`nika::engine::run`]
//! against full YAML sources the way a deployed workflow would actually run,
//! rather than through the individual unit tests sprinkled across `src/`.

use nika::engine;
use nika::stdlib::Registry;
use nika::value::{ErrorTag, Value};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn run(src: &str, args: Value) -> Result<Value, nika::value::WorkflowError> {
    let workflow = nika::workflow::parser::parse_source(src.as_bytes()).unwrap();
    let registry = Registry::with_builtins();
    engine::run(&workflow, &registry, args, Arc::new(AtomicBool::new(false)))
}

#[test]
fn scenario_1_simple_return() {
    let src = r#"
main:
  steps:
    - done:
        return: "hello"
"#;
    let v = run(src, Value::Null).unwrap();
    assert_eq!(v.as_str(), Some("hello"));
}

#[test]
fn scenario_2_assign_then_return() {
    let src = r#"
main:
  steps:
    - i:
        assign:
          - x: 10
          - y: 20
          - c: ${x + y}
    - d:
        return: ${c}
"#;
    let v = run(src, Value::Null).unwrap();
    assert!(matches!(v, Value::Int(30)));
}

#[test]
fn scenario_3_param_from_map_argument() {
    let src = r#"
main:
  params:
    - args
  steps:
    - d:
        return: ${args.greeting}
"#;
    let args = Value::map([(
        "greeting".to_string(),
        Value::string("hello world"),
    )]);
    let v = run(src, args).unwrap();
    assert_eq!(v.as_str(), Some("hello world"));
}

#[test]
fn scenario_4_for_range_plain_accumulation() {
    let src = r#"
main:
  steps:
    - init:
        assign:
          - total: 0
    - loop:
        for:
          value: v
          range: [1, 5]
          steps:
            - accumulate:
                assign:
                  - total: ${total + v}
    - done:
        return: ${total}
"#;
    let v = run(src, Value::Null).unwrap();
    assert!(matches!(v, Value::Int(15)));
}

#[test]
fn scenario_4_for_range_with_break_at_four() {
    let src = r#"
main:
  steps:
    - init:
        assign:
          - total: 0
    - loop:
        for:
          value: v
          range: [1, 5]
          steps:
            - stop_at_four:
                switch:
                  - condition: ${v == 4}
                    next: break
            - accumulate:
                assign:
                  - total: ${total + v}
    - done:
        return: ${total}
"#;
    // 1 + 2 + 3 = 6, breaks before accumulating 4
    let v = run(src, Value::Null).unwrap();
    assert!(matches!(v, Value::Int(6)));
}

#[test]
fn scenario_4_for_range_with_continue_at_three() {
    let src = r#"
main:
  steps:
    - init:
        assign:
          - total: 0
    - loop:
        for:
          value: v
          range: [1, 5]
          steps:
            - skip_three:
                switch:
                  - condition: ${v == 3}
                    next: continue
            - accumulate:
                assign:
                  - total: ${total + v}
    - done:
        return: ${total}
"#;
    // 1 + 2 + 4 + 5 = 12, skips 3
    let v = run(src, Value::Null).unwrap();
    assert!(matches!(v, Value::Int(12)));
}

#[test]
fn scenario_5_subworkflow_default_param() {
    let src = r#"
greet:
  params:
    - first_name
    - last_name: "Lovelace"
  steps:
    - build:
        return: ${first_name + " " + last_name}

main:
  steps:
    - call_it:
        call: greet
        args:
          first_name: "Ada"
        result: message
    - done:
        return: ${message}
"#;
    let v = run(src, Value::Null).unwrap();
    assert_eq!(v.as_str(), Some("Ada Lovelace"));
}

#[test]
fn scenario_6_try_except_returns_caught_message() {
    let src = r#"
main:
  steps:
    - guarded:
        try:
          steps:
            - fail:
                raise:
                  message: "X"
                  code: 42
        except:
          as: e
          steps:
            - h:
                return: ${e.message}
"#;
    let v = run(src, Value::Null).unwrap();
    assert_eq!(v.as_str(), Some("X"));
}

#[test]
fn scenario_6_uncaught_raise_fails_with_structured_error() {
    let src = r#"
main:
  steps:
    - fail:
        raise:
          message: "X"
          code: 42
"#;
    let err = run(src, Value::Null).unwrap_err();
    assert_eq!(err.message, "X");
    assert_eq!(err.code, 42);
}

#[test]
fn scenario_7_parallel_shared_counter() {
    let src = r#"
main:
  steps:
    - init:
        assign:
          - counter: 0
    - fan_out:
        parallel:
          shared: [counter]
          branches:
            - steps:
                - inc1:
                    assign:
                      - counter: ${counter + 1}
            - steps:
                - inc2:
                    assign:
                      - counter: ${counter + 1}
    - done:
        return: ${counter}
"#;
    let v = run(src, Value::Null).unwrap();
    assert!(matches!(v, Value::Int(2)));
}

#[test]
fn scenario_7_parallel_exceeding_branch_limit_raises_resource_limit_error() {
    let mut branches = String::new();
    for i in 0..11 {
        branches.push_str(&format!(
            "            - steps:\n                - b{i}:\n                    assign:\n                      - a: {i}\n"
        ));
    }
    let src = format!(
        "main:\n  steps:\n    - fan_out:\n        parallel:\n          branches:\n{branches}"
    );
    let err = run(&src, Value::Null).unwrap_err();
    assert!(err.has_tag(ErrorTag::ResourceLimitError));
}

#[test]
fn scenario_7_parallel_exceeding_nesting_depth_raises_parallel_nesting_error() {
    let src = r#"
main:
  steps:
    - outer:
        parallel:
          branches:
            - steps:
                - middle:
                    parallel:
                      branches:
                        - steps:
                            - inner:
                                parallel:
                                  branches:
                                    - steps:
                                        - leaf:
                                            assign:
                                              - a: 1
"#;
    let err = run(src, Value::Null).unwrap_err();
    assert!(err.has_tag(ErrorTag::ParallelNestingError));
}

/// Scenario 8's success path (503, 503, 200) exercises `http.default_retry`
/// end to end against a real local server, since the retry count only means
/// anything if each attempt is an actual HTTP round trip.
#[test]
fn scenario_8_retry_succeeds_on_third_attempt() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tiny_server::TinyServer;

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_handler = attempts.clone();
    let server = TinyServer::start(move |_req| {
        let n = attempts_for_handler.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            (503, "service unavailable".to_string())
        } else {
            (200, "ok".to_string())
        }
    });

    let src = format!(
        r#"
main:
  steps:
    - guarded:
        try:
          steps:
            - call_it:
                call: http.get
                args:
                  url: "{}"
        retry:
          predicate: http.default_retry
          max_retries: 5
          backoff:
            initial: 0.01
            max: 0.1
            mult: 2
    - done:
        return: "ok"
"#,
        server.url()
    );
    let v = run(&src, Value::Null).unwrap();
    assert_eq!(v.as_str(), Some("ok"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let _ = Mutex::new(()); // silence unused-import drift if Mutex stops being needed
    server.stop();
}

#[test]
fn scenario_8_retry_does_not_retry_on_500() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use tiny_server::TinyServer;

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_handler = attempts.clone();
    let server = TinyServer::start(move |_req| {
        attempts_for_handler.fetch_add(1, Ordering::SeqCst);
        (500, "internal error".to_string())
    });

    let src = format!(
        r#"
main:
  steps:
    - guarded:
        try:
          steps:
            - call_it:
                call: http.get
                args:
                  url: "{}"
        retry:
          predicate: http.default_retry
          max_retries: 5
          backoff:
            initial: 0.01
            max: 0.1
            mult: 2
"#,
        server.url()
    );
    let err = run(&src, Value::Null).unwrap_err();
    assert_eq!(err.code, 500);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    server.stop();
}

mod tiny_server {
    //! A minimal single-threaded HTTP/1.1 server over `std::net`, just
    //! enough to drive the retry scenarios against a real socket without
    //! pulling an async mock-server harness into a purely synchronous test.
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    pub struct TinyServer {
        addr: std::net::SocketAddr,
        stop_flag: Arc<AtomicBool>,
        handle: Option<std::thread::JoinHandle<()>>,
    }

    impl TinyServer {
        pub fn start<F>(mut handler: F) -> TinyServer
        where
            F: FnMut(&str) -> (u16, String) + Send + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.set_nonblocking(true).unwrap();
            let addr = listener.local_addr().unwrap();
            let stop_flag = Arc::new(AtomicBool::new(false));
            let stop_flag_thread = stop_flag.clone();
            let handle = std::thread::spawn(move || {
                while !stop_flag_thread.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => serve_one(stream, &mut handler),
                        Err(_) => std::thread::sleep(std::time::Duration::from_millis(2)),
                    }
                }
            });
            TinyServer {
                addr,
                stop_flag,
                handle: Some(handle),
            }
        }

        pub fn url(&self) -> String {
            format!("http://{}/", self.addr)
        }

        pub fn stop(mut self) {
            self.stop_flag.store(true, Ordering::SeqCst);
            if let Some(h) = self.handle.take() {
                let _ = h.join();
            }
        }
    }

    fn serve_one<F>(mut stream: TcpStream, handler: &mut F)
    where
        F: FnMut(&str) -> (u16, String),
    {
        stream
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .ok();
        let mut buf = [0u8; 8192];
        let n = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(_) => return,
        };
        let request = String::from_utf8_lossy(&buf[..n]);
        let path = request
            .lines()
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .unwrap_or("/")
            .to_string();
        let (status, body) = handler(&path);
        let reason = match status {
            200 => "OK",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        };
        let response = format!(
            "HTTP/1.1 {status} {reason}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.flush();
    }
}
