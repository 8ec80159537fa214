//! End-to-end engine scenarios straight out of the conformance surface:
//! handler echo, unknown method, queueing under disconnect/overflow,
//! response correlation, and on-demand outbound channel creation.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;

use rpcmux::auth::{CredentialStore, DigestVerifier};
use rpcmux::channels::loopback::LoopbackChannel;
use rpcmux::config::Config;
use rpcmux::engine::{CallOptions, PrehandlerOutcome, RpcEngine};
use rpcmux::Frame;

fn inject_request(channel: &Rc<LoopbackChannel>, id: i64, method: &str, src: &str, args: serde_json::Value) {
    let mut frame = Frame::new_request(id, method);
    frame.src = src.to_string();
    frame.args = Some(args);
    channel.inject(frame.serialize());
}

// Scenario 1: handler echo.
#[test]
fn handler_echo_roundtrip() {
    let engine = RpcEngine::new(Config::default());
    engine.add_local_id("self");
    engine.add_handler(
        "Echo",
        None,
        Box::new(|handle, args| handle.respond(args.unwrap_or(serde_json::Value::Null))),
    );

    let channel = LoopbackChannel::new();
    engine.add_channel("", channel.clone());
    channel.open();

    inject_request(&channel, 42, "Echo", "peer", json!({"x": 1}));

    let sent = channel.take_sent();
    assert_eq!(sent.len(), 1);
    let response = Frame::parse(&sent[0]).unwrap();
    assert_eq!(response.id, 42);
    assert_eq!(response.dst, "peer");
    assert_eq!(response.result, Some(json!({"x": 1})));
    assert_eq!(response.error_code, 0);
}

// Scenario 2: unknown method gets a 404.
#[test]
fn unknown_method_gets_404() {
    let engine = RpcEngine::new(Config::default());
    let channel = LoopbackChannel::new();
    engine.add_channel("", channel.clone());
    channel.open();

    inject_request(&channel, 7, "Nope", "peer", serde_json::Value::Null);

    let sent = channel.take_sent();
    assert_eq!(sent.len(), 1);
    let response = Frame::parse(&sent[0]).unwrap();
    assert_eq!(response.id, 7);
    assert_eq!(response.error_code, 404);
    assert!(response.error_msg.contains("Nope"));
}

// Scenario 3: queueing while disconnected, then flush on OPEN.
#[test]
fn queue_flushes_on_channel_open() {
    let engine = RpcEngine::new(Config::default());

    let accepted = engine.call(
        "M",
        None,
        CallOptions {
            dst: "peer1".into(),
            ..Default::default()
        },
        None,
    );
    assert!(accepted, "no channel yet, but the queue should accept it");
    assert_eq!(engine.queue_len(), 1);

    let channel = LoopbackChannel::new();
    engine.add_channel("peer1", channel.clone());
    channel.open();

    assert_eq!(engine.queue_len(), 0);
    assert_eq!(channel.take_sent().len(), 1);
}

// Scenario 4: queue overflow rejects the third send.
#[test]
fn queue_overflow_rejects_excess_sends() {
    let mut config = Config::default();
    config.max_queue_length = 2;
    let engine = RpcEngine::new(config);

    let opts = || CallOptions {
        dst: "peer".into(),
        ..Default::default()
    };
    assert!(engine.call("M", None, opts(), None));
    assert!(engine.call("M", None, opts(), None));
    assert!(!engine.call("M", None, opts(), None));
    assert_eq!(engine.queue_len(), 2);
}

// Scenario 5: response correlation, with duplicate delivery discarded.
#[test]
fn response_correlates_to_pending_request_once() {
    let engine = RpcEngine::new(Config::default());
    let channel = LoopbackChannel::new();
    engine.add_channel("peer", channel.clone());
    channel.open();

    let seen: Rc<RefCell<Vec<serde_json::Value>>> = Rc::new(RefCell::new(Vec::new()));
    let seen_cb = seen.clone();
    engine.call(
        "M",
        None,
        CallOptions {
            dst: "peer".into(),
            ..Default::default()
        },
        Some(Box::new(move |resp| {
            seen_cb.borrow_mut().push(resp.result.unwrap_or(serde_json::Value::Null));
            assert_eq!(resp.error_code, 0);
        })),
    );

    let sent = channel.take_sent();
    assert_eq!(sent.len(), 1);
    let request = Frame::parse(&sent[0]).unwrap();
    let request_id = request.id;

    let mut response = Frame::default();
    response.id = request_id;
    response.result = Some(json!({"ok": true}));
    channel.inject(response.serialize());
    channel.inject(response.serialize()); // duplicate, must be silently discarded

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0], json!({"ok": true}));
    assert_eq!(engine.pending_count(), 0);
}

// Scenario 6: on-demand outbound channel creation.
#[test]
fn on_demand_channel_is_created_and_flushed_on_open() {
    let engine = RpcEngine::new(Config::default());

    let created: Rc<RefCell<Option<Rc<LoopbackChannel>>>> = Rc::new(RefCell::new(None));
    let created_for_factory = created.clone();
    engine.set_channel_factory(Box::new(move |uri, _ws_defaults| {
        if uri.scheme != "ws" {
            return None;
        }
        let channel = LoopbackChannel::new();
        *created_for_factory.borrow_mut() = Some(channel.clone());
        Some(channel as rpcmux::channel::BoxChannel)
    }));

    let accepted = engine.call(
        "M",
        None,
        CallOptions {
            dst: "ws://h:1/r".into(),
            ..Default::default()
        },
        None,
    );
    assert!(accepted);

    let channel = created.borrow().clone().expect("factory should have been invoked");
    assert_eq!(channel.take_sent().len(), 0, "not open yet, frame must be queued");
    assert_eq!(engine.queue_len(), 1);

    channel.open();
    assert_eq!(channel.take_sent().len(), 1, "flushed once the on-demand channel opens");
    assert_eq!(engine.queue_len(), 0);
}

// Boundary: a frame addressed to an unknown local id is rejected, but the
// channel stays open (no close is triggered for this kind of rejection).
#[test]
fn frame_to_unrecognized_dst_is_rejected_without_closing() {
    let engine = RpcEngine::new(Config::default());
    engine.add_local_id("self");
    engine.add_handler("Echo", None, Box::new(|handle, args| {
        handle.respond(args.unwrap_or(serde_json::Value::Null));
    }));

    let channel = LoopbackChannel::new();
    engine.add_channel("", channel.clone());
    channel.open();

    let mut frame = Frame::new_request(1, "Echo");
    frame.src = "peer".into();
    frame.dst = "someone-else".into();
    channel.inject(frame.serialize());

    assert_eq!(channel.take_sent().len(), 0, "frame for an unknown dst is dropped, not answered");
}

// Boundary: response with id == 0 is rejected.
#[test]
fn response_with_zero_id_is_discarded() {
    let engine = RpcEngine::new(Config::default());
    let channel = LoopbackChannel::new();
    engine.add_channel("", channel.clone());
    channel.open();

    let mut response = Frame::default();
    response.id = 0;
    response.result = Some(json!("ignored"));
    channel.inject(response.serialize());

    assert_eq!(engine.pending_count(), 0);
    assert_eq!(channel.take_sent().len(), 0);
}

// Broadcast: no eligible channels -> false; one eligible -> true.
#[test]
fn broadcast_requires_at_least_one_eligible_channel() {
    let engine = RpcEngine::new(Config::default());
    let plain = LoopbackChannel::new();
    engine.add_channel("plain", plain.clone());
    plain.open();

    let broadcast_opts = CallOptions {
        broadcast: true,
        ..Default::default()
    };
    assert!(!engine.call("M", None, broadcast_opts, None));

    let eligible = LoopbackChannel::new();
    eligible.broadcast_enabled();
    engine.add_channel("eligible", eligible.clone());
    eligible.open();

    let broadcast_opts = CallOptions {
        broadcast: true,
        ..Default::default()
    };
    assert!(engine.call("M", None, broadcast_opts, None));
    assert_eq!(eligible.take_sent().len(), 1);
    assert_eq!(plain.take_sent().len(), 0);
}

// Persistence: a persistent channel's entry survives a CLOSED event.
#[test]
fn persistent_channel_survives_closed() {
    let engine = RpcEngine::new(Config::default());
    let channel = LoopbackChannel::new();
    channel.persistent();
    engine.add_channel("peer", channel.clone());
    channel.open();
    channel.simulate_closed();

    // The entry is still addressable: a call to the same dst must not
    // trigger on-demand creation (there's no factory configured at all, so
    // a missing entry would make this call fail outright).
    let accepted = engine.call(
        "M",
        None,
        CallOptions {
            dst: "peer".into(),
            no_queue: true,
            ..Default::default()
        },
        None,
    );
    assert!(!accepted, "the entry is closed, so a direct no_queue send fails");
    // But queueing still works, proving the entry itself wasn't removed.
    let accepted = engine.call(
        "M",
        None,
        CallOptions {
            dst: "peer".into(),
            ..Default::default()
        },
        None,
    );
    assert!(accepted);
    assert_eq!(engine.queue_len(), 1);
}

// §6.3: `enable = false` is the master off switch — new calls are rejected
// and inbound frames are dropped before dispatch, rather than queued or
// routed to a handler.
#[test]
fn disabled_engine_rejects_new_calls_and_drops_inbound_frames() {
    let config = Config {
        enable: false,
        ..Config::default()
    };
    let engine = RpcEngine::new(config);
    engine.add_local_id("self");
    engine.add_handler(
        "Echo",
        None,
        Box::new(|handle, args| handle.respond(args.unwrap_or(serde_json::Value::Null))),
    );

    let channel = LoopbackChannel::new();
    engine.add_channel("peer", channel.clone());
    channel.open();

    let accepted = engine.call(
        "Echo",
        None,
        CallOptions {
            dst: "peer".into(),
            ..Default::default()
        },
        None,
    );
    assert!(!accepted, "a disabled engine must reject new calls");
    assert_eq!(engine.queue_len(), 0);

    inject_request(&channel, 7, "Echo", "peer", json!({"x": 1}));
    assert!(
        channel.take_sent().is_empty(),
        "a disabled engine must not dispatch or respond to inbound frames"
    );
}

struct StaticCredentialStore(std::collections::HashMap<(String, String), String>);

impl CredentialStore for StaticCredentialStore {
    fn ha1(&self, realm: &str, username: &str) -> Option<String> {
        self.0.get(&(username.to_string(), realm.to_string())).cloned()
    }
}

// §4.8: a prehandler composed on top of `DigestVerifier` is how a host wires
// up authentication. A request with no `auth` field at all is still let
// through unauthenticated — "authentication failure does not by itself
// reject the request; callers compose policy" — but here the policy this
// test's prehandler enforces is "no credentials, no handler".
#[test]
fn auth_prehandler_rejects_missing_credentials_and_admits_valid_ones() {
    let realm = "rpcmux";
    let username = "alice";
    let password = "hunter2";
    let ha1 = format!("{:x}", md5::compute(format!("{}:{}:{}", username, realm, password)));
    let mut creds = std::collections::HashMap::new();
    creds.insert((username.to_string(), realm.to_string()), ha1.clone());
    let store = StaticCredentialStore(creds);

    let engine = RpcEngine::new(Config::default());
    engine.add_local_id("self");
    engine.add_handler(
        "Secret",
        None,
        Box::new(|handle, _args| {
            let authn = handle.authn_info.borrow().clone();
            let username = authn.map(|a| a.username).unwrap_or_default();
            handle.respond(json!({"greeting": format!("hi, {username}")}));
        }),
    );
    engine.set_prehandler(Box::new(move |request, args| {
        let verifier = DigestVerifier::new(&store, realm);
        match request.auth().and_then(|v| v.as_str()) {
            Some(header) => match verifier.verify(header, request.method()) {
                Some(authn) => {
                    *request.authn_info.borrow_mut() = Some(authn);
                    PrehandlerOutcome::Continue(request, args)
                }
                None => {
                    request.respond_error(401, "bad credentials");
                    PrehandlerOutcome::Stop
                }
            },
            None => {
                request.respond_error(401, "authentication required");
                PrehandlerOutcome::Stop
            }
        }
    }));

    let channel = LoopbackChannel::new();
    engine.add_channel("peer", channel.clone());
    channel.open();

    inject_request(&channel, 1, "Secret", "peer", serde_json::Value::Null);
    let sent = channel.take_sent();
    assert_eq!(sent.len(), 1);
    let unauth_response = Frame::parse(&sent[0]).unwrap();
    assert_eq!(unauth_response.error_code, 401);

    let uri = "/rpc";
    let nonce = "abc123";
    let ha2 = format!("{:x}", md5::compute(format!("Secret:{}", uri)));
    let response = format!("{:x}", md5::compute(format!("{}:{}:{}", ha1, nonce, ha2)));
    let header = format!(
        "Digest username=\"{username}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", response=\"{response}\""
    );
    let mut frame = Frame::new_request(2, "Secret");
    frame.src = "peer".to_string();
    frame.auth = Some(json!(header));
    channel.inject(frame.serialize());

    let sent = channel.take_sent();
    assert_eq!(sent.len(), 1);
    let authed_response = Frame::parse(&sent[0]).unwrap();
    assert_eq!(authed_response.result, Some(json!({"greeting": "hi, alice"})));
}
