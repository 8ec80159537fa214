//! `rpcmux-demo` — a small standalone binary that exercises the engine
//! end to end over a loopback channel: it registers the built-in
//! introspection handlers plus a toy `Echo` method, opens a loopback
//! channel, injects a request frame, and prints what comes back.
//!
//! Usage: `rpcmux-demo [local-id]`

use std::env;

use serde_json::json;
use tracing::info;

use rpcmux::channels::loopback::LoopbackChannel;
use rpcmux::config::Config;
use rpcmux::engine::CallOptions;
use rpcmux::{handlers, RpcEngine};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    rpcmux::logging::init_tracing();

    let args: Vec<String> = env::args().collect();
    let local_id = args.get(1).cloned().unwrap_or_else(|| "demo".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async_main(local_id))
}

async fn async_main(local_id: String) -> Result<(), Box<dyn std::error::Error>> {
    let engine = RpcEngine::new(Config::default());
    engine.add_local_id(&local_id);
    handlers::register_builtins(&engine);

    engine.add_handler(
        "Echo",
        Some("any".to_string()),
        Box::new(|handle, args| {
            handle.respond(args.unwrap_or(serde_json::Value::Null));
        }),
    );

    let channel = LoopbackChannel::new();
    engine.add_channel("peer", channel.clone());
    channel.open();

    info!(%local_id, "rpcmux demo engine ready");

    let mut request = rpcmux::Frame::new_request(1, "Echo");
    request.src = "peer".to_string();
    request.args = Some(json!({ "hello": "world" }));
    channel.inject(request.serialize());

    for bytes in channel.take_sent() {
        info!(response = %String::from_utf8_lossy(&bytes), "sent frame");
    }

    let ok = engine.call(
        "RPC.List",
        None,
        CallOptions {
            dst: "peer".into(),
            ..Default::default()
        },
        Some(Box::new(|resp| {
            info!(result = ?resp.result, "RPC.List response");
        })),
    );
    info!(dispatched = ok, "issued RPC.List call");
    channel.complete_send(true);
    for bytes in channel.take_sent() {
        // The peer side of this demo never talks back, so in a real
        // deployment this is where the transport would hand the bytes to
        // the wire; here we just show what would have gone out.
        info!(outgoing = %String::from_utf8_lossy(&bytes), "queued/sent frame");
    }

    Ok(())
}
