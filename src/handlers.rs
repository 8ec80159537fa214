//! Built-in introspection handlers (§4.7): `RPC.List`, `RPC.Describe`,
//! `RPC.Ping`. Registered like any other handler — a host is free to
//! shadow or skip them.

use serde_json::{json, Value};

use crate::engine::RpcEngine;

pub fn register_builtins(engine: &RpcEngine) {
    let list_engine = engine.clone();
    engine.add_handler("RPC.List", None, Box::new(move |handle, _args| {
        let methods = list_engine.list_methods();
        handle.respond(json!(methods));
    }));

    let describe_engine = engine.clone();
    engine.add_handler(
        "RPC.Describe",
        Some("{\"name\": string}".to_string()),
        Box::new(move |handle, args| {
            let name = args
                .as_ref()
                .and_then(|v| v.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let Some(name) = name else {
                handle.respond_error(400, "RPC.Describe requires a \"name\" argument");
                return;
            };
            match describe_engine.describe_method(&name) {
                Some(args_fmt) => handle.respond(json!({ "name": name, "args_fmt": args_fmt })),
                None => handle.respond_error(404, format!("No handler for {name}")),
            }
        }),
    );

    let ping_engine = engine.clone();
    engine.add_handler("RPC.Ping", None, Box::new(move |handle, _args| {
        let info = handle.channel_id().and_then(|id| ping_engine.channel_info(id));
        handle.respond(json!({ "channel_info": info }));
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn list_includes_the_builtins_themselves() {
        let engine = RpcEngine::new(Config::default());
        register_builtins(&engine);
        let methods = engine.list_methods();
        assert!(methods.contains(&"RPC.List".to_string()));
        assert!(methods.contains(&"RPC.Describe".to_string()));
        assert!(methods.contains(&"RPC.Ping".to_string()));
    }

    #[test]
    fn describe_reports_args_fmt_for_known_method() {
        let engine = RpcEngine::new(Config::default());
        register_builtins(&engine);
        assert_eq!(
            engine.describe_method("RPC.Describe"),
            Some(Some("{\"name\": string}".to_string()))
        );
        assert_eq!(engine.describe_method("Nonexistent.Method"), None);
    }
}
