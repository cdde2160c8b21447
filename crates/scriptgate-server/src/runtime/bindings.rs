//! Script-visible globals
//!
//! Installs the API handler scripts program against:
//!
//! - `registerHandler(method, path, fn, contentType?)` / `unregisterHandler(method, path)`
//! - `console.log/info/warn/error/debug`
//! - `setTimeout(fn, ms, ...args)` / `clearTimeout(id)`
//! - `state.get/set/delete/clear/keys`
//!
//! and builds the per-invocation `response` object. Globals are plain
//! function pointers; the response methods are copy closures over their sink
//! id. The data both work on lives in the lane-local state
//! (see [`local`](super::local)).

use std::time::Duration;

use boa_engine::{
    js_string,
    native_function::NativeFunction,
    object::{JsObject, ObjectInitializer},
    property::Attribute,
    Context, JsError, JsNativeError, JsResult, JsValue,
};
use serde_json::Value;

use scriptgate_common::protocol::Result;

use crate::bridge::{ResponseBody, ResponseState};
use crate::registry::HandlerId;
use crate::runtime::conversions::{js_value_to_json, json_to_js_value};
use crate::runtime::lane::Job;
use crate::runtime::local::{with_lane, SinkId, Timer};
use crate::runtime::script_error;

fn lane_unavailable() -> JsError {
    JsNativeError::error()
        .with_message("scriptgate runtime is not available on this thread")
        .into()
}

fn string_arg(args: &[JsValue], index: usize, name: &str) -> JsResult<String> {
    match args.get(index) {
        Some(value) if value.is_string() => Ok(value
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default()),
        _ => Err(JsNativeError::typ()
            .with_message(format!("{} must be a string", name))
            .into()),
    }
}

fn callable_arg(args: &[JsValue], index: usize, name: &str) -> JsResult<JsObject> {
    args.get(index)
        .and_then(|value| value.as_object())
        .filter(|object| object.is_callable())
        .map(|object| object.clone())
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message(format!("{} must be a function", name))
                .into()
        })
}

/// Installs every global binding into `ctx`.
pub(crate) fn install(ctx: &mut Context) -> Result<()> {
    let globals: [(&str, usize, NativeFunction); 4] = [
        ("registerHandler", 3, NativeFunction::from_fn_ptr(register_handler)),
        ("unregisterHandler", 2, NativeFunction::from_fn_ptr(unregister_handler)),
        ("setTimeout", 2, NativeFunction::from_fn_ptr(set_timeout)),
        ("clearTimeout", 1, NativeFunction::from_fn_ptr(clear_timeout)),
    ];
    for (name, length, function) in globals {
        ctx.register_global_callable(js_string!(name), length, function)
            .map_err(|e| script_error(format!("failed to install {}: {}", name, e)))?;
    }

    let console = ObjectInitializer::new(ctx)
        .function(NativeFunction::from_fn_ptr(console_log), js_string!("log"), 0)
        .function(NativeFunction::from_fn_ptr(console_info), js_string!("info"), 0)
        .function(NativeFunction::from_fn_ptr(console_warn), js_string!("warn"), 0)
        .function(NativeFunction::from_fn_ptr(console_error), js_string!("error"), 0)
        .function(NativeFunction::from_fn_ptr(console_debug), js_string!("debug"), 0)
        .build();
    ctx.register_global_property(js_string!("console"), console, Attribute::all())
        .map_err(|e| script_error(format!("failed to install console: {}", e)))?;

    let state = ObjectInitializer::new(ctx)
        .function(NativeFunction::from_fn_ptr(state_get), js_string!("get"), 1)
        .function(NativeFunction::from_fn_ptr(state_set), js_string!("set"), 2)
        .function(NativeFunction::from_fn_ptr(state_delete), js_string!("delete"), 1)
        .function(NativeFunction::from_fn_ptr(state_clear), js_string!("clear"), 0)
        .function(NativeFunction::from_fn_ptr(state_keys), js_string!("keys"), 0)
        .build();
    ctx.register_global_property(js_string!("state"), state, Attribute::all())
        .map_err(|e| script_error(format!("failed to install state: {}", e)))?;

    Ok(())
}

// ============================================================================
// Handler registration
// ============================================================================

fn register_handler(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let method = string_arg(args, 0, "method")?;
    let path = string_arg(args, 1, "path")?;
    let callable = callable_arg(args, 2, "handler")?;
    let content_type = match args.get(3) {
        None => None,
        Some(value) if value.is_null_or_undefined() => None,
        Some(_) => Some(string_arg(args, 3, "contentType")?),
    };

    let id = HandlerId::next();
    let registered = with_lane(|lane| {
        lane.handlers.insert(id, callable);
        match lane.registry.register(&method, &path, id, content_type) {
            Ok(registration) => {
                if let Some(replaced) = &registration.replaced {
                    lane.handlers.remove(&replaced.handler);
                }
                Ok(registration)
            }
            Err(e) => {
                lane.handlers.remove(&id);
                Err(e)
            }
        }
    })
    .ok_or_else(lane_unavailable)?;

    let registration = match registered {
        Ok(registration) => registration,
        Err(e) => {
            tracing::warn!(%method, %path, "Rejected handler registration: {}", e);
            return Err(JsNativeError::error().with_message(e.to_string()).into());
        }
    };

    let descriptor = registration.descriptor;
    if registration.replaced.is_some() {
        tracing::info!(route = %descriptor.route_key(), "Replaced handler");
    } else {
        tracing::info!(route = %descriptor.route_key(), "Registered handler");
    }

    let result = ObjectInitializer::new(ctx)
        .property(js_string!("method"), js_string!(descriptor.method), Attribute::all())
        .property(js_string!("path"), js_string!(descriptor.pattern.to_string()), Attribute::all())
        .build();
    Ok(result.into())
}

fn unregister_handler(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let method = string_arg(args, 0, "method")?;
    let path = string_arg(args, 1, "path")?;

    let removed = with_lane(|lane| {
        let descriptor = lane.registry.delete(&method, &path)?;
        lane.handlers.remove(&descriptor.handler);
        Some(descriptor)
    })
    .ok_or_else(lane_unavailable)?;

    if let Some(descriptor) = &removed {
        tracing::info!(route = %descriptor.route_key(), "Unregistered handler");
    }
    Ok(JsValue::new(removed.is_some()))
}

// ============================================================================
// Console
// ============================================================================

fn console_line(args: &[JsValue], ctx: &mut Context) -> String {
    args.iter()
        .map(|value| {
            if let Some(s) = value.as_string() {
                return s.to_std_string_escaped();
            }
            if value.is_undefined() {
                return "undefined".to_string();
            }
            match js_value_to_json(value.clone(), ctx) {
                Ok(json) if !(json.is_null() && !value.is_null()) => json.to_string(),
                _ => value.display().to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn console_write(level: &str, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let line = console_line(args, ctx);
    tracing::debug!(target: "scriptgate::console", level, "{}", line);
    with_lane(|lane| lane.log(line));
    Ok(JsValue::undefined())
}

fn console_log(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    console_write("log", args, ctx)
}

fn console_info(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    console_write("info", args, ctx)
}

fn console_warn(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    console_write("warn", args, ctx)
}

fn console_error(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    console_write("error", args, ctx)
}

fn console_debug(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    console_write("debug", args, ctx)
}

// ============================================================================
// Timers
// ============================================================================

fn set_timeout(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let callback = callable_arg(args, 0, "callback")?;
    let delay_ms = match args.get(1) {
        Some(value) => value.to_number(ctx)?,
        None => 0.0,
    };
    let delay = if delay_ms.is_finite() && delay_ms > 0.0 {
        Duration::from_millis(delay_ms as u64)
    } else {
        Duration::ZERO
    };
    let extra: Vec<JsValue> = args.iter().skip(2).cloned().collect();

    let id = with_lane(|lane| {
        let id = lane.next_timer_id();
        let owner = lane.active;
        if let Some(handler) = owner
            .and_then(|sink| lane.sinks.get_mut(&sink))
            .and_then(|sink| sink.handler.as_mut())
        {
            handler.timers += 1;
        }

        let jobs = lane.jobs.clone();
        let task = lane.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(jobs) = jobs.upgrade() {
                if jobs.send(Job::Timer { id }).await.is_err() {
                    tracing::debug!(timer = id, "Lane stopped before timer fired");
                }
            }
        });

        lane.timers.insert(
            id,
            Timer {
                callback,
                args: extra,
                owner,
                abort: task.abort_handle(),
            },
        );
        id
    })
    .ok_or_else(lane_unavailable)?;

    Ok(JsValue::new(id as f64))
}

fn clear_timeout(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let Some(value) = args.get(0) else {
        return Ok(JsValue::undefined());
    };
    let id = value.to_number(ctx)?;
    if !id.is_finite() || id < 0.0 {
        return Ok(JsValue::undefined());
    }

    let cleared = with_lane(|lane| {
        let timer = lane.timers.remove(&(id as u64))?;
        timer.abort.abort();
        lane.timer_settled(timer.owner);
        Some(timer)
    })
    .ok_or_else(lane_unavailable)?;

    // Drop the callback outside the lane borrow
    drop(cleared);
    Ok(JsValue::undefined())
}

// ============================================================================
// Global state
// ============================================================================

fn state_get(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = string_arg(args, 0, "key")?;
    let value = with_lane(|lane| lane.state.get(&key)).ok_or_else(lane_unavailable)?;
    match value {
        Some(value) => json_to_js_value(value, ctx)
            .map_err(|e| JsNativeError::error().with_message(e.to_string()).into()),
        None => Ok(JsValue::undefined()),
    }
}

fn state_set(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = string_arg(args, 0, "key")?;
    let value = args.get(1).cloned().unwrap_or_default();
    let json = js_value_to_json(value, ctx)
        .map_err(|e| JsError::from(JsNativeError::typ().with_message(e.to_string())))?;
    with_lane(|lane| lane.state.set(&key, json)).ok_or_else(lane_unavailable)?;
    Ok(JsValue::undefined())
}

fn state_delete(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let key = string_arg(args, 0, "key")?;
    let existed = with_lane(|lane| lane.state.delete(&key)).ok_or_else(lane_unavailable)?;
    Ok(JsValue::new(existed))
}

fn state_clear(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    with_lane(|lane| lane.state.clear()).ok_or_else(lane_unavailable)?;
    Ok(JsValue::undefined())
}

fn state_keys(_this: &JsValue, _args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let keys = with_lane(|lane| lane.state.keys()).ok_or_else(lane_unavailable)?;
    let keys = Value::Array(keys.into_iter().map(Value::String).collect());
    json_to_js_value(keys, ctx).map_err(|e| JsNativeError::error().with_message(e.to_string()).into())
}

// ============================================================================
// Response object
// ============================================================================

/// Builds the `response` argument bound to `sink`.
///
/// The sink id is captured by each method rather than stored on the object,
/// so a script cannot point one handler's methods at another's response.
pub(crate) fn response_object(sink: SinkId, ctx: &mut Context) -> JsObject {
    ObjectInitializer::new(ctx)
        .function(
            NativeFunction::from_copy_closure(move |this, args, ctx| response_status(sink, this, args, ctx)),
            js_string!("status"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure(move |this, args, ctx| response_header(sink, this, args, ctx)),
            js_string!("header"),
            2,
        )
        .function(
            NativeFunction::from_copy_closure(move |this, args, ctx| response_json(sink, this, args, ctx)),
            js_string!("json"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure(move |this, args, ctx| response_text(sink, this, args, ctx)),
            js_string!("text"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure(move |this, args, ctx| response_html(sink, this, args, ctx)),
            js_string!("html"),
            1,
        )
        .function(
            NativeFunction::from_copy_closure(move |this, args, ctx| response_send(sink, this, args, ctx)),
            js_string!("send"),
            1,
        )
        .build()
}

/// Applies `f` to the sink's response. Sinks whose submitter is gone are ignored.
fn with_response(sink: SinkId, f: impl FnOnce(&mut ResponseState)) -> JsResult<()> {
    with_lane(|lane| {
        if let Some(sink) = lane.sinks.get_mut(&sink) {
            f(&mut sink.response);
        }
    })
    .ok_or_else(lane_unavailable)
}

fn response_status(sink: SinkId, this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let code = match args.get(0) {
        Some(value) => value.to_number(ctx)?,
        None => f64::NAN,
    };
    if code.fract() != 0.0 || !(100.0..=599.0).contains(&code) {
        return Err(JsNativeError::range()
            .with_message(format!("status code must be an integer in 100..=599, got {}", code))
            .into());
    }
    with_response(sink, |response| response.set_status(code as u16))?;
    Ok(this.clone())
}

fn response_header(sink: SinkId, this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "header name")?;
    let value = args
        .get(1)
        .cloned()
        .unwrap_or_default()
        .to_string(ctx)?
        .to_std_string_escaped();
    with_response(sink, |response| response.set_header(&name, &value))?;
    Ok(this.clone())
}

fn response_json(sink: SinkId, this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let value = args.get(0).cloned().unwrap_or_default();
    let json = js_value_to_json(value, ctx)
        .map_err(|e| JsError::from(JsNativeError::typ().with_message(e.to_string())))?;
    with_response(sink, |response| {
        response.write(ResponseBody::Json(json));
    })?;
    Ok(this.clone())
}

fn text_arg(args: &[JsValue], ctx: &mut Context) -> JsResult<String> {
    match args.get(0) {
        None => Ok(String::new()),
        Some(value) if value.is_null_or_undefined() => Ok(String::new()),
        Some(value) => Ok(value.to_string(ctx)?.to_std_string_escaped()),
    }
}

fn response_text(sink: SinkId, this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let text = text_arg(args, ctx)?;
    with_response(sink, |response| {
        response.write(ResponseBody::Text(text));
    })?;
    Ok(this.clone())
}

fn response_html(sink: SinkId, this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let html = text_arg(args, ctx)?;
    with_response(sink, |response| {
        response.write(ResponseBody::Html(html));
    })?;
    Ok(this.clone())
}

fn response_send(sink: SinkId, this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let value = args.get(0).cloned().unwrap_or_default();
    let json = js_value_to_json(value, ctx)
        .map_err(|e| JsError::from(JsNativeError::typ().with_message(e.to_string())))?;
    with_lane(|lane| {
        if let Some(sink) = lane.sinks.get_mut(&sink) {
            let declared = sink.handler.as_ref().and_then(|h| h.content_type.clone());
            sink.response.write_inferred(json, declared.as_deref());
        }
    })
    .ok_or_else(lane_unavailable)?;
    Ok(this.clone())
}
