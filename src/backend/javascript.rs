//! In-process JavaScript sandbox backed by the Boa engine.
//!
//! A [`JsSandbox`] owns an engine context with a host `console` whose four
//! methods forward to the process log. While [`JsSandbox::run`] executes user
//! code those methods are swapped for recorders by a [`ConsoleCapture`]
//! guard; the guard puts the host methods back when it is dropped, on every
//! exit path.
//!
//! The host `console` is the only shared mutable state the sandbox exposes,
//! and only `ConsoleCapture` touches it.
//!
//! `JSON.stringify` recurses on the native stack, so the sandbox replaces it
//! with a version that rejects values nested deeper than [`MAX_JSON_DEPTH`].
//! Console formatting goes through the same bound.

use boa_engine::{
    js_string,
    object::{FunctionObjectBuilder, ObjectInitializer},
    property::Attribute,
    Context, JsArgs, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Gc, GcRefCell};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::ExecutionResult;

/// Deepest object nesting `JSON.stringify` will serialize.
pub const MAX_JSON_DEPTH: usize = 256;

/// Native stack for the thread a [`run`] executes on.
const SANDBOX_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Engine resource limits applied to every sandbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct JavaScriptLimits {
    /// Maximum iterations of any single loop.
    #[serde(default)]
    pub loop_iteration_limit: Option<u64>,

    /// Maximum call depth.
    #[serde(default)]
    pub recursion_limit: Option<usize>,
}

impl JavaScriptLimits {
    fn apply(&self, context: &mut Context) {
        let limits = context.runtime_limits_mut();
        if let Some(max) = self.loop_iteration_limit {
            limits.set_loop_iteration_limit(max);
        }
        if let Some(max) = self.recursion_limit {
            limits.set_recursion_limit(max);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Log,
    Error,
    Warn,
    Info,
}

impl Channel {
    const ALL: [Self; 4] = [Self::Log, Self::Error, Self::Warn, Self::Info];

    const fn name(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
        }
    }

    const fn tag(self) -> &'static str {
        match self {
            Self::Log => "",
            Self::Error => "[error] ",
            Self::Warn => "[warn]  ",
            Self::Info => "[info]  ",
        }
    }
}

/// Run `source` in a fresh sandbox on a dedicated thread.
///
/// The engine recurses natively for some built-ins, so the sandbox gets a
/// larger stack than the caller's thread is likely to have.
pub fn run(source: &str, limits: &JavaScriptLimits) -> ExecutionResult {
    std::thread::scope(|scope| {
        let spawned = std::thread::Builder::new()
            .name("js-sandbox".into())
            .stack_size(SANDBOX_STACK_SIZE)
            .spawn_scoped(scope, || run_in_place(source, limits));

        match spawned {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                error!("JavaScript sandbox thread panicked");
                ExecutionResult::error("Sandbox crashed")
            }),
            Err(err) => {
                error!(error = %err, "Failed to spawn JavaScript sandbox thread");
                ExecutionResult::error(format!("Sandbox setup failed: {err}"))
            }
        }
    })
}

fn run_in_place(source: &str, limits: &JavaScriptLimits) -> ExecutionResult {
    match JsSandbox::new(limits) {
        Ok(mut sandbox) => sandbox.run(source),
        Err(err) => {
            error!(error = %err, "Failed to set up JavaScript sandbox");
            ExecutionResult::error(format!("Sandbox setup failed: {err}"))
        }
    }
}

/// A JavaScript engine context with a host console.
///
/// Globals written by user code persist between runs on the same sandbox;
/// locals do not, since each run is its own function body.
///
/// If user code makes the host console unwritable (for example with
/// `Object.freeze(console)`), the next run installs a fresh host console.
/// A global `console` binding made non-writable cannot be recovered, and
/// later runs report `Sandbox setup failed`.
///
/// `JsSandbox::run` executes on the calling thread; use [`run`] for the
/// large-stack variant.
pub struct JsSandbox {
    context: Context,
    console: JsObject,
}

impl JsSandbox {
    /// Create a sandbox with the given engine limits.
    pub fn new(limits: &JavaScriptLimits) -> JsResult<Self> {
        let mut context = Context::default();
        limits.apply(&mut context);
        install_json_guard(&mut context)?;

        let console = host_console(&mut context);
        context.register_global_property(
            js_string!("console"),
            console.clone(),
            Attribute::WRITABLE | Attribute::CONFIGURABLE,
        )?;
        Ok(Self { context, console })
    }

    /// Execute `source` as the body of an argument-less function.
    ///
    /// Console output is captured in emission order. An uncaught fault is
    /// appended as the last line and marks the result as an error.
    pub fn run(&mut self, source: &str) -> ExecutionResult {
        debug!(code_len = source.len(), "Running JavaScript in sandbox");

        let mut capture = match ConsoleCapture::install(&mut self.context, &mut self.console) {
            Ok(capture) => capture,
            Err(err) => {
                error!(error = %err, "Failed to intercept console");
                return ExecutionResult::error(format!("Sandbox setup failed: {err}"));
            }
        };

        let result = match invoke_as_function(capture.context(), source) {
            Ok(_) => ExecutionResult::success(capture.take_log().join("\n")),
            Err(err) => {
                let fault = fault_text(&err, capture.context());
                let mut lines = capture.take_log();
                lines.push(fault);
                ExecutionResult::error(lines.join("\n"))
            }
        };
        drop(capture);

        debug!(is_error = result.is_error, "JavaScript run completed");
        result
    }
}

/// Scoped replacement of the host console methods with recorders.
struct ConsoleCapture<'a> {
    context: &'a mut Context,
    console: &'a mut JsObject,
    originals: Vec<(Channel, JsValue)>,
    log: Gc<GcRefCell<Vec<String>>>,
}

impl<'a> ConsoleCapture<'a> {
    fn install(context: &'a mut Context, console: &'a mut JsObject) -> JsResult<Self> {
        // Build the guard first so a failure halfway through still restores.
        let mut capture = Self {
            context,
            console,
            originals: Vec::with_capacity(Channel::ALL.len()),
            log: Gc::new(GcRefCell::new(Vec::new())),
        };

        if let Err(err) = capture.swap_in_recorders() {
            warn!(error = %err, "Host console is not writable, rebuilding it");
            capture.restore_methods();
            *capture.console = host_console(capture.context);
            capture.swap_in_recorders()?;
        }

        Ok(capture)
    }

    fn swap_in_recorders(&mut self) -> JsResult<()> {
        let global = self.context.global_object();
        global.set(
            js_string!("console"),
            self.console.clone(),
            true,
            self.context,
        )?;

        for channel in Channel::ALL {
            let key = JsString::from(channel.name());
            let original = self.console.get(key.clone(), self.context)?;
            self.originals.push((channel, original));

            let tag = channel.tag();
            let recorder = NativeFunction::from_copy_closure_with_captures(
                move |_this, args, log, ctx| {
                    let line = format_line(args, ctx)?;
                    log.borrow_mut().push(format!("{tag}{line}"));
                    Ok(JsValue::undefined())
                },
                self.log.clone(),
            )
            .to_js_function(self.context.realm());

            self.console.set(key, recorder, true, self.context)?;
        }

        Ok(())
    }

    fn restore_methods(&mut self) {
        for (channel, original) in self.originals.drain(..).rev() {
            let key = JsString::from(channel.name());
            if let Err(err) = self.console.set(key, original, true, self.context) {
                warn!(channel = channel.name(), error = %err, "Failed to restore console method");
            }
        }
    }

    fn context(&mut self) -> &mut Context {
        self.context
    }

    fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.borrow_mut())
    }
}

impl Drop for ConsoleCapture<'_> {
    fn drop(&mut self) {
        self.restore_methods();

        // User code may have rebound the global itself.
        let global = self.context.global_object();
        if let Err(err) = global.set(
            js_string!("console"),
            self.console.clone(),
            true,
            self.context,
        ) {
            warn!(error = %err, "Failed to restore global console");
        }
    }
}

fn host_console(context: &mut Context) -> JsObject {
    ObjectInitializer::new(context)
        .function(NativeFunction::from_fn_ptr(host_log), js_string!("log"), 0)
        .function(NativeFunction::from_fn_ptr(host_error), js_string!("error"), 0)
        .function(NativeFunction::from_fn_ptr(host_warn), js_string!("warn"), 0)
        .function(NativeFunction::from_fn_ptr(host_info), js_string!("info"), 0)
        .build()
}

/// Replace `JSON.stringify` with a depth-bounded wrapper around the builtin.
///
/// Function replacers are chained behind the bound. Array replacers select
/// keys differently, so those calls go to the builtin unchanged.
fn install_json_guard(context: &mut Context) -> JsResult<()> {
    let json = context.global_object().get(js_string!("JSON"), context)?;
    let Some(json) = json.as_object().cloned() else {
        return Ok(());
    };
    let Some(builtin) = json
        .get(js_string!("stringify"), context)?
        .as_callable()
        .cloned()
    else {
        return Ok(());
    };

    let guarded = NativeFunction::from_copy_closure_with_captures(
        |_this, args, builtin, ctx| {
            let replacer = args.get_or_undefined(1);
            let replacer = if replacer.as_object().is_some_and(JsObject::is_array) {
                replacer.clone()
            } else {
                depth_guard(replacer.as_callable().cloned(), ctx)
            };
            builtin.call(
                &JsValue::undefined(),
                &[args.get_or_undefined(0).clone(), replacer, args.get_or_undefined(2).clone()],
                ctx,
            )
        },
        builtin,
    );
    let guarded = FunctionObjectBuilder::new(context.realm(), guarded)
        .name(js_string!("stringify"))
        .length(3)
        .build();

    json.set(js_string!("stringify"), guarded, true, context)?;
    Ok(())
}

/// A `JSON.stringify` replacer that throws a `RangeError` past
/// [`MAX_JSON_DEPTH`], then hands off to `inner` if there is one.
///
/// The serializer walks depth first and calls the replacer with the holder as
/// `this`, so popping the path back to the holder leaves exactly the current
/// ancestors.
fn depth_guard(inner: Option<JsObject>, context: &mut Context) -> JsValue {
    let guard = NativeFunction::from_copy_closure_with_captures(
        |this, args, captures, ctx| {
            let (path, inner) = captures;
            let value = match inner {
                Some(inner) => inner.call(this, args, ctx)?,
                None => args.get_or_undefined(1).clone(),
            };

            if let (Some(holder), Some(object)) = (this.as_object(), value.as_object()) {
                let mut path = path.borrow_mut();
                while path.last().is_some_and(|top| !JsObject::equals(top, holder)) {
                    path.pop();
                }
                if path.len() >= MAX_JSON_DEPTH {
                    return Err(JsNativeError::range()
                        .with_message(format!(
                            "JSON nesting exceeds the maximum depth of {MAX_JSON_DEPTH}"
                        ))
                        .into());
                }
                path.push(object.clone());
            }

            Ok(value)
        },
        (GcRefCell::new(Vec::<JsObject>::new()), inner),
    );

    guard.to_js_function(context.realm()).into()
}

fn host_log(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let line = format_line(args, ctx)?;
    info!(target: "js_console", "{line}");
    Ok(JsValue::undefined())
}

fn host_error(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let line = format_line(args, ctx)?;
    error!(target: "js_console", "{line}");
    Ok(JsValue::undefined())
}

fn host_warn(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let line = format_line(args, ctx)?;
    warn!(target: "js_console", "{line}");
    Ok(JsValue::undefined())
}

fn host_info(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let line = format_line(args, ctx)?;
    info!(target: "js_console", "{line}");
    Ok(JsValue::undefined())
}

/// `new Function(source)()`, using the intrinsic constructor.
fn invoke_as_function(context: &mut Context, source: &str) -> JsResult<JsValue> {
    let constructor = context.intrinsics().constructors().function().constructor();
    let function = constructor.construct(&[JsString::from(source).into()], None, context)?;
    function.call(&JsValue::undefined(), &[], context)
}

fn format_line(args: &[JsValue], context: &mut Context) -> JsResult<String> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(format_value(arg, context)?);
    }
    Ok(parts.join(" "))
}

fn format_value(value: &JsValue, context: &mut Context) -> JsResult<String> {
    if let Some(symbol) = value.as_symbol() {
        return Ok(symbol.descriptive_string().to_std_string_escaped());
    }
    if value.is_object() && !value.is_callable() {
        return stringify_pretty(value, context);
    }
    Ok(value.to_string(context)?.to_std_string_escaped())
}

/// `JSON.stringify(value, null, 2)`, resolved from the global at call time and
/// bounded by [`MAX_JSON_DEPTH`].
fn stringify_pretty(value: &JsValue, context: &mut Context) -> JsResult<String> {
    let global = context.global_object();
    let json = global.get(js_string!("JSON"), context)?;
    let stringify = json
        .as_object()
        .map(|json| json.get(js_string!("stringify"), context))
        .transpose()?
        .and_then(|f| f.as_callable().cloned())
        .ok_or_else(|| JsNativeError::typ().with_message("JSON.stringify is not callable"))?;

    let text = stringify.call(
        &JsValue::undefined(),
        &[value.clone(), depth_guard(None, context), JsValue::from(2)],
        context,
    )?;
    Ok(text.to_string(context)?.to_std_string_escaped())
}

fn fault_text(err: &JsError, context: &mut Context) -> String {
    match err.as_opaque() {
        Some(thrown) => thrown
            .to_string(context)
            .map_or_else(|_| err.to_string(), |s| s.to_std_string_escaped()),
        None => err.to_string(),
    }
}
