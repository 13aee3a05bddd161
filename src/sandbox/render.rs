//! Interpreter that renders a lowered module to escaped HTML for its initial state.
//!
//! The renderer is a fixed, statically compiled evaluator. The only names a module
//! can reach are its own bindings, the capability scope and a handful of pure
//! builtins (`Math`, `String`, `Number`, `Array`, `Object`, `JSON`).

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use super::datefmt;
use super::ir::{
    Attr, AttrValue, BinaryOp, Binding, Block, Body, Child, Element, Expr, Lambda, LogicalOp,
    ModuleIr, Param, TemplatePart, UnaryOp,
};
use super::lower::number_value;
use super::scope::{CapabilityScope, TagTarget, is_host_tag};
use crate::errors::SandboxError;

type RResult<T> = Result<T, SandboxError>;

/// Elements that never reach output.
pub const FORBIDDEN_TAGS: &[&str] = &[
    "script", "iframe", "object", "embed", "style", "link", "meta", "base", "form", "frame",
    "frameset", "applet", "portal",
];

const HOST_TAGS: &[&str] = &[
    "a", "abbr", "article", "aside", "b", "blockquote", "br", "button", "caption", "code", "col",
    "colgroup", "dd", "del", "details", "div", "dl", "dt", "em", "fieldset", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "i", "img", "input",
    "ins", "kbd", "label", "legend", "li", "main", "mark", "meter", "nav", "ol", "optgroup",
    "option", "output", "p", "pre", "progress", "q", "s", "section", "select", "small", "span",
    "strong", "sub", "summary", "sup", "table", "tbody", "td", "textarea", "tfoot", "th",
    "thead", "time", "tr", "u", "ul", "var", "wbr",
    // svg
    "svg", "g", "path", "circle", "ellipse", "line", "polyline", "polygon", "rect", "text",
    "tspan", "defs", "linearGradient", "radialGradient", "stop", "clipPath", "mask", "pattern",
    "marker", "title", "desc",
];

const VOID_TAGS: &[&str] = &["br", "col", "hr", "img", "input", "wbr"];

const DROPPED_ATTRS: &[&str] = &[
    "key",
    "ref",
    "href",
    "src",
    "srcSet",
    "srcset",
    "action",
    "formAction",
    "formaction",
    "xlinkHref",
    "xlink:href",
    "poster",
    "background",
    "ping",
    "dangerouslySetInnerHTML",
];

const RENAMED_ATTRS: &[(&str, &str)] = &[
    ("className", "class"),
    ("htmlFor", "for"),
    ("tabIndex", "tabindex"),
    ("readOnly", "readonly"),
    ("maxLength", "maxlength"),
    ("minLength", "minlength"),
    ("colSpan", "colspan"),
    ("rowSpan", "rowspan"),
    ("autoFocus", "autofocus"),
    ("autoComplete", "autocomplete"),
    ("defaultValue", "value"),
    ("defaultChecked", "checked"),
    ("strokeWidth", "stroke-width"),
    ("strokeLinecap", "stroke-linecap"),
    ("strokeLinejoin", "stroke-linejoin"),
    ("strokeDasharray", "stroke-dasharray"),
    ("strokeDashoffset", "stroke-dashoffset"),
    ("strokeOpacity", "stroke-opacity"),
    ("fillOpacity", "fill-opacity"),
    ("fillRule", "fill-rule"),
    ("clipRule", "clip-rule"),
    ("textAnchor", "text-anchor"),
    ("dominantBaseline", "dominant-baseline"),
    ("stopColor", "stop-color"),
    ("stopOpacity", "stop-opacity"),
    ("fontSize", "font-size"),
    ("fontWeight", "font-weight"),
    ("fontFamily", "font-family"),
];

const CSS_FUNCTIONS: &[&str] = &[
    "rgb",
    "rgba",
    "hsl",
    "hsla",
    "calc",
    "var",
    "min",
    "max",
    "clamp",
    "cubic-bezier",
    "linear-gradient",
    "radial-gradient",
    "translate",
    "translatex",
    "translatey",
    "rotate",
    "scale",
];

const UNITLESS_CSS: &[&str] = &[
    "opacity",
    "z-index",
    "font-weight",
    "line-height",
    "flex",
    "flex-grow",
    "flex-shrink",
    "order",
    "zoom",
    "scale",
];

// ── values ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Val {
    Data(Value),
    /// Already-rendered markup.
    Html(String),
    Func(Rc<Callable>),
    Record(Rc<BTreeMap<String, Val>>),
    List(Rc<Vec<Val>>),
}

#[derive(Debug)]
pub enum Callable {
    Lambda { lambda: Arc<Lambda>, env: Env },
    Method { recv: Val, name: String },
    /// A builtin reached by path, e.g. `Math.round` or `hook:useMemo`.
    Builtin(String),
}

impl Val {
    fn null() -> Self {
        Val::Data(Value::Null)
    }

    fn str(s: impl Into<String>) -> Self {
        Val::Data(Value::String(s.into()))
    }

    fn num(n: f64) -> Self {
        Val::Data(number_value(n))
    }

    fn bool(b: bool) -> Self {
        Val::Data(Value::Bool(b))
    }

    fn builtin(path: impl Into<String>) -> Self {
        Val::Func(Rc::new(Callable::Builtin(path.into())))
    }

    /// A list of plain data collapses back to a data array.
    fn list(items: Vec<Val>) -> Self {
        if items.iter().all(|v| matches!(v, Val::Data(_))) {
            Val::Data(Value::Array(
                items
                    .into_iter()
                    .map(|v| match v {
                        Val::Data(d) => d,
                        _ => Value::Null,
                    })
                    .collect(),
            ))
        } else {
            Val::List(Rc::new(items))
        }
    }

    fn record(fields: BTreeMap<String, Val>) -> Self {
        if fields.values().all(|v| matches!(v, Val::Data(_))) {
            let map: Map<String, Value> = fields
                .into_iter()
                .map(|(k, v)| match v {
                    Val::Data(d) => (k, d),
                    _ => (k, Value::Null),
                })
                .collect();
            Val::Data(Value::Object(map))
        } else {
            Val::Record(Rc::new(fields))
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, Val::Data(Value::Null))
    }

    fn truthy(&self) -> bool {
        match self {
            Val::Data(v) => truthy(v),
            _ => true,
        }
    }

    fn items(&self) -> Option<Vec<Val>> {
        match self {
            Val::Data(Value::Array(items)) => Some(items.iter().cloned().map(Val::Data).collect()),
            Val::List(items) => Some(items.as_ref().clone()),
            _ => None,
        }
    }

    fn as_data(&self) -> Value {
        match self {
            Val::Data(v) => v.clone(),
            Val::List(items) => Value::Array(items.iter().map(Val::as_data).collect()),
            Val::Record(fields) => Value::Object(
                fields
                    .iter()
                    .filter(|(_, v)| !matches!(v, Val::Func(_) | Val::Html(_)))
                    .map(|(k, v)| (k.clone(), v.as_data()))
                    .collect(),
            ),
            Val::Html(_) | Val::Func(_) => Value::Null,
        }
    }

    fn to_js_string(&self) -> String {
        match self {
            Val::Data(v) => js_string(v),
            Val::Html(html) => html.clone(),
            Val::Func(_) => String::new(),
            Val::List(items) => items
                .iter()
                .map(Val::to_js_string)
                .collect::<Vec<_>>()
                .join(","),
            Val::Record(_) => "[object Object]".to_string(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Val::Data(v) => js_number(v),
            _ => f64::NAN,
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn format_number(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

fn js_string(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(js_string).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn js_number(v: &Value) -> f64 {
    match v {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                0.0
            } else {
                t.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

fn strict_eq(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::Data(Value::Number(x)), Val::Data(Value::Number(y))) => x.as_f64() == y.as_f64(),
        (Val::Data(x @ (Value::Null | Value::Bool(_) | Value::String(_))), Val::Data(y)) => x == y,
        (Val::Func(x), Val::Func(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn loose_eq(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::Data(Value::Null), Val::Data(Value::Null)) => true,
        (Val::Data(Value::Null), _) | (_, Val::Data(Value::Null)) => false,
        (Val::Data(x), Val::Data(y)) if std::mem::discriminant(x) != std::mem::discriminant(y) => {
            let (x, y) = (js_number(x), js_number(y));
            x == y
        }
        _ => strict_eq(a, b),
    }
}

/// Escape text for element content and quoted attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => escape_html(s),
        Value::Number(_) => js_string(v),
        Value::Array(items) => items.iter().map(text_of).collect(),
        Value::Null | Value::Bool(_) | Value::Object(_) => String::new(),
    }
}

/// Markup for a value placed in child position.
fn render_child(val: &Val) -> String {
    match val {
        Val::Data(v) => text_of(v),
        Val::Html(html) => html.clone(),
        Val::List(items) => items.iter().map(render_child).collect(),
        Val::Func(_) | Val::Record(_) => String::new(),
    }
}

// ── environment ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Env(Option<Rc<Frame>>);

#[derive(Debug)]
pub struct Frame {
    name: String,
    value: Val,
    parent: Env,
}

impl Env {
    fn bind(&self, name: impl Into<String>, value: Val) -> Env {
        Env(Some(Rc::new(Frame {
            name: name.into(),
            value,
            parent: self.clone(),
        })))
    }

    fn lookup(&self, name: &str) -> Option<Val> {
        let mut cursor = self.0.as_ref();
        while let Some(frame) = cursor {
            if frame.name == name {
                return Some(frame.value.clone());
            }
            cursor = frame.parent.0.as_ref();
        }
        None
    }
}

// ── renderer ─────────────────────────────────────────────────────────────

pub struct Renderer<'m> {
    module: &'m ModuleIr,
    scope: &'m CapabilityScope,
    max_depth: usize,
    depth: usize,
    globals: Env,
}

impl<'m> Renderer<'m> {
    pub fn new(module: &'m ModuleIr, scope: &'m CapabilityScope, max_depth: usize) -> Self {
        Self {
            module,
            scope,
            max_depth,
            depth: 0,
            globals: Env::default(),
        }
    }

    /// Render the named module component with no props.
    pub fn render_entry(&mut self, entry: &str) -> RResult<String> {
        self.globals = self.eval_globals()?;
        let globals = self.globals.clone();
        let props = Val::record(BTreeMap::new());
        let html = self.call_component(entry, props, &globals)?;
        Ok(render_child(&html))
    }

    /// Module-level constants, evaluated once per render in declaration order.
    fn eval_globals(&mut self) -> RResult<Env> {
        let mut env = Env::default();
        for binding in &self.module.globals {
            env = self.bind_binding(binding, env)?;
        }
        Ok(env)
    }

    fn enter(&mut self) -> RResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(SandboxError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn call_component(&mut self, name: &str, props: Val, globals: &Env) -> RResult<Val> {
        let component = self.module.components.get(name).cloned().ok_or_else(|| {
            SandboxError::UnboundComponent {
                name: name.to_string(),
            }
        })?;
        self.enter()?;
        let result = self.apply(&component.lambda, globals, vec![props]);
        self.leave();
        result
    }

    fn bind_binding(&mut self, binding: &Binding, env: Env) -> RResult<Env> {
        match binding {
            Binding::State { name, init } => {
                let value = match init {
                    Some(init) => match self.eval(init, &env)? {
                        Val::Func(f) => self.call(&f, Vec::new(), &env)?,
                        other => other,
                    },
                    None => Val::null(),
                };
                Ok(env.bind(name.clone(), value))
            }
            Binding::Local { name, init } => {
                let value = self.eval(init, &env)?;
                Ok(env.bind(name.clone(), value))
            }
        }
    }

    fn eval_block(&mut self, block: &Block, env: &Env) -> RResult<Val> {
        let mut env = env.clone();
        for binding in &block.bindings {
            env = self.bind_binding(binding, env)?;
        }
        match &block.ret {
            Some(ret) => self.eval(ret, &env),
            None => Ok(Val::null()),
        }
    }

    fn apply(&mut self, lambda: &Lambda, captured: &Env, args: Vec<Val>) -> RResult<Val> {
        let mut env = captured.clone();
        let mut args = args.into_iter();
        for param in &lambda.params {
            let arg = args.next().unwrap_or_else(Val::null);
            match param {
                Param::Name(name, default) => {
                    let value = match (arg.is_null(), default) {
                        (true, Some(default)) => self.eval(default, &env)?,
                        _ => arg,
                    };
                    env = env.bind(name.clone(), value);
                }
                Param::Object(fields) => {
                    for (key, local, default) in fields {
                        if local.is_empty() {
                            continue;
                        }
                        let value = if key == "..." {
                            arg.clone()
                        } else {
                            member(&arg, key)
                        };
                        let value = match (value.is_null(), default) {
                            (true, Some(default)) => self.eval(default, &env)?,
                            _ => value,
                        };
                        env = env.bind(local.clone(), value);
                    }
                }
                Param::Ignored => {}
            }
        }
        match &lambda.body {
            Body::Expr(expr) => self.eval(expr, &env),
            Body::Block(block) => self.eval_block(block, &env),
        }
    }

    fn lookup(&self, name: &str, env: &Env) -> Val {
        if let Some(value) = env.lookup(name) {
            return value;
        }
        if let Some(hook) = self.scope.hook(name) {
            return Val::builtin(format!("hook:{hook}"));
        }
        if self.scope.is_date_format(name) {
            return Val::builtin("format");
        }
        if self.scope.is_namespace(name, "react") {
            return Val::builtin("React");
        }
        if self.scope.is_namespace(name, "date-fns") {
            return Val::builtin("dateFns");
        }
        match name {
            "Math" | "String" | "Number" | "Boolean" | "Array" | "Object" | "JSON" | "Date" => {
                Val::builtin(name)
            }
            "Infinity" => Val::num(f64::INFINITY),
            "NaN" => Val::num(f64::NAN),
            _ => Val::null(),
        }
    }

    pub fn eval(&mut self, expr: &Expr, env: &Env) -> RResult<Val> {
        Ok(match expr {
            Expr::Literal(v) => Val::Data(v.clone()),
            Expr::Ident(name) => self.lookup(name, env),
            Expr::Opaque => Val::null(),
            Expr::Member(object, name) => {
                let object = self.eval(object, env)?;
                member(&object, name)
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                member(&object, &index.to_js_string())
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(callee, env)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a, env))
                    .collect::<RResult<Vec<_>>>()?;
                match callee {
                    Val::Func(f) => self.call(&f, args, env)?,
                    _ => Val::null(),
                }
            }
            Expr::New(class, args) => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a, env))
                    .collect::<RResult<Vec<_>>>()?;
                construct(class, &args)
            }
            Expr::Unary(op, operand) => {
                let v = self.eval(operand, env)?;
                match op {
                    UnaryOp::Not => Val::bool(!v.truthy()),
                    UnaryOp::Neg => Val::num(-v.to_number()),
                    UnaryOp::Plus => Val::num(v.to_number()),
                }
            }
            Expr::Binary(op, left, right) => {
                let l = self.eval(left, env)?;
                let r = self.eval(right, env)?;
                binary(*op, &l, &r)
            }
            Expr::Logical(op, left, right) => {
                let l = self.eval(left, env)?;
                let take_left = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Nullish => !l.is_null(),
                };
                if take_left { l } else { self.eval(right, env)? }
            }
            Expr::Conditional(test, then, otherwise) => {
                if self.eval(test, env)?.truthy() {
                    self.eval(then, env)?
                } else {
                    self.eval(otherwise, env)?
                }
            }
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(e) => out.push_str(&self.eval(e, env)?.to_js_string()),
                    }
                }
                Val::str(out)
            }
            Expr::Array(items) => {
                let items = items
                    .iter()
                    .map(|i| self.eval(i, env))
                    .collect::<RResult<Vec<_>>>()?;
                Val::list(items)
            }
            Expr::Object(entries) => {
                let mut fields = BTreeMap::new();
                for (key, value) in entries {
                    fields.insert(key.clone(), self.eval(value, env)?);
                }
                Val::record(fields)
            }
            Expr::Lambda(lambda) => Val::Func(Rc::new(Callable::Lambda {
                lambda: lambda.clone(),
                env: env.clone(),
            })),
            Expr::Element(element) => Val::Html(self.render_element(element, env)?),
            Expr::Fragment(children) => Val::Html(self.render_children(children, env)?),
        })
    }

    fn call(&mut self, f: &Callable, args: Vec<Val>, env: &Env) -> RResult<Val> {
        match f {
            Callable::Lambda { lambda, env: captured } => {
                self.enter()?;
                let result = self.apply(lambda, captured, args);
                self.leave();
                result
            }
            Callable::Method { recv, name } => self.call_method(recv, name, args, env),
            Callable::Builtin(path) => self.call_builtin(path, args, env),
        }
    }

    fn call_value(&mut self, f: &Val, args: Vec<Val>, env: &Env) -> RResult<Val> {
        match f {
            Val::Func(f) => self.call(f, args, env),
            _ => Ok(Val::null()),
        }
    }

    fn call_builtin(&mut self, path: &str, args: Vec<Val>, env: &Env) -> RResult<Val> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or_else(Val::null);
        let nums = || args.iter().map(Val::to_number).collect::<Vec<_>>();
        Ok(match path {
            "hook:useState" | "hook:useReducer" => {
                let init = if path == "hook:useState" { arg(0) } else { arg(1) };
                let init = match init {
                    Val::Func(f) if path == "hook:useState" => self.call(&f, Vec::new(), env)?,
                    other => other,
                };
                Val::list(vec![init, Val::null()])
            }
            "hook:useMemo" => self.call_value(&arg(0), Vec::new(), env)?,
            "hook:useCallback" => arg(0),
            "hook:useRef" => {
                let mut fields = BTreeMap::new();
                fields.insert("current".to_string(), arg(0));
                Val::record(fields)
            }
            "hook:useEffect" | "hook:useContext" => Val::null(),
            "format" | "dateFns.format" => {
                let date = arg(0).as_data();
                Val::str(datefmt::format_value(&date, &arg(1).to_js_string()))
            }
            "Math.round" => Val::num((arg(0).to_number() + 0.5).floor()),
            "Math.floor" => Val::num(arg(0).to_number().floor()),
            "Math.ceil" => Val::num(arg(0).to_number().ceil()),
            "Math.abs" => Val::num(arg(0).to_number().abs()),
            "Math.sqrt" => Val::num(arg(0).to_number().sqrt()),
            "Math.trunc" => Val::num(arg(0).to_number().trunc()),
            "Math.sign" => Val::num(arg(0).to_number().signum()),
            "Math.pow" => Val::num(arg(0).to_number().powf(arg(1).to_number())),
            "Math.min" => Val::num(nums().into_iter().fold(f64::INFINITY, f64::min)),
            "Math.max" => Val::num(nums().into_iter().fold(f64::NEG_INFINITY, f64::max)),
            "Math.sin" => Val::num(arg(0).to_number().sin()),
            "Math.cos" => Val::num(arg(0).to_number().cos()),
            "String" => Val::str(arg(0).to_js_string()),
            "Number" => Val::num(arg(0).to_number()),
            "Boolean" => Val::bool(arg(0).truthy()),
            "Array.isArray" => Val::bool(arg(0).items().is_some()),
            "Array.from" => {
                let source = arg(0);
                let items = match &source {
                    Val::Data(Value::String(s)) => s.chars().map(|c| Val::str(c)).collect(),
                    _ => source.items().unwrap_or_else(|| {
                        let len = member(&source, "length").to_number();
                        let len = if len.is_finite() && len > 0.0 {
                            (len as usize).min(10_000)
                        } else {
                            0
                        };
                        vec![Val::null(); len]
                    }),
                };
                match args.get(1) {
                    Some(f @ Val::Func(_)) => self.map_items(items, f, env)?,
                    _ => Val::list(items),
                }
            }
            "Object.keys" => Val::list(record_entries(&arg(0)).into_iter().map(|(k, _)| Val::str(k)).collect()),
            "Object.values" => Val::list(record_entries(&arg(0)).into_iter().map(|(_, v)| v).collect()),
            "Object.entries" => Val::list(
                record_entries(&arg(0))
                    .into_iter()
                    .map(|(k, v)| Val::list(vec![Val::str(k), v]))
                    .collect(),
            ),
            "JSON.stringify" => Val::str(arg(0).as_data().to_string()),
            "Number.isInteger" => {
                let n = arg(0);
                Val::bool(matches!(n, Val::Data(Value::Number(_))) && n.to_number().fract() == 0.0)
            }
            "Date.now" => Val::num(chrono::Utc::now().timestamp_millis() as f64),
            _ => Val::null(),
        })
    }

    fn map_items(&mut self, items: Vec<Val>, f: &Val, env: &Env) -> RResult<Val> {
        let all = Val::list(items.clone());
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            out.push(self.call_value(f, vec![item, Val::num(i as f64), all.clone()], env)?);
        }
        Ok(Val::list(out))
    }

    fn test_items(
        &mut self,
        items: &[Val],
        f: &Val,
        env: &Env,
    ) -> RResult<Vec<(usize, bool)>> {
        let all = Val::list(items.to_vec());
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let keep = self
                .call_value(f, vec![item.clone(), Val::num(i as f64), all.clone()], env)?
                .truthy();
            out.push((i, keep));
        }
        Ok(out)
    }

    fn call_method(&mut self, recv: &Val, name: &str, args: Vec<Val>, env: &Env) -> RResult<Val> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or_else(Val::null);

        if let Some(items) = recv.items() {
            return Ok(match name {
                "map" => self.map_items(items, &arg(0), env)?,
                "filter" => {
                    let tests = self.test_items(&items, &arg(0), env)?;
                    Val::list(
                        tests
                            .into_iter()
                            .filter(|(_, keep)| *keep)
                            .map(|(i, _)| items[i].clone())
                            .collect(),
                    )
                }
                "find" | "findIndex" | "some" | "every" => {
                    let tests = self.test_items(&items, &arg(0), env)?;
                    let hit = tests.iter().find(|(_, keep)| *keep).map(|(i, _)| *i);
                    match name {
                        "find" => hit.map(|i| items[i].clone()).unwrap_or_else(Val::null),
                        "findIndex" => Val::num(hit.map(|i| i as f64).unwrap_or(-1.0)),
                        "some" => Val::bool(hit.is_some()),
                        _ => Val::bool(tests.iter().all(|(_, keep)| *keep)),
                    }
                }
                "reduce" => {
                    let f = arg(0);
                    let mut iter = items.into_iter().enumerate();
                    let mut acc = match args.get(1) {
                        Some(init) => init.clone(),
                        None => iter.next().map(|(_, v)| v).unwrap_or_else(Val::null),
                    };
                    for (i, item) in iter {
                        acc = self.call_value(&f, vec![acc, item, Val::num(i as f64)], env)?;
                    }
                    acc
                }
                "join" => {
                    let sep = match arg(0) {
                        Val::Data(Value::Null) => ",".to_string(),
                        other => other.to_js_string(),
                    };
                    Val::str(
                        items
                            .iter()
                            .map(|v| if v.is_null() { String::new() } else { v.to_js_string() })
                            .collect::<Vec<_>>()
                            .join(&sep),
                    )
                }
                "slice" => {
                    let (start, end) = slice_bounds(items.len(), &arg(0), &arg(1));
                    Val::list(items[start..end].to_vec())
                }
                "includes" => Val::bool(items.iter().any(|v| strict_eq(v, &arg(0)))),
                "indexOf" => Val::num(
                    items
                        .iter()
                        .position(|v| strict_eq(v, &arg(0)))
                        .map(|i| i as f64)
                        .unwrap_or(-1.0),
                ),
                "concat" => {
                    let mut items = items;
                    for a in &args {
                        match a.items() {
                            Some(more) => items.extend(more),
                            None => items.push(a.clone()),
                        }
                    }
                    Val::list(items)
                }
                "reverse" => Val::list(items.into_iter().rev().collect()),
                "at" => {
                    let i = arg(0).to_number();
                    let i = if i < 0.0 { items.len() as f64 + i } else { i };
                    items.get(i as usize).cloned().unwrap_or_else(Val::null)
                }
                "toString" => Val::str(recv.to_js_string()),
                _ => Val::null(),
            });
        }

        Ok(match (recv, name) {
            (Val::Data(Value::String(s)), _) => string_method(s, name, &args),
            (Val::Data(Value::Number(n)), _) => {
                let n = n.as_f64().unwrap_or(f64::NAN);
                match name {
                    "toFixed" => {
                        let digits = arg(0).to_number();
                        let digits = if digits.is_finite() { digits.clamp(0.0, 20.0) as usize } else { 0 };
                        Val::str(format!("{n:.digits$}"))
                    }
                    "toString" | "toLocaleString" => Val::str(format_number(n)),
                    _ => Val::null(),
                }
            }
            _ => Val::null(),
        })
    }

    // ── markup ───────────────────────────────────────────────────────────

    fn render_children(&mut self, children: &[Child], env: &Env) -> RResult<String> {
        let mut out = String::new();
        for child in children {
            match child {
                Child::Text(text) => out.push_str(&escape_html(text)),
                Child::Expr(expr) => out.push_str(&render_child(&self.eval(expr, env)?)),
            }
        }
        Ok(out)
    }

    fn render_element(&mut self, element: &Element, env: &Env) -> RResult<String> {
        if is_host_tag(&element.tag) {
            return self.render_host(element, env);
        }
        match self.scope.resolve_tag(&element.tag, self.module)? {
            TagTarget::Fragment => self.render_children(&element.children, env),
            TagTarget::Component(name) => {
                let props = self.props(element, env)?;
                let globals = self.globals.clone();
                Ok(render_child(&self.call_component(&name, props, &globals)?))
            }
            TagTarget::InnerComponent(name) => {
                let props = self.props(element, env)?;
                match env.lookup(&name) {
                    Some(f @ Val::Func(_)) => {
                        self.enter()?;
                        let result = self.call_value(&f, vec![props], env);
                        self.leave();
                        Ok(render_child(&result?))
                    }
                    _ => Err(SandboxError::UnboundComponent { name }),
                }
            }
            TagTarget::Icon(name) => {
                let props = self.props(element, env)?;
                Ok(render_icon(&name, &props))
            }
            TagTarget::Chart(name) => {
                let props = self.props(element, env)?;
                let inner = self.render_children(&element.children, env)?;
                Ok(render_chart(&name, &props, &inner))
            }
        }
    }

    fn props(&mut self, element: &Element, env: &Env) -> RResult<Val> {
        let mut fields = BTreeMap::new();
        for Attr { name, value } in &element.attrs {
            let value = match value {
                AttrValue::Str(s) => Val::str(s.clone()),
                AttrValue::Flag => Val::bool(true),
                AttrValue::Expr(e) => self.eval(e, env)?,
            };
            fields.insert(name.clone(), value);
        }
        if !element.children.is_empty() {
            let children = self.render_children(&element.children, env)?;
            fields.insert("children".to_string(), Val::Html(children));
        }
        Ok(Val::Record(Rc::new(fields)))
    }

    fn render_host(&mut self, element: &Element, env: &Env) -> RResult<String> {
        let tag = element.tag.as_str();
        if FORBIDDEN_TAGS.contains(&tag.to_ascii_lowercase().as_str()) {
            return Err(SandboxError::ForbiddenElement {
                tag: tag.to_string(),
            });
        }
        let children = self.render_children(&element.children, env)?;
        if !HOST_TAGS.contains(&tag) {
            return Ok(children);
        }

        let mut out = format!("<{tag}");
        for attr in &element.attrs {
            let value = match &attr.value {
                AttrValue::Str(s) => Some(Val::str(s.clone())),
                AttrValue::Flag => Some(Val::bool(true)),
                AttrValue::Expr(e) => Some(self.eval(e, env)?),
            };
            if let Some(rendered) = value.and_then(|v| render_attr(&attr.name, &v)) {
                out.push_str(&rendered);
            }
        }
        if VOID_TAGS.contains(&tag) {
            out.push_str(" />");
            return Ok(out);
        }
        out.push('>');
        out.push_str(&children);
        out.push_str(&format!("</{tag}>"));
        Ok(out)
    }
}

/// Property access with JS semantics over data, records and lists.
fn member(object: &Val, key: &str) -> Val {
    match object {
        Val::Data(Value::Object(map)) => match map.get(key) {
            Some(v) => Val::Data(v.clone()),
            None => method(object, key),
        },
        Val::Data(Value::Array(items)) => match key {
            "length" => Val::num(items.len() as f64),
            _ => match key.parse::<usize>() {
                Ok(i) => items.get(i).cloned().map(Val::Data).unwrap_or_else(Val::null),
                Err(_) => method(object, key),
            },
        },
        Val::Data(Value::String(s)) => match key {
            "length" => Val::num(s.encode_utf16().count() as f64),
            _ => match key.parse::<usize>() {
                Ok(i) => s.chars().nth(i).map(|c| Val::str(c)).unwrap_or_else(Val::null),
                Err(_) => method(object, key),
            },
        },
        Val::Data(Value::Number(_)) => method(object, key),
        Val::Record(fields) => fields.get(key).cloned().unwrap_or_else(Val::null),
        Val::List(items) => match key {
            "length" => Val::num(items.len() as f64),
            _ => match key.parse::<usize>() {
                Ok(i) => items.get(i).cloned().unwrap_or_else(Val::null),
                Err(_) => method(object, key),
            },
        },
        Val::Func(f) => match f.as_ref() {
            Callable::Builtin(path) => match (path.as_str(), key) {
                ("Math", "PI") => Val::num(std::f64::consts::PI),
                ("Math", "E") => Val::num(std::f64::consts::E),
                ("React", hook) if crate::validator::PRIMITIVES.contains(&hook) => {
                    Val::builtin(format!("hook:{hook}"))
                }
                _ => Val::builtin(format!("{path}.{key}")),
            },
            _ => Val::null(),
        },
        Val::Data(Value::Null | Value::Bool(_)) | Val::Html(_) => Val::null(),
    }
}

fn method(recv: &Val, name: &str) -> Val {
    Val::Func(Rc::new(Callable::Method {
        recv: recv.clone(),
        name: name.to_string(),
    }))
}

fn record_entries(val: &Val) -> Vec<(String, Val)> {
    match val {
        Val::Data(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), Val::Data(v.clone())))
            .collect(),
        Val::Record(fields) => fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Val::Data(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), Val::Data(v.clone())))
            .collect(),
        _ => Vec::new(),
    }
}

fn slice_bounds(len: usize, start: &Val, end: &Val) -> (usize, usize) {
    let resolve = |v: &Val, default: usize| -> usize {
        if v.is_null() {
            return default;
        }
        let n = v.to_number();
        if n.is_nan() {
            return 0;
        }
        let n = if n < 0.0 { len as f64 + n } else { n };
        n.clamp(0.0, len as f64) as usize
    };
    let start = resolve(start, 0);
    let end = resolve(end, len).max(start);
    (start, end)
}

fn string_method(s: &str, name: &str, args: &[Val]) -> Val {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_else(Val::null);
    let chars: Vec<char> = s.chars().collect();
    match name {
        "toUpperCase" => Val::str(s.to_uppercase()),
        "toLowerCase" => Val::str(s.to_lowercase()),
        "trim" => Val::str(s.trim()),
        "toString" => Val::str(s),
        "includes" => Val::bool(s.contains(&arg(0).to_js_string())),
        "startsWith" => Val::bool(s.starts_with(&arg(0).to_js_string())),
        "endsWith" => Val::bool(s.ends_with(&arg(0).to_js_string())),
        "indexOf" => {
            let needle = arg(0).to_js_string();
            Val::num(
                s.find(&needle)
                    .map(|b| s[..b].chars().count() as f64)
                    .unwrap_or(-1.0),
            )
        }
        "split" => {
            let sep = arg(0);
            if sep.is_null() {
                return Val::list(vec![Val::str(s)]);
            }
            let sep = sep.to_js_string();
            if sep.is_empty() {
                Val::list(chars.iter().map(|c| Val::str(*c)).collect())
            } else {
                Val::list(s.split(sep.as_str()).map(Val::str).collect())
            }
        }
        "slice" | "substring" => {
            let (start, end) = slice_bounds(chars.len(), &arg(0), &arg(1));
            Val::str(chars[start..end].iter().collect::<String>())
        }
        "charAt" => {
            let i = arg(0).to_number();
            let i = if i.is_finite() && i >= 0.0 { i as usize } else { 0 };
            Val::str(chars.get(i).map(|c| c.to_string()).unwrap_or_default())
        }
        "repeat" => {
            let n = arg(0).to_number();
            let n = if n.is_finite() && n > 0.0 { (n as usize).min(1_000) } else { 0 };
            Val::str(s.repeat(n))
        }
        "replace" => Val::str(s.replacen(&arg(0).to_js_string(), &arg(1).to_js_string(), 1)),
        "replaceAll" => Val::str(s.replace(&arg(0).to_js_string(), &arg(1).to_js_string())),
        "padStart" | "padEnd" => {
            let width = arg(0).to_number();
            let width = if width.is_finite() && width > 0.0 { (width as usize).min(1_000) } else { 0 };
            let fill = match arg(1) {
                Val::Data(Value::Null) => " ".to_string(),
                other => other.to_js_string(),
            };
            let missing = width.saturating_sub(chars.len());
            let pad: String = fill.chars().cycle().take(if fill.is_empty() { 0 } else { missing }).collect();
            if name == "padStart" {
                Val::str(format!("{pad}{s}"))
            } else {
                Val::str(format!("{s}{pad}"))
            }
        }
        "getFullYear" | "getMonth" | "getDate" | "getDay" | "getHours" | "getMinutes"
        | "toLocaleDateString" | "toISOString" | "toDateString" => date_method(s, name),
        _ => Val::null(),
    }
}

fn date_method(s: &str, name: &str) -> Val {
    use chrono::{Datelike, Timelike};
    let Some(dt) = datefmt::parse_date(&Value::String(s.to_string())) else {
        return Val::null();
    };
    match name {
        "getFullYear" => Val::num(f64::from(dt.year())),
        "getMonth" => Val::num(f64::from(dt.month0())),
        "getDate" => Val::num(f64::from(dt.day())),
        "getDay" => Val::num(f64::from(dt.weekday().num_days_from_sunday())),
        "getHours" => Val::num(f64::from(dt.hour())),
        "getMinutes" => Val::num(f64::from(dt.minute())),
        "toLocaleDateString" => Val::str(datefmt::format_date(&dt, "M/d/yyyy")),
        "toDateString" => Val::str(datefmt::format_date(&dt, "EEE MMM dd yyyy")),
        _ => Val::str(dt.and_utc().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
    }
}

fn construct(class: &str, args: &[Val]) -> Val {
    match class {
        "Date" => {
            let dt = match args.first() {
                Some(arg) => datefmt::parse_date(&arg.as_data()),
                None => Some(chrono::Utc::now().naive_utc()),
            };
            dt.map(|dt| Val::str(dt.and_utc().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)))
                .unwrap_or_else(Val::null)
        }
        "Array" => {
            let len = args.first().map(Val::to_number).unwrap_or(0.0);
            let len = if len.is_finite() && len > 0.0 { (len as usize).min(10_000) } else { 0 };
            Val::list(vec![Val::null(); len])
        }
        _ => Val::null(),
    }
}

fn binary(op: BinaryOp, l: &Val, r: &Val) -> Val {
    match op {
        BinaryOp::Add => {
            let stringy = |v: &Val| {
                !matches!(
                    v,
                    Val::Data(Value::Null | Value::Bool(_) | Value::Number(_))
                )
            };
            if stringy(l) || stringy(r) {
                Val::str(format!("{}{}", l.to_js_string(), r.to_js_string()))
            } else {
                Val::num(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => Val::num(l.to_number() - r.to_number()),
        BinaryOp::Mul => Val::num(l.to_number() * r.to_number()),
        BinaryOp::Div => Val::num(l.to_number() / r.to_number()),
        BinaryOp::Rem => Val::num(l.to_number() % r.to_number()),
        BinaryOp::StrictEq => Val::bool(strict_eq(l, r)),
        BinaryOp::StrictNe => Val::bool(!strict_eq(l, r)),
        BinaryOp::LooseEq => Val::bool(loose_eq(l, r)),
        BinaryOp::LooseNe => Val::bool(!loose_eq(l, r)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (l, r) {
                (Val::Data(Value::String(a)), Val::Data(Value::String(b))) => Some(a.cmp(b)),
                _ => l.to_number().partial_cmp(&r.to_number()),
            };
            let Some(ordering) = ordering else {
                return Val::bool(false);
            };
            Val::bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

fn valid_attr_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ':')
}

fn kebab(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `--custom` or a lowercase kebab-case name. Anything else could smuggle a declaration.
fn valid_css_property(property: &str) -> bool {
    let name = property.strip_prefix("--").unwrap_or(property);
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_css_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// No escapes, no declaration breaks, and only functions that cannot load anything.
fn safe_css_value(value: &str) -> bool {
    if value.contains(['\\', ';', '{', '}']) {
        return false;
    }
    let lowered = value.to_ascii_lowercase();
    lowered.match_indices('(').all(|(i, _)| {
        let start = lowered[..i]
            .char_indices()
            .rev()
            .find(|(_, c)| !is_css_ident(*c))
            .map(|(p, c)| p + c.len_utf8())
            .unwrap_or(0);
        let name = &lowered[start..i];
        name.is_empty() || CSS_FUNCTIONS.contains(&name)
    })
}

/// CSS text for a style object. Declarations that can pull in resources are dropped.
fn style_text(style: &Value) -> String {
    let Value::Object(map) = style else {
        return String::new();
    };
    let mut decls = Vec::new();
    for (key, value) in map {
        let property = if key.starts_with("--") {
            key.clone()
        } else {
            kebab(key)
        };
        let value = match value {
            Value::Number(n) => {
                let n = n.as_f64().unwrap_or(0.0);
                if n != 0.0 && !UNITLESS_CSS.contains(&property.as_str()) {
                    format!("{}px", format_number(n))
                } else {
                    format_number(n)
                }
            }
            Value::String(s) => s.clone(),
            _ => continue,
        };
        if !valid_css_property(&property) || !safe_css_value(&value) {
            continue;
        }
        decls.push(format!("{property}: {value}"));
    }
    decls.join("; ")
}

/// One rendered attribute with its leading space, or nothing if it is dropped.
fn render_attr(name: &str, value: &Val) -> Option<String> {
    if !valid_attr_name(name) || DROPPED_ATTRS.contains(&name) {
        return None;
    }
    if name.len() > 2 && name[..2].eq_ignore_ascii_case("on") && name != "open" {
        return None;
    }
    let html_name = RENAMED_ATTRS
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or_else(|| name.to_string());

    if name == "style" {
        let css = style_text(&value.as_data());
        if css.is_empty() {
            return None;
        }
        return Some(format!(" style=\"{}\"", escape_html(&css)));
    }

    match value {
        Val::Data(Value::Bool(true)) if !html_name.starts_with("aria-") => {
            Some(format!(" {html_name}"))
        }
        Val::Data(Value::Bool(false) | Value::Null) if !html_name.starts_with("aria-") => None,
        Val::Data(Value::Array(_) | Value::Object(_)) | Val::Func(_) | Val::Html(_) => None,
        Val::Record(_) | Val::List(_) => None,
        Val::Data(v) => Some(format!(" {html_name}=\"{}\"", escape_html(&js_string(v)))),
    }
}

fn prop_string(props: &Val, key: &str) -> Option<String> {
    match member(props, key) {
        Val::Data(Value::String(s)) => Some(s),
        Val::Data(v @ Value::Number(_)) => Some(js_string(&v)),
        _ => None,
    }
}

fn render_icon(name: &str, props: &Val) -> String {
    let mut out = String::from("<svg");
    if let Some(class) = prop_string(props, "className") {
        out.push_str(&format!(" class=\"{}\"", escape_html(&class)));
    }
    let size = prop_string(props, "size").unwrap_or_else(|| "24".to_string());
    out.push_str(&format!(
        " data-icon=\"{}\" aria-hidden=\"true\" width=\"{size}\" height=\"{size}\" viewBox=\"0 0 24 24\" fill=\"none\" stroke=\"currentColor\"",
        escape_html(name),
        size = escape_html(&size),
    ));
    if let Some(color) = prop_string(props, "color") {
        out.push_str(&format!(" color=\"{}\"", escape_html(&color)));
    }
    out.push_str("></svg>");
    out
}

fn render_chart(name: &str, props: &Val, inner: &str) -> String {
    let data_props = match props {
        Val::Record(fields) => Value::Object(
            fields
                .iter()
                .filter(|(k, v)| {
                    k.as_str() != "children" && !matches!(v, Val::Func(_) | Val::Html(_))
                })
                .map(|(k, v)| (k.clone(), v.as_data()))
                .collect(),
        ),
        other => other.as_data(),
    };
    format!(
        "<div data-chart=\"{}\" data-props=\"{}\">{inner}</div>",
        escape_html(name),
        escape_html(&data_props.to_string()),
    )
}
