//! Declarative component IR produced by lowering and interpreted by the renderer.
//!
//! The IR can describe markup, data and pure expressions. It has no node for
//! assignment, loops, I/O or dynamic code, so nothing lowered into it can express them.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Template(Vec<TemplatePart>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Lambda(Arc<Lambda>),
    Element(Box<Element>),
    Fragment(Vec<Child>),
    /// Syntax outside the lowered subset. Evaluates to nothing.
    Opaque,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<Attr>,
    pub children: Vec<Child>,
}

#[derive(Debug, Clone)]
pub struct Attr {
    pub name: String,
    pub value: AttrValue,
}

#[derive(Debug, Clone)]
pub enum AttrValue {
    Str(String),
    Expr(Expr),
    /// Bare attribute such as `disabled`.
    Flag,
}

#[derive(Debug, Clone)]
pub enum Child {
    Text(String),
    Expr(Expr),
}

/// A function parameter: a plain name or an object destructuring pattern.
#[derive(Debug, Clone)]
pub enum Param {
    Name(String, Option<Expr>),
    Object(Vec<(String, String, Option<Expr>)>),
    Ignored,
}

#[derive(Debug, Clone)]
pub enum Binding {
    /// `const [value, setValue] = useState(init)`
    State { name: String, init: Option<Expr> },
    Local { name: String, init: Expr },
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub bindings: Vec<Binding>,
    pub ret: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Body {
    Expr(Expr),
    Block(Block),
}

#[derive(Debug, Clone)]
pub struct Lambda {
    pub params: Vec<Param>,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    pub lambda: Arc<Lambda>,
}

impl Component {
    /// The markup-producing expression, if the component has one.
    pub fn render_expr(&self) -> Option<&Expr> {
        match &self.lambda.body {
            Body::Expr(expr) => Some(expr),
            Body::Block(block) => block.ret.as_ref(),
        }
    }
}

/// Everything lowered from one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleIr {
    pub globals: Vec<Binding>,
    pub components: BTreeMap<String, Arc<Component>>,
    /// Capitalized function bindings declared inside other functions.
    pub inner_components: BTreeSet<String>,
}

impl Expr {
    /// Visit every element tag reachable from this expression.
    pub fn visit_elements<'a>(&'a self, f: &mut dyn FnMut(&'a Element)) {
        match self {
            Expr::Literal(_) | Expr::Ident(_) | Expr::Opaque => {}
            Expr::Member(inner, _) | Expr::Unary(_, inner) => inner.visit_elements(f),
            Expr::Index(a, b) | Expr::Binary(_, a, b) | Expr::Logical(_, a, b) => {
                a.visit_elements(f);
                b.visit_elements(f);
            }
            Expr::Call(callee, args) => {
                callee.visit_elements(f);
                for arg in args {
                    arg.visit_elements(f);
                }
            }
            Expr::New(_, args) | Expr::Array(args) => {
                for arg in args {
                    arg.visit_elements(f);
                }
            }
            Expr::Conditional(c, t, e) => {
                c.visit_elements(f);
                t.visit_elements(f);
                e.visit_elements(f);
            }
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Expr(e) = part {
                        e.visit_elements(f);
                    }
                }
            }
            Expr::Object(entries) => {
                for (_, value) in entries {
                    value.visit_elements(f);
                }
            }
            Expr::Lambda(lambda) => lambda.visit_elements(f),
            Expr::Element(element) => {
                f(element);
                for attr in &element.attrs {
                    if let AttrValue::Expr(e) = &attr.value {
                        e.visit_elements(f);
                    }
                }
                visit_children(&element.children, f);
            }
            Expr::Fragment(children) => visit_children(children, f),
        }
    }
}

fn visit_children<'a>(children: &'a [Child], f: &mut dyn FnMut(&'a Element)) {
    for child in children {
        if let Child::Expr(e) = child {
            e.visit_elements(f);
        }
    }
}

impl Lambda {
    pub fn visit_elements<'a>(&'a self, f: &mut dyn FnMut(&'a Element)) {
        for param in &self.params {
            match param {
                Param::Name(_, Some(default)) => default.visit_elements(f),
                Param::Object(fields) => {
                    for (_, _, default) in fields {
                        if let Some(d) = default {
                            d.visit_elements(f);
                        }
                    }
                }
                _ => {}
            }
        }
        match &self.body {
            Body::Expr(e) => e.visit_elements(f),
            Body::Block(block) => block.visit_elements(f),
        }
    }
}

impl Block {
    pub fn visit_elements<'a>(&'a self, f: &mut dyn FnMut(&'a Element)) {
        for binding in &self.bindings {
            binding.visit_elements(f);
        }
        if let Some(ret) = &self.ret {
            ret.visit_elements(f);
        }
    }
}

impl Binding {
    pub fn name(&self) -> &str {
        match self {
            Binding::State { name, .. } | Binding::Local { name, .. } => name,
        }
    }

    pub fn visit_elements<'a>(&'a self, f: &mut dyn FnMut(&'a Element)) {
        match self {
            Binding::State { init: Some(e), .. } | Binding::Local { init: e, .. } => {
                e.visit_elements(f)
            }
            Binding::State { init: None, .. } => {}
        }
    }
}
