//! Lowering of stripped TSX source into the component IR.
//!
//! A recursive-descent reader for the subset of TSX that lesson components use:
//! function and arrow components, `useState` declarations, constant data, pure
//! expressions and JSX. Statements outside the subset are skipped as whole units.
//! Malformed markup fails the load; other unsupported expressions lower to
//! `Expr::Opaque` and render as nothing.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::ir::{
    Attr, AttrValue, BinaryOp, Binding, Block, Body, Child, Component, Element, Expr, Lambda,
    LogicalOp, ModuleIr, Param, TemplatePart, UnaryOp,
};
use crate::errors::SandboxError;

type LResult<T> = Result<T, SandboxError>;

const MAX_NESTING: usize = 128;

const STATEMENT_KEYWORDS: &[&str] = &[
    "const", "let", "var", "function", "return", "if", "for", "while", "switch", "export",
    "import", "class", "interface", "type", "async", "try", "do", "enum",
];

/// Lower a module whose directives, imports and exports have been stripped.
pub fn lower_module(text: &str) -> LResult<ModuleIr> {
    let mut parser = Parser::new(text);
    let block = parser.parse_statements(true)?;
    Ok(ModuleIr {
        globals: block.bindings,
        components: parser.components,
        inner_components: parser.inner_components,
    })
}

#[derive(Clone, Copy)]
enum Stop {
    Statement,
    Close(char),
}

struct Parser {
    src: Vec<char>,
    pos: usize,
    nesting: usize,
    /// Markup parse failures so far; a failure inside markup is never papered over.
    jsx_failures: usize,
    components: BTreeMap<String, Arc<Component>>,
    inner_components: BTreeSet<String>,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_component_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

fn operand_position(last_sig: char, last_word: &str) -> bool {
    matches!(
        last_sig,
        '(' | ',' | '=' | ':' | '?' | '&' | '|' | '!' | '{' | '[' | ';' | '}' | '>' | '+' | '-'
            | '*' | '%'
    ) || (last_sig == 'a'
        && matches!(
            last_word,
            "return" | "typeof" | "case" | "yield" | "await" | "default"
        ))
}

fn continues_expression(last_sig: char) -> bool {
    matches!(
        last_sig,
        '=' | '+' | '-' | '*' | '/' | ',' | '(' | '[' | '{' | '&' | '|' | '?' | ':' | '.' | '<'
            | '!'
    )
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            src: text.chars().collect(),
            pos: 0,
            nesting: 0,
            jsx_failures: 0,
            components: BTreeMap::new(),
            inner_components: BTreeSet::new(),
        }
    }

    // ── cursor ───────────────────────────────────────────────────────────

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> LResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            let found = self
                .peek()
                .map(|f| format!("'{f}'"))
                .unwrap_or_else(|| "end of input".to_string());
            Err(self.error(format!("expected '{c}', found {found}")))
        }
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::Lowering {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn enter(&mut self) -> LResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("expression nesting is too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    fn skip_comment(&mut self) -> bool {
        if self.starts_with("//") {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.pos += 1;
            }
            true
        } else if self.starts_with("/*") {
            self.pos += 2;
            while self.peek().is_some() && !self.starts_with("*/") {
                self.pos += 1;
            }
            self.pos = (self.pos + 2).min(self.src.len());
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some('/') if self.skip_comment() => {}
                _ => break,
            }
        }
    }

    fn skip_inline_ws(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.pos += 1;
        }
    }

    fn peek_ident(&self) -> Option<String> {
        let first = self.peek().filter(|c| is_ident_start(*c))?;
        let mut name = String::from(first);
        let mut i = 1;
        while let Some(c) = self.peek_at(i).filter(|c| is_ident_char(*c)) {
            name.push(c);
            i += 1;
        }
        Some(name)
    }

    fn ident(&mut self) -> Option<String> {
        let name = self.peek_ident()?;
        self.pos += name.chars().count();
        Some(name)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek_ident().as_deref() == Some(keyword)
    }

    // ── statements ───────────────────────────────────────────────────────

    fn parse_statements(&mut self, top_level: bool) -> LResult<Block> {
        let mut block = Block::default();
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else {
                if top_level {
                    return Ok(block);
                }
                return Err(self.error("unexpected end of input inside a block"));
            };
            match c {
                '}' => {
                    self.bump();
                    if top_level {
                        continue;
                    }
                    return Ok(block);
                }
                ';' => {
                    self.bump();
                    continue;
                }
                _ => {}
            }

            let start = self.pos;
            match self.peek_ident().as_deref() {
                Some("const" | "let" | "var") => {
                    self.ident();
                    self.parse_declaration(top_level, &mut block)?;
                }
                Some("function") => {
                    self.ident();
                    let after_keyword = self.pos;
                    let failures = self.jsx_failures;
                    if let Err(e) = self.parse_function_declaration(top_level, &mut block) {
                        if self.jsx_failures > failures {
                            return Err(e);
                        }
                        self.pos = after_keyword;
                        self.skip_function();
                    }
                }
                Some("async") => {
                    self.ident();
                }
                Some("return") => {
                    self.ident();
                    self.parse_return(&mut block)?;
                }
                Some("if" | "for" | "while" | "switch" | "catch") => {
                    self.ident();
                    self.skip_ws();
                    if self.eat('(') {
                        self.skip_js(Stop::Close(')'));
                    }
                    self.skip_branch();
                }
                Some("else" | "try" | "finally" | "do") => {
                    self.ident();
                    self.skip_ws();
                    if !self.at_keyword("if") {
                        self.skip_branch();
                    }
                }
                Some("interface" | "enum" | "class") => {
                    while self.peek().is_some_and(|c| c != '{') {
                        self.pos += 1;
                    }
                    if self.eat('{') {
                        self.skip_js(Stop::Close('}'));
                    }
                }
                _ => self.skip_statement(),
            }
            if self.pos == start {
                self.pos += 1;
            }
        }
    }

    fn skip_branch(&mut self) {
        self.skip_ws();
        if self.eat('{') {
            self.skip_js(Stop::Close('}'));
        } else {
            self.skip_statement();
        }
    }

    fn skip_statement(&mut self) {
        self.skip_js(Stop::Statement);
    }

    /// Skip a function declaration after the `function` keyword.
    fn skip_function(&mut self) {
        while self.peek().is_some_and(|c| c != '(') {
            self.pos += 1;
        }
        if self.eat('(') {
            self.skip_js(Stop::Close(')'));
        }
        while self.peek().is_some_and(|c| c != '{') {
            self.pos += 1;
        }
        if self.eat('{') {
            self.skip_js(Stop::Close('}'));
        }
    }

    fn parse_return(&mut self, block: &mut Block) -> LResult<()> {
        self.skip_inline_ws();
        if matches!(self.peek(), None | Some(';' | '}' | '\n')) {
            if block.ret.is_none() {
                block.ret = Some(Expr::Literal(Value::Null));
            }
            return Ok(());
        }
        let start = self.pos;
        let failures = self.jsx_failures;
        let expr = match self.parse_expression() {
            Ok(expr) => expr,
            Err(e) if self.jsx_failures > failures => return Err(e),
            Err(_) => {
                self.pos = start;
                Expr::Opaque
            }
        };
        if block.ret.is_none() {
            block.ret = Some(expr);
        }
        self.skip_statement();
        Ok(())
    }

    fn bind(&mut self, top_level: bool, name: String, init: Expr, block: &mut Block) {
        if let Expr::Lambda(lambda) = &init
            && is_component_name(&name)
        {
            if top_level {
                let component = Component {
                    name: name.clone(),
                    lambda: lambda.clone(),
                };
                self.components.insert(name, Arc::new(component));
                return;
            }
            self.inner_components.insert(name.clone());
        }
        block.bindings.push(Binding::Local { name, init });
    }

    fn parse_declaration(&mut self, top_level: bool, block: &mut Block) -> LResult<()> {
        self.skip_ws();
        match self.peek() {
            Some('[') => {
                self.bump();
                return self.parse_array_declaration(block);
            }
            Some('{') => {
                self.bump();
                return self.parse_object_declaration(block);
            }
            _ => {}
        }

        let Some(name) = self.ident() else {
            self.skip_statement();
            return Ok(());
        };
        self.skip_ws();
        if self.eat(':') {
            self.skip_type(&['=', ';'], false);
        }
        self.skip_ws();
        if !(self.peek() == Some('=') && self.peek_at(1) != Some('=')) {
            self.skip_statement();
            return Ok(());
        }
        self.bump();
        self.skip_ws();

        let start = self.pos;
        let failures = self.jsx_failures;
        match self.parse_expression() {
            Ok(init) => self.bind(top_level, name, init, block),
            Err(e) if self.jsx_failures > failures => return Err(e),
            Err(_) => self.pos = start,
        }
        self.skip_statement();
        Ok(())
    }

    /// `const [value, setValue] = useState(init)`, after the `[`.
    fn parse_array_declaration(&mut self, block: &mut Block) -> LResult<()> {
        let mut names = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(']') {
                break;
            }
            if self.eat(',') {
                continue;
            }
            match self.ident() {
                Some(name) => names.push(name),
                None => {
                    self.skip_js(Stop::Close(']'));
                    break;
                }
            }
        }
        self.skip_ws();
        if self.eat(':') {
            self.skip_type(&['=', ';'], false);
        }
        self.skip_ws();
        if !self.eat('=') {
            self.skip_statement();
            return Ok(());
        }
        self.skip_ws();

        let start = self.pos;
        let hook = self.parse_path();
        let hook_name = hook.rsplit('.').next().unwrap_or_default().to_string();
        if matches!(hook_name.as_str(), "useState" | "useReducer") {
            self.skip_ws();
            if self.peek() == Some('<') {
                self.skip_angle();
                self.skip_ws();
            }
            let init = if self.eat('(') {
                match self.parse_args() {
                    Ok(args) if hook_name == "useState" => args.into_iter().next(),
                    Ok(args) => args.into_iter().nth(1),
                    Err(_) => None,
                }
            } else {
                None
            };
            if let Some(name) = names.into_iter().next() {
                block.bindings.push(Binding::State { name, init });
            }
            self.skip_statement();
            return Ok(());
        }

        self.pos = start;
        let failures = self.jsx_failures;
        match self.parse_expression() {
            Ok(init) => {
                for (i, name) in names.into_iter().enumerate() {
                    let index = Expr::Literal(Value::from(i as u64));
                    block.bindings.push(Binding::Local {
                        name,
                        init: Expr::Index(Box::new(init.clone()), Box::new(index)),
                    });
                }
            }
            Err(e) if self.jsx_failures > failures => return Err(e),
            Err(_) => self.pos = start,
        }
        self.skip_statement();
        Ok(())
    }

    /// `const { a, b: c, d = 1 } = expr`, after the `{`.
    fn parse_object_declaration(&mut self, block: &mut Block) -> LResult<()> {
        let fields = self.parse_object_pattern()?;
        self.skip_ws();
        if self.eat(':') {
            self.skip_type(&['=', ';'], false);
        }
        self.skip_ws();
        if !self.eat('=') {
            self.skip_statement();
            return Ok(());
        }
        let start = self.pos;
        let failures = self.jsx_failures;
        match self.parse_expression() {
            Ok(source) => {
                for (key, local, default) in fields {
                    if local.is_empty() {
                        continue;
                    }
                    let init = destructured_field(&source, &key, default);
                    block.bindings.push(Binding::Local { name: local, init });
                }
            }
            Err(e) if self.jsx_failures > failures => return Err(e),
            Err(_) => self.pos = start,
        }
        self.skip_statement();
        Ok(())
    }

    fn parse_function_declaration(&mut self, top_level: bool, block: &mut Block) -> LResult<()> {
        self.skip_ws();
        let Some(name) = self.ident() else {
            self.skip_statement();
            return Ok(());
        };
        self.skip_ws();
        if self.peek() == Some('<') {
            self.skip_angle();
            self.skip_ws();
        }
        self.expect('(')?;
        let params = self.parse_params()?;
        self.skip_ws();
        if self.eat(':') {
            self.skip_type(&['{'], false);
        }
        self.skip_ws();
        self.expect('{')?;
        let body = self.parse_statements(false)?;
        let lambda = Lambda {
            params,
            body: Body::Block(body),
        };
        self.bind(top_level, name, Expr::Lambda(Arc::new(lambda)), block);
        Ok(())
    }

    /// Parameters after the opening `(`, through the closing `)`.
    fn parse_params(&mut self) -> LResult<Vec<Param>> {
        let mut params = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(')') {
                return Ok(params);
            }
            if self.eat(',') {
                continue;
            }
            let mut param = match self.peek() {
                Some('{') => {
                    self.bump();
                    Param::Object(self.parse_object_pattern()?)
                }
                Some('[') => {
                    self.bump();
                    self.skip_js(Stop::Close(']'));
                    Param::Ignored
                }
                Some('.') if self.starts_with("...") => {
                    self.pos += 3;
                    let name = self
                        .ident()
                        .ok_or_else(|| self.error("expected a rest parameter name"))?;
                    Param::Name(name, None)
                }
                _ => {
                    let name = self
                        .ident()
                        .ok_or_else(|| self.error("expected a parameter"))?;
                    Param::Name(name, None)
                }
            };
            self.skip_ws();
            self.eat('?');
            self.skip_ws();
            if self.eat(':') {
                self.skip_type(&[',', ')', '='], false);
                self.skip_ws();
            }
            if self.peek() == Some('=') && self.peek_at(1) != Some('>') {
                self.bump();
                let default = self.parse_expression()?;
                if let Param::Name(_, slot) = &mut param {
                    *slot = Some(default);
                }
            }
            params.push(param);
        }
    }

    /// Object pattern fields after the `{`, through the `}`: `(key, local, default)`.
    /// A rest element has key `...`; a nested pattern has an empty local.
    fn parse_object_pattern(&mut self) -> LResult<Vec<(String, String, Option<Expr>)>> {
        let mut fields = Vec::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Ok(fields);
            }
            if self.eat(',') {
                continue;
            }
            if self.starts_with("...") {
                self.pos += 3;
                if let Some(local) = self.ident() {
                    fields.push(("...".to_string(), local, None));
                }
                continue;
            }
            let key = match self.peek() {
                Some(q @ ('"' | '\'')) => self.parse_string(q)?,
                _ => self
                    .ident()
                    .ok_or_else(|| self.error("expected a property name in pattern"))?,
            };
            self.skip_ws();
            let mut local = key.clone();
            if self.eat(':') {
                self.skip_ws();
                match self.peek() {
                    Some(open @ ('{' | '[')) => {
                        self.bump();
                        self.skip_js(Stop::Close(if open == '{' { '}' } else { ']' }));
                        local = String::new();
                    }
                    _ => {
                        local = self
                            .ident()
                            .ok_or_else(|| self.error("expected a binding name in pattern"))?;
                    }
                }
            }
            self.skip_ws();
            let default = if self.peek() == Some('=') && self.peek_at(1) != Some('=') {
                self.bump();
                Some(self.parse_expression()?)
            } else {
                None
            };
            fields.push((key, local, default));
        }
    }

    fn parse_path(&mut self) -> String {
        let mut path = String::new();
        while let Some(segment) = self.ident() {
            path.push_str(&segment);
            if self.peek() == Some('.') && self.peek_at(1).is_some_and(is_ident_start) {
                self.bump();
                path.push('.');
            } else {
                break;
            }
        }
        path
    }

    // ── skipping ─────────────────────────────────────────────────────────

    /// Skip a TypeScript type until one of `stops` at nesting depth zero.
    fn skip_type(&mut self, stops: &[char], stop_at_arrow: bool) {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            let arrow = c == '=' && self.peek_at(1) == Some('>');
            if arrow && depth == 0 && stop_at_arrow {
                return;
            }
            if depth == 0 && stops.contains(&c) && !arrow {
                return;
            }
            match c {
                _ if arrow => {
                    self.pos += 2;
                    continue;
                }
                '(' | '[' | '{' | '<' => depth += 1,
                ')' | ']' | '}' | '>' => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                '"' | '\'' | '`' => {
                    self.skip_string_like();
                    continue;
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn skip_angle(&mut self) {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '<' => depth += 1,
                '=' if self.peek_at(1) == Some('>') => {
                    self.pos += 2;
                    continue;
                }
                '>' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.pos += 1;
                        return;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn skip_string_like(&mut self) {
        let start = self.pos;
        match self.peek() {
            Some('`') => {
                self.pos += 1;
                while let Some(c) = self.peek() {
                    match c {
                        '\\' => self.pos += 2,
                        '`' => {
                            self.pos += 1;
                            break;
                        }
                        '$' if self.peek_at(1) == Some('{') => {
                            self.pos += 2;
                            self.skip_js(Stop::Close('}'));
                        }
                        _ => self.pos += 1,
                    }
                }
            }
            Some(q) => {
                let _ = self.parse_string(q);
            }
            None => {}
        }
        if self.pos == start {
            self.pos += 1;
        }
        self.pos = self.pos.min(self.src.len());
    }

    fn skip_regex(&mut self) {
        self.pos += 1;
        let mut in_class = false;
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.pos += 1,
                '[' => in_class = true,
                ']' => in_class = false,
                '/' if !in_class => {
                    self.pos += 1;
                    break;
                }
                '\n' => break,
                _ => {}
            }
            self.pos += 1;
        }
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.pos = self.pos.min(self.src.len());
    }

    fn next_line_starts_statement(&mut self) -> bool {
        let save = self.pos;
        self.skip_ws();
        let starts = self
            .peek_ident()
            .is_some_and(|w| STATEMENT_KEYWORDS.contains(&w.as_str()));
        self.pos = save;
        starts
    }

    /// Skip code tolerantly: a whole statement, or up to and including a closing delimiter.
    fn skip_js(&mut self, stop: Stop) {
        let saved_failures = self.jsx_failures;
        let mut depth = 0usize;
        let mut last_sig = ';';
        let mut last_word = String::new();

        while let Some(c) = self.peek() {
            match c {
                '/' if matches!(self.peek_at(1), Some('/' | '*')) => {
                    self.skip_comment();
                }
                '"' | '\'' | '`' => {
                    self.skip_string_like();
                    last_sig = 'a';
                    last_word.clear();
                }
                '/' if operand_position(last_sig, &last_word) => {
                    self.skip_regex();
                    last_sig = 'a';
                    last_word.clear();
                }
                '<' if operand_position(last_sig, &last_word)
                    && self
                        .peek_at(1)
                        .is_some_and(|n| is_ident_start(n) || n == '>') =>
                {
                    let start = self.pos;
                    if self.parse_jsx().is_err() {
                        self.pos = start + 1;
                    }
                    last_sig = 'a';
                    last_word.clear();
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    self.pos += 1;
                    last_sig = c;
                }
                ')' | ']' | '}' => {
                    if depth == 0 {
                        if let Stop::Close(close) = stop
                            && close == c
                        {
                            self.pos += 1;
                        }
                        break;
                    }
                    depth -= 1;
                    self.pos += 1;
                    last_sig = c;
                }
                ';' if depth == 0 && matches!(stop, Stop::Statement) => {
                    self.pos += 1;
                    break;
                }
                '\n' if depth == 0 && matches!(stop, Stop::Statement) => {
                    self.pos += 1;
                    if !continues_expression(last_sig) && self.next_line_starts_statement() {
                        break;
                    }
                }
                c if is_ident_start(c) => {
                    last_word = self.ident().unwrap_or_default();
                    last_sig = 'a';
                }
                c if c.is_whitespace() => self.pos += 1,
                c if c.is_ascii_digit() => {
                    self.pos += 1;
                    last_sig = 'a';
                    last_word.clear();
                }
                _ => {
                    self.pos += 1;
                    last_sig = c;
                    last_word.clear();
                }
            }
        }
        self.jsx_failures = saved_failures;
    }

    // ── expressions ──────────────────────────────────────────────────────

    fn parse_expression(&mut self) -> LResult<Expr> {
        self.enter()?;
        let result = self.parse_conditional();
        self.leave();
        result
    }

    fn parse_conditional(&mut self) -> LResult<Expr> {
        let test = self.parse_logical_or()?;
        self.skip_ws();
        if self.peek() == Some('?') && !matches!(self.peek_at(1), Some('.' | '?')) {
            self.bump();
            let then = self.parse_expression()?;
            self.skip_ws();
            self.expect(':')?;
            let otherwise = self.parse_expression()?;
            return Ok(Expr::Conditional(
                Box::new(test),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(test)
    }

    fn parse_logical_or(&mut self) -> LResult<Expr> {
        let mut left = self.parse_logical_and()?;
        loop {
            self.skip_ws();
            let op = if self.starts_with("||") && self.peek_at(2) != Some('=') {
                LogicalOp::Or
            } else if self.starts_with("??") && self.peek_at(2) != Some('=') {
                LogicalOp::Nullish
            } else {
                return Ok(left);
            };
            self.pos += 2;
            let right = self.parse_logical_and()?;
            left = Expr::Logical(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_logical_and(&mut self) -> LResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            self.skip_ws();
            if !(self.starts_with("&&") && self.peek_at(2) != Some('=')) {
                return Ok(left);
            }
            self.pos += 2;
            let right = self.parse_comparison()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
    }

    fn parse_comparison(&mut self) -> LResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            self.skip_ws();
            let (op, len) = if self.starts_with("===") {
                (BinaryOp::StrictEq, 3)
            } else if self.starts_with("!==") {
                (BinaryOp::StrictNe, 3)
            } else if self.starts_with("==") {
                (BinaryOp::LooseEq, 2)
            } else if self.starts_with("!=") {
                (BinaryOp::LooseNe, 2)
            } else if self.starts_with("<=") {
                (BinaryOp::Le, 2)
            } else if self.starts_with(">=") {
                (BinaryOp::Ge, 2)
            } else if self.peek() == Some('<') && self.peek_at(1) != Some('<') {
                (BinaryOp::Lt, 1)
            } else if self.peek() == Some('>') && self.peek_at(1) != Some('>') {
                (BinaryOp::Gt, 1)
            } else {
                return Ok(left);
            };
            self.pos += len;
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> LResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_ws();
            let op = match (self.peek(), self.peek_at(1)) {
                (Some('+'), next) if !matches!(next, Some('+' | '=')) => BinaryOp::Add,
                (Some('-'), next) if !matches!(next, Some('-' | '=')) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> LResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            let op = match (self.peek(), self.peek_at(1)) {
                (Some('*'), next) if !matches!(next, Some('*' | '=')) => BinaryOp::Mul,
                (Some('/'), next) if !matches!(next, Some('/' | '*' | '=')) => BinaryOp::Div,
                (Some('%'), next) if next != Some('=') => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> LResult<Expr> {
        self.skip_ws();
        let op = match (self.peek(), self.peek_at(1)) {
            (Some('!'), next) if next != Some('=') => Some(UnaryOp::Not),
            (Some('-'), next) if next != Some('-') => Some(UnaryOp::Neg),
            (Some('+'), next) if next != Some('+') => Some(UnaryOp::Plus),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return Ok(Expr::Unary(op, Box::new(operand?)));
        }
        match self.peek_ident().as_deref() {
            Some("typeof") => {
                self.ident();
                self.parse_unary()?;
                Ok(Expr::Opaque)
            }
            Some("void") => {
                self.ident();
                self.parse_unary()?;
                Ok(Expr::Literal(Value::Null))
            }
            Some("await") => {
                self.ident();
                self.parse_unary()
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> LResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let save = self.pos;
            self.skip_ws();
            if self.starts_with("?.") {
                self.pos += 2;
                expr = match self.peek() {
                    Some('(') => {
                        self.bump();
                        Expr::Call(Box::new(expr), self.parse_args()?)
                    }
                    Some('[') => {
                        self.bump();
                        let index = self.parse_expression()?;
                        self.skip_ws();
                        self.expect(']')?;
                        Expr::Index(Box::new(expr), Box::new(index))
                    }
                    _ => {
                        let name = self
                            .ident()
                            .ok_or_else(|| self.error("expected a property name"))?;
                        Expr::Member(Box::new(expr), name)
                    }
                };
                continue;
            }
            match (self.peek(), self.peek_at(1)) {
                (Some('.'), next) if next != Some('.') => {
                    self.bump();
                    self.skip_ws();
                    let name = self
                        .ident()
                        .ok_or_else(|| self.error("expected a property name"))?;
                    expr = Expr::Member(Box::new(expr), name);
                    continue;
                }
                (Some('!'), next) if next != Some('=') => {
                    self.bump();
                    continue;
                }
                _ => {}
            }
            if self.at_keyword("as") {
                self.ident();
                self.skip_type(&[',', ')', '}', ']', ';', '?', ':'], true);
                continue;
            }

            self.pos = save;
            self.skip_inline_ws();
            if self.peek() == Some('<') && matches!(expr, Expr::Ident(_) | Expr::Member(..)) {
                // explicit type arguments on a call: `useRef<HTMLDivElement>(null)`
                self.skip_angle();
                if self.peek() != Some('(') {
                    self.pos = save;
                    return Ok(expr);
                }
            }
            match self.peek() {
                Some('(') => {
                    self.bump();
                    expr = Expr::Call(Box::new(expr), self.parse_args()?);
                }
                Some('[') => {
                    self.bump();
                    let index = self.parse_expression()?;
                    self.skip_ws();
                    self.expect(']')?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => {
                    self.pos = save;
                    return Ok(expr);
                }
            }
        }
    }

    /// Call arguments after the `(`, through the `)`.
    fn parse_args(&mut self) -> LResult<Vec<Expr>> {
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(')') {
                return Ok(args);
            }
            if self.starts_with("...") {
                self.pos += 3;
                self.parse_expression()?;
                args.push(Expr::Opaque);
            } else {
                args.push(self.parse_expression()?);
            }
            self.skip_ws();
            if !self.eat(',') {
                self.expect(')')?;
                return Ok(args);
            }
        }
    }

    fn parse_primary(&mut self) -> LResult<Expr> {
        self.skip_ws();
        let Some(c) = self.peek() else {
            return Err(self.error("unexpected end of input"));
        };
        match c {
            '0'..='9' => self.parse_number(),
            '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.parse_number(),
            '"' | '\'' => Ok(Expr::Literal(Value::String(self.parse_string(c)?))),
            '/' => {
                self.skip_regex();
                Ok(Expr::Opaque)
            }
            '`' => self.parse_template(),
            '(' => self.parse_paren_or_arrow(),
            '[' => {
                self.bump();
                self.parse_array()
            }
            '{' => {
                self.bump();
                self.parse_object()
            }
            '<' if self
                .peek_at(1)
                .is_some_and(|n| is_ident_start(n) || n == '>') =>
            {
                self.parse_jsx()
            }
            c if is_ident_start(c) => self.parse_identifier(),
            _ => Err(self.error(format!("unexpected '{c}'"))),
        }
    }

    fn parse_identifier(&mut self) -> LResult<Expr> {
        let name = self
            .ident()
            .ok_or_else(|| self.error("expected an identifier"))?;
        match name.as_str() {
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
            "new" => {
                self.skip_ws();
                let callee = self.parse_path();
                if callee.is_empty() {
                    return Err(self.error("expected a constructor name"));
                }
                self.skip_inline_ws();
                if self.peek() == Some('<') {
                    self.skip_angle();
                }
                let args = if self.eat('(') {
                    self.parse_args()?
                } else {
                    Vec::new()
                };
                Ok(Expr::New(callee, args))
            }
            "function" => {
                self.skip_ws();
                self.ident();
                self.skip_ws();
                self.expect('(')?;
                let params = self.parse_params()?;
                self.skip_ws();
                if self.eat(':') {
                    self.skip_type(&['{'], false);
                }
                self.skip_ws();
                self.expect('{')?;
                let body = self.parse_statements(false)?;
                Ok(Expr::Lambda(Arc::new(Lambda {
                    params,
                    body: Body::Block(body),
                })))
            }
            "async" => self.parse_primary(),
            _ => {
                let save = self.pos;
                self.skip_inline_ws();
                if self.starts_with("=>") {
                    self.pos += 2;
                    let body = self.parse_arrow_body()?;
                    return Ok(Expr::Lambda(Arc::new(Lambda {
                        params: vec![Param::Name(name, None)],
                        body,
                    })));
                }
                self.pos = save;
                Ok(Expr::Ident(name))
            }
        }
    }

    fn parse_paren_or_arrow(&mut self) -> LResult<Expr> {
        let start = self.pos;
        self.bump();
        if let Ok(params) = self.parse_params() {
            self.skip_ws();
            if self.eat(':') {
                self.skip_type(&['{', ';'], true);
                self.skip_ws();
            }
            if self.starts_with("=>") {
                self.pos += 2;
                let body = self.parse_arrow_body()?;
                return Ok(Expr::Lambda(Arc::new(Lambda { params, body })));
            }
        }
        self.pos = start + 1;
        let inner = self.parse_expression()?;
        self.skip_ws();
        self.expect(')')?;
        Ok(inner)
    }

    fn parse_arrow_body(&mut self) -> LResult<Body> {
        self.skip_ws();
        if self.eat('{') {
            self.enter()?;
            let block = self.parse_statements(false);
            self.leave();
            Ok(Body::Block(block?))
        } else {
            Ok(Body::Expr(self.parse_expression()?))
        }
    }

    /// Array literal after the `[`.
    fn parse_array(&mut self) -> LResult<Expr> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(']') {
                return Ok(Expr::Array(items));
            }
            if self.eat(',') {
                continue;
            }
            if self.starts_with("...") {
                self.pos += 3;
                self.parse_expression()?;
                items.push(Expr::Opaque);
            } else {
                items.push(self.parse_expression()?);
            }
            self.skip_ws();
            if !self.eat(',') {
                self.expect(']')?;
                return Ok(Expr::Array(items));
            }
        }
    }

    /// Object literal after the `{`.
    fn parse_object(&mut self) -> LResult<Expr> {
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Ok(Expr::Object(entries));
            }
            if self.eat(',') {
                continue;
            }
            if self.starts_with("...") {
                self.pos += 3;
                self.parse_expression()?;
                continue;
            }
            let key = match self.peek() {
                Some(q @ ('"' | '\'')) => Some(self.parse_string(q)?),
                Some('[') => {
                    self.bump();
                    self.parse_expression()?;
                    self.skip_ws();
                    self.expect(']')?;
                    None
                }
                Some(d) if d.is_ascii_digit() => {
                    let mut digits = String::new();
                    while let Some(d) = self.peek().filter(|d| d.is_ascii_alphanumeric() || *d == '.') {
                        digits.push(d);
                        self.pos += 1;
                    }
                    Some(digits)
                }
                _ => Some(
                    self.ident()
                        .ok_or_else(|| self.error("expected a property name"))?,
                ),
            };
            self.skip_ws();
            let value = if self.eat(':') {
                self.parse_expression()?
            } else if self.eat('(') {
                let params = self.parse_params()?;
                self.skip_ws();
                if self.eat(':') {
                    self.skip_type(&['{'], false);
                }
                self.skip_ws();
                self.expect('{')?;
                let body = self.parse_statements(false)?;
                Expr::Lambda(Arc::new(Lambda {
                    params,
                    body: Body::Block(body),
                }))
            } else {
                match &key {
                    Some(name) => Expr::Ident(name.clone()),
                    None => Expr::Opaque,
                }
            };
            if let Some(key) = key {
                entries.push((key, value));
            }
            self.skip_ws();
            if !self.eat(',') {
                self.expect('}')?;
                return Ok(Expr::Object(entries));
            }
        }
    }

    fn parse_number(&mut self) -> LResult<Expr> {
        let start = self.pos;
        if self.starts_with("0x") || self.starts_with("0X") {
            self.pos += 2;
            let mut digits = String::new();
            while let Some(d) = self.peek().filter(|d| d.is_ascii_hexdigit() || *d == '_') {
                if d != '_' {
                    digits.push(d);
                }
                self.pos += 1;
            }
            return i64::from_str_radix(&digits, 16)
                .map(|n| Expr::Literal(Value::from(n)))
                .map_err(|_| self.error("invalid hex literal"));
        }
        let mut text = String::new();
        while let Some(d) = self.peek() {
            let exponent_sign =
                matches!(d, '+' | '-') && matches!(text.chars().last(), Some('e' | 'E'));
            if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                text.push(d);
            } else if d != '_' {
                break;
            }
            self.pos += 1;
        }
        text.parse::<f64>()
            .map(|n| Expr::Literal(number_value(n)))
            .map_err(|_| SandboxError::Lowering {
                offset: start,
                message: format!("invalid number literal '{text}'"),
            })
    }

    fn parse_escape(&mut self, out: &mut String) {
        let Some(c) = self.bump() else { return };
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'b' | 'f' | 'v' => {}
            '\n' => {}
            'x' | 'u' => {
                let braced = c == 'u' && self.eat('{');
                let len = if c == 'x' { 2 } else { 4 };
                let mut hex = String::new();
                while let Some(h) = self.peek().filter(|h| h.is_ascii_hexdigit()) {
                    if !braced && hex.len() == len {
                        break;
                    }
                    hex.push(h);
                    self.pos += 1;
                }
                if braced {
                    self.eat('}');
                }
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            other => out.push(other),
        }
    }

    fn parse_string(&mut self, quote: char) -> LResult<String> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        while let Some(c) = self.bump() {
            match c {
                '\\' => self.parse_escape(&mut out),
                '\n' => break,
                _ if c == quote => return Ok(out),
                _ => out.push(c),
            }
        }
        Err(SandboxError::Lowering {
            offset: start,
            message: "unterminated string literal".to_string(),
        })
    }

    fn parse_template(&mut self) -> LResult<Expr> {
        let start = self.pos;
        self.bump();
        let mut parts = Vec::new();
        let mut text = String::new();
        while let Some(c) = self.bump() {
            match c {
                '\\' => self.parse_escape(&mut text),
                '`' => {
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(text));
                    }
                    return Ok(Expr::Template(parts));
                }
                '$' if self.peek() == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let expr = self.parse_expression()?;
                    self.skip_ws();
                    self.expect('}')?;
                    parts.push(TemplatePart::Expr(expr));
                }
                _ => text.push(c),
            }
        }
        Err(SandboxError::Lowering {
            offset: start,
            message: "unterminated template literal".to_string(),
        })
    }

    // ── markup ───────────────────────────────────────────────────────────

    fn parse_jsx(&mut self) -> LResult<Expr> {
        self.enter()?;
        let result = self.parse_jsx_element();
        self.leave();
        if result.is_err() {
            self.jsx_failures += 1;
        }
        result
    }

    fn jsx_name(&mut self) -> Option<String> {
        let first = self.peek().filter(|c| is_ident_start(*c))?;
        let mut name = String::from(first);
        self.pos += 1;
        while let Some(c) = self
            .peek()
            .filter(|c| is_ident_char(*c) || matches!(c, '-' | '.' | ':'))
        {
            name.push(c);
            self.pos += 1;
        }
        Some(name)
    }

    fn parse_jsx_element(&mut self) -> LResult<Expr> {
        self.expect('<')?;
        self.skip_ws();
        if self.eat('>') {
            let children = self.parse_jsx_children("")?;
            return Ok(Expr::Fragment(children));
        }
        let tag = self
            .jsx_name()
            .ok_or_else(|| self.error("expected a tag name"))?;
        let mut attrs = Vec::new();
        loop {
            self.skip_ws();
            if self.starts_with("/>") {
                self.pos += 2;
                return Ok(Expr::Element(Box::new(Element {
                    tag,
                    attrs,
                    children: Vec::new(),
                })));
            }
            if self.eat('>') {
                let children = self.parse_jsx_children(&tag)?;
                return Ok(Expr::Element(Box::new(Element {
                    tag,
                    attrs,
                    children,
                })));
            }
            if self.eat('{') {
                self.skip_js(Stop::Close('}'));
                continue;
            }
            let name = self
                .jsx_name()
                .ok_or_else(|| self.error(format!("unexpected character in <{tag}>")))?;
            self.skip_ws();
            let value = if self.eat('=') {
                self.skip_ws();
                match self.peek() {
                    Some(q @ ('"' | '\'')) => AttrValue::Str(self.parse_jsx_attr_string(q)?),
                    Some('{') => {
                        self.bump();
                        AttrValue::Expr(self.parse_hole()?)
                    }
                    Some('<') => AttrValue::Expr(self.parse_jsx()?),
                    _ => return Err(self.error(format!("invalid value for attribute {name}"))),
                }
            } else {
                AttrValue::Flag
            };
            attrs.push(Attr { name, value });
        }
    }

    fn parse_jsx_attr_string(&mut self, quote: char) -> LResult<String> {
        let start = self.pos;
        self.bump();
        let mut raw = String::new();
        while let Some(c) = self.bump() {
            if c == quote {
                return Ok(decode_entities(&raw));
            }
            raw.push(c);
        }
        Err(SandboxError::Lowering {
            offset: start,
            message: "unterminated attribute value".to_string(),
        })
    }

    /// Expression container contents after the `{`, through the `}`.
    fn parse_hole(&mut self) -> LResult<Expr> {
        let start = self.pos;
        let failures = self.jsx_failures;
        match self.parse_expression() {
            Ok(expr) => {
                self.skip_ws();
                if self.eat('}') {
                    return Ok(expr);
                }
            }
            Err(e) if self.jsx_failures > failures => return Err(e),
            Err(_) => {}
        }
        self.pos = start;
        self.skip_js(Stop::Close('}'));
        Ok(Expr::Opaque)
    }

    fn parse_jsx_children(&mut self, tag: &str) -> LResult<Vec<Child>> {
        let mut children = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error(if tag.is_empty() {
                        "unclosed fragment".to_string()
                    } else {
                        format!("unclosed <{tag}>")
                    }));
                }
                Some('<') if self.peek_at(1) == Some('/') => {
                    self.pos += 2;
                    self.skip_ws();
                    let closing = self.jsx_name().unwrap_or_default();
                    self.skip_ws();
                    self.expect('>')?;
                    if closing != tag {
                        return Err(self.error(format!(
                            "closing tag </{closing}> does not match <{tag}>"
                        )));
                    }
                    return Ok(children);
                }
                Some('<') => children.push(Child::Expr(self.parse_jsx()?)),
                Some('{') => {
                    self.bump();
                    self.skip_ws();
                    if self.eat('}') {
                        continue;
                    }
                    children.push(Child::Expr(self.parse_hole()?));
                }
                Some(_) => {
                    let mut raw = String::new();
                    while let Some(c) = self.peek().filter(|c| *c != '<' && *c != '{') {
                        raw.push(c);
                        self.pos += 1;
                    }
                    let text = normalize_jsx_text(&raw);
                    if !text.is_empty() {
                        children.push(Child::Text(text));
                    }
                }
            }
        }
    }
}

/// Whitespace handling for JSX text: lines are trimmed where they meet a line
/// break, blank lines vanish, and the rest join with single spaces.
fn normalize_jsx_text(raw: &str) -> String {
    if !raw.contains('\n') {
        return decode_entities(raw);
    }
    let lines: Vec<&str> = raw.split('\n').collect();
    let last = lines.len() - 1;
    let kept: Vec<&str> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| match i {
            0 => line.trim_end(),
            _ if i == last => line.trim_start(),
            _ => line.trim(),
        })
        .filter(|line| !line.is_empty())
        .collect();
    decode_entities(&kept.join(" "))
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "nbsp" => Some('\u{a0}'),
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "copy" => Some('©'),
                "deg" => Some('°'),
                "times" => Some('×'),
                "divide" => Some('÷'),
                "rarr" => Some('→'),
                "larr" => Some('←'),
                _ => entity.strip_prefix('#').and_then(|num| {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse().ok(),
                    };
                    code.and_then(char::from_u32)
                }),
            };
            ch.map(|c| (c, end))
        });
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn destructured_field(source: &Expr, key: &str, default: Option<Expr>) -> Expr {
    if key == "..." {
        return source.clone();
    }
    let member = Expr::Member(Box::new(source.clone()), key.to_string());
    match default {
        Some(default) => Expr::Logical(LogicalOp::Nullish, Box::new(member), Box::new(default)),
        None => member,
    }
}

/// JSON number for a JS numeric value; integral values stay integers.
pub fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(text: &str) -> ModuleIr {
        lower_module(text).unwrap_or_else(|e| panic!("lowering failed: {e}"))
    }

    fn entry<'a>(module: &'a ModuleIr, name: &str) -> &'a Expr {
        module.components[name]
            .render_expr()
            .unwrap_or_else(|| panic!("{name} has no render expression"))
    }

    #[test]
    fn lowers_function_component_with_state() {
        let module = lower(
            r#"
function LessonComponent() {
  const [count, setCount] = useState<number>(3);
  const [open, setOpen] = React.useState(false);
  const label = `Count: ${count}`;
  return (
    <div className="p-4">
      <h1>{label}</h1>
    </div>
  );
}
"#,
        );
        let component = &module.components["LessonComponent"];
        let Body::Block(block) = &component.lambda.body else {
            panic!("expected block body");
        };
        let names: Vec<_> = block.bindings.iter().map(Binding::name).collect();
        assert_eq!(names, vec!["count", "open", "label"]);
        assert!(matches!(
            &block.bindings[0],
            Binding::State { init: Some(Expr::Literal(v)), .. } if v == &Value::from(3)
        ));
        match entry(&module, "LessonComponent") {
            Expr::Element(el) => {
                assert_eq!(el.tag, "div");
                assert_eq!(el.children.len(), 1);
            }
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn lowers_arrow_components_and_constants() {
        let module = lower(
            r#"
const QUESTIONS = [
  { question: "What is 1/2 + 1/4?", options: ["3/4", "2/6"], answer: 0 },
];
const Card = ({ title, children }: { title: string; children: React.ReactNode }) => (
  <section><h2>{title}</h2>{children}</section>
);
function LessonComponent() {
  return <Card title="Quiz">{QUESTIONS.length}</Card>;
}
"#,
        );
        assert_eq!(module.globals.len(), 1);
        assert_eq!(module.globals[0].name(), "QUESTIONS");
        assert!(module.components.contains_key("Card"));
        assert!(module.components.contains_key("LessonComponent"));
        let card = &module.components["Card"];
        assert!(matches!(&card.lambda.params[0], Param::Object(fields) if fields.len() == 2));
    }

    #[test]
    fn braceless_if_return_is_not_the_render() {
        let module = lower(
            r#"
function Lesson() {
  if (!ready) return <p>Loading</p>;
  if (done) { return <p>Done</p>; }
  return <main>Ready</main>;
}
"#,
        );
        match entry(&module, "Lesson") {
            Expr::Element(el) => assert_eq!(el.tag, "main"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn skips_handlers_effects_and_types() {
        let module = lower(
            r#"
interface Props { value: number }
type Mode = 'a' | 'b';
function Lesson() {
  const [value, setValue] = useState(0);
  useEffect(() => {
    const id = setInterval(() => setValue(v => v + 1), 1000);
    return () => clearInterval(id);
  }, []);
  const handleClick = (e: React.MouseEvent) => {
    if (value > 3) { setValue(0); }
    const text = "it's fine";
  };
  return <button onClick={handleClick}>{value}</button>;
}
"#,
        );
        match entry(&module, "Lesson") {
            Expr::Element(el) => assert_eq!(el.tag, "button"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn jsx_text_with_apostrophes_and_entities() {
        let module = lower(
            r#"
function Lesson() {
  return (
    <p>
      Don't worry &amp; relax
      it's easy
    </p>
  );
}
"#,
        );
        let Expr::Element(el) = entry(&module, "Lesson") else {
            panic!("expected element");
        };
        match &el.children[0] {
            Child::Text(text) => assert_eq!(text, "Don't worry & relax it's easy"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn map_with_arrow_lowers_to_call_with_lambda() {
        let module = lower(
            r#"
function Lesson() {
  const items = ['a', 'b'];
  return <ul>{items.map((item, i) => <li key={i}>{item}</li>)}</ul>;
}
"#,
        );
        let Expr::Element(el) = entry(&module, "Lesson") else {
            panic!("expected element");
        };
        match &el.children[0] {
            Child::Expr(Expr::Call(callee, args)) => {
                assert!(matches!(callee.as_ref(), Expr::Member(_, m) if m == "map"));
                assert!(matches!(&args[0], Expr::Lambda(l) if l.params.len() == 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mismatched_closing_tag_fails() {
        let err = lower_module("function Lesson() { return <div><span></div>; }").unwrap_err();
        match err {
            SandboxError::Lowering { message, .. } => {
                assert!(message.contains("does not match"), "{message}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_markup_inside_hole_fails_closed() {
        let err = lower_module(
            "function Lesson() { return <ul>{items.map(i => <li>{i}</p>)}</ul>; }",
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::Lowering { .. }));
    }

    #[test]
    fn unsupported_hole_expression_is_opaque() {
        let module = lower("function Lesson() { return <p>{count++}</p>; }");
        let Expr::Element(el) = entry(&module, "Lesson") else {
            panic!("expected element");
        };
        assert!(matches!(&el.children[0], Child::Expr(Expr::Opaque)));
    }

    #[test]
    fn regex_literals_in_skipped_code_do_not_derail() {
        let module = lower(
            r#"
function Lesson() {
  const clean = (s) => s.replace(/'/g, "");
  return <p>ok</p>;
}
"#,
        );
        assert!(matches!(entry(&module, "Lesson"), Expr::Element(_)));
    }

    #[test]
    fn nested_capitalized_functions_are_inner_components() {
        let module = lower(
            r#"
function Lesson() {
  const Badge = ({ text }) => <span>{text}</span>;
  return <Badge text="hi" />;
}
"#,
        );
        assert!(module.inner_components.contains("Badge"));
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let deep_parens = format!(
            "function Lesson() {{ return <p>{{{}1{}}}</p>; }}",
            "(".repeat(200),
            ")".repeat(200)
        );
        let _ = lower_module(&deep_parens);
        let deep_markup = format!(
            "function Lesson() {{ return {}{}; }}",
            "<div>".repeat(200),
            "</div>".repeat(200)
        );
        assert!(matches!(
            lower_module(&deep_markup),
            Err(SandboxError::Lowering { .. })
        ));
    }

    #[test]
    fn number_value_keeps_integers() {
        assert_eq!(number_value(3.0), Value::from(3));
        assert_eq!(number_value(0.5), serde_json::json!(0.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn decode_entities_handles_numeric_and_unknown() {
        assert_eq!(decode_entities("a &#65; &#x42; &bogus; &"), "a A B &bogus; &");
    }
}
