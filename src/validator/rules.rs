//! Pattern tables for the validator passes.

use regex::Regex;
use std::sync::LazyLock;

/// Module namespaces a component may reference.
pub const ALLOWED_NAMESPACES: &[&str] = &["react", "lucide-react", "recharts", "date-fns"];

/// State and effect primitives that must trace back to `react`.
pub const PRIMITIVES: &[&str] = &[
    "useState",
    "useEffect",
    "useMemo",
    "useCallback",
    "useRef",
    "useReducer",
    "useContext",
];

/// Dangerous capabilities. None of these can be allowlisted.
pub static BLOCKLIST: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\beval\s*\(", "eval() is not allowed"),
        (
            r"\bnew\s+Function\b|\bFunction\s*\(",
            "Function constructor is not allowed",
        ),
        (
            r#"\bset(?:Timeout|Interval)\s*\(\s*['"`]"#,
            "String arguments to setTimeout/setInterval are not allowed",
        ),
        (
            r"dangerouslySetInnerHTML",
            "dangerouslySetInnerHTML is not allowed",
        ),
        (
            r"\binnerHTML\s*\+?=(?:[^=]|$)",
            "innerHTML assignment is not allowed",
        ),
        (
            r"\bouterHTML\s*\+?=(?:[^=]|$)",
            "outerHTML assignment is not allowed",
        ),
        (r"\binsertAdjacentHTML\b", "insertAdjacentHTML is not allowed"),
        (r"__proto__", "__proto__ is not allowed"),
        (
            r"\bconstructor\s*\[|\.constructor\s*\.\s*constructor\b",
            "constructor access is not allowed",
        ),
        (
            r"\bObject\s*\.\s*setPrototypeOf\b",
            "Object.setPrototypeOf is not allowed",
        ),
        (
            r"\.prototype(?:\s*\.\s*[A-Za-z_$][\w$]*)?\s*=(?:[^=>]|$)",
            "prototype assignment is not allowed",
        ),
        (
            r"\bdocument\s*\.\s*write(?:ln)?\s*\(",
            "document.write is not allowed",
        ),
    ]
    .into_iter()
    .map(|(pattern, message)| (Regex::new(pattern).unwrap(), message))
    .collect()
});

/// Word-boundary matcher per primitive, in `PRIMITIVES` order.
pub static PRIMITIVE_USES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    PRIMITIVES
        .iter()
        .map(|name| (*name, Regex::new(&format!(r"\b{name}\b")).unwrap()))
        .collect()
});

pub static DEFAULT_EXPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bexport\s+default\b").unwrap());

pub static RENDER_EXPR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\breturn\b|=>\s*\(?\s*<").unwrap());

pub static HOVER_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[\s"'`{(:])((?:group-|peer-)?hover:[\w\-\[\]/.#%]+)"#).unwrap()
});

pub static WHITE_BUTTON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<button\b[^>]*?\bbg-white\b").unwrap());

/// Whether `module` is an allowlisted namespace or a sub-path of one.
pub fn is_allowed_module(module: &str) -> bool {
    ALLOWED_NAMESPACES.iter().any(|ns| {
        module == *ns
            || module
                .strip_prefix(ns)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}
