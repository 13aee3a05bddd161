use serde::{Deserialize, Serialize};

/// Structured class of a validator finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    BlockedCapability,
    ImportNotAllowed,
    UnbalancedDelimiters,
    MissingDefaultExport,
    MissingRender,
    UnimportedPrimitive,
    DisallowedStyling,
    MissingTypeDeclaration,
    ProbeFailed,
}

impl ViolationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCode::BlockedCapability => "blocked_capability",
            ViolationCode::ImportNotAllowed => "import_not_allowed",
            ViolationCode::UnbalancedDelimiters => "unbalanced_delimiters",
            ViolationCode::MissingDefaultExport => "missing_default_export",
            ViolationCode::MissingRender => "missing_render",
            ViolationCode::UnimportedPrimitive => "unimported_primitive",
            ViolationCode::DisallowedStyling => "disallowed_styling",
            ViolationCode::MissingTypeDeclaration => "missing_type_declaration",
            ViolationCode::ProbeFailed => "probe_failed",
        }
    }

    /// Whether the fixer should be asked to repair this finding. Findings that are not
    /// actionable never block acceptance.
    pub fn is_actionable(&self) -> bool {
        match self {
            ViolationCode::BlockedCapability
            | ViolationCode::ImportNotAllowed
            | ViolationCode::UnbalancedDelimiters
            | ViolationCode::MissingDefaultExport
            | ViolationCode::MissingRender
            | ViolationCode::UnimportedPrimitive
            | ViolationCode::DisallowedStyling
            | ViolationCode::ProbeFailed => true,
            ViolationCode::MissingTypeDeclaration => false,
        }
    }
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding. Displays as its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub message: String,
}

impl Violation {
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.code.is_actionable()
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub accepted: bool,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub(crate) fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            accepted: violations.is_empty(),
            violations,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }

    pub fn actionable(&self) -> Vec<Violation> {
        self.violations
            .iter()
            .filter(|v| v.is_actionable())
            .cloned()
            .collect()
    }

    pub fn diagnostics(&self) -> Vec<Violation> {
        self.violations
            .iter()
            .filter(|v| !v.is_actionable())
            .cloned()
            .collect()
    }

    pub fn has_actionable(&self) -> bool {
        self.violations.iter().any(Violation::is_actionable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_type_declaration_is_non_actionable() {
        let all = [
            ViolationCode::BlockedCapability,
            ViolationCode::ImportNotAllowed,
            ViolationCode::UnbalancedDelimiters,
            ViolationCode::MissingDefaultExport,
            ViolationCode::MissingRender,
            ViolationCode::UnimportedPrimitive,
            ViolationCode::DisallowedStyling,
            ViolationCode::MissingTypeDeclaration,
            ViolationCode::ProbeFailed,
        ];
        let non_actionable: Vec<_> = all.iter().filter(|c| !c.is_actionable()).collect();
        assert_eq!(non_actionable, vec![&ViolationCode::MissingTypeDeclaration]);
    }

    #[test]
    fn violation_displays_as_message() {
        let v = Violation::new(ViolationCode::ImportNotAllowed, "Import not allowed: fs");
        assert_eq!(v.to_string(), "Import not allowed: fs");
    }

    #[test]
    fn result_splits_actionable_from_diagnostics() {
        let result = ValidationResult::from_violations(vec![
            Violation::new(ViolationCode::MissingTypeDeclaration, "types"),
            Violation::new(ViolationCode::BlockedCapability, "eval() is not allowed"),
        ]);
        assert!(!result.accepted);
        assert!(result.has_actionable());
        assert_eq!(result.actionable().len(), 1);
        assert_eq!(result.diagnostics()[0].message, "types");
        assert_eq!(result.messages(), vec!["types", "eval() is not allowed"]);
    }

    #[test]
    fn code_serializes_snake_case() {
        let json = serde_json::to_string(&ViolationCode::DisallowedStyling).unwrap();
        assert_eq!(json, "\"disallowed_styling\"");
        assert_eq!(ViolationCode::ProbeFailed.to_string(), "probe_failed");
    }
}
