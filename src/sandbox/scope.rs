//! The capability scope: the closed set of names a loaded module may reach.
//!
//! Built fresh from a module's own import statements on every load. Nothing here
//! touches the network, storage or process globals.

use std::collections::{BTreeMap, BTreeSet};

use super::ir::ModuleIr;
use crate::errors::SandboxError;
use crate::validator::PRIMITIVES;
use crate::validator::imports::{ImportKind, ImportStatement};

/// Vetted chart components. Anything else imported from the chart namespace fails the load.
pub const CHART_REGISTRY: &[&str] = &[
    "Area",
    "AreaChart",
    "Bar",
    "BarChart",
    "Brush",
    "CartesianGrid",
    "Cell",
    "ComposedChart",
    "Cross",
    "Curve",
    "Customized",
    "Dot",
    "ErrorBar",
    "Funnel",
    "FunnelChart",
    "Label",
    "LabelList",
    "Legend",
    "Line",
    "LineChart",
    "Pie",
    "PieChart",
    "PolarAngleAxis",
    "PolarGrid",
    "PolarRadiusAxis",
    "Polygon",
    "Radar",
    "RadarChart",
    "RadialBar",
    "RadialBarChart",
    "Rectangle",
    "ReferenceArea",
    "ReferenceDot",
    "ReferenceLine",
    "ResponsiveContainer",
    "Scatter",
    "ScatterChart",
    "Sector",
    "Symbols",
    "Text",
    "Tooltip",
    "Trapezoid",
    "Treemap",
    "XAxis",
    "YAxis",
    "ZAxis",
];

/// What a capitalized or dotted tag name resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagTarget {
    Component(String),
    /// A component defined inside another component's body.
    InnerComponent(String),
    Icon(String),
    Chart(String),
    Fragment,
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityScope {
    /// local name → hook name
    hooks: BTreeMap<String, String>,
    /// local name → module, for default and namespace imports
    namespaces: BTreeMap<String, String>,
    charts: BTreeMap<String, String>,
    icons: BTreeMap<String, String>,
    date_format: BTreeSet<String>,
    fragments: BTreeSet<String>,
}

fn namespace_of(module: &str) -> &str {
    module.split('/').next().unwrap_or(module)
}

impl CapabilityScope {
    pub fn from_imports(imports: &[ImportStatement]) -> Result<Self, SandboxError> {
        let mut scope = Self::default();
        for import in imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Static))
        {
            let module = import.module.as_str();
            for binding in &import.bindings {
                let local = binding.local.clone();
                let imported = binding.imported.as_str();
                if imported == "default" || imported == "*" {
                    match (namespace_of(module), module.strip_prefix("date-fns/")) {
                        (_, Some("format")) => {
                            scope.date_format.insert(local);
                        }
                        ("recharts", _) if imported == "default" => {
                            return Err(SandboxError::UnknownChart { name: local });
                        }
                        (ns, _) => {
                            scope.namespaces.insert(local, ns.to_string());
                        }
                    }
                    continue;
                }
                match namespace_of(module) {
                    "react" if PRIMITIVES.contains(&imported) => {
                        scope.hooks.insert(local, imported.to_string());
                    }
                    "react" if imported == "Fragment" => {
                        scope.fragments.insert(local);
                    }
                    "recharts" => {
                        if !CHART_REGISTRY.contains(&imported) {
                            return Err(SandboxError::UnknownChart {
                                name: imported.to_string(),
                            });
                        }
                        scope.charts.insert(local, imported.to_string());
                    }
                    "lucide-react" => {
                        let name = imported.strip_suffix("Icon").unwrap_or(imported);
                        scope.icons.insert(local, name.to_string());
                    }
                    "date-fns" if imported == "format" => {
                        scope.date_format.insert(local);
                    }
                    _ => {}
                }
            }
        }
        Ok(scope)
    }

    /// Hook name bound to `local`, if any.
    pub fn hook(&self, local: &str) -> Option<&str> {
        self.hooks.get(local).map(String::as_str)
    }

    /// Whether `local` is a default or namespace import of `namespace`.
    pub fn is_namespace(&self, local: &str, namespace: &str) -> bool {
        self.namespaces.get(local).is_some_and(|ns| ns == namespace)
    }

    pub fn is_date_format(&self, local: &str) -> bool {
        self.date_format.contains(local)
    }

    /// Resolve a capitalized or dotted tag. Module components shadow imports.
    pub fn resolve_tag(&self, tag: &str, module: &ModuleIr) -> Result<TagTarget, SandboxError> {
        if module.components.contains_key(tag) {
            return Ok(TagTarget::Component(tag.to_string()));
        }
        if module.inner_components.contains(tag) {
            return Ok(TagTarget::InnerComponent(tag.to_string()));
        }
        if let Some(icon) = self.icons.get(tag) {
            return Ok(TagTarget::Icon(icon.clone()));
        }
        if let Some(chart) = self.charts.get(tag) {
            return Ok(TagTarget::Chart(chart.clone()));
        }
        if self.fragments.contains(tag) {
            return Ok(TagTarget::Fragment);
        }
        if let Some((ns_local, member)) = tag.split_once('.') {
            match self.namespaces.get(ns_local).map(String::as_str) {
                Some("react") if member == "Fragment" => return Ok(TagTarget::Fragment),
                Some("lucide-react") if !member.contains('.') => {
                    let name = member.strip_suffix("Icon").unwrap_or(member);
                    return Ok(TagTarget::Icon(name.to_string()));
                }
                Some("recharts") => {
                    if CHART_REGISTRY.contains(&member) {
                        return Ok(TagTarget::Chart(member.to_string()));
                    }
                    return Err(SandboxError::UnknownChart {
                        name: member.to_string(),
                    });
                }
                _ => {}
            }
        }
        Err(SandboxError::UnboundComponent {
            name: tag.to_string(),
        })
    }
}

/// Lowercase tags without a dot are host elements; everything else needs resolving.
pub fn is_host_tag(tag: &str) -> bool {
    !tag.contains('.') && tag.chars().next().is_some_and(|c| c.is_lowercase())
}
