use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
}

impl ThreatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatCategory::SqlInjection => "sql_injection",
            ThreatCategory::Xss => "xss",
            ThreatCategory::PathTraversal => "path_traversal",
            ThreatCategory::CommandInjection => "command_injection",
        }
    }
}

pub struct Rule {
    pub id: &'static str,
    pub category: ThreatCategory,
    pub pattern: &'static str,
}

/// Inspection rules, in evaluation order.
pub static RULES: &[Rule] = &[
    Rule {
        id: "sqli-tautology",
        category: ThreatCategory::SqlInjection,
        pattern: r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
    },
    Rule {
        id: "sqli-union-select",
        category: ThreatCategory::SqlInjection,
        pattern: r"(?i)\bunion(\s+all)?\s+select\b",
    },
    Rule {
        id: "sqli-comment",
        category: ThreatCategory::SqlInjection,
        pattern: r#"(?m)['"]\s*(--(\s|$)|#\s*$|/\*)"#,
    },
    Rule {
        id: "sqli-stacked",
        category: ThreatCategory::SqlInjection,
        pattern: r"(?i);\s*(drop|truncate|alter)\s+table\b|;\s*(delete\s+from|insert\s+into)\b",
    },
    Rule {
        id: "sqli-time-based",
        category: ThreatCategory::SqlInjection,
        pattern: r"(?i)\b(sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b",
    },
    Rule {
        id: "sqli-schema-probe",
        category: ThreatCategory::SqlInjection,
        pattern: r"(?i)\binformation_schema\b|\bxp_cmdshell\b|\b(load_file|updatexml|extractvalue)\s*\(",
    },
    Rule {
        id: "xss-script-tag",
        category: ThreatCategory::Xss,
        pattern: r"(?i)<\s*script\b",
    },
    Rule {
        id: "xss-event-handler",
        category: ThreatCategory::Xss,
        pattern: r"(?i)<[^>]*\bon(error|load|click|mouseover|focus|submit|toggle)\s*=",
    },
    Rule {
        id: "xss-javascript-uri",
        category: ThreatCategory::Xss,
        pattern: r"(?i)\bjavascript\s*:|\bdata\s*:\s*text/html",
    },
    Rule {
        id: "xss-embed-tag",
        category: ThreatCategory::Xss,
        pattern: r"(?i)<\s*(iframe|object|embed)\b",
    },
    Rule {
        id: "traversal-dot-dot",
        category: ThreatCategory::PathTraversal,
        pattern: r"\.\.[/\\]",
    },
    Rule {
        id: "traversal-sensitive-file",
        category: ThreatCategory::PathTraversal,
        pattern: r"(?i)/etc/(passwd|shadow|hosts)\b|\bc:\\windows\\|\bboot\.ini\b",
    },
    Rule {
        id: "cmd-chained",
        category: ThreatCategory::CommandInjection,
        pattern: r"(?im)(;|\|\|?|&&|`)\s*(cat|ls|id|whoami|uname|wget|curl|nc|bash|sh|powershell|cmd(\.exe)?)(\s|$|;|\||`)",
    },
    Rule {
        id: "cmd-substitution",
        category: ThreatCategory::CommandInjection,
        pattern: r"\$\([^)]*\)|\$\{IFS\}",
    },
];

/// All rule patterns compiled as one set; indices line up with [`RULES`].
pub static RULE_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(RULES.iter().map(|r| r.pattern)).expect("built-in payload rules must compile")
});
