//! Static pre-execution scan of untrusted source text.
//!
//! Two passes, first match wins:
//! 1. literal substrings that name dangerous runtime facilities;
//! 2. import/require targets whose module name starts with a blocked prefix.
//!
//! The scan runs on raw text, before parsing, so it also catches constructs
//! hidden in positions a parser would treat as dead code.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Literal substrings that are never allowed, with the reason reported.
const BLOCKED_LITERALS: &[(&str, &str)] = &[
    ("eval(", "dynamic code evaluation is not allowed"),
    (
        "new Function",
        "constructing functions from strings is not allowed",
    ),
    ("process.exit", "process termination is not allowed"),
    ("process.abort", "process termination is not allowed"),
    ("process.kill", "process termination is not allowed"),
    ("process.env", "environment variable access is not allowed"),
    ("Deno.env", "environment variable access is not allowed"),
    (
        "process.cwd",
        "working directory and file path introspection is not allowed",
    ),
    (
        "process.chdir",
        "working directory and file path introspection is not allowed",
    ),
    (
        "__dirname",
        "working directory and file path introspection is not allowed",
    ),
    (
        "__filename",
        "working directory and file path introspection is not allowed",
    ),
    ("child_process", "subprocess access is not allowed"),
    ("process.binding", "subprocess access is not allowed"),
    ("spawnSync", "subprocess access is not allowed"),
    ("execSync", "subprocess access is not allowed"),
    ("readFileSync", "filesystem access is not allowed"),
    ("writeFileSync", "filesystem access is not allowed"),
    ("fs/promises", "filesystem access is not allowed"),
];

/// Module-name prefixes that may not be imported (filesystem, subprocess,
/// raw networking, and anything addressed through the `node:` scheme).
const BLOCKED_IMPORT_PREFIXES: &[&str] = &[
    "fs",
    "node:",
    "child_process",
    "net",
    "http",
    "dgram",
    "tls",
    "worker_threads",
    "cluster",
];

/// Outcome of a validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationVerdict {
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Scan `source` for blocked literals and imports.
pub fn validate(source: &str) -> ValidationVerdict {
    if let Some((literal, reason)) = BLOCKED_LITERALS
        .iter()
        .find(|(literal, _)| source.contains(literal))
    {
        tracing::debug!(literal = %literal, "validator: blocked literal");
        return ValidationVerdict::rejected(*reason);
    }

    for module in imported_modules(source) {
        if let Some(prefix) = BLOCKED_IMPORT_PREFIXES
            .iter()
            .find(|prefix| module.starts_with(*prefix))
        {
            tracing::debug!(module = %module, prefix = %prefix, "validator: blocked import");
            return ValidationVerdict::rejected(format!(
                "importing module \"{module}\" is not allowed"
            ));
        }
    }

    ValidationVerdict::accepted()
}

/// Reject programs larger than `max_bytes`.
pub fn validate_size(source: &str, max_bytes: usize) -> ValidationVerdict {
    if source.len() > max_bytes {
        return ValidationVerdict::rejected(format!(
            "program is {} bytes, the limit is {max_bytes} bytes",
            source.len()
        ));
    }
    ValidationVerdict::accepted()
}

/// Every module name referenced by an import/require-style statement, in
/// source order. Static forms come before call forms.
pub fn imported_modules(source: &str) -> Vec<String> {
    let static_form = static_import_regex();
    let call_form = call_import_regex();

    static_form
        .captures_iter(source)
        .chain(call_form.captures_iter(source))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn static_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\b(?:import|export)\s+(?:[\w$*{},\s]+?\s+from\s+)?["']([^"'\n]+)["']"#)
            .expect("static import pattern compiles")
    })
}

fn call_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\b(?:require|import)\s*\(\s*["'`]([^"'`\n]+)["'`]\s*\)"#)
            .expect("call import pattern compiles")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_program_is_valid() {
        let verdict = validate(r#"return { summary: "ok", data: [1, 2, 3] };"#);
        assert!(verdict.is_valid());
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn test_env_access_rejected() {
        let verdict = validate("const key = process.env.API_KEY;\nreturn { summary: key, data: null };");
        assert!(!verdict.is_valid());
        assert_eq!(
            verdict.reason.as_deref(),
            Some("environment variable access is not allowed")
        );
    }

    #[test]
    fn test_each_literal_category_rejected() {
        let cases = [
            ("eval('1 + 1')", "dynamic code evaluation"),
            ("const f = new Function('return 1');", "constructing functions"),
            ("process.exit(1);", "process termination"),
            ("console.log(__dirname);", "file path introspection"),
            ("const cp = 'child_process';", "subprocess"),
            ("readFileSync('/etc/passwd')", "filesystem"),
        ];
        for (code, expected) in cases {
            let verdict = validate(code);
            let reason = verdict.reason.unwrap_or_default();
            assert!(reason.contains(expected), "{code:?} gave {reason:?}");
        }
    }

    #[test]
    fn test_first_match_wins() {
        // eval( is listed before process.env
        let verdict = validate("process.env.X; eval('x')");
        assert_eq!(
            verdict.reason.as_deref(),
            Some("dynamic code evaluation is not allowed")
        );
    }

    #[test]
    fn test_blocked_imports() {
        for code in [
            r#"import fs from "fs";"#,
            r#"import { readFile } from 'fs';"#,
            r#"import * as net from "net";"#,
            r#"const http = require("https");"#,
            r#"const m = await import("node:os");"#,
            "import 'worker_threads';",
            r#"export { request } from "http";"#,
        ] {
            let verdict = validate(code);
            assert!(!verdict.is_valid(), "expected {code:?} to be rejected");
            assert!(verdict.reason.unwrap().starts_with("importing module"));
        }
    }

    #[test]
    fn test_capability_imports_allowed() {
        let code = r#"
import weather from "weather";
import { quote, history as past } from "stocks";
const news = require("news");
return { summary: "ok", data: null };
"#;
        assert!(validate(code).is_valid());
    }

    #[test]
    fn test_imported_modules_extracts_all_forms() {
        let code = r#"
import a from "alpha";
import {
  b,
  c,
} from "beta";
import "gamma";
const d = require('delta');
const e = await import(`epsilon`);
"#;
        assert_eq!(
            imported_modules(code),
            vec!["alpha", "beta", "gamma", "delta", "epsilon"]
        );
    }

    #[test]
    fn test_validate_size() {
        assert!(validate_size("return 1", 100).is_valid());
        let verdict = validate_size("return 1", 4);
        assert!(!verdict.is_valid());
        assert!(verdict.reason.unwrap().contains("limit is 4 bytes"));
    }

    #[test]
    fn test_verdict_serde_omits_missing_reason() {
        let json = serde_json::to_value(ValidationVerdict::accepted()).unwrap();
        assert_eq!(json, serde_json::json!({ "valid": true }));
    }
}
