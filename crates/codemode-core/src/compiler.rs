//! TypeScript → JavaScript lowering for sandboxed programs.
//!
//! A program is a function *body*: it may `return` and `await` at top level
//! and may import capability modules with ES import syntax. Compilation
//! 1. rewrites each import declaration into a call to the sandbox `require`,
//!    keeping the line count so positions stay stable, and routes dynamic
//!    `import(...)` through the same loader;
//! 2. wraps the body in `async function __codemodeMain() { ... }`, opening on
//!    the user's first line;
//! 3. strips types with the swc-based transpiler in `deno_ast`.
//!
//! Import declarations are recognised at the start of a line or after a `;`.
//!
//! The syntax checker parses the exact same prepared text, so whatever it
//! accepts the compiler can emit. Both refuse a body that closes the wrapper
//! early and continues at top level.

use std::sync::OnceLock;

use deno_ast::{
    EmitOptions, MediaType, ModuleSpecifier, ParseDiagnostic, ParseParams, ParsedSource,
    ProgramRef, SourceMapOption, SourcePos, SourceRangedForSpanned, TranspileModuleOptions,
    TranspileOptions,
};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// Name of the async function the program body is wrapped in.
pub const ENTRY_FUNCTION: &str = "__codemodeMain";

/// Global interop shim installed by the sandbox for default imports.
pub const DEFAULT_IMPORT_SHIM: &str = "__codemodeDefault";

/// Global the sandbox installs in place of dynamic `import(...)`.
pub const DYNAMIC_IMPORT_SHIM: &str = "__codemodeDynamicImport";

/// Reported when the body closes `__codemodeMain` and keeps going.
pub(crate) const WRAPPER_ESCAPE_MESSAGE: &str =
    "Unbalanced `}` ends the program body early; code after it is not allowed";

/// Text placed in front of the user's first line.
pub(crate) const WRAPPER_PREFIX: &str = "async function __codemodeMain() {";

const WRAPPER_SUFFIX: &str = "\n}\n";

const PROGRAM_SPECIFIER: &str = "file:///codemode/program.ts";

/// JavaScript ready to be evaluated by the sandbox runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledProgram {
    /// Script text declaring [`ENTRY_FUNCTION`].
    pub code: String,
    /// Modules named by the program's import declarations, in source order.
    pub imports: Vec<String>,
}

/// Program text after import lowering and wrapping, before type stripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreparedSource {
    pub text: String,
    pub imports: Vec<String>,
}

/// Compile a TypeScript program body into a [`CompiledProgram`].
pub fn compile(source: &str) -> Result<CompiledProgram, CompileError> {
    let prepared = prepare(source);
    let specifier = program_specifier()?;
    let parsed = parse_typescript(&prepared.text, specifier)
        .map_err(|diagnostic| CompileError::Parse(diagnostic.to_string()))?;
    if wrapper_escape(&parsed).is_some() {
        return Err(CompileError::Parse(WRAPPER_ESCAPE_MESSAGE.to_string()));
    }

    let transpiled = parsed
        .transpile(
            &TranspileOptions::default(),
            &TranspileModuleOptions::default(),
            &EmitOptions {
                source_map: SourceMapOption::None,
                ..Default::default()
            },
        )
        .map_err(|e| CompileError::Transpile(e.to_string()))?;

    let code = transpiled.into_source().text;
    tracing::debug!(
        source_bytes = source.len(),
        compiled_bytes = code.len(),
        imports = prepared.imports.len(),
        "compiler: program lowered"
    );

    Ok(CompiledProgram {
        code,
        imports: prepared.imports,
    })
}

/// Lower imports and wrap the body.
pub(crate) fn prepare(source: &str) -> PreparedSource {
    let (lowered, imports) = lower_imports(source);
    PreparedSource {
        text: format!("{WRAPPER_PREFIX}{lowered}{WRAPPER_SUFFIX}"),
        imports,
    }
}

pub(crate) fn program_specifier() -> Result<ModuleSpecifier, CompileError> {
    ModuleSpecifier::parse(PROGRAM_SPECIFIER).map_err(|e| CompileError::Parse(e.to_string()))
}

pub(crate) fn parse_typescript(
    text: &str,
    specifier: ModuleSpecifier,
) -> Result<ParsedSource, ParseDiagnostic> {
    deno_ast::parse_module(ParseParams {
        specifier,
        text: text.into(),
        media_type: MediaType::TypeScript,
        capture_tokens: false,
        scope_analysis: false,
        maybe_syntax: None,
    })
}

/// Start of the first top-level statement after the wrapper function, if the
/// body closed it early.
pub(crate) fn wrapper_escape(parsed: &ParsedSource) -> Option<SourcePos> {
    match parsed.program_ref() {
        ProgramRef::Module(module) => module.body.get(1).map(|item| item.start()),
        ProgramRef::Script(script) => script.body.get(1).map(|stmt| stmt.start()),
    }
}

fn import_declaration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)(^|;)[ \t]*import[ \t]+(type[ \t]+)?(?:([\w$*{},\s]+?)\s*from\s*)?["']([^"'\n]+)["']"#,
        )
        .expect("import declaration pattern compiles")
    })
}

fn dynamic_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(^|[^\w$.])import\s*\(").expect("dynamic import pattern compiles")
    })
}

/// Rewrite ES import declarations into `require` calls and dynamic imports
/// into calls to [`DYNAMIC_IMPORT_SHIM`].
///
/// Returns the rewritten text and the modules named by declarations.
/// Type-only imports are erased and not reported.
pub(crate) fn lower_imports(source: &str) -> (String, Vec<String>) {
    let mut imports = Vec::new();
    let mut index = 0usize;

    let lowered = import_declaration_regex().replace_all(source, |caps: &Captures| {
        let Some(whole) = caps.get(0) else {
            return String::new();
        };
        let lead = caps.get(1).map_or("", |m| m.as_str());
        let padding = "\n".repeat(whole.as_str().matches('\n').count());
        let module = caps.get(4).map_or("", |m| m.as_str());

        if caps.get(2).is_some() {
            return format!("{lead}{padding}");
        }

        imports.push(module.to_string());
        let statement = match caps.get(3) {
            None => format!("require({})", js_string(module)),
            Some(clause) => {
                let binding = format!("__codemodeImport{index}");
                index += 1;
                lower_clause(clause.as_str(), module, &binding)
            }
        };
        // The declaration's own `;`, when present, stays in the text and
        // terminates the last lowered statement.
        let terminator = if source[whole.end()..]
            .trim_start_matches([' ', '\t'])
            .starts_with(';')
        {
            ""
        } else {
            ";"
        };
        format!("{lead}{statement}{terminator}{padding}")
    });

    let lowered = dynamic_import_regex()
        .replace_all(&lowered, format!("${{1}}{DYNAMIC_IMPORT_SHIM}(").as_str())
        .into_owned();

    (lowered, imports)
}

/// Lower an import clause such as `def, { a, b as c }` or `* as ns`.
fn lower_clause(clause: &str, module: &str, binding: &str) -> String {
    let clause = clause.trim();
    let (default_name, rest) = if clause.starts_with('{') || clause.starts_with('*') {
        (None, clause)
    } else {
        match clause.split_once(',') {
            Some((default_name, rest)) => (Some(default_name.trim()), rest.trim()),
            None => (Some(clause), ""),
        }
    };

    let mut statements = vec![format!("const {binding} = require({})", js_string(module))];

    if let Some(name) = default_name.filter(|n| !n.is_empty()) {
        statements.push(format!(
            "const {name} = {DEFAULT_IMPORT_SHIM}({binding})"
        ));
    }

    if let Some(namespace) = rest.strip_prefix('*') {
        let name = namespace.trim().trim_start_matches("as").trim();
        if !name.is_empty() {
            statements.push(format!("const {name} = {binding}"));
        }
    } else if let Some(list) = rest.strip_prefix('{') {
        let list = list.trim_end().trim_end_matches('}');
        let members: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty() && !m.starts_with("type "))
            .map(|m| match m.split_once(" as ") {
                Some((imported, local)) => format!("{}: {}", imported.trim(), local.trim()),
                None => m.to_string(),
            })
            .collect();
        if !members.is_empty() {
            statements.push(format!("const {{ {} }} = {binding}", members.join(", ")));
        }
    }

    statements.join("; ")
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
