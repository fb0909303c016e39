//! Function-level instrumenter: source rewriting over the Python AST.
//!
//! The reference mechanism for this kind of tool is direct bytecode editing;
//! here every in-scope module is rewritten at the source level and
//! recompiled by the embedded interpreter, which is behaviorally equivalent
//! and independent of the interpreter's opcode set.
//!
//! Two entry points:
//! - [`wrap_user_functions`]: instruments a whole module. Every function
//!   gets a try/except epilogue; module-top-level functions additionally get
//!   the patch-dispatch prologue. Class bodies are left untouched.
//! - [`wrap_patch_only`]: shields a candidate patch with the epilogue alone,
//!   so a repaired function that crashes again can re-enter repair.
//!
//! The injected hooks (`__newt_patch_exists__`, `__newt_mode__`,
//! `__newt_load_patch__`, `__newt_on_error__`) are installed into builtins
//! by the bootstrap harness, so instrumented modules need no imports.

use anyhow::{anyhow, Context, Result};
use rustpython_ast as ast;
use rustpython_ast::Ranged;
use rustpython_parser::parse_program;
use std::collections::HashSet;

/// Marker line proving a module already went through the rewriter.
pub const MODULE_SENTINEL: &str = "__newt_instrumented__ = True";
/// Marker statement proving a patch function is already shielded.
pub const SHIELD_SENTINEL: &str = "__newt_shielded__ = True";

const INDENT: usize = 4;

#[derive(Clone, Copy, PartialEq)]
enum WrapMode {
    /// prologue + epilogue for top-level defs, epilogue for nested defs
    UserModule,
    /// epilogue only, shield sentinel in each top-level def
    PatchOnly,
}

/// Instrument a user module's source. Idempotent: a module carrying the
/// sentinel is returned unchanged.
pub fn wrap_user_functions(source: &str, filename: &str) -> Result<String> {
    rewrite_module(source, filename, WrapMode::UserModule)
}

/// Shield a candidate patch (a module containing the rewritten function)
/// with the epilogue only. The dispatch prologue is deliberately absent so
/// that Val-1 execution and patched-call re-entry never consult the patch
/// file they came from.
pub fn wrap_patch_only(source: &str, filename: &str) -> Result<String> {
    rewrite_module(source, filename, WrapMode::PatchOnly)
}

fn rewrite_module(source: &str, filename: &str, mode: WrapMode) -> Result<String> {
    let sentinel = match mode {
        WrapMode::UserModule => MODULE_SENTINEL,
        WrapMode::PatchOnly => SHIELD_SENTINEL,
    };
    if source.contains(sentinel) {
        return Ok(source.to_string());
    }

    let suite = parse_program(source, filename)
        .map_err(|e| anyhow!("Failed to parse {}: {}", filename, e))?;

    let index = LineIndex::new(source);
    let lines: Vec<&str> = source.split('\n').collect();
    let protected = string_continuation_lines(&lines);

    let funcs = collect_functions(&suite, &index, &lines, true);

    let mut out: Vec<String> = Vec::new();

    if mode == WrapMode::UserModule {
        // The sentinel goes after the module docstring and any __future__
        // imports, both of which must stay in leading position.
        let insert_at = sentinel_insert_line(&suite, &index);
        for line in &lines[..insert_at] {
            out.push((*line).to_string());
        }
        out.push(MODULE_SENTINEL.to_string());
        emit_block(&lines, &funcs, insert_at, lines.len(), 0, &protected, mode, &mut out);
    } else {
        emit_block(&lines, &funcs, 0, lines.len(), 0, &protected, mode, &mut out);
    }

    let rewritten = out.join("\n");

    // Assembly gate: the rewritten module must still parse. A failure here
    // is a rewriter defect, not a user error; dump both sides and propagate.
    if let Err(e) = parse_program(&rewritten, filename) {
        eprintln!("[instrument] Rewrite of {} does not parse: {}", filename, e);
        eprintln!("[instrument] ---- original ----\n{}", source);
        eprintln!("[instrument] ---- rewritten ----\n{}", rewritten);
        return Err(anyhow!("Instrumented source for {} failed to parse: {}", filename, e))
            .context("instrumenter assembly error");
    }

    Ok(rewritten)
}

// =============================================================================
// Function collection
// =============================================================================

struct FuncInfo {
    name: String,
    is_async: bool,
    /// first line of the def block, decorators included (0-based)
    start_line: usize,
    /// line holding the first body statement (0-based)
    body_line: usize,
    /// byte column of the first body statement on its line
    body_col: usize,
    /// last line of the function, inclusive (0-based)
    end_line: usize,
    /// last line of the docstring statement, when the body starts with one
    doc_end_line: Option<usize>,
    /// argument list reproduced for the prologue tail-call
    call_args: String,
    /// defined directly at module scope
    top_level: bool,
    /// functions nested inside this one (class bodies are never descended)
    children: Vec<FuncInfo>,
}

fn collect_functions(
    stmts: &[ast::Stmt],
    index: &LineIndex,
    lines: &[&str],
    top_level: bool,
) -> Vec<FuncInfo> {
    let mut funcs = Vec::new();
    for stmt in stmts {
        match stmt {
            ast::Stmt::FunctionDef(def) => {
                funcs.push(make_func_info(
                    def.name.as_str(),
                    false,
                    &def.args,
                    &def.body,
                    def.range.start().to_usize(),
                    def.range.end().to_usize(),
                    index,
                    lines,
                    top_level,
                ));
            }
            ast::Stmt::AsyncFunctionDef(def) => {
                funcs.push(make_func_info(
                    def.name.as_str(),
                    true,
                    &def.args,
                    &def.body,
                    def.range.start().to_usize(),
                    def.range.end().to_usize(),
                    index,
                    lines,
                    top_level,
                ));
            }
            // Class bodies are detected and left untouched; methods are not
            // re-bindable repair units.
            ast::Stmt::ClassDef(_) => {}
            other => {
                for block in sub_blocks(other) {
                    funcs.extend(collect_functions(block, index, lines, top_level));
                }
            }
        }
    }
    funcs
}

/// Nested statement blocks of compound statements, in source order.
fn sub_blocks(stmt: &ast::Stmt) -> Vec<&[ast::Stmt]> {
    match stmt {
        ast::Stmt::If(s) => vec![&s.body, &s.orelse],
        ast::Stmt::While(s) => vec![&s.body, &s.orelse],
        ast::Stmt::For(s) => vec![&s.body, &s.orelse],
        ast::Stmt::AsyncFor(s) => vec![&s.body, &s.orelse],
        ast::Stmt::With(s) => vec![&s.body],
        ast::Stmt::AsyncWith(s) => vec![&s.body],
        ast::Stmt::Try(s) => {
            let mut blocks: Vec<&[ast::Stmt]> = vec![&s.body];
            for handler in &s.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                blocks.push(&h.body);
            }
            blocks.push(&s.orelse);
            blocks.push(&s.finalbody);
            blocks
        }
        ast::Stmt::TryStar(s) => {
            let mut blocks: Vec<&[ast::Stmt]> = vec![&s.body];
            for handler in &s.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                blocks.push(&h.body);
            }
            blocks.push(&s.orelse);
            blocks.push(&s.finalbody);
            blocks
        }
        ast::Stmt::Match(s) => s.cases.iter().map(|c| c.body.as_slice()).collect(),
        _ => vec![],
    }
}

#[allow(clippy::too_many_arguments)]
fn make_func_info(
    name: &str,
    is_async: bool,
    args: &ast::Arguments,
    body: &[ast::Stmt],
    range_start: usize,
    range_end: usize,
    index: &LineIndex,
    lines: &[&str],
    top_level: bool,
) -> FuncInfo {
    let start_line = index.line_of(range_start);
    let end_line = index.line_of(range_end.saturating_sub(1));

    let first_body = &body[0];
    let body_start = first_body.range().start().to_usize();
    let body_line = index.line_of(body_start);
    let body_col = body_start - index.line_start(body_line);

    let doc_end_line = docstring_stmt(body).map(|doc| {
        index.line_of(doc.range().end().to_usize().saturating_sub(1))
    });

    FuncInfo {
        name: name.to_string(),
        is_async,
        start_line,
        body_line,
        body_col,
        end_line,
        doc_end_line,
        call_args: reproduce_call_args(args),
        top_level,
        children: collect_functions(body, index, lines, false),
    }
}

fn docstring_stmt(body: &[ast::Stmt]) -> Option<&ast::Stmt> {
    match body.first() {
        Some(stmt @ ast::Stmt::Expr(e)) => match e.value.as_ref() {
            ast::Expr::Constant(c) if matches!(c.value, ast::Constant::Str(_)) => Some(stmt),
            _ => None,
        },
        _ => None,
    }
}

/// First line where the sentinel assignment may go: after the module
/// docstring and any `from __future__ import ...` statements.
fn sentinel_insert_line(suite: &[ast::Stmt], index: &LineIndex) -> usize {
    let mut insert = 0usize;
    for (i, stmt) in suite.iter().enumerate() {
        let keep_leading = match stmt {
            ast::Stmt::ImportFrom(imp) => {
                imp.module.as_ref().map(|m| m.as_str()) == Some("__future__")
            }
            _ => i == 0 && docstring_stmt(suite).is_some(),
        };
        if keep_leading {
            insert = index.line_of(stmt.range().end().to_usize().saturating_sub(1)) + 1;
        } else {
            break;
        }
    }
    insert
}

/// Rebuild the argument list of a def as the matching call expression,
/// honoring the declared convention: positional names, `*varargs`,
/// keyword-only as `name=name`, and `**kwargs`.
fn reproduce_call_args(args: &ast::Arguments) -> String {
    let mut parts: Vec<String> = Vec::new();
    for arg in args.posonlyargs.iter().chain(args.args.iter()) {
        parts.push(arg.def.arg.as_str().to_string());
    }
    if let Some(vararg) = &args.vararg {
        parts.push(format!("*{}", vararg.arg.as_str()));
    }
    for arg in &args.kwonlyargs {
        let name = arg.def.arg.as_str();
        parts.push(format!("{}={}", name, name));
    }
    if let Some(kwarg) = &args.kwarg {
        parts.push(format!("**{}", kwarg.arg.as_str()));
    }
    parts.join(", ")
}

// =============================================================================
// Emission
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn emit_block(
    lines: &[&str],
    funcs: &[FuncInfo],
    start: usize,
    end: usize,
    add_indent: usize,
    protected: &HashSet<usize>,
    mode: WrapMode,
    out: &mut Vec<String>,
) {
    let mut cursor = start;
    for func in funcs {
        for i in cursor..func.start_line {
            push_line(out, lines[i], add_indent, protected.contains(&i));
        }
        emit_function(lines, func, add_indent, protected, mode, out);
        cursor = func.end_line + 1;
    }
    for i in cursor..end {
        push_line(out, lines[i], add_indent, protected.contains(&i));
    }
}

fn emit_function(
    lines: &[&str],
    func: &FuncInfo,
    add_indent: usize,
    protected: &HashSet<usize>,
    mode: WrapMode,
    out: &mut Vec<String>,
) {
    let bi = " ".repeat(func.body_col + add_indent);

    // the line carrying the `def` keyword; decorators come before it
    let def_line = (func.start_line..=func.body_line)
        .find(|&i| {
            let t = lines[i].trim_start();
            t.starts_with("def ") || t.starts_with("async def ")
        })
        .unwrap_or(func.start_line);

    if def_line == func.body_line {
        // `def f(): body` on one line: split at the body column.
        for i in func.start_line..def_line {
            push_line(out, lines[i], add_indent, protected.contains(&i));
        }
        let line = lines[def_line];
        let header = &line[..func.body_col];
        let body = &line[func.body_col..];
        push_line(out, header.trim_end(), add_indent, false);
        // one-liner defs have body_col at the statement, not at an indent
        let bi = " ".repeat(indent_of(line) + INDENT + add_indent);
        emit_prologue_and_try(func, &bi, mode, out);
        out.push(format!("{}{}{}", bi, " ".repeat(INDENT), body.trim_end()));
        emit_except(func, &bi, out);
        return;
    }

    // header (decorators + signature)
    for i in func.start_line..func.body_line {
        push_line(out, lines[i], add_indent, protected.contains(&i));
    }

    // keep a leading docstring outside the try block so __doc__ survives
    let mut body_from = func.body_line;
    if let Some(doc_end) = func.doc_end_line {
        for i in func.body_line..=doc_end {
            push_line(out, lines[i], add_indent, protected.contains(&i));
        }
        body_from = doc_end + 1;
    }

    emit_prologue_and_try(func, &bi, mode, out);

    // original body, one level deeper, nested defs rewritten recursively
    emit_block(
        lines,
        &func.children,
        body_from,
        func.end_line + 1,
        add_indent + INDENT,
        protected,
        mode,
        out,
    );

    emit_except(func, &bi, out);
}

fn emit_prologue_and_try(func: &FuncInfo, bi: &str, mode: WrapMode, out: &mut Vec<String>) {
    match mode {
        WrapMode::UserModule => {
            if func.top_level {
                let ret = if func.is_async { "return await" } else { "return" };
                out.push(format!(
                    "{}if __newt_patch_exists__(\"{}\") and __newt_mode__() == \"0\":",
                    bi, func.name
                ));
                out.push(format!(
                    "{}    {}.__code__ = __newt_load_patch__(\"{}\")",
                    bi, func.name, func.name
                ));
                out.push(format!("{}    {} {}({})", bi, ret, func.name, func.call_args));
            }
        }
        WrapMode::PatchOnly => {
            if func.top_level {
                out.push(format!("{}{}", bi, SHIELD_SENTINEL));
            }
        }
    }
    out.push(format!("{}try:", bi));
}

fn emit_except(func: &FuncInfo, bi: &str, out: &mut Vec<String>) {
    out.push(format!("{}except Exception as __newt_err__:", bi));
    out.push(format!(
        "{}    __newt_on_error__(\"{}\", __newt_err__)",
        bi, func.name
    ));
    out.push(format!("{}    raise", bi));
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn push_line(out: &mut Vec<String>, line: &str, add_indent: usize, protected: bool) {
    if protected || line.trim().is_empty() || add_indent == 0 {
        out.push(line.to_string());
    } else {
        out.push(format!("{}{}", " ".repeat(add_indent), line));
    }
}

// =============================================================================
// Source geometry helpers
// =============================================================================

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0usize];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        Self { starts }
    }

    /// 0-based line containing the byte offset.
    fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(insert) => insert - 1,
        }
    }

    fn line_start(&self, line: usize) -> usize {
        self.starts[line]
    }
}

/// Lines that belong to the interior (or closing line) of a multi-line
/// string literal. Re-indenting those would change the string's content, so
/// the emitter copies them verbatim.
fn string_continuation_lines(lines: &[&str]) -> HashSet<usize> {
    let mut protected = HashSet::new();
    let mut open_delim: Option<&'static str> = None;

    for (lineno, line) in lines.iter().enumerate() {
        let mut rest: &str = line;

        if let Some(delim) = open_delim {
            protected.insert(lineno);
            match rest.find(delim) {
                Some(pos) => {
                    open_delim = None;
                    rest = &rest[pos + delim.len()..];
                }
                None => continue,
            }
        }

        // scan the remainder of the line for an unterminated triple quote
        let mut chars = rest.char_indices().peekable();
        let mut single: Option<char> = None;
        while let Some((i, c)) = chars.next() {
            if let Some(q) = single {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    single = None;
                }
                continue;
            }
            match c {
                '#' => break,
                '\'' | '"' => {
                    let tail = &rest[i..];
                    let delim: &'static str = if c == '"' { "\"\"\"" } else { "'''" };
                    if tail.starts_with(delim) {
                        // consume the opener, look for a same-line closer
                        let after = &tail[3..];
                        match after.find(delim) {
                            Some(close) => {
                                // skip past the closed literal
                                for _ in 0..(2 + 3 + close) {
                                    chars.next();
                                }
                            }
                            None => {
                                open_delim = Some(delim);
                                break;
                            }
                        }
                    } else {
                        single = Some(c);
                    }
                }
                _ => {}
            }
        }
        // an unterminated single-quote string is a backslash continuation or
        // a syntax error; either way the next line is not safe to shift
        if single.is_some() {
            protected.insert(lineno + 1);
        }
    }

    protected
}

// =============================================================================
// AST lookups shared with the repair pipeline
// =============================================================================

/// Source text of the named module-top-level function, decorators included.
pub fn extract_function_source(source: &str, func_name: &str) -> Result<String> {
    let suite = parse_program(source, "<target>")
        .map_err(|e| anyhow!("Failed to parse target module: {}", e))?;
    let index = LineIndex::new(source);
    let lines: Vec<&str> = source.split('\n').collect();

    for stmt in &suite {
        let (name, range) = match stmt {
            ast::Stmt::FunctionDef(def) => (def.name.as_str(), def.range),
            ast::Stmt::AsyncFunctionDef(def) => (def.name.as_str(), def.range),
            _ => continue,
        };
        if name == func_name {
            let start = index.line_of(range.start().to_usize());
            let end = index.line_of(range.end().to_usize().saturating_sub(1));
            return Ok(lines[start..=end].join("\n"));
        }
    }
    Err(anyhow!("Function {} not found at module top level", func_name))
}

/// Name of the module-top-level function whose span covers `lineno`
/// (1-based). Used to retarget a crash in a lexically nested function to
/// its enclosing, re-bindable top-level function. Methods do not qualify.
pub fn enclosing_toplevel_function(source: &str, lineno: usize) -> Option<String> {
    let suite = parse_program(source, "<target>").ok()?;
    let index = LineIndex::new(source);

    for stmt in &suite {
        let (name, range) = match stmt {
            ast::Stmt::FunctionDef(def) => (def.name.as_str(), def.range),
            ast::Stmt::AsyncFunctionDef(def) => (def.name.as_str(), def.range),
            _ => continue,
        };
        let start = index.line_of(range.start().to_usize()) + 1;
        let end = index.line_of(range.end().to_usize().saturating_sub(1)) + 1;
        if start <= lineno && lineno <= end {
            return Some(name.to_string());
        }
    }
    None
}

// =============================================================================
// Unit Tests
// =============================================================================
