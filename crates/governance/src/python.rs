//! Python syntax-tree front end.
//!
//! Parses tool sources into a syntax tree without executing anything and
//! answers two questions about it: which modules does it import (directly,
//! through aliases, or through `__import__` / `importlib.import_module`
//! calls with literal names), and which functions does it declare as tools.

use rustpython_parser::{ast, Parse};
use serde_json::{json, Map, Value};

use agent_sandbox_core::{Error, Result};

/// How a module reference was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportForm {
    /// `import a.b as c`
    Import,
    /// `from a.b import c`
    From,
    /// `__import__("a")`
    DunderImport,
    /// `importlib.import_module("a")`
    ImportModule,
}

impl ImportForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::From => "from",
            Self::DunderImport => "__import__",
            Self::ImportModule => "importlib",
        }
    }
}

/// A module referenced by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub module: String,
    pub line: usize,
    pub form: ImportForm,
}

/// A function declared as a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    /// Registered tool name.
    pub name: String,
    /// Python function to call.
    pub function: String,
    pub description: String,
    /// JSON Schema derived from the signature.
    pub parameters: Value,
    pub line: usize,
}

/// A parsed, never-executed Python module.
#[derive(Debug, Clone)]
pub struct ParsedModule {
    file: String,
    source: String,
    body: Vec<ast::Stmt>,
    line_starts: Vec<usize>,
}

impl ParsedModule {
    /// Parse `source`. Failure is `Error::Syntax`.
    pub fn parse(file: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        let file = file.into();
        let source = source.into();
        let line_starts = line_starts(&source);

        let body = ast::Suite::parse(&source, &file).map_err(|e| {
            let offset = u32::from(e.offset) as usize;
            Error::Syntax {
                file: file.clone(),
                message: format!("{} (line {})", e.error, line_of(&line_starts, offset)),
            }
        })?;

        Ok(Self {
            file,
            source,
            body,
            line_starts,
        })
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// The exact text that was parsed.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every module reference, in source order.
    pub fn imports(&self) -> Vec<ImportRef> {
        let mut collector = ImportCollector {
            module: self,
            found: Vec::new(),
        };
        collector.walk_body(&self.body);
        collector.found
    }

    /// Top-level functions decorated with `@tool`.
    pub fn entry_points(&self) -> std::result::Result<Vec<EntryPoint>, String> {
        let mut entries = Vec::new();
        for stmt in &self.body {
            let (name, args, body, decorators, range) = match stmt {
                ast::Stmt::FunctionDef(ast::StmtFunctionDef {
                    name,
                    args,
                    body,
                    decorator_list,
                    range,
                    ..
                }) => (name, args, body, decorator_list, range),
                ast::Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef {
                    name,
                    args,
                    body,
                    decorator_list,
                    range,
                    ..
                }) => (name, args, body, decorator_list, range),
                _ => continue,
            };

            let Some(decorator) = decorators.iter().find(|d| is_tool_decorator(d)) else {
                continue;
            };

            let function = name.as_str().to_string();
            let line = self.line(usize::from(range.start()));
            let overrides = decorator_overrides(decorator)
                .map_err(|e| format!("{} (function '{}', line {})", e, function, line))?;

            let description = overrides
                .description
                .or_else(|| docstring(body))
                .unwrap_or_default();

            entries.push(EntryPoint {
                name: overrides.name.unwrap_or_else(|| function.clone()),
                function,
                description,
                parameters: parameters_schema(args),
                line,
            });
        }
        Ok(entries)
    }

    fn line(&self, offset: usize) -> usize {
        line_of(&self.line_starts, offset)
    }
}

fn line_starts(source: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// 1-based line containing byte `offset`.
fn line_of(starts: &[usize], offset: usize) -> usize {
    match starts.binary_search(&offset) {
        Ok(idx) => idx + 1,
        Err(idx) => idx,
    }
}

// =============================================================================
// Import collection
// =============================================================================

struct ImportCollector<'a> {
    module: &'a ParsedModule,
    found: Vec<ImportRef>,
}

// Both walkers match exhaustively so that a new node kind fails to compile
// instead of silently hiding a call from the scan.
impl ImportCollector<'_> {
    fn push(&mut self, module: &str, offset: usize, form: ImportForm) {
        let line = self.module.line(offset);
        self.found.push(ImportRef {
            module: module.to_string(),
            line,
            form,
        });
    }

    fn walk_body(&mut self, body: &[ast::Stmt]) {
        for stmt in body {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &ast::Stmt) {
        match stmt {
            ast::Stmt::Import(ast::StmtImport { names, range }) => {
                for alias in names {
                    self.push(alias.name.as_str(), usize::from(range.start()), ImportForm::Import);
                }
            }
            ast::Stmt::ImportFrom(ast::StmtImportFrom {
                module,
                names,
                level,
                range,
            }) => {
                if level.as_ref().is_some_and(|l| l.to_u32() > 0) {
                    return;
                }
                if let Some(module) = module {
                    let start = usize::from(range.start());
                    let base = module.as_str();
                    self.push(base, start, ImportForm::From);
                    // `from os import path` also reaches `os.path`
                    for alias in names {
                        let name = alias.name.as_str();
                        if name != "*" {
                            self.push(&format!("{}.{}", base, name), start, ImportForm::From);
                        }
                    }
                }
            }
            ast::Stmt::FunctionDef(ast::StmtFunctionDef {
                args,
                body,
                decorator_list,
                returns,
                type_params,
                ..
            })
            | ast::Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef {
                args,
                body,
                decorator_list,
                returns,
                type_params,
                ..
            }) => {
                self.walk_exprs(decorator_list);
                self.walk_type_params(type_params);
                self.walk_arguments(args);
                self.walk_opt(returns.as_deref());
                self.walk_body(body);
            }
            ast::Stmt::ClassDef(ast::StmtClassDef {
                bases,
                keywords,
                body,
                decorator_list,
                type_params,
                ..
            }) => {
                self.walk_exprs(decorator_list);
                self.walk_type_params(type_params);
                self.walk_exprs(bases);
                self.walk_keywords(keywords);
                self.walk_body(body);
            }
            ast::Stmt::Return(ast::StmtReturn { value, .. }) => self.walk_opt(value.as_deref()),
            ast::Stmt::Delete(ast::StmtDelete { targets, .. }) => self.walk_exprs(targets),
            ast::Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                self.walk_exprs(targets);
                self.walk_expr(value);
            }
            ast::Stmt::TypeAlias(ast::StmtTypeAlias {
                name,
                type_params,
                value,
                ..
            }) => {
                self.walk_expr(name);
                self.walk_type_params(type_params);
                self.walk_expr(value);
            }
            ast::Stmt::AugAssign(ast::StmtAugAssign { target, value, .. }) => {
                self.walk_expr(target);
                self.walk_expr(value);
            }
            ast::Stmt::AnnAssign(ast::StmtAnnAssign {
                target,
                annotation,
                value,
                ..
            }) => {
                self.walk_expr(target);
                self.walk_expr(annotation);
                self.walk_opt(value.as_deref());
            }
            ast::Stmt::For(ast::StmtFor {
                target,
                iter,
                body,
                orelse,
                ..
            })
            | ast::Stmt::AsyncFor(ast::StmtAsyncFor {
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                self.walk_expr(target);
                self.walk_expr(iter);
                self.walk_body(body);
                self.walk_body(orelse);
            }
            ast::Stmt::While(ast::StmtWhile {
                test, body, orelse, ..
            })
            | ast::Stmt::If(ast::StmtIf {
                test, body, orelse, ..
            }) => {
                self.walk_expr(test);
                self.walk_body(body);
                self.walk_body(orelse);
            }
            ast::Stmt::With(ast::StmtWith { items, body, .. })
            | ast::Stmt::AsyncWith(ast::StmtAsyncWith { items, body, .. }) => {
                for item in items {
                    self.walk_expr(&item.context_expr);
                    self.walk_opt(item.optional_vars.as_deref());
                }
                self.walk_body(body);
            }
            ast::Stmt::Match(ast::StmtMatch { subject, cases, .. }) => {
                self.walk_expr(subject);
                for case in cases {
                    self.walk_pattern(&case.pattern);
                    self.walk_opt(case.guard.as_deref());
                    self.walk_body(&case.body);
                }
            }
            ast::Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
                self.walk_opt(exc.as_deref());
                self.walk_opt(cause.as_deref());
            }
            ast::Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            })
            | ast::Stmt::TryStar(ast::StmtTryStar {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => {
                self.walk_body(body);
                for handler in handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    self.walk_opt(h.type_.as_deref());
                    self.walk_body(&h.body);
                }
                self.walk_body(orelse);
                self.walk_body(finalbody);
            }
            ast::Stmt::Assert(ast::StmtAssert { test, msg, .. }) => {
                self.walk_expr(test);
                self.walk_opt(msg.as_deref());
            }
            ast::Stmt::Expr(ast::StmtExpr { value, .. }) => self.walk_expr(value),
            ast::Stmt::Global(_)
            | ast::Stmt::Nonlocal(_)
            | ast::Stmt::Pass(_)
            | ast::Stmt::Break(_)
            | ast::Stmt::Continue(_) => {}
        }
    }

    fn walk_exprs(&mut self, exprs: &[ast::Expr]) {
        for expr in exprs {
            self.walk_expr(expr);
        }
    }

    fn walk_opt(&mut self, expr: Option<&ast::Expr>) {
        if let Some(expr) = expr {
            self.walk_expr(expr);
        }
    }

    fn walk_keywords(&mut self, keywords: &[ast::Keyword]) {
        for keyword in keywords {
            self.walk_expr(&keyword.value);
        }
    }

    /// Defaults and annotations are evaluated when the `def` runs.
    fn walk_arguments(&mut self, args: &ast::Arguments) {
        for arg in args.posonlyargs.iter().chain(&args.args).chain(&args.kwonlyargs) {
            self.walk_opt(arg.def.annotation.as_deref());
            self.walk_opt(arg.default.as_deref());
        }
        for arg in args.vararg.iter().chain(&args.kwarg) {
            self.walk_opt(arg.annotation.as_deref());
        }
    }

    fn walk_type_params(&mut self, params: &[ast::TypeParam]) {
        for param in params {
            match param {
                ast::TypeParam::TypeVar(ast::TypeParamTypeVar { bound, .. }) => {
                    self.walk_opt(bound.as_deref())
                }
                ast::TypeParam::ParamSpec(_) | ast::TypeParam::TypeVarTuple(_) => {}
            }
        }
    }

    fn walk_generators(&mut self, generators: &[ast::Comprehension]) {
        for generator in generators {
            self.walk_expr(&generator.target);
            self.walk_expr(&generator.iter);
            self.walk_exprs(&generator.ifs);
        }
    }

    fn walk_pattern(&mut self, pattern: &ast::Pattern) {
        match pattern {
            ast::Pattern::MatchValue(ast::PatternMatchValue { value, .. }) => self.walk_expr(value),
            ast::Pattern::MatchSequence(ast::PatternMatchSequence { patterns, .. })
            | ast::Pattern::MatchOr(ast::PatternMatchOr { patterns, .. }) => {
                for p in patterns {
                    self.walk_pattern(p);
                }
            }
            ast::Pattern::MatchMapping(ast::PatternMatchMapping { keys, patterns, .. }) => {
                self.walk_exprs(keys);
                for p in patterns {
                    self.walk_pattern(p);
                }
            }
            ast::Pattern::MatchClass(ast::PatternMatchClass {
                cls,
                patterns,
                kwd_patterns,
                ..
            }) => {
                self.walk_expr(cls);
                for p in patterns.iter().chain(kwd_patterns) {
                    self.walk_pattern(p);
                }
            }
            ast::Pattern::MatchAs(ast::PatternMatchAs { pattern, .. }) => {
                if let Some(p) = pattern {
                    self.walk_pattern(p);
                }
            }
            ast::Pattern::MatchSingleton(_) | ast::Pattern::MatchStar(_) => {}
        }
    }

    fn walk_expr(&mut self, expr: &ast::Expr) {
        match expr {
            ast::Expr::Call(ast::ExprCall {
                func,
                args,
                keywords,
                range,
            }) => {
                if let Some(form) = dynamic_import_form(func) {
                    if let Some(name) = args.first().and_then(string_literal) {
                        self.push(&name, usize::from(range.start()), form);
                    }
                }
                self.walk_expr(func);
                self.walk_exprs(args);
                self.walk_keywords(keywords);
            }
            ast::Expr::Attribute(ast::ExprAttribute { value, .. })
            | ast::Expr::Await(ast::ExprAwait { value, .. })
            | ast::Expr::Starred(ast::ExprStarred { value, .. })
            | ast::Expr::YieldFrom(ast::ExprYieldFrom { value, .. }) => self.walk_expr(value),
            ast::Expr::FormattedValue(ast::ExprFormattedValue {
                value, format_spec, ..
            }) => {
                self.walk_expr(value);
                self.walk_opt(format_spec.as_deref());
            }
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.walk_expr(value);
                self.walk_expr(slice);
            }
            ast::Expr::Slice(ast::ExprSlice {
                lower, upper, step, ..
            }) => {
                self.walk_opt(lower.as_deref());
                self.walk_opt(upper.as_deref());
                self.walk_opt(step.as_deref());
            }
            ast::Expr::BinOp(ast::ExprBinOp { left, right, .. }) => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            ast::Expr::UnaryOp(ast::ExprUnaryOp { operand, .. }) => self.walk_expr(operand),
            ast::Expr::BoolOp(ast::ExprBoolOp { values, .. })
            | ast::Expr::JoinedStr(ast::ExprJoinedStr { values, .. }) => self.walk_exprs(values),
            ast::Expr::NamedExpr(ast::ExprNamedExpr { target, value, .. }) => {
                self.walk_expr(target);
                self.walk_expr(value);
            }
            ast::Expr::Lambda(ast::ExprLambda { args, body, .. }) => {
                self.walk_arguments(args);
                self.walk_expr(body);
            }
            ast::Expr::IfExp(ast::ExprIfExp {
                test, body, orelse, ..
            }) => {
                self.walk_expr(test);
                self.walk_expr(body);
                self.walk_expr(orelse);
            }
            ast::Expr::Compare(ast::ExprCompare {
                left, comparators, ..
            }) => {
                self.walk_expr(left);
                self.walk_exprs(comparators);
            }
            ast::Expr::List(ast::ExprList { elts, .. })
            | ast::Expr::Tuple(ast::ExprTuple { elts, .. })
            | ast::Expr::Set(ast::ExprSet { elts, .. }) => self.walk_exprs(elts),
            ast::Expr::Dict(ast::ExprDict { keys, values, .. }) => {
                for key in keys.iter().flatten() {
                    self.walk_expr(key);
                }
                self.walk_exprs(values);
            }
            ast::Expr::ListComp(ast::ExprListComp {
                elt, generators, ..
            })
            | ast::Expr::SetComp(ast::ExprSetComp {
                elt, generators, ..
            })
            | ast::Expr::GeneratorExp(ast::ExprGeneratorExp {
                elt, generators, ..
            }) => {
                self.walk_generators(generators);
                self.walk_expr(elt);
            }
            ast::Expr::DictComp(ast::ExprDictComp {
                key,
                value,
                generators,
                ..
            }) => {
                self.walk_generators(generators);
                self.walk_expr(key);
                self.walk_expr(value);
            }
            ast::Expr::Yield(ast::ExprYield { value, .. }) => self.walk_opt(value.as_deref()),
            ast::Expr::Constant(_) | ast::Expr::Name(_) => {}
        }
    }
}

/// `__import__(...)` or `importlib.import_module(...)`.
fn dynamic_import_form(func: &ast::Expr) -> Option<ImportForm> {
    match func {
        ast::Expr::Name(ast::ExprName { id, .. }) if id.as_str() == "__import__" => {
            Some(ImportForm::DunderImport)
        }
        ast::Expr::Name(ast::ExprName { id, .. }) if id.as_str() == "import_module" => {
            Some(ImportForm::ImportModule)
        }
        ast::Expr::Attribute(ast::ExprAttribute { attr, .. })
            if attr.as_str() == "import_module" || attr.as_str() == "__import__" =>
        {
            Some(ImportForm::ImportModule)
        }
        _ => None,
    }
}

fn string_literal(expr: &ast::Expr) -> Option<String> {
    match expr {
        ast::Expr::Constant(ast::ExprConstant {
            value: ast::Constant::Str(s),
            ..
        }) => Some(s.clone()),
        _ => None,
    }
}

// =============================================================================
// Entry points
// =============================================================================

fn is_tool_name(expr: &ast::Expr) -> bool {
    match expr {
        ast::Expr::Name(ast::ExprName { id, .. }) => id.as_str() == "tool",
        ast::Expr::Attribute(ast::ExprAttribute { attr, .. }) => attr.as_str() == "tool",
        _ => false,
    }
}

fn is_tool_decorator(expr: &ast::Expr) -> bool {
    match expr {
        ast::Expr::Call(ast::ExprCall { func, .. }) => is_tool_name(func),
        other => is_tool_name(other),
    }
}

#[derive(Default)]
struct DecoratorOverrides {
    name: Option<String>,
    description: Option<String>,
}

fn decorator_overrides(decorator: &ast::Expr) -> std::result::Result<DecoratorOverrides, String> {
    let mut overrides = DecoratorOverrides::default();
    let ast::Expr::Call(ast::ExprCall { args, keywords, .. }) = decorator else {
        return Ok(overrides);
    };

    if let Some(first) = args.first() {
        overrides.name =
            Some(string_literal(first).ok_or("tool name must be a string literal")?);
    }
    for keyword in keywords {
        let Some(arg) = keyword.arg.as_ref() else {
            continue;
        };
        match arg.as_str() {
            "name" => {
                overrides.name = Some(
                    string_literal(&keyword.value).ok_or("tool name must be a string literal")?,
                )
            }
            "description" => overrides.description = string_literal(&keyword.value),
            _ => {}
        }
    }

    if let Some(ref name) = overrides.name {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(format!("invalid tool name '{}'", name));
        }
    }
    Ok(overrides)
}

fn docstring(body: &[ast::Stmt]) -> Option<String> {
    match body.first()? {
        ast::Stmt::Expr(ast::StmtExpr { value, .. }) => {
            string_literal(value).map(|s| s.trim().to_string())
        }
        _ => None,
    }
}

fn annotation_type(annotation: Option<&ast::Expr>) -> Option<&'static str> {
    let ast::Expr::Name(ast::ExprName { id, .. }) = annotation? else {
        return None;
    };
    match id.as_str() {
        "str" => Some("string"),
        "int" => Some("integer"),
        "float" => Some("number"),
        "bool" => Some("boolean"),
        "list" => Some("array"),
        "dict" => Some("object"),
        _ => None,
    }
}

fn parameters_schema(args: &ast::Arguments) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for arg in args.posonlyargs.iter().chain(&args.args).chain(&args.kwonlyargs) {
        let name = arg.def.arg.as_str();
        if name == "self" {
            continue;
        }
        let mut schema = Map::new();
        if let Some(ty) = annotation_type(arg.def.annotation.as_deref()) {
            schema.insert("type".into(), Value::String(ty.into()));
        }
        properties.insert(name.to_string(), Value::Object(schema));
        if arg.default.is_none() {
            required.push(Value::String(name.to_string()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(source: &str) -> Vec<String> {
        ParsedModule::parse("t.py", source)
            .unwrap()
            .imports()
            .into_iter()
            .map(|i| i.module)
            .collect()
    }

    #[test]
    fn test_syntax_error() {
        let err = ParsedModule::parse("bad.py", "def broken(:\n    pass\n").unwrap_err();
        assert!(matches!(err, Error::Syntax { ref file, .. } if file == "bad.py"));
    }

    #[test]
    fn test_direct_and_aliased_imports() {
        let found = modules("import os\nimport json as j, subprocess as sp\nimport os.path\n");
        assert_eq!(found, vec!["os", "json", "subprocess", "os.path"]);
    }

    #[test]
    fn test_from_imports() {
        let found = modules("from os import path, getcwd\nfrom . import sibling\nfrom .pkg import x\n");
        assert_eq!(found, vec!["os", "os.path", "os.getcwd"]);
    }

    #[test]
    fn test_nested_imports() {
        let source = r#"
def f():
    try:
        import socket
    except ImportError:
        pass

class C:
    def m(self):
        if True:
            from subprocess import run
"#;
        assert_eq!(modules(source), vec!["socket", "subprocess", "subprocess.run"]);
    }

    #[test]
    fn test_dynamic_imports() {
        let source = r#"
m = __import__("os")
import importlib
x = importlib.import_module("socket").socket()
print(__import__(name))
"#;
        let found = ParsedModule::parse("t.py", source).unwrap().imports();
        let names: Vec<_> = found.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(names, vec!["os", "importlib", "socket"]);
        assert_eq!(found[0].form, ImportForm::DunderImport);
        assert_eq!(found[0].line, 2);
        assert_eq!(found[2].form, ImportForm::ImportModule);
    }

    #[test]
    fn test_dynamic_imports_in_every_position() {
        let cases = [
            ("default argument", "def f(x=__import__('subprocess')):\n    pass\n"),
            ("keyword-only default", "def f(*, x=__import__('subprocess')):\n    pass\n"),
            ("annotation", "def f(x: __import__('os')):\n    pass\n"),
            ("return annotation", "def f() -> __import__('os'):\n    pass\n"),
            ("lambda default", "g = lambda m=__import__('os'): m\n"),
            ("class keyword", "class C(metaclass=__import__('os')):\n    pass\n"),
            ("dict key", "d = {__import__('subprocess'): 1}\n"),
            ("dict comprehension", "d = {k: __import__('subprocess') for k in [1]}\n"),
            ("comprehension iterable", "xs = [y for y in __import__('os').listdir()]\n"),
            ("slice bound", "xs = [1, 2][__import__('os').sep:]\n"),
            ("del target", "del __import__('os').environ['X']\n"),
            ("match guard", "match 1:\n    case 1 if __import__('os'):\n        pass\n"),
            ("with target", "with open('f') as __import__('os').x:\n    pass\n"),
            ("except type", "try:\n    pass\nexcept __import__('os').error:\n    pass\n"),
            ("raise cause", "raise ValueError() from __import__('os')\n"),
            ("assert message", "assert True, __import__('os')\n"),
            ("walrus target side", "if (m := __import__('os')):\n    pass\n"),
            ("augmented target", "__import__('os').x += 1\n"),
            ("annotated assignment", "x: __import__('os') = 1\n"),
        ];

        for (position, source) in cases {
            let found = modules(source);
            assert!(
                found.iter().any(|m| m == "os" || m == "subprocess"),
                "{}: no import reported in {:?}",
                position,
                source
            );
        }
    }

    #[test]
    fn test_line_numbers() {
        let found = ParsedModule::parse("t.py", "\n\nimport os\n").unwrap().imports();
        assert_eq!(found[0].line, 3);
    }

    #[test]
    fn test_entry_points() {
        let source = r#"
from agent_tools import tool

@tool
def add(a: int, b: int = 2) -> int:
    """Add two numbers."""
    return a + b

@tool("shout", description="Upper-case text")
async def _shout(text: str):
    return text.upper()

def helper():
    pass
"#;
        let module = ParsedModule::parse("math.py", source).unwrap();
        let entries = module.entry_points().unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].name, "add");
        assert_eq!(entries[0].description, "Add two numbers.");
        assert_eq!(entries[0].parameters["properties"]["a"]["type"], "integer");
        assert_eq!(entries[0].parameters["required"], json!(["a"]));

        assert_eq!(entries[1].name, "shout");
        assert_eq!(entries[1].function, "_shout");
        assert_eq!(entries[1].description, "Upper-case text");
    }

    #[test]
    fn test_entry_point_name_must_be_literal() {
        let source = "NAME = 'x'\n@tool(NAME)\ndef f():\n    pass\n";
        let module = ParsedModule::parse("t.py", source).unwrap();
        assert!(module.entry_points().unwrap_err().contains("string literal"));
    }
}
