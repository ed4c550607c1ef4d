//! Compiled-bundle file format (spec §4.8, §6.3): a base64-wrapped JSON
//! document carrying the parsed AST of an entry module and every module it
//! transitively imports, so a host can ship `.caml` instead of a tree of
//! `.aml` files plus a filesystem to search.
//!
//! `serde_json`'s externally-tagged enum representation already gives every
//! AST node the `{"VariantName": {fields...}}` shape the spec's `_t`/field
//! encoding calls for (DESIGN.md records this as the chosen equivalent
//! rather than hand-rolling a parallel `_t`-keyed encoding); `base64` wraps
//! the whole document exactly as spec §4.8 describes.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ast::{Expr, Param, Program, Stmt};
use crate::error::AmlError;

pub const BUNDLE_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct Bundle {
    pub version: String,
    pub entry: String,
    pub modules: BTreeMap<String, Program>,
    pub obfuscated: bool,
}

impl Bundle {
    pub fn new(entry: impl Into<String>, modules: BTreeMap<String, Program>, obfuscated: bool) -> Self {
        Self { version: BUNDLE_VERSION.to_owned(), entry: entry.into(), modules, obfuscated }
    }

    pub fn encode(&self) -> Result<String, AmlError> {
        let json = serde_json::to_vec(self).map_err(|e| AmlError::module_load_error("<bundle>", e, 0, 0))?;
        Ok(BASE64.encode(json))
    }

    pub fn decode(text: &str) -> Result<Self, AmlError> {
        let json = BASE64.decode(text.trim()).map_err(|e| AmlError::module_load_error("<bundle>", e, 0, 0))?;
        serde_json::from_slice(&json).map_err(|e| AmlError::module_load_error("<bundle>", e, 0, 0))
    }
}

/// Reserved names an obfuscation pass must never rename: keywords aren't
/// identifiers so they never appear here, but built-in function names and
/// well-known host attributes (`self`, `args`, `runtime`, `meta`) have to
/// keep resolving to what host code and builtins expect even after a bundle
/// round-trip (SPEC_FULL §4.8: "reserved built-in names and host-attribute
/// names are preserved").
pub fn reserved_names() -> std::collections::HashSet<&'static str> {
    [
        "self", "args", "runtime", "meta", "print", "len", "str", "int", "float", "bool", "type", "abs", "min",
        "max", "signal", "effect", "import", "exit", "exit_now", "range", "tick",
    ]
    .into_iter()
    .collect()
}

/// Remaps every declared name (vars, consts, function/parameter names,
/// namespace names, comprehension loop variables) to a short stable
/// identifier, skipping [`reserved_names`]. Operates on an already-resolved
/// `Program`: renaming only ever touches display names, never the
/// `(depth, index)` addresses resolution already assigned, so it's safe to
/// run right before bundling and never again afterward.
pub fn obfuscate(program: &mut Program) {
    let reserved = reserved_names();
    let mut mapping: IndexMap<String, String> = IndexMap::new();
    collect_names(&program.statements, &reserved, &mut mapping);
    for (old, new) in mapping.iter() {
        rename_in_statements(&mut program.statements, old, new);
    }
}

fn next_short_name(mapping: &IndexMap<String, String>) -> String {
    fn to_base36(mut n: usize) -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut out = Vec::new();
        loop {
            out.push(ALPHABET[n % 36]);
            n /= 36;
            if n == 0 {
                break;
            }
        }
        out.reverse();
        String::from_utf8(out).unwrap()
    }
    format!("_{}", to_base36(mapping.len()))
}

fn register(name: &str, reserved: &std::collections::HashSet<&'static str>, mapping: &mut IndexMap<String, String>) {
    if reserved.contains(name) || mapping.contains_key(name) {
        return;
    }
    let short = next_short_name(mapping);
    mapping.insert(name.to_owned(), short);
}

fn collect_names(stmts: &[Stmt], reserved: &std::collections::HashSet<&'static str>, mapping: &mut IndexMap<String, String>) {
    for stmt in stmts {
        match stmt {
            Stmt::VarDecl { name, value, .. } | Stmt::ConstDecl { name, value, .. } => {
                register(name, reserved, mapping);
                collect_names_expr(value, reserved, mapping);
            }
            Stmt::FunctionDecl(decl) => {
                if decl.ns_path.is_empty() {
                    register(&decl.name, reserved, mapping);
                }
                for p in &decl.params {
                    register(p.name(), reserved, mapping);
                    if let Param::Default(_, default) = p {
                        collect_names_expr(default, reserved, mapping);
                    }
                }
                collect_names(&decl.body, reserved, mapping);
            }
            Stmt::NamespaceDecl { name, body, .. } => {
                register(name, reserved, mapping);
                collect_names(body, reserved, mapping);
            }
            Stmt::MetadataDecl { entries, .. } => {
                for (_, v) in entries {
                    collect_names_expr(v, reserved, mapping);
                }
            }
            Stmt::ImportPy { .. } | Stmt::ImportAml { .. } => {}
            Stmt::Assign(a) => collect_names_expr(&a.value, reserved, mapping),
            Stmt::If { cond, then_body, else_body, .. } => {
                collect_names_expr(cond, reserved, mapping);
                collect_names(then_body, reserved, mapping);
                if let Some(e) = else_body {
                    collect_names(e, reserved, mapping);
                }
            }
            Stmt::While { cond, body, .. } => {
                collect_names_expr(cond, reserved, mapping);
                collect_names(body, reserved, mapping);
            }
            Stmt::For { var_name, iterable, body, .. } => {
                register(var_name, reserved, mapping);
                collect_names_expr(iterable, reserved, mapping);
                collect_names(body, reserved, mapping);
            }
            Stmt::Return { value: Some(v), .. } => collect_names_expr(v, reserved, mapping),
            Stmt::Return { value: None, .. } => {}
            Stmt::Raise { value, .. } => collect_names_expr(value, reserved, mapping),
            Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::TryCatch { try_body, catch_body, .. } => {
                collect_names(try_body, reserved, mapping);
                collect_names(catch_body, reserved, mapping);
            }
            Stmt::Parallel { calls, .. } => {
                for c in calls {
                    collect_names_expr(c, reserved, mapping);
                }
            }
            Stmt::ExprStmt(e) => collect_names_expr(e, reserved, mapping),
        }
    }
}

fn collect_names_expr(expr: &Expr, reserved: &std::collections::HashSet<&'static str>, mapping: &mut IndexMap<String, String>) {
    match expr {
        Expr::ListComprehension { expr: body, var_name, iterable, cond, .. } => {
            register(var_name, reserved, mapping);
            collect_names_expr(iterable, reserved, mapping);
            collect_names_expr(body, reserved, mapping);
            if let Some(c) = cond {
                collect_names_expr(c, reserved, mapping);
            }
        }
        Expr::DictComprehension { key, value, var_name, iterable, cond, .. } => {
            register(var_name, reserved, mapping);
            collect_names_expr(iterable, reserved, mapping);
            collect_names_expr(key, reserved, mapping);
            collect_names_expr(value, reserved, mapping);
            if let Some(c) = cond {
                collect_names_expr(c, reserved, mapping);
            }
        }
        Expr::ListLiteral(items, _) => items.iter().for_each(|i| collect_names_expr(i, reserved, mapping)),
        Expr::DictLiteral(pairs, _) => pairs.iter().for_each(|(k, v)| {
            collect_names_expr(k, reserved, mapping);
            collect_names_expr(v, reserved, mapping);
        }),
        Expr::Index { target, index, .. } => {
            collect_names_expr(target, reserved, mapping);
            collect_names_expr(index, reserved, mapping);
        }
        Expr::Attribute { target, .. } => collect_names_expr(target, reserved, mapping),
        Expr::Binary { left, right, .. } => {
            collect_names_expr(left, reserved, mapping);
            collect_names_expr(right, reserved, mapping);
        }
        Expr::Unary { expr, .. } | Expr::Pointer { target: expr, .. } | Expr::Spawn { call: expr, .. } => {
            collect_names_expr(expr, reserved, mapping)
        }
        Expr::Range { start, end, .. } => {
            collect_names_expr(start, reserved, mapping);
            collect_names_expr(end, reserved, mapping);
        }
        Expr::Call { callee, args, kwargs, .. } => {
            collect_names_expr(callee, reserved, mapping);
            args.iter().for_each(|a| collect_names_expr(a, reserved, mapping));
            kwargs.iter().for_each(|(_, v)| collect_names_expr(v, reserved, mapping));
        }
        Expr::MethodCall { object, args, kwargs, .. } => {
            collect_names_expr(object, reserved, mapping);
            args.iter().for_each(|a| collect_names_expr(a, reserved, mapping));
            kwargs.iter().for_each(|(_, v)| collect_names_expr(v, reserved, mapping));
        }
        Expr::PyClassInstance { args, kwargs, .. } => {
            args.iter().for_each(|a| collect_names_expr(a, reserved, mapping));
            kwargs.iter().for_each(|(_, v)| collect_names_expr(v, reserved, mapping));
        }
        Expr::Literal(..) | Expr::Identifier(..) => {}
    }
}

/// Renames every declaration site and `Addr`/`ns_path`/`var_name` occurrence
/// of `old` to `new` in place.
fn rename_in_statements(stmts: &mut [Stmt], old: &str, new: &str) {
    for stmt in stmts {
        match stmt {
            Stmt::VarDecl { name, value, .. } | Stmt::ConstDecl { name, value, .. } => {
                if name == old {
                    *name = new.to_owned();
                }
                rename_in_expr(value, old, new);
            }
            Stmt::FunctionDecl(decl) => {
                // Arc<FunctionDecl>: obfuscation runs once, pre-bundling, on a
                // tree no evaluator is executing, so a unique-or-cloned
                // make_mut is safe here.
                let decl = std::sync::Arc::make_mut(decl);
                if decl.name == old {
                    decl.name = new.to_owned();
                }
                for seg in &mut decl.ns_path {
                    if seg == old {
                        *seg = new.to_owned();
                    }
                }
                for p in &mut decl.params {
                    match p {
                        Param::Required(n) => {
                            if n == old {
                                *n = new.to_owned();
                            }
                        }
                        Param::Default(n, default) => {
                            if n == old {
                                *n = new.to_owned();
                            }
                            rename_in_expr(default, old, new);
                        }
                    }
                }
                rename_in_statements(&mut decl.body, old, new);
            }
            Stmt::NamespaceDecl { name, body, .. } => {
                if name == old {
                    *name = new.to_owned();
                }
                rename_in_statements(body, old, new);
            }
            Stmt::MetadataDecl { entries, .. } => entries.iter_mut().for_each(|(_, v)| rename_in_expr(v, old, new)),
            Stmt::ImportPy { .. } | Stmt::ImportAml { .. } => {}
            Stmt::Assign(a) => {
                rename_in_expr(&mut a.value, old, new);
                match &mut a.target {
                    crate::ast::AssignTarget::Name(addr) => {
                        if addr.name == old {
                            // Addr carries resolved (depth, index) already;
                            // only the display name changes.
                            let (d, i) = addr.get();
                            let replaced = crate::ast::Addr::new(new.to_owned());
                            replaced.set(d, i);
                            *addr = replaced;
                        }
                    }
                    crate::ast::AssignTarget::Attribute { object, .. } => rename_in_expr(object, old, new),
                    crate::ast::AssignTarget::Index { object, index } => {
                        rename_in_expr(object, old, new);
                        rename_in_expr(index, old, new);
                    }
                }
            }
            Stmt::If { cond, then_body, else_body, .. } => {
                rename_in_expr(cond, old, new);
                rename_in_statements(then_body, old, new);
                if let Some(e) = else_body {
                    rename_in_statements(e, old, new);
                }
            }
            Stmt::While { cond, body, .. } => {
                rename_in_expr(cond, old, new);
                rename_in_statements(body, old, new);
            }
            Stmt::For { var_name, iterable, body, .. } => {
                if var_name == old {
                    *var_name = new.to_owned();
                }
                rename_in_expr(iterable, old, new);
                rename_in_statements(body, old, new);
            }
            Stmt::Return { value: Some(v), .. } => rename_in_expr(v, old, new),
            Stmt::Return { value: None, .. } => {}
            Stmt::Raise { value, .. } => rename_in_expr(value, old, new),
            Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::TryCatch { try_body, catch_body, .. } => {
                rename_in_statements(try_body, old, new);
                rename_in_statements(catch_body, old, new);
            }
            Stmt::Parallel { calls, .. } => calls.iter_mut().for_each(|c| rename_in_expr(c, old, new)),
            Stmt::ExprStmt(e) => rename_in_expr(e, old, new),
        }
    }
}

fn rename_in_expr(expr: &mut Expr, old: &str, new: &str) {
    match expr {
        Expr::Identifier(addr, span) => {
            if addr.name == old {
                let (d, i) = addr.get();
                let replaced = crate::ast::Addr::new(new.to_owned());
                replaced.set(d, i);
                *expr = Expr::Identifier(std::sync::Arc::new(replaced), *span);
            }
        }
        Expr::ListComprehension { expr: body, var_name, iterable, cond, .. } => {
            if var_name == old {
                *var_name = new.to_owned();
            }
            rename_in_expr(iterable, old, new);
            rename_in_expr(body, old, new);
            if let Some(c) = cond {
                rename_in_expr(c, old, new);
            }
        }
        Expr::DictComprehension { key, value, var_name, iterable, cond, .. } => {
            if var_name == old {
                *var_name = new.to_owned();
            }
            rename_in_expr(iterable, old, new);
            rename_in_expr(key, old, new);
            rename_in_expr(value, old, new);
            if let Some(c) = cond {
                rename_in_expr(c, old, new);
            }
        }
        Expr::ListLiteral(items, _) => items.iter_mut().for_each(|i| rename_in_expr(i, old, new)),
        Expr::DictLiteral(pairs, _) => pairs.iter_mut().for_each(|(k, v)| {
            rename_in_expr(k, old, new);
            rename_in_expr(v, old, new);
        }),
        Expr::Index { target, index, .. } => {
            rename_in_expr(target, old, new);
            rename_in_expr(index, old, new);
        }
        Expr::Attribute { target, .. } => rename_in_expr(target, old, new),
        Expr::Binary { left, right, .. } => {
            rename_in_expr(left, old, new);
            rename_in_expr(right, old, new);
        }
        Expr::Unary { expr, .. } | Expr::Pointer { target: expr, .. } | Expr::Spawn { call: expr, .. } => {
            rename_in_expr(expr, old, new)
        }
        Expr::Range { start, end, .. } => {
            rename_in_expr(start, old, new);
            rename_in_expr(end, old, new);
        }
        Expr::Call { callee, args, kwargs, .. } => {
            rename_in_expr(callee, old, new);
            args.iter_mut().for_each(|a| rename_in_expr(a, old, new));
            kwargs.iter_mut().for_each(|(_, v)| rename_in_expr(v, old, new));
        }
        Expr::MethodCall { object, args, kwargs, .. } => {
            rename_in_expr(object, old, new);
            args.iter_mut().for_each(|a| rename_in_expr(a, old, new));
            kwargs.iter_mut().for_each(|(_, v)| rename_in_expr(v, old, new));
        }
        Expr::PyClassInstance { args, kwargs, .. } => {
            args.iter_mut().for_each(|a| rename_in_expr(a, old, new));
            kwargs.iter_mut().for_each(|(_, v)| rename_in_expr(v, old, new));
        }
        Expr::Literal(..) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::resolver;

    #[test]
    fn bundle_round_trips_through_base64_json() {
        let program = parse("var x = 1 + 2").unwrap();
        let mut modules = BTreeMap::new();
        modules.insert("/entry.aml".to_owned(), program);
        let bundle = Bundle::new("/entry.aml", modules, false);
        let text = bundle.encode().unwrap();
        let decoded = Bundle::decode(&text).unwrap();
        assert_eq!(decoded.entry, "/entry.aml");
        assert_eq!(decoded.modules.len(), 1);
    }

    #[test]
    fn obfuscation_renames_declared_locals_but_not_builtins() {
        let mut program = parse("func f(a) { var total = a + 1\nreturn print(total) }").unwrap();
        resolver::analyze(&program);
        obfuscate(&mut program);
        let Stmt::FunctionDecl(decl) = &program.statements[0] else { panic!("expected function") };
        assert_ne!(decl.name, "f");
        assert_ne!(decl.params[0].name(), "a");
        let Stmt::VarDecl { name, .. } = &decl.body[0] else { panic!("expected var decl") };
        assert_ne!(name, "total");
        let Stmt::Return { value: Some(Expr::Call { callee, .. }), .. } = &decl.body[1] else {
            panic!("expected return of a call")
        };
        let Expr::Identifier(addr, _) = callee.as_ref() else { panic!("expected identifier callee") };
        assert_eq!(addr.name, "print");
    }
}
