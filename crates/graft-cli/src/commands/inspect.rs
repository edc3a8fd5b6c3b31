//! `graft inspect`: Print the contents of a module.

use anyhow::Context;
use graft_engine::bytecode::module::flags;
use graft_engine::bytecode::{
    field_flags, method_flags, verify_module, Marker, MarkerArg, MethodDef, Module, TypeDef,
    TypeKind,
};
use std::fmt::Write as _;
use std::path::Path;

pub fn execute(path: &Path, json: bool) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let module =
        Module::decode(&bytes).with_context(|| format!("Failed to decode {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&module_json(&module))?);
    } else {
        print!("{}", render(&module));
    }
    Ok(())
}

fn kind_name(kind: TypeKind) -> &'static str {
    match kind {
        TypeKind::Class => "class",
        TypeKind::Struct => "struct",
        TypeKind::Interface => "interface",
    }
}

fn flag_names(value: u32, table: &[(u32, &'static str)]) -> Vec<&'static str> {
    table
        .iter()
        .filter(|(bit, _)| value & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

const FIELD_FLAGS: &[(u32, &str)] = &[
    (field_flags::STATIC, "static"),
    (field_flags::PUBLIC, "public"),
    (field_flags::READONLY, "readonly"),
];

const METHOD_FLAGS: &[(u32, &str)] = &[
    (method_flags::STATIC, "static"),
    (method_flags::CONSTRUCTOR, "ctor"),
    (method_flags::VIRTUAL, "virtual"),
    (method_flags::ABSTRACT, "abstract"),
    (method_flags::EXTERN, "extern"),
];

fn marker_text(marker: &Marker) -> String {
    if marker.args.is_empty() {
        return marker.key.clone();
    }
    let args: Vec<String> = marker
        .args
        .iter()
        .map(|arg| match arg {
            MarkerArg::Literal(literal) => literal.to_string(),
            MarkerArg::StringList(names) => format!("[{}]", names.join(", ")),
        })
        .collect();
    format!("{}({})", marker.key, args.join(", "))
}

fn signature(method: &MethodDef) -> String {
    let mut sig = method.name.clone();
    if !method.generic_params.is_empty() {
        sig.push_str(&format!("<{}>", method.generic_params.join(", ")));
    }
    let params: Vec<String> = method
        .params
        .iter()
        .map(|p| format!("{}: {}", p.name, p.ty))
        .collect();
    sig.push_str(&format!("({}) -> {}", params.join(", "), method.return_type));
    sig
}

fn type_header(ty: &TypeDef) -> String {
    let mut header = format!("{} {}", kind_name(ty.kind), ty.name);
    if !ty.generic_params.is_empty() {
        header.push_str(&format!("<{}>", ty.generic_params.join(", ")));
    }
    let mut supers: Vec<String> = ty.base.iter().map(|b| b.to_string()).collect();
    supers.extend(ty.interfaces.iter().map(|i| i.to_string()));
    if !supers.is_empty() {
        header.push_str(&format!(" : {}", supers.join(", ")));
    }
    header
}

/// Human-readable listing
pub fn render(module: &Module) -> String {
    let mut out = String::new();
    let patched = if module.flags & flags::PATCHED != 0 {
        " (patched)"
    } else {
        ""
    };
    let _ = writeln!(out, "module {} v{}{}", module.name(), module.version, patched);
    if let Some(source) = &module.metadata.source_file {
        let _ = writeln!(out, "  source: {}", source);
    }
    if let Err(e) = verify_module(module) {
        let _ = writeln!(out, "  verify: {}", e);
    }

    for ty in &module.types {
        let _ = writeln!(out);
        let _ = writeln!(out, "  {}  #{}", type_header(ty), ty.rid);
        for field in &ty.fields {
            let _ = writeln!(
                out,
                "    field {}: {}  [{}]  #{}",
                field.name,
                field.ty,
                flag_names(field.flags, FIELD_FLAGS).join(" "),
                field.rid
            );
        }
        for method in &ty.methods {
            let body = match &method.body {
                Some(body) => format!("{} instructions", body.instructions.len()),
                None => "no body".to_string(),
            };
            let _ = writeln!(
                out,
                "    fn {}  [{}]  {}  #{}",
                signature(method),
                flag_names(method.flags, METHOD_FLAGS).join(" "),
                body,
                method.rid
            );
            for marker in &method.markers {
                let _ = writeln!(out, "      @{}", marker_text(marker));
            }
        }
    }
    out
}

pub fn module_json(module: &Module) -> serde_json::Value {
    let types: Vec<_> = module
        .types
        .iter()
        .map(|ty| {
            serde_json::json!({
                "rid": ty.rid,
                "name": ty.name,
                "kind": kind_name(ty.kind),
                "generic_params": ty.generic_params,
                "base": ty.base.as_ref().map(|b| b.to_string()),
                "interfaces": ty.interfaces.iter().map(|i| i.to_string()).collect::<Vec<_>>(),
                "fields": ty.fields.iter().map(|f| serde_json::json!({
                    "rid": f.rid,
                    "name": f.name,
                    "type": f.ty.to_string(),
                    "flags": flag_names(f.flags, FIELD_FLAGS),
                })).collect::<Vec<_>>(),
                "methods": ty.methods.iter().map(|m| serde_json::json!({
                    "rid": m.rid,
                    "signature": signature(m),
                    "flags": flag_names(m.flags, METHOD_FLAGS),
                    "instructions": m.body.as_ref().map(|b| b.instructions.len()),
                    "markers": m.markers.iter().map(marker_text).collect::<Vec<_>>(),
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    serde_json::json!({
        "name": module.name(),
        "version": module.version,
        "patched": module.flags & flags::PATCHED != 0,
        "verify_error": verify_module(module).err().map(|e| e.to_string()),
        "types": types,
    })
}
