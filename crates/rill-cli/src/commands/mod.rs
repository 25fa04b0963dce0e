pub mod check;
pub mod eval;
pub mod run;

use std::path::Path as StdPath;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use rill_core::context::{Context, ContextConfig};
use rill_core::filesystem::OsFilesystem;
use rill_core::permission::Permission;
use rill_core::value::PathPattern;
use rill_eval::ast::Module;

/// Exit code for a failed evaluation (invalid CLI input is 1).
pub const EVAL_FAILURE: u8 = 2;

/// Loads a module from its serialized AST form, as produced by the parser
/// front end.
pub fn load_module(path: &StdPath) -> Result<Module> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("cannot read module {}", path.display()))?;
    let mut module: Module = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a serialized rill module", path.display()))?;
    if module.name.is_empty() {
        module.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());
    }
    Ok(module)
}

/// The caller-side root context for a module run.
///
/// Untrusted runs grant exactly what the module's manifest declares, so the
/// module cannot exceed its own declaration. `--fully-trusted` grants blanket
/// filesystem/network/lthread capabilities instead.
pub fn root_context(module: &Module, fully_trusted: bool) -> Result<Context> {
    let permissions = if fully_trusted {
        blanket_permissions()
    } else {
        module
            .manifest
            .as_ref()
            .map(|m| m.permissions.clone())
            .unwrap_or_default()
    };
    let ctx = Context::new(ContextConfig {
        permissions,
        filesystem: Some(Arc::new(OsFilesystem::new())),
        ..Default::default()
    })?;
    Ok(ctx)
}

fn blanket_permissions() -> Vec<Permission> {
    let everything = PathPattern::new("/...").expect("valid pattern");
    vec![
        Permission::fs_read(everything.clone()),
        Permission::fs_write(everything),
        Permission::lthread_create(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_eval::ast::build;

    #[test]
    fn load_module_round_trip() {
        let module = Module::new(
            "demo",
            vec![build::let_("x", build::int(1)), build::variable("x")],
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.rast");
        std::fs::write(&path, serde_json::to_vec(&module).unwrap()).unwrap();

        let loaded = load_module(&path).unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.statements.len(), 2);
    }

    #[test]
    fn module_name_falls_back_to_file_stem() {
        let module = Module::new("", vec![]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.rast");
        std::fs::write(&path, serde_json::to_vec(&module).unwrap()).unwrap();
        assert_eq!(load_module(&path).unwrap().name, "script");
    }

    #[test]
    fn untrusted_root_context_grants_only_manifest_permissions() {
        let module = Module::new("bare", vec![]);
        let ctx = root_context(&module, false).unwrap();
        assert!(ctx.permissions().is_empty());

        let trusted = root_context(&module, true).unwrap();
        assert!(!trusted.permissions().is_empty());
    }
}
