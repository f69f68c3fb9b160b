//! Builtin handlers.
//!
//! `decorator` and `method` extract the annotated function into a compiled user handler;
//! `placeholder` removes the annotated node from the generated file.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::debug;

use crate::context::{FileSession, TransformContext};
use crate::error::Result;
use crate::extract::{Extractor, HandlerKind};

/// What builtins can reach besides the node they decorate.
pub struct BuiltinEnv<'e, 't> {
    pub extractor: &'e Extractor<'t>,
    pub session: &'e mut FileSession,
}

pub type BuiltinFn = fn(&mut TransformContext<'_>, &mut BuiltinEnv<'_, '_>) -> Result<()>;

fn registry() -> &'static HashMap<&'static str, BuiltinFn> {
    static BUILTINS: OnceLock<HashMap<&'static str, BuiltinFn>> = OnceLock::new();
    BUILTINS.get_or_init(|| {
        let mut builtins: HashMap<&'static str, BuiltinFn> = HashMap::new();
        builtins.insert("decorator", decorator);
        builtins.insert("method", method);
        builtins.insert("placeholder", placeholder);
        builtins
    })
}

pub fn is_builtin(name: &str) -> bool {
    registry().contains_key(name)
}

pub fn lookup(name: &str) -> Option<BuiltinFn> {
    registry().get(name).copied()
}

/// Names of all builtins, sorted.
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<_> = registry().keys().copied().collect();
    names.sort_unstable();
    names
}

fn decorator(ctx: &mut TransformContext<'_>, env: &mut BuiltinEnv<'_, '_>) -> Result<()> {
    export_function(ctx, env, HandlerKind::Decorator)
}

fn method(ctx: &mut TransformContext<'_>, env: &mut BuiltinEnv<'_, '_>) -> Result<()> {
    export_function(ctx, env, HandlerKind::Method)
}

fn placeholder(ctx: &mut TransformContext<'_>, _env: &mut BuiltinEnv<'_, '_>) -> Result<()> {
    ctx.delete();
    Ok(())
}

/// Extract the annotated function and export it for the user phase.
///
/// The export happens even when the cached build is reused, so the handler stays
/// loadable on every run.
fn export_function(
    ctx: &mut TransformContext<'_>,
    env: &mut BuiltinEnv<'_, '_>,
    kind: HandlerKind,
) -> Result<()> {
    let node = ctx.node();
    let Some(name) = node.name.filter(|_| node.kind == "function_item") else {
        debug!("{:?} builtin ignores {} node", kind, node.kind);
        return Ok(());
    };
    let name = name.to_string();
    let source = node.text.to_string();
    let imports = ctx.imports();

    let artifact = env.extractor.extract(&name, &source, kind, &imports)?;
    env.session.export(artifact);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::RustToolchain;
    use crate::tree::SourceTree;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_registry_membership() {
        assert_eq!(names(), vec!["decorator", "method", "placeholder"]);
        assert!(is_builtin("placeholder"));
        assert!(!is_builtin("Placeholder"));
        assert!(lookup("derive").is_none());
    }

    #[test]
    fn test_placeholder_deletes_node() {
        let source = "struct A;\nstruct B;\n";
        let mut tree = SourceTree::parse(source).unwrap();
        let toolchain = RustToolchain::new();
        let extractor = Extractor::new("/unused", &toolchain);
        let mut session = FileSession::new();
        let mut env = BuiltinEnv {
            extractor: &extractor,
            session: &mut session,
        };

        let mut ctx = TransformContext::new(&mut tree, 0, &[], source);
        lookup("placeholder").unwrap()(&mut ctx, &mut env).unwrap();
        assert!(ctx.modified());
        assert_eq!(tree.render().0, "struct B;\n");
    }

    #[test]
    fn test_extracting_builtins_ignore_non_functions() {
        let source = "struct A;\n";
        let mut tree = SourceTree::parse(source).unwrap();
        let toolchain = RustToolchain::with_programs("attrgen-missing-rustc", "attrgen-missing-rustfmt");
        let extractor = Extractor::new("/unused", &toolchain);
        let mut session = FileSession::new();
        let mut env = BuiltinEnv {
            extractor: &extractor,
            session: &mut session,
        };

        let mut ctx = TransformContext::new(&mut tree, 0, &[], source);
        lookup("decorator").unwrap()(&mut ctx, &mut env).unwrap();
        assert!(!ctx.modified());
        assert!(session.exports.is_empty());
    }
}
