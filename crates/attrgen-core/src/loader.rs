//! Loading of compiled user handlers.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::Path;
use std::sync::Arc;

use libloading::{Library, Symbol};
use tracing::debug;

use attrgen_sdk::abi::{
    DecoratorEntry, MethodEntry, RawNode, RawRequest, RawStr, KIND_SYMBOL_SUFFIX, OP_DELETE, OP_ERROR,
    OP_INSERT_AFTER, OP_INSERT_BEFORE, OP_OUTPUT, OP_REPLACE, STATUS_OK,
};
use attrgen_sdk::Edit;

use crate::context::TransformContext;
use crate::error::{LoadError, Result, TransformError};
use crate::extract::{ExtractedArtifact, HandlerKind};

struct Decorator {
    entry: DecoratorEntry,
    // Keeps the module mapped while `entry` can still be called.
    _library: Option<Arc<Library>>,
}

struct Method {
    entry: MethodEntry,
    _library: Option<Arc<Library>>,
}

/// Everything a handler reported through the emit callback.
#[derive(Debug, Default)]
struct Collected {
    edits: Vec<Edit>,
    output: String,
    error: Option<String>,
}

extern "C" fn collect(sink: *mut c_void, op: u32, text: RawStr) {
    if sink.is_null() {
        return;
    }
    // SAFETY: the engine passes a `&mut Collected` for the duration of the call, and the
    // handler passes strings borrowed for the duration of this callback.
    let collected = unsafe { &mut *(sink as *mut Collected) };
    let text = unsafe { text.as_str() }.to_string();
    match op {
        OP_REPLACE => collected.edits.push(Edit::Replace(text)),
        OP_DELETE => collected.edits.push(Edit::Delete),
        OP_INSERT_BEFORE => collected.edits.push(Edit::InsertBefore(text)),
        OP_INSERT_AFTER => collected.edits.push(Edit::InsertAfter(text)),
        OP_OUTPUT => collected.output.push_str(&text),
        OP_ERROR => collected.error = Some(text),
        _ => debug!("Ignoring unknown handler op {}", op),
    }
}

/// User handlers loaded for the current file.
#[derive(Default)]
pub struct HandlerRegistry {
    decorators: HashMap<String, Decorator>,
    methods: HashMap<String, Method>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.decorators.clear();
        self.methods.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty() && self.methods.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decorators.contains_key(name) || self.methods.contains_key(name)
    }

    /// Load the module of `artifact` and register its entry point.
    pub fn load(&mut self, artifact: &ExtractedArtifact) -> std::result::Result<(), LoadError> {
        let library = Arc::new(open(&artifact.module_path)?);
        let name = artifact.name.as_str();
        check_kind(&library, name, &artifact.module_path, artifact.kind)?;

        match artifact.kind {
            HandlerKind::Decorator => {
                let entry = *symbol::<DecoratorEntry>(&library, name, &artifact.module_path)?;
                self.register_decorator(name, entry, Some(library));
            }
            HandlerKind::Method => {
                let entry = *symbol::<MethodEntry>(&library, name, &artifact.module_path)?;
                self.register_method(name, entry, Some(library));
            }
        }

        debug!("Loaded {:?} handler `{}`", artifact.kind, name);
        Ok(())
    }

    /// Register a decorator entry point directly, optionally owned by a library.
    pub fn register_decorator(
        &mut self,
        name: &str,
        entry: DecoratorEntry,
        library: Option<Arc<Library>>,
    ) {
        self.decorators.insert(
            name.to_string(),
            Decorator {
                entry,
                _library: library,
            },
        );
    }

    pub fn register_method(&mut self, name: &str, entry: MethodEntry, library: Option<Arc<Library>>) {
        self.methods.insert(
            name.to_string(),
            Method {
                entry,
                _library: library,
            },
        );
    }

    /// Run the decorator `name` on the context's node and replay its edits.
    ///
    /// The decorator also receives the running buffer and every slot of the tree, so it
    /// can inspect the rest of the file the way a builtin can.
    ///
    /// Returns `None` when no such decorator is loaded.
    pub fn call_decorator(&self, name: &str, ctx: &mut TransformContext<'_>) -> Option<Result<()>> {
        let decorator = self.decorators.get(name)?;

        let (status, collected) = {
            let node = ctx.node();
            let tree = ctx.tree();
            let nodes: Vec<RawNode> = (0..tree.slots().len())
                .map(|id| {
                    let view = tree.node(id);
                    RawNode {
                        kind: RawStr::borrowed(view.kind),
                        name: RawStr::borrowed(view.name.unwrap_or_default()),
                        start: view.range.start,
                        end: view.range.end,
                        depth: tree.slot(id).depth,
                    }
                })
                .collect();
            let args: Vec<RawStr> = ctx.arguments().iter().map(|a| RawStr::borrowed(a)).collect();
            let request = RawRequest {
                node_kind: RawStr::borrowed(node.kind),
                node_text: RawStr::borrowed(node.text),
                node_name: RawStr::borrowed(node.name.unwrap_or_default()),
                node_start: node.range.start,
                node_end: node.range.end,
                file_source: RawStr::borrowed(ctx.file_source()),
                buffer: RawStr::borrowed(tree.source()),
                nodes: nodes.as_ptr(),
                nodes_len: nodes.len(),
                args: args.as_ptr(),
                args_len: args.len(),
            };
            let mut collected = Collected::default();
            // SAFETY: every pointer in `request` borrows data that outlives the call.
            let status = unsafe {
                (decorator.entry)(
                    &request,
                    &mut collected as *mut Collected as *mut c_void,
                    collect,
                )
            };
            (status, collected)
        };

        if let Some(message) = failure(status, collected.error) {
            return Some(Err(TransformError::handler(name, message)));
        }
        ctx.apply(collected.edits);
        Some(Ok(()))
    }

    /// Run the method `name` with `args`, returning its output.
    ///
    /// Returns `None` when no such method is loaded.
    pub fn call_method(&self, name: &str, args: &[String]) -> Option<Result<String>> {
        let method = self.methods.get(name)?;

        let raw: Vec<RawStr> = args.iter().map(|a| RawStr::borrowed(a)).collect();
        let mut collected = Collected::default();
        // SAFETY: `raw` borrows `args`, which outlive the call.
        let status = unsafe {
            (method.entry)(
                raw.as_ptr(),
                raw.len(),
                &mut collected as *mut Collected as *mut c_void,
                collect,
            )
        };

        if let Some(message) = failure(status, collected.error) {
            return Some(Err(TransformError::handler(name, message)));
        }
        Some(Ok(collected.output))
    }
}

fn failure(status: i32, error: Option<String>) -> Option<String> {
    match (status, error) {
        (STATUS_OK, None) => None,
        (_, Some(message)) => Some(message),
        (status, None) => Some(format!("handler returned status {status}")),
    }
}

fn open(path: &Path) -> std::result::Result<Library, LoadError> {
    // SAFETY: handler modules are built by this tool from the synthesized unit; their
    // initialisers only set up the inlined SDK.
    unsafe { Library::new(path) }.map_err(|e| LoadError::Open {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn symbol<'l, T>(
    library: &'l Library,
    name: &str,
    path: &Path,
) -> std::result::Result<Symbol<'l, T>, LoadError> {
    // SAFETY: the caller picks `T` after checking the exported handler kind.
    unsafe { library.get::<T>(name.as_bytes()) }.map_err(|_| LoadError::MissingSymbol {
        symbol: name.to_string(),
        path: path.to_path_buf(),
    })
}

fn check_kind(
    library: &Library,
    name: &str,
    path: &Path,
    kind: HandlerKind,
) -> std::result::Result<(), LoadError> {
    let symbol_name = format!("{name}{KIND_SYMBOL_SUFFIX}");
    let kind_symbol = symbol::<*const u32>(library, &symbol_name, path)?;
    // SAFETY: the symbol is a `u32` static emitted next to the entry point.
    let actual = unsafe { **kind_symbol };
    if actual != kind.abi_kind() {
        return Err(LoadError::Shape {
            symbol: name.to_string(),
            path: path.to_path_buf(),
            expected: kind.abi_kind(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::SourceTree;
    use attrgen_sdk::abi;
    use pretty_assertions::assert_eq;

    fn wrap_in_module(c: &mut attrgen_sdk::TransformContext) -> std::result::Result<(), String> {
        let module = c.args().first().cloned().ok_or("missing module name")?;
        let text = format!("mod {module} {{\n    {}\n}}", c.node_text());
        c.replace(text);
        Ok(())
    }

    unsafe extern "C" fn wrap_entry(
        request: *const RawRequest,
        sink: *mut c_void,
        emit: abi::EmitFn,
    ) -> i32 {
        abi::call_decorator(wrap_in_module, request, sink, emit)
    }

    fn getters(args: &[String]) -> String {
        args.iter()
            .map(|field| format!("fn {field}(&self) {{}}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    unsafe extern "C" fn getters_entry(
        args: *const RawStr,
        args_len: usize,
        sink: *mut c_void,
        emit: abi::EmitFn,
    ) -> i32 {
        abi::call_method(getters, args, args_len, sink, emit)
    }

    #[test]
    fn test_decorator_edits_are_replayed() {
        let source = "struct A;\n";
        let mut tree = SourceTree::parse(source).unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register_decorator("wrap", wrap_entry, None);

        let args = vec!["inner".to_string()];
        let mut ctx = TransformContext::new(&mut tree, 0, &args, source);
        registry.call_decorator("wrap", &mut ctx).unwrap().unwrap();
        assert!(ctx.modified());

        let (out, _) = tree.render();
        assert_eq!(out, "mod inner {\n    struct A;\n}\n");
    }

    fn derive_like(c: &mut attrgen_sdk::TransformContext) -> std::result::Result<(), String> {
        let source = c.args().first().cloned().ok_or("missing source")?;
        let template = c.declaration(&source).ok_or("no such declaration")?;
        let body = c.text_of(template).replace(&source, c.node_name().ok_or("unnamed")?);
        c.replace(body);
        Ok(())
    }

    unsafe extern "C" fn derive_like_entry(
        request: *const RawRequest,
        sink: *mut c_void,
        emit: abi::EmitFn,
    ) -> i32 {
        abi::call_decorator(derive_like, request, sink, emit)
    }

    #[test]
    fn test_decorator_reads_other_declarations() {
        let source = "enum Color {\n    Red,\n}\n\nenum Shade {}\n";
        let mut tree = SourceTree::parse(source).unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register_decorator("like", derive_like_entry, None);

        let args = vec!["Color".to_string()];
        let mut ctx = TransformContext::new(&mut tree, 1, &args, source);
        registry.call_decorator("like", &mut ctx).unwrap().unwrap();

        let (out, _) = tree.render();
        assert_eq!(out, "enum Color {\n    Red,\n}\n\nenum Shade {\n    Red,\n}\n");
    }

    #[test]
    fn test_decorator_error_becomes_handler_error() {
        let source = "struct A;\n";
        let mut tree = SourceTree::parse(source).unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register_decorator("wrap", wrap_entry, None);

        let mut ctx = TransformContext::new(&mut tree, 0, &[], source);
        let err = registry.call_decorator("wrap", &mut ctx).unwrap().unwrap_err();
        assert!(matches!(err, TransformError::Handler { ref directive, .. } if directive == "wrap"));
        assert!(!ctx.modified());
    }

    #[test]
    fn test_method_output() {
        let mut registry = HandlerRegistry::new();
        registry.register_method("getters", getters_entry, None);
        let output = registry
            .call_method("getters", &["id".to_string(), "name".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(output, "fn id(&self) {}\nfn name(&self) {}");
    }

    #[test]
    fn test_unknown_handler_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.call_method("missing", &[]).is_none());
        assert!(!registry.contains("missing"));
    }

    #[test]
    fn test_open_failure() {
        let mut registry = HandlerRegistry::new();
        let artifact = ExtractedArtifact {
            name: "ghost".to_string(),
            kind: HandlerKind::Method,
            source_hash: String::new(),
            module_path: "/nonexistent/libghost.so".into(),
            rebuilt: false,
        };
        let err = registry.load(&artifact).unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
    }

    #[test]
    fn test_clear() {
        let mut registry = HandlerRegistry::new();
        registry.register_method("getters", getters_entry, None);
        assert!(registry.contains("getters"));
        registry.clear();
        assert!(registry.is_empty());
    }
}
