//! # Attrgen SDK
//!
//! Handler-side API for user-supplied attrgen handlers.
//!
//! A function marked with `// #[decorator]` takes a [`TransformContext`] and records the
//! edits it wants applied to the annotated node. A function marked with `// #[method]`
//! takes the directive arguments and returns generated text.
//!
//! ```rust,ignore
//! use attrgen_sdk::TransformContext;
//!
//! // #[decorator]
//! pub fn strip(c: &mut TransformContext) -> Result<(), String> {
//!     c.delete();
//!     Ok(())
//! }
//! ```
//!
//! A decorator sees more than its node: [`TransformContext::buffer`] is the file as
//! transformed so far and [`TransformContext::declarations`] lists every item and statement
//! in it, so a handler can look up another declaration by name.
//!
//! This file is inlined as `mod attrgen_sdk { .. }` into every extracted handler unit, so
//! it stays a single file without dependencies or crate-relative paths.

use std::ops::Range;

/// Node kind reported once the node has been deleted.
pub const DELETED_KIND: &str = "deleted";

/// An item or statement of the file being transformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: String,
    pub name: Option<String>,
    /// Byte range in [`TransformContext::buffer`], including outer attributes.
    pub range: Range<usize>,
    /// Nesting depth in the syntax tree.
    pub depth: usize,
}

/// A single edit requested by a handler, replayed by the engine in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Replace(String),
    Delete,
    InsertBefore(String),
    InsertAfter(String),
}

/// Signature of a decorator-class handler.
pub type DecoratorFn = fn(&mut TransformContext) -> Result<(), String>;

/// Signature of a method-class handler.
pub type MethodFn = fn(&[String]) -> String;

/// View of the annotated node handed to a compiled decorator.
#[derive(Debug, Clone)]
pub struct TransformContext {
    node_kind: String,
    node_text: String,
    node_name: Option<String>,
    node_range: Range<usize>,
    file_source: String,
    buffer: String,
    declarations: Vec<Declaration>,
    args: Vec<String>,
    deleted: bool,
    edits: Vec<Edit>,
}

impl TransformContext {
    pub fn new(
        node_kind: impl Into<String>,
        node_text: impl Into<String>,
        file_source: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        let node_text = node_text.into();
        let file_source = file_source.into();
        Self {
            node_kind: node_kind.into(),
            node_range: 0..node_text.len(),
            node_text,
            node_name: None,
            buffer: file_source.clone(),
            file_source,
            declarations: Vec::new(),
            args,
            deleted: false,
            edits: Vec::new(),
        }
    }

    /// Set the node's name and its byte range in the running buffer.
    pub fn with_node(mut self, name: Option<String>, range: Range<usize>) -> Self {
        self.node_name = name;
        self.node_range = range;
        self
    }

    /// Set the running buffer and the declarations found in it.
    pub fn with_buffer(mut self, buffer: impl Into<String>, declarations: Vec<Declaration>) -> Self {
        self.buffer = buffer.into();
        self.declarations = declarations;
        self
    }

    /// Tree-sitter kind of the current node, or [`DELETED_KIND`].
    pub fn node_kind(&self) -> &str {
        if self.deleted {
            DELETED_KIND
        } else {
            &self.node_kind
        }
    }

    /// Source text of the current node, including its outer attributes.
    pub fn node_text(&self) -> &str {
        if self.deleted {
            ""
        } else {
            &self.node_text
        }
    }

    /// Name of the current node: the item name, or the pattern of a `let`.
    pub fn node_name(&self) -> Option<&str> {
        self.node_name.as_deref()
    }

    /// Byte range of the current node in [`buffer`](Self::buffer).
    pub fn node_range(&self) -> Range<usize> {
        self.node_range.clone()
    }

    /// The whole file as it was read from disk.
    pub fn file_source(&self) -> &str {
        &self.file_source
    }

    /// The file with every earlier handler's edits applied.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// First declaration called `name`, in document order.
    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations
            .iter()
            .find(|d| d.name.as_deref() == Some(name))
    }

    /// Source text of a declaration.
    pub fn text_of(&self, declaration: &Declaration) -> &str {
        self.buffer.get(declaration.range.clone()).unwrap_or_default()
    }

    /// Arguments of the directive being executed.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn replace(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.node_text = text.clone();
        self.deleted = false;
        self.edits.push(Edit::Replace(text));
    }

    pub fn delete(&mut self) {
        self.deleted = true;
        self.edits.push(Edit::Delete);
    }

    pub fn insert_before(&mut self, text: impl Into<String>) {
        self.edits.push(Edit::InsertBefore(text.into()));
    }

    pub fn insert_after(&mut self, text: impl Into<String>) {
        self.edits.push(Edit::InsertAfter(text.into()));
    }

    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }
}

/// C ABI shared by the engine and the compiled handler modules.
///
/// Strings cross the boundary as borrowed `(ptr, len)` pairs that are only valid for the
/// duration of the call; the receiving side copies what it keeps.
pub mod abi {
    use std::ffi::c_void;
    use std::panic::{self, AssertUnwindSafe};

    use super::{Declaration, DecoratorFn, Edit, MethodFn, TransformContext};

    pub const KIND_DECORATOR: u32 = 1;
    pub const KIND_METHOD: u32 = 2;

    /// Suffix of the exported static that declares a module's handler kind.
    pub const KIND_SYMBOL_SUFFIX: &str = "_handler_kind";

    pub const OP_REPLACE: u32 = 1;
    pub const OP_DELETE: u32 = 2;
    pub const OP_INSERT_BEFORE: u32 = 3;
    pub const OP_INSERT_AFTER: u32 = 4;
    pub const OP_OUTPUT: u32 = 5;
    pub const OP_ERROR: u32 = 6;

    pub const STATUS_OK: i32 = 0;
    pub const STATUS_FAILED: i32 = 1;
    pub const STATUS_PANICKED: i32 = 2;

    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    pub struct RawStr {
        pub ptr: *const u8,
        pub len: usize,
    }

    impl RawStr {
        pub fn borrowed(s: &str) -> Self {
            Self {
                ptr: s.as_ptr(),
                len: s.len(),
            }
        }

        /// # Safety
        ///
        /// `ptr` must point to `len` readable bytes that outlive `'a`.
        pub unsafe fn as_str<'a>(self) -> &'a str {
            if self.ptr.is_null() || self.len == 0 {
                return "";
            }
            let bytes = std::slice::from_raw_parts(self.ptr, self.len);
            std::str::from_utf8(bytes).unwrap_or_default()
        }
    }

    /// One entry of [`RawRequest::nodes`]. An empty `name` means the node has none.
    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    pub struct RawNode {
        pub kind: RawStr,
        pub name: RawStr,
        pub start: usize,
        pub end: usize,
        pub depth: usize,
    }

    #[repr(C)]
    pub struct RawRequest {
        pub node_kind: RawStr,
        pub node_text: RawStr,
        pub node_name: RawStr,
        pub node_start: usize,
        pub node_end: usize,
        pub file_source: RawStr,
        pub buffer: RawStr,
        pub nodes: *const RawNode,
        pub nodes_len: usize,
        pub args: *const RawStr,
        pub args_len: usize,
    }

    pub type EmitFn = extern "C" fn(sink: *mut c_void, op: u32, text: RawStr);

    pub type DecoratorEntry =
        unsafe extern "C" fn(request: *const RawRequest, sink: *mut c_void, emit: EmitFn) -> i32;

    pub type MethodEntry = unsafe extern "C" fn(
        args: *const RawStr,
        args_len: usize,
        sink: *mut c_void,
        emit: EmitFn,
    ) -> i32;

    /// # Safety
    ///
    /// `args` must point to `len` valid [`RawStr`] values.
    pub unsafe fn read_args(args: *const RawStr, len: usize) -> Vec<String> {
        if args.is_null() || len == 0 {
            return Vec::new();
        }
        std::slice::from_raw_parts(args, len)
            .iter()
            .map(|arg| arg.as_str().to_string())
            .collect()
    }

    fn optional(s: &str) -> Option<String> {
        (!s.is_empty()).then(|| s.to_string())
    }

    /// # Safety
    ///
    /// `nodes` must point to `len` valid [`RawNode`] values.
    pub unsafe fn read_nodes(nodes: *const RawNode, len: usize) -> Vec<Declaration> {
        if nodes.is_null() || len == 0 {
            return Vec::new();
        }
        std::slice::from_raw_parts(nodes, len)
            .iter()
            .map(|node| Declaration {
                kind: node.kind.as_str().to_string(),
                name: optional(node.name.as_str()),
                range: node.start..node.end,
                depth: node.depth,
            })
            .collect()
    }

    fn emit_edit(sink: *mut c_void, emit: EmitFn, edit: &Edit) {
        match edit {
            Edit::Replace(text) => emit(sink, OP_REPLACE, RawStr::borrowed(text)),
            Edit::Delete => emit(sink, OP_DELETE, RawStr::borrowed("")),
            Edit::InsertBefore(text) => emit(sink, OP_INSERT_BEFORE, RawStr::borrowed(text)),
            Edit::InsertAfter(text) => emit(sink, OP_INSERT_AFTER, RawStr::borrowed(text)),
        }
    }

    /// Runs a decorator behind the C ABI. Generated shims call this.
    ///
    /// # Safety
    ///
    /// `request` must be null or point to a valid [`RawRequest`].
    pub unsafe fn call_decorator(
        handler: DecoratorFn,
        request: *const RawRequest,
        sink: *mut c_void,
        emit: EmitFn,
    ) -> i32 {
        if request.is_null() {
            emit(sink, OP_ERROR, RawStr::borrowed("null request"));
            return STATUS_FAILED;
        }
        let request = &*request;
        let mut context = TransformContext::new(
            request.node_kind.as_str(),
            request.node_text.as_str(),
            request.file_source.as_str(),
            read_args(request.args, request.args_len),
        )
        .with_node(
            optional(request.node_name.as_str()),
            request.node_start..request.node_end,
        )
        .with_buffer(
            request.buffer.as_str(),
            read_nodes(request.nodes, request.nodes_len),
        );

        match panic::catch_unwind(AssertUnwindSafe(|| handler(&mut context))) {
            Ok(Ok(())) => {
                for edit in context.edits() {
                    emit_edit(sink, emit, edit);
                }
                STATUS_OK
            }
            Ok(Err(message)) => {
                emit(sink, OP_ERROR, RawStr::borrowed(&message));
                STATUS_FAILED
            }
            Err(_) => {
                emit(sink, OP_ERROR, RawStr::borrowed("handler panicked"));
                STATUS_PANICKED
            }
        }
    }

    /// Runs a method behind the C ABI. Generated shims call this.
    ///
    /// # Safety
    ///
    /// `args` must point to `args_len` valid [`RawStr`] values.
    pub unsafe fn call_method(
        handler: MethodFn,
        args: *const RawStr,
        args_len: usize,
        sink: *mut c_void,
        emit: EmitFn,
    ) -> i32 {
        let args = read_args(args, args_len);
        match panic::catch_unwind(AssertUnwindSafe(|| handler(&args))) {
            Ok(output) => {
                emit(sink, OP_OUTPUT, RawStr::borrowed(&output));
                STATUS_OK
            }
            Err(_) => {
                emit(sink, OP_ERROR, RawStr::borrowed("method panicked"));
                STATUS_PANICKED
            }
        }
    }
}
