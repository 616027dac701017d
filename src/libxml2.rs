//! LibXML2 FFI wrapper
//!
//! No mature pure Rust XSD validator exists, so schemas are compiled and
//! documents validated by libxml2 through direct FFI. Path expressions are
//! evaluated by libxml2's XPath 1.0 engine as well.
//!
//! ## Thread safety
//!
//! - Initialization runs once behind a `std::sync::Once`.
//! - Schema *parsing* is not thread-safe in libxml2 and is serialized here with
//!   a process-wide mutex. The compiled-schema cache also makes it rare.
//! - *Validation* and XPath evaluation are thread-safe for distinct documents:
//!   every call creates its own parsed document and context, and compiled
//!   schemas are shared read-only through `Arc`.
//! - Schemas pulled in by `xs:include`/`xs:import` reach libxml2 through an
//!   external entity loader that forwards to the loader of the `parse_schema`
//!   call running on the current thread.

use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::ptr;
use std::sync::{Arc, Mutex, Once};

use libc::{c_char, c_int, c_void};
use once_cell::sync::OnceCell;

use crate::error::{LibXml2Error, LibXml2Result, Violation};

static LIBXML2_INIT: Once = Once::new();

/// libxml2's schema parser keeps global state; only one parse at a time.
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

/// The loader libxml2 had before ours was installed
static DEFAULT_ENTITY_LOADER: OnceCell<XmlExternalEntityLoader> = OnceCell::new();

thread_local! {
    static ACTIVE_INCLUDES: Cell<*mut c_void> = const { Cell::new(ptr::null_mut()) };
}

/// Never touch the network while loading a document (`XML_PARSE_NONET`)
const XML_PARSE_NONET: c_int = 1 << 11;
/// Suppress default error printing (`XML_PARSE_NOERROR`)
const XML_PARSE_NOERROR: c_int = 1 << 5;
/// Suppress default warning printing (`XML_PARSE_NOWARNING`)
const XML_PARSE_NOWARNING: c_int = 1 << 6;

const READ_OPTIONS: c_int = XML_PARSE_NONET | XML_PARSE_NOERROR | XML_PARSE_NOWARNING;

// xmlElementType
const XML_ELEMENT_NODE: c_int = 1;
const XML_ATTRIBUTE_NODE: c_int = 2;
const XML_TEXT_NODE: c_int = 3;
const XML_CDATA_SECTION_NODE: c_int = 4;
const XML_PI_NODE: c_int = 7;
const XML_COMMENT_NODE: c_int = 8;
const XML_DOCUMENT_NODE: c_int = 9;

// xmlXPathObjectType
const XPATH_NODESET: c_int = 1;
const XPATH_BOOLEAN: c_int = 2;
const XPATH_NUMBER: c_int = 3;
const XPATH_STRING: c_int = 4;

// Opaque libxml2 structures
#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlXPathContext {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlXPathCompExpr {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserInputBuffer {
    _private: [u8; 0],
}

/// Leading fields shared by `xmlNode`, `xmlAttr` and `xmlDoc`. `ns` is only
/// read from elements and attributes.
#[repr(C)]
#[allow(dead_code)]
pub struct XmlNode {
    _private: *mut c_void,
    node_type: c_int,
    name: *const c_char,
    children: *mut XmlNode,
    last: *mut XmlNode,
    parent: *mut XmlNode,
    next: *mut XmlNode,
    prev: *mut XmlNode,
    doc: *mut XmlDoc,
    ns: *mut XmlNs,
}

#[repr(C)]
#[allow(dead_code)]
pub struct XmlNs {
    next: *mut XmlNs,
    ns_type: c_int,
    href: *const c_char,
    prefix: *const c_char,
}

#[repr(C)]
#[allow(dead_code)]
pub struct XmlNodeSet {
    node_nr: c_int,
    node_max: c_int,
    node_tab: *mut *mut XmlNode,
}

#[repr(C)]
pub struct XmlXPathObject {
    object_type: c_int,
    nodesetval: *mut XmlNodeSet,
    boolval: c_int,
    floatval: f64,
    stringval: *const c_char,
}

/// Leading fields of `xmlParserInput`
#[repr(C)]
#[allow(dead_code)]
pub struct XmlParserInput {
    buf: *mut XmlParserInputBuffer,
    filename: *const c_char,
}

pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(
        url: *const c_char,
        id: *const c_char,
        ctxt: *mut XmlParserCtxt,
    ) -> *mut XmlParserInput,
>;

#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    // Schema compilation
    pub fn xmlSchemaNewDocParserCtxt(doc: *mut XmlDoc) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Documents
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);

    // Validation
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;

    // XPath
    pub fn xmlXPathNewContext(doc: *mut XmlDoc) -> *mut XmlXPathContext;
    pub fn xmlXPathFreeContext(ctxt: *mut XmlXPathContext);
    pub fn xmlXPathRegisterNs(
        ctxt: *mut XmlXPathContext,
        prefix: *const c_char,
        ns_uri: *const c_char,
    ) -> c_int;
    pub fn xmlXPathSetContextNode(node: *mut XmlNode, ctxt: *mut XmlXPathContext) -> c_int;
    pub fn xmlXPathEval(expression: *const c_char, ctxt: *mut XmlXPathContext)
    -> *mut XmlXPathObject;
    pub fn xmlXPathFreeObject(obj: *mut XmlXPathObject);
    pub fn xmlXPathCompile(expression: *const c_char) -> *mut XmlXPathCompExpr;
    pub fn xmlXPathFreeCompExpr(comp: *mut XmlXPathCompExpr);

    // Errors
    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);

    // External entities
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;
    pub fn xmlSetExternalEntityLoader(loader: XmlExternalEntityLoader);
    pub fn xmlParserInputBufferCreateMem(
        mem: *const c_char,
        size: c_int,
        enc: c_int,
    ) -> *mut XmlParserInputBuffer;
    pub fn xmlNewIOInputStream(
        ctxt: *mut XmlParserCtxt,
        input: *mut XmlParserInputBuffer,
        enc: c_int,
    ) -> *mut XmlParserInput;
    pub fn xmlStrdup(cur: *const c_char) -> *mut c_char;
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

/// Collects every structured error into the `Vec<Violation>` behind `user_data`
unsafe extern "C" fn collect_violation(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let violations = unsafe { &mut *(user_data as *mut Vec<Violation>) };
    let (message_ptr, line) = unsafe { ((*error).message, (*error).line) };
    if message_ptr.is_null() {
        return;
    }

    let message = unsafe { CStr::from_ptr(message_ptr) }
        .to_string_lossy()
        .trim()
        .to_string();
    let line = u32::try_from(line).ok().filter(|&l| l > 0);
    violations.push(Violation::new(line, message));
}

/// Sends libxml2's per-thread structured errors to a vector until dropped
struct ErrorCapture;

impl ErrorCapture {
    /// # Safety
    ///
    /// `sink` must stay valid until the capture is dropped.
    unsafe fn install(sink: *mut Vec<Violation>) -> Self {
        unsafe { xmlSetStructuredErrorFunc(sink as *mut c_void, Some(collect_violation)) };
        ErrorCapture
    }
}

impl Drop for ErrorCapture {
    fn drop(&mut self) {
        unsafe { xmlSetStructuredErrorFunc(ptr::null_mut(), None) };
    }
}

/// State of the `parse_schema` call running on this thread
struct IncludeContext<'a> {
    loader: &'a mut dyn FnMut(&str) -> Option<Vec<u8>>,
    /// Buffers handed to libxml2, alive until the parse is over
    loaded: Vec<Vec<u8>>,
}

/// Publishes an [`IncludeContext`] to [`route_entity`] for the current thread
struct ActiveIncludes {
    previous: *mut c_void,
}

impl ActiveIncludes {
    fn install(context: &mut IncludeContext<'_>) -> Self {
        let current = context as *mut IncludeContext<'_> as *mut c_void;
        Self {
            previous: ACTIVE_INCLUDES.with(|cell| cell.replace(current)),
        }
    }
}

impl Drop for ActiveIncludes {
    fn drop(&mut self) {
        ACTIVE_INCLUDES.with(|cell| cell.set(self.previous));
    }
}

/// External entity loader installed process-wide. Inside `parse_schema` it
/// asks the call's loader; everywhere else libxml2's default loader answers.
unsafe extern "C" fn route_entity(
    url: *const c_char,
    id: *const c_char,
    ctxt: *mut XmlParserCtxt,
) -> *mut XmlParserInput {
    let active = ACTIVE_INCLUDES.with(Cell::get);
    if active.is_null() {
        return match DEFAULT_ENTITY_LOADER.get().copied().flatten() {
            Some(default) => unsafe { default(url, id, ctxt) },
            None => ptr::null_mut(),
        };
    }
    if url.is_null() {
        return ptr::null_mut();
    }

    let includes = unsafe { &mut *(active as *mut IncludeContext<'_>) };
    let location = unsafe { CStr::from_ptr(url) }.to_string_lossy().into_owned();
    let Some(bytes) = (includes.loader)(&location) else {
        return ptr::null_mut();
    };
    let Ok(size) = c_int::try_from(bytes.len()) else {
        return ptr::null_mut();
    };

    unsafe {
        let buffer = xmlParserInputBufferCreateMem(bytes.as_ptr() as *const c_char, size, 0);
        if buffer.is_null() {
            return ptr::null_mut();
        }
        let input = xmlNewIOInputStream(ctxt, buffer, 0);
        if input.is_null() {
            return ptr::null_mut();
        }
        // nested relative locations resolve against this one
        (*input).filename = xmlStrdup(url);
        includes.loaded.push(bytes);
        input
    }
}

/// Shared, reference-counted handle to a compiled schema
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    /// Parsed schema document the compiled schema was built from
    doc: *mut XmlDoc,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: compiled xmlSchema structures are only read during validation,
// which libxml2 supports from several threads at once.
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// `ptr` must come from `xmlSchemaParse` over `doc`, and neither may be
    /// freed elsewhere.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlSchema, doc: *mut XmlDoc) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed {
                details: Vec::new(),
            });
        }

        Ok(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                doc,
                _phantom: PhantomData,
            }),
        })
    }

    pub(crate) fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }

    pub fn is_valid(&self) -> bool {
        !self.inner.ptr.is_null()
    }
}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        unsafe {
            if !self.ptr.is_null() {
                xmlSchemaFree(self.ptr);
                self.ptr = ptr::null_mut();
            }
            if !self.doc.is_null() {
                xmlFreeDoc(self.doc);
                self.doc = ptr::null_mut();
            }
        }
    }
}

/// Outcome of validating one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Return code 0
    Valid,
    /// Return code > 0: the document violates the schema
    Invalid {
        error_count: i32,
        violations: Vec<Violation>,
    },
    /// Return code < 0
    InternalError { code: i32 },
}

impl ValidationResult {
    pub fn from_code(code: c_int, violations: Vec<Violation>) -> Self {
        match code {
            0 => ValidationResult::Valid,
            n if n > 0 => ValidationResult::Invalid {
                error_count: n,
                violations,
            },
            n => ValidationResult::InternalError { code: n },
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationResult::Invalid { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationResult::InternalError { .. })
    }
}

/// Result of an XPath evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum XPathValue {
    Nodes(Vec<XPathNode>),
    Boolean(bool),
    Number(f64),
    String(String),
}

/// A selected node, addressed so it can be found again in another parse of
/// the same document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XPathNode {
    /// Child positions from the document node, counting elements, text,
    /// comments and processing instructions. Empty for the document itself.
    Content(Vec<usize>),
    /// Attribute of the element at `owner`
    Attribute {
        owner: Vec<usize>,
        local: String,
        namespace: Option<String>,
    },
}

/// Safe entry point to libxml2 schema compilation, validation and XPath
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Initializes libxml2 on first use; cheap afterwards.
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
            let _ = DEFAULT_ENTITY_LOADER.set(xmlGetExternalEntityLoader());
            xmlSetExternalEntityLoader(Some(route_entity));
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Compile an XSD held in memory. `location` is the schema's own URL:
    /// relative `xs:include`/`xs:import` locations resolve against it, and
    /// every resolved location is handed to `loader`. A `None` from the loader
    /// fails that include. Every parser diagnostic is returned in
    /// `SchemaParseFailed`.
    pub fn parse_schema<F>(
        &self,
        schema_data: &[u8],
        location: &str,
        mut loader: F,
    ) -> LibXml2Result<XmlSchemaPtr>
    where
        F: FnMut(&str) -> Option<Vec<u8>>,
    {
        let size = c_int::try_from(schema_data.len()).map_err(|_| LibXml2Error::InputTooLarge {
            size: schema_data.len(),
        })?;
        let c_location = CString::new(location).map_err(|_| LibXml2Error::SchemaParseFailed {
            details: vec![format!("schema location contains a NUL byte: {:?}", location)],
        })?;
        let _guard = SCHEMA_PARSE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut includes = IncludeContext {
            loader: &mut loader,
            loaded: Vec::new(),
        };
        let _active = ActiveIncludes::install(&mut includes);

        let mut diagnostics: Vec<Violation> = Vec::new();
        let (schema_ptr, doc) = unsafe {
            let capture = ErrorCapture::install(&mut diagnostics);
            let doc = xmlReadMemory(
                schema_data.as_ptr() as *const c_char,
                size,
                c_location.as_ptr(),
                ptr::null(),
                READ_OPTIONS,
            );
            if doc.is_null() {
                drop(capture);
                return Err(LibXml2Error::SchemaParseFailed {
                    details: diagnostics.iter().map(Violation::to_string).collect(),
                });
            }

            let parser_ctxt = xmlSchemaNewDocParserCtxt(doc);
            if parser_ctxt.is_null() {
                drop(capture);
                xmlFreeDoc(doc);
                return Err(LibXml2Error::MemoryAllocation);
            }

            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(collect_violation),
                &mut diagnostics as *mut Vec<Violation> as *mut c_void,
            );
            let schema_ptr = xmlSchemaParse(parser_ctxt);
            xmlSchemaFreeParserCtxt(parser_ctxt);
            drop(capture);
            (schema_ptr, doc)
        };

        if schema_ptr.is_null() {
            unsafe { xmlFreeDoc(doc) };
            return Err(LibXml2Error::SchemaParseFailed {
                details: diagnostics.iter().map(Violation::to_string).collect(),
            });
        }
        unsafe { XmlSchemaPtr::from_raw(schema_ptr, doc) }
    }

    /// Validate an in-memory document. `name` is used as the document URL in
    /// diagnostics. The network is never accessed while loading the document.
    pub fn validate_memory(
        &self,
        schema: &XmlSchemaPtr,
        content: &[u8],
        name: &str,
    ) -> LibXml2Result<ValidationResult> {
        let size = c_int::try_from(content.len()).map_err(|_| LibXml2Error::InputTooLarge {
            size: content.len(),
        })?;
        let load_failed = || LibXml2Error::DocumentLoadFailed { name: name.into() };
        let c_name = CString::new(name).map_err(|_| load_failed())?;

        let mut violations: Vec<Violation> = Vec::new();
        let code = unsafe {
            let doc = xmlReadMemory(
                content.as_ptr() as *const c_char,
                size,
                c_name.as_ptr(),
                ptr::null(),
                READ_OPTIONS,
            );
            if doc.is_null() {
                return Err(load_failed());
            }

            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                xmlFreeDoc(doc);
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }

            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(collect_violation),
                &mut violations as *mut Vec<Violation> as *mut c_void,
            );
            let code = xmlSchemaValidateDoc(valid_ctxt, doc);

            xmlSchemaFreeValidCtxt(valid_ctxt);
            xmlFreeDoc(doc);
            code
        };

        match ValidationResult::from_code(code, violations) {
            ValidationResult::InternalError { code } => Err(LibXml2Error::ValidationFailed {
                code,
                name: name.into(),
            }),
            result => Ok(result),
        }
    }

    /// Syntax check of an XPath 1.0 expression
    pub fn compile_xpath(&self, expression: &str) -> LibXml2Result<()> {
        let c_expression = xpath_string(expression, expression)?;

        let mut diagnostics: Vec<Violation> = Vec::new();
        let compiled = unsafe {
            let capture = ErrorCapture::install(&mut diagnostics);
            let compiled = xmlXPathCompile(c_expression.as_ptr());
            drop(capture);
            compiled
        };

        if compiled.is_null() {
            return Err(xpath_failed(expression, &diagnostics, "invalid expression"));
        }
        unsafe { xmlXPathFreeCompExpr(compiled) };
        Ok(())
    }

    /// Evaluate `expression` over the serialized document `content`.
    ///
    /// `context` addresses the context node as in [`XPathNode::Content`];
    /// `namespaces` are the prefix bindings visible to the expression.
    pub fn evaluate_xpath(
        &self,
        content: &[u8],
        context: &[usize],
        expression: &str,
        namespaces: &[(String, String)],
    ) -> LibXml2Result<XPathValue> {
        let size = c_int::try_from(content.len()).map_err(|_| LibXml2Error::InputTooLarge {
            size: content.len(),
        })?;
        let c_expression = xpath_string(expression, expression)?;
        let bindings = namespaces
            .iter()
            .filter(|(prefix, _)| prefix != "xml")
            .map(|(prefix, uri)| {
                Ok((xpath_string(expression, prefix)?, xpath_string(expression, uri)?))
            })
            .collect::<LibXml2Result<Vec<_>>>()?;

        let mut diagnostics: Vec<Violation> = Vec::new();
        unsafe {
            let doc = xmlReadMemory(
                content.as_ptr() as *const c_char,
                size,
                ptr::null(),
                ptr::null(),
                READ_OPTIONS,
            );
            if doc.is_null() {
                return Err(LibXml2Error::DocumentLoadFailed {
                    name: "<xpath context>".into(),
                });
            }

            let ctxt = xmlXPathNewContext(doc);
            if ctxt.is_null() {
                xmlFreeDoc(doc);
                return Err(LibXml2Error::MemoryAllocation);
            }
            for (prefix, uri) in &bindings {
                xmlXPathRegisterNs(ctxt, prefix.as_ptr(), uri.as_ptr());
            }

            let node = descend(doc as *mut XmlNode, context);
            let value = if node.is_null() {
                Err(xpath_failed(expression, &[], "context node not found"))
            } else {
                xmlXPathSetContextNode(node, ctxt);
                let capture = ErrorCapture::install(&mut diagnostics);
                let object = xmlXPathEval(c_expression.as_ptr(), ctxt);
                drop(capture);

                if object.is_null() {
                    Err(xpath_failed(expression, &diagnostics, "evaluation failed"))
                } else {
                    let value = read_object(object, expression);
                    xmlXPathFreeObject(object);
                    value
                }
            };

            xmlXPathFreeContext(ctxt);
            xmlFreeDoc(doc);
            value
        }
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

fn xpath_string(expression: &str, text: &str) -> LibXml2Result<CString> {
    CString::new(text).map_err(|_| LibXml2Error::XPathFailed {
        expression: expression.to_string(),
        details: vec!["NUL byte in expression or namespace binding".to_string()],
    })
}

fn xpath_failed(expression: &str, diagnostics: &[Violation], fallback: &str) -> LibXml2Error {
    let mut details: Vec<String> = diagnostics.iter().map(|v| v.message.clone()).collect();
    if details.is_empty() {
        details.push(fallback.to_string());
    }
    LibXml2Error::XPathFailed {
        expression: expression.to_string(),
        details,
    }
}

fn is_content(node_type: c_int) -> bool {
    matches!(
        node_type,
        XML_ELEMENT_NODE | XML_TEXT_NODE | XML_CDATA_SECTION_NODE | XML_PI_NODE | XML_COMMENT_NODE
    )
}

/// Follow child positions from the document node; null when a step is missing.
unsafe fn descend(doc: *mut XmlNode, path: &[usize]) -> *mut XmlNode {
    let mut node = doc;
    for &index in path {
        let mut child = unsafe { (*node).children };
        let mut seen = 0;
        while !child.is_null() {
            let node_type = unsafe { (*child).node_type };
            if is_content(node_type) {
                if seen == index {
                    break;
                }
                seen += 1;
            }
            child = unsafe { (*child).next };
        }
        if child.is_null() {
            return ptr::null_mut();
        }
        node = child;
    }
    node
}

unsafe fn content_path(mut node: *mut XmlNode) -> Vec<usize> {
    let mut path = Vec::new();
    while !node.is_null() && unsafe { (*node).node_type } != XML_DOCUMENT_NODE {
        let mut index = 0;
        let mut prev = unsafe { (*node).prev };
        while !prev.is_null() {
            if is_content(unsafe { (*prev).node_type }) {
                index += 1;
            }
            prev = unsafe { (*prev).prev };
        }
        path.push(index);
        node = unsafe { (*node).parent };
    }
    path.reverse();
    path
}

unsafe fn owned_string(text: *const c_char) -> Option<String> {
    if text.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned())
}

unsafe fn read_node(node: *mut XmlNode, expression: &str) -> LibXml2Result<XPathNode> {
    unsafe {
        match (*node).node_type {
            XML_ATTRIBUTE_NODE => {
                let ns = (*node).ns;
                Ok(XPathNode::Attribute {
                    owner: content_path((*node).parent),
                    local: owned_string((*node).name).unwrap_or_default(),
                    namespace: if ns.is_null() {
                        None
                    } else {
                        owned_string((*ns).href)
                    },
                })
            }
            XML_DOCUMENT_NODE => Ok(XPathNode::Content(Vec::new())),
            t if is_content(t) => Ok(XPathNode::Content(content_path(node))),
            t => Err(xpath_failed(
                expression,
                &[],
                &format!("selects an unsupported node type ({})", t),
            )),
        }
    }
}

unsafe fn read_object(object: *mut XmlXPathObject, expression: &str) -> LibXml2Result<XPathValue> {
    unsafe {
        match (*object).object_type {
            XPATH_NODESET => {
                let set = (*object).nodesetval;
                let mut nodes = Vec::new();
                if !set.is_null() && !(*set).node_tab.is_null() {
                    let count = usize::try_from((*set).node_nr).unwrap_or(0);
                    for i in 0..count {
                        let node = *(*set).node_tab.add(i);
                        if !node.is_null() {
                            nodes.push(read_node(node, expression)?);
                        }
                    }
                }
                Ok(XPathValue::Nodes(nodes))
            }
            XPATH_BOOLEAN => Ok(XPathValue::Boolean((*object).boolval != 0)),
            XPATH_NUMBER => Ok(XPathValue::Number((*object).floatval)),
            XPATH_STRING => Ok(XPathValue::String(
                owned_string((*object).stringval).unwrap_or_default(),
            )),
            t => Err(xpath_failed(
                expression,
                &[],
                &format!("unsupported result type ({})", t),
            )),
        }
    }
}
