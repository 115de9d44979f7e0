//! Endpoint registry: the static contract of every remote operation.
//!
//! Operations are declared once at start-up with [`Registry::register`] and
//! read-only afterwards (the client holds the registry behind an `Arc`).
//! Declaration mistakes (duplicate names, queries that claim to invalidate,
//! mutations that claim to provide, malformed path templates) fail at
//! registration, never at request time.

use std::collections::HashMap;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::transport::{Method, Request};

use super::tag::{Tag, TagSet};

/// Bytes escaped in a path segment filled from an argument.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Whether an operation reads (and is cached) or writes (and invalidates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// Errors raised while declaring or resolving operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("operation `{0}` is already registered")]
    Duplicate(String),

    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("operation `{name}` is a {actual:?}, expected a {expected:?}")]
    KindMismatch {
        name: String,
        expected: OperationKind,
        actual: OperationKind,
    },

    #[error("query `{0}` cannot invalidate tags")]
    QueryInvalidates(String),

    #[error("mutation `{0}` cannot provide tags")]
    MutationProvides(String),

    #[error("query `{0}` must use GET")]
    QueryMethod(String),

    #[error("operation `{name}` has a malformed path template `{path}`")]
    MalformedPath { name: String, path: String },

    #[error("operation `{name}` is missing path argument `{field}`")]
    MissingPathArgument { name: String, field: String },

    #[error("operation `{0}` expects an object of arguments")]
    NonObjectArguments(String),
}

/// Local failure raised before a mutation reaches the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A named remote interaction.
///
/// ```
/// use toeic_query::query::{Operation, Tag};
/// use toeic_query::transport::Method;
///
/// let op = Operation::mutation("deleteFlashcard", Method::Delete, "/flashcards/{id}")
///     .invalidates([Tag::Flashcard, Tag::Category]);
/// assert_eq!(op.path(), "/flashcards/{id}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    name: String,
    kind: OperationKind,
    method: Method,
    path: String,
    provides: TagSet,
    invalidates: TagSet,
    required: Vec<String>,
}

impl Operation {
    /// A cached read, always a `GET`.
    #[must_use]
    pub fn query(name: &str, path: &str) -> Self {
        Self::with_kind(name, OperationKind::Query, Method::Get, path)
    }

    /// A write that invalidates tags on success.
    #[must_use]
    pub fn mutation(name: &str, method: Method, path: &str) -> Self {
        Self::with_kind(name, OperationKind::Mutation, method, path)
    }

    fn with_kind(name: &str, kind: OperationKind, method: Method, path: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            method,
            path: path.to_string(),
            provides: TagSet::new(),
            invalidates: TagSet::new(),
            required: Vec::new(),
        }
    }

    /// Tags attached to this query's results.
    #[must_use]
    pub fn provides(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.provides.extend(tags);
        self
    }

    /// Tags dirtied when this mutation succeeds.
    #[must_use]
    pub fn invalidates(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.invalidates.extend(tags);
        self
    }

    /// Argument field that must be present and non-blank.
    #[must_use]
    pub fn require(mut self, field: &str) -> Self {
        self.required.push(field.to_string());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn provided_tags(&self) -> &TagSet {
        &self.provides
    }

    #[must_use]
    pub const fn invalidated_tags(&self) -> &TagSet {
        &self.invalidates
    }

    #[must_use]
    pub fn required_fields(&self) -> &[String] {
        &self.required
    }

    /// Checks required fields: each must be present, non-null and, if a
    /// string, not blank.
    ///
    /// # Errors
    ///
    /// Returns the first missing field, or a registry error when `args` is
    /// neither an object nor null.
    pub fn validate(&self, args: &Value) -> Result<(), ValidationError> {
        let fields = self.fields(args)?;
        for field in &self.required {
            let present = match fields.and_then(|fields| fields.get(field)) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(ValidationError::Missing { field: field.clone() });
            }
        }
        Ok(())
    }

    /// Builds the transport request for `args`.
    ///
    /// Path placeholders (`{id}`) are filled from the arguments, each
    /// percent-encoded as a single path segment. The
    /// remaining arguments become query parameters for `GET`/`DELETE` and a
    /// JSON body otherwise.
    ///
    /// # Errors
    ///
    /// Fails if a placeholder has no matching scalar argument or if `args`
    /// is not an object.
    pub fn request(&self, args: &Value) -> Result<Request, RegistryError> {
        let mut rest = self.fields(args)?.cloned().unwrap_or_default();
        let mut path = String::with_capacity(self.path.len());

        for segment in segments(&self.path) {
            match segment {
                Segment::Literal(text) => path.push_str(text),
                Segment::Placeholder(field) => {
                    let value = match rest.remove(field) {
                        Some(Value::String(s)) if !s.is_empty() => s,
                        Some(Value::Number(n)) => n.to_string(),
                        _ => {
                            return Err(RegistryError::MissingPathArgument {
                                name: self.name.clone(),
                                field: field.to_string(),
                            });
                        }
                    };
                    path.extend(utf8_percent_encode(&value, SEGMENT));
                }
            }
        }

        let mut request = Request::new(self.method, path);
        if self.method.has_body() {
            if !rest.is_empty() {
                request = request.with_body(Value::Object(rest));
            }
        } else {
            for (key, value) in rest {
                match value {
                    Value::Null => {}
                    Value::String(s) => request = request.with_query(key, s),
                    other => request = request.with_query(key, other.to_string()),
                }
            }
        }
        Ok(request)
    }

    fn fields<'a>(&self, args: &'a Value) -> Result<Option<&'a Map<String, Value>>, RegistryError> {
        match args {
            Value::Null => Ok(None),
            Value::Object(fields) => Ok(Some(fields)),
            _ => Err(RegistryError::NonObjectArguments(self.name.clone())),
        }
    }

    fn check(&self) -> Result<(), RegistryError> {
        match self.kind {
            OperationKind::Query if !self.invalidates.is_empty() => {
                return Err(RegistryError::QueryInvalidates(self.name.clone()));
            }
            OperationKind::Query if self.method != Method::Get => {
                return Err(RegistryError::QueryMethod(self.name.clone()));
            }
            OperationKind::Mutation if !self.provides.is_empty() => {
                return Err(RegistryError::MutationProvides(self.name.clone()));
            }
            _ => {}
        }

        let well_formed = self.path.starts_with('/') && {
            let mut open = false;
            let mut ok = true;
            for c in self.path.chars() {
                match c {
                    '{' if open => ok = false,
                    '{' => open = true,
                    '}' if !open => ok = false,
                    '}' => open = false,
                    _ => {}
                }
            }
            ok && !open && !self.path.contains("{}")
        };
        if !well_formed {
            return Err(RegistryError::MalformedPath {
                name: self.name.clone(),
                path: self.path.clone(),
            });
        }
        Ok(())
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn segments(path: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        if start > 0 {
            out.push(Segment::Literal(&rest[..start]));
        }
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push(Segment::Placeholder(&rest[start + 1..start + len]));
        rest = &rest[start + len + 1..];
    }
    if !rest.is_empty() {
        out.push(Segment::Literal(rest));
    }
    out
}

/// Table of every operation, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    operations: HashMap<String, Operation>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an operation.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate name or an inconsistent declaration.
    pub fn register(&mut self, operation: Operation) -> Result<(), RegistryError> {
        if self.operations.contains_key(operation.name()) {
            return Err(RegistryError::Duplicate(operation.name.clone()));
        }
        operation.check()?;
        tracing::trace!(name = operation.name(), kind = ?operation.kind(), "Operation registered");
        self.operations.insert(operation.name.clone(), operation);
        Ok(())
    }

    /// Looks up an operation by name.
    ///
    /// # Errors
    ///
    /// Fails if no operation has this name.
    pub fn get(&self, name: &str) -> Result<&Operation, RegistryError> {
        self.operations
            .get(name)
            .ok_or_else(|| RegistryError::UnknownOperation(name.to_string()))
    }

    /// Looks up an operation and checks its kind.
    ///
    /// # Errors
    ///
    /// Fails if the operation is unknown or of the other kind.
    pub fn get_kind(&self, name: &str, expected: OperationKind) -> Result<&Operation, RegistryError> {
        let operation = self.get(name)?;
        if operation.kind == expected {
            Ok(operation)
        } else {
            Err(RegistryError::KindMismatch {
                name: name.to_string(),
                expected,
                actual: operation.kind,
            })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
