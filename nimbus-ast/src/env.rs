#![forbid(unsafe_code)]

use std::rc::Rc;

use miette::Diagnostic;
use thiserror::Error;

use crate::{Span, Type};

#[derive(Debug, Error, Diagnostic)]
pub enum LookupError {
    #[error("variable {name} does not exist")]
    #[diagnostic(code(nimbus::env::not_found))]
    NotFound {
        name: String,
        #[label]
        span: Span,
    },
    #[error("{name} is a function; expected a variable")]
    #[diagnostic(code(nimbus::env::not_a_variable))]
    NotAVariable {
        name: String,
        #[label]
        span: Span,
    },
    #[error("variable {name} has unresolved type")]
    #[diagnostic(code(nimbus::env::unresolved))]
    Unresolved {
        name: String,
        #[label]
        span: Span,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Variable,
    Function,
}

/// One environment entry. `sig[0]` is the variable type or function return
/// type; for functions, `sig[1..]` are the parameter types.
#[derive(Clone, Debug)]
pub struct Entry {
    pub name: String,
    pub sig: Vec<Type>,
    pub kind: EntryKind,
}

/// A link in the scope chain. `entry` is `None` for a scope marker.
#[derive(Debug)]
struct Link {
    entry: Option<Entry>,
    parent: Option<Rc<Link>>,
}

/// Mutable scope environment used by the type checker.
///
/// Entries hang off a reference-counted parent-pointing chain, so taking a
/// snapshot is an `Rc` clone and old snapshots stay valid after later
/// pushes and pops.
#[derive(Default)]
pub struct Env {
    head: Option<Rc<Link>>,
}

impl Env {
    pub fn new() -> Self {
        Self { head: None }
    }

    pub fn push_scope(&mut self) {
        self.head = Some(Rc::new(Link {
            entry: None,
            parent: self.head.take(),
        }));
    }

    /// Pop entries until a scope marker is consumed. Returns false when no
    /// marker exists, which indicates a compiler bug upstream.
    #[must_use]
    pub fn pop_scope(&mut self) -> bool {
        let mut cur = self.head.take();
        while let Some(link) = cur {
            let is_marker = link.entry.is_none();
            cur = link.parent.clone();
            if is_marker {
                self.head = cur;
                return true;
            }
        }
        false
    }

    fn push_entry(&mut self, entry: Entry) {
        self.head = Some(Rc::new(Link {
            entry: Some(entry),
            parent: self.head.take(),
        }));
    }

    /// Bind a variable. List variables also get the implicit read-only
    /// `<name>.size` entry.
    pub fn add_variable(&mut self, name: &str, ty: Type) {
        self.push_entry(Entry {
            name: name.to_string(),
            sig: vec![ty],
            kind: EntryKind::Variable,
        });

        if ty.is_list() {
            self.push_entry(Entry {
                name: format!("{name}.size"),
                sig: vec![Type::Int],
                kind: EntryKind::Variable,
            });
        }
    }

    pub fn add_function(&mut self, name: &str, sig: Vec<Type>) {
        self.push_entry(Entry {
            name: name.to_string(),
            sig,
            kind: EntryKind::Function,
        });
    }

    /// Check whether a name is bound in the current scope only; lookup stops
    /// at the first scope marker.
    pub fn name_in_scope(&self, name: &str) -> bool {
        let mut cur = self.head.as_deref();
        while let Some(link) = cur {
            match &link.entry {
                None => return false,
                Some(e) if e.name == name => return true,
                Some(_) => {}
            }
            cur = link.parent.as_deref();
        }
        false
    }

    pub fn snapshot(&self) -> ScopeSnapshot {
        ScopeSnapshot {
            head: self.head.clone(),
        }
    }
}

/// Immutable view of the environment at one point of the program, attached
/// to validated expression nodes.
#[derive(Clone, Debug)]
pub struct ScopeSnapshot {
    head: Option<Rc<Link>>,
}

impl ScopeSnapshot {
    /// Full lookup: scope markers are skipped, so the nearest (shadowing)
    /// binding wins.
    pub fn entry(&self, name: &str) -> Option<Entry> {
        let mut cur = self.head.as_deref();
        while let Some(link) = cur {
            if let Some(e) = &link.entry {
                if e.name == name {
                    return Some(e.clone());
                }
            }
            cur = link.parent.as_deref();
        }
        None
    }

    /// Resolve a variable name to its declared type.
    pub fn lookup_variable(&self, span: Span, name: &str) -> Result<Type, LookupError> {
        let Some(entry) = self.entry(name) else {
            return Err(LookupError::NotFound {
                name: name.to_string(),
                span,
            });
        };

        if entry.kind != EntryKind::Variable || entry.sig.len() != 1 {
            return Err(LookupError::NotAVariable {
                name: name.to_string(),
                span,
            });
        }

        match entry.sig[0] {
            Type::Undetermined | Type::Unit => Err(LookupError::Unresolved {
                name: name.to_string(),
                span,
            }),
            ty => Ok(ty),
        }
    }

    /// Resolve a function name to `(return type, parameter types)`.
    pub fn lookup_function(&self, span: Span, name: &str) -> Result<(Type, Vec<Type>), LookupError> {
        let Some(entry) = self.entry(name) else {
            return Err(LookupError::NotFound {
                name: name.to_string(),
                span,
            });
        };

        if entry.kind != EntryKind::Function {
            return Err(LookupError::NotAVariable {
                name: name.to_string(),
                span,
            });
        }

        let ret = entry.sig[0];
        Ok((ret, entry.sig[1..].to_vec()))
    }
}
