#![forbid(unsafe_code)]

mod env;

pub use env::{Entry, EntryKind, Env, LookupError, ScopeSnapshot};

use miette::SourceSpan;

pub type Span = SourceSpan;

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

/// Resolved type of an expression or variable.
///
/// `Undetermined` only exists between parsing and type checking; the checker
/// replaces it everywhere before analysis runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Undetermined,
    Unit,
    Int,
    Float,
    String,
    ListInt,
    ListFloat,
    ListString,
}

impl Type {
    pub fn display(&self) -> &'static str {
        match self {
            Type::Undetermined => "<undetermined>",
            Type::Unit => "unit",
            Type::Int => "int",
            Type::Float => "float",
            Type::String => "string",
            Type::ListInt => "list int",
            Type::ListFloat => "list float",
            Type::ListString => "list string",
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Int | Type::Float | Type::String)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Type::ListInt | Type::ListFloat | Type::ListString)
    }

    /// List type for a scalar element type, if one exists.
    pub fn list_of(elem: Type) -> Option<Type> {
        match elem {
            Type::Int => Some(Type::ListInt),
            Type::Float => Some(Type::ListFloat),
            Type::String => Some(Type::ListString),
            _ => None,
        }
    }

    /// Element type of a list type, if `self` is one.
    pub fn elem(&self) -> Option<Type> {
        match self {
            Type::ListInt => Some(Type::Int),
            Type::ListFloat => Some(Type::Float),
            Type::ListString => Some(Type::String),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::String,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub ty: Type,
    pub name: String,
}

/// A single expression node.
///
/// `ty` is resolved and `env` is populated by the type checker; both are
/// placeholders straight out of the parser. The environment snapshot reflects
/// the scope visible at this node's position, not its enclosing statement's
/// end.
#[derive(Clone, Debug)]
pub struct Expr {
    pub span: Span,
    pub ty: Type,
    pub env: Option<ScopeSnapshot>,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Self {
            span,
            ty: Type::Undetermined,
            env: None,
            kind,
        }
    }

    pub fn with_type(span: Span, ty: Type, kind: ExprKind) -> Self {
        Self {
            span,
            ty,
            env: None,
            kind,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Literal(Value),
    /// `(val <type> <name> <init>)`; the declared type is the node's `ty`.
    CreateVar {
        name: String,
        init: Box<Expr>,
    },
    SetVar {
        name: String,
        value: Box<Expr>,
    },
    GetVar {
        name: String,
    },
    Define {
        name: String,
        ret: Type,
        params: Vec<Param>,
        body: Vec<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_body: Vec<Expr>,
        else_body: Vec<Expr>,
    },
    Loop {
        init: Box<Expr>,
        test: Box<Expr>,
        update: Box<Expr>,
        body: Vec<Expr>,
    },
    /// Rewrite target produced by the legality analyzer. `start`/`end` form a
    /// half-open ascending range; `captured` is the ordered, deduplicated set
    /// of outer-scope names the body touches (size suffixes stripped, index
    /// excluded).
    ParallelLoop {
        index: String,
        start: Box<Expr>,
        end: Box<Expr>,
        captured: Vec<String>,
        body: Vec<Expr>,
    },
    List {
        name: String,
        elem: Type,
        size: Box<Expr>,
    },
    ListAt {
        name: String,
        index: Box<Expr>,
    },
    ListSet {
        name: String,
        index: Box<Expr>,
        value: Box<Expr>,
    },
    /// Builtin signature with no body; the return type is the node's `ty`.
    PrimFunc {
        name: String,
        arg_types: Vec<Type>,
    },
}

impl ExprKind {
    /// Short tag for internal-error messages.
    pub fn tag(&self) -> &'static str {
        match self {
            ExprKind::Literal(_) => "Literal",
            ExprKind::CreateVar { .. } => "CreateVar",
            ExprKind::SetVar { .. } => "SetVar",
            ExprKind::GetVar { .. } => "GetVar",
            ExprKind::Define { .. } => "Define",
            ExprKind::Call { .. } => "Call",
            ExprKind::If { .. } => "If",
            ExprKind::Loop { .. } => "Loop",
            ExprKind::ParallelLoop { .. } => "ParallelLoop",
            ExprKind::List { .. } => "List",
            ExprKind::ListAt { .. } => "ListAt",
            ExprKind::ListSet { .. } => "ListSet",
            ExprKind::PrimFunc { .. } => "PrimFunc",
        }
    }
}

/// Strip the implicit `.size` suffix from a name, if present.
///
/// References to `a.size` count as references to `a` for capture and
/// dataflow membership tests.
pub fn size_base(name: &str) -> &str {
    name.strip_suffix(".size").unwrap_or(name)
}
