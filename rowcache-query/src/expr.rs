//! Predicate expression tree
//!
//! Predicates are built with a small builder DSL and then compiled to SQL:
//!
//! ```ignore
//! let pred = col("Name").starts_with("S").and(col("Age").gt(30));
//! let join = field::<Order>("CustomerId").eq(field::<Customer>("Id"));
//! ```

use chrono::{DateTime, Utc};
use rowcache_core::{Entity, SqlValue};
use std::fmt;
use std::ops;
use uuid::Uuid;

/// Reference to an entity field. `entity` is `None` for an unqualified field,
/// which resolves against the entity being queried.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    pub entity: Option<String>,
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn sql(self) -> &'static str {
        match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// Method invoked by a [`Expr::Call`] node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Contains,
    StartsWith,
    EndsWith,
    /// Any other method. Always rejected by the compiler.
    Other(String),
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Contains => f.write_str("Contains"),
            Method::StartsWith => f.write_str("StartsWith"),
            Method::EndsWith => f.write_str("EndsWith"),
            Method::Other(name) => f.write_str(name),
        }
    }
}

/// Boolean expression over one or two entity types.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(FieldRef),
    /// A constant written into the predicate.
    Literal(SqlValue),
    /// A value captured from the caller's scope. Always parameterised.
    Captured(SqlValue),
    /// A finite sequence, only valid as the target of `Contains`.
    List(Vec<SqlValue>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        method: Method,
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
}

// ============================================================================
// BUILDERS
// ============================================================================

/// Unqualified field of the queried entity.
pub fn col(column: impl Into<String>) -> Expr {
    Expr::Field(FieldRef {
        entity: None,
        column: column.into(),
    })
}

/// Field qualified by its owning entity type.
pub fn field<E: Entity>(column: impl Into<String>) -> Expr {
    Expr::Field(FieldRef {
        entity: Some(E::schema().entity().to_string()),
        column: column.into(),
    })
}

pub fn lit(value: impl Into<SqlValue>) -> Expr {
    Expr::Literal(value.into())
}

/// Captured value, compiled to a named parameter.
pub fn bind(value: impl Into<SqlValue>) -> Expr {
    Expr::Captured(value.into())
}

pub fn list<I, V>(values: I) -> Expr
where
    I: IntoIterator<Item = V>,
    V: Into<SqlValue>,
{
    Expr::List(values.into_iter().map(Into::into).collect())
}

pub fn conditional(test: Expr, if_true: impl Into<Expr>, if_false: impl Into<Expr>) -> Expr {
    Expr::Conditional {
        test: Box::new(test),
        if_true: Box::new(if_true.into()),
        if_false: Box::new(if_false.into()),
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, rhs: impl Into<Expr>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(rhs.into()),
        }
    }

    fn method(self, method: Method, args: Vec<Expr>) -> Expr {
        Expr::Call {
            method,
            target: Box::new(self),
            args,
        }
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Or, rhs)
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ge, rhs)
    }

    /// Substring match.
    pub fn contains(self, needle: impl Into<Expr>) -> Expr {
        self.method(Method::Contains, vec![needle.into()])
    }

    pub fn starts_with(self, prefix: impl Into<Expr>) -> Expr {
        self.method(Method::StartsWith, vec![prefix.into()])
    }

    pub fn ends_with(self, suffix: impl Into<Expr>) -> Expr {
        self.method(Method::EndsWith, vec![suffix.into()])
    }

    /// Membership in a finite sequence: `values.Contains(self)`.
    pub fn is_in<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        list(values).method(Method::Contains, vec![self])
    }

    /// Arbitrary method call.
    pub fn call(self, method: impl Into<String>, args: Vec<Expr>) -> Expr {
        self.method(Method::Other(method.into()), args)
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(self),
        }
    }
}

macro_rules! impl_arith {
    ($($trait:ident :: $fn:ident => $op:ident),* $(,)?) => {
        $(
            impl<R: Into<Expr>> ops::$trait<R> for Expr {
                type Output = Expr;

                fn $fn(self, rhs: R) -> Expr {
                    self.binary(BinaryOp::$op, rhs)
                }
            }
        )*
    };
}

impl_arith! {
    Add::add => Add,
    Sub::sub => Sub,
    Mul::mul => Mul,
    Div::div => Div,
    Rem::rem => Rem,
}

macro_rules! impl_literal_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(v: $ty) -> Self {
                    Expr::Literal(v.into())
                }
            }
        )*
    };
}

impl_literal_from!(bool, i64, i32, f64, String, &str, Uuid, DateTime<Utc>, SqlValue);

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Field(r) => match &r.entity {
                Some(entity) => write!(f, "{}.{}", entity, r.column),
                None => f.write_str(&r.column),
            },
            Expr::Literal(v) => write!(f, "{}", v.to_sql_literal()),
            Expr::Captured(v) => write!(f, "captured({})", v.to_sql_literal()),
            Expr::List(values) => write!(f, "list[{}]", values.len()),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.sql(), right),
            Expr::Unary { op: UnaryOp::Not, operand } => write!(f, "!{}", operand),
            Expr::Unary { op: UnaryOp::Negate, operand } => write!(f, "-{}", operand),
            Expr::Call { method, target, args } => {
                write!(f, "{}.{}(", target, method)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Conditional { test, if_true, if_false } => {
                write!(f, "({} ? {} : {})", test, if_true, if_false)
            }
        }
    }
}
