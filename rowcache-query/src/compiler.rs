//! Predicate compiler
//!
//! Turns an [`Expr`] into a [`WherePart`]: SQL text in the neutral dialect
//! plus the parameters it references. Compilation is a structural recursion
//! over the tree; any node it does not recognise is a hard error.
//!
//! Rules:
//! - integer literals are inlined; every other literal and every captured
//!   value becomes a fresh `@pN` parameter, numbered from 1 per compilation
//! - `=`/`<>` against a parameter bound to null become `IS`/`IS NOT`
//! - a bool field in a boolean position compiles to `[Field] = @pN` with
//!   `@pN` bound to true
//! - string `Contains`/`StartsWith`/`EndsWith` compile to `LIKE` with the
//!   bound value wrapped in `%` on both sides, the right, or the left
//! - `Contains` on a sequence compiles to `IN (...)`, one parameter per item
//! - in a relation predicate every column is qualified as `[Entity].[Column]`

use crate::expr::{BinaryOp, Expr, FieldRef, Method, UnaryOp};
use rowcache_core::{Entity, EntitySchema, ExpressionError, FieldType, Parameters, SqlValue};

/// A compiled predicate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WherePart {
    pub sql: String,
    pub parameters: Parameters,
}

/// Compile a predicate over a single entity type.
pub fn compile<T: Entity>(expr: &Expr) -> Result<WherePart, ExpressionError> {
    PredicateCompiler::new(T::schema()).compile(expr)
}

/// Compile a predicate over the target type `T` and a related type `R`.
/// Columns are qualified with their owning entity's name.
pub fn compile_relation<T: Entity, R: Entity>(expr: &Expr) -> Result<WherePart, ExpressionError> {
    PredicateCompiler::relation(T::schema(), R::schema())?.compile(expr)
}

struct Fragment {
    sql: String,
    /// Needs parentheses when nested inside another operator.
    compound: bool,
    /// Is a parameter bound to null.
    null_param: bool,
}

impl Fragment {
    fn plain(sql: String) -> Self {
        Self {
            sql,
            compound: false,
            null_param: false,
        }
    }

    fn compound(sql: String) -> Self {
        Self {
            sql,
            compound: true,
            null_param: false,
        }
    }

    fn nested(&self) -> String {
        if self.compound {
            format!("({})", self.sql)
        } else {
            self.sql.clone()
        }
    }
}

/// Stateful compiler; one instance per compilation.
pub struct PredicateCompiler<'a> {
    target: &'a EntitySchema,
    related: Option<&'a EntitySchema>,
    parameters: Parameters,
    next_param: usize,
}

impl<'a> PredicateCompiler<'a> {
    pub fn new(target: &'a EntitySchema) -> Self {
        Self {
            target,
            related: None,
            parameters: Parameters::new(),
            next_param: 0,
        }
    }

    pub fn relation(
        target: &'a EntitySchema,
        related: &'a EntitySchema,
    ) -> Result<Self, ExpressionError> {
        if target.entity() == related.entity() {
            return Err(ExpressionError::AmbiguousRelation {
                entity: target.entity().to_string(),
            });
        }
        Ok(Self {
            related: Some(related),
            ..Self::new(target)
        })
    }

    pub fn compile(mut self, expr: &Expr) -> Result<WherePart, ExpressionError> {
        let fragment = self.visit(expr, true)?;
        Ok(WherePart {
            sql: fragment.sql,
            parameters: self.parameters,
        })
    }

    fn bind(&mut self, value: SqlValue) -> Fragment {
        self.next_param += 1;
        let name = format!("p{}", self.next_param);
        let null_param = value.is_null();
        let sql = format!("@{}", name);
        self.parameters.insert(name, value);
        Fragment {
            sql,
            compound: false,
            null_param,
        }
    }

    fn resolve(&self, field: &FieldRef) -> Result<(&'a EntitySchema, FieldType), ExpressionError> {
        let schema = match (&field.entity, self.related) {
            (None, _) => self.target,
            (Some(name), _) if name == self.target.entity() => self.target,
            (Some(name), Some(related)) if name == related.entity() => related,
            (Some(name), _) => {
                return Err(ExpressionError::UnknownField {
                    entity: name.clone(),
                    field: field.column.clone(),
                })
            }
        };
        let column = schema
            .column(&field.column)
            .ok_or_else(|| ExpressionError::UnknownField {
                entity: schema.entity().to_string(),
                field: field.column.clone(),
            })?;
        Ok((schema, column.field_type))
    }

    fn visit(&mut self, expr: &Expr, boolean: bool) -> Result<Fragment, ExpressionError> {
        match expr {
            Expr::Field(field) => self.visit_field(field, boolean),
            Expr::Literal(SqlValue::Int(v)) => Ok(Fragment::plain(v.to_string())),
            Expr::Literal(value) | Expr::Captured(value) => Ok(self.bind(value.clone())),
            Expr::Binary { op, left, right } => self.visit_binary(*op, left, right),
            Expr::Unary { op, operand } => {
                let inner = self.visit(operand, *op == UnaryOp::Not)?;
                let sql = match op {
                    UnaryOp::Not => format!("NOT {}", inner.nested()),
                    UnaryOp::Negate => format!("-{}", inner.nested()),
                };
                Ok(Fragment::plain(sql))
            }
            Expr::Call {
                method,
                target,
                args,
            } => self.visit_call(expr, method, target, args),
            Expr::List(_) | Expr::Conditional { .. } => Err(unsupported(expr)),
        }
    }

    fn visit_field(&mut self, field: &FieldRef, boolean: bool) -> Result<Fragment, ExpressionError> {
        let (schema, field_type) = self.resolve(field)?;
        let column = match self.related {
            Some(_) => format!("[{}].[{}]", schema.entity(), field.column),
            None => format!("[{}]", field.column),
        };
        if boolean && field_type == FieldType::Bool {
            let param = self.bind(SqlValue::Bool(true));
            return Ok(Fragment::compound(format!("{} = {}", column, param.sql)));
        }
        Ok(Fragment::plain(column))
    }

    fn visit_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<Fragment, ExpressionError> {
        let logical = op.is_logical();
        let lhs = self.visit(left, logical)?;
        let rhs = self.visit(right, logical)?;
        let token = match op {
            BinaryOp::Eq if lhs.null_param || rhs.null_param => "IS",
            BinaryOp::Ne if lhs.null_param || rhs.null_param => "IS NOT",
            other => other.sql(),
        };
        Ok(Fragment::compound(format!(
            "{} {} {}",
            lhs.nested(),
            token,
            rhs.nested()
        )))
    }

    fn visit_call(
        &mut self,
        node: &Expr,
        method: &Method,
        target: &Expr,
        args: &[Expr],
    ) -> Result<Fragment, ExpressionError> {
        let [arg] = args else {
            return Err(unsupported(node));
        };
        match (method, target) {
            (Method::Contains, Expr::List(values)) => {
                let needle = self.visit(arg, false)?;
                if values.is_empty() {
                    return Ok(Fragment::compound("1 = 0".to_string()));
                }
                let params: Vec<String> = values
                    .iter()
                    .map(|v| self.bind(v.clone()).sql)
                    .collect();
                Ok(Fragment::compound(format!(
                    "{} IN ({})",
                    needle.nested(),
                    params.join(", ")
                )))
            }
            (Method::Contains | Method::StartsWith | Method::EndsWith, Expr::Field(_)) => {
                let text = match arg {
                    Expr::Literal(SqlValue::Text(s)) | Expr::Captured(SqlValue::Text(s)) => s,
                    _ => return Err(unsupported(node)),
                };
                let pattern = match method {
                    Method::Contains => format!("%{}%", text),
                    Method::StartsWith => format!("{}%", text),
                    _ => format!("%{}", text),
                };
                let column = self.visit(target, false)?;
                let param = self.bind(SqlValue::Text(pattern));
                Ok(Fragment::compound(format!(
                    "{} LIKE {}",
                    column.nested(),
                    param.sql
                )))
            }
            _ => Err(unsupported(node)),
        }
    }
}

fn unsupported(node: &Expr) -> ExpressionError {
    let kind = match node {
        Expr::List(_) => "sequence outside Contains",
        Expr::Conditional { .. } => "conditional",
        Expr::Call { .. } => "method call",
        _ => "expression",
    };
    ExpressionError::UnsupportedExpression {
        node: format!("{} `{}`", kind, node),
    }
}
