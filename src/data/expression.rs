// Distributed under the OSI-approved BSD 2-Clause License.
// See accompanying LICENSE file for details.

use std::fmt;

use serde::de::{Deserializer, Error, Visitor};
use serde::Deserialize;
use thiserror::Error;

mod ast;
mod grammar;

use self::ast::{Expr, ExprVar};

/// An error when parsing or evaluating an expression.
#[derive(Debug, Error)]
pub enum ExpressionError {
    /// Failed to parse an expression.
    #[error("failed to parse expression `{}`", text)]
    ParseFailure {
        /// The expression source text.
        text: String,
        /// The parser error.
        #[source]
        source: peg::error::ParseError<peg::str::LineCol>,
    },
    /// Reference to an undefined variable.
    #[error("undefined variable `${}`", name)]
    UndefinedVariable {
        /// The name of the variable.
        name: String,
    },
    /// A call to a function the language does not provide.
    #[error("unsupported function `{}`", name)]
    UnsupportedFunction {
        /// The name of the function.
        name: String,
    },
    /// A call with fewer arguments than the function requires.
    #[error("too few arguments for {}(): {}", name, count)]
    TooFewArguments {
        /// The name of the function.
        name: String,
        /// How many arguments were given.
        count: usize,
    },
}

impl ExpressionError {
    fn undefined_variable<N>(name: N) -> Self
    where
        N: Into<String>,
    {
        Self::UndefinedVariable {
            name: name.into(),
        }
    }

    fn unsupported_function<N>(name: N) -> Self
    where
        N: Into<String>,
    {
        Self::UnsupportedFunction {
            name: name.into(),
        }
    }
}

/// The value of an expression.
pub type Value = f64;

/// The context in which to execute an expression.
///
/// This provides values for variables referenced in expressions.
pub trait ExpressionContext {
    /// Get the value of a named variable (`$1`, `$loop.index`, …).
    ///
    /// The name does not include the leading `$`.
    fn get(&self, name: &str) -> Option<Value>;
    /// Get a random value in `[0, 1)`.
    fn rand(&self) -> Value;
    /// Get the difficulty of the entity using the expression.
    fn rank(&self) -> Value;
    /// Get the bullet's current heading, in BulletML-convention degrees.
    fn direction(&self) -> Value;
    /// Get the bullet's current speed.
    fn speed(&self) -> Value;
}

/// The result of evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// The computed value.
    pub value: Value,
    /// Whether the evaluation avoided `$rand`, `$direction`, and `$speed`.
    ///
    /// A deterministic evaluation depends only on its parameters and
    /// `$rank`, so repeating it with the same bindings yields the same
    /// value.
    pub deterministic: bool,
}

/// An expression which may be evaluated to compute a value.
#[derive(Debug, Clone)]
pub struct Expression {
    expr: Expr,
}

impl Expression {
    /// Parse an expression from a string.
    ///
    /// Subtrees made up entirely of constants are folded into literals.
    pub fn parse<E>(expr: E) -> Result<Self, ExpressionError>
    where
        E: AsRef<str>,
    {
        let text = expr.as_ref();
        grammar::expression(text)
            .map(|expr| {
                Expression {
                    expr: expr.constant_fold(),
                }
            })
            .map_err(|source| {
                ExpressionError::ParseFailure {
                    text: text.into(),
                    source,
                }
            })
    }

    /// Evaluate the expression with a given context.
    pub fn eval(&self, ctx: &dyn ExpressionContext) -> Result<Evaluation, ExpressionError> {
        let mut deterministic = true;
        let value = Self::eval_expr(&self.expr, ctx, &mut deterministic)?;
        Ok(Evaluation {
            value,
            deterministic,
        })
    }

    fn eval_expr(
        expr: &Expr,
        ctx: &dyn ExpressionContext,
        deterministic: &mut bool,
    ) -> Result<Value, ExpressionError> {
        match *expr {
            Expr::Unary {
                op: ref o,
                expr: ref e,
            } => Self::eval_expr(e.as_ref(), ctx, deterministic).map(|r| o.eval(r)),
            Expr::Binary {
                op: ref o,
                lhs: ref l,
                rhs: ref r,
            } => {
                Self::eval_expr(l.as_ref(), ctx, deterministic).and_then(|lr| {
                    Self::eval_expr(r.as_ref(), ctx, deterministic).map(|rr| o.eval(lr, rr))
                })
            },
            Expr::Call {
                ref name,
                ref args,
            } => {
                match name.as_str() {
                    "sin" | "cos" => {
                        let arg = args.first().ok_or_else(|| {
                            ExpressionError::TooFewArguments {
                                name: name.clone(),
                                count: 0,
                            }
                        })?;
                        let arg = Self::eval_expr(arg, ctx, deterministic)?.to_radians();
                        Ok(if name == "sin" {
                            arg.sin()
                        } else {
                            arg.cos()
                        })
                    },
                    _ => Err(ExpressionError::unsupported_function(name.as_str())),
                }
            },
            Expr::Float(f) => Ok(f),
            Expr::Var(ref v) => {
                match *v {
                    ExprVar::Rank => Ok(ctx.rank()),
                    ExprVar::Rand => {
                        *deterministic = false;
                        Ok(ctx.rand())
                    },
                    ExprVar::Direction => {
                        *deterministic = false;
                        Ok(ctx.direction())
                    },
                    ExprVar::Speed => {
                        *deterministic = false;
                        Ok(ctx.speed())
                    },
                    ExprVar::Named(ref n) => {
                        ctx.get(n)
                            .ok_or_else(|| ExpressionError::undefined_variable(n))
                    },
                }
            },
        }
    }
}

struct ExpressionVisitor;

impl<'de> Visitor<'de> for ExpressionVisitor {
    type Value = Expression;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "an expression string")
    }

    fn visit_str<E>(self, text: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Expression::parse(text.trim()).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(ExpressionVisitor)
    }
}

#[cfg(test)]
mod test {
    use crate::data::expression::{Expression, ExpressionContext, ExpressionError, Value};

    struct TestContext;

    impl ExpressionContext for TestContext {
        fn get(&self, name: &str) -> Option<Value> {
            match name {
                "1" => Some(2.),
                "2" => Some(3.),
                "loop.index" => Some(4.),
                _ => None,
            }
        }

        fn rand(&self) -> Value {
            0.25
        }

        fn rank(&self) -> Value {
            0.5
        }

        fn direction(&self) -> Value {
            90.
        }

        fn speed(&self) -> Value {
            1.5
        }
    }

    fn eval(expr: &str) -> (Value, bool) {
        let evaluation = Expression::parse(expr).unwrap().eval(&TestContext).unwrap();
        (evaluation.value, evaluation.deterministic)
    }

    fn eval_err(expr: &str) -> ExpressionError {
        Expression::parse(expr).unwrap().eval(&TestContext).unwrap_err()
    }

    #[test]
    fn test_eval_constant() {
        assert_eq!(eval("1+2*3"), (7., true));
    }

    #[test]
    fn test_eval_parameters() {
        assert_eq!(eval("$1+$2"), (5., true));
        assert_eq!(eval("$loop.index"), (4., true));
    }

    #[test]
    fn test_eval_rank_is_deterministic() {
        assert_eq!(eval("$rank*2"), (1., true));
    }

    #[test]
    fn test_eval_rand_is_not_deterministic() {
        assert_eq!(eval("$rand"), (0.25, false));
    }

    #[test]
    fn test_eval_bullet_state_is_not_deterministic() {
        assert_eq!(eval("$direction"), (90., false));
        assert_eq!(eval("$speed+1"), (2.5, false));
    }

    #[test]
    fn test_eval_trigonometry_matches_folding() {
        // `sin(30*$1)` evaluates at runtime; `sin(60)` folds at parse time.
        // The degree conversion happens in the same place for both.
        let runtime = eval("sin(30*$1)").0;
        let folded = eval("sin(60)").0;
        assert_eq!(runtime.to_bits(), folded.to_bits());
    }

    #[test]
    fn test_eval_undefined_variable() {
        let err = eval_err("$undefined");
        assert_eq!(err.to_string(), "undefined variable `$undefined`");
    }

    #[test]
    fn test_eval_unsupported_function() {
        let err = eval_err("tan($1)");
        assert_eq!(err.to_string(), "unsupported function `tan`");
    }

    #[test]
    fn test_eval_zero_argument_trigonometry() {
        let err = eval_err("sin()");
        assert_eq!(err.to_string(), "too few arguments for sin(): 0");
    }

    #[test]
    fn test_parse_failure_names_text() {
        let err = Expression::parse("1+").unwrap_err();
        assert_eq!(err.to_string(), "failed to parse expression `1+`");
    }
}
