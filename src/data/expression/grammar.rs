// Distributed under the OSI-approved BSD 2-Clause License.
// See accompanying LICENSE file for details.

use crate::data::expression::ast::{BinaryOp, Expr, ExprVar, UnaryOp};
use crate::data::expression::Value;

peg::parser! {
    grammar parser() for str {
        rule _() = quiet!{[' ' | '\t' | '\r' | '\n']*}

        pub rule expression() -> Expr
            = _ e:arithmetic() _ { e }

        rule arithmetic() -> Expr = precedence!{
            lhs:(@) _ "+" _ rhs:@ { Expr::binary(BinaryOp::Add, lhs, rhs) }
            lhs:(@) _ "-" _ rhs:@ { Expr::binary(BinaryOp::Sub, lhs, rhs) }
            --
            lhs:(@) _ "*" _ rhs:@ { Expr::binary(BinaryOp::Mul, lhs, rhs) }
            lhs:(@) _ "/" _ rhs:@ { Expr::binary(BinaryOp::Div, lhs, rhs) }
            lhs:(@) _ "%" _ rhs:@ { Expr::binary(BinaryOp::Mod, lhs, rhs) }
            --
            "-" _ expr:@ { Expr::unary(UnaryOp::Negate, expr) }
            --
            e:atom() { e }
        }

        rule atom() -> Expr
            = f:float() { Expr::Float(f) }
            / "(" _ e:arithmetic() _ ")" { e }
            / call()
            / variable()

        rule float() -> Value
            = text:$(['0'..='9']+ ("." ['0'..='9']*)? / "." ['0'..='9']+)
              {? text.parse().or(Err("number")) }

        rule call() -> Expr
            = name:identifier() _ "(" _ args:(arithmetic() ** comma()) _ ")"
              { Expr::call(name, args) }

        rule comma() = _ "," _

        rule variable() -> Expr
            = "$rand" !identifier_char() { Expr::Var(ExprVar::Rand) }
            / "$rank" !identifier_char() { Expr::Var(ExprVar::Rank) }
            / "$direction" !identifier_char() { Expr::Var(ExprVar::Direction) }
            / "$speed" !identifier_char() { Expr::Var(ExprVar::Speed) }
            / "$" name:$(identifier_char()+ ("." identifier_char()+)*)
              { Expr::Var(ExprVar::Named(name.into())) }

        rule identifier() -> &'input str
            = $(['a'..='z' | 'A'..='Z' | '_'] ['a'..='z' | 'A'..='Z' | '0'..='9' | '_']*)

        rule identifier_char()
            = ['a'..='z' | 'A'..='Z' | '0'..='9' | '_']
    }
}

pub(super) use self::parser::expression;

#[cfg(test)]
mod test {
    use crate::data::expression::ast::{BinaryOp, Expr, ExprVar, UnaryOp};
    use crate::data::expression::grammar;
    use crate::data::expression::Value;

    #[test]
    fn test_parse_paren_mismatch_fail() {
        let err = grammar::expression("(").unwrap_err();

        assert_eq!(err.location.line, 1);
        assert_eq!(err.location.column, 2);
        assert_eq!(err.location.offset, 1);
    }

    #[test]
    fn test_parse_lonely_binop_fail() {
        let err = grammar::expression("+").unwrap_err();

        assert_eq!(err.location.line, 1);
        assert_eq!(err.location.column, 1);
        assert_eq!(err.location.offset, 0);
    }

    #[test]
    fn test_parse_half_binop_fail() {
        let err = grammar::expression("4+").unwrap_err();

        assert_eq!(err.location.line, 1);
        assert_eq!(err.location.column, 3);
        assert_eq!(err.location.offset, 2);
    }

    fn check_literal(actual: Expr, expected: Value) {
        check_literal_ref(&actual, expected);
    }

    fn check_literal_ref(actual: &Expr, expected: Value) {
        if let Expr::Float(actual) = *actual {
            assert_eq!(actual, expected);
        } else {
            panic!("did not parse a float: {:?}", actual);
        }
    }

    #[test]
    fn test_parse_literal() {
        let res = grammar::expression("4").unwrap();

        check_literal(res, 4.);
    }

    #[test]
    fn test_parse_literal_float() {
        let res = grammar::expression("4.").unwrap();

        check_literal(res, 4.);
    }

    #[test]
    fn test_parse_literal_float_implicit_zero() {
        let res = grammar::expression(".5").unwrap();

        check_literal(res, 0.5);
    }

    #[test]
    fn test_parse_literal_float_decimals() {
        let res = grammar::expression("4.5").unwrap();

        check_literal(res, 4.5);
    }

    fn check_binop(actual: Expr, op: BinaryOp, lhs: Value, rhs: Value) {
        if let Expr::Binary {
            op: aop,
            lhs: alhs,
            rhs: arhs,
        } = actual
        {
            assert_eq!(aop, op);
            check_literal_ref(alhs.as_ref(), lhs);
            check_literal_ref(arhs.as_ref(), rhs);
        } else {
            panic!("did not parse a binary operation: {:?}", actual);
        }
    }

    #[test]
    fn test_parse_binary_ops() {
        let res = grammar::expression("4+2").unwrap();
        check_binop(res, BinaryOp::Add, 4., 2.);

        let res = grammar::expression("4-2").unwrap();
        check_binop(res, BinaryOp::Sub, 4., 2.);

        let res = grammar::expression("4*2").unwrap();
        check_binop(res, BinaryOp::Mul, 4., 2.);

        let res = grammar::expression("4/2").unwrap();
        check_binop(res, BinaryOp::Div, 4., 2.);

        let res = grammar::expression("4%2").unwrap();
        check_binop(res, BinaryOp::Mod, 4., 2.);
    }

    #[test]
    fn test_parse_whitespace() {
        let res = grammar::expression(" 4 + 2 ").unwrap();
        check_binop(res, BinaryOp::Add, 4., 2.);
    }

    fn check_unaryop(actual: Expr, op: UnaryOp, expected: Value) {
        if let Expr::Unary {
            op: aop,
            expr: aexpr,
        } = actual
        {
            assert_eq!(aop, op);
            check_literal_ref(aexpr.as_ref(), expected);
        } else {
            panic!("did not parse an unary operation: {:?}", actual);
        }
    }

    #[test]
    fn test_parse_unary_ops() {
        let res = grammar::expression("-4").unwrap();
        check_unaryop(res, UnaryOp::Negate, 4.);
    }

    fn check_variable(actual: Expr, expected: ExprVar) {
        if let Expr::Var(actual) = actual {
            assert_eq!(actual, expected);
        } else {
            panic!("did not parse a variable: {:?}", actual);
        }
    }

    #[test]
    fn test_parse_rank() {
        let res = grammar::expression("$rank").unwrap();
        check_variable(res, ExprVar::Rank);
    }

    #[test]
    fn test_parse_rand() {
        let res = grammar::expression("$rand").unwrap();
        check_variable(res, ExprVar::Rand);
    }

    #[test]
    fn test_parse_direction() {
        let res = grammar::expression("$direction").unwrap();
        check_variable(res, ExprVar::Direction);
    }

    #[test]
    fn test_parse_speed() {
        let res = grammar::expression("$speed").unwrap();
        check_variable(res, ExprVar::Speed);
    }

    #[test]
    fn test_parse_positional() {
        let res = grammar::expression("$1").unwrap();
        check_variable(res, ExprVar::Named("1".into()));

        let res = grammar::expression("$12").unwrap();
        check_variable(res, ExprVar::Named("12".into()));
    }

    #[test]
    fn test_parse_loop_index() {
        let res = grammar::expression("$loop.index").unwrap();
        check_variable(res, ExprVar::Named("loop.index".into()));
    }

    #[test]
    fn test_parse_variable() {
        let res = grammar::expression("$var").unwrap();
        check_variable(res, ExprVar::Named("var".into()));
    }

    #[test]
    fn test_parse_rank_trailing() {
        let res = grammar::expression("$rankvar").unwrap();
        check_variable(res, ExprVar::Named("rankvar".into()));
    }

    #[test]
    fn test_parse_rand_trailing() {
        let res = grammar::expression("$randvar").unwrap();
        check_variable(res, ExprVar::Named("randvar".into()));
    }

    #[test]
    fn test_parse_call() {
        let res = grammar::expression("sin(90)").unwrap();
        if let Expr::Call {
            name,
            args,
        } = res
        {
            assert_eq!(name, "sin");
            assert_eq!(args.len(), 1);
            check_literal_ref(&args[0], 90.);
        } else {
            panic!("did not parse a call: {:?}", res);
        }
    }

    #[test]
    fn test_parse_call_no_args() {
        let res = grammar::expression("sin()").unwrap();
        if let Expr::Call {
            name,
            args,
        } = res
        {
            assert_eq!(name, "sin");
            assert!(args.is_empty());
        } else {
            panic!("did not parse a call: {:?}", res);
        }
    }

    #[test]
    fn test_parse_bare_identifier_fails() {
        assert!(grammar::expression("foo").is_err());
    }
}
