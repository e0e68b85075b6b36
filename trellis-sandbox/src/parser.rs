//! nom grammar for the restricted expression dialect.
//!
//! The grammar has no loop or call forms at all; `foo(...)` fails to parse
//! and is reported as a disallowed construct so authors get a pointed
//! message instead of a generic syntax error.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, none_of},
    combinator::{map, map_res, opt, recognize},
    error::ParseError,
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use serde_json::Value;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{SandboxError, SandboxResult};

// Whitespace wrapper
fn ws<'a, F, O, E: ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn parse_identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
        String::from,
    )(input)
}

fn parse_number(input: &str) -> IResult<&str, Value> {
    map_res(
        recognize(tuple((digit1, opt(tuple((char('.'), digit1)))))),
        |s: &str| {
            if s.contains('.') {
                s.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or("invalid float")
            } else {
                s.parse::<i64>()
                    .map(|n| Value::Number(n.into()))
                    .map_err(|_| "invalid integer")
            }
        },
    )(input)
}

fn parse_string_literal(input: &str) -> IResult<&str, Value> {
    alt((
        map(
            delimited(
                char('"'),
                many0(alt((
                    map(tag("\\\""), |_| '"'),
                    map(tag("\\\\"), |_| '\\'),
                    map(tag("\\n"), |_| '\n'),
                    map(tag("\\t"), |_| '\t'),
                    map(tag("\\r"), |_| '\r'),
                    none_of("\"\\"),
                ))),
                char('"'),
            ),
            |chars| Value::String(chars.into_iter().collect()),
        ),
        map(
            delimited(
                char('\''),
                many0(alt((
                    map(tag("\\'"), |_| '\''),
                    map(tag("\\\\"), |_| '\\'),
                    map(tag("\\n"), |_| '\n'),
                    map(tag("\\t"), |_| '\t'),
                    map(tag("\\r"), |_| '\r'),
                    none_of("'\\"),
                ))),
                char('\''),
            ),
            |chars| Value::String(chars.into_iter().collect()),
        ),
    ))(input)
}

// Identifiers and the keyword literals share a prefix, so parse the word
// first and classify after; `trueish` stays an identifier.
fn parse_ident_or_keyword(input: &str) -> IResult<&str, Expr> {
    let (rest, word) = parse_identifier(input)?;
    let expr = match word.as_str() {
        "true" => Expr::Literal(Value::Bool(true)),
        "false" => Expr::Literal(Value::Bool(false)),
        "null" => Expr::Literal(Value::Null),
        _ => Expr::Ident(word),
    };
    Ok((rest, expr))
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        map(parse_number, Expr::Literal),
        map(parse_string_literal, Expr::Literal),
        parse_ident_or_keyword,
        delimited(char('('), parse_conditional, char(')')),
    )))(input)
}

// Postfix chains: `.name` and `[expr]`
fn parse_postfix(input: &str) -> IResult<&str, Expr> {
    let (mut rest, mut expr) = parse_primary(input)?;
    loop {
        if let Ok((r, name)) =
            preceded(char::<_, nom::error::Error<&str>>('.'), parse_identifier)(rest)
        {
            expr = Expr::Property(Box::new(expr), name);
            rest = r;
            continue;
        }
        if let Ok((r, index)) = delimited(
            char::<_, nom::error::Error<&str>>('['),
            parse_conditional,
            char(']'),
        )(rest)
        {
            expr = Expr::Index(Box::new(expr), Box::new(index));
            rest = r;
            continue;
        }
        break;
    }
    Ok((rest, expr))
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(ws(char('!')), parse_unary),
            |e| Expr::Unary(UnaryOp::Not, Box::new(e)),
        ),
        map(
            preceded(ws(char('-')), parse_unary),
            |e| Expr::Unary(UnaryOp::Neg, Box::new(e)),
        ),
        parse_postfix,
    ))(input)
}

fn fold_binary<'a, F, G>(
    mut operand: F,
    mut operator: G,
) -> impl FnMut(&'a str) -> IResult<&'a str, Expr>
where
    F: FnMut(&'a str) -> IResult<&'a str, Expr>,
    G: FnMut(&'a str) -> IResult<&'a str, BinaryOp>,
{
    move |input: &'a str| {
        let (mut rest, mut lhs) = operand(input)?;
        while let Ok((r, op)) = operator(rest) {
            let (r, rhs) = operand(r)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
            rest = r;
        }
        Ok((rest, lhs))
    }
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expr> {
    fold_binary(
        parse_unary,
        ws(alt((
            map(char('*'), |_| BinaryOp::Mul),
            map(char('/'), |_| BinaryOp::Div),
            map(char('%'), |_| BinaryOp::Mod),
        ))),
    )(input)
}

fn parse_additive(input: &str) -> IResult<&str, Expr> {
    fold_binary(
        parse_multiplicative,
        ws(alt((
            map(char('+'), |_| BinaryOp::Add),
            map(char('-'), |_| BinaryOp::Sub),
        ))),
    )(input)
}

fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    fold_binary(
        parse_additive,
        ws(alt((
            map(tag("<="), |_| BinaryOp::Le),
            map(tag(">="), |_| BinaryOp::Ge),
            map(char('<'), |_| BinaryOp::Lt),
            map(char('>'), |_| BinaryOp::Gt),
        ))),
    )(input)
}

fn parse_equality(input: &str) -> IResult<&str, Expr> {
    // Longest tags first so `===` is not consumed as `==` + `=`
    fold_binary(
        parse_comparison,
        ws(alt((
            map(tag("==="), |_| BinaryOp::EqStrict),
            map(tag("!=="), |_| BinaryOp::NeStrict),
            map(tag("=="), |_| BinaryOp::EqLoose),
            map(tag("!="), |_| BinaryOp::NeLoose),
        ))),
    )(input)
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    fold_binary(parse_equality, ws(map(tag("&&"), |_| BinaryOp::And)))(input)
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    fold_binary(parse_and, ws(map(tag("||"), |_| BinaryOp::Or)))(input)
}

fn parse_conditional(input: &str) -> IResult<&str, Expr> {
    let (rest, cond) = parse_or(input)?;
    if let Ok((rest, (then_branch, else_branch))) = tuple((
        preceded(ws(char::<_, nom::error::Error<&str>>('?')), parse_conditional),
        preceded(ws(char(':')), parse_conditional),
    ))(rest)
    {
        return Ok((
            rest,
            Expr::Conditional {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
        ));
    }
    Ok((rest, cond))
}

/// Parse a complete expression, rejecting disallowed constructs.
pub fn parse_expression(input: &str) -> SandboxResult<Expr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SandboxError::Parse("empty expression".into()));
    }
    if trimmed.contains("{%") {
        return Err(SandboxError::Parse(
            "template blocks are disabled in the sandbox".into(),
        ));
    }
    // Bound grouping depth before descending into the recursive grammar
    let mut depth: i32 = 0;
    for c in trimmed.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                if depth > 64 {
                    return Err(SandboxError::Parse(
                        "expression nesting is too deep".into(),
                    ));
                }
            }
            ')' | ']' => depth -= 1,
            _ => {}
        }
    }
    match parse_conditional(trimmed) {
        Ok((rest, expr)) if rest.trim().is_empty() => Ok(expr),
        Ok((rest, _)) => {
            // The grammar has no call form, so `name(...)` always stops at
            // the opening parenthesis.
            if rest.trim_start().starts_with('(') {
                Err(SandboxError::Parse(
                    "function calls are disabled in the sandbox".into(),
                ))
            } else {
                Err(SandboxError::Parse(format!(
                    "unexpected input at '{}'",
                    rest.trim()
                )))
            }
        }
        Err(e) => Err(SandboxError::Parse(format!("syntax error: {:?}", e))),
    }
}
