use crate::ast::{Expression, FunctionDef, Literal, Program};
use pest::iterators::Pair;
use pest::Parser;
use std::sync::Arc;
use thiserror::Error;

// Define the parser struct using the grammar file
#[derive(pest_derive::Parser)]
#[grammar = "chariot.pest"] // Path relative to src/
pub struct ChariotParser;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("unexpected rule {rule} at {line}:{column}")]
    Unexpected {
        rule: String,
        line: usize,
        column: usize,
    },
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ParseError::Syntax(err.to_string())
    }
}

/// Parse a full Chariot program.
pub fn parse(input: &str) -> Result<Program, ParseError> {
    let mut pairs = ChariotParser::parse(Rule::program, input)?;
    let Some(program) = pairs.next() else {
        return Ok(Vec::new());
    };
    program
        .into_inner()
        .filter(|p| p.as_rule() != Rule::EOI)
        .map(build_expression)
        .collect()
}

fn unexpected(pair: &Pair<Rule>) -> ParseError {
    let (line, column) = pair.as_span().start_pos().line_col();
    ParseError::Unexpected {
        rule: format!("{:?}", pair.as_rule()),
        line,
        column,
    }
}

fn build_expression(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    match pair.as_rule() {
        Rule::number => {
            let raw = pair.as_str();
            raw.parse::<f64>()
                .map(|n| Expression::Literal(Literal::Number(n)))
                .map_err(|_| ParseError::InvalidNumber(raw.to_string()))
        }
        Rule::boolean => Ok(Expression::Literal(Literal::Boolean(matches!(
            pair.as_str(),
            "true" | "True"
        )))),
        Rule::nil => Ok(Expression::Literal(Literal::Nil)),
        Rule::string => {
            let inner = pair.into_inner().next();
            let raw = inner.as_ref().map(|p| p.as_str()).unwrap_or("");
            Ok(Expression::Literal(Literal::String(unescape(raw))))
        }
        Rule::identifier => Ok(Expression::Identifier(pair.as_str().to_string())),
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = match inner.next() {
                Some(p) if p.as_rule() == Rule::identifier => p.as_str().to_string(),
                Some(other) => return Err(unexpected(&other)),
                None => return Err(ParseError::Syntax("call without a name".to_string())),
            };
            let args = inner.map(build_expression).collect::<Result<Vec<_>, _>>()?;
            Ok(Expression::Call { name, args })
        }
        Rule::function_literal => build_function(pair),
        _ => Err(unexpected(&pair)),
    }
}

fn build_function(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let mut params = Vec::new();
    let mut body = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::param_list => {
                params = part.into_inner().map(|p| p.as_str().to_string()).collect();
            }
            Rule::block => {
                body = part
                    .into_inner()
                    .map(build_expression)
                    .collect::<Result<Vec<_>, _>>()?;
            }
            _ => return Err(unexpected(&part)),
        }
    }
    Ok(Expression::Function(FunctionDef {
        params,
        body: Arc::new(body),
    }))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_nested_calls_and_literals() {
        let program = parse("setq(x, add(1, -2.5)); logPrint(\"a\\tb\", True, nil)").unwrap();
        assert_eq!(
            program,
            vec![
                Expression::call(
                    "setq",
                    vec![
                        Expression::identifier("x"),
                        Expression::call(
                            "add",
                            vec![
                                Expression::Literal(Literal::Number(1.0)),
                                Expression::Literal(Literal::Number(-2.5)),
                            ]
                        ),
                    ]
                ),
                Expression::call(
                    "logPrint",
                    vec![
                        Expression::Literal(Literal::String("a\tb".to_string())),
                        Expression::Literal(Literal::Boolean(true)),
                        Expression::Literal(Literal::Nil),
                    ]
                ),
            ]
        );
    }

    #[test]
    fn parses_function_literals_with_params() {
        let program = parse(
            "declare(f, func(a, b) {\n  // comment\n  add(a, b)\n})\nf(1, 2)",
        )
        .unwrap();
        assert_eq!(program.len(), 2);
        match &program[0] {
            Expression::Call { name, args } => {
                assert_eq!(name, "declare");
                match &args[1] {
                    Expression::Function(def) => {
                        assert_eq!(def.params, vec!["a".to_string(), "b".to_string()]);
                        assert_eq!(def.body.len(), 1);
                    }
                    other => panic!("expected function literal, got {:?}", other),
                }
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn identifiers_may_start_with_reserved_words() {
        let program = parse("funcName(trueish, nilValue)").unwrap();
        assert_eq!(
            program,
            vec![Expression::call(
                "funcName",
                vec![
                    Expression::identifier("trueish"),
                    Expression::identifier("nilValue"),
                ]
            )]
        );
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(parse("add(1, 2").is_err());
        assert!(parse("func() { true").is_err());
    }

    #[test]
    fn program_survives_json_round_trip() {
        let program = parse("declare(inc, func(n) { add(n, 1) }); inc(41)").unwrap();
        let json = serde_json::to_string(&program).unwrap();
        let restored: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, program);
    }

    #[test]
    fn empty_program_is_valid() {
        assert_eq!(parse("  // nothing\n;;").unwrap(), Vec::<Expression>::new());
    }
}
