use nom::{
	branch::alt,
	bytes::complete::{tag, tag_no_case, take_while1},
	character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, multispace1},
	combinator::{map, opt, recognize},
	error::{ErrorKind, ParseError as NomParseError},
	multi::{many0, many0_count, separated_list1},
	sequence::{delimited, pair, preceded, tuple},
	IResult, Parser,
};
use ordered_float::OrderedFloat;
use std::fmt;
use thiserror::Error;

/// A dotted field path. The first segment names a physical column when one
/// exists; trailing segments address keys inside map or JSON columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
	pub segments: Vec<String>,
}

impl FieldPath {
	pub fn new<S: Into<String>>(segments: Vec<S>) -> Self {
		Self {
			segments: segments.into_iter().map(Into::into).collect(),
		}
	}
	pub fn head(&self) -> &str {
		&self.segments[0]
	}
	pub fn rest(&self) -> &[String] {
		&self.segments[1..]
	}
}

impl fmt::Display for FieldPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.segments.join("."))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
	Eq,
	Neq,
	Contains,
	NotContains,
	Gt,
	Lt,
	Gte,
	Lte,
}

impl Op {
	pub fn as_str(&self) -> &'static str {
		match self {
			Op::Eq => "=",
			Op::Neq => "!=",
			Op::Contains => "~",
			Op::NotContains => "!~",
			Op::Gt => ">",
			Op::Lt => "<",
			Op::Gte => ">=",
			Op::Lte => "<=",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
	String(String),
	Integer(i64),
	Float(OrderedFloat<f64>),
}

impl Value {
	pub fn as_text(&self) -> String {
		match self {
			Value::String(s) => s.clone(),
			Value::Integer(i) => i.to_string(),
			Value::Float(f) => f.to_string(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
	And,
	Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
	pub field: FieldPath,
	pub op: Op,
	pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
	Expr(Expr),
	Logical { op: LogicalOp, children: Vec<Node> },
	Not(Box<Node>),
}

/// Parse result: a root conjunction (possibly empty, meaning match-all)
/// plus an optional projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
	pub root: Node,
	pub projection: Option<Vec<FieldPath>>,
}

impl Query {
	pub fn is_match_all(&self) -> bool {
		matches!(&self.root, Node::Logical { children, .. } if children.is_empty())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
	UnclosedQuote,
	MismatchedParens,
	InvalidOperator,
	UnexpectedToken,
	TrailingInput,
}

impl fmt::Display for ParseErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let msg = match self {
			ParseErrorKind::UnclosedQuote => "unclosed quote, expected closing '\"'",
			ParseErrorKind::MismatchedParens => "mismatched parentheses, expected ')'",
			ParseErrorKind::InvalidOperator => {
				"invalid operator, expected one of =, !=, ~, !~, >, <, >=, <="
			}
			ParseErrorKind::UnexpectedToken => "unexpected token",
			ParseErrorKind::TrailingInput => "unexpected trailing input",
		};
		write!(f, "{}", msg)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at line {line}, column {column}")]
pub struct QueryParseError {
	pub kind: ParseErrorKind,
	pub line: u32,
	pub column: u32,
}

#[derive(Debug, PartialEq)]
enum Reason {
	Nom(ErrorKind),
	Typed(ParseErrorKind),
}

#[derive(Debug, PartialEq)]
struct QLError<'a> {
	input: &'a str,
	reason: Reason,
}

impl<'a> QLError<'a> {
	fn typed(input: &'a str, kind: ParseErrorKind) -> nom::Err<Self> {
		nom::Err::Failure(Self {
			input,
			reason: Reason::Typed(kind),
		})
	}
}

impl<'a> NomParseError<&'a str> for QLError<'a> {
	fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
		Self {
			input,
			reason: Reason::Nom(kind),
		}
	}
	fn append(_: &'a str, _: ErrorKind, other: Self) -> Self {
		other
	}
}

type QLResult<'a, T> = IResult<&'a str, T, QLError<'a>>;

fn ws<'a, F, O>(inner: F) -> impl Parser<&'a str, O, QLError<'a>>
where
	F: Parser<&'a str, O, QLError<'a>>,
{
	delimited(multispace0, inner, multispace0)
}

fn ident(s: &str) -> QLResult<&str> {
	recognize(pair(
		alt((alpha1, tag("_"))),
		many0_count(alt((alphanumeric1, tag("_")))),
	))(s)
}

// Inside a quoted value or quoted path segment escapes are not
// interpreted; the literal runs to the next '"'.
fn quoted_string(s: &str) -> QLResult<String> {
	let (rest, _) = char('"')(s)?;
	match rest.find('"') {
		Some(i) => Ok((&rest[i + 1..], rest[..i].to_string())),
		None => Err(QLError::typed(s, ParseErrorKind::UnclosedQuote)),
	}
}

fn field_path(s: &str) -> QLResult<FieldPath> {
	let (rest, head) = ident(s)?;
	let (rest, tail) = many0(preceded(
		char('.'),
		alt((map(ident, |v| v.to_string()), quoted_string)),
	))(rest)?;
	let mut segments = vec![head.to_string()];
	segments.extend(tail);
	Ok((rest, FieldPath { segments }))
}

fn operator(s: &str) -> QLResult<Op> {
	let parsed: QLResult<&str> = alt((
		tag("!="),
		tag("!~"),
		tag(">="),
		tag("<="),
		tag("="),
		tag("~"),
		tag(">"),
		tag("<"),
	))(s);
	match parsed {
		Ok((rest, op)) => Ok((
			rest,
			match op {
				"=" => Op::Eq,
				"!=" => Op::Neq,
				"~" => Op::Contains,
				"!~" => Op::NotContains,
				">" => Op::Gt,
				"<" => Op::Lt,
				">=" => Op::Gte,
				"<=" => Op::Lte,
				_ => unreachable!(),
			},
		)),
		// a field has already been consumed, so an operator must follow
		Err(_) => Err(QLError::typed(s, ParseErrorKind::InvalidOperator)),
	}
}

fn number_value(s: &str) -> QLResult<Value> {
	let (rest, num) = recognize(tuple((
		opt(char('-')),
		digit1,
		opt(pair(char('.'), digit1)),
	)))(s)?;
	// reject numbers that run straight into an identifier: `123abc` is a bare word
	if rest
		.chars()
		.next()
		.is_some_and(|c| c.is_alphanumeric() || c == '_')
	{
		return Err(nom::Err::Error(QLError::from_error_kind(
			s,
			ErrorKind::Digit,
		)));
	}
	let v = if num.contains('.') {
		Value::Float(OrderedFloat(num.parse::<f64>().map_err(|_| {
			nom::Err::Error(QLError::from_error_kind(s, ErrorKind::Float))
		})?))
	} else {
		Value::Integer(num.parse::<i64>().map_err(|_| {
			nom::Err::Error(QLError::from_error_kind(s, ErrorKind::Digit))
		})?)
	};
	Ok((rest, v))
}

fn bare_value(s: &str) -> QLResult<Value> {
	map(
		take_while1(|c: char| !c.is_whitespace() && !"()|\"".contains(c)),
		|v: &str| Value::String(v.to_string()),
	)(s)
}

fn value(s: &str) -> QLResult<Value> {
	let parsed: QLResult<Value> = alt((
		map(quoted_string, Value::String),
		number_value,
		bare_value,
	))(s);
	match parsed {
		Ok(ok) => Ok(ok),
		// unclosed quotes keep their own kind and position
		Err(e @ nom::Err::Failure(_)) => Err(e),
		Err(_) => Err(QLError::typed(s, ParseErrorKind::UnexpectedToken)),
	}
}

fn comparison(s: &str) -> QLResult<Node> {
	let (rest, field) = field_path(s)?;
	// bare `or`/`and`/`not` here belongs to the surrounding combinator
	if field.segments.len() == 1
		&& matches!(
			field.head().to_ascii_lowercase().as_str(),
			"or" | "and" | "not"
		) {
		return Err(nom::Err::Error(QLError::from_error_kind(
			s,
			ErrorKind::Tag,
		)));
	}
	let (rest, (op, val)) = tuple((ws(operator), value))(rest)?;
	Ok((
		rest,
		Node::Expr(Expr {
			field,
			op,
			value: val,
		}),
	))
}

fn not_condition(s: &str) -> QLResult<Node> {
	map(
		preceded(pair(tag_no_case("not"), multispace1), condition),
		|inner| Node::Not(Box::new(inner)),
	)(s)
}

// `or` only appears between conjunction branches inside parentheses
fn group(s: &str) -> QLResult<Node> {
	let (rest, _) = char('(')(s)?;
	let (rest, first) = ws(conjunction).parse(rest)?;
	let (rest, more) = many0(preceded(
		pair(tag_no_case("or"), multispace1),
		ws(conjunction),
	))(rest)?;
	let close: QLResult<char> = char(')')(rest);
	match close {
		Ok((rest, _)) => {
			if more.is_empty() {
				Ok((rest, first))
			} else {
				let mut children = vec![first];
				children.extend(more);
				Ok((
					rest,
					Node::Logical {
						op: LogicalOp::Or,
						children,
					},
				))
			}
		}
		Err(_) => Err(QLError::typed(s, ParseErrorKind::MismatchedParens)),
	}
}

fn condition(s: &str) -> QLResult<Node> {
	alt((not_condition, group, comparison))(s)
}

// whitespace joins conditions with logical AND; an explicit `and` is allowed
fn cond_sep(s: &str) -> QLResult<()> {
	map(
		tuple((
			multispace1,
			opt(pair(tag_no_case("and"), multispace1)),
		)),
		|_| (),
	)(s)
}

fn conjunction(s: &str) -> QLResult<Node> {
	let (rest, first) = condition(s)?;
	let (rest, others) = many0(preceded(cond_sep, condition))(rest)?;
	if others.is_empty() {
		Ok((rest, first))
	} else {
		let mut children = vec![first];
		children.extend(others);
		Ok((
			rest,
			Node::Logical {
				op: LogicalOp::And,
				children,
			},
		))
	}
}

fn projection(s: &str) -> QLResult<Vec<FieldPath>> {
	preceded(
		ws(char('|')),
		separated_list1(multispace1, field_path),
	)(s)
}

fn query(s: &str) -> QLResult<Query> {
	let (rest, _) = multispace0(s)?;
	let (rest, root) = opt(conjunction)(rest)?;
	let (rest, proj) = opt(projection)(rest)?;
	let (rest, _) = multispace0(rest)?;
	let root = match root {
		None => Node::Logical {
			op: LogicalOp::And,
			children: vec![],
		},
		Some(n @ Node::Logical { op: LogicalOp::And, .. }) => n,
		Some(other) => Node::Logical {
			op: LogicalOp::And,
			children: vec![other],
		},
	};
	Ok((
		rest,
		Query {
			root,
			projection: proj,
		},
	))
}

fn locate(full: &str, rest: &str) -> (u32, u32) {
	let offset = full.len() - rest.len();
	let consumed = &full[..offset];
	let line = consumed.matches('\n').count() as u32 + 1;
	let column = match consumed.rfind('\n') {
		Some(i) => offset - i,
		None => offset + 1,
	} as u32;
	(line, column)
}

pub fn parse(input: &str) -> Result<Query, QueryParseError> {
	match query(input) {
		Ok((rest, q)) => {
			if rest.is_empty() {
				Ok(q)
			} else {
				let (line, column) = locate(input, rest);
				Err(QueryParseError {
					kind: ParseErrorKind::TrailingInput,
					line,
					column,
				})
			}
		}
		Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
			let (line, column) = locate(input, e.input);
			let kind = match e.reason {
				Reason::Typed(k) => k,
				Reason::Nom(_) => ParseErrorKind::UnexpectedToken,
			};
			Err(QueryParseError { kind, line, column })
		}
		Err(nom::Err::Incomplete(_)) => Err(QueryParseError {
			kind: ParseErrorKind::UnexpectedToken,
			line: 1,
			column: 1,
		}),
	}
}

/// `validate(q)` succeeds exactly when `parse(q)` does.
pub fn validate(input: &str) -> Result<(), QueryParseError> {
	parse(input).map(|_| ())
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn expr(field: Vec<&str>, op: Op, value: Value) -> Node {
		Node::Expr(Expr {
			field: FieldPath::new(field),
			op,
			value,
		})
	}

	#[test]
	fn test_basic_conjunction() {
		let q = parse(r#"level="error" and svc~"api""#).unwrap();
		let expect = Query {
			root: Node::Logical {
				op: LogicalOp::And,
				children: vec![
					expr(
						vec!["level"],
						Op::Eq,
						Value::String("error".to_string()),
					),
					expr(
						vec!["svc"],
						Op::Contains,
						Value::String("api".to_string()),
					),
				],
			},
			projection: None,
		};
		assert_eq!(expect, q);
		// whitespace alone joins with AND as well
		assert_eq!(parse(r#"level="error" svc~"api""#).unwrap(), q);
	}

	#[test]
	fn test_values() {
		let q = parse(r#"status>=500 took<1.5 host=web-1"#).unwrap();
		let expect = Query {
			root: Node::Logical {
				op: LogicalOp::And,
				children: vec![
					expr(vec!["status"], Op::Gte, Value::Integer(500)),
					expr(
						vec!["took"],
						Op::Lt,
						Value::Float(OrderedFloat(1.5)),
					),
					expr(
						vec!["host"],
						Op::Eq,
						Value::String("web-1".to_string()),
					),
				],
			},
			projection: None,
		};
		assert_eq!(expect, q);
	}

	#[test]
	fn test_group_with_or() {
		let q = parse(r#"(level=error or level=fatal) svc=api"#).unwrap();
		let expect = Query {
			root: Node::Logical {
				op: LogicalOp::And,
				children: vec![
					Node::Logical {
						op: LogicalOp::Or,
						children: vec![
							expr(
								vec!["level"],
								Op::Eq,
								Value::String("error".to_string()),
							),
							expr(
								vec!["level"],
								Op::Eq,
								Value::String("fatal".to_string()),
							),
						],
					},
					expr(
						vec!["svc"],
						Op::Eq,
						Value::String("api".to_string()),
					),
				],
			},
			projection: None,
		};
		assert_eq!(expect, q);
	}

	#[test]
	fn test_or_branch_is_a_conjunction() {
		let q = parse(r#"(level=error svc=api or level=fatal)"#).unwrap();
		let Node::Logical { op, children } = &q.root else {
			panic!("expected logical root");
		};
		assert_eq!(*op, LogicalOp::And);
		assert_eq!(children.len(), 1);
		let Node::Logical { op, children } = &children[0] else {
			panic!("expected or group");
		};
		assert_eq!(*op, LogicalOp::Or);
		assert_eq!(children.len(), 2);
		assert!(matches!(
			&children[0],
			Node::Logical {
				op: LogicalOp::And,
				..
			}
		));
	}

	#[test]
	fn test_not() {
		let q = parse(r#"not level=debug"#).unwrap();
		let expect = Query {
			root: Node::Logical {
				op: LogicalOp::And,
				children: vec![Node::Not(Box::new(expr(
					vec!["level"],
					Op::Eq,
					Value::String("debug".to_string()),
				)))],
			},
			projection: None,
		};
		assert_eq!(expect, q);
		// a field starting with `not` is still a field
		let q = parse(r#"notes=1"#).unwrap();
		let expect = Query {
			root: Node::Logical {
				op: LogicalOp::And,
				children: vec![expr(vec!["notes"], Op::Eq, Value::Integer(1))],
			},
			projection: None,
		};
		assert_eq!(expect, q);
	}

	#[test]
	fn test_dotted_fields() {
		let q = parse(r#"headers.request_id="abc" attrs."user id"=7"#).unwrap();
		let expect = Query {
			root: Node::Logical {
				op: LogicalOp::And,
				children: vec![
					expr(
						vec!["headers", "request_id"],
						Op::Eq,
						Value::String("abc".to_string()),
					),
					expr(
						vec!["attrs", "user id"],
						Op::Eq,
						Value::Integer(7),
					),
				],
			},
			projection: None,
		};
		assert_eq!(expect, q);
	}

	#[test]
	fn test_projection() {
		let q = parse(r#"level=error | timestamp level msg"#).unwrap();
		assert_eq!(
			q.projection,
			Some(vec![
				FieldPath::new(vec!["timestamp"]),
				FieldPath::new(vec!["level"]),
				FieldPath::new(vec!["msg"]),
			])
		);
	}

	#[test]
	fn test_empty_query_matches_all() {
		let q = parse("").unwrap();
		assert!(q.is_match_all());
		let q = parse("   ").unwrap();
		assert!(q.is_match_all());
	}

	#[test]
	fn test_quote_value_keeps_inner_quote() {
		let q = parse(r#"msg="it's broken""#).unwrap();
		let expect = Query {
			root: Node::Logical {
				op: LogicalOp::And,
				children: vec![expr(
					vec!["msg"],
					Op::Eq,
					Value::String("it's broken".to_string()),
				)],
			},
			projection: None,
		};
		assert_eq!(expect, q);
	}

	#[test]
	fn test_unclosed_quote() {
		let err = parse(r#"msg="oops"#).unwrap_err();
		assert_eq!(err.kind, ParseErrorKind::UnclosedQuote);
		assert_eq!(err.line, 1);
		assert_eq!(err.column, 5);
	}

	#[test]
	fn test_mismatched_parens() {
		let err = parse(r#"(level=error or level=fatal"#).unwrap_err();
		assert_eq!(err.kind, ParseErrorKind::MismatchedParens);
		assert_eq!(err.column, 1);
	}

	#[test]
	fn test_invalid_operator() {
		let err = parse(r#"level ?? error"#).unwrap_err();
		assert_eq!(err.kind, ParseErrorKind::InvalidOperator);
		assert_eq!(err.column, 7);
	}

	#[test]
	fn test_trailing_input() {
		let err = parse(r#"level=error )"#).unwrap_err();
		assert_eq!(err.kind, ParseErrorKind::TrailingInput);
		assert_eq!(err.column, 13);
	}

	#[test]
	fn test_validate_matches_parse() {
		for input in [r#"level="error""#, "(a=1 or b=2) c~x", ""] {
			assert_eq!(validate(input).is_ok(), parse(input).is_ok());
		}
		for input in [r#"msg="x"#, "(a=1", "a == 1 extra("] {
			assert!(validate(input).is_err(), "{}", input);
		}
	}
}
