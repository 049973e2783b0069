use chrono::SecondsFormat;
use common::TimeRange;
use logchefql::parser::{Expr, LogicalOp, Node, Op, Query, Value};

/// LogsQL rendering of the filter AST: space joins with AND, `or` only
/// inside parenthesized groups, `!` negates.
pub fn render_filter(q: &Query) -> String {
	match &q.root {
		Node::Logical { children, .. } if children.is_empty() => {
			"*".to_string()
		}
		node => render_node(node),
	}
}

fn render_node(n: &Node) -> String {
	match n {
		Node::Expr(e) => render_expr(e),
		Node::Logical { op, children } => {
			let parts: Vec<String> =
				children.iter().map(render_node).collect();
			match op {
				LogicalOp::And => parts.join(" "),
				LogicalOp::Or => format!("({})", parts.join(" or ")),
			}
		}
		Node::Not(inner) => format!("!({})", render_node(inner)),
	}
}

fn render_expr(e: &Expr) -> String {
	let field = field_name(&e.field.segments);
	match e.op {
		Op::Eq => format!("{}:={}", field, render_value(&e.value, false)),
		Op::Neq => format!("{}:!={}", field, render_value(&e.value, false)),
		Op::Contains => {
			format!("{}:~{}", field, render_value(&e.value, true))
		}
		Op::NotContains => {
			format!("{}:!~{}", field, render_value(&e.value, true))
		}
		Op::Gt => format!("{}:>{}", field, render_value(&e.value, false)),
		Op::Gte => format!("{}:>={}", field, render_value(&e.value, false)),
		Op::Lt => format!("{}:<{}", field, render_value(&e.value, false)),
		Op::Lte => format!("{}:<={}", field, render_value(&e.value, false)),
	}
}

fn field_name(segments: &[String]) -> String {
	let joined = segments.join(".");
	if needs_quoting(&joined) {
		quote(&joined)
	} else {
		joined
	}
}

fn render_value(v: &Value, force_quote: bool) -> String {
	match v {
		Value::Integer(i) => i.to_string(),
		Value::Float(f) => f.to_string(),
		Value::String(s) => {
			if force_quote || needs_quoting(s) {
				quote(s)
			} else {
				s.clone()
			}
		}
	}
}

fn needs_quoting(s: &str) -> bool {
	s.is_empty()
		|| !s
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || ".-_/@".contains(c))
}

fn quote(s: &str) -> String {
	format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn time_filter(range: &TimeRange) -> Option<String> {
	let fmt = |t: chrono::DateTime<chrono::Utc>| {
		t.to_rfc3339_opts(SecondsFormat::Millis, true)
	};
	match (range.start, range.end) {
		(Some(s), Some(e)) => {
			Some(format!("_time:[{}, {}]", fmt(s), fmt(e)))
		}
		(Some(s), None) => Some(format!("_time:>={}", fmt(s))),
		(None, Some(e)) => Some(format!("_time:<={}", fmt(e))),
		(None, None) => None,
	}
}

/// The full query: filter atoms, the time predicate, then the sort,
/// limit, and projection pipes.
pub fn query_string(q: &Query, range: &TimeRange, limit: u32) -> String {
	let filter = render_filter(q);
	let mut out = match time_filter(range) {
		Some(t) if filter == "*" => t,
		Some(t) => format!("{} {}", filter, t),
		None => filter,
	};
	out.push_str(" | sort by (_time) desc");
	out.push_str(&format!(" | limit {}", limit));
	if let Some(fields) = &q.projection {
		let names: Vec<String> = fields
			.iter()
			.map(|f| field_name(&f.segments))
			.collect();
		out.push_str(&format!(" | fields {}", names.join(", ")));
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_basic_atoms() {
		let q = logchefql::parser::parse(r#"level="error" and svc~"api""#)
			.unwrap();
		assert_eq!(render_filter(&q), r#"level:=error svc:~"api""#);
	}

	#[test]
	fn test_quote_only_when_needed() {
		let q = logchefql::parser::parse(r#"msg="it's broken""#).unwrap();
		assert_eq!(render_filter(&q), r#"msg:="it's broken""#);
		let q = logchefql::parser::parse(r#"host=web-1"#).unwrap();
		assert_eq!(render_filter(&q), "host:=web-1");
	}

	#[test]
	fn test_or_group_and_not() {
		let q = logchefql::parser::parse(
			r#"(level=error or level=fatal) not svc=edge"#,
		)
		.unwrap();
		assert_eq!(
			render_filter(&q),
			"(level:=error or level:=fatal) !(svc:=edge)"
		);
	}

	#[test]
	fn test_comparisons() {
		let q = logchefql::parser::parse("status>=500 took<1.5").unwrap();
		assert_eq!(render_filter(&q), "status:>=500 took:<1.5");
	}

	#[test]
	fn test_match_all() {
		let q = logchefql::parser::parse("").unwrap();
		assert_eq!(render_filter(&q), "*");
	}

	#[test]
	fn test_full_query_pipes() {
		let q = logchefql::parser::parse("level=error | _time msg").unwrap();
		let range = TimeRange::from_millis(
			Some(1_700_000_000_000),
			Some(1_700_003_600_000),
		);
		assert_eq!(
			query_string(&q, &range, 100),
			"level:=error _time:[2023-11-14T22:13:20.000Z, 2023-11-14T23:13:20.000Z] \
			 | sort by (_time) desc | limit 100 | fields _time, msg"
		);
	}

	#[test]
	fn test_match_all_with_window() {
		let q = logchefql::parser::parse("").unwrap();
		let range = TimeRange::from_millis(Some(1_700_000_000_000), None);
		assert_eq!(
			query_string(&q, &range, 10),
			"_time:>=2023-11-14T22:13:20.000Z | sort by (_time) desc | limit 10"
		);
	}
}
