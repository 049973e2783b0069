use super::builder::{Cmp, Condition, FieldRef, PlaceValue, Selection};
use logchefql::parser::{FieldPath, LogicalOp, Node, Op, Query, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
	#[error("unknown field: {0}")]
	UnknownField(String),
	#[error("field {0} does not support nested access")]
	NotNestable(String),
}

/// Maps a dotted field path onto the table using the source's column
/// catalog. Implemented per backend.
pub trait FieldResolver {
	fn resolve(&self, path: &FieldPath) -> Result<FieldRef, ResolveError>;
}

pub struct QLVisitor<R> {
	resolver: R,
}

impl<R: FieldResolver> QLVisitor<R> {
	pub fn new(resolver: R) -> Self {
		Self { resolver }
	}

	/// An empty root conjunction yields no selection at all.
	pub fn visit(&self, q: &Query) -> Result<Option<Selection>, ResolveError> {
		match &q.root {
			Node::Logical { children, .. } if children.is_empty() => Ok(None),
			node => self.visit_node(node).map(Some),
		}
	}

	fn visit_node(&self, n: &Node) -> Result<Selection, ResolveError> {
		match n {
			Node::Expr(e) => {
				let field = self.resolver.resolve(&e.field)?;
				Ok(Selection::Unit(Condition {
					field,
					cmp: to_cmp(e.op, &e.value),
				}))
			}
			Node::Logical { op, children } => {
				let mut parts = children
					.iter()
					.map(|c| self.visit_node(c))
					.collect::<Result<Vec<_>, _>>()?;
				let mut sel = parts.remove(0);
				for next in parts {
					sel = match op {
						LogicalOp::And => Selection::LogicalAnd(
							Box::new(sel),
							Box::new(next),
						),
						LogicalOp::Or => Selection::LogicalOr(
							Box::new(sel),
							Box::new(next),
						),
					};
				}
				Ok(sel)
			}
			Node::Not(inner) => Ok(Selection::Not(Box::new(
				self.visit_node(inner)?,
			))),
		}
	}
}

fn to_place(v: &Value) -> PlaceValue {
	match v {
		Value::String(s) => PlaceValue::String(s.clone()),
		Value::Integer(i) => PlaceValue::Integer(*i),
		Value::Float(f) => PlaceValue::Float(*f),
	}
}

fn to_cmp(op: Op, v: &Value) -> Cmp {
	match op {
		Op::Eq => Cmp::Equal(to_place(v)),
		Op::Neq => Cmp::NotEqual(to_place(v)),
		Op::Contains => Cmp::Contains(v.as_text()),
		Op::NotContains => Cmp::NotContains(v.as_text()),
		Op::Gt => Cmp::Larger(to_place(v)),
		Op::Gte => Cmp::LargerEqual(to_place(v)),
		Op::Lt => Cmp::Less(to_place(v)),
		Op::Lte => Cmp::LessEqual(to_place(v)),
	}
}
