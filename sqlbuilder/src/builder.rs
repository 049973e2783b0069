use chrono::{DateTime, Utc};
use common::TimeRange;
use std::fmt::Display;

/// Identifiers are always back-quoted; embedded back-quotes are doubled.
pub fn quote_ident(name: &str) -> String {
	format!("`{}`", name.replace('`', "``"))
}

/// String literals are single-quoted with embedded quotes doubled.
pub fn escape_literal(s: &str) -> String {
	s.replace('\'', "''")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceValue {
	String(String),
	Integer(i64),
	Float(ordered_float::OrderedFloat<f64>),
}

impl Display for PlaceValue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			PlaceValue::String(s) => write!(f, "'{}'", escape_literal(s)),
			PlaceValue::Integer(i) => write!(f, "{}", i),
			PlaceValue::Float(fl) => write!(f, "{}", fl),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cmp {
	Equal(PlaceValue),
	NotEqual(PlaceValue),
	// case-insensitive substring match
	Contains(String),
	NotContains(String),
	Larger(PlaceValue),
	LargerEqual(PlaceValue),
	Less(PlaceValue),
	LessEqual(PlaceValue),
}

/// How a query field lands on the table: a physical column, a key inside a
/// map column, or a path inside a JSON-encoded string column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
	Column(String),
	MapAccess { column: String, key: String },
	JsonPath { column: String, path: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
	pub field: FieldRef,
	pub cmp: Cmp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
	Unit(Condition),
	LogicalAnd(Box<Selection>, Box<Selection>),
	LogicalOr(Box<Selection>, Box<Selection>),
	Not(Box<Selection>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortType {
	Asc,
	Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrdType {
	LargerEqual,
	SmallerEqual,
	Larger,
}

pub trait TableSchema {
	fn database(&self) -> &str;
	fn table(&self) -> &str;
	fn ts_key(&self) -> &str;
	fn qualified_table(&self) -> String {
		format!(
			"{}.{}",
			quote_ident(self.database()),
			quote_ident(self.table())
		)
	}
}

pub trait QueryConverter {
	fn convert_field(&self, f: &FieldRef) -> String;
	fn convert_condition(&self, c: &Condition) -> String;
	fn convert_timing(
		&self,
		ts_key: &str,
		o: &OrdType,
		t: &DateTime<Utc>,
	) -> String;
}

#[derive(Debug, Clone)]
pub struct QueryPlan<T: TableSchema, C: QueryConverter> {
	converter: C,
	pub schema: T,
	pub projection: Vec<String>,
	pub selection: Option<Selection>,
	pub grouping: Vec<String>,
	pub sorting: Vec<(String, SortType)>,
	pub timing: Vec<(OrdType, DateTime<Utc>)>,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
}

impl<T: TableSchema, C: QueryConverter> QueryPlan<T, C> {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		converter: C,
		schema: T,
		projection: Vec<String>,
		selection: Option<Selection>,
		grouping: Vec<String>,
		sorting: Vec<(String, SortType)>,
		timing: Vec<(OrdType, DateTime<Utc>)>,
		limit: Option<u32>,
	) -> Self {
		Self {
			converter,
			schema,
			projection,
			selection,
			grouping,
			sorting,
			timing,
			limit,
			offset: None,
		}
	}

	pub fn with_offset(mut self, offset: u32) -> Self {
		if offset > 0 {
			self.offset = Some(offset);
		}
		self
	}
}

impl<T, C> QueryPlan<T, C>
where
	T: TableSchema,
	C: QueryConverter,
{
	pub fn as_sql(&self) -> String {
		let mut sql = self.projection_part();
		sql.push_str(&format!(" FROM {}", self.schema.qualified_table()));
		let where_part = self.where_part();
		if !where_part.is_empty() {
			sql.push_str(&format!(" WHERE {}", where_part));
		}
		if let Some(grouping) = self.grouping_part() {
			sql.push(' ');
			sql.push_str(&grouping);
		}
		if !self.sorting.is_empty() {
			sql.push_str(" ORDER BY ");
			sql.push_str(&self.sorting_part());
		}
		if let Some(limit) = self.limit_part() {
			sql.push(' ');
			sql.push_str(&limit);
		}
		sql
	}
	fn where_part(&self) -> String {
		let mut where_part = self.timing_part().join(" AND ");
		let selection = self.selection_part();
		if !selection.is_empty() {
			if !where_part.is_empty() {
				where_part.push_str(" AND ");
			}
			where_part.push_str(&selection);
		}
		where_part
	}
	fn projection_part(&self) -> String {
		if self.projection.is_empty() {
			"SELECT *".to_string()
		} else {
			format!("SELECT {}", self.projection.join(", "))
		}
	}
	fn selection_to_sql(&self, s: &Selection) -> String {
		match s {
			Selection::Unit(ref c) => self.converter.convert_condition(c),
			Selection::LogicalAnd(ref l, ref r) => {
				let l = self.selection_to_sql(l);
				let r = self.selection_to_sql(r);
				format!("({} AND {})", l, r)
			}
			Selection::LogicalOr(ref l, ref r) => {
				let l = self.selection_to_sql(l);
				let r = self.selection_to_sql(r);
				format!("({} OR {})", l, r)
			}
			Selection::Not(ref inner) => {
				format!("NOT ({})", self.selection_to_sql(inner))
			}
		}
	}
	fn selection_part(&self) -> String {
		if let Some(s) = &self.selection {
			self.selection_to_sql(s)
		} else {
			"".to_string()
		}
	}
	fn grouping_part(&self) -> Option<String> {
		if self.grouping.is_empty() {
			None
		} else {
			Some(format!("GROUP BY {}", self.grouping.join(", ")))
		}
	}
	fn sorting_part(&self) -> String {
		self.sorting
			.iter()
			.map(|(c, t)| match t {
				SortType::Asc => format!("{} ASC", c),
				SortType::Desc => format!("{} DESC", c),
			})
			.collect::<Vec<String>>()
			.join(", ")
	}
	fn timing_part(&self) -> Vec<String> {
		let ts_key = self.schema.ts_key();
		self.timing
			.iter()
			.map(|(o, t)| self.converter.convert_timing(ts_key, o, t))
			.collect()
	}
	fn limit_part(&self) -> Option<String> {
		self.limit.map(|l| match self.offset {
			Some(off) => format!("LIMIT {} OFFSET {}", l, off),
			None => format!("LIMIT {}", l),
		})
	}
}

pub fn time_range_into_timing(
	range: &TimeRange,
) -> Vec<(OrdType, DateTime<Utc>)> {
	let mut timing = vec![];
	if let Some(start) = range.start {
		timing.push((OrdType::LargerEqual, start));
	}
	if let Some(end) = range.end {
		timing.push((OrdType::SmallerEqual, end));
	}
	timing
}

// Bucket widths snap to steps that align with wall-clock boundaries;
// the smallest step keeping the series at or under the target count wins.
static BUCKET_STEPS: [u32; 18] = [
	1, 2, 5, 10, 15, 30, 60, 120, 300, 600, 900, 1800, 3600, 7200, 14400,
	43200, 86400, 604800,
];

pub fn bucket_width_seconds(range_seconds: i64, target_buckets: u32) -> u32 {
	if range_seconds <= 0 || target_buckets == 0 {
		return 60;
	}
	for step in BUCKET_STEPS {
		if range_seconds as u64 <= (step as u64) * (target_buckets as u64) {
			return step;
		}
	}
	*BUCKET_STEPS.last().unwrap()
}

#[cfg(test)]
mod tests {
	use super::*;
	use ordered_float::OrderedFloat;
	use pretty_assertions::assert_eq;

	#[test]
	fn fmt_place_value_display() {
		let s = PlaceValue::String("hello".to_string());
		assert_eq!(format!("{}", s), "'hello'");
		let s = PlaceValue::String("it's broken".to_string());
		assert_eq!(format!("{}", s), "'it''s broken'");
		let i = PlaceValue::Integer(123);
		assert_eq!(format!("{}", i), "123");
		let f = PlaceValue::Float(OrderedFloat(1.23));
		assert_eq!(format!("{}", f), "1.23");
	}

	#[test]
	fn test_quote_ident() {
		assert_eq!(quote_ident("level"), "`level`");
		assert_eq!(quote_ident("we`ird"), "`we``ird`");
	}

	#[test]
	fn test_bucket_width() {
		// one hour at 100 buckets lands on the minute step
		assert_eq!(bucket_width_seconds(3600, 100), 60);
		assert_eq!(bucket_width_seconds(60, 100), 1);
		assert_eq!(bucket_width_seconds(86400, 100), 900);
		// degenerate ranges still produce a usable width
		assert_eq!(bucket_width_seconds(0, 100), 60);
		assert_eq!(bucket_width_seconds(3600, 0), 60);
	}

	struct TestSchema;
	impl TableSchema for TestSchema {
		fn database(&self) -> &str {
			"logs"
		}
		fn table(&self) -> &str {
			"app"
		}
		fn ts_key(&self) -> &str {
			"timestamp"
		}
	}

	struct TestConverter;
	impl QueryConverter for TestConverter {
		fn convert_field(&self, f: &FieldRef) -> String {
			match f {
				FieldRef::Column(c) => quote_ident(c),
				FieldRef::MapAccess { column, key } => {
					format!("{}['{}']", quote_ident(column), escape_literal(key))
				}
				FieldRef::JsonPath { column, path } => format!(
					"JSONExtractString({}, '{}')",
					quote_ident(column),
					path.join("', '")
				),
			}
		}
		fn convert_condition(&self, c: &Condition) -> String {
			let col = self.convert_field(&c.field);
			match &c.cmp {
				Cmp::Equal(v) => format!("{} = {}", col, v),
				Cmp::NotEqual(v) => format!("{} != {}", col, v),
				_ => unimplemented!(),
			}
		}
		fn convert_timing(
			&self,
			ts_key: &str,
			o: &OrdType,
			t: &DateTime<Utc>,
		) -> String {
			let op = match o {
				OrdType::LargerEqual => ">=",
				OrdType::SmallerEqual => "<=",
				OrdType::Larger => ">",
			};
			format!("{} {} {}", quote_ident(ts_key), op, t.timestamp_millis())
		}
	}

	#[test]
	fn test_as_sql_shape() {
		let range = TimeRange::from_millis(Some(1000), Some(2000));
		let plan = QueryPlan::new(
			TestConverter,
			TestSchema,
			vec![],
			Some(Selection::Unit(Condition {
				field: FieldRef::Column("level".to_string()),
				cmp: Cmp::Equal(PlaceValue::String("error".to_string())),
			})),
			vec![],
			vec![("`timestamp`".to_string(), SortType::Desc)],
			time_range_into_timing(&range),
			Some(100),
		);
		assert_eq!(
			plan.as_sql(),
			"SELECT * FROM `logs`.`app` WHERE `timestamp` >= 1000 AND `timestamp` <= 2000 AND `level` = 'error' ORDER BY `timestamp` DESC LIMIT 100"
		);
	}

	#[test]
	fn test_as_sql_offset_and_not() {
		let plan = QueryPlan::new(
			TestConverter,
			TestSchema,
			vec!["count() AS total".to_string()],
			Some(Selection::Not(Box::new(Selection::Unit(Condition {
				field: FieldRef::Column("level".to_string()),
				cmp: Cmp::Equal(PlaceValue::String("debug".to_string())),
			})))),
			vec![],
			vec![],
			vec![],
			Some(10),
		)
		.with_offset(20);
		assert_eq!(
			plan.as_sql(),
			"SELECT count() AS total FROM `logs`.`app` WHERE NOT (`level` = 'debug') LIMIT 10 OFFSET 20"
		);
	}
}
