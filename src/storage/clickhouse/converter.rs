use crate::storage::TableMeta;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use logchefql::parser::FieldPath;
use sqlbuilder::builder::{
	escape_literal, quote_ident, Cmp, Condition, FieldRef, OrdType,
	QueryConverter, TableSchema,
};
use sqlbuilder::visit::{FieldResolver, ResolveError};

#[derive(Debug, Clone)]
pub struct LogTable {
	pub database: String,
	pub table: String,
	pub ts_field: String,
}

impl TableSchema for LogTable {
	fn database(&self) -> &str {
		&self.database
	}
	fn table(&self) -> &str {
		&self.table
	}
	fn ts_key(&self) -> &str {
		&self.ts_field
	}
}

#[derive(Debug, Clone)]
pub struct CKConverter;

impl QueryConverter for CKConverter {
	fn convert_field(&self, f: &FieldRef) -> String {
		match f {
			FieldRef::Column(c) => quote_ident(c),
			FieldRef::MapAccess { column, key } => {
				format!("{}['{}']", quote_ident(column), escape_literal(key))
			}
			FieldRef::JsonPath { column, path } => {
				let args = path
					.iter()
					.map(|p| format!("'{}'", escape_literal(p)))
					.join(", ");
				format!("JSONExtractString({}, {})", quote_ident(column), args)
			}
		}
	}

	fn convert_condition(&self, c: &Condition) -> String {
		let col = self.convert_field(&c.field);
		match &c.cmp {
			Cmp::Equal(v) => format!("{} = {}", col, v),
			Cmp::NotEqual(v) => format!("{} != {}", col, v),
			Cmp::Larger(v) => format!("{} > {}", col, v),
			Cmp::LargerEqual(v) => format!("{} >= {}", col, v),
			Cmp::Less(v) => format!("{} < {}", col, v),
			Cmp::LessEqual(v) => format!("{} <= {}", col, v),
			// substring match is pinned to case-insensitive
			Cmp::Contains(v) => format!(
				"positionCaseInsensitive({}, '{}') > 0",
				col,
				escape_literal(v)
			),
			Cmp::NotContains(v) => format!(
				"positionCaseInsensitive({}, '{}') = 0",
				col,
				escape_literal(v)
			),
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
		format!(
			"{} {} fromUnixTimestamp64Milli({})",
			quote_ident(ts_key),
			op,
			t.timestamp_millis()
		)
	}
}

/// Field resolution against the cached column catalog: the first path
/// segment picks a physical column; the remainder drives map or JSON
/// access for that column's type. A head matching nothing falls back to
/// the source's first map column when one exists.
pub struct CKFieldResolver<'a> {
	pub catalog: &'a TableMeta,
}

impl FieldResolver for CKFieldResolver<'_> {
	fn resolve(&self, path: &FieldPath) -> Result<FieldRef, ResolveError> {
		if let Some(col) = self.catalog.column(path.head()) {
			if path.rest().is_empty() {
				return Ok(FieldRef::Column(col.name.clone()));
			}
			if col.is_map() {
				return Ok(FieldRef::MapAccess {
					column: col.name.clone(),
					key: path.rest().join("."),
				});
			}
			if col.is_json() || col.type_.contains("String") {
				return Ok(FieldRef::JsonPath {
					column: col.name.clone(),
					path: path.rest().to_vec(),
				});
			}
			return Err(ResolveError::NotNestable(path.to_string()));
		}
		if let Some(map_col) = self.catalog.first_map_column() {
			return Ok(FieldRef::MapAccess {
				column: map_col.name.clone(),
				key: path.segments.join("."),
			});
		}
		Err(ResolveError::UnknownField(path.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::ColumnMeta;
	use pretty_assertions::assert_eq;
	use sqlbuilder::builder::PlaceValue;

	fn catalog() -> TableMeta {
		TableMeta {
			columns: vec![
				ColumnMeta {
					name: "timestamp".to_string(),
					type_: "DateTime64(3)".to_string(),
				},
				ColumnMeta {
					name: "level".to_string(),
					type_: "LowCardinality(String)".to_string(),
				},
				ColumnMeta {
					name: "body".to_string(),
					type_: "String".to_string(),
				},
				ColumnMeta {
					name: "attributes".to_string(),
					type_: "Map(LowCardinality(String), String)".to_string(),
				},
			],
			engine: "MergeTree".to_string(),
			sort_keys: vec!["timestamp".to_string()],
		}
	}

	#[test]
	fn test_resolve_physical_column() {
		let c = catalog();
		let r = CKFieldResolver { catalog: &c };
		assert_eq!(
			r.resolve(&FieldPath::new(vec!["level"])).unwrap(),
			FieldRef::Column("level".to_string())
		);
	}

	#[test]
	fn test_resolve_map_access() {
		let c = catalog();
		let r = CKFieldResolver { catalog: &c };
		assert_eq!(
			r.resolve(&FieldPath::new(vec!["attributes", "user", "id"]))
				.unwrap(),
			FieldRef::MapAccess {
				column: "attributes".to_string(),
				key: "user.id".to_string(),
			}
		);
	}

	#[test]
	fn test_resolve_json_path_on_string_column() {
		let c = catalog();
		let r = CKFieldResolver { catalog: &c };
		assert_eq!(
			r.resolve(&FieldPath::new(vec!["body", "request", "path"]))
				.unwrap(),
			FieldRef::JsonPath {
				column: "body".to_string(),
				path: vec!["request".to_string(), "path".to_string()],
			}
		);
	}

	#[test]
	fn test_unknown_head_falls_back_to_map_column() {
		let c = catalog();
		let r = CKFieldResolver { catalog: &c };
		assert_eq!(
			r.resolve(&FieldPath::new(vec!["request_id"])).unwrap(),
			FieldRef::MapAccess {
				column: "attributes".to_string(),
				key: "request_id".to_string(),
			}
		);
	}

	#[test]
	fn test_unknown_head_without_map_column() {
		let c = TableMeta {
			columns: vec![ColumnMeta {
				name: "body".to_string(),
				type_: "String".to_string(),
			}],
			engine: "MergeTree".to_string(),
			sort_keys: vec![],
		};
		let r = CKFieldResolver { catalog: &c };
		assert!(matches!(
			r.resolve(&FieldPath::new(vec!["nope"])),
			Err(ResolveError::UnknownField(_))
		));
	}

	#[test]
	fn test_contains_is_case_insensitive_substring() {
		let conv = CKConverter;
		let got = conv.convert_condition(&Condition {
			field: FieldRef::Column("svc".to_string()),
			cmp: Cmp::Contains("api".to_string()),
		});
		assert_eq!(got, "positionCaseInsensitive(`svc`, 'api') > 0");
	}

	#[test]
	fn test_literal_quotes_are_doubled() {
		let conv = CKConverter;
		let got = conv.convert_condition(&Condition {
			field: FieldRef::Column("msg".to_string()),
			cmp: Cmp::Equal(PlaceValue::String("it's broken".to_string())),
		});
		assert_eq!(got, "`msg` = 'it''s broken'");
	}

	#[test]
	fn test_map_access_rendering() {
		let conv = CKConverter;
		let got = conv.convert_field(&FieldRef::MapAccess {
			column: "attributes".to_string(),
			key: "user.id".to_string(),
		});
		assert_eq!(got, "`attributes`['user.id']");
	}

	#[test]
	fn test_timing_uses_millisecond_instants() {
		let conv = CKConverter;
		let t = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
		let got = conv.convert_timing("timestamp", &OrdType::LargerEqual, &t);
		assert_eq!(
			got,
			"`timestamp` >= fromUnixTimestamp64Milli(1700000000000)"
		);
	}
}
