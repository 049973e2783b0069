use super::builder::escape_literal;
use thiserror::Error;

/// Per-type rendering for `{{name}}` references embedded in raw SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
	Number,
	Date,
	Text,
}

#[derive(Debug, Clone)]
pub struct TemplateVar {
	pub name: String,
	pub kind: VarKind,
	pub value: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarError {
	#[error("variable {0} has no value")]
	Missing(String),
	#[error("variable {0} is not numeric: {1}")]
	NotNumeric(String, String),
	#[error("unterminated optional clause, expected ']]'")]
	UnterminatedOptional,
	#[error("unterminated variable reference, expected '}}}}'")]
	UnterminatedVar,
}

fn find_var(vars: &[TemplateVar], name: &str) -> Option<TemplateVar> {
	vars.iter().find(|v| v.name == name).cloned()
}

fn render(v: &TemplateVar) -> Result<String, VarError> {
	let raw = v
		.value
		.as_ref()
		.ok_or_else(|| VarError::Missing(v.name.clone()))?;
	match v.kind {
		VarKind::Number => {
			raw.parse::<f64>().map_err(|_| {
				VarError::NotNumeric(v.name.clone(), raw.clone())
			})?;
			Ok(raw.clone())
		}
		VarKind::Date | VarKind::Text => {
			Ok(format!("'{}'", escape_literal(raw)))
		}
	}
}

fn var_names(fragment: &str) -> Result<Vec<String>, VarError> {
	let mut names = vec![];
	let mut rest = fragment;
	while let Some(start) = rest.find("{{") {
		let after = &rest[start + 2..];
		let end = after.find("}}").ok_or(VarError::UnterminatedVar)?;
		names.push(after[..end].trim().to_string());
		rest = &after[end + 2..];
	}
	Ok(names)
}

fn substitute_vars(
	fragment: &str,
	vars: &[TemplateVar],
) -> Result<String, VarError> {
	let mut out = String::with_capacity(fragment.len());
	let mut rest = fragment;
	while let Some(start) = rest.find("{{") {
		out.push_str(&rest[..start]);
		let after = &rest[start + 2..];
		let end = after.find("}}").ok_or(VarError::UnterminatedVar)?;
		let name = after[..end].trim();
		let var = find_var(vars, name)
			.ok_or_else(|| VarError::Missing(name.to_string()))?;
		out.push_str(&render(&var)?);
		rest = &after[end + 2..];
	}
	out.push_str(rest);
	Ok(out)
}

/// Resolve `[[ … ]]` optional clauses, then substitute `{{name}}`
/// references. A bracketed clause is elided when every variable inside it
/// has no value; otherwise the brackets are stripped. Substitution runs
/// once, at the end, so rendered values are never rescanned. Nested
/// brackets are not supported.
pub fn substitute(
	sql: &str,
	vars: &[TemplateVar],
) -> Result<String, VarError> {
	let mut out = String::with_capacity(sql.len());
	let mut rest = sql;
	while let Some(start) = rest.find("[[") {
		out.push_str(&rest[..start]);
		let after = &rest[start + 2..];
		let end = after.find("]]").ok_or(VarError::UnterminatedOptional)?;
		let inner = &after[..end];
		let names = var_names(inner)?;
		let all_unset = names.iter().all(|n| {
			find_var(vars, n).map_or(true, |v| v.value.is_none())
		});
		if !all_unset {
			out.push_str(inner);
		}
		rest = &after[end + 2..];
	}
	out.push_str(rest);
	substitute_vars(&out, vars)
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn var(name: &str, kind: VarKind, value: Option<&str>) -> TemplateVar {
		TemplateVar {
			name: name.to_string(),
			kind,
			value: value.map(|v| v.to_string()),
		}
	}

	#[test]
	fn test_no_vars_is_noop() {
		let sql = "SELECT count() FROM t WHERE level = 'error'";
		assert_eq!(substitute(sql, &[]).unwrap(), sql);
	}

	#[test]
	fn test_optional_clause_elided_when_unset() {
		let sql = "SELECT 1 [[WHERE x = {{v}}]]";
		assert_eq!(substitute(sql, &[]).unwrap(), "SELECT 1 ");
		assert_eq!(
			substitute(sql, &[var("v", VarKind::Text, None)]).unwrap(),
			"SELECT 1 "
		);
	}

	#[test]
	fn test_optional_clause_kept_when_set() {
		let sql = "SELECT 1 [[WHERE x = {{v}}]]";
		assert_eq!(
			substitute(sql, &[var("v", VarKind::Text, Some("a"))]).unwrap(),
			"SELECT 1 WHERE x = 'a'"
		);
	}

	#[test]
	fn test_type_formatting() {
		let sql = "WHERE n > {{n}} AND d >= {{d}} AND s = {{s}}";
		let vars = [
			var("n", VarKind::Number, Some("42")),
			var("d", VarKind::Date, Some("2024-01-01T00:00:00Z")),
			var("s", VarKind::Text, Some("it's")),
		];
		assert_eq!(
			substitute(sql, &vars).unwrap(),
			"WHERE n > 42 AND d >= '2024-01-01T00:00:00Z' AND s = 'it''s'"
		);
	}

	#[test]
	fn test_number_must_be_numeric() {
		let err = substitute(
			"{{n}}",
			&[var("n", VarKind::Number, Some("1 OR 1=1"))],
		)
		.unwrap_err();
		assert_eq!(
			err,
			VarError::NotNumeric("n".to_string(), "1 OR 1=1".to_string())
		);
	}

	#[test]
	fn test_missing_required_var() {
		let err = substitute("WHERE x = {{v}}", &[]).unwrap_err();
		assert_eq!(err, VarError::Missing("v".to_string()));
	}

	#[test]
	fn test_unterminated_markers() {
		assert_eq!(
			substitute("[[WHERE x = {{v}}", &[]).unwrap_err(),
			VarError::UnterminatedOptional
		);
		assert_eq!(
			substitute("WHERE x = {{v", &[]).unwrap_err(),
			VarError::UnterminatedVar
		);
	}

	#[test]
	fn test_rendered_values_are_not_rescanned() {
		let sql = "SELECT 1 [[WHERE x = {{v}}]]";
		let out = substitute(
			sql,
			&[var("v", VarKind::Text, Some("{{v}}"))],
		)
		.unwrap();
		assert_eq!(out, "SELECT 1 WHERE x = '{{v}}'");
	}

	#[test]
	fn test_mixed_optional_and_required() {
		let sql = "SELECT 1 WHERE a = {{a}}[[ AND b = {{b}}]]";
		let vars = [
			var("a", VarKind::Number, Some("1")),
			var("b", VarKind::Text, None),
		];
		assert_eq!(
			substitute(sql, &vars).unwrap(),
			"SELECT 1 WHERE a = 1"
		);
	}
}
