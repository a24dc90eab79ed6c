use serde_json::Value;

use super::error::FilterError;
use super::filter::validate_identifier;
use super::types::{FilterOp, FilterWhereInfo, FilterWhereOptions};

pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
    conditions: Vec<FilterWhereInfo>,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
            conditions: vec![],
        }
    }

    pub fn generate(where_data: &Value, starting_param_index: usize, options: &FilterWhereOptions) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(starting_param_index);
        filter_where.build(where_data, options)
    }

    pub fn generate_empty(options: &FilterWhereOptions) -> (String, Vec<Value>) {
        let where_clause = if options.include_deleted { "1=1".to_string() } else { "\"deleted_at\" IS NULL".to_string() };
        (where_clause, vec![])
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            // Raw SQL predicates are never accepted: every value must be bound
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn build(&mut self, where_data: &Value, options: &FilterWhereOptions) -> Result<(String, Vec<Value>), FilterError> {
        self.parse_where_data(where_data)?;

        let mut sql_conditions = vec![];
        if !options.include_deleted { sql_conditions.push("\"deleted_at\" IS NULL".to_string()); }
        let conditions_snapshot = self.conditions.clone();
        for condition in &conditions_snapshot {
            sql_conditions.push(self.build_sql_condition(condition)?);
        }
        let where_clause = if sql_conditions.is_empty() { "1=1".to_string() } else { sql_conditions.join(" AND ") };
        Ok((where_clause, self.param_values.clone()))
    }

    fn parse_where_data(&mut self, where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null => Ok(()),
            Value::Object(obj) => {
                for (key, value) in obj {
                    if key.starts_with('$') {
                        self.parse_logical_operator(key, value)?;
                    } else {
                        self.parse_field_condition(key, value)?;
                    }
                }
                Ok(())
            }
            _ => Err(FilterError::InvalidWhereClause("Unsupported WHERE format".to_string())),
        }
    }

    fn parse_logical_operator(&mut self, op: &str, value: &Value) -> Result<(), FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value.as_array().ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                if arr.is_empty() {
                    let sql = if op == "$and" { "1=1" } else { "1=0" };
                    self.push_group(sql.to_string());
                    return Ok(());
                }
                let mut sql_parts = Vec::new();
                for v in arr {
                    let sql = self.generate_nested(v)?;
                    sql_parts.push(format!("({})", sql));
                }
                let joiner = if op == "$and" { " AND " } else { " OR " };
                self.push_group(format!("({})", sql_parts.join(joiner)));
                Ok(())
            }
            "$not" => {
                let sql = self.generate_nested(value)?;
                self.push_group(format!("NOT ({})", sql));
                Ok(())
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn generate_nested(&mut self, value: &Value) -> Result<String, FilterError> {
        let (sql, params) = Self::generate(value, self.param_index, &FilterWhereOptions::nested())?;
        self.param_index += params.len();
        self.param_values.extend(params);
        Ok(sql)
    }

    fn push_group(&mut self, sql: String) {
        self.conditions.push(FilterWhereInfo { column: sql, operator: FilterOp::Group, data: Value::Null });
    }

    fn parse_field_condition(&mut self, field: &str, value: &Value) -> Result<(), FilterError> {
        validate_identifier(field).map_err(FilterError::InvalidColumn)?;
        if let Value::Object(obj) = value {
            for (op_key, op_val) in obj {
                let operator = Self::map_operator(op_key)?;
                self.conditions.push(FilterWhereInfo { column: field.to_string(), operator, data: op_val.clone() });
            }
        } else {
            // Implicit equality: { field: value }
            self.conditions.push(FilterWhereInfo { column: field.to_string(), operator: FilterOp::Eq, data: value.clone() });
        }
        Ok(())
    }

    fn map_operator(op_key: &str) -> Result<FilterOp, FilterError> {
        Ok(match op_key {
            "$eq" => FilterOp::Eq,
            "$ne" | "$neq" => FilterOp::Neq,
            "$gt" => FilterOp::Gt,
            "$gte" => FilterOp::Gte,
            "$lt" => FilterOp::Lt,
            "$lte" => FilterOp::Lte,
            "$like" => FilterOp::Like,
            "$ilike" => FilterOp::ILike,
            "$in" => FilterOp::In,
            "$between" => FilterOp::Between,
            other => return Err(FilterError::UnsupportedOperator(other.to_string())),
        })
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        if matches!(condition.operator, FilterOp::Group) {
            return Ok(condition.column.clone());
        }

        let quoted_column = format!("\"{}\"", condition.column);
        let data = condition.data.clone();
        Ok(match condition.operator {
            FilterOp::Eq if data.is_null() => format!("{} IS NULL", quoted_column),
            FilterOp::Eq => format!("{} = {}", quoted_column, self.param(data)),
            FilterOp::Neq if data.is_null() => format!("{} IS NOT NULL", quoted_column),
            FilterOp::Neq => format!("{} <> {}", quoted_column, self.param(data)),
            FilterOp::Gt => format!("{} > {}", quoted_column, self.param(data)),
            FilterOp::Gte => format!("{} >= {}", quoted_column, self.param(data)),
            FilterOp::Lt => format!("{} < {}", quoted_column, self.param(data)),
            FilterOp::Lte => format!("{} <= {}", quoted_column, self.param(data)),
            FilterOp::Like => format!("{} LIKE {}", quoted_column, self.param(data)),
            FilterOp::ILike => format!("{} ILIKE {}", quoted_column, self.param(data)),
            FilterOp::In => match data {
                Value::Array(values) if values.is_empty() => "1=0".to_string(),
                Value::Array(values) => {
                    let params: Vec<String> = values.into_iter().map(|v| self.param(v)).collect();
                    format!("{} IN ({})", quoted_column, params.join(", "))
                }
                other => format!("{} = {}", quoted_column, self.param(other)),
            },
            FilterOp::Between => match data {
                Value::Array(mut values) if values.len() == 2 => {
                    let high = values.pop().unwrap_or(Value::Null);
                    let low = values.pop().unwrap_or(Value::Null);
                    format!("{} BETWEEN {} AND {}", quoted_column, self.param(low), self.param(high))
                }
                _ => return Err(FilterError::InvalidOperatorData("$between requires array with 2 values".to_string())),
            },
            FilterOp::Group => unreachable!("groups are rendered above"),
        })
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}
