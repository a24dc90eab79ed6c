use serde_json::Value;

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{FilterData, FilterOrderInfo, FilterWhereOptions, SqlResult};

pub struct Filter {
    table_name: String,
    select_columns: Vec<String>,
    where_data: Option<Value>,
    order_data: Vec<FilterOrderInfo>,
    limit: Option<i64>,
    offset: Option<i64>,
    options: FilterWhereOptions,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        validate_identifier(&table_name).map_err(FilterError::InvalidTableName)?;
        Ok(Self {
            table_name,
            select_columns: vec![],
            where_data: None,
            order_data: vec![],
            limit: None,
            offset: None,
            options: FilterWhereOptions::default(),
        })
    }

    pub fn assign(&mut self, data: FilterData) -> Result<&mut Self, FilterError> {
        if let Some(select) = data.select { self.select(select)?; }
        if let Some(where_clause) = data.where_clause { self.where_clause(where_clause)?; }
        if let Some(order) = data.order { self.order(order)?; }
        if data.limit.is_some() || data.offset.is_some() { self.limit(data.limit, data.offset)?; }
        Ok(self)
    }

    pub fn select(&mut self, columns: Vec<String>) -> Result<&mut Self, FilterError> {
        for column in columns.iter().filter(|c| c.as_str() != "*") {
            validate_identifier(column).map_err(FilterError::InvalidColumn)?;
        }
        self.select_columns = columns;
        Ok(self)
    }

    pub fn where_clause(&mut self, conditions: Value) -> Result<&mut Self, FilterError> {
        FilterWhere::validate(&conditions)?;
        self.where_data = Some(conditions);
        Ok(self)
    }

    pub fn order(&mut self, order_spec: Value) -> Result<&mut Self, FilterError> {
        self.order_data = FilterOrder::validate_and_parse(&order_spec)?;
        Ok(self)
    }

    pub fn limit(&mut self, limit: Option<i64>, offset: Option<i64>) -> Result<&mut Self, FilterError> {
        if let Some(l) = limit { if l < 0 { return Err(FilterError::InvalidLimit("Limit must be non-negative".to_string())); } }
        if let Some(off) = offset { if off < 0 { return Err(FilterError::InvalidOffset("Offset must be non-negative".to_string())); } }

        let max_limit = crate::config::CONFIG.api.max_list_limit;
        let applied_limit = match limit {
            Some(l) if l > max_limit => {
                tracing::warn!("Limit {} exceeds max {}, capping to max", l, max_limit);
                Some(max_limit)
            }
            other => other,
        };

        self.limit = applied_limit;
        self.offset = offset;
        Ok(self)
    }

    pub fn to_sql(&self) -> Result<SqlResult, FilterError> {
        let select_clause = self.build_select_clause();
        let (where_clause, mut params) = self.build_where()?;
        let order_clause = FilterOrder::generate(&self.order_data);
        let limit_clause = self.build_limit_clause(&mut params);

        let query = [
            format!("SELECT {}", select_clause),
            format!("FROM \"{}\"", self.table_name),
            format!("WHERE {}", where_clause),
            order_clause,
            limit_clause,
        ].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");

        Ok(SqlResult { query, params })
    }

    fn build_where(&self) -> Result<(String, Vec<Value>), FilterError> {
        match self.where_data {
            Some(ref where_data) => FilterWhere::generate(where_data, 0, &self.options),
            None => Ok(FilterWhere::generate_empty(&self.options)),
        }
    }

    fn build_select_clause(&self) -> String {
        if self.select_columns.is_empty() || self.select_columns.iter().any(|c| c == "*") {
            "*".to_string()
        } else {
            self.select_columns.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ")
        }
    }

    fn build_limit_clause(&self, params: &mut Vec<Value>) -> String {
        let mut parts = Vec::new();
        if let Some(l) = self.limit {
            params.push(Value::from(l));
            parts.push(format!("LIMIT ${}", params.len()));
        }
        if let Some(o) = self.offset {
            params.push(Value::from(o));
            parts.push(format!("OFFSET ${}", params.len()));
        }
        parts.join(" ")
    }
}

/// Identifiers are interpolated (quoted) into SQL, so only `[A-Za-z_][A-Za-z0-9_]*` is accepted.
pub(crate) fn validate_identifier(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        None => Err("identifier cannot be empty".to_string()),
        Some(first) if !(first.is_ascii_alphabetic() || first == '_') => {
            Err(format!("invalid identifier format: {}", name))
        }
        Some(_) if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') => {
            Err(format!("invalid identifier format: {}", name))
        }
        Some(_) => Ok(()),
    }
}
