use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{DataType, FactoryError, Result, Value};

pub type Row = Vec<Value>;

/// Deserializes with the builder's defaults, so JSON only has to spell out
/// what differs: `{"name": "id", "data_type": "Integer", "primary_key": true}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "nullable_by_default")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub autoincrement: bool,
}

fn nullable_by_default() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            autoincrement: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Only meaningful on an INTEGER primary key.
    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(FactoryError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(FactoryError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

/// What happens to referencing rows when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OnDelete {
    #[default]
    Restrict,
    Cascade,
    SetNull,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
    /// Name of the model relation that supplies this column at flush time.
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub on_delete: OnDelete,
}

impl ForeignKey {
    pub fn new(
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            references_table: references_table.into(),
            references_column: references_column.into(),
            relation: None,
            on_delete: OnDelete::default(),
        }
    }

    pub fn relation(mut self, name: impl Into<String>) -> Self {
        self.relation = Some(name.into());
        self
    }

    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    #[serde(default)]
    foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|col| col.primary_key)
    }

    pub fn primary_key(&self) -> Option<&Column> {
        self.primary_key_index().map(|idx| &self.columns[idx])
    }

    /// Checks the schema itself: exactly one primary key, FK columns exist.
    pub fn validate(&self) -> Result<()> {
        let pk_count = self.columns.iter().filter(|col| col.primary_key).count();
        if pk_count != 1 {
            return Err(FactoryError::ConstraintViolation(format!(
                "Table '{}' must declare exactly one primary key column, found {}",
                self.name, pk_count
            )));
        }
        for column in &self.columns {
            if column.autoincrement && column.data_type != DataType::Integer {
                return Err(FactoryError::TypeMismatch(format!(
                    "Autoincrement column '{}' must be INTEGER",
                    column.name
                )));
            }
        }
        for fk in &self.foreign_keys {
            if self.find_column_index(&fk.column).is_none() {
                return Err(FactoryError::ColumnNotFound(
                    fk.column.clone(),
                    self.name.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Builds a positional row from a field map. Missing fields become NULL.
    pub fn row_from_fields(&self, fields: &BTreeMap<String, Value>) -> Result<Row> {
        if let Some(unknown) = fields
            .keys()
            .find(|name| self.find_column_index(name).is_none())
        {
            return Err(FactoryError::ColumnNotFound(
                unknown.clone(),
                self.name.clone(),
            ));
        }

        self.columns
            .iter()
            .map(|column| {
                let value = fields.get(&column.name).cloned().unwrap_or(Value::Null);
                column.validate(&value)?;
                Ok(value)
            })
            .collect()
    }

    pub fn fields_from_row(&self, row: &Row) -> BTreeMap<String, Value> {
        self.columns
            .iter()
            .zip(row.iter())
            .map(|(column, value)| (column.name.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_schema() -> TableSchema {
        TableSchema::new("bar")
            .column(Column::new("id", DataType::Integer).primary_key().autoincrement())
            .column(Column::new("name", DataType::Text))
    }

    #[test]
    fn test_row_from_fields_validates_columns() {
        let schema = bar_schema();
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::from("x"));
        let err = schema.row_from_fields(&fields).unwrap_err();
        // primary key is NOT NULL until the engine assigns it
        assert!(matches!(err, FactoryError::ConstraintViolation(_)));

        fields.insert("id".to_string(), Value::Integer(1));
        let row = schema.row_from_fields(&fields).unwrap();
        assert_eq!(row, vec![Value::Integer(1), Value::from("x")]);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let schema = bar_schema();
        let mut fields = BTreeMap::new();
        fields.insert("nope".to_string(), Value::Integer(1));
        assert!(matches!(
            schema.row_from_fields(&fields),
            Err(FactoryError::ColumnNotFound(col, table)) if col == "nope" && table == "bar"
        ));
    }

    #[test]
    fn test_schema_requires_single_primary_key() {
        let schema = TableSchema::new("t").column(Column::new("a", DataType::Integer));
        assert!(schema.validate().is_err());
        assert!(bar_schema().validate().is_ok());
    }
}
