//! The set of tables taking part in a migration.

use super::column::{ColumnDef, ColumnType};
use super::table::TableDef;
use crate::error::SchemaError;
use std::collections::HashSet;

/// A declared foreign-key relationship `table.column -> references.id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// Referencing table.
    pub table: String,
    /// Foreign-key column.
    pub column: String,
    /// Referenced table.
    pub references: String,
}

impl std::fmt::Display for ForeignKeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} -> {}.id", self.table, self.column, self.references)
    }
}

/// A complete set of table definitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    /// Tables in declaration order.
    pub tables: Vec<TableDef>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table.
    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Tables sorted by dependency rank.
    ///
    /// Ties keep declaration order. Fails if a foreign key names an unknown
    /// table or one that does not rank strictly lower than its referrer.
    pub fn migration_order(&self) -> Result<Vec<&TableDef>, SchemaError> {
        self.check()?;
        let mut ordered: Vec<&TableDef> = self.tables.iter().collect();
        ordered.sort_by_key(|t| t.rank);
        Ok(ordered)
    }

    /// Tables with a foreign key into `table`, with those columns.
    pub fn dependents_of<'a>(&'a self, table: &'a str) -> Vec<(&'a TableDef, Vec<&'a ColumnDef>)> {
        self.tables
            .iter()
            .filter_map(|t| {
                let columns: Vec<_> = t.foreign_keys_into(table).collect();
                (!columns.is_empty()).then_some((t, columns))
            })
            .collect()
    }

    /// Every declared foreign-key relationship.
    pub fn foreign_keys(&self) -> Vec<ForeignKeyRef> {
        self.tables
            .iter()
            .flat_map(|t| {
                t.foreign_keys().map(move |c| ForeignKeyRef {
                    table: t.name.clone(),
                    column: c.name.clone(),
                    references: c.references.clone().unwrap_or_default(),
                })
            })
            .collect()
    }

    fn check(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
        }

        for table in &self.tables {
            for column in table.foreign_keys() {
                let references = column.references.as_deref().unwrap_or_default();
                let Some(parent) = self.table(references) else {
                    return Err(SchemaError::UnknownReference {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        references: references.to_string(),
                    });
                };
                if parent.rank >= table.rank {
                    return Err(SchemaError::DependencyOrder {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        references: references.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The ten tables of the point-of-sale store.
    pub fn point_of_sale() -> Self {
        use ColumnType::{Integer, Real, Text};
        let timestamp = |name: &str| ColumnDef::optional(name, Text).with_default("CURRENT_TIMESTAMP");

        Schema::new()
            .with_table(
                TableDef::new("categories", 0)
                    .with_column(ColumnDef::new("name", Text))
                    .with_column(ColumnDef::optional("description", Text))
                    .with_column(timestamp("created_at")),
            )
            .with_table(
                TableDef::new("expense_categories", 0)
                    .with_column(ColumnDef::new("name", Text))
                    .with_column(ColumnDef::optional("description", Text))
                    .with_column(timestamp("created_at")),
            )
            .with_table(
                TableDef::new("suppliers", 0)
                    .with_column(ColumnDef::new("name", Text))
                    .with_column(ColumnDef::optional("contact_name", Text))
                    .with_column(ColumnDef::optional("phone", Text))
                    .with_column(ColumnDef::optional("email", Text))
                    .with_column(ColumnDef::optional("address", Text))
                    .with_column(timestamp("created_at")),
            )
            .with_table(
                TableDef::new("customers", 0)
                    .with_column(ColumnDef::new("name", Text))
                    .with_column(ColumnDef::optional("phone", Text))
                    .with_column(ColumnDef::optional("email", Text))
                    .with_column(ColumnDef::optional("address", Text))
                    .with_column(ColumnDef::optional("total_spent", Real))
                    .with_column(timestamp("created_at")),
            )
            .with_table(
                TableDef::new("products", 1)
                    .with_column(ColumnDef::new("name", Text))
                    .with_column(ColumnDef::optional("barcode", Text))
                    .with_column(ColumnDef::optional_foreign_key("category_id", "categories"))
                    .with_column(ColumnDef::optional_foreign_key("supplier_id", "suppliers"))
                    .with_column(ColumnDef::new("price", Real))
                    .with_column(ColumnDef::optional("cost", Real))
                    .with_column(ColumnDef::new("stock_quantity", Integer))
                    .with_column(ColumnDef::optional("min_stock", Integer))
                    .with_column(timestamp("created_at"))
                    .with_column(timestamp("updated_at")),
            )
            .with_table(
                TableDef::new("sales", 1)
                    .with_column(ColumnDef::optional_foreign_key("customer_id", "customers"))
                    .with_column(ColumnDef::new("total", Real))
                    .with_column(ColumnDef::optional("discount", Real))
                    .with_column(ColumnDef::new("payment_method", Text))
                    .with_column(timestamp("created_at")),
            )
            .with_table(
                TableDef::new("sale_items", 2)
                    .with_column(ColumnDef::foreign_key("sale_id", "sales"))
                    .with_column(ColumnDef::foreign_key("product_id", "products"))
                    .with_column(ColumnDef::new("quantity", Integer))
                    .with_column(ColumnDef::new("unit_price", Real))
                    .with_column(ColumnDef::new("subtotal", Real)),
            )
            .with_table(
                TableDef::new("expenses", 1)
                    .with_column(ColumnDef::optional_foreign_key("category_id", "expense_categories"))
                    .with_column(ColumnDef::new("amount", Real))
                    .with_column(ColumnDef::optional("description", Text))
                    .with_column(ColumnDef::new("date", Text))
                    .with_column(timestamp("created_at")),
            )
            .with_table(
                TableDef::new("stock_movements", 2)
                    .with_column(ColumnDef::foreign_key("product_id", "products"))
                    .with_column(ColumnDef::optional_foreign_key("supplier_id", "suppliers"))
                    .with_column(ColumnDef::new("movement_type", Text))
                    .with_column(ColumnDef::new("quantity", Integer))
                    .with_column(ColumnDef::optional("reason", Text))
                    .with_column(timestamp("created_at")),
            )
            .with_table(
                TableDef::new("bulk_pricing", 2)
                    .with_column(ColumnDef::foreign_key("product_id", "products"))
                    .with_column(ColumnDef::new("min_quantity", Integer))
                    .with_column(ColumnDef::new("price", Real)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_of_sale_order() {
        let schema = Schema::point_of_sale();
        let order: Vec<_> = schema
            .migration_order()
            .unwrap()
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();

        assert_eq!(order.len(), 10);
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
        for parent in ["categories", "expense_categories", "suppliers", "customers"] {
            assert!(pos(parent) < pos("products"));
            assert!(pos(parent) < pos("expenses"));
        }
        assert!(pos("products") < pos("sale_items"));
        assert!(pos("sales") < pos("sale_items"));
        assert!(pos("products") < pos("stock_movements"));
        assert!(pos("suppliers") < pos("bulk_pricing"));
    }

    #[test]
    fn test_dependents_of_products() {
        let schema = Schema::point_of_sale();
        let dependents: Vec<_> = schema
            .dependents_of("products")
            .into_iter()
            .map(|(t, _)| t.name.as_str())
            .collect();
        assert_eq!(dependents, vec!["sale_items", "stock_movements", "bulk_pricing"]);
    }

    #[test]
    fn test_foreign_key_display() {
        let schema = Schema::point_of_sale();
        let fks = schema.foreign_keys();
        assert_eq!(fks.len(), 9);
        assert!(fks
            .iter()
            .any(|fk| fk.to_string() == "products.category_id -> categories.id"));
    }

    #[test]
    fn test_rank_violation_rejected() {
        let schema = Schema::new()
            .with_table(TableDef::new("parents", 1))
            .with_table(
                TableDef::new("children", 1)
                    .with_column(ColumnDef::foreign_key("parent_id", "parents")),
            );
        assert!(matches!(
            schema.migration_order(),
            Err(SchemaError::DependencyOrder { .. })
        ));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let schema = Schema::new().with_table(
            TableDef::new("orphans", 1).with_column(ColumnDef::foreign_key("ghost_id", "ghosts")),
        );
        assert!(matches!(
            schema.migration_order(),
            Err(SchemaError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let schema = Schema::new()
            .with_table(TableDef::new("a", 0))
            .with_table(TableDef::new("a", 0));
        assert_eq!(
            schema.migration_order().unwrap_err(),
            SchemaError::DuplicateTable("a".into())
        );
    }
}
