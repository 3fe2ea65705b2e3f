//! Synthetic legacy data.
//!
//! Creates the integer-keyed schema and fills it with reproducible rows so
//! the migration can be exercised end to end.

use keyshift_core::schema::{ColumnDef, ColumnType, Schema, TableDef, ID_COLUMN};
use keyshift_core::storage::{column_type, quote_ident};
use keyshift_core::{Storage, Value};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Share of optional columns left NULL.
const NULL_RATE: f64 = 0.15;

/// Create the legacy tables and insert `rows` rows into each.
///
/// Returns the rows inserted per table.
pub async fn seed(
    storage: &dyn Storage,
    schema: &Schema,
    rows: usize,
    seed: u64,
) -> Result<BTreeMap<String, u64>, Box<dyn std::error::Error>> {
    let order = schema.migration_order()?;
    for table in &order {
        if column_type(storage, &table.name, ID_COLUMN).await?.as_deref() == Some("TEXT") {
            return Err(format!("{} already uses identifier keys; refusing to seed", table.name).into());
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();

    storage.execute("BEGIN IMMEDIATE").await?;
    let result = async {
        for table in &order {
            storage.execute(&table.legacy_ddl()).await?;
            for index in table.foreign_key_indexes() {
                storage.execute(&index).await?;
            }
            let inserted = seed_table(storage, table, rows, &counts, &mut rng).await?;
            tracing::debug!(table = %table.name, inserted, "table seeded");
            counts.insert(table.name.clone(), inserted);
        }
        Ok::<_, keyshift_core::Error>(())
    }
    .await;

    match result {
        Ok(()) => {
            storage.execute("COMMIT").await?;
            Ok(counts)
        }
        Err(e) => {
            storage.execute("ROLLBACK").await?;
            Err(e.into())
        }
    }
}

async fn seed_table(
    storage: &dyn Storage,
    table: &TableDef,
    rows: usize,
    parents: &BTreeMap<String, u64>,
    rng: &mut StdRng,
) -> Result<u64, keyshift_core::Error> {
    let columns = table
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=table.columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders})",
        quote_ident(&table.name)
    );

    let mut inserted = 0;
    for i in 0..rows {
        let Some(values) = table
            .columns
            .iter()
            .map(|column| column_value(column, i, parents, rng))
            .collect::<Option<Vec<_>>>()
        else {
            // A required parent is empty.
            break;
        };
        storage.run(&sql, &values).await?;
        inserted += 1;
    }
    Ok(inserted)
}

/// A value for `column` in row `i`, or `None` when a required parent has no rows.
fn column_value(
    column: &ColumnDef,
    i: usize,
    parents: &BTreeMap<String, u64>,
    rng: &mut StdRng,
) -> Option<Value> {
    if column.nullable && rng.gen_bool(NULL_RATE) {
        return Some(Value::Null);
    }

    if let Some(references) = &column.references {
        let parent_rows = parents.get(references).copied().unwrap_or(0);
        return match parent_rows {
            0 if column.nullable => Some(Value::Null),
            0 => None,
            n => Some(Value::Integer(rng.gen_range(1..=n as i64))),
        };
    }

    Some(match column.column_type {
        ColumnType::Integer => Value::Integer(rng.gen_range(0..500)),
        ColumnType::Real => Value::Real((rng.gen_range(0.5..250.0_f64) * 100.0).round() / 100.0),
        ColumnType::Text => Value::Text(text_value(&column.name, i, rng)),
        ColumnType::Blob => Value::Blob((0..16).map(|_| rng.gen()).collect()),
    })
}

fn text_value(column: &str, i: usize, rng: &mut StdRng) -> String {
    match column {
        "created_at" | "updated_at" | "date" => format!(
            "2024-{:02}-{:02} {:02}:{:02}:00",
            rng.gen_range(1..=12),
            rng.gen_range(1..=28),
            rng.gen_range(8..=20),
            rng.gen_range(0..60)
        ),
        "email" => format!("contact{i}@example.com"),
        "phone" => format!("555-{:04}", rng.gen_range(0..10_000)),
        "payment_method" => ["cash", "card", "transfer"][i % 3].to_string(),
        "movement_type" => ["in", "out", "adjustment"][i % 3].to_string(),
        "barcode" => format!("{:013}", rng.gen_range(0..10_000_000_000_000_u64)),
        _ => {
            let suffix: String = (0..6).map(|_| rng.sample(Alphanumeric) as char).collect();
            format!("{column} {i} {suffix}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyshift_core::storage::{count_rows, SqliteStorage};

    #[tokio::test]
    async fn test_seed_point_of_sale() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let schema = Schema::point_of_sale();
        let counts = seed(&storage, &schema, 20, 7).await.unwrap();

        assert_eq!(counts.len(), 10);
        assert!(counts.values().all(|&n| n == 20));
        assert_eq!(count_rows(&storage, "sale_items").await.unwrap(), 20);

        let orphans = storage
            .get_first(
                "SELECT COUNT(*) FROM sale_items si
                 WHERE NOT EXISTS (SELECT 1 FROM products p WHERE p.id = si.product_id)",
                &[],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(orphans.get_i64(0).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_seed_is_reproducible() {
        let schema = Schema::point_of_sale();
        let a = SqliteStorage::open_in_memory().unwrap();
        let b = SqliteStorage::open_in_memory().unwrap();
        seed(&a, &schema, 5, 99).await.unwrap();
        seed(&b, &schema, 5, 99).await.unwrap();

        let sql = "SELECT name, price, category_id FROM products ORDER BY id";
        let rows_a = a.get_all(sql, &[]).await.unwrap();
        let rows_b = b.get_all(sql, &[]).await.unwrap();
        assert_eq!(rows_a, rows_b);
    }

    #[tokio::test]
    async fn test_zero_rows_creates_schema() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let counts = seed(&storage, &Schema::point_of_sale(), 0, 1).await.unwrap();
        assert!(counts.values().all(|&n| n == 0));
        assert_eq!(
            column_type(&storage, "bulk_pricing", "id").await.unwrap().as_deref(),
            Some("INTEGER")
        );
    }
}
