use nl2sql::schema::{parse, Column, ForeignKeyRef, Schema, Table};
use proptest::prelude::*;

const TYPES: &[&str] = &["INTEGER", "TEXT", "REAL", "DATE", "VARCHAR(20)", "DECIMAL(10,2)"];

fn ident() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[a-z]{1,6}_[a-z0-9]{1,4}",
        1 => "[a-z]{2,5} [a-z]{2,5}",
    ]
}

fn column() -> impl Strategy<Value = Column> {
    (ident(), 0..TYPES.len(), any::<bool>()).prop_map(|(name, t, not_null)| {
        let mut column = Column::new(name, TYPES[t]);
        column.nullable = !not_null;
        column
    })
}

fn table() -> impl Strategy<Value = Table> {
    (ident(), prop::collection::vec(column(), 1..6), 0u8..3).prop_map(|(name, mut columns, pk)| {
        let keyed = match pk {
            1 => 1,
            2 => columns.len().min(2),
            _ => 0,
        };
        for column in columns.iter_mut().take(keyed) {
            column.primary_key = true;
            column.nullable = false;
        }
        Table { name, columns }
    })
}

/// Tables after the first reference the first table's key when it has a
/// single-column primary key.
fn tables() -> impl Strategy<Value = Vec<Table>> {
    prop::collection::vec(table(), 1..5).prop_map(|mut tables| {
        let target = {
            let pk = tables[0].primary_key();
            (pk.len() == 1).then(|| (tables[0].name.clone(), pk[0].name.clone()))
        };
        if let Some((table, column)) = target {
            for t in tables.iter_mut().skip(1).filter(|t| t.name != table) {
                if t.columns.len() >= 2 {
                    if let Some(last) = t.columns.last_mut() {
                        last.references = Some(ForeignKeyRef {
                            table: table.clone(),
                            column: column.clone(),
                        });
                    }
                }
            }
        }
        tables
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn canonical_text_parses_back_to_the_same_schema(tables in tables()) {
        let schema = Schema::new(tables, Vec::new());
        let text = schema.canonical_text();
        let reparsed = parse(&text).unwrap();

        prop_assert_eq!(&reparsed, &schema);
        prop_assert_eq!(reparsed.canonical_text(), text);
        prop_assert!(reparsed.is_consistent());
    }
}

#[test]
fn test_messy_ddl_normalizes_once() {
    let messy = "create table IF NOT EXISTS main.\"Order Items\" (\n\
                   order_id integer not null,\n\
                   sku  varchar( 32 ),\n\
                   qty numeric(8, 2),\n\
                   primary key (order_id, sku)\n\
                 );;\n\
                 -- trailing comment\n";
    let schema = parse(messy).unwrap();
    let table = schema.table("order items").unwrap();
    assert_eq!(table.name, "Order Items");
    assert_eq!(table.primary_key().len(), 2);
    assert_eq!(table.column("sku").unwrap().data_type, "VARCHAR(32)");

    let canonical = schema.canonical_text();
    assert_eq!(parse(&canonical).unwrap(), schema);
    assert_eq!(parse(&canonical).unwrap().canonical_text(), canonical);
}
