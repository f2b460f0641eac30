use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef, TimeUnit, UnionFields, UnionMode};
use fusebridge::import::import_schema;
use fusebridge::Runtime;
use fusebridge_native::export::export_schema;

fn round_trip(schema: &Schema) -> SchemaRef {
    let mut exported = export_schema(schema).unwrap();
    // SAFETY: exported is a valid, movable schema descriptor
    unsafe { import_schema(&mut exported) }.unwrap()
}

fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn union_fields() -> UnionFields {
    UnionFields::new(
        vec![0, 1],
        vec![
            Field::new("int", DataType::Int32, true),
            Field::new("text", DataType::Utf8, true),
        ],
    )
}

fn wide_schema() -> Schema {
    let inner = Fields::from(vec![
        Field::new("leaf", DataType::Float64, true),
        Field::new("flag", DataType::Boolean, false),
    ]);
    let outer = Fields::from(vec![
        Field::new("inner", DataType::Struct(inner), true),
        Field::new("label", DataType::Utf8, false),
    ]);
    let entries = Field::new(
        "entries",
        DataType::Struct(Fields::from(vec![
            Field::new("keys", DataType::Utf8, false),
            Field::new("values", DataType::Int64, true),
        ])),
        false,
    );

    Schema::new_with_metadata(
        vec![
            Field::new("i8", DataType::Int8, false),
            Field::new("i16", DataType::Int16, true),
            Field::new("i32", DataType::Int32, true),
            Field::new("i64", DataType::Int64, false),
            Field::new("u8", DataType::UInt8, true),
            Field::new("u16", DataType::UInt16, true),
            Field::new("u32", DataType::UInt32, true),
            Field::new("u64", DataType::UInt64, true),
            Field::new("f32", DataType::Float32, true),
            Field::new("f64", DataType::Float64, true),
            Field::new("ts", DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())), true),
            Field::new("text", DataType::Utf8, true)
                .with_metadata(metadata(&[("comment", "free text")])),
            Field::new(
                "list",
                DataType::List(Arc::new(Field::new("item", DataType::Int32, true))),
                true,
            ),
            Field::new(
                "fixed",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, false)), 3),
                false,
            ),
            Field::new("nested", DataType::Struct(outer), true),
            Field::new("dense", DataType::Union(union_fields(), UnionMode::Dense), false),
            Field::new("sparse", DataType::Union(union_fields(), UnionMode::Sparse), false),
            Field::new(
                "dict",
                DataType::Dictionary(Box::new(DataType::Int16), Box::new(DataType::Utf8)),
                true,
            ),
            Field::new("map", DataType::Map(Arc::new(entries), false), true),
        ],
        metadata(&[("origin", "orders"), ("version", "2")]),
    )
}

#[test]
fn test_schema_round_trip_preserves_everything() {
    let schema = wide_schema();
    let imported = round_trip(&schema);
    assert_eq!(*imported, schema);

    let again = round_trip(&imported);
    assert_eq!(again, imported);

    assert_eq!(imported.metadata()["origin"], "orders");
    assert!(!imported.field_with_name("i8").unwrap().is_nullable());
    assert_eq!(
        imported.field_with_name("text").unwrap().metadata()["comment"],
        "free text"
    );
}

#[tokio::test]
async fn test_engine_schema_matches_collected_batches() {
    let runtime = Runtime::new().unwrap();
    let session = runtime.create_session().unwrap();
    let result = session
        .sql("SELECT 1 AS a, 'x' AS b, [1, 2, 3] AS c, named_struct('d', 2.5, 'e', named_struct('f', true)) AS g")
        .await
        .unwrap();

    let schema = result.schema().await.unwrap();
    let collected = result.collect().await.unwrap();
    let names = |s: &Schema| s.fields().iter().map(|f| f.name().clone()).collect::<Vec<_>>();
    assert_eq!(names(&collected.schema()), names(&schema));
    assert_eq!(names(&schema), ["a", "b", "c", "g"]);
    assert_eq!(collected.num_rows(), 1);

    let g = schema.field_with_name("g").unwrap();
    let DataType::Struct(children) = g.data_type() else {
        panic!("expected a struct, got {}", g.data_type());
    };
    assert_eq!(children.len(), 2);
    assert!(matches!(children[1].data_type(), DataType::Struct(_)));
}
