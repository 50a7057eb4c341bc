/// Arrow schema definitions for quantified label tables.
///
/// The same layout backs the three persisted tables: `category_insights`,
/// `attribute_clusters`, and `attribute_clusters_by_entity` (the only one
/// with `entity_id` populated).
pub mod tables {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use arrow::array::{
        ArrayRef, Float64Builder, ListBuilder, RecordBatch, StringBuilder, UInt32Builder,
        UInt64Builder,
    };
    use arrow::compute::concat_batches;
    use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
    use arrow::error::ArrowError;

    use crate::quantify::{ConsolidatedLabel, InsightTable};

    pub const CATEGORY_INSIGHTS: &str = "category_insights";
    pub const ATTRIBUTE_CLUSTERS: &str = "attribute_clusters";
    pub const ATTRIBUTE_CLUSTERS_BY_ENTITY: &str = "attribute_clusters_by_entity";

    fn list_of(data_type: DataType) -> DataType {
        DataType::List(Arc::new(Field::new("item", data_type, true)))
    }

    /// Schema for one quantified label per row.
    pub fn label_table_schema() -> Schema {
        Schema::new(vec![
            Field::new("entity_id", DataType::Utf8, true),
            Field::new("category", DataType::Utf8, false),
            Field::new("label", DataType::Utf8, false),
            Field::new("observation_count", DataType::UInt64, false),
            Field::new("percentage", DataType::Float64, false),
            Field::new("item_percentage", DataType::Float64, false),
            Field::new("average_rating", DataType::Float64, false),
            Field::new("uids", list_of(DataType::UInt32), false),
            Field::new("entities", list_of(DataType::Utf8), false),
            Field::new("example_text", list_of(DataType::Utf8), false),
        ])
    }

    /// Build a record batch from quantified labels, tagging every row with
    /// `entity` when the table is entity-scoped.
    pub fn label_table_batch(
        entity: Option<&str>,
        rows: &[ConsolidatedLabel],
    ) -> Result<RecordBatch, ArrowError> {
        let mut entity_id = StringBuilder::new();
        let mut category = StringBuilder::new();
        let mut label = StringBuilder::new();
        let mut count = UInt64Builder::with_capacity(rows.len());
        let mut percentage = Float64Builder::with_capacity(rows.len());
        let mut item_percentage = Float64Builder::with_capacity(rows.len());
        let mut average_rating = Float64Builder::with_capacity(rows.len());
        let mut uids = ListBuilder::new(UInt32Builder::new());
        let mut entities = ListBuilder::new(StringBuilder::new());
        let mut examples = ListBuilder::new(StringBuilder::new());

        for row in rows {
            entity_id.append_option(entity);
            category.append_value(&row.category);
            label.append_value(&row.label);
            count.append_value(row.observation_count);
            percentage.append_value(row.percentage);
            item_percentage.append_value(row.item_percentage);
            average_rating.append_value(row.average_rating);

            for uid in &row.uids {
                uids.values().append_value(*uid);
            }
            uids.append(true);
            for e in &row.entities {
                entities.values().append_value(e);
            }
            entities.append(true);
            for text in &row.example_text {
                examples.values().append_value(text);
            }
            examples.append(true);
        }

        let schema: SchemaRef = Arc::new(label_table_schema());
        let columns: Vec<ArrayRef> = vec![
            Arc::new(entity_id.finish()),
            Arc::new(category.finish()),
            Arc::new(label.finish()),
            Arc::new(count.finish()),
            Arc::new(percentage.finish()),
            Arc::new(item_percentage.finish()),
            Arc::new(average_rating.finish()),
            Arc::new(uids.finish()),
            Arc::new(entities.finish()),
            Arc::new(examples.finish()),
        ];
        RecordBatch::try_new(schema, columns)
    }

    /// Flatten a category → labels table into one batch, categories in order.
    pub fn insight_table_batch(
        entity: Option<&str>,
        table: &InsightTable,
    ) -> Result<RecordBatch, ArrowError> {
        let rows: Vec<ConsolidatedLabel> = table.values().flatten().cloned().collect();
        label_table_batch(entity, &rows)
    }

    /// All per-entity tables in one batch, entities in key order.
    pub fn entity_tables_batch(
        tables: &BTreeMap<String, InsightTable>,
    ) -> Result<RecordBatch, ArrowError> {
        let schema: SchemaRef = Arc::new(label_table_schema());
        let batches = tables
            .iter()
            .map(|(entity, table)| insight_table_batch(Some(entity), table))
            .collect::<Result<Vec<_>, _>>()?;
        concat_batches(&schema, &batches)
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::UInt64Type;

    use super::tables;
    use crate::quantify::{ConsolidatedLabel, InsightTable};

    fn label(category: &str, name: &str, uids: Vec<u32>) -> ConsolidatedLabel {
        ConsolidatedLabel {
            category: category.into(),
            label: name.into(),
            observation_count: uids.len() as u64,
            external_ids: uids.iter().map(|u| format!("R{u}")).collect(),
            entities: vec!["B01".into()],
            ratings: vec![4; uids.len()],
            percentage: 50.0,
            item_percentage: 25.0,
            average_rating: 4.0,
            example_text: vec!["nice".into()],
            uids,
        }
    }

    #[test]
    fn label_table_schema_has_expected_fields() {
        let schema = tables::label_table_schema();
        assert_eq!(schema.fields().len(), 10);
        assert!(schema.field_with_name("entity_id").unwrap().is_nullable());
        assert!(schema.field_with_name("example_text").is_ok());
    }

    #[test]
    fn corpus_batch_leaves_entity_null() {
        let rows = [label("c", "a", vec![0, 1]), label("c", "b", vec![2])];
        let batch = tables::label_table_batch(None, &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column(0).null_count(), 2);
        let counts = batch.column(3).as_primitive::<UInt64Type>();
        assert_eq!(counts.value(0), 2);
        assert_eq!(counts.value(1), 1);
        let uids = batch.column(7).as_list::<i32>();
        assert_eq!(uids.value(0).len(), 2);
    }

    #[test]
    fn entity_batch_tags_every_row() {
        let table = InsightTable::from([
            ("c1".to_string(), vec![label("c1", "a", vec![0])]),
            ("c2".to_string(), vec![label("c2", "b", vec![1]), label("c2", "d", vec![2])]),
        ]);
        let batch = tables::insight_table_batch(Some("B01"), &table).unwrap();
        assert_eq!(batch.num_rows(), 3);
        let entity = batch.column(0).as_string::<i32>();
        assert!((0..3).all(|i| entity.value(i) == "B01"));
        let category = batch.column(1).as_string::<i32>();
        assert_eq!(category.value(0), "c1");
        assert_eq!(category.value(2), "c2");
    }

    #[test]
    fn entity_tables_concatenate_in_key_order() {
        let tables = std::collections::BTreeMap::from([
            (
                "B02".to_string(),
                InsightTable::from([("c".to_string(), vec![label("c", "a", vec![3])])]),
            ),
            (
                "B01".to_string(),
                InsightTable::from([(
                    "c".to_string(),
                    vec![label("c", "a", vec![0]), label("c", "b", vec![1])],
                )]),
            ),
        ]);
        let batch = tables::entity_tables_batch(&tables).unwrap();
        assert_eq!(batch.num_rows(), 3);
        let entity = batch.column(0).as_string::<i32>();
        assert_eq!(entity.value(0), "B01");
        assert_eq!(entity.value(2), "B02");

        let empty = tables::entity_tables_batch(&Default::default()).unwrap();
        assert_eq!(empty.num_rows(), 0);
    }

    #[test]
    fn empty_rows_make_empty_batch() {
        let batch = tables::label_table_batch(None, &[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 10);
    }
}
