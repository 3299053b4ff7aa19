use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub const AUTHOR_SEPARATOR: &str = "; ";

/// Column layout of a chunk table; `dim` fixes the vector width.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("chunk_id", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("embedder_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("authors", DataType::Utf8, false),
        Field::new("year", DataType::Int32, true),
        Field::new("section_label", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("indexed_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ]))
}

/// Key/value table holding table bindings and the active table pointer.
pub fn build_meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

/// Vector width declared by a chunk table's schema.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
    match schema.field_with_name("vector").ok()?.data_type() {
        DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_dim_reads_fixed_size_list_width() {
        assert_eq!(vector_dim(&build_chunk_schema(768)), Some(768));
        assert_eq!(vector_dim(&build_meta_schema()), None);
    }
}
