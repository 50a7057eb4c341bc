//! Annotation schemas: typed extraction contracts compiled to tool definitions.
//!
//! A schema is either a set of label categories (each an array of
//! `{label, uid}` objects) or a flat record of named string fields. The JSON
//! schema sent to the model is derived once, when the schema is built, and
//! replies are parsed strictly against the same shape.

use std::collections::BTreeMap;
use std::sync::Arc;

use reviewlens_core::{CategoryMap, LabelEntry};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

use crate::service::ToolSpec;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("{schema}: reply is not valid JSON: {source}")]
    Json {
        schema: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{schema}: {reason}")]
    Shape { schema: String, reason: String },
    #[error("unknown schema: {0}")]
    Unknown(String),
}

/// A named slot in a schema: a category or a record field.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub name: String,
    pub description: String,
}

impl Slot {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputShape {
    CategoryLabels { categories: Vec<Slot> },
    Record { fields: Vec<Slot> },
}

/// What a reply parsed into.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Categories(CategoryMap),
    Record(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
pub struct AnnotationSchema {
    pub name: String,
    pub version: u32,
    /// System prompt sent ahead of the payload.
    pub instructions: String,
    pub shape: OutputShape,
    tool: ToolSpec,
}

impl AnnotationSchema {
    pub fn new(name: &str, version: u32, instructions: &str, shape: OutputShape) -> Self {
        let tool = compile(name, version, instructions, &shape);
        Self {
            name: name.to_string(),
            version,
            instructions: instructions.to_string(),
            shape,
            tool,
        }
    }

    pub fn category_labels(
        name: &str,
        version: u32,
        instructions: &str,
        categories: Vec<Slot>,
    ) -> Self {
        Self::new(name, version, instructions, OutputShape::CategoryLabels { categories })
    }

    pub fn record(name: &str, version: u32, instructions: &str, fields: Vec<Slot>) -> Self {
        Self::new(name, version, instructions, OutputShape::Record { fields })
    }

    pub fn tool(&self) -> &ToolSpec {
        &self.tool
    }

    pub fn is_category_labels(&self) -> bool {
        matches!(self.shape, OutputShape::CategoryLabels { .. })
    }

    /// Names of the categories or fields, in declaration order.
    pub fn slot_names(&self) -> Vec<&str> {
        let slots = match &self.shape {
            OutputShape::CategoryLabels { categories } => categories,
            OutputShape::Record { fields } => fields,
        };
        slots.iter().map(|s| s.name.as_str()).collect()
    }

    fn shape_error(&self, reason: impl Into<String>) -> SchemaError {
        SchemaError::Shape {
            schema: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Strictly parse tool-call arguments against this schema.
    ///
    /// Undeclared keys are ignored; declared keys with the wrong shape fail the
    /// whole reply.
    pub fn parse(&self, arguments: &str) -> Result<Extraction, SchemaError> {
        let value: Value = serde_json::from_str(arguments).map_err(|source| SchemaError::Json {
            schema: self.name.clone(),
            source,
        })?;
        let Value::Object(object) = value else {
            return Err(self.shape_error("top level is not an object"));
        };

        match &self.shape {
            OutputShape::CategoryLabels { categories } => {
                self.parse_categories(categories, object).map(Extraction::Categories)
            }
            OutputShape::Record { fields } => {
                self.parse_record(fields, object).map(Extraction::Record)
            }
        }
    }

    fn parse_categories(
        &self,
        categories: &[Slot],
        mut object: Map<String, Value>,
    ) -> Result<CategoryMap, SchemaError> {
        let mut map = CategoryMap::new();
        for slot in categories {
            let Some(value) = object.remove(&slot.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let entries: Vec<LabelEntry> = serde_json::from_value(value)
                .map_err(|e| self.shape_error(format!("category {}: {e}", slot.name)))?;
            map.insert(slot.name.clone(), entries);
        }
        if !object.is_empty() {
            debug!(schema = %self.name, extra = object.len(), "ignoring undeclared keys");
        }
        Ok(map)
    }

    fn parse_record(
        &self,
        fields: &[Slot],
        mut object: Map<String, Value>,
    ) -> Result<BTreeMap<String, String>, SchemaError> {
        let mut record = BTreeMap::new();
        for slot in fields {
            let text = match object.remove(&slot.name) {
                None | Some(Value::Null) => continue,
                Some(Value::String(s)) => s,
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                Some(Value::Array(items)) => {
                    let parts: Option<Vec<&str>> = items.iter().map(Value::as_str).collect();
                    parts
                        .ok_or_else(|| {
                            self.shape_error(format!("field {}: list of non-strings", slot.name))
                        })?
                        .join("; ")
                }
                Some(Value::Object(_)) => {
                    return Err(self.shape_error(format!("field {}: nested object", slot.name)));
                }
            };
            record.insert(slot.name.clone(), text.trim().to_string());
        }
        Ok(record)
    }
}

fn compile(name: &str, version: u32, instructions: &str, shape: &OutputShape) -> ToolSpec {
    let (properties, required): (Map<String, Value>, Vec<&str>) = match shape {
        OutputShape::CategoryLabels { categories } => (
            categories
                .iter()
                .map(|slot| {
                    let property = json!({
                        "type": "array",
                        "description": slot.description,
                        "items": {
                            "type": "object",
                            "properties": {
                                "label": { "type": "string" },
                                "uid": { "type": "array", "items": { "type": "integer" } }
                            },
                            "required": ["label", "uid"]
                        }
                    });
                    (slot.name.clone(), property)
                })
                .collect(),
            categories.iter().map(|s| s.name.as_str()).collect(),
        ),
        OutputShape::Record { fields } => (
            fields
                .iter()
                .map(|slot| {
                    let property = json!({ "type": "string", "description": slot.description });
                    (slot.name.clone(), property)
                })
                .collect(),
            fields.iter().map(|s| s.name.as_str()).collect(),
        ),
    };

    ToolSpec {
        name: format!("{name}_v{version}"),
        description: instructions.to_string(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

// ── Built-in schemas ──

pub const MARKET: &str = "market";
pub const JOBS: &str = "jobs";
pub const REVIEW_ATTRIBUTES: &str = "review_attributes";
pub const CLUSTER_LABEL: &str = "cluster_label";

const LABEL_INSTRUCTIONS: &str = "You are a product researcher. Group the reviews below into \
topics for each category. Each label is a short descriptive phrase. For every label list the ids \
of the reviews it was observed in, using the numeric id that starts each review line. Each line \
reads: <id> <rating*> `review text`.";

fn market() -> AnnotationSchema {
    AnnotationSchema::category_labels(
        MARKET,
        1,
        LABEL_INSTRUCTIONS,
        vec![
            Slot::new("useCase", "Specific use cases the product is bought for."),
            Slot::new("productComparison", "Comparisons with competing products."),
            Slot::new("featureRequest", "Requested features or enhancements."),
            Slot::new("painPoints", "Specific challenges or problems customers encountered."),
            Slot::new("usageFrequency", "Patterns of usage frequency."),
            Slot::new("usageTime", "When the product is used."),
            Slot::new("usageLocation", "Where the product is used."),
            Slot::new("customerDemographics", "Demographic segments of the customers."),
        ],
    )
}

fn jobs() -> AnnotationSchema {
    AnnotationSchema::category_labels(
        JOBS,
        1,
        LABEL_INSTRUCTIONS,
        vec![
            Slot::new("functionalJob", "Main tasks or problems the product solves."),
            Slot::new("socialJob", "How users want to be seen by others using the product."),
            Slot::new("emotionalJob", "Feelings or states users aim to achieve with the product."),
            Slot::new(
                "supportingJob",
                "Tasks or activities that aid the main function of the product.",
            ),
        ],
    )
}

fn review_attributes() -> AnnotationSchema {
    let fields = [
        ("reviewSummary", "One-sentence summary of the review."),
        ("buyerMotivation", "Why the buyer purchased the product."),
        ("customerExpectations", "What the buyer expected from the product."),
        ("howTheProductIsUsed", "How the product is used."),
        ("whereTheProductIsUsed", "Where the product is used."),
        ("userDescription", "Who the user is."),
        ("packaging", "Comments on packaging."),
        ("season", "Season in which the product is used."),
        ("whenTheProductIsUsed", "Time or occasion of use."),
        ("appraisal", "Overall appraisal."),
        ("quality", "Perceived quality."),
        ("durability", "Perceived durability."),
        ("easeOfUse", "How easy the product is to use."),
        ("setupAndInstructions", "Setup experience and instructions."),
        ("noiseAndSmell", "Noise or smell of the product."),
        ("sizeAndFit", "Size and fit."),
        ("dangerAppraisal", "Safety concerns."),
        ("designAndAppearance", "Design and appearance."),
        ("partsAndComponents", "Comments on parts and components."),
        ("issues", "Problems encountered."),
    ];
    AnnotationSchema::record(
        REVIEW_ATTRIBUTES,
        1,
        "Extract the following attributes from the review. Use a short phrase per attribute \
and answer \"not mentioned\" when the review says nothing about it.",
        fields.iter().map(|(n, d)| Slot::new(n, d)).collect(),
    )
}

fn cluster_label() -> AnnotationSchema {
    AnnotationSchema::record(
        CLUSTER_LABEL,
        1,
        "Name the group of phrases below with one short, human-readable label of at most \
seven words.",
        vec![Slot::new("label", "Label for the group, at most seven words.")],
    )
}

/// Schema for consolidating one category's labels. Built per category so the
/// tool declares exactly the category being merged.
pub fn consolidation(category: &str) -> AnnotationSchema {
    AnnotationSchema::category_labels(
        &format!("consolidate_{category}"),
        1,
        "You are a product researcher. The labels below were extracted from separate batches \
of reviews. Merge labels that describe the same topic into one canonical label and union their \
review ids. Keep labels that are distinct. Never invent review ids.",
        vec![Slot::new(category, "Consolidated labels with the union of their review ids.")],
    )
}

/// Name-indexed schemas available to a run.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<AnnotationSchema>>,
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self {
            schemas: BTreeMap::new(),
        }
    }

    /// Market, jobs-to-be-done, review attributes, and cluster labels.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for schema in [market(), jobs(), review_attributes(), cluster_label()] {
            registry.register(schema);
        }
        registry
    }

    pub fn register(&mut self, schema: AnnotationSchema) {
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
    }

    pub fn get(&self, name: &str) -> Result<Arc<AnnotationSchema>, SchemaError> {
        self.schemas
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::Unknown(name.to_string()))
    }

    /// Resolve several names at once, failing on the first unknown one.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<AnnotationSchema>>, SchemaError> {
        names.iter().map(|n| self.get(n)).collect()
    }
}
