//! Entities referenced by statements
//!
//! Entities are written by ingestion; search only reads them to anchor
//! graph traversal.

use serde::{Deserialize, Serialize};

/// A named person, place, tool or concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub name_embedding: Vec<f32>,
    pub owner_id: String,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_type: None,
            name_embedding: Vec::new(),
            owner_id: owner_id.into(),
        }
    }

    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.name_embedding = embedding;
        self
    }
}

/// An entity matched against part of a query
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMatch {
    pub entity: Entity,
    pub similarity: f32,
}
