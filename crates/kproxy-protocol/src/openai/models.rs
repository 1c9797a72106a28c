use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Model {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: String,
}

impl ModelList {
    pub fn new(data: Vec<Model>) -> Self {
        Self {
            object: "list",
            data,
        }
    }
}

impl Model {
    pub fn new(id: &str, created: i64, owned_by: &str) -> Self {
        Self {
            id: id.to_string(),
            object: "model",
            created,
            owned_by: owned_by.to_string(),
        }
    }
}
