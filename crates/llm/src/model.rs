use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns a trimmed copy, or `None` when the id is blank.
    pub fn normalized(mut self) -> Option<Self> {
        self.id = self.id.trim().to_string();
        if self.id.is_empty() {
            return None;
        }

        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            self.name = self.id.clone();
        }
        self.description = self
            .description
            .map(|description| description.trim().to_string())
            .filter(|description| !description.is_empty());

        Some(self)
    }
}

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub fn default_models() -> Vec<Model> {
    vec![
        Model::new("gpt-4o-mini", "GPT-4o mini").with_description("Fast and affordable default"),
        Model::new("gpt-4o", "GPT-4o").with_description("High quality general model"),
        Model::new("gpt-4.1", "GPT-4.1").with_description("Stronger instruction following"),
        Model::new("o3", "o3").with_description("Advanced reasoning model"),
    ]
}

pub fn find_model<'a>(models: &'a [Model], id: &str) -> Option<&'a Model> {
    let id = id.trim();
    models.iter().find(|model| model.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_drops_blank_ids_and_fills_name() {
        assert!(Model::new("  ", "Blank").normalized().is_none());

        let model = Model::new(" gpt-4o ", " ")
            .with_description("  ")
            .normalized();
        assert_eq!(
            model,
            Some(Model {
                id: "gpt-4o".to_string(),
                name: "gpt-4o".to_string(),
                description: None,
            })
        );
    }

    #[test]
    fn default_catalog_contains_default_model() {
        let models = default_models();
        assert!(find_model(&models, DEFAULT_MODEL).is_some());
        assert!(find_model(&models, "unknown").is_none());
    }
}
