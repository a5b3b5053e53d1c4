use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use ray_chat::TurnConfig;
use ray_llm::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_MODEL, DEFAULT_RESPONSE_TIMEOUT,
    HttpTransportConfig, Model, WireFormat, default_models, find_model,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/chat";
pub const SETTINGS_DIRECTORY_NAME: &str = "ray";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "RAY_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_models")]
    pub models: Vec<Model>,
    #[serde(default = "default_model_id")]
    pub default_model: String,
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub wire_format: WireFormat,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            models: default_models(),
            default_model: default_model_id(),
            web_search: false,
            wire_format: WireFormat::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            response_timeout_secs: default_response_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl ChatSettings {
    pub fn normalized(mut self) -> Self {
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };

        // Blank and repeated ids would make `/model` ambiguous.
        let mut models: Vec<Model> = Vec::with_capacity(self.models.len());
        for model in self.models.into_iter().filter_map(Model::normalized) {
            if find_model(&models, &model.id).is_none() {
                models.push(model);
            }
        }
        if models.is_empty() {
            models = default_models();
        }
        self.models = models;

        let default_model = self.default_model.trim();
        self.default_model = match find_model(&self.models, default_model) {
            Some(model) => model.id.clone(),
            None => self.models[0].id.clone(),
        };

        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = default_connect_timeout_secs();
        }
        if self.response_timeout_secs == 0 {
            self.response_timeout_secs = default_response_timeout_secs();
        }
        if self.idle_timeout_secs == 0 {
            self.idle_timeout_secs = default_idle_timeout_secs();
        }

        self
    }

    pub fn selected_model(&self) -> Option<&Model> {
        find_model(&self.models, &self.default_model)
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig::default()
            .with_wire_format(self.wire_format)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_response_timeout(Duration::from_secs(self.response_timeout_secs))
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
    }

    /// Parameters for the next turn, read fresh on every submit.
    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig::new(&self.endpoint, &self.default_model).with_web_search(self.web_search)
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".ray"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ChatSettings) -> Result<Arc<ChatSettings>, SettingsError> {
        let normalized_settings = Arc::new(settings.normalized());
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::clone(&normalized_settings));
        Ok(normalized_settings)
    }

    pub fn select_model(&self, model_id: &str) -> Result<Arc<ChatSettings>, SettingsError> {
        let current = self.settings();
        let model_id = model_id.trim();
        ensure!(
            find_model(&current.models, model_id).is_some(),
            UnknownModelSnafu {
                stage: "select-model",
                model_id,
            }
        );

        self.update(ChatSettings {
            default_model: model_id.to_string(),
            ..ChatSettings::clone(&current)
        })
    }

    pub fn set_web_search(&self, enabled: bool) -> Result<Arc<ChatSettings>, SettingsError> {
        let current = self.settings();
        self.update(ChatSettings {
            web_search: enabled,
            ..ChatSettings::clone(&current)
        })
    }

    fn load_from(path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        let figment = Figment::from(Serialized::defaults(ChatSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("unknown model '{model_id}' on `{stage}`"))]
    UnknownModel {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model_id() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_response_timeout_secs() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT.as_secs()
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}
