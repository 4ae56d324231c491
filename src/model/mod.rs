pub mod model_metadata;
pub mod model_storage;
pub mod label_decoder;
pub mod config;

pub use model_metadata::ModelMetadata;
pub use model_storage::{save_model_with_metadata, load_metadata, load_model_with_metadata, print_metadata_info};
pub use label_decoder::LabelDecoder;
pub use config::{AppConfig, AttackSettings, DeviceType, DisplaySettings, ModelSettings, PathSettings, resolve_resource_path};
