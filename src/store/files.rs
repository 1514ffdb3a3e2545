use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use super::ModelStore;
use crate::error::Result;
use crate::models::{DemandSegment, TallerId};
use crate::train::TrainedModel;

#[derive(Debug, Clone)]
pub struct FileModelStore {
    root: PathBuf,
}

impl FileModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, taller_id: TallerId, segment: DemandSegment) -> PathBuf {
        self.root
            .join(taller_id.to_string())
            .join(segment.as_str())
            .join("model.json")
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn save_model(&self, model: &TrainedModel) -> Result<()> {
        let path = self.path_for(model.taller_id, model.segment);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec(model)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &path).await?;
        info!(path = %path.display(), trees = model.model.n_trees(), "model saved");
        Ok(())
    }

    async fn load_model(&self, taller_id: TallerId, segment: DemandSegment) -> Result<Option<TrainedModel>> {
        let path = self.path_for(taller_id, segment);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}
