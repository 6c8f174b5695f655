use crate::config::{HubConfig, ModelConfig, Validatable};
use hf_hub::{api::sync::ApiBuilder, Repo, RepoType};
use std::path::PathBuf;

/// Picks the ONNX file to load: the configured local file when present,
/// otherwise a download from the configured hub repository.
pub async fn resolve_model_path(model_config: &ModelConfig) -> anyhow::Result<PathBuf> {
    let local_path = model_config.get_path();
    if model_config.validate().is_ok() {
        tracing::info!("Using local model {:?}", local_path);
        return Ok(local_path);
    }

    let Some(hub) = model_config.hub.clone() else {
        anyhow::bail!(
            "Model file not found: {:?} and no hub repository configured",
            local_path
        );
    };

    tracing::info!(
        "Model file {:?} not found, fetching {} from {}@{}",
        local_path,
        hub.filename,
        hub.repo_id,
        hub.revision
    );
    let path = tokio::task::spawn_blocking(move || fetch_from_hub(&hub)).await??;
    tracing::info!("Model cached at {:?}", path);

    Ok(path)
}

fn fetch_from_hub(hub: &HubConfig) -> anyhow::Result<PathBuf> {
    let api = ApiBuilder::new().with_progress(false).build()?;
    let repo = api.repo(Repo::with_revision(
        hub.repo_id.clone(),
        RepoType::Model,
        hub.revision.clone(),
    ));
    Ok(repo.get(&hub.filename)?)
}
