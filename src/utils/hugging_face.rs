use std::path::{Path, PathBuf};

use hf_hub::api::tokio::Api;

/// The file name of pretrained weights in safetensors format
pub static WEIGHTS_FILE: &str = "model.safetensors";

/// The file name of a pretrained model configuration
pub static CONFIG_FILE: &str = "config.json";

/// Download model config and weights from Hugging Face Hub, or find them in a local directory.
/// If file exists in cache, it will not be downloaded again.
pub async fn download_hf_model(model_name_or_path: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
    let config_file = download_hf_file(model_name_or_path, CONFIG_FILE).await?;
    let model_file = download_hf_file(model_name_or_path, WEIGHTS_FILE).await?;

    Ok((config_file, model_file))
}

/// Resolve a single file for the given model
// NOTE: Uses the tokio API to work within an already-async context
pub async fn download_hf_file(model_name_or_path: &str, filename: &str) -> anyhow::Result<PathBuf> {
    let local_dir = Path::new(model_name_or_path);

    if local_dir.is_dir() {
        let path = local_dir.join(filename);

        if !path.is_file() {
            return Err(anyhow!(
                "Unable to find {} in local model directory {}",
                filename,
                local_dir.display()
            ));
        }

        return Ok(path);
    }

    let api = Api::new().map_err(|e| anyhow!("Unable to reach the Hugging Face Hub: {}", e))?;
    let repo = api.model(model_name_or_path.to_string());

    debug!("Fetching {} for {}", filename, model_name_or_path);

    repo.get(filename).await.map_err(|e| {
        anyhow!(
            "Failed to download: {} file with name: {} from HuggingFace Hub: {}",
            model_name_or_path,
            filename,
            e
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_files_in_local_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        let name = dir.path().to_str().unwrap();

        let config = download_hf_file(name, CONFIG_FILE).await.unwrap();
        assert_eq!(config, dir.path().join(CONFIG_FILE));

        let missing = download_hf_file(name, WEIGHTS_FILE).await;
        assert!(missing.is_err());
    }
}
