use std::path::Path;

pub async fn handle(oci_path: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config)?;
    let image_id = super::skopeo(&config)
        .image_id(oci_path)
        .await
        .map_err(super::user_error)?;

    println!("{}", image_id);
    Ok(())
}
