use std::path::Path;

/// Loads `.env` next to the crate manifest, then from the working directory.
/// Variables already set in the environment are not overridden.
pub fn init() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}
