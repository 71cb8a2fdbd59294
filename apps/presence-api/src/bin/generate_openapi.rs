use std::error::Error;
use std::path::Path;

use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn Error>> {
    let spec = presence_api::routes::ApiDoc::openapi().to_pretty_json()?;
    let out = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../specs/presence-api.json");
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&out, spec)?;
    println!("Wrote {}", out.display());
    Ok(())
}
