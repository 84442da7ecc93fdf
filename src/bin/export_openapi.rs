//! Dump the gateway's OpenAPI document as JSON.
//!
//! Writes to stdout, or to a file when a path is given:
//!   cargo run --bin export_openapi -- docs/openapi.json

use anyhow::Context;
use refledger::gateway::openapi::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let json = ApiDoc::openapi()
        .to_pretty_json()
        .context("OpenAPI document did not serialize")?;

    match std::env::args().nth(1) {
        Some(path) => {
            std::fs::write(&path, &json).with_context(|| format!("writing {}", path))?;
            eprintln!("OpenAPI spec written to {}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}
