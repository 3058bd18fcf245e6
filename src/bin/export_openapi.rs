//! Export the OpenAPI document to stdout or a file.
//!
//! Usage:
//!   cargo run --bin export_openapi
//!   cargo run --bin export_openapi -- --output docs/openapi.json

use forgeos_core::openapi::ApiDoc;
use utoipa::OpenApi;

fn main() {
    let spec = ApiDoc::openapi();

    let args: Vec<String> = std::env::args().collect();
    let output_path = if args.len() > 2 && args[1] == "--output" {
        Some(args[2].as_str())
    } else {
        None
    };

    let json = spec.to_pretty_json().expect("serializable OpenAPI document");

    match output_path {
        Some(path) => {
            std::fs::write(path, &json).expect("failed to write output file");
            eprintln!("OpenAPI spec exported to: {path}");
        }
        None => println!("{json}"),
    }
}
