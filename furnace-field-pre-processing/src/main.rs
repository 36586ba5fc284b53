/// Synthetic furnace dataset generator main entry point
mod dataset;
mod generator;

use std::env;
use std::path::Path;

use constants::cases::CASE_MAP;
use generator::VolumeGenerator;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        eprintln!("Usage: {} [output_dir]", args[0]);
        std::process::exit(1);
    }

    let output_dir = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("assets/datasets");
    let output_dir = Path::new(output_dir);
    std::fs::create_dir_all(output_dir)?;

    let generator = VolumeGenerator::default();
    let mut manifest_entries = Vec::new();

    for case in CASE_MAP {
        println!("Generating case '{}'", case.name);
        let file = generator.generate(case.slug)?;
        let written = dataset::write_case(output_dir, &file)?;
        println!(
            "  {} points -> {}",
            file.point_count(),
            written.dataset.display()
        );
        manifest_entries.push(written);
    }

    dataset::write_manifest(output_dir, &manifest_entries)?;
    println!("Manifest written to {}", output_dir.join("manifest.json").display());

    Ok(())
}
