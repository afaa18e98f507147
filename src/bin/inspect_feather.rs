use anyhow::{Context, Result};
use arrow::ipc::reader::FileReaderBuilder;
use fatigue_pipeline::data_loading::ColumnMap;
use std::fs::File;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        println!("Usage: {} <feather_file> [session_column]", args[0]);
        std::process::exit(1);
    }
    let session_column = args.get(2).map(String::as_str).unwrap_or("session_id");

    let file = File::open(&args[1]).with_context(|| format!("Failed to open {}", args[1]))?;
    let reader = FileReaderBuilder::new().build(file)?;
    let schema = reader.schema();

    println!("\nSchema:");
    println!("{:#?}", schema);

    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    match ColumnMap::resolve(&names, session_column) {
        Ok(columns) => {
            println!("\nUsable as a session table:");
            println!("  timestamp     -> {}", names[columns.timestamp]);
            println!("  percent_mvc   -> {}", names[columns.percent_mvc]);
            println!("  posture_score -> {}", names[columns.posture_score]);
            println!(
                "  force_signal  -> {}",
                columns.force_signal.map(|i| names[i]).unwrap_or("(absent)")
            );
            println!(
                "  session       -> {}",
                columns.session.map(|i| names[i]).unwrap_or("(absent, single session)")
            );
        }
        Err(e) => println!("\nNot a usable session table: {}", e),
    }

    let rows: usize = reader
        .map(|batch| batch.map(|b| b.num_rows()))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .sum();
    println!("\nRows: {}", rows);

    Ok(())
}
