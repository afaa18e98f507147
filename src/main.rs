use anyhow::Result;
use clap::Parser;
use fatigue_pipeline::alert::summarize_levels;
use fatigue_pipeline::config::{Args, PipelineConfig};
use fatigue_pipeline::data_loading::load_sessions;
use fatigue_pipeline::output::{write_csv_outputs, write_run_summary, RunSummary};
use fatigue_pipeline::pipeline::ProcessedSession;
use fatigue_pipeline::training::prepare_pipeline;
use fatigue_pipeline::FatigueLevel;
use log::debug;

fn print_session_summary(session: &ProcessedSession, config: &PipelineConfig) {
    let summary = summarize_levels(&session.states, config);

    println!("\nSession {} ({} samples)", session.id, session.len());
    if session.bias.is_degenerate() {
        println!("  Force baseline: none (no force signal)");
    } else {
        let (intercept, slope) = session.bias.coefficients();
        println!("  Force baseline: {:.4} + {:.4} x %MVC", intercept, slope);
    }

    println!("  Time in each level:");
    for level in FatigueLevel::ALL {
        let minutes = summary.minutes_in_level.get(&level).copied().unwrap_or(0.0) as i64;
        println!("    {:<5} {}h {}min", level.as_str(), minutes / 60, minutes % 60);
    }
    if let (Some(peak), Some(last)) = (summary.peak_level, summary.final_level) {
        println!(
            "  Peak level: {}, final level: {}, alert changes: {}",
            peak, last, summary.alert_changes
        );
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = args.pipeline_config()?;
    debug!("Pipeline parameters: {:?}", config);

    println!("Loading sessions from {}", args.input_path.display());
    let sessions = load_sessions(&args.input_path, args.input_format, &args.session_column)?;

    let artifacts = prepare_pipeline(&sessions, &config, !args.skip_training)?;

    for session in &artifacts.sessions {
        print_session_summary(session, &config);
    }

    println!(
        "\nFeature rows: {} ({} complete)",
        artifacts.features.len(),
        artifacts.valid_mask.iter().filter(|v| **v).count()
    );
    for (name, outcome) in &artifacts.reports {
        println!("\n{}:\n{}", name, outcome);
    }

    if let Some(prefix) = &args.csv_output {
        for path in write_csv_outputs(prefix, &artifacts)? {
            println!("Wrote {}", path.display());
        }
    }
    if let Some(path) = &args.summary_json {
        write_run_summary(path, &RunSummary::from_artifacts(&artifacts))?;
        println!("Wrote {}", path.display());
    }

    Ok(())
}
