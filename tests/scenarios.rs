use chrono::{DateTime, Utc};
use fatigue_pipeline::config::{InputFormat, PipelineConfig};
use fatigue_pipeline::data_loading::load_sessions;
use fatigue_pipeline::labels::build_labels;
use fatigue_pipeline::output::{write_csv_outputs, write_run_summary, RunSummary};
use fatigue_pipeline::pipeline::{run_session, ProcessedSession};
use fatigue_pipeline::training::prepare_pipeline;
use fatigue_pipeline::{AlertColor, Blink, FatigueLevel, Sample, Session, Trend};

const START: i64 = 1_700_038_800; // 2023-11-15 09:00:00 UTC

fn session_from(id: &str, points: &[(f64, i32)]) -> Session {
    let samples = points
        .iter()
        .enumerate()
        .map(|(i, &(mvc, posture))| Sample {
            timestamp: DateTime::<Utc>::from_timestamp(START + i as i64 * 30, 0).unwrap(),
            percent_mvc: mvc,
            posture_score: posture,
            force_signal: None,
        })
        .collect();
    Session::new(id, samples)
}

fn ramp(n: usize, posture: i32) -> Vec<(f64, i32)> {
    (0..n)
        .map(|i| (20.0 + 70.0 * i as f64 / (n - 1) as f64, posture))
        .collect()
}

fn levels(session: &ProcessedSession) -> Vec<FatigueLevel> {
    session.states.iter().map(|s| s.level).collect()
}

#[test]
fn test_rest_session_stays_green() {
    let config = PipelineConfig::default();
    let session = run_session(&session_from("rest", &[(0.0, 1); 60]), &config);

    assert_eq!(session.len(), 60);
    for (i, state) in session.states.iter().enumerate() {
        assert_eq!(state.cumulative_score, 0.0);
        assert_eq!(state.normalized_score, 0.0);
        assert_eq!(state.level, FatigueLevel::Low);
        assert_eq!(state.alert.color, AlertColor::Green);
        assert_eq!(state.alert.blink, Blink::Off);
        if i < 9 {
            assert_eq!(state.trend, Trend::Unknown);
        } else {
            assert_eq!(state.trend, Trend::Flat);
        }
    }

    let labels = build_labels(&session.normalized_scores(), &config);
    assert!(labels
        .iter()
        .all(|l| !l.reaches_high_within_horizon && l.future_level == FatigueLevel::Low));
}

#[test]
fn test_upright_ramp_climbs_into_mid() {
    let config = PipelineConfig::default();
    let session = run_session(&session_from("ramp", &ramp(60, 1)), &config);

    let e: Vec<f64> = session.states.iter().map(|s| s.cumulative_score).collect();
    assert_eq!(e[0], 0.0);
    assert!(e.windows(2).all(|w| w[1] > w[0]));

    let levels = levels(&session);
    assert!(levels.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(levels[0], FatigueLevel::Low);
    assert_eq!(*levels.last().unwrap(), FatigueLevel::Mid);

    let last = session.states.last().unwrap();
    assert!((last.normalized_score - 0.505).abs() < 0.02);
    assert_eq!(last.trend, Trend::Up);
    assert_eq!(last.alert.color, AlertColor::Amber);
    assert_eq!(last.alert.blink, Blink::Fast);
}

#[test]
fn test_forty_sample_upright_ramp_tops_out_in_mid() {
    let config = PipelineConfig::default();
    let session = run_session(&session_from("ramp-40", &ramp(40, 1)), &config);
    assert_eq!(session.len(), 40);

    let e: Vec<f64> = session.states.iter().map(|s| s.cumulative_score).collect();
    assert!(e.windows(2).all(|w| w[1] > w[0]));

    let levels = levels(&session);
    assert!(levels.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(levels[0], FatigueLevel::Low);

    let last = session.states.last().unwrap();
    assert_eq!(last.level, FatigueLevel::Mid);
    assert!((last.normalized_score - 0.505).abs() < 0.02);
    assert_eq!(last.trend, Trend::Up);
}

#[test]
fn test_high_before_slope_window_fills_stays_green() {
    let config = PipelineConfig::default();
    let session = run_session(&session_from("short-burst", &[(100.0, 8); 5]), &config);

    for state in &session.states[1..] {
        assert_eq!(state.level, FatigueLevel::High);
        assert_eq!(state.trend, Trend::Unknown);
        assert_eq!(state.alert.color, AlertColor::Green);
        assert_eq!(state.alert.blink, Blink::Off);
    }
}

#[test]
fn test_awkward_posture_ramp_reaches_high() {
    let config = PipelineConfig::default();
    let session = run_session(&session_from("ramp-bent", &ramp(60, 8)), &config);

    let levels = levels(&session);
    assert!(levels.windows(2).all(|w| w[0] <= w[1]));
    for level in FatigueLevel::ALL {
        assert!(levels.contains(&level), "{} never reached", level);
    }
    let last = session.states.last().unwrap();
    assert_eq!(last.level, FatigueLevel::High);
    assert_eq!(last.alert.color, AlertColor::Red);
}

#[test]
fn test_burst_then_rest_recovers_without_going_negative() {
    let config = PipelineConfig::default();
    let mut points = vec![(90.0, 3); 10];
    points.extend(vec![(0.0, 3); 40]);
    let session = run_session(&session_from("burst", &points), &config);

    let e: Vec<f64> = session.states.iter().map(|s| s.cumulative_score).collect();
    assert!(e[..10].windows(2).all(|w| w[1] > w[0]));
    assert!(e[9..].windows(2).all(|w| w[1] < w[0]));
    assert!(e.iter().all(|&v| v >= 0.0));
    assert!(*e.last().unwrap() > 0.0);

    let peak = e[9];
    assert!((peak - 170.0 * 30.0 * 10.0).abs() < 1e-6);
    assert!((e[49] - peak * (1.0f64 - 0.0003 * 30.0).powi(40)).abs() < 1e-6);
}

#[test]
fn test_sessions_are_independent() {
    let config = PipelineConfig::default();
    let heavy = session_from("heavy", &ramp(60, 8));
    let rest = session_from("rest", &[(0.0, 1); 60]);

    let alone = run_session(&rest, &config);
    let artifacts = prepare_pipeline(&[heavy, rest], &config, false).unwrap();
    assert_eq!(artifacts.sessions[1].states, alone.states);

    let (_, rest_labels) = artifacts.sessions_with_labels()[1];
    assert!(rest_labels.iter().all(|l| !l.reaches_high_within_horizon));
}

#[test]
fn test_csv_directory_end_to_end() {
    let dir = std::env::temp_dir().join(format!("fatigue-e2e-{}", std::process::id()));
    let input = dir.join("input");
    std::fs::create_dir_all(&input).unwrap();

    let mut csv = String::from("timestamp,session_id,percent_mvc,posture_score,force_signal\n");
    for i in 0..120 {
        let ts = DateTime::<Utc>::from_timestamp(START + i * 30, 0).unwrap();
        let mvc = if i < 60 { 15.0 } else { 70.0 };
        let force = 0.02 * mvc + 0.1 + 0.001 * (i % 3) as f64;
        csv.push_str(&format!(
            "{},w1,{},{},{}\n",
            ts.format("%Y-%m-%d %H:%M:%S"),
            mvc,
            6,
            force
        ));
    }
    std::fs::write(input.join("shift.csv"), &csv).unwrap();
    std::fs::write(input.join("notes.csv"), "comment\nnot a session table\n").unwrap();

    let config = PipelineConfig::default();
    let sessions = load_sessions(&input, InputFormat::Csv, "session_id").unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].has_force_signal());

    let artifacts = prepare_pipeline(&sessions, &config, true).unwrap();
    assert!(!artifacts.sessions[0].bias.is_degenerate());
    assert_eq!(artifacts.features.columns.len(), 14);

    let prefix = dir.join("out").join("run.csv");
    let written = write_csv_outputs(prefix.to_str().unwrap(), &artifacts).unwrap();
    assert_eq!(written.len(), 2);
    assert!(written.iter().all(|p| p.is_file()));

    let summary_path = dir.join("out").join("summary.json");
    write_run_summary(&summary_path, &RunSummary::from_artifacts(&artifacts)).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
    assert_eq!(json["sessions"][0]["bias"]["kind"], "fitted");
    assert!(json["models"]["binary_logistic"]["status"].is_string());

    std::fs::remove_dir_all(&dir).ok();
}
