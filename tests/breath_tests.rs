use std::fs::File;
use std::io::{self, BufRead};
use std::path::Path;

fn read_records(file_path: &str) -> io::Result<Vec<(f64, f64)>> {
    let path = Path::new(file_path);
    let file = File::open(path)?;
    let reader = io::BufReader::new(file);

    let mut records = Vec::new();
    for line in reader.lines().skip(1) {
        let line = line?;
        let mut fields = line.trim().split(',');
        if let (Some(Ok(time)), Some(Ok(pos))) = (
            fields.next().map(str::parse::<f64>),
            fields.next().map(str::parse::<f64>),
        ) {
            records.push((time, pos));
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use breath_algos::analysis::crossings::{Crossing, CrossingEvents, Direction};
    use breath_algos::analysis::pipeline::{BreathPipeline, PipelineConfig};
    use breath_algos::analysis::session::BreathSession;
    use breath_algos::preprocessing::recording::Recording;

    fn load_recording() -> Recording {
        let records = read_records(&format!(
            "{}/tests/resource/breath.csv",
            env!("CARGO_MANIFEST_DIR")
        ))
        .expect("Failed to read breath recording");
        Recording::from_records(&records)
    }

    fn is_strictly_increasing(indices: &[usize]) -> bool {
        indices.windows(2).all(|w| w[0] < w[1])
    }

    #[test]
    fn test_read_recording() {
        let recording = load_recording();
        assert_eq!(recording.len(), 900, "The sentinel row should be dropped");
        assert_eq!(recording.positions()[0], 0.0);
    }

    #[test]
    fn test_sampling_jitter() {
        let recording = load_recording();
        let intervals = recording.intervals();
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        assert!((mean - 0.1).abs() < 0.005, "Mean interval was {mean}");
        for &dt in &intervals {
            assert!(dt > 0.05 && dt < 0.15, "Interval {dt} out of range");
        }
    }

    #[test]
    fn test_resampled_length() {
        let recording = load_recording();
        let resampled = recording.resampled(0.1).expect("Failed to resample");
        assert!(resampled.len() >= 890 && resampled.len() <= 900);
        assert_eq!(resampled[0], 0.0);
    }

    #[test]
    fn test_breath_cycles() {
        let recording = load_recording();
        let pipeline =
            BreathPipeline::new(PipelineConfig::default()).expect("Default config is valid");
        let analysis = pipeline
            .analyze(recording.positions())
            .expect("Failed to analyze recording");
        let events = &analysis.segmentation.events;
        assert!(is_strictly_increasing(&events.up));
        assert!(is_strictly_increasing(&events.down));
        assert!(
            (18..=26).contains(&events.up.len()),
            "Expected about 21 inhales, found {}",
            events.up.len()
        );
        assert!(
            (18..=26).contains(&events.down.len()),
            "Expected about 21 exhales, found {}",
            events.down.len()
        );
        for pair in events.up[1..].windows(2) {
            let gap = pair[1] - pair[0];
            assert!((30..=55).contains(&gap), "Breath of {gap} samples");
        }
        for i in 0..analysis.segmentation.len() {
            assert!(analysis.segmentation.x_delta[i] >= 0.0);
            assert!(analysis.segmentation.dx_delta[i] >= 0.0);
        }
    }

    #[test]
    fn test_smoothed_metrics() {
        let recording = load_recording();
        let pipeline =
            BreathPipeline::new(PipelineConfig::default()).expect("Default config is valid");
        let analysis = pipeline
            .analyze(recording.positions())
            .expect("Failed to analyze recording");
        let smoothed = analysis.smoothed.expect("Smoothing is on by default");
        for &duration in &smoothed.duration[200..] {
            assert!(
                duration > 30.0 && duration < 55.0,
                "Smoothed duration {duration} out of range"
            );
        }
        for &delta in &smoothed.x_delta[200..] {
            assert!(delta > 55.0 && delta < 90.0, "Smoothed amplitude {delta}");
        }
    }

    #[test]
    fn test_centering_removes_drift() {
        let recording = load_recording();
        let pipeline =
            BreathPipeline::new(PipelineConfig::default()).expect("Default config is valid");
        let analysis = pipeline
            .analyze(recording.positions())
            .expect("Failed to analyze recording");
        let tail_mean = |data: &[f64]| data[600..].iter().sum::<f64>() / 300.0;
        assert!(tail_mean(&analysis.centered).abs() < tail_mean(&analysis.filtered).abs());
    }

    #[test]
    fn test_filtered_detector_latency() {
        let recording = load_recording();
        let pipeline =
            BreathPipeline::new(PipelineConfig::default()).expect("Default config is valid");
        let raw = pipeline
            .raw_crossings(recording.positions())
            .expect("Failed to segment raw signal");
        let analysis = pipeline
            .analyze(recording.positions())
            .expect("Failed to analyze recording");
        assert!(
            raw.events.up.len() > analysis.segmentation.events.up.len(),
            "The unfiltered detector should see spurious crossings"
        );
        let report = pipeline
            .latency(recording.positions())
            .expect("Every filtered crossing should follow a raw one");
        assert_eq!(report.up.delays.len(), analysis.segmentation.events.up.len());
        assert!(report.up.max().unwrap() <= 4);
        assert!(report.down.max().unwrap() <= 4);
        assert!(report.up.mean().unwrap() < 2.5);
        assert!(report.down.mean().unwrap() < 2.5);
    }

    #[test]
    fn test_streaming_session_matches_batch() {
        let recording = load_recording();
        let config = PipelineConfig::default();
        let analysis = BreathPipeline::new(config.clone())
            .expect("Default config is valid")
            .analyze(recording.positions())
            .expect("Failed to analyze recording");
        let mut session = BreathSession::new(&config).expect("Default config is valid");
        let mut confirmed = CrossingEvents::default();
        for &sample in recording.positions() {
            match session.push(sample).crossing {
                Some(Crossing::Confirmed { direction, index }) => match direction {
                    Direction::Up => confirmed.up.push(index),
                    Direction::Down => confirmed.down.push(index),
                },
                Some(Crossing::Retracted { .. }) | None => {}
            }
        }
        assert_eq!(session.events(), &analysis.segmentation.events);
        assert!(confirmed.up.len() >= session.events().up.len());
    }

    #[test]
    fn test_analyze_batch() {
        let recording = load_recording();
        let halves = vec![
            recording.positions()[..450].to_vec(),
            recording.positions()[450..].to_vec(),
        ];
        let pipeline =
            BreathPipeline::new(PipelineConfig::default()).expect("Default config is valid");
        let results = pipeline.analyze_batch(&halves).expect("Failed batch analysis");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].filtered.len(), 450);
        assert!(!results[1].segmentation.events.up.is_empty());
    }
}
