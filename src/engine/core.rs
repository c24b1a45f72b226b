mod command;
mod controller;
mod estimate;
mod runner;
mod types;

pub use command::{
    PASS_LOG_BASENAME, build_analysis_cmd, build_crf_cmd, build_second_pass_cmd,
    derive_output_path, format_cmd, pass_log_dir,
};
pub use controller::{FirstPassCache, JobController};
pub use estimate::{SizeEstimate, estimate_output_size, target_bitrate_kbps};
pub use runner::{CancelFlag, PassEvent, PassOutcome, PassRequest, run_pass};
pub use types::{
    Codec, EncodeError, EncoderSettings, EncodingMode, EngineEvent, JobParams, JobState,
    ProgressParser, StartError,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_parser_basic() {
        let mut parser = ProgressParser::new();

        let elapsed = parser
            .parse_line("frame=  240 fps= 48 q=28.0 size=1024KiB time=00:01:23.45 bitrate=x")
            .expect("time token");
        assert!((elapsed - 83.45).abs() < 1e-9);
        assert!((parser.elapsed_s - 83.45).abs() < 1e-9);
    }

    #[test]
    fn test_progress_parser_hours() {
        let mut parser = ProgressParser::new();
        let elapsed = parser.parse_line("time=01:02:03.04").expect("time token");
        assert!((elapsed - 3723.04).abs() < 1e-9);
    }

    #[test]
    fn test_progress_parser_rejects_malformed() {
        let mut parser = ProgressParser::new();
        assert_eq!(parser.parse_line("time=N/A bitrate=N/A"), None);
        assert_eq!(parser.parse_line("time=1:2:3.4"), None);
        assert_eq!(parser.parse_line("frame=1 fps=30"), None);
        assert_eq!(parser.parse_line("time=00:00"), None);
        assert_eq!(parser.elapsed_s, 0.0);
    }

    #[test]
    fn test_progress_percentage() {
        let mut parser = ProgressParser::new();
        parser.parse_line("time=00:00:05.00");

        assert_eq!(parser.percent(10.0), Some(50.0));
        assert_eq!(parser.percent(5.0), Some(100.0));
        // Past the end: capped, never above 100
        assert_eq!(parser.percent(2.5), Some(100.0));
        // Unknown duration
        assert_eq!(parser.percent(0.0), None);
    }

    #[test]
    fn codec_encoder_names() {
        assert_eq!(Codec::H264.encoder_name(), "libx264");
        assert_eq!(Codec::H265.encoder_name(), "libx265");
    }

    #[test]
    fn mode_and_codec_labels_are_filename_safe() {
        for label in [
            EncodingMode::TwoPass.label(),
            EncodingMode::Crf.label(),
            Codec::H264.label(),
            Codec::H265.label(),
        ] {
            assert!(label.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn job_state_running_classification() {
        assert!(JobState::Pass1Running.is_running());
        assert!(JobState::Pass2Running.is_running());
        assert!(!JobState::Idle.is_running());
        assert!(!JobState::Pass1Done.is_running());
        assert!(!JobState::Completed.is_running());
        assert!(!JobState::Failed.is_running());
    }
}
