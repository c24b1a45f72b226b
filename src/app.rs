use crate::cli::{Cli, Commands};
use clipshrink::config::Config;
use clipshrink::engine::{
    Codec, EncodingMode, EngineEvent, JobParams, Session, estimate_output_size, probe,
    target_bitrate_kbps,
};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

pub fn run(cli: Cli) {
    match cli.command {
        Commands::CheckFfmpeg => handle_check_ffmpeg(),
        Commands::Probe { file } => handle_probe(file),
        Commands::Estimate {
            file,
            crf,
            scale,
            target_size,
        } => handle_estimate(file, crf, scale, target_size),
        Commands::Encode {
            file,
            mode,
            codec,
            target_size,
            crf,
            scale,
        } => handle_encode(file, mode, codec, target_size, crf, scale),
        Commands::InitConfig => handle_init_config(),
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: {e:#}; using built-in defaults");
        Config::default()
    })
}

fn handle_check_ffmpeg() {
    let config = load_config();
    match probe::ffmpeg_version(&config.tools.ffmpeg_path) {
        Ok(version) => println!("ffmpeg found: {version}"),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
    match probe::ffprobe_version(&config.tools.ffprobe_path) {
        Ok(version) => println!("ffprobe found: {version}"),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn handle_probe(file: PathBuf) {
    let config = load_config();
    match probe::probe_metadata(&config.tools.ffprobe_path, &file) {
        Ok(meta) => {
            println!("Resolution: {}x{}", meta.width, meta.height);
            println!("Framerate:  {} fps", meta.fps);
            println!("Duration:   {} s", meta.duration_s);
            match meta.bitrate_kbps {
                Some(kbps) => println!("Bitrate:    {kbps} kbps"),
                None => println!("Bitrate:    unknown"),
            }
            println!("File size:  {} MB", meta.file_size_mb);
            println!("Codec:      {}", meta.codec);
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn handle_estimate(
    file: PathBuf,
    crf: Option<u32>,
    scale: Option<f64>,
    target_size: Option<u32>,
) {
    let config = load_config();
    let meta = match probe::probe_metadata(&config.tools.ffprobe_path, &file) {
        Ok(meta) => meta,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    };

    let crf = crf.unwrap_or(config.defaults.crf);
    let scale = scale.unwrap_or(config.defaults.scale);
    let target_size = target_size.unwrap_or(config.defaults.target_size_mb);

    match estimate_output_size(&meta, crf, scale) {
        Some(est) => {
            println!(
                "CRF {} @ {}x: ~{} MB at ~{} kbps ({}x{})",
                crf, scale, est.size_mb, est.bitrate_kbps, est.new_width, est.new_height
            );
        }
        None => println!("CRF estimate unavailable (missing metadata)"),
    }

    match target_bitrate_kbps(
        f64::from(target_size),
        meta.duration_s,
        config.defaults.audio_bitrate_kbps,
    ) {
        Some(kbps) => println!("Two-pass target for {target_size} MB: {kbps} kbps video"),
        None => println!("Two-pass target unavailable (duration unknown)"),
    }
}

fn handle_encode(
    file: PathBuf,
    mode: EncodingMode,
    codec: Codec,
    target_size: Option<u32>,
    crf: Option<u32>,
    scale: Option<f64>,
) {
    let mut config = load_config();
    // The CLI runs one explicit job; no background priming pass
    config.defaults.auto_analyze = false;

    let params = JobParams {
        target_size_mb: target_size.unwrap_or(config.defaults.target_size_mb),
        crf: crf.unwrap_or(config.defaults.crf),
        scale: scale.unwrap_or(config.defaults.scale),
    };

    let mut session = Session::new(config);

    let events = match session.select_source(&file) {
        Ok(events) => events,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    };
    print_events(&events);

    if mode == EncodingMode::TwoPass {
        if let Some(kbps) = session.estimate_bitrate(params.target_size_mb) {
            println!(
                "Target: {} MB over {:.1}s -> {} kbps video",
                params.target_size_mb,
                session.metadata().map(|m| m.duration_s).unwrap_or(0.0),
                kbps
            );
        }
    }

    match session.start_job(mode, codec, params) {
        Ok(events) => print_events(&events),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }

    let exit_code = drive_to_completion(&mut session, mode, params);

    let stats = session.stats();
    if stats.jobs_completed > 0 {
        println!(
            "Session: {} job(s) done, {:.2} MB in, {:.2} MB out",
            stats.jobs_completed, stats.input_mb, stats.output_mb
        );
    }
    process::exit(exit_code);
}

fn print_events(events: &[EngineEvent]) {
    for event in events {
        if let EngineEvent::Log(line) = event {
            println!("{line}");
        }
    }
}

/// Pump events until the job reaches a terminal outcome.
fn drive_to_completion(session: &mut Session, mode: EncodingMode, params: JobParams) -> i32 {
    loop {
        let events = session.poll();
        for event in &events {
            match event {
                EngineEvent::Progress { overall_pct } => {
                    print!("\rProgress: {overall_pct:.1}%");
                    let _ = std::io::stdout().flush();
                }
                EngineEvent::Log(line) => println!("\n{line}"),
                EngineEvent::FirstPassDone => println!("\nFirst pass complete"),
                EngineEvent::Completed { output } => {
                    println!("\nDone: {}", output.display());
                    if mode == EncodingMode::TwoPass {
                        if let Ok(out_meta) = std::fs::metadata(output) {
                            let actual_mb = out_meta.len() as f64 / (1024.0 * 1024.0);
                            let target = f64::from(params.target_size_mb);
                            println!(
                                "Output size: {:.2} MB (target {} MB, off by {:.2} MB)",
                                actual_mb,
                                params.target_size_mb,
                                (actual_mb - target).abs()
                            );
                        }
                    }
                    return 0;
                }
                EngineEvent::Failed { message } => {
                    eprintln!("\nEncode failed: {message}");
                    return 1;
                }
                EngineEvent::Stopped => {
                    println!("\nStopped");
                    return 0;
                }
                EngineEvent::CacheInvalidated => {}
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn handle_init_config() {
    match Config::ensure_default() {
        Ok(()) => match Config::config_path() {
            Ok(path) => println!("Config ready at {}", path.display()),
            Err(e) => eprintln!("Error: {e:#}"),
        },
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}
