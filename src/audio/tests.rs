use super::capture::{concat_blocks, consume_blocks, session_outcome, AudioBuffer, StopReason};
use super::device::{list_input_devices, select_best_input, AudioDeviceInfo};
use super::dispatch::{append_downmixed_samples, BlockDispatcher};
use super::resample::{resample_linear, resample_to_rate};
use super::silence::{mean_amplitude, SilenceTracker};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn info(name: &str, rate: u32, latency: f32) -> AudioDeviceInfo {
    AudioDeviceInfo {
        name: name.to_string(),
        host: "test".to_string(),
        max_input_channels: 2,
        default_sample_rate: rate,
        default_latency: latency,
    }
}

#[test]
fn downmix_averages_stereo_frames() {
    let mut buf = Vec::new();
    append_downmixed_samples(&mut buf, &[0.2f32, 0.4, -0.2, 0.2], 2, |s| s);
    assert_eq!(buf.len(), 2);
    assert!((buf[0] - 0.3).abs() < 1e-6);
    assert!((buf[1] - 0.0).abs() < 1e-6);
}

#[test]
fn downmix_passes_mono_through() {
    let mut buf = Vec::new();
    append_downmixed_samples(&mut buf, &[1i16, -1, 0], 1, |s| s as f32);
    assert_eq!(buf, vec![1.0, -1.0, 0.0]);
}

#[test]
fn downmix_handles_trailing_partial_frame() {
    let mut buf = Vec::new();
    append_downmixed_samples(&mut buf, &[0.5f32, 0.5, 0.8], 2, |s| s);
    assert_eq!(buf.len(), 2);
    assert!((buf[1] - 0.8).abs() < 1e-6);
}

#[test]
fn dispatcher_drops_blocks_when_queue_is_full() {
    let (tx, rx) = bounded::<Vec<f32>>(1);
    let dropped = Arc::new(AtomicUsize::new(0));
    let pump = BlockDispatcher::new(tx, dropped.clone());

    pump.push(&[0.1f32, 0.2], 1, |s| s);
    pump.push(&[0.3f32, 0.4], 1, |s| s);

    assert_eq!(dropped.load(Ordering::Relaxed), 1);
    assert_eq!(rx.recv().unwrap(), vec![0.1, 0.2]);
    assert!(rx.try_recv().is_err());
}

#[test]
fn dispatcher_ignores_empty_callback_data() {
    let (tx, rx) = bounded::<Vec<f32>>(4);
    let pump = BlockDispatcher::new(tx, Arc::new(AtomicUsize::new(0)));
    pump.push(&[] as &[f32], 1, |s| s);
    assert!(rx.try_recv().is_err());
}

#[test]
fn mean_amplitude_is_abs_average() {
    assert_eq!(mean_amplitude(&[]), 0.0);
    let level = mean_amplitude(&[0.5, -0.5, 0.0, 1.0]);
    assert!((level - 0.5).abs() < 1e-6);
}

#[test]
fn silence_tracker_triggers_after_window() {
    let mut tracker = SilenceTracker::new(0.01, 1.5);
    let start = Instant::now();
    assert!(!tracker.observe(0.001, start));
    assert!(!tracker.observe(0.001, start + Duration::from_millis(1_000)));
    // Exactly the window is not enough; strictly longer is.
    assert!(!tracker.observe(0.001, start + Duration::from_millis(1_500)));
    assert!(tracker.observe(0.001, start + Duration::from_millis(1_501)));
}

#[test]
fn loud_block_resets_silence_timer() {
    let mut tracker = SilenceTracker::new(0.01, 1.0);
    let start = Instant::now();
    assert!(!tracker.observe(0.001, start));
    assert!(!tracker.observe(0.5, start + Duration::from_millis(900)));
    assert!(!tracker.observe(0.001, start + Duration::from_millis(1_800)));
    assert!(tracker.observe(0.001, start + Duration::from_millis(2_900)));
}

#[test]
fn non_positive_window_disables_auto_stop() {
    let mut tracker = SilenceTracker::new(0.01, 0.0);
    let start = Instant::now();
    assert!(!tracker.observe(0.0, start));
    assert!(!tracker.observe(0.0, start + Duration::from_secs(3600)));
}

#[test]
fn concat_preserves_block_order() {
    let samples = concat_blocks(vec![vec![1.0, 2.0], vec![], vec![3.0]]);
    assert_eq!(samples, vec![1.0, 2.0, 3.0]);
}

#[test]
fn resample_is_identity_at_equal_rates() {
    let input = vec![0.1, 0.2, 0.3];
    assert_eq!(resample_to_rate(&input, 16_000, 16_000), input);
    assert_eq!(resample_to_rate(&input, 0, 16_000), input);
}

#[test]
fn resample_halves_length_when_downsampling_by_two() {
    let input: Vec<f32> = (0..1_000).map(|i| (i as f32 / 50.0).sin()).collect();
    let output = resample_to_rate(&input, 32_000, 16_000);
    assert_eq!(output.len(), 500);
}

#[test]
fn linear_resample_interpolates_between_samples() {
    let output = resample_linear(&[0.0, 1.0], 2.0);
    assert_eq!(output.len(), 4);
    assert!((output[1] - 0.5).abs() < 1e-6);
}

#[test]
fn best_input_prefers_low_latency() {
    let devices = vec![
        info("slow", 48_000, 0.05),
        info("fast", 16_000, 0.01),
        info("mid", 44_100, 0.02),
    ];
    assert_eq!(select_best_input(&devices), Some(1));
}

#[test]
fn best_input_breaks_latency_ties_by_rate() {
    let devices = vec![
        info("low-rate", 16_000, 0.02),
        info("high-rate", 48_000, 0.02),
    ];
    assert_eq!(select_best_input(&devices), Some(1));
}

#[test]
fn best_input_tie_keeps_first_entry() {
    let devices = vec![info("first", 48_000, 0.02), info("second", 48_000, 0.02)];
    assert_eq!(select_best_input(&devices), Some(0));
    assert_eq!(select_best_input(&[]), None);
}

#[test]
fn buffer_duration_uses_sample_rate() {
    let buffer = AudioBuffer {
        samples: vec![0.0; 32_000],
        sample_rate: 16_000,
    };
    assert!((buffer.duration_secs() - 2.0).abs() < 1e-6);
    assert_eq!(
        AudioBuffer {
            samples: Vec::new(),
            sample_rate: 0
        }
        .duration_secs(),
        0.0
    );
}

#[test]
fn every_listed_device_names_a_real_host() {
    let hosts: Vec<&str> = cpal::available_hosts().iter().map(|id| id.name()).collect();
    // May be empty on headless machines; what matters is that enumeration
    // never fails and every entry is attributed to an actual host API.
    for device in list_input_devices() {
        assert!(
            hosts.contains(&device.host.as_str()),
            "device '{}' reports unknown host '{}'",
            device.name,
            device.host
        );
        assert!(!device.name.is_empty());
    }
}

#[test]
fn consumer_returns_manual_when_stop_flag_is_set() {
    let (_tx, rx) = bounded::<Vec<f32>>(4);
    let stop = AtomicBool::new(true);
    let error = Mutex::new(None);
    let mut tracker = SilenceTracker::new(0.01, 0.0);

    let (blocks, reason) = consume_blocks(&rx, &stop, &error, &mut tracker);
    assert!(blocks.is_empty());
    assert_eq!(reason, StopReason::Manual);
}

#[test]
fn consumer_surfaces_stream_errors() {
    let (_tx, rx) = bounded::<Vec<f32>>(4);
    let stop = AtomicBool::new(false);
    let error = Mutex::new(Some("device unplugged".to_string()));
    let mut tracker = SilenceTracker::new(0.01, 0.0);

    let (_, reason) = consume_blocks(&rx, &stop, &error, &mut tracker);
    assert_eq!(reason, StopReason::Error("device unplugged".into()));
    // The slot is consumed; the next session starts clean.
    assert!(error.lock().unwrap().is_none());
}

#[test]
fn consumer_treats_disconnect_as_stream_failure() {
    let (tx, rx) = bounded::<Vec<f32>>(4);
    tx.send(vec![0.5; 160]).unwrap();
    drop(tx);
    let stop = AtomicBool::new(false);
    let error = Mutex::new(None);
    let mut tracker = SilenceTracker::new(0.01, 0.0);

    let (blocks, reason) = consume_blocks(&rx, &stop, &error, &mut tracker);
    assert_eq!(blocks.len(), 1);
    assert!(matches!(reason, StopReason::Error(_)));
}

#[test]
fn consumer_auto_stops_after_sustained_silence() {
    let (tx, rx) = bounded::<Vec<f32>>(64);
    let stop = AtomicBool::new(false);
    let error = Mutex::new(None);
    let mut tracker = SilenceTracker::new(0.01, 0.05);

    let feeder = thread::spawn(move || {
        for _ in 0..20 {
            if tx.send(vec![0.0f32; 160]).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
    });
    let (blocks, reason) = consume_blocks(&rx, &stop, &error, &mut tracker);
    feeder.join().unwrap();

    assert_eq!(reason, StopReason::SilenceTimeout);
    assert!(!blocks.is_empty());
}

#[test]
fn outcome_with_no_frames_has_no_buffer() {
    let outcome = session_outcome(Vec::new(), StopReason::Manual, 16_000, 16_000, 0);
    assert!(outcome.buffer.is_none());
    assert_eq!(outcome.reason, StopReason::Manual);
    assert_eq!(outcome.blocks, 0);

    let outcome = session_outcome(
        vec![Vec::new(), Vec::new()],
        StopReason::SilenceTimeout,
        16_000,
        16_000,
        0,
    );
    assert!(outcome.buffer.is_none());
    assert_eq!(outcome.blocks, 2);
}

#[test]
fn outcome_resamples_to_the_target_rate() {
    let blocks = vec![vec![0.1f32; 320], vec![0.2f32; 320]];
    let outcome = session_outcome(blocks, StopReason::Manual, 32_000, 16_000, 3);
    let buffer = outcome.buffer.expect("buffer");
    assert_eq!(buffer.sample_rate, 16_000);
    assert_eq!(buffer.samples.len(), 320);
    assert_eq!(outcome.blocks, 2);
    assert_eq!(outcome.dropped, 3);
}

#[test]
fn stop_reasons_compare_by_kind() {
    assert_eq!(StopReason::SilenceTimeout, StopReason::SilenceTimeout);
    assert_ne!(StopReason::Manual, StopReason::SilenceTimeout);
    assert_eq!(
        StopReason::Error("x".into()),
        StopReason::Error("x".into())
    );
}
