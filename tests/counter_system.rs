//! CounterSystem 端到端测试: 图片回放输入 + 脚本检测器 + 内存事件存储

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use people_counter_rs::detection::{BBox, DetectAndTrack, Detection, ModelLoader};
use people_counter_rs::input::{Frame, ReplayDevice};
use people_counter_rs::pipeline::stream::placeholder_jpeg;
use people_counter_rs::storage::EventSink;
use people_counter_rs::{
    CounterConfig, CounterSystem, DetectionFailure, Direction, MemorySink, ModelError,
};

/// 单个目标从左向右匀速走过画面 (640 宽, 计数线 x=320)
struct Walker {
    x: f32,
    step: f32,
}

impl DetectAndTrack for Walker {
    fn name(&self) -> String {
        "walker".into()
    }

    fn detect_and_track(
        &mut self,
        _frame: &Frame,
        _conf: f32,
    ) -> Result<Vec<Detection>, DetectionFailure> {
        let x = self.x;
        self.x = (self.x + self.step).min(600.0);
        Ok(vec![Detection::new(
            7,
            "person",
            BBox::new(x - 10.0, 100.0, x + 10.0, 200.0),
        )])
    }
}

fn walker_loader(calls: Arc<AtomicUsize>) -> ModelLoader {
    Box::new(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Walker { x: 200.0, step: 40.0 }) as Box<dyn DetectAndTrack>)
    })
}

fn test_config() -> CounterConfig {
    CounterConfig {
        frame_skip: 1,
        capture_fps: 100,
        loop_sleep_ms: 1,
        idle_sleep_ms: 2,
        stream_timeout_ms: 200,
        ..Default::default()
    }
}

fn frames() -> ReplayDevice {
    ReplayDevice::from_images(vec![RgbImage::new(640, 480)])
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn start_counts_a_crossing_and_records_it() {
    let calls = Arc::new(AtomicUsize::new(0));
    let sink = Arc::new(MemorySink::new());
    let system = CounterSystem::new(
        test_config(),
        Box::new(frames()),
        walker_loader(Arc::clone(&calls)),
        sink.clone(),
    )
    .unwrap();

    system.start().unwrap();
    assert!(system.get_stats().running);

    assert!(wait_until(Duration::from_secs(5), || system.get_stats().in_count == 1));
    let stats = system.get_stats();
    assert_eq!(stats.out_count, 0);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].direction, Direction::In);
    assert_eq!(events[0].track_id, 7);

    let summary = system.summary().unwrap();
    assert_eq!((summary.in_total, summary.out_total), (1, 0));
    assert_eq!(system.recent(10).unwrap().len(), 1);

    system.shutdown();
    assert!(!system.get_stats().running);
}

#[test]
fn camera_failure_is_reported_before_model_load() {
    let calls = Arc::new(AtomicUsize::new(0));
    let system = CounterSystem::new(
        test_config(),
        Box::new(ReplayDevice::from_images(Vec::new())),
        walker_loader(Arc::clone(&calls)),
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    let err = system.start().unwrap_err();
    assert_eq!(err.status(), "camera_failed");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!system.get_stats().running);
}

#[test]
fn model_failure_is_reported() {
    let loader: ModelLoader = Box::new(|| Err(ModelError::new("missing.onnx", "file not found")));
    let system = CounterSystem::new(
        test_config(),
        Box::new(frames()),
        loader,
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    let err = system.start().unwrap_err();
    assert_eq!(err.status(), "model_failed");
    assert!(err.to_string().contains("missing.onnx"));
    assert!(!system.is_running());
}

#[test]
fn model_is_loaded_once_across_restarts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let system = CounterSystem::new(
        test_config(),
        Box::new(frames()),
        walker_loader(Arc::clone(&calls)),
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    system.start().unwrap();
    system.stop();
    assert!(!system.get_stats().running);
    system.start().unwrap();
    assert!(system.get_stats().running);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn reset_zeroes_counts_and_keeps_event_log() {
    let sink = Arc::new(MemorySink::new());
    let system = CounterSystem::new(
        test_config(),
        Box::new(frames()),
        walker_loader(Arc::new(AtomicUsize::new(0))),
        sink.clone(),
    )
    .unwrap();

    system.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || system.get_stats().in_count == 1));

    system.reset().unwrap();
    let stats = system.get_stats();
    assert_eq!((stats.in_count, stats.out_count), (0, 0));
    assert!(stats.running);

    // 轨迹已清空, 目标停在线右侧不会再次计数
    thread::sleep(Duration::from_millis(200));
    assert_eq!(system.get_stats().in_count, 0);
    assert_eq!(sink.summary().unwrap().in_total, 1);
}

#[test]
fn stream_yields_frames_while_running_and_placeholder_when_idle() {
    let system = CounterSystem::new(
        test_config(),
        Box::new(frames()),
        walker_loader(Arc::new(AtomicUsize::new(0))),
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    let mut idle = system.stream().unwrap();
    let part = idle.next_part();
    assert!(part.starts_with(b"--frame\r\n"));
    assert_eq!(idle.counts(), (0, 1));
    let placeholder = placeholder_jpeg().unwrap();
    assert!(part.windows(placeholder.len()).any(|w| w == placeholder.as_slice()));

    system.start().unwrap();
    let mut live = system.stream().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        live.next_part();
        live.counts().0 > 0
    }));
    assert_eq!(live.content_type(), "multipart/x-mixed-replace; boundary=frame");
}

/// 坐标超出 i32 范围的检测框
struct Runaway;

impl DetectAndTrack for Runaway {
    fn detect_and_track(
        &mut self,
        _frame: &Frame,
        _conf: f32,
    ) -> Result<Vec<Detection>, DetectionFailure> {
        Ok(vec![Detection::new(
            1,
            "person",
            BBox::new(3.0e9, 0.0, 3.0e9, 10.0),
        )])
    }
}

#[test]
fn out_of_range_boxes_keep_the_system_responsive() {
    let loader: ModelLoader = Box::new(|| Ok(Box::new(Runaway) as Box<dyn DetectAndTrack>));
    let system = CounterSystem::new(
        test_config(),
        Box::new(frames()),
        loader,
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    system.start().unwrap();
    let buffer = system.frame_buffer();
    assert!(wait_until(Duration::from_secs(5), || buffer.evicted() > 0));

    system.reset().unwrap();
    assert!(system.get_stats().running);
    assert_eq!(system.get_stats().in_count, 0);
}

#[test]
fn concurrent_start_stop_leaves_flag_matching_the_loop() {
    let system = Arc::new(
        CounterSystem::new(
            test_config(),
            Box::new(frames()),
            walker_loader(Arc::new(AtomicUsize::new(0))),
            Arc::new(MemorySink::new()),
        )
        .unwrap(),
    );
    system.start().unwrap();

    let starter = {
        let system = Arc::clone(&system);
        thread::spawn(move || {
            for _ in 0..50 {
                system.start().unwrap();
            }
        })
    };
    let stopper = {
        let system = Arc::clone(&system);
        thread::spawn(move || {
            for _ in 0..50 {
                system.stop();
            }
        })
    };
    starter.join().unwrap();
    stopper.join().unwrap();

    let running = system.get_stats().running;
    let buffer = system.frame_buffer();
    // 等推理线程处理完积压命令后清空缓冲, 再观察是否还在出帧
    thread::sleep(Duration::from_millis(200));
    while buffer.try_consume().is_some() {}
    thread::sleep(Duration::from_millis(300));
    assert_eq!(buffer.len() > 0, running);
}
