use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{
    BarcodeDetector, BarcodeFormat, Camera, CameraError, DEFAULT_FORMATS, Facing, FrameClock,
    IntervalFrameClock, ScanError, ScanState, VideoStream,
};
use crate::config::ScannerConfig;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// 进入 scanning 后多久未识别即超时
    pub timeout: Duration,
    pub facing: Facing,
    /// 识别器至少支持其中一种才算可用
    pub formats: Vec<BarcodeFormat>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            facing: Facing::Environment,
            formats: DEFAULT_FORMATS.to_vec(),
        }
    }
}

impl ScanOptions {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            ..Self::default()
        }
    }
}

/// 持有摄像头流；释放动作幂等，drop 时兜底执行
struct CameraGuard {
    stream: Option<Box<dyn VideoStream>>,
}

impl CameraGuard {
    fn new(stream: Box<dyn VideoStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    fn stream(&self) -> Option<&dyn VideoStream> {
        self.stream.as_deref()
    }

    fn stream_mut(&mut self) -> Option<&mut Box<dyn VideoStream>> {
        self.stream.as_mut()
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_all_tracks();
            stream.detach();
            match stream.active_tracks() {
                0 => log::debug!("Camera released"),
                n => log::warn!("Camera released with {n} track(s) still active"),
            }
        }
    }
}

impl Drop for CameraGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// 扫码会话
///
/// `scan` 需要 `&mut self`，同一会话同一时刻只会持有一路摄像头流；
/// 上一次扫码返回（或其 future 被丢弃）时摄像头已释放。
pub struct ScanSession {
    camera: Arc<dyn Camera>,
    detector: Arc<dyn BarcodeDetector>,
    clock: Box<dyn FrameClock>,
    options: ScanOptions,
    state: watch::Sender<ScanState>,
}

impl ScanSession {
    pub fn new(
        camera: Arc<dyn Camera>,
        detector: Arc<dyn BarcodeDetector>,
        clock: Box<dyn FrameClock>,
        options: ScanOptions,
    ) -> Self {
        let (state, _) = watch::channel(ScanState::Idle);
        Self {
            camera,
            detector,
            clock,
            options,
            state,
        }
    }

    pub fn from_config(
        camera: Arc<dyn Camera>,
        detector: Arc<dyn BarcodeDetector>,
        config: &ScannerConfig,
    ) -> Self {
        Self::new(
            camera,
            detector,
            Box::new(IntervalFrameClock::new(config.frame_rate_hz)),
            ScanOptions::from_config(config),
        )
    }

    pub fn state(&self) -> ScanState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    /// 关闭会话（用户关掉对话框），清除失败状态
    pub fn close(&mut self) {
        self.state.send_replace(ScanState::Idle);
    }

    /// 打开会话并等待唯一结果
    ///
    /// 成功、超时、取消，以及 future 被中途丢弃（界面卸载）都会回到 idle；
    /// 权限被拒、不支持识别时停留在对应状态供界面展示，直到调用 `close`。
    pub async fn scan(&mut self, cancel: &CancellationToken) -> Result<String, ScanError> {
        let Self {
            camera,
            detector,
            clock,
            options,
            state,
        } = self;
        let state: &watch::Sender<ScanState> = state;

        let mut reset = StateReset::new(state);
        let outcome = run(
            &**camera,
            &**detector,
            &mut **clock,
            options,
            state,
            cancel,
        )
        .await;
        if matches!(
            outcome,
            Err(ScanError::PermissionDenied
                | ScanError::CameraUnavailable(_)
                | ScanError::Unsupported)
        ) {
            reset.disarm();
        }
        outcome
    }
}

/// 会话结束时把状态复位为 idle；扫码 future 被丢弃时同样生效
struct StateReset<'a> {
    state: &'a watch::Sender<ScanState>,
    armed: bool,
}

impl<'a> StateReset<'a> {
    fn new(state: &'a watch::Sender<ScanState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StateReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(ScanState::Idle);
        }
    }
}

async fn run(
    camera: &dyn Camera,
    detector: &dyn BarcodeDetector,
    clock: &mut dyn FrameClock,
    options: &ScanOptions,
    state: &watch::Sender<ScanState>,
    cancel: &CancellationToken,
) -> Result<String, ScanError> {
    state.send_replace(ScanState::AcquiringCamera);

    let acquired = match until_cancelled(cancel, camera.acquire(options.facing)).await {
        Some(acquired) => acquired,
        None => return Err(cancelled(state)),
    };
    let mut guard = match acquired {
        Ok(stream) => CameraGuard::new(stream),
        Err(CameraError::PermissionDenied) => {
            log::warn!("Camera permission denied");
            state.send_replace(ScanState::PermissionDenied);
            return Err(ScanError::PermissionDenied);
        }
        Err(CameraError::Unavailable(msg)) => {
            log::warn!("Camera unavailable: {msg}");
            state.send_replace(ScanState::PermissionDenied);
            return Err(ScanError::CameraUnavailable(msg));
        }
    };

    let supported = match until_cancelled(cancel, detector.supported_formats()).await {
        Some(formats) => formats,
        None => {
            guard.release();
            return Err(cancelled(state));
        }
    };
    let usable = supported
        .map(|formats| options.formats.iter().any(|f| formats.contains(f)))
        .unwrap_or(false);
    if !usable {
        guard.release();
        log::warn!("Barcode detection unsupported for required formats");
        state.send_replace(ScanState::Unsupported);
        return Err(ScanError::Unsupported);
    }

    if let Some(stream) = guard.stream_mut()
        && until_cancelled(cancel, stream.wait_playing()).await.is_none()
    {
        guard.release();
        return Err(cancelled(state));
    }

    state.send_replace(ScanState::Scanning);
    let timeout = options.timeout;
    let watchdog = tokio::time::sleep(timeout);
    tokio::pin!(watchdog);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                guard.release();
                return Err(cancelled(state));
            }
            _ = &mut watchdog => {
                guard.release();
                return Err(timed_out(state, timeout));
            }
            _ = clock.next_frame() => {}
        }

        let Some(stream) = guard.stream() else {
            return Err(cancelled(state));
        };
        if !stream.has_enough_data() {
            continue;
        }

        let detected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = &mut watchdog => Some(Err(())),
            result = detector.detect(stream) => Some(Ok(result)),
        };

        match detected {
            None => {
                guard.release();
                return Err(cancelled(state));
            }
            Some(Err(())) => {
                guard.release();
                return Err(timed_out(state, timeout));
            }
            Some(Ok(Ok(found))) => {
                if let Some(first) = found.into_iter().next() {
                    guard.release();
                    log::info!("Barcode decoded ({:?})", first.format);
                    state.send_replace(ScanState::Decoded(first.raw_value.clone()));
                    return Ok(first.raw_value);
                }
            }
            Some(Ok(Err(e))) => {
                log::debug!("{e}, retrying on next frame");
            }
        }
    }
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

fn cancelled(state: &watch::Sender<ScanState>) -> ScanError {
    state.send_replace(ScanState::Cancelled);
    ScanError::Cancelled
}

fn timed_out(state: &watch::Sender<ScanState>, after: Duration) -> ScanError {
    log::info!("No barcode found within {}s", after.as_secs());
    state.send_replace(ScanState::TimedOut);
    ScanError::TimedOut { after }
}
