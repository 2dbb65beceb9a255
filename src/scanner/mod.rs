//! 摄像头扫码会话
//!
//! 会话负责：申请后置摄像头、确认条码识别能力、按显示刷新节奏逐帧识别、
//! 超时看门狗，以及在任何退出路径上释放摄像头。摄像头、识别器、帧时钟
//! 都通过 trait 注入，运行环境（浏览器桥接、原生 SDK、测试替身）各自实现。

pub mod clock;
pub mod session;

pub use clock::IntervalFrameClock;
pub use session::{ScanOptions, ScanSession};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    User,
    /// 后置摄像头
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeFormat {
    Aztec,
    Codabar,
    Code128,
    Code39,
    Code93,
    DataMatrix,
    Ean13,
    Ean8,
    Itf,
    Pdf417,
    QrCode,
    UpcA,
    UpcE,
}

/// 默认需要的码制：零售条码 + Code128/39 + 二维码
pub const DEFAULT_FORMATS: &[BarcodeFormat] = &[
    BarcodeFormat::Ean13,
    BarcodeFormat::Ean8,
    BarcodeFormat::UpcA,
    BarcodeFormat::UpcE,
    BarcodeFormat::Code128,
    BarcodeFormat::Code39,
    BarcodeFormat::QrCode,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedBarcode {
    pub raw_value: String,
    pub format: BarcodeFormat,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Camera unavailable: {0}")]
    Unavailable(String),
}

/// 单帧识别失败（例如页面未聚焦），下一帧重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Barcode detection failed: {0}")]
pub struct DetectError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Barcode detection is not supported on this device")]
    Unsupported,

    #[error("No barcode found within {} seconds", .after.as_secs())]
    TimedOut { after: Duration },

    #[error("Scan cancelled")]
    Cancelled,
}

/// 会话状态
///
/// idle -> acquiring_camera -> {permission_denied | unsupported | scanning}
/// scanning -> {decoded | timed_out | cancelled}
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Idle,
    AcquiringCamera,
    PermissionDenied,
    Unsupported,
    Scanning,
    Decoded(String),
    TimedOut,
    Cancelled,
}

/// 摄像头视频流
#[async_trait]
pub trait VideoStream: Send + Sync {
    /// 等待视频开始播放
    async fn wait_playing(&mut self);

    /// 当前帧数据是否足够进行识别
    fn has_enough_data(&self) -> bool;

    fn active_tracks(&self) -> usize;

    fn stop_all_tracks(&mut self);

    /// 断开视频元素与流的关联
    fn detach(&mut self);
}

#[async_trait]
pub trait Camera: Send + Sync {
    async fn acquire(&self, facing: Facing) -> Result<Box<dyn VideoStream>, CameraError>;
}

#[async_trait]
pub trait BarcodeDetector: Send + Sync {
    /// None 表示运行环境没有原生识别能力
    async fn supported_formats(&self) -> Option<Vec<BarcodeFormat>>;

    async fn detect(&self, frame: &dyn VideoStream) -> Result<Vec<DetectedBarcode>, DetectError>;
}

/// 显示刷新节拍
#[async_trait]
pub trait FrameClock: Send {
    async fn next_frame(&mut self);
}
