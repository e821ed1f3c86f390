// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Fatal conditions raised by the swapchain and frame core.
///
/// Out-of-date and suboptimal presentation are not errors; they are handled
/// by recreating the swapchain and never leave the frame orchestrator.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("surface init failure during {what}: {result}")]
    SurfaceInit {
        what: &'static str,
        result: vk::Result,
    },

    #[error("format negotiation failure: {0}")]
    FormatNegotiation(&'static str),

    #[error("sync object creation failed: {0}")]
    SyncObject(vk::Result),

    #[error("{what} failed: {result}")]
    Vulkan {
        what: &'static str,
        result: vk::Result,
    },

    #[error("device lost during {0}")]
    DeviceLost(&'static str),

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error(
        "swapchain formats changed across recreation \
         (color {old_color:?} -> {new_color:?}, depth {old_depth:?} -> {new_depth:?})"
    )]
    FormatChanged {
        old_color: vk::Format,
        new_color: vk::Format,
        old_depth: vk::Format,
        new_depth: vk::Format,
    },

    #[error("frame call order violated: {0}")]
    FrameOrder(&'static str),

    #[error("resource load failed: {0}")]
    ResourceLoad(String),

    #[error("{elements} elements do not split into workgroups of {local_size}")]
    WorkgroupRemainder { elements: u32, local_size: u32 },

    #[error("vulkan bootstrap failed: {0:#}")]
    Platform(anyhow::Error),
}

impl RenderError {
    /// Maps a failed call onto the taxonomy. Lost devices and expired waits
    /// get their own kinds; everything else keeps the call name and code.
    pub(crate) fn vulkan(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost(what),
            vk::Result::TIMEOUT => Self::Timeout(what),
            result => Self::Vulkan { what, result },
        }
    }

    pub(crate) fn surface(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost(what),
            result => Self::SurfaceInit { what, result },
        }
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }

    /// The machine has no usable Vulkan loader, instance, surface or device.
    pub fn is_platform(&self) -> bool {
        matches!(self, Self::Platform(_))
    }
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;
