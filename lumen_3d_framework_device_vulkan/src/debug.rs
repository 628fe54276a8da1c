/// Vulkan debug messenger - routes validation layer messages into the
/// framework log with colored severity tags and keeps running counters.

use std::borrow::Cow;
use std::ffi::CStr;
use std::sync::atomic::{AtomicU32, Ordering};

use ash::vk;
use colored::Colorize;
use lumen_3d_framework::{lumen_debug, lumen_error, lumen_info, lumen_warn};

const SOURCE: &str = "lumen3d::vulkan";

/// Validation message counters since device creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub errors: u32,
    pub warnings: u32,
    pub info: u32,
    pub verbose: u32,
}

struct StatsTracker {
    errors: AtomicU32,
    warnings: AtomicU32,
    info: AtomicU32,
    verbose: AtomicU32,
}

static VALIDATION_STATS: StatsTracker = StatsTracker {
    errors: AtomicU32::new(0),
    warnings: AtomicU32::new(0),
    info: AtomicU32::new(0),
    verbose: AtomicU32::new(0),
};

/// Validation message counts accumulated since device creation
pub fn get_validation_stats() -> ValidationStats {
    ValidationStats {
        errors: VALIDATION_STATS.errors.load(Ordering::Relaxed),
        warnings: VALIDATION_STATS.warnings.load(Ordering::Relaxed),
        info: VALIDATION_STATS.info.load(Ordering::Relaxed),
        verbose: VALIDATION_STATS.verbose.load(Ordering::Relaxed),
    }
}

pub(crate) fn reset_validation_stats() {
    VALIDATION_STATS.errors.store(0, Ordering::Relaxed);
    VALIDATION_STATS.warnings.store(0, Ordering::Relaxed);
    VALIDATION_STATS.info.store(0, Ordering::Relaxed);
    VALIDATION_STATS.verbose.store(0, Ordering::Relaxed);
}

/// Callback registered on the VK_EXT_debug_utils messenger
pub(crate) unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;
    let message = if callback_data.p_message.is_null() {
        Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    let kind = if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation".yellow()
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance".cyan()
    } else {
        "general".normal()
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        VALIDATION_STATS.errors.fetch_add(1, Ordering::Relaxed);
        lumen_error!(SOURCE, "[{}] {}", kind, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        VALIDATION_STATS.warnings.fetch_add(1, Ordering::Relaxed);
        lumen_warn!(SOURCE, "[{}] {}", kind, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        VALIDATION_STATS.info.fetch_add(1, Ordering::Relaxed);
        lumen_info!(SOURCE, "[{}] {}", kind, message);
    } else {
        VALIDATION_STATS.verbose.fetch_add(1, Ordering::Relaxed);
        lumen_debug!(SOURCE, "[{}] {}", kind, message);
    }

    // Never abort the Vulkan call that triggered the message
    vk::FALSE
}
