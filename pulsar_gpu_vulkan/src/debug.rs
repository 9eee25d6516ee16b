/// Validation layer support
///
/// Compiled in only with the `vulkan-validation` feature; without it the
/// device never loads the debug-utils messenger and this module is empty.

#[cfg(feature = "vulkan-validation")]
pub(crate) mod messenger {
    use std::borrow::Cow;
    use std::ffi::CStr;

    use ash::vk;
    use pulsar_gpu::graphics::DebugSeverity;
    use pulsar_gpu::{gpu_error, gpu_info, gpu_warn};

    /// Severity flags the configured filter admits
    pub fn severity_flags(severity: DebugSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        match severity {
            DebugSeverity::ErrorsOnly => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            DebugSeverity::ErrorsAndWarnings => {
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            }
            DebugSeverity::All => {
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            }
        }
    }

    /// Routes validation messages into the engine logger
    pub unsafe extern "system" fn debug_callback(
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
        _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
        callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
        _user_data: *mut std::ffi::c_void,
    ) -> vk::Bool32 {
        let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
            Cow::Borrowed("<no message>")
        } else {
            CStr::from_ptr((*callback_data).p_message).to_string_lossy()
        };

        if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            gpu_error!("pulsar::vulkan", "Validation: {}", message);
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            gpu_warn!("pulsar::vulkan", "Validation: {}", message);
        } else {
            gpu_info!("pulsar::vulkan", "Validation: {}", message);
        }

        vk::FALSE
    }
}
