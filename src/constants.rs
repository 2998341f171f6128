// SPDX-License-Identifier: GPL-3.0-only

//! Fixed parameters of the capture and encode pipeline

/// Format bitrate for display (e.g., "2.5 Mbps" or "800 kbps")
pub fn format_bitrate(kbps: u32) -> String {
    if kbps >= 1000 {
        format!("{:.1} Mbps", kbps as f64 / 1000.0)
    } else {
        format!("{} kbps", kbps)
    }
}

/// Capture preset
pub mod capture {
    pub const WIDTH: u32 = 1280;
    pub const HEIGHT: u32 = 720;
    pub const FRAMERATE_NUM: u32 = 30;
    pub const FRAMERATE_DENOM: u32 = 1;

    /// Raw format produced by the capture pipeline and accepted by the encoder
    pub const PIXEL_FORMAT: &str = "NV12";
}

/// Hardware encoder parameters fixed for the session lifetime
pub mod encoder {
    /// Frame rate hint given to the encoder
    pub const EXPECTED_FRAME_RATE: u32 = 30;

    /// Constant bitrate target for 1280x720 at 30 fps
    pub const DEFAULT_BITRATE_KBPS: u32 = 2_500;

    /// Key frame every two seconds at the expected rate
    pub const DEFAULT_KEYFRAME_INTERVAL: u32 = 60;

    /// H.264 profile enforced downstream of the encoder
    pub const PROFILE: &str = "main";

    /// Width of the NAL unit length prefix in the AVC stream
    pub const NAL_LENGTH_SIZE: usize = 4;

    /// Completions buffered behind a missing sequence number before it is skipped
    pub const MAX_PENDING_COMPLETIONS: usize = 16;
}

/// Encoded unit handoff to the transport
pub mod sink {
    /// Bounded channel capacity between the encoder and the transport
    pub const CHANNEL_BUFFER_SIZE: usize = 64;
}

pub mod pipeline {
    /// Maximum buffer queue size (keep small for low latency)
    pub const MAX_BUFFERS: u32 = 2;

    /// Get number of threads for videoconvert based on available CPU threads
    pub fn videoconvert_threads() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4)
    }
}

/// Timing constants
pub mod timing {
    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Pipeline state change timeout on stop
    pub const STOP_TIMEOUT_SECS: u64 = 2;

    /// Pipeline playing state timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// How long to poll the bus for early pipeline errors after start
    pub const BUS_ERROR_CHECK_MS: u64 = 200;
}

/// Application information utilities
pub mod app_info {
    use std::path::Path;

    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }

    /// Check if the application is running inside a Flatpak sandbox
    pub fn is_flatpak() -> bool {
        Path::new("/.flatpak-info").exists()
    }

    /// Get the runtime environment string (e.g., "Flatpak" or "Native")
    pub fn runtime_environment() -> &'static str {
        if is_flatpak() { "Flatpak" } else { "Native" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bitrate() {
        assert_eq!(format_bitrate(800), "800 kbps");
        assert_eq!(format_bitrate(2_500), "2.5 Mbps");
    }
}
