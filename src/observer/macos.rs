//! macOS foreground-window lookup via `CGWindowListCopyWindowInfo`.
//!
//! The on-screen window list is ordered front to back, so the first entry on
//! the normal window layer (0) is the foreground window. `kCGWindowName` is
//! only populated when the process has Screen Recording permission; without
//! it we fall back to the owning application's name.

use crate::observer::types::{ForegroundWindowApi, PlatformError};
use core_foundation::array::CFArray;
use core_foundation::base::{CFType, TCFType};
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::window::{
    copy_window_info, kCGNullWindowID, kCGWindowLayer, kCGWindowListExcludeDesktopElements,
    kCGWindowListOptionOnScreenOnly, kCGWindowName, kCGWindowOwnerName,
};

/// Reads the title of the frontmost normal-layer window.
#[derive(Debug, Default)]
pub struct MacOSForegroundApi;

impl MacOSForegroundApi {
    pub fn new() -> Self {
        Self
    }
}

impl ForegroundWindowApi for MacOSForegroundApi {
    fn foreground_title(&mut self) -> Result<Option<String>, PlatformError> {
        let options = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
        let raw = copy_window_info(options, kCGNullWindowID)
            .ok_or_else(|| PlatformError::QueryFailed("window list unavailable".to_string()))?;

        // SAFETY: CGWindowListCopyWindowInfo returns an array of dictionaries
        // keyed by CFString.
        let windows: CFArray<CFDictionary<CFString, CFType>> =
            unsafe { CFArray::wrap_under_get_rule(raw.as_concrete_TypeRef()) };

        // SAFETY: the key constants are static CFStrings owned by CoreGraphics.
        let (layer_key, name_key, owner_key) = unsafe {
            (
                CFString::wrap_under_get_rule(kCGWindowLayer),
                CFString::wrap_under_get_rule(kCGWindowName),
                CFString::wrap_under_get_rule(kCGWindowOwnerName),
            )
        };

        for window in windows.iter() {
            let layer = window
                .find(&layer_key)
                .and_then(|v| v.downcast::<CFNumber>())
                .and_then(|n| n.to_i32())
                .unwrap_or(-1);
            if layer != 0 {
                continue;
            }

            let name = string_value(&window, &name_key).filter(|s| !s.trim().is_empty());
            let title = name.or_else(|| string_value(&window, &owner_key));
            return Ok(title);
        }

        Ok(None)
    }
}

fn string_value(window: &CFDictionary<CFString, CFType>, key: &CFString) -> Option<String> {
    window
        .find(key)
        .and_then(|v| v.downcast::<CFString>())
        .map(|s| s.to_string())
}

/// Whether window titles (not just owner names) are readable.
///
/// macOS offers no direct query; a window list that carries at least one
/// `kCGWindowName` means Screen Recording has been granted.
pub fn check_permission() -> bool {
    let options = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
    let Some(raw) = copy_window_info(options, kCGNullWindowID) else {
        return false;
    };
    // SAFETY: see `foreground_title`.
    let windows: CFArray<CFDictionary<CFString, CFType>> =
        unsafe { CFArray::wrap_under_get_rule(raw.as_concrete_TypeRef()) };
    let name_key = unsafe { CFString::wrap_under_get_rule(kCGWindowName) };
    windows
        .iter()
        .any(|window| string_value(&window, &name_key).is_some())
}
