//! Windows foreground-window lookup via `GetForegroundWindow`.

use crate::observer::types::{ForegroundWindowApi, PlatformError};
use windows::Win32::UI::WindowsAndMessaging::{
    GetForegroundWindow, GetWindowTextLengthW, GetWindowTextW,
};

/// Reads the title of the foreground window through the Win32 API.
#[derive(Debug, Default)]
pub struct WindowsForegroundApi;

impl WindowsForegroundApi {
    pub fn new() -> Self {
        Self
    }
}

impl ForegroundWindowApi for WindowsForegroundApi {
    fn foreground_title(&mut self) -> Result<Option<String>, PlatformError> {
        // SAFETY: GetForegroundWindow takes no arguments and returns a null
        // handle when no window has focus.
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.0.is_null() {
            return Ok(None);
        }

        // SAFETY: hwnd was just returned by GetForegroundWindow. A window that
        // closed in the meantime yields a length of zero.
        let len = unsafe { GetWindowTextLengthW(hwnd) };
        if len <= 0 {
            return Ok(None);
        }

        let mut buf = vec![0u16; len as usize + 1];
        // SAFETY: buf is sized for the reported length plus the terminator.
        let copied = unsafe { GetWindowTextW(hwnd, &mut buf) };
        if copied <= 0 {
            return Ok(None);
        }

        let title = String::from_utf16(&buf[..copied as usize])
            .map_err(|e| PlatformError::QueryFailed(format!("invalid UTF-16 title: {e}")))?;
        Ok(Some(title))
    }
}

/// Reading window titles needs no special permission on Windows.
pub fn check_permission() -> bool {
    true
}
